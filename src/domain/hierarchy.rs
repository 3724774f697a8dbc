//! Location tree and aggregate declarations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::LocationId;
use crate::error::PipelineError;

/// Id of the synthetic global root used for post-model aggregates.
pub const GLOBAL_LOCATION_ID: LocationId = LocationId(1);

pub const AGGREGATE_NAME_SUFFIX: &str = " (model aggregate)";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub id: LocationId,
    /// Equal to `id` for a root.
    pub parent_id: LocationId,
    pub name: String,
    pub population: Option<f64>,
}

/// Read-only location tree shared by every stage.
#[derive(Debug, Clone)]
pub struct Hierarchy {
    locations: BTreeMap<LocationId, Location>,
    children: BTreeMap<LocationId, Vec<LocationId>>,
}

/// A declared aggregate: a parent id and the leaf ids it sums.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregateSpec {
    pub id: LocationId,
    pub name: String,
    pub constituents: Vec<LocationId>,
}

impl Hierarchy {
    pub fn from_locations(locations: Vec<Location>) -> Result<Self, PipelineError> {
        let mut by_id = BTreeMap::new();
        for loc in locations {
            let id = loc.id;
            if by_id.insert(id, loc).is_some() {
                return Err(PipelineError::Config(format!("hierarchy lists location {id} twice")));
            }
        }

        let mut children: BTreeMap<LocationId, Vec<LocationId>> = BTreeMap::new();
        for loc in by_id.values() {
            if loc.parent_id == loc.id {
                continue;
            }
            if !by_id.contains_key(&loc.parent_id) {
                return Err(PipelineError::Config(format!(
                    "location {} has unknown parent {}",
                    loc.id, loc.parent_id
                )));
            }
            children.entry(loc.parent_id).or_default().push(loc.id);
        }

        Ok(Self {
            locations: by_id,
            children,
        })
    }

    pub fn get(&self, id: LocationId) -> Option<&Location> {
        self.locations.get(&id)
    }

    pub fn contains(&self, id: LocationId) -> bool {
        self.locations.contains_key(&id)
    }

    pub fn locations(&self) -> impl Iterator<Item = &Location> {
        self.locations.values()
    }

    pub fn is_leaf(&self, id: LocationId) -> bool {
        self.contains(id) && !self.children.contains_key(&id)
    }

    /// Most-detailed locations (no children), ascending by id.
    pub fn leaves(&self) -> Vec<LocationId> {
        self.locations.keys().copied().filter(|&id| self.is_leaf(id)).collect()
    }

    /// Nodes with at least one child, ascending by id.
    pub fn internal_nodes(&self) -> Vec<LocationId> {
        self.children.keys().copied().collect()
    }

    /// Leaves in the subtree rooted at `id` (the node itself if it is a leaf).
    pub fn leaves_under(&self, id: LocationId) -> Vec<LocationId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            match self.children.get(&node) {
                Some(kids) => stack.extend(kids.iter().copied()),
                None if self.contains(node) => out.push(node),
                None => {}
            }
        }
        out.sort();
        out
    }

    pub fn name_of(&self, id: LocationId) -> Option<&str> {
        self.get(id).map(|l| l.name.as_str())
    }

    /// Aggregates for every internal node, optionally preceded by a global root.
    ///
    /// When `include_global` is set and the tree has no node with
    /// `GLOBAL_LOCATION_ID`, a synthetic "Global" aggregate over every leaf is
    /// added first.
    pub fn aggregate_specs(&self, include_global: bool) -> Vec<AggregateSpec> {
        let mut specs = Vec::new();
        if include_global && !self.contains(GLOBAL_LOCATION_ID) {
            specs.push(AggregateSpec {
                id: GLOBAL_LOCATION_ID,
                name: "Global".to_string(),
                constituents: self.leaves(),
            });
        }
        for id in self.internal_nodes() {
            if !include_global && id == GLOBAL_LOCATION_ID {
                continue;
            }
            specs.push(AggregateSpec {
                id,
                name: self.name_of(id).unwrap_or_default().to_string(),
                constituents: self.leaves_under(id),
            });
        }
        specs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(id: i64, parent: i64, name: &str) -> Location {
        Location {
            id: LocationId(id),
            parent_id: LocationId(parent),
            name: name.to_string(),
            population: None,
        }
    }

    fn sample() -> Hierarchy {
        Hierarchy::from_locations(vec![
            loc(1, 1, "Global"),
            loc(10, 1, "Country"),
            loc(11, 10, "State A"),
            loc(12, 10, "State B"),
            loc(20, 1, "Island"),
        ])
        .unwrap()
    }

    #[test]
    fn leaves_and_subtrees() {
        let h = sample();
        assert_eq!(h.leaves(), vec![LocationId(11), LocationId(12), LocationId(20)]);
        assert_eq!(h.leaves_under(LocationId(10)), vec![LocationId(11), LocationId(12)]);
        assert_eq!(h.leaves_under(LocationId(20)), vec![LocationId(20)]);
        assert!(h.leaves_under(LocationId(99)).is_empty());
    }

    #[test]
    fn aggregate_specs_respect_global_flag() {
        let h = sample();
        let pre: Vec<LocationId> = h.aggregate_specs(false).iter().map(|s| s.id).collect();
        assert_eq!(pre, vec![LocationId(10)]);

        let post = h.aggregate_specs(true);
        assert_eq!(post[0].id, GLOBAL_LOCATION_ID);
        assert_eq!(post[0].constituents.len(), 3);
    }

    #[test]
    fn synthetic_global_added_when_tree_lacks_it() {
        let h = Hierarchy::from_locations(vec![loc(5, 5, "Country"), loc(6, 5, "A"), loc(7, 5, "B")]).unwrap();
        let post = h.aggregate_specs(true);
        assert_eq!(post[0].id, GLOBAL_LOCATION_ID);
        assert_eq!(post[0].name, "Global");
        assert_eq!(post[1].id, LocationId(5));
    }

    #[test]
    fn unknown_parent_is_rejected() {
        let err = Hierarchy::from_locations(vec![loc(2, 3, "orphan")]).unwrap_err();
        assert!(err.to_string().contains("unknown parent"));
    }
}
