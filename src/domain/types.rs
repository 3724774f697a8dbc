//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - passed between the per-location workers and the compile phase
//! - persisted in result bundles and `settings.json`
//! - exported to CSV

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Location identifier.
///
/// Real locations carry positive ids. Post-model aggregates are published
/// under the negated id of the location they summarise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocationId(pub i64);

impl LocationId {
    /// Id used for the synthetic model-aggregate copy of this location.
    pub fn aggregate(self) -> LocationId {
        LocationId(-self.0)
    }
}

impl std::fmt::Display for LocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The raw rate channels tracked per location and date.
///
/// This is the single list consumed by tail blanking, the model-data schema,
/// CSV ingest and aggregation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Indicator {
    #[serde(rename = "Confirmed case rate")]
    ConfirmedCaseRate,
    #[serde(rename = "Hospitalization rate")]
    HospitalizationRate,
    #[serde(rename = "Death rate")]
    DeathRate,
}

impl Indicator {
    pub const ALL: [Indicator; 3] = [
        Indicator::ConfirmedCaseRate,
        Indicator::HospitalizationRate,
        Indicator::DeathRate,
    ];

    pub fn column_name(self) -> &'static str {
        match self {
            Indicator::ConfirmedCaseRate => "Confirmed case rate",
            Indicator::HospitalizationRate => "Hospitalization rate",
            Indicator::DeathRate => "Death rate",
        }
    }
}

impl std::fmt::Display for Indicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.column_name())
    }
}

/// First-stage ratio model: case fatality (CFR) or hospital fatality (HFR).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum FirstStageKind {
    Cfr,
    Hfr,
}

impl FirstStageKind {
    pub const ALL: [FirstStageKind; 2] = [FirstStageKind::Cfr, FirstStageKind::Hfr];

    pub fn label(self) -> &'static str {
        match self {
            FirstStageKind::Cfr => "CFR",
            FirstStageKind::Hfr => "HFR",
        }
    }

    /// Indicator the first-stage model regresses deaths on.
    pub fn spline_indicator(self) -> Indicator {
        match self {
            FirstStageKind::Cfr => Indicator::ConfirmedCaseRate,
            FirstStageKind::Hfr => Indicator::HospitalizationRate,
        }
    }

    pub fn predicted_column(self) -> &'static str {
        match self {
            FirstStageKind::Cfr => "Predicted death rate (CFR)",
            FirstStageKind::Hfr => "Predicted death rate (HFR)",
        }
    }
}

/// One date of a location's model data.
///
/// Every column of the model-data contract is present on every row; a value
/// that was not produced is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRow {
    pub date: NaiveDate,
    pub confirmed_case_rate: Option<f64>,
    pub hospitalization_rate: Option<f64>,
    pub death_rate: Option<f64>,
    pub predicted_death_rate_cfr: Option<f64>,
    pub predicted_death_rate_hfr: Option<f64>,
}

impl ModelRow {
    pub fn empty(date: NaiveDate) -> Self {
        Self {
            date,
            confirmed_case_rate: None,
            hospitalization_rate: None,
            death_rate: None,
            predicted_death_rate_cfr: None,
            predicted_death_rate_hfr: None,
        }
    }

    pub fn indicator(&self, indicator: Indicator) -> Option<f64> {
        match indicator {
            Indicator::ConfirmedCaseRate => self.confirmed_case_rate,
            Indicator::HospitalizationRate => self.hospitalization_rate,
            Indicator::DeathRate => self.death_rate,
        }
    }

    pub fn indicator_mut(&mut self, indicator: Indicator) -> &mut Option<f64> {
        match indicator {
            Indicator::ConfirmedCaseRate => &mut self.confirmed_case_rate,
            Indicator::HospitalizationRate => &mut self.hospitalization_rate,
            Indicator::DeathRate => &mut self.death_rate,
        }
    }

    pub fn prediction(&self, kind: FirstStageKind) -> Option<f64> {
        match kind {
            FirstStageKind::Cfr => self.predicted_death_rate_cfr,
            FirstStageKind::Hfr => self.predicted_death_rate_hfr,
        }
    }

    pub fn prediction_mut(&mut self, kind: FirstStageKind) -> &mut Option<f64> {
        match kind {
            FirstStageKind::Cfr => &mut self.predicted_death_rate_cfr,
            FirstStageKind::Hfr => &mut self.predicted_death_rate_hfr,
        }
    }

    /// True when at least one tracked indicator is observed on this date.
    pub fn has_any_indicator(&self) -> bool {
        Indicator::ALL.iter().any(|&i| self.indicator(i).is_some())
    }
}

/// A single location's model data, rows sorted by date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationSeries {
    pub location_id: LocationId,
    pub location_name: String,
    pub population: f64,
    /// Holdout depth the rows were produced under (`None` for raw inputs).
    pub doy_holdout: Option<usize>,
    pub rows: Vec<ModelRow>,
}

impl LocationSeries {
    pub fn observed_count(&self, indicator: Indicator) -> usize {
        self.rows
            .iter()
            .filter(|r| r.indicator(indicator).is_some())
            .count()
    }

    pub fn first_date(&self) -> Option<NaiveDate> {
        self.rows.first().map(|r| r.date)
    }

    pub fn last_date(&self) -> Option<NaiveDate> {
        self.rows.last().map(|r| r.date)
    }

    /// Largest observed value of an indicator (cumulative series peak).
    pub fn max_observed(&self, indicator: Indicator) -> Option<f64> {
        self.rows
            .iter()
            .filter_map(|r| r.indicator(indicator))
            .fold(None, |acc, v| Some(acc.map_or(v, |a: f64| a.max(v))))
    }

    pub fn sort_rows(&mut self) {
        self.rows.sort_by_key(|r| r.date);
    }
}

/// Settings for one first-stage ratio model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FirstStageSettings {
    pub model_type: FirstStageKind,
    pub dep_var: Indicator,
    pub spline_var: Indicator,
    /// Extra regressors beyond the spline indicator.
    #[serde(default)]
    pub indep_vars: Vec<Indicator>,
}

impl FirstStageSettings {
    pub fn for_kind(kind: FirstStageKind) -> Self {
        Self {
            model_type: kind,
            dep_var: Indicator::DeathRate,
            spline_var: kind.spline_indicator(),
            indep_vars: Vec::new(),
        }
    }
}

/// Settings handed to the series synthesizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SmootherSettings {
    pub obs_var: Indicator,
    pub pred_vars: Vec<FirstStageKind>,
    pub spline_vars: Vec<Indicator>,
}

impl Default for SmootherSettings {
    fn default() -> Self {
        Self {
            obs_var: Indicator::DeathRate,
            pred_vars: FirstStageKind::ALL.to_vec(),
            spline_vars: vec![Indicator::ConfirmedCaseRate, Indicator::HospitalizationRate],
        }
    }
}

/// Everything a per-location worker needs besides its own series.
///
/// Written to `settings.json` in the working directory so a single location
/// can be re-run by `deaths model`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSettings {
    pub cfr: FirstStageSettings,
    pub hfr: FirstStageSettings,
    pub smoother: SmootherSettings,
    pub no_cases_locs: BTreeSet<LocationId>,
    pub no_hosp_locs: BTreeSet<LocationId>,
    pub results_dir: PathBuf,
    pub holdouts: usize,
    pub n_draws: usize,
    pub seed: u64,
}

impl ModelSettings {
    pub fn new(results_dir: PathBuf, holdouts: usize, n_draws: usize, seed: u64) -> Self {
        Self {
            cfr: FirstStageSettings::for_kind(FirstStageKind::Cfr),
            hfr: FirstStageSettings::for_kind(FirstStageKind::Hfr),
            smoother: SmootherSettings::default(),
            no_cases_locs: BTreeSet::new(),
            no_hosp_locs: BTreeSet::new(),
            results_dir,
            holdouts,
            n_draws,
            seed,
        }
    }

    pub fn first_stage(&self, kind: FirstStageKind) -> &FirstStageSettings {
        match kind {
            FirstStageKind::Cfr => &self.cfr,
            FirstStageKind::Hfr => &self.hfr,
        }
    }

    /// Whether the location skips the given first-stage model.
    pub fn skips(&self, location_id: LocationId, kind: FirstStageKind) -> bool {
        match kind {
            FirstStageKind::Cfr => self.no_cases_locs.contains(&location_id),
            FirstStageKind::Hfr => self.no_hosp_locs.contains(&location_id),
        }
    }
}
