use std::collections::BTreeMap;

use chrono::NaiveDate;
use deaths_spline::compile::{counts_to_rates, daily_from_cumulative};
use deaths_spline::domain::{DrawRow, DrawTable, LocationId};
use deaths_spline::ensemble::{blank_tail, plan_holdouts};
use deaths_spline::error::PipelineError;
use deaths_spline::report::interval;
use proptest::prelude::*;

fn day(i: usize) -> NaiveDate {
    NaiveDate::from_ymd_opt(2020, 4, 1).unwrap() + chrono::Duration::days(i as i64)
}

fn table(n_draws: usize, rows: &[Vec<f64>], population: Option<f64>) -> DrawTable {
    let rows = rows
        .iter()
        .enumerate()
        .map(|(i, values)| DrawRow {
            location_id: LocationId(5),
            date: day(i),
            population,
            values: values.iter().copied().map(Some).collect(),
        })
        .collect();
    DrawTable::from_rows((0..n_draws).collect(), rows).unwrap()
}

proptest! {
    #[test]
    fn holdout_plan_spends_the_whole_budget(holdouts in 0usize..12, n_draws in 1usize..5000) {
        let plan = plan_holdouts(holdouts, n_draws).unwrap();
        prop_assert_eq!(plan.len(), holdouts + 1);
        prop_assert_eq!(plan.iter().map(|it| it.draws).sum::<usize>(), n_draws);

        let base = n_draws / (holdouts + 1);
        let mut next = 0;
        for (depth, it) in plan.iter().enumerate() {
            prop_assert_eq!(it.depth, depth);
            prop_assert_eq!(it.draw_offset, next);
            if depth < holdouts {
                prop_assert_eq!(it.draws, base);
            }
            next = it.draw_range().end;
        }
    }

    #[test]
    fn blanking_removes_only_the_trailing_observations(
        values in prop::collection::vec(prop::option::of(0.0f64..1.0), 0..40),
        depth in 0usize..50,
    ) {
        let observed = values.iter().filter(|v| v.is_some()).count();
        let mut blanked = values.clone();
        blank_tail(&mut blanked, depth);

        let remaining = blanked.iter().filter(|v| v.is_some()).count();
        prop_assert_eq!(remaining, observed - depth.min(observed));

        // Every surviving observation is unchanged and precedes every blanked one.
        let kept: Vec<f64> = blanked.iter().flatten().copied().collect();
        let original: Vec<f64> = values.iter().flatten().copied().take(remaining).collect();
        prop_assert_eq!(kept, original);
    }

    #[test]
    fn relabelled_iterations_merge_into_contiguous_ids(widths in prop::collection::vec(1usize..20, 1..6)) {
        let mut offset = 0;
        let mut tables = Vec::new();
        for &w in &widths {
            tables.push(table(w, &[vec![1.0; w]], None).relabel(offset));
            offset += w;
        }
        let merged = DrawTable::outer_merge(tables).unwrap();
        prop_assert!(merged.has_contiguous_ids(offset));
        prop_assert!(!merged.rows()[0].has_missing());
    }

    #[test]
    fn overlapping_draw_ids_collide(w in 1usize..20, shift in 0usize..19) {
        prop_assume!(shift < w);
        let a = table(w, &[vec![1.0; w]], None);
        let b = table(w, &[vec![2.0; w]], None).relabel(shift);
        let err = DrawTable::outer_merge(vec![a, b]).unwrap_err();
        prop_assert!(matches!(err, PipelineError::DrawIdCollision { .. }), "{err}");
    }

    #[test]
    fn rescaling_to_counts_and_back_recovers_rates(
        rates in prop::collection::vec(prop::collection::vec(0.0f64..1e-2, 4), 1..10),
        population in 1.0f64..1e8,
    ) {
        let counts = table(4, &rates, Some(population)).rescale_by_population().unwrap();
        prop_assert!(counts.rows().iter().all(|r| r.population.is_none()));

        let populations = BTreeMap::from([(LocationId(5), population)]);
        let back = counts_to_rates(&counts, &populations).unwrap();
        for (row, expected) in back.rows().iter().zip(&rates) {
            for (got, want) in row.values.iter().flatten().zip(expected) {
                prop_assert!((got - want).abs() <= 1e-12 + want * 1e-9);
            }
        }
    }

    #[test]
    fn daily_counts_sum_back_to_cumulative(increments in prop::collection::vec(0.0f64..100.0, 1..30)) {
        let cumulative: Vec<Vec<f64>> = increments
            .iter()
            .scan(0.0, |acc, d| {
                *acc += d;
                Some(vec![*acc])
            })
            .collect();
        let daily = daily_from_cumulative(&table(1, &cumulative, None));

        let mut total = 0.0;
        for (row, expected) in daily.rows().iter().zip(&cumulative) {
            total += row.values[0].unwrap();
            prop_assert!((total - expected[0]).abs() < 1e-6);
        }
    }

    #[test]
    fn interval_brackets_the_mean(values in prop::collection::vec(-1e3f64..1e3, 1..200)) {
        let draws: Vec<Option<f64>> = values.iter().copied().map(Some).collect();
        let iv = interval(&draws).unwrap();
        prop_assert!(iv.lower <= iv.upper);
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        prop_assert!(iv.lower >= min - 1e-9 && iv.upper <= max + 1e-9);
        prop_assert!(iv.mean >= min - 1e-9 && iv.mean <= max + 1e-9);
    }
}
