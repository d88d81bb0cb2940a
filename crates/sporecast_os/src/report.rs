#![forbid(unsafe_code)]

use sporecast_contracts::hardware::Dimension;
use sporecast_contracts::rollup::RollupAggregate;
use sporecast_contracts::simulation::{DrawSet, SimulationRecord};

/// Single-value summary of a draw set: mean plus the 5th, 50th and 95th
/// percentiles. For a scalar every field is the scalar itself.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileSummary {
    pub mean: f64,
    pub p05: f64,
    pub p50: f64,
    pub p95: f64,
}

pub fn summarize(draws: &DrawSet) -> PercentileSummary {
    PercentileSummary {
        mean: draws.mean(),
        p05: draws.quantile(0.05),
        p50: draws.quantile(0.5),
        p95: draws.quantile(0.95),
    }
}

pub fn density_summary(record: &SimulationRecord) -> PercentileSummary {
    summarize(&record.density)
}

pub fn cfu_summary(record: &SimulationRecord) -> PercentileSummary {
    summarize(&record.cfu)
}

/// Share of density draws under a group's target density. `None` when the
/// aggregate carries no data for the dimension.
pub fn threshold_satisfaction(
    aggregate: &RollupAggregate,
    dimension: Dimension,
    target_density: f64,
) -> Option<f64> {
    let dim = match dimension {
        Dimension::Area => aggregate.area.as_ref(),
        Dimension::Volume => aggregate.volume.as_ref(),
    };
    dim.map(|d| d.density.fraction_below(target_density))
}

pub fn record_threshold_satisfaction(record: &SimulationRecord, target_density: f64) -> f64 {
    record.density.fraction_below(target_density)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sporecast_contracts::rollup::DimensionAggregate;
    use sporecast_contracts::simulation::SimMode;

    #[test]
    fn at_report_01_scalar_summary_is_the_scalar() {
        let rec = SimulationRecord::v1(
            SimMode::Spec,
            None,
            DrawSet::Scalar(50.0),
            DrawSet::Scalar(100.0),
        );
        let s = density_summary(&rec);
        assert_eq!(s.mean, 50.0);
        assert_eq!(s.p05, 50.0);
        assert_eq!(s.p95, 50.0);
    }

    #[test]
    fn at_report_02_vector_summary_orders_percentiles() {
        let draws = DrawSet::Draws((1..=100).map(|i| i as f64).collect());
        let s = summarize(&draws);
        assert!(s.p05 < s.p50 && s.p50 < s.p95);
        assert!((s.mean - 50.5).abs() < 1e-9);
    }

    #[test]
    fn at_report_03_threshold_satisfaction_over_aggregates() {
        let agg = RollupAggregate::v1(
            Some(DimensionAggregate {
                total_extent: 2.0,
                sampled_extent: 0.5,
                density: DrawSet::Draws(vec![10.0, 20.0, 30.0, 40.0]),
                cfu: DrawSet::Draws(vec![20.0, 40.0, 60.0, 80.0]),
            }),
            None,
        );
        let frac = threshold_satisfaction(&agg, Dimension::Area, 25.0).unwrap();
        assert!((frac - 0.5).abs() < 1e-12);
        assert!(threshold_satisfaction(&agg, Dimension::Volume, 25.0).is_none());
    }
}
