#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::simulation::DrawSet;
use crate::SchemaVersion;

pub const ROLLUP_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Aggregated estimate for one dimension of a rollup node: the summed
/// component extent, the portion of it carried by directly sampled
/// components, the extent-weighted density mixture, and the summed CFU.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionAggregate {
    pub total_extent: f64,
    pub sampled_extent: f64,
    pub density: DrawSet,
    pub cfu: DrawSet,
}

impl DimensionAggregate {
    pub fn sampled_fraction(&self) -> f64 {
        if self.total_extent > 0.0 {
            self.sampled_extent / self.total_extent
        } else {
            0.0
        }
    }
}

/// Per-node rollup result. A dimension with no contributing extent below the
/// node is absent rather than zero, so "no data" and "zero burden" stay
/// distinguishable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollupAggregate {
    pub schema_version: SchemaVersion,
    pub area: Option<DimensionAggregate>,
    pub volume: Option<DimensionAggregate>,
}

impl RollupAggregate {
    pub fn v1(area: Option<DimensionAggregate>, volume: Option<DimensionAggregate>) -> Self {
        Self {
            schema_version: ROLLUP_CONTRACT_VERSION,
            area,
            volume,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.area.is_none() && self.volume.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_rollup_01_sampled_fraction_guards_zero_total() {
        let agg = DimensionAggregate {
            total_extent: 0.0,
            sampled_extent: 0.0,
            density: DrawSet::zero(),
            cfu: DrawSet::zero(),
        };
        assert_eq!(agg.sampled_fraction(), 0.0);
    }

    #[test]
    fn at_rollup_02_empty_aggregate_has_no_dimensions() {
        let agg = RollupAggregate::v1(None, None);
        assert!(agg.is_empty());
    }
}
