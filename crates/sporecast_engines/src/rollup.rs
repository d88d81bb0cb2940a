#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use sporecast_contracts::hardware::{Dimension, HardwareElement, HardwareId, HardwareKind};
use sporecast_contracts::rollup::{DimensionAggregate, RollupAggregate};
use sporecast_contracts::sample::Sample;
use sporecast_contracts::simulation::{DrawSet, SimulationRecord};

use crate::catalog::Catalogs;
use crate::eligibility::{eligible_hardware_by_level, usable_samples_for};

/// One child's contribution to a rollup, for a single dimension.
struct Contribution<'a> {
    extent: f64,
    sampled: f64,
    density: &'a DrawSet,
    cfu: &'a DrawSet,
}

/// All rollup aggregates for one pass, plus the project-wide fold over the
/// level-2 roots. `project` is `None` when nothing in the tree is eligible.
#[derive(Debug, Clone, PartialEq)]
pub struct RollupOutcome {
    pub nodes: BTreeMap<HardwareId, RollupAggregate>,
    pub project: Option<RollupAggregate>,
}

#[derive(Debug, Clone, Default)]
pub struct RollupEngine;

impl RollupEngine {
    pub fn new() -> Self {
        Self
    }

    /// Bottom-up aggregation: levels 5 down to 2, then the project fold.
    /// Every rollup therefore sees fully-resolved child aggregates.
    /// Ineligible children contribute nothing, silently.
    pub fn aggregate(
        &self,
        hardware: &BTreeMap<HardwareId, HardwareElement>,
        samples: &[Sample],
        sims: &BTreeMap<HardwareId, SimulationRecord>,
        catalogs: &Catalogs,
    ) -> RollupOutcome {
        let eligible = eligible_hardware_by_level(hardware, samples, catalogs);

        let mut children: BTreeMap<&HardwareId, Vec<&HardwareElement>> = BTreeMap::new();
        for elem in hardware.values() {
            if let Some(parent) = &elem.parent_id {
                children.entry(parent).or_default().push(elem);
            }
        }

        let mut nodes: BTreeMap<HardwareId, RollupAggregate> = BTreeMap::new();
        for level in (2..=5u8).rev() {
            let Some(ids) = eligible.get(&level) else {
                continue;
            };
            for id in ids {
                let Some(elem) = hardware.get(id) else {
                    continue;
                };
                if elem.kind != HardwareKind::Rollup {
                    continue;
                }
                let kids: Vec<&HardwareElement> =
                    children.get(id).map(|v| v.clone()).unwrap_or_default();
                let agg = self.fold_children(
                    &kids, &eligible, &nodes, hardware, samples, sims, catalogs,
                );
                nodes.insert(id.clone(), agg);
            }
        }

        let roots: Vec<&HardwareElement> = hardware
            .values()
            .filter(|e| e.parent_id.is_none())
            .collect();
        let project = if eligible.is_empty() {
            None
        } else {
            Some(self.fold_children(
                &roots, &eligible, &nodes, hardware, samples, sims, catalogs,
            ))
        };

        RollupOutcome { nodes, project }
    }

    #[allow(clippy::too_many_arguments)]
    fn fold_children(
        &self,
        kids: &[&HardwareElement],
        eligible: &BTreeMap<u8, std::collections::BTreeSet<HardwareId>>,
        nodes: &BTreeMap<HardwareId, RollupAggregate>,
        hardware: &BTreeMap<HardwareId, HardwareElement>,
        samples: &[Sample],
        sims: &BTreeMap<HardwareId, SimulationRecord>,
        catalogs: &Catalogs,
    ) -> RollupAggregate {
        let mut area: Vec<Contribution> = Vec::new();
        let mut volume: Vec<Contribution> = Vec::new();

        for child in kids {
            let is_eligible = eligible
                .get(&child.level)
                .map(|s| s.contains(&child.id))
                .unwrap_or(false);
            if !is_eligible {
                continue;
            }
            if child.kind == HardwareKind::Rollup {
                if let Some(agg) = nodes.get(&child.id) {
                    if let Some(a) = &agg.area {
                        area.push(Contribution {
                            extent: a.total_extent,
                            sampled: a.sampled_extent,
                            density: &a.density,
                            cfu: &a.cfu,
                        });
                    }
                    if let Some(v) = &agg.volume {
                        volume.push(Contribution {
                            extent: v.total_extent,
                            sampled: v.sampled_extent,
                            density: &v.density,
                            cfu: &v.cfu,
                        });
                    }
                }
            } else if let (Some(dimension), Some(extent), Some(record)) =
                (child.dimension, child.extent, sims.get(&child.id))
            {
                let sampled: f64 =
                    usable_samples_for(&child.id, samples, hardware, &catalogs.efficiency)
                        .iter()
                        .map(|s| s.extent_sampled)
                        .sum();
                let c = Contribution {
                    extent,
                    sampled,
                    density: &record.density,
                    cfu: &record.cfu,
                };
                match dimension {
                    Dimension::Area => area.push(c),
                    Dimension::Volume => volume.push(c),
                }
            }
        }

        RollupAggregate::v1(reduce(&area), reduce(&volume))
    }
}

/// Extent-weighted mixture over the contributions of one dimension: total and
/// sampled extents sum, densities mix weighted by extent, CFU sums directly.
/// No contributing extent means no data for the dimension.
fn reduce(contributions: &[Contribution]) -> Option<DimensionAggregate> {
    let total: f64 = round6(contributions.iter().map(|c| c.extent).sum());
    if total <= 0.0 {
        return None;
    }
    let sampled: f64 = round6(contributions.iter().map(|c| c.sampled).sum());

    let width = contributions
        .iter()
        .filter_map(|c| c.density.draw_count().max(c.cfu.draw_count()))
        .max()
        .unwrap_or(1);

    let mut weighted = DrawSet::zero();
    let mut cfu = DrawSet::zero();
    for c in contributions {
        weighted = weighted.axpy(c.extent, c.density, width);
        cfu = cfu.axpy(1.0, c.cfu, width);
    }

    Some(DimensionAggregate {
        total_extent: total,
        sampled_extent: sampled,
        density: weighted.scale(1.0 / total),
        cfu,
    })
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}
