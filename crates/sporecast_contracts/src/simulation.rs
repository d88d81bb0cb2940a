#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::hardware::{AnalogId, HardwareId};
use crate::SchemaVersion;

pub const SIMULATION_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SimMode {
    Spec,
    Implied,
    Prior,
    Posterior,
}

/// What a simulation record's draws were derived from: the prior-catalog
/// analog for prior/posterior records, or the linked Sampled component for
/// implied records. Spec records and generic-prior posteriors carry no link.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SimLink {
    Analog(AnalogId),
    Hardware(HardwareId),
}

/// A density or CFU estimate: a single deterministic value for spec-derived
/// quantities, or a Monte-Carlo draw vector for everything stochastic.
///
/// The accumulation helpers implement the extent-weighted mixture used by the
/// rollup aggregator: scalars broadcast against vectors, and a combination
/// stays scalar only while every contributor is scalar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DrawSet {
    Scalar(f64),
    Draws(Vec<f64>),
}

impl DrawSet {
    pub fn zero() -> Self {
        DrawSet::Scalar(0.0)
    }

    pub fn is_scalar(&self) -> bool {
        matches!(self, DrawSet::Scalar(_))
    }

    pub fn draw_count(&self) -> Option<usize> {
        match self {
            DrawSet::Scalar(_) => None,
            DrawSet::Draws(d) => Some(d.len()),
        }
    }

    /// Indexed read with modular broadcast, so scalars and vectors of any
    /// length can be folded into a fixed-width accumulator.
    pub fn value_at(&self, i: usize) -> f64 {
        match self {
            DrawSet::Scalar(v) => *v,
            DrawSet::Draws(d) => {
                if d.is_empty() {
                    0.0
                } else {
                    d[i % d.len()]
                }
            }
        }
    }

    /// `self + weight * other`, elementwise. The result is a vector of
    /// `width` draws as soon as either side is a vector.
    pub fn axpy(self, weight: f64, other: &DrawSet, width: usize) -> DrawSet {
        match (&self, other) {
            (DrawSet::Scalar(a), DrawSet::Scalar(b)) => DrawSet::Scalar(a + weight * b),
            _ => {
                let mut out = Vec::with_capacity(width);
                for i in 0..width {
                    out.push(self.value_at(i) + weight * other.value_at(i));
                }
                DrawSet::Draws(out)
            }
        }
    }

    pub fn scale(self, k: f64) -> DrawSet {
        match self {
            DrawSet::Scalar(v) => DrawSet::Scalar(v * k),
            DrawSet::Draws(d) => DrawSet::Draws(d.into_iter().map(|v| v * k).collect()),
        }
    }

    pub fn mean(&self) -> f64 {
        match self {
            DrawSet::Scalar(v) => *v,
            DrawSet::Draws(d) => {
                if d.is_empty() {
                    0.0
                } else {
                    d.iter().sum::<f64>() / d.len() as f64
                }
            }
        }
    }

    /// Linearly interpolated quantile over the sorted draws; a scalar is its
    /// own quantile at every probability.
    pub fn quantile(&self, q: f64) -> f64 {
        match self {
            DrawSet::Scalar(v) => *v,
            DrawSet::Draws(d) => {
                if d.is_empty() {
                    return 0.0;
                }
                let mut sorted = d.clone();
                sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let q = q.clamp(0.0, 1.0);
                let pos = q * (sorted.len() - 1) as f64;
                let lo = pos.floor() as usize;
                let hi = pos.ceil() as usize;
                if lo == hi {
                    sorted[lo]
                } else {
                    let frac = pos - lo as f64;
                    sorted[lo] * (1.0 - frac) + sorted[hi] * frac
                }
            }
        }
    }

    /// Fraction of draws strictly below `threshold`; scalars collapse to 0/1.
    pub fn fraction_below(&self, threshold: f64) -> f64 {
        match self {
            DrawSet::Scalar(v) => {
                if *v < threshold {
                    1.0
                } else {
                    0.0
                }
            }
            DrawSet::Draws(d) => {
                if d.is_empty() {
                    return 0.0;
                }
                d.iter().filter(|v| **v < threshold).count() as f64 / d.len() as f64
            }
        }
    }
}

/// Simulation output for one eligible component. Spec records are scalar in
/// both fields; all other modes carry draw vectors of equal cardinality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationRecord {
    pub schema_version: SchemaVersion,
    pub mode: SimMode,
    pub link: Option<SimLink>,
    pub density: DrawSet,
    pub cfu: DrawSet,
}

impl SimulationRecord {
    pub fn v1(mode: SimMode, link: Option<SimLink>, density: DrawSet, cfu: DrawSet) -> Self {
        Self {
            schema_version: SIMULATION_CONTRACT_VERSION,
            mode,
            link,
            density,
            cfu,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_draws_01_scalar_combination_stays_scalar() {
        let acc = DrawSet::zero().axpy(2.0, &DrawSet::Scalar(50.0), 4);
        assert_eq!(acc, DrawSet::Scalar(100.0));
    }

    #[test]
    fn at_draws_02_scalar_broadcasts_against_vector() {
        let acc = DrawSet::zero()
            .axpy(1.0, &DrawSet::Draws(vec![1.0, 2.0, 3.0, 4.0]), 4)
            .axpy(2.0, &DrawSet::Scalar(10.0), 4);
        assert_eq!(acc, DrawSet::Draws(vec![21.0, 22.0, 23.0, 24.0]));
    }

    #[test]
    fn at_draws_03_modular_broadcast_covers_short_vectors() {
        let short = DrawSet::Draws(vec![1.0, 2.0]);
        let acc = DrawSet::zero().axpy(1.0, &short, 4);
        assert_eq!(acc, DrawSet::Draws(vec![1.0, 2.0, 1.0, 2.0]));
    }

    #[test]
    fn at_draws_04_quantiles_interpolate_linearly() {
        let d = DrawSet::Draws(vec![4.0, 1.0, 3.0, 2.0]);
        assert!((d.quantile(0.5) - 2.5).abs() < 1e-12);
        assert!((d.quantile(0.0) - 1.0).abs() < 1e-12);
        assert!((d.quantile(1.0) - 4.0).abs() < 1e-12);
    }

    #[test]
    fn at_draws_05_fraction_below_threshold() {
        let d = DrawSet::Draws(vec![1.0, 2.0, 3.0, 4.0]);
        assert!((d.fraction_below(2.5) - 0.5).abs() < 1e-12);
        assert!((DrawSet::Scalar(5.0).fraction_below(10.0) - 1.0).abs() < 1e-12);
    }
}
