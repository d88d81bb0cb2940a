#![forbid(unsafe_code)]

use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::SeedableRng;
use statrs::distribution::{Beta, Gamma, Poisson};
use statrs::function::gamma::ln_gamma;

use sporecast_contracts::hardware::{AnalogyRef, HardwareElement, HardwareKind};
use sporecast_contracts::sample::Sample;
use sporecast_contracts::simulation::{DrawSet, SimLink, SimMode, SimulationRecord};

use crate::catalog::{Catalogs, EfficiencyKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimConfig {
    pub draw_count: usize,
}

impl SimConfig {
    pub fn mvp_v1() -> Self {
        Self { draw_count: 1000 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimError {
    NotAComponent { id: String },
    IncompleteComponent { id: String },
    UnknownAnalog { id: String, analog: String },
    GenericPriorWithoutSamples { id: String },
    MissingImpliedRecord { id: String },
    EfficiencyUnresolved { sample_id: String },
    DegenerateLikelihood { id: String },
    Distribution { what: &'static str },
}

impl std::fmt::Display for SimError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAComponent { id } => write!(f, "{id}: rollups are not simulated"),
            Self::IncompleteComponent { id } => {
                write!(f, "{id}: component fields incomplete")
            }
            Self::UnknownAnalog { id, analog } => {
                write!(f, "{id}: analog {analog} not in prior catalog")
            }
            Self::GenericPriorWithoutSamples { id } => {
                write!(f, "{id}: generic prior requires at least one usable sample")
            }
            Self::MissingImpliedRecord { id } => {
                write!(f, "{id}: linked component has no simulation record")
            }
            Self::EfficiencyUnresolved { sample_id } => {
                write!(f, "sample {sample_id}: efficiency pairing unresolved")
            }
            Self::DegenerateLikelihood { id } => {
                write!(f, "{id}: every importance weight vanished")
            }
            Self::Distribution { what } => write!(f, "invalid {what} parameters"),
        }
    }
}

impl std::error::Error for SimError {}

/// Per-component bioburden simulation. Pure over its inputs; randomness comes
/// from the caller's RNG so tests can seed it.
#[derive(Debug, Clone)]
pub struct SimEngine {
    config: SimConfig,
}

impl SimEngine {
    pub fn new(config: SimConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> SimConfig {
        self.config
    }

    /// Simulates one component with a fresh entropy-seeded RNG.
    ///
    /// `usable_samples` must already be filtered by the eligibility rules;
    /// `linked_record` carries the linked Sampled component's record for
    /// implied components and is ignored otherwise.
    pub fn simulate(
        &self,
        elem: &HardwareElement,
        usable_samples: &[&Sample],
        linked_record: Option<&SimulationRecord>,
        catalogs: &Catalogs,
    ) -> Result<SimulationRecord, SimError> {
        let mut rng = StdRng::from_entropy();
        self.simulate_with_rng(elem, usable_samples, linked_record, catalogs, &mut rng)
    }

    pub fn simulate_with_rng(
        &self,
        elem: &HardwareElement,
        usable_samples: &[&Sample],
        linked_record: Option<&SimulationRecord>,
        catalogs: &Catalogs,
        rng: &mut StdRng,
    ) -> Result<SimulationRecord, SimError> {
        if !elem.is_component() {
            return Err(SimError::NotAComponent {
                id: elem.id.as_str().to_string(),
            });
        }
        let (Some(_dimension), Some(extent)) = (elem.dimension, elem.extent) else {
            return Err(SimError::IncompleteComponent {
                id: elem.id.as_str().to_string(),
            });
        };

        match elem.kind {
            HardwareKind::SpecUnsampled => self.simulate_spec(elem, extent, catalogs),
            HardwareKind::ImpliedUnsampled => {
                self.simulate_implied(elem, extent, linked_record, rng)
            }
            HardwareKind::Sampled => self.simulate_sampled(elem, extent, usable_samples, catalogs, rng),
            HardwareKind::Rollup => unreachable!("rejected above"),
        }
    }

    fn simulate_spec(
        &self,
        elem: &HardwareElement,
        extent: f64,
        catalogs: &Catalogs,
    ) -> Result<SimulationRecord, SimError> {
        let class = elem.spec_class.ok_or_else(|| SimError::IncompleteComponent {
            id: elem.id.as_str().to_string(),
        })?;
        let density = catalogs.spec_density.density(class);
        Ok(SimulationRecord::v1(
            SimMode::Spec,
            None,
            DrawSet::Scalar(density),
            DrawSet::Scalar(density * extent),
        ))
    }

    fn simulate_implied(
        &self,
        elem: &HardwareElement,
        extent: f64,
        linked_record: Option<&SimulationRecord>,
        rng: &mut StdRng,
    ) -> Result<SimulationRecord, SimError> {
        let link = elem
            .implied_link
            .clone()
            .ok_or_else(|| SimError::IncompleteComponent {
                id: elem.id.as_str().to_string(),
            })?;
        let source = linked_record.ok_or_else(|| SimError::MissingImpliedRecord {
            id: elem.id.as_str().to_string(),
        })?;

        // Density is assumed identical to the linked component; only the
        // predictive CFU is redrawn against this component's own extent.
        let density = source.density.clone();
        let n = density.draw_count().unwrap_or(self.config.draw_count);
        let mut cfu = Vec::with_capacity(n);
        for i in 0..n {
            cfu.push(draw_poisson(rng, density.value_at(i) * extent));
        }
        Ok(SimulationRecord::v1(
            SimMode::Implied,
            Some(SimLink::Hardware(link)),
            density,
            DrawSet::Draws(cfu),
        ))
    }

    fn simulate_sampled(
        &self,
        elem: &HardwareElement,
        extent: f64,
        usable_samples: &[&Sample],
        catalogs: &Catalogs,
        rng: &mut StdRng,
    ) -> Result<SimulationRecord, SimError> {
        let analogy = elem
            .analogy
            .clone()
            .ok_or_else(|| SimError::IncompleteComponent {
                id: elem.id.as_str().to_string(),
            })?;

        match (&analogy, usable_samples.is_empty()) {
            (AnalogyRef::Generic, true) => Err(SimError::GenericPriorWithoutSamples {
                id: elem.id.as_str().to_string(),
            }),
            (AnalogyRef::Named(analog), true) => {
                // No observations: the catalog draws ARE the estimate.
                let draws = catalogs.priors.draws(analog).ok_or_else(|| {
                    SimError::UnknownAnalog {
                        id: elem.id.as_str().to_string(),
                        analog: analog.as_str().to_string(),
                    }
                })?;
                let density: Vec<f64> = draws.to_vec();
                let cfu: Vec<f64> = density
                    .iter()
                    .map(|lambda| draw_poisson(rng, lambda * extent))
                    .collect();
                Ok(SimulationRecord::v1(
                    SimMode::Prior,
                    Some(SimLink::Analog(analog.clone())),
                    DrawSet::Draws(density),
                    DrawSet::Draws(cfu),
                ))
            }
            (AnalogyRef::Generic, false) => {
                let density = self.generic_posterior(usable_samples, catalogs, rng)?;
                let cfu = predictive_cfu(&density, extent, rng);
                Ok(SimulationRecord::v1(
                    SimMode::Posterior,
                    None,
                    DrawSet::Draws(density),
                    DrawSet::Draws(cfu),
                ))
            }
            (AnalogyRef::Named(analog), false) => {
                let prior = catalogs.priors.draws(analog).ok_or_else(|| {
                    SimError::UnknownAnalog {
                        id: elem.id.as_str().to_string(),
                        analog: analog.as_str().to_string(),
                    }
                })?;
                let density =
                    self.analog_posterior(elem, prior, usable_samples, catalogs, rng)?;
                let cfu = predictive_cfu(&density, extent, rng);
                Ok(SimulationRecord::v1(
                    SimMode::Posterior,
                    Some(SimLink::Analog(analog.clone())),
                    DrawSet::Draws(density),
                    DrawSet::Draws(cfu),
                ))
            }
        }
    }

    /// Conjugate solution under the Jeffreys prior: with a fresh efficiency
    /// draw per (draw, sample) pair, lambda_i ~ Gamma(0.5 + total CFU,
    /// rate_i = sum_j exposure_j * e_ij).
    fn generic_posterior(
        &self,
        usable_samples: &[&Sample],
        catalogs: &Catalogs,
        rng: &mut StdRng,
    ) -> Result<Vec<f64>, SimError> {
        let betas = efficiency_betas(usable_samples, catalogs)?;
        let total_cfu: f64 = usable_samples.iter().map(|s| s.cfu as f64).sum();
        let shape = 0.5 + total_cfu;

        let mut draws = Vec::with_capacity(self.config.draw_count);
        for _ in 0..self.config.draw_count {
            let mut rate = 0.0;
            for (sample, beta) in usable_samples.iter().zip(&betas) {
                rate += sample.exposure() * beta.sample(rng);
            }
            let gamma = Gamma::new(shape, rate)
                .map_err(|_| SimError::Distribution { what: "gamma" })?;
            draws.push(gamma.sample(rng));
        }
        Ok(draws)
    }

    /// Sampling-importance-resampling against a named analog's draws: joint
    /// Poisson log-likelihood per particle with per-(particle, sample)
    /// efficiency draws, max-subtracted weights, resampling with replacement
    /// down to the configured draw count.
    fn analog_posterior(
        &self,
        elem: &HardwareElement,
        prior: &[f64],
        usable_samples: &[&Sample],
        catalogs: &Catalogs,
        rng: &mut StdRng,
    ) -> Result<Vec<f64>, SimError> {
        let betas = efficiency_betas(usable_samples, catalogs)?;

        let mut log_lik = Vec::with_capacity(prior.len());
        for lambda in prior {
            let mut ll = 0.0;
            for (sample, beta) in usable_samples.iter().zip(&betas) {
                let rate = lambda * sample.exposure() * beta.sample(rng);
                ll += poisson_log_pmf(sample.cfu, rate);
            }
            log_lik.push(ll);
        }

        let max_ll = log_lik.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        if !max_ll.is_finite() {
            return Err(SimError::DegenerateLikelihood {
                id: elem.id.as_str().to_string(),
            });
        }
        let weights: Vec<f64> = log_lik.iter().map(|ll| (ll - max_ll).exp()).collect();
        let index = WeightedIndex::new(&weights).map_err(|_| SimError::DegenerateLikelihood {
            id: elem.id.as_str().to_string(),
        })?;

        Ok((0..self.config.draw_count)
            .map(|_| prior[index.sample(rng)])
            .collect())
    }
}

fn efficiency_betas(
    usable_samples: &[&Sample],
    catalogs: &Catalogs,
) -> Result<Vec<Beta>, SimError> {
    usable_samples
        .iter()
        .map(|sample| {
            let key = EfficiencyKey {
                device_type: sample.device_type,
                technique: sample.technique,
            };
            let (alpha, beta) = catalogs.efficiency.beta_params(key).ok_or_else(|| {
                SimError::EfficiencyUnresolved {
                    sample_id: sample.id.as_str().to_string(),
                }
            })?;
            Beta::new(alpha, beta).map_err(|_| SimError::Distribution { what: "beta" })
        })
        .collect()
}

/// Poisson log-pmf at an observed count, with the zero-rate guard: a zero
/// rate is certain to produce zero counts and impossible to produce more.
fn poisson_log_pmf(cfu: u32, rate: f64) -> f64 {
    if rate > 0.0 {
        cfu as f64 * rate.ln() - ln_gamma(cfu as f64 + 1.0) - rate
    } else if cfu == 0 {
        0.0
    } else {
        f64::NEG_INFINITY
    }
}

/// One predictive CFU draw per density draw, against the component's own
/// extent. Sampling-event exposures play no part here.
fn predictive_cfu(density: &[f64], extent: f64, rng: &mut StdRng) -> Vec<f64> {
    density
        .iter()
        .map(|lambda| draw_poisson(rng, lambda * extent))
        .collect()
}

fn draw_poisson(rng: &mut StdRng, mean: f64) -> f64 {
    if mean > 0.0 && mean.is_finite() {
        match Poisson::new(mean) {
            Ok(p) => p.sample(rng),
            Err(_) => 0.0,
        }
    } else {
        0.0
    }
}
