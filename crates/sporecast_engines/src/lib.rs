#![forbid(unsafe_code)]

pub mod catalog;
pub mod eligibility;
pub mod rollup;
pub mod sim;

pub use catalog::{CatalogError, Catalogs, EfficiencyKey, EfficiencyTable, PriorCatalog, SpecDensityTable};
pub use rollup::{RollupEngine, RollupOutcome};
pub use sim::{SimConfig, SimEngine, SimError};
