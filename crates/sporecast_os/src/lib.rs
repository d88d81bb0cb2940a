#![forbid(unsafe_code)]

pub mod recompute;
pub mod report;
pub mod runtime;

pub use recompute::{RecomputeController, RecomputeError, RecomputeOutcome, WorldSnapshot};
pub use report::{summarize, threshold_satisfaction, PercentileSummary};
pub use runtime::{ProjectRuntime, RuntimeError, SampleAlert};
