#![forbid(unsafe_code)]

pub mod change;
pub mod common;
pub mod hardware;
pub mod rollup;
pub mod sample;
pub mod simulation;

pub use common::{ContractViolation, SchemaVersion, Validate};
