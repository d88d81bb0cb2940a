#![forbid(unsafe_code)]

pub mod store;

pub use store::{
    HardwareStore, RemovalCascade, RollupStore, SampleStore, SimulationStore, StorageError,
};
