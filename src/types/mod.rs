//! Core data types for Medicare fee-schedule pricing

// Module declarations
mod benefits;
mod common;
mod geography;
mod money;
mod plan;
mod runs;
mod schedules;
mod snapshot;

// Re-export all types for convenient access
pub use benefits::*;
pub use common::*;
pub use geography::*;
pub use money::*;
pub use plan::*;
pub use runs::*;
pub use schedules::*;
pub use snapshot::*;
