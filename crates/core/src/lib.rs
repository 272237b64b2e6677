pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{AggregationStrategy, Settings};
pub use error::EngineError;
