pub mod config;
pub mod models;
pub mod error;
pub mod api;
pub mod catalog;
pub mod executor;
pub mod plan;
pub mod analyzer;

pub use config::Config;
pub use models::*;
pub use error::{FaultKind, OracleError, OracleResult};
pub use analyzer::FortuneAnalyzer;
