pub mod config;
pub mod error;
pub mod telemetry;

pub use config::{DbSettings, Settings};
pub use error::ConfigError;
