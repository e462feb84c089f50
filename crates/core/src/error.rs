use thiserror::Error;

/// Invalid or missing configuration. Fatal at startup.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },

    #[error("Invalid pool bounds: min={min}, max={max} (both must be > 0 and min <= max)")]
    PoolBounds { min: u32, max: u32 },

    #[error("Missing required environment variables: {}", .0.join(", "))]
    MissingRequired(Vec<String>),
}
