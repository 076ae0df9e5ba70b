use thiserror::Error;

/// Errors raised while loading or validating a [Config](crate::config::Config).
///
/// Frame processing itself never fails, so this is the only error type the
/// crate exposes.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),

    #[error("`{field}` must be within {min}..={max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("`{0}` must be at least 1")]
    Zero(&'static str),

    #[error("flight exit speed ({exit}) must be below the entry speed ({entry})")]
    InvalidHysteresis { entry: f64, exit: f64 },
}
