use thiserror::Error;

/// Errors produced by the measurement engine.
///
/// `Configuration` is fatal and raised before any measurement begins.
/// `ResourceUnavailable` is recoverable at configuration granularity: the
/// driver skips the configuration and moves on.
#[derive(Debug, Error)]
pub enum BenchError {
    #[error("invalid configuration: {0}")]
    Configuration(String),

    #[error("resource unavailable: {0}")]
    ResourceUnavailable(String),

    #[error("memory allocation failed: size={bytes} bytes")]
    Allocation { bytes: usize },

    #[error("output error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    pub fn config(msg: impl Into<String>) -> Self {
        BenchError::Configuration(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        BenchError::ResourceUnavailable(msg.into())
    }

    /// Whether the driver may skip the offending configuration and continue
    pub fn is_recoverable(&self) -> bool {
        matches!(self, BenchError::ResourceUnavailable(_))
    }
}

pub type Result<T> = std::result::Result<T, BenchError>;
