use thiserror::Error;

/// Invalid matching, consensus or filter configuration, reported at setup time.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be in {expected}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        expected: &'static str,
    },
    #[error("identity {label:?} has a zero-length embedding")]
    ZeroDimension { label: String },
    #[error("identity {label:?} has a {actual}-dim embedding, registry uses {expected}")]
    DimensionMismatch {
        label: String,
        expected: usize,
        actual: usize,
    },
}

/// Accumulation-session state machine violations.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionError {
    #[error("no accumulation session in progress")]
    NotAccumulating,
    #[error("an accumulation session is already in progress")]
    AlreadyAccumulating,
    #[error("registry cannot be rebuilt while a session is accumulating")]
    RegistryBusy,
}
