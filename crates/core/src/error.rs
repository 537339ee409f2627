use thiserror::Error;

pub type BanditResult<T> = Result<T, BanditError>;

#[derive(Error, Debug)]
pub enum BanditError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Reward unavailable for option {option} after {attempts} attempts: {last_error}")]
    RewardUnavailable {
        option: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Policy contract violation: {0}")]
    PolicyContractViolation(String),

    #[error("Invalid experiment state: {0}")]
    InvalidState(String),

    #[error("No trial data to report")]
    EmptyHistory,

    #[error("Configuration source error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BanditError {
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Whether the trial loop may absorb this error and keep going.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::RewardUnavailable { .. })
    }
}
