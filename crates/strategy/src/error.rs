use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StrategyError {
    /// Raised by a strategy's own evaluation
    #[error("Strategy {strategy} failed: {message}")]
    Evaluation { strategy: String, message: String },

    #[error("Strategy {strategy} panicked during evaluation")]
    Panicked { strategy: String },

    #[error("Strategy {strategy} did not finish within {limit_ms}ms")]
    TimedOut { strategy: String, limit_ms: u64 },

    #[error("Strategy {0} is already registered")]
    DuplicateName(String),

    #[error("Strategy {0} is not registered")]
    UnknownStrategy(String),

    #[error("Strategy engine is no longer accepting intents")]
    NotAccepting,
}

impl StrategyError {
    pub fn evaluation(strategy: impl Into<String>, message: impl Into<String>) -> Self {
        StrategyError::Evaluation {
            strategy: strategy.into(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, StrategyError>;
