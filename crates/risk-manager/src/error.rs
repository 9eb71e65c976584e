use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RiskError {
    #[error("Invalid risk limits: {0}")]
    InvalidLimits(String),
}

pub type Result<T> = std::result::Result<T, RiskError>;
