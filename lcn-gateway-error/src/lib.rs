use config::ConfigError;
use lcn_driver_pck::Error as PckError;
use std::io::Error as IoError;
use thiserror::Error;
use tokio::task::JoinError;

pub type GatewayResult<T, E = GatewayError> = anyhow::Result<T, E>;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("{0}")]
    IoError(#[from] IoError),
    #[error("{0}")]
    ConfigError(#[from] ConfigError),
    #[error("{0}")]
    JoinError(#[from] JoinError),
    #[error("LCN-PCHK error: {0}")]
    PckError(#[from] PckError),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error("Initialization error: {0}")]
    InitializationError(String),
    #[error("{0}")]
    Msg(String),
}

impl From<String> for GatewayError {
    #[inline]
    fn from(e: String) -> Self {
        GatewayError::Msg(e)
    }
}

impl From<&str> for GatewayError {
    #[inline]
    fn from(e: &str) -> Self {
        GatewayError::Msg(e.to_string())
    }
}
