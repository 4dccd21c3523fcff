use super::{frame::Variable, session::StateKind};
use std::result::Result as StdResult;
use thiserror::Error;

pub type Result<T> = StdResult<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("connect timeout after {0} ms")]
    ErrConnectTimeout(u64),

    #[error("connection closed by gateway")]
    ErrConnectionClosed,

    #[error("frame exceeds {0} bytes without terminator")]
    ErrFrameTooLong(usize),

    #[error("network timeout in state {0:?}")]
    ErrNetworkTimeout(StateKind),

    #[error("LCN-PCHK has not enough licenses to handle this connection")]
    ErrInsufficientLicenses,

    #[error("{label}: failed finally after {tries} tries")]
    ErrRequestFailed { label: String, tries: u32 },

    #[error("variable not supported by firmware {firmware:06X}: {variable:?}")]
    ErrUnsupportedVariable { variable: Variable, firmware: u32 },

    #[error("invalid variable: {0}")]
    ErrInvalidVariable(String),

    #[error("connection has been shut down")]
    ErrShutdown,
}
