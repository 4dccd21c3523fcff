mod driver;
pub mod protocol;
pub mod types;

pub use driver::PckDriver;
pub use protocol::{
    Connection, ConnectionEventLoop, ConnectionListener, Error, LcnAddr, ModuleMessage,
    NoopListener, Result, StateKind, StatusCategory, Variable,
};
pub use types::{ConnectionSettings, DimMode, StatusMode};
