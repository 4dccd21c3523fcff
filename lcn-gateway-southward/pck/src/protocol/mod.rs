pub mod codec;
pub mod error;
pub mod frame;
pub mod module;
pub mod session;

// Public re-exports for external use
pub use self::{
    codec::PckCodec,
    error::{Error, Result},
    frame::{
        generator, LcnAddr, LedState, LogicOpState, ModuleMessage, SendData, Variable,
    },
    module::{ModInfo, RequestStatus, StatusCategory},
    session::{
        Connection, ConnectionEventLoop, ConnectionListener, NoopListener, StateKind,
    },
};
