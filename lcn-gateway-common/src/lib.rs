//! Shared runtime pieces of the LCN gateway: settings and logging.
mod logger;
pub mod settings;

pub use lcn_gateway_error::{GatewayError, GatewayResult};
pub use logger::Logger;
pub use settings::{General, ModuleSettings, Settings};
