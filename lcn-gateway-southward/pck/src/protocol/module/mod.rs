pub mod mod_info;
pub mod request_status;

pub use mod_info::{ModInfo, StatusCategory};
pub use request_status::RequestStatus;
