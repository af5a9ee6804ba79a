pub mod events;
pub mod identity;
pub mod ids;
pub mod status;

pub use identity::{Principal, Role};
pub use status::{SessionStatus, SubmissionType};
