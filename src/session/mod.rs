//! Session state: the per-user record, the stage machine that drives it, and
//! the store the transport uses to hold records between requests.

pub mod machine;
pub mod record;
pub mod store;

pub use machine::{ChatExchange, CheckInFlow};
pub use record::{Analysis, Capture, SessionRecord, Speaker, Stage, Turn};
pub use store::{SessionHandle, SessionStore};
