//! State machine module.

pub mod handlers;
pub mod machine;

pub use handlers::{ReplyOutcome, classify_reply};
pub use machine::{ConnectionState, SessionContext, Timer};
