//! Reply handlers - routing of inbound device replies.

use tracing::{debug, warn};

use crate::protocol::{FirmwareStatus, Reply};
use crate::snapshot::DeviceSnapshot;
use crate::state::machine::SessionContext;

/// Where an inbound reply goes.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplyOutcome {
    /// Token of another session or boot; dropped without side effects.
    Ignored,
    /// Acknowledgment for the firmware transfer.
    FirmwareAck(FirmwareStatus),
    /// Accepted full reply.
    Snapshot(DeviceSnapshot),
    /// Accepted reply without `metadata`; the session cannot continue.
    MissingMetadata,
}

/// Apply token discipline to `reply` and decide where it goes.
pub fn classify_reply(ctx: &mut SessionContext, reply: Reply) -> ReplyOutcome {
    if !ctx.accept_token(reply.token()) {
        debug!(
            expected = ?ctx.token,
            received = ?reply.token(),
            "Ignoring reply with foreign token"
        );
        return ReplyOutcome::Ignored;
    }

    if let Some(status) = reply.firmware_status() {
        return ReplyOutcome::FirmwareAck(status);
    }

    match DeviceSnapshot::new(reply.into_body()) {
        Some(snapshot) => ReplyOutcome::Snapshot(snapshot),
        None => {
            warn!("Reply without device metadata");
            ReplyOutcome::MissingMetadata
        }
    }
}
