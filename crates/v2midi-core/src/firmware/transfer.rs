//! Chunked firmware transfer.
//!
//! The image is sent in blocks of `FIRMWARE_BLOCK_SIZE` bytes. Each block
//! must be acknowledged before the next one is produced. After the last
//! block a finalize request without data carries the content hash; its
//! acknowledgment completes the transfer and the device reboots.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::image::FirmwareImage;
use crate::protocol::{FIRMWARE_BLOCK_SIZE, FirmwareBlock, FirmwareStatus, Request};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransferError {
    #[error("Error while verifying the transferred firmware (offset {offset})")]
    HashMismatch { offset: usize },
    #[error("Invalid parameters for firmware update (offset {offset})")]
    InvalidOffset { offset: usize },
    #[error("Error while updating the firmware: {status} (offset {offset})")]
    Device { offset: usize, status: String },
    #[error("Firmware transfer already in progress")]
    Busy,
    #[error("Unexpected firmware acknowledgment in state {state}")]
    UnexpectedAck { state: TransferState },
}

/// Transfer progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransferState {
    #[default]
    Idle,
    /// The block at `offset` was sent.
    AwaitingAck { offset: usize },
    /// The finalize request was sent.
    Finalizing,
    Done,
    Failed { offset: usize },
}

impl fmt::Display for TransferState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferState::Idle => write!(f, "IDLE"),
            TransferState::AwaitingAck { offset } => write!(f, "AWAITING_ACK({})", offset),
            TransferState::Finalizing => write!(f, "FINALIZING"),
            TransferState::Done => write!(f, "DONE"),
            TransferState::Failed { offset } => write!(f, "FAILED({})", offset),
        }
    }
}

/// What the session has to do next.
#[derive(Debug, Clone, PartialEq)]
pub enum TransferStep {
    /// Send `request`; report progress `offset` of `total` first.
    Send {
        request: Request,
        offset: usize,
        total: usize,
    },
    /// The device accepted the image.
    Complete,
}

/// Firmware transfer state machine. Owns the image for its lifetime.
#[derive(Debug)]
pub struct FirmwareTransfer {
    image: FirmwareImage,
    state: TransferState,
    /// Offset of the first unacknowledged byte.
    cursor: usize,
}

impl FirmwareTransfer {
    pub fn new(image: FirmwareImage) -> Self {
        Self {
            image,
            state: TransferState::Idle,
            cursor: 0,
        }
    }

    pub fn image(&self) -> &FirmwareImage {
        &self.image
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// A request is outstanding.
    pub fn is_active(&self) -> bool {
        matches!(
            self.state,
            TransferState::AwaitingAck { .. } | TransferState::Finalizing
        )
    }

    /// Begin at offset zero. A finished or failed transfer starts over.
    pub fn start(&mut self) -> Result<TransferStep, TransferError> {
        if self.is_active() {
            return Err(TransferError::Busy);
        }

        info!(
            id = %self.image.metadata().id,
            len = self.image.len(),
            hash = %self.image.hash(),
            "Starting firmware transfer"
        );
        self.cursor = 0;
        Ok(self.send_block(0))
    }

    /// Handle the device's acknowledgment of the outstanding request.
    pub fn on_ack(&mut self, status: &FirmwareStatus) -> Result<TransferStep, TransferError> {
        let offset = match self.state {
            TransferState::AwaitingAck { offset } => offset,
            TransferState::Finalizing => self.image.len(),
            state => return Err(TransferError::UnexpectedAck { state }),
        };

        match status {
            FirmwareStatus::Success => {}
            FirmwareStatus::HashMismatch => return Err(self.fail(TransferError::HashMismatch { offset })),
            FirmwareStatus::InvalidOffset => return Err(self.fail(TransferError::InvalidOffset { offset })),
            FirmwareStatus::Other(status) => {
                return Err(self.fail(TransferError::Device {
                    offset,
                    status: status.clone(),
                }));
            }
        }

        if self.state == TransferState::Finalizing {
            info!(len = self.image.len(), "Firmware transfer complete");
            self.state = TransferState::Done;
            return Ok(TransferStep::Complete);
        }

        let next = offset + FIRMWARE_BLOCK_SIZE;
        if next < self.image.len() {
            self.cursor = next;
            return Ok(self.send_block(next));
        }

        self.cursor = self.image.len();
        Ok(self.send_finalize())
    }

    fn send_block(&mut self, offset: usize) -> TransferStep {
        let len = self.image.len();
        let end = (offset + FIRMWARE_BLOCK_SIZE).min(len);
        debug!(offset, size = end - offset, "Sending firmware block");

        self.state = TransferState::AwaitingAck { offset };
        TransferStep::Send {
            request: Request::WriteFirmware(FirmwareBlock {
                offset,
                data: STANDARD.encode(&self.image.bytes()[offset..end]),
                hash: None,
            }),
            offset,
            total: len,
        }
    }

    fn send_finalize(&mut self) -> TransferStep {
        let len = self.image.len();
        debug!(len, hash = %self.image.hash(), "Sending firmware hash");

        self.state = TransferState::Finalizing;
        TransferStep::Send {
            request: Request::WriteFirmware(FirmwareBlock {
                offset: len,
                data: String::new(),
                hash: Some(self.image.hash().to_string()),
            }),
            offset: len,
            total: len,
        }
    }

    fn fail(&mut self, error: TransferError) -> TransferError {
        warn!(error = %error, cursor = self.cursor, "Firmware transfer failed");
        let offset = match self.state {
            TransferState::AwaitingAck { offset } => offset,
            _ => self.image.len(),
        };
        self.state = TransferState::Failed { offset };
        error
    }
}
