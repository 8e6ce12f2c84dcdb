//! Firmware module - image parsing, update index and chunked transfer.

pub mod image;
pub mod index;
pub mod transfer;

pub use image::{FirmwareImage, FirmwareMetadata, ImageError, UpdateAssessment};
pub use index::{FirmwareIndex, IndexCheck, IndexEntry, IndexError, index_url};
pub use transfer::{FirmwareTransfer, TransferError, TransferState, TransferStep};
