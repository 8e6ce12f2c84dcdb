//! Firmware image loading and metadata.
//!
//! Images carry a JSON record at their end, between a NUL byte and the
//! final byte of the file:
//!
//! ```text
//! <binary> 0x00 {"com.versioduo.firmware": {"id": ..., "version": ...}} <last byte>
//! ```

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha1::{Digest, Sha1};
use thiserror::Error;

use crate::events::Severity;
use crate::protocol::FIRMWARE_NAMESPACE;
use crate::snapshot::DeviceSnapshot;

/// Upper bound of the backward search for the metadata record.
pub const METADATA_SCAN_WINDOW: usize = 64 * 1024;

/// The record never starts before this offset.
const METADATA_MIN_OFFSET: usize = 4;

#[derive(Error, Debug)]
pub enum ImageError {
    #[error("File too small: {actual} bytes")]
    FileTooSmall { actual: usize },
    #[error("No metadata record found")]
    NoMetadata,
    #[error("Unable to parse metadata: {0}")]
    MalformedMetadata(String),
    #[error("Missing 'com.versioduo.firmware' metadata")]
    MissingNamespace,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Metadata embedded in a firmware image.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirmwareMetadata {
    /// Firmware id, matches `system.firmware.id` of the device.
    pub id: String,
    #[serde(default)]
    pub board: Option<String>,
    pub version: u64,
    #[serde(default)]
    pub hash: Option<String>,
}

/// Immutable firmware image with its metadata and content hash.
#[derive(Debug, Clone)]
pub struct FirmwareImage {
    data: Vec<u8>,
    metadata: FirmwareMetadata,
    hash: String,
}

impl FirmwareImage {
    /// Parse an image from raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, ImageError> {
        let record = find_metadata(&data)?;
        let value: Value = serde_json::from_slice(record)
            .map_err(|e| ImageError::MalformedMetadata(e.to_string()))?;
        let metadata = value
            .get(FIRMWARE_NAMESPACE)
            .ok_or(ImageError::MissingNamespace)?;
        let metadata: FirmwareMetadata = serde_json::from_value(metadata.clone())
            .map_err(|e| ImageError::MalformedMetadata(e.to_string()))?;

        let hash = sha1_hex(&data);
        tracing::debug!(id = %metadata.id, version = metadata.version, len = data.len(), hash = %hash, "Firmware image loaded");

        Ok(Self {
            data,
            metadata,
            hash,
        })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ImageError> {
        Self::from_bytes(std::fs::read(path)?)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn metadata(&self) -> &FirmwareMetadata {
        &self.metadata
    }

    /// Lowercase hex SHA-1 of the whole image.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    /// Compare the image with the firmware running on a device.
    pub fn assess(&self, snapshot: &DeviceSnapshot) -> UpdateAssessment {
        let backup = snapshot.has_stored_configuration();

        if let Some(board) = snapshot.board() {
            if self.metadata.board.as_deref() != Some(board) {
                return UpdateAssessment::DifferentBoard {
                    device: board.to_string(),
                    image: self.metadata.board.clone(),
                };
            }
        }

        if snapshot.firmware_id() != Some(self.metadata.id.as_str()) {
            return UpdateAssessment::DifferentFirmware {
                device: snapshot.firmware_id().unwrap_or_default().to_string(),
                image: self.metadata.id.clone(),
            };
        }

        let installed = snapshot.installed_version().unwrap_or(0);
        if self.metadata.version < installed {
            return UpdateAssessment::Older {
                installed,
                image: self.metadata.version,
                backup,
            };
        }

        if snapshot.firmware_hash() == Some(self.hash.as_str()) {
            return UpdateAssessment::AlreadyInstalled;
        }

        UpdateAssessment::UpdateAvailable {
            installed,
            image: self.metadata.version,
            backup,
        }
    }
}

/// Result of comparing an image with a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateAssessment {
    DifferentBoard {
        device: String,
        image: Option<String>,
    },
    DifferentFirmware { device: String, image: String },
    Older { installed: u64, image: u64, backup: bool },
    AlreadyInstalled,
    UpdateAvailable { installed: u64, image: u64, backup: bool },
}

impl UpdateAssessment {
    pub fn severity(&self) -> Severity {
        match self {
            UpdateAssessment::DifferentBoard { .. } => Severity::Error,
            UpdateAssessment::DifferentFirmware { .. } | UpdateAssessment::Older { .. } => {
                Severity::Warning
            }
            UpdateAssessment::AlreadyInstalled | UpdateAssessment::UpdateAvailable { .. } => {
                Severity::Info
            }
        }
    }

    /// Whether the image may be sent without overriding a warning.
    pub fn is_installable(&self) -> bool {
        self.severity() == Severity::Info
    }
}

impl fmt::Display for UpdateAssessment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let backup_hint = |backup: bool| {
            if backup {
                " Please make a backup of the configuration before updating."
            } else {
                ""
            }
        };

        match self {
            UpdateAssessment::DifferentBoard {
                device,
                image: Some(image),
            } => write!(
                f,
                "The firmware is for board '{}', the device is '{}'.",
                image, device
            ),
            UpdateAssessment::DifferentBoard {
                device,
                image: None,
            } => write!(
                f,
                "The firmware names no board, the device is '{}'.",
                device
            ),
            UpdateAssessment::DifferentFirmware { device, image } => write!(
                f,
                "The firmware '{}' does not match the device firmware '{}'.",
                image, device
            ),
            UpdateAssessment::Older {
                installed,
                image,
                backup,
            } => write!(
                f,
                "The firmware version {} is older than the installed version {}.{}",
                image,
                installed,
                backup_hint(*backup)
            ),
            UpdateAssessment::AlreadyInstalled => {
                write!(f, "The firmware is already installed.")
            }
            UpdateAssessment::UpdateAvailable {
                installed,
                image,
                backup,
            } => write!(
                f,
                "Firmware version {} is available, version {} is installed.{}",
                image,
                installed,
                backup_hint(*backup)
            ),
        }
    }
}

/// Locate the metadata record: the bytes between the last NUL and the
/// final byte of the image.
fn find_metadata(data: &[u8]) -> Result<&[u8], ImageError> {
    if data.len() < METADATA_MIN_OFFSET + 2 {
        return Err(ImageError::FileTooSmall { actual: data.len() });
    }

    let end = data.len() - 1;
    let lowest = end.saturating_sub(METADATA_SCAN_WINDOW).max(METADATA_MIN_OFFSET);
    let nul = data[lowest..end]
        .iter()
        .rposition(|&b| b == 0)
        .ok_or(ImageError::NoMetadata)?;

    Ok(&data[lowest + nul + 1..end])
}

pub(crate) fn sha1_hex(data: &[u8]) -> String {
    Sha1::digest(data)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
