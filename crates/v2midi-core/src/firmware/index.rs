//! Firmware update index.
//!
//! The download site publishes `index.json`, mapping firmware ids to the
//! images available for them:
//!
//! ```json
//! { "com.example.widget": [{ "board": "b1", "version": 12, "file": "widget-12.bin", "hash": "..." }] }
//! ```

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

use crate::snapshot::DeviceSnapshot;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Unable to parse firmware index: {0}")]
    Parse(#[from] serde_json::Error),
}

/// One published image.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub board: Option<String>,
    pub version: u64,
    pub file: String,
    #[serde(default)]
    pub hash: Option<String>,
}

impl IndexEntry {
    /// Download URL of the image below `base`.
    pub fn url(&self, base: &str) -> String {
        format!("{}/{}", base.trim_end_matches('/'), self.file)
    }
}

/// URL of the index below `base`.
pub fn index_url(base: &str) -> String {
    format!("{}/index.json", base.trim_end_matches('/'))
}

/// What the index offers for a connected device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexCheck<'a> {
    /// Nothing published for the firmware id.
    UnknownFirmware,
    /// Published, but not for this board.
    UnknownBoard,
    UpToDate(&'a IndexEntry),
    /// The device runs a newer version than published.
    NewerInstalled(&'a IndexEntry),
    Available(&'a IndexEntry),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct FirmwareIndex {
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

impl FirmwareIndex {
    pub fn from_json(text: &str) -> Result<Self, IndexError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn firmware_ids(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries for `firmware_id` and `board`, newest first.
    pub fn updates_for(&self, firmware_id: &str, board: Option<&str>) -> Vec<&IndexEntry> {
        let mut updates: Vec<&IndexEntry> = self
            .entries
            .get(firmware_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| e.board.as_deref() == board)
                    .collect()
            })
            .unwrap_or_default();
        updates.sort_by(|a, b| b.version.cmp(&a.version));
        updates
    }

    /// Compare the newest published image with what the device runs.
    pub fn check(&self, snapshot: &DeviceSnapshot) -> IndexCheck<'_> {
        let Some(id) = snapshot.firmware_id() else {
            return IndexCheck::UnknownFirmware;
        };
        if !self.entries.contains_key(id) {
            return IndexCheck::UnknownFirmware;
        }

        let Some(latest) = self.updates_for(id, snapshot.board()).into_iter().next() else {
            return IndexCheck::UnknownBoard;
        };

        if latest.hash.is_some() && latest.hash.as_deref() == snapshot.firmware_hash() {
            return IndexCheck::UpToDate(latest);
        }
        if snapshot.firmware_version().unwrap_or(0) > latest.version {
            return IndexCheck::NewerInstalled(latest);
        }
        IndexCheck::Available(latest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const INDEX: &str = r#"{
        "com.example.widget": [
            {"board": "b1", "version": 3, "file": "widget-b1-3.bin", "hash": "aaa"},
            {"board": "b1", "version": 5, "file": "widget-b1-5.bin", "hash": "bbb"},
            {"board": "b2", "version": 4, "file": "widget-b2-4.bin"}
        ],
        "com.example.other": []
    }"#;

    fn device(id: &str, board: &str, version: u64, hash: &str) -> DeviceSnapshot {
        let body = json!({
            "metadata": {},
            "system": {"board": board, "firmware": {"id": id, "version": version, "hash": hash}}
        });
        DeviceSnapshot::new(body.as_object().unwrap().clone()).unwrap()
    }

    #[test]
    fn test_updates_sorted_by_version() {
        let index = FirmwareIndex::from_json(INDEX).unwrap();
        let updates = index.updates_for("com.example.widget", Some("b1"));
        let versions: Vec<u64> = updates.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![5, 3]);
        assert!(index.updates_for("com.example.widget", None).is_empty());
        assert!(index.updates_for("missing", Some("b1")).is_empty());
        assert_eq!(index.firmware_ids().count(), 2);
    }

    #[test]
    fn test_check() {
        let index = FirmwareIndex::from_json(INDEX).unwrap();

        assert_eq!(
            index.check(&device("nope", "b1", 1, "")),
            IndexCheck::UnknownFirmware
        );
        assert_eq!(
            index.check(&device("com.example.widget", "b9", 1, "")),
            IndexCheck::UnknownBoard
        );
        assert!(matches!(
            index.check(&device("com.example.widget", "b1", 5, "bbb")),
            IndexCheck::UpToDate(e) if e.version == 5
        ));
        assert!(matches!(
            index.check(&device("com.example.widget", "b1", 7, "ccc")),
            IndexCheck::NewerInstalled(_)
        ));
        assert!(matches!(
            index.check(&device("com.example.widget", "b2", 2, "ccc")),
            IndexCheck::Available(e) if e.file == "widget-b2-4.bin"
        ));
    }

    #[test]
    fn test_urls() {
        let entry = IndexEntry {
            board: None,
            version: 1,
            file: "a.bin".into(),
            hash: None,
        };
        assert_eq!(entry.url("https://example.com/fw/"), "https://example.com/fw/a.bin");
        assert_eq!(index_url("https://example.com/fw"), "https://example.com/fw/index.json");
    }

    #[test]
    fn test_malformed_index() {
        assert!(FirmwareIndex::from_json("[1, 2]").is_err());
    }
}
