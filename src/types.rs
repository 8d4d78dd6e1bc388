//! Shared types exchanged with the dispatcher, the database and RPC callers.
//!
//! All of them serialize as camelCase JSON, matching the rest of the media
//! server.

use serde::{Deserialize, Serialize};

/// Opaque asset identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ItemIdentifier {
    pub collection: String,
    pub signature: String,
}

impl std::fmt::Display for ItemIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.collection, self.signature)
    }
}

/// A media asset as known to the database. Read-only here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub identifier: ItemIdentifier,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mimetype: Option<String>,
}

/// A byte-store location. Only used to compose paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    pub name: String,
    pub filebase: String,
    pub datadir: String,
}

/// Metadata of one derived artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheRecord {
    pub identifier: ItemIdentifier,
    pub action: String,
    /// Canonical parameter string the artifact was produced with.
    pub params: String,
    pub width: u64,
    pub height: u64,
    pub duration: u64,
    pub size: u64,
    pub mimetype: String,
    /// Path relative to the storage filebase, or an absolute URL.
    pub path: String,
    pub storage: String,
}

impl CacheRecord {
    /// Format part of the mimetype (`image/png` → `png`).
    pub fn format(&self) -> &str {
        self.mimetype
            .split_once('/')
            .map(|(_, sub)| sub)
            .unwrap_or("")
    }
}

/// Inbound `Action` RPC body.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRequest {
    pub item: Option<Item>,
    pub storage: Option<Storage>,
    #[serde(default)]
    pub action: String,
    /// Wire parameter bag; empty values are presence-only flags.
    #[serde(default)]
    pub params: std::collections::BTreeMap<String, String>,
}
