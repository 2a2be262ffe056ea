use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Metadata describing who owns a path and what kind of entry it is,
/// carried alongside [`FileInfo`]. Advisory only.
#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct Meta {
    pub backend_name: String,
    #[serde(rename = "type")]
    pub entry_type: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, String>,
}

impl Meta {
    pub fn new(backend_name: impl Into<String>, entry_type: impl Into<String>) -> Self {
        Self {
            backend_name: backend_name.into(),
            entry_type: entry_type.into(),
            extra: HashMap::new(),
        }
    }
}

/// `FileInfo`: `{name, size, mode, modTime, isDir, meta}`.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, PartialEq)]
pub struct FileInfo {
    pub name: String,
    pub size: i64,
    pub mode: u32,
    pub mod_time: DateTime<Utc>,
    pub is_dir: bool,
    pub meta: Meta,
}

/// Conventional advisory modes: not enforced as access control,
/// purely descriptive metadata a client may use as a hint.
pub mod advisory_mode {
    pub const DIR: u32 = 0o755;
    pub const READ_ONLY: u32 = 0o444;
    pub const WRITE_ONLY: u32 = 0o222;
    pub const ORDINARY: u32 = 0o644;
}

impl FileInfo {
    pub fn file(name: impl Into<String>, size: i64, mod_time: DateTime<Utc>, meta: Meta) -> Self {
        Self {
            name: name.into(),
            size,
            mode: advisory_mode::ORDINARY,
            mod_time,
            is_dir: false,
            meta,
        }
    }

    pub fn dir(name: impl Into<String>, mod_time: DateTime<Utc>, meta: Meta) -> Self {
        Self {
            name: name.into(),
            size: 0,
            mode: advisory_mode::DIR,
            mod_time,
            is_dir: true,
            meta,
        }
    }
}
