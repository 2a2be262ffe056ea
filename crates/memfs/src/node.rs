//! The in-memory tree `MemFs` operates over.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use agfs_core::info::advisory_mode;

pub enum Content {
    Dir(BTreeMap<String, Node>),
    File(Vec<u8>),
}

pub struct Node {
    pub mode: u32,
    pub mod_time: DateTime<Utc>,
    pub content: Content,
}

impl Node {
    pub fn new_dir(now: DateTime<Utc>) -> Self {
        Self { mode: advisory_mode::DIR, mod_time: now, content: Content::Dir(BTreeMap::new()) }
    }

    pub fn new_file(now: DateTime<Utc>) -> Self {
        Self { mode: advisory_mode::ORDINARY, mod_time: now, content: Content::File(Vec::new()) }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.content, Content::Dir(_))
    }

    pub fn size(&self) -> i64 {
        match &self.content {
            Content::Dir(children) => children.len() as i64,
            Content::File(data) => data.len() as i64,
        }
    }

    pub fn as_dir(&self) -> Option<&BTreeMap<String, Node>> {
        match &self.content {
            Content::Dir(children) => Some(children),
            Content::File(_) => None,
        }
    }

    pub fn as_dir_mut(&mut self) -> Option<&mut BTreeMap<String, Node>> {
        match &mut self.content {
            Content::Dir(children) => Some(children),
            Content::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&Vec<u8>> {
        match &self.content {
            Content::File(data) => Some(data),
            Content::Dir(_) => None,
        }
    }

    pub fn as_file_mut(&mut self) -> Option<&mut Vec<u8>> {
        match &mut self.content {
            Content::File(data) => Some(data),
            Content::Dir(_) => None,
        }
    }
}
