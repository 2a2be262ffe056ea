//! Tree operations. [`MemFs`] owns the whole tree behind one `RwLock`;
//! every operation takes the lock once, does its traversal, and releases
//! it — there is no per-node locking. A single lock guarding the whole
//! tree is a simple, acceptable choice for a reference backend.

use chrono::Utc;
use tokio::sync::RwLock;

use agfs_core::{AgfsError, AgfsResult, FileInfo, Meta, WriteFlags};
use agfs_plugin::filesystem::{Filesystem, ReadResult};
use async_trait::async_trait;

use crate::node::{Content, Node};

pub const BACKEND_NAME: &str = "memfs";

pub struct MemFs {
    root: RwLock<Node>,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self { root: RwLock::new(Node::new_dir(Utc::now())) }
    }

    fn meta() -> Meta {
        Meta::new(BACKEND_NAME, "memfs")
    }

    fn info_for(name: &str, node: &Node) -> FileInfo {
        if node.is_dir() {
            FileInfo {
                name: name.to_string(),
                size: node.size(),
                mode: node.mode,
                mod_time: node.mod_time,
                is_dir: true,
                meta: Self::meta(),
            }
        } else {
            FileInfo {
                name: name.to_string(),
                size: node.size(),
                mode: node.mode,
                mod_time: node.mod_time,
                is_dir: false,
                meta: Self::meta(),
            }
        }
    }

    fn components(path: &str) -> AgfsResult<Vec<String>> {
        let normalized = agfs_core::normalize(path)?;
        Ok(agfs_core::path::components(&normalized)
            .into_iter()
            .map(str::to_string)
            .collect())
    }

    /// Walks to the parent directory of `path`'s last component,
    /// returning the parent node and the final component's name.
    fn split_parent(parts: &[String]) -> AgfsResult<(&[String], &str)> {
        match parts.split_last() {
            Some((last, init)) => Ok((init, last.as_str())),
            None => Err(AgfsError::invalid_argument("root has no parent")),
        }
    }

    fn navigate<'a>(mut node: &'a Node, parts: &[String]) -> AgfsResult<&'a Node> {
        for part in parts {
            let children = node
                .as_dir()
                .ok_or_else(|| AgfsError::invalid_argument(format!("{part} is not a directory")))?;
            node = children
                .get(part)
                .ok_or_else(|| AgfsError::not_found(part.clone()))?;
        }
        Ok(node)
    }

    fn navigate_mut<'a>(mut node: &'a mut Node, parts: &[String]) -> AgfsResult<&'a mut Node> {
        for part in parts {
            let children = node
                .as_dir_mut()
                .ok_or_else(|| AgfsError::invalid_argument(format!("{part} is not a directory")))?;
            node = children
                .get_mut(part)
                .ok_or_else(|| AgfsError::not_found(part.clone()))?;
        }
        Ok(node)
    }
}

#[async_trait]
impl Filesystem for MemFs {
    async fn create(&self, path: &str) -> AgfsResult<()> {
        let parts = Self::components(path)?;
        let (parent_parts, name) = Self::split_parent(&parts)?;
        let mut root = self.root.write().await;
        let parent = Self::navigate_mut(&mut root, parent_parts)?;
        let children = parent
            .as_dir_mut()
            .ok_or_else(|| AgfsError::invalid_argument("parent is not a directory"))?;
        if children.contains_key(name) {
            return Err(AgfsError::already_exists(path.to_string()));
        }
        children.insert(name.to_string(), Node::new_file(Utc::now()));
        Ok(())
    }

    async fn mkdir(&self, path: &str, mode: u32) -> AgfsResult<()> {
        let parts = Self::components(path)?;
        let (parent_parts, name) = Self::split_parent(&parts)?;
        let mut root = self.root.write().await;
        let parent = Self::navigate_mut(&mut root, parent_parts)?;
        let children = parent
            .as_dir_mut()
            .ok_or_else(|| AgfsError::invalid_argument("parent is not a directory"))?;
        if children.contains_key(name) {
            return Err(AgfsError::already_exists(path.to_string()));
        }
        let mut dir = Node::new_dir(Utc::now());
        dir.mode = mode;
        children.insert(name.to_string(), dir);
        Ok(())
    }

    async fn remove(&self, path: &str) -> AgfsResult<()> {
        let parts = Self::components(path)?;
        let (parent_parts, name) = Self::split_parent(&parts)?;
        let mut root = self.root.write().await;
        let parent = Self::navigate_mut(&mut root, parent_parts)?;
        let children = parent
            .as_dir_mut()
            .ok_or_else(|| AgfsError::invalid_argument("parent is not a directory"))?;
        match children.get(name) {
            Some(node) if node.is_dir() && !node.as_dir().unwrap().is_empty() => {
                Err(AgfsError::invalid_argument(format!("{path} is not empty")))
            }
            Some(_) => {
                children.remove(name);
                Ok(())
            }
            None => Err(AgfsError::not_found(path.to_string())),
        }
    }

    async fn remove_all(&self, path: &str) -> AgfsResult<()> {
        let parts = Self::components(path)?;
        let (parent_parts, name) = Self::split_parent(&parts)?;
        let mut root = self.root.write().await;
        let parent = Self::navigate_mut(&mut root, parent_parts)?;
        let children = parent
            .as_dir_mut()
            .ok_or_else(|| AgfsError::invalid_argument("parent is not a directory"))?;
        children
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| AgfsError::not_found(path.to_string()))
    }

    async fn read(&self, path: &str, offset: i64, size: i64) -> AgfsResult<ReadResult> {
        let parts = Self::components(path)?;
        let root = self.root.read().await;
        let node = Self::navigate(&root, &parts)?;
        let data = node
            .as_file()
            .ok_or_else(|| AgfsError::invalid_argument(format!("{path} is a directory")))?;
        let offset = offset.max(0) as usize;
        if offset >= data.len() {
            return Ok(ReadResult { data: vec![], eof: true });
        }
        let end = if size < 0 {
            data.len()
        } else {
            (offset + size as usize).min(data.len())
        };
        Ok(ReadResult { data: data[offset..end].to_vec(), eof: end == data.len() })
    }

    async fn write(
        &self,
        path: &str,
        data: &[u8],
        offset: i64,
        flags: WriteFlags,
    ) -> AgfsResult<usize> {
        let parts = Self::components(path)?;
        let (parent_parts, name) = Self::split_parent(&parts)?;
        let mut root = self.root.write().await;
        let parent = Self::navigate_mut(&mut root, parent_parts)?;
        let children = parent
            .as_dir_mut()
            .ok_or_else(|| AgfsError::invalid_argument("parent is not a directory"))?;

        if flags.exclusive() && children.contains_key(name) {
            return Err(AgfsError::already_exists(path.to_string()));
        }
        if !children.contains_key(name) {
            if flags.create() {
                children.insert(name.to_string(), Node::new_file(Utc::now()));
            } else {
                return Err(AgfsError::not_found(path.to_string()));
            }
        }
        let node = children.get_mut(name).unwrap();
        let buf = node
            .as_file_mut()
            .ok_or_else(|| AgfsError::invalid_argument(format!("{path} is a directory")))?;

        if flags.append() {
            buf.extend_from_slice(data);
        } else if offset < 0 {
            *buf = data.to_vec();
        } else {
            let offset = offset as usize;
            if offset > buf.len() {
                buf.resize(offset, 0);
            }
            let end = offset + data.len();
            if end > buf.len() {
                buf.resize(end, 0);
            }
            buf[offset..end].copy_from_slice(data);
        }
        node.mod_time = Utc::now();
        Ok(data.len())
    }

    async fn read_dir(&self, path: &str) -> AgfsResult<Vec<FileInfo>> {
        let parts = Self::components(path)?;
        let root = self.root.read().await;
        let node = Self::navigate(&root, &parts)?;
        let children = node
            .as_dir()
            .ok_or_else(|| AgfsError::invalid_argument(format!("{path} is not a directory")))?;
        Ok(children
            .iter()
            .map(|(name, child)| Self::info_for(name, child))
            .collect())
    }

    async fn stat(&self, path: &str) -> AgfsResult<FileInfo> {
        let parts = Self::components(path)?;
        let root = self.root.read().await;
        if parts.is_empty() {
            return Ok(Self::info_for("/", &root));
        }
        let node = Self::navigate(&root, &parts)?;
        Ok(Self::info_for(parts.last().unwrap(), node))
    }

    async fn rename(&self, old: &str, new: &str) -> AgfsResult<()> {
        let old_parts = Self::components(old)?;
        let new_parts = Self::components(new)?;
        let (old_parent_parts, old_name) = Self::split_parent(&old_parts)?;
        let (new_parent_parts, new_name) = Self::split_parent(&new_parts)?;

        let mut root = self.root.write().await;

        let node = {
            let old_parent = Self::navigate_mut(&mut root, old_parent_parts)?;
            let children = old_parent
                .as_dir_mut()
                .ok_or_else(|| AgfsError::invalid_argument("parent is not a directory"))?;
            children
                .remove(old_name)
                .ok_or_else(|| AgfsError::not_found(old.to_string()))?
        };

        let new_parent = match Self::navigate_mut(&mut root, new_parent_parts) {
            Ok(p) => p,
            Err(e) => {
                // put it back before bailing out
                let old_parent = Self::navigate_mut(&mut root, old_parent_parts)?;
                old_parent.as_dir_mut().unwrap().insert(old_name.to_string(), node);
                return Err(e);
            }
        };
        let new_children = new_parent
            .as_dir_mut()
            .ok_or_else(|| AgfsError::invalid_argument("destination parent is not a directory"))?;
        if new_children.contains_key(new_name) {
            return Err(AgfsError::already_exists(new.to_string()));
        }
        new_children.insert(new_name.to_string(), node);
        Ok(())
    }

    async fn chmod(&self, path: &str, mode: u32) -> AgfsResult<()> {
        let parts = Self::components(path)?;
        let mut root = self.root.write().await;
        let node = Self::navigate_mut(&mut root, &parts)?;
        node.mode = mode;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        BACKEND_NAME
    }
}

impl MemFs {
    /// Genuine touch: updates `mod_time` in place without a read-modify-
    /// write round trip, or creates an empty file if absent.
    pub async fn touch(&self, path: &str) -> AgfsResult<()> {
        let parts = Self::components(path)?;
        let (parent_parts, name) = Self::split_parent(&parts)?;
        let mut root = self.root.write().await;
        let parent = Self::navigate_mut(&mut root, parent_parts)?;
        let children = parent
            .as_dir_mut()
            .ok_or_else(|| AgfsError::invalid_argument("parent is not a directory"))?;
        match children.get_mut(name) {
            Some(node) if node.is_dir() => {
                Err(AgfsError::invalid_argument("touch refuses directories"))
            }
            Some(node) => {
                node.mod_time = Utc::now();
                Ok(())
            }
            None => {
                children.insert(name.to_string(), Node::new_file(Utc::now()));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_write_read_roundtrip() {
        let fs = MemFs::new();
        fs.create("/a.txt").await.unwrap();
        fs.write("/a.txt", b"hello", 0, WriteFlags::new(0)).await.unwrap();
        let r = fs.read("/a.txt", 0, -1).await.unwrap();
        assert_eq!(r.data, b"hello");
        assert!(r.eof);
    }

    #[tokio::test]
    async fn mkdir_then_list_contains_child() {
        let fs = MemFs::new();
        fs.mkdir("/d", 0o755).await.unwrap();
        fs.create("/d/f").await.unwrap();
        let entries = fs.read_dir("/d").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].name, "f");
    }

    #[tokio::test]
    async fn remove_nonempty_dir_fails_remove_all_succeeds() {
        let fs = MemFs::new();
        fs.mkdir("/d", 0o755).await.unwrap();
        fs.create("/d/f").await.unwrap();
        assert!(fs.remove("/d").await.is_err());
        fs.remove_all("/d").await.unwrap();
        assert!(fs.stat("/d").await.is_err());
    }

    #[tokio::test]
    async fn rename_moves_node_and_restores_on_failure() {
        let fs = MemFs::new();
        fs.create("/a").await.unwrap();
        fs.rename("/a", "/b").await.unwrap();
        assert!(fs.stat("/a").await.is_err());
        assert!(fs.stat("/b").await.is_ok());

        let err = fs.rename("/b", "/no/such/dir/c").await;
        assert!(err.is_err());
        assert!(fs.stat("/b").await.is_ok(), "rename failure must restore the node");
    }

    #[tokio::test]
    async fn exclusive_write_conflicts_with_existing_file() {
        let fs = MemFs::new();
        fs.create("/x").await.unwrap();
        let err = fs
            .write("/x", b"y", -1, WriteFlags::new(WriteFlags::EXCL | WriteFlags::CREATE))
            .await
            .unwrap_err();
        assert!(matches!(err, AgfsError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn touch_creates_then_updates_mtime_without_changing_data() {
        let fs = MemFs::new();
        fs.touch("/t").await.unwrap();
        fs.write("/t", b"data", 0, WriteFlags::new(0)).await.unwrap();
        let before = fs.stat("/t").await.unwrap().mod_time;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        fs.touch("/t").await.unwrap();
        let after = fs.stat("/t").await.unwrap();
        assert!(after.mod_time >= before);
        assert_eq!(fs.read("/t", 0, -1).await.unwrap().data, b"data");
    }
}
