//! Mount table: the single source of truth for which backend owns which
//! path prefix, and the longest-prefix dispatcher every operation in the
//! system routes through.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use agfs_core::{normalize, AgfsError, AgfsResult};

use crate::filesystem::Filesystem;

pub struct MountEntry {
    pub point: String,
    pub backend_name: String,
    pub backend: Arc<dyn Filesystem>,
    pub mounted_at: DateTime<Utc>,
}

/// Ordered table of mount points, guarded by a single lock: the table
/// itself, not each entry, is the unit of consistency, so mount and
/// unmount are serialized against every dispatch.
pub struct MountTable {
    entries: RwLock<Vec<MountEntry>>,
}

impl Default for MountTable {
    fn default() -> Self {
        Self::new()
    }
}

impl MountTable {
    pub fn new() -> Self {
        Self { entries: RwLock::new(Vec::new()) }
    }

    /// Mounts `backend` at `point`. Rejects a point already occupied
    /// exactly; a new mount may still nest under or contain an existing
    /// one.
    pub async fn mount(
        &self,
        point: &str,
        backend_name: impl Into<String>,
        backend: Arc<dyn Filesystem>,
    ) -> AgfsResult<()> {
        let point = normalize(point)?;
        let mut entries = self.entries.write().await;
        if entries.iter().any(|e| e.point == point) {
            return Err(AgfsError::already_exists(format!(
                "mount point {point} already in use"
            )));
        }
        backend.initialize(&std::collections::HashMap::new()).await?;
        entries.push(MountEntry {
            point,
            backend_name: backend_name.into(),
            backend,
            mounted_at: Utc::now(),
        });
        Ok(())
    }

    /// Unmounts the backend at `point` exactly, calling its `shutdown`
    /// hook. Callers are responsible for closing open handles first:
    /// `shutdown` is only called after all handles have been closed.
    pub async fn unmount(&self, point: &str) -> AgfsResult<()> {
        let point = normalize(point)?;
        let mut entries = self.entries.write().await;
        let idx = entries
            .iter()
            .position(|e| e.point == point)
            .ok_or_else(|| AgfsError::not_found(format!("mount point {point}")))?;
        let entry = entries.remove(idx);
        entry.backend.shutdown().await
    }

    /// Unmounts every entry, best-effort, returning the points that failed
    /// along with their error. Used during shutdown.
    pub async fn unmount_all(&self) -> Vec<(String, AgfsError)> {
        let mut entries = self.entries.write().await;
        let mut failures = Vec::new();
        for entry in entries.drain(..) {
            if let Err(e) = entry.backend.shutdown().await {
                failures.push((entry.point, e));
            }
        }
        failures
    }

    /// Resolves `path` to its owning backend and the path rewritten
    /// relative to that backend's mount point.
    pub async fn dispatch(&self, path: &str) -> AgfsResult<(Arc<dyn Filesystem>, String)> {
        let path = normalize(path)?;
        let entries = self.entries.read().await;
        let points: Vec<&str> = entries.iter().map(|e| e.point.as_str()).collect();
        let (idx, relative) = agfs_core::path::longest_prefix_mount(&path, points.into_iter())
            .ok_or_else(|| AgfsError::not_found(format!("no mount owns {path}")))?;
        Ok((entries[idx].backend.clone(), relative))
    }

    /// Snapshot of current mounts, for the `list-mounts` operation.
    pub async fn list(&self) -> Vec<(String, String, DateTime<Utc>)> {
        self.entries
            .read()
            .await
            .iter()
            .map(|e| (e.point.clone(), e.backend_name.clone(), e.mounted_at))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filesystem::ReadResult;
    use agfs_core::{FileInfo, Meta, WriteFlags};
    use async_trait::async_trait;

    struct Stub(&'static str);

    #[async_trait]
    impl Filesystem for Stub {
        async fn create(&self, _path: &str) -> AgfsResult<()> {
            Ok(())
        }
        async fn mkdir(&self, _path: &str, _mode: u32) -> AgfsResult<()> {
            Ok(())
        }
        async fn remove(&self, _path: &str) -> AgfsResult<()> {
            Ok(())
        }
        async fn remove_all(&self, _path: &str) -> AgfsResult<()> {
            Ok(())
        }
        async fn read(&self, _path: &str, _offset: i64, _size: i64) -> AgfsResult<ReadResult> {
            Ok(ReadResult { data: vec![], eof: true })
        }
        async fn write(
            &self,
            _path: &str,
            _data: &[u8],
            _offset: i64,
            _flags: WriteFlags,
        ) -> AgfsResult<usize> {
            Ok(0)
        }
        async fn read_dir(&self, _path: &str) -> AgfsResult<Vec<FileInfo>> {
            Ok(vec![])
        }
        async fn stat(&self, path: &str) -> AgfsResult<FileInfo> {
            Ok(FileInfo::file(path, 0, Utc::now(), Meta::new(self.0, "file")))
        }
        async fn rename(&self, _old: &str, _new: &str) -> AgfsResult<()> {
            Ok(())
        }
        async fn chmod(&self, _path: &str, _mode: u32) -> AgfsResult<()> {
            Ok(())
        }
        fn backend_name(&self) -> &str {
            self.0
        }
    }

    #[tokio::test]
    async fn dispatch_picks_longest_prefix() {
        let table = MountTable::new();
        table.mount("/", "root", Arc::new(Stub("root"))).await.unwrap();
        table.mount("/data", "data", Arc::new(Stub("data"))).await.unwrap();

        let (backend, rel) = table.dispatch("/data/x.txt").await.unwrap();
        assert_eq!(backend.backend_name(), "data");
        assert_eq!(rel, "/x.txt");

        let (backend, rel) = table.dispatch("/other.txt").await.unwrap();
        assert_eq!(backend.backend_name(), "root");
        assert_eq!(rel, "/other.txt");
    }

    #[tokio::test]
    async fn mounting_same_point_twice_fails() {
        let table = MountTable::new();
        table.mount("/m", "a", Arc::new(Stub("a"))).await.unwrap();
        let err = table.mount("/m", "b", Arc::new(Stub("b"))).await.unwrap_err();
        assert!(matches!(err, AgfsError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn dispatch_with_no_mounts_is_not_found() {
        let table = MountTable::new();
        let err = match table.dispatch("/x").await {
            Err(e) => e,
            Ok(_) => panic!("expected dispatch to fail"),
        };
        assert!(matches!(err, AgfsError::NotFound { .. }));
    }

    #[tokio::test]
    async fn unmount_removes_entry_and_calls_shutdown() {
        let table = MountTable::new();
        table.mount("/m", "a", Arc::new(Stub("a"))).await.unwrap();
        table.unmount("/m").await.unwrap();
        assert!(table.dispatch("/m/file").await.is_err());
        assert!(table.unmount("/m").await.is_err());
    }
}
