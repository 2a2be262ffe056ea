//! The plugin contract every backend implements, plus the optional
//! capability traits a backend may decline with `NotSupported`.

use async_trait::async_trait;

use agfs_core::{AgfsResult, FileInfo, OpenFlags, WriteFlags};

/// Result of a read: the bytes actually returned, and whether end-of-file
/// was reached within this call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub data: Vec<u8>,
    pub eof: bool,
}

/// Every backend mounted into the namespace implements this. All methods
/// take paths already rewritten relative to the backend's mount point by
/// the [`crate::mount::MountTable`] — a plugin never sees its own mount
/// prefix.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Called once, synchronously with mount, before any other operation.
    async fn initialize(&self, _config: &std::collections::HashMap<String, String>) -> AgfsResult<()> {
        Ok(())
    }

    /// Called once during unmount, after all handles have been closed.
    async fn shutdown(&self) -> AgfsResult<()> {
        Ok(())
    }

    async fn create(&self, path: &str) -> AgfsResult<()>;
    async fn mkdir(&self, path: &str, mode: u32) -> AgfsResult<()>;
    async fn remove(&self, path: &str) -> AgfsResult<()>;
    async fn remove_all(&self, path: &str) -> AgfsResult<()>;
    async fn read(&self, path: &str, offset: i64, size: i64) -> AgfsResult<ReadResult>;
    async fn write(
        &self,
        path: &str,
        data: &[u8],
        offset: i64,
        flags: WriteFlags,
    ) -> AgfsResult<usize>;
    async fn read_dir(&self, path: &str) -> AgfsResult<Vec<FileInfo>>;
    async fn stat(&self, path: &str) -> AgfsResult<FileInfo>;
    async fn rename(&self, old: &str, new: &str) -> AgfsResult<()>;
    async fn chmod(&self, path: &str, mode: u32) -> AgfsResult<()>;

    /// Name used in `FileInfo::meta.backend_name` and diagnostics.
    fn backend_name(&self) -> &str;

    /// Downcast hooks for optional capabilities. A backend that supports a
    /// capability overrides the matching accessor to return `Some(self)`,
    /// so the dispatcher never needs `Any`-based downcasting.
    fn as_streamer(&self) -> Option<&dyn Streamer> {
        None
    }

    fn as_handle_fs(&self) -> Option<&dyn HandleFS> {
        None
    }

    fn as_toucher(&self) -> Option<&dyn Toucher> {
        None
    }
}

/// Optional capability: a long-lived chunked reader over a single file.
#[async_trait]
pub trait Streamer: Send + Sync {
    async fn open_stream(&self, path: &str) -> AgfsResult<Box<dyn crate::stream::StreamReader>>;
}

/// Optional capability: stateful file handles with position tracking.
#[async_trait]
pub trait HandleFS: Send + Sync {
    async fn open_handle(
        &self,
        path: &str,
        flags: OpenFlags,
        mode: u32,
    ) -> AgfsResult<crate::handle::HandleId>;

    async fn get_info(&self, id: crate::handle::HandleId) -> AgfsResult<FileInfo>;

    async fn handle_read(&self, id: crate::handle::HandleId, size: i64) -> AgfsResult<ReadResult>;

    async fn handle_read_at(
        &self,
        id: crate::handle::HandleId,
        offset: i64,
        size: i64,
    ) -> AgfsResult<ReadResult>;

    async fn handle_write(&self, id: crate::handle::HandleId, data: &[u8]) -> AgfsResult<usize>;

    async fn handle_write_at(
        &self,
        id: crate::handle::HandleId,
        offset: i64,
        data: &[u8],
    ) -> AgfsResult<usize>;

    async fn handle_seek(
        &self,
        id: crate::handle::HandleId,
        offset: i64,
        whence: agfs_core::Whence,
    ) -> AgfsResult<i64>;

    async fn handle_sync(&self, id: crate::handle::HandleId) -> AgfsResult<()>;

    async fn close_handle(&self, id: crate::handle::HandleId) -> AgfsResult<()>;
}

/// Optional capability: create-or-touch without rewriting existing bytes.
#[async_trait]
pub trait Toucher: Send + Sync {
    async fn touch(&self, path: &str) -> AgfsResult<()>;
}

/// Fallback used by the dispatcher when a backend declines [`Toucher`]:
/// truncate-rewrite the existing bytes, or create the file if absent.
pub async fn touch_fallback(fs: &dyn Filesystem, path: &str) -> AgfsResult<()> {
    match fs.stat(path).await {
        Ok(info) => {
            if info.is_dir {
                return Err(agfs_core::AgfsError::invalid_argument(
                    "touch refuses directories",
                ));
            }
            let existing = fs.read(path, 0, -1).await?;
            fs.write(path, &existing.data, -1, WriteFlags::new(WriteFlags::TRUNC))
                .await?;
            Ok(())
        }
        Err(agfs_core::AgfsError::NotFound { .. }) => fs.create(path).await,
        Err(e) => Err(e),
    }
}
