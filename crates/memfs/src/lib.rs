//! Reference in-memory backend: a single guarded tree, wrapped with a
//! [`HandleRegistry`] so it speaks every optional backend capability
//! (streaming, stateful handles, genuine touch).

pub mod mem;
pub mod node;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use agfs_core::{AgfsResult, FileInfo, OpenFlags, Whence};
use agfs_plugin::filesystem::{Filesystem, HandleFS, ReadResult, Streamer, Toucher};
use agfs_plugin::handle::{HandleId, HandleRegistry};
use agfs_plugin::stream::{Chunk, ChannelStream, StreamReader};

pub use mem::MemFs;

const STREAM_CHUNK_SIZE: i64 = 64 * 1024;

/// The backend actually mounted: `MemFs` plus the handle registry wrapping
/// it. Everything but the handle operations delegates straight through to
/// the inner tree.
pub struct MemFsBackend {
    inner: Arc<MemFs>,
    handles: HandleRegistry,
}

impl Default for MemFsBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFsBackend {
    pub fn new() -> Self {
        let inner = Arc::new(MemFs::new());
        let handles = HandleRegistry::new(inner.clone() as Arc<dyn Filesystem>);
        Self { inner, handles }
    }
}

#[async_trait]
impl Filesystem for MemFsBackend {
    async fn create(&self, path: &str) -> AgfsResult<()> {
        self.inner.create(path).await
    }

    async fn mkdir(&self, path: &str, mode: u32) -> AgfsResult<()> {
        self.inner.mkdir(path, mode).await
    }

    async fn remove(&self, path: &str) -> AgfsResult<()> {
        self.inner.remove(path).await
    }

    async fn remove_all(&self, path: &str) -> AgfsResult<()> {
        self.inner.remove_all(path).await
    }

    async fn read(&self, path: &str, offset: i64, size: i64) -> AgfsResult<ReadResult> {
        self.inner.read(path, offset, size).await
    }

    async fn write(
        &self,
        path: &str,
        data: &[u8],
        offset: i64,
        flags: agfs_core::WriteFlags,
    ) -> AgfsResult<usize> {
        self.inner.write(path, data, offset, flags).await
    }

    async fn read_dir(&self, path: &str) -> AgfsResult<Vec<FileInfo>> {
        self.inner.read_dir(path).await
    }

    async fn stat(&self, path: &str) -> AgfsResult<FileInfo> {
        self.inner.stat(path).await
    }

    async fn rename(&self, old: &str, new: &str) -> AgfsResult<()> {
        self.inner.rename(old, new).await
    }

    async fn chmod(&self, path: &str, mode: u32) -> AgfsResult<()> {
        self.inner.chmod(path, mode).await
    }

    async fn shutdown(&self) -> AgfsResult<()> {
        self.handles.close_all().await;
        Ok(())
    }

    fn backend_name(&self) -> &str {
        self.inner.backend_name()
    }

    fn as_streamer(&self) -> Option<&dyn Streamer> {
        Some(self)
    }

    fn as_handle_fs(&self) -> Option<&dyn HandleFS> {
        Some(self)
    }

    fn as_toucher(&self) -> Option<&dyn Toucher> {
        Some(self)
    }
}

#[async_trait]
impl Streamer for MemFsBackend {
    async fn open_stream(&self, path: &str) -> AgfsResult<Box<dyn StreamReader>> {
        // fail fast if the path does not exist or is a directory
        let info = self.inner.stat(path).await?;
        if info.is_dir {
            return Err(agfs_core::AgfsError::invalid_argument(format!(
                "{path} is a directory"
            )));
        }
        let inner = self.inner.clone();
        let path = path.to_string();
        let stream = ChannelStream::spawn(STREAM_CHUNK_SIZE, move |offset| {
            let inner = inner.clone();
            let path = path.clone();
            async move {
                let result = inner.read(&path, offset, STREAM_CHUNK_SIZE).await?;
                Ok(Chunk { data: result.data, eof: result.eof })
            }
        });
        Ok(Box::new(stream))
    }
}

#[async_trait]
impl Toucher for MemFsBackend {
    async fn touch(&self, path: &str) -> AgfsResult<()> {
        self.inner.touch(path).await
    }
}

#[async_trait]
impl HandleFS for MemFsBackend {
    async fn open_handle(&self, path: &str, flags: OpenFlags, mode: u32) -> AgfsResult<HandleId> {
        self.handles.open(path, flags, mode).await
    }

    async fn get_info(&self, id: HandleId) -> AgfsResult<FileInfo> {
        self.handles.stat(id).await
    }

    async fn handle_read(&self, id: HandleId, size: i64) -> AgfsResult<ReadResult> {
        self.handles.read(id, size).await
    }

    async fn handle_read_at(&self, id: HandleId, offset: i64, size: i64) -> AgfsResult<ReadResult> {
        self.handles.read_at(id, offset, size).await
    }

    async fn handle_write(&self, id: HandleId, data: &[u8]) -> AgfsResult<usize> {
        self.handles.write(id, data).await
    }

    async fn handle_write_at(&self, id: HandleId, offset: i64, data: &[u8]) -> AgfsResult<usize> {
        self.handles.write_at(id, offset, data).await
    }

    async fn handle_seek(&self, id: HandleId, offset: i64, whence: Whence) -> AgfsResult<i64> {
        self.handles.seek(id, offset, whence).await
    }

    async fn handle_sync(&self, id: HandleId) -> AgfsResult<()> {
        self.handles.sync(id).await
    }

    async fn close_handle(&self, id: HandleId) -> AgfsResult<()> {
        self.handles.close(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn streaming_read_yields_all_bytes_in_chunks() {
        let backend = MemFsBackend::new();
        backend.create("/big").await.unwrap();
        let data = vec![7u8; (STREAM_CHUNK_SIZE * 2 + 10) as usize];
        backend
            .write("/big", &data, 0, agfs_core::WriteFlags::new(0))
            .await
            .unwrap();

        let mut stream = backend.as_streamer().unwrap().open_stream("/big").await.unwrap();
        let mut collected = Vec::new();
        loop {
            if let Some(chunk) = stream.read_chunk(Duration::from_secs(2)).await.unwrap() {
                let eof = chunk.eof;
                collected.extend(chunk.data);
                if eof {
                    break;
                }
            }
        }
        assert_eq!(collected.len(), data.len());
    }

    #[tokio::test]
    async fn handle_write_then_read_positioned() {
        let backend = MemFsBackend::new();
        let handle_fs = backend.as_handle_fs().unwrap();
        let id = handle_fs
            .open_handle("/h", OpenFlags::new(OpenFlags::RDWR | OpenFlags::CREATE), 0o644)
            .await
            .unwrap();
        handle_fs.handle_write(id, b"0123456789").await.unwrap();
        let r = handle_fs.handle_read_at(id, 3, 4).await.unwrap();
        assert_eq!(r.data, b"3456");
        handle_fs.close_handle(id).await.unwrap();
    }
}
