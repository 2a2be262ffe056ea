//! Per-backend stateful file handle registry.
//!
//! [`HandleRegistry`] is a layer over any [`Filesystem`]: it adds handle
//! identity, position tracking, and access-mode enforcement on top of the
//! backend's ordinary path-based `read`/`write`/`stat`, so a backend gets
//! working `HandleFS` support for free by delegating to a registry wrapping
//! itself, as the in-memory backend does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};

use agfs_core::{AgfsError, AgfsResult, FileInfo, OpenFlags, WriteFlags, Whence};

use crate::filesystem::{Filesystem, ReadResult};

/// Unique, backend-scoped handle identifier. `0` denotes "no handle";
/// real handles are always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HandleId(pub i64);

impl HandleId {
    pub const NONE: HandleId = HandleId(0);
}

impl std::fmt::Display for HandleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct HandleState {
    path: String,
    flags: OpenFlags,
    position: i64,
    closed: bool,
}

pub struct Handle {
    pub id: HandleId,
    state: Mutex<HandleState>,
}

/// Registry of live handles for a single backend. Construct one per
/// backend instance and delegate a [`crate::filesystem::HandleFS`] impl to
/// it.
pub struct HandleRegistry {
    backend: Arc<dyn Filesystem>,
    handles: RwLock<HashMap<HandleId, Arc<Handle>>>,
    next_id: AtomicI64,
}

impl HandleRegistry {
    pub fn new(backend: Arc<dyn Filesystem>) -> Self {
        Self {
            backend,
            handles: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub async fn open(&self, path: &str, flags: OpenFlags, mode: u32) -> AgfsResult<HandleId> {
        let stat = self.backend.stat(path).await;

        match &stat {
            Ok(_) if flags.exclusive() => {
                return Err(AgfsError::already_exists(format!(
                    "{path} already exists (O_EXCL)"
                )))
            }
            Ok(info) if info.is_dir => {
                return Err(AgfsError::invalid_argument(format!(
                    "{path} is a directory"
                )))
            }
            Ok(_) => {}
            Err(AgfsError::NotFound { .. }) => {
                if flags.create() {
                    self.backend.create(path).await?;
                } else {
                    return Err(AgfsError::not_found(path.to_string()));
                }
            }
            Err(e) => return Err(e.clone()),
        }

        if flags.truncate() {
            self.backend
                .write(path, &[], -1, WriteFlags::new(WriteFlags::TRUNC))
                .await?;
        }

        let id = HandleId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let handle = Arc::new(Handle {
            id,
            state: Mutex::new(HandleState {
                path: path.to_string(),
                flags,
                position: 0,
                closed: false,
            }),
        });
        self.handles.write().await.insert(id, handle);
        Ok(id)
    }

    async fn get(&self, id: HandleId) -> AgfsResult<Arc<Handle>> {
        self.handles
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AgfsError::not_found(format!("handle {id}")))
    }

    pub async fn stat(&self, id: HandleId) -> AgfsResult<FileInfo> {
        let handle = self.get(id).await?;
        let state = handle.state.lock().await;
        if state.closed {
            return Err(AgfsError::not_found(format!("handle {id}")));
        }
        self.backend.stat(&state.path).await
    }

    pub async fn read(&self, id: HandleId, size: i64) -> AgfsResult<ReadResult> {
        let handle = self.get(id).await?;
        let mut state = handle.state.lock().await;
        Self::ensure_open(&state, id)?;
        if !state.flags.readable() {
            return Err(AgfsError::invalid_argument("handle not open for reading"));
        }
        let result = self.backend.read(&state.path, state.position, size).await?;
        state.position += result.data.len() as i64;
        Ok(result)
    }

    pub async fn read_at(&self, id: HandleId, offset: i64, size: i64) -> AgfsResult<ReadResult> {
        let handle = self.get(id).await?;
        let state = handle.state.lock().await;
        Self::ensure_open(&state, id)?;
        if !state.flags.readable() {
            return Err(AgfsError::invalid_argument("handle not open for reading"));
        }
        self.backend.read(&state.path, offset, size).await
    }

    pub async fn write(&self, id: HandleId, data: &[u8]) -> AgfsResult<usize> {
        let handle = self.get(id).await?;
        let mut state = handle.state.lock().await;
        Self::ensure_open(&state, id)?;
        if !state.flags.writable() {
            return Err(AgfsError::invalid_argument("handle not open for writing"));
        }
        let write_flags = if state.flags.append() {
            WriteFlags::new(WriteFlags::APPEND)
        } else {
            WriteFlags::new(0)
        };
        let offset = if state.flags.append() { -1 } else { state.position };
        let n = self
            .backend
            .write(&state.path, data, offset, write_flags)
            .await?;
        if state.flags.append() {
            let info = self.backend.stat(&state.path).await?;
            state.position = info.size;
        } else {
            state.position += n as i64;
        }
        Ok(n)
    }

    pub async fn write_at(&self, id: HandleId, offset: i64, data: &[u8]) -> AgfsResult<usize> {
        let handle = self.get(id).await?;
        let state = handle.state.lock().await;
        Self::ensure_open(&state, id)?;
        if !state.flags.writable() {
            return Err(AgfsError::invalid_argument("handle not open for writing"));
        }
        self.backend
            .write(&state.path, data, offset, WriteFlags::new(0))
            .await
    }

    pub async fn seek(&self, id: HandleId, offset: i64, whence: Whence) -> AgfsResult<i64> {
        let handle = self.get(id).await?;
        let mut state = handle.state.lock().await;
        Self::ensure_open(&state, id)?;
        let base = match whence {
            Whence::Start => 0,
            Whence::Current => state.position,
            Whence::End => self.backend.stat(&state.path).await?.size,
        };
        let new_pos = base + offset;
        if new_pos < 0 {
            return Err(AgfsError::invalid_argument("seek before start of file"));
        }
        state.position = new_pos;
        Ok(new_pos)
    }

    /// No-op for this (volatile) registry: nothing is buffered outside the
    /// backend's own writes, and there is no transaction to commit.
    pub async fn sync(&self, id: HandleId) -> AgfsResult<()> {
        let handle = self.get(id).await?;
        let state = handle.state.lock().await;
        Self::ensure_open(&state, id)?;
        Ok(())
    }

    pub async fn close(&self, id: HandleId) -> AgfsResult<()> {
        let handle = {
            let mut handles = self.handles.write().await;
            handles
                .remove(&id)
                .ok_or_else(|| AgfsError::not_found(format!("handle {id}")))?
        };
        let mut state = handle.state.lock().await;
        state.closed = true;
        Ok(())
    }

    /// Close every outstanding handle; used by backend `shutdown()`.
    pub async fn close_all(&self) {
        let mut handles = self.handles.write().await;
        for (_, handle) in handles.drain() {
            handle.state.lock().await.closed = true;
        }
    }

    pub async fn len(&self) -> usize {
        self.handles.read().await.len()
    }

    fn ensure_open(state: &HandleState, id: HandleId) -> AgfsResult<()> {
        if state.closed {
            Err(AgfsError::not_found(format!("handle {id}")))
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex as StdMutex;

    /// Minimal in-memory single-file backend, just enough to exercise the
    /// registry's handle bookkeeping independent of the real reference
    /// backend.
    struct OneFile(StdMutex<HashMap<String, Vec<u8>>>);

    #[async_trait]
    impl Filesystem for OneFile {
        async fn create(&self, path: &str) -> AgfsResult<()> {
            self.0.lock().unwrap().entry(path.to_string()).or_default();
            Ok(())
        }
        async fn mkdir(&self, _path: &str, _mode: u32) -> AgfsResult<()> {
            Err(AgfsError::not_supported("no dirs"))
        }
        async fn remove(&self, path: &str) -> AgfsResult<()> {
            self.0.lock().unwrap().remove(path);
            Ok(())
        }
        async fn remove_all(&self, path: &str) -> AgfsResult<()> {
            self.remove(path).await
        }
        async fn read(&self, path: &str, offset: i64, size: i64) -> AgfsResult<ReadResult> {
            let map = self.0.lock().unwrap();
            let data = map.get(path).ok_or_else(|| AgfsError::not_found(path.to_string()))?;
            let offset = offset.max(0) as usize;
            if offset >= data.len() {
                return Ok(ReadResult { data: vec![], eof: true });
            }
            let end = if size < 0 {
                data.len()
            } else {
                (offset + size as usize).min(data.len())
            };
            Ok(ReadResult {
                data: data[offset..end].to_vec(),
                eof: end == data.len(),
            })
        }
        async fn write(
            &self,
            path: &str,
            data: &[u8],
            offset: i64,
            flags: WriteFlags,
        ) -> AgfsResult<usize> {
            let mut map = self.0.lock().unwrap();
            let buf = map.entry(path.to_string()).or_default();
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
            Ok(data.len())
        }
        async fn read_dir(&self, _path: &str) -> AgfsResult<Vec<FileInfo>> {
            Ok(vec![])
        }
        async fn stat(&self, path: &str) -> AgfsResult<FileInfo> {
            let map = self.0.lock().unwrap();
            let data = map.get(path).ok_or_else(|| AgfsError::not_found(path.to_string()))?;
            Ok(FileInfo::file(
                path,
                data.len() as i64,
                Utc::now(),
                agfs_core::Meta::new("onefile", "file"),
            ))
        }
        async fn rename(&self, _old: &str, _new: &str) -> AgfsResult<()> {
            Err(AgfsError::not_supported("rename"))
        }
        async fn chmod(&self, _path: &str, _mode: u32) -> AgfsResult<()> {
            Ok(())
        }
        fn backend_name(&self) -> &str {
            "onefile"
        }
    }

    fn registry() -> HandleRegistry {
        HandleRegistry::new(Arc::new(OneFile(StdMutex::new(HashMap::new()))))
    }

    #[tokio::test]
    async fn open_create_write_read_roundtrip() {
        let reg = registry();
        let id = reg
            .open("/x", OpenFlags::new(OpenFlags::RDWR | OpenFlags::CREATE), 0o644)
            .await
            .unwrap();
        reg.write(id, b"Hello").await.unwrap();
        reg.seek(id, 0, Whence::Start).await.unwrap();
        let r = reg.read(id, 5).await.unwrap();
        assert_eq!(r.data, b"Hello");
    }

    #[tokio::test]
    async fn exclusive_create_conflicts() {
        let reg = registry();
        reg.open("/y", OpenFlags::new(OpenFlags::RDWR | OpenFlags::CREATE), 0o644)
            .await
            .unwrap();
        let second = reg
            .open(
                "/y",
                OpenFlags::new(OpenFlags::RDWR | OpenFlags::CREATE | OpenFlags::EXCL),
                0o644,
            )
            .await;
        assert!(matches!(second, Err(AgfsError::AlreadyExists { .. })));
    }

    #[tokio::test]
    async fn readonly_handle_rejects_write() {
        let reg = registry();
        let id = reg
            .open("/z", OpenFlags::new(OpenFlags::RDONLY | OpenFlags::CREATE), 0o644)
            .await
            .unwrap();
        let err = reg.write(id, b"nope").await.unwrap_err();
        assert!(matches!(err, AgfsError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn close_then_use_is_not_found() {
        let reg = registry();
        let id = reg
            .open("/w", OpenFlags::new(OpenFlags::RDWR | OpenFlags::CREATE), 0o644)
            .await
            .unwrap();
        reg.close(id).await.unwrap();
        let err = reg.stat(id).await.unwrap_err();
        assert!(matches!(err, AgfsError::NotFound { .. }));
        let err = reg.close(id).await.unwrap_err();
        assert!(matches!(err, AgfsError::NotFound { .. }));
    }
}
