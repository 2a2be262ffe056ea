//! Long-lived chunked stream reads.
//!
//! A [`StreamReader`] is the contract the HTTP layer drives: one chunk at a
//! time, with a caller-supplied timeout per chunk. Spawning a fresh task
//! per chunk would race cancellation against delivery, so the reader here
//! instead runs a single background task for the life of the stream and
//! talks to it over a channel.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};

use agfs_core::{AgfsError, AgfsResult};

/// Outcome of a single `read_chunk` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub data: Vec<u8>,
    pub eof: bool,
}

/// A stream open on one file. `read_chunk` may be called repeatedly until
/// `eof` is seen; `close` releases the backend resources it holds
/// regardless of whether eof was reached.
#[async_trait]
pub trait StreamReader: Send {
    /// Waits up to `timeout` for the next chunk. A timeout is not an
    /// error: it means no data was available yet and the caller should
    /// retry.
    async fn read_chunk(&mut self, timeout: Duration) -> AgfsResult<Option<Chunk>>;

    async fn close(&mut self);
}

/// Messages the background task emits. `Tick` lets [`ChannelStream`]
/// distinguish "nothing yet, keep waiting" from genuine channel closure.
enum Event {
    Chunk(Chunk),
    Err(AgfsError),
}

/// Generic [`StreamReader`] backed by a single task reading a backend in
/// fixed-size chunks via a plain async closure. Any backend that can
/// express "give me the next chunk" as an `AgfsResult<Chunk>` future can
/// reuse this instead of hand-rolling task/cancellation plumbing.
pub struct ChannelStream {
    rx: mpsc::Receiver<Event>,
    cancel: watch::Sender<bool>,
    done: bool,
}

impl ChannelStream {
    /// Spawns the reader task. `next_chunk` is called repeatedly with the
    /// running byte offset and must return the next chunk (empty data with
    /// `eof: true` signals end of stream).
    pub fn spawn<F, Fut>(chunk_size: i64, mut next_chunk: F) -> Self
    where
        F: FnMut(i64) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = AgfsResult<Chunk>> + Send,
    {
        let (tx, rx) = mpsc::channel(1);
        let (cancel_tx, mut cancel_rx) = watch::channel(false);

        tokio::spawn(async move {
            let mut offset: i64 = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = cancel_rx.changed() => {
                        if *cancel_rx.borrow() {
                            return;
                        }
                    }
                    result = next_chunk(offset) => {
                        match result {
                            Ok(chunk) => {
                                offset += chunk.data.len() as i64;
                                let eof = chunk.eof;
                                if tx.send(Event::Chunk(chunk)).await.is_err() {
                                    return;
                                }
                                if eof {
                                    return;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Event::Err(e)).await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        Self { rx, cancel: cancel_tx, done: false }
    }
}

#[async_trait]
impl StreamReader for ChannelStream {
    async fn read_chunk(&mut self, timeout: Duration) -> AgfsResult<Option<Chunk>> {
        if self.done {
            return Ok(Some(Chunk { data: vec![], eof: true }));
        }
        match tokio::time::timeout(timeout, self.rx.recv()).await {
            Ok(Some(Event::Chunk(chunk))) => {
                if chunk.eof {
                    self.done = true;
                }
                Ok(Some(chunk))
            }
            Ok(Some(Event::Err(e))) => {
                self.done = true;
                Err(e)
            }
            Ok(None) => {
                self.done = true;
                Ok(Some(Chunk { data: vec![], eof: true }))
            }
            Err(_elapsed) => Ok(None),
        }
    }

    async fn close(&mut self) {
        let _ = self.cancel.send(true);
        self.done = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn yields_chunks_then_eof() {
        let data = Arc::new(b"abcdefghij".to_vec());
        let mut stream = ChannelStream::spawn(4, move |offset| {
            let data = data.clone();
            async move {
                let offset = offset as usize;
                if offset >= data.len() {
                    return Ok(Chunk { data: vec![], eof: true });
                }
                let end = (offset + 4).min(data.len());
                Ok(Chunk { data: data[offset..end].to_vec(), eof: end == data.len() })
            }
        });

        let mut collected = Vec::new();
        loop {
            let chunk = stream.read_chunk(Duration::from_secs(1)).await.unwrap().unwrap();
            let eof = chunk.eof;
            collected.extend(chunk.data);
            if eof {
                break;
            }
        }
        assert_eq!(collected, b"abcdefghij");
    }

    #[tokio::test]
    async fn idle_timeout_is_not_an_error() {
        let gate = Arc::new(Mutex::new(()));
        let held = gate.clone().lock_owned().await;
        let mut stream = ChannelStream::spawn(1, move |_offset| {
            let gate = gate.clone();
            async move {
                let _g = gate.lock().await;
                Ok(Chunk { data: vec![1], eof: true })
            }
        });

        let timed_out = stream.read_chunk(Duration::from_millis(20)).await.unwrap();
        assert!(timed_out.is_none());
        drop(held);

        let chunk = stream.read_chunk(Duration::from_secs(1)).await.unwrap().unwrap();
        assert_eq!(chunk.data, vec![1]);
    }

    #[tokio::test]
    async fn close_cancels_background_task() {
        let mut stream = ChannelStream::spawn(1, |_offset| async move {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Chunk { data: vec![], eof: true })
        });
        stream.close().await;
    }
}
