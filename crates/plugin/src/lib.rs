//! Backend contract, mount table, stateful handle registry, chunked
//! streaming, and traffic accounting shared by every AGFS backend and the
//! HTTP dispatcher.

pub mod filesystem;
pub mod handle;
pub mod mount;
pub mod stream;
pub mod traffic;

pub use filesystem::{touch_fallback, Filesystem, HandleFS, ReadResult, Streamer, Toucher};
pub use handle::{Handle, HandleId, HandleRegistry};
pub use mount::{MountEntry, MountTable};
pub use stream::{Chunk, ChannelStream, StreamReader};
pub use traffic::{IdAllocator, Rates, TrafficMonitor, TrafficMonitorHandle};
