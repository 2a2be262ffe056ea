//! Aggregate byte-traffic monitor: cumulative counters plus a 1Hz ticker
//! that derives current and peak throughput.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Point-in-time throughput snapshot, refreshed once per second.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Rates {
    pub bytes_read_per_sec: u64,
    pub bytes_written_per_sec: u64,
    pub peak_bytes_read_per_sec: u64,
    pub peak_bytes_written_per_sec: u64,
}

struct Counters {
    bytes_read: AtomicU64,
    bytes_written: AtomicU64,
    rates: std::sync::RwLock<Rates>,
}

/// Shared handle; cheap to clone, cheap to call `record_read`/`record_write`
/// from every backend on every operation.
#[derive(Clone)]
pub struct TrafficMonitor {
    counters: Arc<Counters>,
}

/// Owns the background ticker task; dropping it stops monitoring.
pub struct TrafficMonitorHandle {
    pub monitor: TrafficMonitor,
    task: JoinHandle<()>,
    stop: watch::Sender<bool>,
}

impl TrafficMonitorHandle {
    pub async fn stop(self) {
        let _ = self.stop.send(true);
        let _ = self.task.await;
    }
}

impl TrafficMonitor {
    pub fn record_read(&self, n: usize) {
        self.counters.bytes_read.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn record_write(&self, n: usize) {
        self.counters.bytes_written.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn total_bytes_read(&self) -> u64 {
        self.counters.bytes_read.load(Ordering::Relaxed)
    }

    pub fn total_bytes_written(&self) -> u64 {
        self.counters.bytes_written.load(Ordering::Relaxed)
    }

    pub fn rates(&self) -> Rates {
        *self.counters.rates.read().unwrap()
    }

    /// Spawns the 1Hz ticker and returns a handle owning both the monitor
    /// and the task.
    pub fn spawn() -> TrafficMonitorHandle {
        let counters = Arc::new(Counters {
            bytes_read: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            rates: std::sync::RwLock::new(Rates::default()),
        });
        let (stop_tx, mut stop_rx) = watch::channel(false);
        let ticker_counters = counters.clone();

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            let mut last_read: u64 = 0;
            let mut last_written: u64 = 0;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let read = ticker_counters.bytes_read.load(Ordering::Relaxed);
                        let written = ticker_counters.bytes_written.load(Ordering::Relaxed);
                        let read_rate = read.saturating_sub(last_read);
                        let write_rate = written.saturating_sub(last_written);
                        last_read = read;
                        last_written = written;

                        let mut rates = ticker_counters.rates.write().unwrap();
                        rates.bytes_read_per_sec = read_rate;
                        rates.bytes_written_per_sec = write_rate;
                        rates.peak_bytes_read_per_sec = rates.peak_bytes_read_per_sec.max(read_rate);
                        rates.peak_bytes_written_per_sec = rates.peak_bytes_written_per_sec.max(write_rate);
                    }
                    _ = stop_rx.changed() => {
                        if *stop_rx.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        TrafficMonitorHandle { monitor: TrafficMonitor { counters }, task, stop: stop_tx }
    }
}

/// Monotonic id allocator shared by sessions, handles, and streams that
/// need a numeric identifier never reused within a process lifetime.
#[derive(Default)]
pub struct IdAllocator(AtomicI64);

impl IdAllocator {
    pub fn next(&self) -> i64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticker_reports_rate_after_one_interval() {
        let handle = TrafficMonitor::spawn();
        handle.monitor.record_read(100);
        handle.monitor.record_write(40);
        tokio::time::sleep(Duration::from_millis(1100)).await;
        let rates = handle.monitor.rates();
        assert_eq!(rates.bytes_read_per_sec, 100);
        assert_eq!(rates.bytes_written_per_sec, 40);
        assert_eq!(rates.peak_bytes_read_per_sec, 100);
        handle.stop().await;
    }

    #[test]
    fn id_allocator_is_monotonic_and_starts_at_one() {
        let alloc = IdAllocator::default();
        assert_eq!(alloc.next(), 1);
        assert_eq!(alloc.next(), 2);
        assert_eq!(alloc.next(), 3);
    }
}
