use std::sync::Arc;
use std::time::Instant;

use agfs_plugin::mount::MountTable;
use agfs_plugin::traffic::TrafficMonitor;

#[derive(Clone)]
pub struct AppState {
    pub mounts: Arc<MountTable>,
    pub traffic: TrafficMonitor,
    pub started_at: Instant,
}
