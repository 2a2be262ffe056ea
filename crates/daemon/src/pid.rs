use std::fs;
use std::io;
use std::path::PathBuf;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;

pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Acquires the PID file, replacing a stale one left by a crashed
    /// process. Returns an error if another instance is genuinely running.
    pub fn acquire(&self) -> io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        if let Some(existing_pid) = self.read_pid() {
            if is_process_alive(existing_pid) {
                return Err(io::Error::new(
                    io::ErrorKind::AddrInUse,
                    format!(
                        "agfsd already running (pid {existing_pid}). Stop it first or remove {}",
                        self.path.display()
                    ),
                ));
            }
            tracing::info!(pid = existing_pid, "removing stale PID file");
            let _ = fs::remove_file(&self.path);
        }

        let pid = std::process::id();
        fs::write(&self.path, pid.to_string())?;
        tracing::info!(pid, path = %self.path.display(), "wrote PID file");
        Ok(())
    }

    fn release(&self) {
        if self.path.exists() {
            if let Err(e) = fs::remove_file(&self.path) {
                tracing::warn!(error = %e, "failed to remove PID file");
            }
        }
    }

    fn read_pid(&self) -> Option<u32> {
        fs::read_to_string(&self.path).ok()?.trim().parse::<u32>().ok()
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        self.release();
    }
}

fn is_process_alive(pid: u32) -> bool {
    kill(Pid::from_raw(pid as i32), Signal::SIGCONT).map(|_| true).unwrap_or_else(|e| e == nix::errno::Errno::EPERM)
}
