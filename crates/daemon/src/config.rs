use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub mount: Vec<MountConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { addr: "127.0.0.1:4280".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

/// One `[[mount]]` table in the config file. `kind` selects the backend;
/// `db_path`/`idle_timeout_secs` only apply to `sqlproj` mounts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    pub point: String,
    pub kind: MountKind,
    #[serde(default)]
    pub db_path: Option<String>,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

fn default_idle_timeout_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MountKind {
    Memfs,
    Sqlproj,
}

impl Config {
    /// Load config from `~/.agfs/config.toml`, returning defaults if the
    /// file is missing. A root `memfs` mount is assumed by the caller when
    /// no `[[mount]]` entries are present (see `main::bootstrap_mounts`).
    pub fn load() -> Self {
        Self::load_from(&Self::default_path())
    }

    pub fn default_path() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".agfs").join("config.toml")
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "loaded config");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "invalid config file, using defaults");
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn data_dir() -> PathBuf {
        dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")).join(".agfs")
    }

    pub fn log_dir() -> PathBuf {
        Self::data_dir().join("logs")
    }

    pub fn pid_path() -> PathBuf {
        Self::data_dir().join("daemon.pid")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from(Path::new("/nonexistent/agfs/config.toml"));
        assert_eq!(config.server.addr, "127.0.0.1:4280");
        assert!(config.mount.is_empty());
    }

    #[test]
    fn parses_mount_table() {
        let toml_str = r#"
            [server]
            addr = "0.0.0.0:9000"

            [[mount]]
            point = "/"
            kind = "memfs"

            [[mount]]
            point = "/db"
            kind = "sqlproj"
            db_path = "/tmp/agfs.db"
            idle_timeout_secs = 60
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.addr, "0.0.0.0:9000");
        assert_eq!(config.mount.len(), 2);
        assert_eq!(config.mount[1].idle_timeout_secs, 60);
    }
}
