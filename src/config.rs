//! Service configuration
//!
//! Loaded from a TOML file with every field defaulted, so an empty (or
//! absent) file yields a working cluster layout. CLI flags override the
//! loaded values in `main`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Paths probed when no `--config` flag is given.
const DEFAULT_CONFIG_PATHS: &[&str] = &["ucxsync.toml", "/etc/ucxsync/config.toml"];

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub nodes: Vec<String>,
    pub shares: Vec<String>,
    /// Base directory under which the filesystem provider mounts every
    /// (node, share) as `<base>/<node>/<share-without-$>`.
    pub base_mount_dir: PathBuf,
    pub credentials: Credentials,
    pub sync: SyncSettings,
    pub web: WebSettings,
    pub monitoring: MonitoringSettings,
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Project to sync at startup; empty means wait for the control surface.
    pub project: String,
    /// Local destination root; empty means wait for the control surface.
    pub destination: String,
    pub max_parallelism: usize,
    pub service_loop_interval_secs: u64,
    pub min_free_disk_space: u64,
    pub disk_space_safety_margin: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WebSettings {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitoringSettings {
    pub performance_update_interval_secs: u64,
    pub cpu_smoothing_samples: usize,
    pub max_disk_throughput_mbps: f64,
    pub network_speed_bps: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nodes: (1..=13)
                .map(|n| format!("WU{n:02}"))
                .chain(std::iter::once("CU".to_string()))
                .collect(),
            shares: vec!["E$".to_string(), "F$".to_string()],
            base_mount_dir: PathBuf::from("/mnt/ucx"),
            credentials: Credentials::default(),
            sync: SyncSettings::default(),
            web: WebSettings::default(),
            monitoring: MonitoringSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            username: "Administrator".to_string(),
            password: "ultracam".to_string(),
        }
    }
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            project: String::new(),
            destination: String::new(),
            max_parallelism: 8,
            service_loop_interval_secs: 10,
            min_free_disk_space: 50 * 1024 * 1024,
            disk_space_safety_margin: 100 * 1024 * 1024,
        }
    }
}

impl Default for WebSettings {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8080,
        }
    }
}

impl Default for MonitoringSettings {
    fn default() -> Self {
        Self {
            performance_update_interval_secs: 1,
            cpu_smoothing_samples: 3,
            max_disk_throughput_mbps: 200.0,
            network_speed_bps: 1_000_000_000,
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl SyncSettings {
    pub fn service_loop_interval(&self) -> Duration {
        Duration::from_secs(self.service_loop_interval_secs.max(1))
    }
}

impl MonitoringSettings {
    pub fn performance_update_interval(&self) -> Duration {
        Duration::from_secs(self.performance_update_interval_secs.max(1))
    }
}

/// Read configuration from `path`, or from the first default location that
/// exists, or fall back to built-in defaults.
pub fn load(path: Option<&Path>) -> Result<Config> {
    let cfg = match resolve_path(path) {
        Some(file) => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading config {}", file.display()))?;
            toml::from_str(&raw).with_context(|| format!("parsing config {}", file.display()))?
        }
        None => Config::default(),
    };

    cfg.validate()?;
    Ok(cfg)
}

fn resolve_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(p) = explicit {
        return Some(p.to_path_buf());
    }
    DEFAULT_CONFIG_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|p| p.is_file())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.nodes.is_empty() {
            bail!("no nodes configured");
        }
        if self.shares.is_empty() {
            bail!("no shares configured");
        }
        if self.sync.max_parallelism < 1 {
            bail!("sync.max_parallelism must be at least 1");
        }
        if self.web.port == 0 {
            bail!("web.port must be non-zero");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_the_cluster() {
        let cfg = Config::default();
        assert_eq!(cfg.nodes.len(), 14);
        assert_eq!(cfg.nodes[0], "WU01");
        assert_eq!(cfg.nodes[12], "WU13");
        assert_eq!(cfg.nodes[13], "CU");
        assert_eq!(cfg.shares, vec!["E$", "F$"]);
        assert_eq!(cfg.sync.max_parallelism, 8);
        assert_eq!(cfg.sync.service_loop_interval(), Duration::from_secs(10));
        cfg.validate().unwrap();
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: Config = toml::from_str(
            r#"
            [sync]
            max_parallelism = 4
            destination = "/data/captures"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.sync.max_parallelism, 4);
        assert_eq!(cfg.sync.destination, "/data/captures");
        assert_eq!(cfg.nodes.len(), 14);
        assert_eq!(cfg.web.port, 8080);
    }

    #[test]
    fn rejects_zero_parallelism() {
        let mut cfg = Config::default();
        cfg.sync.max_parallelism = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_nodes() {
        let mut cfg = Config::default();
        cfg.nodes.clear();
        assert!(cfg.validate().is_err());
    }
}
