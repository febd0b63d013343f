use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

const CONFIG_FILE: &str = "drydock.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
}

impl Config {
    /// Load configuration from `drydock.toml` in the given directory,
    /// falling back to defaults when the file does not exist.
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(CONFIG_FILE);
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        Ok(config)
    }
}

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port the API listens on.
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

/// Remote sandbox provider configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Container image used for new sandboxes.
    #[serde(default = "default_image")]
    pub image: String,

    /// Working directory inside the sandbox where repositories are cloned.
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Host used to build externally reachable URLs for exposed ports.
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Ports checked, in order, when deriving the dev-server URL.
    #[serde(default = "default_candidate_ports")]
    pub candidate_ports: Vec<u16>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            workdir: default_workdir(),
            public_host: default_public_host(),
            candidate_ports: default_candidate_ports(),
        }
    }
}

fn default_image() -> String {
    "node:20-bookworm".to_string()
}

fn default_workdir() -> String {
    "/workspace".to_string()
}

fn default_public_host() -> String {
    "127.0.0.1".to_string()
}

fn default_candidate_ports() -> Vec<u16> {
    vec![3000, 5173]
}

/// Bounds applied to remote commands.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Hard timeout for `git clone`, in seconds.
    #[serde(default = "default_clone_secs")]
    pub clone_secs: u64,

    /// Hard timeout for dependency installation, in seconds.
    #[serde(default = "default_install_secs")]
    pub install_secs: u64,

    /// Timeout for short inspection commands (directory walks, liveness
    /// checks), in seconds.
    #[serde(default = "default_exec_secs")]
    pub exec_secs: u64,

    /// Grace period after launching the dev server before the liveness
    /// check, in seconds.
    #[serde(default = "default_launch_grace_secs")]
    pub launch_grace_secs: u64,

    /// Readiness probe attempts against the exposed URL.
    #[serde(default = "default_probe_attempts")]
    pub probe_attempts: u32,

    /// Base delay between probe attempts, in milliseconds.
    #[serde(default = "default_probe_base_delay_ms")]
    pub probe_base_delay_ms: u64,
}

impl TimeoutConfig {
    pub fn clone_timeout(&self) -> Duration {
        Duration::from_secs(self.clone_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_secs)
    }

    pub fn exec_timeout(&self) -> Duration {
        Duration::from_secs(self.exec_secs)
    }

    pub fn launch_grace(&self) -> Duration {
        Duration::from_secs(self.launch_grace_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            clone_secs: default_clone_secs(),
            install_secs: default_install_secs(),
            exec_secs: default_exec_secs(),
            launch_grace_secs: default_launch_grace_secs(),
            probe_attempts: default_probe_attempts(),
            probe_base_delay_ms: default_probe_base_delay_ms(),
        }
    }
}

fn default_clone_secs() -> u64 {
    300
}

fn default_install_secs() -> u64 {
    300
}

fn default_exec_secs() -> u64 {
    60
}

fn default_launch_grace_secs() -> u64 {
    3
}

fn default_probe_attempts() -> u32 {
    5
}

fn default_probe_base_delay_ms() -> u64 {
    500
}

/// Sandbox lifetime and reclamation policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleConfig {
    /// Minutes of inactivity before a running sandbox becomes eligible for
    /// the idle reaper.
    #[serde(default = "default_idle_grace_minutes")]
    pub idle_grace_minutes: i64,

    /// Seconds between reaper sweeps.
    #[serde(default = "default_reaper_interval_secs")]
    pub reaper_interval_secs: u64,
}

impl LifecycleConfig {
    /// The fixed grace window added to `last_active_at` to derive
    /// `auto_stop_at`.
    pub fn grace_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.idle_grace_minutes)
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_grace_minutes: default_idle_grace_minutes(),
            reaper_interval_secs: default_reaper_interval_secs(),
        }
    }
}

fn default_idle_grace_minutes() -> i64 {
    15
}

fn default_reaper_interval_secs() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.timeouts.clone_secs, 300);
        assert_eq!(config.timeouts.launch_grace_secs, 3);
        assert_eq!(config.lifecycle.idle_grace_minutes, 15);
        assert_eq!(config.sandbox.candidate_ports, vec![3000, 5173]);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.server.port, 8080);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[timeouts]\nclone_secs = 120\n\n[lifecycle]\nidle_grace_minutes = 5\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.timeouts.clone_secs, 120);
        assert_eq!(config.timeouts.install_secs, 300);
        assert_eq!(config.lifecycle.idle_grace_minutes, 5);
    }

    #[test]
    fn test_load_invalid_file() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "not valid toml [[").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_grace_window() {
        let config = LifecycleConfig::default();
        assert_eq!(config.grace_window(), chrono::Duration::minutes(15));
    }
}
