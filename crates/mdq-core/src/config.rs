use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::retry::RetryPolicy;

/// Upper bound for the concurrency limit, whatever the config says.
pub const MAX_CONCURRENT_CAP: usize = 20;

/// Store write retry parameters (optional `[store_retry]` section in config.toml).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum number of attempts per write (including the first).
    pub max_attempts: u32,
    /// Base delay in seconds for exponential backoff (e.g. 0.05 = 50ms).
    pub base_delay_secs: f64,
    /// Maximum backoff delay in seconds.
    pub max_delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 0.05,
            max_delay_secs: 2,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            base_delay: secs_f64_to_duration(self.base_delay_secs),
            max_delay: Duration::from_secs(self.max_delay_secs),
        }
    }
}

/// Non-finite, negative or out-of-range values fall back to zero or the
/// largest representable delay instead of panicking.
fn secs_f64_to_duration(secs: f64) -> Duration {
    if secs.is_nan() || secs <= 0.0 {
        return Duration::ZERO;
    }
    Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
}

/// How `pause` is carried out.
///
/// `Suspend` stops the process in place (SIGSTOP on Unix). `Restart` terminates it
/// while keeping partial files and re-spawns on resume. `Auto` picks `Suspend`
/// where the platform supports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PauseMode {
    #[default]
    Auto,
    Suspend,
    Restart,
}

/// External downloader invocation settings (`[downloader]` section).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloaderConfig {
    /// Program name or path of the yt-dlp compatible binary.
    pub program: String,
    /// Output template appended to the task's destination directory.
    pub filename_template: String,
    /// Browser to read cookies from when a task carries no auth hint of its own.
    #[serde(default)]
    pub cookie_browser: Option<String>,
    /// Extra arguments passed to every invocation, before the locator.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for DownloaderConfig {
    fn default() -> Self {
        Self {
            program: "yt-dlp".to_string(),
            filename_template: "%(title)s.%(ext)s".to_string(),
            cookie_browser: None,
            extra_args: Vec::new(),
        }
    }
}

/// Global configuration loaded from `~/.config/mdq/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MdqConfig {
    /// Maximum number of tasks downloading at once (clamped to 1..=20).
    pub max_concurrent: usize,
    /// Default destination directory for new tasks (None = current directory).
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Seconds to wait after a graceful terminate before force-killing.
    pub cancel_grace_secs: u64,
    /// Warn when a running task reports no progress for this many seconds (None = off).
    #[serde(default)]
    pub stall_window_secs: Option<u64>,
    /// Minimum interval between durable progress writes for one task.
    pub progress_persist_interval_ms: u64,
    #[serde(default)]
    pub pause_mode: PauseMode,
    #[serde(default)]
    pub downloader: DownloaderConfig,
    /// Optional store retry policy; if missing, built-in defaults are used.
    #[serde(default)]
    pub store_retry: Option<RetryConfig>,
}

impl Default for MdqConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            download_dir: None,
            cancel_grace_secs: 5,
            stall_window_secs: None,
            progress_persist_interval_ms: 1000,
            pause_mode: PauseMode::Auto,
            downloader: DownloaderConfig::default(),
            store_retry: None,
        }
    }
}

impl MdqConfig {
    /// Concurrency limit after clamping to the supported range.
    pub fn concurrency_limit(&self) -> usize {
        self.max_concurrent.clamp(1, MAX_CONCURRENT_CAP)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_secs(self.cancel_grace_secs)
    }

    pub fn stall_window(&self) -> Option<Duration> {
        self.stall_window_secs
            .filter(|s| *s > 0)
            .map(Duration::from_secs)
    }

    pub fn progress_persist_interval(&self) -> Duration {
        Duration::from_millis(self.progress_persist_interval_ms)
    }

    pub fn store_retry_policy(&self) -> RetryPolicy {
        self.store_retry
            .as_ref()
            .map(RetryConfig::to_policy)
            .unwrap_or_default()
    }
}

pub fn config_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("mdq")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> Result<MdqConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = MdqConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!("created default config at {}", path.display());
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: MdqConfig = toml::from_str(&data)?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = MdqConfig::default();
        assert_eq!(cfg.max_concurrent, 3);
        assert_eq!(cfg.cancel_grace_secs, 5);
        assert_eq!(cfg.pause_mode, PauseMode::Auto);
        assert_eq!(cfg.downloader.program, "yt-dlp");
        assert!(cfg.stall_window().is_none());
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = MdqConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: MdqConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.max_concurrent, cfg.max_concurrent);
        assert_eq!(parsed.downloader.filename_template, cfg.downloader.filename_template);
        assert_eq!(parsed.progress_persist_interval_ms, cfg.progress_persist_interval_ms);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            max_concurrent = 2
            download_dir = "/srv/media"
            cancel_grace_secs = 1
            stall_window_secs = 30
            progress_persist_interval_ms = 250
            pause_mode = "restart"

            [downloader]
            program = "/opt/bin/yt-dlp"
            filename_template = "%(id)s.%(ext)s"
            cookie_browser = "firefox"
            extra_args = ["--limit-rate", "2M"]
        "#;
        let cfg: MdqConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.max_concurrent, 2);
        assert_eq!(cfg.download_dir.as_deref(), Some(std::path::Path::new("/srv/media")));
        assert_eq!(cfg.stall_window(), Some(Duration::from_secs(30)));
        assert_eq!(cfg.pause_mode, PauseMode::Restart);
        assert_eq!(cfg.downloader.cookie_browser.as_deref(), Some("firefox"));
        assert_eq!(cfg.downloader.extra_args, vec!["--limit-rate", "2M"]);
        assert!(cfg.store_retry.is_none());
    }

    #[test]
    fn concurrency_limit_is_clamped() {
        let mut cfg = MdqConfig::default();
        cfg.max_concurrent = 0;
        assert_eq!(cfg.concurrency_limit(), 1);
        cfg.max_concurrent = 500;
        assert_eq!(cfg.concurrency_limit(), MAX_CONCURRENT_CAP);
    }

    #[test]
    fn store_retry_section_maps_to_policy() {
        let toml = r#"
            max_concurrent = 3
            cancel_grace_secs = 5
            progress_persist_interval_ms = 1000

            [store_retry]
            max_attempts = 3
            base_delay_secs = 0.5
            max_delay_secs = 4
        "#;
        let cfg: MdqConfig = toml::from_str(toml).unwrap();
        let policy = cfg.store_retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay, Duration::from_millis(500));
        assert_eq!(policy.max_delay, Duration::from_secs(4));
    }

    #[test]
    fn retry_delays_tolerate_extreme_values() {
        let policy = |base: f64| {
            RetryConfig {
                max_attempts: 3,
                base_delay_secs: base,
                max_delay_secs: 2,
            }
            .to_policy()
        };
        assert_eq!(policy(f64::INFINITY).base_delay, Duration::MAX);
        assert_eq!(policy(1e300).base_delay, Duration::MAX);
        assert_eq!(policy(f64::NAN).base_delay, Duration::ZERO);
        assert_eq!(policy(-1.0).base_delay, Duration::ZERO);
        assert_eq!(policy(0.25).base_delay, Duration::from_millis(250));
    }
}
