//! Engine configuration.
//!
//! All tunables are read from `OPENMUX_*` environment variables with
//! documented defaults. Timing constants live here too so tests can
//! shrink them instead of sleeping through production intervals.

use std::time::Duration;

/// Engine-wide configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Hot scrollback ring size per PTY (lines).
    pub scrollback_hot_limit: usize,
    /// Per-PTY on-disk archive budget in megabytes.
    pub archive_max_mb: u64,
    /// Global on-disk archive budget in megabytes, across all PTYs.
    pub archive_global_max_mb: u64,
    /// Lines per archive chunk file.
    pub archive_chunk_lines: usize,
    /// Working directory inherited by new PTYs when none is given.
    pub original_cwd: Option<String>,

    /// Number of emulator workers.
    pub worker_count: usize,
    /// Consecutive worker errors within `error_window` that trigger a restart.
    pub max_consecutive_errors: usize,
    /// Window for counting consecutive worker errors.
    pub error_window: Duration,
    /// Timeout for request/response calls into a worker.
    pub request_timeout: Duration,
    /// Pending update count above which a worker downgrades deltas to a
    /// single full refresh.
    pub update_high_water: usize,

    /// Maximum time output is held inside a DECSET 2026 sync block.
    pub sync_timeout: Duration,

    /// Periodic autosave interval for the active session.
    pub autosave_interval: Duration,
    /// Debounce applied to immediate saves on layout changes.
    pub save_debounce: Duration,

    /// Master pane share of the viewport, in (0, 1).
    pub split_ratio: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            scrollback_hot_limit: 2000,
            archive_max_mb: 200,
            archive_global_max_mb: 2000,
            archive_chunk_lines: 2000,
            original_cwd: None,
            worker_count: default_worker_count(),
            max_consecutive_errors: 5,
            error_window: Duration::from_secs(30),
            request_timeout: Duration::from_secs(5),
            update_high_water: 256,
            sync_timeout: Duration::from_millis(50),
            autosave_interval: Duration::from_secs(30),
            save_debounce: Duration::from_millis(200),
            split_ratio: 0.5,
        }
    }
}

fn default_worker_count() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);
    cores.min(4)
}

impl Config {
    /// Build a config from the environment, falling back to defaults for
    /// anything unset or unparseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(v) = env_usize("OPENMUX_SCROLLBACK_HOT_LIMIT") {
            config.scrollback_hot_limit = v.max(1);
        }
        if let Some(v) = env_u64("OPENMUX_SCROLLBACK_ARCHIVE_MAX_MB") {
            config.archive_max_mb = v;
        }
        if let Some(v) = env_u64("OPENMUX_SCROLLBACK_ARCHIVE_GLOBAL_MAX_MB") {
            config.archive_global_max_mb = v;
        }
        if let Some(v) = env_usize("OPENMUX_SCROLLBACK_ARCHIVE_CHUNK_LINES") {
            config.archive_chunk_lines = v.max(1);
        }
        if let Ok(cwd) = std::env::var("OPENMUX_ORIGINAL_CWD") {
            if !cwd.is_empty() {
                config.original_cwd = Some(cwd);
            }
        }

        config
    }

    /// Per-PTY archive budget in bytes.
    pub fn archive_max_bytes(&self) -> u64 {
        self.archive_max_mb * 1024 * 1024
    }

    /// Global archive budget in bytes.
    pub fn archive_global_max_bytes(&self) -> u64 {
        self.archive_global_max_mb * 1024 * 1024
    }

    /// Clamp out-of-range values into their valid ranges.
    pub fn validate(&mut self) {
        self.scrollback_hot_limit = self.scrollback_hot_limit.max(1);
        self.archive_chunk_lines = self.archive_chunk_lines.max(1);
        self.worker_count = self.worker_count.max(1);
        if !(self.split_ratio > 0.0 && self.split_ratio < 1.0) {
            self.split_ratio = 0.5;
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparseable {name}={raw}");
            None
        }
    }
}

fn env_u64(name: &str) -> Option<u64> {
    let raw = std::env::var(name).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("ignoring unparseable {name}={raw}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_values() {
        let config = Config::default();
        assert_eq!(config.scrollback_hot_limit, 2000);
        assert_eq!(config.archive_max_mb, 200);
        assert_eq!(config.archive_global_max_mb, 2000);
        assert_eq!(config.archive_chunk_lines, 2000);
        assert_eq!(config.max_consecutive_errors, 5);
        assert_eq!(config.error_window, Duration::from_secs(30));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.sync_timeout, Duration::from_millis(50));
        assert!(config.worker_count >= 1 && config.worker_count <= 4);
    }

    #[test]
    fn validate_clamps_degenerate_values() {
        let mut config = Config {
            scrollback_hot_limit: 0,
            archive_chunk_lines: 0,
            worker_count: 0,
            split_ratio: 1.5,
            ..Config::default()
        };
        config.validate();
        assert_eq!(config.scrollback_hot_limit, 1);
        assert_eq!(config.archive_chunk_lines, 1);
        assert_eq!(config.worker_count, 1);
        assert!((config.split_ratio - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn archive_budgets_convert_to_bytes() {
        let config = Config::default();
        assert_eq!(config.archive_max_bytes(), 200 * 1024 * 1024);
        assert_eq!(config.archive_global_max_bytes(), 2000 * 1024 * 1024);
    }
}
