use anyhow::{bail, Context, Result};
use rollcall_core::AttendanceConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration: TOML file, then `ROLLCALL_*` environment overrides.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    /// Interval between loop ticks.
    pub tick_interval_ms: u64,
    /// Number of frames to discard after opening the camera (AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Treat nearly black frames as "no frame this tick".
    pub skip_dark_frames: bool,
    /// Start recognizing as soon as the daemon is up.
    pub autostart: bool,
    /// Seed the dedup ledger from today's log rows at startup.
    pub reconcile_on_start: bool,
    /// Face matcher program and leading arguments. The frame image and
    /// reference database paths are appended.
    pub matcher_command: Vec<String>,
    /// Kill a matcher run that takes longer than this.
    pub matcher_timeout_ms: u64,
    /// Rescan the reference database this often (0: only when the matcher
    /// reports an identity the index does not know).
    pub reference_refresh_secs: u64,
    pub attendance: AttendanceConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera_device: "/dev/video0".to_string(),
            tick_interval_ms: 30,
            warmup_frames: 4,
            skip_dark_frames: true,
            autostart: false,
            reconcile_on_start: true,
            matcher_command: vec!["deepface-match".to_string()],
            matcher_timeout_ms: 10_000,
            reference_refresh_secs: 10,
            attendance: AttendanceConfig::default(),
        }
    }
}

impl Config {
    /// Load from `$ROLLCALL_CONFIG` (or the XDG default path), apply
    /// environment overrides and validate.
    pub fn load() -> Result<Self> {
        let path = std::env::var("ROLLCALL_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_path());

        let mut config = Self::load_from(&path)?;
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        tracing::debug!(?config, "configuration loaded");
        Ok(config)
    }

    /// Parse a TOML config file. A missing file yields the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file; using defaults");
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        toml::from_str(&raw).with_context(|| format!("invalid config {}", path.display()))
    }

    /// Apply `ROLLCALL_*` overrides using `lookup` to read variables.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(v) = lookup("ROLLCALL_CAMERA_DEVICE") {
            self.camera_device = v;
        }
        if let Some(v) = parse_var(&lookup, "ROLLCALL_TICK_INTERVAL_MS") {
            self.tick_interval_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "ROLLCALL_WARMUP_FRAMES") {
            self.warmup_frames = v;
        }
        if let Some(v) = lookup("ROLLCALL_SKIP_DARK_FRAMES") {
            self.skip_dark_frames = flag(&v);
        }
        if let Some(v) = lookup("ROLLCALL_AUTOSTART") {
            self.autostart = flag(&v);
        }
        if let Some(v) = lookup("ROLLCALL_RECONCILE") {
            self.reconcile_on_start = flag(&v);
        }
        if let Some(v) = lookup("ROLLCALL_MATCHER") {
            self.matcher_command = v.split_whitespace().map(str::to_string).collect();
        }
        if let Some(v) = parse_var(&lookup, "ROLLCALL_MATCHER_TIMEOUT_MS") {
            self.matcher_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "ROLLCALL_REFERENCE_REFRESH_SECS") {
            self.reference_refresh_secs = v;
        }
        if let Some(v) = parse_var(&lookup, "ROLLCALL_DISTANCE_THRESHOLD") {
            self.attendance.distance_threshold = v;
        }
        if let Some(v) = lookup("ROLLCALL_REFERENCE_DB") {
            self.attendance.reference_db = PathBuf::from(v);
        }
        if let Some(v) = lookup("ROLLCALL_LOG_PATH") {
            self.attendance.log_path = PathBuf::from(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.attendance.validate()?;
        if self.tick_interval_ms == 0 {
            bail!("tick_interval_ms must be greater than zero");
        }
        if self.matcher_command.is_empty() {
            bail!("matcher_command must name a program");
        }
        if self.matcher_timeout_ms == 0 {
            bail!("matcher_timeout_ms must be greater than zero");
        }
        Ok(())
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn matcher_timeout(&self) -> Duration {
        Duration::from_millis(self.matcher_timeout_ms)
    }

    pub fn reference_refresh(&self) -> Option<chrono::Duration> {
        if self.reference_refresh_secs == 0 {
            return None;
        }
        i64::try_from(self.reference_refresh_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
    }
}

/// `$XDG_CONFIG_HOME/rollcall/config.toml`, falling back to `~/.config`.
fn default_path() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".config")
        })
        .join("rollcall")
        .join("config.toml")
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable override");
            None
        }
    }
}

fn flag(value: &str) -> bool {
    !matches!(value.trim(), "0" | "false" | "no" | "off")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.tick_interval(), Duration::from_millis(30));
        assert_eq!(config.matcher_timeout(), Duration::from_secs(10));
        assert_eq!(config.reference_refresh(), Some(chrono::Duration::seconds(10)));
        assert!((config.attendance.distance_threshold - 0.40).abs() < f32::EPSILON);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            r#"
camera_device = "/dev/video2"
matcher_command = ["python3", "match.py", "--model", "Facenet"]

[attendance]
distance_threshold = 0.35
"#,
        )
        .unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.camera_device, "/dev/video2");
        assert_eq!(config.matcher_command.len(), 4);
        assert!((config.attendance.distance_threshold - 0.35).abs() < f32::EPSILON);
        assert_eq!(config.attendance.log_path, PathBuf::from("attendance.csv"));
        assert_eq!(config.tick_interval_ms, 30);
    }

    #[test]
    fn test_invalid_toml_is_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "tick_interval_ms = \"fast\"").unwrap();
        assert!(Config::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("ROLLCALL_TICK_INTERVAL_MS", "50"),
            ("ROLLCALL_DISTANCE_THRESHOLD", "0.3"),
            ("ROLLCALL_AUTOSTART", "1"),
            ("ROLLCALL_SKIP_DARK_FRAMES", "false"),
            ("ROLLCALL_MATCHER", "python3 match.py"),
            ("ROLLCALL_LOG_PATH", "/var/lib/rollcall/attendance.csv"),
            ("ROLLCALL_WARMUP_FRAMES", "lots"),
            ("ROLLCALL_MATCHER_TIMEOUT_MS", "2500"),
            ("ROLLCALL_REFERENCE_REFRESH_SECS", "0"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|k| vars.get(k).map(|v| v.to_string()));

        assert_eq!(config.tick_interval_ms, 50);
        assert!((config.attendance.distance_threshold - 0.3).abs() < f32::EPSILON);
        assert!(config.autostart);
        assert!(!config.skip_dark_frames);
        assert_eq!(config.matcher_command, vec!["python3", "match.py"]);
        assert_eq!(
            config.attendance.log_path,
            PathBuf::from("/var/lib/rollcall/attendance.csv")
        );
        assert_eq!(config.matcher_timeout(), Duration::from_millis(2500));
        assert_eq!(config.reference_refresh(), None);
        // Unparsable values leave the default in place.
        assert_eq!(config.warmup_frames, 4);
    }

    #[test]
    fn test_validate() {
        assert!(Config::default().validate().is_ok());

        let mut config = Config::default();
        config.tick_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.matcher_command.clear();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.matcher_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.attendance.distance_threshold = f32::INFINITY;
        assert!(config.validate().is_err());
    }
}
