use serde::{Deserialize, Serialize};
use std::{env, fs, path::PathBuf};

/// Tuning knobs for the conversation sync engine.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SyncConfig {
    /// Window for matching an inserted row against a pending optimistic
    /// entry when the client tag did not round-trip, in seconds.
    pub promotion_window_secs: i64,

    /// How long a keystroke keeps a participant in the typing state, in
    /// milliseconds.
    pub typing_ttl_ms: u64,

    /// How many recent rows to re-fetch after a subscription reconnect.
    pub resync_window: u32,

    /// Delay before reopening a dropped subscription channel, in
    /// milliseconds.
    pub reconnect_backoff_ms: u64,

    /// How many trailing entries still count as "near the bottom" for the
    /// scroll-to-latest policy.
    pub near_bottom_threshold: usize,

    /// Logging level handed to the embedder's subscriber setup.
    pub log_level: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            promotion_window_secs: 30,
            typing_ttl_ms: 1800,
            resync_window: 200,
            reconnect_backoff_ms: 1000,
            near_bottom_threshold: 4,
            log_level: "info".to_string(),
        }
    }
}

impl SyncConfig {
    /// Loads the configuration from a file, environment variables, or
    /// defaults, in that merge order. Environment variables only apply to
    /// values the file left at their defaults.
    ///
    /// # Errors
    /// Fails on an unreadable or unparsable file, a malformed numeric
    /// environment value, or a configuration that does not validate.
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, Box<dyn std::error::Error>> {
        let mut config = Self::default();

        if let Some(path) = config_path {
            let content = fs::read_to_string(&path)?;
            config = match path.extension().and_then(|ext| ext.to_str()) {
                Some("yaml" | "yml") => serde_yml::from_str(&content)?,
                Some("json") => serde_json::from_str(&content)?,
                _ => return Err("Unsupported configuration format. Use 'yaml' or 'json'.".into()),
            };
        }

        let defaults = Self::default();
        if config.promotion_window_secs == defaults.promotion_window_secs
            && let Ok(value) = env::var("HUDDLE_PROMOTION_WINDOW_SECS")
        {
            config.promotion_window_secs = value
                .parse()
                .map_err(|_| "Invalid HUDDLE_PROMOTION_WINDOW_SECS value: must be a number of seconds")?;
        }
        if config.typing_ttl_ms == defaults.typing_ttl_ms
            && let Ok(value) = env::var("HUDDLE_TYPING_TTL_MS")
        {
            config.typing_ttl_ms = value
                .parse()
                .map_err(|_| "Invalid HUDDLE_TYPING_TTL_MS value: must be a number of milliseconds")?;
        }
        if config.resync_window == defaults.resync_window
            && let Ok(value) = env::var("HUDDLE_RESYNC_WINDOW")
        {
            config.resync_window = value
                .parse()
                .map_err(|_| "Invalid HUDDLE_RESYNC_WINDOW value: must be a row count")?;
        }
        if config.reconnect_backoff_ms == defaults.reconnect_backoff_ms
            && let Ok(value) = env::var("HUDDLE_RECONNECT_BACKOFF_MS")
        {
            config.reconnect_backoff_ms = value
                .parse()
                .map_err(|_| "Invalid HUDDLE_RECONNECT_BACKOFF_MS value: must be a number of milliseconds")?;
        }
        if config.log_level == defaults.log_level
            && let Ok(level) = env::var("HUDDLE_LOG_LEVEL")
        {
            config.log_level = level;
        }

        config.validate().map_err(|errors| errors.join("; "))?;
        Ok(config)
    }

    /// Validates that every knob sits in a workable range.
    ///
    /// # Errors
    /// Returns the list of violations when any value is out of range.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.promotion_window_secs <= 0 {
            errors.push("promotion_window_secs must be positive".to_string());
        }
        if self.typing_ttl_ms == 0 {
            errors.push("typing_ttl_ms must be positive".to_string());
        }
        if self.resync_window == 0 {
            errors.push("resync_window must be at least 1".to_string());
        }

        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }

    /// The promotion window as a [`chrono::Duration`].
    #[must_use]
    pub fn promotion_window(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.promotion_window_secs)
    }

    /// The typing TTL as a [`chrono::Duration`].
    #[must_use]
    pub fn typing_ttl(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(i64::try_from(self.typing_ttl_ms).unwrap_or(i64::MAX))
    }
}

#[cfg(test)]
// set_var/remove_var are unsafe in edition 2024; serialized tests keep them
// race-free.
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn defaults_validate() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.promotion_window_secs, 30);
        assert_eq!(config.typing_ttl_ms, 1800);
    }

    #[test]
    #[serial]
    fn load_from_json_file() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{"promotion_window_secs": 15, "typing_ttl_ms": 900,
                "resync_window": 50, "reconnect_backoff_ms": 250,
                "near_bottom_threshold": 2, "log_level": "debug"}}"#
        )
        .unwrap();

        let config = SyncConfig::load(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.promotion_window_secs, 15);
        assert_eq!(config.resync_window, 50);
        assert_eq!(config.log_level, "debug");
    }

    #[test]
    #[serial]
    fn env_overrides_defaults() {
        unsafe {
            env::set_var("HUDDLE_TYPING_TTL_MS", "2500");
        }

        let config = SyncConfig::load(None).unwrap();
        assert_eq!(config.typing_ttl_ms, 2500);

        unsafe {
            env::remove_var("HUDDLE_TYPING_TTL_MS");
        }
    }

    #[test]
    #[serial]
    fn rejects_unknown_extension() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        assert!(SyncConfig::load(Some(file.path().to_path_buf())).is_err());
    }

    #[test]
    fn zero_resync_window_fails_validation() {
        let config = SyncConfig {
            resync_window: 0,
            ..SyncConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
