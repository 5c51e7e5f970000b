use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Scheduler timing and concurrency
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Process-wide ceiling of in-flight ticks per signal kind
    pub max_inflight_per_kind: usize,
    pub stall_multiplier: u64,
    pub stall_min_ms: u64,
    pub watchdog_ms: u64,
    pub min_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_inflight_per_kind: 3,
            stall_multiplier: 3,
            stall_min_ms: 2000,
            watchdog_ms: 1000,
            min_interval_ms: 50,
            max_interval_ms: 5000,
        }
    }
}

impl SchedulerConfig {
    /// 0 stays disabled, anything else is clamped into the allowed range
    pub fn sanitize_interval(&self, interval_ms: u64) -> u64 {
        if interval_ms == 0 {
            0
        } else {
            interval_ms.clamp(self.min_interval_ms, self.max_interval_ms)
        }
    }

    pub fn stall_threshold_ms(&self, interval_ms: u64) -> u64 {
        (interval_ms * self.stall_multiplier).max(self.stall_min_ms)
    }
}

/// Plausibility guard thresholds for percentage signals
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GuardConfig {
    pub max_drop_per_tick: f64,
    pub level_drop_grace_ms: u64,
    pub levelup_threshold: f64,
    pub reset_threshold: f64,
    pub levelup_drop_min: f64,
    pub levelup_lock_ms: u64,
    pub max_rise_per_tick: f64,
    pub hard_drop_limit: f64,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_drop_per_tick: 0.3,
            level_drop_grace_ms: 6000,
            levelup_threshold: 99.9999,
            reset_threshold: 10.0,
            levelup_drop_min: 10.0,
            levelup_lock_ms: 2500,
            max_rise_per_tick: 20.0,
            hard_drop_limit: 60.0,
        }
    }
}

/// Which digit wins when two reads differ by a single 5/9 swap
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FiveNineBias {
    PreferFive,
    PreferNine,
    Neutral,
}

impl Default for FiveNineBias {
    fn default() -> Self {
        Self::PreferFive
    }
}

/// Recognition engine behaviour
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RecognitionConfig {
    pub five_nine_bias: FiveNineBias,
    /// Read plain, bold and opened gold masks and reconcile them
    pub consensus_reads: bool,
    pub candidate_timeout_ms: u64,
    pub slow_read_warn_ms: u64,
}

impl Default for RecognitionConfig {
    fn default() -> Self {
        Self {
            five_nine_bias: FiveNineBias::PreferFive,
            consensus_reads: false,
            candidate_timeout_ms: 1000,
            slow_read_warn_ms: 500,
        }
    }
}

/// External Tesseract process
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub tesseract_path: String,
    pub tessdata_dir: Option<PathBuf>,
    pub language: String,
    pub psm: u8,
    pub oem: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tesseract_path: "tesseract".to_string(),
            tessdata_dir: None,
            language: "eng".to_string(),
            psm: 7,
            oem: 3,
        }
    }
}

/// Tick handling, backoff and stale clearing
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrackerConfig {
    pub backoff_ms: u64,
    pub failures_before_backoff: u32,
    pub stale_clear_ms: u64,
    pub percent_min_width: u32,
    pub percent_min_height: u32,
    pub event_capacity: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            backoff_ms: 5000,
            failures_before_backoff: 2,
            stale_clear_ms: 900,
            percent_min_width: 80,
            percent_min_height: 22,
            event_capacity: 256,
        }
    }
}

/// Capture prechecks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PreprocessingConfig {
    /// Captures whose luma range is at most this are treated as blank
    pub uniform_luma_range: f64,
    pub hp_bar_min_ratio: f64,
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self {
            uniform_luma_range: 8.0,
            hp_bar_min_ratio: 0.12,
        }
    }
}

/// Intermediate image dumps
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct DebugConfig {
    pub enabled: bool,
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl Default for LogFormat {
    fn default() -> Self {
        Self::Pretty
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

/// Complete application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct AppConfig {
    pub scheduler: SchedulerConfig,
    pub guard: GuardConfig,
    pub recognition: RecognitionConfig,
    pub engine: EngineConfig,
    pub tracker: TrackerConfig,
    pub preprocessing: PreprocessingConfig,
    pub debug: DebugConfig,
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_app_config_default() {
        let config = AppConfig::default();

        assert_eq!(config.scheduler.max_inflight_per_kind, 3);
        assert_eq!(config.scheduler.watchdog_ms, 1000);

        assert_eq!(config.guard.max_drop_per_tick, 0.3);
        assert_eq!(config.guard.levelup_lock_ms, 2500);
        assert_eq!(config.guard.levelup_threshold, 99.9999);

        assert_eq!(config.recognition.five_nine_bias, FiveNineBias::PreferFive);
        assert!(!config.recognition.consensus_reads);

        assert_eq!(config.engine.psm, 7);
        assert_eq!(config.engine.oem, 3);

        assert_eq!(config.tracker.backoff_ms, 5000);
        assert_eq!(config.tracker.stale_clear_ms, 900);

        assert!(!config.debug.enabled);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_sanitize_interval() {
        let config = SchedulerConfig::default();
        assert_eq!(config.sanitize_interval(0), 0, "0 stays disabled");
        assert_eq!(config.sanitize_interval(10), 50);
        assert_eq!(config.sanitize_interval(200), 200);
        assert_eq!(config.sanitize_interval(60_000), 5000);
    }

    #[test]
    fn test_stall_threshold() {
        let config = SchedulerConfig::default();
        assert_eq!(config.stall_threshold_ms(200), 2000);
        assert_eq!(config.stall_threshold_ms(1000), 3000);
    }

    #[test]
    fn test_app_config_serialization() {
        let config = AppConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let deserialized: AppConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(config, deserialized);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let json = r#"{ "guard": { "max_rise_per_tick": 25.0 }, "logging": { "format": "json" } }"#;
        let config: AppConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.guard.max_rise_per_tick, 25.0);
        assert_eq!(config.guard.max_drop_per_tick, 0.3);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.scheduler, SchedulerConfig::default());
    }

    #[test]
    fn test_bias_serialization() {
        assert_eq!(
            serde_json::to_string(&FiveNineBias::PreferFive).unwrap(),
            "\"prefer_five\""
        );
        assert_eq!(
            serde_json::to_string(&FiveNineBias::Neutral).unwrap(),
            "\"neutral\""
        );
    }
}
