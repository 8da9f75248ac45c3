//! Engine configuration
//!
//! Everything is `#[serde(default)]` so a partial TOML file only overrides the
//! values it names.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::constants::*;
use crate::error::Error;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub clock: ClockConfig,
    pub fec: FecConfig,
    pub session: SessionConfig,
    pub scheduler: SchedulerConfig,
    pub endpoint: EndpointConfig,
}

impl AppConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self, Error> {
        let text = std::fs::read_to_string(path)?;
        let config: AppConfig = toml::from_str(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration as TOML, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), Error> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Platform config location, e.g. `~/.config/lan-speaker-sync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("net", "lan-speaker-sync", "lan-speaker-sync")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load from the given path, else the default path, else built-in defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, Error> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Reject settings the engine cannot honour
    pub fn validate(&self) -> Result<(), Error> {
        let fec = &self.fec;
        if fec.min_redundancy > fec.max_redundancy {
            return Err(Error::Config(format!(
                "fec.min_redundancy ({}) exceeds fec.max_redundancy ({})",
                fec.min_redundancy, fec.max_redundancy
            )));
        }
        if !(fec.min_redundancy..=fec.max_redundancy).contains(&fec.initial_redundancy) {
            return Err(Error::Config("fec.initial_redundancy outside [min, max]".into()));
        }
        if fec.data_units_per_group == 0 {
            return Err(Error::Config("fec.data_units_per_group must be at least 1".into()));
        }
        if fec.data_units_per_group as usize + fec.max_redundancy as usize > MAX_GROUP_UNITS {
            return Err(Error::Config(format!(
                "fec.data_units_per_group + fec.max_redundancy must not exceed {}",
                MAX_GROUP_UNITS
            )));
        }
        if fec.max_unit_payload == 0 || fec.max_unit_payload > MAX_UNIT_PAYLOAD {
            return Err(Error::Config(format!(
                "fec.max_unit_payload must be within 1..={}",
                MAX_UNIT_PAYLOAD
            )));
        }
        if self.clock.probe_interval_ms == 0 || self.scheduler.tick_interval_ms == 0 {
            return Err(Error::Config("intervals must be non-zero".into()));
        }
        if self.clock.coarse_min_samples == 0 || self.clock.window == 0 {
            return Err(Error::Config("clock.coarse_min_samples and clock.window must be non-zero".into()));
        }
        if self.scheduler.min_lookahead_ms > self.scheduler.max_lookahead_ms {
            return Err(Error::Config("scheduler.min_lookahead_ms exceeds max_lookahead_ms".into()));
        }
        if self.session.recover_loss >= self.session.degraded_loss {
            return Err(Error::Config("session.recover_loss must be below session.degraded_loss".into()));
        }
        Ok(())
    }
}

/// UDP transport settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the controller binds to
    pub bind_address: String,
    /// Controller UDP port
    pub controller_port: u16,
    /// Default speaker UDP port
    pub speaker_port: u16,
    /// Kernel send buffer size
    pub send_buffer_size: usize,
    /// Kernel receive buffer size
    pub recv_buffer_size: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            controller_port: DEFAULT_CONTROLLER_PORT,
            speaker_port: DEFAULT_SPEAKER_PORT,
            send_buffer_size: 1024 * 1024,
            recv_buffer_size: 1024 * 1024,
        }
    }
}

/// Clock model tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockConfig {
    /// Interval between sync probes
    pub probe_interval_ms: u64,
    /// Rolling window of samples used for the delay median
    pub window: usize,
    /// Delay above `median * outlier_multiple` marks a sample as an outlier
    pub outlier_multiple: f64,
    /// Medians below this floor are raised to it before the outlier test
    pub outlier_floor_us: u64,
    /// Gain applied to outliers (0 discards them, 1 treats them normally)
    pub outlier_weight: f64,
    /// Offset tracking gain
    pub offset_gain: f64,
    /// Drift tracking gain
    pub drift_gain: f64,
    /// Drift is clamped to +/- this many parts per million
    pub max_drift_ppm: f64,
    /// Samples required for `Coarse`
    pub coarse_min_samples: u32,
    /// Samples required before `Fine` is possible
    pub fine_min_samples: u32,
    /// Offset variance (us^2) below which the estimate is `Fine`
    pub fine_variance_us2: f64,
    /// No valid sample for this long reverts quality to `Unsynced`
    pub sync_timeout_ms: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: 100,
            window: 16,
            outlier_multiple: 3.0,
            outlier_floor_us: 500,
            outlier_weight: 0.1,
            offset_gain: 0.25,
            drift_gain: 0.005,
            max_drift_ppm: 500.0,
            coarse_min_samples: 3,
            fine_min_samples: 8,
            fine_variance_us2: 250_000.0,
            sync_timeout_ms: 3_000,
        }
    }
}

impl ClockConfig {
    pub fn probe_interval_us(&self) -> u64 {
        self.probe_interval_ms * 1_000
    }

    pub fn sync_timeout_us(&self) -> u64 {
        self.sync_timeout_ms * 1_000
    }
}

/// Forward error correction settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FecConfig {
    /// Minimum data units per group; frames larger than
    /// `data_units_per_group * max_unit_payload` use more
    pub data_units_per_group: u8,
    /// Largest payload carried by a single unit
    pub max_unit_payload: usize,
    pub min_redundancy: u8,
    pub max_redundancy: u8,
    pub initial_redundancy: u8,
    /// Loss rate above which redundancy is raised
    pub raise_threshold: f32,
    /// Loss rate treated as "near zero"
    pub lower_threshold: f32,
    /// Consecutive near-zero recomputations before redundancy drops a step
    pub quiet_rounds: u32,
    /// Multiplier on the expected number of lost units when raising
    pub headroom: f32,
    /// Interval between redundancy recomputations
    pub recompute_interval_ms: u64,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            data_units_per_group: 4,
            max_unit_payload: 1200,
            min_redundancy: 1,
            max_redundancy: 8,
            initial_redundancy: 2,
            raise_threshold: 0.02,
            lower_threshold: 0.002,
            quiet_rounds: 10,
            headroom: 2.0,
            recompute_interval_ms: 250,
        }
    }
}

impl FecConfig {
    pub fn recompute_interval_us(&self) -> u64 {
        self.recompute_interval_ms * 1_000
    }
}

/// Speaker session thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Loss rate above which a streaming session is degraded
    pub degraded_loss: f32,
    /// Loss rate below which a degraded session recovers
    pub recover_loss: f32,
    /// Groups considered by the rolling loss rate
    pub loss_window_groups: usize,
    /// Groups required in the window before loss drives transitions
    pub min_loss_samples: usize,
    /// Silence for this long marks the endpoint unreachable; a degraded
    /// session needs acknowledgements, sync replies do not count
    pub unreachable_timeout_ms: u64,
    /// Time after a group's presentation instant before it is written off
    pub ack_grace_ms: u64,
    /// Depth of each session's command queue
    pub command_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            degraded_loss: 0.35,
            recover_loss: 0.15,
            loss_window_groups: 64,
            min_loss_samples: 8,
            unreachable_timeout_ms: 2_000,
            ack_grace_ms: 500,
            command_queue: 256,
        }
    }
}

impl SessionConfig {
    pub fn unreachable_timeout_us(&self) -> u64 {
        self.unreachable_timeout_ms * 1_000
    }

    pub fn ack_grace_us(&self) -> u64 {
        self.ack_grace_ms * 1_000
    }
}

/// Fleet scheduler settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Endpoint jitter-buffer depth; tunable, set to match the firmware
    pub jitter_buffer_ms: u64,
    /// Extra margin on top of network delay and jitter buffer
    pub safety_margin_ms: u64,
    /// Multiplier on RTT variance in the network delay estimate
    pub rtt_variance_factor: f64,
    pub min_lookahead_ms: u64,
    pub max_lookahead_ms: u64,
    /// Cadence of `tick()`; should not exceed the frame period
    pub tick_interval_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            jitter_buffer_ms: DEFAULT_JITTER_BUFFER_MS,
            safety_margin_ms: 10,
            rtt_variance_factor: 4.0,
            min_lookahead_ms: 30,
            max_lookahead_ms: 1_000,
            tick_interval_ms: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn tick_interval_us(&self) -> u64 {
        self.tick_interval_ms * 1_000
    }
}

/// Speaker endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Channels rendered by this speaker
    pub channels: u16,
    pub sample_rate: u32,
    /// Maximum frames held in the playout queue
    pub playout_capacity: usize,
    /// Frames popped later than this after their deadline are dropped
    pub playout_tolerance_ms: u64,
    /// Delivered-frame channel depth
    pub delivery_queue: usize,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            channels: DEFAULT_CHANNELS,
            sample_rate: DEFAULT_SAMPLE_RATE,
            playout_capacity: 256,
            playout_tolerance_ms: 5,
            delivery_queue: 256,
        }
    }
}

impl EndpointConfig {
    pub fn playout_tolerance_us(&self) -> u64 {
        self.playout_tolerance_ms * 1_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(AppConfig::default().validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [fec]
            max_redundancy = 12

            [scheduler]
            jitter_buffer_ms = 40
            "#,
        )
        .unwrap();

        assert_eq!(config.fec.max_redundancy, 12);
        assert_eq!(config.fec.min_redundancy, FecConfig::default().min_redundancy);
        assert_eq!(config.scheduler.jitter_buffer_ms, 40);
        assert_eq!(config.clock, ClockConfig::default());
    }

    #[test]
    fn test_validate_rejects_inverted_redundancy() {
        let mut config = AppConfig::default();
        config.fec.min_redundancy = 5;
        config.fec.max_redundancy = 2;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_oversized_group() {
        let mut config = AppConfig::default();
        config.fec.data_units_per_group = 200;
        config.fec.max_redundancy = 100;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("lss-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("config.toml");

        let mut config = AppConfig::default();
        config.session.ack_grace_ms = 750;
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded, config);

        let _ = std::fs::remove_dir_all(dir);
    }
}
