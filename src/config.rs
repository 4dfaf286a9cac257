//! Configuration management with validation and defaults
//!
//! Timings are kept in milliseconds so the `testing()` preset can run whole
//! rounds in well under a second.

use crate::errors::{BingoError, BingoResult};
use crate::games::patterns::Shape;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Full service configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BingoConfig {
    pub game: GameConfig,
    pub cycle: CycleConfig,
    pub storage: StorageConfig,
    pub api: ApiConfig,
    pub monitoring: MonitoringConfig,
}

/// Round engine tuning
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub draw_interval_ms: u64,
    /// Window after the first valid claim for simultaneous winners to register
    pub settlement_grace_ms: u64,
    /// Pause between a round ending and the idle broadcast
    pub idle_broadcast_delay_ms: u64,
    /// Distinct buyers that start a scheduler-opened round on their own
    pub auto_start_threshold: usize,
    pub auto_start_countdown_ms: u64,
    /// Longest countdown a human start request may ask for
    pub max_countdown_secs: u64,
    pub max_cards_per_player: usize,
    /// More simultaneous winners than this voids the round with refunds
    pub max_winners: usize,
    pub pool_share_percent: u64,
    pub base_catalog_size: u32,
    pub min_free_slots: u32,
    pub slots_per_player: u32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            draw_interval_ms: 6_000,
            settlement_grace_ms: 5_000,
            idle_broadcast_delay_ms: 10_000,
            auto_start_threshold: 3,
            auto_start_countdown_ms: 300_000,
            max_countdown_secs: 3_600,
            max_cards_per_player: 5,
            max_winners: 3,
            pool_share_percent: 80,
            base_catalog_size: 100,
            min_free_slots: 10,
            slots_per_player: 5,
        }
    }
}

impl GameConfig {
    pub fn draw_interval(&self) -> Duration {
        Duration::from_millis(self.draw_interval_ms)
    }

    pub fn settlement_grace(&self) -> Duration {
        Duration::from_millis(self.settlement_grace_ms)
    }

    pub fn idle_broadcast_delay(&self) -> Duration {
        Duration::from_millis(self.idle_broadcast_delay_ms)
    }

    pub fn auto_start_countdown(&self) -> Duration {
        Duration::from_millis(self.auto_start_countdown_ms)
    }
}

/// Automatic round scheduling
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub enabled: bool,
    /// Fallback check for an empty lobby when no round-end signal arrives
    pub poll_interval_ms: u64,
    /// Delay between a round ending and the next one being offered
    pub next_round_delay_ms: u64,
    pub base_stake: u64,
    pub base_shape: Shape,
    pub special_stake: u64,
    pub special_shape: Shape,
    /// Every n-th round of the day is special
    pub special_every: u32,
    pub special_expiry_ms: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_ms: 30_000,
            next_round_delay_ms: 10_000,
            base_stake: 10,
            base_shape: Shape::AnyLine,
            special_stake: 50,
            special_shape: Shape::FullHouse,
            special_every: 21,
            special_expiry_ms: 3_600_000,
        }
    }
}

impl CycleConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn next_round_delay(&self) -> Duration {
        Duration::from_millis(self.next_round_delay_ms)
    }

    pub fn special_expiry(&self) -> Duration {
        Duration::from_millis(self.special_expiry_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_directory: String,
    /// Keep records in memory only (nothing survives a restart)
    pub in_memory: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_directory: "./DB/bingo_data".to_string(),
            in_memory: false,
        }
    }
}

/// HTTP and WebSocket surface
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub allowed_origins: Vec<String>,
    pub heartbeat_interval_secs: u64,
    /// Capacity of the event broadcast channel
    pub event_buffer: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            allowed_origins: vec!["*".to_string()],
            heartbeat_interval_secs: 30,
            event_buffer: 1_024,
        }
    }
}

impl ApiConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    pub enable_metrics: bool,
    /// `tracing_subscriber::EnvFilter` directive used when RUST_LOG is unset
    pub log_filter: String,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            log_filter: "bingo_hall=info,tower_http=info".to_string(),
        }
    }
}

impl BingoConfig {
    /// Persistent storage and the reference cadence
    pub fn production() -> Self {
        Self {
            storage: StorageConfig {
                data_directory: "./DB/bingo_data".to_string(),
                in_memory: false,
            },
            api: ApiConfig {
                allowed_origins: Vec::new(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Millisecond timings and in-memory storage for tests
    pub fn testing() -> Self {
        Self {
            game: GameConfig {
                draw_interval_ms: 10,
                settlement_grace_ms: 30,
                idle_broadcast_delay_ms: 10,
                auto_start_countdown_ms: 20,
                ..Default::default()
            },
            cycle: CycleConfig {
                enabled: false,
                poll_interval_ms: 50,
                next_round_delay_ms: 10,
                special_expiry_ms: 100,
                ..Default::default()
            },
            storage: StorageConfig {
                in_memory: true,
                ..Default::default()
            },
            monitoring: MonitoringConfig {
                log_filter: "bingo_hall=debug".to_string(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> BingoResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BingoError::Configuration(format!("cannot read {}: {}", path.display(), e)))?;
        let config: BingoConfig = toml::from_str(&raw)
            .map_err(|e| BingoError::Configuration(format!("cannot parse {}: {}", path.display(), e)))?;
        config
            .validate()
            .map_err(|e| BingoError::Configuration(e.to_string()))?;
        Ok(config)
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let game = &self.game;
        if game.draw_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "draw_interval_ms must be > 0".to_string(),
            ));
        }
        if game.max_cards_per_player == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "max_cards_per_player must be > 0".to_string(),
            ));
        }
        if game.max_winners == 0 {
            return Err(ConfigValidationError::InvalidValue("max_winners must be > 0".to_string()));
        }
        if game.auto_start_threshold == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "auto_start_threshold must be > 0".to_string(),
            ));
        }
        if game.pool_share_percent > 100 {
            return Err(ConfigValidationError::InvalidValue(
                "pool_share_percent must be within 0..=100".to_string(),
            ));
        }
        if game.base_catalog_size == 0 || game.base_catalog_size > crate::cards::generator::MAX_CATALOG_ID {
            return Err(ConfigValidationError::InvalidValue(
                "base_catalog_size must be within 1..=999".to_string(),
            ));
        }
        if game.min_free_slots >= game.base_catalog_size {
            return Err(ConfigValidationError::LogicalInconsistency(
                "min_free_slots must be smaller than the base catalog".to_string(),
            ));
        }

        let cycle = &self.cycle;
        if cycle.base_stake == 0 || cycle.special_stake == 0 {
            return Err(ConfigValidationError::InvalidValue("cycle stakes must be > 0".to_string()));
        }
        if cycle.special_every == 0 {
            return Err(ConfigValidationError::InvalidValue("special_every must be > 0".to_string()));
        }
        if cycle.enabled && cycle.poll_interval_ms == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "poll_interval_ms must be > 0 when the cycle is enabled".to_string(),
            ));
        }

        if !self.storage.in_memory && self.storage.data_directory.is_empty() {
            return Err(ConfigValidationError::MissingRequired(
                "storage.data_directory".to_string(),
            ));
        }
        if self.api.heartbeat_interval_secs == 0 || self.api.event_buffer == 0 {
            return Err(ConfigValidationError::InvalidValue(
                "heartbeat_interval_secs and event_buffer must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ConfigValidationError {
    InvalidValue(String),
    LogicalInconsistency(String),
    MissingRequired(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigValidationError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
            ConfigValidationError::LogicalInconsistency(msg) => {
                write!(f, "Configuration logical inconsistency: {}", msg)
            }
            ConfigValidationError::MissingRequired(msg) => write!(f, "Missing required configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigValidationError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_presets_are_valid() {
        assert!(BingoConfig::default().validate().is_ok());
        assert!(BingoConfig::production().validate().is_ok());
        assert!(BingoConfig::testing().validate().is_ok());
    }

    #[test]
    fn test_reference_cadence() {
        let config = BingoConfig::default();
        assert_eq!(config.game.draw_interval(), Duration::from_secs(6));
        assert_eq!(config.game.settlement_grace(), Duration::from_secs(5));
        assert_eq!(config.game.auto_start_countdown(), Duration::from_secs(300));
        assert_eq!(config.cycle.special_expiry(), Duration::from_secs(3_600));
        assert_eq!(config.cycle.special_every, 21);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = BingoConfig::default();
        config.game.pool_share_percent = 120;
        assert!(config.validate().is_err());

        let mut config = BingoConfig::default();
        config.game.min_free_slots = 100;
        assert!(matches!(
            config.validate(),
            Err(ConfigValidationError::LogicalInconsistency(_))
        ));

        let mut config = BingoConfig::default();
        config.cycle.special_every = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_partial_toml_falls_back_to_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[game]\ndraw_interval_ms = 3000\n\n[cycle]\nspecial_shape = \"letter_h\"\n\n[api]\nport = 9000"
        )
        .unwrap();

        let config = BingoConfig::from_toml_file(file.path()).unwrap();
        assert_eq!(config.game.draw_interval_ms, 3_000);
        assert_eq!(config.game.max_winners, 3);
        assert_eq!(config.cycle.special_shape, Shape::LetterH);
        assert_eq!(config.api.port, 9_000);
    }

    #[test]
    fn test_unreadable_file_is_configuration_error() {
        let err = BingoConfig::from_toml_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, BingoError::Configuration(_)));
    }
}
