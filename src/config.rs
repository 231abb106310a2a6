//! Static configuration.
//!
//! Loaded once at startup from a JSON file; every section has workable
//! defaults so a minimal file only names what it changes. Validation
//! failures are fatal — a misconfigured bot must not reach the service.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use serde::Deserialize;

use crate::game::adjudication::AdjudicationConfig;
use crate::time::allocator::AllocatorConfig;

/// Environment variable consulted when the config file carries no token.
pub const TOKEN_ENV: &str = "TEMPO_BOT_TOKEN";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Hosting-service connection.
    pub hosting: HostingConfig,
    /// Engine binary and pool sizing.
    pub engine: EngineConfig,
    /// Outbound matchmaking.
    pub matchmaking: MatchmakingConfig,
    /// Think-time allocator tunables.
    pub allocator: AllocatorConfig,
    /// Resignation and draw-offer thresholds.
    pub adjudication: AdjudicationConfig,
}

/// Hosting-service connection settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HostingConfig {
    /// WebSocket endpoint of the hosting service.
    pub url: String,
    /// Bearer token. Falls back to [`TOKEN_ENV`] when absent.
    pub token: Option<String>,
}

impl Default for HostingConfig {
    fn default() -> Self {
        Self {
            url: "wss://arena.example.org/bot/v1".to_string(),
            token: None,
        }
    }
}

/// Engine binary and pool sizing.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the UCI engine binary.
    pub binary: PathBuf,
    /// Options applied to each unit at startup.
    pub options: BTreeMap<String, String>,
    /// Maximum concurrently running games. Also the admission cap.
    pub max_games: usize,
    /// Syzygy tablebase directory, if available.
    pub tablebase_dir: Option<PathBuf>,
    /// Probe tablebases only at or below this many pieces.
    pub tablebase_max_pieces: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let mut options = BTreeMap::new();
        options.insert("Hash".to_string(), "128".to_string());
        options.insert("Threads".to_string(), "1".to_string());
        Self {
            binary: PathBuf::from("engines/stockfish"),
            options,
            max_games: 2,
            tablebase_dir: None,
            tablebase_max_pieces: 6,
        }
    }
}

impl EngineConfig {
    /// Units to spawn: one per allowed game plus a spare to absorb brief
    /// overlap around game turnover.
    pub fn pool_size(&self) -> usize {
        self.max_games + 1
    }
}

/// Outbound matchmaking settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MatchmakingConfig {
    /// Whether to issue challenges at all.
    pub enabled: bool,
    /// Challenge for rated games.
    pub rated: bool,
    /// Lowest acceptable opponent rating.
    pub min_rating: u32,
    /// Highest acceptable opponent rating.
    pub max_rating: u32,
    /// Minimum rated games behind an opponent's rating.
    pub min_rated_games: u32,
    /// Time controls to pick from, uniformly at random.
    pub time_controls: Vec<TimeControlSpec>,
    /// Directory entries fetched per refresh.
    pub directory_page_size: u32,
    /// Seconds between directory refreshes.
    pub directory_refresh_secs: u64,
    /// Idle pause when at capacity or out of candidates.
    pub idle_delay_secs: u64,
    /// Mandatory pause after issuing a challenge.
    pub settle_secs: u64,
    /// Backoff base; the wait is this times the consecutive-hit count.
    pub backoff_base_secs: u64,
    /// Cooldown placed on a candidate when challenging it.
    pub challenge_cooldown_secs: u64,
    /// Cooldown for candidates failing the eligibility rules.
    pub unsuitable_cooldown_secs: u64,
    /// Cooldown after an ordinary challenge failure.
    pub failure_cooldown_secs: u64,
    /// How long an unanswered challenge counts toward the cap.
    pub pending_ttl_secs: u64,
}

impl Default for MatchmakingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rated: true,
            min_rating: 1800,
            max_rating: 2600,
            min_rated_games: 50,
            time_controls: vec![
                TimeControlSpec { limit_secs: 180, increment_secs: 2 },
                TimeControlSpec { limit_secs: 300, increment_secs: 3 },
                TimeControlSpec { limit_secs: 600, increment_secs: 5 },
            ],
            directory_page_size: 50,
            directory_refresh_secs: 300,
            idle_delay_secs: 10,
            settle_secs: 30,
            backoff_base_secs: 60,
            challenge_cooldown_secs: 1200,
            unsuitable_cooldown_secs: 14_400,
            failure_cooldown_secs: 300,
            pending_ttl_secs: 90,
        }
    }
}

impl MatchmakingConfig {
    /// Seconds between directory refreshes.
    pub fn directory_refresh(&self) -> Duration {
        Duration::from_secs(self.directory_refresh_secs)
    }

    /// Idle pause when nothing can be done.
    pub fn idle_delay(&self) -> Duration {
        Duration::from_secs(self.idle_delay_secs)
    }

    /// Mandatory pause after issuing a challenge.
    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    /// Backoff base for rate-limit waits.
    pub fn backoff_base(&self) -> Duration {
        Duration::from_secs(self.backoff_base_secs)
    }

    /// Cooldown placed on a candidate when challenging it.
    pub fn challenge_cooldown(&self) -> Duration {
        Duration::from_secs(self.challenge_cooldown_secs)
    }

    /// Cooldown for ineligible candidates.
    pub fn unsuitable_cooldown(&self) -> Duration {
        Duration::from_secs(self.unsuitable_cooldown_secs)
    }

    /// Cooldown after an ordinary failure.
    pub fn failure_cooldown(&self) -> Duration {
        Duration::from_secs(self.failure_cooldown_secs)
    }

    /// Pending-challenge decay.
    pub fn pending_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_ttl_secs)
    }
}

/// One time control offered when challenging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TimeControlSpec {
    /// Initial clock in seconds.
    pub limit_secs: u64,
    /// Increment in seconds.
    pub increment_secs: u64,
}

impl Default for TimeControlSpec {
    fn default() -> Self {
        Self { limit_secs: 300, increment_secs: 3 }
    }
}

impl BotConfig {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let mut config: BotConfig =
            serde_json::from_str(&text).context("parsing config file")?;
        if config.hosting.token.is_none() {
            config.hosting.token = std::env::var(TOKEN_ENV).ok().filter(|t| !t.is_empty());
        }
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations that cannot serve games correctly.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.hosting.url.is_empty() {
            bail!("hosting.url must be set");
        }
        if self.hosting.token.is_none() {
            bail!("no API token: set hosting.token or the {TOKEN_ENV} environment variable");
        }
        if self.engine.binary.as_os_str().is_empty() {
            bail!("engine.binary must be set");
        }
        if self.engine.max_games == 0 {
            bail!("engine.max_games must be at least 1");
        }
        if self.matchmaking.time_controls.is_empty() {
            bail!("matchmaking.time_controls must not be empty");
        }
        if self.matchmaking.min_rating > self.matchmaking.max_rating {
            bail!("matchmaking rating band is inverted");
        }
        if !(0.0..1.0).contains(&self.allocator.max_fraction) || self.allocator.max_fraction == 0.0
        {
            bail!("allocator.max_fraction must be in (0, 1)");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_token() -> BotConfig {
        let mut config = BotConfig::default();
        config.hosting.token = Some("secret".to_string());
        config
    }

    #[test]
    fn defaults_validate_once_a_token_exists() {
        with_token().validate().unwrap();
    }

    #[test]
    fn missing_token_is_fatal() {
        let err = BotConfig::default().validate().unwrap_err();
        assert!(err.to_string().contains("token"));
    }

    #[test]
    fn zero_games_is_fatal() {
        let mut config = with_token();
        config.engine.max_games = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn inverted_rating_band_is_fatal() {
        let mut config = with_token();
        config.matchmaking.min_rating = 2600;
        config.matchmaking.max_rating = 1800;
        assert!(config.validate().is_err());
    }

    #[test]
    fn empty_time_controls_are_fatal() {
        let mut config = with_token();
        config.matchmaking.time_controls.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn out_of_range_fraction_is_fatal() {
        let mut config = with_token();
        config.allocator.max_fraction = 1.5;
        assert!(config.validate().is_err());
        config.allocator.max_fraction = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn minimal_json_overrides_defaults() {
        let json = r#"{
            "hosting": {"url": "wss://arena.test/bot", "token": "t"},
            "engine": {"max_games": 4},
            "matchmaking": {"min_rating": 2000}
        }"#;
        let config: BotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.hosting.url, "wss://arena.test/bot");
        assert_eq!(config.engine.max_games, 4);
        assert_eq!(config.engine.pool_size(), 5);
        assert_eq!(config.matchmaking.min_rating, 2000);
        // Untouched sections keep their defaults.
        assert_eq!(config.matchmaking.max_rating, 2600);
        assert_eq!(config.engine.tablebase_max_pieces, 6);
    }

    #[test]
    fn pool_size_has_one_spare() {
        let config = BotConfig::default();
        assert_eq!(config.engine.pool_size(), config.engine.max_games + 1);
    }
}
