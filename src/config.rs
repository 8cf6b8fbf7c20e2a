//! Environment-driven runtime configuration.

use std::{env, path::PathBuf, time::Duration};

use tracing::warn;

/// Default location on disk where the server looks for the text corpus.
const DEFAULT_CORPUS_PATH: &str = "config/texts.json";
/// Environment variable that overrides [`DEFAULT_CORPUS_PATH`].
const CORPUS_PATH_ENV: &str = "TEXT_CORPUS_PATH";

/// Deployment environment the server runs in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl Environment {
    fn from_env() -> Self {
        match env::var("APP_ENV").or_else(|_| env::var("NODE_ENV")) {
            Ok(value) => match value.as_str() {
                "production" => Environment::Production,
                "test" => Environment::Test,
                "development" => Environment::Development,
                other => {
                    warn!(value = %other, "unrecognized APP_ENV; defaulting to development");
                    Environment::Development
                }
            },
            Err(_) => Environment::Development,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    pub port: u16,
    pub env: Environment,
    /// CORS origin for browser clients; `None` means permissive.
    pub client_url: Option<String>,
    /// Default and upper bound for per-game player capacity.
    pub max_players_per_game: usize,
    /// Minimum connected non-spectators before a countdown can start.
    pub min_players_to_start: usize,
    pub countdown_seconds: u32,
    pub max_race_time: Duration,
    pub cleanup_delay: Duration,
    pub admin_api_key: Option<String>,
    pub corpus_path: PathBuf,
}

impl AppConfig {
    /// Load the configuration from the process environment, applying
    /// documented defaults and range clamps for out-of-bounds values.
    pub fn from_env() -> Self {
        let port = env::var("PORT")
            .or_else(|_| env::var("SERVER_PORT"))
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(8080);

        let max_race_minutes = parse_clamped("MAX_RACE_TIME_MINUTES", 3, 1, 3);
        let cleanup_minutes = parse_clamped("CLEANUP_DELAY_MINUTES", 3, 3, 5);

        Self {
            port,
            env: Environment::from_env(),
            client_url: env::var("CLIENT_URL").ok().filter(|url| !url.is_empty()),
            max_players_per_game: parse_clamped("MAX_PLAYERS_PER_GAME", 4, 2, 10) as usize,
            min_players_to_start: parse_clamped("MIN_PLAYERS_TO_START", 2, 2, 10) as usize,
            countdown_seconds: parse_clamped("COUNTDOWN_SECONDS", 3, 1, 10) as u32,
            max_race_time: Duration::from_secs(max_race_minutes * 60),
            cleanup_delay: Duration::from_secs(cleanup_minutes * 60),
            admin_api_key: env::var("ADMIN_API_KEY").ok().filter(|key| !key.is_empty()),
            corpus_path: resolve_corpus_path(),
        }
    }

    /// Short configuration suitable for unit and integration tests: tight
    /// timers, no auth, development environment.
    pub fn for_tests() -> Self {
        Self {
            port: 0,
            env: Environment::Test,
            client_url: None,
            max_players_per_game: 4,
            min_players_to_start: 2,
            countdown_seconds: 3,
            max_race_time: Duration::from_secs(60),
            cleanup_delay: Duration::from_secs(30),
            admin_api_key: None,
            corpus_path: PathBuf::from(DEFAULT_CORPUS_PATH),
        }
    }
}

/// Parse a numeric environment variable, clamping into `[min, max]`.
fn parse_clamped(key: &str, default: u64, min: u64, max: u64) -> u64 {
    match env::var(key) {
        Ok(raw) => match raw.parse::<u64>() {
            Ok(value) => {
                let clamped = value.clamp(min, max);
                if clamped != value {
                    warn!(key, value, clamped, "configuration value out of range");
                }
                clamped
            }
            Err(_) => {
                warn!(key, value = %raw, "failed to parse configuration value; using default");
                default
            }
        },
        Err(_) => default,
    }
}

/// Resolve the corpus path taking the environment override into account.
fn resolve_corpus_path() -> PathBuf {
    env::var_os(CORPUS_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CORPUS_PATH))
}
