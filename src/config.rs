//! Application-level configuration loading: sign-in links, auth cookie, retry policy and
//! leaderboard limits.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "NEON_EXPEDITION_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// Magic-link and auth cookie settings.
    pub auth: AuthConfig,
    /// Policy applied when the next-level session collides with a concurrently created one.
    pub next_session_retry: RetryPolicy,
    /// Leaderboard page sizes.
    pub leaderboard: LeaderboardConfig,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<AppConfig>(&contents) {
                Ok(config) => {
                    info!(path = %path.display(), "loaded configuration");
                    config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Front-end page receiving the `token` query parameter of a sign-in link.
    pub magic_link_base_url: String,
    /// Lifetime of a sign-in link.
    pub magic_token_ttl_secs: u64,
    /// Name of the cookie carrying the session token.
    pub cookie_name: String,
    /// Lifetime of an issued session token.
    pub session_ttl_secs: u64,
    /// Whether the session cookie is flagged `Secure`.
    pub secure_cookie: bool,
}

impl AuthConfig {
    pub fn magic_token_ttl(&self) -> Duration {
        Duration::from_secs(self.magic_token_ttl_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            magic_link_base_url: "http://localhost:5173/auth/verify".into(),
            magic_token_ttl_secs: 15 * 60,
            cookie_name: "ne_session".into(),
            session_ttl_secs: 30 * 24 * 60 * 60,
            secure_cookie: false,
        }
    }
}

/// Bounded retry with a fixed delay between attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub attempts: u32,
    /// Pause between two attempts, in milliseconds.
    pub delay_ms: u64,
}

impl RetryPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            delay_ms: 50,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct LeaderboardConfig {
    /// Number of rows returned when the client does not ask for a limit.
    pub default_limit: usize,
    /// Upper bound applied to client-provided limits.
    pub max_limit: usize,
}

impl LeaderboardConfig {
    /// Resolve the effective page size for a request.
    pub fn clamp(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.default_limit)
            .clamp(1, self.max_limit.max(1))
    }
}

impl Default for LeaderboardConfig {
    fn default() -> Self {
        Self {
            default_limit: 50,
            max_limit: 200,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_files_keep_defaults_for_missing_sections() {
        let config: AppConfig =
            serde_json::from_str(r#"{"next_session_retry": {"attempts": 5}}"#).unwrap();
        assert_eq!(config.next_session_retry.attempts, 5);
        assert_eq!(config.next_session_retry.delay_ms, 50);
        assert_eq!(config.auth.cookie_name, "ne_session");
        assert_eq!(config.leaderboard.default_limit, 50);
    }

    #[test]
    fn leaderboard_limit_is_clamped() {
        let limits = LeaderboardConfig::default();
        assert_eq!(limits.clamp(None), 50);
        assert_eq!(limits.clamp(Some(0)), 1);
        assert_eq!(limits.clamp(Some(10_000)), 200);
    }
}
