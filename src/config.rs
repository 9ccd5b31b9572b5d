//! Application-level configuration loading, including the fallback question deck.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use serde_with::{DurationMilliSeconds, serde_as};
use tracing::{info, warn};

use crate::state::session::Round;

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "VOTE_SESSION_CONFIG_PATH";
const DEFAULT_IDENTITY_PATH: &str = "data/participant-id";
const DEFAULT_REVEAL_DEBOUNCE: Duration = Duration::from_millis(500);
const DEFAULT_QUESTION_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    /// HTTP question generator; the deck is used when unset.
    pub question_endpoint: Option<String>,
    /// Request timeout of the question generator.
    pub question_timeout: Duration,
    /// Delay between "everybody voted" and the reveal write.
    pub reveal_debounce: Duration,
    /// Upper bound for creating or joining a session.
    pub join_timeout: Duration,
    /// File holding this device's participant id.
    pub identity_path: PathBuf,
    /// Questions drawn when no endpoint is configured.
    pub questions: Vec<Round>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        questions = app_config.questions.len(),
                        endpoint = app_config.question_endpoint.as_deref().unwrap_or("none"),
                        "loaded configuration"
                    );
                    app_config
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

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            question_endpoint: None,
            question_timeout: DEFAULT_QUESTION_TIMEOUT,
            reveal_debounce: DEFAULT_REVEAL_DEBOUNCE,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            identity_path: PathBuf::from(DEFAULT_IDENTITY_PATH),
            questions: default_questions(),
        }
    }
}

#[serde_as]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    #[serde(default)]
    question_endpoint: Option<String>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    question_timeout_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    reveal_debounce_ms: Option<Duration>,
    #[serde_as(as = "Option<DurationMilliSeconds<u64>>")]
    join_timeout_ms: Option<Duration>,
    #[serde(default)]
    identity_path: Option<PathBuf>,
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = AppConfig::default();
        let questions = value
            .questions
            .into_iter()
            .map(Into::into)
            .collect::<Vec<Round>>();

        Self {
            question_endpoint: value
                .question_endpoint
                .filter(|endpoint| !endpoint.trim().is_empty()),
            question_timeout: value
                .question_timeout_ms
                .unwrap_or(defaults.question_timeout),
            reveal_debounce: value
                .reveal_debounce_ms
                .unwrap_or(defaults.reveal_debounce),
            join_timeout: value.join_timeout_ms.unwrap_or(defaults.join_timeout),
            identity_path: value.identity_path.unwrap_or(defaults.identity_path),
            questions: if questions.is_empty() {
                defaults.questions
            } else {
                questions
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
/// JSON representation of a single deck entry.
struct RawQuestion {
    option_a: String,
    option_b: String,
}

impl From<RawQuestion> for Round {
    fn from(value: RawQuestion) -> Self {
        Round::new(value.option_a, value.option_b)
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Built-in deck shipped with the binary.
fn default_questions() -> Vec<Round> {
    [
        ("be able to fly", "be invisible"),
        ("live without music", "live without movies"),
        ("always be ten minutes late", "always be twenty minutes early"),
        ("have pizza for every meal", "have sushi for every meal"),
        ("explore the deep sea", "explore outer space"),
        ("speak every language", "play every instrument"),
        ("never use social media again", "never watch television again"),
        ("have a rewind button", "have a pause button for your life"),
    ]
    .into_iter()
    .map(|(option_a, option_b)| Round::new(option_a, option_b))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let raw: RawConfig = serde_json::from_str(r#"{"revealDebounceMs": 1200}"#).unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(config.reveal_debounce, Duration::from_millis(1200));
        assert_eq!(config.question_timeout, DEFAULT_QUESTION_TIMEOUT);
        assert!(config.question_endpoint.is_none());
        assert_eq!(config.questions, default_questions());
    }

    #[test]
    fn full_file_overrides_everything() {
        let raw: RawConfig = serde_json::from_str(
            r#"{
                "questionEndpoint": "http://localhost:3000/api/getwyrquestion",
                "questionTimeoutMs": 2500,
                "joinTimeoutMs": 4000,
                "identityPath": "/tmp/id",
                "questions": [{"optionA": "Tea", "optionB": "Coffee"}]
            }"#,
        )
        .unwrap();
        let config = AppConfig::from(raw);
        assert_eq!(
            config.question_endpoint.as_deref(),
            Some("http://localhost:3000/api/getwyrquestion")
        );
        assert_eq!(config.question_timeout, Duration::from_millis(2500));
        assert_eq!(config.join_timeout, Duration::from_millis(4000));
        assert_eq!(config.identity_path, PathBuf::from("/tmp/id"));
        assert_eq!(config.questions, vec![Round::new("Tea", "Coffee")]);
    }

    #[test]
    fn blank_endpoint_means_deck() {
        let raw: RawConfig = serde_json::from_str(r#"{"questionEndpoint": "  "}"#).unwrap();
        assert!(AppConfig::from(raw).question_endpoint.is_none());
    }
}
