use std::{sync::Arc, time::Duration};

use futures::future::BoxFuture;
use rand::seq::IndexedRandom;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::state::session::Round;

/// Failures of the external question generator.
#[derive(Debug, Error)]
pub enum QuestionError {
    /// Building the HTTP client failed.
    #[error("failed to build question client")]
    ClientBuilder {
        #[source]
        source: reqwest::Error,
    },
    /// The request could not be sent or the body could not be read.
    #[error("question request to `{endpoint}` failed")]
    Request {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    /// The generator did not answer within the configured limit.
    #[error("question source timed out after {0:?}")]
    Timeout(Duration),
    /// The generator answered with a non-success status.
    #[error("question source answered with status {0}")]
    Status(StatusCode),
    /// The payload is not a `{optionA, optionB}` object.
    #[error("question payload is malformed: {0}")]
    Malformed(String),
    /// No question is available at all.
    #[error("no question available")]
    Exhausted,
}

/// Produces the question of the next round.
pub trait QuestionSource: Send + Sync {
    /// Fetch one round.
    fn fetch_round(&self) -> BoxFuture<'static, Result<Round, QuestionError>>;
}

/// Calls an HTTP function that answers with `{"optionA": .., "optionB": ..}`.
#[derive(Clone)]
pub struct HttpQuestionSource {
    client: Client,
    endpoint: Arc<str>,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawQuestion {
    option_a: String,
    option_b: String,
}

impl HttpQuestionSource {
    /// Build a client bounded by `timeout` per request.
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self, QuestionError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|source| QuestionError::ClientBuilder { source })?;
        let endpoint: String = endpoint.into();
        Ok(Self {
            client,
            endpoint: Arc::from(endpoint),
            timeout,
        })
    }

    async fn fetch(&self) -> Result<Round, QuestionError> {
        let endpoint = self.endpoint.to_string();
        let response = self
            .client
            .get(endpoint.as_str())
            .send()
            .await
            .map_err(|source| self.request_error(source))?;

        if !response.status().is_success() {
            return Err(QuestionError::Status(response.status()));
        }

        let body = response
            .text()
            .await
            .map_err(|source| self.request_error(source))?;
        let round = parse_round(&body)?;
        debug!(%endpoint, option_a = %round.option_a, option_b = %round.option_b, "fetched question");
        Ok(round)
    }

    fn request_error(&self, source: reqwest::Error) -> QuestionError {
        if source.is_timeout() {
            QuestionError::Timeout(self.timeout)
        } else {
            QuestionError::Request {
                endpoint: self.endpoint.to_string(),
                source,
            }
        }
    }
}

impl QuestionSource for HttpQuestionSource {
    fn fetch_round(&self) -> BoxFuture<'static, Result<Round, QuestionError>> {
        let source = self.clone();
        Box::pin(async move { source.fetch().await })
    }
}

/// Draws rounds at random from a fixed list.
#[derive(Debug, Clone)]
pub struct DeckQuestionSource {
    rounds: Arc<[Round]>,
}

impl DeckQuestionSource {
    /// Build a deck from the given rounds.
    pub fn new(rounds: impl Into<Vec<Round>>) -> Self {
        let rounds: Vec<Round> = rounds.into();
        Self {
            rounds: Arc::from(rounds),
        }
    }
}

impl QuestionSource for DeckQuestionSource {
    fn fetch_round(&self) -> BoxFuture<'static, Result<Round, QuestionError>> {
        let round = self
            .rounds
            .choose(&mut rand::rng())
            .cloned()
            .ok_or(QuestionError::Exhausted);
        Box::pin(async move { round })
    }
}

/// Parse a generator answer, tolerating Markdown code fences around the JSON.
pub fn parse_round(body: &str) -> Result<Round, QuestionError> {
    let trimmed = body.trim();
    let unfenced = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.trim_end().strip_suffix("```"))
        .unwrap_or(trimmed)
        .trim();

    let raw: RawQuestion = serde_json::from_str(unfenced)
        .map_err(|err| QuestionError::Malformed(err.to_string()))?;

    let option_a = raw.option_a.trim();
    let option_b = raw.option_b.trim();
    if option_a.is_empty() || option_b.is_empty() {
        return Err(QuestionError::Malformed("an option is empty".into()));
    }

    Ok(Round::new(option_a, option_b))
}
