//! Error types shared by the CouchDB storage implementation.

use reqwest::StatusCode;
use thiserror::Error;

/// Convenient result alias returning [`CouchDaoError`] failures.
pub type CouchResult<T> = Result<T, CouchDaoError>;

/// Failures that can occur while interacting with CouchDB.
#[derive(Debug, Error)]
pub enum CouchDaoError {
    /// Required environment variable is missing.
    #[error("missing CouchDB environment variable `{var}`")]
    MissingEnvVar { var: &'static str },
    /// CouchDB could not be reached while opening the session database.
    #[error("failed to open CouchDB database `{database}`")]
    Connect {
        database: String,
        #[source]
        source: reqwest::Error,
    },
    /// A request to a document endpoint could not be sent.
    #[error("failed to send CouchDB request to `{path}`")]
    RequestSend {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// CouchDB returned an unexpected status code.
    #[error("unexpected CouchDB response status {status} for `{path}`")]
    RequestStatus { path: String, status: StatusCode },
    /// Response payload could not be parsed into JSON.
    #[error("failed to decode CouchDB response for `{path}`")]
    DecodeResponse {
        path: String,
        #[source]
        source: reqwest::Error,
    },
    /// A session document could not be rebuilt from its stored JSON.
    #[error("failed to deserialize CouchDB value for `{path}`")]
    DeserializeValue {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    /// A merge targeted a document that is not stored.
    #[error("session document `{key}` does not exist")]
    MissingDocument { key: String },
    /// Revision conflicts kept winning over our merge attempts.
    #[error("gave up merging `{key}` after {attempts} revision conflicts")]
    MergeContention { key: String, attempts: u32 },
    /// A merge patch could not be applied to the stored document.
    #[error("failed to apply merge to `{key}`: {message}")]
    InvalidMerge { key: String, message: String },
}
