use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::dao::models::DocumentSnapshot;

/// Session document as stored by CouchDB: bookkeeping fields plus the body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

impl CouchSessionDocument {
    /// Wrap a session body for a first write under `key`.
    pub fn new(key: &str, body: Map<String, Value>) -> Self {
        Self {
            id: key.to_owned(),
            rev: None,
            body,
        }
    }

    /// Drop the CouchDB bookkeeping and expose the plain session body.
    pub fn into_snapshot(self) -> DocumentSnapshot {
        DocumentSnapshot::Present(Value::Object(self.body))
    }
}

/// Subset of `GET /{db}` used to anchor change feeds.
#[derive(Debug, Deserialize)]
pub struct DatabaseInfo {
    pub update_seq: Value,
}

/// Body sent to `_changes` when filtering by document id.
#[derive(Debug, Serialize)]
pub struct DocIdsFilter<'a> {
    pub doc_ids: [&'a str; 1],
}

/// Long-poll answer of the `_changes` feed.
#[derive(Debug, Deserialize)]
pub struct ChangesResponse {
    pub results: Vec<ChangeRow>,
    pub last_seq: Value,
}

/// One changed document of a `_changes` answer.
#[derive(Debug, Deserialize)]
pub struct ChangeRow {
    pub id: String,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Render an update sequence as the `since` query parameter.
///
/// CouchDB 1.x uses integers, later versions opaque strings.
pub fn seq_param(seq: &Value) -> String {
    match seq {
        Value::String(value) => value.clone(),
        other => other.to_string(),
    }
}
