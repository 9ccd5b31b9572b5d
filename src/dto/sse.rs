use serde::Serialize;
use utoipa::ToSchema;

#[derive(Clone, Debug)]
/// Dispatched payload carried across the SSE channel.
pub struct ServerEvent {
    /// SSE `event:` name; unnamed events fall back to `message`.
    pub event: Option<String>,
    /// JSON payload sent as the `data:` field.
    pub data: String,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the SSE data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<Option<String>>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_string(payload)?,
        })
    }
}

#[derive(Debug, Serialize, ToSchema)]
/// Initial metadata sent to an SSE client when it connects.
pub struct Handshake {
    /// Identifier of the SSE stream.
    pub stream: String,
    /// Human-readable message confirming the subscription.
    pub message: String,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
    /// Identity of this device.
    pub participant_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the backend enters or leaves degraded mode.
pub struct SystemStatus {
    /// Whether the storage backend is unavailable.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when the active session stops for good.
pub struct SessionErrorEvent {
    /// Code of the session that stopped.
    pub code: String,
    /// Why the session cannot continue.
    pub reason: String,
    /// RFC 3339 timestamp of the failure.
    pub occurred_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
/// Broadcast when this device leaves its session.
pub struct SessionLeftEvent {
    /// Code of the session that was left.
    pub code: String,
}
