use serde::Serialize;
use utoipa::ToSchema;

/// Health response returned by the `/healthcheck` route.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Health status ("ok" or "degraded").
    pub status: String,
    /// Identity of this device.
    pub participant_id: String,
    /// Code of the session this device follows, if any.
    pub session_code: Option<String>,
}

impl HealthResponse {
    /// Build a response from the degraded flag and the active session.
    pub fn new(degraded: bool, participant_id: String, session_code: Option<String>) -> Self {
        let status = if degraded { "degraded" } else { "ok" };
        Self {
            status: status.to_string(),
            participant_id,
            session_code,
        }
    }
}
