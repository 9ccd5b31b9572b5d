use tracing::warn;

use crate::{dto::health::HealthResponse, state::SharedState};

/// Report the degraded flag and the followed session while logging store issues.
pub async fn health_status(state: &SharedState) -> HealthResponse {
    match state.require_session_store().await {
        Ok(store) => {
            if let Err(err) = store.health_check().await {
                warn!(error = %err, "session store health check failed");
            }
        }
        Err(_) => warn!("session store unavailable (degraded mode)"),
    }

    let session_code = state
        .active_client()
        .await
        .ok()
        .map(|client| client.code().to_string());

    HealthResponse::new(
        state.is_degraded().await,
        state.participant().to_string(),
        session_code,
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        dao::session_store::memory::MemorySessionStore,
        services::{question_source::DeckQuestionSource, session_client::ClientSettings},
        state::{
            AppState,
            session::{ParticipantId, Round},
        },
    };

    #[tokio::test]
    async fn reports_degraded_until_a_store_is_installed() {
        let state = AppState::new(
            ParticipantId::new("H"),
            Arc::new(DeckQuestionSource::new(Vec::<Round>::new())),
            ClientSettings::default(),
        );

        let before = health_status(&state).await;
        assert_eq!(before.status, "degraded");
        assert_eq!(before.participant_id, "H");
        assert!(before.session_code.is_none());

        state
            .set_session_store(Arc::new(MemorySessionStore::new()))
            .await;
        assert_eq!(health_status(&state).await.status, "ok");
    }
}
