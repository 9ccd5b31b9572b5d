use std::sync::Arc;

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    error::ServiceError,
    services::{
        session_client::{EntryPolicy, EntryRequest, SessionClient, SessionStatus},
        sse_events,
    },
    state::{
        ActiveSession, SharedState,
        session::{OptionRef, SessionCode},
        view::SessionView,
    },
};

const CREATE_ATTEMPTS: usize = 5;

/// Host a fresh session under a newly generated code.
///
/// Codes that turn out to be taken are regenerated so this device never
/// ends up inside somebody else's session.
pub async fn create_session(
    state: &SharedState,
    display_name: &str,
) -> Result<SessionView, ServiceError> {
    let mut taken = String::new();
    for attempt in 1..=CREATE_ATTEMPTS {
        let code = SessionCode::generate();
        match enter(state, code, display_name, EntryPolicy::CreateOnly).await {
            Err(ServiceError::CodeTaken(code)) => {
                warn!(%code, attempt, "generated session code already in use");
                taken = code;
            }
            other => return other,
        }
    }
    Err(ServiceError::CodeTaken(taken))
}

/// Join the session identified by `code`, creating it when nobody has yet.
pub async fn join_session(
    state: &SharedState,
    code: &str,
    display_name: &str,
) -> Result<SessionView, ServiceError> {
    let code = SessionCode::parse(code)?;

    if let Ok(client) = state.active_client().await {
        if client.code() == &code {
            if let SessionStatus::Active(view) = client.status() {
                return Ok(view);
            }
        }
    }

    enter(state, code, display_name, EntryPolicy::CreateOrJoin).await
}

/// Stop following the active session. Nothing is written to the document.
pub async fn leave_session(state: &SharedState) -> Result<SessionCode, ServiceError> {
    let active = {
        let mut slot = state.session().lock().await;
        slot.take()
    };
    let Some(active) = active else {
        return Err(ServiceError::NotFound("not part of any session".into()));
    };

    let code = active.client.code().clone();
    drop(active);
    info!(%code, "left session");
    sse_events::broadcast_session_left(state, code.as_str());
    Ok(code)
}

/// Open the first round of the active session.
pub async fn start_round(state: &SharedState) -> Result<(), ServiceError> {
    let client = state.active_client().await?;
    client.start_round(state.questions()).await
}

/// Open the next round of the active session.
pub async fn advance_round(state: &SharedState) -> Result<(), ServiceError> {
    let client = state.active_client().await?;
    client.advance_round(state.questions()).await
}

/// Vote in the current round of the active session.
pub async fn submit_vote(state: &SharedState, option: OptionRef) -> Result<(), ServiceError> {
    let client = state.active_client().await?;
    client.submit_vote(option).await
}

/// Latest view of the active session.
pub async fn current_view(state: &SharedState) -> Result<SessionView, ServiceError> {
    let client = state.active_client().await?;
    active_view(&client)
}

async fn enter(
    state: &SharedState,
    code: SessionCode,
    display_name: &str,
    policy: EntryPolicy,
) -> Result<SessionView, ServiceError> {
    let store = state.require_session_store().await?;
    let request = EntryRequest {
        code,
        participant: state.participant().clone(),
        display_name: display_name.trim().to_string(),
        policy,
    };

    let client = Arc::new(
        SessionClient::ensure_session(store, request, state.client_settings()).await?,
    );
    let view = active_view(&client)?;

    // The relay clears the slot on failure, so it must not run before the
    // session is installed; holding the lock orders the two.
    let previous = {
        let mut slot = state.session().lock().await;
        let slot_id = Uuid::new_v4();
        let relay = sse_events::spawn_session_relay(state.clone(), slot_id, &client);
        slot.replace(ActiveSession::new(slot_id, client, relay))
    };

    if let Some(previous) = previous {
        let code = previous.client.code().clone();
        drop(previous);
        info!(%code, "left previous session");
        sse_events::broadcast_session_left(state, code.as_str());
    }

    Ok(view)
}

fn active_view(client: &SessionClient) -> Result<SessionView, ServiceError> {
    match client.status() {
        SessionStatus::Active(view) => Ok(view),
        SessionStatus::Failed(reason) => Err(ServiceError::InvalidState(format!(
            "session has ended: {reason}"
        ))),
    }
}
