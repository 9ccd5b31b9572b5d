use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dto::{
        session::SessionViewDto,
        sse::{ServerEvent, SessionErrorEvent, SessionLeftEvent, SystemStatus},
    },
    services::session_client::{SessionClient, SessionStatus},
    state::{SharedState, view::SessionView},
};

pub(crate) const EVENT_HANDSHAKE: &str = "handshake";
pub(crate) const EVENT_SESSION_SNAPSHOT: &str = "session.snapshot";
pub(crate) const EVENT_SESSION_ERROR: &str = "session.error";
pub(crate) const EVENT_SESSION_LEFT: &str = "session.left";
pub(crate) const EVENT_SYSTEM_STATUS: &str = "system.status";

/// Broadcast the view derived from the latest session snapshot.
pub fn broadcast_session_view(state: &SharedState, view: SessionView) {
    let payload = SessionViewDto::from(view);
    send_event(state, EVENT_SESSION_SNAPSHOT, &payload);
}

/// Broadcast that the active session stopped and why.
pub fn broadcast_session_error(state: &SharedState, code: &str, reason: &str) {
    let payload = SessionErrorEvent::now(code, reason);
    send_event(state, EVENT_SESSION_ERROR, &payload);
}

/// Broadcast that this device left its session.
pub fn broadcast_session_left(state: &SharedState, code: &str) {
    let payload = SessionLeftEvent {
        code: code.to_string(),
    };
    send_event(state, EVENT_SESSION_LEFT, &payload);
}

/// Broadcast the degraded flag.
pub fn broadcast_system_status(state: &SharedState, degraded: bool) {
    send_event(state, EVENT_SYSTEM_STATUS, &SystemStatus { degraded });
}

/// Relay every status change of `client` to SSE subscribers until the
/// session fails, then release the slot identified by `slot_id`.
pub fn spawn_session_relay(
    state: SharedState,
    slot_id: Uuid,
    client: &Arc<SessionClient>,
) -> JoinHandle<()> {
    let mut receiver = client.watch();
    let code = client.code().to_string();

    tokio::spawn(async move {
        loop {
            let status = receiver.borrow_and_update().clone();
            match status {
                SessionStatus::Active(view) => broadcast_session_view(&state, view),
                SessionStatus::Failed(reason) => {
                    broadcast_session_error(&state, &code, &reason);
                    // Dropping the cleared slot aborts this task; nothing may follow.
                    if state.clear_session(slot_id).await.is_some() {
                        info!(%code, "failed session released");
                    }
                    return;
                }
            }

            if receiver.changed().await.is_err() {
                debug!(%code, "session status channel closed");
                return;
            }
        }
    })
}

/// Relay degraded mode transitions to SSE subscribers.
pub fn spawn_status_relay(state: SharedState) -> JoinHandle<()> {
    let mut watcher = state.degraded_watcher();
    tokio::spawn(async move {
        while watcher.changed().await.is_ok() {
            let degraded = *watcher.borrow_and_update();
            broadcast_system_status(&state, degraded);
        }
    })
}

fn send_event(state: &SharedState, event: &str, payload: &impl Serialize) {
    match ServerEvent::json(Some(event.to_string()), payload) {
        Ok(event) => state.sse().broadcast(event),
        Err(err) => warn!(event, error = %err, "failed to serialize SSE payload"),
    }
}
