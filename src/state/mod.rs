pub mod results;
pub mod session;
mod sse;
pub mod state_machine;
pub mod view;

use std::sync::Arc;

use tokio::{
    sync::{Mutex, RwLock, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{
    dao::session_store::SessionStore,
    error::ServiceError,
    services::{
        question_source::QuestionSource,
        session_client::{ClientSettings, SessionClient},
    },
    state::session::ParticipantId,
};

pub use self::sse::SseHub;
pub use self::state_machine::{AbortError, ApplyError, Plan, PlanError, PlanId, Snapshot};

/// Handle to the application state shared by routes and background tasks.
pub type SharedState = Arc<AppState>;

/// Session this process currently takes part in, plus the task relaying its
/// status to SSE subscribers.
pub struct ActiveSession {
    /// Distinguishes successive sessions held in the same slot.
    pub slot_id: Uuid,
    /// Live connection to the session document.
    pub client: Arc<SessionClient>,
    relay: JoinHandle<()>,
}

impl ActiveSession {
    /// Bundle a client with its relay task.
    pub fn new(slot_id: Uuid, client: Arc<SessionClient>, relay: JoinHandle<()>) -> Self {
        Self {
            slot_id,
            client,
            relay,
        }
    }
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.relay.abort();
    }
}

/// Central application state: the store handle, this device's identity and
/// the session it is part of.
pub struct AppState {
    session_store: RwLock<Option<Arc<dyn SessionStore>>>,
    sse: SseHub,
    participant: ParticipantId,
    questions: Arc<dyn QuestionSource>,
    settings: ClientSettings,
    session: Mutex<Option<ActiveSession>>,
    degraded: watch::Sender<bool>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(
        participant: ParticipantId,
        questions: Arc<dyn QuestionSource>,
        settings: ClientSettings,
    ) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            session_store: RwLock::new(None),
            sse: SseHub::new(32),
            participant,
            questions,
            settings,
            session: Mutex::new(None),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn session_store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.session_store.read().await;
        guard.as_ref().cloned()
    }

    /// Current session store, or [`ServiceError::Degraded`] when none is installed.
    pub async fn require_session_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        self.session_store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn set_session_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.session_store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false).await;
    }

    /// Current degraded flag.
    pub async fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub async fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Broadcast hub used for the session SSE stream.
    pub fn sse(&self) -> &SseHub {
        &self.sse
    }

    /// Identity of this device.
    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Question generator used when this device hosts.
    pub fn questions(&self) -> &dyn QuestionSource {
        self.questions.as_ref()
    }

    /// Client timing settings.
    pub fn client_settings(&self) -> ClientSettings {
        self.settings
    }

    /// Slot holding the session this device takes part in.
    pub fn session(&self) -> &Mutex<Option<ActiveSession>> {
        &self.session
    }

    /// Client of the active session, or [`ServiceError::NotFound`].
    pub async fn active_client(&self) -> Result<Arc<SessionClient>, ServiceError> {
        let guard = self.session.lock().await;
        guard
            .as_ref()
            .map(|active| active.client.clone())
            .ok_or_else(|| ServiceError::NotFound("not part of any session".into()))
    }

    /// Empty the slot if it still holds the session identified by `slot_id`.
    pub async fn clear_session(&self, slot_id: Uuid) -> Option<ActiveSession> {
        let mut guard = self.session.lock().await;
        match guard.as_ref() {
            Some(active) if active.slot_id == slot_id => guard.take(),
            _ => None,
        }
    }
}
