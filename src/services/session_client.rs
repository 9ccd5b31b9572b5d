//! One participant's live connection to a shared session document.
//!
//! A [`SessionClient`] owns a subscription to the document, keeps the latest
//! snapshot in a [`SessionMachine`], validates every intent locally and turns
//! accepted intents into single field-level merges. Every client runs the
//! same reaction on every snapshot, which is how `VOTING -> RESULTS` happens
//! without an arbiter.

use std::{sync::Arc, time::Duration};

use futures::StreamExt;
use tokio::{
    sync::{RwLock, watch},
    task::JoinHandle,
    time::{Instant, sleep, sleep_until, timeout},
};
use tracing::{debug, error, info, warn};

use crate::{
    dao::{
        models::{CreateOutcome, DocumentSnapshot, MergePatch},
        session_store::{SessionStore, SnapshotStream},
        storage::{StorageError, StorageResult},
    },
    error::ServiceError,
    services::question_source::QuestionSource,
    state::{
        session::{OptionRef, ParticipantId, SessionCode, SessionDocument, SnapshotError},
        state_machine::{
            RoundIntent, SessionEvent, SessionMachine, Snapshot, plan_update, reaction,
        },
        view::SessionView,
    },
};

const RESUBSCRIBE_ATTEMPTS: u32 = 5;
const RESUBSCRIBE_INITIAL_DELAY: Duration = Duration::from_millis(250);
const RESUBSCRIBE_MAX_DELAY: Duration = Duration::from_secs(4);

/// Timing knobs of a client.
#[derive(Debug, Clone, Copy)]
pub struct ClientSettings {
    /// Delay between "everybody voted" and the reveal write.
    pub reveal_debounce: Duration,
    /// Upper bound for creating or joining a session.
    pub join_timeout: Duration,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            reveal_debounce: Duration::from_millis(500),
            join_timeout: Duration::from_secs(10),
        }
    }
}

/// What to do when the session code is already taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryPolicy {
    /// Fail with [`ServiceError::CodeTaken`]; used for freshly generated codes.
    CreateOnly,
    /// Create when absent, join otherwise.
    CreateOrJoin,
}

/// Who enters which session, and how.
#[derive(Debug, Clone)]
pub struct EntryRequest {
    /// Session to enter.
    pub code: SessionCode,
    /// Identity written into the participants map.
    pub participant: ParticipantId,
    /// Name used when this client adds itself.
    pub display_name: String,
    /// Behaviour when the code is already taken.
    pub policy: EntryPolicy,
}

/// Latest state observed by a client.
#[derive(Debug, Clone)]
pub enum SessionStatus {
    /// The session is live; the view reflects the latest snapshot.
    Active(SessionView),
    /// The session cannot continue; no further snapshots are processed.
    Failed(String),
}

struct ClientInner {
    code: SessionCode,
    participant: ParticipantId,
    store: Arc<dyn SessionStore>,
    machine: RwLock<SessionMachine>,
    status: watch::Sender<SessionStatus>,
}

/// Live session handle. Dropping it unsubscribes and writes nothing.
pub struct SessionClient {
    inner: Arc<ClientInner>,
    follower: JoinHandle<()>,
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.follower.abort();
    }
}

impl SessionClient {
    /// Subscribe to `request.code`, creating or joining the session, and
    /// return once the local participant is part of the document.
    pub async fn ensure_session(
        store: Arc<dyn SessionStore>,
        request: EntryRequest,
        settings: ClientSettings,
    ) -> Result<Self, ServiceError> {
        timeout(settings.join_timeout, Self::enter(store, request, settings))
            .await
            .map_err(|_| ServiceError::Timeout)?
    }

    async fn enter(
        store: Arc<dyn SessionStore>,
        request: EntryRequest,
        settings: ClientSettings,
    ) -> Result<Self, ServiceError> {
        let mut snapshots = store.subscribe(request.code.as_str()).await?;
        let document = bootstrap(store.as_ref(), &request, &mut snapshots).await?;

        let view = SessionView::of(&document, &request.participant, None);
        let mut machine = SessionMachine::new();
        machine.observe(document);
        let (status, _receiver) = watch::channel(SessionStatus::Active(view));

        let inner = Arc::new(ClientInner {
            code: request.code,
            participant: request.participant,
            store,
            machine: RwLock::new(machine),
            status,
        });

        let follower = tokio::spawn(follow(inner.clone(), snapshots, settings.reveal_debounce));
        Ok(Self { inner, follower })
    }

    /// Key of the session document.
    pub fn code(&self) -> &SessionCode {
        &self.inner.code
    }

    /// Identity this client acts as.
    pub fn participant(&self) -> &ParticipantId {
        &self.inner.participant
    }

    /// Latest status.
    pub fn status(&self) -> SessionStatus {
        self.inner.status.borrow().clone()
    }

    /// Receive every status change.
    pub fn watch(&self) -> watch::Receiver<SessionStatus> {
        self.inner.status.subscribe()
    }

    /// Wait until the view satisfies `predicate`, failing if the session ends first.
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<SessionView, ServiceError>
    where
        F: FnMut(&SessionView) -> bool,
    {
        let mut receiver = self.watch();
        let status = receiver
            .wait_for(|status| match status {
                SessionStatus::Active(view) => predicate(view),
                SessionStatus::Failed(_) => true,
            })
            .await
            .map_err(|_| ServiceError::InvalidState("session closed".into()))?
            .clone();

        match status {
            SessionStatus::Active(view) => Ok(view),
            SessionStatus::Failed(reason) => Err(ServiceError::InvalidState(reason)),
        }
    }

    /// Record the local participant's vote. A second vote in the same round
    /// is a no-op.
    pub async fn submit_vote(&self, option: OptionRef) -> Result<(), ServiceError> {
        self.ensure_active()?;
        let me = &self.inner.participant;
        // Check and record under one write lock so concurrent calls see each other.
        let update = {
            let mut machine = self.inner.machine.write().await;
            machine.record_vote(me, option)?
        };

        let Some(update) = update else {
            debug!(code = %self.inner.code, "vote already recorded; nothing to write");
            return Ok(());
        };

        if let Err(err) = self.inner.write(update.to_merge_patch()).await {
            self.inner.machine.write().await.forget_vote(me, option);
            return Err(err.into());
        }
        info!(code = %self.inner.code, option = option.as_str(), "vote submitted");
        Ok(())
    }

    /// Open the first round. Host only, from the lobby.
    pub async fn start_round(&self, questions: &dyn QuestionSource) -> Result<(), ServiceError> {
        self.open_round(RoundIntent::Start, questions).await
    }

    /// Open the next round. Host only, from the results screen.
    pub async fn advance_round(&self, questions: &dyn QuestionSource) -> Result<(), ServiceError> {
        self.open_round(RoundIntent::Advance, questions).await
    }

    async fn open_round(
        &self,
        intent: RoundIntent,
        questions: &dyn QuestionSource,
    ) -> Result<(), ServiceError> {
        self.ensure_active()?;
        let me = &self.inner.participant;

        let plan = {
            let mut machine = self.inner.machine.write().await;
            let plan = machine.plan(me, intent)?;
            self.inner.publish(&machine.snapshot());
            plan
        };

        let round = match questions.fetch_round().await {
            Ok(round) => round,
            Err(err) => {
                let mut machine = self.inner.machine.write().await;
                if let Err(abort_err) = machine.abort(plan.id) {
                    warn!(plan_id = %plan.id, error = %abort_err, "failed to abort round plan");
                }
                self.inner.publish(&machine.snapshot());
                return Err(err.into());
            }
        };

        let update = {
            let mut machine = self.inner.machine.write().await;
            let committed = machine.commit(plan.id, me, round);
            self.inner.publish(&machine.snapshot());
            committed?
        };

        self.inner.write(update.to_merge_patch()).await?;
        info!(code = %self.inner.code, ?intent, "round opened");
        Ok(())
    }

    fn ensure_active(&self) -> Result<(), ServiceError> {
        match &*self.inner.status.borrow() {
            SessionStatus::Active(_) => Ok(()),
            SessionStatus::Failed(reason) => Err(ServiceError::InvalidState(format!(
                "session has ended: {reason}"
            ))),
        }
    }
}

impl ClientInner {
    async fn observe(&self, document: SessionDocument) {
        let mut machine = self.machine.write().await;
        machine.observe(document);
        self.publish(&machine.snapshot());
    }

    fn publish(&self, snapshot: &Snapshot) {
        let Some(view) = SessionView::derive(snapshot, &self.participant) else {
            return;
        };
        // A failed session stays failed.
        self.status.send_if_modified(|current| match current {
            SessionStatus::Failed(_) => false,
            SessionStatus::Active(_) => {
                *current = SessionStatus::Active(view);
                true
            }
        });
    }

    fn fail(&self, err: ServiceError) {
        error!(code = %self.code, error = %err, "session stopped");
        let reason = match &err {
            ServiceError::Malformed(source) => format!("{err}: {source}"),
            ServiceError::Unavailable(source) => format!("{err}: {source}"),
            _ => err.to_string(),
        };
        self.status.send_replace(SessionStatus::Failed(reason));
    }

    async fn write(&self, patch: MergePatch) -> StorageResult<()> {
        self.store.merge(self.code.as_str(), patch).await
    }

    /// Write `phase = RESULTS` if the cached document still calls for it.
    async fn reveal(&self) -> StorageResult<()> {
        let planned = {
            let machine = self.machine.read().await;
            machine.plan_event(&self.participant, &SessionEvent::Reveal)
        };

        match planned {
            Ok(Some(update)) => {
                self.write(update.to_merge_patch()).await?;
                info!(code = %self.code, "results revealed");
            }
            Ok(None) => {}
            Err(err) => debug!(code = %self.code, error = %err, "reveal no longer applies"),
        }
        Ok(())
    }

    async fn reveal_deadline(&self, debounce: Duration) -> Option<Instant> {
        let machine = self.machine.read().await;
        machine
            .document()
            .and_then(reaction)
            .map(|_| Instant::now() + debounce)
    }

    async fn resubscribe(&self, cause: StorageError) -> Option<SnapshotStream> {
        warn!(code = %self.code, error = %cause, "session subscription interrupted; resubscribing");
        let mut delay = RESUBSCRIBE_INITIAL_DELAY;
        let mut last = cause;

        for attempt in 1..=RESUBSCRIBE_ATTEMPTS {
            sleep(delay).await;
            match self.store.subscribe(self.code.as_str()).await {
                Ok(stream) => {
                    info!(code = %self.code, attempt, "session subscription restored");
                    return Some(stream);
                }
                Err(err) => {
                    warn!(code = %self.code, attempt, error = %err, "resubscribe attempt failed");
                    last = err;
                    delay = (delay * 2).min(RESUBSCRIBE_MAX_DELAY);
                }
            }
        }

        self.fail(ServiceError::Unavailable(last));
        None
    }
}

/// Drive the create/join protocol until the local participant appears in a
/// delivered snapshot.
async fn bootstrap(
    store: &dyn SessionStore,
    request: &EntryRequest,
    snapshots: &mut SnapshotStream,
) -> Result<SessionDocument, ServiceError> {
    let code = &request.code;
    let me = &request.participant;
    let mut create_attempted = false;
    let mut created = false;
    let mut join_sent = false;
    let mut seen = false;

    loop {
        let snapshot = snapshots.next().await.ok_or_else(|| {
            ServiceError::InvalidState(format!("subscription to `{code}` closed"))
        })??;

        match snapshot {
            DocumentSnapshot::Missing if seen => return Err(SnapshotError::Removed.into()),
            DocumentSnapshot::Missing if create_attempted => continue,
            DocumentSnapshot::Missing => {
                create_attempted = true;
                let lobby = SessionDocument::lobby(code.clone(), me.clone(), &request.display_name);
                match store.create_if_absent(code.as_str(), lobby.to_value()).await? {
                    CreateOutcome::Created => {
                        info!(%code, participant = %me, "session created");
                        created = true;
                    }
                    CreateOutcome::AlreadyExists if request.policy == EntryPolicy::CreateOnly => {
                        return Err(ServiceError::CodeTaken(code.to_string()));
                    }
                    CreateOutcome::AlreadyExists => {
                        debug!(%code, "another client created the session first; joining");
                    }
                }
            }
            DocumentSnapshot::Present(value) => {
                if !seen && !created && request.policy == EntryPolicy::CreateOnly {
                    return Err(ServiceError::CodeTaken(code.to_string()));
                }
                seen = true;

                let document = SessionDocument::decode(code, value)?;
                if document.participant(me).is_some() {
                    return Ok(document);
                }

                if !join_sent {
                    let event = SessionEvent::Join {
                        display_name: request.display_name.clone(),
                    };
                    if let Some(update) = plan_update(&document, me, &event)? {
                        store
                            .merge(code.as_str(), update.to_merge_patch())
                            .await?;
                        info!(%code, participant = %me, "joined session");
                    }
                    join_sent = true;
                }
            }
        }
    }
}

enum Step {
    Snapshot(Option<StorageResult<DocumentSnapshot>>),
    Reveal,
}

/// Follow the subscription: replace the cache on every snapshot and write the
/// reveal once everybody voted and no newer snapshot arrived for `debounce`.
async fn follow(inner: Arc<ClientInner>, mut snapshots: SnapshotStream, debounce: Duration) {
    let mut reveal_at = inner.reveal_deadline(debounce).await;

    loop {
        let step = tokio::select! {
            next = snapshots.next() => Step::Snapshot(next),
            _ = sleep_until(reveal_at.unwrap_or_else(Instant::now)), if reveal_at.is_some() => Step::Reveal,
        };

        match step {
            Step::Snapshot(Some(Ok(DocumentSnapshot::Present(value)))) => {
                match SessionDocument::decode(&inner.code, value) {
                    Ok(document) => {
                        // A newer snapshot always re-evaluates a pending reveal.
                        reveal_at = reaction(&document).map(|_| Instant::now() + debounce);
                        inner.observe(document).await;
                    }
                    Err(err) => {
                        inner.fail(err.into());
                        return;
                    }
                }
            }
            Step::Snapshot(Some(Ok(DocumentSnapshot::Missing))) => {
                inner.fail(SnapshotError::Removed.into());
                return;
            }
            Step::Snapshot(Some(Err(err))) => match inner.resubscribe(err).await {
                Some(stream) => snapshots = stream,
                None => return,
            },
            Step::Snapshot(None) => {
                let closed = StorageError::Closed {
                    key: inner.code.to_string(),
                };
                match inner.resubscribe(closed).await {
                    Some(stream) => snapshots = stream,
                    None => return,
                }
            }
            Step::Reveal => {
                reveal_at = None;
                if let Err(err) = inner.reveal().await {
                    warn!(code = %inner.code, error = %err, "reveal write failed; retrying");
                    reveal_at = Some(Instant::now() + debounce);
                }
            }
        }
    }
}
