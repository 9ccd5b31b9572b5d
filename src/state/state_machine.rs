use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::state::session::{
    OptionRef, Participant, ParticipantId, Round, SessionDocument, SessionField, SessionPhase,
    SessionUpdate,
};

/// Host actions that open a new round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundIntent {
    /// First round, leaving the lobby.
    Start,
    /// Next round, leaving the results screen.
    Advance,
}

impl RoundIntent {
    /// Phase the session must be in for the intent to apply.
    pub fn expected_phase(self) -> SessionPhase {
        match self {
            RoundIntent::Start => SessionPhase::Lobby,
            RoundIntent::Advance => SessionPhase::Results,
        }
    }
}

/// Events a client can apply to the shared session document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Register the actor as a participant.
    Join {
        /// Name shown to the other participants.
        display_name: String,
    },
    /// Open a round with a freshly fetched question.
    NewRound {
        /// Start or advance.
        intent: RoundIntent,
        /// Question of the round.
        round: Round,
    },
    /// Record the actor's vote for the current round.
    Vote(OptionRef),
    /// Show the results once everybody voted.
    Reveal,
}

/// Payload-free discriminant of [`SessionEvent`], used in errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEventKind {
    /// See [`SessionEvent::Join`].
    Join,
    /// See [`SessionEvent::NewRound`].
    NewRound(RoundIntent),
    /// See [`SessionEvent::Vote`].
    Vote,
    /// See [`SessionEvent::Reveal`].
    Reveal,
}

impl SessionEvent {
    /// Discriminant of the event.
    pub fn kind(&self) -> SessionEventKind {
        match self {
            SessionEvent::Join { .. } => SessionEventKind::Join,
            SessionEvent::NewRound { intent, .. } => SessionEventKind::NewRound(*intent),
            SessionEvent::Vote(_) => SessionEventKind::Vote,
            SessionEvent::Reveal => SessionEventKind::Reveal,
        }
    }
}

/// Error returned when an event does not apply to the current phase.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while in {}", .from.as_str())]
pub struct InvalidTransition {
    /// Phase of the document the event was planned against.
    pub from: SessionPhase,
    /// Event that was rejected.
    pub event: SessionEventKind,
}

/// Errors that can occur when planning a session update.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlanError {
    /// A round transition is already pending and must be committed or aborted.
    #[error("a round transition is already in progress")]
    AlreadyPending,
    /// Only the session host may open rounds.
    #[error("only the host can change rounds")]
    NotHost,
    /// The actor has no entry in the participants map.
    #[error("participant `{0}` has not joined this session")]
    NotParticipant(ParticipantId),
    /// The event is not valid from the current phase.
    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),
}

/// Errors that can occur when committing a planned round transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApplyError {
    /// No transition is currently pending.
    #[error("no round transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("plan {got} does not match pending plan {expected}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
    /// The latest snapshot no longer allows the transition.
    #[error(transparent)]
    Stale(#[from] PlanError),
}

/// Errors that can occur when aborting a planned round transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbortError {
    /// No transition is currently pending.
    #[error("no round transition is pending")]
    NoPending,
    /// Plan ID does not match the pending plan.
    #[error("plan {got} does not match pending plan {expected}")]
    IdMismatch {
        /// Expected plan ID.
        expected: PlanId,
        /// Provided plan ID.
        got: PlanId,
    },
}

/// Age after which a pending plan no longer blocks new ones.
pub const PLAN_EXPIRY: Duration = Duration::from_secs(60);

/// Unique identifier for a planned round transition.
pub type PlanId = Uuid;

/// A round transition that passed validation and awaits its question.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Start or advance.
    pub intent: RoundIntent,
    /// Snapshot version the plan was validated against.
    pub version: usize,
    /// Timestamp when this plan was created.
    pub pending_since: Instant,
}

/// Compute the update an event produces against `document`.
///
/// `Ok(None)` means the event is already reflected in the document and
/// nothing needs to be written.
pub fn plan_update(
    document: &SessionDocument,
    actor: &ParticipantId,
    event: &SessionEvent,
) -> Result<Option<SessionUpdate>, PlanError> {
    match event {
        SessionEvent::Join { display_name } => {
            if document.participant(actor).is_some() {
                return Ok(None);
            }
            Ok(Some(SessionUpdate::new().with(SessionField::Participant(
                actor.clone(),
                Participant::new(display_name.clone()),
            ))))
        }
        SessionEvent::NewRound { intent, round } => {
            authorize_round(document, actor, *intent)?;
            let update = document.participants.keys().fold(
                SessionUpdate::new()
                    .with(SessionField::Phase(SessionPhase::Voting))
                    .with(SessionField::CurrentRound(Some(round.clone()))),
                |update, id| update.with(SessionField::Vote(id.clone(), None)),
            );
            Ok(Some(update))
        }
        SessionEvent::Vote(option) => {
            let participant = document
                .participant(actor)
                .ok_or_else(|| PlanError::NotParticipant(actor.clone()))?;
            if document.phase != SessionPhase::Voting {
                return Err(invalid(document, event));
            }
            if participant.vote.is_some() {
                return Ok(None);
            }
            Ok(Some(
                SessionUpdate::new().with(SessionField::Vote(actor.clone(), Some(*option))),
            ))
        }
        SessionEvent::Reveal => match document.phase {
            SessionPhase::Results => Ok(None),
            SessionPhase::Voting if document.all_voted() => Ok(Some(
                SessionUpdate::new().with(SessionField::Phase(SessionPhase::Results)),
            )),
            _ => Err(invalid(document, event)),
        },
    }
}

/// Check that `actor` may open a round of the given kind right now.
pub fn authorize_round(
    document: &SessionDocument,
    actor: &ParticipantId,
    intent: RoundIntent,
) -> Result<(), PlanError> {
    if !document.is_host(actor) {
        return Err(PlanError::NotHost);
    }
    if document.phase != intent.expected_phase() {
        return Err(InvalidTransition {
            from: document.phase,
            event: SessionEventKind::NewRound(intent),
        }
        .into());
    }
    Ok(())
}

/// Event every client derives from a snapshot on its own.
pub fn reaction(document: &SessionDocument) -> Option<SessionEvent> {
    let ready = document.phase == SessionPhase::Voting
        && !document.participants.is_empty()
        && document.all_voted();
    ready.then_some(SessionEvent::Reveal)
}

fn invalid(document: &SessionDocument, event: &SessionEvent) -> PlanError {
    PlanError::InvalidTransition(InvalidTransition {
        from: document.phase,
        event: event.kind(),
    })
}

/// Snapshot of the local machine state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Latest decoded document, if one was delivered yet.
    pub document: Option<SessionDocument>,
    /// Number of snapshots observed so far.
    pub version: usize,
    /// Round transition waiting for its question, if any.
    pub pending: Option<RoundIntent>,
}

/// Vote written by this client whose round is still open.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LocalVote {
    voter: ParticipantId,
    option: OptionRef,
    /// Set once a snapshot carrying the vote was observed.
    echoed: bool,
}

/// Per-client state machine: the cached document, at most one pending
/// round transition and the vote submitted in the current round.
#[derive(Debug, Clone, Default)]
pub struct SessionMachine {
    document: Option<SessionDocument>,
    version: usize,
    pending: Option<Plan>,
    local_vote: Option<LocalVote>,
}

impl SessionMachine {
    /// Create a machine that has not seen any snapshot yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest cached document.
    pub fn document(&self) -> Option<&SessionDocument> {
        self.document.as_ref()
    }

    /// Replace the cache wholesale with a newly delivered snapshot.
    ///
    /// The local vote is forgotten once its round is over: the phase left
    /// `VOTING`, or the echoed vote was reset by a new round.
    pub fn observe(&mut self, document: SessionDocument) {
        if let Some(local) = &mut self.local_vote {
            let recorded = document
                .participant(&local.voter)
                .and_then(|entry| entry.vote);
            let round_over = document.phase != SessionPhase::Voting
                || (local.echoed && recorded.is_none());
            if round_over {
                self.local_vote = None;
            } else if recorded.is_some() {
                local.echoed = true;
            }
        }
        self.document = Some(document);
        self.version += 1;
    }

    /// Create a snapshot of the current machine state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot {
            document: self.document.clone(),
            version: self.version,
            pending: self.pending.as_ref().map(|plan| plan.intent),
        }
    }

    /// Plan an update from the cached document without reserving anything.
    pub fn plan_event(
        &self,
        actor: &ParticipantId,
        event: &SessionEvent,
    ) -> Result<Option<SessionUpdate>, PlanError> {
        let document = self.cached(actor)?;
        if let SessionEvent::Vote(_) = event {
            if self.voted_locally(actor) {
                return Ok(None);
            }
        }
        plan_update(document, actor, event)
    }

    /// Plan `actor`'s vote and remember it until its round is over, so a
    /// second vote sent before the echo arrives is still a no-op.
    pub fn record_vote(
        &mut self,
        actor: &ParticipantId,
        option: OptionRef,
    ) -> Result<Option<SessionUpdate>, PlanError> {
        let update = self.plan_event(actor, &SessionEvent::Vote(option))?;
        if update.is_some() {
            self.local_vote = Some(LocalVote {
                voter: actor.clone(),
                option,
                echoed: false,
            });
        }
        Ok(update)
    }

    /// Drop a recorded vote whose write failed so it can be sent again.
    pub fn forget_vote(&mut self, actor: &ParticipantId, option: OptionRef) {
        let matches = self.local_vote.as_ref().is_some_and(|local| {
            &local.voter == actor && local.option == option && !local.echoed
        });
        if matches {
            self.local_vote = None;
        }
    }

    fn voted_locally(&self, actor: &ParticipantId) -> bool {
        self.local_vote
            .as_ref()
            .is_some_and(|local| &local.voter == actor)
    }

    /// Reserve a round transition. Returns a plan that must later be
    /// committed or aborted.
    ///
    /// A plan older than [`PLAN_EXPIRY`] is treated as abandoned and replaced.
    pub fn plan(&mut self, actor: &ParticipantId, intent: RoundIntent) -> Result<Plan, PlanError> {
        authorize_round(self.cached(actor)?, actor, intent)?;

        if let Some(pending) = &self.pending {
            if pending.pending_since.elapsed() < PLAN_EXPIRY {
                return Err(PlanError::AlreadyPending);
            }
            warn!(plan_id = %pending.id, intent = ?pending.intent, "replacing abandoned round plan");
        }

        let plan = Plan {
            id: Uuid::new_v4(),
            intent,
            version: self.version,
            pending_since: Instant::now(),
        };
        self.pending = Some(plan.clone());

        Ok(plan)
    }

    /// Release a pending plan and compute its update against the latest
    /// snapshot.
    pub fn commit(
        &mut self,
        plan_id: PlanId,
        actor: &ParticipantId,
        round: Round,
    ) -> Result<SessionUpdate, ApplyError> {
        let plan = self.pending.take().ok_or(ApplyError::NoPending)?;

        if plan.id != plan_id {
            let expected = plan.id;
            self.pending = Some(plan);
            return Err(ApplyError::IdMismatch {
                expected,
                got: plan_id,
            });
        }

        if plan.version != self.version {
            debug!(
                plan_id = %plan.id,
                planned_at = plan.version,
                latest = self.version,
                "session changed while the question was fetched; re-planning"
            );
        }

        let event = SessionEvent::NewRound {
            intent: plan.intent,
            round,
        };
        let update = plan_update(self.cached(actor)?, actor, &event)?;
        // NewRound always yields an update once authorised.
        Ok(update.unwrap_or_default())
    }

    /// Abort a pending plan without writing anything.
    pub fn abort(&mut self, plan_id: PlanId) -> Result<(), AbortError> {
        let plan = self.pending.as_ref().ok_or(AbortError::NoPending)?;

        if plan.id != plan_id {
            return Err(AbortError::IdMismatch {
                expected: plan.id,
                got: plan_id,
            });
        }

        self.pending = None;
        Ok(())
    }

    fn cached(&self, actor: &ParticipantId) -> Result<&SessionDocument, PlanError> {
        self.document
            .as_ref()
            .ok_or_else(|| PlanError::NotParticipant(actor.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::SessionCode;

    fn host() -> ParticipantId {
        ParticipantId::new("H")
    }

    fn guest() -> ParticipantId {
        ParticipantId::new("B")
    }

    fn lobby() -> SessionDocument {
        let mut document =
            SessionDocument::lobby(SessionCode::parse("AB12CD").unwrap(), host(), "Ann");
        document
            .participants
            .insert(guest(), Participant::new("Bo"));
        document
    }

    fn apply(document: &mut SessionDocument, actor: &ParticipantId, event: SessionEvent) {
        if let Some(update) = plan_update(document, actor, &event).unwrap() {
            update.apply(document);
        }
    }

    fn new_round(intent: RoundIntent) -> SessionEvent {
        SessionEvent::NewRound {
            intent,
            round: Round::new("Pizza", "Sushi"),
        }
    }

    #[test]
    fn full_round_trip_through_phases() {
        let mut document = lobby();

        apply(&mut document, &host(), new_round(RoundIntent::Start));
        assert_eq!(document.phase, SessionPhase::Voting);
        assert_eq!(document.current_round, Some(Round::new("Pizza", "Sushi")));
        assert!(reaction(&document).is_none());

        apply(&mut document, &host(), SessionEvent::Vote(OptionRef::A));
        assert!(reaction(&document).is_none());
        apply(&mut document, &guest(), SessionEvent::Vote(OptionRef::B));
        assert_eq!(reaction(&document), Some(SessionEvent::Reveal));

        apply(&mut document, &guest(), SessionEvent::Reveal);
        assert_eq!(document.phase, SessionPhase::Results);
        assert!(reaction(&document).is_none());

        apply(&mut document, &host(), new_round(RoundIntent::Advance));
        assert_eq!(document.phase, SessionPhase::Voting);
        assert!(document.participants.values().all(|p| p.vote.is_none()));
    }

    #[test]
    fn new_round_is_one_update_resetting_every_vote() {
        let document = lobby();
        let update = plan_update(&document, &host(), &new_round(RoundIntent::Start))
            .unwrap()
            .unwrap();

        assert_eq!(
            update.fields(),
            &[
                SessionField::Phase(SessionPhase::Voting),
                SessionField::CurrentRound(Some(Round::new("Pizza", "Sushi"))),
                SessionField::Vote(host(), None),
                SessionField::Vote(guest(), None),
            ]
        );
    }

    #[test]
    fn only_host_opens_rounds() {
        let document = lobby();
        let err = plan_update(&document, &guest(), &new_round(RoundIntent::Start)).unwrap_err();
        assert_eq!(err, PlanError::NotHost);
    }

    #[test]
    fn host_check_precedes_phase_check() {
        let mut document = lobby();
        apply(&mut document, &host(), new_round(RoundIntent::Start));
        let err = plan_update(&document, &guest(), &new_round(RoundIntent::Advance)).unwrap_err();
        assert_eq!(err, PlanError::NotHost);
    }

    #[test]
    fn rounds_follow_phase_order() {
        let document = lobby();
        let err = plan_update(&document, &host(), &new_round(RoundIntent::Advance)).unwrap_err();
        assert_eq!(
            err,
            PlanError::InvalidTransition(InvalidTransition {
                from: SessionPhase::Lobby,
                event: SessionEventKind::NewRound(RoundIntent::Advance),
            })
        );
    }

    #[test]
    fn second_vote_is_a_no_op() {
        let mut document = lobby();
        apply(&mut document, &host(), new_round(RoundIntent::Start));
        apply(&mut document, &host(), SessionEvent::Vote(OptionRef::A));

        let before = document.clone();
        let second = plan_update(&document, &host(), &SessionEvent::Vote(OptionRef::B)).unwrap();
        assert!(second.is_none());
        assert_eq!(document, before);
    }

    #[test]
    fn voting_outside_voting_phase_is_rejected() {
        let document = lobby();
        let err = plan_update(&document, &guest(), &SessionEvent::Vote(OptionRef::A)).unwrap_err();
        assert!(matches!(err, PlanError::InvalidTransition(_)));

        let stranger = ParticipantId::new("Z");
        let err =
            plan_update(&document, &stranger, &SessionEvent::Vote(OptionRef::A)).unwrap_err();
        assert_eq!(err, PlanError::NotParticipant(stranger));
    }

    #[test]
    fn join_is_idempotent() {
        let document = lobby();
        let event = SessionEvent::Join {
            display_name: "Bo again".into(),
        };
        assert!(plan_update(&document, &guest(), &event).unwrap().is_none());

        let newcomer = ParticipantId::new("C");
        let update = plan_update(&document, &newcomer, &event).unwrap().unwrap();
        assert_eq!(
            update.fields(),
            &[SessionField::Participant(
                newcomer,
                Participant::new("Bo again")
            )]
        );
    }

    #[test]
    fn reveal_is_idempotent_once_in_results() {
        let mut document = lobby();
        apply(&mut document, &host(), new_round(RoundIntent::Start));
        apply(&mut document, &host(), SessionEvent::Vote(OptionRef::A));
        apply(&mut document, &guest(), SessionEvent::Vote(OptionRef::A));
        apply(&mut document, &host(), SessionEvent::Reveal);

        assert!(
            plan_update(&document, &guest(), &SessionEvent::Reveal)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn pending_plan_blocks_second_start() {
        let mut machine = SessionMachine::new();
        machine.observe(lobby());

        let plan = machine.plan(&host(), RoundIntent::Start).unwrap();
        assert_eq!(
            machine.plan(&host(), RoundIntent::Start).unwrap_err(),
            PlanError::AlreadyPending
        );
        assert_eq!(machine.snapshot().pending, Some(RoundIntent::Start));

        machine.abort(plan.id).unwrap();
        assert!(machine.snapshot().pending.is_none());
        assert!(machine.plan(&host(), RoundIntent::Start).is_ok());
    }

    #[test]
    fn commit_replans_against_latest_snapshot() {
        let mut machine = SessionMachine::new();
        machine.observe(lobby());
        let plan = machine.plan(&host(), RoundIntent::Start).unwrap();

        // A participant joined while the question was being fetched.
        let mut latest = lobby();
        latest
            .participants
            .insert(ParticipantId::new("C"), Participant::new("Cy"));
        machine.observe(latest);

        let update = machine
            .commit(plan.id, &host(), Round::new("Tea", "Coffee"))
            .unwrap();
        assert!(
            update
                .fields()
                .contains(&SessionField::Vote(ParticipantId::new("C"), None))
        );
        assert!(machine.snapshot().pending.is_none());
    }

    #[test]
    fn commit_with_wrong_id_keeps_plan() {
        let mut machine = SessionMachine::new();
        machine.observe(lobby());
        let plan = machine.plan(&host(), RoundIntent::Start).unwrap();

        let err = machine
            .commit(Uuid::new_v4(), &host(), Round::new("Tea", "Coffee"))
            .unwrap_err();
        assert!(matches!(err, ApplyError::IdMismatch { .. }));
        assert!(machine.commit(plan.id, &host(), Round::new("Tea", "Coffee")).is_ok());
    }

    #[test]
    fn commit_fails_when_phase_moved_on() {
        let mut machine = SessionMachine::new();
        machine.observe(lobby());
        let plan = machine.plan(&host(), RoundIntent::Start).unwrap();

        let mut moved = lobby();
        apply(&mut moved, &host(), new_round(RoundIntent::Start));
        machine.observe(moved);

        let err = machine
            .commit(plan.id, &host(), Round::new("Tea", "Coffee"))
            .unwrap_err();
        assert!(matches!(
            err,
            ApplyError::Stale(PlanError::InvalidTransition(_))
        ));
    }

    #[test]
    fn abort_clears_pending() {
        let mut machine = SessionMachine::new();
        machine.observe(lobby());
        let plan = machine.plan(&host(), RoundIntent::Start).unwrap();
        machine.abort(plan.id).unwrap();
        assert!(machine.pending.is_none());
        assert_eq!(machine.abort(plan.id), Err(AbortError::NoPending));
    }

    fn voting_round() -> SessionDocument {
        let mut document = lobby();
        apply(&mut document, &host(), new_round(RoundIntent::Start));
        document
    }

    #[test]
    fn vote_before_echo_blocks_a_second_vote() {
        let mut machine = SessionMachine::new();
        machine.observe(voting_round());

        let first = machine.record_vote(&guest(), OptionRef::A).unwrap();
        assert!(first.is_some());
        // The cache still shows no vote; the recorded one wins anyway.
        let second = machine.record_vote(&guest(), OptionRef::B).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn local_vote_survives_stale_snapshots_and_clears_on_new_round() {
        let mut machine = SessionMachine::new();
        let mut document = voting_round();
        machine.observe(document.clone());
        machine.record_vote(&guest(), OptionRef::A).unwrap();

        // A snapshot written before the vote landed.
        machine.observe(document.clone());
        assert!(machine.record_vote(&guest(), OptionRef::B).unwrap().is_none());

        apply(&mut document, &guest(), SessionEvent::Vote(OptionRef::A));
        machine.observe(document.clone());
        apply(&mut document, &host(), SessionEvent::Vote(OptionRef::B));
        apply(&mut document, &host(), SessionEvent::Reveal);
        apply(&mut document, &host(), new_round(RoundIntent::Advance));

        // Results were never observed; the reset vote still opens the round.
        machine.observe(document);
        assert!(machine.record_vote(&guest(), OptionRef::B).unwrap().is_some());
    }

    #[test]
    fn failed_vote_write_can_be_retried() {
        let mut machine = SessionMachine::new();
        machine.observe(voting_round());
        machine.record_vote(&guest(), OptionRef::A).unwrap();
        machine.forget_vote(&guest(), OptionRef::A);
        assert!(machine.record_vote(&guest(), OptionRef::A).unwrap().is_some());
    }
}
