use crate::state::{
    results::{RoundResults, tally},
    session::{OptionRef, ParticipantId, SessionDocument, SessionPhase},
    state_machine::{RoundIntent, Snapshot},
};

/// What one client shows: the shared document seen through its own identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionView {
    /// Latest snapshot of the shared document.
    pub document: SessionDocument,
    /// Identity of the viewing client.
    pub participant_id: ParticipantId,
    /// Whether the viewer created the session.
    pub is_host: bool,
    /// The viewer's recorded vote in the current round.
    pub my_vote: Option<OptionRef>,
    /// Present once the round is revealed.
    pub results: Option<RoundResults>,
    /// Round transition this client is waiting on.
    pub pending: Option<RoundIntent>,
}

impl SessionView {
    /// Derive the view of `participant` from a machine snapshot.
    pub fn derive(snapshot: &Snapshot, participant: &ParticipantId) -> Option<Self> {
        let document = snapshot.document.as_ref()?;
        Some(Self::of(document, participant, snapshot.pending))
    }

    /// View of `participant` on `document`.
    pub fn of(
        document: &SessionDocument,
        participant: &ParticipantId,
        pending: Option<RoundIntent>,
    ) -> Self {
        Self {
            is_host: document.is_host(participant),
            my_vote: document
                .participant(participant)
                .and_then(|entry| entry.vote),
            results: (document.phase == SessionPhase::Results).then(|| tally(document)),
            pending,
            participant_id: participant.clone(),
            document: document.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::session::{Participant, Round, SessionCode};

    #[test]
    fn view_reflects_identity_and_results() {
        let host = ParticipantId::new("H");
        let guest = ParticipantId::new("B");
        let mut document =
            SessionDocument::lobby(SessionCode::parse("AB12CD").unwrap(), host.clone(), "Ann");
        document.participants.insert(
            guest.clone(),
            Participant {
                display_name: "Bo".into(),
                vote: None,
            },
        );
        document.phase = SessionPhase::Results;
        document.current_round = Some(Round::new("Pizza", "Sushi"));
        for (id, option) in [(&host, OptionRef::A), (&guest, OptionRef::B)] {
            if let Some(entry) = document.participants.get_mut(id) {
                entry.vote = Some(option);
            }
        }

        let snapshot = Snapshot {
            document: Some(document),
            version: 3,
            pending: None,
        };

        let host_view = SessionView::derive(&snapshot, &host).unwrap();
        assert!(host_view.is_host);
        assert_eq!(host_view.my_vote, Some(OptionRef::A));
        assert_eq!(host_view.results.unwrap().option_a.percentage, 50);

        let guest_view = SessionView::derive(&snapshot, &guest).unwrap();
        assert!(!guest_view.is_host);
        assert_eq!(guest_view.my_vote, Some(OptionRef::B));
    }

    #[test]
    fn no_view_before_first_snapshot() {
        let snapshot = Snapshot {
            document: None,
            version: 0,
            pending: None,
        };
        assert!(SessionView::derive(&snapshot, &ParticipantId::new("H")).is_none());
    }
}
