//! Canonical shape of the shared session document and the field-level
//! updates clients write into it.

use std::fmt;

use indexmap::IndexMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use uuid::Uuid;

use crate::dao::models::{FieldPath, MergePatch};

/// Number of characters in a session code.
pub const SESSION_CODE_LENGTH: usize = 6;
const SESSION_CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

const FIELD_PHASE: &str = "phase";
const FIELD_CURRENT_ROUND: &str = "currentRound";
const FIELD_PARTICIPANTS: &str = "participants";
const FIELD_VOTE: &str = "vote";

/// Opaque, self-asserted participant identifier. Carries no trust.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParticipantId(String);

impl ParticipantId {
    /// Wrap an existing identifier.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh globally unique identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Borrow the identifier as a string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier can be used as a key in field merges.
    pub fn is_addressable(&self) -> bool {
        participant_path(self).validate().is_ok()
    }
}

impl fmt::Display for ParticipantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Short human-typeable key of a session document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionCode(String);

/// Returned when a typed session code is not made of the expected characters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("session code must be {SESSION_CODE_LENGTH} letters or digits (got `{0}`)")]
pub struct InvalidSessionCode(pub String);

impl SessionCode {
    /// Draw a random code from `[A-Z0-9]`.
    pub fn generate() -> Self {
        let mut rng = rand::rng();
        let code = (0..SESSION_CODE_LENGTH)
            .map(|_| SESSION_CODE_ALPHABET[rng.random_range(0..SESSION_CODE_ALPHABET.len())] as char)
            .collect();
        Self(code)
    }

    /// Normalise user input (trim, upper-case) and validate it.
    pub fn parse(input: &str) -> Result<Self, InvalidSessionCode> {
        let normalized = input.trim().to_ascii_uppercase();
        let valid = normalized.len() == SESSION_CODE_LENGTH
            && normalized
                .bytes()
                .all(|byte| SESSION_CODE_ALPHABET.contains(&byte));
        if valid {
            Ok(Self(normalized))
        } else {
            Err(InvalidSessionCode(input.to_string()))
        }
    }

    /// Borrow the code as the storage key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Discriminant of the session state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionPhase {
    /// Participants gather; no round yet.
    Lobby,
    /// A round is open and votes are being collected.
    Voting,
    /// Every participant voted; results are shown.
    Results,
}

impl SessionPhase {
    /// Wire representation of the phase.
    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Lobby => "LOBBY",
            SessionPhase::Voting => "VOTING",
            SessionPhase::Results => "RESULTS",
        }
    }
}

/// One of the two options of a round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OptionRef {
    /// The first option, stored as `optionA`.
    #[serde(rename = "optionA")]
    A,
    /// The second option, stored as `optionB`.
    #[serde(rename = "optionB")]
    B,
}

impl OptionRef {
    /// Wire representation of the option.
    pub fn as_str(self) -> &'static str {
        match self {
            OptionRef::A => "optionA",
            OptionRef::B => "optionB",
        }
    }
}

/// The question of a round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Round {
    /// Text of the first option.
    pub option_a: String,
    /// Text of the second option.
    pub option_b: String,
}

impl Round {
    /// Build a round from its two options.
    pub fn new(option_a: impl Into<String>, option_b: impl Into<String>) -> Self {
        Self {
            option_a: option_a.into(),
            option_b: option_b.into(),
        }
    }

    /// Text of the given option.
    pub fn option(&self, option: OptionRef) -> &str {
        match option {
            OptionRef::A => &self.option_a,
            OptionRef::B => &self.option_b,
        }
    }

    fn to_value(&self) -> Value {
        json!({ "optionA": self.option_a, "optionB": self.option_b })
    }
}

/// Entry of the participants map.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// Name shown to the other participants.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Choice in the current round, `None` until voted.
    #[serde(default)]
    pub vote: Option<OptionRef>,
}

impl Participant {
    /// A participant who has not voted yet.
    pub fn new(display_name: impl Into<String>) -> Self {
        Self {
            display_name: display_name.into(),
            vote: None,
        }
    }

    fn to_value(&self) -> Value {
        json!({ "name": self.display_name, FIELD_VOTE: vote_value(self.vote) })
    }
}

/// Replicated record holding all state for one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDocument {
    /// Session code; always equal to the storage key.
    pub id: SessionCode,
    /// Creator of the session, the only one allowed to open rounds.
    pub host_id: ParticipantId,
    /// Current phase.
    pub phase: SessionPhase,
    /// Open or revealed round; `None` exactly while in the lobby.
    #[serde(default)]
    pub current_round: Option<Round>,
    /// Everyone who ever joined, in join order. Entries are never removed.
    pub participants: IndexMap<ParticipantId, Participant>,
}

/// Reasons a delivered snapshot cannot be used as session state.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// The JSON does not decode into a session document.
    #[error("session document has an unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),
    /// The document id differs from the subscribed key.
    #[error("document `{found}` was delivered for session `{expected}`")]
    KeyMismatch {
        expected: SessionCode,
        found: SessionCode,
    },
    /// The host has no participant entry.
    #[error("host `{host_id}` is missing from the participants")]
    MissingHost { host_id: ParticipantId },
    /// A round is present in the lobby, or absent outside it.
    #[error("phase {} does not agree with the current round", .phase.as_str())]
    RoundMismatch { phase: SessionPhase },
    /// Votes exist before any round was opened.
    #[error("votes are recorded while the session is in the lobby")]
    VotesInLobby,
    /// A participant key cannot be used in a dotted field path.
    #[error("participant id `{id}` cannot be addressed by field merges")]
    UnaddressableParticipant { id: ParticipantId },
    /// The document was seen once and later reported missing.
    #[error("session document disappeared from the store")]
    Removed,
}

impl SessionDocument {
    /// Fresh lobby document created by `host`.
    pub fn lobby(id: SessionCode, host: ParticipantId, display_name: impl Into<String>) -> Self {
        let mut participants = IndexMap::new();
        participants.insert(host.clone(), Participant::new(display_name));
        Self {
            id,
            host_id: host,
            phase: SessionPhase::Lobby,
            current_round: None,
            participants,
        }
    }

    /// Decode a raw snapshot delivered for `key` and check its invariants.
    pub fn decode(key: &SessionCode, value: Value) -> Result<Self, SnapshotError> {
        let document: SessionDocument = serde_json::from_value(value)?;
        document.check(key)?;
        Ok(document)
    }

    fn check(&self, key: &SessionCode) -> Result<(), SnapshotError> {
        if &self.id != key {
            return Err(SnapshotError::KeyMismatch {
                expected: key.clone(),
                found: self.id.clone(),
            });
        }

        if !self.participants.contains_key(&self.host_id) {
            return Err(SnapshotError::MissingHost {
                host_id: self.host_id.clone(),
            });
        }

        let has_round = self.current_round.is_some();
        let expects_round = self.phase != SessionPhase::Lobby;
        if has_round != expects_round {
            return Err(SnapshotError::RoundMismatch { phase: self.phase });
        }

        if self.phase == SessionPhase::Lobby
            && self.participants.values().any(|p| p.vote.is_some())
        {
            return Err(SnapshotError::VotesInLobby);
        }

        if let Some(id) = self.participants.keys().find(|id| !id.is_addressable()) {
            return Err(SnapshotError::UnaddressableParticipant { id: id.clone() });
        }

        Ok(())
    }

    /// Serialise the document for a create-if-absent write.
    pub fn to_value(&self) -> Value {
        let participants = self
            .participants
            .iter()
            .map(|(id, participant)| (id.to_string(), participant.to_value()))
            .collect::<Map<_, _>>();

        json!({
            "id": self.id.as_str(),
            "hostId": self.host_id.as_str(),
            FIELD_PHASE: self.phase.as_str(),
            FIELD_CURRENT_ROUND: self.current_round.as_ref().map(Round::to_value),
            FIELD_PARTICIPANTS: participants,
        })
    }

    /// Whether `id` created the session.
    pub fn is_host(&self, id: &ParticipantId) -> bool {
        &self.host_id == id
    }

    /// Look up a participant entry.
    pub fn participant(&self, id: &ParticipantId) -> Option<&Participant> {
        self.participants.get(id)
    }

    /// True when every participant entry carries a vote.
    pub fn all_voted(&self) -> bool {
        self.participants.values().all(|p| p.vote.is_some())
    }
}

/// One field assignment of a [`SessionUpdate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionField {
    /// `phase`
    Phase(SessionPhase),
    /// `currentRound`, cleared with `None`.
    CurrentRound(Option<Round>),
    /// A whole `participants.<id>` entry.
    Participant(ParticipantId, Participant),
    /// `participants.<id>.vote` only.
    Vote(ParticipantId, Option<OptionRef>),
}

/// Set of field assignments written to the session document in one merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionUpdate {
    fields: Vec<SessionField>,
}

impl SessionUpdate {
    /// Start an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an assignment and return the update for chaining.
    pub fn with(mut self, field: SessionField) -> Self {
        self.fields.push(field);
        self
    }

    /// Borrow the assignments in write order.
    pub fn fields(&self) -> &[SessionField] {
        &self.fields
    }

    /// Render the update as a backend-neutral merge patch.
    pub fn to_merge_patch(&self) -> MergePatch {
        self.fields
            .iter()
            .fold(MergePatch::new(), |patch, field| match field {
                SessionField::Phase(phase) => patch.set(
                    FieldPath::root(FIELD_PHASE),
                    Value::String(phase.as_str().into()),
                ),
                SessionField::CurrentRound(round) => patch.set(
                    FieldPath::root(FIELD_CURRENT_ROUND),
                    round.as_ref().map_or(Value::Null, Round::to_value),
                ),
                SessionField::Participant(id, participant) => {
                    patch.set(participant_path(id), participant.to_value())
                }
                SessionField::Vote(id, vote) => {
                    patch.set(participant_path(id).child(FIELD_VOTE), vote_value(*vote))
                }
            })
    }

    /// Apply the update to a local copy, mirroring what the store does.
    pub fn apply(&self, document: &mut SessionDocument) {
        for field in &self.fields {
            match field {
                SessionField::Phase(phase) => document.phase = *phase,
                SessionField::CurrentRound(round) => document.current_round = round.clone(),
                SessionField::Participant(id, participant) => {
                    document
                        .participants
                        .insert(id.clone(), participant.clone());
                }
                SessionField::Vote(id, vote) => {
                    if let Some(entry) = document.participants.get_mut(id) {
                        entry.vote = *vote;
                    }
                }
            }
        }
    }
}

fn participant_path(id: &ParticipantId) -> FieldPath {
    FieldPath::root(FIELD_PARTICIPANTS).child(id.as_str())
}

fn vote_value(vote: Option<OptionRef>) -> Value {
    vote.map_or(Value::Null, |option| Value::String(option.as_str().into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code() -> SessionCode {
        SessionCode::parse("AB12CD").unwrap()
    }

    #[test]
    fn decodes_wire_document() {
        let raw = json!({
            "id": "AB12CD",
            "hostId": "H",
            "phase": "VOTING",
            "currentRound": {"optionA": "Pizza", "optionB": "Sushi"},
            "participants": {
                "H": {"name": "Ann", "vote": "optionA"},
                "B": {"name": "Bo", "vote": null}
            }
        });

        let document = SessionDocument::decode(&code(), raw).unwrap();
        assert_eq!(document.phase, SessionPhase::Voting);
        assert_eq!(
            document.current_round,
            Some(Round::new("Pizza", "Sushi"))
        );
        assert_eq!(
            document.participant(&ParticipantId::new("H")).unwrap().vote,
            Some(OptionRef::A)
        );
        assert!(!document.all_voted());
    }

    #[test]
    fn lobby_document_round_trips_through_wire_value() {
        let document = SessionDocument::lobby(code(), ParticipantId::new("H"), "Ann");
        let value = document.to_value();
        assert_eq!(
            value,
            json!({
                "id": "AB12CD",
                "hostId": "H",
                "phase": "LOBBY",
                "currentRound": null,
                "participants": {"H": {"name": "Ann", "vote": null}}
            })
        );
        assert_eq!(SessionDocument::decode(&code(), value).unwrap(), document);
    }

    #[test]
    fn missing_participants_is_malformed() {
        let raw = json!({"id": "AB12CD", "hostId": "H", "phase": "LOBBY"});
        assert!(matches!(
            SessionDocument::decode(&code(), raw),
            Err(SnapshotError::Shape(_))
        ));
    }

    #[test]
    fn invariant_violations_are_malformed() {
        let missing_host = json!({
            "id": "AB12CD", "hostId": "H", "phase": "LOBBY",
            "participants": {"B": {"name": "Bo", "vote": null}}
        });
        assert!(matches!(
            SessionDocument::decode(&code(), missing_host),
            Err(SnapshotError::MissingHost { .. })
        ));

        let voting_without_round = json!({
            "id": "AB12CD", "hostId": "H", "phase": "VOTING", "currentRound": null,
            "participants": {"H": {"name": "Ann", "vote": null}}
        });
        assert!(matches!(
            SessionDocument::decode(&code(), voting_without_round),
            Err(SnapshotError::RoundMismatch { phase: SessionPhase::Voting })
        ));

        let lobby_vote = json!({
            "id": "AB12CD", "hostId": "H", "phase": "LOBBY",
            "participants": {"H": {"name": "Ann", "vote": "optionB"}}
        });
        assert!(matches!(
            SessionDocument::decode(&code(), lobby_vote),
            Err(SnapshotError::VotesInLobby)
        ));

        let wrong_key = json!({
            "id": "ZZZZZZ", "hostId": "H", "phase": "LOBBY",
            "participants": {"H": {"name": "Ann", "vote": null}}
        });
        assert!(matches!(
            SessionDocument::decode(&code(), wrong_key),
            Err(SnapshotError::KeyMismatch { .. })
        ));
    }

    #[test]
    fn update_renders_flat_field_paths() {
        let update = SessionUpdate::new()
            .with(SessionField::Phase(SessionPhase::Voting))
            .with(SessionField::CurrentRound(Some(Round::new("Tea", "Coffee"))))
            .with(SessionField::Vote(ParticipantId::new("B"), None));

        let patch = update.to_merge_patch();
        let paths = patch
            .fields()
            .iter()
            .map(|(path, _)| path.dotted())
            .collect::<Vec<_>>();
        assert_eq!(paths, ["phase", "currentRound", "participants.B.vote"]);
        assert_eq!(patch.fields()[0].1, json!("VOTING"));
        assert_eq!(
            patch.fields()[1].1,
            json!({"optionA": "Tea", "optionB": "Coffee"})
        );
        assert_eq!(patch.fields()[2].1, Value::Null);
    }

    #[test]
    fn session_codes_are_normalised() {
        assert_eq!(SessionCode::parse(" ab12cd ").unwrap().as_str(), "AB12CD");
        assert!(SessionCode::parse("AB12C").is_err());
        assert!(SessionCode::parse("AB-2CD").is_err());

        let generated = SessionCode::generate();
        assert_eq!(SessionCode::parse(generated.as_str()).unwrap(), generated);
    }

    #[test]
    fn generated_participant_ids_are_addressable() {
        assert!(ParticipantId::generate().is_addressable());
        assert!(!ParticipantId::new("a.b").is_addressable());
        assert!(!ParticipantId::new("").is_addressable());
    }
}
