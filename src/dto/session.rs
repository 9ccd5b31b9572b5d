//! DTO definitions used by the session REST API, SSE payloads and documentation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::{
    dto::validation::{validate_display_name, validate_session_code},
    state::{
        results::{OptionTally, RoundResults},
        session::{OptionRef, Participant, ParticipantId, Round, SessionPhase},
        state_machine::RoundIntent,
        view::SessionView,
    },
};

/// Payload to create a fresh session hosted by this device.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct CreateSessionRequest {
    /// Display name of this device's participant.
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
}

/// Payload to join (or create) the session with the given code.
#[derive(Debug, Deserialize, ToSchema, Validate)]
pub struct JoinSessionRequest {
    /// Display name of this device's participant.
    #[validate(custom(function = "validate_display_name"))]
    pub name: String,
    /// Six letters or digits, case-insensitive.
    #[validate(custom(function = "validate_session_code"))]
    pub code: String,
}

/// Payload to vote for one option of the current round.
#[derive(Debug, Deserialize, ToSchema)]
pub struct VoteRequest {
    /// Chosen option.
    pub option: OptionDto,
}

/// Option of a round as exposed on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub enum OptionDto {
    /// First option.
    #[serde(rename = "optionA")]
    A,
    /// Second option.
    #[serde(rename = "optionB")]
    B,
}

impl From<OptionDto> for OptionRef {
    fn from(value: OptionDto) -> Self {
        match value {
            OptionDto::A => OptionRef::A,
            OptionDto::B => OptionRef::B,
        }
    }
}

impl From<OptionRef> for OptionDto {
    fn from(value: OptionRef) -> Self {
        match value {
            OptionRef::A => OptionDto::A,
            OptionRef::B => OptionDto::B,
        }
    }
}

/// Phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseDto {
    /// Waiting for the host to open the first round.
    Lobby,
    /// Collecting votes.
    Voting,
    /// Showing the tally.
    Results,
}

impl From<SessionPhase> for PhaseDto {
    fn from(value: SessionPhase) -> Self {
        match value {
            SessionPhase::Lobby => PhaseDto::Lobby,
            SessionPhase::Voting => PhaseDto::Voting,
            SessionPhase::Results => PhaseDto::Results,
        }
    }
}

/// Round transition the local host is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum PendingRoundDto {
    /// First round from the lobby.
    Start,
    /// Next round from the results.
    Advance,
}

impl From<RoundIntent> for PendingRoundDto {
    fn from(value: RoundIntent) -> Self {
        match value {
            RoundIntent::Start => PendingRoundDto::Start,
            RoundIntent::Advance => PendingRoundDto::Advance,
        }
    }
}

/// Question of the current round.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct RoundDto {
    /// Text of `optionA`.
    pub option_a: String,
    /// Text of `optionB`.
    pub option_b: String,
}

impl From<Round> for RoundDto {
    fn from(value: Round) -> Self {
        Self {
            option_a: value.option_a,
            option_b: value.option_b,
        }
    }
}

/// One participant as listed in the session.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantDto {
    /// Participant identifier.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Whether a vote is recorded; the choice itself is only revealed in results.
    pub has_voted: bool,
}

impl From<(ParticipantId, Participant)> for ParticipantDto {
    fn from((id, participant): (ParticipantId, Participant)) -> Self {
        Self {
            id: id.to_string(),
            name: participant.display_name,
            has_voted: participant.vote.is_some(),
        }
    }
}

/// Tally of one option.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct OptionResultDto {
    /// Number of votes for the option.
    pub votes: usize,
    /// Share of all participants, rounded to the nearest integer.
    pub percentage: u8,
    /// Display names of the voters.
    pub voters: Vec<String>,
}

impl From<OptionTally> for OptionResultDto {
    fn from(value: OptionTally) -> Self {
        Self {
            votes: value.votes,
            percentage: value.percentage,
            voters: value.voters,
        }
    }
}

/// Results of a revealed round.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ResultsDto {
    /// Tally of `optionA`.
    pub option_a: OptionResultDto,
    /// Tally of `optionB`.
    pub option_b: OptionResultDto,
    /// Participants the percentages are relative to.
    pub participants: usize,
}

impl From<RoundResults> for ResultsDto {
    fn from(value: RoundResults) -> Self {
        Self {
            option_a: value.option_a.into(),
            option_b: value.option_b.into(),
            participants: value.participants,
        }
    }
}

/// Session as seen by this device.
#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionViewDto {
    /// Session code.
    pub code: String,
    /// Identity of this device.
    pub participant_id: String,
    /// Creator of the session.
    pub host_id: String,
    /// Current phase.
    pub phase: PhaseDto,
    /// Open or revealed round.
    pub current_round: Option<RoundDto>,
    /// Participants in join order.
    pub participants: Vec<ParticipantDto>,
    /// Whether this device hosts the session.
    pub is_host: bool,
    /// This device's vote in the current round.
    pub my_vote: Option<OptionDto>,
    /// Tally, present once the round is revealed.
    pub results: Option<ResultsDto>,
    /// Round transition this device is preparing.
    pub pending_round: Option<PendingRoundDto>,
}

impl From<SessionView> for SessionViewDto {
    fn from(value: SessionView) -> Self {
        let document = value.document;
        Self {
            code: document.id.to_string(),
            participant_id: value.participant_id.to_string(),
            host_id: document.host_id.to_string(),
            phase: document.phase.into(),
            current_round: document.current_round.map(Into::into),
            participants: document.participants.into_iter().map(Into::into).collect(),
            is_host: value.is_host,
            my_vote: value.my_vote.map(Into::into),
            results: value.results.map(Into::into),
            pending_round: value.pending.map(Into::into),
        }
    }
}

/// Acknowledgement returned by intents whose effect arrives through the stream.
#[derive(Debug, Serialize, ToSchema)]
pub struct ActionResponse {
    /// Short confirmation.
    pub message: String,
}

impl ActionResponse {
    /// Build a response carrying `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
