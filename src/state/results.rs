//! Vote tally shown once a round is revealed.

use crate::state::session::{OptionRef, SessionDocument};

/// Tally of one option.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptionTally {
    /// Number of participants who picked this option.
    pub votes: usize,
    /// Share of all participants, rounded to the nearest integer.
    pub percentage: u8,
    /// Display names of the voters, in join order.
    pub voters: Vec<String>,
}

/// Tally of both options of the current round.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundResults {
    /// Tally of `optionA`.
    pub option_a: OptionTally,
    /// Tally of `optionB`.
    pub option_b: OptionTally,
    /// Number of participants the percentages are relative to.
    pub participants: usize,
}

impl RoundResults {
    /// Tally of the given option.
    pub fn option(&self, option: OptionRef) -> &OptionTally {
        match option {
            OptionRef::A => &self.option_a,
            OptionRef::B => &self.option_b,
        }
    }
}

/// Count votes per option.
///
/// Percentages are relative to every participant, not only to voters, so
/// they sum to 100 only once everybody voted.
pub fn tally(document: &SessionDocument) -> RoundResults {
    let participants = document.participants.len();
    let mut results = RoundResults {
        participants,
        ..RoundResults::default()
    };

    for participant in document.participants.values() {
        let tally = match participant.vote {
            Some(OptionRef::A) => &mut results.option_a,
            Some(OptionRef::B) => &mut results.option_b,
            None => continue,
        };
        tally.votes += 1;
        tally.voters.push(participant.display_name.clone());
    }

    results.option_a.percentage = percentage(results.option_a.votes, participants);
    results.option_b.percentage = percentage(results.option_b.votes, participants);
    results
}

fn percentage(votes: usize, participants: usize) -> u8 {
    if participants == 0 {
        return 0;
    }
    // Integer half-up rounding of votes * 100 / participants.
    ((votes * 200 + participants) / (participants * 2)) as u8
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap;

    use super::*;
    use crate::state::session::{
        Participant, ParticipantId, Round, SessionCode, SessionPhase,
    };

    fn document(votes: &[(&str, Option<OptionRef>)]) -> SessionDocument {
        let participants = votes
            .iter()
            .map(|(name, vote)| {
                (
                    ParticipantId::new(*name),
                    Participant {
                        display_name: (*name).to_string(),
                        vote: *vote,
                    },
                )
            })
            .collect::<IndexMap<_, _>>();

        SessionDocument {
            id: SessionCode::parse("AB12CD").unwrap(),
            host_id: ParticipantId::new(votes.first().map_or("H", |(name, _)| *name)),
            phase: SessionPhase::Results,
            current_round: Some(Round::new("Pizza", "Sushi")),
            participants,
        }
    }

    #[test]
    fn even_split() {
        let results = tally(&document(&[
            ("Ann", Some(OptionRef::A)),
            ("Bo", Some(OptionRef::B)),
        ]));

        assert_eq!(results.option_a.percentage, 50);
        assert_eq!(results.option_b.percentage, 50);
        assert_eq!(results.option_a.voters, ["Ann"]);
        assert_eq!(results.option(OptionRef::B).voters, ["Bo"]);
        assert_eq!(
            results.option_a.votes + results.option_b.votes,
            results.participants
        );
    }

    #[test]
    fn zero_participants_yield_zero_percent() {
        let results = tally(&document(&[]));
        assert_eq!(results.option_a.percentage, 0);
        assert_eq!(results.option_b.percentage, 0);
        assert_eq!(results.participants, 0);
    }

    #[test]
    fn percentages_are_relative_to_all_participants() {
        let results = tally(&document(&[
            ("Ann", Some(OptionRef::A)),
            ("Bo", Some(OptionRef::A)),
            ("Cy", None),
        ]));
        assert_eq!(results.option_a.votes, 2);
        assert_eq!(results.option_a.percentage, 67);
        assert_eq!(results.option_b.percentage, 0);
    }

    #[test]
    fn rounding_is_half_up() {
        let names = (0..8).map(|i| format!("P{i}")).collect::<Vec<_>>();
        let votes = names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), (i == 0).then_some(OptionRef::B)))
            .collect::<Vec<_>>();

        // 1 of 8 is 12.5%.
        let results = tally(&document(&votes));
        assert_eq!(results.option_b.percentage, 13);
    }
}
