//! Podium derivation from the bracket topology.

use crate::model::{CompetitorId, Match};
use serde::{Deserialize, Serialize};

/// Final standings of a tournament. A place is [`None`] when it can't be determined.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Standings {
    pub winner: Option<CompetitorId>,
    pub runner_up: Option<CompetitorId>,
    pub third_place: Option<CompetitorId>,
}

impl Standings {
    /// The determined places, starting from 1st.
    pub fn podium(&self) -> impl Iterator<Item = (u8, CompetitorId)> {
        [self.winner, self.runner_up, self.third_place]
            .into_iter()
            .zip(1..)
            .filter_map(|(competitor, place)| Some((place, competitor?)))
    }
}

/// Derives the standings from the matches of a tournament.
///
/// The final is the only regular match of the last round: its winner is 1st and its loser 2nd.
/// The 3rd place goes to the first loser (by position) of the previous round who isn't 2nd.
/// Extra matches and byes never decide a place.
pub fn derive(matches: &[Match]) -> Standings {
    let mut standings = Standings::default();

    let Some(last_round) = regular(matches).map(|m| m.round).max() else {
        return standings;
    };

    // Final and semifinals (quarterfinals and before don't give a place)
    let mut final_round = regular(matches).filter(|m| m.round == last_round);
    let (Some(final_match), None) = (final_round.next(), final_round.next()) else {
        return standings;
    };
    if !final_match.completed {
        return standings;
    }
    standings.winner = final_match.winner;
    standings.runner_up = final_match.loser();

    if last_round > 1 {
        let mut semifinals: Vec<_> = regular(matches)
            .filter(|m| m.round == last_round - 1 && m.completed && !m.is_bye)
            .collect();
        semifinals.sort_by_key(|m| m.position);

        standings.third_place = semifinals
            .into_iter()
            .filter_map(Match::loser)
            .find(|&loser| Some(loser) != standings.runner_up);
    }

    standings
}

#[inline]
fn regular(matches: &[Match]) -> impl Iterator<Item = &Match> {
    matches.iter().filter(|m| !m.is_qualifier())
}
