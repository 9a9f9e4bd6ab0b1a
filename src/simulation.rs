//! Rating based simulation of the matches of autonomous tournaments.

use crate::model::{Competitor, CompetitorId, DecisionMethod, Match, MatchId, RoundRecord};
use crate::config::RoundsToWin;
use crate::{derive_rng, Salt, Seed};
use chrono::{DateTime, Utc};
use log::debug;
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result of a simulated match.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SimulationOutcome {
    pub winner: CompetitorId,
    pub rounds_played: u8,
    /// Rounds won by the first competitor.
    pub rounds_won1: u8,
    /// Rounds won by the second competitor.
    pub rounds_won2: u8,
    pub round_log: Vec<RoundRecord>,
    /// Human-readable summary, e.g. `"Atlas won 2-1 in 3 rounds"`.
    pub summary: String,
}

#[derive(Error, Debug)]
#[cfg_attr(test, derive(Eq, PartialEq))]
#[non_exhaustive]
pub enum SimulationError {
    /// One of the two competitors of the match is missing.
    #[error("match {0} can't be simulated without two competitors")]
    MissingCompetitor(MatchId),
}

/// Simulates match `match_id` between `competitor1` and `competitor2`.
///
/// Rounds are played until a competitor wins `rounds_to_win` of them. The first competitor
/// wins a round with probability `rating1 / (rating1 + rating2)`. The random stream is derived
/// from `seed` and `match_id`, so the same match always has the same outcome.
pub fn simulate(
    seed: &Seed,
    match_id: MatchId,
    competitor1: Option<&Competitor>,
    competitor2: Option<&Competitor>,
    rounds_to_win: RoundsToWin,
) -> Result<SimulationOutcome, SimulationError> {
    let (Some(competitor1), Some(competitor2)) = (competitor1, competitor2) else {
        return Err(SimulationError::MissingCompetitor(match_id));
    };

    let mut rng = derive_rng(seed, Salt::Match(match_id));
    Ok(simulate_rounds(&mut rng, competitor1, competitor2, rounds_to_win))
}

fn simulate_rounds(
    rng: &mut impl Rng,
    competitor1: &Competitor,
    competitor2: &Competitor,
    rounds_to_win: RoundsToWin,
) -> SimulationOutcome {
    let rating1 = competitor1.rating.get() as f64;
    let rating2 = competitor2.rating.get() as f64;
    let probability1 = rating1 / (rating1 + rating2);

    let mut round_log = Vec::with_capacity(rounds_to_win.max_rounds() as usize);
    let (mut won1, mut won2) = (0u8, 0u8);
    while won1 < rounds_to_win.get() && won2 < rounds_to_win.get() {
        let winner = if rng.gen::<f64>() < probability1 {
            won1 += 1;
            competitor1.id
        } else {
            won2 += 1;
            competitor2.id
        };
        round_log.push(RoundRecord {
            round: won1 + won2,
            winner,
        });
    }

    let rounds_played = won1 + won2;
    let (winner, best, worst) = if won1 > won2 {
        (competitor1, won1, won2)
    } else {
        (competitor2, won2, won1)
    };

    SimulationOutcome {
        winner: winner.id,
        rounds_played,
        rounds_won1: won1,
        rounds_won2: won2,
        round_log,
        summary: format!(
            "{} won {}-{} in {} rounds",
            winner.name, best, worst, rounds_played
        ),
    }
}

/// Records `outcome` on `m` and completes it as an automatic decision.
pub fn apply_outcome(m: &mut Match, outcome: SimulationOutcome, at: DateTime<Utc>) {
    debug!("match {} simulated: {}", m.id, outcome.summary);

    m.rounds_played = outcome.rounds_played;
    m.rounds_won1 = outcome.rounds_won1;
    m.rounds_won2 = outcome.rounds_won2;
    m.round_log = outcome.round_log;
    m.outcome_type = None;
    m.outcome_description = Some(outcome.summary);
    m.complete(outcome.winner, DecisionMethod::Automatic, at);
}
