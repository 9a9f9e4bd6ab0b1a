//! Plain data records shared between the engine and its store.
//!
//! Cross-entity references are ids; resolving them is a store query.

use crate::Seed;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use thiserror::Error;

macro_rules! id_type {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl Display for $name {
            #[inline]
            fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Identity of a competitor.
    CompetitorId
);
id_type!(
    /// Identity of a tournament.
    TournamentId
);
id_type!(
    /// Identity of a match.
    MatchId
);

/// Lowest accepted rating.
pub const MIN_RATING: i32 = 1;

/// Highest accepted rating.
pub const MAX_RATING: i32 = 100;

/// Rating given to competitors created without one.
pub const DEFAULT_RATING: i32 = 50;

#[derive(Error, Debug)]
#[cfg_attr(test, derive(Eq, PartialEq))]
#[non_exhaustive]
pub enum ModelError {
    /// The rating is outside of [`MIN_RATING`]..=[`MAX_RATING`].
    #[error("rating {0} is out of range (1..=100)")]
    RatingOutOfRange(i32),
}

/// Skill estimation of a competitor, only used by the outcome simulator.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "i32", into = "i32")]
pub struct Rating(i32);

impl Rating {
    /// Creates a new rating, checking its bounds.
    #[inline]
    pub fn new(value: i32) -> Result<Rating, ModelError> {
        if (MIN_RATING..=MAX_RATING).contains(&value) {
            Ok(Rating(value))
        } else {
            Err(ModelError::RatingOutOfRange(value))
        }
    }

    #[inline(always)]
    pub fn get(self) -> i32 {
        self.0
    }
}

impl Default for Rating {
    #[inline(always)]
    fn default() -> Self {
        Rating(DEFAULT_RATING)
    }
}

impl TryFrom<i32> for Rating {
    type Error = ModelError;

    #[inline]
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        Rating::new(value)
    }
}

impl From<Rating> for i32 {
    #[inline(always)]
    fn from(rating: Rating) -> Self {
        rating.0
    }
}

/// A competitor of the roster.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Competitor {
    pub id: CompetitorId,
    pub name: String,
    pub team: String,
    pub category: String,
    pub active: bool,
    pub rating: Rating,
    /// Number of extra matches played in the current tournament run.
    pub extra_match_count: u32,
}

impl Competitor {
    /// Creates an active competitor with the default rating.
    pub fn new(
        id: CompetitorId,
        name: impl Into<String>,
        team: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        Competitor {
            id,
            name: name.into(),
            team: team.into(),
            category: category.into(),
            active: true,
            rating: Rating::default(),
            extra_match_count: 0,
        }
    }

    #[inline]
    pub fn with_rating(mut self, rating: Rating) -> Self {
        self.rating = rating;
        self
    }
}

/// How matches of a tournament are decided.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum CombatMode {
    /// Matches are simulated from the competitors' ratings.
    Autonomous,
    /// Matches are decided by a judge.
    #[default]
    ManualArbitration,
}

/// How the two competitors of an extra match are chosen.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum ExtraMatchPolicy {
    /// Uniformly at random.
    #[default]
    Random,
    /// The two lowest ranked competitors.
    ByRanking,
}

/// How the winner of a match was determined.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub enum DecisionMethod {
    /// Decided by the outcome simulator.
    Automatic,
    /// Entered by a judge.
    #[default]
    Manual,
}

/// Kind of victory recorded by a judge.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum OutcomeType {
    /// The opponent left the ring three times.
    ThreeOuts,
    /// The opponent stayed immobilized for a ten count.
    Immobilization,
    /// The opponent was overturned.
    Overturn,
    /// The opponent was disqualified.
    Disqualification,
    /// Points decision of the judges.
    JudgeDecision,
}

/// A tournament run for one category.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Tournament {
    pub id: TournamentId,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub mode: CombatMode,
    pub extra_match_policy: ExtraMatchPolicy,
    /// Never changes after creation.
    pub seed: Seed,
    pub active: bool,
    /// Highest regular round created so far, 0 before the fixture.
    pub current_round: u32,
    pub created_at: DateTime<Utc>,
}

impl Tournament {
    /// Creates an active tournament with no round played.
    pub fn new(
        id: TournamentId,
        name: impl Into<String>,
        category: impl Into<String>,
        mode: CombatMode,
        extra_match_policy: ExtraMatchPolicy,
        seed: Seed,
    ) -> Self {
        Tournament {
            id,
            name: name.into(),
            description: None,
            category: category.into(),
            mode,
            extra_match_policy,
            seed,
            active: true,
            current_round: 0,
            created_at: Utc::now(),
        }
    }

    /// Decision method given to the regular matches of this tournament.
    #[inline]
    pub fn regular_decision_method(&self) -> DecisionMethod {
        match self.mode {
            CombatMode::Autonomous => DecisionMethod::Automatic,
            CombatMode::ManualArbitration => DecisionMethod::Manual,
        }
    }
}

/// One simulated round of a match.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub struct RoundRecord {
    pub round: u8,
    pub winner: CompetitorId,
}

/// A match between two competitors.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct Match {
    pub id: MatchId,
    pub tournament: TournamentId,
    /// 0 for the qualifying match played before the bracket, 1.. for the bracket.
    pub round: u32,
    /// 0 flags the extra match of a round.
    pub position: u32,
    /// [`None`] while waiting for the winner of an extra match.
    pub competitor1: Option<CompetitorId>,
    pub competitor2: Option<CompetitorId>,
    pub winner: Option<CompetitorId>,
    pub completed: bool,
    pub decision_method: DecisionMethod,
    pub outcome_type: Option<OutcomeType>,
    pub outcome_description: Option<String>,
    pub judge_name: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub rounds_played: u8,
    pub rounds_won1: u8,
    pub rounds_won2: u8,
    pub round_log: Vec<RoundRecord>,
    pub is_extra_match: bool,
    pub is_bye: bool,
}

impl Match {
    /// Creates a pending match.
    pub fn new(
        id: MatchId,
        tournament: TournamentId,
        round: u32,
        position: u32,
        competitor1: Option<CompetitorId>,
        competitor2: Option<CompetitorId>,
        decision_method: DecisionMethod,
    ) -> Self {
        Match {
            id,
            tournament,
            round,
            position,
            competitor1,
            competitor2,
            winner: None,
            completed: false,
            decision_method,
            outcome_type: None,
            outcome_description: None,
            judge_name: None,
            completed_at: None,
            rounds_played: 0,
            rounds_won1: 0,
            rounds_won2: 0,
            round_log: Vec::new(),
            is_extra_match: false,
            is_bye: false,
        }
    }

    /// Creates a pending extra match. Extra matches are always decided by a judge.
    pub fn new_extra(
        id: MatchId,
        tournament: TournamentId,
        round: u32,
        position: u32,
        competitor1: CompetitorId,
        competitor2: CompetitorId,
    ) -> Self {
        Match {
            is_extra_match: true,
            ..Match::new(
                id,
                tournament,
                round,
                position,
                Some(competitor1),
                Some(competitor2),
                DecisionMethod::Manual,
            )
        }
    }

    /// Whether this is a qualifying match rather than a bracket pairing.
    #[inline]
    pub fn is_qualifier(&self) -> bool {
        self.is_extra_match || self.round == 0 || self.position == 0
    }

    /// Whether both slots are filled.
    #[inline]
    pub fn is_ready(&self) -> bool {
        self.competitor1.is_some() && self.competitor2.is_some()
    }

    #[inline]
    pub fn has_empty_slot(&self) -> bool {
        !self.is_ready()
    }

    /// Whether `competitor` occupies one of the two slots.
    #[inline]
    pub fn involves(&self, competitor: CompetitorId) -> bool {
        self.competitor1 == Some(competitor) || self.competitor2 == Some(competitor)
    }

    /// The competitors occupying the slots.
    #[inline]
    pub fn competitors(&self) -> impl Iterator<Item = CompetitorId> {
        self.competitor1.into_iter().chain(self.competitor2)
    }

    /// The losing competitor of a completed match.
    #[inline]
    pub fn loser(&self) -> Option<CompetitorId> {
        let winner = self.winner?;
        self.competitors().find(|&c| c != winner)
    }

    /// Puts `competitor` in the first empty slot. Returns `false` if both slots are taken.
    pub fn fill_empty_slot(&mut self, competitor: CompetitorId) -> bool {
        if self.competitor1.is_none() {
            self.competitor1 = Some(competitor);
            true
        } else if self.competitor2.is_none() {
            self.competitor2 = Some(competitor);
            true
        } else {
            false
        }
    }

    /// Records `winner` and completes the match.
    pub(crate) fn complete(
        &mut self,
        winner: CompetitorId,
        method: DecisionMethod,
        at: DateTime<Utc>,
    ) {
        debug_assert!(self.involves(winner));
        self.winner = Some(winner);
        self.completed = true;
        self.decision_method = method;
        self.completed_at = Some(at);
    }
}

/// Decision metadata a judge may attach to a result.
#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct ResultDetails {
    pub outcome_type: Option<OutcomeType>,
    pub description: Option<String>,
    pub judge_name: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rating_bounds() {
        assert_eq!(Rating::default().get(), DEFAULT_RATING);
        assert!(Rating::new(MIN_RATING).is_ok());
        assert!(Rating::new(MAX_RATING).is_ok());
        assert_eq!(Rating::new(0), Err(ModelError::RatingOutOfRange(0)));
        assert_eq!(Rating::new(101), Err(ModelError::RatingOutOfRange(101)));
    }

    #[test]
    fn rating_rejected_on_deserialization() {
        assert!(serde_json::from_str::<Rating>("70").is_ok());
        assert!(serde_json::from_str::<Rating>("-3").is_err());
    }

    #[test]
    fn slots() {
        let mut m = Match::new(
            MatchId(1),
            TournamentId(1),
            1,
            1,
            Some(CompetitorId(4)),
            None,
            DecisionMethod::Manual,
        );
        assert!(m.has_empty_slot());
        assert!(m.fill_empty_slot(CompetitorId(9)));
        assert!(!m.fill_empty_slot(CompetitorId(10)));
        assert_eq!(m.competitors().collect::<Vec<_>>(), vec![CompetitorId(4), CompetitorId(9)]);

        m.complete(CompetitorId(9), DecisionMethod::Manual, Utc::now());
        assert_eq!(m.loser(), Some(CompetitorId(4)));
    }

    #[test]
    fn qualifier_flags() {
        let extra = Match::new_extra(
            MatchId(1),
            TournamentId(1),
            3,
            0,
            CompetitorId(1),
            CompetitorId(2),
        );
        assert!(extra.is_qualifier());
        assert_eq!(extra.decision_method, DecisionMethod::Manual);

        let regular = Match::new(
            MatchId(2),
            TournamentId(1),
            1,
            2,
            Some(CompetitorId(3)),
            Some(CompetitorId(4)),
            DecisionMethod::Automatic,
        );
        assert!(!regular.is_qualifier());
    }
}
