//! Bracket progression state machine.
//!
//! A [`Bracket`] holds every match of a tournament in memory together with the competitors they
//! reference. Events (fixture generation, results, simulations) mutate it and the resulting
//! writes are collected into a single [`Changeset`], so that an event is persisted all at once.
//!
//! The state of a tournament is never stored, it is derived from its matches (see
//! [`Bracket::state`]):
//!
//! ```text
//! AwaitingFixture -> RegularRoundInProgress -> { ExtraMatchPending, RoundComplete }
//!                 -> RegularRoundInProgress (next round) -> ... -> TournamentComplete
//! ```

use crate::config::EngineConfig;
use crate::extra_match::{select_extra_pair, Candidate, Selection};
use crate::model::{
    CombatMode, Competitor, CompetitorId, DecisionMethod, Match, MatchId, ResultDetails,
    Tournament, TournamentId,
};
use crate::simulation::{self, SimulationError};
use crate::standings::{self, Standings};
use crate::store::{Changeset, Store, StoreError};
use crate::{derive_rng, Salt, MIN_COMPETITORS};
use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use itertools::Itertools;
use log::{debug, info};
use rand::prelude::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Derived state of a tournament.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq)]
pub enum BracketState {
    /// No match has been generated yet.
    AwaitingFixture,
    /// Some regular match of `round` is still to be played.
    RegularRoundInProgress { round: u32 },
    /// An extra match is still to be played, nothing advances until it is.
    ExtraMatchPending { extra_match: MatchId },
    /// Every match of `round` is completed, the next round can be generated.
    RoundComplete { round: u32 },
    /// Only the champion is left.
    TournamentComplete { champion: CompetitorId },
}

#[derive(Error, Debug)]
#[cfg_attr(test, derive(Eq, PartialEq))]
#[non_exhaustive]
pub enum BracketError {
    /// Not enough competitors to generate the fixture (see [`MIN_COMPETITORS`]).
    #[error("not enough competitors to generate the fixture ({0} needed, but {1} were provided)")]
    NotEnoughCompetitors(usize, usize),
    /// The match is not part of this tournament.
    #[error("match {0} not found")]
    MatchNotFound(MatchId),
    /// The match already has a winner.
    #[error("match {0} is already completed")]
    MatchAlreadyCompleted(MatchId),
    /// The match is still waiting for the winner of an extra match.
    #[error("match {0} is still waiting for one of its competitors")]
    MatchNotReady(MatchId),
    /// The proposed winner doesn't play the match.
    #[error("competitor {1} doesn't play match {0}")]
    NotAMatchCompetitor(MatchId, CompetitorId),
    /// A text of the result details exceeds its configured length.
    #[error("{field} is too long ({len} characters, at most {max} allowed)")]
    DetailTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
    /// Matches can only be simulated in autonomous tournaments.
    #[error("matches of tournament {0} are decided by judges")]
    NotAutonomous(TournamentId),
    /// A competitor referenced by the bracket was not loaded.
    #[error("competitor {0} is not part of the bracket")]
    UnknownCompetitor(CompetitorId),
    #[error(transparent)]
    Simulation(#[from] SimulationError),
    /// Reserving match ids failed.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// An error occurred while advancing the bracket.
    #[error("an error occurred while advancing the bracket: {0}")]
    InternalError(&'static str),
}

/// Source of fresh match ids.
pub trait MatchIds {
    fn next_match_id(&mut self) -> Result<MatchId, StoreError>;
}

impl<S: Store + ?Sized> MatchIds for S {
    #[inline]
    fn next_match_id(&mut self) -> Result<MatchId, StoreError> {
        Store::next_match_id(self)
    }
}

/// In-memory bracket of one tournament.
#[derive(Debug)]
pub struct Bracket<'c> {
    config: &'c EngineConfig,
    tournament: Tournament,
    matches: Vec<Match>,
    competitors: IndexMap<CompetitorId, Competitor>,
    now: DateTime<Utc>,

    // Pending writes
    cleared: bool,
    created: IndexSet<MatchId>,
    updated: IndexSet<MatchId>,
    fairness: IndexSet<CompetitorId>,
    tournament_changed: bool,
}

impl<'c> Bracket<'c> {
    /// Creates the bracket of `tournament` from its stored matches and the competitors they
    /// reference. `now` timestamps every match completed by the event.
    pub fn new(
        config: &'c EngineConfig,
        tournament: Tournament,
        matches: Vec<Match>,
        competitors: impl IntoIterator<Item = Competitor>,
        now: DateTime<Utc>,
    ) -> Bracket<'c> {
        let mut matches = matches;
        matches.sort_by_key(|m| (m.round, m.position, m.id));

        Bracket {
            config,
            tournament,
            matches,
            competitors: competitors.into_iter().map(|c| (c.id, c)).collect(),
            now,
            cleared: false,
            created: IndexSet::new(),
            updated: IndexSet::new(),
            fairness: IndexSet::new(),
            tournament_changed: false,
        }
    }

    #[inline]
    pub fn tournament(&self) -> &Tournament {
        &self.tournament
    }

    /// Matches ordered by round, then position.
    #[inline]
    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    #[inline]
    pub fn competitor(&self, id: CompetitorId) -> Option<&Competitor> {
        self.competitors.get(&id)
    }

    #[inline]
    pub fn get_match(&self, id: MatchId) -> Option<&Match> {
        self.matches.iter().find(|m| m.id == id)
    }

    /// Derives the current state from the matches.
    pub fn state(&self) -> BracketState {
        if self.matches.is_empty() {
            return BracketState::AwaitingFixture;
        }

        if let Some(extra) = self
            .matches
            .iter()
            .find(|m| m.is_extra_match && !m.completed)
        {
            return BracketState::ExtraMatchPending {
                extra_match: extra.id,
            };
        }

        let Some(round) = self.last_regular_round() else {
            return BracketState::AwaitingFixture;
        };

        if self.regular_matches(round).any(|m| !m.completed) {
            return BracketState::RegularRoundInProgress { round };
        }

        match self.advancing(round).as_slice() {
            &[champion] => BracketState::TournamentComplete { champion },
            _ => BracketState::RoundComplete { round },
        }
    }

    /// Final standings, all absent until the tournament is complete.
    pub fn standings(&self) -> Standings {
        match self.state() {
            BracketState::TournamentComplete { .. } => standings::derive(&self.matches),
            _ => Standings::default(),
        }
    }

    /// Generates the first round from `pool`, replacing any existing match.
    ///
    /// With an odd pool, two competitors are sent to a qualifying match (round 0) and another
    /// one waits in the first match of round 1 for the qualifier's winner.
    pub fn generate_fixture(
        &mut self,
        pool: Vec<Competitor>,
        ids: &mut impl MatchIds,
    ) -> Result<(), BracketError> {
        if pool.len() < MIN_COMPETITORS {
            return Err(BracketError::NotEnoughCompetitors(
                MIN_COMPETITORS,
                pool.len(),
            ));
        }

        self.cleared = true;
        self.matches.clear();
        self.created.clear();
        self.updated.clear();

        let mut entrants: Vec<_> = pool
            .into_iter()
            .sorted_unstable_by_key(|c| c.id) // The store may return them in any order
            .map(|mut competitor| {
                competitor.extra_match_count = 0;
                Entrant {
                    competitor,
                    played: 0,
                    wins: 0,
                }
            })
            .collect();

        let mut rng = derive_rng(&self.tournament.seed, Salt::Fixture);
        let mut extra = None;
        if entrants.len() % 2 != 0 {
            let selection = Selection {
                policy: self.tournament.extra_match_policy,
                first_round: true,
                dynamic_ranking: self.config.dynamic_ranking,
            };
            let (first, second) = select_extra_pair(&mut entrants, selection, &mut rng)
                .ok_or(BracketError::InternalError("no competitors for the extra match"))?;
            extra = Some((entrants[first].id(), entrants[second].id()));
        }

        let mut remaining = Vec::with_capacity(entrants.len());
        for entrant in entrants {
            let id = entrant.competitor.id;
            self.fairness.insert(id);
            self.competitors.insert(id, entrant.competitor);
            if !matches!(extra, Some((a, b)) if a == id || b == id) {
                remaining.push(id);
            }
        }
        remaining.shuffle(&mut rng);

        let mut position = 1;
        if let Some((first, second)) = extra {
            let id = ids.next_match_id()?;
            self.push_created(Match::new_extra(
                id,
                self.tournament.id,
                0,
                1,
                first,
                second,
            ));

            // Waits for the winner of the extra match
            let waiting = remaining
                .pop()
                .ok_or(BracketError::InternalError("no competitor left for the waiting match"))?;
            let id = ids.next_match_id()?;
            self.push_created(Match::new(
                id,
                self.tournament.id,
                1,
                position,
                Some(waiting),
                None,
                self.tournament.regular_decision_method(),
            ));
            position += 1;
        }

        self.pair_up(1, position, remaining, ids)?;
        self.set_current_round(1);

        info!(
            "fixture generated for tournament {} ({} matches)",
            self.tournament.id,
            self.matches.len()
        );
        Ok(())
    }

    /// Records the result of a match decided by a judge, then advances the bracket.
    pub fn submit_result(
        &mut self,
        match_id: MatchId,
        winner: CompetitorId,
        details: ResultDetails,
        ids: &mut impl MatchIds,
    ) -> Result<(), BracketError> {
        self.check_details(&details)?;

        let now = self.now;
        let index = self.index_of(match_id)?;
        let m = &mut self.matches[index];
        if m.completed {
            return Err(BracketError::MatchAlreadyCompleted(match_id));
        }
        if !m.is_ready() {
            return Err(BracketError::MatchNotReady(match_id));
        }
        if !m.involves(winner) {
            return Err(BracketError::NotAMatchCompetitor(match_id, winner));
        }

        m.outcome_type = details.outcome_type;
        m.outcome_description = details.description;
        m.judge_name = details.judge_name;
        m.complete(winner, DecisionMethod::Manual, now);
        let qualifier = m.is_qualifier();
        self.updated.insert(match_id);

        info!("match {match_id} won by {winner}");

        if qualifier {
            self.reintegrate(winner);
            if self.tournament.mode == CombatMode::Autonomous {
                self.simulate_ready()?;
            }
        }
        self.advance(ids)
    }

    /// Simulates every ready match of an autonomous tournament, then advances the bracket.
    ///
    /// Returns the number of simulated matches.
    pub fn simulate_pending(&mut self, ids: &mut impl MatchIds) -> Result<usize, BracketError> {
        if self.tournament.mode != CombatMode::Autonomous {
            return Err(BracketError::NotAutonomous(self.tournament.id));
        }

        let simulated = self.simulate_ready()?;
        self.advance(ids)?;
        Ok(simulated)
    }

    /// Deletes every match and zeroes the round counter.
    pub fn reset(&mut self) {
        self.cleared = true;
        self.matches.clear();
        self.created.clear();
        self.updated.clear();
        self.set_current_round(0);

        info!("tournament {} reset", self.tournament.id);
    }

    /// Advances the bracket as far as possible.
    ///
    /// Autonomous tournaments simulate the new rounds right away, until an extra match or the
    /// end of the tournament is reached.
    pub fn advance(&mut self, ids: &mut impl MatchIds) -> Result<(), BracketError> {
        loop {
            match self.state() {
                BracketState::RoundComplete { round } => {
                    let opened = self.open_round(round + 1, ids)?;
                    if opened.is_empty() || self.tournament.mode != CombatMode::Autonomous {
                        return Ok(());
                    }
                    for id in opened {
                        self.simulate(id)?;
                    }
                }
                BracketState::TournamentComplete { champion } => {
                    if !self.updated.is_empty() || !self.created.is_empty() {
                        info!(
                            "tournament {} completed, champion: {champion}",
                            self.tournament.id
                        );
                    }
                    return Ok(());
                }
                state => {
                    debug!(
                        "advancement of tournament {} deferred ({state:?})",
                        self.tournament.id
                    );
                    return Ok(());
                }
            }
        }
    }

    /// Collects every pending write of the bracket.
    pub fn into_changeset(self) -> Changeset {
        let find = |id: &MatchId| self.matches.iter().find(|m| m.id == *id).cloned();

        Changeset {
            clear_matches: self.cleared.then_some(self.tournament.id),
            created: self.created.iter().filter_map(find).collect(),
            updated: self
                .updated
                .iter()
                .filter(|id| !self.created.contains(*id))
                .filter_map(find)
                .collect(),
            fairness: self
                .fairness
                .iter()
                .filter_map(|id| self.competitors.get(id).cloned())
                .collect(),
            tournament: self.tournament_changed.then(|| self.tournament.clone()),
        }
    }

    /// Generates the matches of `round` from the competitors advancing from the previous one.
    ///
    /// Returns the created regular matches. Nothing but an extra match is created when an odd
    /// number of competitors advance, the round is opened again once it is played.
    fn open_round(
        &mut self,
        round: u32,
        ids: &mut impl MatchIds,
    ) -> Result<Vec<MatchId>, BracketError> {
        let mut advancing = self.advancing(round - 1);
        let mut rng = derive_rng(&self.tournament.seed, Salt::Round(round));

        if advancing.len() % 2 != 0 {
            if self.extra_match(round).is_some() {
                return Err(BracketError::InternalError(
                    "odd number of competitors after the extra match",
                ));
            }

            let (first, second) = self.select_extra_pair(&advancing, &mut rng)?;
            let id = ids.next_match_id()?;
            self.push_created(Match::new_extra(
                id,
                self.tournament.id,
                round,
                0,
                first,
                second,
            ));

            info!(
                "extra match {id} created for round {round} of tournament {} ({first} vs {second})",
                self.tournament.id
            );
            return Ok(Vec::new());
        }

        advancing.shuffle(&mut rng);
        let opened = self.pair_up(round, 1, advancing, ids)?;
        self.set_current_round(round);

        info!(
            "round {round} of tournament {} generated ({} matches)",
            self.tournament.id,
            opened.len()
        );
        Ok(opened)
    }

    /// Competitors qualified for the round after `round`: the winners of `round`, minus the
    /// players of the next round's extra match, plus its winner.
    fn advancing(&self, round: u32) -> Vec<CompetitorId> {
        let mut advancing: Vec<_> = self
            .regular_matches(round)
            .filter_map(|m| m.winner)
            .collect();

        if let Some(extra) = self.extra_match(round + 1) {
            advancing.retain(|&c| !extra.involves(c));
            advancing.extend(extra.winner);
        }

        advancing
    }

    fn select_extra_pair(
        &mut self,
        advancing: &[CompetitorId],
        rng: &mut crate::RandGen,
    ) -> Result<(CompetitorId, CompetitorId), BracketError> {
        let mut played: HashMap<CompetitorId, usize> = HashMap::new();
        let mut wins: HashMap<CompetitorId, usize> = HashMap::new();
        for m in self.matches.iter().filter(|m| m.completed && !m.is_qualifier() && !m.is_bye) {
            for c in m.competitors() {
                *played.entry(c).or_default() += 1;
            }
            if let Some(winner) = m.winner {
                *wins.entry(winner).or_default() += 1;
            }
        }

        let mut entrants = advancing
            .iter()
            .map(|id| {
                let competitor = self
                    .competitors
                    .get(id)
                    .cloned()
                    .ok_or(BracketError::UnknownCompetitor(*id))?;
                Ok(Entrant {
                    competitor,
                    played: played.get(id).copied().unwrap_or_default(),
                    wins: wins.get(id).copied().unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, BracketError>>()?;

        let selection = Selection {
            policy: self.tournament.extra_match_policy,
            first_round: false,
            dynamic_ranking: self.config.dynamic_ranking,
        };
        let (first, second) = select_extra_pair(&mut entrants, selection, rng)
            .ok_or(BracketError::InternalError("no competitors for the extra match"))?;

        let pair = (entrants[first].id(), entrants[second].id());
        for index in [first, second] {
            let competitor = entrants[index].competitor.clone();
            self.fairness.insert(competitor.id);
            self.competitors.insert(competitor.id, competitor);
        }
        Ok(pair)
    }

    /// Puts the winner of an extra match in the earliest match waiting for a competitor.
    /// Without such a match, the winner waits for the next round to be generated.
    fn reintegrate(&mut self, winner: CompetitorId) {
        let waiting = self
            .matches
            .iter_mut()
            .filter(|m| !m.completed && !m.is_qualifier() && m.has_empty_slot())
            .min_by_key(|m| (m.round, m.position));

        match waiting {
            Some(m) => {
                m.fill_empty_slot(winner);
                debug!("competitor {winner} joins match {}", m.id);
                let id = m.id;
                self.updated.insert(id);
            }
            None => debug!("competitor {winner} waits for the next round"),
        }
    }

    /// Simulates every ready automatic match. Returns how many were simulated.
    fn simulate_ready(&mut self) -> Result<usize, BracketError> {
        let ready: Vec<_> = self
            .matches
            .iter()
            .filter(|m| {
                !m.completed
                    && m.is_ready()
                    && !m.is_qualifier()
                    && m.decision_method == DecisionMethod::Automatic
            })
            .map(|m| m.id)
            .collect();
        for &id in &ready {
            self.simulate(id)?;
        }
        Ok(ready.len())
    }

    fn simulate(&mut self, match_id: MatchId) -> Result<(), BracketError> {
        let index = self.index_of(match_id)?;
        let m = &self.matches[index];
        let competitor1 = m.competitor1.and_then(|id| self.competitors.get(&id));
        let competitor2 = m.competitor2.and_then(|id| self.competitors.get(&id));
        let outcome = simulation::simulate(
            &self.tournament.seed,
            match_id,
            competitor1,
            competitor2,
            self.config.rounds_to_win,
        )?;

        simulation::apply_outcome(&mut self.matches[index], outcome, self.now);
        self.updated.insert(match_id);
        Ok(())
    }

    /// Pairs `competitors` two by two into matches of `round`, starting at `first_position`.
    fn pair_up(
        &mut self,
        round: u32,
        first_position: u32,
        competitors: Vec<CompetitorId>,
        ids: &mut impl MatchIds,
    ) -> Result<Vec<MatchId>, BracketError> {
        debug_assert!(competitors.len() % 2 == 0);

        let mut opened = Vec::with_capacity(competitors.len() / 2);
        let pairs = competitors.into_iter().tuples();
        for (position, (first, second)) in (first_position..).zip(pairs) {
            let id = ids.next_match_id()?;
            self.push_created(Match::new(
                id,
                self.tournament.id,
                round,
                position,
                Some(first),
                Some(second),
                self.tournament.regular_decision_method(),
            ));
            opened.push(id);
        }
        Ok(opened)
    }

    fn push_created(&mut self, m: Match) {
        self.created.insert(m.id);
        // Matches are created in (round, position) order, except the extra match of a round
        let index = self
            .matches
            .partition_point(|other| (other.round, other.position) <= (m.round, m.position));
        self.matches.insert(index, m);
    }

    fn set_current_round(&mut self, round: u32) {
        if self.tournament.current_round != round {
            self.tournament.current_round = round;
            self.tournament_changed = true;
        }
    }

    fn check_details(&self, details: &ResultDetails) -> Result<(), BracketError> {
        let checks = [
            ("description", &details.description, self.config.max_description_len),
            ("judge name", &details.judge_name, self.config.max_judge_name_len),
        ];
        for (field, text, max) in checks {
            let len = text.as_deref().map_or(0, |t| t.chars().count());
            if len > max {
                return Err(BracketError::DetailTooLong { field, len, max });
            }
        }
        Ok(())
    }

    #[inline]
    fn index_of(&self, match_id: MatchId) -> Result<usize, BracketError> {
        self.matches
            .iter()
            .position(|m| m.id == match_id)
            .ok_or(BracketError::MatchNotFound(match_id))
    }

    #[inline]
    fn last_regular_round(&self) -> Option<u32> {
        self.matches
            .iter()
            .filter(|m| !m.is_qualifier())
            .map(|m| m.round)
            .max()
    }

    #[inline]
    fn regular_matches(&self, round: u32) -> impl Iterator<Item = &Match> {
        self.matches
            .iter()
            .filter(move |m| m.round == round && !m.is_qualifier())
    }

    #[inline]
    fn extra_match(&self, round: u32) -> Option<&Match> {
        self.matches
            .iter()
            .find(|m| m.round == round && m.is_extra_match)
    }
}

/// A competitor of the bracket with its record in the tournament.
#[derive(Debug)]
struct Entrant {
    competitor: Competitor,
    played: usize,
    wins: usize,
}

impl Candidate for Entrant {
    #[inline]
    fn id(&self) -> CompetitorId {
        self.competitor.id
    }

    #[inline]
    fn extra_matches(&self) -> u32 {
        self.competitor.extra_match_count
    }

    #[inline]
    fn add_extra_match(&mut self) {
        self.competitor.extra_match_count += 1;
    }

    #[inline]
    fn rating(&self) -> i32 {
        self.competitor.rating.get()
    }

    #[inline]
    fn matches_played(&self) -> usize {
        self.played
    }

    #[inline]
    fn wins(&self) -> usize {
        self.wins
    }
}
