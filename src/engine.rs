//! Operations exposed to the outer application.
//!
//! Every operation loads the bracket of one tournament from the [`Store`], runs the event on it
//! and hands all the resulting writes to [`Store::apply`] at once.

use crate::bracket::{Bracket, BracketError, BracketState};
use crate::config::EngineConfig;
use crate::model::{Competitor, CompetitorId, Match, MatchId, ResultDetails, TournamentId};
use crate::standings::Standings;
use crate::store::{Changeset, Store, StoreError};
use chrono::Utc;
use itertools::Itertools;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum EngineError {
    /// The tournament doesn't exist.
    #[error("tournament {0} not found")]
    TournamentNotFound(TournamentId),
    /// The tournament is not active anymore.
    #[error("tournament {0} is not active")]
    TournamentInactive(TournamentId),
    /// The match doesn't exist.
    #[error("match {0} not found")]
    MatchNotFound(MatchId),
    #[error(transparent)]
    Bracket(#[from] BracketError),
    /// The store failed, nothing was written. The whole event may be retried.
    #[error("persistence failure: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Whether the request was rejected before any change.
    pub fn is_validation(&self) -> bool {
        match self {
            EngineError::TournamentNotFound(_)
            | EngineError::TournamentInactive(_)
            | EngineError::MatchNotFound(_) => true,
            EngineError::Bracket(error) => matches!(
                error,
                BracketError::NotEnoughCompetitors(..)
                    | BracketError::MatchNotFound(_)
                    | BracketError::MatchAlreadyCompleted(_)
                    | BracketError::MatchNotReady(_)
                    | BracketError::NotAMatchCompetitor(..)
                    | BracketError::DetailTooLong { .. }
                    | BracketError::NotAutonomous(_)
            ),
            EngineError::Store(_) => false,
        }
    }

    /// Whether the failure comes from the store and may go away on retry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            EngineError::Store(_) | EngineError::Bracket(BracketError::Store(_))
        )
    }
}

/// Result of a fixture generation.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct FixtureReport {
    pub created: Vec<Match>,
    /// The qualifying match to play first, if the number of competitors is odd.
    pub pending_extra_match: Option<MatchId>,
}

/// Result of a result submission.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SubmitReport {
    pub updated_match: Match,
    /// Matches created by the advancement, in their final state.
    pub cascade_created: Vec<Match>,
    /// Other existing matches changed by the advancement.
    pub cascade_updated: Vec<Match>,
    pub state: BracketState,
}

/// Result of the simulation of the pending matches.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct SimulationReport {
    pub simulated: usize,
    pub cascade_created: Vec<Match>,
    pub state: BracketState,
}

/// A match with its competitors resolved.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct MatchDetail {
    pub game: Match,
    pub competitor1: Option<Competitor>,
    pub competitor2: Option<Competitor>,
    pub winner: Option<Competitor>,
}

/// The bracket progression engine, backed by a [`Store`].
#[derive(Debug)]
pub struct Engine<S: Store> {
    store: S,
    config: EngineConfig,
}

impl<S: Store> Engine<S> {
    #[inline]
    pub fn new(store: S, config: EngineConfig) -> Engine<S> {
        Engine { store, config }
    }

    #[inline]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn store(&self) -> &S {
        &self.store
    }

    #[inline]
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    #[inline]
    pub fn into_store(self) -> S {
        self.store
    }

    /// Generates the first round of `tournament` from the active competitors of its category.
    /// Existing matches of the tournament are replaced.
    pub fn generate_fixture(
        &mut self,
        tournament: TournamentId,
    ) -> Result<FixtureReport, EngineError> {
        let tournament = self
            .store
            .tournament(tournament)?
            .ok_or(EngineError::TournamentNotFound(tournament))?;
        if !tournament.active {
            return Err(EngineError::TournamentInactive(tournament.id));
        }

        let pool = self.store.active_competitors(&tournament.category)?;
        let mut bracket =
            Bracket::new(&self.config, tournament, Vec::new(), Vec::new(), Utc::now());
        bracket.generate_fixture(pool, &mut self.store)?;

        let pending_extra_match = match bracket.state() {
            BracketState::ExtraMatchPending { extra_match } => Some(extra_match),
            _ => None,
        };
        let changes = bracket.into_changeset();
        let created = changes.created.clone();
        commit(&mut self.store, changes)?;

        Ok(FixtureReport {
            created,
            pending_extra_match,
        })
    }

    /// Records `winner` as the winner of `match_id` and advances the bracket.
    pub fn submit_result(
        &mut self,
        match_id: MatchId,
        winner: CompetitorId,
        details: Option<ResultDetails>,
    ) -> Result<SubmitReport, EngineError> {
        let m = self
            .store
            .get_match(match_id)?
            .ok_or(EngineError::MatchNotFound(match_id))?;

        let mut bracket = load_bracket(&self.store, &self.config, m.tournament)?;
        bracket.submit_result(match_id, winner, details.unwrap_or_default(), &mut self.store)?;

        let state = bracket.state();
        let changes = bracket.into_changeset();
        let (updated_match, cascade_updated): (Vec<_>, Vec<_>) = changes
            .updated
            .iter()
            .cloned()
            .partition(|m| m.id == match_id);
        let updated_match = updated_match
            .into_iter()
            .next()
            .ok_or(BracketError::InternalError("submitted match not updated"))?;
        let cascade_created = changes.created.clone();
        commit(&mut self.store, changes)?;

        Ok(SubmitReport {
            updated_match,
            cascade_created,
            cascade_updated,
            state,
        })
    }

    /// Simulates every ready match of an autonomous tournament and advances the bracket.
    pub fn simulate_pending(
        &mut self,
        tournament: TournamentId,
    ) -> Result<SimulationReport, EngineError> {
        let mut bracket = load_bracket(&self.store, &self.config, tournament)?;
        let simulated = bracket.simulate_pending(&mut self.store)?;

        let state = bracket.state();
        let changes = bracket.into_changeset();
        let cascade_created = changes.created.clone();
        commit(&mut self.store, changes)?;

        Ok(SimulationReport {
            simulated,
            cascade_created,
            state,
        })
    }

    /// Winner, runner-up and third place of a completed tournament.
    pub fn standings(&self, tournament: TournamentId) -> Result<Standings, EngineError> {
        Ok(load_bracket(&self.store, &self.config, tournament)?.standings())
    }

    /// Deletes every match of `tournament` and zeroes its round counter.
    pub fn reset_tournament(&mut self, tournament: TournamentId) -> Result<(), EngineError> {
        let mut bracket = load_bracket(&self.store, &self.config, tournament)?;
        bracket.reset();
        commit(&mut self.store, bracket.into_changeset())
    }

    pub fn bracket_state(&self, tournament: TournamentId) -> Result<BracketState, EngineError> {
        Ok(load_bracket(&self.store, &self.config, tournament)?.state())
    }

    /// Matches waiting for a result, ordered by round, then position.
    pub fn pending_matches(&self, tournament: TournamentId) -> Result<Vec<Match>, EngineError> {
        let bracket = load_bracket(&self.store, &self.config, tournament)?;
        Ok(bracket
            .matches()
            .iter()
            .filter(|m| !m.completed && m.is_ready())
            .cloned()
            .collect())
    }

    pub fn match_detail(&self, match_id: MatchId) -> Result<MatchDetail, EngineError> {
        let game = self
            .store
            .get_match(match_id)?
            .ok_or(EngineError::MatchNotFound(match_id))?;
        let resolve = |id: Option<CompetitorId>| -> Result<Option<Competitor>, StoreError> {
            match id {
                Some(id) => self.store.competitor(id),
                None => Ok(None),
            }
        };

        Ok(MatchDetail {
            competitor1: resolve(game.competitor1)?,
            competitor2: resolve(game.competitor2)?,
            winner: resolve(game.winner)?,
            game,
        })
    }
}

/// Loads the bracket of `tournament` with every competitor it references.
fn load_bracket<'c, S: Store>(
    store: &S,
    config: &'c EngineConfig,
    tournament: TournamentId,
) -> Result<Bracket<'c>, EngineError> {
    let tournament = store
        .tournament(tournament)?
        .ok_or(EngineError::TournamentNotFound(tournament))?;
    let matches = store.matches(tournament.id)?;

    let mut competitors = Vec::new();
    for id in matches.iter().flat_map(|m| m.competitors()).sorted_unstable().dedup() {
        // Missing competitors are reported when the bracket needs them
        if let Some(competitor) = store.competitor(id)? {
            competitors.push(competitor);
        }
    }

    Ok(Bracket::new(config, tournament, matches, competitors, Utc::now()))
}

fn commit<S: Store>(store: &mut S, changes: Changeset) -> Result<(), EngineError> {
    if changes.is_empty() {
        return Ok(());
    }

    let (created, updated) = (changes.created.len(), changes.updated.len());
    store.apply(&changes).inspect_err(|error| {
        warn!("changes of the event were discarded: {error}");
    })?;

    info!("{created} matches created, {updated} matches updated");
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{
        CombatMode, DecisionMethod, ExtraMatchPolicy, OutcomeType, Rating, Tournament,
    };
    use crate::store::MemoryStore;
    use crate::{gen_seed, Seed};
    use std::collections::HashMap;

    fn setup(
        n: usize,
        mode: CombatMode,
        policy: ExtraMatchPolicy,
        seed: Seed,
    ) -> (Engine<MemoryStore>, TournamentId) {
        let mut store = MemoryStore::new();
        for i in 0..n {
            let id = store.add_competitor(format!("Robot {i}"), format!("Team {}", i % 3), "Sumo");
            let rating = Rating::new(10 + (i as i32 * 7) % 90).unwrap();
            let competitor = store.competitor(id).unwrap().unwrap().with_rating(rating);
            store.put_competitor(competitor);
        }
        store.add_competitor("Outsider", "Team X", "Mini");
        let tournament = store.create_tournament("Cup", "Sumo", mode, policy, Some(seed));
        (Engine::new(store, EngineConfig::default()), tournament)
    }

    fn manual(n: usize) -> (Engine<MemoryStore>, TournamentId) {
        setup(n, CombatMode::ManualArbitration, ExtraMatchPolicy::Random, gen_seed())
    }

    /// Lowest id wins.
    fn pick_winner(m: &Match) -> CompetitorId {
        m.competitors().min().unwrap()
    }

    /// Every competitor has at most one match waiting for a result.
    fn assert_no_double_booking(engine: &Engine<MemoryStore>, tournament: TournamentId) {
        let mut pending: HashMap<CompetitorId, usize> = HashMap::new();
        for m in engine.store().matches(tournament).unwrap() {
            if !m.completed {
                for c in m.competitors() {
                    *pending.entry(c).or_default() += 1;
                }
            }
        }
        assert!(pending.values().all(|&n| n == 1), "{pending:?}");
    }

    /// Plays every match until the tournament is over. Returns the number of results submitted.
    fn play_out(engine: &mut Engine<MemoryStore>, tournament: TournamentId) -> usize {
        let mut submitted = 0;
        loop {
            let pending = engine.pending_matches(tournament).unwrap();
            let Some(m) = pending.first() else {
                return submitted;
            };
            engine.submit_result(m.id, pick_winner(m), None).unwrap();
            submitted += 1;
            assert_no_double_booking(engine, tournament);
        }
    }

    fn structure(engine: &Engine<MemoryStore>, tournament: TournamentId) -> Vec<String> {
        engine
            .store()
            .matches(tournament)
            .unwrap()
            .iter()
            .sorted_by_key(|m| m.id)
            .map(|m| {
                format!(
                    "{} r{} p{} {:?} {:?} -> {:?} extra:{}",
                    m.id,
                    m.round,
                    m.position,
                    m.competitor1,
                    m.competitor2,
                    m.winner,
                    m.is_extra_match
                )
            })
            .collect()
    }

    #[test]
    fn fixture_match_counts() {
        for n in 2..=33 {
            let (mut engine, t) = manual(n);
            let report = engine.generate_fixture(t).unwrap();

            let round1 = report.created.iter().filter(|m| m.round == 1).count();
            let extras: Vec<_> = report.created.iter().filter(|m| m.round == 0).collect();
            let waiting = report.created.iter().filter(|m| m.has_empty_slot()).count();
            assert_eq!(round1, n / 2, "{n} competitors");

            if n % 2 == 0 {
                assert!(extras.is_empty());
                assert_eq!(waiting, 0);
                assert_eq!(report.pending_extra_match, None);
            } else {
                assert_eq!(extras.len(), 1);
                assert!(extras[0].is_extra_match);
                assert_eq!(waiting, 1);
                assert_eq!(report.pending_extra_match, Some(extras[0].id));
            }
            assert!(report.created.iter().all(|m| !m.completed));
            assert_eq!(engine.store().matches(t).unwrap().len(), report.created.len());
            assert_eq!(engine.store().tournament(t).unwrap().unwrap().current_round, 1);
        }
    }

    #[test]
    fn not_enough_competitors() {
        let (mut engine, t) = manual(1);
        let error = engine.generate_fixture(t).unwrap_err();
        assert!(matches!(
            error,
            EngineError::Bracket(BracketError::NotEnoughCompetitors(2, 1))
        ));
        assert!(error.is_validation());
        assert!(engine.store().matches(t).unwrap().is_empty());
    }

    #[test]
    fn unknown_and_inactive_tournaments() {
        let (mut engine, t) = manual(4);
        assert!(matches!(
            engine.generate_fixture(TournamentId(99)),
            Err(EngineError::TournamentNotFound(TournamentId(99)))
        ));

        let mut tournament: Tournament = engine.store().tournament(t).unwrap().unwrap();
        tournament.active = false;
        engine.store_mut().update_tournament(&tournament).unwrap();
        let error = engine.generate_fixture(t).unwrap_err();
        assert!(matches!(error, EngineError::TournamentInactive(_)));
        assert!(error.is_validation());
    }

    #[test]
    fn regenerating_replaces_the_fixture() {
        let (mut engine, t) = manual(6);
        engine.generate_fixture(t).unwrap();
        let first = engine.pending_matches(t).unwrap()[0].clone();
        engine.submit_result(first.id, pick_winner(&first), None).unwrap();

        let report = engine.generate_fixture(t).unwrap();
        let stored = engine.store().matches(t).unwrap();
        assert_eq!(stored.len(), 3);
        assert_eq!(stored, report.created);
        assert!(stored.iter().all(|m| !m.completed));
    }

    #[test]
    fn same_seed_same_bracket() {
        for n in [5, 6, 7, 11, 13] {
            for _ in 0..5 {
                let seed = gen_seed();
                let (mut a, ta) =
                    setup(n, CombatMode::ManualArbitration, ExtraMatchPolicy::Random, seed);
                let (mut b, tb) =
                    setup(n, CombatMode::ManualArbitration, ExtraMatchPolicy::Random, seed);

                a.generate_fixture(ta).unwrap();
                b.generate_fixture(tb).unwrap();
                play_out(&mut a, ta);
                play_out(&mut b, tb);

                assert_eq!(structure(&a, ta), structure(&b, tb));
            }
        }
    }

    #[test]
    fn same_seed_same_autonomous_run() {
        for _ in 0..10 {
            let seed = gen_seed();
            let (mut a, ta) = setup(9, CombatMode::Autonomous, ExtraMatchPolicy::ByRanking, seed);
            let (mut b, tb) = setup(9, CombatMode::Autonomous, ExtraMatchPolicy::ByRanking, seed);
            run_autonomous(&mut a, ta);
            run_autonomous(&mut b, tb);

            assert_eq!(structure(&a, ta), structure(&b, tb));
            assert_eq!(a.standings(ta).unwrap(), b.standings(tb).unwrap());
        }
    }

    #[test]
    fn different_seeds_usually_differ() {
        let judged = CombatMode::ManualArbitration;
        let (mut a, ta) = setup(16, judged, ExtraMatchPolicy::Random, [1u8; 32]);
        let (mut b, tb) = setup(16, judged, ExtraMatchPolicy::Random, [2u8; 32]);
        a.generate_fixture(ta).unwrap();
        b.generate_fixture(tb).unwrap();
        assert_ne!(structure(&a, ta), structure(&b, tb));
    }

    #[test]
    fn result_validation() {
        let (mut engine, t) = manual(4);
        engine.generate_fixture(t).unwrap();
        let m = engine.pending_matches(t).unwrap()[0].clone();
        let outsider = engine
            .store()
            .active_competitors("Mini")
            .unwrap()[0]
            .id;

        let error = engine.submit_result(m.id, outsider, None).unwrap_err();
        assert!(matches!(
            error,
            EngineError::Bracket(BracketError::NotAMatchCompetitor(id, c))
                if id == m.id && c == outsider
        ));
        assert!(error.is_validation());
        assert!(!engine.store().get_match(m.id).unwrap().unwrap().completed);

        assert!(matches!(
            engine.submit_result(MatchId(999), outsider, None),
            Err(EngineError::MatchNotFound(MatchId(999)))
        ));

        engine.submit_result(m.id, pick_winner(&m), None).unwrap();
        let before = engine.store().matches(t).unwrap();
        let error = engine.submit_result(m.id, pick_winner(&m), None).unwrap_err();
        assert!(matches!(
            error,
            EngineError::Bracket(BracketError::MatchAlreadyCompleted(id)) if id == m.id
        ));
        assert_eq!(engine.store().matches(t).unwrap(), before);
    }

    #[test]
    fn result_details_are_recorded() {
        let (mut engine, t) = manual(2);
        engine.generate_fixture(t).unwrap();
        let m = engine.pending_matches(t).unwrap()[0].clone();
        let winner = m.competitor2.unwrap();

        let report = engine
            .submit_result(
                m.id,
                winner,
                Some(ResultDetails {
                    outcome_type: Some(OutcomeType::Immobilization),
                    description: Some("ten count".to_owned()),
                    judge_name: Some("Ada".to_owned()),
                }),
            )
            .unwrap();

        let updated = report.updated_match;
        assert!(updated.completed);
        assert_eq!(updated.winner, Some(winner));
        assert_eq!(updated.decision_method, DecisionMethod::Manual);
        assert_eq!(updated.outcome_type, Some(OutcomeType::Immobilization));
        assert_eq!(updated.outcome_description.as_deref(), Some("ten count"));
        assert_eq!(updated.judge_name.as_deref(), Some("Ada"));
        assert!(updated.completed_at.is_some());
        assert!(report.cascade_created.is_empty());
        assert_eq!(report.state, BracketState::TournamentComplete { champion: winner });

        let detail = engine.match_detail(m.id).unwrap();
        assert_eq!(detail.winner.map(|c| c.id), Some(winner));
        assert_eq!(detail.competitor1.map(|c| c.id), m.competitor1);
        assert_eq!(detail.competitor2.map(|c| c.id), m.competitor2);
    }

    #[test]
    fn five_competitors_full_run() {
        for _ in 0..20 {
            let (mut engine, t) = manual(5);
            engine.generate_fixture(t).unwrap();
            assert_eq!(engine.standings(t).unwrap(), Standings::default());

            // extra match, 2 round 1 matches, final
            assert_eq!(play_out(&mut engine, t), 4);

            let matches = engine.store().matches(t).unwrap();
            let last_round = matches.iter().map(|m| m.round).max().unwrap();
            let finals: Vec<_> = matches.iter().filter(|m| m.round == last_round).collect();
            assert_eq!(finals.len(), 1);

            let standings = engine.standings(t).unwrap();
            assert_eq!(standings.winner, finals[0].winner);
            assert_eq!(standings.runner_up, finals[0].loser());
            let third = standings.third_place.unwrap();
            assert_ne!(Some(third), standings.winner);
            assert_ne!(Some(third), standings.runner_up);

            let state = engine.bracket_state(t).unwrap();
            assert!(matches!(
                state,
                BracketState::TournamentComplete { champion } if Some(champion) == standings.winner
            ));
        }
    }

    #[test]
    fn any_size_completes() {
        for n in 2..=40 {
            let (mut engine, t) = manual(n);
            engine.generate_fixture(t).unwrap();
            let submitted = play_out(&mut engine, t);

            // Every match but the final eliminates one competitor
            assert_eq!(submitted, n - 1, "{n} competitors");
            let standings = engine.standings(t).unwrap();
            assert_eq!(standings.winner, Some(CompetitorId(1)), "lowest id always wins");
            assert!(standings.runner_up.is_some());
            if n >= 4 {
                assert!(standings.third_place.is_some(), "{n} competitors");
            }
        }
    }

    #[test]
    fn extra_match_blocks_the_round() {
        let (mut engine, t) = manual(7);
        let report = engine.generate_fixture(t).unwrap();
        let extra = report.pending_extra_match.unwrap();

        // Play every regular match first
        for m in engine.pending_matches(t).unwrap() {
            if m.id != extra {
                let report = engine.submit_result(m.id, pick_winner(&m), None).unwrap();
                assert!(report.cascade_created.is_empty());
                assert_eq!(report.state, BracketState::ExtraMatchPending { extra_match: extra });
            }
        }

        let m = engine.store().get_match(extra).unwrap().unwrap();
        let report = engine.submit_result(extra, pick_winner(&m), None).unwrap();
        // The winner joins the waiting match, which still has to be played
        assert_eq!(report.cascade_updated.len(), 1);
        assert!(report.cascade_updated[0].involves(pick_winner(&m)));
        assert!(report.cascade_created.is_empty());
        assert_eq!(report.state, BracketState::RegularRoundInProgress { round: 1 });
    }

    fn run_autonomous(engine: &mut Engine<MemoryStore>, tournament: TournamentId) {
        engine.generate_fixture(tournament).unwrap();
        loop {
            match engine.simulate_pending(tournament).unwrap().state {
                BracketState::TournamentComplete { .. } => return,
                BracketState::ExtraMatchPending { extra_match } => {
                    let m = engine.store().get_match(extra_match).unwrap().unwrap();
                    engine.submit_result(extra_match, pick_winner(&m), None).unwrap();
                }
                state @ BracketState::AwaitingFixture => panic!("unexpected state {state:?}"),
                _ => {}
            }
            assert_no_double_booking(engine, tournament);
        }
    }

    #[test]
    fn autonomous_run() {
        for n in 2..=20 {
            let (mut engine, t) =
                setup(n, CombatMode::Autonomous, ExtraMatchPolicy::Random, gen_seed());
            run_autonomous(&mut engine, t);

            let matches = engine.store().matches(t).unwrap();
            assert!(matches.iter().all(|m| m.completed));
            for m in &matches {
                if m.is_extra_match {
                    assert_eq!(m.decision_method, DecisionMethod::Manual);
                } else {
                    assert_eq!(m.decision_method, DecisionMethod::Automatic);
                    assert!(m.rounds_played >= 2);
                    assert!(m.outcome_description.is_some());
                }
            }
            assert!(engine.standings(t).unwrap().winner.is_some());
        }
    }

    #[test]
    fn extra_result_resumes_autonomous_run() {
        for _ in 0..20 {
            let (mut engine, t) =
                setup(5, CombatMode::Autonomous, ExtraMatchPolicy::Random, gen_seed());
            let extra = engine.generate_fixture(t).unwrap().pending_extra_match.unwrap();

            let report = engine.simulate_pending(t).unwrap();
            assert_eq!(report.simulated, 1);
            assert_eq!(report.state, BracketState::ExtraMatchPending { extra_match: extra });

            let m = engine.store().get_match(extra).unwrap().unwrap();
            let report = engine.submit_result(extra, pick_winner(&m), None).unwrap();

            // The waiting match and the final are played by the same event
            assert!(matches!(report.state, BracketState::TournamentComplete { .. }));
            assert_eq!(report.cascade_updated.len(), 1);
            assert!(report.cascade_updated[0].completed);
            assert_eq!(report.cascade_created.len(), 1);
            assert!(report.cascade_created[0].completed);
            assert!(engine.pending_matches(t).unwrap().is_empty());
            assert!(engine.standings(t).unwrap().third_place.is_some());
        }
    }

    #[test]
    fn simulation_rejected_for_judged_tournaments() {
        let (mut engine, t) = manual(4);
        engine.generate_fixture(t).unwrap();
        let error = engine.simulate_pending(t).unwrap_err();
        assert!(matches!(error, EngineError::Bracket(BracketError::NotAutonomous(_))));
        assert!(error.is_validation());
    }

    #[test]
    fn fairness_counters_across_rounds() {
        // 12 competitors: 6 winners, 3 in round 2 (extra match)
        let (mut engine, t) = setup(
            12,
            CombatMode::ManualArbitration,
            ExtraMatchPolicy::ByRanking,
            gen_seed(),
        );
        engine.generate_fixture(t).unwrap();
        play_out(&mut engine, t);

        let counted: u32 = engine
            .store()
            .active_competitors("Sumo")
            .unwrap()
            .iter()
            .map(|c| c.extra_match_count)
            .sum();
        let extras = engine
            .store()
            .matches(t)
            .unwrap()
            .iter()
            .filter(|m| m.is_extra_match)
            .count();
        assert!(extras > 0);
        assert_eq!(counted as usize, extras * 2);

        // A new run starts from zero
        engine.generate_fixture(t).unwrap();
        let counted: u32 = engine
            .store()
            .active_competitors("Sumo")
            .unwrap()
            .iter()
            .map(|c| c.extra_match_count)
            .sum();
        assert_eq!(counted, 0);
    }

    #[test]
    fn reset() {
        let (mut engine, t) = manual(8);
        engine.generate_fixture(t).unwrap();
        let m = engine.pending_matches(t).unwrap()[0].clone();
        engine.submit_result(m.id, pick_winner(&m), None).unwrap();

        engine.reset_tournament(t).unwrap();
        assert!(engine.store().matches(t).unwrap().is_empty());
        assert_eq!(engine.store().tournament(t).unwrap().unwrap().current_round, 0);
        assert_eq!(engine.bracket_state(t).unwrap(), BracketState::AwaitingFixture);
    }

    /// Delegates to a [`MemoryStore`], but can refuse to apply changesets.
    struct FlakyStore {
        inner: MemoryStore,
        fail: bool,
    }

    impl Store for FlakyStore {
        fn tournament(&self, id: TournamentId) -> Result<Option<Tournament>, StoreError> {
            self.inner.tournament(id)
        }

        fn competitor(&self, id: CompetitorId) -> Result<Option<Competitor>, StoreError> {
            self.inner.competitor(id)
        }

        fn active_competitors(&self, category: &str) -> Result<Vec<Competitor>, StoreError> {
            self.inner.active_competitors(category)
        }

        fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError> {
            self.inner.get_match(id)
        }

        fn matches(&self, tournament: TournamentId) -> Result<Vec<Match>, StoreError> {
            self.inner.matches(tournament)
        }

        fn next_match_id(&mut self) -> Result<MatchId, StoreError> {
            Store::next_match_id(&mut self.inner)
        }

        fn create_matches(&mut self, matches: &[Match]) -> Result<(), StoreError> {
            self.inner.create_matches(matches)
        }

        fn update_match(&mut self, m: &Match) -> Result<(), StoreError> {
            self.inner.update_match(m)
        }

        fn delete_all_matches(&mut self, tournament: TournamentId) -> Result<(), StoreError> {
            self.inner.delete_all_matches(tournament)
        }

        fn update_tournament(&mut self, tournament: &Tournament) -> Result<(), StoreError> {
            self.inner.update_tournament(tournament)
        }

        fn update_competitor_fairness_counters(
            &mut self,
            competitors: &[Competitor],
        ) -> Result<(), StoreError> {
            self.inner.update_competitor_fairness_counters(competitors)
        }

        fn apply(&mut self, changes: &Changeset) -> Result<(), StoreError> {
            if self.fail {
                return Err(StoreError::Backend("connection lost".to_owned()));
            }
            self.inner.apply(changes)
        }
    }

    #[test]
    fn persistence_failure_changes_nothing() {
        let (engine, t) = manual(6);
        let mut engine = Engine::new(
            FlakyStore {
                inner: engine.into_store(),
                fail: false,
            },
            EngineConfig::default(),
        );
        engine.generate_fixture(t).unwrap();
        let m = engine.pending_matches(t).unwrap()[0].clone();
        let before = engine.store().inner.matches(t).unwrap();

        engine.store_mut().fail = true;
        let error = engine.submit_result(m.id, pick_winner(&m), None).unwrap_err();
        assert!(error.is_transient());
        assert!(!error.is_validation());
        assert_eq!(engine.store().inner.matches(t).unwrap(), before);

        // The caller retries the whole event
        engine.store_mut().fail = false;
        let report = engine.submit_result(m.id, pick_winner(&m), None).unwrap();
        assert!(report.updated_match.completed);
    }
}
