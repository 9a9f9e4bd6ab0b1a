//! Persistence contract of the engine, plus an in-memory implementation.

use crate::model::{
    CombatMode, Competitor, CompetitorId, ExtraMatchPolicy, Match, MatchId, Tournament,
    TournamentId,
};
use crate::{gen_seed, Seed};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone)]
#[cfg_attr(test, derive(Eq, PartialEq))]
#[non_exhaustive]
pub enum StoreError {
    /// The match to update doesn't exist.
    #[error("match {0} doesn't exist")]
    UnknownMatch(MatchId),
    /// The competitor to update doesn't exist.
    #[error("competitor {0} doesn't exist")]
    UnknownCompetitor(CompetitorId),
    /// The tournament to update doesn't exist.
    #[error("tournament {0} doesn't exist")]
    UnknownTournament(TournamentId),
    /// The backend failed to read or write.
    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Every write produced by a single engine event.
#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct Changeset {
    /// Deletes every match of this tournament before anything else.
    pub clear_matches: Option<TournamentId>,
    pub created: Vec<Match>,
    pub updated: Vec<Match>,
    /// Competitors whose extra match counter changed.
    pub fairness: Vec<Competitor>,
    pub tournament: Option<Tournament>,
}

impl Changeset {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.clear_matches.is_none()
            && self.created.is_empty()
            && self.updated.is_empty()
            && self.fairness.is_empty()
            && self.tournament.is_none()
    }
}

/// Storage of competitors, tournaments and matches.
///
/// Reads return plain records, references between them are ids.
pub trait Store {
    fn tournament(&self, id: TournamentId) -> Result<Option<Tournament>, StoreError>;

    fn competitor(&self, id: CompetitorId) -> Result<Option<Competitor>, StoreError>;

    /// Active competitors of `category`.
    fn active_competitors(&self, category: &str) -> Result<Vec<Competitor>, StoreError>;

    fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError>;

    /// Every match of `tournament`, in any order.
    fn matches(&self, tournament: TournamentId) -> Result<Vec<Match>, StoreError>;

    /// Reserves a fresh match id. Ids reserved by a changeset that is never applied are lost.
    fn next_match_id(&mut self) -> Result<MatchId, StoreError>;

    fn create_matches(&mut self, matches: &[Match]) -> Result<(), StoreError>;

    fn update_match(&mut self, m: &Match) -> Result<(), StoreError>;

    fn delete_all_matches(&mut self, tournament: TournamentId) -> Result<(), StoreError>;

    fn update_tournament(&mut self, tournament: &Tournament) -> Result<(), StoreError>;

    /// Stores the extra match counter of `competitors`, nothing else.
    fn update_competitor_fairness_counters(
        &mut self,
        competitors: &[Competitor],
    ) -> Result<(), StoreError>;

    /// Applies every write of `changes`, all together or none at all.
    ///
    /// The default implementation applies them one after the other and is only atomic if the
    /// backend wraps it in a transaction.
    fn apply(&mut self, changes: &Changeset) -> Result<(), StoreError> {
        apply_sequentially(self, changes)
    }
}

/// Applies the writes of `changes` in order: deletion, creations, updates, counters, tournament.
pub fn apply_sequentially<S: Store + ?Sized>(
    store: &mut S,
    changes: &Changeset,
) -> Result<(), StoreError> {
    if let Some(tournament) = changes.clear_matches {
        store.delete_all_matches(tournament)?;
    }
    if !changes.created.is_empty() {
        store.create_matches(&changes.created)?;
    }
    for m in &changes.updated {
        store.update_match(m)?;
    }
    if !changes.fairness.is_empty() {
        store.update_competitor_fairness_counters(&changes.fairness)?;
    }
    if let Some(tournament) = &changes.tournament {
        store.update_tournament(tournament)?;
    }
    Ok(())
}

/// A [`Store`] kept in memory. [`Store::apply`] stages the writes on a copy, so a failing
/// changeset leaves the store untouched.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    competitors: IndexMap<CompetitorId, Competitor>,
    tournaments: IndexMap<TournamentId, Tournament>,
    matches: IndexMap<MatchId, Match>,
    last_competitor_id: u64,
    last_tournament_id: u64,
    last_match_id: u64,
}

impl MemoryStore {
    #[inline]
    pub fn new() -> MemoryStore {
        Self::default()
    }

    /// Registers an active competitor and returns its id.
    pub fn add_competitor(
        &mut self,
        name: impl Into<String>,
        team: impl Into<String>,
        category: impl Into<String>,
    ) -> CompetitorId {
        self.last_competitor_id += 1;
        let id = CompetitorId(self.last_competitor_id);
        self.competitors
            .insert(id, Competitor::new(id, name, team, category));
        id
    }

    /// Replaces (or inserts) a competitor record.
    pub fn put_competitor(&mut self, competitor: Competitor) {
        self.last_competitor_id = self.last_competitor_id.max(competitor.id.0);
        self.competitors.insert(competitor.id, competitor);
    }

    /// Deactivates a competitor. Returns `false` if it doesn't exist.
    pub fn deactivate_competitor(&mut self, id: CompetitorId) -> bool {
        match self.competitors.get_mut(&id) {
            Some(competitor) => {
                competitor.active = false;
                true
            }
            None => false,
        }
    }

    /// Creates a tournament. A seed is generated when none is supplied.
    pub fn create_tournament(
        &mut self,
        name: impl Into<String>,
        category: impl Into<String>,
        mode: CombatMode,
        extra_match_policy: ExtraMatchPolicy,
        seed: Option<Seed>,
    ) -> TournamentId {
        self.last_tournament_id += 1;
        let id = TournamentId(self.last_tournament_id);
        let seed = seed.unwrap_or_else(gen_seed);
        self.tournaments.insert(
            id,
            Tournament::new(id, name, category, mode, extra_match_policy, seed),
        );
        id
    }
}

impl Store for MemoryStore {
    fn tournament(&self, id: TournamentId) -> Result<Option<Tournament>, StoreError> {
        Ok(self.tournaments.get(&id).cloned())
    }

    fn competitor(&self, id: CompetitorId) -> Result<Option<Competitor>, StoreError> {
        Ok(self.competitors.get(&id).cloned())
    }

    fn active_competitors(&self, category: &str) -> Result<Vec<Competitor>, StoreError> {
        Ok(self
            .competitors
            .values()
            .filter(|c| c.active && c.category == category)
            .cloned()
            .collect())
    }

    fn get_match(&self, id: MatchId) -> Result<Option<Match>, StoreError> {
        Ok(self.matches.get(&id).cloned())
    }

    fn matches(&self, tournament: TournamentId) -> Result<Vec<Match>, StoreError> {
        Ok(self
            .matches
            .values()
            .filter(|m| m.tournament == tournament)
            .cloned()
            .collect())
    }

    fn next_match_id(&mut self) -> Result<MatchId, StoreError> {
        self.last_match_id += 1;
        Ok(MatchId(self.last_match_id))
    }

    fn create_matches(&mut self, matches: &[Match]) -> Result<(), StoreError> {
        for m in matches {
            self.last_match_id = self.last_match_id.max(m.id.0);
            self.matches.insert(m.id, m.clone());
        }
        Ok(())
    }

    fn update_match(&mut self, m: &Match) -> Result<(), StoreError> {
        let stored = self
            .matches
            .get_mut(&m.id)
            .ok_or(StoreError::UnknownMatch(m.id))?;
        *stored = m.clone();
        Ok(())
    }

    fn delete_all_matches(&mut self, tournament: TournamentId) -> Result<(), StoreError> {
        self.matches.retain(|_, m| m.tournament != tournament);
        Ok(())
    }

    fn update_tournament(&mut self, tournament: &Tournament) -> Result<(), StoreError> {
        let stored = self
            .tournaments
            .get_mut(&tournament.id)
            .ok_or(StoreError::UnknownTournament(tournament.id))?;
        *stored = tournament.clone();
        Ok(())
    }

    fn update_competitor_fairness_counters(
        &mut self,
        competitors: &[Competitor],
    ) -> Result<(), StoreError> {
        for competitor in competitors {
            self.competitors
                .get_mut(&competitor.id)
                .ok_or(StoreError::UnknownCompetitor(competitor.id))?
                .extra_match_count = competitor.extra_match_count;
        }
        Ok(())
    }

    fn apply(&mut self, changes: &Changeset) -> Result<(), StoreError> {
        let mut staged = self.clone();
        apply_sequentially(&mut staged, changes)?;
        *self = staged;
        Ok(())
    }
}
