#![forbid(unsafe_code)]

//! Single-elimination bracket progression for head-to-head tournaments.
//!
//! The [`engine::Engine`] drives a tournament through fixture generation, result submission and
//! round advancement against a [`store::Store`]. All randomness is derived from the tournament
//! seed, so replaying the same results against the same seed rebuilds the same bracket.

use rand::{thread_rng, Rng};
use serde::{Deserialize, Serialize};

pub mod bracket;
pub mod config;
pub mod engine;
pub mod extra_match;
pub mod model;
pub mod simulation;
pub mod standings;
pub mod store;

pub use bracket::BracketState;
pub use config::{EngineConfig, RoundsToWin};
pub use engine::{
    Engine, EngineError, FixtureReport, MatchDetail, SimulationReport, SubmitReport,
};
pub use model::{
    CombatMode, Competitor, CompetitorId, DecisionMethod, ExtraMatchPolicy, Match, MatchId,
    OutcomeType, Rating, ResultDetails, Tournament, TournamentId,
};
pub use standings::Standings;
pub use store::{Changeset, MemoryStore, Store, StoreError};

/// Minimum number of competitors to generate a fixture.
pub const MIN_COMPETITORS: usize = 2;

/// The random generator used for every shuffle and draw of the engine.
pub type RandGen = rand_pcg::Pcg64;

/// Hashes arbitrary input into a seed for [`RandGen`].
pub type Seeder = rand_seeder::Seeder;

/// A tournament seed. Fixed at tournament creation.
pub type Seed = [u8; 32];

/// The context a random stream is derived for.
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum Salt {
    /// Initial pairing of the tournament.
    Fixture,
    /// Pairing of the given (upcoming) round.
    Round(u32),
    /// Simulation of the given match.
    Match(MatchId),
}

/// Generates a fresh tournament seed. Only meant to be called when a tournament is created.
#[inline]
pub fn gen_seed() -> Seed {
    thread_rng().gen()
}

/// Derives the random stream for `salt` from the tournament `seed`.
///
/// The same `(seed, salt)` couple always yields the same sequence.
#[inline]
pub fn derive_rng(seed: &Seed, salt: Salt) -> RandGen {
    Seeder::from((seed, salt)).make_rng()
}
