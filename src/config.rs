use serde::{Deserialize, Serialize};
use std::num::NonZero;
use thiserror::Error;

/// Highest accepted number of rounds to win. Round counters of a match hold at most
/// `2 * MAX_ROUNDS_TO_WIN - 1` rounds.
pub const MAX_ROUNDS_TO_WIN: u8 = 127;

#[derive(Error, Debug)]
#[cfg_attr(test, derive(Eq, PartialEq))]
#[non_exhaustive]
pub enum ConfigError {
    /// The number of rounds to win is outside of 1..=[`MAX_ROUNDS_TO_WIN`].
    #[error("rounds to win {0} is out of range (1..=127)")]
    RoundsToWinOutOfRange(u8),
}

/// Simulated rounds a competitor must win to take a match (2 plays a best-of-3).
#[derive(Serialize, Deserialize, Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(try_from = "u8", into = "u8")]
pub struct RoundsToWin(NonZero<u8>);

impl RoundsToWin {
    pub const BEST_OF_THREE: RoundsToWin = RoundsToWin(NonZero::<u8>::MIN.saturating_add(1));

    #[inline]
    pub fn new(value: u8) -> Result<RoundsToWin, ConfigError> {
        match NonZero::new(value) {
            Some(rounds) if value <= MAX_ROUNDS_TO_WIN => Ok(RoundsToWin(rounds)),
            _ => Err(ConfigError::RoundsToWinOutOfRange(value)),
        }
    }

    #[inline(always)]
    pub fn get(self) -> u8 {
        self.0.get()
    }

    /// Maximum number of rounds a simulated match can last.
    #[inline]
    pub fn max_rounds(self) -> u8 {
        self.get() * 2 - 1
    }
}

impl Default for RoundsToWin {
    #[inline(always)]
    fn default() -> Self {
        RoundsToWin::BEST_OF_THREE
    }
}

impl TryFrom<u8> for RoundsToWin {
    type Error = ConfigError;

    #[inline]
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        RoundsToWin::new(value)
    }
}

impl From<RoundsToWin> for u8 {
    #[inline(always)]
    fn from(rounds: RoundsToWin) -> Self {
        rounds.get()
    }
}

/// Engine settings. Every field falls back to its default when missing from the source.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub rounds_to_win: RoundsToWin,
    /// Whether the ranking policy may rank by tournament wins once every candidate played the
    /// same number of matches. Ratings alone are used otherwise.
    pub dynamic_ranking: bool,
    /// Maximum length of a result description.
    pub max_description_len: usize,
    /// Maximum length of a judge name.
    pub max_judge_name_len: usize,
}

impl Default for EngineConfig {
    #[inline]
    fn default() -> Self {
        EngineConfig {
            rounds_to_win: RoundsToWin::default(),
            dynamic_ranking: true,
            max_description_len: 500,
            max_judge_name_len: 100,
        }
    }
}
