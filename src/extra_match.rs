//! Selection of the two competitors of an extra match.
//!
//! When a round has an odd number of competitors, two of them play an extra match so that the
//! rest of the round can be paired. Competitors who played fewer extra matches are always
//! preferred, the [`ExtraMatchPolicy`] only breaks the remaining ties.

use crate::model::{CompetitorId, ExtraMatchPolicy};
use itertools::Itertools;
use log::debug;
use rand::prelude::SliceRandom;
use rand::Rng;

/// A competitor eligible for an extra match.
pub trait Candidate {
    fn id(&self) -> CompetitorId;

    /// Number of extra matches already played in this tournament run.
    fn extra_matches(&self) -> u32;

    /// Called on both selected candidates.
    fn add_extra_match(&mut self);

    fn rating(&self) -> i32;

    /// Completed regular (non-extra) matches played in this tournament.
    fn matches_played(&self) -> usize;

    /// Regular matches won in this tournament.
    fn wins(&self) -> usize;
}

/// Context of a selection.
#[derive(Copy, Clone, Debug)]
pub struct Selection {
    pub policy: ExtraMatchPolicy,
    /// Whether the selection happens before the first round of the bracket is played.
    pub first_round: bool,
    /// Whether tournament wins may be used to rank candidates.
    pub dynamic_ranking: bool,
}

/// Selects two candidates of `pool` for an extra match and increments their extra match count.
///
/// Returns the indexes of the selected candidates, or [`None`] if `pool` has less than two
/// candidates. The pool is never reordered.
pub fn select_extra_pair<C: Candidate>(
    pool: &mut [C],
    selection: Selection,
    rng: &mut impl Rng,
) -> Option<(usize, usize)> {
    if pool.len() < 2 {
        return None;
    }

    let min = pool.iter().map(|c| c.extra_matches()).min()?;
    let (least_burdened, others): (Vec<usize>, Vec<usize>) =
        (0..pool.len()).partition(|&i| pool[i].extra_matches() == min);

    let chosen: Vec<usize> = match least_burdened.len() {
        2 => least_burdened,
        n if n > 2 => rank(pool, least_burdened, selection, rng)
            .into_iter()
            .take(2)
            .collect(),
        _ => {
            // Only one least burdened candidate, the other one comes from the next counts
            let mut backfill = rank(pool, others, selection, rng);
            backfill.sort_by_key(|&i| pool[i].extra_matches()); // Stable, keeps the policy order
            least_burdened.into_iter().chain(backfill).take(2).collect()
        }
    };

    let &[first, second] = chosen.as_slice() else {
        return None;
    };

    pool[first].add_extra_match();
    pool[second].add_extra_match();

    debug!(
        "selected {} and {} for an extra match ({:?}, candidates: {})",
        pool[first].id(),
        pool[second].id(),
        selection.policy,
        pool.iter().map(|c| c.id()).join(", "),
    );

    Some((first, second))
}

/// Orders `indexes` according to the selection policy, the first ones being the first to play.
fn rank<C: Candidate>(
    pool: &[C],
    mut indexes: Vec<usize>,
    selection: Selection,
    rng: &mut impl Rng,
) -> Vec<usize> {
    indexes.shuffle(rng);

    if selection.policy == ExtraMatchPolicy::ByRanking {
        // Sorting keeps the random order (gave by shuffle) between equally ranked candidates
        if dynamic_ranking_admissible(pool, &indexes, selection) {
            indexes.sort_by_key(|&i| (pool[i].wins(), pool[i].rating()));
        } else {
            indexes.sort_by_key(|&i| pool[i].rating());
        }
    }

    indexes
}

/// Tournament wins are only comparable between candidates who played the same number of matches.
fn dynamic_ranking_admissible<C: Candidate>(
    pool: &[C],
    indexes: &[usize],
    selection: Selection,
) -> bool {
    selection.dynamic_ranking
        && !selection.first_round
        && indexes.iter().map(|&i| pool[i].matches_played()).all_equal()
}

// TRAIT DEFAULT IMPLEMENTATIONS

impl<C: Candidate> Candidate for &mut C {
    #[inline]
    fn id(&self) -> CompetitorId {
        (**self).id()
    }

    #[inline]
    fn extra_matches(&self) -> u32 {
        (**self).extra_matches()
    }

    #[inline]
    fn add_extra_match(&mut self) {
        (**self).add_extra_match();
    }

    #[inline]
    fn rating(&self) -> i32 {
        (**self).rating()
    }

    #[inline]
    fn matches_played(&self) -> usize {
        (**self).matches_played()
    }

    #[inline]
    fn wins(&self) -> usize {
        (**self).wins()
    }
}
