//! Reviewer draw strategies.
//!
//! Stores filter the eligible pool themselves and delegate the final pick to
//! a `ReviewerSelector`, so tests can swap in a seeded or ordered draw.

use std::sync::{Arc, Mutex, PoisonError};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::models::User;

/// Picks up to `limit` reviewers out of an eligible pool.
pub trait ReviewerSelector: Send + Sync {
    fn choose(&self, pool: Vec<User>, limit: usize) -> Vec<User>;
}

/// Uniform random draw without replacement.
pub struct RandomSelector {
    rng: Mutex<StdRng>,
}

impl RandomSelector {
    /// Reproducible draw for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    pub fn from_entropy() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }
}

impl ReviewerSelector for RandomSelector {
    fn choose(&self, mut pool: Vec<User>, limit: usize) -> Vec<User> {
        if pool.len() <= limit {
            return pool;
        }
        let mut rng = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        let (chosen, _) = pool.partial_shuffle(&mut *rng, limit);
        chosen.to_vec()
    }
}

/// Takes the first `limit` users of the pool as given.
#[derive(Debug, Default, Clone, Copy)]
pub struct OrderedSelector;

impl ReviewerSelector for OrderedSelector {
    fn choose(&self, pool: Vec<User>, limit: usize) -> Vec<User> {
        pool.into_iter().take(limit).collect()
    }
}

/// Selector for an optional seed: seeded when given, entropy otherwise.
pub fn selector_for_seed(seed: Option<u64>) -> Arc<dyn ReviewerSelector> {
    match seed {
        Some(seed) => Arc::new(RandomSelector::seeded(seed)),
        None => Arc::new(RandomSelector::from_entropy()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(n: usize) -> Vec<User> {
        (0..n)
            .map(|i| User {
                id: format!("u-{}", i),
                username: format!("user{}", i),
                team_id: 1,
                team_name: String::new(),
                is_active: true,
            })
            .collect()
    }

    fn ids(users: &[User]) -> Vec<String> {
        users.iter().map(|u| u.id.clone()).collect()
    }

    #[test]
    fn test_small_pool_returned_whole() {
        let chosen = RandomSelector::seeded(7).choose(pool(2), 5);
        assert_eq!(ids(&chosen), vec!["u-0", "u-1"]);
    }

    #[test]
    fn test_random_draw_respects_limit_and_pool() {
        let all = ids(&pool(10));
        let chosen = RandomSelector::seeded(7).choose(pool(10), 3);
        assert_eq!(chosen.len(), 3);
        for user in &chosen {
            assert!(all.contains(&user.id));
        }
        let mut unique = ids(&chosen);
        unique.sort();
        unique.dedup();
        assert_eq!(unique.len(), 3);
    }

    #[test]
    fn test_same_seed_same_draw() {
        let a = RandomSelector::seeded(42).choose(pool(10), 2);
        let b = RandomSelector::seeded(42).choose(pool(10), 2);
        assert_eq!(ids(&a), ids(&b));
    }

    #[test]
    fn test_ordered_selector_takes_prefix() {
        let chosen = OrderedSelector.choose(pool(4), 2);
        assert_eq!(ids(&chosen), vec!["u-0", "u-1"]);
        assert!(OrderedSelector.choose(pool(4), 0).is_empty());
    }
}
