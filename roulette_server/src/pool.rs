//! Waiting pool of connections looking for a partner

use crate::protocol::{ConnectionId, Preferences};
use rand::seq::IndexedRandom;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Instant;

/// A connection currently in the waiting pool
#[derive(Debug, Clone)]
pub struct WaitingEntry {
    pub connection_id: ConnectionId,
    pub enqueued_at: Instant,
    pub preferences: Preferences,
    seq: u64,
}

/// How the pairing engine picks one waiter among the eligible candidates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SelectionPolicy {
    /// Longest-waiting first. Entries with equal timestamps keep insertion
    /// order.
    #[default]
    Fifo,
    /// Uniformly random among all eligible waiters
    Random,
}

impl SelectionPolicy {
    pub fn select(self, mut candidates: impl Iterator<Item = ConnectionId>) -> Option<ConnectionId> {
        match self {
            SelectionPolicy::Fifo => candidates.next(),
            SelectionPolicy::Random => {
                let eligible: Vec<ConnectionId> = candidates.collect();
                eligible.choose(&mut rand::rng()).copied()
            }
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectionPolicy::Fifo => f.write_str("fifo"),
            SelectionPolicy::Random => f.write_str("random"),
        }
    }
}

impl FromStr for SelectionPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Ok(SelectionPolicy::Fifo),
            "random" => Ok(SelectionPolicy::Random),
            other => Err(format!("unknown selection policy `{other}` (expected fifo or random)")),
        }
    }
}

/// Set of waiting connections, iterable in FIFO order
#[derive(Debug, Default)]
pub struct WaitingPool {
    entries: HashMap<ConnectionId, WaitingEntry>,
    order: BTreeMap<u64, ConnectionId>,
    next_seq: u64,
}

impl WaitingPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `id` to the pool. Returns false, leaving the existing entry
    /// untouched, if it is already waiting.
    pub fn enqueue(&mut self, id: ConnectionId, preferences: Preferences) -> bool {
        if self.entries.contains_key(&id) {
            return false;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.order.insert(seq, id);
        self.entries.insert(
            id,
            WaitingEntry {
                connection_id: id,
                enqueued_at: Instant::now(),
                preferences,
                seq,
            },
        );
        true
    }

    /// Remove `id` if present, returning its entry
    pub fn dequeue_if_present(&mut self, id: ConnectionId) -> Option<WaitingEntry> {
        let entry = self.entries.remove(&id)?;
        self.order.remove(&entry.seq);
        Some(entry)
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&WaitingEntry> {
        self.entries.get(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All waiting ids, oldest first
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.order.values().copied().collect()
    }

    /// Live, compatible waiters other than `excluding`, oldest first.
    ///
    /// Liveness is evaluated lazily as the iterator is consumed, so closed
    /// connections still sitting in the pool are skipped.
    pub fn candidates<'a, F>(
        &'a self,
        excluding: ConnectionId,
        preferences: &'a Preferences,
        is_live: F,
    ) -> impl Iterator<Item = ConnectionId> + 'a
    where
        F: Fn(ConnectionId) -> bool + 'a,
    {
        self.order
            .values()
            .copied()
            .filter(move |id| *id != excluding)
            .filter(move |id| {
                self.entries
                    .get(id)
                    .is_some_and(|entry| entry.preferences.is_compatible_with(preferences))
            })
            .filter(move |id| is_live(*id))
    }

    /// Drop every entry whose connection is no longer live, returning the
    /// evicted ids.
    pub fn retain_live(&mut self, is_live: impl Fn(ConnectionId) -> bool) -> Vec<ConnectionId> {
        let stale: Vec<ConnectionId> = self
            .order
            .values()
            .copied()
            .filter(|id| !is_live(*id))
            .collect();
        for id in &stale {
            self.dequeue_if_present(*id);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn ids(n: usize) -> Vec<ConnectionId> {
        (0..n).map(|_| ConnectionId::new()).collect()
    }

    #[test]
    fn enqueue_is_idempotent_per_id() {
        let mut pool = WaitingPool::new();
        let a = ConnectionId::new();

        assert!(pool.enqueue(a, Preferences::default()));
        let first_seq = pool.get(a).unwrap().seq;
        assert!(!pool.enqueue(a, Preferences::default()));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(a).unwrap().seq, first_seq);
    }

    #[test]
    fn dequeue_is_idempotent() {
        let mut pool = WaitingPool::new();
        let a = ConnectionId::new();
        pool.enqueue(a, Preferences::default());

        assert!(pool.dequeue_if_present(a).is_some());
        assert!(pool.dequeue_if_present(a).is_none());
        assert!(pool.is_empty());
        assert!(pool.ids().is_empty());
    }

    #[test]
    fn candidates_are_oldest_first_and_skip_excluded_and_dead() {
        let mut pool = WaitingPool::new();
        let all = ids(4);
        for id in &all {
            pool.enqueue(*id, Preferences::default());
        }
        let dead = all[1];
        let prefs = Preferences::default();

        let found: Vec<_> = pool.candidates(all[0], &prefs, |id| id != dead).collect();
        assert_eq!(found, vec![all[2], all[3]]);
    }

    #[test]
    fn requeued_entry_moves_to_the_back() {
        let mut pool = WaitingPool::new();
        let all = ids(3);
        for id in &all {
            pool.enqueue(*id, Preferences::default());
        }
        pool.dequeue_if_present(all[0]);
        pool.enqueue(all[0], Preferences::default());

        assert_eq!(pool.ids(), vec![all[1], all[2], all[0]]);
    }

    #[test]
    fn fifo_policy_picks_the_oldest() {
        let all = ids(3);
        assert_eq!(
            SelectionPolicy::Fifo.select(all.clone().into_iter()),
            Some(all[0])
        );
        assert_eq!(SelectionPolicy::Fifo.select(std::iter::empty()), None);
    }

    #[test]
    fn random_policy_only_picks_eligible_candidates() {
        let all = ids(5);
        let eligible: HashSet<_> = all[1..].iter().copied().collect();
        for _ in 0..50 {
            let picked = SelectionPolicy::Random
                .select(all[1..].iter().copied())
                .unwrap();
            assert!(eligible.contains(&picked));
        }
        assert_eq!(SelectionPolicy::Random.select(std::iter::empty()), None);
    }

    #[test]
    fn selection_policy_parses_case_insensitively() {
        assert_eq!("FIFO".parse::<SelectionPolicy>(), Ok(SelectionPolicy::Fifo));
        assert_eq!("random".parse::<SelectionPolicy>(), Ok(SelectionPolicy::Random));
        assert!("oldest".parse::<SelectionPolicy>().is_err());
        assert_eq!(SelectionPolicy::Random.to_string(), "random");
    }

    #[test]
    fn retain_live_evicts_only_dead_entries() {
        let mut pool = WaitingPool::new();
        let all = ids(3);
        for id in &all {
            pool.enqueue(*id, Preferences::default());
        }

        let evicted = pool.retain_live(|id| id != all[1]);
        assert_eq!(evicted, vec![all[1]]);
        assert_eq!(pool.ids(), vec![all[0], all[2]]);
    }
}
