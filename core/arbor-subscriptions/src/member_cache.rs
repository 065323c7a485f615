//! Member sets of descendants traversals, keyed by member key.
//!
//! A set is loaded when a subscription that traverses descendants is
//! evaluated, and kept current from `ancestors` and delete events, so an
//! entity that leaves a subtree is still recognized as a former member.

use std::collections::{BTreeSet, HashMap};
use tracing::debug;

pub(crate) const ANCESTORS: &str = "ancestors";

#[derive(Debug)]
pub(crate) struct MemberCache {
    /// Total member ids held across all sets.
    capacity: usize,
    size: usize,
    sets: HashMap<String, BTreeSet<String>>,
}

impl MemberCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            size: 0,
            sets: HashMap::new(),
        }
    }

    pub(crate) fn contains_key(&self, key: &str) -> bool {
        self.sets.contains_key(key)
    }

    /// Stores the members of `key`. Everything is dropped first when the
    /// new set would not fit.
    pub(crate) fn insert(&mut self, key: &str, members: BTreeSet<String>) {
        if let Some(old) = self.sets.remove(key) {
            self.size -= old.len();
        }
        if self.size + members.len() > self.capacity {
            debug!(sets = self.sets.len(), size = self.size, "member cache full, clearing");
            self.sets.clear();
            self.size = 0;
        }
        self.size += members.len();
        self.sets.insert(key.to_string(), members);
    }

    /// Records whether `id` is now a member of `key`. Returns whether it
    /// was one before, or `None` when the set is not cached.
    pub(crate) fn update(&mut self, key: &str, id: &str, member: bool) -> Option<bool> {
        let set = self.sets.get_mut(key)?;
        let was = if member {
            let added = set.insert(id.to_string());
            if added {
                self.size += 1;
            }
            !added
        } else {
            let removed = set.remove(id);
            if removed {
                self.size -= 1;
            }
            removed
        };
        Some(was)
    }

    /// Drops sets no live subscription refers to.
    pub(crate) fn retain(&mut self, live: &BTreeSet<&str>) {
        self.sets.retain(|key, _| live.contains(key.as_str()));
        self.size = self.sets.values().map(BTreeSet::len).sum();
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.size
    }
}
