//! Children of a branch node, keyed by sector.

use std::collections::HashMap;
use std::hash::Hash;

use generational_arena::Index;

use crate::domain::key::SectorKey;

/// Registered children of a branch.
///
/// `slots` gives uniform random access for selection; `by_key` gives O(1)
/// lookup for the owner. Both always hold the same set of children.
#[derive(Debug)]
pub struct Sectors<C> {
    slots: Vec<Index>,
    by_key: HashMap<SectorKey<C>, Index>,
}

impl<C> Default for Sectors<C> {
    fn default() -> Self {
        Self {
            slots: Vec::new(),
            by_key: HashMap::new(),
        }
    }
}

impl<C: Clone + Eq + Hash> Sectors<C> {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, key: &SectorKey<C>) -> Option<Index> {
        self.by_key.get(key).copied()
    }

    pub fn contains(&self, child: Index) -> bool {
        self.slots.contains(&child)
    }

    /// Children in slot order; callers draw from this copy while the live
    /// set shrinks underneath them through pruning.
    pub fn to_vec(&self) -> Vec<Index> {
        self.slots.clone()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SectorKey<C>, Index)> {
        self.by_key.iter().map(|(k, &idx)| (k, idx))
    }

    pub(crate) fn insert(&mut self, key: SectorKey<C>, child: Index) {
        self.slots.push(child);
        self.by_key.insert(key, child);
    }

    /// Unregisters `child`. Returns false when it was not registered here.
    pub(crate) fn detach(&mut self, key: &SectorKey<C>, child: Index) -> bool {
        let Some(pos) = self.slots.iter().position(|&idx| idx == child) else {
            return false;
        };
        self.slots.swap_remove(pos);
        if self.by_key.get(key) == Some(&child) {
            self.by_key.remove(key);
        } else {
            self.by_key.retain(|_, idx| *idx != child);
        }
        true
    }

    /// Moves `child` from `old` to `new` without touching its slot.
    pub(crate) fn rekey(&mut self, old: &SectorKey<C>, new: SectorKey<C>) -> bool {
        match self.by_key.remove(old) {
            Some(child) => {
                self.by_key.insert(new, child);
                true
            }
            None => false,
        }
    }
}
