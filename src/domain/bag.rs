//! Leaf bag: an unordered collection of items belonging to one sector.

use std::sync::Arc;

use rand::Rng;
use tracing::trace;

use crate::domain::item::{Exclusion, GrabItem};

/// Outcome of one random pick.
#[derive(Debug)]
pub struct Pick<T> {
    /// The accepted item, already compacted out and unlinked.
    pub item: Option<Arc<T>>,
    /// Finished items discarded while probing.
    pub purged: usize,
    /// Items passed over because they were excluded or not removable now.
    pub rejected: usize,
}

/// Items of a leaf node. Order carries no meaning and is freely permuted.
#[derive(Debug)]
pub struct Bag<T> {
    items: Vec<Arc<T>>,
}

impl<T> Default for Bag<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T: GrabItem> Bag<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.items.iter()
    }

    pub(crate) fn push(&mut self, item: Arc<T>) {
        self.items.push(item);
    }

    /// Removes and returns a random eligible item.
    ///
    /// `items[..window]` holds the candidates not yet probed in this call.
    /// Every probe retires one candidate: a rejected item is swapped just
    /// past the window (it stays in the bag), a finished or accepted item is
    /// swapped past the window and popped. The number of failed attempts is
    /// therefore bounded by the bag size and every item is looked at at most
    /// once per call.
    pub fn pick<E, R>(&mut self, exclusion: &E, rng: &mut R) -> Pick<T>
    where
        E: Exclusion<T> + ?Sized,
        R: Rng,
    {
        let mut pick = Pick {
            item: None,
            purged: 0,
            rejected: 0,
        };
        let mut window = self.items.len();

        while window > 0 {
            let slot = rng.random_range(0..window);
            let candidate = &self.items[slot];

            if candidate.is_finished() {
                let gone = self.take(slot, window);
                gone.link().release();
                pick.purged += 1;
                window -= 1;
                continue;
            }

            if exclusion.exclude(candidate) || !candidate.can_remove_now() {
                self.items.swap(slot, window - 1);
                pick.rejected += 1;
                window -= 1;
                continue;
            }

            let chosen = self.take(slot, window);
            chosen.link().release();
            pick.item = Some(chosen);
            break;
        }

        trace!(
            picked = pick.item.is_some(),
            purged = pick.purged,
            rejected = pick.rejected,
            remaining = self.items.len(),
            "bag pick"
        );
        pick
    }

    /// Explicit removal by identity (linear scan, then compaction).
    pub fn remove(&mut self, item: &Arc<T>) -> bool {
        match self.items.iter().position(|held| Arc::ptr_eq(held, item)) {
            Some(pos) => {
                let gone = self.items.swap_remove(pos);
                gone.link().release();
                true
            }
            None => false,
        }
    }

    /// Moves `items[slot]` to the end of the window and pops it. The element
    /// that fills the hole comes from the rejected tail, so the candidate
    /// window shrinks by exactly one.
    fn take(&mut self, slot: usize, window: usize) -> Arc<T> {
        self.items.swap(slot, window - 1);
        self.items.swap_remove(window - 1)
    }
}
