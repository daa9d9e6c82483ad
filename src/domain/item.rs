//! Item and exclusion contracts: what the tree needs from schedulable work.

use std::fmt;

use parking_lot::Mutex;

use crate::domain::arena::NodeId;

/// Where a linked item currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement {
    pub tree: u64,
    pub bag: NodeId,
}

/// Link slot embedded in every schedulable item.
///
/// The tree claims the slot when the item is added to a bag and releases it
/// when the item leaves (selected, removed or purged as finished). A claimed
/// slot is what makes a second `add` fail with `AlreadyLinked`.
#[derive(Default)]
pub struct ItemLink {
    slot: Mutex<Option<Placement>>,
}

impl ItemLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn placement(&self) -> Option<Placement> {
        *self.slot.lock()
    }

    pub fn is_linked(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Claims the slot; hands back the current owner if already taken.
    pub(crate) fn claim(&self, placement: Placement) -> Result<(), Placement> {
        let mut slot = self.slot.lock();
        match *slot {
            Some(existing) => Err(existing),
            None => {
                *slot = Some(placement);
                Ok(())
            }
        }
    }

    pub(crate) fn release(&self) {
        *self.slot.lock() = None;
    }
}

impl fmt::Debug for ItemLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ItemLink")
            .field("placement", &self.placement())
            .finish()
    }
}

/// Capabilities a unit of work needs to be scheduled.
///
/// `is_finished` must be monotonic: once true it stays true. `can_remove_now`
/// may flip freely and is asked on every selection attempt.
pub trait GrabItem: Send + Sync {
    fn is_finished(&self) -> bool;

    fn can_remove_now(&self) -> bool {
        true
    }

    fn is_durable(&self) -> bool {
        false
    }

    fn link(&self) -> &ItemLink;
}

/// Per-call predicate restricting which items may be selected right now.
pub trait Exclusion<T: ?Sized> {
    fn exclude(&self, item: &T) -> bool;
}

impl<T: ?Sized, F> Exclusion<T> for F
where
    F: Fn(&T) -> bool,
{
    fn exclude(&self, item: &T) -> bool {
        self(item)
    }
}

/// Exclusion that admits every item.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoExclusion;

impl<T: ?Sized> Exclusion<T> for NoExclusion {
    fn exclude(&self, _item: &T) -> bool {
        false
    }
}
