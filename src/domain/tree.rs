//! Thread-safe scheduling tree: one root lock around the whole arena.

use std::fmt;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{debug, error, info, instrument};

use crate::domain::arena::{NodeId, NodeShape, Signals, TreeArena};
use crate::domain::error::{GrabError, GrabResult};
use crate::domain::item::{Exclusion, GrabItem, Placement};
use crate::domain::key::SectorKey;

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

/// Owner callback: the whole tree drained and its last sector was pruned.
pub trait PruneListener: Send + Sync {
    fn tree_emptied(&self, tree: u64);
}

impl<F> PruneListener for F
where
    F: Fn(u64) + Send + Sync,
{
    fn tree_emptied(&self, tree: u64) {
        self(tree)
    }
}

/// Construction parameters for a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeOptions {
    pub root: NodeShape,
    pub durable: bool,
    /// Fixed RNG seed; entropy-seeded when `None`.
    pub seed: Option<u64>,
}

impl Default for TreeOptions {
    fn default() -> Self {
        Self {
            root: NodeShape::Branch,
            durable: false,
            seed: None,
        }
    }
}

struct TreeState<T, C> {
    arena: TreeArena<T, C>,
    rng: StdRng,
}

/// Fair random-grab scheduling tree.
///
/// Every call takes the single root lock for its whole duration, so picking
/// an item and removing it are one atomic step and no item is ever handed out
/// twice. The prune listener runs after the lock is released.
pub struct GrabTree<T, C = String> {
    id: u64,
    root: NodeId,
    durable: bool,
    state: Mutex<TreeState<T, C>>,
    listener: Option<Arc<dyn PruneListener>>,
}

impl<T, C> fmt::Debug for GrabTree<T, C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GrabTree")
            .field("id", &self.id)
            .field("root", &self.root)
            .field("durable", &self.durable)
            .finish_non_exhaustive()
    }
}

impl<T, C> GrabTree<T, C>
where
    T: GrabItem,
    C: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new(options: TreeOptions) -> Self {
        let id = NEXT_TREE_ID.fetch_add(1, Ordering::Relaxed);
        let arena = TreeArena::new(id, options.root, options.durable);
        let rng = match options.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_rng(&mut rand::rng()),
        };
        debug!(tree = id, root = %options.root, durable = options.durable, "tree created");
        Self {
            id,
            root: arena.root(),
            durable: options.durable,
            state: Mutex::new(TreeState { arena, rng }),
            listener: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn PruneListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn is_durable(&self) -> bool {
        self.durable
    }

    /// Runs `op` under the root lock, then delivers the root notification.
    fn mutate<R>(&self, op: impl FnOnce(&mut TreeState<T, C>, &mut Signals) -> R) -> R {
        let mut signals = Signals::default();
        let result = {
            let mut state = self.state.lock();
            op(&mut state, &mut signals)
        };
        if signals.root_emptied {
            info!(tree = self.id, pruned = signals.pruned, "tree drained");
            if let Some(listener) = &self.listener {
                listener.tree_emptied(self.id);
            }
        }
        result
    }

    fn observe<R>(&self, op: impl FnOnce(&TreeArena<T, C>) -> R) -> R {
        let state = self.state.lock();
        op(&state.arena)
    }

    // ------------------------------------------------------------------
    // Insertion
    // ------------------------------------------------------------------

    /// Appends `item` to the leaf `leaf`.
    pub fn add(&self, leaf: NodeId, item: Arc<T>) -> GrabResult<()> {
        self.mutate(|state, _| state.arena.add_item(leaf, item))
    }

    pub fn add_or_get_child(
        &self,
        branch: NodeId,
        key: SectorKey<C>,
        shape: NodeShape,
    ) -> GrabResult<NodeId> {
        self.mutate(|state, _| state.arena.add_or_get_child(branch, key, shape))
    }

    /// Adds `item` to the leaf sector `key` of `branch`, creating it if needed.
    pub fn add_keyed(&self, branch: NodeId, key: SectorKey<C>, item: Arc<T>) -> GrabResult<NodeId> {
        self.mutate(|state, _| {
            Self::precheck(&item, self.durable)?;
            let leaf = state.arena.add_or_get_child(branch, key, NodeShape::Leaf)?;
            Self::add_or_rollback(&mut state.arena, leaf, item)
        })
    }

    /// Adds `item` below the root along `path`, creating missing sectors.
    ///
    /// All keys but the last name branches; the last names the leaf. An
    /// empty path adds to the root itself, which must then be a leaf.
    #[instrument(level = "debug", skip(self, item), fields(tree = self.id))]
    pub fn insert(&self, path: &[SectorKey<C>], item: Arc<T>) -> GrabResult<NodeId> {
        self.mutate(|state, _| {
            Self::precheck(&item, self.durable)?;
            let mut node = state.arena.root();
            if let Some((last, branches)) = path.split_last() {
                for key in branches {
                    node = state
                        .arena
                        .add_or_get_child(node, key.clone(), NodeShape::Branch)?;
                }
                node = state
                    .arena
                    .add_or_get_child(node, last.clone(), NodeShape::Leaf)?;
            }
            Self::add_or_rollback(&mut state.arena, node, item)
        })
    }

    /// Rejects what `add_item` would reject before any sector is created.
    fn precheck(item: &Arc<T>, durable: bool) -> GrabResult<()> {
        if let Some(owner) = item.link().placement() {
            return Err(GrabError::AlreadyLinked {
                tree: owner.tree,
                bag: owner.bag,
            });
        }
        if item.is_durable() != durable {
            return Err(GrabError::consistency(format!(
                "item durable={} but tree durable={durable}",
                item.is_durable()
            )));
        }
        Ok(())
    }

    /// A failed add must not leave a freshly created, empty sector behind.
    fn add_or_rollback(arena: &mut TreeArena<T, C>, leaf: NodeId, item: Arc<T>) -> GrabResult<NodeId> {
        match arena.add_item(leaf, item) {
            Ok(()) => Ok(leaf),
            Err(e) => {
                // The root was empty before if the cascade reaches it, so
                // its signal is not a new pruning event.
                let mut scratch = Signals::default();
                if let Ok(idx) = arena.resolve(leaf) {
                    if let Err(rollback) = arena.maybe_remove(idx, &mut scratch) {
                        error!(%leaf, error = %rollback, "rollback of failed add left the tree inconsistent");
                    }
                }
                Err(e)
            }
        }
    }

    // ------------------------------------------------------------------
    // Selection and removal
    // ------------------------------------------------------------------

    /// Removes a random eligible item from the whole tree.
    pub fn remove_random<E>(&self, exclusion: &E) -> GrabResult<Option<Arc<T>>>
    where
        E: Exclusion<T> + ?Sized,
    {
        self.remove_random_from(self.root, exclusion)
    }

    /// Removes a random eligible item from the subtree rooted at `node`.
    #[instrument(level = "trace", skip(self, exclusion), fields(tree = self.id))]
    pub fn remove_random_from<E>(&self, node: NodeId, exclusion: &E) -> GrabResult<Option<Arc<T>>>
    where
        E: Exclusion<T> + ?Sized,
    {
        self.mutate(|state, signals| {
            let TreeState { arena, rng } = state;
            arena.remove_random(node, exclusion, rng, signals)
        })
    }

    /// Explicit removal (cancellation). False when not linked into this tree.
    pub fn remove(&self, item: &Arc<T>) -> GrabResult<bool> {
        self.mutate(|state, signals| state.arena.remove_item(item, signals))
    }

    /// Prunes `node` and any ancestors emptied by its removal, if it is
    /// still empty under the lock.
    pub fn maybe_remove(&self, node: NodeId) -> GrabResult<()> {
        self.mutate(|state, signals| {
            let idx = state.arena.resolve(node)?;
            state.arena.maybe_remove(idx, signals)
        })
    }

    /// Replaces the client key of `node`, keeping its contents and slot.
    pub fn set_key(&self, node: NodeId, key: SectorKey<C>) -> GrabResult<()> {
        self.mutate(|state, _| state.arena.set_key(node, key))
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    pub fn lookup_child(&self, branch: NodeId, key: &SectorKey<C>) -> GrabResult<Option<NodeId>> {
        self.observe(|arena| arena.lookup_child(branch, key))
    }

    pub fn children(&self, branch: NodeId) -> GrabResult<Vec<(SectorKey<C>, NodeId)>> {
        self.observe(|arena| arena.children(branch))
    }

    /// Items for a leaf, sectors for a branch.
    pub fn size(&self, node: NodeId) -> GrabResult<usize> {
        self.observe(|arena| arena.get_node(node).map(|n| n.size()))
    }

    pub fn is_empty(&self, node: NodeId) -> GrabResult<bool> {
        self.observe(|arena| arena.get_node(node).map(|n| n.is_empty()))
    }

    pub fn shape(&self, node: NodeId) -> GrabResult<NodeShape> {
        self.observe(|arena| arena.get_node(node).map(|n| n.shape()))
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.observe(|arena| arena.resolve(node).is_ok())
    }

    /// Total items in the tree.
    pub fn item_count(&self) -> usize {
        self.observe(|arena| arena.item_count(arena.root()).unwrap_or(0))
    }

    /// Items held anywhere below `node`.
    pub fn item_count_in(&self, node: NodeId) -> GrabResult<usize> {
        self.observe(|arena| arena.item_count(node))
    }

    /// The bag of this tree currently holding `item`, if any.
    pub fn placement(&self, item: &T) -> Option<Placement> {
        self.observe(|_| item.link().placement())
            .filter(|placement| placement.tree == self.id)
    }

    pub fn node_count(&self) -> usize {
        self.observe(|arena| arena.node_count())
    }

    pub fn depth(&self) -> usize {
        self.observe(|arena| arena.depth())
    }

    /// Runs `op` against a locked snapshot of the arena.
    pub fn inspect<R>(&self, op: impl FnOnce(&TreeArena<T, C>) -> R) -> R {
        self.observe(op)
    }
}
