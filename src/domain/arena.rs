use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use generational_arena::{Arena, Index};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, trace};

use crate::domain::bag::Bag;
use crate::domain::error::{GrabError, GrabResult};
use crate::domain::item::{Exclusion, GrabItem, Placement};
use crate::domain::key::SectorKey;
use crate::domain::sector::Sectors;

/// Handle to a node of one particular tree.
///
/// Generational: once the node is pruned the handle goes stale and every
/// operation on it fails with `UnknownNode` instead of reaching a reused slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId {
    tree: u64,
    index: Index,
}

impl NodeId {
    pub(crate) fn new(tree: u64, index: Index) -> Self {
        Self { tree, index }
    }

    pub fn tree(&self) -> u64 {
        self.tree
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (slot, generation) = self.index.into_raw_parts();
        write!(f, "{}:{}.{}", self.tree, slot, generation)
    }
}

/// Which variant a node is created as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeShape {
    Leaf,
    Branch,
}

impl fmt::Display for NodeShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeShape::Leaf => write!(f, "leaf"),
            NodeShape::Branch => write!(f, "branch"),
        }
    }
}

#[derive(Debug)]
pub enum NodeKind<T, C> {
    Leaf(Bag<T>),
    Branch(Sectors<C>),
}

/// Tree node in the arena-based scheduling structure.
#[derive(Debug)]
pub struct TreeNode<T, C> {
    /// Identity within the parent; anonymous for the root
    pub key: SectorKey<C>,
    /// Index of parent node in the arena, None for the root
    pub parent: Option<Index>,
    /// Inherited from the root; must match parent and contained items
    pub durable: bool,
    pub kind: NodeKind<T, C>,
}

impl<T: GrabItem, C: Clone + Eq + Hash> TreeNode<T, C> {
    fn new(key: SectorKey<C>, parent: Option<Index>, durable: bool, shape: NodeShape) -> Self {
        let kind = match shape {
            NodeShape::Leaf => NodeKind::Leaf(Bag::new()),
            NodeShape::Branch => NodeKind::Branch(Sectors::default()),
        };
        Self {
            key,
            parent,
            durable,
            kind,
        }
    }

    pub fn shape(&self) -> NodeShape {
        match self.kind {
            NodeKind::Leaf(_) => NodeShape::Leaf,
            NodeKind::Branch(_) => NodeShape::Branch,
        }
    }

    /// Items held for a leaf, registered children for a branch.
    pub fn size(&self) -> usize {
        match &self.kind {
            NodeKind::Leaf(bag) => bag.len(),
            NodeKind::Branch(sectors) => sectors.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}

/// Side effects of a mutation that the owner must hear about once the root
/// lock is released.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Signals {
    pub root_emptied: bool,
    pub pruned: usize,
}

/// Arena holding every node of one scheduling tree.
///
/// Not synchronised: `GrabTree` wraps it in the root lock.
#[derive(Debug)]
pub struct TreeArena<T, C> {
    tree: u64,
    arena: Arena<TreeNode<T, C>>,
    root: Index,
}

impl<T, C> TreeArena<T, C>
where
    T: GrabItem,
    C: Clone + Eq + Hash + fmt::Debug,
{
    pub fn new(tree: u64, shape: NodeShape, durable: bool) -> Self {
        let mut arena = Arena::new();
        let root = arena.insert(TreeNode::new(SectorKey::Anonymous, None, durable, shape));
        Self { tree, arena, root }
    }

    pub fn tree_id(&self) -> u64 {
        self.tree
    }

    pub fn root(&self) -> NodeId {
        self.id(self.root)
    }

    fn id(&self, index: Index) -> NodeId {
        NodeId::new(self.tree, index)
    }

    pub fn resolve(&self, id: NodeId) -> GrabResult<Index> {
        if id.tree != self.tree {
            return Err(GrabError::invalid(format!(
                "node {id} belongs to tree {}, not {}",
                id.tree, self.tree
            )));
        }
        if self.arena.contains(id.index) {
            Ok(id.index)
        } else {
            Err(GrabError::UnknownNode(id))
        }
    }

    pub fn get_node(&self, id: NodeId) -> GrabResult<&TreeNode<T, C>> {
        let index = self.resolve(id)?;
        self.node(index)
    }

    fn node(&self, index: Index) -> GrabResult<&TreeNode<T, C>> {
        self.arena
            .get(index)
            .ok_or_else(|| GrabError::consistency(format!("dangling index {:?}", index)))
    }

    fn node_mut(&mut self, index: Index) -> GrabResult<&mut TreeNode<T, C>> {
        self.arena
            .get_mut(index)
            .ok_or_else(|| GrabError::consistency(format!("dangling index {:?}", index)))
    }

    pub(crate) fn node_at(&self, index: Index) -> Option<&TreeNode<T, C>> {
        self.arena.get(index)
    }

    #[cfg(test)]
    pub(crate) fn node_at_mut(&mut self, id: NodeId) -> Option<&mut TreeNode<T, C>> {
        self.arena.get_mut(id.index)
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    // ------------------------------------------------------------------
    // Structure
    // ------------------------------------------------------------------

    #[instrument(level = "debug", skip(self), fields(tree = self.tree))]
    pub fn add_or_get_child(
        &mut self,
        parent: NodeId,
        key: SectorKey<C>,
        shape: NodeShape,
    ) -> GrabResult<NodeId> {
        if key.is_anonymous() {
            return Err(GrabError::invalid("anonymous key cannot name a sector"));
        }
        let parent_idx = self.resolve(parent)?;
        let parent_node = self.node(parent_idx)?;
        let NodeKind::Branch(sectors) = &parent_node.kind else {
            return Err(GrabError::invalid(format!(
                "node {parent} is a leaf and has no sectors"
            )));
        };

        if let Some(existing) = sectors.get(&key) {
            let child = self.node(existing)?;
            if child.shape() != shape {
                return Err(GrabError::invalid(format!(
                    "sector {key} already exists as a {}",
                    child.shape()
                )));
            }
            self.check_durability(existing, parent_idx)?;
            return Ok(self.id(existing));
        }

        let durable = parent_node.durable;
        let child_idx = self
            .arena
            .insert(TreeNode::new(key.clone(), Some(parent_idx), durable, shape));
        if let NodeKind::Branch(sectors) = &mut self.node_mut(parent_idx)?.kind {
            sectors.insert(key, child_idx);
        }
        debug!(child = %self.id(child_idx), %shape, "created sector");
        Ok(self.id(child_idx))
    }

    pub fn lookup_child(&self, parent: NodeId, key: &SectorKey<C>) -> GrabResult<Option<NodeId>> {
        match &self.get_node(parent)?.kind {
            NodeKind::Branch(sectors) => Ok(sectors.get(key).map(|idx| self.id(idx))),
            NodeKind::Leaf(_) => Err(GrabError::invalid(format!(
                "node {parent} is a leaf and has no sectors"
            ))),
        }
    }

    pub fn children(&self, parent: NodeId) -> GrabResult<Vec<(SectorKey<C>, NodeId)>> {
        match &self.get_node(parent)?.kind {
            NodeKind::Branch(sectors) => Ok(sectors
                .iter()
                .map(|(key, idx)| (key.clone(), self.id(idx)))
                .collect()),
            NodeKind::Leaf(_) => Err(GrabError::invalid(format!(
                "node {parent} is a leaf and has no sectors"
            ))),
        }
    }

    /// Swaps the client key of `node` in place.
    #[instrument(level = "debug", skip(self), fields(tree = self.tree))]
    pub fn set_key(&mut self, node: NodeId, key: SectorKey<C>) -> GrabResult<()> {
        let idx = self.resolve(node)?;
        let current = self.node(idx)?;
        if !current.key.is_client() || !key.is_client() {
            return Err(GrabError::invalid(format!(
                "only client keys can be swapped ({} -> {key})",
                current.key
            )));
        }
        if current.key == key {
            return Ok(());
        }
        let old = current.key.clone();
        let parent = current
            .parent
            .ok_or_else(|| GrabError::consistency(format!("keyed node {node} has no parent")))?;

        let NodeKind::Branch(sectors) = &mut self.node_mut(parent)?.kind else {
            return Err(GrabError::consistency(format!("parent of {node} is a leaf")));
        };
        if sectors.get(&key).is_some() {
            return Err(GrabError::invalid(format!("sector {key} is already in use")));
        }
        if !sectors.rekey(&old, key.clone()) {
            return Err(GrabError::consistency(format!(
                "node {node} not registered under {old} in its parent"
            )));
        }
        self.node_mut(idx)?.key = key;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Items
    // ------------------------------------------------------------------

    pub fn add_item(&mut self, leaf: NodeId, item: Arc<T>) -> GrabResult<()> {
        let idx = self.resolve(leaf)?;
        let tree = self.tree;
        let node = self.node_mut(idx)?;
        let durable = node.durable;
        let NodeKind::Leaf(bag) = &mut node.kind else {
            return Err(GrabError::invalid(format!(
                "node {leaf} is a branch; items go into leaves"
            )));
        };
        if item.is_durable() != durable {
            return Err(GrabError::consistency(format!(
                "item durable={} but bag {leaf} durable={durable}",
                item.is_durable()
            )));
        }
        item.link()
            .claim(Placement { tree, bag: leaf })
            .map_err(|owner| GrabError::AlreadyLinked {
                tree: owner.tree,
                bag: owner.bag,
            })?;
        bag.push(item);
        trace!(%leaf, size = bag.len(), "item added");
        Ok(())
    }

    /// Explicit removal, e.g. on cancellation. Returns false when the item is
    /// not linked into this tree.
    pub fn remove_item(&mut self, item: &Arc<T>, signals: &mut Signals) -> GrabResult<bool> {
        let Some(placement) = item.link().placement() else {
            return Ok(false);
        };
        if placement.tree != self.tree {
            return Ok(false);
        }
        let idx = self.resolve(placement.bag).map_err(|_| {
            GrabError::consistency(format!("item linked to pruned bag {}", placement.bag))
        })?;
        let NodeKind::Leaf(bag) = &mut self.node_mut(idx)?.kind else {
            return Err(GrabError::consistency(format!(
                "item linked to branch {}",
                placement.bag
            )));
        };
        if !bag.remove(item) {
            return Err(GrabError::consistency(format!(
                "item claims bag {} but is not in it",
                placement.bag
            )));
        }
        if bag.is_empty() {
            self.bag_drained(idx, signals)?;
        }
        Ok(true)
    }

    // ------------------------------------------------------------------
    // Selection
    // ------------------------------------------------------------------

    pub fn remove_random<E, R>(
        &mut self,
        from: NodeId,
        exclusion: &E,
        rng: &mut R,
        signals: &mut Signals,
    ) -> GrabResult<Option<Arc<T>>>
    where
        E: Exclusion<T> + ?Sized,
        R: Rng,
    {
        let idx = self.resolve(from)?;
        self.select(idx, exclusion, rng, signals)
    }

    fn select<E, R>(
        &mut self,
        idx: Index,
        exclusion: &E,
        rng: &mut R,
        signals: &mut Signals,
    ) -> GrabResult<Option<Arc<T>>>
    where
        E: Exclusion<T> + ?Sized,
        R: Rng,
    {
        // Already pruned by a sibling's cascade earlier in this call.
        let Some(node) = self.arena.get_mut(idx) else {
            return Ok(None);
        };
        let has_parent = node.parent.is_some();

        match &mut node.kind {
            NodeKind::Leaf(bag) => {
                let had_items = !bag.is_empty();
                let pick = bag.pick(exclusion, rng);
                // A root leaf only reports the transition to empty; a keyed
                // leaf that is empty for any reason is pruned.
                if bag.is_empty() && (had_items || has_parent) {
                    self.bag_drained(idx, signals)?;
                }
                Ok(pick.item)
            }
            NodeKind::Branch(sectors) => {
                if sectors.is_empty() {
                    if has_parent {
                        self.maybe_remove(idx, signals)?;
                    }
                    return Ok(None);
                }
                // Uniform over sectors, not items: each child is equally
                // likely regardless of its queue depth.
                let mut untried = sectors.to_vec();
                while !untried.is_empty() {
                    let child = untried.swap_remove(rng.random_range(0..untried.len()));
                    if let Some(item) = self.select(child, exclusion, rng, signals)? {
                        return Ok(Some(item));
                    }
                }
                Ok(None)
            }
        }
    }

    // ------------------------------------------------------------------
    // Pruning
    // ------------------------------------------------------------------

    /// A call just took the last item out of the leaf `idx`.
    fn bag_drained(&mut self, idx: Index, signals: &mut Signals) -> GrabResult<()> {
        if idx == self.root {
            debug!("scheduling tree is empty");
            signals.root_emptied = true;
            return Ok(());
        }
        self.maybe_remove(idx, signals)
    }

    /// Detaches `idx` if it is (still) empty and cascades to its ancestors.
    ///
    /// The root is never detached. `root_emptied` is raised only when this
    /// cascade detached the root's last child; an already empty root stays
    /// quiet.
    #[instrument(level = "trace", skip(self, signals), fields(tree = self.tree))]
    pub fn maybe_remove(&mut self, idx: Index, signals: &mut Signals) -> GrabResult<()> {
        let mut current = idx;
        let mut detached_any = false;
        loop {
            let Some(node) = self.arena.get(current) else {
                return Ok(());
            };
            if !node.is_empty() {
                trace!(node = %self.id(current), "not empty, keeping");
                return Ok(());
            }
            let Some(parent) = node.parent else {
                if detached_any {
                    debug!("scheduling tree is empty");
                    signals.root_emptied = true;
                }
                return Ok(());
            };
            self.detach(parent, current)?;
            detached_any = true;
            signals.pruned += 1;
            current = parent;
        }
    }

    fn detach(&mut self, parent: Index, child: Index) -> GrabResult<()> {
        self.check_durability(child, parent)?;
        let key = self.node(child)?.key.clone();
        let child_id = self.id(child);
        let NodeKind::Branch(sectors) = &mut self.node_mut(parent)?.kind else {
            return Err(GrabError::consistency(format!(
                "parent of {child_id} is a leaf"
            )));
        };
        if !sectors.detach(&key, child) {
            return Err(GrabError::consistency(format!(
                "{child_id} ({key}) not registered in its parent"
            )));
        }
        self.arena.remove(child);
        debug!(node = %child_id, %key, "pruned empty sector");
        Ok(())
    }

    fn check_durability(&self, child: Index, parent: Index) -> GrabResult<()> {
        let (c, p) = (self.node(child)?, self.node(parent)?);
        if c.durable != p.durable {
            return Err(GrabError::consistency(format!(
                "durable flag mismatch: child {} durable={} parent {} durable={}",
                self.id(child),
                c.durable,
                self.id(parent),
                p.durable
            )));
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Observers
    // ------------------------------------------------------------------

    /// Total items below `node`.
    pub fn item_count(&self, node: NodeId) -> GrabResult<usize> {
        let idx = self.resolve(node)?;
        Ok(self.count_items(idx))
    }

    fn count_items(&self, idx: Index) -> usize {
        match self.arena.get(idx).map(|n| &n.kind) {
            Some(NodeKind::Leaf(bag)) => bag.len(),
            Some(NodeKind::Branch(sectors)) => {
                sectors.to_vec().into_iter().map(|c| self.count_items(c)).sum()
            }
            None => 0,
        }
    }

    #[instrument(level = "debug", skip(self))]
    pub fn depth(&self) -> usize {
        self.calculate_depth(self.root)
    }

    fn calculate_depth(&self, idx: Index) -> usize {
        match self.arena.get(idx).map(|n| &n.kind) {
            Some(NodeKind::Branch(sectors)) => {
                1 + sectors
                    .to_vec()
                    .into_iter()
                    .map(|child| self.calculate_depth(child))
                    .max()
                    .unwrap_or(0)
            }
            Some(NodeKind::Leaf(_)) => 1,
            None => 0,
        }
    }

    pub fn iter(&self) -> TreeIterator<'_, T, C> {
        TreeIterator::new(self)
    }
}

/// Pre-order walk over live nodes.
pub struct TreeIterator<'a, T, C> {
    arena: &'a TreeArena<T, C>,
    stack: Vec<Index>,
}

impl<'a, T, C> TreeIterator<'a, T, C> {
    fn new(arena: &'a TreeArena<T, C>) -> Self {
        Self {
            arena,
            stack: vec![arena.root],
        }
    }
}

impl<'a, T, C> Iterator for TreeIterator<'a, T, C>
where
    C: Clone + Eq + Hash,
{
    type Item = (NodeId, &'a TreeNode<T, C>);

    fn next(&mut self) -> Option<Self::Item> {
        while let Some(current) = self.stack.pop() {
            if let Some(node) = self.arena.arena.get(current) {
                if let NodeKind::Branch(sectors) = &node.kind {
                    self.stack.extend(sectors.to_vec().into_iter().rev());
                }
                return Some((NodeId::new(self.arena.tree, current), node));
            }
        }
        None
    }
}
