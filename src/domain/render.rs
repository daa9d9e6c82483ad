/*
Diagnostic rendering of a scheduling tree with termtree.

Walks the arena from the root and labels each node with its key and size:
leaves show how many items they hold, branches how many sectors.
 */
use std::fmt;
use std::hash::Hash;

use generational_arena::Index;
use termtree::Tree;

use crate::domain::arena::{NodeKind, TreeArena, TreeNode};
use crate::domain::item::GrabItem;
use crate::domain::tree::GrabTree;

pub trait TreeDisplay {
    fn to_tree_string(&self) -> Tree<String>;
}

fn label<T: GrabItem, C: Clone + Eq + Hash + fmt::Debug>(node: &TreeNode<T, C>) -> String {
    match &node.kind {
        NodeKind::Leaf(bag) => format!("{} [{} items]", node.key, bag.len()),
        NodeKind::Branch(sectors) => format!("{} ({} sectors)", node.key, sectors.len()),
    }
}

impl<T, C> TreeDisplay for TreeArena<T, C>
where
    T: GrabItem,
    C: Clone + Eq + Hash + fmt::Debug,
{
    fn to_tree_string(&self) -> Tree<String> {
        fn build_tree<T, C>(arena: &TreeArena<T, C>, node: &TreeNode<T, C>, tree: &mut Tree<String>)
        where
            T: GrabItem,
            C: Clone + Eq + Hash + fmt::Debug,
        {
            if let NodeKind::Branch(sectors) = &node.kind {
                let mut children: Vec<(String, Index)> =
                    sectors.iter().map(|(k, idx)| (k.to_string(), idx)).collect();
                // Stable output regardless of hash order
                children.sort_by(|a, b| a.0.cmp(&b.0));
                for (_, idx) in children {
                    if let Some(child) = arena.node_at(idx) {
                        let mut child_tree = Tree::new(label(child));
                        build_tree(arena, child, &mut child_tree);
                        tree.push(child_tree);
                    }
                }
            }
        }

        match self.get_node(self.root()) {
            Ok(root) => {
                let mut tree = Tree::new(label(root));
                build_tree(self, root, &mut tree);
                tree
            }
            Err(_) => Tree::new("Empty tree".to_string()),
        }
    }
}

impl<T, C> TreeDisplay for GrabTree<T, C>
where
    T: GrabItem,
    C: Clone + Eq + Hash + fmt::Debug,
{
    fn to_tree_string(&self) -> Tree<String> {
        self.inspect(|arena| arena.to_tree_string())
    }
}
