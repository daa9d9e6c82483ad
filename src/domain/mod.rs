//! Domain layer: the scheduling tree
//!
//! Pure in-memory logic: no I/O, no CLI, no config loading.

pub mod arena;
pub mod bag;
pub mod error;
pub mod item;
pub mod key;
pub mod render;
pub mod sector;
pub mod tree;

pub use arena::{NodeId, NodeKind, NodeShape, TreeArena, TreeNode};
pub use bag::Bag;
pub use error::{GrabError, GrabResult};
pub use item::{Exclusion, GrabItem, ItemLink, NoExclusion, Placement};
pub use key::SectorKey;
pub use render::TreeDisplay;
pub use tree::{GrabTree, PruneListener, TreeOptions};
