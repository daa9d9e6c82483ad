//! Sectored random-grab scheduling tree.
//!
//! Pending requests are grouped by client into sectors; selection picks a
//! sector uniformly at random and then a random eligible request inside it,
//! so every client gets an equal share of send slots regardless of how many
//! requests it has queued.

pub mod application;
pub mod cli;
pub mod config;
pub mod domain;
pub mod exitcode;
pub mod util;

pub use domain::{
    Exclusion, GrabError, GrabItem, GrabResult, GrabTree, ItemLink, NoExclusion, NodeId,
    NodeShape, PruneListener, SectorKey, TreeOptions,
};
