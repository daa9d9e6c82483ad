//! Sector keys: how a branch identifies its children.

use std::fmt;

/// Identity of a node within its parent.
///
/// The root is anonymous. Children are keyed either by an integer id
/// (e.g. a retry count or priority) or by a client identity object.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectorKey<C> {
    Anonymous,
    Id(u64),
    Client(C),
}

impl<C> SectorKey<C> {
    pub fn is_anonymous(&self) -> bool {
        matches!(self, SectorKey::Anonymous)
    }

    pub fn is_client(&self) -> bool {
        matches!(self, SectorKey::Client(_))
    }
}

impl<C: fmt::Debug> fmt::Display for SectorKey<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SectorKey::Anonymous => write!(f, "<root>"),
            SectorKey::Id(id) => write!(f, "#{id}"),
            SectorKey::Client(c) => write!(f, "{c:?}"),
        }
    }
}

impl<C> From<u64> for SectorKey<C> {
    fn from(id: u64) -> Self {
        SectorKey::Id(id)
    }
}
