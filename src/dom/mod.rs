//! Node Graph
//!
//! The synthetic document tree. Nodes own their children; parents are weak
//! back-references. Every positional lookup resolves a node argument by its
//! identity tag first and by reference second, so wrapped nodes passed back
//! in by the script land in the same place as raw ones.

mod document;
mod node;
mod selector;
mod style;
mod tree;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use node::{NodeKind, NodeRef, SyntheticNode};
pub use selector::Selector;
pub use style::StyleDeclaration;
pub use tree::{NodeGraph, Locator};

/// Reserved key under which every node reports its identity tag
pub const IDENTITY_KEY: &str = "__identity";

/// Opaque, immutable identity tag assigned at node construction.
///
/// The salt is random per graph, so tags from different graphs never
/// collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeUid {
    salt: u32,
    sequence: u64,
}

impl NodeUid {
    pub(crate) fn new(salt: u32, sequence: u64) -> Self {
        Self { salt, sequence }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }
}

impl fmt::Display for NodeUid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{:08x}.{}", self.salt, self.sequence)
    }
}

impl FromStr for NodeUid {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (salt, sequence) = s.strip_prefix('n').ok_or(())?.split_once('.').ok_or(())?;
        Ok(Self {
            salt: u32::from_str_radix(salt, 16).map_err(|_| ())?,
            sequence: sequence.parse().map_err(|_| ())?,
        })
    }
}

/// What a query by id or tag returns when nothing matches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LookupPolicy {
    /// Return the sentinel node
    #[default]
    Strict,
    /// Create a placeholder matching the query, attach it to `body`, and
    /// return it. This can hide caller mistakes; keep it opt-in.
    Fabricate,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uid_text_roundtrip() {
        let uid = NodeUid::new(0xdead_beef, 42);
        let text = uid.to_string();
        assert_eq!(text, "ndeadbeef.42");
        assert_eq!(text.parse::<NodeUid>(), Ok(uid));
        assert!("garbage".parse::<NodeUid>().is_err());
    }

    #[test]
    fn test_strict_is_default() {
        assert_eq!(LookupPolicy::default(), LookupPolicy::Strict);
    }
}
