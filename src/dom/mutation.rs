//! Mutation records and observer configuration

use crate::dom::document::NodeId;
use serde::{Deserialize, Serialize};

/// What an observer wants to hear about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObserveConfig {
    /// Children added to or removed from the target
    pub child_list: bool,
    /// Attribute changes on the target
    pub attributes: bool,
    /// Text changes on the target
    pub character_data: bool,
    /// Extend all of the above to every descendant of the target
    pub subtree: bool,
}

impl ObserveConfig {
    /// Structural changes anywhere under the target
    pub fn subtree_changes() -> Self {
        Self {
            child_list: true,
            subtree: true,
            ..Default::default()
        }
    }

    /// Structural and text changes anywhere under the target
    pub fn subtree_content() -> Self {
        Self {
            child_list: true,
            character_data: true,
            subtree: true,
            ..Default::default()
        }
    }

    /// Direct children of the target only
    pub fn children() -> Self {
        Self {
            child_list: true,
            ..Default::default()
        }
    }

    /// At least one kind of change must be requested
    pub fn is_valid(&self) -> bool {
        self.child_list || self.attributes || self.character_data
    }

    pub(crate) fn wants(&self, kind: &MutationKind) -> bool {
        match kind {
            MutationKind::ChildList { .. } => self.child_list,
            MutationKind::Attributes { .. } => self.attributes,
            MutationKind::CharacterData { .. } => self.character_data,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationKind {
    ChildList {
        added: Vec<NodeId>,
        removed: Vec<NodeId>,
    },
    Attributes {
        name: String,
        old_value: Option<String>,
    },
    CharacterData {
        old_value: String,
    },
}

/// One change, reported against the node whose state changed
///
/// For child list changes `target` is the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub kind: MutationKind,
}

impl MutationRecord {
    pub fn added_nodes(&self) -> &[NodeId] {
        match &self.kind {
            MutationKind::ChildList { added, .. } => added,
            _ => &[],
        }
    }

    pub fn removed_nodes(&self) -> &[NodeId] {
        match &self.kind {
            MutationKind::ChildList { removed, .. } => removed,
            _ => &[],
        }
    }

    pub fn is_child_list(&self) -> bool {
        matches!(self.kind, MutationKind::ChildList { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_validity() {
        assert!(!ObserveConfig::default().is_valid());
        assert!(ObserveConfig::children().is_valid());

        let attrs_only = ObserveConfig {
            attributes: true,
            ..Default::default()
        };
        assert!(attrs_only.is_valid());
    }

    #[test]
    fn test_config_wants() {
        let config = ObserveConfig::subtree_changes();
        let child = MutationKind::ChildList {
            added: vec![],
            removed: vec![],
        };
        let text = MutationKind::CharacterData {
            old_value: String::new(),
        };

        assert!(config.wants(&child));
        assert!(!config.wants(&text));
        assert!(ObserveConfig::subtree_content().wants(&text));
    }
}
