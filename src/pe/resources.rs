//! Resource tree: interior directories keyed by ID or name, leaves
//! holding raw data. Nodes own their children; the binary owns the root.

use serde::{Deserialize, Serialize};

/// How a directory addresses one of its children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceId {
    Name(String),
    Id(u32),
}

/// One child slot of a directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceEntry {
    pub id: ResourceId,
    pub node: ResourceNode,
}

/// A node of the resource tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResourceNode {
    Directory {
        characteristics: u32,
        timestamp: u32,
        major_version: u16,
        minor_version: u16,
        entries: Vec<ResourceEntry>,
    },
    Data {
        content: Vec<u8>,
        code_page: u32,
    },
}

impl ResourceNode {
    pub fn directory() -> Self {
        ResourceNode::Directory {
            characteristics: 0,
            timestamp: 0,
            major_version: 0,
            minor_version: 0,
            entries: Vec::new(),
        }
    }

    pub fn data(content: Vec<u8>, code_page: u32) -> Self {
        ResourceNode::Data { content, code_page }
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, ResourceNode::Directory { .. })
    }

    /// Add a child to a directory node. Returns false on a data node,
    /// which cannot have children.
    pub fn add_child(&mut self, id: ResourceId, node: ResourceNode) -> bool {
        match self {
            ResourceNode::Directory { entries, .. } => {
                entries.push(ResourceEntry { id, node });
                true
            }
            ResourceNode::Data { .. } => false,
        }
    }

    pub fn child_by_id(&self, id: u32) -> Option<&ResourceNode> {
        match self {
            ResourceNode::Directory { entries, .. } => entries
                .iter()
                .find(|e| e.id == ResourceId::Id(id))
                .map(|e| &e.node),
            ResourceNode::Data { .. } => None,
        }
    }

    pub fn child_by_name(&self, name: &str) -> Option<&ResourceNode> {
        match self {
            ResourceNode::Directory { entries, .. } => entries
                .iter()
                .find(|e| matches!(&e.id, ResourceId::Name(n) if n == name))
                .map(|e| &e.node),
            ResourceNode::Data { .. } => None,
        }
    }

    /// Number of nodes in the subtree, this one included.
    pub fn node_count(&self) -> usize {
        match self {
            ResourceNode::Data { .. } => 1,
            ResourceNode::Directory { entries, .. } => {
                1 + entries.iter().map(|e| e.node.node_count()).sum::<usize>()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tree_construction() {
        let mut root = ResourceNode::directory();
        let mut icons = ResourceNode::directory();
        icons.add_child(ResourceId::Id(1), ResourceNode::data(vec![1, 2, 3], 1252));
        root.add_child(ResourceId::Id(3), icons); // RT_ICON
        root.add_child(
            ResourceId::Name("MANIFEST".to_string()),
            ResourceNode::data(b"<assembly/>".to_vec(), 0),
        );

        assert!(root.is_directory());
        assert_eq!(root.node_count(), 4);
        assert!(root.child_by_id(3).is_some());
        assert!(root.child_by_name("MANIFEST").is_some());
        assert!(root.child_by_id(99).is_none());
    }

    #[test]
    fn test_data_rejects_children() {
        let mut data = ResourceNode::data(vec![], 0);
        assert!(!data.add_child(ResourceId::Id(1), ResourceNode::directory()));
    }
}
