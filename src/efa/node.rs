use std::collections::BTreeMap;

use slab::Slab;

/// The role of an EFA node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum NodeCategory {
    /// A node of the host mesh, or a node created for a child element.
    Permanent,
    /// A node of a child element that is not resolved yet.
    Temp,
    /// An element-local vertex index, used by fragment snapshots.
    LocalIndex,
    /// A node created by a cut on an edge or inside a face.
    Embedded,
    /// A cut point that coincides with a mesh node.
    EmbeddedPermanent,
}

/// A handle to a node of an [`ElementFragmentAlgorithm`](super::ElementFragmentAlgorithm).
///
/// Handles compare by identity: two handles are equal iff they refer to the same node.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeKey(pub(crate) usize);

/// A node of the fragment topology.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EfaNode {
    /// The id of the node, unique among the nodes of the same category.
    pub id: u32,
    /// The category of the node.
    pub category: NodeCategory,
    /// The node this node was split from.
    pub parent: Option<NodeKey>,
}

/// Owns every node and indexes them by category and id.
#[derive(Clone, Debug, Default)]
pub(crate) struct NodeArena {
    nodes: Slab<EfaNode>,
    pub permanent: BTreeMap<u32, NodeKey>,
    pub embedded: BTreeMap<u32, NodeKey>,
    pub embedded_permanent: BTreeMap<u32, NodeKey>,
    pub temp: BTreeMap<u32, NodeKey>,
}

// The id following the largest id of `map`.
fn next_id(map: &BTreeMap<u32, NodeKey>) -> u32 {
    map.keys().next_back().map_or(0, |id| id + 1)
}

impl NodeArena {
    pub fn get(&self, key: NodeKey) -> &EfaNode {
        &self.nodes[key.0]
    }

    pub fn category(&self, key: NodeKey) -> NodeCategory {
        self.nodes[key.0].category
    }

    pub fn parent(&self, key: NodeKey) -> Option<NodeKey> {
        self.nodes[key.0].parent
    }

    pub fn id(&self, key: NodeKey) -> u32 {
        self.nodes[key.0].id
    }

    /// The permanent node `id`, created if it does not exist yet.
    pub fn permanent_or_insert(&mut self, id: u32) -> NodeKey {
        if let Some(key) = self.permanent.get(&id) {
            return *key;
        }
        if let Some(key) = self.embedded_permanent.get(&id) {
            return *key;
        }

        let key = NodeKey(self.nodes.insert(EfaNode {
            id,
            category: NodeCategory::Permanent,
            parent: None,
        }));
        let _ = self.permanent.insert(id, key);
        key
    }

    /// Creates a permanent node with a fresh id.
    pub fn new_permanent(&mut self, parent: Option<NodeKey>) -> NodeKey {
        let id = next_id(&self.permanent).max(next_id(&self.embedded_permanent));
        let key = NodeKey(self.nodes.insert(EfaNode {
            id,
            category: NodeCategory::Permanent,
            parent,
        }));
        let _ = self.permanent.insert(id, key);
        key
    }

    pub fn new_temp(&mut self, parent: NodeKey) -> NodeKey {
        let id = next_id(&self.temp);
        let key = NodeKey(self.nodes.insert(EfaNode {
            id,
            category: NodeCategory::Temp,
            parent: Some(parent),
        }));
        let _ = self.temp.insert(id, key);
        key
    }

    pub fn new_embedded(&mut self) -> NodeKey {
        let id = next_id(&self.embedded);
        self.insert_embedded(id)
    }

    /// Inserts the embedded node `id`, or returns it if it exists.
    pub fn insert_embedded(&mut self, id: u32) -> NodeKey {
        if let Some(key) = self.embedded.get(&id) {
            return *key;
        }

        let key = NodeKey(self.nodes.insert(EfaNode {
            id,
            category: NodeCategory::Embedded,
            parent: None,
        }));
        let _ = self.embedded.insert(id, key);
        key
    }

    /// Turns a permanent node into an embedded-permanent node.
    pub fn make_embedded_permanent(&mut self, key: NodeKey) -> bool {
        let node = &mut self.nodes[key.0];
        if node.category != NodeCategory::Permanent {
            return false;
        }
        node.category = NodeCategory::EmbeddedPermanent;
        let id = node.id;
        let _ = self.permanent.remove(&id);
        let _ = self.embedded_permanent.insert(id, key);
        true
    }

    /// Deletes a node. Returns `false` if it was not indexed under its category.
    pub fn remove(&mut self, key: NodeKey) -> bool {
        let Some(node) = self.nodes.get(key.0).copied() else {
            return false;
        };
        let map = match node.category {
            NodeCategory::Permanent => &mut self.permanent,
            NodeCategory::Temp => &mut self.temp,
            NodeCategory::Embedded => &mut self.embedded,
            NodeCategory::EmbeddedPermanent => &mut self.embedded_permanent,
            NodeCategory::LocalIndex => return false,
        };
        if map.get(&node.id) != Some(&key) {
            return false;
        }
        let _ = map.remove(&node.id);
        let _ = self.nodes.remove(key.0);
        true
    }

    pub fn clear_parents(&mut self) {
        for (_, node) in self.nodes.iter_mut() {
            if node.category == NodeCategory::Permanent {
                node.parent = None;
            }
        }
    }

    pub fn clear_temp(&mut self) {
        for (_, key) in std::mem::take(&mut self.temp) {
            let _ = self.nodes.remove(key.0);
        }
    }

    /// Deletes every node but the embedded ones.
    pub fn clear_all_but_embedded(&mut self) {
        self.clear_temp();
        for (_, key) in std::mem::take(&mut self.permanent) {
            let _ = self.nodes.remove(key.0);
        }
        for (_, key) in std::mem::take(&mut self.embedded_permanent) {
            let _ = self.nodes.remove(key.0);
        }
    }

    pub fn next_permanent_id(&self) -> u32 {
        next_id(&self.permanent).max(next_id(&self.embedded_permanent))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_allocated_per_category() {
        let mut arena = NodeArena::default();
        let a = arena.permanent_or_insert(4);
        assert_eq!(arena.permanent_or_insert(4), a);
        let e0 = arena.new_embedded();
        let e1 = arena.new_embedded();
        assert_eq!(arena.id(e0), 0);
        assert_eq!(arena.id(e1), 1);

        let t = arena.new_temp(a);
        assert_eq!(arena.id(t), 0);
        assert_eq!(arena.parent(t), Some(a));

        let p = arena.new_permanent(Some(a));
        assert_eq!(arena.id(p), 5);
    }

    #[test]
    fn removal_checks_the_category_index() {
        let mut arena = NodeArena::default();
        let a = arena.permanent_or_insert(0);
        assert!(arena.make_embedded_permanent(a));
        assert_eq!(arena.category(a), NodeCategory::EmbeddedPermanent);
        assert!(arena.permanent.is_empty());
        assert!(arena.remove(a));
        assert!(!arena.remove(a));
    }
}
