use smallvec::SmallVec;

use crate::efa::NodeKey;
use crate::math::{Real, TOLERANCE};

/// An edge between two nodes, with the embedded nodes of the cuts that cross it.
///
/// Cut positions are stored as the distance from `node(0)`, normalised to `[0, 1]`.
#[derive(Clone, Debug, PartialEq)]
pub struct EfaEdge {
    nodes: [NodeKey; 2],
    embedded: SmallVec<[(NodeKey, Real); 2]>,
}

impl EfaEdge {
    /// An uncut edge from `a` to `b`.
    pub fn new(a: NodeKey, b: NodeKey) -> Self {
        Self {
            nodes: [a, b],
            embedded: SmallVec::new(),
        }
    }

    /// The `i`-th end node.
    pub fn node(&self, i: usize) -> NodeKey {
        self.nodes[i]
    }

    /// Both end nodes.
    pub fn nodes(&self) -> [NodeKey; 2] {
        self.nodes
    }

    /// Is this edge cut?
    pub fn has_intersection(&self) -> bool {
        !self.embedded.is_empty()
    }

    /// The number of cuts on this edge.
    pub fn num_embedded_nodes(&self) -> usize {
        self.embedded.len()
    }

    /// The node of the `i`-th cut.
    pub fn embedded_node(&self, i: usize) -> NodeKey {
        self.embedded[i].0
    }

    /// The nodes of every cut on this edge.
    pub fn embedded_nodes(&self) -> impl Iterator<Item = NodeKey> + '_ {
        self.embedded.iter().map(|e| e.0)
    }

    /// Records a cut at `position`, measured from `from`.
    pub fn add_intersection(&mut self, position: Real, node: NodeKey, from: NodeKey) {
        let x = if from == self.nodes[1] {
            1.0 - position
        } else {
            position
        };
        self.embedded.push((node, x));
    }

    /// The position of the `i`-th cut, measured from `from`.
    pub fn intersection(&self, i: usize, from: NodeKey) -> Real {
        let x = self.embedded[i].1;
        if from == self.nodes[1] {
            1.0 - x
        } else {
            x
        }
    }

    /// The index of the cut at `position`, measured from `from`.
    pub fn embedded_node_index(&self, position: Real, from: NodeKey) -> Option<usize> {
        (0..self.embedded.len())
            .find(|i| (self.intersection(*i, from) - position).abs() < TOLERANCE)
    }

    /// Is there a cut at `position`, measured from `from`?
    pub fn has_intersection_at_position(&self, position: Real, from: NodeKey) -> bool {
        self.embedded_node_index(position, from).is_some()
    }

    /// Is `node` the node of a cut on this edge?
    pub fn is_embedded_node(&self, node: NodeKey) -> bool {
        self.embedded.iter().any(|e| e.0 == node)
    }

    /// Is `node` an end node or a cut node of this edge?
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes.contains(&node) || self.is_embedded_node(node)
    }

    /// Do both end nodes of `other` lie on this edge?
    pub fn contains_edge(&self, other: &EfaEdge) -> bool {
        self.contains_node(other.nodes[0]) && self.contains_node(other.nodes[1])
    }

    /// Do both edges have the same end nodes, in any order?
    pub fn equivalent(&self, other: &EfaEdge) -> bool {
        (self.nodes[0] == other.nodes[0] && self.nodes[1] == other.nodes[1])
            || (self.nodes[0] == other.nodes[1] && self.nodes[1] == other.nodes[0])
    }

    /// The normalised distance of `node` from `node(0)`.
    pub fn distance_from_node1(&self, node: NodeKey) -> Option<Real> {
        if node == self.nodes[0] {
            Some(0.0)
        } else if node == self.nodes[1] {
            Some(1.0)
        } else {
            self.embedded.iter().find(|e| e.0 == node).map(|e| e.1)
        }
    }

    /// The end nodes `node` interpolates, with their weights.
    pub fn node_masters(&self, node: NodeKey) -> Option<SmallVec<[(NodeKey, Real); 2]>> {
        let mut masters = SmallVec::new();
        if node == self.nodes[0] || node == self.nodes[1] {
            masters.push((node, 1.0));
        } else {
            let x = self.embedded.iter().find(|e| e.0 == node)?.1;
            masters.push((self.nodes[0], 1.0 - x));
            masters.push((self.nodes[1], x));
        }
        Some(masters)
    }

    /// Copies the cuts of `other`, an edge with the same orientation.
    pub fn copy_intersection(&mut self, other: &EfaEdge) {
        self.embedded.extend(other.embedded.iter().copied());
    }

    /// Removes the cut whose node is `node`.
    pub fn remove_embedded_node(&mut self, node: NodeKey) {
        self.embedded.retain(|e| e.0 != node);
    }

    /// Removes every cut.
    pub fn remove_embedded_nodes(&mut self) {
        self.embedded.clear();
    }

    /// Replaces `old` by `new` among the end and cut nodes.
    pub fn switch_node(&mut self, new: NodeKey, old: NodeKey) {
        for n in &mut self.nodes {
            if *n == old {
                *n = new;
            }
        }
        for e in &mut self.embedded {
            if e.0 == old {
                e.0 = new;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positions_depend_on_direction() {
        let (a, b, c) = (NodeKey(0), NodeKey(1), NodeKey(2));
        let mut edge = EfaEdge::new(a, b);
        edge.add_intersection(0.25, c, b);
        assert_relative_eq!(edge.intersection(0, a), 0.75);
        assert_relative_eq!(edge.intersection(0, b), 0.25);
        assert!(edge.has_intersection_at_position(0.75, a));
        assert!(!edge.has_intersection_at_position(0.25, a));

        let masters = edge.node_masters(c).unwrap();
        assert_eq!(masters[0].0, a);
        assert_relative_eq!(masters[0].1, 0.25);
        assert_relative_eq!(masters[1].1, 0.75);
    }

    #[test]
    fn containment_includes_cut_nodes() {
        let (a, b, c) = (NodeKey(0), NodeKey(1), NodeKey(2));
        let mut edge = EfaEdge::new(a, b);
        edge.add_intersection(0.5, c, a);
        assert!(edge.contains_edge(&EfaEdge::new(c, b)));
        assert!(edge.equivalent(&EfaEdge::new(b, a)));
        assert!(!edge.equivalent(&EfaEdge::new(c, a)));

        edge.switch_node(NodeKey(3), c);
        assert!(edge.is_embedded_node(NodeKey(3)));
        edge.remove_embedded_node(NodeKey(3));
        assert!(!edge.has_intersection());
    }
}
