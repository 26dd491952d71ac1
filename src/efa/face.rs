use std::collections::BTreeSet;

use crate::efa::{EfaEdge, NodeKey};
use crate::math::Real;

/// A cut node inside a 2D element, with its parametric coordinates.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FaceNode {
    /// The embedded node.
    pub node: NodeKey,
    /// Its coordinates in the reference element.
    pub xi: [Real; 2],
}

/// A polygonal face of a 3D element or fragment: a closed cycle of edges.
///
/// Edge `i` goes from vertex `i` to vertex `i + 1`.
#[derive(Clone, Debug, PartialEq)]
pub struct EfaFace {
    edges: Vec<EfaEdge>,
}

impl EfaFace {
    /// The uncut face through the vertex cycle `nodes`.
    pub fn new(nodes: &[NodeKey]) -> Self {
        let n = nodes.len();
        let edges = (0..n)
            .map(|i| EfaEdge::new(nodes[i], nodes[(i + 1) % n]))
            .collect();
        Self { edges }
    }

    pub(crate) fn from_edges(edges: Vec<EfaEdge>) -> Self {
        Self { edges }
    }

    /// The number of vertices (and edges).
    pub fn num_nodes(&self) -> usize {
        self.edges.len()
    }

    /// The `i`-th vertex.
    pub fn node(&self, i: usize) -> NodeKey {
        self.edges[i].node(0)
    }

    /// The vertex cycle.
    pub fn nodes(&self) -> Vec<NodeKey> {
        self.edges.iter().map(|e| e.node(0)).collect()
    }

    /// The `i`-th edge.
    pub fn edge(&self, i: usize) -> &EfaEdge {
        &self.edges[i]
    }

    pub(crate) fn edge_mut(&mut self, i: usize) -> &mut EfaEdge {
        &mut self.edges[i]
    }

    /// The edges of this face.
    pub fn edges(&self) -> &[EfaEdge] {
        &self.edges
    }

    /// The edge joining `a` and `b`, in any direction.
    pub fn find_edge(&self, a: NodeKey, b: NodeKey) -> Option<usize> {
        let edge = EfaEdge::new(a, b);
        self.edges.iter().position(|e| e.equivalent(&edge))
    }

    /// The number of cuts on the edges of this face.
    pub fn num_cuts(&self) -> usize {
        self.edges.iter().map(EfaEdge::num_embedded_nodes).sum()
    }

    /// The number of cut edges of this face.
    pub fn num_cut_edges(&self) -> usize {
        self.edges.iter().filter(|e| e.has_intersection()).count()
    }

    /// Is `node` a vertex or a cut node of this face?
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.edges.iter().any(|e| e.contains_node(node))
    }

    /// Do both faces have the same vertices?
    pub fn equivalent(&self, other: &EfaFace) -> bool {
        self.num_nodes() == other.num_nodes()
            && self.nodes().into_iter().collect::<BTreeSet<_>>()
                == other.nodes().into_iter().collect::<BTreeSet<_>>()
    }

    /// Does every vertex of `other` lie on this face, as a vertex or as a cut node?
    pub fn contains_face(&self, other: &EfaFace) -> bool {
        other.edges.iter().all(|e| self.contains_node(e.node(0)))
    }

    /// Do both faces run through the same vertices in the same direction?
    ///
    /// Faces that are not [`equivalent`](Self::equivalent) never have the same orientation.
    pub fn same_orientation(&self, other: &EfaFace) -> bool {
        if !self.equivalent(other) {
            return false;
        }
        let n = self.num_nodes();
        (0..n).any(|i| {
            other.node(i) == self.node(0) && other.node((i + 1) % n) == self.node(1)
        })
    }

    /// Replaces `old` by `new` among the vertices and cut nodes.
    pub fn switch_node(&mut self, new: NodeKey, old: NodeKey) {
        for e in &mut self.edges {
            e.switch_node(new, old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn faces_compare_by_vertex_set() {
        let k: Vec<_> = (0..4).map(NodeKey).collect();
        let face = EfaFace::new(&k);
        let reversed = EfaFace::new(&[k[3], k[2], k[1], k[0]]);
        assert!(face.equivalent(&reversed));
        assert_eq!(face.find_edge(k[0], k[3]), Some(3));
        assert_eq!(face.num_cuts(), 0);
        assert!(!face.same_orientation(&reversed));
        assert!(face.same_orientation(&EfaFace::new(&[k[2], k[3], k[0], k[1]])));
    }

    #[test]
    fn a_cut_face_contains_its_pieces() {
        let k: Vec<_> = (0..6).map(NodeKey).collect();
        let mut face = EfaFace::new(&k[..4]);
        face.edge_mut(0).add_intersection(0.5, k[4], k[0]);
        face.edge_mut(2).add_intersection(0.5, k[5], k[2]);

        let piece = EfaFace::new(&[k[0], k[4], k[5], k[3]]);
        assert!(face.contains_face(&piece));
        assert!(!piece.contains_face(&face));
    }
}
