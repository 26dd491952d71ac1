use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::efa::{EfaEdge, EfaError, FaceNode, Fragment, NodeArena, NodeCategory, NodeKey};
use crate::mesh::ElemId;

/// The physical part of a 2D element: a closed cycle of boundary edges.
///
/// Boundary edges lying on an element edge are exterior, the others were created by cuts and are
/// interior.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment2D {
    edges: Vec<EfaEdge>,
}

/// The node cycles obtained by walking a boundary and switching sides at every cut.
pub(crate) struct CutWalk {
    pub parts: [Vec<NodeKey>; 2],
    pub edge_cuts: usize,
    pub node_cuts: usize,
}

/// Walks a closed cycle of edges carrying at most one cut each.
pub(crate) fn walk_cuts(
    edges: &[EfaEdge],
    arena: &NodeArena,
    elem: ElemId,
) -> Result<CutWalk, EfaError> {
    let mut parts: [Vec<NodeKey>; 2] = [Vec::new(), Vec::new()];
    let mut side = 0;
    let mut edge_cuts = 0;
    let mut node_cuts = 0;

    for (i, edge) in edges.iter().enumerate() {
        let start = edge.node(0);
        parts[side].push(start);
        if arena.category(start) == NodeCategory::EmbeddedPermanent {
            node_cuts += 1;
            side = 1 - side;
            parts[side].push(start);
        }

        if edge.num_embedded_nodes() > 1 {
            return Err(EfaError::InvalidCut {
                elem,
                edge: i,
                reason: "a fragment edge cannot carry more than one cut",
            });
        }
        if edge.has_intersection() {
            let cut = edge.embedded_node(0);
            parts[side].push(cut);
            edge_cuts += 1;
            side = 1 - side;
            parts[side].push(cut);
        }
    }

    Ok(CutWalk {
        parts,
        edge_cuts,
        node_cuts,
    })
}

impl Fragment2D {
    /// The fragment covering a whole element, with the cuts of its edges.
    pub fn from_element_edges(edges: &[EfaEdge]) -> Self {
        Self {
            edges: edges.to_vec(),
        }
    }

    /// The uncut polygon through the node cycle `nodes`.
    pub fn from_cycle(nodes: &[NodeKey]) -> Self {
        let n = nodes.len();
        Self {
            edges: (0..n)
                .map(|i| EfaEdge::new(nodes[i], nodes[(i + 1) % n]))
                .collect(),
        }
    }

    pub(crate) fn from_edges(edges: Vec<EfaEdge>) -> Self {
        Self { edges }
    }

    /// The number of boundary edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// The `i`-th boundary edge.
    pub fn edge(&self, i: usize) -> &EfaEdge {
        &self.edges[i]
    }

    pub(crate) fn edge_mut(&mut self, i: usize) -> &mut EfaEdge {
        &mut self.edges[i]
    }

    /// The boundary edges.
    pub fn edges(&self) -> &[EfaEdge] {
        &self.edges
    }

    /// The vertex cycle of the boundary.
    pub fn node_cycle(&self) -> Vec<NodeKey> {
        self.edges.iter().map(|e| e.node(0)).collect()
    }

    /// The number of boundary vertices that are cut mesh nodes.
    pub(crate) fn num_cut_nodes(&self, arena: &NodeArena) -> usize {
        self.edges
            .iter()
            .filter(|e| arena.category(e.node(0)) == NodeCategory::EmbeddedPermanent)
            .count()
    }

    /// Is the `i`-th boundary edge inside the element, that is, not on any element edge?
    pub fn is_edge_interior(&self, i: usize, host_edges: &[EfaEdge]) -> bool {
        !host_edges.iter().any(|h| h.contains_edge(&self.edges[i]))
    }

    /// Does the `i`-th boundary edge start or end at a cut node inside the element?
    pub fn is_secondary_interior_edge(&self, i: usize, interior_nodes: &[FaceNode]) -> bool {
        interior_nodes
            .iter()
            .any(|n| self.edges[i].contains_node(n.node))
    }

    /// Splits this fragment at the cuts of its boundary.
    ///
    /// Two or more cuts yield the polygons on both sides of the cut line; a single edge cut
    /// yields one fragment whose cut edge is split in two.
    pub(crate) fn split(&self, arena: &NodeArena, elem: ElemId) -> Result<Vec<Fragment2D>, EfaError> {
        let walk = walk_cuts(&self.edges, arena, elem)?;

        if walk.edge_cuts + walk.node_cuts > 1 {
            Ok(walk
                .parts
                .iter()
                .filter(|p| p.len() >= 3)
                .map(|p| Fragment2D::from_cycle(p))
                .collect())
        } else if walk.edge_cuts == 1 {
            let mut edges = Vec::with_capacity(self.edges.len() + 1);
            for edge in &self.edges {
                if edge.has_intersection() {
                    let cut = edge.embedded_node(0);
                    edges.push(EfaEdge::new(edge.node(0), cut));
                    edges.push(EfaEdge::new(cut, edge.node(1)));
                } else {
                    edges.push(EfaEdge::new(edge.node(0), edge.node(1)));
                }
            }
            Ok(vec![Fragment2D { edges }])
        } else {
            Ok(vec![Fragment2D::from_cycle(&self.node_cycle())])
        }
    }

    /// Merges the two boundary edges lying on the cut element edge of a crack-tip fragment into
    /// one cut edge.
    pub fn combine_tip_edges(
        &mut self,
        host_edges: &[EfaEdge],
        elem: ElemId,
    ) -> Result<(), EfaError> {
        let n = self.edges.len();
        let mut tip: Option<(usize, SmallVec<[usize; 2]>)> = None;

        for (i, host) in host_edges.iter().enumerate() {
            if !host.has_intersection() {
                continue;
            }
            let contained: SmallVec<[usize; 2]> = (0..n)
                .filter(|j| host.contains_edge(&self.edges[*j]))
                .collect();
            if contained.len() == 2 {
                tip = Some((i, contained));
                break;
            }
        }

        let Some((host_id, ids)) = tip else {
            return Ok(());
        };

        // The first edge must directly precede the second one in the cycle.
        let (first, second) = if (ids[0] + 1) % n == ids[1] {
            (ids[0], ids[1])
        } else if (ids[1] + 1) % n == ids[0] {
            (ids[1], ids[0])
        } else {
            return Err(EfaError::InvalidCut {
                elem,
                edge: host_id,
                reason: "the crack-tip edges of a fragment must be consecutive",
            });
        };

        let node1 = self.edges[first].node(0);
        let cut = self.edges[first].node(1);
        let node2 = self.edges[second].node(1);
        if cut != self.edges[second].node(0) {
            return Err(EfaError::InvalidCut {
                elem,
                edge: host_id,
                reason: "the crack-tip edges of a fragment do not share their cut node",
            });
        }

        let host = &host_edges[host_id];
        let position = match (
            host.distance_from_node1(node1),
            host.distance_from_node1(node2),
            host.distance_from_node1(cut),
        ) {
            (Some(x1), Some(x2), Some(xc)) => (xc - x1) / (x2 - x1),
            _ => {
                return Err(EfaError::MissingNode {
                    elem,
                    reason: "a crack-tip node is not on the cut element edge",
                })
            }
        };

        let mut full = EfaEdge::new(node1, node2);
        full.add_intersection(position, cut, node1);
        self.edges[first] = full;
        let _ = self.edges.remove(second);
        Ok(())
    }

    /// The boundary edges lying on the element edge `host`.
    pub(crate) fn tip_edges(&self, host: &EfaEdge) -> SmallVec<[usize; 2]> {
        (0..self.edges.len())
            .filter(|j| host.contains_edge(&self.edges[*j]))
            .collect()
    }
}

impl Fragment for Fragment2D {
    fn num_cuts(&self) -> usize {
        self.edges.iter().map(EfaEdge::num_embedded_nodes).sum()
    }

    fn contains_node(&self, node: NodeKey) -> bool {
        self.edges.iter().any(|e| e.contains_node(node))
    }

    fn all_nodes(&self) -> BTreeSet<NodeKey> {
        self.edges.iter().flat_map(|e| e.nodes()).collect()
    }

    fn is_connected(&self, other: &Self) -> bool {
        self.edges
            .iter()
            .any(|e| other.edges.iter().any(|o| e.equivalent(o)))
    }

    fn switch_node(&mut self, new: NodeKey, old: NodeKey) {
        for e in &mut self.edges {
            e.switch_node(new, old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(arena: &mut NodeArena) -> Vec<EfaEdge> {
        let k: Vec<_> = (0..4).map(|i| arena.permanent_or_insert(i)).collect();
        (0..4).map(|i| EfaEdge::new(k[i], k[(i + 1) % 4])).collect()
    }

    #[test]
    fn uncut_fragment_keeps_its_edges() {
        let mut arena = NodeArena::default();
        let edges = quad(&mut arena);
        let frag = Fragment2D::from_element_edges(&edges);
        let split = frag.split(&arena, 0).unwrap();
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].num_edges(), 4);
    }

    #[test]
    fn two_cuts_conserve_edge_count() {
        let mut arena = NodeArena::default();
        let mut edges = quad(&mut arena);
        let a = arena.new_embedded();
        let b = arena.new_embedded();
        let from0 = edges[0].node(0);
        let from2 = edges[2].node(0);
        edges[0].add_intersection(0.5, a, from0);
        edges[2].add_intersection(0.3, b, from2);

        let frag = Fragment2D::from_element_edges(&edges);
        let split = frag.split(&arena, 0).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].num_edges() + split[1].num_edges(), 4 + 4);
        assert!(split[0].is_connected(&split[1]));
        assert_eq!(split[0].common_nodes(&split[1]).len(), 2);
    }

    #[test]
    fn one_cut_makes_a_tip_fragment() {
        let mut arena = NodeArena::default();
        let mut edges = quad(&mut arena);
        let a = arena.new_embedded();
        let from = edges[1].node(0);
        edges[1].add_intersection(0.25, a, from);

        let frag = Fragment2D::from_element_edges(&edges);
        let mut split = frag.split(&arena, 0).unwrap();
        assert_eq!(split.len(), 1);
        assert_eq!(split[0].num_edges(), 5);
        assert_eq!(split[0].tip_edges(&edges[1]).len(), 2);

        split[0].combine_tip_edges(&edges, 0).unwrap();
        assert_eq!(split[0].num_edges(), 4);
        assert_eq!(split[0].num_cuts(), 1);
        assert_relative_eq!(split[0].edge(1).intersection(0, from), 0.25);
    }
}
