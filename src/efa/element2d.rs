use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::efa::fragment::{SnapshotCut, SnapshotEdge};
use crate::efa::{
    planar, EfaEdge, EfaError, ElementMap, FaceNode, Fragment, Fragment2D, FragmentSnapshot,
    NodeArena, NodeCategory, NodeKey,
};
use crate::fe::lagrange_shape;
use crate::math::{Point, Real, TOLERANCE};
use crate::mesh::{ElemId, ElemType};
use crate::utils::hashmap::HashMap;

/// Unit-square coordinates of the vertices, used to place the cut line of a child element.
const QUAD_LOCAL: [[Real; 2]; 4] = [[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]];
const TRI_LOCAL: [[Real; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];

/// The fragment topology of a `Quad4` or `Tri3` element.
///
/// Edge `i` joins vertex `i` to vertex `i + 1`. Each edge has at most two neighbours: two only
/// when the neighbours are the children of an element split by a crack whose tip ends on
/// that edge.
#[derive(Clone, Debug)]
pub struct Element2D {
    pub(crate) id: ElemId,
    pub(crate) ty: ElemType,
    pub(crate) nodes: Vec<NodeKey>,
    pub(crate) edges: Vec<EfaEdge>,
    pub(crate) fragments: Vec<Fragment2D>,
    pub(crate) interior_nodes: Vec<FaceNode>,
    pub(crate) edge_neighbors: Vec<SmallVec<[ElemId; 2]>>,
    pub(crate) general_neighbors: Vec<ElemId>,
    pub(crate) parent: Option<ElemId>,
    pub(crate) children: Vec<ElemId>,
    pub(crate) crack_tip_split: bool,
    pub(crate) crack_tip_neighbors: Vec<usize>,
}

impl Element2D {
    /// An uncut element with the vertices `nodes`.
    pub(crate) fn new(id: ElemId, ty: ElemType, nodes: Vec<NodeKey>) -> Result<Self, EfaError> {
        if ty.dim() != 2 {
            return Err(EfaError::WrongDimension { elem: id, expected: 2 });
        }
        if nodes.len() != ty.n_nodes() {
            return Err(EfaError::InvalidNodeCount(nodes.len()));
        }

        let n = nodes.len();
        let edges = (0..n)
            .map(|i| EfaEdge::new(nodes[i], nodes[(i + 1) % n]))
            .collect();
        Ok(Self::with_edges(id, ty, nodes, edges))
    }

    pub(crate) fn with_edges(
        id: ElemId,
        ty: ElemType,
        nodes: Vec<NodeKey>,
        edges: Vec<EfaEdge>,
    ) -> Self {
        let n = nodes.len();
        Self {
            id,
            ty,
            nodes,
            edges,
            fragments: Vec::new(),
            interior_nodes: Vec::new(),
            edge_neighbors: vec![SmallVec::new(); n],
            general_neighbors: Vec::new(),
            parent: None,
            children: Vec::new(),
            crack_tip_split: false,
            crack_tip_neighbors: Vec::new(),
        }
    }

    /// The id of this element.
    pub fn id(&self) -> ElemId {
        self.id
    }

    /// The element type.
    pub fn elem_type(&self) -> ElemType {
        self.ty
    }

    /// The vertices.
    pub fn nodes(&self) -> &[NodeKey] {
        &self.nodes
    }

    /// The number of vertices (and edges).
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The number of edges.
    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// The `i`-th edge, with its cuts.
    pub fn edge(&self, i: usize) -> &EfaEdge {
        &self.edges[i]
    }

    /// The edges, with their cuts.
    pub fn edges(&self) -> &[EfaEdge] {
        &self.edges
    }

    /// The physical fragments.
    pub fn fragments(&self) -> &[Fragment2D] {
        &self.fragments
    }

    /// The number of physical fragments.
    pub fn num_fragments(&self) -> usize {
        self.fragments.len()
    }

    /// The cut nodes inside the element.
    pub fn interior_nodes(&self) -> &[FaceNode] {
        &self.interior_nodes
    }

    /// The element this one was split from.
    pub fn parent(&self) -> Option<ElemId> {
        self.parent
    }

    /// The elements this one was split into.
    pub fn children(&self) -> &[ElemId] {
        &self.children
    }

    /// The elements sharing at least one vertex with this one.
    pub fn general_neighbors(&self) -> &[ElemId] {
        &self.general_neighbors
    }

    /// The neighbours across edge `i`.
    pub fn edge_neighbors(&self, i: usize) -> &[ElemId] {
        &self.edge_neighbors[i]
    }

    /// The number of neighbours across edge `i`.
    pub fn num_edge_neighbors(&self, i: usize) -> usize {
        self.edge_neighbors[i].len()
    }

    /// Is this element flagged as the neighbour of a crack tip about to extend?
    pub fn is_crack_tip_split(&self) -> bool {
        self.crack_tip_split
    }

    /// The edges through which a crack tip may extend into this element.
    pub fn crack_tip_neighbors(&self) -> &[usize] {
        &self.crack_tip_neighbors
    }

    /// Does `node` appear among the vertices?
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes.contains(&node)
    }

    /// Both end nodes of edge `i`.
    pub fn edge_nodes(&self, i: usize) -> [NodeKey; 2] {
        self.edges[i].nodes()
    }

    fn local_node_coords(&self) -> &'static [[Real; 2]] {
        match self.ty {
            ElemType::Tri3 => &TRI_LOCAL,
            _ => &QUAD_LOCAL,
        }
    }

    /// Maps the 1D reference coordinate `xi ∈ [-1, 1]` of edge `edge` to the element's
    /// reference coordinates.
    pub fn map_1d_to_2d(&self, edge: usize, xi: Real) -> [Real; 2] {
        let verts = self.ty.reference_vertices();
        let n = self.num_edges();
        let (a, b) = (verts[edge], verts[(edge + 1) % n]);
        let t = 0.5 * (xi + 1.0);
        [a[0] + t * (b[0] - a[0]), a[1] + t * (b[1] - a[1])]
    }

    /// The reference coordinates of a node lying on an element edge.
    pub fn edge_node_para_coords(&self, node: NodeKey) -> Option<[Real; 2]> {
        let (i, edge) = self
            .edges
            .iter()
            .enumerate()
            .find(|(_, e)| e.contains_node(node))?;
        let rel = edge.distance_from_node1(node)?;
        Some(self.map_1d_to_2d(i, 2.0 * rel - 1.0))
    }

    /// The vertices (or edge end nodes) `node` interpolates, with their weights.
    ///
    /// `node` is a vertex, a cut node of an element edge, or a cut node inside the element.
    pub fn master_info(&self, node: NodeKey) -> Result<SmallVec<[(NodeKey, Real); 4]>, EfaError> {
        if let Some(edge) = self.edges.iter().find(|e| e.contains_node(node)) {
            return edge
                .node_masters(node)
                .map(|m| m.into_iter().collect())
                .ok_or(EfaError::MissingNode {
                    elem: self.id,
                    reason: "no master nodes on the containing edge",
                });
        }

        if let Some(face_node) = self.interior_nodes.iter().find(|n| n.node == node) {
            let shape = lagrange_shape(
                self.ty,
                &Point::new(face_node.xi[0], face_node.xi[1], 0.0),
            );
            return Ok(self
                .nodes
                .iter()
                .zip(shape.phi.iter())
                .map(|(n, w)| (*n, *w))
                .collect());
        }

        Err(EfaError::MissingNode {
            elem: self.id,
            reason: "the node is neither on an edge nor inside the element",
        })
    }

    /// Does some vertex lie outside every fragment?
    pub fn is_partial(&self) -> bool {
        !self.fragments.is_empty()
            && self
                .nodes
                .iter()
                .any(|n| !self.fragments.iter().any(|f| f.contains_node(*n)))
    }

    /// The vertices lying outside every fragment.
    pub fn non_physical_nodes(&self) -> BTreeSet<NodeKey> {
        self.nodes
            .iter()
            .copied()
            .filter(|n| !self.fragments.iter().any(|f| f.contains_node(*n)))
            .collect()
    }

    /// The vertices of edge `i` lying outside every fragment.
    pub fn phantom_nodes_on_edge(&self, i: usize) -> BTreeSet<NodeKey> {
        if self.fragments.is_empty() {
            return BTreeSet::new();
        }
        self.edges[i]
            .nodes()
            .into_iter()
            .filter(|n| !self.fragments.iter().any(|f| f.contains_node(*n)))
            .collect()
    }

    /// Does edge `i` contain no fragment edge at all?
    pub fn is_edge_phantom(&self, i: usize) -> bool {
        !self.fragments.is_empty()
            && !self
                .fragments
                .iter()
                .any(|f| f.edges().iter().any(|e| self.edges[i].contains_edge(e)))
    }

    /// Replaces the vertex `old` by `new` in this element only.
    pub(crate) fn switch_node(&mut self, new: NodeKey, old: NodeKey) {
        for n in &mut self.nodes {
            if *n == old {
                *n = new;
            }
        }
        for f in &mut self.fragments {
            f.switch_node(new, old);
        }
        for e in &mut self.edges {
            e.switch_node(new, old);
        }
    }

    /// Replaces the cut node `old` by `new`.
    pub(crate) fn switch_embedded_node(&mut self, new: NodeKey, old: NodeKey) {
        for e in &mut self.edges {
            e.switch_node(new, old);
        }
        for n in &mut self.interior_nodes {
            if n.node == old {
                n.node = new;
            }
        }
        for f in &mut self.fragments {
            f.switch_node(new, old);
        }
    }

    /// The vertices shared with `other`, in handle order.
    pub fn common_nodes(&self, other: &Element2D) -> Vec<NodeKey> {
        let mine: BTreeSet<_> = self.nodes.iter().copied().collect();
        let theirs: BTreeSet<_> = other.nodes.iter().copied().collect();
        mine.intersection(&theirs).copied().collect()
    }

    // Do the vertices `a` then `b` follow the vertex order of this element?
    fn ascending(&self, a: NodeKey, b: NodeKey, other: ElemId) -> Result<bool, EfaError> {
        let n = self.nodes.len();
        let ia = self.nodes.iter().position(|x| *x == a);
        let ib = self.nodes.iter().position(|x| *x == b);
        match (ia, ib) {
            (Some(ia), Some(ib)) if ib == (ia + 1) % n => Ok(true),
            (Some(ia), Some(ib)) if ib == (ia + n - 1) % n => Ok(false),
            _ => Err(EfaError::InconsistentNeighbors(self.id, other)),
        }
    }

    /// Does `other` cover the same region as this element, like two children of one parent?
    pub fn overlays_element(&self, other: &Element2D) -> Result<bool, EfaError> {
        if other.num_edges() != self.num_edges() {
            return Ok(false);
        }

        let common = self.common_nodes(other);
        match common.len() {
            2 => {
                let mine = self.ascending(common[0], common[1], other.id)?;
                let theirs = other.ascending(common[0], common[1], self.id)?;
                Ok(mine == theirs)
            }
            n => Ok(n > 2),
        }
    }

    /// The edge across which `neighbor` lies.
    pub fn neighbor_index(&self, neighbor: ElemId) -> Result<usize, EfaError> {
        self.edge_neighbors
            .iter()
            .position(|ns| ns.contains(&neighbor))
            .ok_or(EfaError::InconsistentNeighbors(self.id, neighbor))
    }

    pub(crate) fn clear_neighbors(&mut self) {
        self.general_neighbors.clear();
        for ns in &mut self.edge_neighbors {
            ns.clear();
        }
    }

    pub(crate) fn clear_parent_and_children(&mut self) {
        self.parent = None;
        self.children.clear();
    }

    /// Computes the general and edge neighbours from the node-to-element map.
    pub(crate) fn compute_neighbors(
        &self,
        elements: &ElementMap,
        inverse: &HashMap<NodeKey, BTreeSet<ElemId>>,
    ) -> Result<(Vec<SmallVec<[ElemId; 2]>>, Vec<ElemId>), EfaError> {
        let general: BTreeSet<ElemId> = self
            .nodes
            .iter()
            .filter_map(|n| inverse.get(n))
            .flatten()
            .copied()
            .filter(|e| *e != self.id)
            .collect();

        let mut edge_neighbors = vec![SmallVec::new(); self.num_edges()];
        for &other_id in &general {
            let other = planar(elements, other_id)?;
            let common = self.common_nodes(other);
            if common.len() < 2 {
                continue;
            }

            for (e, neighbors) in edge_neighbors.iter_mut().enumerate() {
                let shared = self.edges[e]
                    .nodes()
                    .iter()
                    .filter(|n| common.contains(n))
                    .count();
                if shared != 2 || self.overlays_element(other)? {
                    continue;
                }

                let is_neighbor = match (self.fragments.len(), other.fragments.len()) {
                    (1, 1) => self.fragments[0].is_connected(&other.fragments[0]),
                    (a, b) if a > 1 || b > 1 => {
                        return Err(EfaError::FragmentCount {
                            elem: if a > 1 { self.id } else { other_id },
                            expected: "at most 1 while searching for neighbours",
                            found: a.max(b),
                        })
                    }
                    _ => true,
                };

                if is_neighbor {
                    if neighbors.len() >= 2 {
                        return Err(EfaError::TooManyNeighbors {
                            elem: self.id,
                            side: e,
                        });
                    }
                    neighbors.push(other_id);
                }
            }
        }

        Ok((edge_neighbors, general.into_iter().collect()))
    }

    /// Checks that every edge neighbour lists this element as a neighbour too.
    pub(crate) fn neighbor_sanity_check(&self, elements: &ElementMap) -> Result<(), EfaError> {
        for neighbors in &self.edge_neighbors {
            for &other_id in neighbors {
                let other = planar(elements, other_id)?;
                if !other.edge_neighbors.iter().any(|ns| ns.contains(&self.id)) {
                    return Err(EfaError::InconsistentNeighbors(self.id, other_id));
                }
            }
        }
        Ok(())
    }

    /// The number of cuts on the element edges.
    pub fn num_cuts(&self) -> usize {
        self.edges.iter().map(EfaEdge::num_embedded_nodes).sum()
    }

    /// Has the fragment of this element already been cut twice?
    pub fn is_final_cut(&self) -> bool {
        self.fragments.first().is_some_and(|f| {
            (0..f.num_edges())
                .filter(|i| f.is_edge_interior(*i, &self.edges))
                .count()
                == 2
        })
    }

    /// Does the cut edge `i` contain two edges of the single fragment?
    pub fn edge_contains_tip(&self, i: usize) -> bool {
        self.fragments.len() == 1
            && self.edges[i].has_intersection()
            && self.fragments[0].tip_edges(&self.edges[i]).len() == 2
    }

    /// Is this element the one holding a crack tip?
    pub fn is_crack_tip_element(&self) -> bool {
        self.tip_edge_id().is_some()
    }

    /// The element edge holding the crack tip.
    pub fn tip_edge_id(&self) -> Option<usize> {
        (0..self.num_edges()).find(|i| self.edge_contains_tip(*i))
    }

    /// The cut node at the crack tip.
    pub fn tip_embedded_node(&self) -> Option<NodeKey> {
        let i = self.tip_edge_id()?;
        let frag = &self.fragments[0];
        let ids = frag.tip_edges(&self.edges[i]);
        let (a, b) = (frag.edge(ids[0]), frag.edge(ids[1]));
        a.nodes().into_iter().find(|n| b.contains_node(*n))
    }

    /// The fragment edge lying on the element edge `i`, if the element has one fragment.
    pub fn fragment_edge_id(&self, i: usize) -> Option<usize> {
        if self.fragments.len() != 1 {
            return None;
        }
        let frag = &self.fragments[0];
        (0..frag.num_edges()).find(|j| self.edges[i].contains_edge(frag.edge(*j)))
    }

    /// Is the fragment edge on the element edge `i` already cut?
    pub fn fragment_edge_already_cut(&self, i: usize) -> bool {
        self.edge_contains_tip(i)
            || self
                .fragment_edge_id(i)
                .is_some_and(|j| self.fragments[0].edge(j).has_intersection())
    }

    /// Adds a cut to the element edge `edge_id` at `position`, measured from its first node.
    ///
    /// `embedded` is the cut node chosen by a neighbour for the same cut. Returns the cut node
    /// used by this element, or `None` if the cut falls outside the physical part of the edge.
    pub(crate) fn add_edge_cut(
        &mut self,
        edge_id: usize,
        position: Real,
        embedded: Option<NodeKey>,
        arena: &mut NodeArena,
    ) -> Result<Option<NodeKey>, EfaError> {
        let node1 = self.edges[edge_id].node(0);
        let mut local = embedded;

        let existing = self.edges[edge_id]
            .embedded_node_index(position, node1)
            .filter(|_| position > TOLERANCE && position < 1.0 - TOLERANCE);

        if let Some(idx) = existing {
            let old = self.edges[edge_id].embedded_node(idx);
            if embedded.is_some_and(|e| e != old) {
                return Err(EfaError::InvalidCut {
                    elem: self.id,
                    edge: edge_id,
                    reason: "another cut node already exists at this position",
                });
            }
            return Ok(Some(old));
        }

        let mut add_to_elem = true;
        let mut frag_cut = None;
        if let Some(frag_edge_id) = self.fragment_edge_id(edge_id) {
            if !self.fragment_edge_already_cut(edge_id) {
                let frag_edge = self.fragments[0].edge(frag_edge_id);
                let host = &self.edges[edge_id];
                let (Some(xi0), Some(xi1)) = (
                    host.distance_from_node1(frag_edge.node(0)),
                    host.distance_from_node1(frag_edge.node(1)),
                ) else {
                    return Err(EfaError::MissingNode {
                        elem: self.id,
                        reason: "a fragment edge is not on its element edge",
                    });
                };
                if (position - xi0) * (position - xi1) < 0.0 {
                    let frag_position = (position - xi0) / (xi1 - xi0);
                    frag_cut = Some((frag_edge_id, frag_edge.node(0), frag_position));
                } else {
                    add_to_elem = false;
                }
            } else {
                log::debug!(
                    "element {}: the fragment edge on edge {} is already cut",
                    self.id,
                    edge_id
                );
                add_to_elem = false;
            }
        }

        if !add_to_elem {
            return Ok(local);
        }

        let node = match local {
            Some(node) => node,
            None => arena.new_embedded(),
        };
        local = Some(node);
        self.edges[edge_id].add_intersection(position, node, node1);
        if self.edges[edge_id].num_embedded_nodes() > 2 {
            return Err(EfaError::InvalidCut {
                elem: self.id,
                edge: edge_id,
                reason: "an element edge cannot carry more than two cuts",
            });
        }

        if let Some((frag_edge_id, from, frag_position)) = frag_cut {
            let frag_edge = self.fragments[0].edge_mut(frag_edge_id);
            frag_edge.add_intersection(frag_position, node, from);
            if frag_edge.num_embedded_nodes() > 1 {
                return Err(EfaError::InvalidCut {
                    elem: self.id,
                    edge: edge_id,
                    reason: "a fragment edge cannot carry more than one cut",
                });
            }
        }

        Ok(local)
    }

    /// Marks the vertex `local` as a cut point.
    pub(crate) fn add_node_cut(&mut self, local: usize, arena: &mut NodeArena) {
        let node = self.nodes[local];
        if arena.category(node) == NodeCategory::Permanent {
            let _ = arena.make_embedded_permanent(node);
        }
    }

    /// Cuts the interior edge `frag_edge_id` of the single fragment at `position`.
    ///
    /// Returns `false` when the position coincides with an end node of the edge.
    pub(crate) fn add_fragment_edge_cut(
        &mut self,
        frag_edge_id: usize,
        position: Real,
        arena: &mut NodeArena,
    ) -> Result<bool, EfaError> {
        if self.fragments.len() != 1 {
            return Err(EfaError::FragmentCount {
                elem: self.id,
                expected: "1 to cut a fragment edge",
                found: self.fragments.len(),
            });
        }

        if position.abs() < TOLERANCE || (1.0 - position).abs() < TOLERANCE {
            return Ok(false);
        }

        let frag_edge = self.fragments[0].edge(frag_edge_id).clone();
        let (node1, node2) = (frag_edge.node(0), frag_edge.node(1));
        if frag_edge.has_intersection() {
            if !frag_edge.has_intersection_at_position(position, node1) {
                return Err(EfaError::InvalidCut {
                    elem: self.id,
                    edge: frag_edge_id,
                    reason: "the fragment edge is already cut at another position",
                });
            }
            return Ok(true);
        }

        if !self.fragments[0].is_edge_interior(frag_edge_id, &self.edges)
            || self.fragments[0].is_secondary_interior_edge(frag_edge_id, &self.interior_nodes)
        {
            return Err(EfaError::InvalidCut {
                elem: self.id,
                edge: frag_edge_id,
                reason: "only a primary interior fragment edge can be cut",
            });
        }

        let (Some(p1), Some(p2)) = (
            self.edge_node_para_coords(node1),
            self.edge_node_para_coords(node2),
        ) else {
            return Err(EfaError::MissingNode {
                elem: self.id,
                reason: "the ends of an interior edge must lie on element edges",
            });
        };

        let node = arena.new_embedded();
        self.fragments[0]
            .edge_mut(frag_edge_id)
            .add_intersection(position, node, node1);
        let xi = [
            (1.0 - position) * p1[0] + position * p2[0],
            (1.0 - position) * p1[1] + position * p2[1],
        ];
        self.interior_nodes.push(FaceNode { node, xi });
        Ok(true)
    }

    /// Rebuilds the fragments from the cuts marked since the last update.
    pub(crate) fn update_fragments(
        &mut self,
        is_crack_tip: bool,
        arena: &mut NodeArena,
    ) -> Result<(), EfaError> {
        if is_crack_tip {
            if self.fragments.len() != 1 {
                return Err(EfaError::FragmentCount {
                    elem: self.id,
                    expected: "1 for a crack-tip element",
                    found: self.fragments.len(),
                });
            }
            let id = self.id;
            self.fragments[0].combine_tip_edges(&self.edges, id)?;
        }

        if self.fragments.len() == 1 {
            self.remove_invalid_embedded_nodes(arena)?;
        }

        if self.fragments.is_empty() {
            self.fragments
                .push(Fragment2D::from_element_edges(&self.edges));
        }
        if self.fragments.len() != 1 {
            return Err(EfaError::FragmentCount {
                elem: self.id,
                expected: "1 before splitting",
                found: self.fragments.len(),
            });
        }

        let num_cuts = self.fragments[0].num_cuts();
        let num_cut_nodes = self.fragments[0].num_cut_nodes(arena);
        let num_edges = self.fragments[0].num_edges();
        if num_cuts > 3 {
            return Err(EfaError::TooManyCuts {
                elem: self.id,
                cuts: num_cuts,
            });
        }

        if num_cuts == 0 && num_cut_nodes == 0 {
            // An element cut before keeps its partial fragment.
            if !self.is_partial() {
                self.fragments.clear();
            }
            return Ok(());
        }

        let new_fragments = if num_cuts == 3 {
            self.branching_split(arena)?
        } else {
            self.fragments[0].split(arena, self.id)?
        };
        self.fragments = new_fragments;
        self.fragment_sanity_check(num_edges, num_cuts, arena)
    }

    // A fragment whose only cut lies on one of its interior edges loses that cut.
    fn remove_invalid_embedded_nodes(&mut self, arena: &mut NodeArena) -> Result<(), EfaError> {
        let frag = &self.fragments[0];
        if frag.num_cuts() != 1 {
            return Ok(());
        }

        let Some(i) = (0..frag.num_edges())
            .find(|i| frag.is_edge_interior(*i, &self.edges) && frag.edge(*i).has_intersection())
        else {
            return Ok(());
        };

        if self.interior_nodes.len() != 1 {
            return Err(EfaError::FragmentSanity {
                elem: self.id,
                reason: "a single interior cut needs exactly one interior node",
            });
        }

        let node = frag.edge(i).embedded_node(0);
        self.fragments[0].edge_mut(i).remove_embedded_nodes();
        self.interior_nodes.clear();
        let _ = arena.remove(node);
        Ok(())
    }

    fn fragment_sanity_check(
        &self,
        old_edges: usize,
        old_cuts: usize,
        arena: &NodeArena,
    ) -> Result<(), EfaError> {
        for frag in &self.fragments {
            for node in frag.all_nodes() {
                match arena.category(node) {
                    NodeCategory::Permanent | NodeCategory::Embedded => {}
                    NodeCategory::EmbeddedPermanent => return Ok(()),
                    _ => {
                        return Err(EfaError::FragmentSanity {
                            elem: self.id,
                            reason: "a fragment holds a temporary or local node",
                        })
                    }
                }
            }
        }

        if self.interior_nodes.len() > 1 {
            return Err(EfaError::FragmentSanity {
                elem: self.id,
                reason: "more than one interior node after the update",
            });
        }

        let total: usize = self.fragments.iter().map(Fragment2D::num_edges).sum();
        let (count, expected_total) = match old_cuts {
            0 => (1, old_edges),
            1 => (1, old_edges + 1),
            2 => (2, old_edges + 4),
            _ => (3, old_edges + 9),
        };
        if self.fragments.len() != count || total != expected_total {
            return Err(EfaError::FragmentSanity {
                elem: self.id,
                reason: "the fragment edge count does not match the number of cuts",
            });
        }
        Ok(())
    }

    /// Splits an uncut element cut on three edges into three fragments meeting at a new
    /// interior node.
    pub(crate) fn branching_split(
        &mut self,
        arena: &mut NodeArena,
    ) -> Result<Vec<Fragment2D>, EfaError> {
        if self.is_partial() {
            return Err(EfaError::FragmentSanity {
                elem: self.id,
                reason: "only an uncut element can branch",
            });
        }

        let mut three = Vec::with_capacity(3);
        for edge in &self.edges {
            let from = edge.node(0);
            match edge.num_embedded_nodes() {
                1 => three.push(edge.embedded_node(0)),
                2 => {
                    let first = if edge.intersection(0, from) < edge.intersection(1, from) {
                        0
                    } else {
                        1
                    };
                    three.push(edge.embedded_node(first));
                    three.push(edge.embedded_node(1 - first));
                }
                _ => {}
            }
        }
        if three.len() != 3 {
            return Err(EfaError::TooManyCuts {
                elem: self.id,
                cuts: three.len(),
            });
        }

        let mut center = [0.0; 2];
        for node in &three {
            let xi = self
                .edge_node_para_coords(*node)
                .ok_or(EfaError::MissingNode {
                    elem: self.id,
                    reason: "a branching cut node is not on an element edge",
                })?;
            center[0] += xi[0] / 3.0;
            center[1] += xi[1] / 3.0;
        }

        let branch = arena.new_embedded();
        self.interior_nodes.push(FaceNode {
            node: branch,
            xi: center,
        });

        let n = self.edges.len();
        let mut fragments = Vec::with_capacity(3);
        for i in 0..3 {
            let next = three[(i + 1) % 3];
            let mut edges = vec![
                EfaEdge::new(next, branch),
                EfaEdge::new(branch, three[i]),
            ];

            let mut iedge = 0;
            let mut more = true;
            if let Some(j) = self.edges.iter().position(|e| e.contains_node(three[i])) {
                if self.edges[j].contains_node(next) {
                    edges.push(EfaEdge::new(three[i], next));
                    more = false;
                } else {
                    edges.push(EfaEdge::new(three[i], self.edges[j].node(1)));
                }
                iedge = j;
            }
            while more {
                iedge = (iedge + 1) % n;
                let edge = &self.edges[iedge];
                if edge.contains_node(next) {
                    edges.push(EfaEdge::new(edge.node(0), next));
                    more = false;
                } else {
                    edges.push(EfaEdge::new(edge.node(0), edge.node(1)));
                }
            }
            fragments.push(Fragment2D::from_edges(edges));
        }
        Ok(fragments)
    }

    /// Removes the cuts of the element edges that lie outside the fragment.
    pub(crate) fn remove_phantom_embedded_node(&mut self) {
        let Some(frag) = self.fragments.first() else {
            return;
        };
        for edge in &mut self.edges {
            let phantom: SmallVec<[NodeKey; 2]> = edge
                .embedded_nodes()
                .filter(|n| !frag.contains_node(*n))
                .collect();
            for node in phantom {
                edge.remove_embedded_node(node);
            }
        }
    }

    /// Switches back every vertex whose parent is a cut mesh node.
    pub(crate) fn update_fragment_node(&mut self, arena: &NodeArena) {
        for j in 0..self.nodes.len() {
            let node = self.nodes[j];
            if let Some(parent) = arena.parent(node) {
                if arena.category(parent) == NodeCategory::EmbeddedPermanent {
                    self.switch_node(node, parent);
                }
            }
        }
    }

    /// The unit-square or unit-triangle coordinates of `node`, interpolated from its masters.
    pub(crate) fn local_coords(&self, node: NodeKey) -> Result<[Real; 2], EfaError> {
        let local = self.local_node_coords();
        let mut xi = [0.0; 2];
        for (master, w) in self.master_info(node)? {
            let i = self
                .nodes
                .iter()
                .position(|n| *n == master)
                .ok_or(EfaError::MissingNode {
                    elem: self.id,
                    reason: "a master node is not a vertex",
                })?;
            xi[0] += w * local[i][0];
            xi[1] += w * local[i][1];
        }
        Ok(xi)
    }

    /// The local unit coordinates of the vertices.
    pub(crate) fn local_vertex_coords(&self) -> &'static [[Real; 2]] {
        self.local_node_coords()
    }

    /// Records `edge` as an edge through which a crack tip extends into this element.
    pub(crate) fn add_crack_tip_neighbor(&mut self, edge: usize) {
        if !self.crack_tip_neighbors.contains(&edge) {
            self.crack_tip_neighbors.push(edge);
        }
    }

    /// Should this element be duplicated although it is not split into several fragments?
    pub(crate) fn should_duplicate_for_crack_tip(
        &self,
        crack_tips: &BTreeSet<ElemId>,
        elements: &ElementMap,
    ) -> Result<bool, EfaError> {
        if self.fragments.len() != 1 {
            return Ok(false);
        }
        if !crack_tips.contains(&self.id) && self.is_crack_tip_element() {
            return Ok(true);
        }
        if self.should_duplicate_crack_tip_split_element(crack_tips, elements)? {
            return Ok(true);
        }
        self.should_duplicate_for_phantom_corner(elements)
    }

    /// Should this neighbour of a crack tip be duplicated because the crack extends into it,
    /// or because a split crack-tip neighbour shares one of its phantom vertices?
    pub fn should_duplicate_crack_tip_split_element(
        &self,
        crack_tips: &BTreeSet<ElemId>,
        elements: &ElementMap,
    ) -> Result<bool, EfaError> {
        if self.fragments.len() != 1 {
            return Ok(false);
        }
        if !self.will_crack_tip_extend(elements)?.is_empty() {
            return Ok(true);
        }

        let non_physical = self.non_physical_nodes();
        for &other_id in &self.general_neighbors {
            let other = planar(elements, other_id)?;
            if !crack_tips.contains(&other_id) || other.num_fragments() <= 1 {
                continue;
            }
            for i in 0..other.num_edges() {
                if other.num_edge_neighbors(i) == 2
                    && other
                        .edge_nodes(i)
                        .iter()
                        .any(|n| non_physical.contains(n))
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Does a phantom vertex of this element also sit on a phantom edge of a split neighbour?
    pub fn should_duplicate_for_phantom_corner(
        &self,
        elements: &ElementMap,
    ) -> Result<bool, EfaError> {
        if self.fragments.len() != 1 || self.crack_tip_split {
            return Ok(false);
        }

        for i in 0..self.num_edges() {
            let phantom = self.phantom_nodes_on_edge(i);
            if phantom.is_empty() || self.num_edge_neighbors(i) != 1 {
                continue;
            }
            let other = planar(elements, self.edge_neighbors[i][0])?;
            if other.num_fragments() <= 1 {
                continue;
            }
            for j in 0..other.num_edges() {
                if other.edges[j].equivalent(&self.edges[i]) || other.num_edge_neighbors(j) == 0 {
                    continue;
                }
                let other_phantom = other.phantom_nodes_on_edge(j);
                if phantom.intersection(&other_phantom).next().is_some() {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// The crack-tip neighbour edges through which the crack enters a split neighbour.
    ///
    /// The element is a crack-tip neighbour with one fragment. The crack extends across edge
    /// `i` when the neighbour on that side has two fragments whose shared cut starts at a cut
    /// node of edge `i`.
    pub fn will_crack_tip_extend(
        &self,
        elements: &ElementMap,
    ) -> Result<SmallVec<[usize; 2]>, EfaError> {
        let mut split = SmallVec::new();
        if self.fragments.len() != 1 || !self.crack_tip_split {
            return Ok(split);
        }

        for &i in &self.crack_tip_neighbors {
            if self.num_edge_neighbors(i) != 1 {
                return Err(EfaError::TooManyNeighbors {
                    elem: self.id,
                    side: i,
                });
            }
            let other = planar(elements, self.edge_neighbors[i][0])?;
            match other.num_fragments() {
                n if n > 2 => {
                    return Err(EfaError::FragmentCount {
                        elem: other.id,
                        expected: "at most 2 next to a crack tip",
                        found: n,
                    })
                }
                2 => {
                    let cut = other.fragments[0].common_nodes(&other.fragments[1]);
                    if cut.len() != 2 {
                        return Err(EfaError::FragmentSanity {
                            elem: other.id,
                            reason: "two fragments must share exactly two nodes",
                        });
                    }
                    if cut.iter().any(|n| self.edges[i].is_embedded_node(*n)) {
                        split.push(i);
                    }
                }
                _ => {}
            }
        }
        Ok(split)
    }

    /// Captures the fragments and cuts of this element.
    pub(crate) fn snapshot(&self, arena: &NodeArena) -> Result<FragmentSnapshot, EfaError> {
        let n = self.nodes.len();
        let fragments = self
            .fragments
            .iter()
            .map(|f| {
                f.edges()
                    .iter()
                    .map(|e| SnapshotEdge::encode(e, arena, self.id, &self.nodes))
                    .collect::<Result<Vec<_>, _>>()
                    .map(|cycle| vec![cycle])
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut cuts = Vec::new();
        for (i, edge) in self.edges.iter().enumerate() {
            let from = edge.node(0);
            for j in 0..edge.num_embedded_nodes() {
                cuts.push(SnapshotCut {
                    edge: [i, (i + 1) % n],
                    node: arena.id(edge.embedded_node(j)),
                    position: edge.intersection(j, from),
                });
            }
        }

        Ok(FragmentSnapshot {
            num_nodes: n,
            fragments,
            cuts,
            interior_nodes: self
                .interior_nodes
                .iter()
                .map(|n| (arena.id(n.node), n.xi))
                .collect(),
        })
    }

    /// Restores the fragments and cuts of a freshly added element.
    pub(crate) fn restore(
        &mut self,
        snapshot: &FragmentSnapshot,
        arena: &mut NodeArena,
    ) -> Result<(), EfaError> {
        if snapshot.num_nodes != self.nodes.len() {
            return Err(EfaError::Restore {
                elem: self.id,
                reason: "the snapshot was taken from an element with another vertex count",
            });
        }
        if !self.fragments.is_empty() || !self.interior_nodes.is_empty() || self.num_cuts() != 0
        {
            return Err(EfaError::Restore {
                elem: self.id,
                reason: "the element already has fragments or cuts",
            });
        }

        for frag in &snapshot.fragments {
            let cycle = frag.first().ok_or(EfaError::Restore {
                elem: self.id,
                reason: "a 2D fragment needs one edge cycle",
            })?;
            let edges = cycle
                .iter()
                .map(|e| e.decode(arena, self.id, &self.nodes))
                .collect::<Result<Vec<_>, _>>()?;
            self.fragments.push(Fragment2D::from_edges(edges));
        }

        for &(id, xi) in &snapshot.interior_nodes {
            let node = arena.insert_embedded(id);
            self.interior_nodes.push(FaceNode { node, xi });
        }

        let n = self.nodes.len();
        for cut in &snapshot.cuts {
            let [a, b] = cut.edge;
            let i = if b == (a + 1) % n {
                a
            } else if a == (b + 1) % n {
                b
            } else {
                return Err(EfaError::Restore {
                    elem: self.id,
                    reason: "a cut lies on a non-existent edge",
                });
            };
            let from = self.nodes[a];
            let node = arena.insert_embedded(cut.node);
            self.edges[i].add_intersection(cut.position, node, from);
            if self.edges[i].num_embedded_nodes() > 2 {
                return Err(EfaError::InvalidCut {
                    elem: self.id,
                    edge: i,
                    reason: "an element edge cannot carry more than two cuts",
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_quad(arena: &mut NodeArena) -> Element2D {
        let nodes = (0..4).map(|i| arena.permanent_or_insert(i)).collect();
        Element2D::new(0, ElemType::Quad4, nodes).unwrap()
    }

    #[test]
    fn edge_cut_creates_an_embedded_node_once() {
        let mut arena = NodeArena::default();
        let mut elem = unit_quad(&mut arena);
        let a = elem.add_edge_cut(0, 0.5, None, &mut arena).unwrap();
        let b = elem.add_edge_cut(0, 0.5, None, &mut arena).unwrap();
        assert!(a.is_some());
        assert_eq!(a, b);
        assert_eq!(elem.num_cuts(), 1);
        assert_eq!(arena.embedded.len(), 1);
    }

    #[test]
    fn two_edge_cuts_split_the_element() {
        let mut arena = NodeArena::default();
        let mut elem = unit_quad(&mut arena);
        let _ = elem.add_edge_cut(0, 0.5, None, &mut arena).unwrap();
        let _ = elem.add_edge_cut(2, 0.5, None, &mut arena).unwrap();
        elem.update_fragments(false, &mut arena).unwrap();

        assert_eq!(elem.num_fragments(), 2);
        assert!(!elem.is_partial());
        assert!(!elem.is_crack_tip_element());
        let total: usize = elem.fragments().iter().map(|f| f.num_edges()).sum();
        assert_eq!(total, 8);
    }

    #[test]
    fn one_edge_cut_makes_a_crack_tip() {
        let mut arena = NodeArena::default();
        let mut elem = unit_quad(&mut arena);
        let cut = elem.add_edge_cut(1, 0.5, None, &mut arena).unwrap();
        elem.update_fragments(false, &mut arena).unwrap();

        assert_eq!(elem.num_fragments(), 1);
        assert!(elem.is_crack_tip_element());
        assert_eq!(elem.tip_edge_id(), Some(1));
        assert_eq!(elem.tip_embedded_node(), cut);
    }

    #[test]
    fn uncut_update_leaves_no_fragment() {
        let mut arena = NodeArena::default();
        let mut elem = unit_quad(&mut arena);
        elem.update_fragments(false, &mut arena).unwrap();
        assert_eq!(elem.num_fragments(), 0);
    }

    #[test]
    fn three_cuts_branch_into_three_fragments() {
        let mut arena = NodeArena::default();
        let mut elem = unit_quad(&mut arena);
        for edge in 0..3 {
            let _ = elem.add_edge_cut(edge, 0.5, None, &mut arena).unwrap();
        }
        elem.update_fragments(false, &mut arena).unwrap();

        assert_eq!(elem.num_fragments(), 3);
        assert_eq!(elem.interior_nodes().len(), 1);
        assert_relative_eq!(elem.interior_nodes()[0].xi[0], 1.0 / 3.0, epsilon = 1.0e-12);
        assert_relative_eq!(elem.interior_nodes()[0].xi[1], 0.0, epsilon = 1.0e-12);
    }

    #[test]
    fn interior_node_masters_use_shape_functions() {
        let mut arena = NodeArena::default();
        let mut elem = unit_quad(&mut arena);
        let node = arena.new_embedded();
        elem.interior_nodes.push(FaceNode {
            node,
            xi: [0.0, 0.0],
        });
        let masters = elem.master_info(node).unwrap();
        assert_eq!(masters.len(), 4);
        for (_, w) in masters {
            assert_relative_eq!(w, 0.25);
        }
        let local = elem.local_coords(node).unwrap();
        assert_relative_eq!(local[0], 0.5);
        assert_relative_eq!(local[1], 0.5);
    }

    #[test]
    fn snapshot_survives_a_rebuild() {
        let mut arena = NodeArena::default();
        let mut elem = unit_quad(&mut arena);
        let _ = elem.add_edge_cut(0, 0.3, None, &mut arena).unwrap();
        let _ = elem.add_edge_cut(2, 0.6, None, &mut arena).unwrap();
        elem.update_fragments(false, &mut arena).unwrap();
        let snapshot = elem.snapshot(&arena).unwrap();

        let mut fresh = unit_quad(&mut arena);
        fresh.restore(&snapshot, &mut arena).unwrap();
        assert_eq!(fresh.num_fragments(), 2);
        assert_eq!(fresh.num_cuts(), 2);
        assert_relative_eq!(fresh.edge(0).intersection(0, fresh.nodes()[0]), 0.3);
        assert!(fresh.restore(&snapshot, &mut arena).is_err());
    }
}
