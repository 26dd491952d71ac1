use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::efa::fragment::{SnapshotCut, SnapshotEdge};
use crate::efa::{
    solid, EfaError, EfaFace, ElementMap, Fragment, Fragment3D, FragmentSnapshot, NodeArena,
    NodeCategory, NodeKey,
};
use crate::math::{Real, TOLERANCE};
use crate::mesh::{ElemId, ElemType};
use crate::utils::hashmap::HashMap;

/// The fragment topology of a `Hex8` or `Tet4` element.
///
/// Faces follow the side numbering of [`ElemType::side_nodes`]. A cut of an element edge is
/// stored on every face sharing that edge.
#[derive(Clone, Debug)]
pub struct Element3D {
    pub(crate) id: ElemId,
    pub(crate) ty: ElemType,
    pub(crate) nodes: Vec<NodeKey>,
    pub(crate) faces: Vec<EfaFace>,
    pub(crate) fragments: Vec<Fragment3D>,
    pub(crate) face_neighbors: Vec<SmallVec<[ElemId; 2]>>,
    pub(crate) general_neighbors: Vec<ElemId>,
    pub(crate) parent: Option<ElemId>,
    pub(crate) children: Vec<ElemId>,
    pub(crate) crack_tip_split: bool,
    pub(crate) crack_tip_neighbors: Vec<usize>,
}

impl Element3D {
    /// An uncut element with the vertices `nodes`.
    pub(crate) fn new(id: ElemId, ty: ElemType, nodes: Vec<NodeKey>) -> Result<Self, EfaError> {
        if ty.dim() != 3 {
            return Err(EfaError::WrongDimension { elem: id, expected: 3 });
        }
        if nodes.len() != ty.n_nodes() {
            return Err(EfaError::InvalidNodeCount(nodes.len()));
        }

        let faces = (0..ty.n_sides())
            .filter_map(|s| ty.side_nodes(s))
            .map(|side| EfaFace::new(&side.iter().map(|i| nodes[*i]).collect::<Vec<_>>()))
            .collect();
        Ok(Self::with_faces(id, ty, nodes, faces))
    }

    pub(crate) fn with_faces(
        id: ElemId,
        ty: ElemType,
        nodes: Vec<NodeKey>,
        faces: Vec<EfaFace>,
    ) -> Self {
        let n_faces = faces.len();
        Self {
            id,
            ty,
            nodes,
            faces,
            fragments: Vec::new(),
            face_neighbors: vec![SmallVec::new(); n_faces],
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

    /// The number of faces.
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// The `i`-th face, with the cuts of its edges.
    pub fn face(&self, i: usize) -> &EfaFace {
        &self.faces[i]
    }

    /// The faces, with the cuts of their edges.
    pub fn faces(&self) -> &[EfaFace] {
        &self.faces
    }

    /// Does face `i` contain no fragment face at all?
    pub fn is_face_phantom(&self, i: usize) -> bool {
        let face = &self.faces[i];
        !self.fragments.is_empty()
            && !self.fragments.iter().any(|f| {
                f.faces()
                    .iter()
                    .any(|ff| ff.nodes().iter().all(|n| face.contains_node(*n)))
            })
    }

    /// The physical fragments.
    pub fn fragments(&self) -> &[Fragment3D] {
        &self.fragments
    }

    /// The number of physical fragments.
    pub fn num_fragments(&self) -> usize {
        self.fragments.len()
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

    /// The neighbours across face `i`.
    pub fn face_neighbors(&self, i: usize) -> &[ElemId] {
        &self.face_neighbors[i]
    }

    /// Is this element a neighbour of a crack-tip element, across a face the crack crosses?
    pub fn is_crack_tip_split(&self) -> bool {
        self.crack_tip_split
    }

    /// The faces across which a crack-tip element lies.
    pub fn crack_tip_neighbors(&self) -> &[usize] {
        &self.crack_tip_neighbors
    }

    /// Does `node` appear among the vertices?
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes.contains(&node)
    }

    /// The end nodes of the element edge `edge`.
    pub fn edge_nodes(&self, edge: usize) -> Option<[NodeKey; 2]> {
        self.ty
            .edges()
            .get(edge)
            .map(|[a, b]| [self.nodes[*a], self.nodes[*b]])
    }

    /// The element edge joining `a` and `b`, and whether it runs from `a` to `b`.
    pub fn find_edge(&self, a: NodeKey, b: NodeKey) -> Option<(usize, bool)> {
        self.ty.edges().iter().enumerate().find_map(|(i, [p, q])| {
            let (p, q) = (self.nodes[*p], self.nodes[*q]);
            if (p, q) == (a, b) {
                Some((i, true))
            } else if (p, q) == (b, a) {
                Some((i, false))
            } else {
                None
            }
        })
    }

    // The (face, face edge) pairs lying on the element edge joining `a` and `b`.
    fn face_edges(&self, a: NodeKey, b: NodeKey) -> SmallVec<[(usize, usize); 2]> {
        self.faces
            .iter()
            .enumerate()
            .filter_map(|(f, face)| face.find_edge(a, b).map(|e| (f, e)))
            .collect()
    }

    /// The number of distinct cut nodes on the element edges.
    pub fn num_cuts(&self) -> usize {
        self.faces
            .iter()
            .flat_map(|f| f.edges().iter().flat_map(|e| e.embedded_nodes()))
            .collect::<BTreeSet<_>>()
            .len()
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

    /// The vertices of face `i` lying outside every fragment.
    pub fn phantom_nodes_on_face(&self, i: usize) -> BTreeSet<NodeKey> {
        if self.fragments.is_empty() {
            return BTreeSet::new();
        }
        self.faces[i]
            .nodes()
            .into_iter()
            .filter(|n| !self.fragments.iter().any(|f| f.contains_node(*n)))
            .collect()
    }

    /// Has the fragment of this element been cut three times already?
    ///
    /// Such an element accepts no further cut.
    pub fn is_final_cut(&self) -> bool {
        self.fragments
            .first()
            .is_some_and(|f| f.num_interior_faces(&self.faces) >= 3)
    }

    /// The boundary face of the single fragment lying on face `i`.
    pub fn fragment_face_id(&self, i: usize) -> Option<usize> {
        match &self.fragments[..] {
            [frag] => frag
                .faces()
                .iter()
                .position(|f| self.faces[i].contains_face(f)),
            _ => None,
        }
    }

    /// Does the crack cross face `i` without splitting the element yet?
    ///
    /// The crack then enters the single fragment through this face and ends inside it.
    pub fn face_contains_tip(&self, i: usize) -> bool {
        self.fragments.len() == 1
            && self.faces[i].num_cut_edges() > 0
            && self
                .fragment_face_id(i)
                .is_some_and(|f| self.fragments[0].face(f).num_cut_edges() == 2)
    }

    /// The faces holding the crack tip.
    pub fn tip_face_ids(&self) -> SmallVec<[usize; 4]> {
        (0..self.faces.len())
            .filter(|i| self.face_contains_tip(*i))
            .collect()
    }

    /// The cut nodes on the faces holding the crack tip.
    pub fn tip_embedded_nodes(&self) -> BTreeSet<NodeKey> {
        self.tip_face_ids()
            .into_iter()
            .flat_map(|i| {
                self.faces[i]
                    .edges()
                    .iter()
                    .flat_map(|e| e.embedded_nodes())
                    .collect::<SmallVec<[NodeKey; 2]>>()
            })
            .collect()
    }

    /// Does the single fragment carry a crack crossing one of its faces?
    pub fn fragment_has_tip_faces(&self) -> bool {
        (0..self.faces.len()).any(|i| self.face_contains_tip(i))
    }

    /// Does a crack end inside this element?
    pub fn is_crack_tip_element(&self) -> bool {
        self.fragment_has_tip_faces()
    }

    // The position along the element edge `a`-`b`, measured from `a`, of a node on that edge.
    fn position_on_edge(&self, a: NodeKey, b: NodeKey, node: NodeKey) -> Option<Real> {
        let &(f, e) = self.face_edges(a, b).first()?;
        let edge = self.faces[f].edge(e);
        let x = edge.distance_from_node1(node)?;
        Some(if edge.node(0) == a { x } else { 1.0 - x })
    }

    // The (fragment face, fragment edge) pairs lying on the element edge `a`-`b`, with the
    // positions of their end nodes along it.
    fn fragment_edges_on(
        &self,
        a: NodeKey,
        b: NodeKey,
    ) -> SmallVec<[(usize, usize, [Real; 2]); 4]> {
        let mut found = SmallVec::new();
        let Some(frag) = self.fragments.first() else {
            return found;
        };
        let Some(&(f, e)) = self.face_edges(a, b).first() else {
            return found;
        };
        let elem_edge = self.faces[f].edge(e);
        for (i, face) in frag.faces().iter().enumerate() {
            for (j, edge) in face.edges().iter().enumerate() {
                if !elem_edge.contains_edge(edge) {
                    continue;
                }
                let [p, q] = edge.nodes();
                if let (Some(xp), Some(xq)) = (
                    self.position_on_edge(a, b, p),
                    self.position_on_edge(a, b, q),
                ) {
                    found.push((i, j, [xp, xq]));
                }
            }
        }
        found
    }

    /// The vertices `node` interpolates, with their weights.
    pub fn master_info(&self, node: NodeKey) -> Result<SmallVec<[(NodeKey, Real); 4]>, EfaError> {
        if self.nodes.contains(&node) {
            let mut masters = SmallVec::new();
            masters.push((node, 1.0));
            return Ok(masters);
        }

        self.faces
            .iter()
            .flat_map(|f| f.edges())
            .find(|e| e.is_embedded_node(node))
            .and_then(|e| e.node_masters(node))
            .map(|m| m.into_iter().collect())
            .ok_or(EfaError::MissingNode {
                elem: self.id,
                reason: "the node is neither a vertex nor on an element edge",
            })
    }

    /// Adds a cut to the element edge `edge` at `position`, measured from its first node.
    ///
    /// Returns the cut node used by this element, or `embedded` unchanged if the cut was
    /// rejected.
    pub(crate) fn add_edge_cut(
        &mut self,
        edge: usize,
        position: Real,
        embedded: Option<NodeKey>,
        arena: &mut NodeArena,
    ) -> Result<Option<NodeKey>, EfaError> {
        let [a, b] = self.edge_nodes(edge).ok_or(EfaError::InvalidCut {
            elem: self.id,
            edge,
            reason: "no such element edge",
        })?;

        if self.is_final_cut() {
            log::debug!("element {} is already fully cut, edge cut rejected", self.id);
            return Ok(embedded);
        }

        let locations = self.face_edges(a, b);
        let interior = position > TOLERANCE && position < 1.0 - TOLERANCE;
        for &(f, e) in &locations {
            let face_edge = self.faces[f].edge(e);
            if let Some(idx) = face_edge
                .embedded_node_index(position, a)
                .filter(|_| interior)
            {
                let old = face_edge.embedded_node(idx);
                if embedded.is_some_and(|n| n != old) {
                    return Err(EfaError::InvalidCut {
                        elem: self.id,
                        edge,
                        reason: "another cut node already exists at this position",
                    });
                }
                return Ok(Some(old));
            }
        }

        // The cut must fall on the physical part of the edge.
        let frag_edges = if self.fragments.len() == 1 {
            let on_edge = self.fragment_edges_on(a, b);
            let physical = on_edge
                .iter()
                .any(|(_, _, [xp, xq])| (position - xp) * (position - xq) < 0.0);
            if !physical {
                log::debug!(
                    "element {}: edge {} is not physical at {}, edge cut rejected",
                    self.id,
                    edge,
                    position
                );
                return Ok(embedded);
            }
            on_edge
        } else {
            SmallVec::new()
        };

        let node = match embedded {
            Some(node) => node,
            None => arena.new_embedded(),
        };
        for &(f, e) in &locations {
            let face_edge = self.faces[f].edge_mut(e);
            face_edge.add_intersection(position, node, a);
            if face_edge.num_embedded_nodes() > 2 {
                return Err(EfaError::InvalidCut {
                    elem: self.id,
                    edge,
                    reason: "an element edge cannot carry more than two cuts",
                });
            }
        }

        for (f, e, [xp, xq]) in frag_edges {
            if (position - xp) * (position - xq) >= 0.0 {
                continue;
            }
            let frag_edge = self.fragments[0].face_mut(f).edge_mut(e);
            if !frag_edge.is_embedded_node(node) {
                let from = frag_edge.node(0);
                frag_edge.add_intersection((position - xp) / (xq - xp), node, from);
            }
            if frag_edge.num_embedded_nodes() > 1 {
                return Err(EfaError::InvalidCut {
                    elem: self.id,
                    edge,
                    reason: "a fragment edge cannot carry more than one cut",
                });
            }
        }

        Ok(Some(node))
    }

    /// Rebuilds the fragments from the cuts marked since the last update.
    pub(crate) fn update_fragments(&mut self, arena: &NodeArena) -> Result<(), EfaError> {
        if self.fragments.len() > 1 {
            return Ok(());
        }
        if self.fragments.is_empty() {
            self.fragments
                .push(Fragment3D::from_faces(self.faces.clone()));
        }

        let frag = &self.fragments[0];
        if frag.num_cuts() == 0 {
            if !self.is_partial() {
                self.fragments.clear();
            }
            return Ok(());
        }

        let old_faces = frag.num_faces();
        let cut_faces = frag.num_cut_faces();
        let new_fragments = frag.split(arena, self.id)?;
        if new_fragments.len() == 2 {
            let total: usize = new_fragments.iter().map(Fragment3D::num_faces).sum();
            if total != old_faces + cut_faces + 2 {
                return Err(EfaError::FragmentSanity {
                    elem: self.id,
                    reason: "the fragment face count does not match the number of cut faces",
                });
            }
        }
        self.fragments = new_fragments;
        Ok(())
    }

    /// Removes the cuts of the element edges that lie outside the fragment.
    pub(crate) fn remove_phantom_embedded_node(&mut self) {
        let Some(frag) = self.fragments.first() else {
            return;
        };
        for face in &mut self.faces {
            for e in 0..face.num_nodes() {
                let edge = face.edge_mut(e);
                let phantom: SmallVec<[NodeKey; 2]> = edge
                    .embedded_nodes()
                    .filter(|n| !frag.contains_node(*n))
                    .collect();
                for node in phantom {
                    edge.remove_embedded_node(node);
                }
            }
        }
    }

    /// Replaces the vertex `old` by `new` in this element only.
    pub(crate) fn switch_node(&mut self, new: NodeKey, old: NodeKey) {
        for n in &mut self.nodes {
            if *n == old {
                *n = new;
            }
        }
        for f in &mut self.faces {
            f.switch_node(new, old);
        }
        for f in &mut self.fragments {
            f.switch_node(new, old);
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

    /// Does `other` cover the same region as this element, like two children of one parent?
    ///
    /// Both share a face running in the same direction, or more than one face.
    pub fn overlays_element(&self, other: &Element3D) -> bool {
        let common: SmallVec<[usize; 2]> = (0..self.faces.len())
            .filter(|i| other.faces.iter().any(|g| g.equivalent(&self.faces[*i])))
            .collect();
        match common[..] {
            [i] => other
                .faces
                .iter()
                .any(|g| g.same_orientation(&self.faces[i])),
            [] => false,
            _ => true,
        }
    }

    /// Records face `i` as a face across which a crack-tip element lies.
    pub(crate) fn add_crack_tip_neighbor(&mut self, i: usize) {
        if !self.crack_tip_neighbors.contains(&i) {
            self.crack_tip_neighbors.push(i);
        }
    }

    /// Should this element be duplicated although it is not split into several fragments?
    ///
    /// This holds for a new crack-tip element, for a crack-tip neighbour the crack extends
    /// into, and for an element sharing a phantom vertex with a neighbour about to split.
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
    /// or because a split crack-tip neighbour holds one of its phantom vertices on a face with
    /// two neighbours?
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
            let other = solid(elements, other_id)?;
            if !crack_tips.contains(&other_id) || other.num_fragments() <= 1 {
                continue;
            }
            for i in 0..other.num_faces() {
                if other.face_neighbors[i].len() == 2
                    && other.faces[i]
                        .nodes()
                        .iter()
                        .any(|n| non_physical.contains(n))
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// Does a phantom vertex of this element also sit on a phantom face of a split neighbour?
    pub fn should_duplicate_for_phantom_corner(
        &self,
        elements: &ElementMap,
    ) -> Result<bool, EfaError> {
        if self.fragments.len() != 1 || self.crack_tip_split {
            return Ok(false);
        }

        for i in 0..self.faces.len() {
            let phantom = self.phantom_nodes_on_face(i);
            if phantom.is_empty() || self.face_neighbors[i].len() != 1 {
                continue;
            }
            let other = solid(elements, self.face_neighbors[i][0])?;
            if other.num_fragments() <= 1 {
                continue;
            }
            for j in 0..other.num_faces() {
                if other.faces[j].equivalent(&self.faces[i]) || other.face_neighbors[j].is_empty()
                {
                    continue;
                }
                if phantom
                    .intersection(&other.phantom_nodes_on_face(j))
                    .next()
                    .is_some()
                {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    /// The crack-tip neighbour faces through which the crack enters a split neighbour.
    ///
    /// The crack extends across face `i` when the neighbour on that side now has two
    /// fragments and two of their shared cut nodes lie on face `i`.
    pub fn will_crack_tip_extend(
        &self,
        elements: &ElementMap,
    ) -> Result<SmallVec<[usize; 4]>, EfaError> {
        let mut split = SmallVec::new();
        if self.fragments.len() != 1 || !self.crack_tip_split {
            return Ok(split);
        }

        for &i in &self.crack_tip_neighbors {
            if self.face_neighbors[i].len() != 1 {
                return Err(EfaError::TooManyNeighbors {
                    elem: self.id,
                    side: i,
                });
            }
            let other = solid(elements, self.face_neighbors[i][0])?;
            match other.num_fragments() {
                n if n > 2 => {
                    return Err(EfaError::FragmentCount {
                        elem: other.id,
                        expected: "at most 2 next to a crack tip",
                        found: n,
                    })
                }
                2 => {
                    let on_face = other.fragments[0]
                        .common_nodes(&other.fragments[1])
                        .into_iter()
                        .filter(|n| self.faces[i].contains_node(*n))
                        .count();
                    if on_face == 2 {
                        split.push(i);
                    }
                }
                _ => {}
            }
        }
        Ok(split)
    }

    /// The face across which `neighbor` lies.
    pub fn neighbor_index(&self, neighbor: ElemId) -> Result<usize, EfaError> {
        self.face_neighbors
            .iter()
            .position(|ns| ns.contains(&neighbor))
            .ok_or(EfaError::InconsistentNeighbors(self.id, neighbor))
    }

    pub(crate) fn clear_neighbors(&mut self) {
        self.general_neighbors.clear();
        for ns in &mut self.face_neighbors {
            ns.clear();
        }
    }

    pub(crate) fn clear_parent_and_children(&mut self) {
        self.parent = None;
        self.children.clear();
    }

    /// Computes the general and face neighbours from the node-to-element map.
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

        let mut face_neighbors = vec![SmallVec::new(); self.faces.len()];
        for &other_id in &general {
            let other = solid(elements, other_id)?;
            if self.overlays_element(other) {
                continue;
            }
            for (f, neighbors) in face_neighbors.iter_mut().enumerate() {
                if !other.faces.iter().any(|g| g.equivalent(&self.faces[f])) {
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
                            side: f,
                        });
                    }
                    neighbors.push(other_id);
                }
            }
        }

        Ok((face_neighbors, general.into_iter().collect()))
    }

    /// Checks that every face neighbour lists this element as a neighbour too.
    pub(crate) fn neighbor_sanity_check(&self, elements: &ElementMap) -> Result<(), EfaError> {
        for neighbors in &self.face_neighbors {
            for &other_id in neighbors {
                let other = solid(elements, other_id)?;
                if !other.face_neighbors.iter().any(|ns| ns.contains(&self.id)) {
                    return Err(EfaError::InconsistentNeighbors(self.id, other_id));
                }
            }
        }
        Ok(())
    }

    /// Captures the fragments and cuts of this element.
    pub(crate) fn snapshot(&self, arena: &NodeArena) -> Result<FragmentSnapshot, EfaError> {
        let fragments = self
            .fragments
            .iter()
            .map(|f| {
                f.faces()
                    .iter()
                    .map(|face| {
                        face.edges()
                            .iter()
                            .map(|e| SnapshotEdge::encode(e, arena, self.id, &self.nodes))
                            .collect::<Result<Vec<_>, _>>()
                    })
                    .collect::<Result<Vec<_>, _>>()
            })
            .collect::<Result<Vec<_>, _>>()?;

        let mut cuts = Vec::new();
        for (i, [p, q]) in self.ty.edges().iter().enumerate() {
            let (a, b) = (self.nodes[*p], self.nodes[*q]);
            let Some(&(f, e)) = self.face_edges(a, b).first() else {
                continue;
            };
            let edge = self.faces[f].edge(e);
            for j in 0..edge.num_embedded_nodes() {
                cuts.push(SnapshotCut {
                    edge: self.ty.edges()[i],
                    node: arena.id(edge.embedded_node(j)),
                    position: edge.intersection(j, a),
                });
            }
        }

        Ok(FragmentSnapshot {
            num_nodes: self.nodes.len(),
            fragments,
            cuts,
            interior_nodes: Vec::new(),
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
        if !self.fragments.is_empty() || self.num_cuts() != 0 {
            return Err(EfaError::Restore {
                elem: self.id,
                reason: "the element already has fragments or cuts",
            });
        }

        for frag in &snapshot.fragments {
            let mut faces = Vec::with_capacity(frag.len());
            for cycle in frag {
                let edges = cycle
                    .iter()
                    .map(|e| e.decode(arena, self.id, &self.nodes))
                    .collect::<Result<Vec<_>, _>>()?;
                faces.push(EfaFace::from_edges(edges));
            }
            self.fragments.push(Fragment3D::from_faces(faces));
        }

        for cut in &snapshot.cuts {
            let [p, q] = cut.edge;
            let (Some(&a), Some(&b)) = (self.nodes.get(p), self.nodes.get(q)) else {
                return Err(EfaError::Restore {
                    elem: self.id,
                    reason: "local node index out of range",
                });
            };
            let node = arena.insert_embedded(cut.node);
            for (f, e) in self.face_edges(a, b) {
                self.faces[f]
                    .edge_mut(e)
                    .add_intersection(cut.position, node, a);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_hex(arena: &mut NodeArena) -> Element3D {
        let nodes = (0..8).map(|i| arena.permanent_or_insert(i)).collect();
        Element3D::new(0, ElemType::Hex8, nodes).unwrap()
    }

    #[test]
    fn edge_cuts_are_shared_by_adjacent_faces() {
        let mut arena = NodeArena::default();
        let mut elem = unit_hex(&mut arena);
        let node = elem.add_edge_cut(0, 0.5, None, &mut arena).unwrap();
        assert!(node.is_some());
        assert_eq!(elem.num_cuts(), 1);
        let cut_faces = (0..6).filter(|f| elem.face(*f).num_cuts() > 0).count();
        assert_eq!(cut_faces, 2);
    }

    #[test]
    fn mid_plane_splits_a_hexahedron() {
        let mut arena = NodeArena::default();
        let mut elem = unit_hex(&mut arena);
        // The four edges parallel to x.
        for edge in [0, 2, 8, 10] {
            let _ = elem.add_edge_cut(edge, 0.5, None, &mut arena).unwrap();
        }
        elem.update_fragments(&arena).unwrap();

        assert_eq!(elem.num_fragments(), 2);
        assert!(!elem.is_crack_tip_element());
        let total: usize = elem.fragments().iter().map(|f| f.num_faces()).sum();
        assert_eq!(total, 12);
    }

    #[test]
    fn partial_cut_is_a_crack_tip() {
        let mut arena = NodeArena::default();
        let mut elem = unit_hex(&mut arena);
        let _ = elem.add_edge_cut(0, 0.5, None, &mut arena).unwrap();
        let _ = elem.add_edge_cut(2, 0.5, None, &mut arena).unwrap();
        elem.update_fragments(&arena).unwrap();

        assert_eq!(elem.num_fragments(), 1);
        assert!(elem.is_crack_tip_element());
        // Both cut edges bound the bottom face; the side faces are crossed only once.
        assert_eq!(&elem.tip_face_ids()[..], &[0]);
        assert_eq!(elem.tip_embedded_nodes().len(), 2);
        assert!(!elem.is_final_cut());
    }

    #[test]
    fn half_of_a_split_hexahedron_takes_more_cuts() {
        let mut arena = NodeArena::default();
        let mut elem = unit_hex(&mut arena);
        for edge in [0, 2, 8, 10] {
            let _ = elem.add_edge_cut(edge, 0.5, None, &mut arena).unwrap();
        }
        elem.update_fragments(&arena).unwrap();
        assert!(!elem.is_final_cut());

        // Keep one half, like the child of the split element.
        elem.fragments.truncate(1);
        assert!(!elem.is_final_cut());
        assert!(!elem.is_crack_tip_element());

        let (inside, outside) = if elem.fragments[0].contains_node(elem.nodes[0]) {
            (0.25, 0.75)
        } else {
            (0.75, 0.25)
        };
        assert!(elem
            .add_edge_cut(0, outside, None, &mut arena)
            .unwrap()
            .is_none());
        let node = elem.add_edge_cut(0, inside, None, &mut arena).unwrap();
        assert!(node.is_some());
        assert_eq!(elem.num_cuts(), 5);
        assert_eq!(elem.fragments[0].num_cuts(), 1);
    }

    #[test]
    fn overlay_needs_a_face_in_the_same_direction() {
        let mut arena = NodeArena::default();
        let first = unit_hex(&mut arena);
        let key = |arena: &mut NodeArena, ids: [u32; 8]| -> Vec<NodeKey> {
            ids.iter().map(|i| arena.permanent_or_insert(*i)).collect()
        };

        // Shares the bottom face 0-3-2-1 in the same direction.
        let nodes = key(&mut arena, [0, 1, 2, 3, 8, 9, 10, 11]);
        let twin = Element3D::new(1, ElemType::Hex8, nodes).unwrap();
        assert!(first.overlays_element(&twin));

        // Shares the face 1-2-6-5 in the opposite direction.
        let nodes = key(&mut arena, [1, 12, 13, 2, 5, 14, 15, 6]);
        let beside = Element3D::new(2, ElemType::Hex8, nodes).unwrap();
        assert!(!first.overlays_element(&beside));
        assert!(!beside.overlays_element(&first));
    }

    #[test]
    fn snapshot_restores_face_cuts() {
        let mut arena = NodeArena::default();
        let mut elem = unit_hex(&mut arena);
        for edge in [0, 2, 8, 10] {
            let _ = elem.add_edge_cut(edge, 0.25, None, &mut arena).unwrap();
        }
        elem.update_fragments(&arena).unwrap();
        let snapshot = elem.snapshot(&arena).unwrap();
        assert_eq!(snapshot.cuts.len(), 4);

        let mut fresh = unit_hex(&mut arena);
        fresh.restore(&snapshot, &mut arena).unwrap();
        assert_eq!(fresh.num_fragments(), 2);
        assert_eq!(fresh.num_cuts(), 4);
    }
}
