use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use crate::efa::{
    planar, planar_mut, solid, solid_mut, EfaEdge, EfaElement, EfaError, EfaFace, EfaNode,
    Element2D, Element3D, ElementMap, Fragment, FragmentSnapshot, NodeArena, NodeCategory,
    NodeKey,
};
use crate::math::{Real, Vector2, TOLERANCE};
use crate::mesh::{ElemId, ElemType, NodeId};
use crate::utils::hashmap::HashMap;

/// The element-fragment algorithm: the fragment topology of a whole cut mesh.
///
/// A typical cutting step is:
///
/// 1. [`clear_ancestry`](Self::clear_ancestry) then
///    [`update_edge_neighbors`](Self::update_edge_neighbors) and
///    [`init_crack_tip_topology`](Self::init_crack_tip_topology);
/// 2. mark the cuts with the `add_elem_*_intersection` methods;
/// 3. [`update_physical_links_and_fragments`](Self::update_physical_links_and_fragments) to
///    split the fragments;
/// 4. [`update_topology`](Self::update_topology) to duplicate every split element into one
///    child per fragment and connect the children across the uncut edges.
///
/// The new permanent nodes, child and parent elements of the last update are then available
/// to rebuild the host mesh.
#[derive(Clone, Debug, Default)]
pub struct ElementFragmentAlgorithm {
    arena: NodeArena,
    elements: ElementMap,
    inverse: HashMap<NodeKey, BTreeSet<ElemId>>,
    crack_tip_elements: BTreeSet<ElemId>,
    new_nodes: Vec<NodeKey>,
    child_elements: Vec<ElemId>,
    parent_elements: Vec<ElemId>,
}

// The element type of a 2D element with `n` vertices.
fn planar_type(n: usize) -> Result<ElemType, EfaError> {
    match n {
        3 => Ok(ElemType::Tri3),
        4 => Ok(ElemType::Quad4),
        _ => Err(EfaError::InvalidNodeCount(n)),
    }
}

fn solid_type(n: usize) -> Result<ElemType, EfaError> {
    match n {
        4 => Ok(ElemType::Tet4),
        8 => Ok(ElemType::Hex8),
        _ => Err(EfaError::InvalidNodeCount(n)),
    }
}

// Unit normal and midpoint of the cut segment `points[k]..points[k + 1]`.
fn cut_line(points: &[[Real; 2]], k: usize) -> (Vector2<Real>, Vector2<Real>) {
    if points.len() < k + 2 {
        return (Vector2::zeros(), Vector2::zeros());
    }
    let a = Vector2::new(points[k][0], points[k][1]);
    let b = Vector2::new(points[k + 1][0], points[k + 1][1]);
    let dir = b - a;
    let normal = Vector2::new(dir.y, -dir.x)
        .try_normalize(Real::EPSILON)
        .unwrap_or_else(Vector2::zeros);
    (normal, (a + b) * 0.5)
}

// One child per fragment of a 2D element, or `None` if the element is its own child.
fn planar_children(
    parent: &Element2D,
    elements: &ElementMap,
    crack_tips: &BTreeSet<ElemId>,
    arena: &mut NodeArena,
    next_id: &mut ElemId,
) -> Result<Option<Vec<Element2D>>, EfaError> {
    if !parent.children.is_empty() {
        return Err(EfaError::FragmentSanity {
            elem: parent.id,
            reason: "an element cannot have children before the topology update",
        });
    }

    let num_frags = parent.fragments.len();
    let cut_node = parent
        .nodes
        .iter()
        .any(|n| arena.category(*n) == NodeCategory::EmbeddedPermanent);
    let dup_tip = parent.should_duplicate_for_crack_tip(crack_tips, elements)?;
    if num_frags <= 1 && !dup_tip && !cut_node {
        return Ok(None);
    }
    if num_frags > 3 {
        return Err(EfaError::FragmentCount {
            elem: parent.id,
            expected: "at most 3",
            found: num_frags,
        });
    }

    let local = parent.local_vertex_coords();
    let mut children = Vec::with_capacity(num_frags);
    for frag in &parent.fragments {
        let id = *next_id;
        *next_id += 1;

        let mut cut: SmallVec<[[Real; 2]; 4]> = SmallVec::new();
        for i in 0..frag.num_edges() {
            if frag.is_edge_interior(i, &parent.edges) {
                for node in frag.edge(i).nodes() {
                    cut.push(parent.local_coords(node)?);
                }
            }
        }
        let (normal, origin) = cut_line(&cut, 0);
        let (normal2, origin2) = if cut.len() == 4 {
            cut_line(&cut, 2)
        } else {
            (Vector2::zeros(), Vector2::zeros())
        };

        let mut nodes = Vec::with_capacity(parent.nodes.len());
        for (j, &node) in parent.nodes.iter().enumerate() {
            let p = Vector2::new(local[j][0], local[j][1]);
            let d1 = (p - origin).dot(&normal);
            let d2 = (p - origin2).dot(&normal2);
            let inherit = if num_frags == 1
                && arena.category(node) == NodeCategory::EmbeddedPermanent
            {
                false
            } else if num_frags == 1 && !dup_tip {
                true
            } else if d1.abs() < TOLERANCE && num_frags > 1 {
                // The cut runs through this vertex.
                false
            } else if d1 < TOLERANCE && d2 < TOLERANCE {
                true
            } else {
                normal.norm() < TOLERANCE && normal2.norm() < TOLERANCE && num_frags == 1
            };
            nodes.push(if inherit { node } else { arena.new_temp(node) });
        }

        let n = nodes.len();
        let edges = (0..n)
            .map(|j| {
                let mut edge = EfaEdge::new(nodes[j], nodes[(j + 1) % n]);
                edge.copy_intersection(&parent.edges[j]);
                edge
            })
            .collect();
        let mut child = Element2D::with_edges(id, parent.ty, nodes, edges);
        child.fragments.push(frag.clone());
        child.interior_nodes = parent.interior_nodes.clone();
        child.parent = Some(parent.id);
        child.remove_phantom_embedded_node();
        children.push(child);
    }

    Ok(Some(children))
}

// One child per fragment of a 3D element, or `None` if the element is its own child.
fn solid_children(
    parent: &Element3D,
    elements: &ElementMap,
    crack_tips: &BTreeSet<ElemId>,
    arena: &mut NodeArena,
    next_id: &mut ElemId,
) -> Result<Option<Vec<Element3D>>, EfaError> {
    if !parent.children.is_empty() {
        return Err(EfaError::FragmentSanity {
            elem: parent.id,
            reason: "an element cannot have children before the topology update",
        });
    }

    let num_frags = parent.fragments.len();
    if num_frags <= 1 && !parent.should_duplicate_for_crack_tip(crack_tips, elements)? {
        return Ok(None);
    }
    if num_frags > 2 {
        return Err(EfaError::FragmentCount {
            elem: parent.id,
            expected: "at most 2",
            found: num_frags,
        });
    }

    let mut children = Vec::with_capacity(num_frags);
    for frag in &parent.fragments {
        let id = *next_id;
        *next_id += 1;

        let swap: BTreeMap<NodeKey, NodeKey> = parent
            .nodes
            .iter()
            .map(|&n| {
                if frag.contains_node(n) {
                    (n, n)
                } else {
                    (n, arena.new_temp(n))
                }
            })
            .collect();
        let nodes = parent.nodes.iter().map(|n| swap[n]).collect();
        let faces = parent
            .faces
            .iter()
            .map(|f| {
                let mut face = EfaFace::new(&f.nodes().iter().map(|n| swap[n]).collect::<Vec<_>>());
                for e in 0..f.num_nodes() {
                    face.edge_mut(e).copy_intersection(f.edge(e));
                }
                face
            })
            .collect();

        let mut child = Element3D::with_faces(id, parent.ty, nodes, faces);
        child.fragments.push(frag.clone());
        child.parent = Some(parent.id);
        child.remove_phantom_embedded_node();
        children.push(child);
    }

    Ok(Some(children))
}

impl ElementFragmentAlgorithm {
    /// An empty fragment topology.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_elem_id(&self) -> ElemId {
        self.elements.keys().next_back().map_or(0, |id| id + 1)
    }

    fn element_mut(&mut self, id: ElemId) -> Result<&mut EfaElement, EfaError> {
        self.elements
            .get_mut(&id)
            .ok_or(EfaError::MissingElement(id))
    }

    fn insert_element(&mut self, elem: EfaElement) -> Result<(), EfaError> {
        let id = elem.id();
        if self.elements.contains_key(&id) {
            return Err(EfaError::DuplicateElement(id));
        }
        for &node in elem.nodes() {
            let _ = self.inverse.entry(node).or_default().insert(id);
        }
        let _ = self.elements.insert(id, elem);
        Ok(())
    }

    /*
     * Building.
     */
    /// Adds one 2D element per connectivity row, with consecutive ids after the largest one.
    ///
    /// Returns the id of the first added element.
    pub fn add_2d_elements(&mut self, connectivity: &[Vec<NodeId>]) -> Result<ElemId, EfaError> {
        let first = self.next_elem_id();
        if connectivity.is_empty() {
            return Err(EfaError::InvalidNodeCount(0));
        }
        for nodes in connectivity {
            let id = self.next_elem_id();
            self.add_2d_element(nodes, id)?;
        }
        Ok(first)
    }

    /// Adds the `Tri3` (3 nodes) or `Quad4` (4 nodes) element `id`.
    pub fn add_2d_element(&mut self, nodes: &[NodeId], id: ElemId) -> Result<(), EfaError> {
        if self.elements.contains_key(&id) {
            return Err(EfaError::DuplicateElement(id));
        }
        let ty = planar_type(nodes.len())?;
        let keys = nodes
            .iter()
            .map(|n| self.arena.permanent_or_insert(*n))
            .collect();
        let elem = Element2D::new(id, ty, keys)?;
        self.insert_element(EfaElement::Planar(elem))
    }

    /// Adds the `Tet4` (4 nodes) or `Hex8` (8 nodes) element `id`.
    pub fn add_3d_element(&mut self, nodes: &[NodeId], id: ElemId) -> Result<(), EfaError> {
        if self.elements.contains_key(&id) {
            return Err(EfaError::DuplicateElement(id));
        }
        let ty = solid_type(nodes.len())?;
        let keys = nodes
            .iter()
            .map(|n| self.arena.permanent_or_insert(*n))
            .collect();
        let elem = Element3D::new(id, ty, keys)?;
        self.insert_element(EfaElement::Solid(elem))
    }

    /*
     * Neighbours.
     */
    /// Recomputes the general and edge (or face) neighbours of every element.
    pub fn update_edge_neighbors(&mut self) -> Result<(), EfaError> {
        for elem in self.elements.values_mut() {
            elem.clear_neighbors();
        }

        let mut computed = Vec::with_capacity(self.elements.len());
        for (id, elem) in &self.elements {
            let neighbors = match elem {
                EfaElement::Planar(e) => e.compute_neighbors(&self.elements, &self.inverse)?,
                EfaElement::Solid(e) => e.compute_neighbors(&self.elements, &self.inverse)?,
            };
            computed.push((*id, neighbors));
        }

        for (id, (sides, general)) in computed {
            match self.element_mut(id)? {
                EfaElement::Planar(e) => {
                    e.edge_neighbors = sides;
                    e.general_neighbors = general;
                }
                EfaElement::Solid(e) => {
                    e.face_neighbors = sides;
                    e.general_neighbors = general;
                }
            }
        }

        for elem in self.elements.values() {
            match elem {
                EfaElement::Planar(e) => e.neighbor_sanity_check(&self.elements)?,
                EfaElement::Solid(e) => e.neighbor_sanity_check(&self.elements)?,
            }
        }
        Ok(())
    }

    /// Collects the crack-tip elements and flags the neighbours a crack tip may extend into.
    pub fn init_crack_tip_topology(&mut self) -> Result<(), EfaError> {
        self.crack_tip_elements.clear();

        let ids: Vec<ElemId> = self.elements.keys().copied().collect();
        for id in ids {
            let mut split_neighbors: SmallVec<[ElemId; 4]> = SmallVec::new();
            match &self.elements[&id] {
                EfaElement::Planar(e) if e.is_crack_tip_element() => {
                    let _ = self.crack_tip_elements.insert(id);
                    for i in 0..e.num_edges() {
                        if e.num_edge_neighbors(i) != 2 || !e.edge(i).has_intersection() {
                            continue;
                        }
                        for &other in e.edge_neighbors(i) {
                            if planar(&self.elements, other)?.overlays_element(e)? {
                                return Err(EfaError::InconsistentNeighbors(id, other));
                            }
                        }
                        if e.crack_tip_split {
                            return Err(EfaError::FragmentSanity {
                                elem: id,
                                reason: "a crack-tip element cannot be split by another crack tip",
                            });
                        }
                        split_neighbors.extend(e.edge_neighbors(i).iter().copied());
                    }
                }
                EfaElement::Solid(e) if e.is_crack_tip_element() => {
                    let _ = self.crack_tip_elements.insert(id);
                    for i in 0..e.num_faces() {
                        if e.face_neighbors(i).len() != 2 || e.face(i).num_cut_edges() == 0 {
                            continue;
                        }
                        for &other in e.face_neighbors(i) {
                            if solid(&self.elements, other)?.overlays_element(e) {
                                return Err(EfaError::InconsistentNeighbors(id, other));
                            }
                        }
                        if e.crack_tip_split {
                            return Err(EfaError::FragmentSanity {
                                elem: id,
                                reason: "a crack-tip element cannot be split by another crack tip",
                            });
                        }
                        split_neighbors.extend(e.face_neighbors(i).iter().copied());
                    }
                }
                _ => {}
            }

            for other in split_neighbors {
                match self.element_mut(other)? {
                    EfaElement::Planar(neighbor) => {
                        let side = neighbor.neighbor_index(id)?;
                        neighbor.crack_tip_split = true;
                        neighbor.add_crack_tip_neighbor(side);
                    }
                    EfaElement::Solid(neighbor) => {
                        let side = neighbor.neighbor_index(id)?;
                        neighbor.crack_tip_split = true;
                        neighbor.add_crack_tip_neighbor(side);
                    }
                }
            }
        }
        Ok(())
    }

    /*
     * Cut marking.
     */
    /// Cuts edge `edge` of the 2D element `elem` at `position` from its first node, and the
    /// matching edge of every edge neighbour.
    pub fn add_elem_edge_intersection(
        &mut self,
        elem: ElemId,
        edge: usize,
        position: Real,
    ) -> Result<(), EfaError> {
        let neighbors = {
            let e = planar(&self.elements, elem)?;
            if edge >= e.num_edges() {
                return Err(EfaError::InvalidCut {
                    elem,
                    edge,
                    reason: "no such edge",
                });
            }
            e.edge_neighbors[edge].clone()
        };

        let node = planar_mut(&mut self.elements, elem)?.add_edge_cut(
            edge,
            position,
            None,
            &mut self.arena,
        )?;

        for other in neighbors {
            let neighbor = planar_mut(&mut self.elements, other)?;
            // Edge neighbours run the shared edge in the opposite direction.
            let other_edge = neighbor.neighbor_index(elem)?;
            let _ = neighbor.add_edge_cut(other_edge, 1.0 - position, node, &mut self.arena)?;
        }
        Ok(())
    }

    /// Makes the vertex `local_node` of the uncut 2D element `elem` a cut point.
    pub fn add_elem_node_intersection(
        &mut self,
        elem: ElemId,
        local_node: usize,
    ) -> Result<(), EfaError> {
        let e = planar_mut(&mut self.elements, elem)?;
        if local_node >= e.num_nodes() {
            return Err(EfaError::MissingNode {
                elem,
                reason: "no such vertex",
            });
        }
        if e.num_fragments() == 0 {
            e.add_node_cut(local_node, &mut self.arena);
        }
        Ok(())
    }

    /// Cuts edge `frag_edge` of the fragment of the 2D element `elem` at `position`.
    ///
    /// Returns `false` if the edge was already cut there.
    pub fn add_frag_edge_intersection(
        &mut self,
        elem: ElemId,
        frag_edge: usize,
        position: Real,
    ) -> Result<bool, EfaError> {
        planar_mut(&mut self.elements, elem)?.add_fragment_edge_cut(
            frag_edge,
            position,
            &mut self.arena,
        )
    }

    /// Cuts two edges of face `face` of the 3D element `elem`.
    ///
    /// `face_edges` are edge indices within the face, and `positions` are measured from the
    /// first node of each face edge. Each cut is shared with the neighbours containing the
    /// same edge.
    pub fn add_elem_face_intersection(
        &mut self,
        elem: ElemId,
        face: usize,
        face_edges: [usize; 2],
        positions: [Real; 2],
    ) -> Result<(), EfaError> {
        for (&face_edge, &position) in face_edges.iter().zip(positions.iter()) {
            let [a, b] = {
                let e = solid(&self.elements, elem)?;
                if face >= e.num_faces() || face_edge >= e.face(face).num_nodes() {
                    return Err(EfaError::InvalidCut {
                        elem,
                        edge: face_edge,
                        reason: "no such face edge",
                    });
                }
                e.face(face).edge(face_edge).nodes()
            };
            self.add_solid_edge_cut(elem, a, b, position)?;
        }
        Ok(())
    }

    // Cuts the edge `a`-`b` of `elem` at `position` from `a`, then its general neighbours.
    fn add_solid_edge_cut(
        &mut self,
        elem: ElemId,
        a: NodeKey,
        b: NodeKey,
        position: Real,
    ) -> Result<(), EfaError> {
        let e = solid_mut(&mut self.elements, elem)?;
        let (edge, forward) = e.find_edge(a, b).ok_or(EfaError::MissingNode {
            elem,
            reason: "a face edge is not an element edge",
        })?;
        let x = if forward { position } else { 1.0 - position };
        let node = e.add_edge_cut(edge, x, None, &mut self.arena)?;
        let neighbors = e.general_neighbors.clone();

        for other in neighbors {
            let Some(EfaElement::Solid(neighbor)) = self.elements.get_mut(&other) else {
                continue;
            };
            if let Some((edge, forward)) = neighbor.find_edge(a, b) {
                let x = if forward { position } else { 1.0 - position };
                let _ = neighbor.add_edge_cut(edge, x, node, &mut self.arena)?;
            }
        }
        Ok(())
    }

    /*
     * Topology update.
     */
    /// Splits the fragments of every element along the cuts marked since the last update.
    pub fn update_physical_links_and_fragments(&mut self) -> Result<(), EfaError> {
        for (id, elem) in self.elements.iter_mut() {
            match elem {
                EfaElement::Planar(e) => {
                    e.update_fragments(self.crack_tip_elements.contains(id), &mut self.arena)?
                }
                EfaElement::Solid(e) => e.update_fragments(&self.arena)?,
            }
        }
        Ok(())
    }

    /// Duplicates every split element into one child per fragment and connects the children.
    ///
    /// With `merge_phantom_edges`, children also share the phantom nodes of uncut edges that
    /// come from the same parent node.
    pub fn update_topology(&mut self, merge_phantom_edges: bool) -> Result<(), EfaError> {
        self.new_nodes.clear();
        self.child_elements.clear();
        self.parent_elements.clear();

        let first_new = self.arena.next_permanent_id();
        self.create_child_elements()?;
        self.connect_fragments(merge_phantom_edges)?;
        self.sanity_check()?;
        self.update_crack_tip_elements();

        self.new_nodes = self
            .arena
            .permanent
            .range(first_new..)
            .map(|(_, key)| *key)
            .collect();
        self.clear_potential_isolated_nodes()?;

        log::debug!(
            "EFA topology update: {} parents, {} children, {} new nodes",
            self.parent_elements.len(),
            self.child_elements.len(),
            self.new_nodes.len()
        );
        Ok(())
    }

    fn create_child_elements(&mut self) -> Result<(), EfaError> {
        let mut next_id = self.next_elem_id();
        let mut new_children = Vec::new();
        let ids: Vec<ElemId> = self.elements.keys().copied().collect();

        for id in ids {
            let children: Option<Vec<EfaElement>> = match &self.elements[&id] {
                EfaElement::Planar(e) => planar_children(
                    e,
                    &self.elements,
                    &self.crack_tip_elements,
                    &mut self.arena,
                    &mut next_id,
                )?
                .map(|cs| cs.into_iter().map(EfaElement::Planar).collect()),
                EfaElement::Solid(e) => solid_children(
                    e,
                    &self.elements,
                    &self.crack_tip_elements,
                    &mut self.arena,
                    &mut next_id,
                )?
                .map(|cs| cs.into_iter().map(EfaElement::Solid).collect()),
            };

            let parent = self
                .elements
                .get_mut(&id)
                .ok_or(EfaError::MissingElement(id))?;
            match children {
                None => parent.push_child(id),
                Some(children) => {
                    for child in &children {
                        parent.push_child(child.id());
                        self.child_elements.push(child.id());
                    }
                    self.parent_elements.push(id);
                    new_children.extend(children);
                }
            }
        }

        for child in new_children {
            let _ = self.elements.insert(child.id(), child);
        }
        Ok(())
    }

    fn connect_fragments(&mut self, merge_phantom_edges: bool) -> Result<(), EfaError> {
        for child in self.child_elements.clone() {
            match self.elements.get(&child).map(EfaElement::dim) {
                Some(2) => self.connect_planar_neighbors(child, merge_phantom_edges)?,
                Some(_) => self.connect_solid_neighbors(child, merge_phantom_edges)?,
                None => return Err(EfaError::MissingElement(child)),
            }
            if let Some(elem) = self.elements.get_mut(&child) {
                elem.update_fragment_node(&self.arena);
            }
        }
        Ok(())
    }

    fn connect_planar_neighbors(
        &mut self,
        child: ElemId,
        merge_phantom_edges: bool,
    ) -> Result<(), EfaError> {
        let parent = planar(&self.elements, child)?
            .parent
            .ok_or(EfaError::NodeMerge {
                elem: child,
                reason: "a child element has no parent",
            })?;

        let num_edges = planar(&self.elements, parent)?.num_edges();
        for j in 0..num_edges {
            let neighbors = planar(&self.elements, parent)?.edge_neighbors[j].clone();
            for neighbor in neighbors {
                let (other_edge, other_children) = {
                    let n = planar(&self.elements, neighbor)?;
                    (n.neighbor_index(parent)?, n.children.clone())
                };
                let cut = planar(&self.elements, child)?.edge(j).has_intersection();

                for other_child in other_children {
                    let (mine, theirs, connected) = {
                        let c = planar(&self.elements, child)?;
                        let o = planar(&self.elements, other_child)?;
                        let connected = match (c.fragments.first(), o.fragments.first()) {
                            (Some(a), Some(b)) => a.is_connected(b),
                            _ => false,
                        };
                        (c.edge(j).clone(), o.edge(other_edge).clone(), connected)
                    };

                    if cut {
                        if mine.equivalent(&theirs) || !connected {
                            continue;
                        }
                        for i in 0..2 {
                            self.merge_nodes(child, other_child, mine.node(i), theirs.node(1 - i))?;
                        }
                    } else if merge_phantom_edges && !theirs.has_intersection() {
                        for i in 0..2 {
                            let (a, b) = (mine.node(i), theirs.node(1 - i));
                            let pa = self.arena.parent(a);
                            if pa.is_some() && pa == self.arena.parent(b) {
                                self.merge_nodes(child, other_child, a, b)?;
                            }
                        }
                    }
                }
            }
        }

        let lone_parent = planar(&self.elements, parent)?.num_fragments() == 1;
        self.resolve_temp_nodes(child, lone_parent)
    }

    fn connect_solid_neighbors(
        &mut self,
        child: ElemId,
        merge_phantom_faces: bool,
    ) -> Result<(), EfaError> {
        let parent = solid(&self.elements, child)?
            .parent
            .ok_or(EfaError::NodeMerge {
                elem: child,
                reason: "a child element has no parent",
            })?;

        let num_faces = solid(&self.elements, parent)?.num_faces();
        for j in 0..num_faces {
            let (neighbors, parent_face) = {
                let p = solid(&self.elements, parent)?;
                (p.face_neighbors[j].clone(), p.face(j).nodes())
            };
            for neighbor in neighbors {
                let (other_face, other_children, mapping) = {
                    let n = solid(&self.elements, neighbor)?;
                    let other_face = n.neighbor_index(parent)?;
                    let face = n.face(other_face).nodes();
                    let mapping = parent_face
                        .iter()
                        .map(|p| face.iter().position(|q| q == p))
                        .collect::<Option<SmallVec<[usize; 4]>>>()
                        .ok_or(EfaError::InconsistentNeighbors(parent, neighbor))?;
                    (other_face, n.children.clone(), mapping)
                };
                let cut = solid(&self.elements, child)?.face(j).num_cut_edges() > 0;

                for other_child in other_children {
                    let (mine, theirs, connected) = {
                        let c = solid(&self.elements, child)?;
                        let o = solid(&self.elements, other_child)?;
                        let connected = match (c.fragments.first(), o.fragments.first()) {
                            (Some(a), Some(b)) => a.is_connected(b),
                            _ => false,
                        };
                        (c.face(j).clone(), o.face(other_face).clone(), connected)
                    };
                    if mine.equivalent(&theirs) {
                        continue;
                    }

                    if cut {
                        if !connected {
                            continue;
                        }
                        for (i, &m) in mapping.iter().enumerate() {
                            self.merge_nodes(child, other_child, mine.node(i), theirs.node(m))?;
                        }
                    } else if merge_phantom_faces && theirs.num_cut_edges() == 0 {
                        for (i, &m) in mapping.iter().enumerate() {
                            let (a, b) = (mine.node(i), theirs.node(m));
                            let pa = self.arena.parent(a);
                            if pa.is_some() && pa == self.arena.parent(b) {
                                self.merge_nodes(child, other_child, a, b)?;
                            }
                        }
                    }
                }
            }
        }

        let lone_parent = solid(&self.elements, parent)?.num_fragments() == 1;
        self.resolve_temp_nodes(child, lone_parent)
    }

    // Turns the temporary vertices left in `child` into permanent nodes.
    fn resolve_temp_nodes(&mut self, child: ElemId, lone_parent: bool) -> Result<(), EfaError> {
        let nodes = self
            .elements
            .get(&child)
            .ok_or(EfaError::MissingElement(child))?
            .nodes()
            .to_vec();

        for node in nodes {
            if self.arena.category(node) != NodeCategory::Temp {
                continue;
            }
            let parent_node = self.arena.parent(node).ok_or(EfaError::NodeMerge {
                elem: child,
                reason: "a temporary node has no parent",
            })?;
            let patch = self.inverse.get(&parent_node).map_or(0, BTreeSet::len);

            // A lone temporary node goes back to its parent, which would otherwise be orphaned.
            let replacement = if lone_parent && patch == 1 {
                parent_node
            } else {
                self.arena.new_permanent(Some(parent_node))
            };
            self.element_mut(child)?.switch_node(replacement, node);
            if !self.arena.remove(node) {
                return Err(EfaError::NodeMerge {
                    elem: child,
                    reason: "a temporary node is missing from the node index",
                });
            }
        }
        Ok(())
    }

    // Merges the vertex `a` of `child` with the vertex `b` of `other`, a child of a neighbour.
    fn merge_nodes(
        &mut self,
        child: ElemId,
        other: ElemId,
        a: NodeKey,
        b: NodeKey,
    ) -> Result<(), EfaError> {
        if a == b {
            return Ok(());
        }

        let permanent = |k| self.arena.category(k) == NodeCategory::Permanent;
        let (pa, pb) = (self.arena.parent(a), self.arena.parent(b));
        match (permanent(a), permanent(b)) {
            (true, true) => {
                if pb == Some(a) || (pa.is_some() && pa == pb) {
                    self.switch_node_descend(other, a, b)?;
                    let _ = self.arena.remove(b);
                } else if pa == Some(b) {
                    self.switch_node_descend(child, b, a)?;
                    let _ = self.arena.remove(a);
                } else {
                    return Err(EfaError::NodeMerge {
                        elem: child,
                        reason: "two unrelated permanent nodes cannot be merged",
                    });
                }
            }
            (true, false) => {
                if pb != Some(a) && pb != pa {
                    return Err(EfaError::NodeMerge {
                        elem: child,
                        reason: "the temporary node does not descend from the permanent one",
                    });
                }
                self.element_mut(other)?.switch_node(a, b);
                let _ = self.arena.remove(b);
            }
            (false, true) => {
                if pa != Some(b) && pa != pb {
                    return Err(EfaError::NodeMerge {
                        elem: child,
                        reason: "the temporary node does not descend from the permanent one",
                    });
                }
                self.element_mut(child)?.switch_node(b, a);
                let _ = self.arena.remove(a);
            }
            (false, false) => {
                let parent = match (pa, pb) {
                    (Some(pa), Some(pb)) if pa == pb => pa,
                    _ => {
                        return Err(EfaError::NodeMerge {
                            elem: child,
                            reason: "temporary nodes with different parents cannot be merged",
                        })
                    }
                };
                let node = self.arena.new_permanent(Some(parent));
                self.element_mut(other)?.switch_node(node, b);
                self.element_mut(child)?.switch_node(node, a);
                let _ = self.arena.remove(a);
                let _ = self.arena.remove(b);
            }
        }
        Ok(())
    }

    // Switches `old` to `new` in `elem`, its parent, and the children of the parent's
    // general neighbours.
    fn switch_node_descend(
        &mut self,
        elem: ElemId,
        new: NodeKey,
        old: NodeKey,
    ) -> Result<(), EfaError> {
        let e = self.element_mut(elem)?;
        e.switch_node(new, old);
        let Some(parent) = e.parent() else {
            return Ok(());
        };

        let p = self.element_mut(parent)?;
        p.switch_node(new, old);
        for neighbor in p.general_neighbors().to_vec() {
            let children = self
                .elements
                .get(&neighbor)
                .ok_or(EfaError::MissingElement(neighbor))?
                .children()
                .to_vec();
            for c in children {
                self.element_mut(c)?.switch_node(new, old);
            }
        }
        Ok(())
    }

    fn sanity_check(&self) -> Result<(), EfaError> {
        if !self.arena.temp.is_empty() {
            return Err(EfaError::LeftoverTempNodes(self.arena.temp.len()));
        }
        Ok(())
    }

    fn update_crack_tip_elements(&mut self) {
        for p in &self.parent_elements {
            let _ = self.crack_tip_elements.remove(p);
        }
        for c in &self.child_elements {
            if self
                .elements
                .get(c)
                .is_some_and(EfaElement::is_crack_tip_element)
            {
                let _ = self.crack_tip_elements.insert(*c);
            }
        }
    }

    // A new node whose parent no child uses replaces its parent back in the children.
    fn clear_potential_isolated_nodes(&mut self) -> Result<(), EfaError> {
        let mut isolated: BTreeMap<NodeKey, Vec<NodeKey>> = BTreeMap::new();
        for &node in &self.new_nodes {
            let parent = self
                .arena
                .parent(node)
                .ok_or(EfaError::OrphanNode(self.arena.id(node)))?;
            let used = self.child_elements.iter().any(|c| {
                self.elements
                    .get(c)
                    .is_some_and(|e| e.contains_node(parent))
            });
            if !used {
                isolated.entry(parent).or_default().push(node);
            }
        }

        for (parent, nodes) in isolated {
            let node = nodes[0];
            for c in self.child_elements.clone() {
                if self.elements.get(&c).is_some_and(|e| e.contains_node(node)) {
                    self.switch_node_descend(c, parent, node)?;
                }
            }
            self.new_nodes.retain(|n| *n != node);
            let _ = self.arena.remove(node);
        }
        Ok(())
    }

    /*
     * Lifecycle.
     */
    /// Deletes the parents of the last update, makes every child a plain element, and
    /// rebuilds the node-to-element map.
    pub fn clear_ancestry(&mut self) -> Result<(), EfaError> {
        self.inverse.clear();
        for p in std::mem::take(&mut self.parent_elements) {
            if self.elements.remove(&p).is_none() {
                return Err(EfaError::MissingElement(p));
            }
        }

        for (id, elem) in self.elements.iter_mut() {
            elem.clear_parent_and_children();
            for &node in elem.nodes() {
                let _ = self.inverse.entry(node).or_default().insert(*id);
            }
        }

        self.arena.clear_parents();
        self.arena.clear_temp();
        self.new_nodes.clear();
        self.child_elements.clear();
        Ok(())
    }

    /// Deletes every element and every node but the embedded ones.
    ///
    /// Embedded nodes survive so that fragment snapshots taken before the reset can be
    /// restored into the rebuilt elements.
    pub fn reset(&mut self) {
        self.new_nodes.clear();
        self.child_elements.clear();
        self.parent_elements.clear();
        self.crack_tip_elements.clear();
        self.inverse.clear();
        self.elements.clear();
        self.arena.clear_all_but_embedded();
    }

    /// Captures the fragments and cuts of `elem`.
    pub fn snapshot_fragment_info(&self, elem: ElemId) -> Result<FragmentSnapshot, EfaError> {
        self.elements
            .get(&elem)
            .ok_or(EfaError::MissingElement(elem))?
            .snapshot(&self.arena)
    }

    /// Restores a snapshot into the freshly added element `elem`.
    pub fn restore_fragment_info(
        &mut self,
        elem: ElemId,
        snapshot: &FragmentSnapshot,
    ) -> Result<(), EfaError> {
        self.elements
            .get_mut(&elem)
            .ok_or(EfaError::MissingElement(elem))?
            .restore(snapshot, &mut self.arena)
    }

    /*
     * Queries.
     */
    /// The element `id`.
    pub fn element(&self, id: ElemId) -> Result<&EfaElement, EfaError> {
        self.elements.get(&id).ok_or(EfaError::MissingElement(id))
    }

    /// Every element, by id.
    pub fn elements(&self) -> &ElementMap {
        &self.elements
    }

    /// The node behind `key`.
    pub fn node(&self, key: NodeKey) -> &EfaNode {
        self.arena.get(key)
    }

    /// The ids of the vertices of `elem`, in local order.
    pub fn element_node_ids(&self, elem: ElemId) -> Result<Vec<NodeId>, EfaError> {
        Ok(self
            .element(elem)?
            .nodes()
            .iter()
            .map(|n| self.arena.id(*n))
            .collect())
    }

    /// The id of the element whose vertex ids are `nodes`, in local order.
    pub fn elem_id_by_nodes(&self, nodes: &[NodeId]) -> Option<ElemId> {
        self.elements
            .values()
            .find(|e| {
                e.nodes().len() == nodes.len()
                    && e
                        .nodes()
                        .iter()
                        .zip(nodes)
                        .all(|(k, id)| self.arena.id(*k) == *id)
            })
            .map(EfaElement::id)
    }

    /// The vertex ids `node` interpolates in `elem`, with their weights.
    pub fn master_node_ids(
        &self,
        elem: ElemId,
        node: NodeKey,
    ) -> Result<SmallVec<[(NodeId, Real); 4]>, EfaError> {
        Ok(self
            .element(elem)?
            .master_info(node)?
            .into_iter()
            .map(|(k, w)| (self.arena.id(k), w))
            .collect())
    }

    /// The ids of the permanent nodes.
    pub fn permanent_node_ids(&self) -> Vec<NodeId> {
        self.arena.permanent.keys().copied().collect()
    }

    /// The ids of the temporary nodes. Empty outside of a topology update.
    pub fn temp_node_ids(&self) -> Vec<NodeId> {
        self.arena.temp.keys().copied().collect()
    }

    /// The ids of the embedded nodes.
    pub fn embedded_node_ids(&self) -> Vec<NodeId> {
        self.arena.embedded.keys().copied().collect()
    }

    /// The ids of the mesh nodes that are also cut points.
    pub fn embedded_permanent_node_ids(&self) -> Vec<NodeId> {
        self.arena.embedded_permanent.keys().copied().collect()
    }

    /// The permanent nodes created by the last topology update, with the id of the node each
    /// one was split from.
    pub fn new_node_ids(&self) -> Vec<(NodeId, Option<NodeId>)> {
        self.new_nodes
            .iter()
            .map(|n| (self.arena.id(*n), self.arena.parent(*n).map(|p| self.arena.id(p))))
            .collect()
    }

    /// The children created by the last topology update.
    pub fn child_element_ids(&self) -> &[ElemId] {
        &self.child_elements
    }

    /// The elements split by the last topology update.
    pub fn parent_element_ids(&self) -> &[ElemId] {
        &self.parent_elements
    }

    /// The elements holding a crack tip.
    pub fn crack_tip_element_ids(&self) -> &BTreeSet<ElemId> {
        &self.crack_tip_elements
    }

    /// The split neighbour whose cut ends at the crack tip of the 2D element `elem`.
    ///
    /// Returns `None` if `elem` holds no crack tip.
    pub fn crack_tip_split_element_id(&self, elem: ElemId) -> Result<Option<ElemId>, EfaError> {
        let e = planar(&self.elements, elem)?;
        if !e.is_crack_tip_element() {
            return Ok(None);
        }

        for i in 0..e.num_edges() {
            if e.num_edge_neighbors(i) != 2 || !e.edge(i).has_intersection() {
                continue;
            }
            let first = e.edge_neighbors(i)[0];
            if planar(&self.elements, first)?.is_crack_tip_split() {
                return Ok(Some(first));
            }
        }
        Err(EfaError::FragmentSanity {
            elem,
            reason: "a crack-tip element has no split neighbour",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_quads() -> ElementFragmentAlgorithm {
        let mut efa = ElementFragmentAlgorithm::new();
        let first = efa
            .add_2d_elements(&[vec![0, 3, 4, 1], vec![1, 4, 5, 2]])
            .unwrap();
        assert_eq!(first, 0);
        efa.update_edge_neighbors().unwrap();
        efa
    }

    #[test]
    fn neighbours_share_an_edge() {
        let efa = two_quads();
        let e0 = efa.element(0).unwrap().as_planar().unwrap();
        let e1 = efa.element(1).unwrap().as_planar().unwrap();
        assert_eq!(e0.edge_neighbors(2), &[1]);
        assert_eq!(e1.edge_neighbors(0), &[0]);
        assert_eq!(e0.general_neighbors(), &[1]);
    }

    #[test]
    fn edge_cuts_propagate_to_neighbours() {
        let mut efa = two_quads();
        efa.add_elem_edge_intersection(0, 2, 0.25).unwrap();
        let e1 = efa.element(1).unwrap().as_planar().unwrap();
        let edge = e1.edge(0);
        assert!(edge.has_intersection());
        assert_relative_eq!(edge.intersection(0, edge.node(0)), 0.75);
        assert_eq!(efa.embedded_node_ids(), vec![0]);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut efa = two_quads();
        assert_eq!(
            efa.add_2d_element(&[6, 7, 8, 9], 1),
            Err(EfaError::DuplicateElement(1))
        );
        assert_eq!(
            efa.add_2d_element(&[6, 7], 5),
            Err(EfaError::InvalidNodeCount(2))
        );
    }

    #[test]
    fn full_cut_splits_an_element() {
        let mut efa = ElementFragmentAlgorithm::new();
        let _ = efa.add_2d_elements(&[vec![0, 1, 2, 3]]).unwrap();
        efa.update_edge_neighbors().unwrap();
        efa.add_elem_edge_intersection(0, 0, 0.5).unwrap();
        efa.add_elem_edge_intersection(0, 2, 0.5).unwrap();
        efa.update_physical_links_and_fragments().unwrap();
        efa.update_topology(true).unwrap();

        assert_eq!(efa.parent_element_ids(), &[0]);
        assert_eq!(efa.child_element_ids(), &[1, 2]);
        assert_eq!(efa.permanent_node_ids(), (0..8).collect::<Vec<_>>());
        assert!(efa.temp_node_ids().is_empty());
        assert_eq!(efa.new_node_ids().len(), 4);

        efa.clear_ancestry().unwrap();
        assert!(efa.element(0).is_err());
        assert_eq!(efa.elements().len(), 2);
    }

    #[test]
    fn elements_are_found_by_their_nodes() {
        let efa = two_quads();
        assert_eq!(efa.elem_id_by_nodes(&[1, 4, 5, 2]), Some(1));
        assert_eq!(efa.elem_id_by_nodes(&[1, 2, 5, 4]), None);
        assert_eq!(efa.element_node_ids(0).unwrap(), vec![0, 3, 4, 1]);
    }

    #[test]
    fn snapshots_survive_a_reset() {
        let mut efa = ElementFragmentAlgorithm::new();
        let _ = efa.add_2d_elements(&[vec![0, 1, 2, 3]]).unwrap();
        efa.update_edge_neighbors().unwrap();
        efa.add_elem_edge_intersection(0, 0, 0.5).unwrap();
        efa.update_physical_links_and_fragments().unwrap();
        let snapshot = efa.snapshot_fragment_info(0).unwrap();

        efa.reset();
        assert!(efa.elements().is_empty());
        assert_eq!(efa.embedded_node_ids(), vec![0]);

        efa.add_2d_element(&[0, 1, 2, 3], 0).unwrap();
        efa.restore_fragment_info(0, &snapshot).unwrap();
        assert_eq!(efa.snapshot_fragment_info(0).unwrap(), snapshot);
    }

    #[test]
    fn hex_mid_plane_cut_splits_into_two_children() {
        let mut efa = ElementFragmentAlgorithm::new();
        efa.add_3d_element(&[0, 1, 2, 3, 4, 5, 6, 7], 0).unwrap();
        efa.update_edge_neighbors().unwrap();
        // Side 1 is 0-1-5-4 and side 3 is 2-3-7-6.
        efa.add_elem_face_intersection(0, 1, [0, 2], [0.5, 0.5])
            .unwrap();
        efa.add_elem_face_intersection(0, 3, [0, 2], [0.5, 0.5])
            .unwrap();
        efa.update_physical_links_and_fragments().unwrap();
        assert_eq!(efa.element(0).unwrap().num_fragments(), 2);

        efa.update_topology(true).unwrap();
        assert_eq!(efa.child_element_ids().len(), 2);
        assert_eq!(efa.permanent_node_ids().len(), 16);
        assert!(efa.temp_node_ids().is_empty());
    }
}
