use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::math::{Point, Real};
use crate::mesh::ElemType;
use crate::utils::hashmap::HashMap;

/// Identifier of a mesh node.
pub type NodeId = u32;
/// Identifier of a mesh element.
pub type ElemId = u32;
/// Identifier of a boundary (side set).
pub type BoundaryId = u16;
/// Identifier of an element block.
pub type SubdomainId = u16;

/// Errors raised by mesh queries and mesh modifications.
#[derive(thiserror::Error, Copy, Clone, Debug, PartialEq, Eq)]
pub enum MeshError {
    /// The node does not exist.
    #[error("unknown node {0}")]
    UnknownNode(NodeId),
    /// The element does not exist.
    #[error("unknown element {0}")]
    UnknownElem(ElemId),
    /// An element was given the wrong number of nodes for its type.
    #[error("element of type {ty:?} needs {expected} nodes but {found} were given")]
    WrongNodeCount {
        /// The element type.
        ty: ElemType,
        /// The number of nodes this type needs.
        expected: usize,
        /// The number of nodes that were given.
        found: usize,
    },
    /// The side index is out of range for the element.
    #[error("element {elem} has no side {side}")]
    InvalidSide {
        /// The element.
        elem: ElemId,
        /// The requested side.
        side: usize,
    },
    /// An id is already in use.
    #[error("id {0} is already in use")]
    DuplicateId(u32),
}

/// A mesh element: a type and its node ids.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Elem {
    /// The element id.
    pub id: ElemId,
    /// The element type.
    pub ty: ElemType,
    /// The element nodes, ordered as the reference vertices of `ty`.
    pub nodes: SmallVec<[NodeId; 8]>,
    /// The element block.
    pub subdomain: SubdomainId,
}

impl Elem {
    /// The local index of `node` in this element.
    pub fn node_index(&self, node: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| *n == node)
    }

    /// The topological dimension of this element.
    pub fn dim(&self) -> usize {
        self.ty.dim()
    }
}

/// A side of an element, extracted with its node coordinates.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Side {
    /// The element owning this side.
    pub elem: ElemId,
    /// The side index within the element.
    pub side: usize,
    /// The type of the side.
    pub ty: ElemType,
    /// The side nodes.
    pub nodes: SmallVec<[NodeId; 4]>,
    /// The coordinates of the side nodes.
    pub points: SmallVec<[Point<Real>; 4]>,
}

impl Side {
    /// The topological dimension of this side.
    pub fn dim(&self) -> usize {
        self.ty.dim()
    }

    /// The local index of `node` in this side.
    pub fn node_index(&self, node: NodeId) -> Option<usize> {
        self.nodes.iter().position(|n| *n == node)
    }

    /// The nodes at the corners of this side.
    pub fn corner_nodes(&self) -> &[NodeId] {
        &self.nodes[..self.ty.n_nodes()]
    }

    /// The largest distance between two vertices of this side.
    pub fn hmax(&self) -> Real {
        let mut h: Real = 0.0;
        for (i, a) in self.points.iter().enumerate() {
            for b in &self.points[i + 1..] {
                h = h.max(na::distance(a, b));
            }
        }
        h
    }
}

/// A minimal unstructured mesh: nodes, elements and boundary side sets.
///
/// Node and element ids are stable: removing an element never renumbers the others.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct Mesh {
    dim: usize,
    nodes: BTreeMap<NodeId, Point<Real>>,
    elems: BTreeMap<ElemId, Elem>,
    side_boundaries: BTreeMap<(ElemId, usize), SmallVec<[BoundaryId; 2]>>,
    node_boundaries: BTreeMap<NodeId, SmallVec<[BoundaryId; 2]>>,
}

impl Mesh {
    /// Creates an empty mesh of the given spatial dimension.
    pub fn new(dim: usize) -> Self {
        Mesh {
            dim,
            ..Default::default()
        }
    }

    /// The spatial dimension of the mesh.
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Adds a node with the next free id.
    pub fn add_node(&mut self, pt: Point<Real>) -> NodeId {
        let id = self.next_node_id();
        let _ = self.nodes.insert(id, pt);
        id
    }

    /// Adds a node with a given id.
    pub fn add_node_with_id(&mut self, id: NodeId, pt: Point<Real>) -> Result<(), MeshError> {
        if self.nodes.contains_key(&id) {
            return Err(MeshError::DuplicateId(id));
        }
        let _ = self.nodes.insert(id, pt);
        Ok(())
    }

    /// The coordinates of a node.
    pub fn node(&self, id: NodeId) -> Result<&Point<Real>, MeshError> {
        self.nodes.get(&id).ok_or(MeshError::UnknownNode(id))
    }

    /// Moves a node.
    pub fn set_node(&mut self, id: NodeId, pt: Point<Real>) -> Result<(), MeshError> {
        let node = self.nodes.get_mut(&id).ok_or(MeshError::UnknownNode(id))?;
        *node = pt;
        Ok(())
    }

    /// Removes a node. Elements still referencing it are left untouched.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Point<Real>> {
        let _ = self.node_boundaries.remove(&id);
        self.nodes.remove(&id)
    }

    /// Iterates through all the nodes.
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Point<Real>)> {
        self.nodes.iter().map(|(id, pt)| (*id, pt))
    }

    /// The number of nodes.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The id the next added node will get.
    pub fn next_node_id(&self) -> NodeId {
        self.nodes.keys().next_back().map(|id| id + 1).unwrap_or(0)
    }

    /// Adds an element with the next free id.
    pub fn add_elem(&mut self, ty: ElemType, nodes: &[NodeId]) -> Result<ElemId, MeshError> {
        let id = self.next_elem_id();
        self.add_elem_with_id(id, ty, nodes, 0)?;
        Ok(id)
    }

    /// Adds an element with a given id and block.
    pub fn add_elem_with_id(
        &mut self,
        id: ElemId,
        ty: ElemType,
        nodes: &[NodeId],
        subdomain: SubdomainId,
    ) -> Result<(), MeshError> {
        if nodes.len() != ty.n_nodes() {
            return Err(MeshError::WrongNodeCount {
                ty,
                expected: ty.n_nodes(),
                found: nodes.len(),
            });
        }
        if self.elems.contains_key(&id) {
            return Err(MeshError::DuplicateId(id));
        }
        if let Some(missing) = nodes.iter().find(|n| !self.nodes.contains_key(n)) {
            return Err(MeshError::UnknownNode(*missing));
        }

        let _ = self.elems.insert(
            id,
            Elem {
                id,
                ty,
                nodes: nodes.iter().copied().collect(),
                subdomain,
            },
        );
        Ok(())
    }

    /// An element.
    pub fn elem(&self, id: ElemId) -> Result<&Elem, MeshError> {
        self.elems.get(&id).ok_or(MeshError::UnknownElem(id))
    }

    /// Removes an element and its side boundary ids.
    pub fn remove_elem(&mut self, id: ElemId) -> Result<Elem, MeshError> {
        let elem = self.elems.remove(&id).ok_or(MeshError::UnknownElem(id))?;
        for side in 0..elem.ty.n_sides() {
            let _ = self.side_boundaries.remove(&(id, side));
        }
        Ok(elem)
    }

    /// Iterates through all the elements, sorted by id.
    pub fn elems(&self) -> impl Iterator<Item = &Elem> {
        self.elems.values()
    }

    /// The number of elements.
    pub fn n_elems(&self) -> usize {
        self.elems.len()
    }

    /// The id the next added element will get.
    pub fn next_elem_id(&self) -> ElemId {
        self.elems.keys().next_back().map(|id| id + 1).unwrap_or(0)
    }

    /// The coordinates of the nodes of an element.
    pub fn elem_points(&self, id: ElemId) -> Result<SmallVec<[Point<Real>; 8]>, MeshError> {
        let elem = self.elem(id)?;
        elem.nodes.iter().map(|n| self.node(*n).copied()).collect()
    }

    /// Tags side `side` of element `elem` with the boundary `bid`.
    pub fn add_side_boundary(
        &mut self,
        elem: ElemId,
        side: usize,
        bid: BoundaryId,
    ) -> Result<(), MeshError> {
        let ty = self.elem(elem)?.ty;
        if side >= ty.n_sides() {
            return Err(MeshError::InvalidSide { elem, side });
        }
        let ids = self.side_boundaries.entry((elem, side)).or_default();
        if !ids.contains(&bid) {
            ids.push(bid);
        }
        Ok(())
    }

    /// Tags a node with the boundary `bid`.
    pub fn add_node_boundary(&mut self, node: NodeId, bid: BoundaryId) -> Result<(), MeshError> {
        let _ = self.node(node)?;
        let ids = self.node_boundaries.entry(node).or_default();
        if !ids.contains(&bid) {
            ids.push(bid);
        }
        Ok(())
    }

    /// The boundary ids of a side.
    pub fn side_boundary_ids(&self, elem: ElemId, side: usize) -> &[BoundaryId] {
        self.side_boundaries
            .get(&(elem, side))
            .map(|ids| &ids[..])
            .unwrap_or(&[])
    }

    /// The boundary ids of a node.
    pub fn node_boundary_ids(&self, node: NodeId) -> &[BoundaryId] {
        self.node_boundaries
            .get(&node)
            .map(|ids| &ids[..])
            .unwrap_or(&[])
    }

    /// The sides of `elem` that lie on the boundary `bid`.
    pub fn sides_with_boundary_id(&self, elem: ElemId, bid: BoundaryId) -> SmallVec<[usize; 6]> {
        self.side_boundaries
            .range((elem, 0)..(elem, usize::MAX))
            .filter(|(_, ids)| ids.contains(&bid))
            .map(|((_, side), _)| *side)
            .collect()
    }

    /// All the `(element, side)` pairs lying on the boundary `bid`.
    pub fn boundary_sides(&self, bid: BoundaryId) -> Vec<(ElemId, usize)> {
        self.side_boundaries
            .iter()
            .filter(|(_, ids)| ids.contains(&bid))
            .map(|(key, _)| *key)
            .collect()
    }

    /// The nodes lying on the boundary `bid`, either through a tagged side or a tagged node.
    ///
    /// The result is sorted and free of duplicates.
    pub fn boundary_nodes(&self, bid: BoundaryId) -> Vec<NodeId> {
        let mut nodes = Vec::new();

        for (elem, side) in self.boundary_sides(bid) {
            if let Ok(e) = self.elem(elem) {
                if let Some(local) = e.ty.side_nodes(side) {
                    nodes.extend(local.iter().map(|i| e.nodes[*i]));
                }
            }
        }

        nodes.extend(
            self.node_boundaries
                .iter()
                .filter(|(_, ids)| ids.contains(&bid))
                .map(|(n, _)| *n),
        );

        nodes.sort_unstable();
        nodes.dedup();
        nodes
    }

    /// Extracts the `side`-th side of an element.
    pub fn build_side(&self, elem: ElemId, side: usize) -> Result<Side, MeshError> {
        let e = self.elem(elem)?;
        let local = e
            .ty
            .side_nodes(side)
            .ok_or(MeshError::InvalidSide { elem, side })?;
        let ty = e
            .ty
            .side_type()
            .ok_or(MeshError::InvalidSide { elem, side })?;
        let nodes: SmallVec<[NodeId; 4]> = local.iter().map(|i| e.nodes[*i]).collect();
        let points = nodes
            .iter()
            .map(|n| self.node(*n).copied())
            .collect::<Result<_, _>>()?;

        Ok(Side {
            elem,
            side,
            ty,
            nodes,
            points,
        })
    }

    /// Maps every node to the elements containing it, sorted by element id.
    pub fn node_to_elem_map(&self) -> HashMap<NodeId, Vec<ElemId>> {
        let mut map: HashMap<NodeId, Vec<ElemId>> = HashMap::default();
        for elem in self.elems.values() {
            for node in &elem.nodes {
                map.entry(*node).or_default().push(elem.id);
            }
        }
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_quad() -> Mesh {
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0)] {
            let _ = mesh.add_node(Point::new(x, y, 0.0));
        }
        let _ = mesh.add_elem(ElemType::Quad4, &[0, 1, 2, 3]).unwrap();
        mesh
    }

    #[test]
    fn sides_and_boundaries() {
        let mut mesh = unit_quad();
        mesh.add_side_boundary(0, 2, 7).unwrap();

        let side = mesh.build_side(0, 2).unwrap();
        assert_eq!(side.ty, ElemType::Edge2);
        assert_eq!(&side.nodes[..], &[2, 3]);
        assert_relative_eq!(side.hmax(), 1.0);

        assert_eq!(mesh.boundary_nodes(7), vec![2, 3]);
        assert_eq!(&mesh.sides_with_boundary_id(0, 7)[..], &[2]);
        assert!(mesh.add_side_boundary(0, 4, 7).is_err());
    }

    #[test]
    fn wrong_node_count_is_rejected() {
        let mut mesh = unit_quad();
        assert_eq!(
            mesh.add_elem(ElemType::Tri3, &[0, 1]),
            Err(MeshError::WrongNodeCount {
                ty: ElemType::Tri3,
                expected: 3,
                found: 2
            })
        );
    }

    #[test]
    fn removing_elements_keeps_ids_stable() {
        let mut mesh = unit_quad();
        let _ = mesh.add_node(Point::new(2.0, 0.0, 0.0));
        let e1 = mesh.add_elem(ElemType::Tri3, &[1, 4, 2]).unwrap();
        let _ = mesh.remove_elem(0).unwrap();
        assert_eq!(mesh.elem(e1).unwrap().id, 1);
        assert_eq!(mesh.next_elem_id(), 2);
        assert_eq!(mesh.node_to_elem_map()[&1], vec![1]);
    }
}
