use std::collections::BTreeMap;

use smallvec::SmallVec;

use crate::efa::{EfaError, Element2D, Element3D, FragmentSnapshot, NodeArena, NodeKey};
use crate::math::Real;
use crate::mesh::{ElemId, ElemType};

/// The elements of an [`ElementFragmentAlgorithm`](super::ElementFragmentAlgorithm), by id.
pub type ElementMap = BTreeMap<ElemId, EfaElement>;

/// An element of the fragment topology.
#[derive(Clone, Debug)]
pub enum EfaElement {
    /// A `Quad4` or `Tri3` element.
    Planar(Element2D),
    /// A `Hex8` or `Tet4` element.
    Solid(Element3D),
}

/// The 2D element `id` of `elements`.
pub(crate) fn planar(elements: &ElementMap, id: ElemId) -> Result<&Element2D, EfaError> {
    match elements.get(&id) {
        Some(EfaElement::Planar(e)) => Ok(e),
        Some(EfaElement::Solid(_)) => Err(EfaError::WrongDimension {
            elem: id,
            expected: 2,
        }),
        None => Err(EfaError::MissingElement(id)),
    }
}

pub(crate) fn planar_mut(
    elements: &mut ElementMap,
    id: ElemId,
) -> Result<&mut Element2D, EfaError> {
    match elements.get_mut(&id) {
        Some(EfaElement::Planar(e)) => Ok(e),
        Some(EfaElement::Solid(_)) => Err(EfaError::WrongDimension {
            elem: id,
            expected: 2,
        }),
        None => Err(EfaError::MissingElement(id)),
    }
}

/// The 3D element `id` of `elements`.
pub(crate) fn solid(elements: &ElementMap, id: ElemId) -> Result<&Element3D, EfaError> {
    match elements.get(&id) {
        Some(EfaElement::Solid(e)) => Ok(e),
        Some(EfaElement::Planar(_)) => Err(EfaError::WrongDimension {
            elem: id,
            expected: 3,
        }),
        None => Err(EfaError::MissingElement(id)),
    }
}

pub(crate) fn solid_mut(
    elements: &mut ElementMap,
    id: ElemId,
) -> Result<&mut Element3D, EfaError> {
    match elements.get_mut(&id) {
        Some(EfaElement::Solid(e)) => Ok(e),
        Some(EfaElement::Planar(_)) => Err(EfaError::WrongDimension {
            elem: id,
            expected: 3,
        }),
        None => Err(EfaError::MissingElement(id)),
    }
}

macro_rules! dispatch {
    ($self: ident, $e: ident => $body: expr) => {
        match $self {
            EfaElement::Planar($e) => $body,
            EfaElement::Solid($e) => $body,
        }
    };
}

impl EfaElement {
    /// The id of this element.
    pub fn id(&self) -> ElemId {
        dispatch!(self, e => e.id)
    }

    /// The element type.
    pub fn elem_type(&self) -> ElemType {
        dispatch!(self, e => e.ty)
    }

    /// The topological dimension.
    pub fn dim(&self) -> usize {
        match self {
            EfaElement::Planar(_) => 2,
            EfaElement::Solid(_) => 3,
        }
    }

    /// The vertices.
    pub fn nodes(&self) -> &[NodeKey] {
        dispatch!(self, e => &e.nodes)
    }

    /// Does `node` appear among the vertices?
    pub fn contains_node(&self, node: NodeKey) -> bool {
        self.nodes().contains(&node)
    }

    /// The number of physical fragments.
    pub fn num_fragments(&self) -> usize {
        dispatch!(self, e => e.fragments.len())
    }

    /// Does some vertex lie outside every fragment?
    pub fn is_partial(&self) -> bool {
        dispatch!(self, e => e.is_partial())
    }

    /// Has this element reached the last cut it accepts?
    pub fn is_final_cut(&self) -> bool {
        dispatch!(self, e => e.is_final_cut())
    }

    /// Does this element hold a crack tip?
    pub fn is_crack_tip_element(&self) -> bool {
        dispatch!(self, e => e.is_crack_tip_element())
    }

    /// The element this one was split from.
    pub fn parent(&self) -> Option<ElemId> {
        dispatch!(self, e => e.parent)
    }

    /// The elements this one was split into.
    pub fn children(&self) -> &[ElemId] {
        dispatch!(self, e => &e.children)
    }

    /// The elements sharing at least one vertex with this one.
    pub fn general_neighbors(&self) -> &[ElemId] {
        dispatch!(self, e => &e.general_neighbors)
    }

    /// The vertices `node` interpolates, with their weights.
    pub fn master_info(&self, node: NodeKey) -> Result<SmallVec<[(NodeKey, Real); 4]>, EfaError> {
        dispatch!(self, e => e.master_info(node))
    }

    /// Captures the fragments and cuts of this element.
    pub(crate) fn snapshot(&self, arena: &NodeArena) -> Result<FragmentSnapshot, EfaError> {
        dispatch!(self, e => e.snapshot(arena))
    }

    pub(crate) fn restore(
        &mut self,
        snapshot: &FragmentSnapshot,
        arena: &mut NodeArena,
    ) -> Result<(), EfaError> {
        dispatch!(self, e => e.restore(snapshot, arena))
    }

    pub(crate) fn set_parent(&mut self, parent: Option<ElemId>) {
        dispatch!(self, e => e.parent = parent)
    }

    pub(crate) fn push_child(&mut self, child: ElemId) {
        dispatch!(self, e => e.children.push(child))
    }

    pub(crate) fn switch_node(&mut self, new: NodeKey, old: NodeKey) {
        dispatch!(self, e => e.switch_node(new, old))
    }

    pub(crate) fn clear_neighbors(&mut self) {
        dispatch!(self, e => e.clear_neighbors())
    }

    pub(crate) fn clear_parent_and_children(&mut self) {
        dispatch!(self, e => e.clear_parent_and_children())
    }

    pub(crate) fn update_fragment_node(&mut self, arena: &NodeArena) {
        dispatch!(self, e => e.update_fragment_node(arena))
    }

    pub(crate) fn remove_phantom_embedded_node(&mut self) {
        dispatch!(self, e => e.remove_phantom_embedded_node())
    }

    /// The 2D element, if this is one.
    pub fn as_planar(&self) -> Option<&Element2D> {
        match self {
            EfaElement::Planar(e) => Some(e),
            EfaElement::Solid(_) => None,
        }
    }

    /// The 3D element, if this is one.
    pub fn as_solid(&self) -> Option<&Element3D> {
        match self {
            EfaElement::Solid(e) => Some(e),
            EfaElement::Planar(_) => None,
        }
    }
}
