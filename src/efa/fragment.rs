use std::collections::BTreeSet;

use smallvec::SmallVec;

use crate::efa::{EfaEdge, EfaError, NodeArena, NodeCategory, NodeKey};
use crate::math::Real;
use crate::mesh::ElemId;

/// Operations shared by the 2D and 3D fragments of an element.
pub trait Fragment {
    /// The number of cuts on the fragment boundary.
    fn num_cuts(&self) -> usize;

    /// Does the fragment boundary contain `node`, as a vertex or as a cut node?
    fn contains_node(&self, node: NodeKey) -> bool;

    /// The vertices of the fragment boundary.
    fn all_nodes(&self) -> BTreeSet<NodeKey>;

    /// Do both fragments share a boundary edge (2D) or face (3D)?
    fn is_connected(&self, other: &Self) -> bool;

    /// Replaces `old` by `new` everywhere in the fragment.
    fn switch_node(&mut self, new: NodeKey, old: NodeKey);

    /// The vertices shared by both fragments.
    fn common_nodes(&self, other: &Self) -> Vec<NodeKey> {
        let mine = self.all_nodes();
        other
            .all_nodes()
            .into_iter()
            .filter(|n| mine.contains(n))
            .collect()
    }
}

/// A node of a [`FragmentSnapshot`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum SnapshotNode {
    /// The element vertex with this local index.
    Local(usize),
    /// The embedded node with this id.
    Embedded(u32),
}

/// An edge of a [`FragmentSnapshot`], with its cuts as `(embedded node id, position)` pairs.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct SnapshotEdge {
    /// The end nodes.
    pub nodes: [SnapshotNode; 2],
    /// The cuts, positioned from the first end node.
    pub cuts: SmallVec<[(u32, Real); 2]>,
}

/// A cut recorded on an element edge of a [`FragmentSnapshot`].
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct SnapshotCut {
    /// The local indices of the end nodes of the element edge.
    pub edge: [usize; 2],
    /// The embedded node of the cut.
    pub node: u32,
    /// The position of the cut from the first end node.
    pub position: Real,
}

/// The fragment state of one element, independent of the global node numbering.
///
/// Vertex nodes are stored by their element-local index and cut nodes by their embedded-node
/// id, so a snapshot taken before [`ElementFragmentAlgorithm::reset`] can be restored into the
/// element rebuilt afterwards.
///
/// [`ElementFragmentAlgorithm::reset`]: super::ElementFragmentAlgorithm::reset
#[derive(Clone, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FragmentSnapshot {
    /// The number of vertices of the element.
    pub num_nodes: usize,
    /// Each fragment as a list of closed edge cycles: one cycle in 2D, one per boundary face
    /// in 3D.
    pub fragments: Vec<Vec<Vec<SnapshotEdge>>>,
    /// The cuts of the element edges.
    pub cuts: Vec<SnapshotCut>,
    /// The cut nodes inside the element, with their parametric coordinates (2D only).
    pub interior_nodes: Vec<(u32, [Real; 2])>,
}

pub(crate) fn encode_node(
    arena: &NodeArena,
    elem: ElemId,
    vertices: &[NodeKey],
    node: NodeKey,
) -> Result<SnapshotNode, EfaError> {
    if let Some(i) = vertices.iter().position(|v| *v == node) {
        return Ok(SnapshotNode::Local(i));
    }

    match arena.category(node) {
        NodeCategory::Embedded => Ok(SnapshotNode::Embedded(arena.id(node))),
        _ => Err(EfaError::MissingNode {
            elem,
            reason: "a fragment node is neither an element vertex nor an embedded node",
        }),
    }
}

pub(crate) fn decode_node(
    arena: &mut NodeArena,
    elem: ElemId,
    vertices: &[NodeKey],
    node: SnapshotNode,
) -> Result<NodeKey, EfaError> {
    match node {
        SnapshotNode::Local(i) => vertices.get(i).copied().ok_or(EfaError::Restore {
            elem,
            reason: "local node index out of range",
        }),
        SnapshotNode::Embedded(id) => Ok(arena.insert_embedded(id)),
    }
}

impl SnapshotEdge {
    pub(crate) fn encode(
        edge: &EfaEdge,
        arena: &NodeArena,
        elem: ElemId,
        vertices: &[NodeKey],
    ) -> Result<Self, EfaError> {
        let from = edge.node(0);
        Ok(SnapshotEdge {
            nodes: [
                encode_node(arena, elem, vertices, edge.node(0))?,
                encode_node(arena, elem, vertices, edge.node(1))?,
            ],
            cuts: (0..edge.num_embedded_nodes())
                .map(|i| (arena.id(edge.embedded_node(i)), edge.intersection(i, from)))
                .collect(),
        })
    }

    pub(crate) fn decode(
        &self,
        arena: &mut NodeArena,
        elem: ElemId,
        vertices: &[NodeKey],
    ) -> Result<EfaEdge, EfaError> {
        let a = decode_node(arena, elem, vertices, self.nodes[0])?;
        let b = decode_node(arena, elem, vertices, self.nodes[1])?;
        let mut edge = EfaEdge::new(a, b);
        for (id, position) in &self.cuts {
            let node = arena.insert_embedded(*id);
            edge.add_intersection(*position, node, a);
        }
        Ok(edge)
    }
}
