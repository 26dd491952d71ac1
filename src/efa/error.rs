use crate::mesh::ElemId;

/// Violations of the fragment topology invariants.
///
/// These indicate a malformed cut configuration or a programming defect. Every operation
/// of [`ElementFragmentAlgorithm`](super::ElementFragmentAlgorithm) that returns one leaves
/// the topology in an unspecified state.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum EfaError {
    /// The element does not exist.
    #[error("no EFA element with id {0}")]
    MissingElement(ElemId),
    /// An element with this id already exists.
    #[error("an EFA element with id {0} already exists")]
    DuplicateElement(ElemId),
    /// The element does not have the dimension required by the operation.
    #[error("EFA element {elem} is not a {expected}D element")]
    WrongDimension {
        /// The element.
        elem: ElemId,
        /// The dimension the operation works on.
        expected: usize,
    },
    /// The number of nodes does not describe a supported element.
    #[error("{0} nodes do not describe a supported EFA element")]
    InvalidNodeCount(usize),
    /// A node is not where it was expected to be.
    #[error("element {elem}: {reason}")]
    MissingNode {
        /// The element being processed.
        elem: ElemId,
        /// What was looked for.
        reason: &'static str,
    },
    /// A cut cannot be added at the requested place.
    #[error("element {elem}, edge {edge}: {reason}")]
    InvalidCut {
        /// The element.
        elem: ElemId,
        /// The element (or fragment) edge.
        edge: usize,
        /// Why the cut was rejected.
        reason: &'static str,
    },
    /// A fragment has more cut edges than can be split.
    #[error("element {elem} has {cuts} cut fragment edges but at most 3 are supported")]
    TooManyCuts {
        /// The element.
        elem: ElemId,
        /// The number of cut fragment edges.
        cuts: usize,
    },
    /// An element has an unexpected number of fragments.
    #[error("element {elem} has {found} fragments where {expected} was expected")]
    FragmentCount {
        /// The element.
        elem: ElemId,
        /// The expected number of fragments.
        expected: &'static str,
        /// The number of fragments found.
        found: usize,
    },
    /// The fragments produced by a split do not have the expected edge counts.
    #[error("fragment sanity check failed in element {elem}: {reason}")]
    FragmentSanity {
        /// The element.
        elem: ElemId,
        /// The violated relation.
        reason: &'static str,
    },
    /// An element edge or face already has two neighbours.
    #[error("element {elem} already has two neighbours on side {side}")]
    TooManyNeighbors {
        /// The element.
        elem: ElemId,
        /// The edge (2D) or face (3D).
        side: usize,
    },
    /// The neighbour relation is inconsistent.
    #[error("neighbour relation between elements {0} and {1} is inconsistent")]
    InconsistentNeighbors(ElemId, ElemId),
    /// Two nodes cannot be merged.
    #[error("cannot merge nodes in element {elem}: {reason}")]
    NodeMerge {
        /// The child element being connected.
        elem: ElemId,
        /// Why the merge is invalid.
        reason: &'static str,
    },
    /// A node created by a split has no parent node.
    #[error("new permanent node {0} has no parent node")]
    OrphanNode(u32),
    /// Temporary nodes are left after the fragments were connected.
    #[error("{0} temporary nodes remain after connecting fragments")]
    LeftoverTempNodes(usize),
    /// A fragment snapshot does not fit the element it is restored into.
    #[error("cannot restore fragments of element {elem}: {reason}")]
    Restore {
        /// The element.
        elem: ElemId,
        /// Why the snapshot does not apply.
        reason: &'static str,
    },
}
