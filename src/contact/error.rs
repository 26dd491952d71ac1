use crate::fe::ReinitError;
use crate::mesh::{ElemId, ElemType, MeshError, NodeId};

/// Invalid contact configuration, detected once at setup.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum ConfigError {
    /// Unknown contact model name.
    #[error("unknown contact model `{0}`")]
    UnknownModel(String),
    /// Unknown contact formulation name.
    #[error("unknown contact formulation `{0}`")]
    UnknownFormulation(String),
    /// Unknown normal smoothing method name.
    #[error("unknown normal smoothing method `{0}`")]
    UnknownSmoothingMethod(String),
    /// Unknown cut-element quadrature rule name.
    #[error("unknown XFEM quadrature rule `{0}`")]
    UnknownQRule(String),
    /// The `tangential_penalty` formulation needs the `coulomb` model.
    #[error("the tangential_penalty formulation can only be used with the coulomb model")]
    TangentialPenaltyNeedsCoulomb,
    /// The friction coefficient is negative.
    #[error("the friction coefficient must be nonnegative")]
    NegativeFrictionCoefficient,
    /// The augmented Lagrangian formulation cannot be used for glued contact.
    #[error("the augmented Lagrangian formulation does not support glued contact")]
    AugmentedLagrangeGlued,
    /// A tolerance required by the augmented Lagrangian formulation is missing.
    #[error("the augmented Lagrangian formulation requires `{0}`")]
    MissingAugmentedLagrangeTolerance(&'static str),
    /// A smoothing method was given without the data it needs.
    #[error("normal smoothing method `{0}` requires `{1}`")]
    MissingSmoothingData(&'static str, &'static str),
    /// The minimum number of slip iterations exceeds the maximum.
    #[error("min_slip_iterations ({0}) exceeds max_slip_iterations ({1})")]
    InvalidSlipIterationBounds(u32, u32),
    /// The frictional-slip controller has no convergence target.
    #[error("the frictional-slip controller requires target_contact_residual or target_relative_contact_residual")]
    MissingSlipTarget,
}

/// Logic violations of the contact search and of the contact mechanics.
///
/// These indicate a malformed mesh or a programming defect and abort the current pass.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum ContactError {
    /// A mesh query failed.
    #[error(transparent)]
    Mesh(#[from] MeshError),
    /// A side could not be re-evaluated at a point that must be valid.
    #[error("re-evaluation of element {elem} failed: {source}")]
    Reinit {
        /// The element.
        elem: ElemId,
        /// The underlying failure.
        source: ReinitError,
    },
    /// The nearest primary node has no entry in the node to element map.
    #[error("node {0} is missing from the node to element map")]
    MissingNodeToElem(NodeId),
    /// Two candidates off a common corner both report the same off-edge node count.
    #[error("invalid off-edge node counts ({0} and {1})")]
    InvalidOffEdgeNodes(usize, usize),
    /// The sides of two candidates have different dimensions.
    #[error("incompatible side dimensions {0} and {1}")]
    IncompatibleSideDimensions(usize, usize),
    /// A side does not contain a node it was expected to contain.
    #[error("side of element {elem} does not contain node {node}")]
    NodeNotOnSide {
        /// The element owning the side.
        elem: ElemId,
        /// The missing node.
        node: NodeId,
    },
    /// The local indices of a ridge do not form an edge of the side.
    #[error("invalid local node indices {0:?} for a ridge")]
    InvalidRidgeIndices([usize; 2]),
    /// Two faces clamped to a common ridge report different closest nodes.
    #[error("faces off the same ridge report different closest nodes")]
    RidgeNodeMismatch,
    /// The side type is not supported by the contact search.
    #[error("unsupported face type {0:?}")]
    UnsupportedFaceType(ElemType),
    /// More than one neighbouring face was found across one edge while smoothing normals.
    #[error("found {0} neighbours across one edge while smoothing normals")]
    TooManySmoothingNeighbors(usize),
    /// A zero nodal area was found after the first step.
    #[error("zero nodal area found at node {0}")]
    ZeroNodalArea(NodeId),
    /// Nodal-normal smoothing has no normal for a node of the contact side.
    #[error("no nodal normal was supplied for node {0}")]
    MissingNodalNormal(NodeId),
}
