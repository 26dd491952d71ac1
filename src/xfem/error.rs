use crate::efa::EfaError;
use crate::mesh::{ElemId, MeshError};

/// Errors raised while cutting a mesh or integrating over cut elements.
#[derive(thiserror::Error, Clone, Debug, PartialEq)]
pub enum XfemError {
    /// The fragment topology is inconsistent.
    #[error(transparent)]
    Efa(#[from] EfaError),
    /// A mesh query or modification failed.
    #[error(transparent)]
    Mesh(#[from] MeshError),
    /// A geometric cut was asked to cut entities of a dimension it does not handle.
    #[error("a {cut_dim}D geometric cut cannot cut {requested}")]
    UnsupportedCutDimension {
        /// The dimension of the cut.
        cut_dim: usize,
        /// What it was asked to cut.
        requested: &'static str,
    },
    /// Only 2D and 3D meshes can be cut.
    #[error("XFEM only works on 2D and 3D meshes, not {0}D")]
    UnsupportedMeshDimension(usize),
    /// The element is neither in the mesh nor in the fragment topology.
    #[error("no element {0} to cut")]
    MissingElement(ElemId),
    /// The element was marked twice for state-based crack growth.
    #[error("element {elem} is already marked for {what}")]
    AlreadyMarked {
        /// The element.
        elem: ElemId,
        /// What it was marked for.
        what: &'static str,
    },
    /// State-based crack growth cannot be initiated in this element.
    #[error("element {elem}: {reason}")]
    InvalidStateMark {
        /// The element.
        elem: ElemId,
        /// Why the mark is invalid.
        reason: &'static str,
    },
    /// The quadrature of a cut element could not be built.
    #[error("quadrature of element {elem} failed: {reason}")]
    Quadrature {
        /// The element.
        elem: ElemId,
        /// What failed.
        reason: &'static str,
    },
}
