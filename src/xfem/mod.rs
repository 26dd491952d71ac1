//! XFEM mesh cutting.
//!
//! The [`Xfem`] orchestrator couples a [`Mesh`](crate::mesh::Mesh) with the
//! [element-fragment algorithm](crate::efa). At every update it marks the cuts of the active
//! [`GeometricCut`]s and of the elements marked for state-based crack growth, splits the cut
//! elements into one child per physical fragment, and keeps one [`XfemCutElem`] per child
//! describing its physical part. Cut elements are integrated with adjusted quadrature weights
//! (see [`XfemQRule`]).

pub use self::config::{XfemConfig, XfemQRule};
pub use self::cut_elem::{FragmentFacet, FragmentVertex, XfemCutElem, NO_PHYSICAL_POINT_WEIGHT};
pub use self::error::XfemError;
pub use self::geometric_cut::{CutEdge, CutFace, CutTiming, GeometricCut, LineSegmentCut};
pub use self::mesh_cut::MeshCut;
pub use self::planar_cut::{CircleCut, EllipseCut, PlanarCutShape, RectangleCut};
pub use self::transfer::{NoTransfer, SolutionStates, SolutionTransfer};
pub use self::xfem::{init_cut_intersection_edge, Xfem};

mod config;
mod cut_elem;
mod error;
mod geometric_cut;
mod mesh_cut;
mod planar_cut;
pub mod quadrature;
mod transfer;
mod xfem;
