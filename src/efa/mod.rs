//! The element-fragment algorithm (EFA).
//!
//! The EFA tracks how cuts slice the elements of a mesh into physical fragments. Cuts are
//! marked on element edges (2D) or faces (3D), fragments are split along them, and every
//! split element is then replaced by one child element per fragment. Children of
//! neighbouring elements share nodes across uncut material and get fresh nodes across the
//! crack.
//!
//! Nodes are owned by the [`ElementFragmentAlgorithm`] and referenced by [`NodeKey`]
//! handles, so that switching a node in one element never invalidates another one.

pub use self::algorithm::ElementFragmentAlgorithm;
pub use self::edge::EfaEdge;
pub(crate) use self::element::{planar, planar_mut, solid, solid_mut};
pub use self::element::{EfaElement, ElementMap};
pub use self::element2d::Element2D;
pub use self::element3d::Element3D;
pub use self::error::EfaError;
pub use self::face::{EfaFace, FaceNode};
pub use self::fragment::{Fragment, FragmentSnapshot, SnapshotCut, SnapshotEdge, SnapshotNode};
pub use self::fragment2d::Fragment2D;
pub use self::fragment3d::Fragment3D;
pub(crate) use self::node::NodeArena;
pub use self::node::{EfaNode, NodeCategory, NodeKey};

mod algorithm;
mod edge;
mod element;
mod element2d;
mod element3d;
mod error;
mod face;
mod fragment;
mod fragment2d;
mod fragment3d;
mod node;
