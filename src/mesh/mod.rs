//! The mesh collaborator of the contact and cutting engines.
//!
//! This is a small unstructured mesh with stable node and element ids, boundary side sets
//! and the element tables of linear Lagrange elements.

pub use self::elem_type::ElemType;
pub use self::mesh::{BoundaryId, Elem, ElemId, Mesh, MeshError, NodeId, Side, SubdomainId};
pub use self::nearest_node::{NearestNodeLocator, Patch};

mod elem_type;
mod mesh;
mod nearest_node;
