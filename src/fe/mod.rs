//! Finite-element evaluation of linear Lagrange elements.
//!
//! This is the "reinit" collaborator of the contact projector and the source of the
//! reference quadrature rules of the cut-element integration.

pub use self::evaluator::{inverse_map, FeEvaluator, LagrangeEvaluator, ReinitError, VertexList};
pub use self::quadrature::{gauss_rule, QuadratureRule};
pub use self::shape::{lagrange_shape, map_to_physical, ShapeValues};

mod evaluator;
mod quadrature;
mod shape;
