/*!
kerf
========

**kerf** provides two geometric engines used by finite-element codes that model
bodies touching each other and bodies cracking apart:

- node-on-face **contact search**: for every node of a secondary surface, find the
  closest point on a primary surface, resolve competing candidates at ridges and
  corners, and evolve the frictional stick/slip state of the contact;
- **XFEM mesh cutting**: track how a crack slices finite elements into fragments,
  keep the fragment topology consistent across repeated cuts, and integrate over
  the physical part of cut elements.

*/

#![deny(non_camel_case_types)]
#![deny(unused_parens)]
#![deny(non_upper_case_globals)]
#![deny(unused_results)]
#![warn(missing_docs)]
#![warn(unused_imports)]
#![allow(missing_copy_implementations)]
#![allow(clippy::too_many_arguments)] // Maybe revisit this one later.
#![allow(clippy::module_inception)]
#![allow(clippy::manual_range_contains)] // This usually makes it way more verbose that it could be.
#![allow(clippy::type_complexity)] // Complains about closures that are fairly simple.

#[cfg(feature = "serde")]
#[macro_use]
extern crate serde;
#[macro_use]
extern crate approx;

pub extern crate nalgebra as na;

pub mod contact;
pub mod efa;
pub mod fe;
pub mod mesh;
pub mod utils;
pub mod xfem;

/// Aliases for the mathematical types used throughout this crate.
///
/// Every point lives in 3D. Two-dimensional meshes keep `z = 0`.
pub mod math {
    pub use na::{Matrix2, Matrix3, Point2, Point3, Vector2, Vector3};

    /// The scalar type used throughout this crate.
    pub use f64 as Real;

    /// The point type.
    pub use Point3 as Point;

    /// The vector type.
    pub use Vector3 as Vector;

    /// The default tolerance used for geometric operations.
    pub const DEFAULT_EPSILON: Real = Real::EPSILON;

    /// The tolerance used to decide whether two geometric quantities coincide.
    pub const TOLERANCE: Real = 1.0e-6;

    /// The largest spatial dimension supported.
    pub const MAX_DIM: usize = 3;
}
