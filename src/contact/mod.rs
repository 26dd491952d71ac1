//! Node-on-face contact search and contact mechanics.
//!
//! # Search
//! A [`PenetrationLocator`] tracks, for every node of a secondary boundary, its closest point on
//! a primary boundary:
//!
//! * [`find_contact_point()`] projects a node on one primary face by Newton iteration in the
//!   reference coordinates of the face.
//! * candidates competing for one node are resolved with [`find_ridge_contact_point()`] and
//!   [`compete_interactions()`];
//! * the resulting normals are optionally smoothed across face edges.
//!
//! # Mechanics
//! [`MechanicalContact`] turns the search results into contact forces and evolves the
//! capture/stick/slip state of each node. [`FrictionalSlipController`] drives the outer slip
//! iterations of frictional contact around the nonlinear solve.

pub use self::competition::{
    compete_interactions, interactions_off_common_edge, select_best_candidate, CommonEdgeResult,
    CompeteResult,
};
pub use self::config::{
    ContactConfig, ContactFormulation, ContactModel, LocatorConfig, NormalSmoothingMethod,
    ProjectionOptions,
};
pub use self::error::{ConfigError, ContactError};
pub use self::friction::{
    node_slip, ConvergenceVerdict, FrictionalSlipConfig, FrictionalSlipController, NodeSlip,
    SlipState, SlipSummary, SlipSystem,
};
pub use self::locator::{compute_slip, PenetrationLocator};
pub use self::mechanical::{AugmentedLagrangeViolation, ContactFields, MechanicalContact};
pub use self::penetration_info::{MechStatus, PenetrationInfo};
pub use self::projection::{
    find_contact_point, is_face_reasonable_candidate, restrict_point_to_face, side_normal,
    ProjectionReport,
};
pub use self::ridge::{
    find_ridge_contact_point, group_ridges, restrict_point_to_specified_edge_of_face,
    side_corner_nodes, RidgeData, RidgeSetData,
};
pub use self::smoothing::{nodal_normal_smoothing, smoothing_edge_nodes_and_weights, SmoothingEdge};

mod competition;
mod config;
mod error;
mod friction;
mod locator;
mod mechanical;
mod penetration_info;
mod projection;
#[cfg(feature = "serde-serialize")]
pub mod restart;
mod ridge;
mod smoothing;

static_assertions::assert_impl_all!(PenetrationLocator: Send, Sync);
static_assertions::assert_impl_all!(PenetrationInfo: Send, Sync);
