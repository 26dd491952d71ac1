//! The frictional-slip controller.
//!
//! An outer loop around the nonlinear solve: once the solve has converged with the nodes of
//! the contact surface held in place, the tangential part of their residual is compared with
//! the friction capacity, and corrective slip displacements are applied until the excess
//! tangential force vanishes.

use crate::contact::{ConfigError, ContactError, PenetrationInfo, PenetrationLocator};
use crate::math::{Point, Real, Vector};
use crate::mesh::NodeId;
use crate::utils::{hashmap::HashMap, Communicator};

/// The nodal quantities of the host solver driven by the controller.
pub trait SlipSystem {
    /// The residual of the displacement equations at `node`.
    fn residual(&self, node: NodeId) -> Vector<Real>;
    /// The diagonal of the stiffness matrix at `node`, one entry per displacement component.
    fn diagonal_stiffness(&self, node: NodeId) -> Vector<Real>;
    /// Adds `delta` to the displacement of `node`.
    fn add_displacement(&mut self, node: NodeId, delta: &Vector<Real>);
    /// The displaced position of `node`.
    fn node_position(&self, node: NodeId) -> Point<Real>;
}

/// Parameters of the frictional-slip controller.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FrictionalSlipConfig {
    /// The Coulomb friction coefficient.
    pub friction_coefficient: Real,
    /// Fraction of the slip computed from the excess force that is applied.
    pub slip_factor: Real,
    /// Fraction of the slip computed for nodes that slipped too far that is applied.
    pub slip_too_far_factor: Real,
    /// Minimum number of slip iterations per time step.
    pub min_slip_iterations: u32,
    /// Maximum number of slip iterations per time step.
    pub max_slip_iterations: u32,
    /// Number of slip updates allowed within one nonlinear solve before it converges.
    pub slip_updates_per_iteration: u32,
    /// Absolute target of the slip residual.
    pub target_contact_residual: Option<Real>,
    /// Target of the slip residual relative to the first slip residual of the step.
    pub target_relative_contact_residual: Option<Real>,
}

impl Default for FrictionalSlipConfig {
    fn default() -> Self {
        FrictionalSlipConfig {
            friction_coefficient: 0.0,
            slip_factor: 1.0,
            slip_too_far_factor: 1.0,
            min_slip_iterations: 0,
            max_slip_iterations: 100,
            slip_updates_per_iteration: 0,
            target_contact_residual: None,
            target_relative_contact_residual: Some(1.0e-3),
        }
    }
}

impl FrictionalSlipConfig {
    /// Checks the consistency of the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.friction_coefficient < 0.0 {
            return Err(ConfigError::NegativeFrictionCoefficient);
        }
        if self.min_slip_iterations > self.max_slip_iterations {
            return Err(ConfigError::InvalidSlipIterationBounds(
                self.min_slip_iterations,
                self.max_slip_iterations,
            ));
        }
        if self.target_contact_residual.is_none() && self.target_relative_contact_residual.is_none()
        {
            return Err(ConfigError::MissingSlipTarget);
        }
        Ok(())
    }
}

/// The friction state of a node in contact during one slip iteration.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum SlipState {
    /// The tangential force is within the friction capacity.
    Sticking,
    /// The tangential force exceeds the friction capacity.
    Slipping,
    /// The node slipped further than its tangential force justifies.
    SlippedTooFar,
}

/// The verdict of the controller on the nonlinear solve.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConvergenceVerdict {
    /// The solve and the slip iterations have converged.
    Converged,
    /// More nonlinear iterations are needed.
    Iterate,
    /// The slip iterations failed; the host should cut the time step.
    Diverged(String),
}

/// Global counts of one slip calculation.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct SlipSummary {
    /// Number of nodes in contact.
    pub captured: usize,
    /// Number of slipping nodes.
    pub slipping: usize,
    /// Number of nodes that slipped too far.
    pub slipped_too_far: usize,
    /// Root-sum-square of the nodal slip residuals.
    pub slip_residual: Real,
}

/// The slip computed for one node.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct NodeSlip {
    /// The friction state.
    pub state: SlipState,
    /// The corrective displacement.
    pub slip: Vector<Real>,
    /// The excess tangential force.
    pub residual: Real,
}

/// Classifies one node in contact and computes its corrective slip.
///
/// `residual` and `stiffness` are the nodal residual and diagonal stiffness. The contact force
/// on the node is `-residual`; its normal part is compressive when `residual · n > 0`.
pub fn node_slip(
    info: &PenetrationInfo,
    residual: &Vector<Real>,
    stiffness: &Vector<Real>,
    config: &FrictionalSlipConfig,
) -> NodeSlip {
    let n = info.normal;
    let force = -residual;
    let tangential_force = force - n * force.dot(&n);
    let capacity = config.friction_coefficient * residual.dot(&n).max(0.0);
    let tangential_inc_slip = info.incremental_slip - n * info.incremental_slip.dot(&n);
    let inc_slip_mag = tangential_inc_slip.norm();
    let tan_mag = tangential_force.norm();

    let to_displacement = |excess: Vector<Real>, factor: Real| {
        let mut slip = excess.component_div(stiffness) * factor;
        slip -= n * slip.dot(&n);
        slip
    };

    if inc_slip_mag > 0.0 {
        let direction = tangential_inc_slip / inc_slip_mag;
        let along = direction.dot(&tangential_force);
        if along < capacity && tan_mag <= capacity {
            // Back along the slip direction, at most to the start of the step.
            let excess = capacity - along;
            let mut slip = to_displacement(-direction * excess, config.slip_too_far_factor);
            let slip_mag = slip.norm();
            if slip_mag > inc_slip_mag {
                slip *= inc_slip_mag / slip_mag;
            }
            return NodeSlip {
                state: SlipState::SlippedTooFar,
                slip,
                residual: excess,
            };
        }
    }

    if tan_mag > capacity {
        let excess = tan_mag - capacity;
        NodeSlip {
            state: SlipState::Slipping,
            slip: to_displacement(tangential_force * (excess / tan_mag), config.slip_factor),
            residual: excess,
        }
    } else {
        NodeSlip {
            state: SlipState::Sticking,
            slip: Vector::zeros(),
            residual: 0.0,
        }
    }
}

/// Drives the slip iterations of one contact interaction.
#[derive(Clone, Debug)]
pub struct FrictionalSlipController {
    config: FrictionalSlipConfig,
    num_slip_iterations: u32,
    slip_updates_in_solve: u32,
    reference_residual: Option<Real>,
    states: HashMap<NodeId, SlipState>,
    pending: Vec<(NodeId, Vector<Real>)>,
}

impl FrictionalSlipController {
    /// A controller with the given configuration.
    pub fn new(config: FrictionalSlipConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(FrictionalSlipController {
            config,
            num_slip_iterations: 0,
            slip_updates_in_solve: 0,
            reference_residual: None,
            states: HashMap::default(),
            pending: Vec::new(),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &FrictionalSlipConfig {
        &self.config
    }

    /// Number of slip iterations performed during the current step.
    pub fn num_slip_iterations(&self) -> u32 {
        self.num_slip_iterations
    }

    /// The friction state of `node` at the last slip calculation.
    pub fn slip_state(&self, node: NodeId) -> Option<SlipState> {
        self.states.get(&node).copied()
    }

    /// The slips computed by the last slip calculation and not applied yet.
    pub fn pending_slip(&self) -> &[(NodeId, Vector<Real>)] {
        &self.pending
    }

    /// Resets the iteration counters at the beginning of a time step.
    pub fn timestep_setup(&mut self) {
        self.num_slip_iterations = 0;
        self.slip_updates_in_solve = 0;
        self.reference_residual = None;
        self.states.clear();
        self.pending.clear();
    }

    /// Moves every node in contact back onto the primary surface along the contact normal.
    ///
    /// Returns the number of nodes moved.
    pub fn enforce_rate_constraint<S: SlipSystem + ?Sized>(
        &self,
        locator: &PenetrationLocator,
        system: &mut S,
        comm: &dyn Communicator,
    ) -> usize {
        let mut moved = 0;
        for info in sorted_captured(locator) {
            let position = system.node_position(info.node);
            let gap = info.normal.dot(&(position - info.closest_point));
            if gap != 0.0 {
                system.add_displacement(info.node, &(-info.normal * gap));
                moved += 1;
            }
        }

        let moved = comm.sum_count(moved);
        log::debug!("rate constraint moved {moved} nodes onto the contact surface");
        moved
    }

    /// Computes the friction state and corrective slip of every node in contact.
    pub fn calculate_slip<S: SlipSystem + ?Sized>(
        &mut self,
        locator: &PenetrationLocator,
        system: &S,
        comm: &dyn Communicator,
    ) -> SlipSummary {
        self.states.clear();
        self.pending.clear();

        let mut summary = SlipSummary::default();
        let mut residual_sq = 0.0;

        for info in sorted_captured(locator) {
            let slip = node_slip(
                info,
                &system.residual(info.node),
                &system.diagonal_stiffness(info.node),
                &self.config,
            );

            summary.captured += 1;
            match slip.state {
                SlipState::Sticking => {}
                SlipState::Slipping => summary.slipping += 1,
                SlipState::SlippedTooFar => summary.slipped_too_far += 1,
            }
            if slip.state != SlipState::Sticking {
                self.pending.push((info.node, slip.slip));
            }
            residual_sq += slip.residual * slip.residual;
            let _ = self.states.insert(info.node, slip.state);
        }

        summary.captured = comm.sum_count(summary.captured);
        summary.slipping = comm.sum_count(summary.slipping);
        summary.slipped_too_far = comm.sum_count(summary.slipped_too_far);
        summary.slip_residual = comm.sum(residual_sq).sqrt();

        log::info!(
            "contact: {} captured, {} slipping, {} slipped too far, slip residual {:e}",
            summary.captured,
            summary.slipping,
            summary.slipped_too_far,
            summary.slip_residual
        );
        summary
    }

    /// Applies the pending slips to the displacement field.
    pub fn apply_slip<S: SlipSystem + ?Sized>(&mut self, system: &mut S) {
        for (node, slip) in self.pending.drain(..) {
            system.add_displacement(node, &slip);
        }
    }

    /// Decides whether the nonlinear solve may stop.
    ///
    /// Before the solve converges, up to `slip_updates_per_iteration` slip updates are applied.
    /// Once it converges, slip iterations are forced until the slip residual meets its target,
    /// with at least `min_slip_iterations` and at most `max_slip_iterations` of them.
    pub fn check_nonlinear_convergence<S: SlipSystem + ?Sized>(
        &mut self,
        locator: &PenetrationLocator,
        system: &mut S,
        comm: &dyn Communicator,
        nonlinear_converged: bool,
    ) -> Result<ConvergenceVerdict, ContactError> {
        if !nonlinear_converged {
            if self.slip_updates_in_solve < self.config.slip_updates_per_iteration {
                let summary = self.calculate_slip(locator, system, comm);
                if summary.slipping + summary.slipped_too_far > 0 {
                    self.apply_slip(system);
                    self.slip_updates_in_solve += 1;
                }
            }
            return Ok(ConvergenceVerdict::Iterate);
        }

        let summary = self.calculate_slip(locator, system, comm);
        let residual = summary.slip_residual;
        let reference = *self.reference_residual.get_or_insert(residual);

        let below_target = self
            .config
            .target_contact_residual
            .is_some_and(|target| residual <= target)
            || self
                .config
                .target_relative_contact_residual
                .is_some_and(|target| residual <= target * reference);
        let no_slip = summary.slipping + summary.slipped_too_far == 0;

        if self.num_slip_iterations >= self.config.min_slip_iterations && (below_target || no_slip) {
            self.pending.clear();
            return Ok(ConvergenceVerdict::Converged);
        }

        if self.num_slip_iterations >= self.config.max_slip_iterations {
            log::warn!(
                "slip iterations did not converge: residual {residual:e} after {} iterations",
                self.num_slip_iterations
            );
            return Ok(ConvergenceVerdict::Diverged("max slip iterations".to_string()));
        }

        self.apply_slip(system);
        self.num_slip_iterations += 1;
        self.slip_updates_in_solve = 0;
        Ok(ConvergenceVerdict::Iterate)
    }
}

fn sorted_captured(locator: &PenetrationLocator) -> Vec<&PenetrationInfo> {
    let mut infos: Vec<_> = locator
        .penetration_info()
        .values()
        .filter(|info| info.is_captured())
        .collect();
    infos.sort_unstable_by_key(|info| info.node);
    infos
}
