//! Contact forces and the contact state machine of the secondary nodes.

use std::collections::BTreeSet;

use crate::contact::{
    ConfigError, ContactConfig, ContactError, ContactFormulation, ContactModel, MechStatus,
    PenetrationInfo, PenetrationLocator,
};
use crate::math::{Point, Real, Vector};
use crate::mesh::{Mesh, NodeId};
use crate::utils::{self, Communicator};

/// The nodal fields of the host solver read by the contact constraint.
pub trait ContactFields {
    /// The residual of the displacement equations at a node, before contact forces are applied.
    fn residual(&self, node: NodeId) -> Vector<Real>;
    /// The area (length in 2D) of the contact surface attributed to a node.
    fn nodal_area(&self, node: NodeId) -> Real;
    /// An offset added to the gap of a node.
    fn gap_offset(&self, _node: NodeId) -> Real {
        0.0
    }
}

/// The reason the augmented Lagrangian iterations have not converged.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum AugmentedLagrangeViolation {
    /// A captured node penetrates beyond the penetration tolerance.
    Penetration = 1,
    /// A sticking node slips beyond the incremental slip tolerance.
    IncrementalSlip = 2,
    /// A frictional force exceeds the friction capacity beyond the force tolerance.
    FrictionalForce = 3,
}

impl AugmentedLagrangeViolation {
    fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::Penetration),
            2 => Some(Self::IncrementalSlip),
            3 => Some(Self::FrictionalForce),
            _ => None,
        }
    }
}

/// Computes the contact forces of captured secondary nodes and evolves their capture,
/// stick and slip states.
#[derive(Clone, Debug)]
pub struct MechanicalContact {
    config: ContactConfig,
    time_step: u32,
    lagrangian_iteration: u32,
    current_contact_state: BTreeSet<NodeId>,
    old_contact_state: BTreeSet<NodeId>,
}

impl MechanicalContact {
    /// A contact constraint with the given configuration.
    pub fn new(config: ContactConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(MechanicalContact {
            config,
            time_step: 0,
            lagrangian_iteration: 0,
            current_contact_state: BTreeSet::new(),
            old_contact_state: BTreeSet::new(),
        })
    }

    /// The configuration.
    pub fn config(&self) -> &ContactConfig {
        &self.config
    }

    /// The current time step number. Step 1 is the first step.
    pub fn time_step(&self) -> u32 {
        self.time_step
    }

    /// Sets the current time step number.
    pub fn set_time_step(&mut self, time_step: u32) {
        self.time_step = time_step;
    }

    /// Sets the number of augmented Lagrangian iterations performed in the current step.
    pub fn set_lagrangian_iteration(&mut self, iteration: u32) {
        self.lagrangian_iteration = iteration;
    }

    /// The nodes found in contact by the last call to [`Self::update_contact_forces`].
    pub fn contact_set(&self) -> &BTreeSet<NodeId> {
        &self.old_contact_state
    }

    /// The nodal area of `node`.
    ///
    /// A zero area is replaced by 1 during the first step, before the areas are computed,
    /// and is an error afterwards.
    pub fn nodal_area<C: ContactFields + ?Sized>(
        &self,
        fields: &C,
        node: NodeId,
    ) -> Result<Real, ContactError> {
        let area = fields.nodal_area(node);
        if area == 0.0 {
            if self.time_step > 1 {
                log::warn!("zero nodal area at node {node} after the first step");
                return Err(ContactError::ZeroNodalArea(node));
            }
            return Ok(1.0);
        }
        Ok(area)
    }

    /// The normal penalty of `node`.
    pub fn penalty<C: ContactFields + ?Sized>(
        &self,
        fields: &C,
        node: NodeId,
    ) -> Result<Real, ContactError> {
        self.scaled_penalty(self.config.penalty, fields, node)
    }

    /// The tangential penalty of `node`.
    pub fn tangential_penalty<C: ContactFields + ?Sized>(
        &self,
        fields: &C,
        node: NodeId,
    ) -> Result<Real, ContactError> {
        let base = self.config.tangential_penalty.unwrap_or(self.config.penalty);
        self.scaled_penalty(base, fields, node)
    }

    fn scaled_penalty<C: ContactFields + ?Sized>(
        &self,
        base: Real,
        fields: &C,
        node: NodeId,
    ) -> Result<Real, ContactError> {
        let mut penalty = base;
        if self.config.normalize_penalty {
            penalty *= self.nodal_area(fields, node)?;
        }
        Ok(penalty * self.config.penalty_multiplier.powi(self.lagrangian_iteration as i32))
    }

    /// Updates the contact force and state of every node tracked by `locator`.
    ///
    /// With `update_contact_set`, nodes may be captured and released; otherwise the contact
    /// set is frozen and only the forces of captured nodes are updated.
    pub fn update_contact_forces<C: ContactFields + ?Sized>(
        &mut self,
        locator: &mut PenetrationLocator,
        mesh: &Mesh,
        fields: &C,
        update_contact_set: bool,
    ) -> Result<(), ContactError> {
        let mut nodes: Vec<NodeId> = locator.penetration_info().keys().copied().collect();
        nodes.sort_unstable();

        for node in nodes {
            let point = *mesh.node(node)?;
            if let Some(info) = locator.info_mut(node) {
                self.compute_contact_force(info, &point, fields, update_contact_set)?;
                if info.is_captured() && update_contact_set {
                    let _ = self.current_contact_state.insert(node);
                }
            }
        }

        if update_contact_set {
            self.end_residual();
        }
        Ok(())
    }

    fn end_residual(&mut self) {
        if self.config.print_contact_nodes {
            if self.current_contact_state == self.old_contact_state {
                log::info!(
                    "Unchanged contact state. {} nodes in contact.",
                    self.current_contact_state.len()
                );
            } else {
                log::info!(
                    "Changed contact state. {} nodes in contact.",
                    self.current_contact_state.len()
                );
            }
        }

        std::mem::swap(&mut self.old_contact_state, &mut self.current_contact_state);
        self.current_contact_state.clear();
    }

    // The vector from the contact point to the node, lengthened by the gap offset.
    fn distance_vector(info: &PenetrationInfo, point: &Point<Real>, gap_offset: Real) -> Vector<Real> {
        let mut distance_vec = point - info.closest_point;
        let norm = distance_vec.norm();
        if norm != 0.0 {
            let unit = distance_vec / norm;
            distance_vec += unit * (gap_offset * info.normal.dot(&unit));
        }
        distance_vec
    }

    // The normal part of the vector from the contact point to the node, with the gap offset.
    fn normal_distance_vector(info: &PenetrationInfo, point: &Point<Real>, gap_offset: Real) -> Vector<Real> {
        info.normal * (info.normal.dot(&(point - info.closest_point)) + gap_offset)
    }

    /// Captures, updates the contact force of, and possibly releases one node at `point`.
    pub fn compute_contact_force<C: ContactFields + ?Sized>(
        &self,
        info: &mut PenetrationInfo,
        point: &Point<Real>,
        fields: &C,
        update_contact_set: bool,
    ) -> Result<(), ContactError> {
        let node = info.node;
        let res = fields.residual(node);
        let gap_offset = fields.gap_offset(node);
        let mut distance_vec = Self::distance_vector(info, point, gap_offset);
        let gap = -info.normal.dot(&distance_vec);
        let n = info.normal;
        let cfg = &self.config;

        let mut newly_captured = false;
        if update_contact_set
            && !info.is_captured()
            && utils::absolute_fuzzy_greater_equal(gap, 0.0, cfg.capture_tolerance)
        {
            newly_captured = true;
            info.capture();
            if matches!(
                cfg.formulation,
                ContactFormulation::Kinematic | ContactFormulation::TangentialPenalty
            ) {
                info.locked_this_step += 1;
            }
        }

        if !info.is_captured() {
            return Ok(());
        }

        let penalty = self.penalty(fields, node)?;
        let penalty_slip = self.tangential_penalty(fields, node)?;
        let mut pen_force = distance_vec * penalty;
        let old_tangential = info.contact_force_old - n * n.dot(&info.contact_force_old);

        match cfg.model {
            ContactModel::Frictionless => {
                info.contact_force = match cfg.formulation {
                    ContactFormulation::Penalty => n * n.dot(&pen_force),
                    ContactFormulation::AugmentedLagrange => {
                        n * n.dot(&(pen_force + n * info.lagrange_multiplier))
                    }
                    // The tangential penalty formulation is rejected for frictionless contact.
                    _ => -n * n.dot(&res),
                };
                info.mech_status = MechStatus::Slipping;
            }
            ContactModel::Coulomb | ContactModel::CoulombMp => match cfg.formulation {
                ContactFormulation::Kinematic => {
                    let capacity = cfg.friction_coefficient * res.dot(&n).max(0.0);
                    info.contact_force = -res;
                    let force_normal = n * info.contact_force.dot(&n);
                    let force_tangential = info.contact_force - force_normal;
                    let tangential_inc_slip =
                        info.incremental_slip - n * info.incremental_slip.dot(&n);
                    let tan_mag = force_tangential.norm();
                    let tangential_inc_slip_mag = tangential_inc_slip.norm();
                    let slip_tol = capacity / penalty;
                    info.slip_tol = slip_tol;

                    if (tangential_inc_slip_mag > slip_tol || tan_mag > capacity)
                        && (info.stick_locked_this_step < cfg.stick_lock_iterations
                            || tan_mag > capacity * cfg.stick_unlock_factor)
                    {
                        if info.stick_locked_this_step >= cfg.stick_lock_iterations {
                            info.stick_locked_this_step = 0;
                        }

                        let mut slipped_too_far = None;
                        if tangential_inc_slip_mag > slip_tol {
                            let direction = tangential_inc_slip / tangential_inc_slip_mag;
                            if direction.dot(&force_tangential) < capacity {
                                slipped_too_far = Some(direction);
                            }
                        }

                        info.contact_force = match slipped_too_far {
                            // Slip back along the slip increment.
                            Some(direction) => force_normal + direction * capacity,
                            None if tan_mag > 0.0 => {
                                force_normal + force_tangential * (capacity / tan_mag)
                            }
                            None => force_normal,
                        };
                        info.mech_status = if capacity == 0.0 {
                            MechStatus::Slipping
                        } else {
                            MechStatus::SlippingFriction
                        };
                    } else {
                        if info.mech_status != MechStatus::Sticking
                            && info.mech_status != MechStatus::NoContact
                        {
                            info.stick_locked_this_step += 1;
                        }
                        info.mech_status = MechStatus::Sticking;
                    }
                }
                ContactFormulation::Penalty => {
                    distance_vec =
                        info.incremental_slip + Self::normal_distance_vector(info, point, gap_offset);
                    pen_force = distance_vec * penalty;
                    let capacity = cfg.friction_coefficient * res.dot(&n).max(0.0);

                    info.contact_force = pen_force + old_tangential;
                    let force_normal = n * info.contact_force.dot(&n);
                    let force_tangential = info.contact_force - force_normal;
                    let tan_mag = force_tangential.norm();

                    if tan_mag > capacity {
                        info.contact_force = force_normal + force_tangential * (capacity / tan_mag);
                        info.mech_status = friction_slip_status(capacity);
                    } else {
                        info.mech_status = MechStatus::Sticking;
                    }
                }
                ContactFormulation::AugmentedLagrange => {
                    distance_vec = Self::normal_distance_vector(info, point, gap_offset);
                    let force_normal = distance_vec * penalty + n * info.lagrange_multiplier;
                    let tangential_inc_slip =
                        info.incremental_slip - n * info.incremental_slip.dot(&n);
                    let force_tangential = info.lagrange_multiplier_slip + old_tangential;
                    let inc_pen_force_tangential = tangential_inc_slip * penalty_slip;

                    info.contact_force = if info.mech_status == MechStatus::Sticking {
                        force_normal + force_tangential + inc_pen_force_tangential
                    } else {
                        force_normal + force_tangential
                    };
                }
                ContactFormulation::TangentialPenalty => {
                    let capacity = cfg.friction_coefficient * res.dot(&n).max(0.0);
                    let force_normal = n * (-res.dot(&n));
                    let force_tangential = info.incremental_slip * penalty + old_tangential;
                    let tan_mag = force_tangential.norm();

                    if tan_mag > capacity {
                        info.contact_force = force_normal + force_tangential * (capacity / tan_mag);
                        info.mech_status = friction_slip_status(capacity);
                    } else {
                        info.contact_force = force_normal + force_tangential;
                        info.mech_status = MechStatus::Sticking;
                    }
                }
            },
            ContactModel::Glued => {
                info.contact_force = match cfg.formulation {
                    ContactFormulation::Penalty => pen_force,
                    ContactFormulation::AugmentedLagrange => {
                        pen_force
                            + utils::normalize_or_keep(distance_vec) * info.lagrange_multiplier
                    }
                    _ => -res,
                };
                info.mech_status = MechStatus::Sticking;
            }
        }

        // Release nodes in tension.
        if update_contact_set
            && cfg.model != ContactModel::Glued
            && info.is_captured()
            && !newly_captured
            && cfg.tension_release >= 0.0
            && info.locked_this_step < 2
        {
            let contact_pressure = -n.dot(&info.contact_force) / self.nodal_area(fields, node)?;
            if -contact_pressure >= cfg.tension_release {
                info.release();
                info.contact_force = Vector::zeros();
            }
        }

        Ok(())
    }

    /// The contribution of the contact constraint to the residual of a secondary node.
    ///
    /// The contribution to the residual of the primary face is the opposite.
    pub fn residual<C: ContactFields + ?Sized>(
        &self,
        info: &PenetrationInfo,
        point: &Point<Real>,
        fields: &C,
    ) -> Result<Vector<Real>, ContactError> {
        let mut resid = info.contact_force;
        let n = info.normal;
        let gap_offset = fields.gap_offset(info.node);

        match (self.config.formulation, self.config.model) {
            (ContactFormulation::Kinematic, model) => {
                let distance_vec = Self::distance_vector(info, point, gap_offset);
                let penalty = self.penalty(fields, info.node)?;
                match model {
                    ContactModel::Frictionless => resid += n * n.dot(&(distance_vec * penalty)),
                    ContactModel::Coulomb | ContactModel::CoulombMp => {
                        let pen_force = (distance_vec - info.incremental_slip) * penalty;
                        if matches!(
                            info.mech_status,
                            MechStatus::Slipping | MechStatus::SlippingFriction
                        ) {
                            resid += n * n.dot(&pen_force);
                        } else {
                            resid += pen_force;
                        }
                    }
                    ContactModel::Glued => resid += distance_vec * penalty,
                }
            }
            (ContactFormulation::TangentialPenalty, model) if model.is_coulomb() => {
                let distance_vec = Self::normal_distance_vector(info, point, gap_offset);
                let penalty = self.penalty(fields, info.node)?;
                resid += n * n.dot(&(distance_vec * penalty));
            }
            _ => {}
        }

        Ok(resid)
    }

    /// Rolls the step history of every record.
    ///
    /// At the beginning of a step following a converged solve, the current values become the
    /// old values. After a failed solve, records created during the failed step are dropped.
    pub fn update_contact_stateful_data(
        &self,
        locator: &mut PenetrationLocator,
        beginning_of_step: bool,
        last_solve_converged: bool,
    ) {
        let map = locator.penetration_info_mut();
        if beginning_of_step && !last_solve_converged {
            map.retain(|_, info| {
                !(info.mech_status_old == MechStatus::NoContact
                    && info.mech_status != MechStatus::NoContact)
            });
        }

        for info in map.values_mut() {
            if beginning_of_step {
                if last_solve_converged {
                    info.contact_force_old = info.contact_force;
                    info.accumulated_slip_old = info.accumulated_slip;
                    info.frictional_energy_old = info.frictional_energy;
                    info.mech_status_old = info.mech_status;
                }

                info.locked_this_step = 0;
                info.stick_locked_this_step = 0;
                info.starting_elem = info.elem;
                info.starting_side_num = info.side_num;
                info.starting_closest_point_ref = info.closest_point_ref;
            }
            info.incremental_slip_prev_iter = info.incremental_slip;
        }
    }

    /// Prepares a new time step: rolls the history and resets the augmented Lagrangian
    /// iteration count.
    pub fn timestep_setup<C: ContactFields + ?Sized>(
        &mut self,
        locator: &mut PenetrationLocator,
        mesh: &Mesh,
        fields: &C,
        last_solve_converged: bool,
    ) -> Result<(), ContactError> {
        self.time_step += 1;
        self.lagrangian_iteration = 0;
        self.update_contact_stateful_data(locator, true, last_solve_converged);
        if self.config.formulation == ContactFormulation::AugmentedLagrange {
            self.update_augmented_lagrangian_multiplier(locator, mesh, fields, true)?;
        }
        Ok(())
    }

    /// Updates the augmented Lagrangian multipliers of the captured nodes.
    pub fn update_augmented_lagrangian_multiplier<C: ContactFields + ?Sized>(
        &self,
        locator: &mut PenetrationLocator,
        mesh: &Mesh,
        fields: &C,
        beginning_of_step: bool,
    ) -> Result<(), ContactError> {
        let cfg = &self.config;
        let ff_tol = cfg.al_frictional_force_tolerance.unwrap_or(0.0);

        for (node, info) in locator.penetration_info_mut().iter_mut() {
            let point = mesh.node(*node)?;
            let n = info.normal;
            let distance = n.dot(&(info.closest_point - point)) - fields.gap_offset(*node);

            if beginning_of_step && cfg.model.is_coulomb() {
                info.lagrange_multiplier_slip = Vector::zeros();
                if info.is_captured() {
                    info.mech_status = MechStatus::Sticking;
                }
            }

            if !info.is_captured() {
                continue;
            }

            if cfg.model == ContactModel::Frictionless {
                info.lagrange_multiplier -= self.penalty(fields, *node)? * distance;
            }

            if cfg.model.is_coulomb() && !beginning_of_step {
                let penalty = self.penalty(fields, *node)?;
                let pen_force_normal = n * (penalty * -distance) + n * info.lagrange_multiplier;
                info.lagrange_multiplier += penalty * -distance;

                let capacity = cfg.friction_coefficient * (-pen_force_normal.dot(&n)).max(0.0);
                let tangential_inc_slip = info.incremental_slip - n * info.incremental_slip.dot(&n);
                let penalty_slip = self.tangential_penalty(fields, *node)?;
                let inc_pen_force_tangential =
                    info.lagrange_multiplier_slip + tangential_inc_slip * penalty_slip;
                let tau_old = info.contact_force_old - n * n.dot(&info.contact_force_old);
                let force_tangential = inc_pen_force_tangential + tau_old;
                let tan_mag = force_tangential.norm();

                if tan_mag > capacity * (ff_tol + 1.0) {
                    info.lagrange_multiplier_slip = -tau_old + force_tangential * (capacity / tan_mag);
                    info.mech_status = friction_slip_status(capacity);
                } else {
                    info.mech_status = MechStatus::Sticking;
                    info.lagrange_multiplier_slip += tangential_inc_slip * penalty_slip;
                }
            }
        }

        Ok(())
    }

    /// Checks the augmented Lagrangian tolerances over every partition.
    ///
    /// Returns the violation found, if any.
    pub fn augmented_lagrangian_contact_converged<C: ContactFields + ?Sized>(
        &self,
        locator: &PenetrationLocator,
        mesh: &Mesh,
        fields: &C,
        comm: &dyn Communicator,
    ) -> Result<Option<AugmentedLagrangeViolation>, ContactError> {
        let cfg = &self.config;
        let pen_tol = cfg.al_penetration_tolerance.unwrap_or(0.0);
        let slip_tol = cfg.al_incremental_slip_tolerance.unwrap_or(0.0);
        let ff_tol = cfg.al_frictional_force_tolerance.unwrap_or(0.0);

        let mut nodes: Vec<NodeId> = locator.penetration_info().keys().copied().collect();
        nodes.sort_unstable();

        let mut code = 0;
        let mut contact_residual: Real = 0.0;

        for node in nodes {
            let Some(info) = locator.info(node) else {
                continue;
            };
            if !info.is_captured() {
                continue;
            }

            let point = mesh.node(node)?;
            let n = info.normal;
            let gap_offset = fields.gap_offset(node);
            let distance = n.dot(&(info.closest_point - point)) - gap_offset;

            contact_residual = contact_residual.max(distance.abs());
            if contact_residual > pen_tol {
                code = 1;
                break;
            }

            if cfg.model.is_coulomb() {
                let force_normal = n * info.contact_force.dot(&n);
                let force_tangential = info.contact_force - force_normal;
                let tangential_inc_slip = info.incremental_slip - n * info.incremental_slip.dot(&n);
                let tan_mag = force_tangential.norm();

                let distance_vec = Self::normal_distance_vector(info, point, gap_offset);
                let pen_force_normal =
                    distance_vec * self.penalty(fields, node)? + n * info.lagrange_multiplier;
                let capacity = cfg.friction_coefficient * (-pen_force_normal.dot(&n)).max(0.0);

                if utils::absolute_fuzzy_less_than(tan_mag, capacity, utils::FUZZY_TOLERANCE)
                    && info.mech_status == MechStatus::Sticking
                    && utils::absolute_fuzzy_greater_than(
                        tangential_inc_slip.norm(),
                        slip_tol,
                        utils::FUZZY_TOLERANCE,
                    )
                {
                    code = 2;
                    break;
                }

                if tan_mag > (1.0 + ff_tol) * (capacity + ff_tol) {
                    code = 3;
                    break;
                }
            }
        }

        let violation = AugmentedLagrangeViolation::from_code(comm.max_code(code));
        match violation {
            Some(AugmentedLagrangeViolation::Penetration) => {
                log::info!("The augmented Lagrangian contact penetration enforcement is not satisfied")
            }
            Some(AugmentedLagrangeViolation::IncrementalSlip) => log::info!(
                "The augmented Lagrangian contact tangential sliding enforcement is not satisfied"
            ),
            Some(AugmentedLagrangeViolation::FrictionalForce) => log::info!(
                "The augmented Lagrangian contact frictional force enforcement is not satisfied"
            ),
            None => {}
        }

        Ok(violation)
    }
}

fn friction_slip_status(capacity: Real) -> MechStatus {
    if utils::absolute_fuzzy_equal(capacity, 0.0, utils::FUZZY_TOLERANCE) {
        MechStatus::Slipping
    } else {
        MechStatus::SlippingFriction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::{ElemType, Side};

    struct Uniform {
        residual: Vector<Real>,
        area: Real,
    }

    impl ContactFields for Uniform {
        fn residual(&self, _node: NodeId) -> Vector<Real> {
            self.residual
        }

        fn nodal_area(&self, _node: NodeId) -> Real {
            self.area
        }
    }

    fn record(gap: Real) -> (PenetrationInfo, Point<Real>) {
        let side = Side {
            elem: 0,
            side: 2,
            ty: ElemType::Edge2,
            nodes: [2, 3].into_iter().collect(),
            points: [Point::new(1.0, 1.0, 0.0), Point::new(0.0, 1.0, 0.0)]
                .into_iter()
                .collect(),
        };
        let mut info = PenetrationInfo::new(9, 0, 2, side);
        info.normal = Vector::y();
        info.closest_point = Point::new(0.5, 1.0, 0.0);
        // A positive gap means the node is below the surface.
        (info, Point::new(0.5, 1.0 - gap, 0.0))
    }

    #[test]
    fn frictionless_kinematic_capture() {
        let contact = MechanicalContact::new(ContactConfig {
            capture_tolerance: 0.02,
            ..ContactConfig::default()
        })
        .unwrap();
        let fields = Uniform {
            residual: Vector::new(0.3, 2.0, 0.0),
            area: 1.0,
        };

        let (mut info, point) = record(-0.01);
        contact
            .compute_contact_force(&mut info, &point, &fields, true)
            .unwrap();
        assert!(info.is_captured());
        assert_eq!(info.mech_status, MechStatus::Slipping);
        assert_eq!(info.locked_this_step, 1);
        assert_relative_eq!(info.contact_force, Vector::new(0.0, -2.0, 0.0));

        let (mut far, point) = record(-0.05);
        contact
            .compute_contact_force(&mut far, &point, &fields, true)
            .unwrap();
        assert!(!far.is_captured());
    }

    #[test]
    fn tension_releases_and_lock_prevents_chatter() {
        let contact = MechanicalContact::new(ContactConfig::default()).unwrap();
        let pulling = Uniform {
            residual: Vector::new(0.0, -1.0, 0.0),
            area: 1.0,
        };

        let (mut info, point) = record(0.001);
        info.capture();
        info.locked_this_step = 1;
        contact
            .compute_contact_force(&mut info, &point, &pulling, true)
            .unwrap();
        assert!(!info.is_captured());
        assert_eq!(info.contact_force, Vector::zeros());

        // Recaptured in the same step: the lock now keeps the node in contact.
        contact
            .compute_contact_force(&mut info, &point, &pulling, true)
            .unwrap();
        assert!(info.is_captured());
        assert_eq!(info.locked_this_step, 2);
        contact
            .compute_contact_force(&mut info, &point, &pulling, true)
            .unwrap();
        assert!(info.is_captured());
    }

    #[test]
    fn coulomb_kinematic_stick_and_slip() {
        let contact = MechanicalContact::new(ContactConfig {
            model: ContactModel::Coulomb,
            friction_coefficient: 0.5,
            penalty: 1.0e6,
            ..ContactConfig::default()
        })
        .unwrap();

        let (mut info, point) = record(0.0);
        info.capture();
        let sticking = Uniform {
            residual: Vector::new(0.4, 1.0, 0.0),
            area: 1.0,
        };
        contact
            .compute_contact_force(&mut info, &point, &sticking, false)
            .unwrap();
        assert_eq!(info.mech_status, MechStatus::Sticking);
        assert_relative_eq!(info.contact_force, Vector::new(-0.4, -1.0, 0.0));

        let slipping = Uniform {
            residual: Vector::new(2.0, 1.0, 0.0),
            area: 1.0,
        };
        contact
            .compute_contact_force(&mut info, &point, &slipping, false)
            .unwrap();
        assert_eq!(info.mech_status, MechStatus::SlippingFriction);
        assert_relative_eq!(info.contact_force, Vector::new(-0.5, -1.0, 0.0), epsilon = 1.0e-12);
    }

    #[test]
    fn zero_nodal_area_after_first_step() {
        let mut contact = MechanicalContact::new(ContactConfig::default()).unwrap();
        let fields = Uniform {
            residual: Vector::zeros(),
            area: 0.0,
        };
        contact.set_time_step(1);
        assert_eq!(contact.nodal_area(&fields, 4), Ok(1.0));
        contact.set_time_step(2);
        assert_eq!(contact.nodal_area(&fields, 4), Err(ContactError::ZeroNodalArea(4)));
    }
}
