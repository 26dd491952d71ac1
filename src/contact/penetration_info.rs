use smallvec::SmallVec;

use crate::math::{Point, Real, Vector};
use crate::mesh::{ElemId, NodeId, Side};

/// The mechanical state of a contact interaction.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum MechStatus {
    /// The node is not in contact.
    #[default]
    NoContact,
    /// The node is in contact and sticks to the primary surface.
    Sticking,
    /// The node is in contact and slides without friction.
    Slipping,
    /// The node is in contact and slides with friction.
    SlippingFriction,
    /// The node is in contact; the stick/slip state is not resolved yet.
    Contact,
}

/// The contact state of one secondary node.
///
/// A record is created when the node first finds a reasonable contact candidate and is
/// dropped when no candidate survives a later search pass. `is_captured()` is true exactly
/// when `mech_status != MechStatus::NoContact`.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct PenetrationInfo {
    /// The secondary node.
    pub node: NodeId,
    /// The primary element in contact.
    pub elem: ElemId,
    /// The side of `elem` in contact.
    pub side: Side,
    /// The index of `side` in `elem`.
    pub side_num: usize,
    /// The outward unit normal of the primary surface at the contact point.
    pub normal: Vector<Real>,
    /// Signed normal distance; positive when the node penetrates the primary surface.
    pub distance: Real,
    /// Distance from the projection to the face when the projection falls off the face.
    pub tangential_distance: Real,
    /// The contact point, in physical coordinates.
    pub closest_point: Point<Real>,
    /// The contact point, in the reference coordinates of `side`.
    pub closest_point_ref: Point<Real>,
    /// The contact point clamped to the reference face.
    pub closest_point_on_face_ref: Point<Real>,
    /// The corner nodes bounding the region the projection was clamped to.
    pub off_edge_nodes: SmallVec<[NodeId; 2]>,
    /// The side shape functions at the contact point.
    pub side_phi: SmallVec<[Real; 4]>,
    /// `∂x/∂ξ` at the contact point.
    pub dxyzdxi: Vector<Real>,
    /// `∂x/∂η` at the contact point.
    pub dxyzdeta: Vector<Real>,
    /// `∂²x/∂ξ∂η` at the contact point.
    pub d2xyzdxideta: Vector<Real>,
    /// The primary element in contact at the beginning of the step.
    pub starting_elem: ElemId,
    /// The side in contact at the beginning of the step.
    pub starting_side_num: usize,
    /// The reference contact point at the beginning of the step.
    pub starting_closest_point_ref: Point<Real>,
    /// Slip since the beginning of the step.
    pub incremental_slip: Vector<Real>,
    /// `incremental_slip` at the previous nonlinear iteration.
    pub incremental_slip_prev_iter: Vector<Real>,
    /// Slip distance accumulated over the whole history.
    pub accumulated_slip: Real,
    /// `accumulated_slip` at the end of the previous step.
    pub accumulated_slip_old: Real,
    /// Energy dissipated by friction.
    pub frictional_energy: Real,
    /// `frictional_energy` at the end of the previous step.
    pub frictional_energy_old: Real,
    /// The contact force on the secondary node.
    pub contact_force: Vector<Real>,
    /// `contact_force` at the end of the previous step.
    pub contact_force_old: Vector<Real>,
    /// The normal augmented Lagrangian multiplier.
    pub lagrange_multiplier: Real,
    /// The tangential augmented Lagrangian multiplier.
    pub lagrange_multiplier_slip: Vector<Real>,
    /// Number of times the node was captured during the current step.
    pub locked_this_step: u32,
    /// Number of stick/slip switches during the current step.
    pub stick_locked_this_step: u32,
    /// The mechanical status.
    pub mech_status: MechStatus,
    /// The mechanical status at the end of the previous step.
    pub mech_status_old: MechStatus,
    /// Incremental slip below which the node is considered sticking.
    pub slip_tol: Real,
}

impl PenetrationInfo {
    /// A fresh record of `node` against `side` of `elem`, with no geometry computed yet.
    pub fn new(node: NodeId, elem: ElemId, side_num: usize, side: Side) -> Self {
        PenetrationInfo {
            node,
            elem,
            side,
            side_num,
            normal: Vector::zeros(),
            distance: 0.0,
            tangential_distance: 0.0,
            closest_point: Point::origin(),
            closest_point_ref: Point::origin(),
            closest_point_on_face_ref: Point::origin(),
            off_edge_nodes: SmallVec::new(),
            side_phi: SmallVec::new(),
            dxyzdxi: Vector::zeros(),
            dxyzdeta: Vector::zeros(),
            d2xyzdxideta: Vector::zeros(),
            starting_elem: elem,
            starting_side_num: side_num,
            starting_closest_point_ref: Point::origin(),
            incremental_slip: Vector::zeros(),
            incremental_slip_prev_iter: Vector::zeros(),
            accumulated_slip: 0.0,
            accumulated_slip_old: 0.0,
            frictional_energy: 0.0,
            frictional_energy_old: 0.0,
            contact_force: Vector::zeros(),
            contact_force_old: Vector::zeros(),
            lagrange_multiplier: 0.0,
            lagrange_multiplier_slip: Vector::zeros(),
            locked_this_step: 0,
            stick_locked_this_step: 0,
            mech_status: MechStatus::NoContact,
            mech_status_old: MechStatus::NoContact,
            slip_tol: 0.0,
        }
    }

    /// Is the node in contact?
    #[inline]
    pub fn is_captured(&self) -> bool {
        self.mech_status != MechStatus::NoContact
    }

    /// Was the node in contact at the end of the previous step?
    #[inline]
    pub fn was_captured(&self) -> bool {
        self.mech_status_old != MechStatus::NoContact
    }

    /// Puts the node in contact.
    #[inline]
    pub fn capture(&mut self) {
        self.mech_status = MechStatus::Contact;
    }

    /// Releases the node from contact.
    #[inline]
    pub fn release(&mut self) {
        self.mech_status = MechStatus::NoContact;
    }

    /// Carries the step history of `previous` over to this record.
    ///
    /// Without a previous record, the start-of-step geometry is initialized from this one.
    pub fn switch_from(&mut self, previous: Option<&PenetrationInfo>) {
        match previous {
            Some(old) => {
                self.starting_elem = old.starting_elem;
                self.starting_side_num = old.starting_side_num;
                self.starting_closest_point_ref = old.starting_closest_point_ref;
                self.incremental_slip = old.incremental_slip;
                self.accumulated_slip = old.accumulated_slip;
                self.accumulated_slip_old = old.accumulated_slip_old;
                self.frictional_energy = old.frictional_energy;
                self.frictional_energy_old = old.frictional_energy_old;
                self.contact_force = old.contact_force;
                self.contact_force_old = old.contact_force_old;
                self.lagrange_multiplier = old.lagrange_multiplier;
                self.lagrange_multiplier_slip = old.lagrange_multiplier_slip;
                self.locked_this_step = old.locked_this_step;
                self.stick_locked_this_step = old.stick_locked_this_step;
                self.mech_status = old.mech_status;
                self.mech_status_old = old.mech_status_old;
            }
            None => {
                self.starting_elem = self.elem;
                self.starting_side_num = self.side_num;
                self.starting_closest_point_ref = self.closest_point_ref;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::ElemType;

    fn side() -> Side {
        Side {
            elem: 3,
            side: 2,
            ty: ElemType::Edge2,
            nodes: [4, 5].into_iter().collect(),
            points: [Point::new(0.0, 1.0, 0.0), Point::new(1.0, 1.0, 0.0)]
                .into_iter()
                .collect(),
        }
    }

    #[test]
    fn capture_matches_status() {
        let mut info = PenetrationInfo::new(7, 3, 2, side());
        assert!(!info.is_captured());
        info.capture();
        assert!(info.is_captured());
        assert_eq!(info.mech_status, MechStatus::Contact);
        info.release();
        assert!(!info.is_captured());
    }

    #[test]
    fn switch_copies_history() {
        let mut old = PenetrationInfo::new(7, 3, 2, side());
        old.accumulated_slip = 0.25;
        old.contact_force = Vector::new(1.0, 2.0, 3.0);
        old.mech_status = MechStatus::Sticking;
        old.locked_this_step = 1;
        old.starting_closest_point_ref = Point::new(0.5, 0.0, 0.0);

        let mut new = PenetrationInfo::new(7, 8, 1, side());
        new.closest_point_ref = Point::new(-0.3, 0.0, 0.0);
        new.switch_from(Some(&old));
        assert_eq!(new.accumulated_slip, 0.25);
        assert_eq!(new.contact_force, old.contact_force);
        assert_eq!(new.mech_status, MechStatus::Sticking);
        assert_eq!(new.locked_this_step, 1);
        assert_eq!(new.starting_elem, 3);
        assert_eq!(new.starting_closest_point_ref, Point::new(0.5, 0.0, 0.0));

        let mut fresh = PenetrationInfo::new(7, 8, 1, side());
        fresh.closest_point_ref = Point::new(-0.3, 0.0, 0.0);
        fresh.switch_from(None);
        assert_eq!(fresh.starting_elem, 8);
        assert_eq!(fresh.starting_side_num, 1);
        assert_eq!(fresh.starting_closest_point_ref, Point::new(-0.3, 0.0, 0.0));
    }
}
