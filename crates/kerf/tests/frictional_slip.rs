//! Slip iterations on a small block pressed into a larger one and pushed sideways.
//!
//! Every bottom node of the upper block carries the same residual: a unit compressive normal
//! part and a tangential part that a spring of stiffness 8 relaxes as the node slides along x.

#[macro_use]
extern crate approx;

use std::collections::HashMap;

use kerf::contact::{
    ConvergenceVerdict, FrictionalSlipConfig, FrictionalSlipController, LocatorConfig,
    PenetrationLocator, SlipState, SlipSystem,
};
use kerf::math::{Point, Real, Vector};
use kerf::mesh::{ElemType, Mesh, NodeId};
use kerf::utils::SerialCommunicator;

const STIFFNESS: Real = 8.0;

fn pressed_blocks() -> (Mesh, Vec<NodeId>) {
    let mut mesh = Mesh::new(3);
    let mut lower = Vec::new();
    let mut upper = Vec::new();
    for (lo, hi, z0, ids) in [(0.0, 1.0, 0.0, &mut lower), (0.25, 0.75, 0.98, &mut upper)] {
        for z in [z0, z0 + hi - lo] {
            for (x, y) in [(lo, lo), (hi, lo), (hi, hi), (lo, hi)] {
                ids.push(mesh.add_node(Point::new(x, y, z)));
            }
        }
    }
    let e0 = mesh.add_elem(ElemType::Hex8, &lower).unwrap();
    let _ = mesh.add_elem(ElemType::Hex8, &upper).unwrap();
    mesh.add_side_boundary(e0, 5, 1).unwrap();
    for n in &upper[..4] {
        mesh.add_node_boundary(*n, 2).unwrap();
    }
    (mesh, upper[..4].to_vec())
}

fn captured_locator(mesh: &Mesh) -> PenetrationLocator {
    let mut locator = PenetrationLocator::new(mesh, 1, 2, LocatorConfig::default()).unwrap();
    locator.detect_penetration(mesh).unwrap();
    for info in locator.penetration_info_mut().values_mut() {
        info.incremental_slip = Vector::zeros();
        info.capture();
    }
    locator
}

struct Block<'a> {
    mesh: &'a Mesh,
    push: Real,
    relaxes: bool,
    displacement: HashMap<NodeId, Vector<Real>>,
}

impl<'a> Block<'a> {
    fn new(mesh: &'a Mesh, push: Real) -> Self {
        Block {
            mesh,
            push,
            relaxes: true,
            displacement: HashMap::new(),
        }
    }

    fn u(&self, node: NodeId) -> Vector<Real> {
        self.displacement
            .get(&node)
            .copied()
            .unwrap_or_else(Vector::zeros)
    }
}

impl SlipSystem for Block<'_> {
    fn residual(&self, node: NodeId) -> Vector<Real> {
        let relaxation = if self.relaxes {
            STIFFNESS * self.u(node).x
        } else {
            0.0
        };
        Vector::new(-self.push + relaxation, 0.0, 1.0)
    }

    fn diagonal_stiffness(&self, _node: NodeId) -> Vector<Real> {
        Vector::repeat(STIFFNESS)
    }

    fn add_displacement(&mut self, node: NodeId, delta: &Vector<Real>) {
        *self.displacement.entry(node).or_insert_with(Vector::zeros) += delta;
    }

    fn node_position(&self, node: NodeId) -> Point<Real> {
        *self.mesh.node(node).unwrap() + self.u(node)
    }
}

fn controller(max_slip_iterations: u32) -> FrictionalSlipController {
    FrictionalSlipController::new(FrictionalSlipConfig {
        friction_coefficient: 0.5,
        max_slip_iterations,
        slip_updates_per_iteration: 1,
        ..FrictionalSlipConfig::default()
    })
    .unwrap()
}

#[test]
fn rate_constraint_moves_nodes_onto_the_surface() {
    let (mesh, secondary) = pressed_blocks();
    let locator = captured_locator(&mesh);
    let mut block = Block::new(&mesh, 0.0);

    let moved = controller(10).enforce_rate_constraint(&locator, &mut block, &SerialCommunicator);
    assert_eq!(moved, secondary.len());
    for n in secondary {
        assert_relative_eq!(block.u(n), Vector::new(0.0, 0.0, 0.02), epsilon = 1.0e-10);
    }
}

#[test]
fn excess_friction_is_slipped_away() {
    let (mesh, secondary) = pressed_blocks();
    let locator = captured_locator(&mesh);
    let mut block = Block::new(&mesh, 2.0);
    let mut controller = controller(10);
    controller.timestep_setup();

    // One slip update is allowed while the solve iterates.
    assert_eq!(
        controller
            .check_nonlinear_convergence(&locator, &mut block, &SerialCommunicator, false)
            .unwrap(),
        ConvergenceVerdict::Iterate
    );
    for n in &secondary {
        assert_relative_eq!(block.u(*n).x, 0.1875, epsilon = 1.0e-12);
        assert_eq!(controller.slip_state(*n), Some(SlipState::Slipping));
    }
    assert_eq!(
        controller
            .check_nonlinear_convergence(&locator, &mut block, &SerialCommunicator, false)
            .unwrap(),
        ConvergenceVerdict::Iterate
    );
    assert_relative_eq!(block.u(secondary[0]).x, 0.1875, epsilon = 1.0e-12);

    // The tangential force now equals the friction capacity.
    assert_eq!(
        controller
            .check_nonlinear_convergence(&locator, &mut block, &SerialCommunicator, true)
            .unwrap(),
        ConvergenceVerdict::Converged
    );
    assert_eq!(controller.num_slip_iterations(), 0);
    for n in &secondary {
        assert_eq!(controller.slip_state(*n), Some(SlipState::Sticking));
    }
    assert!(controller.pending_slip().is_empty());
}

#[test]
fn slip_iterations_give_up_after_the_maximum() {
    let (mesh, secondary) = pressed_blocks();
    let locator = captured_locator(&mesh);
    let mut block = Block::new(&mesh, 2.0);
    block.relaxes = false;
    let mut controller = controller(1);
    controller.timestep_setup();

    let summary = controller.calculate_slip(&locator, &block, &SerialCommunicator);
    assert_eq!(summary.captured, secondary.len());
    assert_eq!(summary.slipping, secondary.len());
    assert_relative_eq!(summary.slip_residual, 3.0, epsilon = 1.0e-12);

    assert_eq!(
        controller
            .check_nonlinear_convergence(&locator, &mut block, &SerialCommunicator, true)
            .unwrap(),
        ConvergenceVerdict::Iterate
    );
    assert_eq!(controller.num_slip_iterations(), 1);
    assert!(matches!(
        controller
            .check_nonlinear_convergence(&locator, &mut block, &SerialCommunicator, true)
            .unwrap(),
        ConvergenceVerdict::Diverged(_)
    ));
}
