//! Node-on-face search between two stacked cubes.
//!
//! The lower unit cube is the primary body, its top side (side 5) is boundary 1. The bottom
//! nodes of a smaller cube resting on it form the secondary boundary 2.

#[macro_use]
extern crate approx;

use kerf::contact::{
    find_contact_point, ContactConfig, ContactFields, LocatorConfig, MechStatus,
    MechanicalContact, PenetrationLocator,
};
use kerf::fe::LagrangeEvaluator;
use kerf::math::{Point, Real, Vector};
use kerf::mesh::{ElemType, Mesh, NodeId};

fn hex_nodes(mesh: &mut Mesh, lo: Real, hi: Real, z0: Real) -> Vec<NodeId> {
    let corners = [(lo, lo), (hi, lo), (hi, hi), (lo, hi)];
    let mut ids = Vec::new();
    for z in [z0, z0 + hi - lo] {
        for (x, y) in corners {
            ids.push(mesh.add_node(Point::new(x, y, z)));
        }
    }
    ids
}

fn stacked_cubes(gap: Real) -> (Mesh, Vec<NodeId>) {
    let mut mesh = Mesh::new(3);
    let lower = hex_nodes(&mut mesh, 0.0, 1.0, 0.0);
    let upper = hex_nodes(&mut mesh, 0.25, 0.75, 1.0 + gap);
    let e0 = mesh.add_elem(ElemType::Hex8, &lower).unwrap();
    let _ = mesh.add_elem(ElemType::Hex8, &upper).unwrap();
    mesh.add_side_boundary(e0, 5, 1).unwrap();
    for n in &upper[..4] {
        mesh.add_node_boundary(*n, 2).unwrap();
    }
    (mesh, upper[..4].to_vec())
}

#[test]
fn penetrating_block_projects_on_the_top_face() {
    let (mesh, secondary) = stacked_cubes(-0.02);
    let mut locator = PenetrationLocator::new(&mesh, 1, 2, LocatorConfig::default()).unwrap();
    locator.detect_penetration(&mesh).unwrap();

    assert_eq!(locator.penetration_info().len(), secondary.len());
    for n in secondary {
        let info = locator.info(n).unwrap();
        let p = mesh.node(n).unwrap();
        assert_eq!(info.elem, 0);
        assert_relative_eq!(info.distance, 0.02, epsilon = 1.0e-10);
        assert_relative_eq!(info.normal, Vector::z(), epsilon = 1.0e-10);
        assert_relative_eq!(
            info.closest_point,
            Point::new(p.x, p.y, 1.0),
            epsilon = 1.0e-10
        );
    }
}

#[test]
fn separated_block_has_a_negative_distance() {
    let (mut mesh, secondary) = stacked_cubes(0.05);
    let mut locator = PenetrationLocator::new(&mesh, 1, 2, LocatorConfig::default()).unwrap();
    locator.detect_penetration(&mesh).unwrap();

    for n in &secondary {
        assert_relative_eq!(locator.info(*n).unwrap().distance, -0.05, epsilon = 1.0e-10);
    }

    // Pushing the block down updates the same contact entries.
    for n in &secondary {
        let p = *mesh.node(*n).unwrap();
        mesh.set_node(*n, Point::new(p.x, p.y, 0.99)).unwrap();
    }
    locator.detect_penetration(&mesh).unwrap();
    for n in &secondary {
        assert_relative_eq!(locator.info(*n).unwrap().distance, 0.01, epsilon = 1.0e-10);
    }
}

#[test]
fn random_placements_on_the_top_face() {
    let mut rng = oorandom::Rand64::new(42);
    for _ in 0..20 {
        let lo = rng.rand_float() * 0.5;
        let gap = -0.1 * rng.rand_float() - 1.0e-3;

        let mut mesh = Mesh::new(3);
        let lower = hex_nodes(&mut mesh, 0.0, 1.0, 0.0);
        let upper = hex_nodes(&mut mesh, lo, lo + 0.5, 1.0 + gap);
        let e0 = mesh.add_elem(ElemType::Hex8, &lower).unwrap();
        let _ = mesh.add_elem(ElemType::Hex8, &upper).unwrap();
        mesh.add_side_boundary(e0, 5, 1).unwrap();
        for n in &upper[..4] {
            mesh.add_node_boundary(*n, 2).unwrap();
        }

        let mut locator = PenetrationLocator::new(&mesh, 1, 2, LocatorConfig::default()).unwrap();
        locator.detect_penetration(&mesh).unwrap();
        for n in &upper[..4] {
            let info = locator.info(*n).unwrap();
            assert_eq!(info.elem, e0);
            assert_relative_eq!(info.distance, -gap, epsilon = 1.0e-10);
        }
    }
}

// A unit compressive residual on every node.
struct Pressed;

impl ContactFields for Pressed {
    fn residual(&self, _node: NodeId) -> Vector<Real> {
        Vector::z()
    }

    fn nodal_area(&self, _node: NodeId) -> Real {
        1.0
    }
}

#[test]
fn node_hovering_over_the_face_centre_is_captured() {
    let mut mesh = Mesh::new(3);
    let cube = hex_nodes(&mut mesh, 0.0, 1.0, 0.0);
    let e0 = mesh.add_elem(ElemType::Hex8, &cube).unwrap();
    mesh.add_side_boundary(e0, 5, 1).unwrap();
    let node = mesh.add_node(Point::new(0.5, 0.5, 1.01));
    mesh.add_node_boundary(node, 2).unwrap();

    let config = ContactConfig {
        tangential_tolerance: 1.0e-3,
        capture_tolerance: 0.02,
        ..ContactConfig::default()
    };
    let mut locator = PenetrationLocator::new(&mesh, 1, 2, config.locator_config()).unwrap();
    let mut contact = MechanicalContact::new(config).unwrap();
    locator.detect_penetration(&mesh).unwrap();

    let info = locator.info(node).unwrap();
    assert_eq!((info.elem, info.side_num), (e0, 5));
    assert_relative_eq!(info.distance, -0.01, epsilon = 1.0e-10);
    assert_relative_eq!(info.closest_point, Point::new(0.5, 0.5, 1.0), epsilon = 1.0e-10);
    assert_eq!(info.tangential_distance, 0.0);
    assert!(info.off_edge_nodes.is_empty());
    assert!(!info.is_captured());

    let mut projected = info.clone();
    let report = find_contact_point(
        &mut projected,
        &mut LagrangeEvaluator::default(),
        &mesh.elem_points(e0).unwrap(),
        mesh.node(node).unwrap(),
        true,
        &locator.config().projection,
    )
    .unwrap();
    assert!(report.search_succeeded);
    assert!(report.contact_point_on_side);

    // The gap is within the capture tolerance.
    contact
        .update_contact_forces(&mut locator, &mesh, &Pressed, true)
        .unwrap();
    let info = locator.info(node).unwrap();
    assert!(info.is_captured());
    assert_eq!(info.mech_status, MechStatus::Slipping);
    assert_eq!(info.locked_this_step, 1);
    assert_relative_eq!(info.contact_force, -Vector::z(), epsilon = 1.0e-12);
    assert!(contact.contact_set().contains(&node));
}
