//! Cutting a two-element quadrilateral strip with geometric and state-driven cracks.
//!
//! The strip covers `[0, 2] x [0, 1]`. Nodes 0 to 2 lie on the bottom edge and 3 to 5 on
//! the top one. Side 3 of element 0 is its left edge.

#[macro_use]
extern crate approx;

use kerf::fe::gauss_rule;
use kerf::math::{Point, Real, Vector};
use kerf::mesh::{ElemId, ElemType, Mesh, NodeId};
use kerf::xfem::{
    LineSegmentCut, NoTransfer, SolutionStates, SolutionTransfer, Xfem, XfemConfig, XfemError,
    XfemQRule,
};

fn strip() -> Mesh {
    let mut mesh = Mesh::new(2);
    for y in 0..2 {
        for x in 0..3 {
            let _ = mesh.add_node(Point::new(x as Real, y as Real, 0.0));
        }
    }
    let _ = mesh.add_elem(ElemType::Quad4, &[0, 1, 4, 3]).unwrap();
    let _ = mesh.add_elem(ElemType::Quad4, &[1, 2, 5, 4]).unwrap();
    mesh
}

#[derive(Default)]
struct RecordingTransfer {
    nodes: Vec<(NodeId, NodeId)>,
    elems: Vec<(ElemId, ElemId)>,
}

impl SolutionTransfer for RecordingTransfer {
    fn states(&self) -> SolutionStates {
        SolutionStates::TRANSIENT
    }

    fn copy_node_data(&mut self, parent: NodeId, child: NodeId, states: SolutionStates) {
        assert_eq!(states, SolutionStates::TRANSIENT);
        self.nodes.push((parent, child));
    }

    fn copy_elem_data(&mut self, parent: ElemId, child: ElemId, states: SolutionStates) {
        assert_eq!(states, SolutionStates::TRANSIENT);
        self.elems.push((parent, child));
    }
}

#[test]
fn crack_through_the_strip() {
    let mut mesh = strip();
    mesh.add_side_boundary(0, 0, 1).unwrap();
    mesh.add_node_boundary(0, 2).unwrap();
    let mut displaced = mesh.clone();

    let mut xfem = Xfem::default();
    xfem.add_geometric_cut(Box::new(LineSegmentCut::new(-0.5, 0.5, 2.5, 0.5)));
    let mut transfer = RecordingTransfer::default();

    assert!(xfem
        .update(1.0, &mut mesh, Some(&mut displaced), &mut transfer)
        .unwrap());

    assert_eq!(mesh.n_elems(), 4);
    assert_eq!(mesh.n_nodes(), 12);
    assert_eq!(displaced.n_elems(), 4);
    assert_eq!(displaced.n_nodes(), 12);
    assert!(mesh.elem(0).is_err() && mesh.elem(1).is_err());
    assert_eq!(xfem.sibling_elems().len(), 2);
    assert!(xfem.crack_tip_elems().is_empty());

    // Every new node sits on the node it was copied from.
    assert_eq!(transfer.nodes.len(), 6);
    for &(parent, child) in &transfer.nodes {
        assert_eq!(xfem.new_node_parent(child), Some(parent));
        assert_eq!(mesh.node(child).unwrap(), mesh.node(parent).unwrap());
        assert_eq!(displaced.node(child).unwrap(), mesh.node(parent).unwrap());
        if parent == 0 {
            assert_eq!(mesh.node_boundary_ids(child), &[2]);
        }
    }

    // Children keep the block and the side sets of their parent.
    assert_eq!(transfer.elems.len(), 4);
    for &(parent, child) in &transfer.elems {
        let elem = mesh.elem(child).unwrap();
        assert_eq!(elem.ty, ElemType::Quad4);
        assert_eq!(displaced.elem(child).unwrap().nodes, elem.nodes);
        if parent == 0 {
            assert_eq!(mesh.side_boundary_ids(child, 0), &[1]);
        }
    }

    for (a, b) in xfem.sibling_elems() {
        assert!(mesh.elem(*a).is_ok() && mesh.elem(*b).is_ok());
    }

    for elem in mesh.elems() {
        assert!(xfem.is_elem_cut(elem.id));
        assert_relative_eq!(
            xfem.physical_volume_fraction(elem.id, &mesh).unwrap(),
            0.5,
            epsilon = 1.0e-12
        );
        for side in [1, 3] {
            assert_relative_eq!(
                xfem.physical_side_fraction(elem.id, side, &mesh).unwrap(),
                0.5,
                epsilon = 1.0e-12
            );
        }
        let edges = xfem.fragment_edges(elem.id, &mesh).unwrap();
        assert_eq!(edges.len(), 4);
        let (normal, points) = xfem.intersection_info(elem.id, 0, &mesh).unwrap().unwrap();
        assert_relative_eq!(normal.y.abs(), 1.0, epsilon = 1.0e-12);
        for p in points {
            assert_relative_eq!(p.y, 0.5, epsilon = 1.0e-12);
        }
    }

    // The crack is already there: nothing changes.
    assert!(!xfem
        .update(2.0, &mut mesh, Some(&mut displaced), &mut NoTransfer)
        .unwrap());
    assert_eq!(mesh.n_elems(), 4);
    assert_eq!(mesh.n_nodes(), 12);
}

#[test]
fn crack_grown_from_state_marks() {
    let mut mesh = strip();
    let mut xfem = Xfem::default();
    let normal = Vector::y();

    // Initiation from the middle of the left edge, crossing element 0.
    xfem.add_state_marked_elem_side(0, normal, 3).unwrap();
    assert!(xfem.update(1.0, &mut mesh, None, &mut NoTransfer).unwrap());
    assert_eq!(mesh.n_elems(), 3);
    assert_eq!(xfem.crack_tip_elems().len(), 1);

    let tip = *xfem.crack_tip_elems().iter().next().unwrap();
    assert!(xfem.is_elem_at_crack_tip(tip));
    assert!(!xfem.is_elem_cut(tip));
    let (origin, direction) = *xfem.crack_tip_origin_and_direction(tip).unwrap();
    assert_relative_eq!(origin, Point::new(1.0, 0.5, 0.0), epsilon = 1.0e-12);
    assert_relative_eq!(direction, Vector::x(), epsilon = 1.0e-12);
    assert_eq!(xfem.crack_tip_origins(), vec![(tip, origin)]);

    // Growth across the crack-tip element.
    xfem.add_state_marked_elem(tip, normal).unwrap();
    assert!(xfem.update(2.0, &mut mesh, None, &mut NoTransfer).unwrap());
    assert_eq!(mesh.n_elems(), 4);
    assert!(xfem.crack_tip_elems().is_empty());
    for elem in mesh.elems() {
        assert_relative_eq!(
            xfem.physical_volume_fraction(elem.id, &mesh).unwrap(),
            0.5,
            epsilon = 1.0e-12
        );
    }
}

#[test]
fn moment_fitted_weights_integrate_the_physical_half() {
    let mut mesh = strip();
    let config = XfemConfig {
        qrule: XfemQRule::MomentFitting,
        ..XfemConfig::default()
    };
    let mut xfem = Xfem::new(config);
    xfem.add_geometric_cut(Box::new(LineSegmentCut::new(-0.5, 0.5, 2.5, 0.5)));
    assert!(xfem.update(1.0, &mut mesh, None, &mut NoTransfer).unwrap());

    let rule = gauss_rule(ElemType::Quad4);
    for elem in mesh.elems() {
        let weights = xfem.xfem_weights(elem.id, &rule, &mesh).unwrap().unwrap();
        // Unit squares map [-1, 1]² with a jacobian of 1/4.
        let area: Real = weights
            .iter()
            .zip(rule.weights.iter())
            .map(|(m, w)| m * w * 0.25)
            .sum();
        assert_relative_eq!(area, 0.5, epsilon = 1.0e-10);
    }
}

#[test]
fn uncut_elements_keep_their_weights() {
    let mesh = strip();
    let xfem = Xfem::default();
    let rule = gauss_rule(ElemType::Quad4);
    assert_eq!(xfem.xfem_weights(0, &rule, &mesh).unwrap(), None);
    assert_eq!(xfem.physical_volume_fraction(0, &mesh).unwrap(), 1.0);
    assert!(xfem.cut_plane(0, 0, &mesh).unwrap().is_none());
}

#[test]
fn invalid_meshes_and_marks() {
    let mut line = Mesh::new(1);
    let _ = line.add_node(Point::origin());
    let _ = line.add_node(Point::new(1.0, 0.0, 0.0));
    let _ = line.add_elem(ElemType::Edge2, &[0, 1]).unwrap();
    assert_eq!(
        Xfem::default().update(1.0, &mut line, None, &mut NoTransfer),
        Err(XfemError::UnsupportedMeshDimension(1))
    );

    let mut xfem = Xfem::default();
    xfem.add_state_marked_elem_side(0, Vector::y(), 3).unwrap();
    assert!(matches!(
        xfem.add_state_marked_elem_side(0, Vector::y(), 1),
        Err(XfemError::AlreadyMarked { elem: 0, .. })
    ));
}
