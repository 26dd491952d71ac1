//! Topology updates of small quadrilateral meshes cut by a crack.
//!
//! Node 0 is the top-left corner and elements are listed counter-clockwise from their
//! top-left vertex, so edge 0 of an element is its left edge.

use kerf::efa::{EfaError, ElementFragmentAlgorithm};
use kerf::mesh::NodeId;

fn ids(range: std::ops::RangeInclusive<NodeId>) -> Vec<NodeId> {
    range.collect()
}

fn cut(efa: &mut ElementFragmentAlgorithm, cuts: &[(u32, usize, f64)]) -> Result<(), EfaError> {
    for &(elem, edge, position) in cuts {
        efa.add_elem_edge_intersection(elem, edge, position)?;
    }
    efa.update_physical_links_and_fragments()?;
    efa.update_topology(true)
}

fn crack_into_first_element() -> ElementFragmentAlgorithm {
    let mut efa = ElementFragmentAlgorithm::new();
    let _ = efa
        .add_2d_elements(&[vec![0, 3, 4, 1], vec![1, 4, 5, 2]])
        .unwrap();
    efa.update_edge_neighbors().unwrap();
    cut(&mut efa, &[(0, 0, 0.5), (0, 2, 0.5)]).unwrap();
    efa
}

#[test]
fn crack_ending_on_an_element_edge() {
    let efa = crack_into_first_element();

    assert_eq!(efa.permanent_node_ids(), ids(0..=7));
    assert!(efa.temp_node_ids().is_empty());
    assert_eq!(efa.embedded_node_ids(), vec![0, 1]);
    assert_eq!(efa.child_element_ids(), &[2, 3, 4]);
    assert_eq!(efa.parent_element_ids(), &[0, 1]);

    // The crack-tip element is duplicated with its own nodes.
    let tip = efa.element(4).unwrap();
    assert_eq!(tip.parent(), Some(1));
    assert_eq!(efa.element_node_ids(4).unwrap(), vec![1, 4, 5, 2]);
    assert!(efa.crack_tip_element_ids().contains(&4));
}

#[test]
fn second_update_without_new_cuts_is_idle() {
    let mut efa = crack_into_first_element();

    efa.clear_ancestry().unwrap();
    efa.update_edge_neighbors().unwrap();
    efa.init_crack_tip_topology().unwrap();
    efa.update_topology(true).unwrap();

    assert_eq!(efa.permanent_node_ids(), ids(0..=7));
    assert!(efa.temp_node_ids().is_empty());
    assert_eq!(efa.embedded_node_ids(), vec![0, 1]);
    assert!(efa.child_element_ids().is_empty());
    assert!(efa.parent_element_ids().is_empty());
    assert_eq!(efa.elements().len(), 3);
}

#[test]
fn crack_across_three_elements() {
    let mut efa = ElementFragmentAlgorithm::new();
    let _ = efa
        .add_2d_elements(&[vec![0, 3, 4, 1], vec![1, 4, 5, 2], vec![4, 3, 6, 5]])
        .unwrap();
    efa.update_edge_neighbors().unwrap();
    cut(
        &mut efa,
        &[(0, 0, 0.5), (0, 1, 0.5), (1, 1, 0.5), (1, 2, 0.5)],
    )
    .unwrap();

    assert_eq!(efa.permanent_node_ids(), ids(0..=13));
    assert!(efa.temp_node_ids().is_empty());
    assert_eq!(efa.embedded_node_ids(), vec![0, 1, 2, 3]);
    assert_eq!(efa.child_element_ids(), &[3, 4, 5, 6, 7, 8]);
    assert_eq!(efa.parent_element_ids(), &[0, 1, 2]);
}

#[test]
fn crack_growing_into_a_new_element() {
    let mut efa = ElementFragmentAlgorithm::new();
    let _ = efa
        .add_2d_elements(&[vec![0, 3, 4, 1], vec![1, 4, 5, 2], vec![4, 3, 6, 7]])
        .unwrap();
    efa.add_2d_element(&[5, 4, 7, 8], 3).unwrap();
    efa.update_edge_neighbors().unwrap();
    cut(
        &mut efa,
        &[
            (1, 1, 0.5),
            (1, 2, 0.5),
            (2, 2, 0.5),
            (2, 3, 0.5),
            (3, 0, 0.5),
            (3, 1, 0.5),
        ],
    )
    .unwrap();

    assert_eq!(efa.permanent_node_ids(), ids(0..=16));
    assert!(efa.temp_node_ids().is_empty());
    assert_eq!(efa.embedded_node_ids(), vec![0, 1, 2, 3]);
    assert_eq!(efa.child_element_ids(), &[4, 5, 6, 7, 8, 9]);
    assert_eq!(efa.parent_element_ids(), &[1, 2, 3]);
}

#[test]
fn new_nodes_remember_their_parents() {
    let efa = crack_into_first_element();
    let new_nodes = efa.new_node_ids();
    assert_eq!(new_nodes.len(), 2);
    for (id, parent) in new_nodes {
        assert!(id >= 6);
        assert!(matches!(parent, Some(p) if p < 6));
    }
}

#[test]
fn elements_sharing_an_edge_in_the_same_direction_overlay() {
    let mut efa = ElementFragmentAlgorithm::new();
    // Both elements list the shared edge as 4 -> 1, like two children of one parent.
    let _ = efa
        .add_2d_elements(&[vec![0, 3, 4, 1], vec![1, 2, 5, 4]])
        .unwrap();
    efa.update_edge_neighbors().unwrap();

    let first = efa.element(0).unwrap().as_planar().unwrap();
    let second = efa.element(1).unwrap().as_planar().unwrap();
    assert!(first.overlays_element(second).unwrap());
    assert_eq!(first.num_edge_neighbors(2), 0);
    assert_eq!(second.num_edge_neighbors(3), 0);

    // The cut stays in the element it was made in.
    efa.add_elem_edge_intersection(0, 2, 0.5).unwrap();
    assert!(efa.element(0).unwrap().as_planar().unwrap().edge(2).has_intersection());
    assert!(!efa.element(1).unwrap().as_planar().unwrap().edge(3).has_intersection());
}
