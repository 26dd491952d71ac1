//! Normal smoothing across the edges of the primary surface.
//!
//! Faceted primary surfaces have discontinuous normals. Near an edge, the normal of the face in
//! contact is blended with the normals of the faces across that edge so the contact direction
//! varies continuously as a node slides from one face to the next.

use smallvec::SmallVec;

use crate::contact::locator::SearchContext;
use crate::contact::{find_contact_point, ContactError, PenetrationInfo};
use crate::fe::FeEvaluator;
use crate::math::{Point, Real, Vector};
use crate::mesh::{ElemId, ElemType, NodeId, Side};
use crate::utils::{self, hashmap::HashMap};

/// The nodes of a side edge (one node for one-dimensional sides) with its smoothing weight.
pub type SmoothingEdge = (SmallVec<[NodeId; 2]>, Real);

/// The edges of `side` within `smoothing_distance` of the reference point `p`, with the weight
/// the face across each edge receives.
///
/// The weight grows linearly from 0 at `smoothing_distance` from the edge to 0.5 on the edge,
/// and is capped at 0.5 beyond it.
pub fn smoothing_edge_nodes_and_weights(
    p: &Point<Real>,
    side: &Side,
    smoothing_distance: Real,
) -> Result<SmallVec<[SmoothingEdge; 2]>, ContactError> {
    let s = smoothing_distance;
    let limit = 1.0 - s;
    let xi = p.x;
    let eta = p.y;
    let n = &side.nodes;
    let mut edges: SmallVec<[SmoothingEdge; 2]> = SmallVec::new();
    let weight = |dist: Real| (0.5 - dist / (2.0 * s)).min(0.5);

    if s <= 0.0 {
        return Ok(edges);
    }

    match side.ty {
        ElemType::NodeElem => {}
        ElemType::Edge2 => {
            if xi < -limit {
                edges.push((SmallVec::from_slice(&[n[0]]), weight(1.0 + xi)));
            } else if xi > limit {
                edges.push((SmallVec::from_slice(&[n[1]]), weight(1.0 - xi)));
            }
        }
        ElemType::Tri3 => {
            if eta < s {
                edges.push((SmallVec::from_slice(&[n[0], n[1]]), weight(eta)));
            }
            if xi + eta > limit {
                edges.push((SmallVec::from_slice(&[n[1], n[2]]), weight(1.0 - xi - eta)));
            }
            if xi < s {
                edges.push((SmallVec::from_slice(&[n[2], n[0]]), weight(xi)));
            }
        }
        ElemType::Quad4 => {
            if eta < -limit {
                edges.push((SmallVec::from_slice(&[n[0], n[1]]), weight(1.0 + eta)));
            }
            if xi > limit {
                edges.push((SmallVec::from_slice(&[n[1], n[2]]), weight(1.0 - xi)));
            }
            if eta > limit {
                edges.push((SmallVec::from_slice(&[n[2], n[3]]), weight(1.0 - eta)));
            }
            if xi < -limit {
                edges.push((SmallVec::from_slice(&[n[3], n[0]]), weight(1.0 + xi)));
            }
        }
        ty => return Err(ContactError::UnsupportedFaceType(ty)),
    }

    edges.truncate(2);
    Ok(edges)
}

/// Interpolates a nodal normal field at the contact point of `info`.
pub fn nodal_normal_smoothing(
    info: &PenetrationInfo,
    nodal_normals: &HashMap<NodeId, Vector<Real>>,
) -> Result<Vector<Real>, ContactError> {
    let mut normal = Vector::zeros();
    for (node, phi) in info.side.nodes.iter().zip(info.side_phi.iter()) {
        let nodal = nodal_normals
            .get(node)
            .ok_or(ContactError::MissingNodalNormal(*node))?;
        normal += nodal * *phi;
    }
    Ok(utils::normalize_or_keep(normal))
}

// A primary face other than the face in contact.
struct NeighborFace {
    elem: ElemId,
    side_num: usize,
}

/// Blends the normal of `info` with the normals of the faces across the nearby edges.
pub(crate) fn smooth_normal_edge_based<F: FeEvaluator + ?Sized>(
    ctx: &SearchContext<'_>,
    info: &mut PenetrationInfo,
    candidates: &[PenetrationInfo],
    secondary_point: &Point<Real>,
    fe: &mut F,
) -> Result<(), ContactError> {
    let edges = smoothing_edge_nodes_and_weights(
        &info.closest_point_ref,
        &info.side,
        ctx.config.normal_smoothing_distance,
    )?;

    if edges.is_empty() {
        return Ok(());
    }

    let mut faces: Vec<(NeighborFace, Real)> = Vec::new();
    let mut edge_neighbors: SmallVec<[(ElemId, usize); 2]> = SmallVec::new();

    for (i, (nodes, w)) in edges.iter().enumerate() {
        let mut weight = *w;
        if let Some((_, other)) = edges.iter().enumerate().find(|(j, _)| *j != i) {
            weight *= 1.0 - other.1;
        }

        let mut neighbors = neighbor_faces(ctx, info.elem, nodes, &[])?;
        if neighbors.len() > 1 {
            return Err(ContactError::TooManySmoothingNeighbors(neighbors.len()));
        }
        if let Some(face) = neighbors.pop() {
            edge_neighbors.push((face.elem, face.side_num));
            faces.push((face, weight));
        }
    }

    if edges.len() == 2 {
        let common = edges[0]
            .0
            .iter()
            .copied()
            .find(|node| edges[1].0.contains(node));
        if let Some(node) = common {
            let corner_faces = neighbor_faces(ctx, info.elem, &[node], &edge_neighbors)?;
            if !corner_faces.is_empty() {
                let weight = edges[0].1 * edges[1].1 / corner_faces.len() as Real;
                faces.extend(corner_faces.into_iter().map(|face| (face, weight)));
            }
        }
    }

    let mut normal = Vector::zeros();
    let mut own_weight = 1.0;
    for (face, weight) in &faces {
        let Some(face_normal) =
            neighbor_normal(ctx, info.node, face, candidates, secondary_point, fe)?
        else {
            continue;
        };
        normal += face_normal * *weight;
        own_weight -= weight;
    }

    normal += info.normal * own_weight;
    info.normal = utils::normalize_or_keep(normal);
    Ok(())
}

// The primary faces of elements other than `elem` containing every node of `nodes`.
fn neighbor_faces(
    ctx: &SearchContext<'_>,
    elem: ElemId,
    nodes: &[NodeId],
    exclude: &[(ElemId, usize)],
) -> Result<Vec<NeighborFace>, ContactError> {
    let mut result = Vec::new();
    let Some(first) = nodes.first() else {
        return Ok(result);
    };
    let Some(elems) = ctx.node_to_elem.get(first) else {
        return Ok(result);
    };

    for neighbor in elems {
        if *neighbor == elem {
            continue;
        }

        let candidate = ctx.mesh.elem(*neighbor)?;
        if !nodes.iter().all(|n| candidate.node_index(*n).is_some()) {
            continue;
        }

        for side_num in ctx.mesh.sides_with_boundary_id(*neighbor, ctx.primary) {
            if exclude.contains(&(*neighbor, side_num)) {
                continue;
            }
            let side = ctx.mesh.build_side(*neighbor, side_num)?;
            if nodes.iter().all(|n| side.node_index(*n).is_some()) {
                result.push(NeighborFace {
                    elem: *neighbor,
                    side_num,
                });
            }
        }
    }

    Ok(result)
}

// The normal of a neighbouring face at the projection of the secondary node. Candidates of the
// current search are reused; other faces are projected on demand.
fn neighbor_normal<F: FeEvaluator + ?Sized>(
    ctx: &SearchContext<'_>,
    node: NodeId,
    face: &NeighborFace,
    candidates: &[PenetrationInfo],
    secondary_point: &Point<Real>,
    fe: &mut F,
) -> Result<Option<Vector<Real>>, ContactError> {
    if let Some(candidate) = candidates
        .iter()
        .find(|c| c.elem == face.elem && c.side_num == face.side_num)
    {
        return Ok(Some(candidate.normal));
    }

    let side = ctx.mesh.build_side(face.elem, face.side_num)?;
    let elem_points = ctx.mesh.elem_points(face.elem)?;
    let mut info = PenetrationInfo::new(node, face.elem, face.side_num, side);
    let report = find_contact_point(
        &mut info,
        fe,
        &elem_points,
        secondary_point,
        true,
        &ctx.config.projection,
    )?;

    Ok(report.search_succeeded.then_some(info.normal))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad() -> Side {
        Side {
            elem: 0,
            side: 0,
            ty: ElemType::Quad4,
            nodes: [0, 1, 2, 3].into_iter().collect(),
            points: [Point::origin(); 4].into_iter().collect(),
        }
    }

    #[test]
    fn no_smoothing_in_the_interior() {
        let edges = smoothing_edge_nodes_and_weights(&Point::new(0.2, -0.3, 0.0), &quad(), 0.2)
            .unwrap();
        assert!(edges.is_empty());
    }

    #[test]
    fn edge_weight_is_linear_and_capped() {
        let edges =
            smoothing_edge_nodes_and_weights(&Point::new(0.9, 0.0, 0.0), &quad(), 0.2).unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(&edges[0].0[..], &[1, 2]);
        assert_relative_eq!(edges[0].1, 0.25, epsilon = 1.0e-12);

        let edges =
            smoothing_edge_nodes_and_weights(&Point::new(1.3, 0.0, 0.0), &quad(), 0.2).unwrap();
        assert_relative_eq!(edges[0].1, 0.5);
    }

    #[test]
    fn corner_reports_two_edges() {
        let edges =
            smoothing_edge_nodes_and_weights(&Point::new(-0.95, -0.95, 0.0), &quad(), 0.2)
                .unwrap();
        assert_eq!(edges.len(), 2);
        assert_eq!(&edges[0].0[..], &[0, 1]);
        assert_eq!(&edges[1].0[..], &[3, 0]);
    }

    #[test]
    fn nodal_normals_are_interpolated() {
        let mut info = PenetrationInfo::new(9, 0, 0, quad());
        info.side_phi = [0.25; 4].into_iter().collect();
        let mut normals = HashMap::default();
        let _ = normals.insert(0, Vector::z());
        let _ = normals.insert(1, Vector::z());
        let _ = normals.insert(2, Vector::x());
        let _ = normals.insert(3, Vector::x());
        let n = nodal_normal_smoothing(&info, &normals).unwrap();
        assert_relative_eq!(n, Vector::new(1.0, 0.0, 1.0).normalize(), epsilon = 1.0e-12);

        let partial: HashMap<NodeId, Vector<Real>> =
            normals.into_iter().filter(|(node, _)| *node != 3).collect();
        assert_eq!(
            nodal_normal_smoothing(&info, &partial),
            Err(ContactError::MissingNodalNormal(3))
        );
    }
}
