//! Contact on the ridge between two faces, and at the peak where several ridges meet.

use smallvec::SmallVec;

use crate::contact::{ContactError, PenetrationInfo};
use crate::fe::FeEvaluator;
use crate::math::{Point, Real};
use crate::mesh::{ElemType, NodeId, Side};

/// A contact point found on the edge shared by two candidate faces.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RidgeData {
    /// Index of the first candidate.
    pub index1: usize,
    /// Index of the second candidate.
    pub index2: usize,
    /// The contact point on the ridge.
    pub closest_coor: Point<Real>,
    /// Distance from the ridge point to `closest_node` when the point is off the end of the ridge.
    pub tangential_distance: Real,
    /// The end node of the ridge, when the point is off the end of the ridge.
    pub closest_node: Option<NodeId>,
}

/// Ridges grouped by the node they run off.
///
/// A set with several ridges is a peak: the contact point is the common node.
#[derive(Clone, Debug, PartialEq)]
pub struct RidgeSetData {
    /// The common end node of the ridges, if any.
    pub closest_node: Option<NodeId>,
    /// The coordinates of the node of `closest_node`.
    pub closest_node_point: Option<Point<Real>>,
    /// The contact point of this set.
    pub closest_coor: Point<Real>,
    /// The distance from the secondary node to `closest_coor`.
    pub distance: Real,
    /// The ridges of this set.
    pub ridges: Vec<RidgeData>,
}

impl RidgeSetData {
    fn new(ridge: RidgeData, closest_node_point: Option<Point<Real>>) -> Self {
        RidgeSetData {
            closest_node: ridge.closest_node,
            closest_node_point,
            closest_coor: Point::origin(),
            distance: Real::MAX,
            ridges: vec![ridge],
        }
    }

    /// The candidate index with the smallest value among the ridges of this set, with the
    /// index of the ridge it belongs to.
    pub fn lowest_face_index(&self) -> Option<(usize, usize)> {
        let mut best: Option<(usize, usize)> = None;
        for (r, ridge) in self.ridges.iter().enumerate() {
            for face in [ridge.index1, ridge.index2] {
                if best.map(|(b, _)| face < b).unwrap_or(true) {
                    best = Some((face, r));
                }
            }
        }
        best
    }
}

/// The corner nodes of a contact side.
pub fn side_corner_nodes(side: &Side) -> Result<SmallVec<[NodeId; 4]>, ContactError> {
    match side.ty {
        ElemType::NodeElem | ElemType::Edge2 | ElemType::Tri3 | ElemType::Quad4 => {
            Ok(side.corner_nodes().iter().copied().collect())
        }
        ty => Err(ContactError::UnsupportedFaceType(ty)),
    }
}

/// Clamps the reference point `p` to the edge of `side` spanned by `edge_nodes`, if `p` lies
/// beyond that edge.
///
/// Returns whether `p` lies beyond the edge and, if it also lies beyond one end of the edge,
/// the node at that end.
pub fn restrict_point_to_specified_edge_of_face(
    p: &mut Point<Real>,
    side: &Side,
    edge_nodes: &[NodeId],
) -> Result<(bool, Option<NodeId>), ContactError> {
    let mut local: SmallVec<[usize; 2]> = SmallVec::new();
    for node in edge_nodes {
        let idx = side.node_index(*node).ok_or(ContactError::NodeNotOnSide {
            elem: side.elem,
            node: *node,
        })?;
        local.push(idx);
    }
    local.sort_unstable();

    let n = &side.nodes;
    let xi = p.x;
    let eta = p.y;
    let mut off = false;
    let mut closest = None;

    let invalid = || {
        let mut ids = [usize::MAX; 2];
        for (dst, src) in ids.iter_mut().zip(local.iter()) {
            *dst = *src;
        }
        ContactError::InvalidRidgeIndices(ids)
    };

    match side.ty {
        ElemType::Edge2 => match local.as_slice() {
            [0] => {
                if xi <= -1.0 {
                    p.x = -1.0;
                    off = true;
                    closest = Some(n[0]);
                }
            }
            [1] => {
                if xi >= 1.0 {
                    p.x = 1.0;
                    off = true;
                    closest = Some(n[1]);
                }
            }
            _ => return Err(invalid()),
        },
        ElemType::Tri3 => match local.as_slice() {
            [0, 1] => {
                if eta <= 0.0 {
                    p.y = 0.0;
                    off = true;
                    if xi < 0.0 {
                        closest = Some(n[0]);
                    } else if xi > 1.0 {
                        closest = Some(n[1]);
                    }
                }
            }
            [1, 2] => {
                if xi + eta >= 1.0 {
                    let delta = (xi + eta - 1.0) / 2.0;
                    p.x -= delta;
                    p.y -= delta;
                    off = true;
                    if p.x > 1.0 {
                        closest = Some(n[1]);
                    } else if p.x < 0.0 {
                        closest = Some(n[2]);
                    }
                }
            }
            [0, 2] => {
                if xi <= 0.0 {
                    p.x = 0.0;
                    off = true;
                    if eta > 1.0 {
                        closest = Some(n[2]);
                    } else if eta < 0.0 {
                        closest = Some(n[0]);
                    }
                }
            }
            _ => return Err(invalid()),
        },
        ElemType::Quad4 => match local.as_slice() {
            [0, 1] => {
                if eta <= -1.0 {
                    p.y = -1.0;
                    off = true;
                    if xi < -1.0 {
                        closest = Some(n[0]);
                    } else if xi > 1.0 {
                        closest = Some(n[1]);
                    }
                }
            }
            [1, 2] => {
                if xi >= 1.0 {
                    p.x = 1.0;
                    off = true;
                    if eta < -1.0 {
                        closest = Some(n[1]);
                    } else if eta > 1.0 {
                        closest = Some(n[2]);
                    }
                }
            }
            [2, 3] => {
                if eta >= 1.0 {
                    p.y = 1.0;
                    off = true;
                    if xi < -1.0 {
                        closest = Some(n[3]);
                    } else if xi > 1.0 {
                        closest = Some(n[2]);
                    }
                }
            }
            [0, 3] => {
                if xi <= -1.0 {
                    p.x = -1.0;
                    off = true;
                    if eta < -1.0 {
                        closest = Some(n[0]);
                    } else if eta > 1.0 {
                        closest = Some(n[3]);
                    }
                }
            }
            _ => return Err(invalid()),
        },
        ty => return Err(ContactError::UnsupportedFaceType(ty)),
    }

    Ok((off, closest))
}

/// Looks for a contact point on the ridge shared by the faces of `pi1` and `pi2`.
///
/// Both candidates must project off their face, beyond the common edge (or common node for
/// one-dimensional sides). Returns `None` if the faces share no ridge or if either
/// projection lies on the inner side of it.
pub fn find_ridge_contact_point<F: FeEvaluator + ?Sized>(
    fe: &mut F,
    pi1: &PenetrationInfo,
    pi2: &PenetrationInfo,
    index1: usize,
    index2: usize,
) -> Result<Option<RidgeData>, ContactError> {
    let side_dim = pi1.side.dim();
    if side_dim != pi2.side.dim() {
        return Err(ContactError::IncompatibleSideDimensions(
            side_dim,
            pi2.side.dim(),
        ));
    }

    if pi1.tangential_distance <= 0.0 || pi2.tangential_distance <= 0.0 {
        return Ok(None);
    }

    let mut nodes1 = side_corner_nodes(&pi1.side)?;
    let mut nodes2 = side_corner_nodes(&pi2.side)?;
    nodes1.sort_unstable();
    nodes2.sort_unstable();

    let common: SmallVec<[NodeId; 4]> = nodes1
        .iter()
        .filter(|n| nodes2.binary_search(n).is_ok())
        .copied()
        .collect();

    if common.len() != side_dim {
        return Ok(None);
    }

    let mut ref1 = pi1.closest_point_ref;
    let (found1, closest_node1) =
        restrict_point_to_specified_edge_of_face(&mut ref1, &pi1.side, &common)?;
    let mut ref2 = pi2.closest_point_ref;
    let (found2, closest_node2) =
        restrict_point_to_specified_edge_of_face(&mut ref2, &pi2.side, &common)?;

    if !found1 || !found2 {
        return Ok(None);
    }

    fe.reinit(pi1.side.ty, &pi1.side.points, &ref1)
        .map_err(|source| ContactError::Reinit {
            elem: pi1.elem,
            source,
        })?;
    let contact_point = fe.xyz();

    let mut ridge = RidgeData {
        index1,
        index2,
        closest_coor: contact_point,
        tangential_distance: 0.0,
        closest_node: None,
    };

    if side_dim == 2 {
        if let Some(node) = closest_node1 {
            if closest_node2 != Some(node) {
                return Err(ContactError::RidgeNodeMismatch);
            }
            let idx = pi1.side.node_index(node).ok_or(ContactError::NodeNotOnSide {
                elem: pi1.elem,
                node,
            })?;
            ridge.closest_node = Some(node);
            ridge.tangential_distance = na::distance(&pi1.side.points[idx], &contact_point);
        }
    }

    Ok(Some(ridge))
}

/// Groups ridges running off a common node into peaks, and computes the contact point and
/// distance of every group as seen from `node_point`.
///
/// A lone ridge running off its end node is only retained within `tangential_tolerance`;
/// otherwise its set keeps a distance of `Real::MAX`.
pub fn group_ridges(
    ridges: &[RidgeData],
    candidates: &[PenetrationInfo],
    node_point: &Point<Real>,
    tangential_tolerance: Real,
) -> Vec<RidgeSetData> {
    let mut sets: Vec<RidgeSetData> = Vec::new();

    for ridge in ridges {
        let matching = ridge
            .closest_node
            .and_then(|node| sets.iter_mut().find(|set| set.closest_node == Some(node)));

        match matching {
            Some(set) => set.ridges.push(*ridge),
            None => {
                let node_point = ridge.closest_node.and_then(|node| {
                    let side = &candidates[ridge.index1].side;
                    side.node_index(node).map(|i| side.points[i])
                });
                sets.push(RidgeSetData::new(*ridge, node_point));
            }
        }
    }

    for set in &mut sets {
        match (set.closest_node, set.ridges.len()) {
            (Some(_), 1) => {
                if set.ridges[0].tangential_distance <= tangential_tolerance {
                    set.closest_coor = set.ridges[0].closest_coor;
                    set.distance = na::distance(node_point, &set.closest_coor);
                }
            }
            (Some(_), _) => {
                if let Some(peak) = set.closest_node_point {
                    set.closest_coor = peak;
                    set.distance = na::distance(node_point, &peak);
                }
            }
            (None, _) => {
                set.closest_coor = set.ridges[0].closest_coor;
                set.distance = na::distance(node_point, &set.closest_coor);
            }
        }
    }

    sets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contact::{find_contact_point, ProjectionOptions};
    use crate::fe::LagrangeEvaluator;

    fn quad_side(elem: u32, nodes: [NodeId; 4], points: [Point<Real>; 4]) -> Side {
        Side {
            elem,
            side: 0,
            ty: ElemType::Quad4,
            nodes: nodes.into_iter().collect(),
            points: points.into_iter().collect(),
        }
    }

    #[test]
    fn edge_restriction_reports_the_end_node() {
        let side = quad_side(
            0,
            [0, 1, 2, 3],
            [
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(1.0, 1.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
            ],
        );

        let mut p = Point::new(1.5, 0.2, 0.0);
        let res = restrict_point_to_specified_edge_of_face(&mut p, &side, &[2, 1]).unwrap();
        assert_eq!(res, (true, None));
        assert_eq!(p.x, 1.0);

        let mut p = Point::new(1.5, 1.2, 0.0);
        let res = restrict_point_to_specified_edge_of_face(&mut p, &side, &[1, 2]).unwrap();
        assert_eq!(res, (true, Some(2)));

        let mut p = Point::new(0.5, 0.2, 0.0);
        let res = restrict_point_to_specified_edge_of_face(&mut p, &side, &[1, 2]).unwrap();
        assert_eq!(res, (false, None));

        let mut p = Point::new(0.5, 0.2, 0.0);
        assert_eq!(
            restrict_point_to_specified_edge_of_face(&mut p, &side, &[0, 2]),
            Err(ContactError::InvalidRidgeIndices([0, 2]))
        );
        assert_eq!(
            restrict_point_to_specified_edge_of_face(&mut p, &side, &[7, 2]),
            Err(ContactError::NodeNotOnSide { elem: 0, node: 7 })
        );
    }

    #[test]
    fn convex_ridge_contact() {
        // Two faces meeting at a convex 90 degree ridge along the y axis at x = 1, z = 1.
        let top = quad_side(
            0,
            [0, 1, 2, 3],
            [
                Point::new(0.0, 0.0, 1.0),
                Point::new(1.0, 0.0, 1.0),
                Point::new(1.0, 1.0, 1.0),
                Point::new(0.0, 1.0, 1.0),
            ],
        );
        let right = quad_side(
            1,
            [1, 4, 5, 2],
            [
                Point::new(1.0, 0.0, 1.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(1.0, 1.0, 0.0),
                Point::new(1.0, 1.0, 1.0),
            ],
        );

        let node = Point::new(1.1, 0.5, 1.1);
        let opts = ProjectionOptions {
            tangential_tolerance: 0.2,
            ..ProjectionOptions::default()
        };
        let mut fe = LagrangeEvaluator::default();
        let mut pi1 = PenetrationInfo::new(9, 0, 0, top);
        let mut pi2 = PenetrationInfo::new(9, 1, 0, right);
        let _ = find_contact_point(&mut pi1, &mut fe, &[], &node, true, &opts).unwrap();
        let _ = find_contact_point(&mut pi2, &mut fe, &[], &node, true, &opts).unwrap();

        let ridge = find_ridge_contact_point(&mut fe, &pi1, &pi2, 0, 1)
            .unwrap()
            .unwrap();
        assert_relative_eq!(ridge.closest_coor, Point::new(1.0, 0.5, 1.0), epsilon = 1.0e-10);
        assert_eq!(ridge.closest_node, None);

        let sets = group_ridges(&[ridge], &[pi1, pi2], &node, 0.2);
        assert_eq!(sets.len(), 1);
        assert_relative_eq!(sets[0].distance, (0.02 as Real).sqrt(), epsilon = 1.0e-10);
        assert_eq!(sets[0].lowest_face_index(), Some((0, 0)));
    }
}
