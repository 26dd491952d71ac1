use smallvec::SmallVec;

use crate::contact::{ContactError, PenetrationInfo, ProjectionOptions};
use crate::fe::FeEvaluator;
use crate::math::{Matrix2, Point, Real, Vector, TOLERANCE};
use crate::mesh::{ElemType, NodeId, Side};
use crate::utils;

/// Summary of one contact-point projection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ProjectionReport {
    /// The projection lies on the side, or within the tangential tolerance of it.
    pub contact_point_on_side: bool,
    /// The Newton iteration converged. A failed projection must be discarded.
    pub search_succeeded: bool,
    /// The number of Newton iterations performed.
    pub newton_iterations: usize,
}

impl ProjectionReport {
    fn failed(newton_iterations: usize) -> Self {
        ProjectionReport {
            contact_point_on_side: false,
            search_succeeded: false,
            newton_iterations,
        }
    }
}

/// Projects `secondary_point` on the side of `info` and stores the contact geometry in `info`.
///
/// The reference point is seeded at the side centroid if `start_with_centroid` is true, or at
/// `info.closest_point_ref` otherwise. A few least-squares steps bring the guess close to the
/// projection, then a Newton iteration with a halving line search converges it. If the
/// converged point falls outside the reference side, it is clamped to the side boundary and
/// `info.tangential_distance` reports how far the projection was moved.
///
/// `elem_points` are the vertices of the element owning the side. They orient the normals of
/// one-dimensional sides.
///
/// A projection that does not converge is reported with `search_succeeded == false` and leaves
/// `info` in an unspecified state. Only malformed input is an error.
pub fn find_contact_point<F: FeEvaluator + ?Sized>(
    info: &mut PenetrationInfo,
    fe: &mut F,
    elem_points: &[Point<Real>],
    secondary_point: &Point<Real>,
    start_with_centroid: bool,
    options: &ProjectionOptions,
) -> Result<ProjectionReport, ContactError> {
    let ty = info.side.ty;

    match ty {
        ElemType::NodeElem => return Ok(project_on_node(info, elem_points, secondary_point)),
        ElemType::Edge2 | ElemType::Tri3 | ElemType::Quad4 => {}
        _ => return Err(ContactError::UnsupportedFaceType(ty)),
    }

    let dim = ty.dim();
    let points = info.side.points.clone();
    let mut ref_point = if start_with_centroid {
        ty.reference_centroid()
    } else {
        info.closest_point_ref
    };

    if fe.reinit(ty, &points, &ref_point).is_err() {
        log::debug!(
            "contact projection of node {} on element {} starts outside the side",
            info.node,
            info.elem
        );
        return Ok(ProjectionReport::failed(0));
    }

    // Least-squares phase. Straight one-dimensional sides are solved by the first Newton step.
    let max_ls_iterations = if ty == ElemType::Edge2 {
        0
    } else {
        options.max_least_squares_iterations
    };
    let mut update_size = Real::MAX;
    let mut it = 0;
    while it < max_ls_iterations && update_size > options.least_squares_tolerance {
        let d = secondary_point - fe.xyz();
        let t = tangents(fe, dim);
        let mut jac = Matrix2::identity();
        let mut rhs = Vector::zeros();
        for i in 0..dim {
            rhs[i] = t[i].dot(&d);
            for j in 0..dim {
                jac[(i, j)] = -t[i].dot(&t[j]);
            }
        }

        let Some(update) = solve(&jac, &rhs, dim) else {
            break;
        };
        let trial = ref_point - update;
        if fe.reinit(ty, &points, &trial).is_err() {
            // Leave the remaining work to the damped Newton iteration.
            break;
        }
        ref_point = trial;
        update_size = update.norm();
        it += 1;
    }

    if fe.reinit(ty, &points, &ref_point).is_err() {
        return Ok(ProjectionReport::failed(0));
    }

    // Newton phase.
    update_size = Real::MAX;
    let mut nit = 0;
    while nit < options.max_newton_iterations && update_size > options.newton_tolerance {
        let d = secondary_point - fe.xyz();
        let t = tangents(fe, dim);
        let d2 = fe.d2xyz_dxideta();
        let mut jac = Matrix2::identity();
        let mut rhs = Vector::zeros();
        for i in 0..dim {
            rhs[i] = -t[i].dot(&d);
            for j in 0..dim {
                let curvature = if i != j { d2.dot(&d) } else { 0.0 };
                jac[(i, j)] = curvature - t[i].dot(&t[j]);
            }
        }

        let Some(update) = solve(&jac, &rhs, dim) else {
            log::debug!(
                "singular contact projection jacobian for node {} on element {}",
                info.node,
                info.elem
            );
            return Ok(ProjectionReport::failed(nit));
        };

        let mut step = 1.0;
        loop {
            let trial = ref_point + update * step;
            if fe.reinit(ty, &points, &trial).is_ok() {
                ref_point = trial;
                break;
            }

            step *= 0.5;
            if step < options.min_line_search_step {
                log::debug!(
                    "contact projection line search of node {} on element {} failed",
                    info.node,
                    info.elem
                );
                return Ok(ProjectionReport::failed(nit));
            }
        }

        update_size = update.norm() * step;
        nit += 1;
    }

    if update_size > options.newton_tolerance {
        log::debug!(
            "Newton solve for the contact point of node {} on element {} failed to converge",
            info.node,
            info.elem
        );
        return Ok(ProjectionReport::failed(nit));
    }

    let closest_point = fe.xyz();
    let d = secondary_point - closest_point;
    let normal = side_normal(fe, dim, elem_points);

    info.closest_point_ref = ref_point;
    info.closest_point_on_face_ref = ref_point;
    info.closest_point = closest_point;
    info.normal = normal;
    info.distance = if d.dot(&normal) > 0.0 {
        -d.norm()
    } else {
        d.norm()
    };
    info.tangential_distance = 0.0;
    info.off_edge_nodes.clear();

    let mut contact_point_on_side = ty.contains_reference_point(&ref_point, TOLERANCE);

    if !contact_point_on_side {
        let mut on_face_ref = ref_point;
        restrict_point_to_face(&mut on_face_ref, &info.side, &mut info.off_edge_nodes)?;
        fe.reinit(ty, &points, &on_face_ref)
            .map_err(|source| ContactError::Reinit {
                elem: info.elem,
                source,
            })?;
        info.closest_point_on_face_ref = on_face_ref;
        info.tangential_distance = na::distance(&fe.xyz(), &closest_point);
        contact_point_on_side = info.tangential_distance <= options.tangential_tolerance;
    }

    fe.reinit(ty, &points, &ref_point)
        .map_err(|source| ContactError::Reinit {
            elem: info.elem,
            source,
        })?;
    cache_side_data(info, fe);

    Ok(ProjectionReport {
        contact_point_on_side,
        search_succeeded: true,
        newton_iterations: nit,
    })
}

/// Stores the side shape data of the current evaluation point of `fe` in `info`.
pub(crate) fn cache_side_data<F: FeEvaluator + ?Sized>(info: &mut PenetrationInfo, fe: &F) {
    info.side_phi = fe.phi().iter().copied().collect();
    info.dxyzdxi = fe.dxyz_dxi();
    info.dxyzdeta = fe.dxyz_deta();
    info.d2xyzdxideta = fe.d2xyz_dxideta();
}

// The side of a one-dimensional element is a single node: the projection is that node.
fn project_on_node(
    info: &mut PenetrationInfo,
    elem_points: &[Point<Real>],
    secondary_point: &Point<Real>,
) -> ProjectionReport {
    let node_point = info.side.points[0];
    let normal = utils::normalize_or_keep(node_point - utils::center(elem_points));
    let d = secondary_point - node_point;

    info.closest_point = node_point;
    info.closest_point_ref = Point::origin();
    info.closest_point_on_face_ref = Point::origin();
    info.normal = normal;
    info.distance = if d.dot(&normal) > 0.0 {
        -d.norm()
    } else {
        d.norm()
    };
    info.tangential_distance = 0.0;
    info.off_edge_nodes.clear();
    info.side_phi = SmallVec::from_slice(&[1.0]);
    info.dxyzdxi = Vector::zeros();
    info.dxyzdeta = Vector::zeros();
    info.d2xyzdxideta = Vector::zeros();

    ProjectionReport {
        contact_point_on_side: true,
        search_succeeded: true,
        newton_iterations: 0,
    }
}

fn tangents<F: FeEvaluator + ?Sized>(fe: &F, dim: usize) -> [Vector<Real>; 2] {
    if dim == 2 {
        [fe.dxyz_dxi(), fe.dxyz_deta()]
    } else {
        [fe.dxyz_dxi(), Vector::zeros()]
    }
}

fn solve(jac: &Matrix2<Real>, rhs: &Vector<Real>, dim: usize) -> Option<Vector<Real>> {
    if dim == 1 {
        if jac[(0, 0)].abs() <= Real::MIN_POSITIVE {
            return None;
        }
        Some(Vector::new(rhs[0] / jac[(0, 0)], 0.0, 0.0))
    } else {
        let inv = jac.try_inverse()?;
        let sol = inv * rhs.xy();
        Some(Vector::new(sol.x, sol.y, 0.0))
    }
}

/// The outward normal of a side at the current evaluation point of `fe`.
///
/// Two-dimensional sides use the cross product of their tangents. One-dimensional sides use
/// the cross product of their tangent with the normal of the plane of the owning element.
/// Degenerate normals are returned unnormalized.
pub fn side_normal<F: FeEvaluator + ?Sized>(
    fe: &F,
    side_dim: usize,
    elem_points: &[Point<Real>],
) -> Vector<Real> {
    let normal = if side_dim == 2 {
        fe.dxyz_dxi().cross(&fe.dxyz_deta())
    } else if elem_points.len() >= 3 {
        let out_of_plane = utils::normalize_or_keep(
            (elem_points[1] - elem_points[0]).cross(&(elem_points[2] - elem_points[0])),
        );
        fe.dxyz_dxi().cross(&out_of_plane)
    } else {
        Vector::zeros()
    };

    utils::normalize_or_keep(normal)
}

/// Clamps the reference point `p` of `side` to the closest point of the reference side.
///
/// `off_edge_nodes` is filled with the corner nodes of the boundary the point was clamped
/// to: one node for a corner, two nodes for an edge.
pub fn restrict_point_to_face(
    p: &mut Point<Real>,
    side: &Side,
    off_edge_nodes: &mut SmallVec<[NodeId; 2]>,
) -> Result<(), ContactError> {
    let n = &side.nodes;
    let xi = p.x;
    let eta = p.y;
    off_edge_nodes.clear();

    match side.ty {
        ElemType::NodeElem => {}
        ElemType::Edge2 => {
            if xi < -1.0 {
                p.x = -1.0;
                off_edge_nodes.push(n[0]);
            } else if xi > 1.0 {
                p.x = 1.0;
                off_edge_nodes.push(n[1]);
            }
        }
        ElemType::Tri3 => {
            if eta < 0.0 {
                p.y = 0.0;
                if xi < 0.0 {
                    p.x = 0.0;
                    off_edge_nodes.push(n[0]);
                } else if xi > 1.0 {
                    p.x = 1.0;
                    off_edge_nodes.push(n[1]);
                } else {
                    off_edge_nodes.extend_from_slice(&[n[0], n[1]]);
                }
            } else if xi < 0.0 {
                p.x = 0.0;
                if eta > 1.0 {
                    p.y = 1.0;
                    off_edge_nodes.push(n[2]);
                } else {
                    off_edge_nodes.extend_from_slice(&[n[2], n[0]]);
                }
            } else if xi + eta > 1.0 {
                let delta = (xi - eta) / 2.0;
                p.x = 0.5 + delta;
                p.y = 0.5 - delta;
                if p.x > 1.0 {
                    p.x = 1.0;
                    p.y = 0.0;
                    off_edge_nodes.push(n[1]);
                } else if p.y > 1.0 {
                    p.x = 0.0;
                    p.y = 1.0;
                    off_edge_nodes.push(n[2]);
                } else {
                    off_edge_nodes.extend_from_slice(&[n[1], n[2]]);
                }
            }
        }
        ElemType::Quad4 => {
            if eta < -1.0 {
                p.y = -1.0;
                if xi < -1.0 {
                    p.x = -1.0;
                    off_edge_nodes.push(n[0]);
                } else if xi > 1.0 {
                    p.x = 1.0;
                    off_edge_nodes.push(n[1]);
                } else {
                    off_edge_nodes.extend_from_slice(&[n[0], n[1]]);
                }
            } else if xi > 1.0 {
                p.x = 1.0;
                if eta > 1.0 {
                    p.y = 1.0;
                    off_edge_nodes.push(n[2]);
                } else {
                    off_edge_nodes.extend_from_slice(&[n[1], n[2]]);
                }
            } else if eta > 1.0 {
                p.y = 1.0;
                if xi < -1.0 {
                    p.x = -1.0;
                    off_edge_nodes.push(n[3]);
                } else {
                    off_edge_nodes.extend_from_slice(&[n[2], n[3]]);
                }
            } else if xi < -1.0 {
                p.x = -1.0;
                off_edge_nodes.extend_from_slice(&[n[3], n[0]]);
            }
        }
        ty => return Err(ContactError::UnsupportedFaceType(ty)),
    }

    Ok(())
}

/// A cheap test rejecting faces too far from `secondary_point` to be in contact with it.
///
/// The face is rejected if the tangential offset from its centroid exceeds twice its size,
/// enlarged when the point lies far from the face plane.
pub fn is_face_reasonable_candidate<F: FeEvaluator + ?Sized>(
    side: &Side,
    elem_points: &[Point<Real>],
    fe: &mut F,
    secondary_point: &Point<Real>,
    tangential_tolerance: Real,
) -> bool {
    const TWO_SQRT_2: Real = 2.8284;

    let dim = side.dim();
    if dim == 0 || fe.reinit(side.ty, &side.points, &side.ty.reference_centroid()).is_err() {
        return true;
    }

    let d = secondary_point - fe.xyz();
    let d_norm = d.norm();
    if d_norm == 0.0 {
        return true;
    }

    let normal = side_normal(fe, dim, elem_points);
    let normcomp = normal * d.dot(&normal);
    let tangdist = (d - normcomp).norm();
    let max_face_length = side.hmax() + TWO_SQRT_2 * tangential_tolerance;
    let expansion = 2.0 * (1.0 + normcomp.norm() / d_norm);

    tangdist <= expansion * max_face_length
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fe::LagrangeEvaluator;

    fn unit_square_side() -> Side {
        Side {
            elem: 0,
            side: 5,
            ty: ElemType::Quad4,
            nodes: [4, 5, 6, 7].into_iter().collect(),
            points: [
                Point::new(0.0, 0.0, 1.0),
                Point::new(1.0, 0.0, 1.0),
                Point::new(1.0, 1.0, 1.0),
                Point::new(0.0, 1.0, 1.0),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn tri_side() -> Side {
        Side {
            elem: 0,
            side: 0,
            ty: ElemType::Tri3,
            nodes: [10, 11, 12].into_iter().collect(),
            points: [
                Point::new(0.0, 0.0, 0.0),
                Point::new(1.0, 0.0, 0.0),
                Point::new(0.0, 1.0, 0.0),
            ]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn projection_is_idempotent() {
        let mut fe = LagrangeEvaluator::default();
        let opts = ProjectionOptions::default();
        let mut info = PenetrationInfo::new(0, 0, 5, unit_square_side());
        let target = Point::new(0.3, 0.7, 1.0);

        let report =
            find_contact_point(&mut info, &mut fe, &[], &target, true, &opts).unwrap();
        assert!(report.search_succeeded);
        assert_relative_eq!(info.closest_point, target, epsilon = 1.0e-10);

        let again = find_contact_point(&mut info, &mut fe, &[], &target, false, &opts).unwrap();
        assert!(again.search_succeeded);
        assert!(again.newton_iterations <= 1);
        assert_relative_eq!(info.closest_point, target, epsilon = 1.0e-10);
    }

    #[test]
    fn distance_sign_follows_the_normal() {
        let mut fe = LagrangeEvaluator::default();
        let opts = ProjectionOptions::default();
        let eps = 0.05;

        let mut info = PenetrationInfo::new(0, 0, 5, unit_square_side());
        let above = Point::new(0.4, 0.4, 1.0 + eps);
        let report = find_contact_point(&mut info, &mut fe, &[], &above, true, &opts).unwrap();
        assert!(report.contact_point_on_side);
        assert_relative_eq!(info.normal, Vector::z(), epsilon = 1.0e-12);
        assert_relative_eq!(info.distance, -eps, epsilon = 1.0e-12);

        let below = Point::new(0.4, 0.4, 1.0 - eps);
        let _ = find_contact_point(&mut info, &mut fe, &[], &below, true, &opts).unwrap();
        assert_relative_eq!(info.distance, eps, epsilon = 1.0e-12);
    }

    #[test]
    fn off_face_projection_is_clamped() {
        let mut fe = LagrangeEvaluator::default();
        let opts = ProjectionOptions {
            tangential_tolerance: 0.1,
            ..ProjectionOptions::default()
        };
        let mut info = PenetrationInfo::new(0, 0, 5, unit_square_side());
        let pt = Point::new(1.05, 0.5, 1.2);
        let report = find_contact_point(&mut info, &mut fe, &[], &pt, true, &opts).unwrap();
        assert!(report.search_succeeded);
        assert!(report.contact_point_on_side);
        assert_relative_eq!(info.tangential_distance, 0.05, epsilon = 1.0e-10);
        assert_eq!(&info.off_edge_nodes[..], &[5, 6]);
        assert_relative_eq!(info.closest_point_on_face_ref.x, 1.0);
    }

    #[test]
    fn triangle_corner_clamp() {
        let side = tri_side();
        let mut p = Point::new(-0.3, -0.3, 0.0);
        let mut off = SmallVec::new();
        restrict_point_to_face(&mut p, &side, &mut off).unwrap();
        assert_eq!(&off[..], &[10]);
        assert_eq!(p, Point::origin());
    }

    #[test]
    fn triangle_hypotenuse_clamp() {
        let side = tri_side();
        let mut p = Point::new(0.8, 0.6, 0.0);
        let mut off = SmallVec::new();
        restrict_point_to_face(&mut p, &side, &mut off).unwrap();
        assert_eq!(&off[..], &[11, 12]);
        assert_relative_eq!(p.x + p.y, 1.0);
        assert_relative_eq!(p.x, 0.6);
    }

    #[test]
    fn one_dimensional_side_normal_points_out() {
        let elem_points = [
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ];
        let side = Side {
            elem: 0,
            side: 2,
            ty: ElemType::Edge2,
            nodes: [2, 3].into_iter().collect(),
            points: [elem_points[2], elem_points[3]].into_iter().collect(),
        };
        let mut fe = LagrangeEvaluator::default();
        let mut info = PenetrationInfo::new(9, 0, 2, side);
        let report = find_contact_point(
            &mut info,
            &mut fe,
            &elem_points,
            &Point::new(0.25, 1.1, 0.0),
            true,
            &ProjectionOptions::default(),
        )
        .unwrap();
        assert!(report.contact_point_on_side);
        assert_relative_eq!(info.normal, Vector::y(), epsilon = 1.0e-12);
        assert_relative_eq!(info.distance, -0.1, epsilon = 1.0e-12);
        assert_relative_eq!(info.closest_point, Point::new(0.25, 1.0, 0.0), epsilon = 1.0e-12);
    }
}
