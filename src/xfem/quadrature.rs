//! Quadrature over the physical part of cut elements.

use na::{DMatrix, DVector};
use smallvec::SmallVec;

use crate::fe::{lagrange_shape, map_to_physical, QuadratureRule};
use crate::math::{Matrix2, Point, Real};
use crate::mesh::ElemType;
use crate::utils;

const INV_SQRT3: Real = 0.577_350_269_189_625_8;

// Degree-2 rule on a triangle, as barycentric coordinates of each point. Weights are 1/3 of
// the triangle area.
const TRI_DEGREE2: [[Real; 3]; 3] = [
    [2.0 / 3.0, 1.0 / 6.0, 1.0 / 6.0],
    [1.0 / 6.0, 2.0 / 3.0, 1.0 / 6.0],
    [1.0 / 6.0, 1.0 / 6.0, 2.0 / 3.0],
];

/// The two-point Gauss rule on the segment `[p1, p2]`.
///
/// Weights are in physical length: they sum to the segment length.
pub fn qrule_on_line(p1: &Point<Real>, p2: &Point<Real>) -> ([Point<Real>; 2], [Real; 2]) {
    let mid = na::center(p1, p2);
    let half = (p2 - p1) * 0.5;
    let w = half.norm();
    (
        [mid - half * INV_SQRT3, mid + half * INV_SQRT3],
        [w, w],
    )
}

/// A one-point-per-triangle rule on the polygon `vertices`, fanned around its centroid.
///
/// Triangles get one point each, at their centroid, weighted by their area. The polygon may
/// lie anywhere in 3D.
pub fn qrule_on_surface(vertices: &[Point<Real>]) -> (Vec<Point<Real>>, Vec<Real>) {
    let c = utils::center(vertices);
    let n = vertices.len();
    let mut points = Vec::with_capacity(n);
    let mut weights = Vec::with_capacity(n);

    for i in 0..n {
        let (a, b) = (&vertices[i], &vertices[(i + 1) % n]);
        points.push(utils::center(&[c, *a, *b]));
        weights.push(0.5 * (a - c).cross(&(b - c)).norm());
    }

    (points, weights)
}

// A degree-2 rule on the polygon `vertices` of the `xy` plane, fanned around its centroid.
// Weights are signed areas, positive for counter-clockwise polygons.
fn polygon_rule(vertices: &[Point<Real>]) -> Vec<(Point<Real>, Real)> {
    let c = utils::center(vertices);
    let n = vertices.len();
    let mut rule = Vec::with_capacity(3 * n);

    for i in 0..n {
        let tri = [c, vertices[i], vertices[(i + 1) % n]];
        let area = utils::polygon_area_2d(&tri);
        for bary in &TRI_DEGREE2 {
            let mut p = Point::origin();
            for (v, l) in tri.iter().zip(bary) {
                p.coords += v.coords * *l;
            }
            rule.push((p, area / 3.0));
        }
    }

    rule
}

// The first `n` monomials among `1, x, y, xy, x², y²`.
//
// Four-point rules use the bilinear basis and six-point rules the full quadratic one.
fn monomials(n: usize, x: Real, y: Real) -> SmallVec<[Real; 6]> {
    let all = [1.0, x, y, x * y, x * x, y * y];
    all[..n.min(6)].iter().copied().collect()
}

/// The jacobian determinant of the 2D element `vertices` at the reference point `p`.
pub fn jacobian_2d(ty: ElemType, vertices: &[Point<Real>], p: &Point<Real>) -> Real {
    let shape = lagrange_shape(ty, p);
    let mut jac = Matrix2::zeros();
    for (dphi, v) in shape.dphi.iter().zip(vertices) {
        jac[(0, 0)] += v.x * dphi.x;
        jac[(0, 1)] += v.x * dphi.y;
        jac[(1, 0)] += v.y * dphi.x;
        jac[(1, 1)] += v.y * dphi.y;
    }
    jac.determinant()
}

/// Quadrature weight multipliers reproducing the low-order moments of a 2D fragment.
///
/// `rule` is the reference rule of the element `vertices`, and `fragment` the vertex cycle
/// of its physical part. Each new weight is found so that the rule integrates the monomials
/// of its degree exactly over the fragment, then divided by the original physical weight.
/// Returns `None` if the rule has more than six points or the moment system is singular.
pub fn moment_fitting_multipliers(
    ty: ElemType,
    vertices: &[Point<Real>],
    rule: &QuadratureRule,
    fragment: &[Point<Real>],
) -> Option<Vec<Real>> {
    let n = rule.len();
    if n == 0 || n > 6 {
        return None;
    }

    // Monomials are evaluated around the element centroid, scaled by its size.
    let origin = utils::center(vertices);
    let scale = vertices
        .iter()
        .map(|v| na::distance(v, &origin))
        .fold(0.0, Real::max);
    if scale <= 0.0 {
        return None;
    }
    let local = |p: &Point<Real>| ((p.x - origin.x) / scale, (p.y - origin.y) / scale);

    let mut a = DMatrix::zeros(n, n);
    for (j, qp) in rule.points.iter().enumerate() {
        let (x, y) = local(&map_to_physical(ty, vertices, qp));
        for (i, m) in monomials(n, x, y).into_iter().enumerate() {
            a[(i, j)] = m;
        }
    }

    let mut b = DVector::zeros(n);
    for (p, w) in polygon_rule(fragment) {
        let (x, y) = local(&p);
        for (i, m) in monomials(n, x, y).into_iter().enumerate() {
            b[i] += m * w;
        }
    }

    let weights = a.svd(true, true).solve(&b, 1.0e-12).ok()?;

    rule.points
        .iter()
        .zip(rule.weights.iter())
        .enumerate()
        .map(|(j, (qp, w0))| {
            let original = w0 * jacobian_2d(ty, vertices, qp);
            (original.abs() > Real::EPSILON).then(|| weights[j] / original)
        })
        .collect()
}
