//! Stateless geometric primitives shared by the contact and cutting engines.

use crate::math::{Point, Real, Vector, DEFAULT_EPSILON};

/// Computes the geometric center (centroid) of a set of points.
///
/// Returns the origin if `pts` is empty.
#[inline]
pub fn center(pts: &[Point<Real>]) -> Point<Real> {
    if pts.is_empty() {
        return Point::origin();
    }

    let denom = 1.0 / pts.len() as Real;
    let mut res = Point::origin();

    for pt in pts {
        res += pt.coords * denom;
    }

    res
}

/// Normalizes `v`, or returns it unchanged if its norm is zero.
///
/// Degenerate normals are kept unnormalized so that the caller's sign checks see a
/// zero vector instead of NaNs.
#[inline]
pub fn normalize_or_keep(v: Vector<Real>) -> Vector<Real> {
    let len = v.norm();
    if len > 0.0 {
        v / len
    } else {
        v
    }
}

/// Intersects the infinite line through `p1` and `p2` with the plane through `plane_point`
/// with normal `plane_normal`.
///
/// Returns `None` if the segment is degenerate (`p1 == p2`), if the plane normal is zero,
/// or if the line is parallel to the plane (including the case where it lies inside it).
pub fn plane_line_intersection(
    plane_point: &Point<Real>,
    plane_normal: &Vector<Real>,
    p1: &Point<Real>,
    p2: &Point<Real>,
) -> Option<Point<Real>> {
    let dir = p2 - p1;
    let normal_len = plane_normal.norm();

    if dir.norm_squared() == 0.0 || normal_len == 0.0 {
        return None;
    }

    let n = plane_normal / normal_len;
    let denom = n.dot(&dir);

    if denom.abs() <= DEFAULT_EPSILON * dir.norm() {
        return None;
    }

    let t = n.dot(&(plane_point - p1)) / denom;
    Some(p1 + dir * t)
}

/// Intersects the segment `[p1, p2]` with a plane and returns the intersection point
/// together with its parametric position along the segment (0 at `p1`, 1 at `p2`).
pub fn segment_plane_intersection(
    plane_point: &Point<Real>,
    plane_normal: &Vector<Real>,
    p1: &Point<Real>,
    p2: &Point<Real>,
) -> Option<(Point<Real>, Real)> {
    let pt = plane_line_intersection(plane_point, plane_normal, p1, p2)?;
    let dir = p2 - p1;
    let t = (pt - p1).dot(&dir) / dir.norm_squared();

    if (0.0..=1.0).contains(&t) {
        Some((pt, t))
    } else {
        None
    }
}

/// Intersection of two segments in the `xy` plane.
///
/// Returns the parametric positions `(s, t)` of the intersection along `[a, b]` and `[c, d]`.
/// Parallel segments never intersect.
pub fn segment_segment_intersection_2d(
    a: &Point<Real>,
    b: &Point<Real>,
    c: &Point<Real>,
    d: &Point<Real>,
) -> Option<(Real, Real)> {
    let r = b - a;
    let q = d - c;
    let denom = r.x * q.y - r.y * q.x;

    if denom.abs() <= DEFAULT_EPSILON * r.norm() * q.norm() || ulps_eq!(denom, 0.0) {
        return None;
    }

    let ac = c - a;
    let s = (ac.x * q.y - ac.y * q.x) / denom;
    let t = (ac.x * r.y - ac.y * r.x) / denom;

    if 0.0 > s || s > 1.0 || 0.0 > t || t > 1.0 {
        None
    } else {
        Some((s, t))
    }
}

/// Closest point to `p` on the segment `[a, b]` and its distance to `p`.
pub fn point_segment_distance(
    p: &Point<Real>,
    a: &Point<Real>,
    b: &Point<Real>,
) -> (Real, Point<Real>) {
    let ab = b - a;
    let len2 = ab.norm_squared();

    let closest = if len2 == 0.0 {
        *a
    } else {
        let t = ((p - a).dot(&ab) / len2).clamp(0.0, 1.0);
        a + ab * t
    };

    (na::distance(p, &closest), closest)
}

/// Closest point to `p` on the triangle `(a, b, c)` and its distance to `p`.
pub fn point_triangle_distance(
    p: &Point<Real>,
    a: &Point<Real>,
    b: &Point<Real>,
    c: &Point<Real>,
) -> (Real, Point<Real>) {
    let ab = b - a;
    let ac = c - a;
    let ap = p - a;

    let d1 = ab.dot(&ap);
    let d2 = ac.dot(&ap);
    if d1 <= 0.0 && d2 <= 0.0 {
        return (na::distance(p, a), *a);
    }

    let bp = p - b;
    let d3 = ab.dot(&bp);
    let d4 = ac.dot(&bp);
    if d3 >= 0.0 && d4 <= d3 {
        return (na::distance(p, b), *b);
    }

    let vc = d1 * d4 - d3 * d2;
    if vc <= 0.0 && d1 >= 0.0 && d3 <= 0.0 {
        let v = d1 / (d1 - d3);
        let proj = a + ab * v;
        return (na::distance(p, &proj), proj);
    }

    let cp = p - c;
    let d5 = ab.dot(&cp);
    let d6 = ac.dot(&cp);
    if d6 >= 0.0 && d5 <= d6 {
        return (na::distance(p, c), *c);
    }

    let vb = d5 * d2 - d1 * d6;
    if vb <= 0.0 && d2 >= 0.0 && d6 <= 0.0 {
        let w = d2 / (d2 - d6);
        let proj = a + ac * w;
        return (na::distance(p, &proj), proj);
    }

    let va = d3 * d6 - d5 * d4;
    if va <= 0.0 && (d4 - d3) >= 0.0 && (d5 - d6) >= 0.0 {
        let w = (d4 - d3) / ((d4 - d3) + (d5 - d6));
        let proj = b + (c - b) * w;
        return (na::distance(p, &proj), proj);
    }

    let denom = 1.0 / (va + vb + vc);
    let v = vb * denom;
    let w = vc * denom;
    let proj = a + ab * v + ac * w;
    (na::distance(p, &proj), proj)
}

/// Signed area of a polygon lying in the `xy` plane (shoelace formula).
///
/// Counter-clockwise polygons have a positive area.
pub fn polygon_area_2d(pts: &[Point<Real>]) -> Real {
    let n = pts.len();
    if n < 3 {
        return 0.0;
    }

    let mut twice_area = 0.0;
    for i in 0..n {
        let a = &pts[i];
        let b = &pts[(i + 1) % n];
        twice_area += a.x * b.y - b.x * a.y;
    }

    twice_area * 0.5
}

/// Area normal of a (possibly non-planar) polygon in 3D.
///
/// The norm of the result is the polygon area and its direction follows the right-hand
/// rule on the vertex ordering.
pub fn polygon_area_normal(pts: &[Point<Real>]) -> Vector<Real> {
    let c = center(pts);
    let n = pts.len();
    let mut normal = Vector::zeros();

    for i in 0..n {
        let a = pts[i] - c;
        let b = pts[(i + 1) % n] - c;
        normal += a.cross(&b);
    }

    normal * 0.5
}

/// Signed volume of a closed polyhedron given by its faces.
///
/// Each face is a vertex cycle oriented with its normal pointing outward. Faces are fanned
/// around their centroid, so slightly non-planar faces are handled consistently.
pub fn polyhedron_volume_3d(faces: &[Vec<Point<Real>>]) -> Real {
    let mut six_volume = 0.0;

    for face in faces {
        let n = face.len();
        if n < 3 {
            continue;
        }

        let c = center(face);
        for i in 0..n {
            let a = &face[i];
            let b = &face[(i + 1) % n];
            six_volume += c.coords.dot(&a.coords.cross(&b.coords));
        }
    }

    six_volume / 6.0
}

/// Volume of the tetrahedron `(a, b, c, d)`, positive if `d` lies on the side of the
/// right-handed normal of `(a, b, c)`.
#[inline]
pub fn tetrahedron_signed_volume(
    a: &Point<Real>,
    b: &Point<Real>,
    c: &Point<Real>,
    d: &Point<Real>,
) -> Real {
    (b - a).cross(&(c - a)).dot(&(d - a)) / 6.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plane_line_intersection_hits_and_misses() {
        let origin = Point::origin();
        let normal = Vector::z();
        let hit = plane_line_intersection(
            &origin,
            &normal,
            &Point::new(0.3, 0.2, -1.0),
            &Point::new(0.3, 0.2, 1.0),
        );
        assert_relative_eq!(hit.unwrap(), Point::new(0.3, 0.2, 0.0));

        let parallel = plane_line_intersection(
            &origin,
            &normal,
            &Point::new(0.0, 0.0, 1.0),
            &Point::new(1.0, 0.0, 1.0),
        );
        assert!(parallel.is_none());

        let degenerate = plane_line_intersection(
            &origin,
            &normal,
            &Point::new(0.0, 0.0, 1.0),
            &Point::new(0.0, 0.0, 1.0),
        );
        assert!(degenerate.is_none());
    }

    #[test]
    fn segment_plane_intersection_reports_position() {
        let (pt, t) = segment_plane_intersection(
            &Point::new(0.25, 0.0, 0.0),
            &Vector::x(),
            &Point::new(0.0, 0.0, 0.0),
            &Point::new(1.0, 0.0, 0.0),
        )
        .unwrap();
        assert_relative_eq!(t, 0.25);
        assert_relative_eq!(pt, Point::new(0.25, 0.0, 0.0));
    }

    #[test]
    fn segments_crossing_in_the_plane() {
        let (s, t) = segment_segment_intersection_2d(
            &Point::new(0.0, 0.0, 0.0),
            &Point::new(2.0, 0.0, 0.0),
            &Point::new(0.5, -1.0, 0.0),
            &Point::new(0.5, 1.0, 0.0),
        )
        .unwrap();
        assert_relative_eq!(s, 0.25);
        assert_relative_eq!(t, 0.5);
    }

    #[test]
    fn point_triangle_regions() {
        let a = Point::new(0.0, 0.0, 0.0);
        let b = Point::new(1.0, 0.0, 0.0);
        let c = Point::new(0.0, 1.0, 0.0);

        let (d, proj) = point_triangle_distance(&Point::new(0.2, 0.2, 1.0), &a, &b, &c);
        assert_relative_eq!(d, 1.0);
        assert_relative_eq!(proj, Point::new(0.2, 0.2, 0.0));

        let (d, proj) = point_triangle_distance(&Point::new(-1.0, -1.0, 0.0), &a, &b, &c);
        assert_relative_eq!(d, 2.0_f64.sqrt());
        assert_relative_eq!(proj, a);

        let (_, proj) = point_triangle_distance(&Point::new(1.0, 1.0, 0.0), &a, &b, &c);
        assert_relative_eq!(proj, Point::new(0.5, 0.5, 0.0));
    }

    #[test]
    fn unit_cube_volume() {
        let p = |x: Real, y: Real, z: Real| Point::new(x, y, z);
        let faces = vec![
            vec![p(0., 0., 0.), p(0., 1., 0.), p(1., 1., 0.), p(1., 0., 0.)],
            vec![p(0., 0., 0.), p(1., 0., 0.), p(1., 0., 1.), p(0., 0., 1.)],
            vec![p(1., 0., 0.), p(1., 1., 0.), p(1., 1., 1.), p(1., 0., 1.)],
            vec![p(1., 1., 0.), p(0., 1., 0.), p(0., 1., 1.), p(1., 1., 1.)],
            vec![p(0., 1., 0.), p(0., 0., 0.), p(0., 0., 1.), p(0., 1., 1.)],
            vec![p(0., 0., 1.), p(1., 0., 1.), p(1., 1., 1.), p(0., 1., 1.)],
        ];
        assert_relative_eq!(polyhedron_volume_3d(&faces), 1.0, epsilon = 1.0e-12);
    }

    #[test]
    fn shoelace_orientation() {
        let square = [
            Point::new(0.0, 0.0, 0.0),
            Point::new(2.0, 0.0, 0.0),
            Point::new(2.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ];
        assert_relative_eq!(polygon_area_2d(&square), 2.0);
        let mut reversed = square;
        reversed.reverse();
        assert_relative_eq!(polygon_area_2d(&reversed), -2.0);
        assert_relative_eq!(polygon_area_normal(&square).z, 2.0);
    }
}
