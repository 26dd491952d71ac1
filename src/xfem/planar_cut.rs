//! Flat crack surfaces cutting 3D meshes.

use crate::math::{Point, Real, Vector};
use crate::mesh::ElemType;
use crate::utils;
use crate::xfem::geometric_cut::{cut_faces_with, element_faces, is_inside_edge};
use crate::xfem::{CutFace, GeometricCut, XfemError};

/// A bounded region of a plane.
pub trait PlanarCutShape {
    /// A point of the plane, inside the region.
    fn center(&self) -> Point<Real>;
    /// The unit normal of the plane.
    fn normal(&self) -> Vector<Real>;
    /// Does the point `p` of the plane lie inside the region?
    fn contains(&self, p: &Point<Real>) -> bool;

    /// The point where the segment `[p1, p2]` crosses the region.
    fn intersect_with_edge(&self, p1: &Point<Real>, p2: &Point<Real>) -> Option<Point<Real>> {
        let pt = utils::plane_line_intersection(&self.center(), &self.normal(), p1, p2)?;
        (self.contains(&pt) && is_inside_edge(p1, p2, &pt)).then_some(pt)
    }
}

/// Is the point `p` inside the convex polygon `vertices` of normal `normal`?
///
/// `vertices` turn counter-clockwise around `normal`.
pub(crate) fn is_inside_convex_polygon(
    vertices: &[Point<Real>],
    normal: &Vector<Real>,
    p: &Point<Real>,
) -> bool {
    let n = vertices.len();
    (0..n).all(|i| {
        let (a, b) = (&vertices[i], &vertices[(i + 1) % n]);
        let middle_to_p = utils::normalize_or_keep(p - na::center(a, b));
        let side_normal = utils::normalize_or_keep((b - a).cross(normal));
        middle_to_p.dot(&side_normal) <= 0.0
    })
}

macro_rules! impl_planar_geometric_cut(
    ($($T: ty),*) => {$(
        impl GeometricCut for $T {
            fn dim(&self) -> usize {
                3
            }

            fn active(&self, time: Real) -> bool {
                time >= self.t_start
            }

            fn cut_element_faces(
                &self,
                ty: ElemType,
                vertices: &[Point<Real>],
                _time: Real,
            ) -> Result<Vec<CutFace>, XfemError> {
                if ty.dim() != 3 {
                    return Err(XfemError::UnsupportedCutDimension {
                        cut_dim: 3,
                        requested: "the faces of a non-3D element",
                    });
                }
                let faces = element_faces(ty, vertices);
                Ok(cut_faces_with(&faces, |p1, p2| {
                    self.intersect_with_edge(p1, p2).into_iter().collect()
                }))
            }

            fn cut_fragment_faces(
                &self,
                frag_faces: &[Vec<Point<Real>>],
                _time: Real,
            ) -> Result<Vec<CutFace>, XfemError> {
                Ok(cut_faces_with(frag_faces, |p1, p2| {
                    self.intersect_with_edge(p1, p2).into_iter().collect()
                }))
            }
        }
    )*}
);

impl_planar_geometric_cut!(CircleCut, EllipseCut, RectangleCut);

/// A disk-shaped crack.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CircleCut {
    center: Point<Real>,
    normal: Vector<Real>,
    radius: Real,
    /// The time the crack appears.
    pub t_start: Real,
}

impl CircleCut {
    /// The disk through `vertex1` and `vertex2` centered at `center`.
    ///
    /// The radius is the mean distance of both vertices to the center. Returns `None` if the
    /// three points are aligned.
    pub fn new(center: Point<Real>, vertex1: Point<Real>, vertex2: Point<Real>) -> Option<Self> {
        let (r1, r2) = (vertex1 - center, vertex2 - center);
        let normal = r1.cross(&r2).try_normalize(Real::EPSILON)?;
        Some(Self {
            center,
            normal,
            radius: 0.5 * (r1.norm() + r2.norm()),
            t_start: 0.0,
        })
    }

    /// The radius of the disk.
    pub fn radius(&self) -> Real {
        self.radius
    }
}

impl PlanarCutShape for CircleCut {
    fn center(&self) -> Point<Real> {
        self.center
    }

    fn normal(&self) -> Vector<Real> {
        self.normal
    }

    fn contains(&self, p: &Point<Real>) -> bool {
        na::distance(p, &self.center) <= self.radius
    }
}

/// An elliptic crack.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct EllipseCut {
    center: Point<Real>,
    normal: Vector<Real>,
    axes: [Vector<Real>; 2],
    radii: [Real; 2],
    /// The time the crack appears.
    pub t_start: Real,
}

impl EllipseCut {
    /// The ellipse centered at `center` with semi-axes ending at `major_vertex` and
    /// `minor_vertex`.
    ///
    /// The minor axis is made orthogonal to the major one. Returns `None` if the three points
    /// are aligned.
    pub fn new(
        center: Point<Real>,
        major_vertex: Point<Real>,
        minor_vertex: Point<Real>,
    ) -> Option<Self> {
        let major = major_vertex - center;
        let minor = minor_vertex - center;
        let normal = major.cross(&minor).try_normalize(Real::EPSILON)?;
        let u = major.try_normalize(Real::EPSILON)?;
        let v = normal.cross(&u);
        Some(Self {
            center,
            normal,
            axes: [u, v],
            radii: [major.norm(), minor.dot(&v).abs()],
            t_start: 0.0,
        })
    }
}

impl PlanarCutShape for EllipseCut {
    fn center(&self) -> Point<Real> {
        self.center
    }

    fn normal(&self) -> Vector<Real> {
        self.normal
    }

    fn contains(&self, p: &Point<Real>) -> bool {
        let d = p - self.center;
        let x = d.dot(&self.axes[0]) / self.radii[0];
        let y = d.dot(&self.axes[1]) / self.radii[1];
        x * x + y * y <= 1.0
    }
}

/// A quadrilateral crack.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct RectangleCut {
    vertices: [Point<Real>; 4],
    center: Point<Real>,
    normal: Vector<Real>,
    /// The time the crack appears.
    pub t_start: Real,
}

impl RectangleCut {
    /// The convex quadrilateral with the given vertex cycle.
    ///
    /// Returns `None` if the first three vertices are aligned.
    pub fn new(vertices: [Point<Real>; 4]) -> Option<Self> {
        let normal = (vertices[1] - vertices[0])
            .cross(&(vertices[2] - vertices[1]))
            .try_normalize(Real::EPSILON)?;
        Some(Self {
            vertices,
            center: utils::center(&vertices),
            normal,
            t_start: 0.0,
        })
    }
}

impl PlanarCutShape for RectangleCut {
    fn center(&self) -> Point<Real> {
        self.center
    }

    fn normal(&self) -> Vector<Real> {
        self.normal
    }

    fn contains(&self, p: &Point<Real>) -> bool {
        is_inside_convex_polygon(&self.vertices, &self.normal, p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_cube() -> Vec<Point<Real>> {
        ElemType::Hex8
            .reference_vertices()
            .iter()
            .map(|v| Point::new(0.5 * (v[0] + 1.0), 0.5 * (v[1] + 1.0), 0.5 * (v[2] + 1.0)))
            .collect()
    }

    #[test]
    fn a_large_disk_cuts_the_four_side_faces() {
        let cut = CircleCut::new(
            Point::new(0.5, 0.5, 0.5),
            Point::new(3.0, 0.5, 0.5),
            Point::new(0.5, 3.0, 0.5),
        )
        .unwrap();
        let faces = cut.cut_element_faces(ElemType::Hex8, &unit_cube(), 0.0).unwrap();

        let ids: Vec<usize> = faces.iter().map(|f| f.face).collect();
        assert_eq!(ids, vec![1, 2, 3, 4]);
        for face in &faces {
            for pos in face.positions {
                assert_relative_eq!(pos, 0.5);
            }
        }
    }

    #[test]
    fn a_small_disk_misses_the_faces() {
        let cut = CircleCut::new(
            Point::new(0.5, 0.5, 0.5),
            Point::new(0.6, 0.5, 0.5),
            Point::new(0.5, 0.6, 0.5),
        )
        .unwrap();
        let faces = cut.cut_element_faces(ElemType::Hex8, &unit_cube(), 0.0).unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn rectangle_and_ellipse_containment() {
        let rect = RectangleCut::new([
            Point::new(0.0, 0.0, 0.0),
            Point::new(2.0, 0.0, 0.0),
            Point::new(2.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ])
        .unwrap();
        assert!(rect.contains(&Point::new(1.5, 0.5, 0.0)));
        assert!(!rect.contains(&Point::new(2.5, 0.5, 0.0)));

        let ellipse = EllipseCut::new(
            Point::origin(),
            Point::new(2.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        assert!(ellipse.contains(&Point::new(1.9, 0.0, 0.0)));
        assert!(!ellipse.contains(&Point::new(0.0, 1.1, 0.0)));
    }

    #[test]
    fn a_3d_cut_cannot_cut_edges() {
        let cut = CircleCut::new(
            Point::origin(),
            Point::new(1.0, 0.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        )
        .unwrap();
        assert!(matches!(
            cut.cut_element_edges(ElemType::Quad4, &[], 0.0),
            Err(XfemError::UnsupportedCutDimension { cut_dim: 3, .. })
        ));
    }
}
