use crate::math::{Point, Real, Vector, TOLERANCE};
use crate::mesh::{ElemType, Mesh, MeshError};
use crate::utils;
use crate::xfem::geometric_cut::{cut_faces_with, element_faces, is_inside_edge};
use crate::xfem::planar_cut::is_inside_convex_polygon;
use crate::xfem::{CutFace, GeometricCut, XfemError};

/// A crack surface given as a triangulated mesh.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct MeshCut {
    vertices: Vec<Point<Real>>,
    triangles: Vec<[usize; 3]>,
    normals: Vec<Vector<Real>>,
    /// The time the crack appears.
    pub t_start: Real,
}

impl MeshCut {
    /// The crack surface made of `triangles` indexing `vertices`.
    ///
    /// Returns `None` if a triangle refers to a missing vertex or is degenerate.
    pub fn new(vertices: Vec<Point<Real>>, triangles: Vec<[usize; 3]>) -> Option<Self> {
        let mut normals = Vec::with_capacity(triangles.len());
        for tri in &triangles {
            let [a, b, c] = [
                vertices.get(tri[0])?,
                vertices.get(tri[1])?,
                vertices.get(tri[2])?,
            ];
            normals.push((b - a).cross(&(c - a)).try_normalize(Real::EPSILON)?);
        }

        Some(Self {
            vertices,
            triangles,
            normals,
            t_start: 0.0,
        })
    }

    /// The crack surface made of the `Tri3` elements of `mesh`.
    pub fn from_mesh(mesh: &Mesh) -> Result<Self, XfemError> {
        let mut ids = Vec::new();
        let mut vertices = Vec::new();
        for (id, pt) in mesh.nodes() {
            ids.push(id);
            vertices.push(*pt);
        }

        let mut triangles = Vec::with_capacity(mesh.n_elems());
        for elem in mesh.elems() {
            if elem.ty != ElemType::Tri3 {
                return Err(MeshError::WrongNodeCount {
                    ty: elem.ty,
                    expected: 3,
                    found: elem.nodes.len(),
                }
                .into());
            }
            let mut tri = [0; 3];
            for (k, node) in elem.nodes.iter().enumerate() {
                tri[k] = ids
                    .binary_search(node)
                    .map_err(|_| MeshError::UnknownNode(*node))?;
            }
            triangles.push(tri);
        }

        Self::new(vertices, triangles).ok_or(XfemError::UnsupportedCutDimension {
            cut_dim: 3,
            requested: "a mesh with degenerate triangles",
        })
    }

    /// The number of triangles.
    pub fn num_triangles(&self) -> usize {
        self.triangles.len()
    }

    fn triangle(&self, i: usize) -> [Point<Real>; 3] {
        let [a, b, c] = self.triangles[i];
        [self.vertices[a], self.vertices[b], self.vertices[c]]
    }

    // The points where `[p1, p2]` crosses the surface. Crossings on the boundary between
    // two triangles are reported once.
    fn intersect_with_edge(&self, p1: &Point<Real>, p2: &Point<Real>) -> Vec<Point<Real>> {
        let mut result: Vec<Point<Real>> = Vec::new();
        let tol = TOLERANCE * na::distance(p1, p2);

        for (i, normal) in self.normals.iter().enumerate() {
            let tri = self.triangle(i);
            let center = utils::center(&tri);
            let Some(pt) = utils::plane_line_intersection(&center, normal, p1, p2) else {
                continue;
            };
            if is_inside_convex_polygon(&tri, normal, &pt)
                && is_inside_edge(p1, p2, &pt)
                && !result.iter().any(|q| na::distance(q, &pt) <= tol)
            {
                result.push(pt);
            }
        }

        result
    }
}

impl GeometricCut for MeshCut {
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
        Ok(cut_faces_with(&faces, |p1, p2| self.intersect_with_edge(p1, p2)))
    }

    fn cut_fragment_faces(
        &self,
        frag_faces: &[Vec<Point<Real>>],
        _time: Real,
    ) -> Result<Vec<CutFace>, XfemError> {
        Ok(cut_faces_with(frag_faces, |p1, p2| {
            self.intersect_with_edge(p1, p2)
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Two triangles covering the square [-1, 2]² at height z.
    fn square_at(z: Real) -> MeshCut {
        MeshCut::new(
            vec![
                Point::new(-1.0, -1.0, z),
                Point::new(2.0, -1.0, z),
                Point::new(2.0, 2.0, z),
                Point::new(-1.0, 2.0, z),
            ],
            vec![[0, 1, 2], [0, 2, 3]],
        )
        .unwrap()
    }

    #[test]
    fn crossings_on_the_triangle_diagonal_are_not_duplicated() {
        let cut = square_at(0.3);
        let hits = cut.intersect_with_edge(&Point::new(0.5, 0.5, 0.0), &Point::new(0.5, 0.5, 1.0));
        assert_eq!(hits.len(), 1);
        assert_relative_eq!(hits[0], Point::new(0.5, 0.5, 0.3));
    }

    #[test]
    fn a_flat_surface_cuts_the_side_faces_of_a_cube() {
        let cube: Vec<Point<Real>> = ElemType::Hex8
            .reference_vertices()
            .iter()
            .map(|v| Point::new(0.5 * (v[0] + 1.0), 0.5 * (v[1] + 1.0), 0.5 * (v[2] + 1.0)))
            .collect();
        let faces = square_at(0.25)
            .cut_element_faces(ElemType::Hex8, &cube, 0.0)
            .unwrap();
        assert_eq!(faces.len(), 4);
    }

    #[test]
    fn fragment_faces_are_cut_like_element_faces() {
        // The lower half of the unit cube, below a crack at z = 0.5.
        let p = |x: Real, y: Real, z: Real| Point::new(x, y, z);
        let frag_faces = vec![
            vec![p(0.0, 0.0, 0.0), p(0.0, 1.0, 0.0), p(1.0, 1.0, 0.0), p(1.0, 0.0, 0.0)],
            vec![p(0.0, 0.0, 0.0), p(1.0, 0.0, 0.0), p(1.0, 0.0, 0.5), p(0.0, 0.0, 0.5)],
            vec![p(0.0, 0.0, 0.5), p(1.0, 0.0, 0.5), p(1.0, 1.0, 0.5), p(0.0, 1.0, 0.5)],
        ];
        let faces = square_at(0.25).cut_fragment_faces(&frag_faces, 0.0).unwrap();
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].face, 1);
        assert_relative_eq!(faces[0].positions[0], 0.5, epsilon = 1.0e-12);
        assert_relative_eq!(faces[0].positions[1], 0.5, epsilon = 1.0e-12);
    }

    #[test]
    fn degenerate_triangles_are_rejected() {
        let pts = vec![Point::origin(), Point::new(1.0, 0.0, 0.0), Point::new(2.0, 0.0, 0.0)];
        assert!(MeshCut::new(pts.clone(), vec![[0, 1, 2]]).is_none());
        assert!(MeshCut::new(pts, vec![[0, 1, 5]]).is_none());
    }
}
