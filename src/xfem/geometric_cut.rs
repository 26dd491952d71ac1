use crate::math::{Point, Real};
use crate::mesh::ElemType;
use crate::utils;
use crate::xfem::XfemError;

/// A cut of a 2D element edge (or fragment edge).
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CutEdge {
    /// The index of the cut edge in the element (or fragment).
    pub host_side: usize,
    /// The position of the cut from the first node of the edge, in `[0, 1]`.
    pub distance: Real,
}

/// A cut crossing a face of a 3D element (or fragment) through two of its edges.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CutFace {
    /// The index of the cut face.
    pub face: usize,
    /// The two cut edges, as indices within the face.
    pub face_edges: [usize; 2],
    /// The position of each cut from the first node of its face edge.
    pub positions: [Real; 2],
}

/// The time window over which a cut grows to its full extent.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct CutTiming {
    /// The time the cut starts to grow.
    pub t_start: Real,
    /// The time the cut reaches its full extent.
    pub t_end: Real,
}

impl Default for CutTiming {
    fn default() -> Self {
        Self {
            t_start: 0.0,
            t_end: 0.0,
        }
    }
}

impl CutTiming {
    /// The fraction of the cut present at `time`, in `[0, 1]`.
    pub fn cut_fraction(&self, time: Real) -> Real {
        if time < self.t_start {
            0.0
        } else if time >= self.t_end {
            1.0
        } else {
            (time - self.t_start) / (self.t_end - self.t_start)
        }
    }
}

/// A cut defined by a geometric entity instead of by the state of the material.
///
/// 2D cuts cut element edges, 3D cuts cut element faces. Asking a cut for the other
/// dimension fails with [`XfemError::UnsupportedCutDimension`].
pub trait GeometricCut: Send + Sync {
    /// The dimension of the meshes this cut applies to.
    fn dim(&self) -> usize;

    /// Does this cut exist at `time`?
    fn active(&self, time: Real) -> bool;

    /// The cuts of the edges of a 2D element with vertices `vertices`.
    fn cut_element_edges(
        &self,
        ty: ElemType,
        vertices: &[Point<Real>],
        time: Real,
    ) -> Result<Vec<CutEdge>, XfemError> {
        let _ = (ty, vertices, time);
        Err(XfemError::UnsupportedCutDimension {
            cut_dim: self.dim(),
            requested: "element edges",
        })
    }

    /// The cuts of the boundary edges of a 2D fragment.
    fn cut_fragment_edges(
        &self,
        frag_edges: &[[Point<Real>; 2]],
        time: Real,
    ) -> Result<Vec<CutEdge>, XfemError> {
        let _ = (frag_edges, time);
        Err(XfemError::UnsupportedCutDimension {
            cut_dim: self.dim(),
            requested: "fragment edges",
        })
    }

    /// The cuts of the faces of a 3D element with vertices `vertices`.
    fn cut_element_faces(
        &self,
        ty: ElemType,
        vertices: &[Point<Real>],
        time: Real,
    ) -> Result<Vec<CutFace>, XfemError> {
        let _ = (ty, vertices, time);
        Err(XfemError::UnsupportedCutDimension {
            cut_dim: self.dim(),
            requested: "element faces",
        })
    }

    /// The cuts of the boundary faces of a 3D fragment.
    fn cut_fragment_faces(
        &self,
        frag_faces: &[Vec<Point<Real>>],
        time: Real,
    ) -> Result<Vec<CutFace>, XfemError> {
        let _ = (frag_faces, time);
        Err(XfemError::UnsupportedCutDimension {
            cut_dim: self.dim(),
            requested: "fragment faces",
        })
    }
}

/// The vertex cycles of the faces of a 3D element.
pub(crate) fn element_faces(ty: ElemType, vertices: &[Point<Real>]) -> Vec<Vec<Point<Real>>> {
    (0..ty.n_sides())
        .filter_map(|s| ty.side_nodes(s))
        .map(|side| side.iter().map(|i| vertices[*i]).collect())
        .collect()
}

/// Cuts every face whose edges are crossed exactly twice by `intersect`.
///
/// `intersect` returns the points where the cut crosses the segment `[p1, p2]`.
pub(crate) fn cut_faces_with<F>(faces: &[Vec<Point<Real>>], mut intersect: F) -> Vec<CutFace>
where
    F: FnMut(&Point<Real>, &Point<Real>) -> Vec<Point<Real>>,
{
    let mut result = Vec::new();

    for (i, face) in faces.iter().enumerate() {
        let n = face.len();
        let mut edges = Vec::new();
        let mut positions = Vec::new();

        for j in 0..n {
            let (p1, p2) = (&face[j], &face[(j + 1) % n]);
            for pt in intersect(p1, p2) {
                edges.push(j);
                positions.push(relative_position(p1, p2, &pt));
            }
        }

        if edges.len() == 2 {
            result.push(CutFace {
                face: i,
                face_edges: [edges[0], edges[1]],
                positions: [positions[0], positions[1]],
            });
        }
    }

    result
}

/// Does `p`, lying on the line through `p1` and `p2`, lie between them?
pub(crate) fn is_inside_edge(p1: &Point<Real>, p2: &Point<Real>, p: &Point<Real>) -> bool {
    let dir = p2 - p1;
    (p1 - p).dot(&dir) * (p2 - p).dot(&dir) <= 0.0
}

/// The distance from `p1` to `p` relative to the length of `[p1, p2]`.
pub(crate) fn relative_position(p1: &Point<Real>, p2: &Point<Real>, p: &Point<Real>) -> Real {
    na::distance(p1, p) / na::distance(p1, p2)
}

/// A straight crack in a 2D mesh, growing linearly from its first end point to its second
/// over a time window.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct LineSegmentCut {
    /// The end points of the fully grown crack.
    pub ends: [Point<Real>; 2],
    /// When the crack grows.
    pub timing: CutTiming,
}

impl LineSegmentCut {
    /// A crack from `(x0, y0)` to `(x1, y1)`, present from the start.
    pub fn new(x0: Real, y0: Real, x1: Real, y1: Real) -> Self {
        Self {
            ends: [Point::new(x0, y0, 0.0), Point::new(x1, y1, 0.0)],
            timing: CutTiming::default(),
        }
    }

    /// A crack growing from `(x0, y0)` at `t_start` to `(x1, y1)` at `t_end`.
    pub fn growing(x0: Real, y0: Real, x1: Real, y1: Real, t_start: Real, t_end: Real) -> Self {
        Self {
            timing: CutTiming { t_start, t_end },
            ..Self::new(x0, y0, x1, y1)
        }
    }

    /// The part of the crack present at `time`.
    pub fn segment_at(&self, time: Real) -> [Point<Real>; 2] {
        let frac = self.timing.cut_fraction(time);
        [
            self.ends[0],
            self.ends[0] + (self.ends[1] - self.ends[0]) * frac,
        ]
    }

    // The position along `[p1, p2]` where the crack crosses it.
    fn intersect_segment(&self, p1: &Point<Real>, p2: &Point<Real>, time: Real) -> Option<Real> {
        let [a, b] = self.segment_at(time);
        if a == b {
            return None;
        }
        utils::segment_segment_intersection_2d(p1, p2, &a, &b).map(|(s, _)| s)
    }
}

impl GeometricCut for LineSegmentCut {
    fn dim(&self) -> usize {
        2
    }

    fn active(&self, time: Real) -> bool {
        self.timing.cut_fraction(time) > 0.0
    }

    fn cut_element_edges(
        &self,
        ty: ElemType,
        vertices: &[Point<Real>],
        time: Real,
    ) -> Result<Vec<CutEdge>, XfemError> {
        if ty.dim() != 2 {
            return Err(XfemError::UnsupportedCutDimension {
                cut_dim: 2,
                requested: "the edges of a non-2D element",
            });
        }

        Ok(ty
            .edges()
            .iter()
            .enumerate()
            .filter_map(|(i, [a, b])| {
                self.intersect_segment(&vertices[*a], &vertices[*b], time)
                    .map(|distance| CutEdge {
                        host_side: i,
                        distance,
                    })
            })
            .collect())
    }

    fn cut_fragment_edges(
        &self,
        frag_edges: &[[Point<Real>; 2]],
        time: Real,
    ) -> Result<Vec<CutEdge>, XfemError> {
        Ok(frag_edges
            .iter()
            .enumerate()
            .filter_map(|(i, [a, b])| {
                self.intersect_segment(a, b, time).map(|distance| CutEdge {
                    host_side: i,
                    distance,
                })
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square() -> Vec<Point<Real>> {
        vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ]
    }

    #[test]
    fn horizontal_crack_cuts_both_vertical_edges() {
        let cut = LineSegmentCut::new(-0.5, 0.25, 1.5, 0.25);
        let edges = cut
            .cut_element_edges(ElemType::Quad4, &unit_square(), 1.0)
            .unwrap();

        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].host_side, 1);
        assert_relative_eq!(edges[0].distance, 0.25);
        assert_eq!(edges[1].host_side, 3);
        assert_relative_eq!(edges[1].distance, 0.75);
    }

    #[test]
    fn growing_crack_only_reaches_the_first_edge_halfway() {
        let cut = LineSegmentCut::growing(-0.5, 0.5, 1.5, 0.5, 0.0, 1.0);
        assert!(!cut.active(-1.0));
        assert!(cut.active(0.5));

        // At t = 0.5 the crack ends at x = 0.5.
        let edges = cut
            .cut_element_edges(ElemType::Quad4, &unit_square(), 0.5)
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].host_side, 3);
    }

    #[test]
    fn a_2d_cut_cannot_cut_faces() {
        let cut = LineSegmentCut::new(0.0, 0.0, 1.0, 1.0);
        assert!(matches!(
            cut.cut_element_faces(ElemType::Hex8, &[], 0.0),
            Err(XfemError::UnsupportedCutDimension { cut_dim: 2, .. })
        ));
    }

    #[test]
    fn timing_with_an_empty_window_is_a_step() {
        let timing = CutTiming {
            t_start: 0.9,
            t_end: 0.9,
        };
        assert_eq!(timing.cut_fraction(0.5), 0.0);
        assert_eq!(timing.cut_fraction(1.0), 1.0);
    }
}
