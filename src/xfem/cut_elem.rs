use smallvec::{smallvec, SmallVec};

use crate::efa::{
    EfaElement, EfaError, ElementFragmentAlgorithm, FragmentSnapshot, NodeKey, SnapshotNode,
};
use crate::fe::{map_to_physical, QuadratureRule};
use crate::math::{Point, Real, Vector};
use crate::mesh::{Elem, ElemId, ElemType, MeshError, NodeId};
use crate::utils;
use crate::xfem::geometric_cut::element_faces;
use crate::xfem::quadrature::moment_fitting_multipliers;
use crate::xfem::{XfemError, XfemQRule};

/// The weight given to every quadrature point of an element without any physical point.
pub const NO_PHYSICAL_POINT_WEIGHT: Real = 1.0e-3;

/// A node of a fragment boundary, as a weighted sum of the element vertices.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FragmentVertex {
    /// The node, independent of the global node numbering.
    pub node: SnapshotNode,
    /// `(local vertex index, weight)` pairs.
    pub weights: SmallVec<[(usize, Real); 4]>,
}

impl FragmentVertex {
    /// The location of this node in the element with vertices `vertices`.
    pub fn point(&self, vertices: &[Point<Real>]) -> Point<Real> {
        let mut p = Point::origin();
        for (i, w) in &self.weights {
            p.coords += vertices[*i].coords * *w;
        }
        p
    }
}

/// A boundary edge (2D) or face (3D) of a fragment.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct FragmentFacet {
    /// The vertex cycle of the facet. Two vertices for an edge.
    pub vertices: SmallVec<[FragmentVertex; 4]>,
    /// Does this facet lie on the crack rather than on the element boundary?
    pub interior: bool,
}

impl FragmentFacet {
    /// The locations of the facet vertices.
    pub fn points(&self, vertices: &[Point<Real>]) -> Vec<Point<Real>> {
        self.vertices.iter().map(|v| v.point(vertices)).collect()
    }
}

/// A mesh element that was produced by a cut, with the geometry of its physical fragment.
///
/// Vertex coordinates are never stored: every geometric query takes the current vertices of
/// the element, so the same cut element answers for the reference and the displaced mesh.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub struct XfemCutElem {
    elem: ElemId,
    ty: ElemType,
    nodes: SmallVec<[NodeId; 8]>,
    snapshot: FragmentSnapshot,
    partial: bool,
    facets: Vec<FragmentFacet>,
}

impl XfemCutElem {
    /// The cut element for the mesh element `elem`, built from the EFA element `efa_elem`.
    pub fn new(
        efa: &ElementFragmentAlgorithm,
        efa_elem: ElemId,
        elem: &Elem,
    ) -> Result<Self, XfemError> {
        let e = efa.element(efa_elem)?;
        let keys = e.nodes();

        let vertex = |key: NodeKey| -> Result<FragmentVertex, XfemError> {
            if let Some(i) = keys.iter().position(|k| *k == key) {
                return Ok(FragmentVertex {
                    node: SnapshotNode::Local(i),
                    weights: smallvec![(i, 1.0)],
                });
            }
            let weights = e
                .master_info(key)?
                .into_iter()
                .map(|(k, w)| {
                    keys.iter()
                        .position(|x| *x == k)
                        .map(|i| (i, w))
                        .ok_or(EfaError::MissingNode {
                            elem: efa_elem,
                            reason: "a master node is not an element vertex",
                        })
                })
                .collect::<Result<_, _>>()?;
            Ok(FragmentVertex {
                node: SnapshotNode::Embedded(efa.node(key).id),
                weights,
            })
        };

        let mut facets = Vec::new();
        match e {
            EfaElement::Planar(planar) => {
                if let Some(frag) = planar.fragments().first() {
                    for (i, edge) in frag.edges().iter().enumerate() {
                        facets.push(FragmentFacet {
                            vertices: smallvec![vertex(edge.node(0))?, vertex(edge.node(1))?],
                            interior: frag.is_edge_interior(i, planar.edges()),
                        });
                    }
                }
            }
            EfaElement::Solid(solid) => {
                if let Some(frag) = solid.fragments().first() {
                    for (i, face) in frag.faces().iter().enumerate() {
                        facets.push(FragmentFacet {
                            vertices: face
                                .nodes()
                                .into_iter()
                                .map(&vertex)
                                .collect::<Result<_, _>>()?,
                            interior: frag.is_face_interior(i, solid.faces()),
                        });
                    }
                }
            }
        }

        Ok(Self {
            elem: elem.id,
            ty: elem.ty,
            nodes: elem.nodes.clone(),
            snapshot: efa.snapshot_fragment_info(efa_elem)?,
            partial: e.is_partial(),
            facets,
        })
    }

    /// The id of the mesh element.
    pub fn elem(&self) -> ElemId {
        self.elem
    }

    /// The type of the mesh element.
    pub fn elem_type(&self) -> ElemType {
        self.ty
    }

    /// The mesh nodes of the element, in local order.
    pub fn nodes(&self) -> &[NodeId] {
        &self.nodes
    }

    /// Does some vertex of the element lie outside its physical fragment?
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    /// The fragment state to restore when the fragment topology is rebuilt.
    pub fn snapshot(&self) -> &FragmentSnapshot {
        &self.snapshot
    }

    /// The boundary edges (2D) or faces (3D) of the physical fragment.
    pub fn facets(&self) -> &[FragmentFacet] {
        &self.facets
    }

    /// The boundary edges of the physical fragment of a 2D element.
    pub fn fragment_edges(&self, vertices: &[Point<Real>]) -> Vec<[Point<Real>; 2]> {
        if self.ty.dim() != 2 {
            return Vec::new();
        }
        self.facets
            .iter()
            .map(|f| [f.vertices[0].point(vertices), f.vertices[1].point(vertices)])
            .collect()
    }

    /// The boundary faces of the physical fragment of a 3D element.
    pub fn fragment_faces(&self, vertices: &[Point<Real>]) -> Vec<Vec<Point<Real>>> {
        if self.ty.dim() != 3 {
            return Vec::new();
        }
        self.facets.iter().map(|f| f.points(vertices)).collect()
    }

    /// The ratio of the measure of the physical fragment to the measure of the element.
    pub fn physical_volume_fraction(&self, vertices: &[Point<Real>]) -> Result<Real, XfemError> {
        let (fragment, whole) = match self.ty.dim() {
            2 => {
                let cycle: Vec<Point<Real>> = self
                    .facets
                    .iter()
                    .map(|f| f.vertices[0].point(vertices))
                    .collect();
                (
                    utils::polygon_area_2d(&cycle),
                    utils::polygon_area_2d(vertices),
                )
            }
            3 => (
                utils::polyhedron_volume_3d(&self.fragment_faces(vertices)),
                utils::polyhedron_volume_3d(&element_faces(self.ty, vertices)),
            ),
            dim => return Err(XfemError::UnsupportedMeshDimension(dim)),
        };

        if whole.abs() <= Real::EPSILON {
            return Err(XfemError::Quadrature {
                elem: self.elem,
                reason: "the element has a zero measure",
            });
        }
        if self.facets.is_empty() {
            return Ok(1.0);
        }
        Ok(fragment / whole)
    }

    /// The ratio of the physical part of side `side` to the whole side.
    ///
    /// Sides of an element without fragment are entirely physical.
    pub fn physical_side_fraction(
        &self,
        side: usize,
        vertices: &[Point<Real>],
    ) -> Result<Real, XfemError> {
        let side_nodes = self.ty.side_nodes(side).ok_or(MeshError::InvalidSide {
            elem: self.elem,
            side,
        })?;
        if self.facets.is_empty() {
            return Ok(1.0);
        }

        let measure = |pts: &[Point<Real>]| match pts {
            [a, b] => na::distance(a, b),
            _ => utils::polygon_area_normal(pts).norm(),
        };
        let side_points: Vec<Point<Real>> = side_nodes.iter().map(|i| vertices[*i]).collect();
        let whole = measure(&side_points);
        if whole <= Real::EPSILON {
            return Err(XfemError::Quadrature {
                elem: self.elem,
                reason: "the side has a zero measure",
            });
        }

        let on_side = |f: &&FragmentFacet| {
            !f.interior
                && f.vertices
                    .iter()
                    .all(|v| v.weights.iter().all(|(i, _)| side_nodes.contains(i)))
        };
        let physical: Real = self
            .facets
            .iter()
            .filter(on_side)
            .map(|f| measure(&f.points(vertices)))
            .sum();
        Ok(physical / whole)
    }

    /// The number of facets of the fragment lying on the crack.
    pub fn num_cut_planes(&self) -> usize {
        self.facets.iter().filter(|f| f.interior).count()
    }

    fn cut_facet(&self, plane_id: usize) -> Option<&FragmentFacet> {
        self.facets.iter().filter(|f| f.interior).nth(plane_id)
    }

    /// A point and the outward unit normal of the `plane_id`-th crack facet.
    ///
    /// The normal points away from the physical fragment.
    pub fn cut_plane(
        &self,
        plane_id: usize,
        vertices: &[Point<Real>],
    ) -> Option<(Point<Real>, Vector<Real>)> {
        let pts = self.cut_facet(plane_id)?.points(vertices);
        if self.ty.dim() == 2 {
            let d = pts[1] - pts[0];
            let normal = Vector::new(d.y, -d.x, 0.0);
            Some((na::center(&pts[0], &pts[1]), utils::normalize_or_keep(normal)))
        } else {
            let normal = utils::polygon_area_normal(&pts);
            Some((utils::center(&pts), utils::normalize_or_keep(normal)))
        }
    }

    /// The unit normal and the vertices of the `plane_id`-th crack facet.
    pub fn intersection_info(
        &self,
        plane_id: usize,
        vertices: &[Point<Real>],
    ) -> Option<(Vector<Real>, Vec<Point<Real>>)> {
        let (_, normal) = self.cut_plane(plane_id, vertices)?;
        Some((normal, self.cut_facet(plane_id)?.points(vertices)))
    }

    /// The crack tip ending at the embedded node `tip` and the direction the crack grows in.
    ///
    /// Only 2D elements carry a crack tip. Returns `None` if no crack edge ends at `tip`.
    pub fn crack_tip_origin_and_direction(
        &self,
        tip: u32,
        vertices: &[Point<Real>],
    ) -> Option<(Point<Real>, Vector<Real>)> {
        if self.ty.dim() != 2 {
            return None;
        }
        let tip_node = SnapshotNode::Embedded(tip);

        self.facets
            .iter()
            .filter(|f| f.interior)
            .find_map(|f| {
                let k = f.vertices.iter().position(|v| v.node == tip_node)?;
                let origin = f.vertices[k].point(vertices);
                let other = f.vertices[1 - k].point(vertices);
                Some((origin, utils::normalize_or_keep(origin - other)))
            })
    }

    /// Is the point `p` on the physical side of every crack facet?
    pub fn is_point_physical(&self, p: &Point<Real>, vertices: &[Point<Real>]) -> bool {
        (0..self.num_cut_planes()).all(|i| match self.cut_plane(i, vertices) {
            Some((origin, normal)) => (p - origin).dot(&normal) <= 0.0,
            None => true,
        })
    }

    /// The factors by which the weights of `rule` are multiplied to integrate over the
    /// physical fragment only.
    pub fn weight_multipliers(
        &self,
        qrule: XfemQRule,
        rule: &QuadratureRule,
        vertices: &[Point<Real>],
    ) -> Result<Vec<Real>, XfemError> {
        if !self.partial {
            return Ok(vec![1.0; rule.len()]);
        }

        match qrule {
            XfemQRule::Volfrac => self.volfrac_multipliers(rule, vertices),
            XfemQRule::Direct => {
                let physical: Vec<bool> = rule
                    .points
                    .iter()
                    .map(|qp| {
                        let p = map_to_physical(self.ty, vertices, qp);
                        self.is_point_physical(&p, vertices)
                    })
                    .collect();
                if physical.iter().any(|p| *p) {
                    Ok(physical.into_iter().map(|p| if p { 1.0 } else { 0.0 }).collect())
                } else {
                    Ok(vec![NO_PHYSICAL_POINT_WEIGHT; rule.len()])
                }
            }
            XfemQRule::MomentFitting => {
                if self.ty.dim() == 2 {
                    let cycle: Vec<Point<Real>> = self
                        .facets
                        .iter()
                        .map(|f| f.vertices[0].point(vertices))
                        .collect();
                    if let Some(m) = moment_fitting_multipliers(self.ty, vertices, rule, &cycle) {
                        return Ok(m);
                    }
                }
                log::debug!(
                    "element {}: moment fitting unavailable, using the volume fraction",
                    self.elem
                );
                self.volfrac_multipliers(rule, vertices)
            }
        }
    }

    fn volfrac_multipliers(
        &self,
        rule: &QuadratureRule,
        vertices: &[Point<Real>],
    ) -> Result<Vec<Real>, XfemError> {
        let frac = self.physical_volume_fraction(vertices)?;
        Ok(vec![frac; rule.len()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fe::gauss_rule;

    // A unit square split by a vertical crack at x = 0.5, keeping the child on the left.
    fn left_child() -> (ElementFragmentAlgorithm, ElemId, Elem, Vec<Point<Real>>) {
        let mut efa = ElementFragmentAlgorithm::new();
        efa.add_2d_element(&[0, 1, 2, 3], 0).unwrap();
        efa.update_edge_neighbors().unwrap();
        efa.add_elem_edge_intersection(0, 0, 0.5).unwrap();
        efa.add_elem_edge_intersection(0, 2, 0.5).unwrap();
        efa.update_physical_links_and_fragments().unwrap();
        efa.update_topology(true).unwrap();

        let square = vec![
            Point::new(0.0, 0.0, 0.0),
            Point::new(1.0, 0.0, 0.0),
            Point::new(1.0, 1.0, 0.0),
            Point::new(0.0, 1.0, 0.0),
        ];
        // The child keeping vertex 0 physical.
        let child = efa
            .child_element_ids()
            .iter()
            .copied()
            .find(|c| efa.element_node_ids(*c).unwrap()[0] == 0)
            .unwrap();
        let elem = Elem {
            id: 7,
            ty: ElemType::Quad4,
            nodes: efa.element_node_ids(child).unwrap().into_iter().collect(),
            subdomain: 0,
        };
        (efa, child, elem, square)
    }

    #[test]
    fn half_cut_square() {
        let (efa, child, elem, square) = left_child();
        let cut = XfemCutElem::new(&efa, child, &elem).unwrap();

        assert!(cut.is_partial());
        assert_eq!(cut.elem(), 7);
        assert_relative_eq!(cut.physical_volume_fraction(&square).unwrap(), 0.5);
        assert_eq!(cut.num_cut_planes(), 1);

        let (origin, normal) = cut.cut_plane(0, &square).unwrap();
        assert_relative_eq!(origin, Point::new(0.5, 0.5, 0.0));
        assert_relative_eq!(normal, Vector::x());

        assert!(cut.is_point_physical(&Point::new(0.25, 0.5, 0.0), &square));
        assert!(!cut.is_point_physical(&Point::new(0.75, 0.5, 0.0), &square));

        assert_relative_eq!(cut.physical_side_fraction(0, &square).unwrap(), 0.5);
        assert_relative_eq!(cut.physical_side_fraction(1, &square).unwrap(), 0.0);
        assert_relative_eq!(cut.physical_side_fraction(3, &square).unwrap(), 1.0);
        assert!(cut.physical_side_fraction(4, &square).is_err());
    }

    #[test]
    fn weights_follow_the_rule() {
        let (efa, child, elem, square) = left_child();
        let cut = XfemCutElem::new(&efa, child, &elem).unwrap();
        let rule = gauss_rule(ElemType::Quad4);

        let volfrac = cut.weight_multipliers(XfemQRule::Volfrac, &rule, &square).unwrap();
        assert_eq!(volfrac, vec![0.5; 4]);

        let direct = cut.weight_multipliers(XfemQRule::Direct, &rule, &square).unwrap();
        let kept: Real = direct.iter().sum();
        assert_relative_eq!(kept, 2.0);

        let fitted = cut
            .weight_multipliers(XfemQRule::MomentFitting, &rule, &square)
            .unwrap();
        // The fitted rule integrates the fragment area exactly.
        let area: Real = fitted.iter().map(|m| 0.25 * m).sum();
        assert_relative_eq!(area, 0.5, epsilon = 1.0e-10);
    }

    #[test]
    fn the_cut_follows_the_displaced_vertices() {
        let (efa, child, elem, square) = left_child();
        let cut = XfemCutElem::new(&efa, child, &elem).unwrap();
        let stretched: Vec<Point<Real>> = square
            .iter()
            .map(|p| Point::new(2.0 * p.x, p.y, 0.0))
            .collect();

        let edges = cut.fragment_edges(&stretched);
        assert!(edges
            .iter()
            .any(|[a, b]| (a.x - 1.0).abs() < 1.0e-12 && (b.x - 1.0).abs() < 1.0e-12));
        assert_relative_eq!(cut.physical_volume_fraction(&stretched).unwrap(), 0.5);
    }
}
