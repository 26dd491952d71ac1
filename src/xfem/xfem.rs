use std::collections::{BTreeMap, BTreeSet};

use smallvec::SmallVec;

use crate::efa::{
    EfaEdge, EfaElement, EfaError, Element2D, Element3D, ElementFragmentAlgorithm, NodeKey,
};
use crate::fe::QuadratureRule;
use crate::math::{Point, Real, Vector};
use crate::mesh::{ElemId, Mesh, NodeId};
use crate::utils;
use crate::xfem::quadrature::{qrule_on_line, qrule_on_surface};
use crate::xfem::{
    CutEdge, GeometricCut, LineSegmentCut, SolutionTransfer, XfemConfig, XfemCutElem, XfemError,
};

/// The mesh-cut orchestrator.
///
/// Every call to [`Xfem::update`] rebuilds the fragment topology from the mesh, marks the cuts
/// of the active geometric cuts and of the state-marked elements, and replaces every split
/// element of the mesh by one element per physical fragment.
pub struct Xfem {
    config: XfemConfig,
    efa: ElementFragmentAlgorithm,
    geometric_cuts: Vec<Box<dyn GeometricCut>>,
    cut_elems: BTreeMap<ElemId, XfemCutElem>,
    crack_tip_elems: BTreeSet<ElemId>,
    crack_tip_origin_direction: BTreeMap<ElemId, (Point<Real>, Vector<Real>)>,
    state_marked_elems: BTreeMap<ElemId, Vector<Real>>,
    state_marked_frags: BTreeSet<ElemId>,
    state_marked_elem_sides: BTreeMap<ElemId, usize>,
    sibling_elems: Vec<(ElemId, ElemId)>,
    new_node_to_parent: BTreeMap<NodeId, NodeId>,
}

impl Default for Xfem {
    fn default() -> Self {
        Self::new(XfemConfig::default())
    }
}

// The 2D element `id` of the fragment topology.
fn planar_elem(efa: &ElementFragmentAlgorithm, id: ElemId) -> Result<&Element2D, XfemError> {
    efa.element(id)?
        .as_planar()
        .ok_or(XfemError::Efa(EfaError::WrongDimension {
            elem: id,
            expected: 2,
        }))
}

// The 3D element `id` of the fragment topology.
fn solid_elem(efa: &ElementFragmentAlgorithm, id: ElemId) -> Result<&Element3D, XfemError> {
    efa.element(id)?
        .as_solid()
        .ok_or(XfemError::Efa(EfaError::WrongDimension {
            elem: id,
            expected: 3,
        }))
}

// The location of `node` in `elem`, interpolated from the element vertices.
fn node_coords(
    elem: &EfaElement,
    node: NodeKey,
    vertices: &[Point<Real>],
) -> Result<Point<Real>, XfemError> {
    let keys = elem.nodes();
    let mut p = Point::origin();
    for (master, w) in elem.master_info(node)? {
        let i = keys
            .iter()
            .position(|k| *k == master)
            .ok_or(EfaError::MissingNode {
                elem: elem.id(),
                reason: "a master node is not an element vertex",
            })?;
        p.coords += vertices[i].coords * w;
    }
    Ok(p)
}

// Marks the cuts of the element edges of `id` that are not phantom.
fn mark_elem_edge_cuts(
    efa: &mut ElementFragmentAlgorithm,
    id: ElemId,
    cuts: &[CutEdge],
) -> Result<bool, XfemError> {
    let mut marked = false;
    for cut in cuts {
        if !planar_elem(efa, id)?.is_edge_phantom(cut.host_side) {
            efa.add_elem_edge_intersection(id, cut.host_side, cut.distance)?;
            marked = true;
        }
    }
    Ok(marked)
}

fn edge_coords(
    elem: &EfaElement,
    edge: &EfaEdge,
    vertices: &[Point<Real>],
) -> Result<[Point<Real>; 2], XfemError> {
    Ok([
        node_coords(elem, edge.node(0), vertices)?,
        node_coords(elem, edge.node(1), vertices)?,
    ])
}

// Does one edge contain both ends of the other?
fn overlaps(a: &EfaEdge, b: &EfaEdge) -> bool {
    a.contains_edge(b) || b.contains_edge(a)
}

fn perp(v: &Vector<Real>) -> Vector<Real> {
    Vector::new(-v.y, v.x, 0.0)
}

/// The position along `[p1, p2]` where the line through `origin` with normal `normal` crosses
/// it, in the `xy` plane.
///
/// Returns `None` unless `p1` and `p2` lie strictly on opposite sides of the line.
pub fn init_cut_intersection_edge(
    origin: &Point<Real>,
    normal: &Vector<Real>,
    p1: &Point<Real>,
    p2: &Point<Real>,
) -> Option<Real> {
    let d1 = normal.x * (p1.x - origin.x) + normal.y * (p1.y - origin.y);
    let d2 = normal.x * (p2.x - origin.x) + normal.y * (p2.y - origin.y);
    (d1 * d2 < 0.0).then(|| -d1 / (d2 - d1))
}

// The origin cut of a state-marked element: the edge the crack enters through, the crack
// tip, and the direction the crack grows in.
struct StateCutOrigin {
    edge: EfaEdge,
    origin: Point<Real>,
    direction: Vector<Real>,
}

// A candidate extension cut: the element edge, the position along it, and the crack normal.
#[derive(Copy, Clone)]
struct ExtensionCut {
    edge: usize,
    distance: Real,
    normal: Vector<Real>,
}

impl Xfem {
    /// An orchestrator without any cut.
    pub fn new(config: XfemConfig) -> Self {
        Self {
            config,
            efa: ElementFragmentAlgorithm::new(),
            geometric_cuts: Vec::new(),
            cut_elems: BTreeMap::new(),
            crack_tip_elems: BTreeSet::new(),
            crack_tip_origin_direction: BTreeMap::new(),
            state_marked_elems: BTreeMap::new(),
            state_marked_frags: BTreeSet::new(),
            state_marked_elem_sides: BTreeMap::new(),
            sibling_elems: Vec::new(),
            new_node_to_parent: BTreeMap::new(),
        }
    }

    /// The parameters of this orchestrator.
    pub fn config(&self) -> &XfemConfig {
        &self.config
    }

    /// The parameters of this orchestrator, for modification.
    pub fn config_mut(&mut self) -> &mut XfemConfig {
        &mut self.config
    }

    /// The fragment topology of the mesh, as of the last update.
    pub fn efa(&self) -> &ElementFragmentAlgorithm {
        &self.efa
    }

    /// Adds a cut defined by a geometric entity.
    pub fn add_geometric_cut(&mut self, cut: Box<dyn GeometricCut>) {
        self.geometric_cuts.push(cut);
    }

    /// The number of geometric cuts.
    pub fn num_geometric_cuts(&self) -> usize {
        self.geometric_cuts.len()
    }

    /*
     * State-based crack growth.
     */
    /// Marks `elem` for a cut of normal `normal` at the next update.
    ///
    /// The element must hold a crack tip, unless the cut starts from a side
    /// ([`Xfem::add_state_marked_elem_side`]) or from its fragment
    /// ([`Xfem::add_state_marked_frag`]).
    pub fn add_state_marked_elem(
        &mut self,
        elem: ElemId,
        normal: Vector<Real>,
    ) -> Result<(), XfemError> {
        if self.state_marked_elems.contains_key(&elem) {
            return Err(XfemError::AlreadyMarked {
                elem,
                what: "crack growth",
            });
        }
        let _ = self.state_marked_elems.insert(elem, normal);
        Ok(())
    }

    /// Marks `elem` for a crack starting at the middle of its side `side`.
    pub fn add_state_marked_elem_side(
        &mut self,
        elem: ElemId,
        normal: Vector<Real>,
        side: usize,
    ) -> Result<(), XfemError> {
        self.add_state_marked_elem(elem, normal)?;
        if self.state_marked_elem_sides.insert(elem, side).is_some() {
            return Err(XfemError::AlreadyMarked {
                elem,
                what: "crack initiation on a side",
            });
        }
        Ok(())
    }

    /// Marks `elem` for a secondary crack starting at the middle of the crack already
    /// crossing it.
    pub fn add_state_marked_frag(
        &mut self,
        elem: ElemId,
        normal: Vector<Real>,
    ) -> Result<(), XfemError> {
        self.add_state_marked_elem(elem, normal)?;
        if !self.state_marked_frags.insert(elem) {
            return Err(XfemError::AlreadyMarked {
                elem,
                what: "secondary crack initiation",
            });
        }
        Ok(())
    }

    /// Forgets every state mark.
    pub fn clear_state_marked_elems(&mut self) {
        self.state_marked_elems.clear();
        self.state_marked_frags.clear();
        self.state_marked_elem_sides.clear();
    }

    /*
     * Update.
     */
    /// Cuts `mesh` (and its displaced copy) at `time`.
    ///
    /// Returns `true` if the mesh changed. State marks are cleared afterwards.
    pub fn update(
        &mut self,
        time: Real,
        mesh: &mut Mesh,
        mut displaced: Option<&mut Mesh>,
        transfer: &mut dyn SolutionTransfer,
    ) -> Result<bool, XfemError> {
        self.build_efa_mesh(mesh)?;
        self.store_crack_tip_origin_and_direction(mesh)?;

        let mut mesh_changed = false;
        if self.mark_cuts(time, mesh)? {
            mesh_changed = self.cut_mesh_with_efa(mesh, displaced.as_deref_mut(), transfer)?;
        }

        if mesh_changed {
            self.build_efa_mesh(mesh)?;
            self.store_crack_tip_origin_and_direction(mesh)?;
            log::info!(
                "XFEM cut the mesh at t = {}: {} cut elements, {} crack tips",
                time,
                self.cut_elems.values().filter(|c| c.is_partial()).count(),
                self.crack_tip_elems.len()
            );
        }

        self.clear_state_marked_elems();
        Ok(mesh_changed)
    }

    // Loads the mesh into the fragment topology and restores the fragments of the elements
    // cut by earlier updates.
    fn build_efa_mesh(&mut self, mesh: &Mesh) -> Result<(), XfemError> {
        self.efa.reset();

        for elem in mesh.elems() {
            match mesh.dim() {
                2 => self.efa.add_2d_element(&elem.nodes, elem.id)?,
                3 => self.efa.add_3d_element(&elem.nodes, elem.id)?,
                dim => return Err(XfemError::UnsupportedMeshDimension(dim)),
            }
        }

        for (id, cut) in &self.cut_elems {
            if mesh.elem(*id).is_ok() {
                self.efa.restore_fragment_info(*id, cut.snapshot())?;
            }
        }

        self.efa.update_edge_neighbors()?;
        self.efa.init_crack_tip_topology()?;
        Ok(())
    }

    // Records, for every 2D crack-tip element, the tip of the crack ending on it and the
    // direction the crack grew in.
    fn store_crack_tip_origin_and_direction(&mut self, mesh: &Mesh) -> Result<(), XfemError> {
        self.crack_tip_origin_direction.clear();
        if mesh.dim() != 2 {
            return Ok(());
        }

        for &tip in self.efa.crack_tip_element_ids() {
            let mut data = (Point::origin(), Vector::zeros());
            let tip_node = planar_elem(&self.efa, tip)?.tip_embedded_node();
            let split = self.efa.crack_tip_split_element_id(tip)?;

            if let (Some(tip_node), Some(split)) = (tip_node, split) {
                if let Some(cut) = self.cut_elems.get(&split).filter(|c| c.is_partial()) {
                    let vertices = mesh.elem_points(split)?;
                    let tip_id = self.efa.node(tip_node).id;
                    if let Some(found) = cut.crack_tip_origin_and_direction(tip_id, &vertices) {
                        data = found;
                    }
                }
            }
            let _ = self.crack_tip_origin_direction.insert(tip, data);
        }
        Ok(())
    }

    fn mark_cuts(&mut self, time: Real, mesh: &Mesh) -> Result<bool, XfemError> {
        match mesh.dim() {
            2 => {
                let by_geometry = self.mark_cut_edges_by_geometry(time, mesh)?;
                let by_state = self.mark_cut_edges_by_state(time, mesh)?;
                Ok(by_geometry || by_state)
            }
            3 => {
                let by_geometry = self.mark_cut_faces_by_geometry(time, mesh)?;
                Ok(by_geometry || self.mark_cut_faces_by_state())
            }
            dim => Err(XfemError::UnsupportedMeshDimension(dim)),
        }
    }

    // The boundary edges of the fragment of the 2D element `id`.
    fn efa_fragment_edges(
        &self,
        id: ElemId,
        vertices: &[Point<Real>],
    ) -> Result<Vec<[Point<Real>; 2]>, XfemError> {
        let elem = self.efa.element(id)?;
        let planar = planar_elem(&self.efa, id)?;
        if planar.num_fragments() > 1 {
            return Err(EfaError::FragmentCount {
                elem: id,
                expected: "at most 1 before a cut",
                found: planar.num_fragments(),
            }
            .into());
        }

        match planar.fragments().first() {
            Some(frag) => frag
                .edges()
                .iter()
                .map(|e| edge_coords(elem, e, vertices))
                .collect(),
            None => Ok(Vec::new()),
        }
    }

    fn mark_cut_edges_by_geometry(&mut self, time: Real, mesh: &Mesh) -> Result<bool, XfemError> {
        let active: Vec<&dyn GeometricCut> = self
            .geometric_cuts
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| c.active(time))
            .collect();
        if active.is_empty() {
            return Ok(false);
        }

        let mut marked = false;
        for elem in mesh.elems() {
            if planar_elem(&self.efa, elem.id)?.is_final_cut() {
                continue;
            }

            let vertices = mesh.elem_points(elem.id)?;
            let frag_edges = self.efa_fragment_edges(elem.id, &vertices)?;
            let mut elem_cuts = Vec::new();
            let mut frag_cuts = Vec::new();
            for cut in &active {
                elem_cuts.extend(cut.cut_element_edges(elem.ty, &vertices, time)?);
                if !frag_edges.is_empty() {
                    frag_cuts.extend(cut.cut_fragment_edges(&frag_edges, time)?);
                }
            }

            // Element edges first: fragment edges lying on them receive their cuts.
            if mark_elem_edge_cuts(&mut self.efa, elem.id, &elem_cuts)? {
                marked = true;
            }

            for cut in frag_cuts {
                let planar = planar_elem(&self.efa, elem.id)?;
                let secondary = planar.fragments().first().is_some_and(|f| {
                    f.is_secondary_interior_edge(cut.host_side, planar.interior_nodes())
                });
                if !secondary {
                    let _ = self.efa.add_frag_edge_intersection(
                        elem.id,
                        cut.host_side,
                        cut.distance,
                    )?;
                    marked = true;
                }
            }
        }

        Ok(marked)
    }

    // Finds where the crack of the state-marked element `id` comes from, marking the
    // initiation cut of side and fragment marks. Returns `None` if the element is skipped.
    fn state_cut_origin(
        &mut self,
        id: ElemId,
        vertices: &[Point<Real>],
    ) -> Result<Option<StateCutOrigin>, XfemError> {
        if self.crack_tip_elems.contains(&id) {
            let planar = planar_elem(&self.efa, id)?;
            let side = planar.tip_edge_id().ok_or(XfemError::InvalidStateMark {
                elem: id,
                reason: "the crack-tip element has no valid crack-tip edge",
            })?;
            let &(origin, direction) =
                self.crack_tip_origin_direction
                    .get(&id)
                    .ok_or(XfemError::InvalidStateMark {
                        elem: id,
                        reason: "no crack-tip origin and direction stored for the element",
                    })?;
            return Ok(Some(StateCutOrigin {
                edge: planar.edge(side).clone(),
                origin,
                direction,
            }));
        }

        if let Some(&side) = self.state_marked_elem_sides.get(&id) {
            {
                let planar = planar_elem(&self.efa, id)?;
                if side >= planar.num_edges() {
                    return Err(XfemError::InvalidStateMark {
                        elem: id,
                        reason: "the marked side does not exist",
                    });
                }
                if planar.is_edge_phantom(side) || planar.edge(side).has_intersection() {
                    return Ok(None);
                }
            }
            self.efa.add_elem_edge_intersection(id, side, 0.5)?;

            let elem = self.efa.element(id)?;
            let planar = planar_elem(&self.efa, id)?;
            let edge = planar.edge(side).clone();
            let mut elem_center = Point::origin();
            for e in planar.edges() {
                let [p1, p2] = edge_coords(elem, e, vertices)?;
                elem_center.coords += p1.coords + p2.coords;
            }
            elem_center.coords /= 2.0 * planar.num_edges() as Real;
            let [p1, p2] = edge_coords(elem, &edge, vertices)?;
            let origin = na::center(&p1, &p2);
            return Ok(Some(StateCutOrigin {
                edge,
                origin,
                direction: utils::normalize_or_keep(elem_center - origin),
            }));
        }

        if self.state_marked_frags.contains(&id) {
            let frag_edge = {
                let planar = planar_elem(&self.efa, id)?;
                if planar.num_fragments() != 1 {
                    return Err(XfemError::InvalidStateMark {
                        elem: id,
                        reason: "a secondary crack needs exactly one fragment",
                    });
                }
                let frag = &planar.fragments()[0];
                let interior: SmallVec<[usize; 2]> = (0..frag.num_edges())
                    .filter(|i| frag.is_edge_interior(*i, planar.edges()))
                    .collect();
                if interior.len() != 1 {
                    return Ok(None);
                }
                interior[0]
            };
            let _ = self.efa.add_frag_edge_intersection(id, frag_edge, 0.5)?;

            let elem = self.efa.element(id)?;
            let frag = &planar_elem(&self.efa, id)?.fragments()[0];
            let edge = frag.edge(frag_edge).clone();
            let mut frag_center = Point::origin();
            for e in frag.edges() {
                let [p1, p2] = edge_coords(elem, e, vertices)?;
                frag_center.coords += p1.coords + p2.coords;
            }
            frag_center.coords /= 2.0 * frag.num_edges() as Real;
            let [p1, p2] = edge_coords(elem, &edge, vertices)?;
            let origin = na::center(&p1, &p2);
            return Ok(Some(StateCutOrigin {
                edge,
                origin,
                direction: utils::normalize_or_keep(frag_center - origin),
            }));
        }

        Err(XfemError::InvalidStateMark {
            elem: id,
            reason: "marked for state-based growth without a crack tip, a side or a fragment",
        })
    }

    fn mark_cut_edges_by_state(&mut self, time: Real, mesh: &Mesh) -> Result<bool, XfemError> {
        let mut marked = false;
        let marks: Vec<(ElemId, Vector<Real>)> =
            self.state_marked_elems.iter().map(|(e, n)| (*e, *n)).collect();

        for (id, normal) in marks {
            if self.physical_volume_fraction(id, mesh)? < self.config.min_volume_fraction {
                log::debug!("element {}: too small to be cut by state", id);
                continue;
            }
            if planar_elem(&self.efa, id)?.is_final_cut() {
                log::debug!("element {}: already cut twice", id);
                continue;
            }

            let vertices = mesh.elem_points(id)?;
            let Some(start) = self.state_cut_origin(id, &vertices)? else {
                continue;
            };

            let elem = self.efa.element(id)?;
            let planar = planar_elem(&self.efa, id)?;
            let mut extension = None;
            let mut cut_point = start.origin;
            for (i, edge) in planar.edges().iter().enumerate() {
                if overlaps(&start.edge, edge) || planar.is_edge_phantom(i) {
                    continue;
                }
                let [p1, p2] = edge_coords(elem, edge, &vertices)?;
                if let Some(distance) = init_cut_intersection_edge(&start.origin, &normal, &p1, &p2)
                {
                    cut_point = p1 + (p2 - p1) * distance;
                    extension = Some(ExtensionCut {
                        edge: i,
                        distance,
                        normal,
                    });
                    break;
                }
            }

            if let Some(mut extension) = extension {
                let between = utils::normalize_or_keep(cut_point - start.origin);
                let cos_max = self.config.max_extension_angle.to_radians().cos();
                if between.dot(&start.direction) <= cos_max {
                    extension = self.correct_crack_extension_direction(
                        id,
                        &vertices,
                        &start,
                        &normal,
                        extension,
                    )?;
                }

                if !self.config.use_crack_growth_increment {
                    self.efa
                        .add_elem_edge_intersection(id, extension.edge, extension.distance)?;
                } else {
                    let mut growth = perp(&extension.normal);
                    if growth.dot(&start.direction) < 1.0e-10 {
                        growth = -growth;
                    }
                    let tip = start.origin;
                    let end = tip + growth * self.config.crack_growth_increment;
                    let cut =
                        LineSegmentCut::growing(tip.x, tip.y, end.x, end.y, 0.9 * time, 0.9 * time);
                    if self.mark_edges_with_cut(&cut, time, mesh)? {
                        marked = true;
                    }
                }
            } else if planar.num_fragments() > 0 {
                let frag = &planar.fragments()[0];
                let mut frag_cut = None;
                for (i, edge) in frag.edges().iter().enumerate() {
                    if overlaps(&start.edge, edge)
                        || frag.is_secondary_interior_edge(i, planar.interior_nodes())
                    {
                        continue;
                    }
                    let [p1, p2] = edge_coords(elem, edge, &vertices)?;
                    if let Some(d) = init_cut_intersection_edge(&start.origin, &normal, &p1, &p2) {
                        frag_cut = Some((i, d));
                        break;
                    }
                }
                if let Some((i, d)) = frag_cut {
                    let _ = self.efa.add_frag_edge_intersection(id, i, d)?;
                }
            }

            marked = true;
        }

        Ok(marked)
    }

    // Cuts the element edges of every element that is not final-cut with `cut`.
    fn mark_edges_with_cut(
        &mut self,
        cut: &dyn GeometricCut,
        time: Real,
        mesh: &Mesh,
    ) -> Result<bool, XfemError> {
        let mut marked = false;
        for elem in mesh.elems() {
            if planar_elem(&self.efa, elem.id)?.is_final_cut() {
                continue;
            }
            let vertices = mesh.elem_points(elem.id)?;
            let cuts = cut.cut_element_edges(elem.ty, &vertices, time)?;
            if mark_elem_edge_cuts(&mut self.efa, elem.id, &cuts)? {
                marked = true;
            }
        }
        Ok(marked)
    }

    // Looks for an extension cut within `max_extension_angle` of the crack direction: near the
    // ends of every other edge, along both bounding directions, and straight ahead. The cut
    // whose normal is closest to `normal` wins.
    fn correct_crack_extension_direction(
        &self,
        id: ElemId,
        vertices: &[Point<Real>],
        start: &StateCutOrigin,
        normal: &Vector<Real>,
        initial: ExtensionCut,
    ) -> Result<ExtensionCut, XfemError> {
        let elem = self.efa.element(id)?;
        let planar = planar_elem(&self.efa, id)?;
        let d = start.direction;
        let tip = start.origin;

        let (sin, cos) = self.config.max_extension_angle.to_radians().sin_cos();
        let left = Vector::new(cos * d.x - sin * d.y, sin * d.x + cos * d.y, 0.0);
        let right = Vector::new(cos * d.x + sin * d.y, -sin * d.x + cos * d.y, 0.0);
        let left_normal = perp(&left);
        let right_normal = perp(&right);
        let ahead_normal = perp(&d);

        let lo = self.config.min_cut_position;
        let hi = 1.0 - lo;
        let mut keep = initial;
        let mut angle_min: Real = 0.0;

        for (i, edge) in planar.edges().iter().enumerate() {
            if overlaps(&start.edge, edge) {
                continue;
            }
            let [p1, p2] = edge_coords(elem, edge, vertices)?;
            let to_near = utils::normalize_or_keep(p1 + (p2 - p1) * lo - tip);
            let to_far = utils::normalize_or_keep(p1 + (p2 - p1) * hi - tip);
            let near_normal = perp(&to_near);
            let far_normal = perp(&to_far);
            let near_ok = to_near.dot(&d) > cos;
            let far_ok = to_far.dot(&d) > cos;

            let a_near = near_normal.dot(normal);
            let a_far = far_normal.dot(normal);
            if a_near.abs() > angle_min.abs() && near_ok {
                keep = ExtensionCut {
                    edge: i,
                    distance: lo,
                    normal: near_normal,
                };
                angle_min = a_near;
            } else if a_far.abs() > angle_min.abs() && far_ok {
                keep = ExtensionCut {
                    edge: i,
                    distance: hi,
                    normal: far_normal,
                };
                angle_min = a_far;
            }

            if planar.is_edge_phantom(i) {
                continue;
            }
            let candidates = [
                (left_normal, near_ok),
                (right_normal, far_ok),
                (ahead_normal, true),
            ];
            for (cut_normal, direction_ok) in candidates {
                let Some(distance) = init_cut_intersection_edge(&tip, &cut_normal, &p1, &p2)
                else {
                    continue;
                };
                let a = cut_normal.dot(normal);
                if a.abs() > angle_min.abs() && direction_ok {
                    keep = ExtensionCut {
                        edge: i,
                        distance,
                        normal: cut_normal,
                    };
                    angle_min = a;
                }
                break;
            }
        }

        keep.distance = self.config.clamp_cut_position(keep.distance);
        Ok(keep)
    }

    fn mark_cut_faces_by_geometry(&mut self, time: Real, mesh: &Mesh) -> Result<bool, XfemError> {
        let active: Vec<&dyn GeometricCut> = self
            .geometric_cuts
            .iter()
            .map(|c| c.as_ref())
            .filter(|c| c.active(time))
            .collect();
        if active.is_empty() {
            return Ok(false);
        }

        let mut marked = false;
        for elem in mesh.elems() {
            if solid_elem(&self.efa, elem.id)?.is_final_cut() {
                continue;
            }

            let vertices = mesh.elem_points(elem.id)?;
            let mut faces = Vec::new();
            for cut in &active {
                faces.extend(cut.cut_element_faces(elem.ty, &vertices, time)?);
            }

            for face in faces {
                if solid_elem(&self.efa, elem.id)?.is_face_phantom(face.face) {
                    continue;
                }
                self.efa.add_elem_face_intersection(
                    elem.id,
                    face.face,
                    face.face_edges,
                    face.positions,
                )?;
                marked = true;
            }
        }

        Ok(marked)
    }

    // State-based growth of 3D cracks is not supported.
    fn mark_cut_faces_by_state(&self) -> bool {
        if !self.state_marked_elems.is_empty() {
            log::debug!(
                "ignoring {} state marks on a 3D mesh",
                self.state_marked_elems.len()
            );
        }
        false
    }

    // Splits the marked elements, writes the children into the mesh and deletes their
    // parents.
    fn cut_mesh_with_efa(
        &mut self,
        mesh: &mut Mesh,
        mut displaced: Option<&mut Mesh>,
        transfer: &mut dyn SolutionTransfer,
    ) -> Result<bool, XfemError> {
        let mut mesh_changed = false;
        let states = transfer.states();
        self.new_node_to_parent.clear();

        self.efa.update_physical_links_and_fragments()?;
        self.efa.update_topology(self.config.merge_phantom_edges)?;

        let mut efa_to_new_node: BTreeMap<NodeId, NodeId> = BTreeMap::new();
        for (efa_id, parent) in self.efa.new_node_ids() {
            let parent = parent.ok_or(EfaError::OrphanNode(efa_id))?;
            let id = mesh.add_node(*mesh.node(parent)?);
            if let Some(displaced) = displaced.as_deref_mut() {
                let pt = *displaced.node(parent)?;
                displaced.add_node_with_id(id, pt)?;
            }
            transfer.copy_node_data(parent, id, states);
            let _ = self.new_node_to_parent.insert(id, parent);
            let _ = efa_to_new_node.insert(efa_id, id);
            log::debug!("XFEM added node {} (copy of {})", id, parent);
            mesh_changed = true;
        }

        let mut efa_to_new_elem: BTreeMap<ElemId, ElemId> = BTreeMap::new();
        let mut parent_children: BTreeMap<ElemId, Vec<ElemId>> = BTreeMap::new();
        for efa_child in self.efa.child_element_ids().to_vec() {
            let child = self.efa.element(efa_child)?;
            let parent_id = child.parent().ok_or(XfemError::MissingElement(efa_child))?;
            let num_siblings = self.efa.element(parent_id)?.children().len();
            let parent = mesh.elem(parent_id)?.clone();

            let nodes: SmallVec<[NodeId; 8]> = self
                .efa
                .element_node_ids(efa_child)?
                .into_iter()
                .map(|n| efa_to_new_node.get(&n).copied().unwrap_or(n))
                .collect();

            let id = match displaced.as_deref() {
                Some(d) => mesh.next_elem_id().max(d.next_elem_id()),
                None => mesh.next_elem_id(),
            };
            copy_elem(mesh, &parent, id, &nodes)?;
            if let Some(displaced) = displaced.as_deref_mut() {
                let parent = displaced.elem(parent_id)?.clone();
                copy_elem(displaced, &parent, id, &nodes)?;
            }
            transfer.copy_elem_data(parent_id, id, states);

            if let Some(tip) = self.crack_tip_origin_direction.remove(&parent_id) {
                let _ = self.crack_tip_origin_direction.insert(id, tip);
            }

            let cut = XfemCutElem::new(&self.efa, efa_child, mesh.elem(id)?)?;
            let _ = self.cut_elems.insert(id, cut);
            let _ = efa_to_new_elem.insert(efa_child, id);
            if num_siblings > 1 {
                parent_children.entry(parent_id).or_default().push(id);
            }
            log::debug!("XFEM added element {} (child of {})", id, parent_id);
            mesh_changed = true;
        }

        for parent in self.efa.parent_element_ids().to_vec() {
            let _ = self.cut_elems.remove(&parent);
            let _ = mesh.remove_elem(parent)?;
            if let Some(displaced) = displaced.as_deref_mut() {
                let _ = displaced.remove_elem(parent)?;
            }
            log::debug!("XFEM deleted element {}", parent);
            mesh_changed = true;
        }

        for children in parent_children.values() {
            if let [first, second, ..] = children[..] {
                self.sibling_elems.push((first, second));
            }
        }

        if mesh_changed {
            self.crack_tip_elems = self
                .efa
                .crack_tip_element_ids()
                .iter()
                .map(|e| efa_to_new_elem.get(e).copied().unwrap_or(*e))
                .collect();
        }

        Ok(mesh_changed)
    }

    /*
     * Queries.
     */
    /// The cut element built for `elem`, if `elem` was produced by a cut.
    pub fn cut_elem(&self, elem: ElemId) -> Option<&XfemCutElem> {
        self.cut_elems.get(&elem)
    }

    // The cut element of `elem` if it has a non-physical part.
    fn partial_cut_elem(&self, elem: ElemId) -> Option<&XfemCutElem> {
        self.cut_elems.get(&elem).filter(|c| c.is_partial())
    }

    /// Does `elem` have a non-physical part?
    ///
    /// Elements duplicated at a crack tip are cut elements that are still entirely physical.
    pub fn is_elem_cut(&self, elem: ElemId) -> bool {
        self.partial_cut_elem(elem).is_some()
    }

    /// Does `elem` hold a crack tip?
    pub fn is_elem_at_crack_tip(&self, elem: ElemId) -> bool {
        self.crack_tip_elems.contains(&elem)
    }

    /// The elements holding a crack tip.
    pub fn crack_tip_elems(&self) -> &BTreeSet<ElemId> {
        &self.crack_tip_elems
    }

    /// The stored crack tip and growth direction of the crack-tip element `elem`.
    pub fn crack_tip_origin_and_direction(
        &self,
        elem: ElemId,
    ) -> Option<&(Point<Real>, Vector<Real>)> {
        self.crack_tip_origin_direction.get(&elem)
    }

    /// The crack tips, sorted by element id.
    pub fn crack_tip_origins(&self) -> Vec<(ElemId, Point<Real>)> {
        self.crack_tip_origin_direction
            .iter()
            .map(|(e, (origin, _))| (*e, *origin))
            .collect()
    }

    /// The pairs of elements split from the same parent.
    pub fn sibling_elems(&self) -> &[(ElemId, ElemId)] {
        &self.sibling_elems
    }

    /// The node `node` was copied from by the last cut.
    pub fn new_node_parent(&self, node: NodeId) -> Option<NodeId> {
        self.new_node_to_parent.get(&node).copied()
    }

    /// The ratio of the physical measure of `elem` to its full measure, in `mesh`.
    ///
    /// Elements without a non-physical part have a volume fraction of 1.
    pub fn physical_volume_fraction(&self, elem: ElemId, mesh: &Mesh) -> Result<Real, XfemError> {
        match self.partial_cut_elem(elem) {
            Some(cut) => cut.physical_volume_fraction(&mesh.elem_points(elem)?),
            None => Ok(1.0),
        }
    }

    /// The ratio of the physical part of side `side` of `elem` to the whole side, in `mesh`.
    pub fn physical_side_fraction(
        &self,
        elem: ElemId,
        side: usize,
        mesh: &Mesh,
    ) -> Result<Real, XfemError> {
        match self.partial_cut_elem(elem) {
            Some(cut) => cut.physical_side_fraction(side, &mesh.elem_points(elem)?),
            None => Ok(1.0),
        }
    }

    /// A point and the outward unit normal of the `plane_id`-th crack facet of `elem`.
    ///
    /// Returns `Ok(None)` if `elem` is not cut or has no such facet.
    pub fn cut_plane(
        &self,
        elem: ElemId,
        plane_id: usize,
        mesh: &Mesh,
    ) -> Result<Option<(Point<Real>, Vector<Real>)>, XfemError> {
        match self.partial_cut_elem(elem) {
            Some(cut) => Ok(cut.cut_plane(plane_id, &mesh.elem_points(elem)?)),
            None => Ok(None),
        }
    }

    /// The unit normal and the vertices of the `plane_id`-th crack facet of `elem`.
    pub fn intersection_info(
        &self,
        elem: ElemId,
        plane_id: usize,
        mesh: &Mesh,
    ) -> Result<Option<(Vector<Real>, Vec<Point<Real>>)>, XfemError> {
        match self.cut_elems.get(&elem) {
            Some(cut) => Ok(cut.intersection_info(plane_id, &mesh.elem_points(elem)?)),
            None => Ok(None),
        }
    }

    /// The location of the fragment-topology node `node` of `elem`, in `mesh`.
    pub fn efa_node_coords(
        &self,
        elem: ElemId,
        node: NodeKey,
        mesh: &Mesh,
    ) -> Result<Point<Real>, XfemError> {
        node_coords(self.efa.element(elem)?, node, &mesh.elem_points(elem)?)
    }

    /// The boundary edges of the physical fragment of the 2D element `elem`, in `mesh`.
    pub fn fragment_edges(
        &self,
        elem: ElemId,
        mesh: &Mesh,
    ) -> Result<Vec<[Point<Real>; 2]>, XfemError> {
        match self.cut_elems.get(&elem) {
            Some(cut) => Ok(cut.fragment_edges(&mesh.elem_points(elem)?)),
            None => Ok(Vec::new()),
        }
    }

    /// The boundary faces of the physical fragment of the 3D element `elem`, in `mesh`.
    pub fn fragment_faces(
        &self,
        elem: ElemId,
        mesh: &Mesh,
    ) -> Result<Vec<Vec<Point<Real>>>, XfemError> {
        match self.cut_elems.get(&elem) {
            Some(cut) => Ok(cut.fragment_faces(&mesh.elem_points(elem)?)),
            None => Ok(Vec::new()),
        }
    }

    /// The multipliers of the weights of `rule` integrating over the physical part of `elem`.
    ///
    /// Returns `Ok(None)` if `elem` is not cut and its weights stay unchanged.
    pub fn xfem_weights(
        &self,
        elem: ElemId,
        rule: &QuadratureRule,
        mesh: &Mesh,
    ) -> Result<Option<Vec<Real>>, XfemError> {
        match self.partial_cut_elem(elem) {
            Some(cut) => cut
                .weight_multipliers(self.config.qrule, rule, &mesh.elem_points(elem)?)
                .map(Some),
            None => Ok(None),
        }
    }

    /// The two-point Gauss rule on the crack segment `[p1, p2]`.
    pub fn xfem_qrule_on_line(
        p1: &Point<Real>,
        p2: &Point<Real>,
    ) -> ([Point<Real>; 2], [Real; 2]) {
        qrule_on_line(p1, p2)
    }

    /// A one-point-per-triangle rule on the crack polygon `vertices`.
    pub fn xfem_qrule_on_surface(vertices: &[Point<Real>]) -> (Vec<Point<Real>>, Vec<Real>) {
        qrule_on_surface(vertices)
    }
}

// Adds the child `id` of `parent` with the nodes `nodes`, and gives it the boundary ids and
// the block of its parent.
fn copy_elem(
    mesh: &mut Mesh,
    parent: &crate::mesh::Elem,
    id: ElemId,
    nodes: &[NodeId],
) -> Result<(), XfemError> {
    mesh.add_elem_with_id(id, parent.ty, nodes, parent.subdomain)?;

    for (parent_node, node) in parent.nodes.iter().zip(nodes) {
        for bid in mesh.node_boundary_ids(*parent_node).to_vec() {
            mesh.add_node_boundary(*node, bid)?;
        }
    }
    for side in 0..parent.ty.n_sides() {
        for bid in mesh.side_boundary_ids(parent.id, side).to_vec() {
            mesh.add_side_boundary(id, side, bid)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fe::gauss_rule;
    use crate::mesh::ElemType;
    use crate::xfem::NoTransfer;

    // Two unit squares side by side: elements 0 = [0, 1, 4, 3] and 1 = [1, 2, 5, 4].
    fn two_squares() -> Mesh {
        let mut mesh = Mesh::new(2);
        for y in 0..2 {
            for x in 0..3 {
                let _ = mesh.add_node(Point::new(x as Real, y as Real, 0.0));
            }
        }
        let _ = mesh.add_elem(ElemType::Quad4, &[0, 1, 4, 3]).unwrap();
        let _ = mesh.add_elem(ElemType::Quad4, &[1, 2, 5, 4]).unwrap();
        mesh
    }

    #[test]
    fn cut_intersection_edge() {
        let origin = Point::new(0.0, 0.5, 0.0);
        let normal = Vector::y();
        let d = init_cut_intersection_edge(
            &origin,
            &normal,
            &Point::new(1.0, 0.0, 0.0),
            &Point::new(1.0, 1.0, 0.0),
        );
        assert_relative_eq!(d.unwrap(), 0.5);
        assert!(init_cut_intersection_edge(
            &origin,
            &normal,
            &Point::new(0.0, 0.0, 0.0),
            &Point::new(1.0, 0.0, 0.0),
        )
        .is_none());
    }

    #[test]
    fn duplicate_state_marks_are_rejected() {
        let mut xfem = Xfem::default();
        xfem.add_state_marked_elem(0, Vector::y()).unwrap();
        assert_eq!(
            xfem.add_state_marked_elem(0, Vector::y()),
            Err(XfemError::AlreadyMarked {
                elem: 0,
                what: "crack growth"
            })
        );
        assert!(xfem.add_state_marked_frag(0, Vector::y()).is_err());
        xfem.clear_state_marked_elems();
        xfem.add_state_marked_frag(0, Vector::y()).unwrap();
    }

    #[test]
    fn horizontal_crack_splits_both_elements() {
        let mut mesh = two_squares();
        let mut xfem = Xfem::default();
        xfem.add_geometric_cut(Box::new(LineSegmentCut::new(-0.5, 0.5, 2.5, 0.5)));

        assert!(xfem.update(1.0, &mut mesh, None, &mut NoTransfer).unwrap());
        assert_eq!(mesh.n_elems(), 4);
        assert_eq!(xfem.sibling_elems().len(), 2);
        assert!(xfem.crack_tip_elems().is_empty());

        let rule = gauss_rule(ElemType::Quad4);
        for elem in mesh.elems() {
            assert!(xfem.is_elem_cut(elem.id));
            assert_relative_eq!(
                xfem.physical_volume_fraction(elem.id, &mesh).unwrap(),
                0.5,
                epsilon = 1.0e-12
            );
            let weights = xfem.xfem_weights(elem.id, &rule, &mesh).unwrap().unwrap();
            assert_eq!(weights.len(), 4);
            for w in weights {
                assert_relative_eq!(w, 0.5, epsilon = 1.0e-12);
            }

            let (origin, normal) = xfem.cut_plane(elem.id, 0, &mesh).unwrap().unwrap();
            assert_relative_eq!(origin.y, 0.5, epsilon = 1.0e-12);
            assert_relative_eq!(normal.y.abs(), 1.0, epsilon = 1.0e-12);
        }
    }

    #[test]
    fn a_3d_cut_on_a_2d_mesh_is_an_error() {
        use crate::xfem::CircleCut;

        let mut mesh = two_squares();
        let mut xfem = Xfem::default();
        let cut = CircleCut::new(
            Point::new(1.0, 0.5, 0.5),
            Point::new(3.0, 0.5, 0.5),
            Point::new(1.0, 3.0, 0.5),
        )
        .unwrap();
        xfem.add_geometric_cut(Box::new(cut));
        assert!(matches!(
            xfem.update(1.0, &mut mesh, None, &mut NoTransfer),
            Err(XfemError::UnsupportedCutDimension { cut_dim: 3, .. })
        ));
    }

    #[test]
    fn state_mark_on_an_uncut_element_needs_a_side() {
        let mut mesh = two_squares();
        let mut xfem = Xfem::default();
        xfem.add_state_marked_elem(0, Vector::y()).unwrap();
        assert!(matches!(
            xfem.update(1.0, &mut mesh, None, &mut NoTransfer),
            Err(XfemError::InvalidStateMark { elem: 0, .. })
        ));
    }

    #[test]
    fn extension_direction_is_corrected_toward_the_crack() {
        let mesh = two_squares();
        let mut xfem = Xfem::default();
        xfem.build_efa_mesh(&mesh).unwrap();

        // A crack entering element 0 through the middle of its left side, heading along +x.
        let start = StateCutOrigin {
            edge: planar_elem(&xfem.efa, 0).unwrap().edge(3).clone(),
            origin: Point::new(0.0, 0.5, 0.0),
            direction: Vector::x(),
        };
        let vertices = mesh.elem_points(0).unwrap();
        // A vertical crack normal would cut the bottom edge right below the tip.
        let normal = Vector::x();
        let initial = ExtensionCut {
            edge: 0,
            distance: 0.0,
            normal,
        };
        let corrected = xfem
            .correct_crack_extension_direction(0, &vertices, &start, &normal, initial)
            .unwrap();
        assert!(corrected.distance >= 0.05 && corrected.distance <= 0.95);

        // The corrected cut stays within 45° of the crack direction.
        let edge = planar_elem(&xfem.efa, 0).unwrap().edge(corrected.edge).clone();
        let elem = xfem.efa.element(0).unwrap();
        let [p1, p2] = edge_coords(elem, &edge, &vertices).unwrap();
        let cut_point = p1 + (p2 - p1) * corrected.distance;
        let dir = (cut_point - start.origin).normalize();
        assert!(dir.dot(&Vector::x()) >= (45.0 as Real).to_radians().cos() - 1.0e-6);
    }
}
