//! The contact search pass.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::contact::competition::select_best_candidate;
use crate::contact::projection::cache_side_data;
use crate::contact::ridge::{find_ridge_contact_point, group_ridges};
use crate::contact::smoothing::{nodal_normal_smoothing, smooth_normal_edge_based};
use crate::contact::{
    find_contact_point, is_face_reasonable_candidate, ContactError, LocatorConfig,
    NormalSmoothingMethod, PenetrationInfo,
};
use crate::fe::{FeEvaluator, LagrangeEvaluator};
use crate::math::{Point, Real, Vector};
use crate::mesh::{BoundaryId, ElemId, Mesh, NearestNodeLocator, NodeId};
use crate::utils::{self, hashmap::HashMap};

/// Everything a search worker reads. Shared by reference between the workers.
pub(crate) struct SearchContext<'a> {
    pub mesh: &'a Mesh,
    pub primary: BoundaryId,
    pub node_to_elem: &'a HashMap<NodeId, Vec<ElemId>>,
    pub config: &'a LocatorConfig,
    pub nodal_normals: &'a HashMap<NodeId, Vector<Real>>,
    pub nearest: &'a NearestNodeLocator,
}

/// Finds, for every node of a secondary boundary, its contact interaction with a primary
/// boundary, and keeps these interactions from one search pass to the next.
pub struct PenetrationLocator {
    nearest: NearestNodeLocator,
    config: LocatorConfig,
    penetration_info: HashMap<NodeId, PenetrationInfo>,
    node_to_elem: HashMap<NodeId, Vec<ElemId>>,
    nodal_normals: HashMap<NodeId, Vector<Real>>,
    recheck_nodes: Vec<NodeId>,
}

impl PenetrationLocator {
    /// A locator of the contact between the `primary` and `secondary` boundaries of `mesh`.
    pub fn new(
        mesh: &Mesh,
        primary: BoundaryId,
        secondary: BoundaryId,
        config: LocatorConfig,
    ) -> Result<Self, ContactError> {
        let nearest = NearestNodeLocator::new(mesh, primary, secondary, config.patch_size)?;
        Ok(PenetrationLocator {
            nearest,
            config,
            penetration_info: HashMap::default(),
            node_to_elem: mesh.node_to_elem_map(),
            nodal_normals: HashMap::default(),
            recheck_nodes: Vec::new(),
        })
    }

    /// The search configuration.
    pub fn config(&self) -> &LocatorConfig {
        &self.config
    }

    /// Mutable access to the search configuration.
    pub fn config_mut(&mut self) -> &mut LocatorConfig {
        &mut self.config
    }

    /// The primary boundary.
    pub fn primary_boundary(&self) -> BoundaryId {
        self.nearest.primary_boundary()
    }

    /// The secondary boundary.
    pub fn secondary_boundary(&self) -> BoundaryId {
        self.nearest.secondary_boundary()
    }

    /// The nearest-node locator feeding the search.
    pub fn nearest_node_locator(&self) -> &NearestNodeLocator {
        &self.nearest
    }

    /// The contact interactions, by secondary node.
    pub fn penetration_info(&self) -> &HashMap<NodeId, PenetrationInfo> {
        &self.penetration_info
    }

    /// Mutable access to the contact interactions, by secondary node.
    pub fn penetration_info_mut(&mut self) -> &mut HashMap<NodeId, PenetrationInfo> {
        &mut self.penetration_info
    }

    /// The contact interaction of one secondary node.
    pub fn info(&self, node: NodeId) -> Option<&PenetrationInfo> {
        self.penetration_info.get(&node)
    }

    /// Mutable access to the contact interaction of one secondary node.
    pub fn info_mut(&mut self, node: NodeId) -> Option<&mut PenetrationInfo> {
        self.penetration_info.get_mut(&node)
    }

    /// The secondary nodes left without contact by the last search, even after their patch
    /// was refreshed.
    pub fn recheck_nodes(&self) -> &[NodeId] {
        &self.recheck_nodes
    }

    /// Sets the nodal normals used by [`NormalSmoothingMethod::NodalNormalBased`].
    pub fn set_nodal_normals(&mut self, normals: HashMap<NodeId, Vector<Real>>) {
        self.nodal_normals = normals;
    }

    /// Forgets every contact interaction and rebuilds the nearest-node patches, after the
    /// mesh topology changed.
    pub fn reinit(&mut self, mesh: &Mesh) -> Result<(), ContactError> {
        self.penetration_info.clear();
        self.recheck_nodes.clear();
        self.node_to_elem = mesh.node_to_elem_map();
        self.nearest.rebuild(mesh)?;
        Ok(())
    }

    /// Runs one search pass over every secondary node, with linear Lagrange evaluators.
    pub fn detect_penetration(&mut self, mesh: &Mesh) -> Result<(), ContactError> {
        self.detect_penetration_with(mesh, LagrangeEvaluator::default)
    }

    /// Runs one search pass over every secondary node.
    ///
    /// Every worker creates its own evaluator with `make_fe`. Nodes finding no contact
    /// candidate get their nearest-node patch refreshed and are searched a second time.
    pub fn detect_penetration_with<F, M>(&mut self, mesh: &Mesh, make_fe: M) -> Result<(), ContactError>
    where
        F: FeEvaluator,
        M: Fn() -> F + Sync,
    {
        self.node_to_elem = mesh.node_to_elem_map();
        let nodes = self.nearest.secondary_nodes().to_vec();
        let recheck = self.search_pass(mesh, &nodes, &make_fe)?;

        if recheck.is_empty() {
            self.recheck_nodes.clear();
            return Ok(());
        }

        log::debug!(
            "{} secondary nodes have no contact candidate; refreshing their patches",
            recheck.len()
        );
        self.nearest.update_patches(mesh, &recheck)?;
        self.recheck_nodes = self.search_pass(mesh, &recheck, &make_fe)?;
        Ok(())
    }

    fn search_pass<F, M>(
        &mut self,
        mesh: &Mesh,
        nodes: &[NodeId],
        make_fe: &M,
    ) -> Result<Vec<NodeId>, ContactError>
    where
        F: FeEvaluator,
        M: Fn() -> F + Sync,
    {
        let shared = Mutex::new(std::mem::take(&mut self.penetration_info));
        let ctx = SearchContext {
            mesh,
            primary: self.nearest.primary_boundary(),
            node_to_elem: &self.node_to_elem,
            config: &self.config,
            nodal_normals: &self.nodal_normals,
            nearest: &self.nearest,
        };
        let partition_size = self.config.partition_size.max(1);

        #[cfg(feature = "parallel")]
        let results: Vec<_> = nodes
            .par_chunks(partition_size)
            .map(|partition| search_partition(&ctx, &shared, partition, &mut make_fe()))
            .collect();
        #[cfg(not(feature = "parallel"))]
        let results: Vec<_> = nodes
            .chunks(partition_size)
            .map(|partition| search_partition(&ctx, &shared, partition, &mut make_fe()))
            .collect();

        self.penetration_info = shared.into_inner().unwrap_or_else(PoisonError::into_inner);

        let mut recheck = Vec::new();
        for result in results {
            recheck.extend(result?);
        }
        Ok(recheck)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// Searches one partition of secondary nodes. The shared map is only locked to take a node's
// record out and to put the updated record back.
fn search_partition<F: FeEvaluator>(
    ctx: &SearchContext<'_>,
    shared: &Mutex<HashMap<NodeId, PenetrationInfo>>,
    nodes: &[NodeId],
    fe: &mut F,
) -> Result<Vec<NodeId>, ContactError> {
    let mut recheck = Vec::new();

    for node in nodes {
        let previous = lock(shared).remove(node);
        let point = *ctx.mesh.node(*node)?;

        match search_node(ctx, *node, &point, previous, fe)? {
            Some(info) => {
                let _ = lock(shared).insert(*node, info);
            }
            None => {
                log::debug!("no contact candidate for node {node}; queued for patch re-check");
                recheck.push(*node);
            }
        }
    }

    Ok(recheck)
}

fn search_node<F: FeEvaluator>(
    ctx: &SearchContext<'_>,
    node: NodeId,
    point: &Point<Real>,
    previous: Option<PenetrationInfo>,
    fe: &mut F,
) -> Result<Option<PenetrationInfo>, ContactError> {
    let opts = &ctx.config.projection;
    let mut history = None;

    if let Some(mut info) = previous {
        info.side = ctx.mesh.build_side(info.elem, info.side_num)?;
        let elem_points = ctx.mesh.elem_points(info.elem)?;

        if !ctx.config.update_location && (info.distance >= 0.0 || info.is_captured()) {
            // Frozen contact location: refresh the cached geometry only.
            let contact_ref = info.closest_point_ref;
            let distance = info.distance;
            fe.reinit(info.side.ty, &info.side.points, &contact_ref)
                .map_err(|source| ContactError::Reinit {
                    elem: info.elem,
                    source,
                })?;
            let frozen_point = fe.xyz();
            let _ = find_contact_point(&mut info, fe, &elem_points, &frozen_point, false, opts)?;
            info.closest_point_ref = contact_ref;
            info.distance = distance;
            return Ok(Some(info));
        }

        let old_tangential_distance = info.tangential_distance;
        let report = find_contact_point(&mut info, fe, &elem_points, point, false, opts)?;

        if report.search_succeeded && report.contact_point_on_side {
            let keep = if info.tangential_distance <= 0.0 {
                true
            } else {
                // Off the face but within tolerance, as on the last pass. A clamp onto a
                // single corner of a 3D face defers to the full search.
                old_tangential_distance > 0.0
                    && !(info.side.dim() == 2 && info.off_edge_nodes.len() < 2)
            };

            if keep {
                finish_accepted(ctx, &mut info, &[], point, fe)?;
                return Ok(Some(info));
            }
        }

        history = Some(info);
    }

    let candidates = gather_candidates(ctx, node, point, fe)?;
    let accepted = resolve_candidates(ctx, &candidates, point, fe)?;

    match accepted {
        Some(mut info) => {
            info.switch_from(history.as_ref());
            finish_accepted(ctx, &mut info, &candidates, point, fe)?;
            Ok(Some(info))
        }
        None => Ok(None),
    }
}

// Projects the node on every primary face touching its nearest primary node.
fn gather_candidates<F: FeEvaluator>(
    ctx: &SearchContext<'_>,
    node: NodeId,
    point: &Point<Real>,
    fe: &mut F,
) -> Result<Vec<PenetrationInfo>, ContactError> {
    let mut candidates = Vec::new();
    let Some((closest_node, _)) = ctx.nearest.nearest_node(ctx.mesh, node, point) else {
        return Ok(candidates);
    };
    let elems = ctx
        .node_to_elem
        .get(&closest_node)
        .ok_or(ContactError::MissingNodeToElem(closest_node))?;
    let tolerance = ctx.config.projection.tangential_tolerance;

    for elem in elems {
        for side_num in ctx.mesh.sides_with_boundary_id(*elem, ctx.primary) {
            let side = ctx.mesh.build_side(*elem, side_num)?;
            if side.node_index(closest_node).is_none() {
                continue;
            }

            let elem_points = ctx.mesh.elem_points(*elem)?;
            if ctx.config.check_whether_reasonable
                && !is_face_reasonable_candidate(&side, &elem_points, fe, point, tolerance)
            {
                continue;
            }

            let mut info = PenetrationInfo::new(node, *elem, side_num, side);
            let report = find_contact_point(
                &mut info,
                fe,
                &elem_points,
                point,
                true,
                &ctx.config.projection,
            )?;

            if report.search_succeeded {
                candidates.push(info);
            }
        }
    }

    Ok(candidates)
}

// Picks the contact interaction among the candidates: a ridge or a peak if the node lies
// beyond the edge shared by two faces, or the winner of the pairwise competition otherwise.
fn resolve_candidates<F: FeEvaluator>(
    ctx: &SearchContext<'_>,
    candidates: &[PenetrationInfo],
    point: &Point<Real>,
    fe: &mut F,
) -> Result<Option<PenetrationInfo>, ContactError> {
    let tolerance = ctx.config.projection.tangential_tolerance;

    match candidates.len() {
        0 => return Ok(None),
        1 => {
            let info = &candidates[0];
            return Ok((info.tangential_distance <= tolerance).then(|| info.clone()));
        }
        _ => {}
    }

    let mut ridges = Vec::new();
    for i in 0..candidates.len() - 1 {
        for j in i + 1..candidates.len() {
            if let Some(ridge) = find_ridge_contact_point(fe, &candidates[i], &candidates[j], i, j)? {
                ridges.push(ridge);
            }
        }
    }

    if !ridges.is_empty() {
        let sets = group_ridges(&ridges, candidates, point, tolerance);
        let mut best = 0;
        for (i, set) in sets.iter().enumerate().skip(1) {
            if set.distance < sets[best].distance {
                best = i;
            }
        }

        let set = &sets[best];
        if set.distance < Real::MAX {
            if let Some((face, _)) = set.lowest_face_index() {
                let mut info = candidates[face].clone();
                info.closest_point = set.closest_coor;
                info.distance = if info.distance >= 0.0 {
                    set.distance
                } else {
                    -set.distance
                };

                if ctx.config.normal_smoothing_method.is_none() {
                    let mut normal = utils::normalize_or_keep(set.closest_coor - point);
                    if normal.dot(&info.normal) < 0.0 {
                        normal = -normal;
                    }
                    info.normal = normal;
                }

                info.tangential_distance = if set.ridges.len() == 1 {
                    set.ridges[0].tangential_distance
                } else {
                    0.0
                };

                fe.reinit(info.side.ty, &info.side.points, &info.closest_point_ref)
                    .map_err(|source| ContactError::Reinit {
                        elem: info.elem,
                        source,
                    })?;
                cache_side_data(&mut info, fe);
                return Ok(Some(info));
            }
        }
    }

    let best = select_best_candidate(candidates, tolerance, ctx.config.tie_break_tolerance)?;
    Ok(best.map(|i| candidates[i].clone()))
}

// Normal smoothing and slip update of an accepted interaction.
fn finish_accepted<F: FeEvaluator>(
    ctx: &SearchContext<'_>,
    info: &mut PenetrationInfo,
    candidates: &[PenetrationInfo],
    point: &Point<Real>,
    fe: &mut F,
) -> Result<(), ContactError> {
    match ctx.config.normal_smoothing_method {
        Some(NormalSmoothingMethod::EdgeBased) => {
            smooth_normal_edge_based(ctx, info, candidates, point, fe)?
        }
        Some(NormalSmoothingMethod::NodalNormalBased) => {
            info.normal = nodal_normal_smoothing(info, ctx.nodal_normals)?
        }
        None => {}
    }

    compute_slip(ctx.mesh, info, fe)
}

/// Updates the incremental slip of `info` from its start-of-step contact point and, for a
/// captured node, its accumulated slip and frictional energy.
pub fn compute_slip<F: FeEvaluator + ?Sized>(
    mesh: &Mesh,
    info: &mut PenetrationInfo,
    fe: &mut F,
) -> Result<(), ContactError> {
    let start_side = mesh.build_side(info.starting_elem, info.starting_side_num)?;
    fe.reinit(
        start_side.ty,
        &start_side.points,
        &info.starting_closest_point_ref,
    )
    .map_err(|source| ContactError::Reinit {
        elem: info.starting_elem,
        source,
    })?;
    let starting_point = fe.xyz();
    info.incremental_slip = info.closest_point - starting_point;

    if info.is_captured() {
        info.frictional_energy =
            info.frictional_energy_old + info.contact_force.dot(&info.incremental_slip);
        info.accumulated_slip = info.accumulated_slip_old + info.incremental_slip.norm();
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::ElemType;

    // Two unit quads side by side along x, with a secondary node above them.
    fn two_faces(secondary: Point<Real>) -> (Mesh, NodeId) {
        let mut mesh = Mesh::new(2);
        for (x, y) in [(0.0, 0.0), (1.0, 0.0), (2.0, 0.0), (0.0, 1.0), (1.0, 1.0), (2.0, 1.0)] {
            let _ = mesh.add_node(Point::new(x, y, 0.0));
        }
        let e0 = mesh.add_elem(ElemType::Quad4, &[0, 1, 4, 3]).unwrap();
        let e1 = mesh.add_elem(ElemType::Quad4, &[1, 2, 5, 4]).unwrap();
        mesh.add_side_boundary(e0, 2, 1).unwrap();
        mesh.add_side_boundary(e1, 2, 1).unwrap();

        let n = mesh.add_node(secondary);
        let a = mesh.add_node(secondary + Vector::new(-0.1, 0.5, 0.0));
        let _ = mesh.add_elem(ElemType::Edge2, &[a, n]).unwrap();
        mesh.add_node_boundary(n, 2).unwrap();
        (mesh, n)
    }

    #[test]
    fn single_face_contact() {
        let (mesh, n) = two_faces(Point::new(0.5, 1.01, 0.0));
        let mut locator = PenetrationLocator::new(&mesh, 1, 2, LocatorConfig::default()).unwrap();
        locator.detect_penetration(&mesh).unwrap();

        let info = locator.info(n).unwrap();
        assert_eq!(info.elem, 0);
        assert_relative_eq!(info.distance, -0.01, epsilon = 1.0e-12);
        assert_relative_eq!(info.normal, Vector::y(), epsilon = 1.0e-12);
        assert_relative_eq!(info.closest_point, Point::new(0.5, 1.0, 0.0), epsilon = 1.0e-12);
        assert!(locator.recheck_nodes().is_empty());
    }

    #[test]
    fn coplanar_faces_tie_break_on_element_id() {
        let (mesh, n) = two_faces(Point::new(1.0, 1.02, 0.0));
        let mut locator = PenetrationLocator::new(&mesh, 1, 2, LocatorConfig::default()).unwrap();
        locator.detect_penetration(&mesh).unwrap();

        let info = locator.info(n).unwrap();
        assert_eq!(info.elem, 0);
        assert_eq!(info.tangential_distance, 0.0);
        assert_relative_eq!(info.distance, -0.02, epsilon = 1.0e-12);
    }

    #[test]
    fn slip_is_measured_from_the_start_of_the_step() {
        let (mut mesh, n) = two_faces(Point::new(0.5, 1.0, 0.0));
        let mut locator = PenetrationLocator::new(&mesh, 1, 2, LocatorConfig::default()).unwrap();
        locator.detect_penetration(&mesh).unwrap();
        locator.info_mut(n).unwrap().capture();

        mesh.set_node(n, Point::new(0.7, 0.99, 0.0)).unwrap();
        locator.detect_penetration(&mesh).unwrap();

        let info = locator.info(n).unwrap();
        assert!(info.is_captured());
        assert_relative_eq!(info.incremental_slip, Vector::new(0.2, 0.0, 0.0), epsilon = 1.0e-12);
        assert_relative_eq!(info.accumulated_slip, 0.2, epsilon = 1.0e-12);
        assert_relative_eq!(info.distance, 0.01, epsilon = 1.0e-12);
    }
}
