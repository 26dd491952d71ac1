use rstar::primitives::GeomWithData;
use rstar::RTree;
use smallvec::SmallVec;

use crate::math::{Point, Real};
use crate::mesh::{BoundaryId, Mesh, MeshError, NodeId};
use crate::utils::hashmap::HashMap;

type IndexedNode = GeomWithData<[Real; 3], NodeId>;

/// The primary nodes closest to one secondary node, sorted by increasing distance.
pub type Patch = SmallVec<[NodeId; 8]>;

/// Finds, for every node of a secondary boundary, the closest node of a primary boundary.
///
/// Each secondary node keeps a *patch*: its `patch_size` nearest primary nodes computed when
/// the patches were last updated. The nearest node is then searched inside the patch only,
/// which stays valid as long as the surfaces move less than the patch extent between two
/// updates.
#[derive(Clone)]
pub struct NearestNodeLocator {
    primary: BoundaryId,
    secondary: BoundaryId,
    patch_size: usize,
    tree: RTree<IndexedNode>,
    patches: HashMap<NodeId, Patch>,
    secondary_nodes: Vec<NodeId>,
}

impl NearestNodeLocator {
    /// Builds the locator and computes the patches of every secondary node.
    pub fn new(
        mesh: &Mesh,
        primary: BoundaryId,
        secondary: BoundaryId,
        patch_size: usize,
    ) -> Result<Self, MeshError> {
        let mut result = NearestNodeLocator {
            primary,
            secondary,
            patch_size: patch_size.max(1),
            tree: RTree::new(),
            patches: HashMap::default(),
            secondary_nodes: Vec::new(),
        };
        result.rebuild(mesh)?;
        Ok(result)
    }

    /// The primary boundary id.
    pub fn primary_boundary(&self) -> BoundaryId {
        self.primary
    }

    /// The secondary boundary id.
    pub fn secondary_boundary(&self) -> BoundaryId {
        self.secondary
    }

    /// The secondary nodes handled by this locator, sorted by id.
    pub fn secondary_nodes(&self) -> &[NodeId] {
        &self.secondary_nodes
    }

    /// Recomputes the spatial index and every patch from the current node positions.
    pub fn rebuild(&mut self, mesh: &Mesh) -> Result<(), MeshError> {
        let primary_nodes = mesh
            .boundary_nodes(self.primary)
            .into_iter()
            .map(|id| mesh.node(id).map(|pt| IndexedNode::new(to_array(pt), id)))
            .collect::<Result<Vec<_>, _>>()?;
        self.tree = RTree::bulk_load(primary_nodes);
        self.secondary_nodes = mesh.boundary_nodes(self.secondary);
        self.patches.clear();

        let nodes = self.secondary_nodes.clone();
        self.update_patches(mesh, &nodes)
    }

    /// Recomputes the patches of the given secondary nodes.
    ///
    /// The spatial index of the primary nodes is refreshed first so that the new patches
    /// account for the current primary positions.
    pub fn update_patches(&mut self, mesh: &Mesh, nodes: &[NodeId]) -> Result<(), MeshError> {
        if nodes.is_empty() {
            return Ok(());
        }

        let primary_nodes = self
            .tree
            .iter()
            .map(|entry| mesh.node(entry.data).map(|pt| IndexedNode::new(to_array(pt), entry.data)))
            .collect::<Result<Vec<_>, _>>()?;
        self.tree = RTree::bulk_load(primary_nodes);

        for node in nodes {
            let query = to_array(mesh.node(*node)?);
            let patch: Patch = self
                .tree
                .nearest_neighbor_iter(&query)
                .take(self.patch_size)
                .map(|entry| entry.data)
                .collect();
            let _ = self.patches.insert(*node, patch);
        }

        log::debug!("updated {} nearest-node patches", nodes.len());
        Ok(())
    }

    /// The patch of a secondary node.
    pub fn patch(&self, node: NodeId) -> Option<&Patch> {
        self.patches.get(&node)
    }

    /// The primary node of the patch of `node` closest to `pt`, with its distance.
    pub fn nearest_node(
        &self,
        mesh: &Mesh,
        node: NodeId,
        pt: &Point<Real>,
    ) -> Option<(NodeId, Real)> {
        let patch = self.patches.get(&node)?;
        let mut best: Option<(NodeId, Real)> = None;

        for candidate in patch {
            let Ok(cpt) = mesh.node(*candidate) else {
                continue;
            };
            let dist = na::distance(pt, cpt);
            if best.map(|(_, d)| dist < d).unwrap_or(true) {
                best = Some((*candidate, dist));
            }
        }

        best
    }
}

fn to_array(pt: &Point<Real>) -> [Real; 3] {
    [pt.x, pt.y, pt.z]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::ElemType;

    #[test]
    fn nearest_node_within_patch() {
        let mut mesh = Mesh::new(2);
        // Two stacked quads: bottom one is primary (top side), top one is secondary.
        for (x, y) in [
            (0.0, 0.0),
            (1.0, 0.0),
            (1.0, 1.0),
            (0.0, 1.0),
            (0.0, 1.01),
            (1.0, 1.01),
            (1.0, 2.0),
            (0.0, 2.0),
        ] {
            let _ = mesh.add_node(Point::new(x, y, 0.0));
        }
        let e0 = mesh.add_elem(ElemType::Quad4, &[0, 1, 2, 3]).unwrap();
        let e1 = mesh.add_elem(ElemType::Quad4, &[4, 5, 6, 7]).unwrap();
        mesh.add_side_boundary(e0, 2, 1).unwrap();
        mesh.add_side_boundary(e1, 0, 2).unwrap();

        let locator = NearestNodeLocator::new(&mesh, 1, 2, 4).unwrap();
        assert_eq!(locator.secondary_nodes(), &[4, 5]);
        assert_eq!(locator.patch(4).unwrap()[0], 3);

        let (nearest, dist) = locator
            .nearest_node(&mesh, 5, mesh.node(5).unwrap())
            .unwrap();
        assert_eq!(nearest, 2);
        assert_relative_eq!(dist, 0.01, epsilon = 1.0e-12);
    }
}
