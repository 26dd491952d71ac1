use std::collections::{BTreeMap, BTreeSet};

use crate::efa::fragment2d::walk_cuts;
use crate::efa::{EfaError, EfaFace, Fragment, NodeArena, NodeCategory, NodeKey};
use crate::mesh::ElemId;

/// The physical part of a 3D element: a closed set of boundary faces.
///
/// Faces lying on an element face are exterior; a split adds one interior face per fragment.
#[derive(Clone, Debug, PartialEq)]
pub struct Fragment3D {
    faces: Vec<EfaFace>,
}

impl Fragment3D {
    /// The fragment bounded by `faces`.
    pub fn from_faces(faces: Vec<EfaFace>) -> Self {
        Self { faces }
    }

    /// The number of boundary faces.
    pub fn num_faces(&self) -> usize {
        self.faces.len()
    }

    /// The `i`-th boundary face.
    pub fn face(&self, i: usize) -> &EfaFace {
        &self.faces[i]
    }

    pub(crate) fn face_mut(&mut self, i: usize) -> &mut EfaFace {
        &mut self.faces[i]
    }

    /// The boundary faces.
    pub fn faces(&self) -> &[EfaFace] {
        &self.faces
    }

    /// Is the `i`-th boundary face inside the element, that is, not on any element face?
    pub fn is_face_interior(&self, i: usize, host_faces: &[EfaFace]) -> bool {
        let nodes = self.faces[i].nodes();
        !host_faces
            .iter()
            .any(|h| nodes.iter().all(|n| h.contains_node(*n)))
    }

    /// The number of interior boundary faces.
    pub fn num_interior_faces(&self, host_faces: &[EfaFace]) -> usize {
        (0..self.faces.len())
            .filter(|i| self.is_face_interior(*i, host_faces))
            .count()
    }

    /// The number of boundary faces carrying a cut.
    pub fn num_cut_faces(&self) -> usize {
        self.faces.iter().filter(|f| f.num_cut_edges() > 0).count()
    }

    /// Do the cuts of the boundary faces close into loops?
    ///
    /// Every cut face must have exactly two cut edges, each cut once, and every cut node must
    /// be shared by exactly two faces.
    pub fn has_closed_cut_loop(&self) -> bool {
        let mut uses: BTreeMap<NodeKey, usize> = BTreeMap::new();
        let mut any = false;
        for face in &self.faces {
            if face.num_cut_edges() == 0 {
                continue;
            }
            any = true;
            if face.num_cut_edges() != 2 || face.num_cuts() != 2 {
                return false;
            }
            for edge in face.edges() {
                for node in edge.embedded_nodes() {
                    *uses.entry(node).or_default() += 1;
                }
            }
        }
        any && uses.values().all(|n| *n == 2)
    }

    /// Splits this fragment along the closed loop of its cuts.
    ///
    /// A fragment without a closed cut loop is returned unchanged.
    pub(crate) fn split(&self, arena: &NodeArena, elem: ElemId) -> Result<Vec<Fragment3D>, EfaError> {
        if !self.has_closed_cut_loop() {
            return Ok(vec![self.clone()]);
        }

        // Vertex components connected by uncut edges.
        let mut adjacency: BTreeMap<NodeKey, BTreeSet<NodeKey>> = BTreeMap::new();
        for face in &self.faces {
            for edge in face.edges() {
                let [a, b] = edge.nodes();
                let _ = adjacency.entry(a).or_default();
                let _ = adjacency.entry(b).or_default();
                if !edge.has_intersection() {
                    let _ = adjacency.entry(a).or_default().insert(b);
                    let _ = adjacency.entry(b).or_default().insert(a);
                }
            }
        }

        let mut side: BTreeMap<NodeKey, usize> = BTreeMap::new();
        let mut num_sides = 0;
        for &start in adjacency.keys() {
            if side.contains_key(&start) {
                continue;
            }
            let mut stack = vec![start];
            let _ = side.insert(start, num_sides);
            while let Some(n) = stack.pop() {
                for &m in &adjacency[&n] {
                    if !side.contains_key(&m) {
                        let _ = side.insert(m, num_sides);
                        stack.push(m);
                    }
                }
            }
            num_sides += 1;
        }
        if num_sides != 2 {
            return Err(EfaError::FragmentSanity {
                elem,
                reason: "a closed cut must separate the vertices into two groups",
            });
        }

        let mut parts: [Vec<EfaFace>; 2] = [Vec::new(), Vec::new()];
        let mut segments: [BTreeMap<NodeKey, NodeKey>; 2] = [BTreeMap::new(), BTreeMap::new()];
        for face in &self.faces {
            if face.num_cut_edges() == 0 {
                parts[side[&face.node(0)]].push(EfaFace::new(&face.nodes()));
                continue;
            }

            let walk = walk_cuts(face.edges(), arena, elem)?;
            for cycle in walk.parts.iter().filter(|p| p.len() >= 3) {
                let Some(k) = cycle
                    .iter()
                    .find(|n| arena.category(**n) != NodeCategory::Embedded)
                    .map(|n| side[n])
                else {
                    continue;
                };

                let n = cycle.len();
                for i in 0..n {
                    let (u, v) = (cycle[i], cycle[(i + 1) % n]);
                    if arena.category(u) == NodeCategory::Embedded
                        && arena.category(v) == NodeCategory::Embedded
                    {
                        // The interior face runs along the cut in the opposite direction.
                        let _ = segments[k].insert(v, u);
                    }
                }
                parts[k].push(EfaFace::new(cycle));
            }
        }

        let mut fragments = Vec::with_capacity(2);
        for (mut faces, next) in parts.into_iter().zip(segments) {
            let Some(&start) = next.keys().next() else {
                return Err(EfaError::FragmentSanity {
                    elem,
                    reason: "a split fragment has no cut segment",
                });
            };
            let mut cycle = vec![start];
            let mut current = start;
            while let Some(&following) = next.get(&current) {
                if following == start {
                    break;
                }
                if cycle.len() > next.len() {
                    break;
                }
                cycle.push(following);
                current = following;
            }
            if cycle.len() != next.len() {
                return Err(EfaError::FragmentSanity {
                    elem,
                    reason: "the cut segments do not form a single loop",
                });
            }
            faces.push(EfaFace::new(&cycle));
            fragments.push(Fragment3D { faces });
        }

        Ok(fragments)
    }
}

impl Fragment for Fragment3D {
    fn num_cuts(&self) -> usize {
        self.faces
            .iter()
            .flat_map(|f| f.edges().iter().flat_map(|e| e.embedded_nodes()))
            .collect::<BTreeSet<_>>()
            .len()
    }

    fn contains_node(&self, node: NodeKey) -> bool {
        self.faces.iter().any(|f| f.contains_node(node))
    }

    fn all_nodes(&self) -> BTreeSet<NodeKey> {
        self.faces.iter().flat_map(|f| f.nodes()).collect()
    }

    // A crack-tip fragment keeps the crossed element face whole, so a piece of that face
    // split off in the neighbour still connects to it.
    fn is_connected(&self, other: &Self) -> bool {
        self.faces.iter().any(|f| {
            other
                .faces
                .iter()
                .any(|o| f.equivalent(o) || f.contains_face(o) || o.contains_face(f))
        })
    }

    fn switch_node(&mut self, new: NodeKey, old: NodeKey) {
        for f in &mut self.faces {
            f.switch_node(new, old);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::ElemType;

    fn tet_faces(arena: &mut NodeArena) -> (Vec<NodeKey>, Vec<EfaFace>) {
        let k: Vec<_> = (0..4).map(|i| arena.permanent_or_insert(i)).collect();
        let faces = (0..4)
            .map(|s| {
                let side = ElemType::Tet4.side_nodes(s).unwrap();
                EfaFace::new(&side.iter().map(|i| k[*i]).collect::<Vec<_>>())
            })
            .collect();
        (k, faces)
    }

    fn cut(faces: &mut [EfaFace], a: NodeKey, b: NodeKey, node: NodeKey) {
        for face in faces.iter_mut() {
            if let Some(e) = face.find_edge(a, b) {
                face.edge_mut(e).add_intersection(0.5, node, a);
            }
        }
    }

    #[test]
    fn corner_cut_splits_a_tetrahedron() {
        let mut arena = NodeArena::default();
        let (k, mut faces) = tet_faces(&mut arena);
        for other in 1..4 {
            let node = arena.new_embedded();
            cut(&mut faces, k[0], k[other], node);
        }

        let frag = Fragment3D::from_faces(faces.clone());
        assert!(frag.has_closed_cut_loop());
        assert_eq!(frag.num_cuts(), 3);

        let split = frag.split(&arena, 0).unwrap();
        assert_eq!(split.len(), 2);
        assert_eq!(split[0].num_faces() + split[1].num_faces(), 4 + 3 + 2);
        assert!(split[0].is_connected(&split[1]));
        for f in &split {
            assert_eq!(f.num_interior_faces(&faces), 1);
        }
    }

    #[test]
    fn split_pieces_connect_to_the_uncut_faces() {
        let mut arena = NodeArena::default();
        let (k, mut faces) = tet_faces(&mut arena);
        for other in 1..4 {
            let node = arena.new_embedded();
            cut(&mut faces, k[0], k[other], node);
        }

        let whole = Fragment3D::from_faces(faces.clone());
        let split = whole.split(&arena, 0).unwrap();
        assert!(split[0].is_connected(&whole));
        assert!(whole.is_connected(&split[1]));
    }

    #[test]
    fn open_cut_keeps_the_fragment() {
        let mut arena = NodeArena::default();
        let (k, mut faces) = tet_faces(&mut arena);
        let node = arena.new_embedded();
        cut(&mut faces, k[0], k[1], node);

        let frag = Fragment3D::from_faces(faces);
        assert!(!frag.has_closed_cut_loop());
        let split = frag.split(&arena, 0).unwrap();
        assert_eq!(split.len(), 1);
    }
}
