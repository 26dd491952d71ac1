use crate::math::{Point, Real};

/// The element (and element side) types understood by the contact and cutting engines.
///
/// Only linear Lagrange elements are supported.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde-serialize", derive(Serialize, Deserialize))]
pub enum ElemType {
    /// A single node: the side of an `Edge2`.
    NodeElem,
    /// Two-node segment, reference coordinate `xi ∈ [-1, 1]`.
    Edge2,
    /// Three-node triangle, reference simplex `xi, eta ≥ 0, xi + eta ≤ 1`.
    Tri3,
    /// Four-node quadrilateral, reference square `[-1, 1]²`.
    Quad4,
    /// Four-node tetrahedron, reference simplex.
    Tet4,
    /// Eight-node hexahedron, reference cube `[-1, 1]³`.
    Hex8,
}

const NODE_SIDES: [&[usize]; 0] = [];
const EDGE2_SIDES: [&[usize]; 2] = [&[0], &[1]];
const TRI3_SIDES: [&[usize]; 3] = [&[0, 1], &[1, 2], &[2, 0]];
const QUAD4_SIDES: [&[usize]; 4] = [&[0, 1], &[1, 2], &[2, 3], &[3, 0]];
const TET4_SIDES: [&[usize]; 4] = [&[0, 2, 1], &[0, 1, 3], &[1, 2, 3], &[2, 0, 3]];
const HEX8_SIDES: [&[usize]; 6] = [
    &[0, 3, 2, 1],
    &[0, 1, 5, 4],
    &[1, 2, 6, 5],
    &[2, 3, 7, 6],
    &[3, 0, 4, 7],
    &[4, 5, 6, 7],
];

const EDGE2_EDGES: [[usize; 2]; 1] = [[0, 1]];
const TRI3_EDGES: [[usize; 2]; 3] = [[0, 1], [1, 2], [2, 0]];
const QUAD4_EDGES: [[usize; 2]; 4] = [[0, 1], [1, 2], [2, 3], [3, 0]];
const TET4_EDGES: [[usize; 2]; 6] = [[0, 1], [1, 2], [0, 2], [0, 3], [1, 3], [2, 3]];
const HEX8_EDGES: [[usize; 2]; 12] = [
    [0, 1],
    [1, 2],
    [2, 3],
    [0, 3],
    [0, 4],
    [1, 5],
    [2, 6],
    [3, 7],
    [4, 5],
    [5, 6],
    [6, 7],
    [4, 7],
];

const NODE_REF: [[Real; 3]; 1] = [[0.0, 0.0, 0.0]];
const EDGE2_REF: [[Real; 3]; 2] = [[-1.0, 0.0, 0.0], [1.0, 0.0, 0.0]];
const TRI3_REF: [[Real; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
const QUAD4_REF: [[Real; 3]; 4] = [
    [-1.0, -1.0, 0.0],
    [1.0, -1.0, 0.0],
    [1.0, 1.0, 0.0],
    [-1.0, 1.0, 0.0],
];
const TET4_REF: [[Real; 3]; 4] = [
    [0.0, 0.0, 0.0],
    [1.0, 0.0, 0.0],
    [0.0, 1.0, 0.0],
    [0.0, 0.0, 1.0],
];
const HEX8_REF: [[Real; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [1.0, 1.0, 1.0],
    [-1.0, 1.0, 1.0],
];

impl ElemType {
    /// The topological dimension of this element type.
    pub fn dim(self) -> usize {
        match self {
            ElemType::NodeElem => 0,
            ElemType::Edge2 => 1,
            ElemType::Tri3 | ElemType::Quad4 => 2,
            ElemType::Tet4 | ElemType::Hex8 => 3,
        }
    }

    /// The number of nodes of this element type.
    pub fn n_nodes(self) -> usize {
        match self {
            ElemType::NodeElem => 1,
            ElemType::Edge2 => 2,
            ElemType::Tri3 => 3,
            ElemType::Quad4 | ElemType::Tet4 => 4,
            ElemType::Hex8 => 8,
        }
    }

    /// The number of sides (faces in 3D, edges in 2D, end points in 1D).
    pub fn n_sides(self) -> usize {
        self.side_table().len()
    }

    /// The local node indices of the `side`-th side, ordered so that the side normal
    /// computed from its parametric tangents points out of the element.
    pub fn side_nodes(self, side: usize) -> Option<&'static [usize]> {
        self.side_table().get(side).copied()
    }

    /// The type of the sides of this element type.
    pub fn side_type(self) -> Option<ElemType> {
        match self {
            ElemType::NodeElem => None,
            ElemType::Edge2 => Some(ElemType::NodeElem),
            ElemType::Tri3 | ElemType::Quad4 => Some(ElemType::Edge2),
            ElemType::Tet4 => Some(ElemType::Tri3),
            ElemType::Hex8 => Some(ElemType::Quad4),
        }
    }

    /// The local node pairs of the element edges.
    pub fn edges(self) -> &'static [[usize; 2]] {
        match self {
            ElemType::NodeElem => &[],
            ElemType::Edge2 => &EDGE2_EDGES,
            ElemType::Tri3 => &TRI3_EDGES,
            ElemType::Quad4 => &QUAD4_EDGES,
            ElemType::Tet4 => &TET4_EDGES,
            ElemType::Hex8 => &HEX8_EDGES,
        }
    }

    /// The reference coordinates of the element vertices.
    pub fn reference_vertices(self) -> &'static [[Real; 3]] {
        match self {
            ElemType::NodeElem => &NODE_REF,
            ElemType::Edge2 => &EDGE2_REF,
            ElemType::Tri3 => &TRI3_REF,
            ElemType::Quad4 => &QUAD4_REF,
            ElemType::Tet4 => &TET4_REF,
            ElemType::Hex8 => &HEX8_REF,
        }
    }

    /// The centroid of the reference element.
    pub fn reference_centroid(self) -> Point<Real> {
        match self {
            ElemType::Tri3 => Point::new(1.0 / 3.0, 1.0 / 3.0, 0.0),
            ElemType::Tet4 => Point::new(0.25, 0.25, 0.25),
            _ => Point::origin(),
        }
    }

    /// Is `p` inside the reference element, up to `eps`?
    pub fn contains_reference_point(self, p: &Point<Real>, eps: Real) -> bool {
        match self {
            ElemType::NodeElem => true,
            ElemType::Edge2 => p.x >= -1.0 - eps && p.x <= 1.0 + eps,
            ElemType::Quad4 => p.x.abs() <= 1.0 + eps && p.y.abs() <= 1.0 + eps,
            ElemType::Hex8 => {
                p.x.abs() <= 1.0 + eps && p.y.abs() <= 1.0 + eps && p.z.abs() <= 1.0 + eps
            }
            ElemType::Tri3 => p.x >= -eps && p.y >= -eps && p.x + p.y <= 1.0 + eps,
            ElemType::Tet4 => {
                p.x >= -eps && p.y >= -eps && p.z >= -eps && p.x + p.y + p.z <= 1.0 + eps
            }
        }
    }

    fn side_table(self) -> &'static [&'static [usize]] {
        match self {
            ElemType::NodeElem => &NODE_SIDES,
            ElemType::Edge2 => &EDGE2_SIDES,
            ElemType::Tri3 => &TRI3_SIDES,
            ElemType::Quad4 => &QUAD4_SIDES,
            ElemType::Tet4 => &TET4_SIDES,
            ElemType::Hex8 => &HEX8_SIDES,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ElemType;

    #[test]
    fn side_tables_are_consistent() {
        for ty in [
            ElemType::Edge2,
            ElemType::Tri3,
            ElemType::Quad4,
            ElemType::Tet4,
            ElemType::Hex8,
        ] {
            let side_ty = ty.side_type().unwrap();
            for s in 0..ty.n_sides() {
                assert_eq!(ty.side_nodes(s).unwrap().len(), side_ty.n_nodes());
            }
            assert_eq!(ty.reference_vertices().len(), ty.n_nodes());
        }
        assert_eq!(ElemType::Edge2.edges().len(), 1);
        assert!(ElemType::NodeElem.edges().is_empty());
        assert_eq!(ElemType::Hex8.edges().len(), 12);
    }
}
