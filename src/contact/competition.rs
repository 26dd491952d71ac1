//! Resolution between candidate faces competing for the same secondary node.

use crate::contact::{ContactError, PenetrationInfo};
use crate::math::Real;
use crate::utils::{self, SortedPair};

/// The outcome of the competition between two candidate faces.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CompeteResult {
    /// The first candidate is the better one.
    FirstWins,
    /// The second candidate is the better one.
    SecondWins,
    /// Neither candidate is acceptable.
    NeitherWins,
}

/// How the off-face projections of two candidates relate.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CommonEdgeResult {
    /// The projections were clamped to unrelated parts of their faces.
    NoCommon,
    /// Both projections were clamped to the same edge.
    CommonEdge,
    /// Both projections were clamped to the same corner.
    CommonNode,
    /// One projection was clamped to an edge, the other to a corner of that edge.
    EdgeAndCommonNode,
}

/// Classifies the off-edge nodes of two candidates.
pub fn interactions_off_common_edge(
    pi1: &PenetrationInfo,
    pi2: &PenetrationInfo,
) -> Result<CommonEdgeResult, ContactError> {
    let dim1 = pi1.side.dim();
    let dim2 = pi2.side.dim();
    if dim1 != dim2 {
        return Err(ContactError::IncompatibleSideDimensions(dim1, dim2));
    }

    let off1 = &pi1.off_edge_nodes[..];
    let off2 = &pi2.off_edge_nodes[..];

    let result = if dim1 == 1 {
        match (off1, off2) {
            ([a], [b]) if a == b => CommonEdgeResult::CommonEdge,
            _ => CommonEdgeResult::NoCommon,
        }
    } else {
        match (off1, off2) {
            ([a], [b]) if a == b => CommonEdgeResult::CommonNode,
            ([a], [b0, b1]) if a == b0 || a == b1 => CommonEdgeResult::EdgeAndCommonNode,
            ([a0, a1], [b]) if a0 == b || a1 == b => CommonEdgeResult::EdgeAndCommonNode,
            ([a0, a1], [b0, b1]) if SortedPair::new(a0, a1) == SortedPair::new(b0, b1) => {
                CommonEdgeResult::CommonEdge
            }
            _ => CommonEdgeResult::NoCommon,
        }
    };

    Ok(result)
}

/// Decides which of two candidates is the better contact interaction.
///
/// Candidates on their face beat candidates off their face, and candidates within
/// `tangential_tolerance` of their face beat those beyond it. Between two equivalent
/// candidates, the penetrated one wins, then the closer one. Distances equal up to the
/// relative `tie_break_tolerance` are settled by the lower element id, then the lower side.
pub fn compete_interactions(
    pi1: &PenetrationInfo,
    pi2: &PenetrationInfo,
    tangential_tolerance: Real,
    tie_break_tolerance: Real,
) -> Result<CompeteResult, ContactError> {
    let td1 = pi1.tangential_distance;
    let td2 = pi2.tangential_distance;

    let result = if td1 > tangential_tolerance && td2 > tangential_tolerance {
        CompeteResult::NeitherWins
    } else if td1 == 0.0 && td2 > 0.0 {
        CompeteResult::FirstWins
    } else if td2 == 0.0 && td1 > 0.0 {
        CompeteResult::SecondWins
    } else if td1 <= tangential_tolerance && td2 > tangential_tolerance {
        CompeteResult::FirstWins
    } else if td2 <= tangential_tolerance && td1 > tangential_tolerance {
        CompeteResult::SecondWins
    } else if td1 == 0.0 && td2 == 0.0 {
        closest_interaction(pi1, pi2, tie_break_tolerance)
    } else {
        // Both off their face, within tolerance.
        match interactions_off_common_edge(pi1, pi2)? {
            // Ridges were examined before the competition: neither face is valid here.
            CommonEdgeResult::CommonEdge | CommonEdgeResult::CommonNode => {
                CompeteResult::NeitherWins
            }
            CommonEdgeResult::EdgeAndCommonNode => {
                let n1 = pi1.off_edge_nodes.len();
                let n2 = pi2.off_edge_nodes.len();
                if n1 == n2 {
                    return Err(ContactError::InvalidOffEdgeNodes(n1, n2));
                } else if n1 == 2 {
                    CompeteResult::FirstWins
                } else if n2 == 2 {
                    CompeteResult::SecondWins
                } else {
                    return Err(ContactError::InvalidOffEdgeNodes(n1, n2));
                }
            }
            CommonEdgeResult::NoCommon => closest_interaction(pi1, pi2, tie_break_tolerance),
        }
    };

    Ok(result)
}

fn closest_interaction(
    pi1: &PenetrationInfo,
    pi2: &PenetrationInfo,
    tie_break_tolerance: Real,
) -> CompeteResult {
    let d1 = pi1.distance;
    let d2 = pi2.distance;

    if d1 >= 0.0 && d2 < 0.0 {
        CompeteResult::FirstWins
    } else if d2 >= 0.0 && d1 < 0.0 {
        CompeteResult::SecondWins
    } else if utils::relative_fuzzy_less_than(d1.abs(), d2.abs(), tie_break_tolerance) {
        CompeteResult::FirstWins
    } else if utils::relative_fuzzy_less_than(d2.abs(), d1.abs(), tie_break_tolerance) {
        CompeteResult::SecondWins
    } else if (pi1.elem, pi1.side_num) < (pi2.elem, pi2.side_num) {
        CompeteResult::FirstWins
    } else {
        CompeteResult::SecondWins
    }
}

/// Runs the pairwise competition over `candidates` and returns the index of the survivor.
pub fn select_best_candidate(
    candidates: &[PenetrationInfo],
    tangential_tolerance: Real,
    tie_break_tolerance: Real,
) -> Result<Option<usize>, ContactError> {
    let n = candidates.len();
    if n == 0 {
        return Ok(None);
    }

    let mut best = 0;
    let mut i = 1;
    while i < n && best < n {
        match compete_interactions(
            &candidates[best],
            &candidates[i],
            tangential_tolerance,
            tie_break_tolerance,
        )? {
            CompeteResult::FirstWins => i += 1,
            CompeteResult::SecondWins => {
                best = i;
                i += 1;
            }
            CompeteResult::NeitherWins => {
                best = i + 1;
                i += 2;
            }
        }
    }

    Ok((best < n && candidates[best].tangential_distance <= tangential_tolerance).then_some(best))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::Point;
    use crate::mesh::{ElemType, NodeId, Side};
    use crate::utils::FUZZY_TOLERANCE;

    fn candidate(elem: u32, distance: Real, td: Real, off: &[NodeId]) -> PenetrationInfo {
        let side = Side {
            elem,
            side: 0,
            ty: ElemType::Quad4,
            nodes: [0, 1, 2, 3].into_iter().collect(),
            points: [Point::origin(); 4].into_iter().collect(),
        };
        let mut info = PenetrationInfo::new(100, elem, 0, side);
        info.distance = distance;
        info.tangential_distance = td;
        info.off_edge_nodes = off.iter().copied().collect();
        info
    }

    #[test]
    fn on_face_beats_off_face() {
        let a = candidate(1, 0.1, 0.0, &[]);
        let b = candidate(0, 0.01, 0.05, &[1, 2]);
        assert_beats(&a, &b, 0.1);
    }

    fn assert_beats(winner: &PenetrationInfo, loser: &PenetrationInfo, tangential_tolerance: Real) {
        assert_eq!(
            compete_interactions(winner, loser, tangential_tolerance, FUZZY_TOLERANCE).unwrap(),
            CompeteResult::FirstWins
        );
        assert_eq!(
            compete_interactions(loser, winner, tangential_tolerance, FUZZY_TOLERANCE).unwrap(),
            CompeteResult::SecondWins
        );
    }

    #[test]
    fn penetrated_then_closer_then_lower_id() {
        let penetrated = candidate(5, 0.2, 0.0, &[]);
        let outside = candidate(1, -0.01, 0.0, &[]);
        assert_beats(&penetrated, &outside, 0.0);

        let far = candidate(1, 0.3, 0.0, &[]);
        let near = candidate(5, 0.2, 0.0, &[]);
        assert_beats(&near, &far, 0.0);

        let a = candidate(7, 0.0, 0.0, &[]);
        let b = candidate(3, 0.0, 0.0, &[]);
        assert_beats(&b, &a, 0.0);
        assert_eq!(
            select_best_candidate(&[a.clone(), b.clone()], 0.0, FUZZY_TOLERANCE).unwrap(),
            Some(1)
        );
        assert_eq!(select_best_candidate(&[b, a], 0.0, FUZZY_TOLERANCE).unwrap(), Some(0));
    }

    #[test]
    fn sides_of_one_element_tie_on_the_side_number() {
        let mut bottom = candidate(4, 0.1, 0.0, &[]);
        let mut top = candidate(4, 0.1, 0.0, &[]);
        bottom.side_num = 0;
        top.side_num = 5;
        assert_beats(&bottom, &top, 0.0);
        assert_eq!(
            select_best_candidate(&[top.clone(), bottom.clone()], 0.0, FUZZY_TOLERANCE).unwrap(),
            Some(1)
        );
        assert_eq!(select_best_candidate(&[bottom, top], 0.0, FUZZY_TOLERANCE).unwrap(), Some(0));
    }

    #[test]
    fn off_edge_classification() {
        let edge = candidate(0, 0.1, 0.01, &[1, 2]);
        let corner = candidate(1, 0.1, 0.01, &[2]);
        assert_eq!(
            interactions_off_common_edge(&edge, &corner).unwrap(),
            CommonEdgeResult::EdgeAndCommonNode
        );
        assert_beats(&edge, &corner, 0.1);

        let same_edge = candidate(2, 0.1, 0.01, &[2, 1]);
        assert_eq!(
            interactions_off_common_edge(&edge, &same_edge).unwrap(),
            CommonEdgeResult::CommonEdge
        );
        for (x, y) in [(&edge, &same_edge), (&same_edge, &edge)] {
            assert_eq!(
                compete_interactions(x, y, 0.1, FUZZY_TOLERANCE).unwrap(),
                CompeteResult::NeitherWins
            );
        }
    }

    #[test]
    fn survivor_must_be_within_tolerance() {
        let a = candidate(0, 0.1, 0.5, &[1, 2]);
        let b = candidate(1, 0.1, 0.6, &[3]);
        assert_eq!(select_best_candidate(&[a, b], 0.1, FUZZY_TOLERANCE).unwrap(), None);
    }
}
