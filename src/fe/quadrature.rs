use smallvec::SmallVec;

use crate::math::{Point, Real};
use crate::mesh::ElemType;

/// A quadrature rule on a reference element.
#[derive(Clone, Debug, PartialEq)]
pub struct QuadratureRule {
    /// The quadrature points, in reference coordinates.
    pub points: SmallVec<[Point<Real>; 8]>,
    /// The quadrature weights. They sum to the measure of the reference element.
    pub weights: SmallVec<[Real; 8]>,
}

impl QuadratureRule {
    /// The number of quadrature points.
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Does this rule have no points?
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

const GAUSS2: Real = 0.577_350_269_189_625_8;

/// The second-order Gauss rule of an element type.
pub fn gauss_rule(ty: ElemType) -> QuadratureRule {
    let mut points = SmallVec::new();
    let mut weights = SmallVec::new();

    match ty {
        ElemType::NodeElem => {
            points.push(Point::origin());
            weights.push(1.0);
        }
        ElemType::Edge2 => {
            for x in [-GAUSS2, GAUSS2] {
                points.push(Point::new(x, 0.0, 0.0));
                weights.push(1.0);
            }
        }
        ElemType::Quad4 => {
            for y in [-GAUSS2, GAUSS2] {
                for x in [-GAUSS2, GAUSS2] {
                    points.push(Point::new(x, y, 0.0));
                    weights.push(1.0);
                }
            }
        }
        ElemType::Hex8 => {
            for z in [-GAUSS2, GAUSS2] {
                for y in [-GAUSS2, GAUSS2] {
                    for x in [-GAUSS2, GAUSS2] {
                        points.push(Point::new(x, y, z));
                        weights.push(1.0);
                    }
                }
            }
        }
        ElemType::Tri3 => {
            let (a, b) = (1.0 / 6.0, 2.0 / 3.0);
            for (x, y) in [(a, a), (b, a), (a, b)] {
                points.push(Point::new(x, y, 0.0));
                weights.push(1.0 / 6.0);
            }
        }
        ElemType::Tet4 => {
            let a = 0.138_196_601_125_010_5;
            let b = 0.585_410_196_624_968_5;
            for (x, y, z) in [(a, a, a), (b, a, a), (a, b, a), (a, a, b)] {
                points.push(Point::new(x, y, z));
                weights.push(1.0 / 24.0);
            }
        }
    }

    QuadratureRule { points, weights }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn weights_sum_to_reference_measure() {
        let measures = [
            (ElemType::Edge2, 2.0),
            (ElemType::Quad4, 4.0),
            (ElemType::Hex8, 8.0),
            (ElemType::Tri3, 0.5),
            (ElemType::Tet4, 1.0 / 6.0),
        ];
        for (ty, measure) in measures {
            let rule = gauss_rule(ty);
            assert_relative_eq!(rule.weights.iter().sum::<Real>(), measure, epsilon = 1.0e-14);
        }
    }
}
