use smallvec::SmallVec;

use crate::fe::shape::{lagrange_shape, ShapeValues};
use crate::math::{Matrix3, Point, Real, Vector};
use crate::mesh::ElemType;

/// Failure of the re-evaluation of an element at a reference point.
#[derive(thiserror::Error, Copy, Clone, Debug, PartialEq)]
pub enum ReinitError {
    /// A reference coordinate is NaN or infinite.
    #[error("the reference point is not finite")]
    NonFinite,
    /// The reference point lies too far outside the reference element.
    #[error("the reference point leaves the re-evaluable region |xi| <= {extent}")]
    OutsideRegion {
        /// The largest reference coordinate magnitude accepted.
        extent: Real,
    },
    /// The element has fewer vertices than its type requires.
    #[error("{ty:?} needs {expected} vertices")]
    MissingVertices {
        /// The element type.
        ty: ElemType,
        /// The number of vertices needed.
        expected: usize,
    },
    /// The inverse map did not converge.
    #[error("the inverse map failed to converge")]
    InverseMapFailed,
}

/// Re-evaluates an element (or element side) at a reference point and caches the
/// physical-space quantities the contact projector needs.
///
/// Implementors keep per-element state, so one evaluator is used per worker.
pub trait FeEvaluator {
    /// Evaluates the element of type `ty` with the given vertices at `ref_point`.
    fn reinit(
        &mut self,
        ty: ElemType,
        vertices: &[Point<Real>],
        ref_point: &Point<Real>,
    ) -> Result<(), ReinitError>;

    /// The physical point.
    fn xyz(&self) -> Point<Real>;
    /// The first parametric tangent `∂x/∂ξ`.
    fn dxyz_dxi(&self) -> Vector<Real>;
    /// The second parametric tangent `∂x/∂η`.
    fn dxyz_deta(&self) -> Vector<Real>;
    /// The mixed second derivative `∂²x/∂ξ∂η`.
    fn d2xyz_dxideta(&self) -> Vector<Real>;
    /// The shape function values.
    fn phi(&self) -> &[Real];
    /// The reference gradients of the shape functions.
    fn dphi(&self) -> &[Vector<Real>];
}

/// Evaluator of linear Lagrange elements.
#[derive(Clone, Debug)]
pub struct LagrangeEvaluator {
    /// Reference points with a coordinate larger than this, in absolute value, are rejected.
    pub max_reference_extent: Real,
    shape: ShapeValues,
    xyz: Point<Real>,
    dxyz: [Vector<Real>; 3],
    d2xyz_dxideta: Vector<Real>,
}

impl Default for LagrangeEvaluator {
    fn default() -> Self {
        Self::new(10.0)
    }
}

impl LagrangeEvaluator {
    /// An evaluator rejecting reference points beyond `max_reference_extent`.
    pub fn new(max_reference_extent: Real) -> Self {
        LagrangeEvaluator {
            max_reference_extent,
            shape: ShapeValues::default(),
            xyz: Point::origin(),
            dxyz: [Vector::zeros(); 3],
            d2xyz_dxideta: Vector::zeros(),
        }
    }

    /// The physical tangent along the `i`-th reference direction.
    pub fn dxyz(&self, i: usize) -> Vector<Real> {
        self.dxyz.get(i).copied().unwrap_or_else(Vector::zeros)
    }
}

impl FeEvaluator for LagrangeEvaluator {
    fn reinit(
        &mut self,
        ty: ElemType,
        vertices: &[Point<Real>],
        ref_point: &Point<Real>,
    ) -> Result<(), ReinitError> {
        if vertices.len() < ty.n_nodes() {
            return Err(ReinitError::MissingVertices {
                ty,
                expected: ty.n_nodes(),
            });
        }
        if ref_point.iter().any(|x| !x.is_finite()) {
            return Err(ReinitError::NonFinite);
        }
        if ref_point.iter().any(|x| x.abs() > self.max_reference_extent) {
            return Err(ReinitError::OutsideRegion {
                extent: self.max_reference_extent,
            });
        }

        self.shape = lagrange_shape(ty, ref_point);
        self.xyz = Point::origin();
        self.dxyz = [Vector::zeros(); 3];
        self.d2xyz_dxideta = Vector::zeros();

        for (i, v) in vertices.iter().take(ty.n_nodes()).enumerate() {
            self.xyz.coords += v.coords * self.shape.phi[i];
            for d in 0..3 {
                self.dxyz[d] += v.coords * self.shape.dphi[i][d];
            }
            self.d2xyz_dxideta += v.coords * self.shape.d2phi_dxideta[i];
        }

        Ok(())
    }

    fn xyz(&self) -> Point<Real> {
        self.xyz
    }

    fn dxyz_dxi(&self) -> Vector<Real> {
        self.dxyz[0]
    }

    fn dxyz_deta(&self) -> Vector<Real> {
        self.dxyz[1]
    }

    fn d2xyz_dxideta(&self) -> Vector<Real> {
        self.d2xyz_dxideta
    }

    fn phi(&self) -> &[Real] {
        &self.shape.phi
    }

    fn dphi(&self) -> &[Vector<Real>] {
        &self.shape.dphi
    }
}

/// Computes the reference coordinates of the physical point `pt` in a full-dimensional
/// element (`Quad4`/`Tri3` in the `xy` plane, `Hex8`/`Tet4` in 3D).
pub fn inverse_map(
    ty: ElemType,
    vertices: &[Point<Real>],
    pt: &Point<Real>,
) -> Result<Point<Real>, ReinitError> {
    let dim = ty.dim();
    let mut evaluator = LagrangeEvaluator::new(Real::MAX);
    let mut xi = ty.reference_centroid();

    for _ in 0..20 {
        evaluator.reinit(ty, vertices, &xi)?;
        let res = pt - evaluator.xyz();

        let mut jac = Matrix3::identity();
        for d in 0..dim {
            jac.set_column(d, &evaluator.dxyz(d));
        }
        let Some(inv) = jac.try_inverse() else {
            return Err(ReinitError::InverseMapFailed);
        };

        let mut dxi = inv * res;
        for d in dim..3 {
            dxi[d] = 0.0;
        }
        xi += dxi;

        if dxi.norm() < 1.0e-12 {
            return Ok(xi);
        }
    }

    Err(ReinitError::InverseMapFailed)
}

/// Convenience to collect vertex coordinates in the inline storage used by evaluators.
pub type VertexList = SmallVec<[Point<Real>; 8]>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reinit_rejects_far_points() {
        let verts = [
            Point::new(0.0, 0.0, 0.0),
            Point::new(2.0, 0.0, 0.0),
            Point::new(2.0, 2.0, 0.0),
            Point::new(0.0, 2.0, 0.0),
        ];
        let mut fe = LagrangeEvaluator::default();
        fe.reinit(ElemType::Quad4, &verts, &Point::new(0.5, 0.0, 0.0))
            .unwrap();
        assert_relative_eq!(fe.xyz(), Point::new(1.5, 1.0, 0.0));
        assert_relative_eq!(fe.dxyz_dxi(), Vector::new(1.0, 0.0, 0.0));
        assert_relative_eq!(fe.dxyz_deta(), Vector::new(0.0, 1.0, 0.0));

        assert_eq!(
            fe.reinit(ElemType::Quad4, &verts, &Point::new(11.0, 0.0, 0.0)),
            Err(ReinitError::OutsideRegion { extent: 10.0 })
        );
        assert_eq!(
            fe.reinit(ElemType::Quad4, &verts, &Point::new(Real::NAN, 0.0, 0.0)),
            Err(ReinitError::NonFinite)
        );
    }

    #[test]
    fn inverse_map_of_distorted_quad() {
        let verts = [
            Point::new(0.0, 0.0, 0.0),
            Point::new(2.0, 0.1, 0.0),
            Point::new(2.3, 1.9, 0.0),
            Point::new(-0.2, 1.5, 0.0),
        ];
        let xi = Point::new(0.3, -0.4, 0.0);
        let pt = crate::fe::map_to_physical(ElemType::Quad4, &verts, &xi);
        let found = inverse_map(ElemType::Quad4, &verts, &pt).unwrap();
        assert_relative_eq!(found, xi, epsilon = 1.0e-10);
    }
}
