use smallvec::SmallVec;

use crate::math::{Point, Real, Vector};
use crate::mesh::ElemType;

/// Values of the Lagrange shape functions of an element at one reference point.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ShapeValues {
    /// The shape function values.
    pub phi: SmallVec<[Real; 8]>,
    /// The reference gradients `(∂/∂ξ, ∂/∂η, ∂/∂ζ)` of the shape functions.
    pub dphi: SmallVec<[Vector<Real>; 8]>,
    /// The mixed second derivatives `∂²/∂ξ∂η` of the shape functions.
    pub d2phi_dxideta: SmallVec<[Real; 8]>,
}

impl ShapeValues {
    fn with_capacity(n: usize) -> Self {
        ShapeValues {
            phi: SmallVec::with_capacity(n),
            dphi: SmallVec::with_capacity(n),
            d2phi_dxideta: SmallVec::with_capacity(n),
        }
    }

    fn push(&mut self, phi: Real, dphi: Vector<Real>, d2: Real) {
        self.phi.push(phi);
        self.dphi.push(dphi);
        self.d2phi_dxideta.push(d2);
    }
}

/// Evaluates the linear Lagrange shape functions of `ty` at the reference point `p`.
pub fn lagrange_shape(ty: ElemType, p: &Point<Real>) -> ShapeValues {
    let (xi, eta, zeta) = (p.x, p.y, p.z);
    let mut out = ShapeValues::with_capacity(ty.n_nodes());

    match ty {
        ElemType::NodeElem => out.push(1.0, Vector::zeros(), 0.0),
        ElemType::Edge2 => {
            out.push(0.5 * (1.0 - xi), Vector::new(-0.5, 0.0, 0.0), 0.0);
            out.push(0.5 * (1.0 + xi), Vector::new(0.5, 0.0, 0.0), 0.0);
        }
        ElemType::Tri3 => {
            out.push(1.0 - xi - eta, Vector::new(-1.0, -1.0, 0.0), 0.0);
            out.push(xi, Vector::x(), 0.0);
            out.push(eta, Vector::y(), 0.0);
        }
        ElemType::Quad4 => {
            for v in ty.reference_vertices() {
                let (a, b) = (v[0], v[1]);
                out.push(
                    0.25 * (1.0 + a * xi) * (1.0 + b * eta),
                    Vector::new(
                        0.25 * a * (1.0 + b * eta),
                        0.25 * b * (1.0 + a * xi),
                        0.0,
                    ),
                    0.25 * a * b,
                );
            }
        }
        ElemType::Tet4 => {
            out.push(1.0 - xi - eta - zeta, Vector::repeat(-1.0), 0.0);
            out.push(xi, Vector::x(), 0.0);
            out.push(eta, Vector::y(), 0.0);
            out.push(zeta, Vector::z(), 0.0);
        }
        ElemType::Hex8 => {
            for v in ty.reference_vertices() {
                let (a, b, c) = (v[0], v[1], v[2]);
                let fx = 1.0 + a * xi;
                let fy = 1.0 + b * eta;
                let fz = 1.0 + c * zeta;
                out.push(
                    0.125 * fx * fy * fz,
                    Vector::new(
                        0.125 * a * fy * fz,
                        0.125 * b * fx * fz,
                        0.125 * c * fx * fy,
                    ),
                    0.125 * a * b * fz,
                );
            }
        }
    }

    out
}

/// Maps a reference point of an element to physical space.
pub fn map_to_physical(ty: ElemType, vertices: &[Point<Real>], p: &Point<Real>) -> Point<Real> {
    let shape = lagrange_shape(ty, p);
    let mut res = Point::origin();
    for (phi, v) in shape.phi.iter().zip(vertices) {
        res.coords += v.coords * *phi;
    }
    res
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn partition_of_unity() {
        let p = Point::new(0.21, 0.13, 0.4);
        for ty in [
            ElemType::Edge2,
            ElemType::Tri3,
            ElemType::Quad4,
            ElemType::Tet4,
            ElemType::Hex8,
        ] {
            let shape = lagrange_shape(ty, &p);
            assert_eq!(shape.phi.len(), ty.n_nodes());
            assert_relative_eq!(shape.phi.iter().sum::<Real>(), 1.0, epsilon = 1.0e-14);
            let grad_sum: Vector<Real> = shape.dphi.iter().sum();
            assert_relative_eq!(grad_sum, Vector::zeros(), epsilon = 1.0e-14);
        }
    }

    #[test]
    fn quad_shape_is_nodal() {
        for (i, v) in ElemType::Quad4.reference_vertices().iter().enumerate() {
            let shape = lagrange_shape(ElemType::Quad4, &Point::new(v[0], v[1], 0.0));
            for (j, phi) in shape.phi.iter().enumerate() {
                assert_relative_eq!(*phi, if i == j { 1.0 } else { 0.0 });
            }
        }
    }

    #[test]
    fn hex_gradients_match_finite_differences() {
        let mut rng = StdRng::seed_from_u64(0x5eed_cafe);
        let h = 1.0e-6;
        for _ in 0..50 {
            let p = Point::new(
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
                rng.gen_range(-1.0..1.0),
            );
            let shape = lagrange_shape(ElemType::Hex8, &p);
            for axis in 0..3 {
                let mut plus = p;
                let mut minus = p;
                plus[axis] += h;
                minus[axis] -= h;
                let fp = lagrange_shape(ElemType::Hex8, &plus);
                let fm = lagrange_shape(ElemType::Hex8, &minus);
                for i in 0..8 {
                    let fd = (fp.phi[i] - fm.phi[i]) / (2.0 * h);
                    assert_relative_eq!(shape.dphi[i][axis], fd, epsilon = 1.0e-8);
                }
            }
        }
    }
}
