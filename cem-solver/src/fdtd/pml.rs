use nalgebra::{
    Matrix3,
    Vector3,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    axis::Axis,
    error::ConfigurationError,
    material::PhysicalConstants,
};

/// Polynomial grading of a convolutional PML.
///
/// With the normalized depth `d` (0 at the inner interface, 1 at the outer
/// wall):
///
/// - `sigma = sigma_max * d^m`
/// - `kappa = 1 + (kappa_max - 1) * d^m`
/// - `a = a_max * (1 - d)^m_a`
///
/// `sigma_max` is derived from the desired normal reflection coefficient.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PmlGrading {
    #[serde(default = "default_m")]
    pub m: f64,

    #[serde(default = "default_m_a")]
    pub m_a: f64,

    /// Reflection coefficient at normal incidence.
    #[serde(default = "default_reflection")]
    pub reflection: f64,

    #[serde(default = "default_kappa_max")]
    pub kappa_max: f64,

    /// Complex frequency shift in S/m.
    #[serde(default = "default_a_max")]
    pub a_max: f64,
}

impl Default for PmlGrading {
    fn default() -> Self {
        Self {
            m: default_m(),
            m_a: default_m_a(),
            reflection: default_reflection(),
            kappa_max: default_kappa_max(),
            a_max: default_a_max(),
        }
    }
}

fn default_m() -> f64 {
    3.0
}

fn default_m_a() -> f64 {
    1.0
}

fn default_reflection() -> f64 {
    1e-6
}

fn default_kappa_max() -> f64 {
    1.0
}

fn default_a_max() -> f64 {
    0.0
}

impl PmlGrading {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason| Err(ConfigurationError::InvalidGridParameter { reason });

        if !(self.m.is_finite() && self.m >= 0.0 && self.m_a.is_finite() && self.m_a >= 0.0) {
            invalid("PML grading orders must not be negative")
        }
        else if !(self.reflection > 0.0 && self.reflection < 1.0) {
            invalid("PML reflection must be in (0, 1)")
        }
        else if !(self.kappa_max.is_finite() && self.kappa_max >= 1.0) {
            invalid("PML kappa_max must be at least 1")
        }
        else if !(self.a_max.is_finite() && self.a_max >= 0.0) {
            invalid("PML a_max must not be negative")
        }
        else {
            Ok(())
        }
    }

    /// `sigma_max` for a PML of `thickness` meters.
    pub fn sigma_max(&self, thickness: f64, physical_constants: &PhysicalConstants) -> f64 {
        -(self.m + 1.0) * self.reflection.ln()
            / (2.0 * physical_constants.vacuum_impedance() * thickness)
    }

    /// Coefficients at normalized `depth` in a PML of `thickness` meters.
    pub fn coefficients(
        &self,
        timestep: f64,
        physical_constants: &PhysicalConstants,
        depth: f64,
        thickness: f64,
    ) -> PmlCoefficients {
        // polynomial grading of sigma and kappa, a grows towards the interface
        let depth = depth.clamp(0.0, 1.0);
        let g1 = depth.powf(self.m);
        let g2 = (1.0 - depth).powf(self.m_a);
        let sigma = self.sigma_max(thickness, physical_constants) * g1;
        let kappa = 1.0 + (self.kappa_max - 1.0) * g1;
        let a = self.a_max * g2;
        PmlCoefficients::new(timestep, physical_constants, sigma, kappa, a)
    }
}

/// Coefficients for the auxiliary field update along one axis.
///
/// Recursive convolution of the CFS-PML (Roden & Gedney, 2000):
/// `psi' = b psi + c d/dx`, with the derivative scaled by `1 / kappa`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PmlCoefficients {
    pub b: f64,
    pub c: f64,
    pub kappa: f64,
}

impl Default for PmlCoefficients {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl PmlCoefficients {
    /// Outside of the PML.
    pub const IDENTITY: Self = Self {
        b: 0.0,
        c: 0.0,
        kappa: 1.0,
    };

    pub fn new(
        timestep: f64,
        physical_constants: &PhysicalConstants,
        sigma: f64,
        kappa: f64,
        a: f64,
    ) -> Self {
        // b = exp(-(sigma / kappa + a) dt / eps0)
        let b = (-((sigma / (physical_constants.vacuum_permittivity * kappa)
            + a / physical_constants.vacuum_permittivity)
            * timestep))
            .exp();

        // c = sigma (b - 1) / (kappa (sigma + kappa a))
        let c = if sigma == 0.0 {
            0.0
        }
        else {
            sigma * (b - 1.0) / (sigma * kappa + kappa.powi(2) * a)
        };

        Self { b, c, kappa }
    }

    pub fn is_identity(&self) -> bool {
        self.c == 0.0 && self.kappa == 1.0
    }
}

/// PML coefficients of one lattice node.
///
/// `e[a]` are the coefficients for derivatives along `a` at the node's E
/// locations (primary coordinates), `h[a]` at its H locations (dual
/// coordinates).
#[derive(Clone, Copy, Debug)]
pub struct PmlNode {
    pub index: usize,
    pub e: [PmlCoefficients; 3],
    pub h: [PmlCoefficients; 3],
}

/// Auxiliary fields of one PML node.
///
/// `psi[(c, a)]` belongs to the derivative along `a` in the curl for field
/// component `c`.
#[derive(Clone, Copy, Debug, Default)]
pub struct PmlState {
    pub psi_e: Matrix3<f64>,
    pub psi_h: Matrix3<f64>,
    pub correction: Vector3<f64>,
}

/// Difference between the stretched curl and the plain curl.
///
/// `jacobian[(i, j)]` is the derivative of field component `i` along axis `j`.
/// Updates `psi` in place.
pub fn curl_correction(
    jacobian: &Matrix3<f64>,
    coefficients: &[PmlCoefficients; 3],
    psi: &mut Matrix3<f64>,
) -> Vector3<f64> {
    let mut correction = Vector3::zeros();

    for axis in Axis::ALL {
        let c = axis.vector_index();
        let [u, v] = axis.tangential();

        // curl_c = d_u F_v - d_v F_u
        for (derivative_axis, component, sign) in [(u, v, 1.0), (v, u, -1.0)] {
            let a = derivative_axis.vector_index();
            let coefficients = &coefficients[a];
            if coefficients.is_identity() {
                continue;
            }

            let derivative = jacobian[(component.vector_index(), a)];
            let psi = &mut psi[(c, a)];
            *psi = coefficients.b * *psi + coefficients.c * derivative;
            correction[c] += sign * ((1.0 / coefficients.kappa - 1.0) * derivative + *psi);
        }
    }

    correction
}

#[cfg(test)]
mod tests {
    use nalgebra::Matrix3;

    use crate::{
        fdtd::pml::{
            PmlCoefficients,
            PmlGrading,
            curl_correction,
        },
        material::PhysicalConstants,
    };

    #[test]
    fn it_vanishes_outside_the_pml() {
        let constants = PhysicalConstants::SI;
        let grading = PmlGrading::default();
        let coefficients = grading.coefficients(1e-12, &constants, 0.0, 8e-3);
        assert_eq!(coefficients.c, 0.0);
        assert!(coefficients.is_identity());

        let mut psi = Matrix3::zeros();
        let jacobian = Matrix3::from_fn(|i, j| (i + 3 * j) as f64);
        let correction = curl_correction(&jacobian, &[coefficients; 3], &mut psi);
        assert_eq!(correction.norm(), 0.0);
        assert_eq!(psi, Matrix3::zeros());
    }

    #[test]
    fn it_grades_towards_the_outer_wall() {
        let constants = PhysicalConstants::SI;
        let grading = PmlGrading::default();
        let inner = grading.coefficients(1e-12, &constants, 0.25, 8e-3);
        let outer = grading.coefficients(1e-12, &constants, 1.0, 8e-3);

        // b is the per-step decay of the auxiliary field
        assert!(outer.b < inner.b);
        assert!(outer.b > 0.0 && inner.b < 1.0);
        assert!(outer.c < inner.c && outer.c < 0.0);
    }

    #[test]
    fn it_computes_the_cfs_recursion_coefficients() {
        let constants = PhysicalConstants::SI;
        let eps0 = constants.vacuum_permittivity;
        let (timestep, sigma, kappa, a) = (1e-12, 0.5, 2.0, 0.01);
        let coefficients = PmlCoefficients::new(timestep, &constants, sigma, kappa, a);

        let b = (-(sigma / kappa + a) * timestep / eps0).exp();
        let c = sigma * (b - 1.0) / (kappa * (sigma + kappa * a));
        assert!((coefficients.b - b).abs() < 1e-12);
        assert!((coefficients.c - c).abs() < 1e-12 * c.abs());
        assert_eq!(coefficients.kappa, kappa);

        // without frequency shift c reduces to (b - 1) / kappa
        let plain = PmlCoefficients::new(timestep, &constants, sigma, kappa, 0.0);
        assert!((plain.c - (plain.b - 1.0) / kappa).abs() < 1e-12);
    }

    #[test]
    fn it_accumulates_the_auxiliary_field() {
        let coefficients = PmlCoefficients {
            b: 0.5,
            c: -0.25,
            kappa: 1.0,
        };
        let identity = PmlCoefficients::IDENTITY;

        // only the derivative along x is stretched
        let mut jacobian = Matrix3::zeros();
        jacobian[(2, 0)] = 4.0; // d_x F_z

        let mut psi = Matrix3::zeros();
        let stretched = [coefficients, identity, identity];
        let first = curl_correction(&jacobian, &stretched, &mut psi);
        // curl_y = d_z F_x - d_x F_z
        assert_eq!(first.y, 1.0);
        let second = curl_correction(&jacobian, &stretched, &mut psi);
        assert_eq!(second.y, 1.5);
        assert_eq!(first.x, 0.0);
        assert_eq!(first.z, 0.0);
    }
}
