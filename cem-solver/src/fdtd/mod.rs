//! Yee leapfrog on non-uniform grids.

pub mod boundary;
pub mod cpu;
pub mod lattice;
pub mod mur;
pub mod pml;
pub mod strider;
pub mod util;

use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    axis::Axis,
    error::{
        ConfigurationError,
        SolverError,
        StabilityError,
    },
    grid::Grid,
    material::PhysicalConstants,
};

/// Engine parameters that don't depend on the geometry.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct FdtdConfig {
    #[serde(default)]
    pub timestep: Timestep,

    #[serde(default)]
    pub physical_constants: PhysicalConstants,
}

/// How the timestep is chosen.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timestep {
    /// Fraction of the stability limit.
    Auto {
        #[serde(default = "default_courant_factor")]
        courant_factor: f64,
    },

    /// Fixed timestep in seconds. Must not exceed the stability limit.
    Fixed(f64),
}

impl Default for Timestep {
    fn default() -> Self {
        Self::Auto {
            courant_factor: default_courant_factor(),
        }
    }
}

fn default_courant_factor() -> f64 {
    0.95
}

impl Timestep {
    /// Resolves the timestep against the stability `limit`.
    pub fn resolve(&self, limit: f64) -> Result<f64, SolverError> {
        match *self {
            Timestep::Auto { courant_factor } => {
                if !(courant_factor > 0.0 && courant_factor <= 1.0) {
                    return Err(ConfigurationError::InvalidRunConfig {
                        reason: "courant factor must be in (0, 1]",
                    }
                    .into());
                }
                Ok(courant_factor * limit)
            }
            Timestep::Fixed(timestep) => {
                if !(timestep.is_finite() && timestep > 0.0) {
                    Err(ConfigurationError::InvalidRunConfig {
                        reason: "timestep must be positive",
                    }
                    .into())
                }
                else if timestep > limit {
                    Err(StabilityError { timestep, limit }.into())
                }
                else {
                    Ok(timestep)
                }
            }
        }
    }
}

/// Largest stable timestep for the grid (CFL condition).
///
/// Uses the smallest spacing per axis and the fastest phase velocity
/// `c / sqrt(min_epsilon_mu)`. `min_epsilon_mu` is clamped to at most 1, so
/// vacuum is always assumed to be present.
pub fn stability_limit(
    grid: &Grid,
    physical_constants: &PhysicalConstants,
    min_epsilon_mu: f64,
) -> f64 {
    let sum: f64 = Axis::ALL
        .iter()
        .map(|axis| grid.min_spacing(*axis).powi(-2))
        .sum();
    let max_phase_velocity = physical_constants.speed_of_light() / min_epsilon_mu.min(1.0).sqrt();
    1.0 / (max_phase_velocity * sum.sqrt())
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        error::SolverError,
        fdtd::{
            Timestep,
            stability_limit,
        },
        grid::Grid,
        material::PhysicalConstants,
    };

    #[test]
    fn it_computes_the_cfl_limit() {
        let grid = Grid::uniform(
            Point3::origin(),
            Vector3::repeat(1.0),
            Vector3::repeat(4),
            1e-3,
        )
        .unwrap();
        let constants = PhysicalConstants::SI;
        let limit = stability_limit(&grid, &constants, 1.0);
        let expected = 1e-3 / (constants.speed_of_light() * 3f64.sqrt());
        assert!((limit - expected).abs() / expected < 1e-12);

        // slower media don't relax the limit
        assert_eq!(stability_limit(&grid, &constants, 4.0), limit);

        // faster than light: v = 5c
        let fast = stability_limit(&grid, &constants, 0.04);
        assert!((fast - expected / 5.0).abs() / expected < 1e-12);
    }

    #[test]
    fn it_rejects_timesteps_above_the_limit() {
        assert!(matches!(
            Timestep::Fixed(2.0).resolve(1.0),
            Err(SolverError::Stability(_))
        ));
        assert_eq!(Timestep::Fixed(0.5).resolve(1.0).unwrap(), 0.5);
        assert_eq!(Timestep::default().resolve(1.0).unwrap(), 0.95);
        assert!(matches!(
            Timestep::Auto {
                courant_factor: 1.5
            }
            .resolve(1.0),
            Err(SolverError::Configuration(_))
        ));
    }
}
