use nalgebra::Vector3;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    axis::{
        Axis,
        Face,
        Side,
    },
    error::ConfigurationError,
    fdtd::pml::PmlGrading,
    grid::Grid,
};

/// Boundary condition on one face of the domain.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BoundaryCondition {
    /// Tangential E vanishes on the face.
    Pec,

    /// Tangential H vanishes on the face.
    Pmc,

    /// The last line is the periodic image of the first. Must be set on both
    /// faces of an axis.
    Periodic,

    /// Convolutional PML of `depth` cells, terminated by PEC.
    Pml {
        #[serde(default = "default_pml_depth")]
        depth: usize,
        #[serde(default)]
        grading: PmlGrading,
    },

    /// First order Mur absorbing boundary.
    Mur {
        /// Defaults to the vacuum speed of light.
        #[serde(default)]
        phase_velocity: Option<f64>,
    },
}

impl BoundaryCondition {
    pub fn pml(depth: usize) -> Self {
        Self::Pml {
            depth,
            grading: Default::default(),
        }
    }

    pub fn mur() -> Self {
        Self::Mur {
            phase_velocity: None,
        }
    }

    /// Whether tangential E on the face is held at zero.
    ///
    /// PML is terminated with PEC.
    pub fn is_electric_wall(&self) -> bool {
        matches!(self, Self::Pec | Self::Pml { .. })
    }
}

impl Default for BoundaryCondition {
    fn default() -> Self {
        Self::Pec
    }
}

fn default_pml_depth() -> usize {
    8
}

/// Boundary conditions for the 6 faces, `[lower, upper]` per axis.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Boundaries {
    #[serde(default)]
    pub x: [BoundaryCondition; 2],
    #[serde(default)]
    pub y: [BoundaryCondition; 2],
    #[serde(default)]
    pub z: [BoundaryCondition; 2],
}

impl Boundaries {
    pub fn uniform(boundary_condition: BoundaryCondition) -> Self {
        Self {
            x: [boundary_condition; 2],
            y: [boundary_condition; 2],
            z: [boundary_condition; 2],
        }
    }

    pub fn with_axis(mut self, axis: Axis, boundary_conditions: [BoundaryCondition; 2]) -> Self {
        *self.axis_mut(axis) = boundary_conditions;
        self
    }

    pub fn axis(&self, axis: Axis) -> &[BoundaryCondition; 2] {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }

    fn axis_mut(&mut self, axis: Axis) -> &mut [BoundaryCondition; 2] {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }

    pub fn face(&self, face: Face) -> &BoundaryCondition {
        let [lower, upper] = self.axis(face.axis);
        match face.side {
            Side::Lower => lower,
            Side::Upper => upper,
        }
    }

    pub fn periodic(&self) -> Vector3<bool> {
        Vector3::from_fn(|i, _| self.is_periodic(Axis::ALL[i]))
    }

    pub fn is_periodic(&self, axis: Axis) -> bool {
        matches!(self.axis(axis), [BoundaryCondition::Periodic, _])
    }

    pub fn validate(&self, grid: &Grid) -> Result<(), ConfigurationError> {
        for axis in Axis::ALL {
            let [lower, upper] = self.axis(axis);
            let lower_periodic = matches!(lower, BoundaryCondition::Periodic);
            let upper_periodic = matches!(upper, BoundaryCondition::Periodic);
            if lower_periodic != upper_periodic {
                return Err(ConfigurationError::UnpairedPeriodicBoundary { axis });
            }
        }

        let num_cells = grid.num_cells();
        let mut depths = Vector3::<usize>::zeros();
        for face in Face::ALL {
            match self.face(face) {
                BoundaryCondition::Pml { depth, grading } => {
                    let num_cells = num_cells[face.axis.vector_index()];
                    depths[face.axis.vector_index()] += depth;
                    if *depth == 0 || depths[face.axis.vector_index()] >= num_cells {
                        return Err(ConfigurationError::PmlTooDeep {
                            face,
                            depth: *depth,
                            num_cells,
                        });
                    }
                    grading.validate()?;
                }
                BoundaryCondition::Mur {
                    phase_velocity: Some(phase_velocity),
                } if !(phase_velocity.is_finite() && *phase_velocity > 0.0) => {
                    return Err(ConfigurationError::InvalidGridParameter {
                        reason: "Mur phase velocity must be positive",
                    });
                }
                _ => {}
            }
        }

        Ok(())
    }
}
