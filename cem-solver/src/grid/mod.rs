//! Non-uniform rectilinear grids.

mod builder;
mod smooth;

use nalgebra::{
    Point3,
    Vector3,
};
use serde::{
    Deserialize,
    Serialize,
};

pub use self::builder::{
    GridBuilder,
    Smoothing,
};
use crate::{
    axis::Axis,
    error::ConfigurationError,
};

/// Grid lines along the 3 axes.
///
/// Lines are stored in drawing units. All derived lengths (spacings, areas,
/// volumes) are in meters, i.e. scaled by [`Grid::delta_unit`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "GridLines")]
pub struct Grid {
    lines: [Vec<f64>; 3],
    delta_unit: f64,
}

/// Unchecked serialized form of a [`Grid`].
#[derive(Deserialize)]
struct GridLines {
    lines: [Vec<f64>; 3],
    delta_unit: f64,
}

impl TryFrom<GridLines> for Grid {
    type Error = ConfigurationError;

    fn try_from(value: GridLines) -> Result<Self, Self::Error> {
        Self::new(value.lines, value.delta_unit)
    }
}

impl Grid {
    /// Creates a grid from explicit lines.
    ///
    /// Every axis needs at least 2 strictly increasing, finite lines.
    pub fn new(lines: [Vec<f64>; 3], delta_unit: f64) -> Result<Self, ConfigurationError> {
        if !(delta_unit.is_finite() && delta_unit > 0.0) {
            return Err(ConfigurationError::InvalidGridParameter {
                reason: "unit must be positive",
            });
        }

        for axis in Axis::ALL {
            let lines = &lines[axis.vector_index()];
            if lines.len() < 2 {
                return Err(ConfigurationError::TooFewLines {
                    axis,
                    num_lines: lines.len(),
                });
            }
            if lines.iter().any(|line| !line.is_finite()) {
                return Err(ConfigurationError::InvalidGridParameter {
                    reason: "lines must be finite",
                });
            }
            if lines.windows(2).any(|window| window[1] <= window[0]) {
                return Err(ConfigurationError::InvalidGridParameter {
                    reason: "lines must be strictly increasing",
                });
            }
        }

        Ok(Self { lines, delta_unit })
    }

    /// Uniform grid with `num_cells` cells of size `spacing` (in drawing units)
    /// starting at `origin`.
    pub fn uniform(
        origin: Point3<f64>,
        spacing: Vector3<f64>,
        num_cells: Vector3<usize>,
        delta_unit: f64,
    ) -> Result<Self, ConfigurationError> {
        let lines = [0, 1, 2].map(|i| {
            (0..=num_cells[i])
                .map(|j| origin[i] + spacing[i] * j as f64)
                .collect()
        });
        Self::new(lines, delta_unit)
    }

    /// Size of a drawing unit in meters.
    pub fn delta_unit(&self) -> f64 {
        self.delta_unit
    }

    pub fn lines(&self, axis: Axis) -> &[f64] {
        &self.lines[axis.vector_index()]
    }

    pub fn num_lines(&self) -> Vector3<usize> {
        Vector3::from_fn(|i, _| self.lines[i].len())
    }

    pub fn num_cells(&self) -> Vector3<usize> {
        self.num_lines().map(|n| n - 1)
    }

    pub fn num_cells_total(&self) -> usize {
        self.num_cells().product()
    }

    /// Position of line `index` in meters.
    pub fn position(&self, axis: Axis, index: usize) -> f64 {
        self.lines(axis)[index] * self.delta_unit
    }

    /// Position of the midpoint between line `index` and the next one, in
    /// drawing units.
    pub fn dual_line(&self, axis: Axis, index: usize) -> f64 {
        let lines = self.lines(axis);
        0.5 * (lines[index] + lines[index + 1])
    }

    /// Primary spacing `x[index + 1] - x[index]` in meters.
    pub fn spacing(&self, axis: Axis, index: usize) -> f64 {
        let lines = self.lines(axis);
        (lines[index + 1] - lines[index]) * self.delta_unit
    }

    /// Dual spacing around line `index` in meters.
    ///
    /// This is the distance between the adjacent dual lines. At non-periodic
    /// ends it's a half cell. On periodic axes the last line is the image of
    /// the first, and the dual spacing wraps around.
    pub fn dual_spacing(&self, axis: Axis, index: usize, periodic: bool) -> f64 {
        let num_lines = self.lines(axis).len();
        let last_cell = num_lines - 2;

        let below = if index > 0 {
            Some(self.spacing(axis, index - 1))
        }
        else if periodic {
            Some(self.spacing(axis, last_cell))
        }
        else {
            None
        };

        let above = if index < num_lines - 1 {
            Some(self.spacing(axis, index))
        }
        else if periodic {
            Some(self.spacing(axis, 0))
        }
        else {
            None
        };

        0.5 * (below.unwrap_or_default() + above.unwrap_or_default())
    }

    /// Smallest primary spacing in meters.
    pub fn min_spacing(&self, axis: Axis) -> f64 {
        self.lines(axis)
            .windows(2)
            .map(|window| window[1] - window[0])
            .fold(f64::INFINITY, f64::min)
            * self.delta_unit
    }

    /// Smallest and largest line of the axis, in drawing units.
    pub fn range(&self, axis: Axis) -> (f64, f64) {
        let lines = self.lines(axis);
        (lines[0], lines[lines.len() - 1])
    }

    /// Index of the line nearest to `coordinate` (drawing units).
    ///
    /// Ties are resolved towards the lower line.
    pub fn snap(&self, axis: Axis, coordinate: f64) -> usize {
        let lines = self.lines(axis);
        let upper = lines.partition_point(|line| *line < coordinate);

        if upper == 0 {
            0
        }
        else if upper == lines.len() {
            lines.len() - 1
        }
        else if coordinate - lines[upper - 1] <= lines[upper] - coordinate {
            upper - 1
        }
        else {
            upper
        }
    }

    /// Whether `coordinate` lies within the axis range, with a tolerance
    /// relative to the smallest cell.
    pub fn contains(&self, axis: Axis, coordinate: f64) -> bool {
        let (min, max) = self.range(axis);
        let tolerance = 1e-9 * self.min_spacing(axis) / self.delta_unit;
        coordinate >= min - tolerance && coordinate <= max + tolerance
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        axis::Axis,
        error::ConfigurationError,
        grid::Grid,
    };

    #[test]
    fn it_checks_deserialized_grids() {
        let grid = Grid::new(
            [vec![0.0, 1.0], vec![0.0, 2.0, 3.0], vec![0.0, 1.0]],
            1e-3,
        )
        .unwrap();
        let json = serde_json::to_string(&grid).unwrap();
        assert_eq!(serde_json::from_str::<Grid>(&json).unwrap(), grid);

        let unsorted = r#"{"lines": [[0.0, 1.0], [0.0, 2.0, 1.0], [0.0, 1.0]], "delta_unit": 1e-3}"#;
        assert!(serde_json::from_str::<Grid>(unsorted).is_err());
        let single_line = r#"{"lines": [[0.0], [0.0, 1.0], [0.0, 1.0]], "delta_unit": 1e-3}"#;
        assert!(serde_json::from_str::<Grid>(single_line).is_err());
        let no_unit = r#"{"lines": [[0.0, 1.0], [0.0, 1.0], [0.0, 1.0]], "delta_unit": 0.0}"#;
        assert!(serde_json::from_str::<Grid>(no_unit).is_err());
    }

    #[test]
    fn it_rejects_non_monotonic_lines() {
        let result = Grid::new(
            [vec![0.0, 1.0], vec![0.0, 2.0, 1.0], vec![0.0, 1.0]],
            1.0,
        );
        assert!(matches!(
            result,
            Err(ConfigurationError::InvalidGridParameter { .. })
        ));

        let result = Grid::new([vec![0.0, 1.0], vec![0.0], vec![0.0, 1.0]], 1.0);
        assert!(matches!(
            result,
            Err(ConfigurationError::TooFewLines {
                axis: Axis::Y,
                num_lines: 1
            })
        ));
    }

    #[test]
    fn it_snaps_to_nearest_line() {
        let grid = Grid::new(
            [vec![0.0, 1.0, 3.0], vec![0.0, 1.0], vec![0.0, 1.0]],
            1.0,
        )
        .unwrap();
        assert_eq!(grid.snap(Axis::X, -5.0), 0);
        assert_eq!(grid.snap(Axis::X, 0.4), 0);
        assert_eq!(grid.snap(Axis::X, 0.5), 0);
        assert_eq!(grid.snap(Axis::X, 0.6), 1);
        assert_eq!(grid.snap(Axis::X, 2.1), 2);
        assert_eq!(grid.snap(Axis::X, 7.0), 2);
    }

    #[test]
    fn it_computes_dual_spacing() {
        let grid = Grid::new(
            [vec![0.0, 1.0, 3.0, 6.0], vec![0.0, 1.0], vec![0.0, 1.0]],
            1e-3,
        )
        .unwrap();

        let close = |a: f64, b: f64| (a - b).abs() < 1e-15;
        assert!(close(grid.spacing(Axis::X, 1), 2e-3));
        assert!(close(grid.dual_spacing(Axis::X, 0, false), 0.5e-3));
        assert!(close(grid.dual_spacing(Axis::X, 1, false), 1.5e-3));
        assert!(close(grid.dual_spacing(Axis::X, 3, false), 1.5e-3));
        assert!(close(grid.dual_spacing(Axis::X, 0, true), 2e-3));
        assert!(close(grid.dual_spacing(Axis::X, 3, true), 2e-3));
        assert!(close(grid.min_spacing(Axis::X), 1e-3));
    }

    #[test]
    fn it_builds_uniform_grids() {
        let grid = Grid::uniform(
            Point3::origin(),
            Vector3::new(1.0, 2.0, 0.5),
            Vector3::new(4, 3, 2),
            1.0,
        )
        .unwrap();
        assert_eq!(grid.num_lines(), Vector3::new(5, 4, 3));
        assert_eq!(grid.num_cells_total(), 24);
        assert_eq!(grid.lines(Axis::Y), &[0.0, 2.0, 4.0, 6.0]);
    }
}
