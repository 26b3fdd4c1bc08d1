use nalgebra::Point3;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    axis::Axis,
    error::ConfigurationError,
    grid::{
        Grid,
        smooth::smooth_lines,
    },
};

/// Refinement applied to the requested lines of every axis.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Smoothing {
    /// Largest allowed cell, in drawing units.
    pub max_resolution: f64,

    /// Largest allowed size ratio of adjacent cells.
    #[serde(default = "default_growth_ratio")]
    pub growth_ratio: f64,
}

impl Smoothing {
    pub fn new(max_resolution: f64) -> Self {
        Self {
            max_resolution,
            growth_ratio: default_growth_ratio(),
        }
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.max_resolution.is_finite() && self.max_resolution > 0.0) {
            Err(ConfigurationError::InvalidGridParameter {
                reason: "resolution must be positive",
            })
        }
        else if !(self.growth_ratio.is_finite() && self.growth_ratio > 1.0) {
            Err(ConfigurationError::InvalidGridParameter {
                reason: "growth ratio must be greater than 1",
            })
        }
        else {
            Ok(())
        }
    }
}

fn default_growth_ratio() -> f64 {
    1.4
}

/// Collects requested lines and turns them into a [`Grid`].
#[derive(Clone, Debug)]
pub struct GridBuilder {
    lines: [Vec<f64>; 3],
    domain: Option<[(f64, f64); 3]>,
    delta_unit: f64,
    merge_tolerance: f64,
    smoothing: Option<Smoothing>,
}

impl GridBuilder {
    pub fn new(delta_unit: f64) -> Self {
        Self {
            lines: Default::default(),
            domain: None,
            delta_unit,
            merge_tolerance: 1e-9,
            smoothing: None,
        }
    }

    /// Sets the domain box, which also requests its bounding lines.
    ///
    /// Without a domain the requested lines span the grid.
    pub fn with_domain(mut self, min: Point3<f64>, max: Point3<f64>) -> Self {
        let domain = [0, 1, 2].map(|i| (min[i].min(max[i]), min[i].max(max[i])));
        for axis in Axis::ALL {
            let (min, max) = domain[axis.vector_index()];
            self.add_line(axis, min);
            self.add_line(axis, max);
        }
        self.domain = Some(domain);
        self
    }

    /// Lines closer than `tolerance` times the axis span are merged.
    pub fn with_merge_tolerance(mut self, tolerance: f64) -> Self {
        self.merge_tolerance = tolerance;
        self
    }

    pub fn with_smoothing(mut self, smoothing: Smoothing) -> Self {
        self.smoothing = Some(smoothing);
        self
    }

    pub fn delta_unit(&self) -> f64 {
        self.delta_unit
    }

    pub fn add_line(&mut self, axis: Axis, line: f64) -> &mut Self {
        self.lines[axis.vector_index()].push(line);
        self
    }

    pub fn add_lines(&mut self, axis: Axis, lines: impl IntoIterator<Item = f64>) -> &mut Self {
        self.lines[axis.vector_index()].extend(lines);
        self
    }

    /// Requests the start and stop lines of a box on all axes.
    pub fn add_box_edges(&mut self, start: &Point3<f64>, stop: &Point3<f64>) -> &mut Self {
        for axis in Axis::ALL {
            let i = axis.vector_index();
            self.add_line(axis, start[i]);
            self.add_line(axis, stop[i]);
        }
        self
    }

    /// Requests `num_cells + 1` evenly spaced lines from `start` to `stop`.
    pub fn add_lines_linspace(
        &mut self,
        axis: Axis,
        start: f64,
        stop: f64,
        num_cells: usize,
    ) -> &mut Self {
        if num_cells == 0 {
            return self.add_line(axis, start);
        }
        let step = (stop - start) / num_cells as f64;
        self.add_lines(
            axis,
            (0..num_cells)
                .map(|i| start + step * i as f64)
                .chain(std::iter::once(stop)),
        )
    }

    pub fn build(&self) -> Result<Grid, ConfigurationError> {
        if let Some(smoothing) = &self.smoothing {
            smoothing.validate()?;
        }
        if !(self.merge_tolerance.is_finite() && self.merge_tolerance >= 0.0) {
            return Err(ConfigurationError::InvalidGridParameter {
                reason: "merge tolerance must not be negative",
            });
        }

        let mut lines: [Vec<f64>; 3] = Default::default();

        for axis in Axis::ALL {
            let requested = &self.lines[axis.vector_index()];
            if requested.iter().any(|line| !line.is_finite()) {
                return Err(ConfigurationError::InvalidGridParameter {
                    reason: "lines must be finite",
                });
            }

            let mut sorted = requested.clone();
            sorted.sort_by(f64::total_cmp);

            let span = match (sorted.first(), sorted.last()) {
                (Some(first), Some(last)) => last - first,
                _ => 0.0,
            };
            let tolerance = self.merge_tolerance * span;

            if let Some(domain) = &self.domain {
                let (min, max) = domain[axis.vector_index()];
                if let Some(line) = sorted
                    .iter()
                    .find(|line| **line < min - tolerance || **line > max + tolerance)
                {
                    return Err(ConfigurationError::LineOutsideDomain {
                        axis,
                        line: *line,
                        min,
                        max,
                    });
                }
            }

            let merged = merge_lines(&sorted, tolerance);
            if merged.len() < 2 {
                return Err(ConfigurationError::TooFewLines {
                    axis,
                    num_lines: merged.len(),
                });
            }

            let smoothed = if let Some(smoothing) = &self.smoothing {
                smooth_lines(&merged, smoothing.max_resolution, smoothing.growth_ratio).map_err(
                    |position| {
                        ConfigurationError::GradingInfeasible {
                            axis,
                            position,
                            ratio: smoothing.growth_ratio,
                        }
                    },
                )?
            }
            else {
                merged
            };

            tracing::debug!(
                ?axis,
                num_requested = requested.len(),
                num_lines = smoothed.len(),
                "built grid lines"
            );

            lines[axis.vector_index()] = smoothed;
        }

        Grid::new(lines, self.delta_unit)
    }
}

/// Merges sorted lines closer than `tolerance`, keeping the lower one.
fn merge_lines(sorted: &[f64], tolerance: f64) -> Vec<f64> {
    let mut merged: Vec<f64> = Vec::with_capacity(sorted.len());
    for line in sorted {
        match merged.last() {
            Some(last) if line - last <= tolerance => {}
            _ => merged.push(*line),
        }
    }
    merged
}
