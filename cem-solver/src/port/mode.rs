use std::path::{
    Path,
    PathBuf,
};

use cem_util::path::format_path;
use serde::{
    Deserialize,
    Serialize,
};

use crate::error::ConfigurationError;

/// Transverse mode profile on a rectilinear cross-section grid.
///
/// `u` and `v` are the sample coordinates along the two tangential axes of
/// the port (in [`Axis::tangential`][crate::axis::Axis::tangential] order), in
/// drawing units. `e` and `h` hold the transverse field components `[u, v]`
/// for each sample, with the `u` index running fastest. Profiles describe a
/// mode travelling towards `+axis`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModeProfile {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub e: Vec<[f64; 2]>,
    pub h: Vec<[f64; 2]>,
}

impl ModeProfile {
    /// A profile that is constant over the cross-section.
    pub fn uniform(e: [f64; 2], h: [f64; 2]) -> Self {
        Self {
            u: vec![0.0],
            v: vec![0.0],
            e: vec![e],
            h: vec![h],
        }
    }

    pub fn from_json_file(path: &Path) -> Result<Self, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidModeProfile { reason };

        let json = std::fs::read_to_string(path)
            .map_err(|error| invalid(format!("could not read {}: {error}", format_path(path))))?;
        let profile: Self = serde_json::from_str(&json)
            .map_err(|error| invalid(format!("could not parse {}: {error}", format_path(path))))?;
        profile.validate()?;

        Ok(profile)
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| {
            Err(ConfigurationError::InvalidModeProfile {
                reason: reason.to_owned(),
            })
        };

        for coordinates in [&self.u, &self.v] {
            if coordinates.is_empty() {
                return invalid("sample coordinates are empty");
            }
            if coordinates.iter().any(|x| !x.is_finite())
                || coordinates.windows(2).any(|pair| pair[0] >= pair[1])
            {
                return invalid("sample coordinates must be finite and strictly increasing");
            }
        }

        let num_samples = self.u.len() * self.v.len();
        if self.e.len() != num_samples || self.h.len() != num_samples {
            return invalid("number of samples doesn't match the sample coordinates");
        }
        if self
            .e
            .iter()
            .chain(&self.h)
            .flatten()
            .any(|value| !value.is_finite())
        {
            return invalid("samples must be finite");
        }

        Ok(())
    }

    /// Transverse E at `(u, v)`, interpolated bilinearly and clamped at the
    /// edges.
    pub fn e_at(&self, u: f64, v: f64) -> [f64; 2] {
        self.interpolate(&self.e, u, v)
    }

    /// Transverse H at `(u, v)`, see [`ModeProfile::e_at`].
    pub fn h_at(&self, u: f64, v: f64) -> [f64; 2] {
        self.interpolate(&self.h, u, v)
    }

    fn interpolate(&self, samples: &[[f64; 2]], u: f64, v: f64) -> [f64; 2] {
        let (u0, u1, s) = bracket(&self.u, u);
        let (v0, v1, t) = bracket(&self.v, v);
        let sample = |i: usize, j: usize| samples[j * self.u.len() + i];

        let [a, b, c, d] = [sample(u0, v0), sample(u1, v0), sample(u0, v1), sample(u1, v1)];
        [0, 1].map(|k| {
            (1.0 - t) * ((1.0 - s) * a[k] + s * b[k]) + t * ((1.0 - s) * c[k] + s * d[k])
        })
    }
}

/// Neighboring sample indices and the interpolation weight of the upper one.
fn bracket(coordinates: &[f64], x: f64) -> (usize, usize, f64) {
    let last = coordinates.len() - 1;
    if x <= coordinates[0] {
        (0, 0, 0.0)
    }
    else if x >= coordinates[last] {
        (last, last, 0.0)
    }
    else {
        let upper = coordinates.partition_point(|c| *c <= x);
        let lower = upper - 1;
        let weight = (x - coordinates[lower]) / (coordinates[upper] - coordinates[lower]);
        (lower, upper, weight)
    }
}

/// Where a port's mode profile comes from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ModeSource {
    /// JSON file containing a [`ModeProfile`]. Relative paths are resolved
    /// against the scenario's directory.
    File { file: PathBuf },

    Inline(ModeProfile),
}

impl ModeSource {
    pub fn load(&self, base_directory: &Path) -> Result<ModeProfile, ConfigurationError> {
        match self {
            ModeSource::File { file } => ModeProfile::from_json_file(&base_directory.join(file)),
            ModeSource::Inline(profile) => {
                profile.validate()?;
                Ok(profile.clone())
            }
        }
    }
}

impl From<ModeProfile> for ModeSource {
    fn from(value: ModeProfile) -> Self {
        Self::Inline(value)
    }
}
