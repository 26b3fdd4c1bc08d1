use std::path::PathBuf;

use cem_util::{
    io::PersistError,
    path::format_path,
};

use crate::{
    axis::{
        Axis,
        Face,
    },
    material::MaterialTag,
};

/// Everything that can stop a run from starting or completing.
///
/// Cancellation is not an error, see [`RunOutcome::Interrupted`][1].
///
/// [1]: crate::runner::RunOutcome::Interrupted
#[derive(Debug, thiserror::Error)]
pub enum SolverError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Stability(#[from] StabilityError),

    #[error(transparent)]
    Divergence(#[from] RuntimeDivergence),

    #[error(transparent)]
    Io(#[from] IoError),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigurationError {
    #[error("material {tag} is already registered")]
    DuplicateMaterial { tag: MaterialTag },

    #[error("material {tag} is invalid: {reason}")]
    InvalidMaterial {
        tag: MaterialTag,
        reason: &'static str,
    },

    #[error("unknown material: {tag}")]
    UnknownMaterial { tag: MaterialTag },

    #[error("invalid grid parameter: {reason}")]
    InvalidGridParameter { reason: &'static str },

    #[error("line {line} on {axis:?} axis is outside of the domain [{min}, {max}]")]
    LineOutsideDomain {
        axis: Axis,
        line: f64,
        min: f64,
        max: f64,
    },

    #[error("primitive {index} ({tag}) is outside of the domain on the {axis:?} axis")]
    PrimitiveOutsideDomain {
        index: usize,
        tag: MaterialTag,
        axis: Axis,
    },

    #[error("{axis:?} axis needs at least 2 lines, but has {num_lines}")]
    TooFewLines { axis: Axis, num_lines: usize },

    #[error(
        "lines on the {axis:?} axis around {position} are too close to honor a growth ratio of {ratio}"
    )]
    GradingInfeasible {
        axis: Axis,
        position: f64,
        ratio: f64,
    },

    #[error("{axis:?} axis is periodic on one face only")]
    UnpairedPeriodicBoundary { axis: Axis },

    #[error("PML on {face:?} is {depth} cells deep, but the axis has only {num_cells} cells")]
    PmlTooDeep {
        face: Face,
        depth: usize,
        num_cells: usize,
    },

    #[error("port {port} is invalid: {reason}")]
    InvalidPort { port: usize, reason: String },

    #[error("duplicate port id: {port}")]
    DuplicatePort { port: usize },

    #[error("absorber {index} is invalid: {reason}")]
    InvalidAbsorber { index: usize, reason: String },

    #[error("invalid mode profile: {reason}")]
    InvalidModeProfile { reason: String },

    #[error("invalid excitation: {reason}")]
    InvalidExcitation { reason: &'static str },

    #[error("expected exactly one excited port, but found {num_excited}")]
    ExcitedPortCount { num_excited: usize },

    #[error("port spectra have mismatching frequency axes")]
    FrequencyAxisMismatch,

    #[error("invalid run configuration: {reason}")]
    InvalidRunConfig { reason: &'static str },
}

#[derive(Debug, thiserror::Error)]
#[error("timestep {timestep:e} s exceeds the stability limit of {limit:e} s")]
pub struct StabilityError {
    pub timestep: f64,
    pub limit: f64,
}

#[derive(Debug, thiserror::Error)]
#[error(
    "field energy diverged at step {tick}: {energy:e} J (reference {reference_energy:e} J)"
)]
pub struct RuntimeDivergence {
    pub tick: usize,
    pub energy: f64,
    pub reference_energy: f64,
}

#[derive(Debug, thiserror::Error)]
#[error("could not persist run record to {}", format_path(.path))]
pub struct IoError {
    pub path: PathBuf,
    #[source]
    pub source: PersistError,
}

impl From<PersistError> for IoError {
    fn from(value: PersistError) -> Self {
        Self {
            path: value.path.clone(),
            source: value,
        }
    }
}
