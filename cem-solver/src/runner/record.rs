use std::{
    io,
    path::Path,
};

use cem_util::io::{
    PersistError,
    RetryPolicy,
    with_retries,
    write_atomic,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::IoError,
    port::PortRecord,
    runner::RunOutcome,
};

/// Time series of a run, persisted as JSON.
///
/// Every executed step adds one entry to `ticks` and `times` and one sample
/// to every port. A record without outcome is a checkpoint of a run in
/// progress.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub timestep: f64,
    pub ticks: Vec<usize>,
    pub times: Vec<f64>,
    pub ports: Vec<PortRecord>,
    pub energy: Vec<EnergySample>,

    #[serde(default)]
    pub outcome: Option<RunOutcome>,

    #[serde(default)]
    pub divergence: Option<Divergence>,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnergySample {
    pub tick: usize,
    pub energy: f64,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Divergence {
    pub tick: usize,
    pub energy: f64,
    pub reference_energy: f64,
}

impl RunRecord {
    pub fn new(timestep: f64) -> Self {
        Self {
            timestep,
            ..Default::default()
        }
    }

    pub fn num_steps(&self) -> usize {
        self.ticks.len()
    }

    pub fn push_step(&mut self, tick: usize, time: f64) {
        self.ticks.push(tick);
        self.times.push(time);
    }

    /// Writes the record to `path`, atomically and with retries.
    pub fn persist(&self, path: &Path, retry: &RetryPolicy) -> Result<(), IoError> {
        let json = serde_json::to_vec(self).map_err(|error| {
            PersistError {
                path: path.to_owned(),
                attempts: 0,
                source: io::Error::other(error),
            }
        })?;

        with_retries(retry, path, |attempt| {
            tracing::trace!(attempt, num_bytes = json.len(), "writing run record");
            write_atomic(path, &json)
        })?;

        tracing::debug!(
            path = %cem_util::path::format_path(path),
            num_steps = self.num_steps(),
            "persisted run record"
        );

        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }
}
