//! The time loop: stepping, energy monitoring, stop conditions and
//! persistence of the run record.

pub mod record;

use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{
            AtomicBool,
            Ordering,
        },
    },
    time::{
        Duration,
        Instant,
    },
};

use cem_util::io::RetryPolicy;
use parking_lot::Mutex;
use serde::{
    Deserialize,
    Serialize,
};

pub use self::record::{
    Divergence,
    EnergySample,
    RunRecord,
};
use crate::{
    error::{
        ConfigurationError,
        RuntimeDivergence,
        SolverError,
    },
    fdtd::cpu::LatticeForEach,
    simulation::Simulation,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,

    /// The run ends once the energy dropped below this fraction of its peak.
    #[serde(default = "default_end_criteria")]
    pub end_criteria: f64,

    /// Steps between two energy evaluations.
    #[serde(default = "default_energy_check_interval")]
    pub energy_check_interval: usize,

    /// Energy growth over the peak during excitation that counts as
    /// divergence.
    #[serde(default = "default_divergence_factor")]
    pub divergence_factor: f64,

    /// Wall-clock budget in seconds.
    #[serde(default)]
    pub wall_time_limit: Option<f64>,

    /// Steps between two checkpoints of the run record.
    #[serde(default)]
    pub checkpoint_interval: Option<usize>,

    #[serde(default)]
    pub retry: RetryPolicy,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_steps: default_max_steps(),
            end_criteria: default_end_criteria(),
            energy_check_interval: default_energy_check_interval(),
            divergence_factor: default_divergence_factor(),
            wall_time_limit: None,
            checkpoint_interval: None,
            retry: Default::default(),
        }
    }
}

fn default_max_steps() -> usize {
    100_000
}

fn default_end_criteria() -> f64 {
    1e-4
}

fn default_energy_check_interval() -> usize {
    100
}

fn default_divergence_factor() -> f64 {
    1e3
}

impl RunConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason| Err(ConfigurationError::InvalidRunConfig { reason });

        if self.max_steps == 0 {
            invalid("max_steps must be at least 1")
        }
        else if !(self.end_criteria >= 0.0 && self.end_criteria < 1.0) {
            invalid("end_criteria must be in [0, 1)")
        }
        else if self.energy_check_interval == 0 {
            invalid("energy_check_interval must be at least 1")
        }
        else if !(self.divergence_factor.is_finite() && self.divergence_factor > 1.0) {
            invalid("divergence_factor must be greater than 1")
        }
        else if self
            .wall_time_limit
            .is_some_and(|limit| !(limit.is_finite() && limit > 0.0))
        {
            invalid("wall_time_limit must be positive")
        }
        else if self.checkpoint_interval == Some(0) {
            invalid("checkpoint_interval must be at least 1")
        }
        else {
            Ok(())
        }
    }

    pub fn wall_time_limit(&self) -> Option<Duration> {
        self.wall_time_limit.map(Duration::from_secs_f64)
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunOutcome {
    /// The energy decayed below the end criteria after `step` steps.
    Converged { step: usize },
    StepLimit,
    WallTimeLimit,
    Interrupted,
}

/// Snapshot of a run's progress.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Progress {
    pub tick: usize,
    pub time: f64,

    /// Energy at the last check.
    pub energy: f64,

    pub max_steps: usize,
    pub finished: bool,
}

#[derive(Debug, Default)]
struct Shared {
    cancelled: AtomicBool,
    progress: Mutex<Progress>,
}

/// Handle to cancel a run and to watch its progress from other threads.
#[derive(Clone, Debug, Default)]
pub struct RunControl {
    shared: Arc<Shared>,
}

impl RunControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Asks the run to stop before its next step.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.cancelled.load(Ordering::Relaxed)
    }

    pub fn progress(&self) -> Progress {
        *self.shared.progress.lock()
    }

    fn update(&self, f: impl FnOnce(&mut Progress)) {
        let mut progress = self.shared.progress.lock();
        f(&mut progress);
    }
}

/// Result of a run that didn't fail.
#[derive(Clone, Debug)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub record: RunRecord,
}

/// Drives a [`Simulation`] until a stop condition is met.
#[derive(Clone, Debug)]
pub struct Runner<'a> {
    config: &'a RunConfig,
    output: &'a Path,
    control: RunControl,
}

impl<'a> Runner<'a> {
    /// The run record is persisted to `output`.
    pub fn new(config: &'a RunConfig, output: &'a Path) -> Self {
        Self {
            config,
            output,
            control: RunControl::new(),
        }
    }

    pub fn with_control(mut self, control: RunControl) -> Self {
        self.control = control;
        self
    }

    pub fn control(&self) -> &RunControl {
        &self.control
    }

    /// Steps the simulation.
    ///
    /// The record is persisted when the run ends, also when it is cancelled or
    /// diverges. It only ever contains complete steps.
    pub fn run<Threading>(
        &self,
        simulation: &mut Simulation<Threading>,
    ) -> Result<RunResult, SolverError>
    where
        Threading: LatticeForEach,
    {
        let config = self.config;
        config.validate()?;

        let start_time = Instant::now();
        let wall_time_limit = config.wall_time_limit();
        let excitation_duration = simulation.excitation_duration();

        let mut record = RunRecord::new(simulation.timestep());
        let mut monitor = EnergyMonitor::default();
        let mut outcome = RunOutcome::StepLimit;

        self.control.update(|progress| {
            *progress = Progress {
                tick: simulation.tick(),
                time: simulation.time(),
                energy: 0.0,
                max_steps: config.max_steps,
                finished: false,
            };
        });

        tracing::info!(
            max_steps = config.max_steps,
            timestep = simulation.timestep(),
            excitation_duration,
            num_ports = simulation.ports().len(),
            output = %cem_util::path::format_path(self.output),
            "starting run"
        );

        for step in 1..=config.max_steps {
            if self.control.is_cancelled() {
                outcome = RunOutcome::Interrupted;
                break;
            }
            if wall_time_limit.is_some_and(|limit| start_time.elapsed() >= limit) {
                outcome = RunOutcome::WallTimeLimit;
                break;
            }

            simulation.step();
            record.push_step(simulation.tick(), simulation.time());

            if step % config.energy_check_interval == 0 {
                let energy = simulation.energy();
                let excitation_finished = simulation.time() > excitation_duration;
                record.energy.push(EnergySample {
                    tick: simulation.tick(),
                    energy,
                });
                self.control.update(|progress| progress.energy = energy);

                match monitor.check(energy, excitation_finished, config) {
                    EnergyCheck::Continue => {}
                    EnergyCheck::Converged => {
                        outcome = RunOutcome::Converged { step };
                        break;
                    }
                    EnergyCheck::Diverged { reference_energy } => {
                        let divergence = RuntimeDivergence {
                            tick: simulation.tick(),
                            energy,
                            reference_energy,
                        };
                        tracing::warn!(%divergence, "aborting run");

                        record.ports = simulation.port_records();
                        record.divergence = Some(Divergence {
                            tick: divergence.tick,
                            energy,
                            reference_energy,
                        });
                        record.persist(self.output, &config.retry)?;
                        self.control.update(|progress| progress.finished = true);

                        return Err(divergence.into());
                    }
                }
            }

            if config
                .checkpoint_interval
                .is_some_and(|interval| step % interval == 0)
            {
                record.ports = simulation.port_records();
                record.persist(self.output, &config.retry)?;
            }

            self.control.update(|progress| {
                progress.tick = simulation.tick();
                progress.time = simulation.time();
            });
        }

        record.ports = simulation.port_records();
        record.outcome = Some(outcome);
        record.persist(self.output, &config.retry)?;
        self.control.update(|progress| progress.finished = true);

        tracing::info!(
            ?outcome,
            num_steps = record.num_steps(),
            peak_energy = monitor.peak,
            elapsed = ?start_time.elapsed(),
            "run finished"
        );

        Ok(RunResult { outcome, record })
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum EnergyCheck {
    Continue,
    Converged,
    Diverged { reference_energy: f64 },
}

/// Tracks energy peaks across checks.
#[derive(Clone, Copy, Debug, Default)]
struct EnergyMonitor {
    /// Largest energy seen so far.
    peak: f64,

    /// Largest energy seen while the excitation was active, or at the first
    /// check after it.
    reference: Option<f64>,

    excitation_finished: bool,
}

impl EnergyMonitor {
    fn check(&mut self, energy: f64, excitation_finished: bool, config: &RunConfig) -> EnergyCheck {
        if !energy.is_finite() {
            return EnergyCheck::Diverged {
                reference_energy: self.reference.unwrap_or(self.peak),
            };
        }

        self.peak = self.peak.max(energy);

        if !excitation_finished {
            self.reference = Some(self.reference.map_or(energy, |reference| reference.max(energy)));
            tracing::trace!(energy, peak = self.peak, "energy during excitation");
            return EnergyCheck::Continue;
        }

        let reference = if self.excitation_finished {
            self.reference.unwrap_or(self.peak)
        }
        else {
            // the excitation might have been too short to be sampled
            self.excitation_finished = true;
            let reference = self.reference.map_or(energy, |reference| reference.max(energy));
            self.reference = Some(reference);
            reference
        };

        tracing::trace!(
            energy,
            peak = self.peak,
            reference,
            relative = energy / self.peak,
            "energy check"
        );

        if energy > config.divergence_factor * reference {
            EnergyCheck::Diverged {
                reference_energy: reference,
            }
        }
        else if energy < config.end_criteria * self.peak {
            EnergyCheck::Converged
        }
        else {
            EnergyCheck::Continue
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::{
        Path,
        PathBuf,
    };

    use cem_util::io::RetryPolicy;

    use crate::{
        error::{
            ConfigurationError,
            SolverError,
        },
        fdtd::cpu::FdtdCpuBackend,
        runner::{
            EnergyCheck,
            EnergyMonitor,
            RunConfig,
            RunControl,
            RunOutcome,
            RunRecord,
            Runner,
        },
        scenario::Scenario,
    };

    fn scratch_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("cem-solver-runner-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn it_stops_once_the_energy_decayed() {
        let scenario = Scenario::default();
        let mut simulation = scenario
            .build(&FdtdCpuBackend::single_threaded(), Path::new("."))
            .unwrap();

        let config = RunConfig {
            max_steps: 20_000,
            ..Default::default()
        };
        let output = scratch_path("converged.json");
        let result = Runner::new(&config, &output).run(&mut simulation).unwrap();

        let RunOutcome::Converged { step } = result.outcome
        else {
            panic!("run didn't converge: {:?}", result.outcome);
        };
        assert!(step < config.max_steps);
        assert_eq!(result.record.num_steps(), step);
        assert_eq!(simulation.tick(), step);
        for port in &result.record.ports {
            assert_eq!(port.samples.len(), step);
        }

        let json = std::fs::read_to_string(&output).unwrap();
        let persisted = RunRecord::from_json(&json).unwrap();
        assert_eq!(persisted.num_steps(), step);
        assert_eq!(persisted.outcome, Some(RunOutcome::Converged { step }));
    }

    #[test]
    fn it_persists_a_partial_record_when_cancelled() {
        let scenario = Scenario::default();
        let mut simulation = scenario
            .build(&FdtdCpuBackend::single_threaded(), Path::new("."))
            .unwrap();

        let control = RunControl::new();
        control.cancel();
        let output = scratch_path("cancelled.json");
        let result = Runner::new(&RunConfig::default(), &output)
            .with_control(control.clone())
            .run(&mut simulation)
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::Interrupted);
        assert_eq!(result.record.num_steps(), 0);
        assert!(control.progress().finished);

        let json = std::fs::read_to_string(&output).unwrap();
        let persisted = RunRecord::from_json(&json).unwrap();
        assert_eq!(persisted.outcome, Some(RunOutcome::Interrupted));
        assert!(persisted.ports.iter().all(|port| port.samples.is_empty()));
    }

    #[test]
    fn it_stops_at_the_step_limit() {
        let scenario = Scenario::default();
        let mut simulation = scenario
            .build(&FdtdCpuBackend::single_threaded(), Path::new("."))
            .unwrap();

        let config = RunConfig {
            max_steps: 50,
            energy_check_interval: 10,
            checkpoint_interval: Some(20),
            ..Default::default()
        };
        let output = scratch_path("step-limit.json");
        let control = RunControl::new();
        let result = Runner::new(&config, &output)
            .with_control(control.clone())
            .run(&mut simulation)
            .unwrap();

        assert_eq!(result.outcome, RunOutcome::StepLimit);
        assert_eq!(result.record.num_steps(), 50);
        assert_eq!(result.record.energy.len(), 5);
        assert_eq!(control.progress().tick, 50);
    }

    #[test]
    fn it_stops_at_the_wall_time_limit() {
        let scenario = Scenario::default();
        let mut simulation = scenario
            .build(&FdtdCpuBackend::single_threaded(), Path::new("."))
            .unwrap();

        // never converges, so only the clock can end the run
        let config = RunConfig {
            max_steps: 1_000_000_000,
            end_criteria: 0.0,
            wall_time_limit: Some(1e-3),
            ..Default::default()
        };
        let output = scratch_path("wall-time.json");
        let result = Runner::new(&config, &output).run(&mut simulation).unwrap();

        assert_eq!(result.outcome, RunOutcome::WallTimeLimit);
        let num_steps = result.record.num_steps();
        assert!(num_steps < config.max_steps);
        assert_eq!(simulation.tick(), num_steps);

        let json = std::fs::read_to_string(&output).unwrap();
        let persisted = RunRecord::from_json(&json).unwrap();
        assert_eq!(persisted.outcome, Some(RunOutcome::WallTimeLimit));
        assert_eq!(persisted.ticks.len(), num_steps);
        assert_eq!(persisted.times.len(), num_steps);
        assert!(!persisted.ports.is_empty());
        for port in &persisted.ports {
            assert_eq!(port.samples.len(), num_steps);
        }
    }

    #[test]
    fn it_reports_persistence_failures() {
        let scenario = Scenario::default();
        let mut simulation = scenario
            .build(&FdtdCpuBackend::single_threaded(), Path::new("."))
            .unwrap();

        let config = RunConfig {
            max_steps: 5,
            retry: RetryPolicy::no_backoff(2),
            ..Default::default()
        };
        let output = scratch_path("missing").join("run.json");
        let result = Runner::new(&config, &output).run(&mut simulation);
        match result {
            Err(SolverError::Io(error)) => assert_eq!(error.source.attempts, 2),
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn it_rejects_invalid_run_configs() {
        let config = RunConfig {
            energy_check_interval: 0,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigurationError::InvalidRunConfig { .. })
        ));
        let config = RunConfig {
            end_criteria: 1.5,
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn it_detects_divergence_after_the_excitation() {
        let config = RunConfig::default();
        let mut monitor = EnergyMonitor::default();
        assert_eq!(monitor.check(1.0, false, &config), EnergyCheck::Continue);
        assert_eq!(monitor.check(2.0, false, &config), EnergyCheck::Continue);
        assert_eq!(monitor.check(1.5, true, &config), EnergyCheck::Continue);
        assert_eq!(
            monitor.check(3000.0, true, &config),
            EnergyCheck::Diverged {
                reference_energy: 2.0
            }
        );
        assert!(matches!(
            monitor.check(f64::NAN, true, &config),
            EnergyCheck::Diverged { .. }
        ));
    }

    #[test]
    fn it_converges_relative_to_the_peak() {
        let config = RunConfig::default();
        let mut monitor = EnergyMonitor::default();
        // energy still rising when the excitation ends
        assert_eq!(monitor.check(1.0, true, &config), EnergyCheck::Continue);
        assert_eq!(monitor.check(4.0, true, &config), EnergyCheck::Continue);
        assert_eq!(monitor.check(1e-3, true, &config), EnergyCheck::Continue);
        assert_eq!(monitor.check(3e-4, true, &config), EnergyCheck::Converged);
    }
}
