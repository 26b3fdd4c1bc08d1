use std::{
    path::{
        Path,
        PathBuf,
    },
    sync::mpsc,
    time::Duration,
};

use cem_solver::{
    fdtd::cpu::{
        FdtdCpuBackend,
        LatticeForEach,
    },
    geometry::Override,
    runner::{
        RunControl,
        RunRecord,
        Runner,
    },
    scenario::Scenario,
    sparams::SParameters,
    viewer::show_geometry,
};
use cem_util::{
    io::{
        RetryPolicy,
        with_retries,
        write_atomic,
    },
    path::format_path,
};
use color_eyre::eyre::{
    Context,
    Error,
    bail,
};

use crate::{
    args::{
        PostProcessArgs,
        RunArgs,
    },
    config::{
        AppConfig,
        Parallelization,
    },
    viewer::ProcessViewer,
};

const PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

pub fn run(args: RunArgs) -> Result<(), Error> {
    let config = if args.ignore_config {
        AppConfig::default()
    }
    else {
        AppConfig::read_or_create()?
    };

    let mut scenario = read_scenario(&args.scenario)?;
    if let Some(max_steps) = args.max_steps {
        scenario.run.max_steps = max_steps;
    }

    let output = match &args.output {
        Some(output) => output.clone(),
        None => {
            let stem = args
                .scenario
                .file_stem()
                .map_or_else(|| "run".into(), |stem| stem.to_owned());
            args.scenario.with_file_name(stem)
        }
    };
    std::fs::create_dir_all(&output)
        .with_context(|| format!("Could not create output directory: {}", output.display()))?;

    let base_directory = args
        .scenario
        .parent()
        .map_or_else(PathBuf::new, Path::to_owned);

    if args.show_geometry {
        show(&scenario, &config, &output)?;
    }

    let num_threads = match config.parallelization {
        Some(Parallelization::MultiThreaded { num_threads }) => Some(args.num_threads.or(num_threads)),
        None => args.num_threads.map(Some),
    };
    let record = match num_threads {
        #[cfg(feature = "rayon")]
        Some(num_threads) => {
            let backend = FdtdCpuBackend::multi_threaded(num_threads)?;
            tracing::info!(num_threads = backend.num_threads(), "using multi-threaded backend");
            run_with(&backend, &scenario, &base_directory, &output)?
        }
        #[cfg(not(feature = "rayon"))]
        Some(_) => bail!("Multi-threading requires the `rayon` feature"),
        None => run_with(&FdtdCpuBackend::single_threaded(), &scenario, &base_directory, &output)?,
    };

    write_s_parameters(&record, &scenario.frequencies(), &output, &config.retry)
}

pub fn post_process(args: PostProcessArgs) -> Result<(), Error> {
    let json = std::fs::read_to_string(&args.record)
        .with_context(|| format!("Could not read run record: {}", args.record.display()))?;
    let record = RunRecord::from_json(&json)
        .with_context(|| format!("Invalid run record: {}", args.record.display()))?;
    if record.outcome.is_none() {
        tracing::warn!("run record has no outcome, it is a checkpoint of an unfinished run");
    }

    let output = match &args.output {
        Some(output) => output.clone(),
        None => {
            args.record
                .parent()
                .map_or_else(PathBuf::new, Path::to_owned)
        }
    };
    let frequencies = cem_solver::port::spectrum::linspace(args.start, args.stop, args.num);

    write_s_parameters(&record, &frequencies, &output, &RetryPolicy::default())
}

fn read_scenario(path: &Path) -> Result<Scenario, Error> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read scenario: {}", path.display()))?;
    let scenario = if path.extension().is_some_and(|extension| extension == "json") {
        serde_json::from_str(&text)?
    }
    else {
        toml::from_str(&text)?
    };
    tracing::info!(path = %format_path(path), "read scenario");
    Ok(scenario)
}

fn show(scenario: &Scenario, config: &AppConfig, output: &Path) -> Result<(), Error> {
    let Some(command) = &config.viewer_command
    else {
        bail!("No viewer command configured");
    };
    let grid = scenario.build_grid()?;
    let viewer = ProcessViewer {
        command: command.clone(),
        snapshot_path: output.join("geometry.json"),
    };
    show_geometry(&viewer, &scenario.snapshot(&grid));
    Ok(())
}

fn run_with<Threading>(
    backend: &FdtdCpuBackend<Threading>,
    scenario: &Scenario,
    base_directory: &Path,
    output: &Path,
) -> Result<RunRecord, Error>
where
    Threading: LatticeForEach + Clone,
{
    let mut simulation = scenario.build(backend, base_directory)?;
    let report = simulation.raster_report();
    for primitive in &report.empty {
        tracing::warn!(primitive, "primitive doesn't own any cell or edge");
    }
    for Override {
        winner,
        loser,
        count,
    } in &report.overrides
    {
        tracing::debug!(winner, loser, count, "primitive overridden");
    }

    let record_path = output.join("run.json");
    let control = RunControl::new();
    let runner = Runner::new(&scenario.run, &record_path).with_control(control.clone());

    let (stop_sender, stop_receiver) = mpsc::channel::<()>();
    let result = std::thread::scope(|scope| {
        scope.spawn(move || {
            while let Err(mpsc::RecvTimeoutError::Timeout) =
                stop_receiver.recv_timeout(PROGRESS_INTERVAL)
            {
                let progress = control.progress();
                tracing::info!(
                    tick = progress.tick,
                    max_steps = progress.max_steps,
                    time = progress.time,
                    energy = progress.energy,
                    "running"
                );
            }
        });

        let result = runner.run(&mut simulation);
        drop(stop_sender);
        result
    })?;

    tracing::info!(outcome = ?result.outcome, path = %format_path(&record_path), "run finished");
    Ok(result.record)
}

fn write_s_parameters(
    record: &RunRecord,
    frequencies: &[f64],
    output: &Path,
    retry: &RetryPolicy,
) -> Result<(), Error> {
    let (_spectra, s_parameters) =
        SParameters::from_records(&record.ports, record.timestep, frequencies)?;

    let json_path = output.join("s_parameters.json");
    let json = serde_json::to_vec_pretty(&s_parameters)?;
    with_retries(retry, &json_path, |_| write_atomic(&json_path, &json))?;

    let csv_path = output.join("s_parameters.csv");
    let csv = s_parameters.to_csv();
    with_retries(retry, &csv_path, |_| write_atomic(&csv_path, csv.as_bytes()))?;

    tracing::info!(
        excited_port = s_parameters.excited_port,
        num_frequencies = frequencies.len(),
        path = %format_path(output),
        "wrote S-parameters"
    );

    Ok(())
}
