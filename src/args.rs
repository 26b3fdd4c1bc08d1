use std::path::PathBuf;

#[derive(Clone, Debug, clap::Parser)]
pub struct RunArgs {
    /// Scenario file (TOML or JSON)
    pub scenario: PathBuf,

    /// Directory for the run record and S-parameters. Defaults to the
    /// scenario's file stem next to the scenario.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Overrides the step limit of the scenario.
    #[clap(long)]
    pub max_steps: Option<usize>,

    /// Number of worker threads. Overrides the config file.
    #[clap(short = 'j', long)]
    pub num_threads: Option<usize>,

    /// Sends the geometry to the configured viewer before running.
    #[clap(long)]
    pub show_geometry: bool,

    #[clap(long)]
    pub ignore_config: bool,
}

#[derive(Clone, Debug, clap::Parser)]
pub struct PostProcessArgs {
    /// Run record written by `run`
    pub record: PathBuf,

    /// Output directory. Defaults to the record's directory.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Frequency sweep start in Hz
    #[clap(long)]
    pub start: f64,

    /// Frequency sweep stop in Hz
    #[clap(long)]
    pub stop: f64,

    #[clap(long, default_value = "201")]
    pub num: usize,
}
