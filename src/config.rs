use std::path::PathBuf;

use cem_util::{
    io::RetryPolicy,
    path::project_dirs,
};
use color_eyre::eyre::{
    Context,
    Error,
    eyre,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub parallelization: Option<Parallelization>,

    /// Command that is run with the path of a geometry snapshot (JSON) as its
    /// last argument.
    #[serde(default)]
    pub viewer_command: Option<Vec<String>>,

    /// Retries for writing S-parameter files. The run record uses the
    /// scenario's policy.
    #[serde(default)]
    pub retry: RetryPolicy,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Parallelization {
    MultiThreaded {
        #[serde(default)]
        num_threads: Option<usize>,
    },
}

impl AppConfig {
    pub fn path() -> Result<PathBuf, Error> {
        let project_dirs = project_dirs(std::env!("CARGO_PKG_NAME")).ok_or_else(|| eyre!("Could not determine config directory"))?;
        Ok(project_dirs.config_local_dir().join("config.toml"))
    }

    /// Reads the config file, or creates one with defaults if it doesn't exist
    /// yet.
    pub fn read_or_create() -> Result<Self, Error> {
        let path = Self::path()?;

        let config = if !path.exists() {
            tracing::info!(path = %path.display(), "Creating config file");
            let config = Self::default();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let toml = toml::to_string_pretty(&config)?;
            std::fs::write(&path, &toml)
                .with_context(|| format!("Could not write config file: {}", path.display()))?;
            config
        }
        else {
            tracing::debug!(path = %path.display(), "Reading config file");
            let toml = std::fs::read_to_string(&path)
                .with_context(|| format!("Could not read config file: {}", path.display()))?;
            toml::from_str(&toml)
                .with_context(|| format!("Invalid config file: {}", path.display()))?
        };

        Ok(config)
    }
}
