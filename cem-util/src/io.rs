use std::{
    fs::File,
    io::{
        self,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
    time::Duration,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::path::format_path;

/// How often a failed write is attempted before giving up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    /// Delay between two attempts, in milliseconds.
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    pub fn no_backoff(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            backoff_ms: 0,
        }
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

fn default_max_attempts() -> usize {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

#[derive(Debug, thiserror::Error)]
#[error("could not write {} after {attempts} attempt(s)", format_path(.path))]
pub struct PersistError {
    pub path: PathBuf,
    pub attempts: usize,
    #[source]
    pub source: io::Error,
}

/// Writes `contents` to `path` so that readers either see the old file or the
/// complete new one.
///
/// The data goes to a hidden sibling file first, which is synced and then
/// renamed over `path`.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), io::Error> {
    let temporary = temporary_sibling(path);

    let result = File::create(&temporary)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .and_then(|()| std::fs::rename(&temporary, path));

    if result.is_err() {
        // the temporary file might not exist, so there's nothing to report here.
        let _ = std::fs::remove_file(&temporary);
    }

    result
}

/// Runs `write` until it succeeds or `policy.max_attempts` is exhausted.
///
/// `write` is passed the 1-based attempt number.
pub fn with_retries<T>(
    policy: &RetryPolicy,
    path: &Path,
    mut write: impl FnMut(usize) -> Result<T, io::Error>,
) -> Result<T, PersistError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;

    loop {
        match write(attempt) {
            Ok(value) => return Ok(value),
            Err(error) if attempt < max_attempts => {
                tracing::warn!(
                    path = %format_path(path),
                    attempt,
                    max_attempts,
                    %error,
                    "write failed, retrying"
                );
                std::thread::sleep(policy.backoff());
                attempt += 1;
            }
            Err(error) => {
                return Err(PersistError {
                    path: path.to_owned(),
                    attempts: attempt,
                    source: error,
                });
            }
        }
    }
}

fn temporary_sibling(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map_or_else(|| "output".into(), |name| name.to_string_lossy());
    path.with_file_name(format!(".{file_name}.{}.tmp", std::process::id()))
}
