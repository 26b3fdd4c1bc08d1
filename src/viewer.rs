use std::{
    path::PathBuf,
    process::Command,
};

use cem_solver::viewer::{
    GeometrySnapshot,
    GeometryViewer,
    ViewerError,
};
use cem_util::io::write_atomic;

/// Writes the snapshot to a file and starts an external program on it.
///
/// Doesn't wait for the program to exit.
#[derive(Clone, Debug)]
pub struct ProcessViewer {
    pub command: Vec<String>,
    pub snapshot_path: PathBuf,
}

impl GeometryViewer for ProcessViewer {
    fn show(&self, snapshot: &GeometrySnapshot) -> Result<(), ViewerError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or("viewer command is empty")?;

        write_atomic(&self.snapshot_path, &serde_json::to_vec_pretty(snapshot)?)?;

        let child = Command::new(program)
            .args(args)
            .arg(&self.snapshot_path)
            .spawn()?;
        tracing::debug!(pid = child.id(), %program, "started viewer");

        Ok(())
    }
}
