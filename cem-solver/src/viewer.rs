//! Hook for showing the geometry to an external viewer before a run.

use nalgebra::Point3;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    axis::Axis,
    geometry::Primitive,
    grid::Grid,
};

/// What a viewer gets to see: grid lines, primitives and port boxes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GeometrySnapshot {
    pub delta_unit: f64,
    pub lines: [Vec<f64>; 3],
    pub primitives: Vec<Primitive>,
    pub ports: Vec<PortOutline>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortOutline {
    pub id: usize,
    pub start: Point3<f64>,
    pub stop: Point3<f64>,
}

impl GeometrySnapshot {
    pub fn new(grid: &Grid, primitives: &[Primitive], ports: Vec<PortOutline>) -> Self {
        Self {
            delta_unit: grid.delta_unit(),
            lines: Axis::ALL.map(|axis| grid.lines(axis).to_vec()),
            primitives: primitives.to_vec(),
            ports,
        }
    }
}

pub type ViewerError = Box<dyn std::error::Error + Send + Sync + 'static>;

pub trait GeometryViewer {
    fn show(&self, snapshot: &GeometrySnapshot) -> Result<(), ViewerError>;
}

impl<T: GeometryViewer + ?Sized> GeometryViewer for &T {
    fn show(&self, snapshot: &GeometrySnapshot) -> Result<(), ViewerError> {
        (**self).show(snapshot)
    }
}

/// Hands the snapshot to the viewer. Failures are logged and otherwise
/// ignored.
pub fn show_geometry(viewer: &dyn GeometryViewer, snapshot: &GeometrySnapshot) {
    match viewer.show(snapshot) {
        Ok(()) => {
            tracing::debug!(
                num_primitives = snapshot.primitives.len(),
                "sent geometry to viewer"
            );
        }
        Err(error) => tracing::warn!(%error, "geometry viewer failed"),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        grid::Grid,
        viewer::{
            GeometrySnapshot,
            GeometryViewer,
            ViewerError,
            show_geometry,
        },
    };

    struct Failing {
        calls: Cell<usize>,
    }

    impl GeometryViewer for Failing {
        fn show(&self, _snapshot: &GeometrySnapshot) -> Result<(), ViewerError> {
            self.calls.set(self.calls.get() + 1);
            Err("viewer is not installed".into())
        }
    }

    #[test]
    fn it_ignores_viewer_failures() {
        let grid = Grid::uniform(
            Point3::origin(),
            Vector3::repeat(1.0),
            Vector3::new(2, 3, 4),
            1e-3,
        )
        .unwrap();
        let snapshot = GeometrySnapshot::new(&grid, &[], vec![]);
        assert_eq!(snapshot.lines[2].len(), 5);

        let viewer = Failing {
            calls: Cell::new(0),
        };
        show_geometry(&viewer, &snapshot);
        assert_eq!(viewer.calls.get(), 1);
    }
}
