//! Box primitives and their rasterization onto a [`Grid`][crate::grid::Grid].

mod raster;

use nalgebra::Point3;
use serde::{
    Deserialize,
    Serialize,
};

pub use self::raster::{
    EdgeMaterial,
    NodeMaterial,
    Override,
    RasterReport,
    RasterizedGeometry,
    Rasterizer,
};
use crate::material::MaterialTag;

/// An axis-aligned box filled with a material.
///
/// Boxes with zero extent along one axis are sheets, with zero extent along two
/// axes wires.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Primitive {
    pub material: MaterialTag,

    /// Higher priorities win where primitives overlap.
    #[serde(default)]
    pub priority: i32,

    pub start: Point3<f64>,
    pub stop: Point3<f64>,
}

impl Primitive {
    pub fn new(
        material: impl Into<MaterialTag>,
        priority: i32,
        start: Point3<f64>,
        stop: Point3<f64>,
    ) -> Self {
        Self {
            material: material.into(),
            priority,
            start,
            stop,
        }
    }

    /// Corners with `min <= max` on every axis.
    pub fn bounds(&self) -> (Point3<f64>, Point3<f64>) {
        (self.start.inf(&self.stop), self.start.sup(&self.stop))
    }
}
