use std::ops::{
    Bound,
    Index,
    IndexMut,
    RangeBounds,
};

use nalgebra::{
    Point3,
    Vector3,
};

use crate::{
    geometry::NodeMaterial,
    material::PhysicalConstants,
};

/// The two time levels of a field.
///
/// Even ticks read level 0 as current, odd ticks level 1. Updating writes the
/// next level over the older one.
#[derive(Clone, Copy, Debug, Default)]
pub struct SwapBuffer<T> {
    buffer: [T; 2],
}

impl<T> From<[T; 2]> for SwapBuffer<T> {
    fn from(value: [T; 2]) -> Self {
        Self { buffer: value }
    }
}

impl<T> SwapBuffer<T> {
    pub fn from_fn(mut f: impl FnMut(SwapBufferIndex) -> T) -> Self {
        Self::from(std::array::from_fn::<T, 2, _>(|index| {
            f(SwapBufferIndex { index })
        }))
    }

    /// Returns `(self[index], self[index.other()])`.
    pub fn pair_mut(&mut self, index: SwapBufferIndex) -> (&mut T, &mut T) {
        let [first, second] = &mut self.buffer;
        if index.index == 0 {
            (first, second)
        }
        else {
            (second, first)
        }
    }
}

impl<T> Index<SwapBufferIndex> for SwapBuffer<T> {
    type Output = T;

    fn index(&self, index: SwapBufferIndex) -> &Self::Output {
        &self.buffer[index.index]
    }
}

impl<T> IndexMut<SwapBufferIndex> for SwapBuffer<T> {
    fn index_mut(&mut self, index: SwapBufferIndex) -> &mut Self::Output {
        &mut self.buffer[index.index]
    }
}

/// Index into a [`SwapBuffer`].
///
/// This can be derived from the simulation tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SwapBufferIndex {
    index: usize,
}

impl SwapBufferIndex {
    pub fn from_tick(tick: usize) -> Self {
        Self { index: tick % 2 }
    }

    pub fn other(&self) -> Self {
        Self {
            index: (self.index + 1) % 2,
        }
    }
}

/// Per-node update coefficients, one entry per field component.
///
/// Components that are not part of the domain or are held at zero (PEC, PMC)
/// have both coefficients set to 0.
#[derive(Clone, Copy, Debug, Default)]
pub struct UpdateCoefficients {
    pub e_a: Vector3<f64>,
    pub e_b: Vector3<f64>,
    pub h_a: Vector3<f64>,
    pub h_b: Vector3<f64>,

    /// Absolute permittivity per E component, used for the field energy.
    pub permittivity: Vector3<f64>,

    /// Absolute permeability per H component, used for the field energy.
    pub permeability: Vector3<f64>,
}

impl UpdateCoefficients {
    pub fn new(
        timestep: f64,
        physical_constants: &PhysicalConstants,
        material: &NodeMaterial,
        e_active: Vector3<bool>,
        h_active: Vector3<bool>,
    ) -> Self {
        let a_and_b = |perm: f64, sigma: f64| {
            let half_sigma_delta_t_over_perm = 0.5 * sigma * timestep / perm;

            let a = (1.0 - half_sigma_delta_t_over_perm) / (1.0 + half_sigma_delta_t_over_perm);
            let b = timestep / (perm * (1.0 + half_sigma_delta_t_over_perm));

            (a, b)
        };

        let mut coefficients = Self::default();

        for i in 0..3 {
            let edge = &material.e[i];
            coefficients.permittivity[i] =
                edge.relative * physical_constants.vacuum_permittivity;
            if e_active[i] && !edge.perfect {
                let (a, b) = a_and_b(coefficients.permittivity[i], edge.conductivity);
                coefficients.e_a[i] = a;
                coefficients.e_b[i] = b;
            }

            let edge = &material.h[i];
            coefficients.permeability[i] =
                edge.relative * physical_constants.vacuum_permeability;
            if h_active[i] && !edge.perfect {
                let (a, b) = a_and_b(coefficients.permeability[i], edge.conductivity);
                coefficients.h_a[i] = a;
                coefficients.h_b[i] = b;
            }
        }

        coefficients
    }

    /// Whether E component `i` is updated at all.
    pub fn is_e_active(&self, i: usize) -> bool {
        self.e_b[i] != 0.0
    }

    pub fn is_h_active(&self, i: usize) -> bool {
        self.h_b[i] != 0.0
    }
}

/// Iterates over the points of a box of the lattice with shape `size`, `x`
/// fastest.
pub fn iter_points(range: impl RangeBounds<Point3<usize>>, size: Vector3<usize>) -> PointIter {
    let start = match range.start_bound() {
        Bound::Included(start) => *start,
        Bound::Excluded(start) => start + Vector3::repeat(1),
        Bound::Unbounded => Point3::origin(),
    };
    let end = match range.end_bound() {
        Bound::Included(end) => end + Vector3::repeat(1),
        Bound::Excluded(end) => *end,
        Bound::Unbounded => size.into(),
    };

    let extent = end.coords.zip_map(&start.coords, |x1, x0| x1.saturating_sub(x0));
    PointIter {
        start,
        extent,
        position: 0,
        len: extent.product(),
    }
}

#[derive(Clone, Copy, Debug)]
pub struct PointIter {
    start: Point3<usize>,
    extent: Vector3<usize>,
    position: usize,
    len: usize,
}

impl Iterator for PointIter {
    type Item = Point3<usize>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.len {
            return None;
        }

        let i = self.position;
        self.position += 1;

        let offset = Vector3::new(
            i % self.extent.x,
            (i / self.extent.x) % self.extent.y,
            i / (self.extent.x * self.extent.y),
        );
        Some(self.start + offset)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.len - self.position;
        (n, Some(n))
    }
}

impl ExactSizeIterator for PointIter {}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::fdtd::util::{
        SwapBuffer,
        SwapBufferIndex,
        iter_points,
    };

    #[test]
    fn it_iters_inclusive() {
        let x0 = Point3::new(1, 2, 3);
        let x1 = Point3::new(2, 3, 4);
        let points = iter_points(x0..=x1, x1.coords).collect::<Vec<_>>();
        assert_eq!(
            points,
            vec![
                Point3::new(1, 2, 3),
                Point3::new(2, 2, 3),
                Point3::new(1, 3, 3),
                Point3::new(2, 3, 3),
                Point3::new(1, 2, 4),
                Point3::new(2, 2, 4),
                Point3::new(1, 3, 4),
                Point3::new(2, 3, 4),
            ]
        );
    }

    #[test]
    fn it_reports_exact_remaining_length() {
        let mut points = iter_points(.., Vector3::new(3, 4, 5));
        assert_eq!(points.len(), 60);
        points.next();
        points.next();
        assert_eq!(points.len(), 58);
        assert_eq!(points.count(), 58);
    }

    #[test]
    fn it_yields_nothing_for_empty_ranges() {
        let points = iter_points(Point3::new(0, 0, 0)..Point3::new(0, 3, 3), Vector3::repeat(3));
        assert_eq!(points.len(), 0);
        assert_eq!(points.count(), 0);
    }

    #[test]
    fn it_swaps_buffers_by_tick() {
        let mut buffer = SwapBuffer::from([1, 2]);
        let index = SwapBufferIndex::from_tick(3);
        let (current, other) = buffer.pair_mut(index);
        assert_eq!((*current, *other), (2, 1));
        assert_eq!(buffer[index.other()], 1);
    }
}
