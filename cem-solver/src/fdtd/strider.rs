use std::ops::RangeBounds;

use nalgebra::{
    Point3,
    Vector3,
    Vector4,
};

use crate::{
    axis::Axis,
    fdtd::util::{
        PointIter,
        iter_points,
    },
};

/// Maps points of a 3D lattice to linear indices (x fastest).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strider {
    strides: Vector4<usize>,
    size: Vector3<usize>,
}

impl Strider {
    pub fn new(size: &Vector3<usize>) -> Self {
        Self {
            strides: strides_for_size(size),
            size: *size,
        }
    }

    pub fn point_unchecked(&self, mut index: usize) -> Point3<usize> {
        let z = index / self.strides.z;
        index %= self.strides.z;
        let y = index / self.strides.y;
        index %= self.strides.y;
        let x = index / self.strides.x;
        Point3::new(x, y, z)
    }

    pub fn point(&self, index: usize) -> Option<Point3<usize>> {
        (index < self.strides.w).then(|| self.point_unchecked(index))
    }

    pub fn index_unchecked(&self, point: &Point3<usize>) -> usize {
        point.coords.dot(&self.strides.xyz())
    }

    pub fn index(&self, point: &Point3<usize>) -> Option<usize> {
        self.is_inside(point).then(|| self.index_unchecked(point))
    }

    /// Linear distance between neighbors along `axis`.
    pub fn stride(&self, axis: Axis) -> usize {
        self.strides[axis.vector_index()]
    }

    pub fn size(&self) -> &Vector3<usize> {
        &self.size
    }

    pub fn len(&self) -> usize {
        self.strides.w
    }

    pub fn is_empty(&self) -> bool {
        self.strides.w == 0
    }

    pub fn iter(&self, range: impl RangeBounds<Point3<usize>>) -> StriderIter {
        StriderIter {
            points: iter_points(range, self.size),
            strider: *self,
        }
    }

    /// Iterates over the plane `index` normal to `axis`.
    pub fn iter_plane(&self, axis: Axis, index: usize) -> StriderIter {
        let mut start = Point3::origin();
        let mut end = Point3::from(self.size);
        start[axis.vector_index()] = index;
        end[axis.vector_index()] = index + 1;
        self.iter(start..end)
    }

    pub fn is_inside(&self, point: &Point3<usize>) -> bool {
        point.x < self.size.x && point.y < self.size.y && point.z < self.size.z
    }
}

#[derive(Clone, Copy, Debug)]
pub struct StriderIter {
    points: PointIter,
    strider: Strider,
}

impl Iterator for StriderIter {
    type Item = (usize, Point3<usize>);

    fn next(&mut self) -> Option<Self::Item> {
        let point = self.points.next()?;
        let index = self.strider.index_unchecked(&point);
        Some((index, point))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.points.size_hint()
    }
}

impl ExactSizeIterator for StriderIter {}

pub fn strides_for_size(size: &Vector3<usize>) -> Vector4<usize> {
    let mut strides = Vector4::zeros();
    strides.x = 1;
    strides.y = strides.x * size.x;
    strides.z = strides.y * size.y;
    strides.w = strides.z * size.z;
    strides
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        axis::Axis,
        fdtd::strider::Strider,
    };

    #[test]
    fn it_maps_points_to_indices() {
        let strider = Strider::new(&Vector3::new(3, 4, 5));
        assert_eq!(strider.len(), 60);
        for (index, point) in strider.iter(..) {
            assert_eq!(strider.point(index), Some(point));
            assert_eq!(strider.index(&point), Some(index));
        }
        assert_eq!(strider.index(&Point3::new(3, 0, 0)), None);
        assert_eq!(strider.point(60), None);
        assert_eq!(strider.stride(Axis::Z), 12);
    }

    #[test]
    fn it_iterates_planes() {
        let strider = Strider::new(&Vector3::new(3, 4, 5));
        let points = strider.iter_plane(Axis::Y, 2).collect::<Vec<_>>();
        assert_eq!(points.len(), 15);
        assert!(points.iter().all(|(_, point)| point.y == 2));
    }
}
