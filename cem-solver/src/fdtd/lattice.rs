use std::ops::{
    Index,
    IndexMut,
    RangeBounds,
};

use nalgebra::Point3;

use crate::fdtd::strider::{
    Strider,
    StriderIter,
};

/// One value per grid node, in [`Strider`] order.
///
/// Field components, update coefficients and node materials are all stored
/// this way. The lattice doesn't know its own shape, every access that needs
/// points takes the strider.
#[derive(Clone, Debug, PartialEq)]
pub struct Lattice<T> {
    data: Box<[T]>,
}

impl<T> Lattice<T>
where
    T: Default,
{
    pub fn from_default(strider: &Strider) -> Self {
        Self::from_fn(strider, |_, _| Default::default())
    }
}

impl<T> Lattice<T> {
    pub fn from_fn(strider: &Strider, mut init: impl FnMut(usize, Point3<usize>) -> T) -> Self {
        let data = (0..strider.len())
            .map(|index| init(index, strider.point_unchecked(index)))
            .collect();
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Value at `point`, or `None` if the point is outside of the lattice.
    pub fn get_point(&self, strider: &Strider, point: &Point3<usize>) -> Option<&T> {
        strider.index(point).map(|index| &self.data[index])
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }

    pub fn iter(
        &self,
        strider: &Strider,
        range: impl RangeBounds<Point3<usize>>,
    ) -> LatticeIter<'_, T> {
        LatticeIter {
            strider_iter: strider.iter(range),
            data: &self.data,
        }
    }

    /// Iterates over all points, in index order.
    pub fn iter_mut<'a>(
        &'a mut self,
        strider: &'a Strider,
    ) -> impl Iterator<Item = (usize, Point3<usize>, &'a mut T)> + 'a {
        self.data
            .iter_mut()
            .enumerate()
            .map(|(index, value)| (index, strider.point_unchecked(index), value))
    }

    #[cfg(feature = "rayon")]
    pub fn par_iter_mut<'a>(
        &'a mut self,
        strider: &'a Strider,
    ) -> impl rayon::iter::ParallelIterator<Item = (usize, Point3<usize>, &'a mut T)> + 'a
    where
        T: Send + Sync,
    {
        use rayon::iter::{
            IndexedParallelIterator as _,
            IntoParallelRefMutIterator as _,
            ParallelIterator as _,
        };

        self.data.par_iter_mut().enumerate().map(|(index, value)| {
            let point = strider.point_unchecked(index);
            (index, point, value)
        })
    }
}

impl<T> Index<usize> for Lattice<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        &self.data[index]
    }
}

impl<T> IndexMut<usize> for Lattice<T> {
    fn index_mut(&mut self, index: usize) -> &mut Self::Output {
        &mut self.data[index]
    }
}

/// Values with their index and point, see [`Lattice::iter`].
#[derive(Clone, Copy, Debug)]
pub struct LatticeIter<'a, T> {
    strider_iter: StriderIter,
    data: &'a [T],
}

impl<'a, T> Iterator for LatticeIter<'a, T> {
    type Item = (usize, Point3<usize>, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let (index, point) = self.strider_iter.next()?;
        Some((index, point, &self.data[index]))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.strider_iter.size_hint()
    }
}

impl<T> ExactSizeIterator for LatticeIter<'_, T> {}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::fdtd::{
        lattice::Lattice,
        strider::Strider,
    };

    #[test]
    fn it_stores_one_value_per_node() {
        let strider = Strider::new(&Vector3::new(2, 3, 4));
        let mut lattice = Lattice::from_fn(&strider, |_, point| point.z * 10 + point.x);
        assert_eq!(lattice.len(), 24);
        assert_eq!(lattice.get_point(&strider, &Point3::new(1, 2, 3)), Some(&31));
        assert_eq!(lattice.get_point(&strider, &Point3::new(2, 0, 0)), None);

        for (_, point, value) in lattice.iter_mut(&strider) {
            if point.y == 0 {
                *value = 0;
            }
        }
        let zeros = lattice
            .iter(&strider, ..)
            .filter(|(_, _, value)| **value == 0)
            .count();
        assert_eq!(zeros, 8 + 1);
    }
}
