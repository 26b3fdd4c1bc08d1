use nalgebra::{
    Point3,
    Scalar,
    UnitVector3,
    Vector3,
};
use num::{
    One,
    Zero,
};
use serde::{
    Deserialize,
    Serialize,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Self; 3] = [Self::X, Self::Y, Self::Z];

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    pub fn vector_index(&self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn vector_component<'a, T>(&self, vector: &'a Vector3<T>) -> &'a T {
        &vector[self.vector_index()]
    }

    pub fn vector_component_mut<'a, T>(&self, vector: &'a mut Vector3<T>) -> &'a mut T {
        &mut vector[self.vector_index()]
    }

    pub fn basis<T>(&self) -> UnitVector3<T>
    where
        T: Scalar + Zero + One,
    {
        let mut e = Vector3::<T>::zeros();
        *self.vector_component_mut(&mut e) = T::one();
        // note: one component is 1, all others are 0, therefore this vector is
        // normalized
        UnitVector3::new_unchecked(e)
    }

    /// The two other axes, in cyclic order.
    ///
    /// For the z axis this is `[X, Y]`, so that `tangential[0] x tangential[1]`
    /// points along `self`.
    pub fn tangential(&self) -> [Self; 2] {
        match self {
            Axis::X => [Axis::Y, Axis::Z],
            Axis::Y => [Axis::Z, Axis::X],
            Axis::Z => [Axis::X, Axis::Y],
        }
    }

    pub fn shift(&self, point: &Point3<usize>, offset: usize) -> Point3<usize> {
        let mut point = *point;
        point[self.vector_index()] += offset;
        point
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Lower,
    Upper,
}

impl Side {
    pub fn sign(&self) -> f64 {
        match self {
            Side::Lower => -1.0,
            Side::Upper => 1.0,
        }
    }
}

/// One of the 6 faces of the simulation domain.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Face {
    pub axis: Axis,
    pub side: Side,
}

impl Face {
    pub const ALL: [Self; 6] = [
        Self::new(Axis::X, Side::Lower),
        Self::new(Axis::X, Side::Upper),
        Self::new(Axis::Y, Side::Lower),
        Self::new(Axis::Y, Side::Upper),
        Self::new(Axis::Z, Side::Lower),
        Self::new(Axis::Z, Side::Upper),
    ];

    pub const fn new(axis: Axis, side: Side) -> Self {
        Self { axis, side }
    }

    /// Index into arrays ordered like [`Face::ALL`].
    pub fn index(&self) -> usize {
        2 * self.axis.vector_index()
            + match self.side {
                Side::Lower => 0,
                Side::Upper => 1,
            }
    }
}

/// Direction along an axis, e.g. the propagation direction of a port or the
/// normal of an absorbing sheet.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SignedAxis {
    pub axis: Axis,
    pub positive: bool,
}

impl SignedAxis {
    pub fn new(axis: Axis, positive: bool) -> Self {
        Self { axis, positive }
    }

    pub fn sign(&self) -> f64 {
        if self.positive { 1.0 } else { -1.0 }
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::Vector3;

    use crate::axis::{
        Axis,
        Face,
    };

    #[test]
    fn it_orders_tangential_axes_right_handed() {
        for axis in Axis::ALL {
            let [u, v] = axis.tangential();
            let normal = u
                .basis::<f64>()
                .into_inner()
                .cross(&v.basis::<f64>().into_inner());
            assert_eq!(normal, axis.basis::<f64>().into_inner());
        }
        assert_eq!(Axis::Z.basis::<f64>().into_inner(), Vector3::z());
    }

    #[test]
    fn it_indexes_faces() {
        for (index, face) in Face::ALL.iter().enumerate() {
            assert_eq!(face.index(), index);
        }
    }
}
