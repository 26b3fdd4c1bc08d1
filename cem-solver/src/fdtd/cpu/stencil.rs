use nalgebra::{
    Matrix3,
    Point3,
    Vector3,
};

use crate::{
    axis::Axis,
    fdtd::{
        lattice::Lattice,
        strider::Strider,
    },
    grid::Grid,
};

/// Finite differences on the staggered lattice of a non-uniform grid.
///
/// E component `c` of node `p` lives at the middle of the primary edge from
/// `p` to `p + e_c`, H component `c` at the center of the dual edge through
/// the primary face spanned by the other two axes.
#[derive(Clone, Debug)]
pub struct Stencil {
    num_lines: Vector3<usize>,
    periodic: Vector3<bool>,
    strides: Vector3<usize>,

    /// Primary spacings in meters, `num_lines - 1` per axis.
    primary: [Vec<f64>; 3],

    /// Dual spacings in meters, `num_lines` per axis.
    dual: [Vec<f64>; 3],

    inverse_primary: [Vec<f64>; 3],
    inverse_dual: [Vec<f64>; 3],
}

impl Stencil {
    pub fn new(grid: &Grid, periodic: Vector3<bool>, strider: &Strider) -> Self {
        let num_lines = grid.num_lines();

        let primary = Axis::ALL.map(|axis| {
            (0..num_lines[axis.vector_index()] - 1)
                .map(|index| grid.spacing(axis, index))
                .collect::<Vec<_>>()
        });
        let dual = Axis::ALL.map(|axis| {
            (0..num_lines[axis.vector_index()])
                .map(|index| grid.dual_spacing(axis, index, periodic[axis.vector_index()]))
                .collect::<Vec<_>>()
        });
        let inverse = |spacings: &[Vec<f64>; 3]| {
            spacings
                .clone()
                .map(|spacings| spacings.iter().map(|spacing| spacing.recip()).collect::<Vec<_>>())
        };

        Self {
            num_lines,
            periodic,
            strides: Vector3::from_fn(|i, _| strider.stride(Axis::ALL[i])),
            inverse_primary: inverse(&primary),
            inverse_dual: inverse(&dual),
            primary,
            dual,
        }
    }

    pub fn num_lines(&self) -> &Vector3<usize> {
        &self.num_lines
    }

    pub fn periodic(&self) -> &Vector3<bool> {
        &self.periodic
    }

    /// Derivatives of E at the H locations of node `point`.
    ///
    /// Differences towards the next node. Derivatives that would leave the
    /// lattice are 0.
    pub fn e_jacobian(
        &self,
        index: usize,
        point: &Point3<usize>,
        e_field: &Lattice<Vector3<f64>>,
    ) -> Matrix3<f64> {
        let here = e_field[index];
        Matrix3::from_columns(&[0, 1, 2].map(|a| {
            if point[a] + 1 < self.num_lines[a] {
                (e_field[index + self.strides[a]] - here) * self.inverse_primary[a][point[a]]
            }
            else {
                Vector3::zeros()
            }
        }))
    }

    /// Derivatives of H at the E locations of node `point`.
    ///
    /// Differences towards the previous node. At a non-periodic lower face the
    /// H outside the domain is 0, at a periodic one it wraps around to the
    /// last independent node.
    pub fn h_jacobian(
        &self,
        index: usize,
        point: &Point3<usize>,
        h_field: &Lattice<Vector3<f64>>,
    ) -> Matrix3<f64> {
        let here = h_field[index];
        Matrix3::from_columns(&[0, 1, 2].map(|a| {
            let below = if point[a] > 0 {
                Some(index - self.strides[a])
            }
            else if self.periodic[a] {
                Some(index + (self.num_lines[a] - 2) * self.strides[a])
            }
            else {
                None
            };
            let below = below.map_or_else(Vector3::zeros, |below| h_field[below]);
            (here - below) * self.inverse_dual[a][point[a]]
        }))
    }

    /// Volume associated with E component `c` of node `point`, in m³.
    pub fn e_volume(&self, point: &Point3<usize>, c: usize) -> f64 {
        if point[c] + 1 >= self.num_lines[c] {
            return 0.0;
        }
        let [u, v] = Axis::ALL[c].tangential().map(|axis| axis.vector_index());
        self.primary[c][point[c]] * self.dual[u][point[u]] * self.dual[v][point[v]]
    }

    /// Volume associated with H component `c` of node `point`, in m³.
    pub fn h_volume(&self, point: &Point3<usize>, c: usize) -> f64 {
        let [u, v] = Axis::ALL[c].tangential().map(|axis| axis.vector_index());
        if point[u] + 1 >= self.num_lines[u] || point[v] + 1 >= self.num_lines[v] {
            return 0.0;
        }
        self.dual[c][point[c]] * self.primary[u][point[u]] * self.primary[v][point[v]]
    }

    /// Whether the node is the periodic image of the node on the first plane
    /// of some axis.
    pub fn is_image(&self, point: &Point3<usize>) -> bool {
        (0..3).any(|a| self.periodic[a] && point[a] + 1 == self.num_lines[a])
    }
}

/// Curl from a jacobian with `m[(i, j)] = d F_i / d x_j`.
pub fn curl(jacobian: &Matrix3<f64>) -> Vector3<f64> {
    Vector3::new(
        jacobian[(2, 1)] - jacobian[(1, 2)],
        jacobian[(0, 2)] - jacobian[(2, 0)],
        jacobian[(1, 0)] - jacobian[(0, 1)],
    )
}
