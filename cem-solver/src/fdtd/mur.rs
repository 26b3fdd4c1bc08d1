use std::ops::Range;

use nalgebra::{
    Point3,
    Vector3,
};

use crate::{
    axis::{
        Axis,
        SignedAxis,
    },
    fdtd::{
        lattice::Lattice,
        strider::Strider,
        util::UpdateCoefficients,
    },
    grid::Grid,
};

/// Where a first order Mur absorber sits.
///
/// Absorbs waves travelling along `direction` that arrive at grid plane
/// `plane`. Domain faces use the outward normal as direction, sheets behind a
/// port the direction away from the port.
#[derive(Clone, Debug, PartialEq)]
pub struct MurSheet {
    pub direction: SignedAxis,
    pub plane: usize,

    /// Node ranges on the two tangential axes, in [`Axis::tangential`] order.
    pub tangential: [Range<usize>; 2],

    pub phase_velocity: f64,
}

/// A [`MurSheet`] prepared for a specific grid and timestep.
#[derive(Clone, Debug)]
pub struct MurAbsorber {
    /// `(boundary node, upstream node)` pairs with the components to update.
    nodes: Vec<(usize, usize, [bool; 2])>,
    components: [usize; 2],
    k1: f64,
}

impl MurAbsorber {
    /// Returns `None` if the sheet has no upstream plane inside the grid.
    pub fn new(
        sheet: &MurSheet,
        grid: &Grid,
        strider: &Strider,
        coefficients: &Lattice<UpdateCoefficients>,
        timestep: f64,
    ) -> Option<Self> {
        let axis = sheet.direction.axis;
        let upstream = if sheet.direction.positive {
            sheet.plane.checked_sub(1)?
        }
        else {
            let upstream = sheet.plane + 1;
            (upstream < grid.lines(axis).len()).then_some(upstream)?
        };

        let distance = (grid.lines(axis)[sheet.plane] - grid.lines(axis)[upstream]).abs()
            * grid.delta_unit();
        let v_dt = sheet.phase_velocity * timestep;
        let k1 = (v_dt - distance) / (v_dt + distance);

        let [u, v] = axis.tangential();
        let components = [u.vector_index(), v.vector_index()];

        let mut start = Point3::origin();
        let mut end = Point3::origin();
        start[axis.vector_index()] = sheet.plane;
        end[axis.vector_index()] = sheet.plane + 1;
        for (tangential, range) in [u, v].iter().zip(&sheet.tangential) {
            start[tangential.vector_index()] = range.start;
            end[tangential.vector_index()] = range.end;
        }

        let nodes = strider
            .iter(start..end)
            .map(|(index, point)| {
                let upstream = strider.index_unchecked(&with_component(&point, axis, upstream));
                let active = components.map(|component| {
                    coefficients[index].is_e_active(component)
                        && coefficients[upstream].is_e_active(component)
                });
                (index, upstream, active)
            })
            .filter(|(_, _, active)| active.iter().any(|active| *active))
            .collect();

        Some(Self {
            nodes,
            components,
            k1,
        })
    }

    /// Overwrites the tangential E on the sheet.
    ///
    /// `e_next` holds the freshly updated field, `e_previous` the field before
    /// the update.
    pub fn apply(&self, e_next: &mut Lattice<Vector3<f64>>, e_previous: &Lattice<Vector3<f64>>) {
        for (boundary, upstream, active) in &self.nodes {
            for (component, active) in self.components.iter().zip(active) {
                if *active {
                    e_next[*boundary][*component] = e_previous[*upstream][*component]
                        + self.k1
                            * (e_next[*upstream][*component]
                                - e_previous[*boundary][*component]);
                }
            }
        }
    }

    pub fn k1(&self) -> f64 {
        self.k1
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }
}

fn with_component(point: &Point3<usize>, axis: Axis, value: usize) -> Point3<usize> {
    let mut point = *point;
    point[axis.vector_index()] = value;
    point
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        axis::{
            Axis,
            SignedAxis,
        },
        fdtd::{
            lattice::Lattice,
            mur::{
                MurAbsorber,
                MurSheet,
            },
            strider::Strider,
            util::UpdateCoefficients,
        },
        grid::Grid,
    };

    #[test]
    fn it_needs_an_upstream_plane() {
        let grid = Grid::uniform(
            Point3::origin(),
            Vector3::repeat(1.0),
            Vector3::new(2, 2, 4),
            1e-3,
        )
        .unwrap();
        let strider = Strider::new(&grid.num_lines());
        let coefficients = Lattice::from_fn(&strider, |_, _| {
            UpdateCoefficients {
                e_b: Vector3::repeat(1.0),
                ..Default::default()
            }
        });
        let phase_velocity = 3e8;
        let timestep = 0.5e-3 / phase_velocity;

        let sheet = |plane, positive| {
            MurSheet {
                direction: SignedAxis::new(Axis::Z, positive),
                plane,
                tangential: [0..3, 0..3],
                phase_velocity,
            }
        };

        let absorber =
            MurAbsorber::new(&sheet(4, true), &grid, &strider, &coefficients, timestep).unwrap();
        assert!((absorber.k1() + 1.0 / 3.0).abs() < 1e-12);
        assert_eq!(absorber.num_nodes(), 9);

        assert!(
            MurAbsorber::new(&sheet(0, true), &grid, &strider, &coefficients, timestep).is_none()
        );
        assert!(
            MurAbsorber::new(&sheet(4, false), &grid, &strider, &coefficients, timestep).is_none()
        );
    }
}
