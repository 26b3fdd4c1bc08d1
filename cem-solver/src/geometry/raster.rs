use std::collections::BTreeMap;

use arrayvec::ArrayVec;
use nalgebra::{
    Point3,
    Vector3,
};

use crate::{
    axis::Axis,
    error::ConfigurationError,
    fdtd::{
        lattice::Lattice,
        strider::Strider,
    },
    geometry::Primitive,
    grid::Grid,
    material::{
        Material,
        MaterialKind,
        MaterialRegistry,
    },
};

/// Material seen by one field component.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeMaterial {
    /// Relative permittivity on E edges, relative permeability on H edges.
    pub relative: f64,

    /// Electric conductivity on E edges, magnetic conductivity on H edges.
    pub conductivity: f64,

    /// PEC on E edges, PMC on H edges.
    pub perfect: bool,
}

impl EdgeMaterial {
    pub const VACUUM: Self = Self {
        relative: 1.0,
        conductivity: 0.0,
        perfect: false,
    };

    pub fn electric(material: &Material) -> Self {
        Self {
            relative: material.relative_permittivity,
            conductivity: material.electrical_conductivity,
            perfect: false,
        }
    }

    pub fn magnetic(material: &Material) -> Self {
        Self {
            relative: material.relative_permeability,
            conductivity: material.magnetic_conductivity,
            perfect: false,
        }
    }
}

impl Default for EdgeMaterial {
    fn default() -> Self {
        Self::VACUUM
    }
}

/// Materials of the 6 field components stored at a lattice node.
///
/// `e[c]` belongs to the E edge from the node along axis `c`, `h[c]` to the
/// dual edge along `c` through the centers of the cells at the node.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct NodeMaterial {
    pub e: [EdgeMaterial; 3],
    pub h: [EdgeMaterial; 3],
}

/// A primitive lost against a higher priority one at `count` cells or edges.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Override {
    pub winner: usize,
    pub loser: usize,
    pub count: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RasterReport {
    pub overrides: Vec<Override>,

    /// Primitives that don't own a single cell or edge.
    pub empty: Vec<usize>,
}

#[derive(Clone, Debug)]
pub struct RasterizedGeometry {
    node_strider: Strider,
    nodes: Lattice<NodeMaterial>,
    cell_strider: Strider,
    cells: Lattice<Option<usize>>,
    kinds: Vec<MaterialKind>,
    background: Material,
    report: RasterReport,
}

impl RasterizedGeometry {
    /// Strider over grid lines, i.e. the lattice the field engine uses.
    pub fn node_strider(&self) -> &Strider {
        &self.node_strider
    }

    pub fn nodes(&self) -> &Lattice<NodeMaterial> {
        &self.nodes
    }

    pub fn node(&self, point: &Point3<usize>) -> Option<&NodeMaterial> {
        self.nodes.get_point(&self.node_strider, point)
    }

    /// Index of the primitive owning the cell, if any.
    pub fn cell_owner(&self, point: &Point3<usize>) -> Option<usize> {
        self.cells
            .get_point(&self.cell_strider, point)
            .copied()
            .flatten()
    }

    pub fn cell_material(&self, point: &Point3<usize>) -> Option<MaterialKind> {
        self.cell_strider.index(point)?;
        Some(
            self.cell_owner(point)
                .map_or(MaterialKind::Dielectric(self.background), |owner| {
                    self.kinds[owner]
                }),
        )
    }

    pub fn report(&self) -> &RasterReport {
        &self.report
    }

    /// Lower bound for `εr·μr` over all edges, capped at vacuum.
    ///
    /// No wave in the geometry is faster than `c / sqrt(min_epsilon_mu)`.
    pub fn min_epsilon_mu(&self) -> f64 {
        let min_relative = |edges: &[EdgeMaterial; 3], min: f64| {
            edges
                .iter()
                .filter(|edge| !edge.perfect)
                .fold(min, |min, edge| min.min(edge.relative))
        };

        let (min_epsilon, min_mu) = self
            .nodes
            .as_slice()
            .iter()
            .fold((1.0f64, 1.0f64), |(epsilon, mu), node| {
                (min_relative(&node.e, epsilon), min_relative(&node.h, mu))
            });

        min_epsilon * min_mu
    }
}

/// Paints primitives onto a grid.
///
/// Cells are painted by their center point, edges and dual edges by their
/// midpoint against the closed box of the snapped primitive. Where primitives
/// overlap the highest priority wins, ties go to the primitive inserted last.
#[derive(Clone, Debug)]
pub struct Rasterizer<'a> {
    grid: &'a Grid,
    materials: &'a MaterialRegistry,
    background: Material,
    periodic: Vector3<bool>,
}

impl<'a> Rasterizer<'a> {
    pub fn new(grid: &'a Grid, materials: &'a MaterialRegistry) -> Self {
        Self {
            grid,
            materials,
            background: Material::VACUUM,
            periodic: Vector3::repeat(false),
        }
    }

    /// Material of cells that no primitive covers.
    pub fn with_background(mut self, background: Material) -> Self {
        self.background = background;
        self
    }

    /// Averaging across the domain ends wraps around on periodic axes.
    pub fn with_periodic(mut self, periodic: Vector3<bool>) -> Self {
        self.periodic = periodic;
        self
    }

    pub fn rasterize(
        &self,
        primitives: &[Primitive],
    ) -> Result<RasterizedGeometry, ConfigurationError> {
        let snapped = primitives
            .iter()
            .enumerate()
            .map(|(index, primitive)| self.snap(index, primitive))
            .collect::<Result<Vec<_>, _>>()?;

        let mut order = (0..snapped.len()).collect::<Vec<_>>();
        order.sort_by_key(|index| (snapped[*index].priority, *index));

        let mut overrides = BTreeMap::new();
        let node_strider = Strider::new(&self.grid.num_lines());
        let cell_strider = Strider::new(&self.grid.num_cells());

        // paint volumes onto cells
        let mut cells = Lattice::<Option<usize>>::from_default(&cell_strider);
        for &index in &order {
            let primitive = &snapped[index];
            if !primitive.is_volume() {
                continue;
            }
            for (cell, _) in cell_strider.iter(primitive.lo..primitive.hi) {
                record_override(&mut overrides, index, cells[cell]);
                cells[cell] = Some(index);
            }
        }

        // claim edges. sheets and wires of any material own the E edges they
        // contain, and so do PEC volumes. PMC volumes own dual edges.
        let mut e_owners: [Lattice<Option<usize>>; 3] =
            std::array::from_fn(|_| Lattice::from_default(&node_strider));
        let mut h_owners: [Lattice<Option<usize>>; 3] =
            std::array::from_fn(|_| Lattice::from_default(&node_strider));

        for &index in &order {
            let primitive = &snapped[index];
            let (owns_e, owns_h) = match primitive.kind {
                MaterialKind::Dielectric(_) => (!primitive.is_volume(), false),
                MaterialKind::Pec => (true, false),
                MaterialKind::Pmc => (false, primitive.is_volume()),
            };

            for axis in Axis::ALL {
                let c = axis.vector_index();

                if owns_e && primitive.lo[c] < primitive.hi[c] {
                    let mut end = primitive.hi + Vector3::repeat(1);
                    end[c] = primitive.hi[c];
                    for (node, _) in node_strider.iter(primitive.lo..end) {
                        record_override(&mut overrides, index, e_owners[c][node]);
                        e_owners[c][node] = Some(index);
                    }
                }

                if owns_h {
                    let mut end = primitive.hi;
                    end[c] = primitive.hi[c] + 1;
                    for (node, _) in node_strider.iter(primitive.lo..end) {
                        record_override(&mut overrides, index, h_owners[c][node]);
                        h_owners[c][node] = Some(index);
                    }
                }
            }
        }

        let canvas = Canvas {
            grid: self.grid,
            periodic: self.periodic,
            background: self.background,
            snapped: &snapped,
            cell_strider: &cell_strider,
            cells: &cells,
        };

        let mut claimed = vec![0usize; snapped.len()];
        for owner in cells.as_slice().iter().flatten() {
            claimed[*owner] += 1;
        }

        let nodes = Lattice::from_fn(&node_strider, |node, point| {
            let mut material = NodeMaterial::default();

            for axis in Axis::ALL {
                let c = axis.vector_index();

                if let Some(adjacent) = canvas.cells_around_edge(&point, axis) {
                    material.e[c] = canvas.resolve(
                        e_owners[c][node],
                        &adjacent,
                        EdgeMaterial::electric,
                        &mut overrides,
                        &mut claimed,
                    );
                }

                if let Some(adjacent) = canvas.cells_along_dual_edge(&point, axis) {
                    material.h[c] = canvas.resolve(
                        h_owners[c][node],
                        &adjacent,
                        EdgeMaterial::magnetic,
                        &mut overrides,
                        &mut claimed,
                    );
                }
            }

            material
        });

        let report = RasterReport {
            overrides: overrides
                .into_iter()
                .map(|((winner, loser), count)| {
                    Override {
                        winner,
                        loser,
                        count,
                    }
                })
                .collect(),
            empty: claimed
                .iter()
                .enumerate()
                .filter_map(|(index, claimed)| (*claimed == 0).then_some(index))
                .collect(),
        };

        for Override {
            winner,
            loser,
            count,
        } in &report.overrides
        {
            tracing::warn!(
                winner,
                winner_material = %primitives[*winner].material,
                loser,
                loser_material = %primitives[*loser].material,
                count,
                "primitive overridden"
            );
        }
        for index in &report.empty {
            tracing::warn!(
                index,
                material = %primitives[*index].material,
                "primitive doesn't paint anything"
            );
        }

        tracing::debug!(
            num_primitives = primitives.len(),
            num_cells = cell_strider.len(),
            num_overrides = report.overrides.len(),
            "rasterized geometry"
        );

        Ok(RasterizedGeometry {
            node_strider,
            nodes,
            cell_strider,
            cells,
            kinds: snapped.iter().map(|primitive| primitive.kind).collect(),
            background: self.background,
            report,
        })
    }

    fn snap(&self, index: usize, primitive: &Primitive) -> Result<Snapped, ConfigurationError> {
        let kind = *self.materials.get(&primitive.material)?;
        let (min, max) = primitive.bounds();

        let mut lo = Point3::origin();
        let mut hi = Point3::origin();
        for axis in Axis::ALL {
            let i = axis.vector_index();
            if !(self.grid.contains(axis, min[i]) && self.grid.contains(axis, max[i])) {
                return Err(ConfigurationError::PrimitiveOutsideDomain {
                    index,
                    tag: primitive.material.clone(),
                    axis,
                });
            }
            lo[i] = self.grid.snap(axis, min[i]);
            hi[i] = self.grid.snap(axis, max[i]);
        }

        Ok(Snapped {
            kind,
            priority: primitive.priority,
            lo,
            hi,
        })
    }
}

fn record_override(
    overrides: &mut BTreeMap<(usize, usize), usize>,
    winner: usize,
    loser: Option<usize>,
) {
    if let Some(loser) = loser {
        *overrides.entry((winner, loser)).or_default() += 1;
    }
}

/// Primitive with its box snapped to line indices.
#[derive(Clone, Copy, Debug)]
struct Snapped {
    kind: MaterialKind,
    priority: i32,
    lo: Point3<usize>,
    hi: Point3<usize>,
}

impl Snapped {
    fn is_volume(&self) -> bool {
        (0..3).all(|i| self.lo[i] < self.hi[i])
    }
}

/// Painted cells, used to resolve edges.
struct Canvas<'a> {
    grid: &'a Grid,
    periodic: Vector3<bool>,
    background: Material,
    snapped: &'a [Snapped],
    cell_strider: &'a Strider,
    cells: &'a Lattice<Option<usize>>,
}

impl<'a> Canvas<'a> {
    fn key(&self, owner: Option<usize>) -> Option<(i32, usize)> {
        owner.map(|owner| (self.snapped[owner].priority, owner))
    }

    fn cell_material(&self, cell: usize) -> Material {
        self.cells[cell].map_or(self.background, |owner| {
            self.snapped[owner].kind.material()
        })
    }

    /// Cell indices below and above line `index`.
    fn cells_around_line(&self, axis: Axis, index: usize) -> ArrayVec<usize, 2> {
        let num_cells = self.grid.num_cells()[axis.vector_index()];
        let periodic = self.periodic[axis.vector_index()];
        let mut cells = ArrayVec::new();

        if index > 0 {
            cells.push(index - 1);
        }
        else if periodic {
            cells.push(num_cells - 1);
        }

        if index < num_cells {
            cells.push(index);
        }
        else if periodic {
            cells.push(0);
        }

        cells
    }

    /// Cells sharing the E edge from `point` along `axis`, with area weights.
    fn cells_around_edge(
        &self,
        point: &Point3<usize>,
        axis: Axis,
    ) -> Option<ArrayVec<(usize, f64), 4>> {
        let c = axis.vector_index();
        if point[c] >= self.grid.num_cells()[c] {
            return None;
        }

        let [u, v] = axis.tangential();
        let mut adjacent = ArrayVec::new();
        for cell_u in self.cells_around_line(u, point[u.vector_index()]) {
            for cell_v in self.cells_around_line(v, point[v.vector_index()]) {
                let mut cell = *point;
                cell[u.vector_index()] = cell_u;
                cell[v.vector_index()] = cell_v;
                let weight = self.grid.spacing(u, cell_u) * self.grid.spacing(v, cell_v);
                adjacent.push((self.cell_strider.index_unchecked(&cell), weight));
            }
        }

        Some(adjacent)
    }

    /// Cells the dual edge through `point` along `axis` passes, with length
    /// weights.
    fn cells_along_dual_edge(
        &self,
        point: &Point3<usize>,
        axis: Axis,
    ) -> Option<ArrayVec<(usize, f64), 4>> {
        let num_cells = self.grid.num_cells();
        if axis
            .tangential()
            .iter()
            .any(|other| point[other.vector_index()] >= num_cells[other.vector_index()])
        {
            return None;
        }

        let mut adjacent = ArrayVec::new();
        for cell_c in self.cells_around_line(axis, point[axis.vector_index()]) {
            let mut cell = *point;
            cell[axis.vector_index()] = cell_c;
            let weight = self.grid.spacing(axis, cell_c);
            adjacent.push((self.cell_strider.index_unchecked(&cell), weight));
        }

        Some(adjacent)
    }

    /// Material of an edge given its owner and the cells around it.
    ///
    /// The owner applies unless all adjacent cells are painted by primitives
    /// with higher priority. Otherwise the cell materials are averaged.
    fn resolve(
        &self,
        owner: Option<usize>,
        adjacent: &[(usize, f64)],
        edge_material: fn(&Material) -> EdgeMaterial,
        overrides: &mut BTreeMap<(usize, usize), usize>,
        claimed: &mut [usize],
    ) -> EdgeMaterial {
        if let Some(owner) = owner {
            let min_adjacent = adjacent
                .iter()
                .map(|(cell, _)| self.key(self.cells[*cell]))
                .min();

            if min_adjacent.is_none_or(|min_adjacent| self.key(Some(owner)) >= min_adjacent) {
                claimed[owner] += 1;
                return match self.snapped[owner].kind {
                    MaterialKind::Dielectric(material) => edge_material(&material),
                    MaterialKind::Pec | MaterialKind::Pmc => {
                        EdgeMaterial {
                            perfect: true,
                            ..EdgeMaterial::VACUUM
                        }
                    }
                };
            }

            if let Some(winner) = adjacent
                .iter()
                .filter_map(|(cell, _)| self.cells[*cell])
                .max_by_key(|winner| self.key(Some(*winner)))
            {
                record_override(overrides, winner, Some(owner));
            }
        }

        let mut relative = 0.0;
        let mut conductivity = 0.0;
        let mut total_weight = 0.0;
        for (cell, weight) in adjacent {
            let material = edge_material(&self.cell_material(*cell));
            relative += weight * material.relative;
            conductivity += weight * material.conductivity;
            total_weight += weight;
        }

        if total_weight > 0.0 {
            EdgeMaterial {
                relative: relative / total_weight,
                conductivity: conductivity / total_weight,
                perfect: false,
            }
        }
        else {
            edge_material(&self.background)
        }
    }
}
