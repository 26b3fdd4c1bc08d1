mod stencil;

use nalgebra::{
    Point3,
    Vector3,
};

pub use self::stencil::{
    Stencil,
    curl,
};
use crate::{
    axis::{
        Axis,
        Face,
        Side,
        SignedAxis,
    },
    error::{
        ConfigurationError,
        SolverError,
    },
    fdtd::{
        FdtdConfig,
        boundary::{
            Boundaries,
            BoundaryCondition,
        },
        lattice::Lattice,
        mur::{
            MurAbsorber,
            MurSheet,
        },
        pml::{
            PmlCoefficients,
            PmlNode,
            PmlState,
            curl_correction,
        },
        stability_limit,
        strider::Strider,
        util::{
            SwapBuffer,
            SwapBufferIndex,
            UpdateCoefficients,
        },
    },
    geometry::RasterizedGeometry,
    grid::Grid,
    material::PhysicalConstants,
};

/// Defines how a single/multi-threading iterates over the lattice in the state
/// update.
pub trait LatticeForEach: Send + Sync + 'static {
    fn for_each<T, F>(&self, strider: &Strider, lattice: &mut Lattice<T>, f: F)
    where
        T: Send + Sync,
        F: Fn(usize, Point3<usize>, &mut T) + Send + Sync;

    fn for_each_slice<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send + Sync,
        F: Fn(usize, &mut T) + Send + Sync;
}

/// Use single-threading
#[derive(Clone, Copy, Debug, Default)]
pub struct SingleThreaded;

impl LatticeForEach for SingleThreaded {
    fn for_each<T, F>(&self, strider: &Strider, lattice: &mut Lattice<T>, f: F)
    where
        T: Send + Sync,
        F: Fn(usize, Point3<usize>, &mut T) + Send + Sync,
    {
        lattice
            .iter_mut(strider)
            .for_each(|(index, point, value)| f(index, point, value))
    }

    fn for_each_slice<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send + Sync,
        F: Fn(usize, &mut T) + Send + Sync,
    {
        items
            .iter_mut()
            .enumerate()
            .for_each(|(index, item)| f(index, item))
    }
}

/// Use multi-threading
#[cfg(feature = "rayon")]
#[derive(Clone, Debug)]
pub struct MultiThreaded {
    thread_pool: Option<std::sync::Arc<rayon::ThreadPool>>,
}

#[cfg(feature = "rayon")]
impl MultiThreaded {
    /// Use default number of threads (see [`rayon::current_num_threads`])
    pub fn from_default_thread_pool() -> Self {
        Self { thread_pool: None }
    }

    pub fn from_num_threads(num_threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        Ok(Self::from_thread_pool(
            rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|index| format!("fdtd-{index}"))
                .build()?,
        ))
    }

    pub fn from_thread_pool(thread_pool: rayon::ThreadPool) -> Self {
        Self {
            thread_pool: Some(std::sync::Arc::new(thread_pool)),
        }
    }

    fn install<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        if let Some(thread_pool) = &self.thread_pool {
            thread_pool.install(f)
        }
        else {
            f()
        }
    }
}

#[cfg(feature = "rayon")]
impl Default for MultiThreaded {
    fn default() -> Self {
        Self::from_default_thread_pool()
    }
}

#[cfg(feature = "rayon")]
impl LatticeForEach for MultiThreaded {
    fn for_each<T, F>(&self, strider: &Strider, lattice: &mut Lattice<T>, f: F)
    where
        T: Send + Sync,
        F: Fn(usize, Point3<usize>, &mut T) + Send + Sync,
    {
        use rayon::iter::ParallelIterator as _;

        self.install(|| {
            lattice
                .par_iter_mut(strider)
                .for_each(|(index, point, value)| f(index, point, value))
        });
    }

    fn for_each_slice<T, F>(&self, items: &mut [T], f: F)
    where
        T: Send + Sync,
        F: Fn(usize, &mut T) + Send + Sync,
    {
        use rayon::iter::{
            IndexedParallelIterator as _,
            IntoParallelRefMutIterator as _,
            ParallelIterator as _,
        };

        self.install(|| {
            items
                .par_iter_mut()
                .enumerate()
                .for_each(|(index, item)| f(index, item))
        });
    }
}

#[derive(Clone, Copy, Debug)]
pub struct FdtdCpuBackend<Threading = SingleThreaded> {
    /// Whether to use single-threading or multi-threading
    pub threading: Threading,
}

impl Default for FdtdCpuBackend<SingleThreaded> {
    fn default() -> Self {
        Self::single_threaded()
    }
}

impl<Threading> FdtdCpuBackend<Threading> {
    pub fn new(threading: Threading) -> Self {
        Self { threading }
    }
}

impl FdtdCpuBackend<SingleThreaded> {
    pub fn single_threaded() -> Self {
        Self {
            threading: SingleThreaded,
        }
    }
}

#[cfg(feature = "rayon")]
impl FdtdCpuBackend<MultiThreaded> {
    pub fn multi_threaded(num_threads: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let threading = if let Some(num_threads) = num_threads {
            MultiThreaded::from_num_threads(num_threads)?
        }
        else {
            MultiThreaded::from_default_thread_pool()
        };

        Ok(Self { threading })
    }

    pub fn num_threads(&self) -> usize {
        self.threading
            .thread_pool
            .as_ref()
            .map_or_else(rayon::current_num_threads, |thread_pool| {
                thread_pool.current_num_threads()
            })
    }
}

impl<Threading> FdtdCpuBackend<Threading>
where
    Threading: LatticeForEach + Clone,
{
    pub fn create_instance(
        &self,
        setup: &EngineSetup<'_>,
    ) -> Result<FdtdCpuInstance<Threading>, SolverError> {
        FdtdCpuInstance::new(setup, self.threading.clone())
    }

    /// Estimated memory in bytes for the instance and one state.
    pub fn memory_required(&self, grid: &Grid) -> usize {
        memory_required(grid.num_lines().product())
    }
}

fn memory_required(num_nodes: usize) -> usize {
    let per_node = std::mem::size_of::<UpdateCoefficients>()
        + 4 * std::mem::size_of::<Vector3<f64>>();
    per_node * num_nodes
}

/// Everything the engine needs to know about the problem.
#[derive(Clone, Copy, Debug)]
pub struct EngineSetup<'a> {
    pub config: &'a FdtdConfig,
    pub grid: &'a Grid,
    pub geometry: &'a RasterizedGeometry,
    pub boundaries: &'a Boundaries,

    /// Mur sheets inside the domain, in addition to Mur faces.
    pub absorbers: &'a [MurSheet],
}

#[derive(Clone, Debug)]
pub struct FdtdCpuInstance<Threading = SingleThreaded> {
    strider: Strider,
    stencil: Stencil,
    timestep: f64,
    physical_constants: PhysicalConstants,
    update_coefficients: Lattice<UpdateCoefficients>,
    pml_nodes: Vec<PmlNode>,
    absorbers: Vec<MurAbsorber>,
    threading: Threading,
}

impl<Threading> FdtdCpuInstance<Threading> {
    fn new(setup: &EngineSetup<'_>, threading: Threading) -> Result<Self, SolverError> {
        let EngineSetup {
            config,
            grid,
            geometry,
            boundaries,
            absorbers,
        } = *setup;

        boundaries.validate(grid)?;

        let num_lines = grid.num_lines();
        let strider = Strider::new(&num_lines);
        if geometry.node_strider().size() != strider.size() {
            return Err(ConfigurationError::InvalidGridParameter {
                reason: "geometry was rasterized on a different grid",
            }
            .into());
        }

        let limit = stability_limit(
            grid,
            &config.physical_constants,
            geometry.min_epsilon_mu(),
        );
        let timestep = config.timestep.resolve(limit)?;
        let stencil = Stencil::new(grid, boundaries.periodic(), &strider);

        let is_electric_wall = |axis: Axis, index: usize| {
            let [lower, upper] = boundaries.axis(axis);
            (index == 0 && lower.is_electric_wall())
                || (index + 1 == num_lines[axis.vector_index()] && upper.is_electric_wall())
        };

        let update_coefficients = Lattice::from_fn(&strider, |index, point| {
            // E edges must lie inside the domain and not on a PEC face
            let e_active = Vector3::from_fn(|c, _| {
                point[c] + 1 < num_lines[c]
                    && Axis::ALL[c]
                        .tangential()
                        .iter()
                        .all(|axis| !is_electric_wall(*axis, point[axis.vector_index()]))
            });
            // dual edges must pass through a cell
            let h_active = Vector3::from_fn(|c, _| {
                Axis::ALL[c].tangential().iter().all(|axis| {
                    point[axis.vector_index()] + 1 < num_lines[axis.vector_index()]
                })
            });
            UpdateCoefficients::new(
                timestep,
                &config.physical_constants,
                &geometry.nodes()[index],
                e_active,
                h_active,
            )
        });

        let pml_nodes = pml_nodes(
            grid,
            boundaries,
            &strider,
            timestep,
            &config.physical_constants,
        );

        let mut mur = vec![];
        for face in Face::ALL {
            if let BoundaryCondition::Mur { phase_velocity } = boundaries.face(face) {
                let sheet = face_sheet(
                    face,
                    &num_lines,
                    phase_velocity.unwrap_or_else(|| config.physical_constants.speed_of_light()),
                );
                mur.extend(MurAbsorber::new(
                    &sheet,
                    grid,
                    &strider,
                    &update_coefficients,
                    timestep,
                ));
            }
        }
        for (index, sheet) in absorbers.iter().enumerate() {
            validate_absorber(index, sheet, &num_lines)?;
            let absorber = MurAbsorber::new(sheet, grid, &strider, &update_coefficients, timestep)
                .ok_or_else(|| {
                    ConfigurationError::InvalidAbsorber {
                        index,
                        reason: "no upstream plane inside the grid".to_owned(),
                    }
                })?;
            mur.push(absorber);
        }

        tracing::debug!(
            num_lines = ?num_lines,
            timestep,
            stability_limit = limit,
            memory = %cem_util::format_size(memory_required(strider.len())),
            num_pml_nodes = pml_nodes.len(),
            num_absorbers = mur.len(),
            "created FDTD instance"
        );

        Ok(Self {
            strider,
            stencil,
            timestep,
            physical_constants: config.physical_constants,
            update_coefficients,
            pml_nodes,
            absorbers: mur,
            threading,
        })
    }

    pub fn create_state(&self) -> FdtdCpuState {
        FdtdCpuState::new(&self.strider, self.pml_nodes.len())
    }

    pub fn strider(&self) -> &Strider {
        &self.strider
    }

    pub fn stencil(&self) -> &Stencil {
        &self.stencil
    }

    pub fn timestep(&self) -> f64 {
        self.timestep
    }

    pub fn physical_constants(&self) -> &PhysicalConstants {
        &self.physical_constants
    }

    pub fn update_coefficients(&self) -> &Lattice<UpdateCoefficients> {
        &self.update_coefficients
    }

    pub fn num_pml_nodes(&self) -> usize {
        self.pml_nodes.len()
    }

    pub fn absorbers(&self) -> &[MurAbsorber] {
        &self.absorbers
    }

    /// Electromagnetic energy in joules at the start of the last step.
    ///
    /// Uses `E^n` and the product `H^(n-1/2) * H^(n+1/2)`, which is conserved
    /// exactly by the lossless leapfrog.
    pub fn energy(&self, state: &FdtdCpuState) -> f64 {
        let current = SwapBufferIndex::from_tick(state.tick);
        let other = if state.tick == 0 {
            current
        }
        else {
            current.other()
        };

        let e_field = &state.e_field[other];
        let h_previous = &state.h_field[other];
        let h_current = &state.h_field[current];

        let sum: f64 = self
            .strider
            .iter(..)
            .filter(|(_, point)| !self.stencil.is_image(point))
            .map(|(index, point)| {
                let coefficients = &self.update_coefficients[index];
                (0..3)
                    .map(|c| {
                        coefficients.permittivity[c]
                            * e_field[index][c].powi(2)
                            * self.stencil.e_volume(&point, c)
                            + coefficients.permeability[c]
                                * h_previous[index][c]
                                * h_current[index][c]
                                * self.stencil.h_volume(&point, c)
                    })
                    .sum::<f64>()
            })
            .sum();

        0.5 * sum
    }
}

impl<Threading> FdtdCpuInstance<Threading>
where
    Threading: LatticeForEach,
{
    pub fn begin_update<'a>(
        &'a self,
        state: &'a mut FdtdCpuState,
    ) -> FdtdCpuUpdatePass<'a, Threading> {
        FdtdCpuUpdatePass::new(self, state)
    }
}

fn face_sheet(face: Face, num_lines: &Vector3<usize>, phase_velocity: f64) -> MurSheet {
    let axis = face.axis;
    let [u, v] = axis.tangential();
    let (plane, positive) = match face.side {
        Side::Lower => (0, false),
        Side::Upper => (num_lines[axis.vector_index()] - 1, true),
    };

    MurSheet {
        direction: SignedAxis::new(axis, positive),
        plane,
        tangential: [0..num_lines[u.vector_index()], 0..num_lines[v.vector_index()]],
        phase_velocity,
    }
}

fn validate_absorber(
    index: usize,
    sheet: &MurSheet,
    num_lines: &Vector3<usize>,
) -> Result<(), ConfigurationError> {
    let invalid = |reason: &str| {
        Err(ConfigurationError::InvalidAbsorber {
            index,
            reason: reason.to_owned(),
        })
    };

    let axis = sheet.direction.axis;
    if sheet.plane >= num_lines[axis.vector_index()] {
        return invalid("plane is outside of the grid");
    }
    for (tangential, range) in axis.tangential().iter().zip(&sheet.tangential) {
        if range.start >= range.end || range.end > num_lines[tangential.vector_index()] {
            return invalid("tangential range is empty or outside of the grid");
        }
    }
    if !(sheet.phase_velocity.is_finite() && sheet.phase_velocity > 0.0) {
        return invalid("phase velocity must be positive");
    }

    Ok(())
}

/// Collects the nodes where any PML coefficient differs from identity.
fn pml_nodes(
    grid: &Grid,
    boundaries: &Boundaries,
    strider: &Strider,
    timestep: f64,
    physical_constants: &PhysicalConstants,
) -> Vec<PmlNode> {
    let profiles = Axis::ALL.map(|axis| {
        pml_profile(grid, boundaries, axis, timestep, physical_constants)
    });

    strider
        .iter(..)
        .filter_map(|(index, point)| {
            let e = [0, 1, 2].map(|a| profiles[a].0[point[a]]);
            let h = [0, 1, 2].map(|a| profiles[a].1[point[a]]);
            e.iter()
                .chain(&h)
                .any(|coefficients| !coefficients.is_identity())
                .then_some(PmlNode { index, e, h })
        })
        .collect()
}

/// PML coefficients along one axis, at the lines and at the dual lines.
fn pml_profile(
    grid: &Grid,
    boundaries: &Boundaries,
    axis: Axis,
    timestep: f64,
    physical_constants: &PhysicalConstants,
) -> (Vec<PmlCoefficients>, Vec<PmlCoefficients>) {
    let lines = grid.lines(axis);
    let num_lines = lines.len();
    let mut primary = vec![PmlCoefficients::IDENTITY; num_lines];
    let mut dual = vec![PmlCoefficients::IDENTITY; num_lines];

    let [lower, upper] = boundaries.axis(axis);
    for (boundary_condition, side) in [(lower, Side::Lower), (upper, Side::Upper)] {
        let BoundaryCondition::Pml { depth, grading } = boundary_condition
        else {
            continue;
        };

        let (inner, outer) = match side {
            Side::Lower => (lines[*depth], lines[0]),
            Side::Upper => (lines[num_lines - 1 - depth], lines[num_lines - 1]),
        };
        let thickness = (outer - inner).abs() * grid.delta_unit();
        let depth_at = |x: f64| ((x - inner) / (outer - inner)).clamp(0.0, 1.0);

        for index in 0..num_lines {
            let depth = depth_at(lines[index]);
            if depth > 0.0 {
                primary[index] =
                    grading.coefficients(timestep, physical_constants, depth, thickness);
            }

            if index + 1 < num_lines {
                let depth = depth_at(grid.dual_line(axis, index));
                if depth > 0.0 {
                    dual[index] =
                        grading.coefficients(timestep, physical_constants, depth, thickness);
                }
            }
        }
    }

    (primary, dual)
}

/// Overwrites the last plane of periodic axes with the first one.
fn copy_periodic_images(strider: &Strider, stencil: &Stencil, field: &mut Lattice<Vector3<f64>>) {
    for axis in Axis::ALL {
        let a = axis.vector_index();
        if stencil.periodic()[a] {
            let last = stencil.num_lines()[a] - 1;
            let offset = last * strider.stride(axis);
            for (index, _) in strider.iter_plane(axis, last) {
                field[index] = field[index - offset];
            }
        }
    }
}

#[derive(Clone, derive_more::Debug)]
pub struct FdtdCpuState {
    #[debug(skip)]
    h_field: SwapBuffer<Lattice<Vector3<f64>>>,
    #[debug(skip)]
    e_field: SwapBuffer<Lattice<Vector3<f64>>>,
    pml: Vec<PmlState>,
    e_forcing: Vec<Forcing>,
    h_forcing: Vec<Forcing>,
    tick: usize,
    time: f64,
}

impl FdtdCpuState {
    fn new(strider: &Strider, num_pml_nodes: usize) -> Self {
        Self {
            h_field: SwapBuffer::from_fn(|_| Lattice::from_default(strider)),
            e_field: SwapBuffer::from_fn(|_| Lattice::from_default(strider)),
            pml: vec![PmlState::default(); num_pml_nodes],
            e_forcing: vec![],
            h_forcing: vec![],
            tick: 0,
            time: 0.0,
        }
    }

    /// Number of completed steps.
    pub fn tick(&self) -> usize {
        self.tick
    }

    /// Time of the current E field. The current H field is half a step
    /// earlier.
    pub fn time(&self) -> f64 {
        self.time
    }

    pub fn e_field(&self) -> &Lattice<Vector3<f64>> {
        &self.e_field[SwapBufferIndex::from_tick(self.tick)]
    }

    pub fn e_field_mut(&mut self) -> &mut Lattice<Vector3<f64>> {
        &mut self.e_field[SwapBufferIndex::from_tick(self.tick)]
    }

    pub fn h_field(&self) -> &Lattice<Vector3<f64>> {
        &self.h_field[SwapBufferIndex::from_tick(self.tick)]
    }

    pub fn h_field_mut(&mut self) -> &mut Lattice<Vector3<f64>> {
        &mut self.h_field[SwapBufferIndex::from_tick(self.tick)]
    }
}

/// Additive soft source value for one field component.
#[derive(Clone, Copy, Debug)]
struct Forcing {
    index: usize,
    component: usize,
    value: f64,
}

/// One leapfrog step.
///
/// Forcing added to the pass is applied right after the respective sweep, H
/// forcing at `time + dt/2` and E forcing at `time + dt`.
#[derive(Debug)]
pub struct FdtdCpuUpdatePass<'a, Threading> {
    instance: &'a FdtdCpuInstance<Threading>,
    state: &'a mut FdtdCpuState,
}

impl<'a, Threading> FdtdCpuUpdatePass<'a, Threading>
where
    Threading: LatticeForEach,
{
    fn new(instance: &'a FdtdCpuInstance<Threading>, state: &'a mut FdtdCpuState) -> Self {
        state.e_forcing.clear();
        state.h_forcing.clear();
        Self { instance, state }
    }

    pub fn tick(&self) -> usize {
        self.state.tick
    }

    pub fn time(&self) -> f64 {
        self.state.time
    }

    pub fn timestep(&self) -> f64 {
        self.instance.timestep
    }

    /// Adds `value` to E component `component` at lattice `index`.
    ///
    /// Ignored for components that are not updated, e.g. on PEC.
    pub fn add_e_forcing(&mut self, index: usize, component: usize, value: f64) {
        if self.instance.update_coefficients[index].is_e_active(component) {
            self.state.e_forcing.push(Forcing {
                index,
                component,
                value,
            });
        }
    }

    pub fn add_h_forcing(&mut self, index: usize, component: usize, value: f64) {
        if self.instance.update_coefficients[index].is_h_active(component) {
            self.state.h_forcing.push(Forcing {
                index,
                component,
                value,
            });
        }
    }

    pub fn finish(self) {
        let Self { instance, state } = self;

        let previous = SwapBufferIndex::from_tick(state.tick);
        let next = previous.other();
        let strider = &instance.strider;
        let stencil = &instance.stencil;
        let coefficients = &instance.update_coefficients;

        // update magnetic field
        {
            let e_previous = &state.e_field[previous];
            let (h_next, h_previous) = state.h_field.pair_mut(next);
            let h_previous = &*h_previous;
            instance
                .threading
                .for_each(strider, h_next, |index, point, h_next| {
                    let coefficients = &coefficients[index];
                    let e_curl = curl(&stencil.e_jacobian(index, &point, e_previous));
                    *h_next = coefficients.h_a.component_mul(&h_previous[index])
                        - coefficients.h_b.component_mul(&e_curl);
                });
        }

        if !instance.pml_nodes.is_empty() {
            let e_previous = &state.e_field[previous];
            instance.threading.for_each_slice(&mut state.pml, |i, pml| {
                let node = &instance.pml_nodes[i];
                let point = strider.point_unchecked(node.index);
                let jacobian = stencil.e_jacobian(node.index, &point, e_previous);
                pml.correction = curl_correction(&jacobian, &node.h, &mut pml.psi_h);
            });

            let h_next = &mut state.h_field[next];
            for (node, pml) in instance.pml_nodes.iter().zip(&state.pml) {
                h_next[node.index] -= coefficients[node.index]
                    .h_b
                    .component_mul(&pml.correction);
            }
        }

        {
            let h_next = &mut state.h_field[next];
            for forcing in state.h_forcing.drain(..) {
                h_next[forcing.index][forcing.component] += forcing.value;
            }
            copy_periodic_images(strider, stencil, h_next);
        }

        // update electric field. this uses the H field we just computed.
        {
            let h_next = &state.h_field[next];
            let (e_next, e_previous) = state.e_field.pair_mut(next);
            let e_previous = &*e_previous;
            instance
                .threading
                .for_each(strider, e_next, |index, point, e_next| {
                    let coefficients = &coefficients[index];
                    let h_curl = curl(&stencil.h_jacobian(index, &point, h_next));
                    *e_next = coefficients.e_a.component_mul(&e_previous[index])
                        + coefficients.e_b.component_mul(&h_curl);
                });
        }

        if !instance.pml_nodes.is_empty() {
            let h_next = &state.h_field[next];
            instance.threading.for_each_slice(&mut state.pml, |i, pml| {
                let node = &instance.pml_nodes[i];
                let point = strider.point_unchecked(node.index);
                let jacobian = stencil.h_jacobian(node.index, &point, h_next);
                pml.correction = curl_correction(&jacobian, &node.e, &mut pml.psi_e);
            });

            let e_next = &mut state.e_field[next];
            for (node, pml) in instance.pml_nodes.iter().zip(&state.pml) {
                e_next[node.index] += coefficients[node.index]
                    .e_b
                    .component_mul(&pml.correction);
            }
        }

        {
            let (e_next, e_previous) = state.e_field.pair_mut(next);
            for forcing in state.e_forcing.drain(..) {
                e_next[forcing.index][forcing.component] += forcing.value;
            }
            for absorber in &instance.absorbers {
                absorber.apply(e_next, e_previous);
            }
            copy_periodic_images(strider, stencil, e_next);
        }

        state.tick += 1;
        state.time = state.tick as f64 * instance.timestep;
    }
}

#[cfg(test)]
mod tests {
    use nalgebra::{
        Point3,
        Vector3,
    };

    use crate::{
        axis::Axis,
        error::SolverError,
        fdtd::{
            FdtdConfig,
            Timestep,
            boundary::{
                Boundaries,
                BoundaryCondition,
            },
            cpu::{
                EngineSetup,
                FdtdCpuBackend,
                FdtdCpuInstance,
                FdtdCpuState,
                LatticeForEach,
            },
        },
        geometry::{
            Primitive,
            Rasterizer,
        },
        grid::Grid,
        material::{
            Material,
            MaterialKind,
            MaterialRegistry,
        },
    };

    fn registry() -> MaterialRegistry {
        let mut registry = MaterialRegistry::new();
        registry
            .register("lossy", MaterialKind::Dielectric(Material::conductor(0.05)))
            .unwrap();
        registry.register("pec", MaterialKind::Pec).unwrap();
        registry
            .register(
                "fast",
                MaterialKind::Dielectric(Material {
                    relative_permittivity: 0.2,
                    relative_permeability: 0.2,
                    ..Material::VACUUM
                }),
            )
            .unwrap();
        registry
    }

    fn instance<Threading: LatticeForEach + Clone>(
        backend: &FdtdCpuBackend<Threading>,
        grid: &Grid,
        boundaries: &Boundaries,
        primitives: &[Primitive],
    ) -> FdtdCpuInstance<Threading> {
        let registry = registry();
        let geometry = Rasterizer::new(grid, &registry)
            .with_periodic(boundaries.periodic())
            .rasterize(primitives)
            .unwrap();
        backend
            .create_instance(&EngineSetup {
                config: &FdtdConfig::default(),
                grid,
                geometry: &geometry,
                boundaries,
                absorbers: &[],
            })
            .unwrap()
    }

    /// A thin cavity on non-uniform lines that supports a TM mode with E_z
    /// only.
    fn cavity_grid() -> Grid {
        Grid::new(
            [
                vec![0.0, 3.0, 5.0, 8.0, 10.0, 13.0, 15.0, 20.0],
                vec![0.0, 2.0, 5.0, 6.0, 9.0, 12.0, 14.0],
                vec![0.0, 2.0],
            ],
            1e-3,
        )
        .unwrap()
    }

    fn excite_cavity<Threading>(
        grid: &Grid,
        instance: &FdtdCpuInstance<Threading>,
        state: &mut FdtdCpuState,
    ) {
        let (_, x_max) = grid.range(Axis::X);
        let (_, y_max) = grid.range(Axis::Y);
        let coefficients = instance.update_coefficients();
        for (index, point) in instance.strider().iter(..) {
            if coefficients[index].is_e_active(2) {
                let x = grid.lines(Axis::X)[point.x] / x_max;
                let y = grid.lines(Axis::Y)[point.y] / y_max;
                state.e_field_mut()[index].z =
                    (std::f64::consts::PI * x).sin() * (std::f64::consts::PI * y).sin();
            }
        }
    }

    fn step<Threading: LatticeForEach>(
        instance: &FdtdCpuInstance<Threading>,
        state: &mut FdtdCpuState,
    ) {
        instance.begin_update(state).finish();
    }

    #[test]
    fn it_conserves_energy_in_a_pec_cavity() {
        let grid = cavity_grid();
        let backend = FdtdCpuBackend::single_threaded();
        let instance = instance(&backend, &grid, &Boundaries::default(), &[]);
        let mut state = instance.create_state();
        excite_cavity(&grid, &instance, &mut state);

        let initial = instance.energy(&state);
        assert!(initial > 0.0);

        for _ in 0..500 {
            step(&instance, &mut state);
            let energy = instance.energy(&state);
            assert!(
                ((energy - initial) / initial).abs() < 1e-9,
                "energy drifted from {initial:e} to {energy:e} at tick {}",
                state.tick()
            );
        }

        // the mode is oscillating, not frozen
        assert!(state.h_field().as_slice().iter().any(|h| h.norm() > 0.0));
    }

    #[test]
    fn it_dissipates_energy_in_lossy_media() {
        let grid = cavity_grid();
        let backend = FdtdCpuBackend::single_threaded();
        let primitives = [Primitive::new(
            "lossy",
            0,
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(20.0, 14.0, 2.0),
        )];
        let instance = instance(&backend, &grid, &Boundaries::default(), &primitives);
        let mut state = instance.create_state();
        excite_cavity(&grid, &instance, &mut state);

        let initial = instance.energy(&state);
        let mut last = initial;
        for _ in 0..400 {
            step(&instance, &mut state);
            let energy = instance.energy(&state);
            assert!(energy <= last * (1.0 + 1e-12));
            last = energy;
        }
        assert!(last < 0.9 * initial);
    }

    #[test]
    fn it_keeps_pec_edges_at_zero() {
        let grid = cavity_grid();
        let backend = FdtdCpuBackend::single_threaded();
        // a wire along z at node (3, 3)
        let primitives = [Primitive::new(
            "pec",
            0,
            Point3::new(8.0, 6.0, 0.0),
            Point3::new(8.0, 6.0, 2.0),
        )];
        let instance = instance(&backend, &grid, &Boundaries::default(), &primitives);
        let mut state = instance.create_state();
        excite_cavity(&grid, &instance, &mut state);

        let wire = instance.strider().index(&Point3::new(3, 3, 0)).unwrap();
        assert!(!instance.update_coefficients()[wire].is_e_active(2));

        for _ in 0..50 {
            let mut pass = instance.begin_update(&mut state);
            pass.add_e_forcing(wire, 2, 1.0);
            pass.finish();
            assert_eq!(state.e_field()[wire].z, 0.0);
        }
        // the neighbor is driven by the cavity field
        let neighbor = instance.strider().index(&Point3::new(2, 3, 0)).unwrap();
        assert_ne!(state.e_field()[neighbor].z, 0.0);
    }

    #[test]
    fn it_rejects_timesteps_above_the_cfl_limit() {
        let grid = cavity_grid();
        let registry = registry();
        let geometry = Rasterizer::new(&grid, &registry).rasterize(&[]).unwrap();
        let config = FdtdConfig {
            timestep: Timestep::Fixed(1.0),
            ..Default::default()
        };
        let result = FdtdCpuBackend::single_threaded().create_instance(&EngineSetup {
            config: &config,
            grid: &grid,
            geometry: &geometry,
            boundaries: &Boundaries::default(),
            absorbers: &[],
        });
        assert!(matches!(result, Err(SolverError::Stability(_))));
    }

    #[test]
    fn it_limits_the_timestep_by_the_fastest_medium() {
        let grid = cavity_grid();
        let backend = FdtdCpuBackend::single_threaded();
        let vacuum = instance(&backend, &grid, &Boundaries::default(), &[]);
        // v = c / sqrt(0.2 * 0.2) = 5c
        let primitives = [Primitive::new(
            "fast",
            0,
            Point3::new(0.0, 0.0, 0.0),
            Point3::new(20.0, 14.0, 2.0),
        )];
        let instance = instance(&backend, &grid, &Boundaries::default(), &primitives);
        let ratio = instance.timestep() / vacuum.timestep();
        assert!((ratio - 0.2).abs() < 1e-12, "timestep ratio: {ratio}");

        let mut state = instance.create_state();
        excite_cavity(&grid, &instance, &mut state);
        let initial = instance.energy(&state);
        for _ in 0..200 {
            step(&instance, &mut state);
        }
        let energy = instance.energy(&state);
        assert!(
            ((energy - initial) / initial).abs() < 1e-9,
            "energy went from {initial:e} to {energy:e}"
        );
    }

    /// Launches a pulse in a 1D line along z and returns the energy left in the
    /// domain relative to the peak energy.
    fn plane_wave_residual(termination: BoundaryCondition) -> f64 {
        let grid = Grid::new(
            [
                vec![0.0, 1000.0],
                vec![0.0, 1000.0],
                (0..=200).map(|z| z as f64).collect(),
            ],
            1e-3,
        )
        .unwrap();
        let boundaries = Boundaries::default()
            .with_axis(Axis::X, [BoundaryCondition::Periodic; 2])
            .with_axis(Axis::Y, [BoundaryCondition::Periodic; 2])
            .with_axis(Axis::Z, [termination; 2]);
        let backend = FdtdCpuBackend::single_threaded();
        let instance = instance(&backend, &grid, &boundaries, &[]);
        let mut state = instance.create_state();

        let source = instance.strider().index(&Point3::new(0, 0, 100)).unwrap();
        let timestep = instance.timestep();
        let tau = 20.0 * timestep;
        let t0 = 5.0 * tau;

        let mut peak: f64 = 0.0;
        for _ in 0..1200 {
            let mut pass = instance.begin_update(&mut state);
            let t = (pass.time() + timestep - t0) / tau;
            pass.add_e_forcing(source, 0, -t * (-t * t).exp());
            pass.finish();
            peak = peak.max(instance.energy(&state));
        }

        assert!(peak > 0.0);
        instance.energy(&state) / peak
    }

    #[test]
    fn it_absorbs_plane_waves_in_the_pml() {
        let residual = plane_wave_residual(BoundaryCondition::pml(10));
        assert!(residual < 1e-3, "residual energy: {residual:e}");
    }

    #[test]
    fn it_absorbs_plane_waves_with_mur() {
        let residual = plane_wave_residual(BoundaryCondition::mur());
        assert!(residual < 1e-3, "residual energy: {residual:e}");
    }

    #[test]
    fn it_reflects_plane_waves_at_pec() {
        let residual = plane_wave_residual(BoundaryCondition::Pec);
        assert!(residual > 0.5, "residual energy: {residual:e}");
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn it_computes_the_same_fields_with_multiple_threads() {
        let grid = cavity_grid();
        let boundaries = Boundaries::default().with_axis(Axis::X, [BoundaryCondition::pml(2); 2]);

        let single = FdtdCpuBackend::single_threaded();
        let multi = FdtdCpuBackend::multi_threaded(Some(4)).unwrap();
        assert_eq!(multi.num_threads(), 4);

        let single = instance(&single, &grid, &boundaries, &[]);
        let multi = instance(&multi, &grid, &boundaries, &[]);
        let mut single_state = single.create_state();
        let mut multi_state = multi.create_state();
        excite_cavity(&grid, &single, &mut single_state);
        excite_cavity(&grid, &multi, &mut multi_state);

        for _ in 0..100 {
            step(&single, &mut single_state);
            step(&multi, &mut multi_state);
        }

        assert_eq!(single_state.e_field(), multi_state.e_field());
        assert_eq!(single_state.h_field(), multi_state.h_field());
        assert_eq!(single.energy(&single_state), multi.energy(&multi_state));
    }
}
