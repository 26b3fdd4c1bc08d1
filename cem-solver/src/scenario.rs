//! Serializable problem description and its assembly into a [`Simulation`].

use std::path::Path;

use nalgebra::Point3;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    axis::{
        Axis,
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
        cpu::{
            EngineSetup,
            FdtdCpuBackend,
            LatticeForEach,
        },
        mur::MurSheet,
    },
    geometry::{
        Primitive,
        Rasterizer,
    },
    grid::{
        Grid,
        GridBuilder,
        Smoothing,
    },
    material::{
        Material,
        MaterialKind,
        MaterialRegistry,
        MaterialTag,
        PhysicalConstants,
    },
    port::{
        ExcitationType,
        Impedance,
        ModeProfile,
        PortConfig,
        spectrum::linspace,
        validate_port_ids,
    },
    runner::RunConfig,
    simulation::Simulation,
    source::{
        SoftSource,
        Waveform,
    },
    viewer::{
        GeometrySnapshot,
        PortOutline,
    },
};

/// A complete simulation setup, as read from a scenario file.
///
/// Coordinates are in drawing units of size `delta_unit` meters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_delta_unit")]
    pub delta_unit: f64,

    pub domain: Domain,

    #[serde(default)]
    pub grid: GridConfig,

    #[serde(default)]
    pub fdtd: FdtdConfig,

    #[serde(default)]
    pub boundaries: Boundaries,

    /// Material of everything no primitive covers.
    #[serde(default)]
    pub background: Material,

    #[serde(default)]
    pub materials: Vec<MaterialConfig>,

    #[serde(default)]
    pub primitives: Vec<Primitive>,

    pub excitation: Waveform,

    #[serde(default)]
    pub ports: Vec<PortConfig>,

    #[serde(default)]
    pub sources: Vec<SoftSource>,

    #[serde(default)]
    pub absorbers: Vec<AbsorberConfig>,

    #[serde(default)]
    pub run: RunConfig,

    /// Defaults to the excitation's band.
    #[serde(default)]
    pub frequencies: Option<FrequencySweep>,
}

fn default_delta_unit() -> f64 {
    1e-3
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub start: Point3<f64>,
    pub stop: Point3<f64>,
}

/// Extra grid lines and refinement, on top of the lines every primitive,
/// port, source and absorber requests.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridConfig {
    #[serde(default)]
    pub smoothing: Option<Smoothing>,

    #[serde(default = "default_merge_tolerance")]
    pub merge_tolerance: f64,

    #[serde(default)]
    pub x: Vec<f64>,
    #[serde(default)]
    pub y: Vec<f64>,
    #[serde(default)]
    pub z: Vec<f64>,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            smoothing: None,
            merge_tolerance: default_merge_tolerance(),
            x: vec![],
            y: vec![],
            z: vec![],
        }
    }
}

fn default_merge_tolerance() -> f64 {
    1e-9
}

impl GridConfig {
    pub fn lines(&self, axis: Axis) -> &[f64] {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaterialConfig {
    pub tag: MaterialTag,
    pub kind: MaterialKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrequencySweep {
    pub start: f64,
    pub stop: f64,

    #[serde(default = "default_num_frequencies")]
    pub num: usize,
}

fn default_num_frequencies() -> usize {
    201
}

/// A first order Mur sheet inside the domain.
///
/// The sheet lies on the grid plane nearest to `start` along
/// `direction.axis` and covers the tangential extent of `start` and `stop`. It
/// absorbs waves travelling along `direction`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AbsorberConfig {
    pub start: Point3<f64>,
    pub stop: Point3<f64>,
    pub direction: SignedAxis,

    #[serde(default)]
    pub phase_velocity: PhaseVelocity,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseVelocity {
    #[default]
    SpeedOfLight,

    /// In m/s.
    Fixed(f64),

    /// Derived from the propagation constant of the port with this id, at the
    /// excitation's center frequency.
    Port(usize),
}

impl AbsorberConfig {
    fn sheet(
        &self,
        index: usize,
        grid: &Grid,
        ports: &[PortConfig],
        waveform: &Waveform,
        physical_constants: &PhysicalConstants,
    ) -> Result<MurSheet, ConfigurationError> {
        let invalid = |reason: String| ConfigurationError::InvalidAbsorber { index, reason };

        for axis in Axis::ALL {
            let i = axis.vector_index();
            if !grid.contains(axis, self.start[i]) || !grid.contains(axis, self.stop[i]) {
                return Err(invalid("absorber is outside of the domain".to_owned()));
            }
        }

        let axis = self.direction.axis;
        let plane = grid.snap(axis, self.start[axis.vector_index()]);
        let tangential = axis.tangential().map(|tangential| {
            let i = tangential.vector_index();
            let lo = grid.snap(tangential, self.start[i].min(self.stop[i]));
            let hi = grid.snap(tangential, self.start[i].max(self.stop[i]));
            lo..hi + 1
        });

        let phase_velocity = match self.phase_velocity {
            PhaseVelocity::SpeedOfLight => physical_constants.speed_of_light(),
            PhaseVelocity::Fixed(phase_velocity) => phase_velocity,
            PhaseVelocity::Port(id) => {
                ports
                    .iter()
                    .find(|port| port.id == id)
                    .ok_or_else(|| invalid(format!("unknown port {id}")))?
                    .phase_velocity(waveform.f0)
            }
        };

        Ok(MurSheet {
            direction: self.direction,
            plane,
            tangential,
            phase_velocity,
        })
    }
}

impl Scenario {
    /// Frequencies at which ports are evaluated.
    pub fn frequencies(&self) -> Vec<f64> {
        match self.frequencies {
            Some(FrequencySweep { start, stop, num }) => linspace(start, stop, num),
            None => {
                let (start, stop) = self.excitation.band();
                linspace(start, stop, default_num_frequencies())
            }
        }
    }

    pub fn registry(&self) -> Result<MaterialRegistry, ConfigurationError> {
        let mut registry = MaterialRegistry::new();
        for material in &self.materials {
            registry.register(material.tag.clone(), material.kind)?;
        }
        Ok(registry)
    }

    /// Builds the grid from the domain, the lines every object requests and
    /// the extra lines.
    pub fn build_grid(&self) -> Result<Grid, ConfigurationError> {
        let mut builder = GridBuilder::new(self.delta_unit)
            .with_domain(self.domain.start, self.domain.stop)
            .with_merge_tolerance(self.grid.merge_tolerance);
        if let Some(smoothing) = self.grid.smoothing {
            builder = builder.with_smoothing(smoothing);
        }

        for primitive in &self.primitives {
            builder.add_box_edges(&primitive.start, &primitive.stop);
        }
        for port in &self.ports {
            builder.add_box_edges(&port.start, &port.stop);
        }
        for source in &self.sources {
            builder.add_box_edges(&source.start, &source.stop);
        }
        for absorber in &self.absorbers {
            builder.add_box_edges(&absorber.start, &absorber.stop);
        }
        for axis in Axis::ALL {
            builder.add_lines(axis, self.grid.lines(axis).iter().copied());
        }

        builder.build()
    }

    pub fn snapshot(&self, grid: &Grid) -> GeometrySnapshot {
        GeometrySnapshot::new(
            grid,
            &self.primitives,
            self.ports
                .iter()
                .map(|port| {
                    PortOutline {
                        id: port.id,
                        start: port.start,
                        stop: port.stop,
                    }
                })
                .collect(),
        )
    }

    /// Validates everything and sets up the engine, ports and sources.
    ///
    /// Mode profile files are resolved relative to `base_directory`.
    pub fn build<Threading>(
        &self,
        backend: &FdtdCpuBackend<Threading>,
        base_directory: &Path,
    ) -> Result<Simulation<Threading>, SolverError>
    where
        Threading: LatticeForEach + Clone,
    {
        self.run.validate()?;
        validate_port_ids(&self.ports)?;
        let pulse = self.excitation.pulse()?;

        let registry = self.registry()?;
        let grid = self.build_grid()?;
        let geometry = Rasterizer::new(&grid, &registry)
            .with_background(self.background)
            .with_periodic(self.boundaries.periodic())
            .rasterize(&self.primitives)?;

        let absorbers = self
            .absorbers
            .iter()
            .enumerate()
            .map(|(index, absorber)| {
                absorber.sheet(
                    index,
                    &grid,
                    &self.ports,
                    &self.excitation,
                    &self.fdtd.physical_constants,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let instance = backend.create_instance(&EngineSetup {
            config: &self.fdtd,
            grid: &grid,
            geometry: &geometry,
            boundaries: &self.boundaries,
            absorbers: &absorbers,
        })?;

        let ports = self
            .ports
            .iter()
            .map(|port| port.prepare(&grid, &instance, base_directory, pulse))
            .collect::<Result<Vec<_>, _>>()?;
        let sources = self
            .sources
            .iter()
            .map(|source| source.prepare(&grid, &instance, pulse))
            .collect::<Result<Vec<_>, _>>()?;

        if sources.is_empty() && !self.ports.iter().any(|port| port.excite) {
            tracing::warn!("scenario has no excitation");
        }

        tracing::info!(
            num_lines = ?grid.num_lines(),
            num_cells = grid.num_cells_total(),
            timestep = instance.timestep(),
            num_ports = ports.len(),
            num_sources = sources.len(),
            num_absorbers = instance.absorbers().len(),
            "built simulation"
        );

        Ok(Simulation::new(
            grid,
            geometry.report().clone(),
            instance,
            ports,
            sources,
            self.excitation,
        ))
    }
}

impl Default for Scenario {
    /// A parallel-plate line, 2 mm wide with 1 mm plate separation, filled
    /// with a dielectric of relative permittivity 2.2. The plates are the PEC
    /// faces of the y axis, x is periodic. Port 1 drives the line, port 2
    /// terminates it, and Mur sheets on both z faces absorb what leaves the
    /// line.
    fn default() -> Self {
        let relative_permittivity = 2.2;
        let width = 2.0;
        let separation = 1.0;
        let length = 120.0;
        let f0 = 2e9;

        let physical_constants = PhysicalConstants::SI;
        let wave_impedance =
            physical_constants.vacuum_impedance() / f64::sqrt(relative_permittivity);
        let kz = 2.0 * std::f64::consts::PI * f0 * f64::sqrt(relative_permittivity)
            / physical_constants.speed_of_light();

        // TEM mode: E_y = 1 / w, H_x = -1 / d
        let mode = ModeProfile::uniform([0.0, 1e3 / width], [-1e3 / separation, 0.0]);
        let port = |id: usize, start: f64, stop: f64, excite: bool| {
            PortConfig {
                id,
                start: Point3::new(0.0, 0.0, start),
                stop: Point3::new(width, separation, stop),
                axis: Axis::Z,
                mode: mode.clone().into(),
                kz,
                characteristic_impedance: Impedance::Constant(
                    wave_impedance * separation / width,
                ),
                reference_impedance: None,
                excite,
                excitation_type: ExcitationType::E,
                amplitude: 1.0,
            }
        };
        let absorber = |z: f64, positive: bool, port: usize| {
            AbsorberConfig {
                start: Point3::new(0.0, 0.0, z),
                stop: Point3::new(width, separation, z),
                direction: SignedAxis::new(Axis::Z, positive),
                phase_velocity: PhaseVelocity::Port(port),
            }
        };

        Self {
            delta_unit: default_delta_unit(),
            domain: Domain {
                start: Point3::origin(),
                stop: Point3::new(width, separation, length),
            },
            grid: GridConfig {
                smoothing: Some(Smoothing::new(1.0)),
                ..Default::default()
            },
            fdtd: FdtdConfig {
                physical_constants,
                ..Default::default()
            },
            boundaries: Boundaries::default()
                .with_axis(Axis::X, [BoundaryCondition::Periodic; 2])
                .with_axis(Axis::Y, [BoundaryCondition::Pec; 2])
                .with_axis(Axis::Z, [BoundaryCondition::Pmc; 2]),
            background: Material::VACUUM,
            materials: vec![MaterialConfig {
                tag: "substrate".into(),
                kind: MaterialKind::Dielectric(Material::dielectric(relative_permittivity)),
            }],
            primitives: vec![Primitive::new(
                "substrate",
                0,
                Point3::origin(),
                Point3::new(width, separation, length),
            )],
            excitation: Waveform::new(f0, 1e9),
            ports: vec![port(1, 10.0, 15.0, true), port(2, 110.0, 105.0, false)],
            sources: vec![],
            absorbers: vec![absorber(0.0, false, 1), absorber(length, true, 2)],
            run: RunConfig {
                max_steps: 20_000,
                ..Default::default()
            },
            frequencies: None,
        }
    }
}
