//! Waveguide ports: modal excitation, voltage/current sampling and wave
//! decomposition.

pub mod mode;
pub mod spectrum;

use std::{
    f64::consts::PI,
    path::Path,
};

use nalgebra::Point3;
use serde::{
    Deserialize,
    Serialize,
};

pub use self::{
    mode::{
        ModeProfile,
        ModeSource,
    },
    spectrum::{
        Impedance,
        PortSpectrum,
    },
};
use crate::{
    axis::{
        Axis,
        SignedAxis,
    },
    error::ConfigurationError,
    fdtd::{
        cpu::{
            FdtdCpuInstance,
            FdtdCpuState,
            FdtdCpuUpdatePass,
            LatticeForEach,
        },
        strider::Strider,
    },
    grid::Grid,
    source::Pulse,
};

/// Which field a port's excitation acts on.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExcitationType {
    #[default]
    E,
    H,
}

/// A waveguide port.
///
/// `start` and `stop` span the port's cross-section on the two tangential
/// axes. Along `axis`, the excitation sits on the grid plane nearest to
/// `start` and voltage and current are measured on the plane nearest to
/// `stop`. The port looks towards `stop`: incident waves travel from the
/// excitation plane to the measurement plane.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortConfig {
    pub id: usize,
    pub start: Point3<f64>,
    pub stop: Point3<f64>,
    pub axis: Axis,

    pub mode: ModeSource,

    /// Propagation constant of the mode in rad/m, at the excitation's center
    /// frequency.
    pub kz: f64,

    pub characteristic_impedance: Impedance,

    /// Defaults to the characteristic impedance.
    #[serde(default)]
    pub reference_impedance: Option<Impedance>,

    #[serde(default)]
    pub excite: bool,

    #[serde(default)]
    pub excitation_type: ExcitationType,

    #[serde(default = "default_amplitude")]
    pub amplitude: f64,
}

fn default_amplitude() -> f64 {
    1.0
}

impl PortConfig {
    pub fn reference_impedance(&self) -> &Impedance {
        self.reference_impedance
            .as_ref()
            .unwrap_or(&self.characteristic_impedance)
    }

    /// Phase velocity `omega / kz` at frequency `f0`.
    pub fn phase_velocity(&self, f0: f64) -> f64 {
        2.0 * PI * f0 / self.kz
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let invalid = |reason: &str| {
            Err(ConfigurationError::InvalidPort {
                port: self.id,
                reason: reason.to_owned(),
            })
        };

        if self.start.iter().chain(self.stop.iter()).any(|x| !x.is_finite()) {
            return invalid("corners must be finite");
        }
        if !(self.kz.is_finite() && self.kz > 0.0) {
            return invalid("propagation constant must be positive");
        }
        if !self.amplitude.is_finite() {
            return invalid("amplitude must be finite");
        }
        for impedance in [&self.characteristic_impedance, self.reference_impedance()] {
            if let Err(reason) = impedance.validate() {
                return invalid(reason);
            }
        }

        Ok(())
    }

    /// Computes the sampling and excitation weights on the grid.
    pub fn prepare<Threading>(
        &self,
        grid: &Grid,
        instance: &FdtdCpuInstance<Threading>,
        base_directory: &Path,
        pulse: Pulse,
    ) -> Result<Port, ConfigurationError> {
        self.validate()?;
        let invalid = |reason: &str| ConfigurationError::InvalidPort {
            port: self.id,
            reason: reason.to_owned(),
        };

        for axis in Axis::ALL {
            let i = axis.vector_index();
            if !grid.contains(axis, self.start[i]) || !grid.contains(axis, self.stop[i]) {
                return Err(invalid("port is outside of the domain"));
            }
        }

        let axis = self.axis;
        let a = axis.vector_index();
        let num_lines = grid.num_lines()[a];
        let excitation_plane = grid.snap(axis, self.start[a]);
        let measurement_plane = grid.snap(axis, self.stop[a]);
        if excitation_plane == measurement_plane {
            return Err(invalid(
                "excitation and measurement plane snap to the same grid line",
            ));
        }
        if measurement_plane == 0 || measurement_plane + 1 >= num_lines {
            return Err(invalid("measurement plane needs a grid line on either side"));
        }
        if self.excite
            && self.excitation_type == ExcitationType::H
            && excitation_plane + 1 >= num_lines
        {
            return Err(invalid("H excitation plane needs a grid line behind it"));
        }
        let direction = SignedAxis::new(axis, measurement_plane > excitation_plane);

        let mut section = CrossSection {
            axis,
            lo: Point3::origin(),
            hi: Point3::origin(),
        };
        for tangential in axis.tangential() {
            let i = tangential.vector_index();
            section.lo[i] = grid.snap(tangential, self.start[i].min(self.stop[i]));
            section.hi[i] = grid.snap(tangential, self.start[i].max(self.stop[i]));
            if section.lo[i] >= section.hi[i] {
                return Err(invalid(
                    "cross-section must span at least one cell on both tangential axes",
                ));
            }
        }

        let profile = self.mode.load(base_directory)?;
        let strider = instance.strider();
        let sign = direction.sign();

        // V = sum E * e_mode * dA
        let voltage = section
            .sample(grid, strider, &profile, Field::E, measurement_plane)
            .map(|sample| sample.weight(sample.mode * sample.area))
            .filter(|weight| weight.value != 0.0)
            .collect::<Vec<_>>();

        // I = sum H * h_mode * dA, averaged over the H planes around the
        // measurement plane
        let current = [measurement_plane - 1, measurement_plane]
            .into_iter()
            .flat_map(|plane| section.sample(grid, strider, &profile, Field::H, plane))
            .map(|sample| sample.weight(0.5 * sign * sample.mode * sample.area))
            .filter(|weight| weight.value != 0.0)
            .collect::<Vec<_>>();

        let excitation: Vec<Weight> = match (self.excite, self.excitation_type) {
            (false, _) => vec![],
            (true, ExcitationType::E) => {
                section
                    .sample(grid, strider, &profile, Field::E, excitation_plane)
                    .map(|sample| sample.weight(self.amplitude * sample.mode))
                    .filter(|weight| weight.value != 0.0)
                    .collect()
            }
            (true, ExcitationType::H) => {
                section
                    .sample(grid, strider, &profile, Field::H, excitation_plane)
                    .map(|sample| sample.weight(self.amplitude * sign * sample.mode))
                    .filter(|weight| weight.value != 0.0)
                    .collect()
            }
        };

        if voltage.is_empty() || current.is_empty() {
            return Err(invalid("mode profile vanishes on the cross-section"));
        }
        if self.excite && excitation.is_empty() {
            tracing::warn!(port = self.id, "port excitation covers no field component");
        }

        tracing::debug!(
            port = self.id,
            ?direction,
            excitation_plane,
            measurement_plane,
            num_voltage_weights = voltage.len(),
            num_current_weights = current.len(),
            num_excitation_weights = excitation.len(),
            "prepared port"
        );

        Ok(Port {
            id: self.id,
            direction,
            excite: self.excite,
            excitation_type: self.excitation_type,
            reference_impedance: self.reference_impedance().clone(),
            phase_velocity: self.phase_velocity(pulse.waveform().f0),
            voltage,
            current,
            excitation,
            pulse,
            samples: Default::default(),
        })
    }
}

/// Snapped cross-section of a port. Only the tangential components of `lo`
/// and `hi` are used.
#[derive(Clone, Copy, Debug)]
struct CrossSection {
    axis: Axis,
    lo: Point3<usize>,
    hi: Point3<usize>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Field {
    E,
    H,
}

#[derive(Clone, Copy, Debug)]
struct Sample {
    index: usize,
    component: usize,

    /// Mode profile component at the sample's location.
    mode: f64,

    /// Cross-section area represented by the sample, in m².
    area: f64,
}

impl Sample {
    fn weight(&self, value: f64) -> Weight {
        Weight {
            index: self.index,
            component: self.component,
            value,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Weight {
    index: usize,
    component: usize,
    value: f64,
}

impl CrossSection {
    /// Tangential field locations of `field` on node plane `plane`.
    ///
    /// E component `c` covers the primary edges along `c` inside the
    /// cross-section and the clipped dual edges along the other tangential
    /// axis. H is the other way around. Summing the areas of either field
    /// gives the area of the cross-section.
    fn sample<'a>(
        &'a self,
        grid: &'a Grid,
        strider: &'a Strider,
        profile: &'a ModeProfile,
        field: Field,
        plane: usize,
    ) -> impl Iterator<Item = Sample> + 'a {
        let tangential = self.axis.tangential();

        (0..2).flat_map(move |k| {
            let along = tangential[k];
            let other = tangential[1 - k];
            let (c, o) = (along.vector_index(), other.vector_index());

            let (range_c, range_o) = match field {
                Field::E => (self.lo[c]..self.hi[c], self.lo[o]..self.hi[o] + 1),
                Field::H => (self.lo[c]..self.hi[c] + 1, self.lo[o]..self.hi[o]),
            };

            range_c.flat_map(move |p_c| {
                range_o.clone().map(move |p_o| {
                    let (position_c, position_o, area) = match field {
                        Field::E => {
                            (
                                grid.dual_line(along, p_c),
                                grid.lines(other)[p_o],
                                grid.spacing(along, p_c)
                                    * clipped_dual_spacing(grid, other, p_o, self.lo[o], self.hi[o]),
                            )
                        }
                        Field::H => {
                            (
                                grid.lines(along)[p_c],
                                grid.dual_line(other, p_o),
                                clipped_dual_spacing(grid, along, p_c, self.lo[c], self.hi[c])
                                    * grid.spacing(other, p_o),
                            )
                        }
                    };

                    let (u, v) = if k == 0 {
                        (position_c, position_o)
                    }
                    else {
                        (position_o, position_c)
                    };
                    let mode = match field {
                        Field::E => profile.e_at(u, v),
                        Field::H => profile.h_at(u, v),
                    };

                    let mut point = Point3::origin();
                    point[self.axis.vector_index()] = plane;
                    point[c] = p_c;
                    point[o] = p_o;

                    Sample {
                        index: strider.index_unchecked(&point),
                        component: c,
                        mode: mode[k],
                        area,
                    }
                })
            })
        })
    }
}

/// Dual spacing around line `index` in meters, cut off at lines `lo` and `hi`.
fn clipped_dual_spacing(grid: &Grid, axis: Axis, index: usize, lo: usize, hi: usize) -> f64 {
    let lines = grid.lines(axis);
    let below = index.saturating_sub(1).max(lo);
    let above = (index + 1).min(hi);
    0.5 * (lines[above] - lines[below]) * grid.delta_unit()
}

/// A port prepared for a specific engine instance.
#[derive(Clone, Debug)]
pub struct Port {
    id: usize,
    direction: SignedAxis,
    excite: bool,
    excitation_type: ExcitationType,
    reference_impedance: Impedance,
    phase_velocity: f64,
    voltage: Vec<Weight>,
    current: Vec<Weight>,
    excitation: Vec<Weight>,
    pulse: Pulse,
    samples: PortSamples,
}

impl Port {
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn direction(&self) -> SignedAxis {
        self.direction
    }

    pub fn is_excited(&self) -> bool {
        self.excite
    }

    /// Phase velocity of the mode at the excitation's center frequency.
    pub fn phase_velocity(&self) -> f64 {
        self.phase_velocity
    }

    /// Adds the mode pattern weighted by the pulse to the pass.
    pub fn excite<Threading: LatticeForEach>(&self, pass: &mut FdtdCpuUpdatePass<'_, Threading>) {
        if self.excitation.is_empty() {
            return;
        }

        match self.excitation_type {
            ExcitationType::E => {
                let amplitude = self.pulse.value(pass.time() + pass.timestep());
                if amplitude != 0.0 {
                    for weight in &self.excitation {
                        pass.add_e_forcing(weight.index, weight.component, amplitude * weight.value);
                    }
                }
            }
            ExcitationType::H => {
                let amplitude = self.pulse.value(pass.time() + 0.5 * pass.timestep());
                if amplitude != 0.0 {
                    for weight in &self.excitation {
                        pass.add_h_forcing(weight.index, weight.component, amplitude * weight.value);
                    }
                }
            }
        }
    }

    /// Modal voltage of the current E field.
    pub fn voltage(&self, state: &FdtdCpuState) -> f64 {
        let e_field = state.e_field();
        self.voltage
            .iter()
            .map(|weight| e_field[weight.index][weight.component] * weight.value)
            .sum()
    }

    /// Modal current of the current H field, positive in the port's
    /// direction.
    pub fn current(&self, state: &FdtdCpuState) -> f64 {
        let h_field = state.h_field();
        self.current
            .iter()
            .map(|weight| h_field[weight.index][weight.component] * weight.value)
            .sum()
    }

    /// Records voltage and current after a completed step.
    pub fn measure(&mut self, state: &FdtdCpuState, timestep: f64) {
        let voltage = self.voltage(state);
        let current = self.current(state);
        self.samples.voltage.push(voltage);
        self.samples.voltage_time.push(state.time());
        self.samples.current.push(current);
        self.samples.current_time.push(state.time() - 0.5 * timestep);
    }

    pub fn samples(&self) -> &PortSamples {
        &self.samples
    }

    pub fn record(&self) -> PortRecord {
        PortRecord {
            id: self.id,
            excited: self.excite,
            direction: self.direction,
            reference_impedance: self.reference_impedance.clone(),
            samples: self.samples.clone(),
        }
    }
}

/// Time series of a port. Voltages and currents carry their own sample times,
/// since they are half a step apart.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PortSamples {
    pub voltage: Vec<f64>,
    pub voltage_time: Vec<f64>,
    pub current: Vec<f64>,
    pub current_time: Vec<f64>,
}

impl PortSamples {
    pub fn len(&self) -> usize {
        self.voltage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.voltage.is_empty()
    }
}

/// Everything post-processing needs to know about a port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortRecord {
    pub id: usize,
    pub excited: bool,
    pub direction: SignedAxis,
    pub reference_impedance: Impedance,
    pub samples: PortSamples,
}

/// Rejects duplicate ids.
pub fn validate_port_ids(ports: &[PortConfig]) -> Result<(), ConfigurationError> {
    for (i, port) in ports.iter().enumerate() {
        if ports[..i].iter().any(|other| other.id == port.id) {
            return Err(ConfigurationError::DuplicatePort { port: port.id });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use nalgebra::Point3;

    use crate::{
        axis::Axis,
        error::ConfigurationError,
        fdtd::{
            FdtdConfig,
            boundary::{
                Boundaries,
                BoundaryCondition,
            },
            cpu::{
                EngineSetup,
                FdtdCpuBackend,
                FdtdCpuInstance,
            },
        },
        geometry::Rasterizer,
        grid::Grid,
        material::{
            MaterialRegistry,
            PhysicalConstants,
        },
        port::{
            ExcitationType,
            Impedance,
            ModeProfile,
            PortConfig,
            PortSpectrum,
            spectrum::linspace,
            validate_port_ids,
        },
        source::Waveform,
    };

    /// 10 mm x 10 mm periodic cross-section, 1 mm cells along z, PML on both
    /// ends. Carries plane waves with a wave impedance of eta_0.
    fn line() -> (Grid, FdtdCpuInstance) {
        let grid = Grid::new(
            [
                vec![0.0, 10.0],
                vec![0.0, 10.0],
                (0..=300).map(|z| z as f64).collect(),
            ],
            1e-3,
        )
        .unwrap();
        let boundaries = Boundaries::default()
            .with_axis(Axis::X, [BoundaryCondition::Periodic; 2])
            .with_axis(Axis::Y, [BoundaryCondition::Periodic; 2])
            .with_axis(Axis::Z, [BoundaryCondition::pml(10); 2]);
        let registry = MaterialRegistry::new();
        let geometry = Rasterizer::new(&grid, &registry)
            .with_periodic(boundaries.periodic())
            .rasterize(&[])
            .unwrap();
        let instance = FdtdCpuBackend::single_threaded()
            .create_instance(&EngineSetup {
                config: &FdtdConfig::default(),
                grid: &grid,
                geometry: &geometry,
                boundaries: &boundaries,
                absorbers: &[],
            })
            .unwrap();
        (grid, instance)
    }

    fn plane_wave_port(id: usize, start_z: f64, stop_z: f64, excite: bool) -> PortConfig {
        // E_x with 1 / w_y, H_y with 1 / w_x: V / I = eta_0 for a square
        // cross-section
        PortConfig {
            id,
            start: Point3::new(0.0, 0.0, start_z),
            stop: Point3::new(10.0, 10.0, stop_z),
            axis: Axis::Z,
            mode: ModeProfile::uniform([100.0, 0.0], [0.0, 100.0]).into(),
            kz: 1.0,
            characteristic_impedance: Impedance::Constant(
                PhysicalConstants::SI.vacuum_impedance(),
            ),
            reference_impedance: None,
            excite,
            excitation_type: ExcitationType::E,
            amplitude: 1.0,
        }
    }

    #[test]
    fn it_measures_no_reflection_on_a_matched_line() {
        let (grid, instance) = line();
        let waveform = Waveform::new(5e9, 2.5e9);
        let pulse = waveform.pulse().unwrap();
        let mut port = plane_wave_port(1, 100.0, 150.0, true)
            .prepare(&grid, &instance, Path::new("."), pulse)
            .unwrap();
        assert!(port.direction().positive);

        let mut state = instance.create_state();
        for _ in 0..1500 {
            let mut pass = instance.begin_update(&mut state);
            port.excite(&mut pass);
            pass.finish();
            port.measure(&state, instance.timestep());
        }
        assert_eq!(port.samples().len(), 1500);

        let (start, stop) = waveform.band();
        let frequencies = linspace(start, stop, 11);
        let spectrum = PortSpectrum::new(&port.record(), instance.timestep(), &frequencies).unwrap();
        for k in 0..frequencies.len() {
            let incident = spectrum.incident[k].norm();
            let reflected = spectrum.reflected[k].norm();
            assert!(incident > 0.0);
            assert!(
                reflected < 0.01 * incident,
                "|S11| = {} at {} Hz",
                reflected / incident,
                frequencies[k]
            );
        }
    }

    #[test]
    fn it_integrates_over_the_cross_section() {
        let (grid, instance) = line();
        let port = plane_wave_port(1, 100.0, 150.0, false)
            .prepare(
                &grid,
                &instance,
                Path::new("."),
                Waveform::new(5e9, 2.5e9).pulse().unwrap(),
            )
            .unwrap();

        // a uniform E_x of 1 V/m gives 1 V / m * 100 / m * (10 mm)^2 = 0.01 V
        let mut state = instance.create_state();
        for (_, _, e) in state.e_field_mut().iter_mut(instance.strider()) {
            e.x = 1.0;
        }
        assert!((port.voltage(&state) - 0.01).abs() < 1e-12);
    }

    #[test]
    fn it_rejects_invalid_ports() {
        let (grid, instance) = line();
        let pulse = Waveform::new(5e9, 2.5e9).pulse().unwrap();
        let prepare = |config: PortConfig| {
            config.prepare(&grid, &instance, Path::new("."), pulse)
        };

        // same plane
        let config = plane_wave_port(1, 100.0, 100.2, true);
        assert!(matches!(
            prepare(config),
            Err(ConfigurationError::InvalidPort { port: 1, .. })
        ));

        // measurement on the last line
        let config = plane_wave_port(1, 100.0, 300.0, true);
        assert!(prepare(config).is_err());

        // outside of the domain
        let config = plane_wave_port(1, 100.0, 400.0, true);
        assert!(prepare(config).is_err());

        // degenerate cross-section
        let mut config = plane_wave_port(1, 100.0, 150.0, true);
        config.stop.x = 0.0;
        assert!(prepare(config).is_err());

        let mut config = plane_wave_port(1, 100.0, 150.0, true);
        config.kz = 0.0;
        assert!(prepare(config).is_err());

        let ports = [
            plane_wave_port(1, 100.0, 150.0, true),
            plane_wave_port(1, 200.0, 150.0, false),
        ];
        assert!(matches!(
            validate_port_ids(&ports),
            Err(ConfigurationError::DuplicatePort { port: 1 })
        ));
    }

    #[test]
    fn it_points_towards_the_measurement_plane() {
        let (grid, instance) = line();
        let pulse = Waveform::new(5e9, 2.5e9).pulse().unwrap();
        let port = plane_wave_port(2, 200.0, 150.0, false)
            .prepare(&grid, &instance, Path::new("."), pulse)
            .unwrap();
        assert!(!port.direction().positive);
        assert!(!port.is_excited());
    }
}
