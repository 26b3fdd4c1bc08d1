use crate::{
    fdtd::cpu::{
        FdtdCpuInstance,
        FdtdCpuState,
        LatticeForEach,
        SingleThreaded,
    },
    geometry::RasterReport,
    grid::Grid,
    port::{
        Port,
        PortRecord,
    },
    source::{
        PreparedSoftSource,
        Waveform,
    },
};

/// Everything a run needs, owned in one place.
///
/// The field state belongs to the simulation. Ports and sources only read or
/// force it through the engine's update pass.
#[derive(Debug)]
pub struct Simulation<Threading = SingleThreaded> {
    grid: Grid,
    raster_report: RasterReport,
    instance: FdtdCpuInstance<Threading>,
    state: FdtdCpuState,
    ports: Vec<Port>,
    sources: Vec<PreparedSoftSource>,
    waveform: Waveform,
}

impl<Threading> Simulation<Threading> {
    pub fn new(
        grid: Grid,
        raster_report: RasterReport,
        instance: FdtdCpuInstance<Threading>,
        ports: Vec<Port>,
        sources: Vec<PreparedSoftSource>,
        waveform: Waveform,
    ) -> Self {
        let state = instance.create_state();
        Self {
            grid,
            raster_report,
            instance,
            state,
            ports,
            sources,
            waveform,
        }
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn raster_report(&self) -> &RasterReport {
        &self.raster_report
    }

    pub fn instance(&self) -> &FdtdCpuInstance<Threading> {
        &self.instance
    }

    pub fn state(&self) -> &FdtdCpuState {
        &self.state
    }

    pub fn ports(&self) -> &[Port] {
        &self.ports
    }

    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    pub fn tick(&self) -> usize {
        self.state.tick()
    }

    pub fn time(&self) -> f64 {
        self.state.time()
    }

    pub fn timestep(&self) -> f64 {
        self.instance.timestep()
    }

    /// Time after which no port or source injects anything.
    pub fn excitation_duration(&self) -> f64 {
        let ports = self
            .ports
            .iter()
            .any(|port| port.is_excited())
            .then(|| self.waveform.duration());
        self.sources
            .iter()
            .map(|source| source.pulse().duration())
            .chain(ports)
            .fold(0.0, f64::max)
    }

    pub fn energy(&self) -> f64 {
        self.instance.energy(&self.state)
    }

    pub fn port_records(&self) -> Vec<PortRecord> {
        self.ports.iter().map(|port| port.record()).collect()
    }
}

impl<Threading> Simulation<Threading>
where
    Threading: LatticeForEach,
{
    /// Advances the fields by one timestep and samples all ports.
    pub fn step(&mut self) {
        let mut pass = self.instance.begin_update(&mut self.state);
        for port in &self.ports {
            port.excite(&mut pass);
        }
        for source in &self.sources {
            source.apply(&mut pass);
        }
        pass.finish();

        let timestep = self.instance.timestep();
        for port in &mut self.ports {
            port.measure(&self.state, timestep);
        }
    }
}
