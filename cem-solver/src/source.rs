//! Excitation waveforms and plain soft sources.

use std::f64::consts::PI;

use nalgebra::{
    Point3,
    Vector3,
};
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    axis::Axis,
    error::ConfigurationError,
    fdtd::cpu::{
        FdtdCpuInstance,
        FdtdCpuUpdatePass,
        LatticeForEach,
    },
    grid::Grid,
};

/// A Gaussian pulse modulated onto a carrier.
///
/// `f0` is the center frequency and `fc` the half bandwidth of the pulse, both
/// in Hz. The pulse starts at `t = 0` and is cut off after `2 * delay()`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Waveform {
    pub f0: f64,
    pub fc: f64,

    #[serde(default)]
    pub shape: PulseShape,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulseShape {
    /// `exp(-((t - t0) / tau)^2) * cos(2 pi f0 (t - t0))`
    Gaussian,

    /// Time derivative of the Gaussian, normalized to unit peak. Has no DC
    /// content.
    #[default]
    GaussianDerivative,
}

impl Waveform {
    pub fn new(f0: f64, fc: f64) -> Self {
        Self {
            f0,
            fc,
            shape: Default::default(),
        }
    }

    pub fn with_shape(mut self, shape: PulseShape) -> Self {
        self.shape = shape;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(self.fc.is_finite() && self.fc > 0.0) {
            Err(ConfigurationError::InvalidExcitation {
                reason: "cutoff frequency must be positive",
            })
        }
        else if !(self.f0.is_finite() && self.f0 >= 0.0) {
            Err(ConfigurationError::InvalidExcitation {
                reason: "center frequency must not be negative",
            })
        }
        else {
            Ok(())
        }
    }

    /// Width of the Gaussian envelope.
    pub fn tau(&self) -> f64 {
        3.0 / (2.0 * PI * self.fc)
    }

    /// Time of the envelope's peak.
    pub fn delay(&self) -> f64 {
        3.0 * self.tau()
    }

    /// Time after which the pulse is 0.
    pub fn duration(&self) -> f64 {
        2.0 * self.delay()
    }

    /// Frequency band `[f0 - fc, f0 + fc]`, clamped at 0.
    pub fn band(&self) -> (f64, f64) {
        ((self.f0 - self.fc).max(0.0), self.f0 + self.fc)
    }

    /// Precomputes the normalization.
    pub fn pulse(&self) -> Result<Pulse, ConfigurationError> {
        self.validate()?;

        let mut pulse = Pulse {
            waveform: *self,
            tau: self.tau(),
            delay: self.delay(),
            norm: 1.0,
        };

        if self.shape == PulseShape::GaussianDerivative {
            const NUM_SAMPLES: usize = 8192;
            let duration = self.duration();
            let peak = (0..=NUM_SAMPLES)
                .map(|i| pulse.raw(duration * i as f64 / NUM_SAMPLES as f64).abs())
                .fold(0.0, f64::max);
            pulse.norm = peak.recip();
        }

        Ok(pulse)
    }
}

/// A validated [`Waveform`] that can be evaluated.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Pulse {
    waveform: Waveform,
    tau: f64,
    delay: f64,
    norm: f64,
}

impl Pulse {
    pub fn waveform(&self) -> &Waveform {
        &self.waveform
    }

    pub fn duration(&self) -> f64 {
        2.0 * self.delay
    }

    pub fn value(&self, time: f64) -> f64 {
        if time < 0.0 || time > self.duration() {
            0.0
        }
        else {
            self.norm * self.raw(time)
        }
    }

    fn raw(&self, time: f64) -> f64 {
        let t = time - self.delay;
        let u = t / self.tau;
        let envelope = (-u * u).exp();
        let phase = 2.0 * PI * self.waveform.f0 * t;

        match self.waveform.shape {
            PulseShape::Gaussian => envelope * phase.cos(),
            PulseShape::GaussianDerivative => {
                -envelope
                    * (2.0 * u / self.tau * phase.cos()
                        + 2.0 * PI * self.waveform.f0 * phase.sin())
            }
        }
    }
}

/// Kind of current a [`SoftSource`] impresses.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CurrentKind {
    /// Current density `J` in A/m², acts on E.
    #[default]
    Electric,

    /// Current density `M` in V/m², acts on H.
    Magnetic,
}

/// Impressed current density in a box, driven by the excitation waveform.
///
/// Degenerate boxes are fine: a box with zero extent along an axis still
/// covers one edge along it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SoftSource {
    pub start: Point3<f64>,
    pub stop: Point3<f64>,

    #[serde(default)]
    pub kind: CurrentKind,

    /// Direction and peak current density.
    pub polarization: Vector3<f64>,
}

impl SoftSource {
    pub fn prepare<Threading>(
        &self,
        grid: &Grid,
        instance: &FdtdCpuInstance<Threading>,
        pulse: Pulse,
    ) -> Result<PreparedSoftSource, ConfigurationError> {
        if self.polarization.iter().any(|value| !value.is_finite()) {
            return Err(ConfigurationError::InvalidExcitation {
                reason: "source polarization must be finite",
            });
        }

        let mut lo = Point3::origin();
        let mut hi = Point3::origin();
        for axis in Axis::ALL {
            let i = axis.vector_index();
            let min = self.start[i].min(self.stop[i]);
            let max = self.start[i].max(self.stop[i]);
            if !grid.contains(axis, min) || !grid.contains(axis, max) {
                return Err(ConfigurationError::InvalidExcitation {
                    reason: "source is outside of the domain",
                });
            }
            lo[i] = grid.snap(axis, min);
            hi[i] = grid.snap(axis, max);
        }

        let strider = instance.strider();
        let coefficients = instance.update_coefficients();
        let num_lines = grid.num_lines();
        let mut targets = vec![];

        for c in 0..3 {
            let polarization = self.polarization[c];
            if polarization == 0.0 {
                continue;
            }

            // at least one edge along c
            let mut end = hi + Vector3::repeat(1);
            end[c] = hi[c].max(lo[c] + 1).min(num_lines[c]);
            let start = {
                let mut start = lo;
                start[c] = start[c].min(end[c].saturating_sub(1));
                start
            };

            for (index, _) in strider.iter(start..end) {
                let coefficients = &coefficients[index];
                let value = match self.kind {
                    CurrentKind::Electric => -coefficients.e_b[c] * polarization,
                    CurrentKind::Magnetic => -coefficients.h_b[c] * polarization,
                };
                if value != 0.0 {
                    targets.push((index, c, value));
                }
            }
        }

        if targets.is_empty() {
            tracing::warn!(
                start = ?self.start,
                stop = ?self.stop,
                "soft source covers no active field component"
            );
        }

        Ok(PreparedSoftSource {
            kind: self.kind,
            targets,
            pulse,
        })
    }
}

#[derive(Clone, Debug)]
pub struct PreparedSoftSource {
    kind: CurrentKind,
    targets: Vec<(usize, usize, f64)>,
    pulse: Pulse,
}

impl PreparedSoftSource {
    pub fn apply<Threading: LatticeForEach>(&self, pass: &mut FdtdCpuUpdatePass<'_, Threading>) {
        match self.kind {
            CurrentKind::Electric => {
                let amplitude = self.pulse.value(pass.time() + pass.timestep());
                if amplitude != 0.0 {
                    for (index, component, weight) in &self.targets {
                        pass.add_e_forcing(*index, *component, amplitude * weight);
                    }
                }
            }
            CurrentKind::Magnetic => {
                let amplitude = self.pulse.value(pass.time() + 0.5 * pass.timestep());
                if amplitude != 0.0 {
                    for (index, component, weight) in &self.targets {
                        pass.add_h_forcing(*index, *component, amplitude * weight);
                    }
                }
            }
        }
    }

    pub fn num_targets(&self) -> usize {
        self.targets.len()
    }

    pub fn pulse(&self) -> &Pulse {
        &self.pulse
    }
}

#[cfg(test)]
mod tests {
    use crate::source::{
        PulseShape,
        Waveform,
    };

    #[test]
    fn it_normalizes_the_gaussian_derivative() {
        let pulse = Waveform::new(2e9, 1e9).pulse().unwrap();
        let duration = pulse.duration();
        let peak = (0..10_000)
            .map(|i| pulse.value(duration * i as f64 / 10_000.0).abs())
            .fold(0.0, f64::max);
        assert!((peak - 1.0).abs() < 1e-3, "peak: {peak}");
    }

    #[test]
    fn it_has_finite_support() {
        let waveform = Waveform::new(2e9, 1e9).with_shape(PulseShape::Gaussian);
        let pulse = waveform.pulse().unwrap();
        assert_eq!(pulse.value(-1e-12), 0.0);
        assert_eq!(pulse.value(waveform.duration() + 1e-12), 0.0);
        assert_eq!(pulse.value(waveform.delay()), 1.0);

        // 3 tau from the peak the envelope is exp(-9)
        assert!(pulse.value(0.0).abs() < 2e-4);
    }

    #[test]
    fn it_rejects_invalid_waveforms() {
        assert!(Waveform::new(1e9, 0.0).pulse().is_err());
        assert!(Waveform::new(-1.0, 1e9).pulse().is_err());
        assert!(Waveform::new(f64::NAN, 1e9).validate().is_err());
    }
}
