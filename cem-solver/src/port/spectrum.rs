use std::f64::consts::PI;

use num::complex::Complex64;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::ConfigurationError,
    port::PortRecord,
};

/// `num` evenly spaced values from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, num: usize) -> Vec<f64> {
    match num {
        0 => vec![],
        1 => vec![start],
        _ => {
            let step = (stop - start) / (num - 1) as f64;
            (0..num)
                .map(|i| {
                    if i + 1 == num {
                        stop
                    }
                    else {
                        start + step * i as f64
                    }
                })
                .collect()
        }
    }
}

/// Discrete time Fourier transform at arbitrary frequencies.
///
/// `X(f) = dt * sum x_n exp(-i 2 pi f t_n)`, with the exact sample times
/// `t_n`.
pub fn dft(samples: &[f64], times: &[f64], timestep: f64, frequencies: &[f64]) -> Vec<Complex64> {
    frequencies
        .iter()
        .map(|frequency| {
            let omega = 2.0 * PI * frequency;
            samples
                .iter()
                .zip(times)
                .map(|(x, t)| *x * Complex64::from_polar(1.0, -omega * t))
                .sum::<Complex64>()
                * timestep
        })
        .collect()
}

/// An impedance in ohms, either constant or given per frequency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Impedance {
    Constant(f64),
    PerFrequency(Vec<Complex64>),
}

impl Impedance {
    pub fn validate(&self) -> Result<(), &'static str> {
        let valid = |z: &Complex64| z.re.is_finite() && z.im.is_finite() && z.norm() > 0.0;
        match self {
            Impedance::Constant(z) if !valid(&Complex64::new(*z, 0.0)) => {
                Err("impedance must be finite and non-zero")
            }
            Impedance::PerFrequency(values) if !values.iter().all(valid) => {
                Err("impedance must be finite and non-zero")
            }
            _ => Ok(()),
        }
    }

    /// The impedance at each of `num_frequencies` frequencies.
    pub fn values(&self, num_frequencies: usize) -> Result<Vec<Complex64>, ConfigurationError> {
        match self {
            Impedance::Constant(z) => Ok(vec![Complex64::new(*z, 0.0); num_frequencies]),
            Impedance::PerFrequency(values) => {
                if values.len() == num_frequencies {
                    Ok(values.clone())
                }
                else {
                    Err(ConfigurationError::FrequencyAxisMismatch)
                }
            }
        }
    }
}

/// Incident and reflected wave amplitudes.
///
/// `incident = (V + Z I) / (2 sqrt|Z|)` and
/// `reflected = (V - Z I) / (2 sqrt|Z|)`.
pub fn decompose(
    voltage: &[Complex64],
    current: &[Complex64],
    impedance: &[Complex64],
) -> (Vec<Complex64>, Vec<Complex64>) {
    voltage
        .iter()
        .zip(current)
        .zip(impedance)
        .map(|((v, i), z)| {
            let scale = 2.0 * z.norm().sqrt();
            ((v + z * i) / scale, (v - z * i) / scale)
        })
        .unzip()
}

/// Frequency domain view of one port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PortSpectrum {
    pub id: usize,
    pub excited: bool,
    pub frequencies: Vec<f64>,
    pub voltage: Vec<Complex64>,
    pub current: Vec<Complex64>,
    pub impedance: Vec<Complex64>,
    pub incident: Vec<Complex64>,
    pub reflected: Vec<Complex64>,
}

impl PortSpectrum {
    pub fn new(
        record: &PortRecord,
        timestep: f64,
        frequencies: &[f64],
    ) -> Result<Self, ConfigurationError> {
        let samples = &record.samples;
        if samples.voltage.len() != samples.voltage_time.len()
            || samples.current.len() != samples.current_time.len()
        {
            return Err(ConfigurationError::InvalidPort {
                port: record.id,
                reason: "sample times don't match the samples".to_owned(),
            });
        }

        let voltage = dft(&samples.voltage, &samples.voltage_time, timestep, frequencies);
        let current = dft(&samples.current, &samples.current_time, timestep, frequencies);
        let impedance = record.reference_impedance.values(frequencies.len())?;
        let (incident, reflected) = decompose(&voltage, &current, &impedance);

        Ok(Self {
            id: record.id,
            excited: record.excited,
            frequencies: frequencies.to_vec(),
            voltage,
            current,
            impedance,
            incident,
            reflected,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::f64::consts::PI;

    use num::complex::Complex64;

    use crate::{
        axis::{
            Axis,
            SignedAxis,
        },
        error::ConfigurationError,
        port::{
            PortRecord,
            PortSamples,
            spectrum::{
                Impedance,
                PortSpectrum,
                decompose,
                dft,
                linspace,
            },
        },
        source::Waveform,
    };

    #[test]
    fn it_spaces_frequencies_linearly() {
        assert_eq!(linspace(1.0, 2.0, 5), vec![1.0, 1.25, 1.5, 1.75, 2.0]);
        assert_eq!(linspace(1.0, 2.0, 1), vec![1.0]);
        assert!(linspace(1.0, 2.0, 0).is_empty());
    }

    #[test]
    fn it_transforms_a_delayed_impulse() {
        let spectrum = dft(&[0.0, 2.0, 0.0], &[0.0, 0.5, 1.0], 0.1, &[0.0, 0.5, 1.0]);
        // 0.1 * 2 * exp(-i 2 pi f 0.5)
        assert!((spectrum[0] - Complex64::new(0.2, 0.0)).norm() < 1e-12);
        assert!((spectrum[1] - Complex64::new(0.0, -0.2)).norm() < 1e-12);
        assert!((spectrum[2] - Complex64::new(-0.2, 0.0)).norm() < 1e-12);
    }

    /// Samples a travelling wave the way the engine does: V at integer, I at
    /// half integer steps.
    fn record(impedance: f64, reflection: f64, delay: f64) -> (PortRecord, f64, Waveform) {
        let waveform = Waveform::new(1e9, 0.5e9);
        let pulse = waveform.pulse().unwrap();
        let timestep = 2e-12;
        let num_steps = 6000;

        let mut samples = PortSamples::default();
        for n in 0..num_steps {
            let t = (n + 1) as f64 * timestep;
            samples.voltage_time.push(t);
            samples
                .voltage
                .push(pulse.value(t) + reflection * pulse.value(t - delay));

            let t = (n as f64 + 0.5) * timestep;
            samples.current_time.push(t);
            samples
                .current
                .push((pulse.value(t) - reflection * pulse.value(t - delay)) / impedance);
        }

        let record = PortRecord {
            id: 1,
            excited: true,
            direction: SignedAxis::new(Axis::Z, true),
            reference_impedance: Impedance::Constant(impedance),
            samples,
        };
        (record, timestep, waveform)
    }

    #[test]
    fn it_decomposes_an_incident_wave() {
        let (record, timestep, waveform) = record(50.0, 0.0, 0.0);
        let (start, stop) = waveform.band();
        let frequencies = linspace(start, stop, 11);
        let spectrum = PortSpectrum::new(&record, timestep, &frequencies).unwrap();

        let voltage = dft(
            &record.samples.voltage,
            &record.samples.voltage_time,
            timestep,
            &frequencies,
        );
        for k in 0..frequencies.len() {
            let expected = voltage[k] / 50f64.sqrt();
            assert!((spectrum.incident[k] - expected).norm() < 0.01 * expected.norm());
            assert!(spectrum.reflected[k].norm() < 0.01 * spectrum.incident[k].norm());
        }
    }

    #[test]
    fn it_recovers_a_delayed_reflection() {
        let delay = 1.5e-9;
        let (record, timestep, waveform) = record(75.0, 0.3, delay);
        let (start, stop) = waveform.band();
        let frequencies = linspace(start, stop, 11);
        let spectrum = PortSpectrum::new(&record, timestep, &frequencies).unwrap();

        for (k, frequency) in frequencies.iter().enumerate() {
            let gamma = spectrum.reflected[k] / spectrum.incident[k];
            let expected = 0.3 * Complex64::from_polar(1.0, -2.0 * PI * frequency * delay);
            assert!((gamma - expected).norm() < 0.01, "{gamma} != {expected}");
        }
    }

    #[test]
    fn it_uses_the_exact_decomposition() {
        let v = [Complex64::new(3.0, 1.0)];
        let i = [Complex64::new(0.5, -0.5)];
        let z = [Complex64::new(4.0, 0.0)];
        let (incident, reflected) = decompose(&v, &i, &z);
        assert_eq!(incident[0], Complex64::new(5.0, -1.0) / 4.0);
        assert_eq!(reflected[0], Complex64::new(1.0, 3.0) / 4.0);
    }

    #[test]
    fn it_checks_per_frequency_impedances() {
        let impedance = Impedance::PerFrequency(vec![Complex64::new(50.0, 0.0); 3]);
        assert_eq!(impedance.values(3).unwrap().len(), 3);
        assert!(matches!(
            impedance.values(4),
            Err(ConfigurationError::FrequencyAxisMismatch)
        ));
        assert!(Impedance::Constant(0.0).validate().is_err());
        assert!(Impedance::Constant(50.0).validate().is_ok());
    }
}
