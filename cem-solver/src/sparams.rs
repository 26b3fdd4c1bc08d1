//! Scattering parameters from port spectra.

use num::complex::Complex64;
use serde::{
    Deserialize,
    Serialize,
};

use crate::{
    error::ConfigurationError,
    port::{
        PortRecord,
        PortSpectrum,
    },
};

/// One column of the scattering matrix: every port's response to the excited
/// port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SParameters {
    pub frequencies: Vec<f64>,
    pub excited_port: usize,
    pub entries: Vec<SParameter>,
}

/// `S[port][excited_port]` over frequency.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SParameter {
    pub port: usize,
    pub excited_port: usize,
    pub values: Vec<Complex64>,
}

impl SParameter {
    /// `20 log10 |S|`
    pub fn magnitude_db(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|value| 20.0 * value.norm().log10())
            .collect()
    }

    /// Phase in degrees.
    pub fn phase_deg(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|value| value.arg().to_degrees())
            .collect()
    }
}

impl SParameters {
    /// `S[i][j] = reflected_i / incident_j`, with `j` the only excited port.
    pub fn extract(spectra: &[PortSpectrum]) -> Result<Self, ConfigurationError> {
        let mut excited = spectra.iter().filter(|spectrum| spectrum.excited);
        let excited_spectrum = match (excited.next(), excited.next()) {
            (Some(spectrum), None) => spectrum,
            _ => {
                return Err(ConfigurationError::ExcitedPortCount {
                    num_excited: spectra.iter().filter(|spectrum| spectrum.excited).count(),
                });
            }
        };

        let frequencies = &excited_spectrum.frequencies;
        if spectra
            .iter()
            .any(|spectrum| &spectrum.frequencies != frequencies)
        {
            return Err(ConfigurationError::FrequencyAxisMismatch);
        }

        if excited_spectrum
            .incident
            .iter()
            .any(|incident| incident.norm() == 0.0)
        {
            tracing::warn!(
                port = excited_spectrum.id,
                "incident wave vanishes at some frequencies, S-parameters will be infinite there"
            );
        }

        let entries = spectra
            .iter()
            .map(|spectrum| {
                SParameter {
                    port: spectrum.id,
                    excited_port: excited_spectrum.id,
                    values: spectrum
                        .reflected
                        .iter()
                        .zip(&excited_spectrum.incident)
                        .map(|(reflected, incident)| reflected / incident)
                        .collect(),
                }
            })
            .collect();

        Ok(Self {
            frequencies: frequencies.clone(),
            excited_port: excited_spectrum.id,
            entries,
        })
    }

    /// Transforms the port records and extracts the S-parameters.
    pub fn from_records(
        records: &[PortRecord],
        timestep: f64,
        frequencies: &[f64],
    ) -> Result<(Vec<PortSpectrum>, Self), ConfigurationError> {
        let spectra = records
            .iter()
            .map(|record| PortSpectrum::new(record, timestep, frequencies))
            .collect::<Result<Vec<_>, _>>()?;
        let s_parameters = Self::extract(&spectra)?;
        Ok((spectra, s_parameters))
    }

    pub fn get(&self, port: usize) -> Option<&SParameter> {
        self.entries.iter().find(|entry| entry.port == port)
    }

    /// Frequency in Hz, then magnitude in dB and phase in degrees for every
    /// entry.
    pub fn to_csv(&self) -> String {
        let mut csv = String::from("frequency");
        for entry in &self.entries {
            let name = format!("s{}{}", entry.port, entry.excited_port);
            csv.push_str(&format!(",{name}_db,{name}_deg"));
        }
        csv.push('\n');

        let columns = self
            .entries
            .iter()
            .map(|entry| (entry.magnitude_db(), entry.phase_deg()))
            .collect::<Vec<_>>();
        for (k, frequency) in self.frequencies.iter().enumerate() {
            csv.push_str(&format!("{frequency:e}"));
            for (db, deg) in &columns {
                csv.push_str(&format!(",{},{}", db[k], deg[k]));
            }
            csv.push('\n');
        }

        csv
    }
}
