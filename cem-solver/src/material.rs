use std::{
    collections::HashMap,
    fmt::{
        Debug,
        Display,
    },
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::error::ConfigurationError;

#[derive(Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalConstants {
    pub vacuum_permittivity: f64,
    pub vacuum_permeability: f64,
}

impl Debug for PhysicalConstants {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PhysicalConstants")
            .field("vacuum_permittivity", &self.vacuum_permittivity)
            .field("vacuum_permeability", &self.vacuum_permeability)
            .field("speed_of_light", &self.speed_of_light())
            .finish()
    }
}

impl Default for PhysicalConstants {
    fn default() -> Self {
        Self::SI
    }
}

impl PhysicalConstants {
    pub const SI: Self = Self {
        vacuum_permittivity: 8.8541878188e-12,
        vacuum_permeability: 1.25663706127e-6,
    };

    pub fn speed_of_light(&self) -> f64 {
        (self.vacuum_permittivity * self.vacuum_permeability).powf(-0.5)
    }

    /// Wave impedance of free space.
    pub fn vacuum_impedance(&self) -> f64 {
        (self.vacuum_permeability / self.vacuum_permittivity).sqrt()
    }

    pub fn frequency_to_wavelength(&self, frequency: f64) -> f64 {
        self.speed_of_light() / frequency
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Material {
    /// mu_r
    #[serde(default = "default_one")]
    pub relative_permeability: f64,
    /// sigma_m
    #[serde(default)]
    pub magnetic_conductivity: f64,

    /// epsilon_r
    #[serde(default = "default_one")]
    pub relative_permittivity: f64,
    /// sigma
    #[serde(default)]
    pub electrical_conductivity: f64,
}

impl Material {
    pub const VACUUM: Self = Self {
        relative_permeability: 1.0,
        magnetic_conductivity: 0.0,
        relative_permittivity: 1.0,
        electrical_conductivity: 0.0,
    };

    pub fn dielectric(relative_permittivity: f64) -> Self {
        Self {
            relative_permittivity,
            ..Self::VACUUM
        }
    }

    pub fn conductor(electrical_conductivity: f64) -> Self {
        Self {
            electrical_conductivity,
            ..Self::VACUUM
        }
    }

    pub fn is_lossless(&self) -> bool {
        self.electrical_conductivity == 0.0 && self.magnetic_conductivity == 0.0
    }

    fn validate(&self) -> Result<(), &'static str> {
        let values = [
            self.relative_permeability,
            self.magnetic_conductivity,
            self.relative_permittivity,
            self.electrical_conductivity,
        ];
        if values.iter().any(|value| !value.is_finite()) {
            Err("all parameters must be finite")
        }
        else if self.relative_permittivity <= 0.0 {
            Err("relative permittivity must be positive")
        }
        else if self.relative_permeability <= 0.0 {
            Err("relative permeability must be positive")
        }
        else if self.electrical_conductivity < 0.0 || self.magnetic_conductivity < 0.0 {
            Err("conductivities must not be negative")
        }
        else {
            Ok(())
        }
    }
}

impl Default for Material {
    fn default() -> Self {
        Self::VACUUM
    }
}

fn default_one() -> f64 {
    1.0
}

/// What a material tag stands for.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterialKind {
    Dielectric(Material),
    /// Perfect electric conductor
    Pec,
    /// Perfect magnetic conductor
    Pmc,
}

impl MaterialKind {
    /// The constitutive parameters used for volume averaging.
    ///
    /// Perfect conductors are handled through flags and contribute vacuum here.
    pub fn material(&self) -> Material {
        match self {
            MaterialKind::Dielectric(material) => *material,
            MaterialKind::Pec | MaterialKind::Pmc => Material::VACUUM,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaterialTag(String);

impl MaterialTag {
    pub fn new(tag: impl AsRef<str>) -> Self {
        Self(tag.as_ref().to_owned())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for MaterialTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for MaterialTag {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Maps material tags to validated descriptors.
#[derive(Clone, Debug, Default)]
pub struct MaterialRegistry {
    materials: HashMap<MaterialTag, MaterialKind>,
}

impl MaterialRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &mut self,
        tag: impl Into<MaterialTag>,
        kind: MaterialKind,
    ) -> Result<MaterialTag, ConfigurationError> {
        let tag = tag.into();

        if self.materials.contains_key(&tag) {
            return Err(ConfigurationError::DuplicateMaterial { tag });
        }

        if let MaterialKind::Dielectric(material) = &kind {
            material
                .validate()
                .map_err(|reason| {
                    ConfigurationError::InvalidMaterial {
                        tag: tag.clone(),
                        reason,
                    }
                })?;
        }

        tracing::trace!(%tag, ?kind, "registered material");
        self.materials.insert(tag.clone(), kind);

        Ok(tag)
    }

    pub fn get(&self, tag: &MaterialTag) -> Result<&MaterialKind, ConfigurationError> {
        self.materials
            .get(tag)
            .ok_or_else(|| ConfigurationError::UnknownMaterial { tag: tag.clone() })
    }

    pub fn contains(&self, tag: &MaterialTag) -> bool {
        self.materials.contains_key(tag)
    }

    pub fn len(&self) -> usize {
        self.materials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.materials.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        error::ConfigurationError,
        material::{
            Material,
            MaterialKind,
            MaterialRegistry,
            MaterialTag,
            PhysicalConstants,
        },
    };

    #[test]
    fn it_computes_speed_of_light() {
        let c = PhysicalConstants::SI.speed_of_light();
        assert!((c - 299_792_458.0).abs() < 1.0);
        let eta = PhysicalConstants::SI.vacuum_impedance();
        assert!((eta - 376.73).abs() < 0.01);
    }

    #[test]
    fn it_registers_and_looks_up_materials() {
        let mut registry = MaterialRegistry::new();
        let fr4 = registry
            .register("FR4", MaterialKind::Dielectric(Material::dielectric(4.5)))
            .unwrap();
        registry.register("PEC", MaterialKind::Pec).unwrap();

        assert_eq!(registry.len(), 2);
        assert_eq!(
            registry.get(&fr4).unwrap().material().relative_permittivity,
            4.5
        );
        assert!(matches!(
            registry.get(&MaterialTag::new("cu")),
            Err(ConfigurationError::UnknownMaterial { .. })
        ));
    }

    #[test]
    fn it_rejects_duplicates_and_invalid_materials() {
        let mut registry = MaterialRegistry::new();
        registry.register("PEC", MaterialKind::Pec).unwrap();
        assert!(matches!(
            registry.register("PEC", MaterialKind::Pmc),
            Err(ConfigurationError::DuplicateMaterial { .. })
        ));

        for material in [
            Material::dielectric(0.0),
            Material::dielectric(f64::NAN),
            Material::conductor(-1.0),
            Material {
                relative_permeability: -2.0,
                ..Material::VACUUM
            },
        ] {
            assert!(matches!(
                registry.register("bad", MaterialKind::Dielectric(material)),
                Err(ConfigurationError::InvalidMaterial { .. })
            ));
        }
        assert!(!registry.contains(&MaterialTag::new("bad")));
    }
}
