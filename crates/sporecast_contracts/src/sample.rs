#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_id;
use crate::hardware::HardwareId;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const SAMPLE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SampleId(String);

impl SampleId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for SampleId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("sample_id", &self.0, 96)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Device {
    Swab,
    Wipe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    PuritanCotton,
    NylonFlocked,
    CopanPolyester,
    CopanCotton,
    Tx3211,
    Tx3224,
}

impl DeviceType {
    /// The device family this type belongs to. A sample whose device and
    /// device type disagree cannot resolve a recovery efficiency.
    pub fn family(self) -> Device {
        match self {
            DeviceType::PuritanCotton
            | DeviceType::NylonFlocked
            | DeviceType::CopanPolyester
            | DeviceType::CopanCotton => Device::Swab,
            DeviceType::Tx3211 | DeviceType::Tx3224 => Device::Wipe,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Technique {
    NasaStandard,
    NasaStandardMembraneFiltration,
    EsaStandard,
    EsaStandardMembraneFiltration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ControlType {
    NotControl,
    FacilityControl,
    NegativeControl,
    PositiveControl,
    FieldControl,
    OtherControl,
}

impl Default for ControlType {
    fn default() -> Self {
        ControlType::NotControl
    }
}

/// Annotation fields with no effect on computation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleMetadata {
    pub assay_name: Option<String>,
    pub assay_date: Option<String>,
    pub cert_number: Option<String>,
    pub control_type: ControlType,
    pub notes: Option<String>,
}

/// One physical swab/wipe sampling event against a Sampled component.
///
/// Range validity of extent/fraction is judged by the eligibility rules so
/// that out-of-range rows can sit in the store flagged invalid rather than be
/// rejected outright.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub schema_version: SchemaVersion,
    pub id: SampleId,
    pub hardware_id: HardwareId,
    pub accountable: bool,
    pub extent_sampled: f64,
    pub device: Device,
    pub device_type: DeviceType,
    pub technique: Technique,
    pub pour_fraction: f64,
    pub cfu: u32,
    pub metadata: SampleMetadata,
}

impl Sample {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        id: SampleId,
        hardware_id: HardwareId,
        accountable: bool,
        extent_sampled: f64,
        device: Device,
        device_type: DeviceType,
        technique: Technique,
        pour_fraction: f64,
        cfu: u32,
        metadata: SampleMetadata,
    ) -> Result<Self, ContractViolation> {
        let s = Self {
            schema_version: SAMPLE_CONTRACT_VERSION,
            id,
            hardware_id,
            accountable,
            extent_sampled,
            device,
            device_type,
            technique,
            pour_fraction,
            cfu,
            metadata,
        };
        s.validate()?;
        Ok(s)
    }

    /// Plated exposure for the likelihood: sampled extent scaled by the
    /// fraction of the rinse solution actually poured.
    pub fn exposure(&self) -> f64 {
        self.extent_sampled * self.pour_fraction
    }
}

impl Validate for Sample {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        self.hardware_id.validate()?;
        if !self.extent_sampled.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "sample.extent_sampled",
            });
        }
        if !self.pour_fraction.is_finite() {
            return Err(ContractViolation::NotFinite {
                field: "sample.pour_fraction",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_sample_01_device_type_families() {
        assert_eq!(DeviceType::PuritanCotton.family(), Device::Swab);
        assert_eq!(DeviceType::NylonFlocked.family(), Device::Swab);
        assert_eq!(DeviceType::Tx3211.family(), Device::Wipe);
        assert_eq!(DeviceType::Tx3224.family(), Device::Wipe);
    }

    #[test]
    fn at_sample_02_exposure_is_extent_times_fraction() {
        let s = Sample::v1(
            SampleId::new("s1").unwrap(),
            HardwareId::new("hga").unwrap(),
            true,
            0.1,
            Device::Swab,
            DeviceType::PuritanCotton,
            Technique::NasaStandard,
            0.8,
            3,
            SampleMetadata::default(),
        )
        .unwrap();
        assert!((s.exposure() - 0.08).abs() < 1e-12);
    }

    #[test]
    fn at_sample_03_non_finite_fields_are_rejected() {
        let r = Sample::v1(
            SampleId::new("s1").unwrap(),
            HardwareId::new("hga").unwrap(),
            true,
            f64::INFINITY,
            Device::Swab,
            DeviceType::PuritanCotton,
            Technique::NasaStandard,
            0.8,
            3,
            SampleMetadata::default(),
        );
        assert!(r.is_err());
    }
}
