#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};

use crate::common::validate_id;
use crate::{ContractViolation, SchemaVersion, Validate};

pub const HARDWARE_CONTRACT_VERSION: SchemaVersion = SchemaVersion(1);

/// Deepest level the hierarchy supports; level 1 is the implicit project root.
pub const MAX_HARDWARE_LEVEL: u8 = 6;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct HardwareId(String);

impl HardwareId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for HardwareId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("hardware_id", &self.0, 96)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnalogId(String);

impl AnalogId {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for AnalogId {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("analog_id", &self.0, 96)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct GroupTag(String);

impl GroupTag {
    pub fn new(v: impl Into<String>) -> Result<Self, ContractViolation> {
        let v = Self(v.into());
        v.validate()?;
        Ok(v)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Validate for GroupTag {
    fn validate(&self) -> Result<(), ContractViolation> {
        validate_id("group_tag", &self.0, 96)
    }
}

/// Geometry dimension of a component: surface area in m² or enclosed volume in cm³.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Area,
    Volume,
}

impl Dimension {
    pub fn as_str(self) -> &'static str {
        match self {
            Dimension::Area => "2D (Area)",
            Dimension::Volume => "3D (Volume)",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HardwareKind {
    Rollup,
    Sampled,
    ImpliedUnsampled,
    SpecUnsampled,
}

impl HardwareKind {
    pub fn is_component(self) -> bool {
        self != HardwareKind::Rollup
    }
}

/// Prior selection for a Sampled component: a named analog from the prior
/// catalog, or the noninformative (Jeffreys) generic prior.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AnalogyRef {
    Generic,
    Named(AnalogId),
}

impl AnalogyRef {
    pub fn is_generic(&self) -> bool {
        matches!(self, AnalogyRef::Generic)
    }
}

/// NASA-STD-8719.27 facility classes carrying fixed bioburden densities.
/// Eight surface classes, three encapsulated-volume classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpecClass {
    SurfaceIso7BioControl,
    SurfaceIso7ParticleControl,
    SurfaceIso8BioControl,
    SurfaceIso8ParticleControl,
    SurfaceUncontrolled,
    EnclosedCleanroomParticleBioControl,
    EnclosedCleanroomParticleControlOnly,
    EnclosedUncontrolledManufacturing,
    EncapsulatedElectronicsPieceParts,
    EncapsulatedNonMetalAvg,
    EncapsulatedNonMetalOther,
}

impl SpecClass {
    pub fn dimension(self) -> Dimension {
        match self {
            SpecClass::SurfaceIso7BioControl
            | SpecClass::SurfaceIso7ParticleControl
            | SpecClass::SurfaceIso8BioControl
            | SpecClass::SurfaceIso8ParticleControl
            | SpecClass::SurfaceUncontrolled
            | SpecClass::EnclosedCleanroomParticleBioControl
            | SpecClass::EnclosedCleanroomParticleControlOnly
            | SpecClass::EnclosedUncontrolledManufacturing => Dimension::Area,
            SpecClass::EncapsulatedElectronicsPieceParts
            | SpecClass::EncapsulatedNonMetalAvg
            | SpecClass::EncapsulatedNonMetalOther => Dimension::Volume,
        }
    }
}

/// Annotation fields tracked per element. None of these influence
/// computation; edits touching only these fields are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HardwareMetadata {
    pub handling: Option<String>,
    pub ventilation: Option<String>,
    pub composition: Option<String>,
    pub cleaning_fabrication: Option<String>,
    pub cleaning_pre_integration: Option<String>,
    pub cleaning_integration: Option<String>,
    pub reduction_fabrication: Option<f64>,
    pub reduction_pre_integration: Option<f64>,
    pub reduction_integration: Option<f64>,
    pub notes: Option<String>,
}

/// One node of the hardware hierarchy. Component-only fields are optional so
/// partially configured elements can exist in the store; completeness is
/// judged by the eligibility rules, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareElement {
    pub schema_version: SchemaVersion,
    pub id: HardwareId,
    pub parent_id: Option<HardwareId>,
    pub level: u8,
    pub kind: HardwareKind,
    pub dimension: Option<Dimension>,
    pub extent: Option<f64>,
    pub analogy: Option<AnalogyRef>,
    pub implied_link: Option<HardwareId>,
    pub spec_class: Option<SpecClass>,
    pub group: Option<GroupTag>,
    pub metadata: HardwareMetadata,
}

impl HardwareElement {
    #[allow(clippy::too_many_arguments)]
    pub fn v1(
        id: HardwareId,
        parent_id: Option<HardwareId>,
        level: u8,
        kind: HardwareKind,
        dimension: Option<Dimension>,
        extent: Option<f64>,
        analogy: Option<AnalogyRef>,
        implied_link: Option<HardwareId>,
        spec_class: Option<SpecClass>,
        group: Option<GroupTag>,
        metadata: HardwareMetadata,
    ) -> Result<Self, ContractViolation> {
        let e = Self {
            schema_version: HARDWARE_CONTRACT_VERSION,
            id,
            parent_id,
            level,
            kind,
            dimension,
            extent,
            analogy,
            implied_link,
            spec_class,
            group,
            metadata,
        };
        e.validate()?;
        Ok(e)
    }

    pub fn is_component(&self) -> bool {
        self.kind.is_component()
    }

    /// Strips every component-only field, leaving an unconfigured (invalid)
    /// element. Used when an element is coerced between component and rollup.
    pub fn clear_component_fields(&mut self) {
        self.dimension = None;
        self.extent = None;
        self.analogy = None;
        self.implied_link = None;
        self.spec_class = None;
    }
}

impl Validate for HardwareElement {
    fn validate(&self) -> Result<(), ContractViolation> {
        self.id.validate()?;
        if let Some(parent_id) = &self.parent_id {
            parent_id.validate()?;
        }
        if self.level < 2 || self.level > MAX_HARDWARE_LEVEL {
            return Err(ContractViolation::InvalidRange {
                field: "hardware_element.level",
                min: 2.0,
                max: MAX_HARDWARE_LEVEL as f64,
                got: self.level as f64,
            });
        }
        if self.parent_id.is_none() && self.level != 2 {
            return Err(ContractViolation::InvalidValue {
                field: "hardware_element.level",
                reason: "parentless elements must be level 2",
            });
        }
        if let Some(extent) = self.extent {
            if !extent.is_finite() {
                return Err(ContractViolation::NotFinite {
                    field: "hardware_element.extent",
                });
            }
            if extent <= 0.0 {
                return Err(ContractViolation::InvalidValue {
                    field: "hardware_element.extent",
                    reason: "must be > 0",
                });
            }
        }
        if let Some(AnalogyRef::Named(analog_id)) = &self.analogy {
            analog_id.validate()?;
        }
        if let Some(implied_link) = &self.implied_link {
            implied_link.validate()?;
            if *implied_link == self.id {
                return Err(ContractViolation::InvalidValue {
                    field: "hardware_element.implied_link",
                    reason: "must not reference itself",
                });
            }
        }
        if let Some(group) = &self.group {
            group.validate()?;
        }
        Ok(())
    }
}
