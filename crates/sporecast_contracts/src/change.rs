#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::hardware::HardwareId;
use crate::sample::{Sample, SampleId};

/// Editable columns of a hardware element. Parent reassignment is not a field
/// edit; it is expressed as a removal followed by an addition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HardwareField {
    Kind,
    Dimension,
    Extent,
    Analogy,
    ImpliedLink,
    SpecClass,
    Group,
    Handling,
    Ventilation,
    Composition,
    CleaningFabrication,
    CleaningPreIntegration,
    CleaningIntegration,
    ReductionFabrication,
    ReductionPreIntegration,
    ReductionIntegration,
    Notes,
}

impl HardwareField {
    /// Whether the field is annotation-only. Edits confined to these columns
    /// never change any simulation input.
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            HardwareField::Handling
                | HardwareField::Ventilation
                | HardwareField::Composition
                | HardwareField::CleaningFabrication
                | HardwareField::CleaningPreIntegration
                | HardwareField::CleaningIntegration
                | HardwareField::ReductionFabrication
                | HardwareField::ReductionPreIntegration
                | HardwareField::ReductionIntegration
                | HardwareField::Notes
        )
    }
}

/// Editable columns of a sample. The sample and hardware ids are immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SampleField {
    Accountable,
    ExtentSampled,
    Device,
    DeviceType,
    Technique,
    PourFraction,
    Cfu,
    ControlType,
    AssayName,
    AssayDate,
    CertNumber,
    Notes,
}

impl SampleField {
    pub fn is_metadata(self) -> bool {
        matches!(
            self,
            SampleField::AssayName
                | SampleField::AssayDate
                | SampleField::CertNumber
                | SampleField::ControlType
                | SampleField::Notes
        )
    }
}

/// What happened to the hardware table in one edit event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HardwareChange {
    /// The whole table was swapped out (import, project load).
    Replaced,
    /// One element was added. If the addition turned its parent from a
    /// component into a rollup, the parent id is carried here.
    Added {
        id: HardwareId,
        coerced_parent: Option<HardwareId>,
    },
    /// Elements were removed, including everything cascaded with them.
    Removed { ids: Vec<HardwareId> },
    /// In-place column edits, keyed by element.
    FieldsChanged(BTreeMap<HardwareId, BTreeSet<HardwareField>>),
}

/// What happened to the sample table in one edit event. Removals carry the
/// full removed rows so the affected hardware ids survive the deletion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SampleChange {
    Added { ids: Vec<SampleId> },
    Removed { samples: Vec<Sample> },
    FieldsChanged(BTreeMap<SampleId, BTreeSet<SampleField>>),
}

/// One user edit, described as typed table deltas. Exactly the payload the
/// recompute controller classifies; an event with neither delta is
/// unclassifiable and rejected.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EditEvent {
    pub hardware: Option<HardwareChange>,
    pub samples: Option<SampleChange>,
}

impl EditEvent {
    pub fn hardware_only(change: HardwareChange) -> Self {
        Self {
            hardware: Some(change),
            samples: None,
        }
    }

    pub fn samples_only(change: SampleChange) -> Self {
        Self {
            hardware: None,
            samples: Some(change),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.hardware.is_none() && self.samples.is_none()
    }
}
