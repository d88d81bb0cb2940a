#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use sporecast_contracts::hardware::{AnalogyRef, HardwareElement, HardwareId, HardwareKind};
use sporecast_contracts::sample::Sample;

use crate::catalog::{Catalogs, EfficiencyKey, EfficiencyTable};

/// Whether an element is completely configured. Rollups are structurally
/// valid; components need dimension, extent and the kind-specific field.
/// Implied components additionally need their link to land on a valid
/// Sampled component, so validity recurses one hop.
pub fn element_valid(
    elem: &HardwareElement,
    hardware: &BTreeMap<HardwareId, HardwareElement>,
    catalogs: &Catalogs,
) -> bool {
    if elem.kind == HardwareKind::Rollup {
        return true;
    }
    let (Some(dimension), Some(_extent)) = (elem.dimension, elem.extent) else {
        return false;
    };
    match elem.kind {
        HardwareKind::Rollup => true,
        HardwareKind::Sampled => match &elem.analogy {
            Some(AnalogyRef::Generic) => true,
            Some(AnalogyRef::Named(analog)) => catalogs.priors.contains(analog),
            None => false,
        },
        HardwareKind::ImpliedUnsampled => match &elem.implied_link {
            Some(link) => hardware
                .get(link)
                .map(|target| {
                    target.kind == HardwareKind::Sampled
                        && element_valid(target, hardware, catalogs)
                })
                .unwrap_or(false),
            None => false,
        },
        HardwareKind::SpecUnsampled => elem
            .spec_class
            .map(|class| class.dimension() == dimension)
            .unwrap_or(false),
    }
}

/// Whether a sample row can enter a likelihood: positive sampled extent, a
/// coherent device/type pairing that resolves in the efficiency table
/// (aliases count), an in-range pour fraction, and a Sampled target.
pub fn sample_valid(
    sample: &Sample,
    hardware: &BTreeMap<HardwareId, HardwareElement>,
    efficiency: &EfficiencyTable,
) -> bool {
    let Some(target) = hardware.get(&sample.hardware_id) else {
        return false;
    };
    if target.kind != HardwareKind::Sampled {
        return false;
    }
    if !(sample.extent_sampled.is_finite() && sample.extent_sampled > 0.0) {
        return false;
    }
    if sample.device_type.family() != sample.device {
        return false;
    }
    let key = EfficiencyKey {
        device_type: sample.device_type,
        technique: sample.technique,
    };
    if efficiency.beta_params(key).is_none() {
        return false;
    }
    sample.pour_fraction.is_finite() && sample.pour_fraction > 0.0 && sample.pour_fraction <= 1.0
}

pub fn sample_usable(
    sample: &Sample,
    hardware: &BTreeMap<HardwareId, HardwareElement>,
    efficiency: &EfficiencyTable,
) -> bool {
    sample.accountable && sample_valid(sample, hardware, efficiency)
}

/// Usable samples attached to one component, in stable id order.
pub fn usable_samples_for<'a>(
    id: &HardwareId,
    samples: impl IntoIterator<Item = &'a Sample>,
    hardware: &BTreeMap<HardwareId, HardwareElement>,
    efficiency: &EfficiencyTable,
) -> Vec<&'a Sample> {
    let mut out: Vec<&Sample> = samples
        .into_iter()
        .filter(|s| s.hardware_id == *id && sample_usable(s, hardware, efficiency))
        .collect();
    out.sort_by(|a, b| a.id.cmp(&b.id));
    out
}

/// Whether a component can be simulated: valid, and — generic-prior Sampled
/// components only — carrying at least one usable sample, since the generic
/// prior has nothing to say without an observation. An implied component
/// inherits its link's eligibility: a source that cannot be simulated leaves
/// nothing to borrow, so the dependent drops out with it.
pub fn component_eligible<'a>(
    elem: &HardwareElement,
    hardware: &BTreeMap<HardwareId, HardwareElement>,
    samples: impl IntoIterator<Item = &'a Sample>,
    catalogs: &Catalogs,
) -> bool {
    if !elem.is_component() || !element_valid(elem, hardware, catalogs) {
        return false;
    }
    match elem.kind {
        HardwareKind::Sampled if matches!(elem.analogy, Some(AnalogyRef::Generic)) => {
            !usable_samples_for(&elem.id, samples, hardware, &catalogs.efficiency).is_empty()
        }
        HardwareKind::ImpliedUnsampled => {
            // Validity already pinned the link to a valid Sampled component.
            match elem.implied_link.as_ref().and_then(|l| hardware.get(l)) {
                Some(target) => component_eligible(target, hardware, samples, catalogs),
                None => false,
            }
        }
        _ => true,
    }
}

/// Valid implied components whose link lands on the given element. Empty
/// unless the target is itself a valid Sampled component.
pub fn implied_dependents(
    target_id: &HardwareId,
    hardware: &BTreeMap<HardwareId, HardwareElement>,
    catalogs: &Catalogs,
) -> Vec<HardwareId> {
    let Some(target) = hardware.get(target_id) else {
        return Vec::new();
    };
    if target.kind != HardwareKind::Sampled || !element_valid(target, hardware, catalogs) {
        return Vec::new();
    }
    hardware
        .values()
        .filter(|hw| {
            hw.kind == HardwareKind::ImpliedUnsampled
                && hw.implied_link.as_ref() == Some(target_id)
                && element_valid(hw, hardware, catalogs)
        })
        .map(|hw| hw.id.clone())
        .collect()
}

/// Eligible element ids grouped by level: every eligible component plus each
/// of its ancestors, so a rollup appears whenever at least one eligible
/// component sits below it.
pub fn eligible_hardware_by_level<'a>(
    hardware: &BTreeMap<HardwareId, HardwareElement>,
    samples: impl IntoIterator<Item = &'a Sample> + Copy,
    catalogs: &Catalogs,
) -> BTreeMap<u8, BTreeSet<HardwareId>> {
    let mut by_level: BTreeMap<u8, BTreeSet<HardwareId>> = BTreeMap::new();
    for elem in hardware.values() {
        if !component_eligible(elem, hardware, samples, catalogs) {
            continue;
        }
        let mut current = elem;
        loop {
            by_level
                .entry(current.level)
                .or_default()
                .insert(current.id.clone());
            match current.parent_id.as_ref().and_then(|p| hardware.get(p)) {
                Some(parent) => current = parent,
                None => break,
            }
        }
    }
    by_level
}
