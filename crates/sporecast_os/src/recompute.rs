#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use sporecast_contracts::change::{EditEvent, HardwareChange, SampleChange};
use sporecast_contracts::hardware::{HardwareElement, HardwareId, HardwareKind};
use sporecast_contracts::sample::{Sample, SampleId};

use sporecast_engines::catalog::Catalogs;
use sporecast_engines::eligibility::{component_eligible, sample_valid, usable_samples_for};
use sporecast_engines::sim::{SimEngine, SimError};
use sporecast_storage::{HardwareStore, SampleStore, SimulationStore};

/// The world as it looked before the edit was applied to the stores. The
/// controller compares prior and current eligibility to decide what to
/// recompute.
#[derive(Debug, Clone, Default)]
pub struct WorldSnapshot {
    pub hardware: BTreeMap<HardwareId, HardwareElement>,
    pub samples: BTreeMap<SampleId, Sample>,
}

impl WorldSnapshot {
    pub fn capture(hardware: &HardwareStore, samples: &SampleStore) -> Self {
        Self {
            hardware: hardware.rows().clone(),
            samples: samples.rows().clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecomputeOutcome {
    /// True when the event could not have changed any simulation input, so
    /// the simulation store is untouched and rollups can be skipped.
    pub noop: bool,
}

#[derive(Debug)]
pub enum RecomputeError {
    /// The event shape matched none of the known edit situations. This is a
    /// contract violation by the diff layer, not a user error.
    UnclassifiedEvent,
    Sim(SimError),
}

impl std::fmt::Display for RecomputeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnclassifiedEvent => write!(f, "unsupported edit event shape"),
            Self::Sim(e) => write!(f, "simulation failed during recompute: {e}"),
        }
    }
}

impl std::error::Error for RecomputeError {}

impl From<SimError> for RecomputeError {
    fn from(e: SimError) -> Self {
        Self::Sim(e)
    }
}

/// Turns typed edit events into the minimal set of re-simulations. One event
/// is processed to completion before the next; the `&mut` borrow on the
/// simulation store is the single-writer guarantee.
#[derive(Debug, Clone)]
pub struct RecomputeController {
    engine: SimEngine,
}

impl RecomputeController {
    pub fn new(engine: SimEngine) -> Self {
        Self { engine }
    }

    pub fn engine(&self) -> &SimEngine {
        &self.engine
    }

    pub fn process(
        &self,
        event: &EditEvent,
        prev: &WorldSnapshot,
        hardware: &HardwareStore,
        samples: &SampleStore,
        sims: &mut SimulationStore,
        catalogs: &Catalogs,
    ) -> Result<RecomputeOutcome, RecomputeError> {
        if event.is_empty() {
            return Err(RecomputeError::UnclassifiedEvent);
        }
        let mut noop = true;
        if let Some(change) = &event.hardware {
            let n = self.process_hardware(change, prev, hardware, samples, sims, catalogs)?;
            noop = noop && n;
        }
        if let Some(change) = &event.samples {
            let n = self.process_samples(change, prev, hardware, samples, sims, catalogs)?;
            noop = noop && n;
        }
        Ok(RecomputeOutcome { noop })
    }

    fn process_hardware(
        &self,
        change: &HardwareChange,
        prev: &WorldSnapshot,
        hardware: &HardwareStore,
        samples: &SampleStore,
        sims: &mut SimulationStore,
        catalogs: &Catalogs,
    ) -> Result<bool, RecomputeError> {
        let sample_rows = samples.all();
        match change {
            HardwareChange::Replaced => {
                // Bulk import: everything is recomputed, implied components
                // last so their linked records exist.
                sims.clear();
                for elem in hardware.rows().values() {
                    if elem.kind == HardwareKind::ImpliedUnsampled {
                        continue;
                    }
                    if component_eligible(elem, hardware.rows(), &sample_rows, catalogs) {
                        self.resim(elem, hardware, &sample_rows, sims, catalogs)?;
                    }
                }
                for elem in hardware.rows().values() {
                    if elem.kind == HardwareKind::ImpliedUnsampled
                        && component_eligible(elem, hardware.rows(), &sample_rows, catalogs)
                    {
                        self.resim(elem, hardware, &sample_rows, sims, catalogs)?;
                    }
                }
                Ok(false)
            }
            HardwareChange::Added { id, coerced_parent } => {
                let mut noop = true;
                if let Some(coerced) = coerced_parent {
                    // The parent was a component before this addition; its
                    // record and its dependents' records are stale.
                    if sims.remove(coerced).is_some() {
                        noop = false;
                    }
                    for dep in linked_implied_ids(coerced, hardware.rows()) {
                        if sims.remove(&dep).is_some() {
                            noop = false;
                        }
                    }
                }
                if let Some(added) = hardware.get(id) {
                    if component_eligible(added, hardware.rows(), &sample_rows, catalogs) {
                        self.resim(added, hardware, &sample_rows, sims, catalogs)?;
                        self.resim_dependents(id, hardware, &sample_rows, sims, catalogs)?;
                        noop = false;
                    }
                }
                Ok(noop)
            }
            HardwareChange::Removed { ids } => {
                let mut noop = true;
                for id in ids {
                    if sims.remove(id).is_some() {
                        noop = false;
                    }
                }
                // Sweep records whose component vanished or lost eligibility
                // (cleared implied links, coerced parents).
                let doomed: Vec<HardwareId> = sims
                    .rows()
                    .keys()
                    .filter(|id| {
                        hardware
                            .get(id)
                            .map(|e| {
                                !component_eligible(e, hardware.rows(), &sample_rows, catalogs)
                            })
                            .unwrap_or(true)
                    })
                    .cloned()
                    .collect();
                for id in doomed {
                    sims.remove(&id);
                    noop = false;
                }
                Ok(noop)
            }
            HardwareChange::FieldsChanged(edits) => {
                if edits.is_empty() {
                    return Err(RecomputeError::UnclassifiedEvent);
                }
                if edits
                    .values()
                    .all(|fields| fields.iter().all(|f| f.is_metadata()))
                {
                    return Ok(true);
                }
                let mut noops = Vec::new();
                for (id, fields) in edits {
                    if fields.iter().all(|f| f.is_metadata()) {
                        noops.push(true);
                        continue;
                    }
                    let old = prev.hardware.get(id);
                    let new = hardware.get(id);
                    let prev_samples: Vec<Sample> = prev.samples.values().cloned().collect();
                    let was_eligible = old
                        .map(|e| component_eligible(e, &prev.hardware, &prev_samples, catalogs))
                        .unwrap_or(false);
                    let is_eligible = new
                        .map(|e| component_eligible(e, hardware.rows(), &sample_rows, catalogs))
                        .unwrap_or(false);
                    if !(was_eligible || is_eligible) {
                        noops.push(true);
                        continue;
                    }
                    noops.push(false);
                    match new {
                        Some(elem) if is_eligible => {
                            self.resim(elem, hardware, &sample_rows, sims, catalogs)?;
                            self.resim_dependents(id, hardware, &sample_rows, sims, catalogs)?;
                        }
                        _ => {
                            sims.remove(id);
                            for dep in linked_implied_ids(id, hardware.rows()) {
                                sims.remove(&dep);
                            }
                        }
                    }
                }
                Ok(noops.iter().all(|n| *n))
            }
        }
    }

    fn process_samples(
        &self,
        change: &SampleChange,
        prev: &WorldSnapshot,
        hardware: &HardwareStore,
        samples: &SampleStore,
        sims: &mut SimulationStore,
        catalogs: &Catalogs,
    ) -> Result<bool, RecomputeError> {
        let sample_rows = samples.all();
        match change {
            SampleChange::Added { ids } => {
                let added: Vec<&Sample> = ids.iter().filter_map(|id| samples.get(id)).collect();
                let any_valid = added
                    .iter()
                    .any(|s| sample_valid(s, hardware.rows(), &catalogs.efficiency));
                if !any_valid {
                    return Ok(true);
                }
                self.touch_sampled_targets(
                    &added.iter().map(|s| (*s).clone()).collect::<Vec<_>>(),
                    hardware,
                    &sample_rows,
                    sims,
                    catalogs,
                )
            }
            SampleChange::Removed {
                samples: removed_rows,
            } => self.touch_sampled_targets(removed_rows, hardware, &sample_rows, sims, catalogs),
            SampleChange::FieldsChanged(edits) => {
                if edits.is_empty() {
                    return Err(RecomputeError::UnclassifiedEvent);
                }
                if edits
                    .values()
                    .all(|fields| fields.iter().all(|f| f.is_metadata()))
                {
                    return Ok(true);
                }
                let mut noops = Vec::new();
                for (id, fields) in edits {
                    if fields.iter().all(|f| f.is_metadata()) {
                        noops.push(true);
                        continue;
                    }
                    let Some(new) = samples.get(id) else {
                        noops.push(true);
                        continue;
                    };
                    let old = prev.samples.get(id);
                    let Some(hw) = hardware.get(&new.hardware_id) else {
                        noops.push(true);
                        continue;
                    };
                    let eligible =
                        component_eligible(hw, hardware.rows(), &sample_rows, catalogs);
                    let new_valid = sample_valid(new, hardware.rows(), &catalogs.efficiency);
                    let old_valid = old
                        .map(|s| sample_valid(s, &prev.hardware, &catalogs.efficiency))
                        .unwrap_or(false);
                    let new_accountable = new.accountable;
                    let old_accountable = old.map(|s| s.accountable).unwrap_or(false);
                    if !eligible
                        || (!new_valid && !old_valid)
                        || (!new_accountable && !old_accountable)
                    {
                        noops.push(true);
                        continue;
                    }
                    self.resim(hw, hardware, &sample_rows, sims, catalogs)?;
                    self.resim_dependents(&hw.id, hardware, &sample_rows, sims, catalogs)?;
                    noops.push(false);
                }
                Ok(noops.iter().all(|n| *n))
            }
        }
    }

    /// Shared add/remove handling: for each distinct component the touched
    /// samples point at, re-simulate if it is eligible and an accountable
    /// sample was involved, or drop its stale record if it lost eligibility.
    fn touch_sampled_targets(
        &self,
        touched: &[Sample],
        hardware: &HardwareStore,
        sample_rows: &[Sample],
        sims: &mut SimulationStore,
        catalogs: &Catalogs,
    ) -> Result<bool, RecomputeError> {
        let hw_ids: BTreeSet<&HardwareId> = touched.iter().map(|s| &s.hardware_id).collect();
        let mut noop = true;
        for hw_id in hw_ids {
            let Some(hw) = hardware.get(hw_id) else {
                continue;
            };
            let eligible = component_eligible(hw, hardware.rows(), sample_rows, catalogs);
            let any_accountable = touched
                .iter()
                .any(|s| s.hardware_id == *hw_id && s.accountable);
            if eligible && any_accountable {
                noop = false;
                self.resim(hw, hardware, sample_rows, sims, catalogs)?;
                self.resim_dependents(hw_id, hardware, sample_rows, sims, catalogs)?;
            } else if sims.get(hw_id).is_some() && !eligible {
                noop = false;
                sims.remove(hw_id);
                for dep in linked_implied_ids(hw_id, hardware.rows()) {
                    sims.remove(&dep);
                }
            }
        }
        Ok(noop)
    }

    fn resim(
        &self,
        elem: &HardwareElement,
        hardware: &HardwareStore,
        sample_rows: &[Sample],
        sims: &mut SimulationStore,
        catalogs: &Catalogs,
    ) -> Result<(), RecomputeError> {
        let usable =
            usable_samples_for(&elem.id, sample_rows, hardware.rows(), &catalogs.efficiency);
        let linked = match (&elem.kind, &elem.implied_link) {
            (HardwareKind::ImpliedUnsampled, Some(link)) => sims.get(link).cloned(),
            _ => None,
        };
        let record = self
            .engine
            .simulate(elem, &usable, linked.as_ref(), catalogs)?;
        sims.upsert(elem.id.clone(), record);
        Ok(())
    }

    /// Implied components mirror their source in the same event; implication
    /// never chains, so a single hop is complete.
    fn resim_dependents(
        &self,
        source: &HardwareId,
        hardware: &HardwareStore,
        sample_rows: &[Sample],
        sims: &mut SimulationStore,
        catalogs: &Catalogs,
    ) -> Result<(), RecomputeError> {
        let deps = sporecast_engines::eligibility::implied_dependents(
            source,
            hardware.rows(),
            catalogs,
        );
        for dep in deps {
            if let Some(elem) = hardware.get(&dep) {
                self.resim(elem, hardware, sample_rows, sims, catalogs)?;
            }
        }
        Ok(())
    }
}

/// Implied components whose link points at the given id, valid or not. Used
/// for stale-record removal, where validity no longer matters.
fn linked_implied_ids(
    target: &HardwareId,
    hardware: &BTreeMap<HardwareId, HardwareElement>,
) -> Vec<HardwareId> {
    hardware
        .values()
        .filter(|e| {
            e.kind == HardwareKind::ImpliedUnsampled && e.implied_link.as_ref() == Some(target)
        })
        .map(|e| e.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use sporecast_contracts::hardware::{AnalogyRef, Dimension, HardwareMetadata};
    use sporecast_contracts::sample::{Device, DeviceType, SampleMetadata, Technique};
    use sporecast_engines::catalog::PriorCatalog;
    use sporecast_engines::sim::SimConfig;

    fn controller() -> RecomputeController {
        RecomputeController::new(SimEngine::new(SimConfig { draw_count: 200 }))
    }

    fn catalogs() -> Catalogs {
        let priors =
            PriorCatalog::from_json_str(r#"{"heritage-analog": [10.0, 20.0]}"#).unwrap();
        Catalogs::builtin_with_priors(priors)
    }

    fn sampled_generic(id: &str) -> HardwareElement {
        HardwareElement::v1(
            HardwareId::new(id).unwrap(),
            None,
            2,
            HardwareKind::Sampled,
            Some(Dimension::Area),
            Some(1.0),
            Some(AnalogyRef::Generic),
            None,
            None,
            None,
            HardwareMetadata::default(),
        )
        .unwrap()
    }

    fn swab(id: &str, hw: &str) -> Sample {
        Sample::v1(
            SampleId::new(id).unwrap(),
            HardwareId::new(hw).unwrap(),
            true,
            0.1,
            Device::Swab,
            DeviceType::PuritanCotton,
            Technique::NasaStandard,
            0.8,
            2,
            SampleMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn at_recompute_01_empty_events_are_a_contract_violation() {
        let ctl = controller();
        let cats = catalogs();
        let hardware = HardwareStore::new();
        let samples = SampleStore::new();
        let mut sims = SimulationStore::new();
        let err = ctl
            .process(
                &EditEvent {
                    hardware: None,
                    samples: None,
                },
                &WorldSnapshot::default(),
                &hardware,
                &samples,
                &mut sims,
                &cats,
            )
            .unwrap_err();
        assert!(matches!(err, RecomputeError::UnclassifiedEvent));
    }

    #[test]
    fn at_recompute_02_adding_an_invalid_sample_is_a_noop() {
        let ctl = controller();
        let cats = catalogs();
        let mut hardware = HardwareStore::new();
        hardware.insert(sampled_generic("panel")).unwrap();
        let mut samples = SampleStore::new();
        let mut bad = swab("s1", "panel");
        bad.pour_fraction = 0.0;
        samples.insert(bad, &hardware).unwrap();
        let mut sims = SimulationStore::new();

        let prev = WorldSnapshot::capture(&hardware, &SampleStore::new());
        let outcome = ctl
            .process(
                &EditEvent::samples_only(SampleChange::Added {
                    ids: vec![SampleId::new("s1").unwrap()],
                }),
                &prev,
                &hardware,
                &samples,
                &mut sims,
                &cats,
            )
            .unwrap();
        assert!(outcome.noop);
        assert!(sims.is_empty());
    }

    #[test]
    fn at_recompute_03_losing_eligibility_drops_the_stale_record() {
        let ctl = controller();
        let cats = catalogs();
        let mut hardware = HardwareStore::new();
        hardware.insert(sampled_generic("panel")).unwrap();
        let mut samples = SampleStore::new();
        samples.insert(swab("s1", "panel"), &hardware).unwrap();
        let mut sims = SimulationStore::new();

        // Seed the store as if the component had been simulated.
        let prev = WorldSnapshot::capture(&hardware, &samples);
        ctl.process(
            &EditEvent::hardware_only(HardwareChange::Replaced),
            &prev,
            &hardware,
            &samples,
            &mut sims,
            &cats,
        )
        .unwrap();
        assert!(!sims.is_empty());

        // The only sample is removed: the generic component loses
        // eligibility and its record goes with it.
        let prev = WorldSnapshot::capture(&hardware, &samples);
        let removed = samples.remove(&SampleId::new("s1").unwrap()).unwrap();
        let outcome = ctl
            .process(
                &EditEvent::samples_only(SampleChange::Removed {
                    samples: vec![removed],
                }),
                &prev,
                &hardware,
                &samples,
                &mut sims,
                &cats,
            )
            .unwrap();
        assert!(!outcome.noop);
        assert!(sims.is_empty());
    }

    #[test]
    fn at_recompute_04_mixed_field_edits_touch_only_computational_targets() {
        use sporecast_contracts::change::SampleField;

        let ctl = controller();
        let cats = catalogs();
        let mut hardware = HardwareStore::new();
        hardware.insert(sampled_generic("a")).unwrap();
        hardware.insert(sampled_generic("b")).unwrap();
        let mut samples = SampleStore::new();
        samples.insert(swab("sa", "a"), &hardware).unwrap();
        samples.insert(swab("sb", "b"), &hardware).unwrap();
        let mut sims = SimulationStore::new();

        let prev = WorldSnapshot::capture(&hardware, &samples);
        ctl.process(
            &EditEvent::hardware_only(HardwareChange::Replaced),
            &prev,
            &hardware,
            &samples,
            &mut sims,
            &cats,
        )
        .unwrap();
        let b_before = sims.get(&HardwareId::new("b").unwrap()).cloned().unwrap();

        // One sample gets a count correction, the other only a note.
        let prev = WorldSnapshot::capture(&hardware, &samples);
        let mut edited = samples.get(&SampleId::new("sa").unwrap()).cloned().unwrap();
        edited.cfu = 9;
        samples.update(edited).unwrap();
        let mut edits = BTreeMap::new();
        edits.insert(
            SampleId::new("sa").unwrap(),
            BTreeSet::from([SampleField::Cfu]),
        );
        edits.insert(
            SampleId::new("sb").unwrap(),
            BTreeSet::from([SampleField::Notes]),
        );
        let outcome = ctl
            .process(
                &EditEvent::samples_only(SampleChange::FieldsChanged(edits)),
                &prev,
                &hardware,
                &samples,
                &mut sims,
                &cats,
            )
            .unwrap();

        assert!(!outcome.noop);
        assert!(sims.get(&HardwareId::new("a").unwrap()).is_some());
        // The annotation-only edit left the other record untouched.
        assert_eq!(sims.get(&HardwareId::new("b").unwrap()), Some(&b_before));
    }

    #[test]
    fn at_recompute_05_source_losing_eligibility_drops_dependent_records_too() {
        let ctl = controller();
        let cats = catalogs();
        let mut hardware = HardwareStore::new();
        hardware.insert(sampled_generic("a")).unwrap();
        let mut shadow = HardwareElement::v1(
            HardwareId::new("shadow").unwrap(),
            None,
            2,
            HardwareKind::ImpliedUnsampled,
            Some(Dimension::Area),
            Some(2.0),
            None,
            Some(HardwareId::new("a").unwrap()),
            None,
            None,
            HardwareMetadata::default(),
        )
        .unwrap();
        shadow.metadata.notes = Some("same lot as a".to_string());
        hardware.insert(shadow).unwrap();
        let mut samples = SampleStore::new();
        samples.insert(swab("s1", "a"), &hardware).unwrap();
        let mut sims = SimulationStore::new();

        let prev = WorldSnapshot::capture(&hardware, &samples);
        ctl.process(
            &EditEvent::hardware_only(HardwareChange::Replaced),
            &prev,
            &hardware,
            &samples,
            &mut sims,
            &cats,
        )
        .unwrap();
        assert_eq!(sims.len(), 2);

        // Removing the only sample strands both the source and its dependent.
        let prev = WorldSnapshot::capture(&hardware, &samples);
        let removed = samples.remove(&SampleId::new("s1").unwrap()).unwrap();
        let outcome = ctl
            .process(
                &EditEvent::samples_only(SampleChange::Removed {
                    samples: vec![removed],
                }),
                &prev,
                &hardware,
                &samples,
                &mut sims,
                &cats,
            )
            .unwrap();

        assert!(!outcome.noop);
        assert!(sims.is_empty());
    }
}
