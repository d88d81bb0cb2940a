#![forbid(unsafe_code)]

use std::collections::BTreeSet;

use sporecast_contracts::change::{
    EditEvent, HardwareChange, HardwareField, SampleChange, SampleField,
};
use sporecast_contracts::hardware::{HardwareElement, HardwareId};
use sporecast_contracts::sample::{DeviceType, Sample, SampleId, Technique};

use sporecast_engines::catalog::{Catalogs, EfficiencyKey};
use sporecast_engines::eligibility::sample_valid;
use sporecast_engines::rollup::RollupEngine;
use sporecast_engines::sim::{SimConfig, SimEngine};
use sporecast_storage::{
    HardwareStore, RollupStore, SampleStore, SimulationStore, StorageError,
};

use crate::recompute::{RecomputeController, RecomputeError, RecomputeOutcome, WorldSnapshot};

#[derive(Debug)]
pub enum RuntimeError {
    Storage(StorageError),
    Recompute(RecomputeError),
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Storage(e) => write!(f, "storage: {e}"),
            Self::Recompute(e) => write!(f, "recompute: {e}"),
        }
    }
}

impl std::error::Error for RuntimeError {}

impl From<StorageError> for RuntimeError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<RecomputeError> for RuntimeError {
    fn from(e: RecomputeError) -> Self {
        Self::Recompute(e)
    }
}

/// Per-sample state for the form layer: whether the row can enter a
/// likelihood, whether it counts, and whether its recovery-efficiency
/// parameters are borrowed from another device/technique pairing.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleAlert {
    pub sample_id: SampleId,
    pub valid: bool,
    pub accountable: bool,
    pub borrowed_efficiency: bool,
}

/// Owns the project state end to end: tables, catalogs, simulation engine,
/// recompute controller and rollup aggregates. Every mutation runs one full
/// edit event synchronously — snapshot, store mutation, targeted
/// re-simulation, then rollups unless the event was a no-op.
#[derive(Debug)]
pub struct ProjectRuntime {
    hardware: HardwareStore,
    samples: SampleStore,
    sims: SimulationStore,
    rollups: RollupStore,
    catalogs: Catalogs,
    controller: RecomputeController,
    rollup_engine: RollupEngine,
}

impl ProjectRuntime {
    pub fn new(catalogs: Catalogs, sim_config: SimConfig) -> Self {
        Self {
            hardware: HardwareStore::new(),
            samples: SampleStore::new(),
            sims: SimulationStore::new(),
            rollups: RollupStore::new(),
            catalogs,
            controller: RecomputeController::new(SimEngine::new(sim_config)),
            rollup_engine: RollupEngine::new(),
        }
    }

    pub fn hardware(&self) -> &HardwareStore {
        &self.hardware
    }

    pub fn samples(&self) -> &SampleStore {
        &self.samples
    }

    pub fn sims(&self) -> &SimulationStore {
        &self.sims
    }

    pub fn rollups(&self) -> &RollupStore {
        &self.rollups
    }

    pub fn catalogs(&self) -> &Catalogs {
        &self.catalogs
    }

    /// Validity and caveat flags for every sample row, in id order.
    pub fn sample_alerts(&self) -> Vec<SampleAlert> {
        self.samples
            .rows()
            .values()
            .map(|s| {
                let key = EfficiencyKey {
                    device_type: s.device_type,
                    technique: s.technique,
                };
                SampleAlert {
                    sample_id: s.id.clone(),
                    valid: sample_valid(s, self.hardware.rows(), &self.catalogs.efficiency),
                    accountable: s.accountable,
                    borrowed_efficiency: self.catalogs.efficiency.is_alias(key),
                }
            })
            .collect()
    }

    /// Default pour fraction for a device/technique pairing, for prefilling
    /// new sample rows.
    pub fn default_pour_fraction(
        &self,
        device_type: DeviceType,
        technique: Technique,
    ) -> Option<f64> {
        self.catalogs.efficiency.default_pour_fraction(EfficiencyKey {
            device_type,
            technique,
        })
    }

    /// Bulk project load. Replaces both tables and recomputes everything.
    pub fn load(
        &mut self,
        hardware_rows: Vec<HardwareElement>,
        sample_rows: Vec<Sample>,
    ) -> Result<RecomputeOutcome, RuntimeError> {
        let prev = WorldSnapshot::capture(&self.hardware, &self.samples);
        self.hardware.replace_all(hardware_rows)?;
        self.samples.replace_all(sample_rows, &self.hardware)?;
        self.run_event(
            EditEvent::hardware_only(HardwareChange::Replaced),
            prev,
        )
    }

    pub fn insert_hardware(
        &mut self,
        elem: HardwareElement,
    ) -> Result<RecomputeOutcome, RuntimeError> {
        let prev = WorldSnapshot::capture(&self.hardware, &self.samples);
        let id = elem.id.clone();
        let coerced_parent = self.hardware.insert(elem)?;
        self.run_event(
            EditEvent::hardware_only(HardwareChange::Added { id, coerced_parent }),
            prev,
        )
    }

    pub fn remove_hardware(
        &mut self,
        id: &HardwareId,
    ) -> Result<RecomputeOutcome, RuntimeError> {
        let prev = WorldSnapshot::capture(&self.hardware, &self.samples);
        let cascade = self.hardware.remove(id)?;
        self.samples.remove_for_hardware(&cascade.removed_ids);
        self.run_event(
            EditEvent::hardware_only(HardwareChange::Removed {
                ids: cascade.removed_ids,
            }),
            prev,
        )
    }

    pub fn update_hardware(
        &mut self,
        elem: HardwareElement,
        fields: BTreeSet<HardwareField>,
    ) -> Result<RecomputeOutcome, RuntimeError> {
        let prev = WorldSnapshot::capture(&self.hardware, &self.samples);
        let id = elem.id.clone();
        self.hardware.update(elem)?;
        let mut edits = std::collections::BTreeMap::new();
        edits.insert(id, fields);
        self.run_event(
            EditEvent::hardware_only(HardwareChange::FieldsChanged(edits)),
            prev,
        )
    }

    pub fn insert_sample(&mut self, sample: Sample) -> Result<RecomputeOutcome, RuntimeError> {
        let prev = WorldSnapshot::capture(&self.hardware, &self.samples);
        let id = sample.id.clone();
        self.samples.insert(sample, &self.hardware)?;
        self.run_event(
            EditEvent::samples_only(SampleChange::Added { ids: vec![id] }),
            prev,
        )
    }

    pub fn remove_sample(&mut self, id: &SampleId) -> Result<RecomputeOutcome, RuntimeError> {
        let prev = WorldSnapshot::capture(&self.hardware, &self.samples);
        let removed = self.samples.remove(id)?;
        self.run_event(
            EditEvent::samples_only(SampleChange::Removed {
                samples: vec![removed],
            }),
            prev,
        )
    }

    pub fn update_sample(
        &mut self,
        sample: Sample,
        fields: BTreeSet<SampleField>,
    ) -> Result<RecomputeOutcome, RuntimeError> {
        let prev = WorldSnapshot::capture(&self.hardware, &self.samples);
        let id = sample.id.clone();
        self.samples.update(sample)?;
        let mut edits = std::collections::BTreeMap::new();
        edits.insert(id, fields);
        self.run_event(
            EditEvent::samples_only(SampleChange::FieldsChanged(edits)),
            prev,
        )
    }

    fn run_event(
        &mut self,
        event: EditEvent,
        prev: WorldSnapshot,
    ) -> Result<RecomputeOutcome, RuntimeError> {
        let outcome = self.controller.process(
            &event,
            &prev,
            &self.hardware,
            &self.samples,
            &mut self.sims,
            &self.catalogs,
        )?;
        if !outcome.noop {
            let sample_rows = self.samples.all();
            let out = self.rollup_engine.aggregate(
                self.hardware.rows(),
                &sample_rows,
                self.sims.rows(),
                &self.catalogs,
            );
            self.rollups.replace(out.nodes, out.project);
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sporecast_contracts::hardware::{
        AnalogId, AnalogyRef, Dimension, HardwareKind, HardwareMetadata, SpecClass,
    };
    use sporecast_contracts::sample::{
        Device, DeviceType, SampleMetadata, Technique,
    };
    use sporecast_contracts::simulation::SimMode;
    use sporecast_engines::catalog::PriorCatalog;

    fn runtime() -> ProjectRuntime {
        let priors = PriorCatalog::from_json_str(
            r#"{"heritage-analog": [5.0, 10.0, 20.0, 40.0, 80.0]}"#,
        )
        .unwrap();
        ProjectRuntime::new(
            Catalogs::builtin_with_priors(priors),
            SimConfig { draw_count: 400 },
        )
    }

    fn hw_id(id: &str) -> HardwareId {
        HardwareId::new(id).unwrap()
    }

    fn sampled_generic(id: &str, parent: Option<&str>, level: u8, extent: f64) -> HardwareElement {
        HardwareElement::v1(
            hw_id(id),
            parent.map(hw_id),
            level,
            HardwareKind::Sampled,
            Some(Dimension::Area),
            Some(extent),
            Some(AnalogyRef::Generic),
            None,
            None,
            None,
            HardwareMetadata::default(),
        )
        .unwrap()
    }

    fn implied_of(id: &str, link: &str, level: u8, extent: f64) -> HardwareElement {
        HardwareElement::v1(
            hw_id(id),
            None,
            level,
            HardwareKind::ImpliedUnsampled,
            Some(Dimension::Area),
            Some(extent),
            None,
            Some(hw_id(link)),
            None,
            None,
            HardwareMetadata::default(),
        )
        .unwrap()
    }

    fn swab(id: &str, hw: &str, cfu: u32, extent: f64, fraction: f64) -> Sample {
        Sample::v1(
            SampleId::new(id).unwrap(),
            hw_id(hw),
            true,
            extent,
            Device::Swab,
            DeviceType::PuritanCotton,
            Technique::NasaStandard,
            fraction,
            cfu,
            SampleMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn at_runtime_01_single_component_lifecycle() {
        let mut rt = runtime();
        let outcome = rt
            .load(
                vec![sampled_generic("panel", None, 2, 1.0)],
                vec![swab("s1", "panel", 10, 0.1, 1.0)],
            )
            .unwrap();
        assert!(!outcome.noop);

        let rec = rt.sims().get(&hw_id("panel")).unwrap();
        assert_eq!(rec.mode, SimMode::Posterior);
        let mean_eff = 45.56431672969219 / (45.56431672969219 + 100.24149680532281);
        let expected = 10.5 / (0.1 * mean_eff);
        let got = rec.density.mean();
        assert!(
            (got - expected).abs() / expected < 0.2,
            "posterior mean {got} far from {expected}"
        );
        let project = rt.rollups().project().unwrap();
        assert_eq!(project.area.as_ref().unwrap().total_extent, 1.0);
        assert_eq!(project.area.as_ref().unwrap().sampled_extent, 0.1);

        let outcome = rt.remove_hardware(&hw_id("panel")).unwrap();
        assert!(!outcome.noop);
        assert!(rt.sims().is_empty());
        assert!(rt.samples().is_empty());
        let project = rt.rollups().project();
        assert!(project.is_none() || project.unwrap().is_empty());
    }

    #[test]
    fn at_runtime_02_sample_edit_recomputes_implied_dependent() {
        let mut rt = runtime();
        rt.load(
            vec![
                sampled_generic("a", None, 2, 1.0),
                implied_of("b", "a", 2, 2.0),
            ],
            vec![swab("s1", "a", 3, 0.2, 0.8)],
        )
        .unwrap();
        assert!(rt.sims().get(&hw_id("b")).is_some());

        let outcome = rt.insert_sample(swab("s2", "a", 7, 0.3, 0.8)).unwrap();
        assert!(!outcome.noop);

        let a = rt.sims().get(&hw_id("a")).unwrap();
        let b = rt.sims().get(&hw_id("b")).unwrap();
        assert_eq!(a.mode, SimMode::Posterior);
        assert_eq!(b.mode, SimMode::Implied);
        // The dependent mirrors the refreshed source within the same event.
        assert_eq!(b.density, a.density);
        assert_eq!(
            b.link,
            Some(sporecast_contracts::simulation::SimLink::Hardware(hw_id("a")))
        );
    }

    #[test]
    fn at_runtime_03_metadata_edit_is_a_verified_noop() {
        let mut rt = runtime();
        rt.load(
            vec![sampled_generic("panel", None, 2, 1.0)],
            vec![swab("s1", "panel", 10, 0.1, 1.0)],
        )
        .unwrap();
        let sims_before = rt.sims().fingerprint();
        let rollups_before = rt.rollups().fingerprint();

        let mut edited = rt.hardware().get(&hw_id("panel")).unwrap().clone();
        edited.metadata.notes = Some("IPA wiped before integration".to_string());
        let mut fields = BTreeSet::new();
        fields.insert(HardwareField::Notes);
        let outcome = rt.update_hardware(edited, fields).unwrap();

        assert!(outcome.noop);
        assert_eq!(rt.sims().fingerprint(), sims_before);
        assert_eq!(rt.rollups().fingerprint(), rollups_before);
    }

    #[test]
    fn at_runtime_04_incremental_matches_from_scratch_shape() {
        let hardware = vec![
            sampled_generic("a", None, 2, 1.0),
            implied_of("b", "a", 2, 2.0),
        ];
        let s1 = swab("s1", "a", 3, 0.2, 0.8);
        let s2 = swab("s2", "a", 7, 0.3, 0.8);

        let mut incremental = runtime();
        incremental.load(hardware.clone(), vec![s1.clone()]).unwrap();
        incremental.insert_sample(s2.clone()).unwrap();

        let mut scratch = runtime();
        scratch.load(hardware, vec![s1, s2]).unwrap();

        let keys_inc: Vec<&HardwareId> = incremental.sims().rows().keys().collect();
        let keys_scr: Vec<&HardwareId> = scratch.sims().rows().keys().collect();
        assert_eq!(keys_inc, keys_scr);
        for (id, rec) in incremental.sims().rows() {
            let other = scratch.sims().get(id).unwrap();
            assert_eq!(rec.mode, other.mode);
            assert_eq!(rec.link, other.link);
            assert_eq!(rec.density.draw_count(), other.density.draw_count());
            assert_eq!(rec.cfu.draw_count(), other.cfu.draw_count());
        }
    }

    #[test]
    fn at_runtime_05_adding_a_child_coerces_parent_and_drops_its_record() {
        let mut rt = runtime();
        rt.load(
            vec![sampled_generic("bus", None, 2, 1.0)],
            vec![swab("s1", "bus", 2, 0.1, 0.8)],
        )
        .unwrap();
        assert!(rt.sims().get(&hw_id("bus")).is_some());

        let child = sampled_generic("panel", Some("bus"), 3, 0.5);
        rt.insert_hardware(child).unwrap();

        let bus = rt.hardware().get(&hw_id("bus")).unwrap();
        assert_eq!(bus.kind, HardwareKind::Rollup);
        assert!(rt.sims().get(&hw_id("bus")).is_none());
    }

    #[test]
    fn at_runtime_06_spec_component_rolls_up_deterministically() {
        let mut rt = runtime();
        let mut tank = HardwareElement::v1(
            hw_id("tank"),
            None,
            2,
            HardwareKind::SpecUnsampled,
            Some(Dimension::Volume),
            Some(10.0),
            None,
            None,
            Some(SpecClass::EncapsulatedNonMetalAvg),
            None,
            HardwareMetadata::default(),
        )
        .unwrap();
        tank.metadata.composition = Some("PWB potting".to_string());
        rt.load(vec![tank], Vec::new()).unwrap();

        let rec = rt.sims().get(&hw_id("tank")).unwrap();
        assert_eq!(rec.mode, SimMode::Spec);
        assert_eq!(rec.density.mean(), 130.0);
        assert_eq!(rec.cfu.mean(), 1300.0);
        let project = rt.rollups().project().unwrap();
        assert!(project.area.is_none());
        assert_eq!(project.volume.as_ref().unwrap().total_extent, 10.0);
    }

    #[test]
    fn at_runtime_07_named_prior_component_survives_without_samples() {
        let mut rt = runtime();
        let mut wheel = sampled_generic("wheel", None, 2, 1.0);
        wheel.analogy = Some(AnalogyRef::Named(AnalogId::new("heritage-analog").unwrap()));
        rt.load(vec![wheel], Vec::new()).unwrap();

        let rec = rt.sims().get(&hw_id("wheel")).unwrap();
        assert_eq!(rec.mode, SimMode::Prior);
        assert_eq!(rec.density.draw_count(), Some(5));
    }

    #[test]
    fn at_runtime_08_implied_link_to_unsimulatable_source_is_excluded() {
        let mut rt = runtime();
        // The source is valid but has no usable sample, so neither it nor
        // its dependent can be simulated; the load must still succeed.
        let outcome = rt
            .load(
                vec![
                    sampled_generic("c", None, 2, 1.0),
                    implied_of("b", "c", 2, 2.0),
                ],
                Vec::new(),
            )
            .unwrap();
        assert!(!outcome.noop);
        assert!(rt.sims().is_empty());
        assert!(rt.rollups().project().is_none());
    }

    #[test]
    fn at_runtime_09_sample_alerts_flag_borrowed_efficiency() {
        let mut rt = runtime();
        rt.load(
            vec![sampled_generic("panel", None, 2, 1.0)],
            vec![swab("s1", "panel", 10, 0.1, 1.0)],
        )
        .unwrap();
        // A wipe pairing without its own fitted parameters, kept out of the
        // accounting.
        let wipe = Sample::v1(
            SampleId::new("s2").unwrap(),
            hw_id("panel"),
            false,
            0.5,
            Device::Wipe,
            DeviceType::Tx3211,
            Technique::NasaStandard,
            0.25,
            0,
            SampleMetadata::default(),
        )
        .unwrap();
        rt.insert_sample(wipe).unwrap();

        let alerts = rt.sample_alerts();
        assert_eq!(alerts.len(), 2);
        let s1 = alerts.iter().find(|a| a.sample_id.as_str() == "s1").unwrap();
        assert!(s1.valid && s1.accountable && !s1.borrowed_efficiency);
        let s2 = alerts.iter().find(|a| a.sample_id.as_str() == "s2").unwrap();
        assert!(s2.valid && !s2.accountable && s2.borrowed_efficiency);

        assert_eq!(
            rt.default_pour_fraction(DeviceType::Tx3211, Technique::NasaStandard),
            Some(0.25)
        );
        assert_eq!(
            rt.default_pour_fraction(DeviceType::PuritanCotton, Technique::NasaStandard),
            Some(0.8)
        );
    }
}
