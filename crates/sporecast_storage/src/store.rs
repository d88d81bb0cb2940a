#![forbid(unsafe_code)]

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use sporecast_contracts::hardware::{HardwareElement, HardwareId, HardwareKind};
use sporecast_contracts::rollup::RollupAggregate;
use sporecast_contracts::sample::{Sample, SampleId};
use sporecast_contracts::simulation::SimulationRecord;
use sporecast_contracts::{ContractViolation, Validate};

#[derive(Debug, Clone, PartialEq)]
pub enum StorageError {
    DuplicateKey { table: &'static str, key: String },
    UnknownKey { table: &'static str, key: String },
    ForeignKeyViolation { table: &'static str, key: String },
    LevelMismatch { id: String, expected: u8, got: u8 },
    ContractViolation(ContractViolation),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateKey { table, key } => write!(f, "{table}: duplicate key {key}"),
            Self::UnknownKey { table, key } => write!(f, "{table}: unknown key {key}"),
            Self::ForeignKeyViolation { table, key } => {
                write!(f, "{table}: foreign key {key} unresolved")
            }
            Self::LevelMismatch { id, expected, got } => {
                write!(f, "{id}: level {got}, parent implies {expected}")
            }
            Self::ContractViolation(v) => write!(f, "contract violation: {v}"),
        }
    }
}

impl std::error::Error for StorageError {}

impl From<ContractViolation> for StorageError {
    fn from(v: ContractViolation) -> Self {
        StorageError::ContractViolation(v)
    }
}

/// Everything a single-element deletion touched, so callers can cascade into
/// the sample and simulation tables and the change descriptor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RemovalCascade {
    /// The element and its whole subtree, in removal order.
    pub removed_ids: Vec<HardwareId>,
    /// Surviving implied components whose link pointed into the subtree;
    /// their links were cleared, invalidating them.
    pub cleared_implied: Vec<HardwareId>,
    /// Parent that lost its last child and was coerced back to an
    /// unconfigured component.
    pub coerced_parent: Option<HardwareId>,
}

/// The hardware hierarchy table. Referential integrity (parent exists, level
/// = parent level + 1) is enforced here; component completeness is not — an
/// invalid element is a legitimate row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HardwareStore {
    rows: BTreeMap<HardwareId, HardwareElement>,
}

impl HardwareStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &BTreeMap<HardwareId, HardwareElement> {
        &self.rows
    }

    pub fn get(&self, id: &HardwareId) -> Option<&HardwareElement> {
        self.rows.get(id)
    }

    pub fn contains(&self, id: &HardwareId) -> bool {
        self.rows.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn children_of(&self, id: &HardwareId) -> Vec<&HardwareElement> {
        self.rows
            .values()
            .filter(|e| e.parent_id.as_ref() == Some(id))
            .collect()
    }

    /// Inserts one element. If the parent was a leaf component it is coerced
    /// into a rollup with its component fields and group cleared; the coerced
    /// id is returned so the caller can drop the parent's samples and record.
    pub fn insert(&mut self, elem: HardwareElement) -> Result<Option<HardwareId>, StorageError> {
        elem.validate()?;
        if self.rows.contains_key(&elem.id) {
            return Err(StorageError::DuplicateKey {
                table: "hardware",
                key: elem.id.as_str().to_string(),
            });
        }
        let mut coerced = None;
        if let Some(parent_id) = &elem.parent_id {
            let parent = self
                .rows
                .get(parent_id)
                .ok_or_else(|| StorageError::ForeignKeyViolation {
                    table: "hardware",
                    key: parent_id.as_str().to_string(),
                })?;
            let expected = parent.level + 1;
            if elem.level != expected {
                return Err(StorageError::LevelMismatch {
                    id: elem.id.as_str().to_string(),
                    expected,
                    got: elem.level,
                });
            }
            if parent.kind != HardwareKind::Rollup {
                if let Some(parent) = self.rows.get_mut(parent_id) {
                    parent.kind = HardwareKind::Rollup;
                    parent.clear_component_fields();
                    parent.group = None;
                    coerced = Some(parent.id.clone());
                }
            }
        }
        self.rows.insert(elem.id.clone(), elem);
        Ok(coerced)
    }

    /// Replaces an existing row in place. The id, parent and level are fixed
    /// at insertion; edits to them arrive as remove + add.
    pub fn update(&mut self, elem: HardwareElement) -> Result<(), StorageError> {
        elem.validate()?;
        let existing = self
            .rows
            .get(&elem.id)
            .ok_or_else(|| StorageError::UnknownKey {
                table: "hardware",
                key: elem.id.as_str().to_string(),
            })?;
        if existing.parent_id != elem.parent_id || existing.level != elem.level {
            return Err(StorageError::ForeignKeyViolation {
                table: "hardware",
                key: elem.id.as_str().to_string(),
            });
        }
        self.rows.insert(elem.id.clone(), elem);
        Ok(())
    }

    /// Removes an element and its whole subtree, clears implied links that
    /// pointed into it, and coerces a parent left childless back into an
    /// unconfigured component.
    pub fn remove(&mut self, id: &HardwareId) -> Result<RemovalCascade, StorageError> {
        if !self.rows.contains_key(id) {
            return Err(StorageError::UnknownKey {
                table: "hardware",
                key: id.as_str().to_string(),
            });
        }
        let parent_id = self.rows[id].parent_id.clone();

        let mut removed: Vec<HardwareId> = Vec::new();
        let mut frontier = vec![id.clone()];
        while let Some(current) = frontier.pop() {
            for child in self.children_of(&current) {
                frontier.push(child.id.clone());
            }
            removed.push(current);
        }
        let removed_set: BTreeSet<&HardwareId> = removed.iter().collect();
        let mut cleared = Vec::new();
        for elem in self.rows.values_mut() {
            if removed_set.contains(&elem.id) {
                continue;
            }
            if let Some(link) = &elem.implied_link {
                if removed_set.contains(link) {
                    elem.implied_link = None;
                    cleared.push(elem.id.clone());
                }
            }
        }
        for rid in &removed {
            self.rows.remove(rid);
        }

        let mut coerced_parent = None;
        if let Some(pid) = parent_id {
            let childless = self.children_of(&pid).is_empty();
            if childless {
                if let Some(parent) = self.rows.get_mut(&pid) {
                    parent.kind = HardwareKind::Sampled;
                    parent.clear_component_fields();
                    parent.group = None;
                    coerced_parent = Some(pid);
                }
            }
        }

        Ok(RemovalCascade {
            removed_ids: removed,
            cleared_implied: cleared,
            coerced_parent,
        })
    }

    /// Swaps in a whole new table (bulk import / project load) after checking
    /// id uniqueness and referential integrity across the batch.
    pub fn replace_all(&mut self, elems: Vec<HardwareElement>) -> Result<(), StorageError> {
        let mut rows: BTreeMap<HardwareId, HardwareElement> = BTreeMap::new();
        for elem in elems {
            elem.validate()?;
            if rows.contains_key(&elem.id) {
                return Err(StorageError::DuplicateKey {
                    table: "hardware",
                    key: elem.id.as_str().to_string(),
                });
            }
            rows.insert(elem.id.clone(), elem);
        }
        for elem in rows.values() {
            if let Some(parent_id) = &elem.parent_id {
                let parent =
                    rows.get(parent_id)
                        .ok_or_else(|| StorageError::ForeignKeyViolation {
                            table: "hardware",
                            key: parent_id.as_str().to_string(),
                        })?;
                if elem.level != parent.level + 1 {
                    return Err(StorageError::LevelMismatch {
                        id: elem.id.as_str().to_string(),
                        expected: parent.level + 1,
                        got: elem.level,
                    });
                }
            }
        }
        self.rows = rows;
        Ok(())
    }
}

/// The sample table. Samples must reference an existing hardware row; that
/// the row is a valid Sampled component is an eligibility question, not a
/// storage one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SampleStore {
    rows: BTreeMap<SampleId, Sample>,
}

impl SampleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &BTreeMap<SampleId, Sample> {
        &self.rows
    }

    pub fn get(&self, id: &SampleId) -> Option<&Sample> {
        self.rows.get(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Cloned snapshot of every row, in id order. The compute engines take
    /// sample slices.
    pub fn all(&self) -> Vec<Sample> {
        self.rows.values().cloned().collect()
    }

    pub fn insert(&mut self, sample: Sample, hardware: &HardwareStore) -> Result<(), StorageError> {
        sample.validate()?;
        if self.rows.contains_key(&sample.id) {
            return Err(StorageError::DuplicateKey {
                table: "samples",
                key: sample.id.as_str().to_string(),
            });
        }
        if !hardware.contains(&sample.hardware_id) {
            return Err(StorageError::ForeignKeyViolation {
                table: "samples",
                key: sample.hardware_id.as_str().to_string(),
            });
        }
        self.rows.insert(sample.id.clone(), sample);
        Ok(())
    }

    pub fn update(&mut self, sample: Sample) -> Result<(), StorageError> {
        sample.validate()?;
        let existing = self
            .rows
            .get(&sample.id)
            .ok_or_else(|| StorageError::UnknownKey {
                table: "samples",
                key: sample.id.as_str().to_string(),
            })?;
        if existing.hardware_id != sample.hardware_id {
            return Err(StorageError::ForeignKeyViolation {
                table: "samples",
                key: sample.hardware_id.as_str().to_string(),
            });
        }
        self.rows.insert(sample.id.clone(), sample);
        Ok(())
    }

    pub fn remove(&mut self, id: &SampleId) -> Result<Sample, StorageError> {
        self.rows.remove(id).ok_or_else(|| StorageError::UnknownKey {
            table: "samples",
            key: id.as_str().to_string(),
        })
    }

    /// Drops every sample attached to any of the given hardware ids,
    /// returning the removed rows (deletion cascade).
    pub fn remove_for_hardware(&mut self, ids: &[HardwareId]) -> Vec<Sample> {
        let targets: BTreeSet<&HardwareId> = ids.iter().collect();
        let doomed: Vec<SampleId> = self
            .rows
            .values()
            .filter(|s| targets.contains(&s.hardware_id))
            .map(|s| s.id.clone())
            .collect();
        doomed
            .iter()
            .filter_map(|id| self.rows.remove(id))
            .collect()
    }

    pub fn replace_all(&mut self, samples: Vec<Sample>, hardware: &HardwareStore) -> Result<(), StorageError> {
        let mut rows: BTreeMap<SampleId, Sample> = BTreeMap::new();
        for sample in samples {
            sample.validate()?;
            if rows.contains_key(&sample.id) {
                return Err(StorageError::DuplicateKey {
                    table: "samples",
                    key: sample.id.as_str().to_string(),
                });
            }
            if !hardware.contains(&sample.hardware_id) {
                return Err(StorageError::ForeignKeyViolation {
                    table: "samples",
                    key: sample.hardware_id.as_str().to_string(),
                });
            }
            rows.insert(sample.id.clone(), sample);
        }
        self.rows = rows;
        Ok(())
    }
}

/// Simulation records keyed by component id. Content-addressable via a
/// sha-256 fingerprint over the canonical JSON encoding, which is what the
/// no-op guarantee is checked against.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SimulationStore {
    rows: BTreeMap<HardwareId, SimulationRecord>,
}

impl SimulationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &BTreeMap<HardwareId, SimulationRecord> {
        &self.rows
    }

    pub fn get(&self, id: &HardwareId) -> Option<&SimulationRecord> {
        self.rows.get(id)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn upsert(&mut self, id: HardwareId, record: SimulationRecord) {
        self.rows.insert(id, record);
    }

    pub fn remove(&mut self, id: &HardwareId) -> Option<SimulationRecord> {
        self.rows.remove(id)
    }

    /// Drops every record whose component id fails the predicate.
    pub fn retain(&mut self, mut keep: impl FnMut(&HardwareId) -> bool) {
        self.rows.retain(|id, _| keep(id));
    }

    pub fn clear(&mut self) {
        self.rows.clear();
    }

    /// Hex sha-256 over the canonical JSON encoding. BTreeMap ordering makes
    /// the encoding deterministic, so equal content means equal fingerprint.
    pub fn fingerprint(&self) -> String {
        fingerprint_json(&self.rows)
    }
}

/// Rollup aggregates for every eligible rollup node plus the project-wide
/// fold. Fully derived; replaced wholesale after each aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RollupStore {
    nodes: BTreeMap<HardwareId, RollupAggregate>,
    project: Option<RollupAggregate>,
}

impl RollupStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &BTreeMap<HardwareId, RollupAggregate> {
        &self.nodes
    }

    pub fn node(&self, id: &HardwareId) -> Option<&RollupAggregate> {
        self.nodes.get(id)
    }

    pub fn project(&self) -> Option<&RollupAggregate> {
        self.project.as_ref()
    }

    pub fn replace(
        &mut self,
        nodes: BTreeMap<HardwareId, RollupAggregate>,
        project: Option<RollupAggregate>,
    ) {
        self.nodes = nodes;
        self.project = project;
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.project = None;
    }

    pub fn fingerprint(&self) -> String {
        fingerprint_json(&(&self.nodes, &self.project))
    }
}

fn fingerprint_json<T: serde::Serialize>(value: &T) -> String {
    // Serialization of in-memory rows cannot fail; fall back to an empty
    // payload rather than propagate.
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sporecast_contracts::hardware::{Dimension, HardwareMetadata};
    use sporecast_contracts::sample::{Device, DeviceType, SampleMetadata, Technique};
    use sporecast_contracts::simulation::{DrawSet, SimMode};

    fn elem(id: &str, parent: Option<&str>, level: u8, kind: HardwareKind) -> HardwareElement {
        HardwareElement::v1(
            HardwareId::new(id).unwrap(),
            parent.map(|p| HardwareId::new(p).unwrap()),
            level,
            kind,
            Some(Dimension::Area),
            Some(1.0),
            None,
            None,
            None,
            None,
            HardwareMetadata::default(),
        )
        .unwrap()
    }

    fn sample(id: &str, hw: &str) -> Sample {
        Sample::v1(
            SampleId::new(id).unwrap(),
            HardwareId::new(hw).unwrap(),
            true,
            0.1,
            Device::Swab,
            DeviceType::PuritanCotton,
            Technique::NasaStandard,
            0.8,
            1,
            SampleMetadata::default(),
        )
        .unwrap()
    }

    #[test]
    fn at_store_01_insert_coerces_component_parent_to_rollup() {
        let mut store = HardwareStore::new();
        store.insert(elem("bus", None, 2, HardwareKind::Sampled)).unwrap();
        let coerced = store
            .insert(elem("panel", Some("bus"), 3, HardwareKind::Sampled))
            .unwrap();
        assert_eq!(coerced, Some(HardwareId::new("bus").unwrap()));
        let bus = store.get(&HardwareId::new("bus").unwrap()).unwrap();
        assert_eq!(bus.kind, HardwareKind::Rollup);
        assert!(bus.dimension.is_none() && bus.extent.is_none());
    }

    #[test]
    fn at_store_02_insert_rejects_bad_parent_or_level() {
        let mut store = HardwareStore::new();
        store.insert(elem("bus", None, 2, HardwareKind::Rollup)).unwrap();
        let orphan = elem("x", Some("ghost"), 3, HardwareKind::Sampled);
        assert!(matches!(
            store.insert(orphan),
            Err(StorageError::ForeignKeyViolation { .. })
        ));
        let skipped = elem("y", Some("bus"), 4, HardwareKind::Sampled);
        assert!(matches!(
            store.insert(skipped),
            Err(StorageError::LevelMismatch { .. })
        ));
    }

    #[test]
    fn at_store_03_remove_cascades_subtree_and_implied_links() {
        let mut store = HardwareStore::new();
        store.insert(elem("sc", None, 2, HardwareKind::Rollup)).unwrap();
        store.insert(elem("inst", Some("sc"), 3, HardwareKind::Rollup)).unwrap();
        store.insert(elem("det", Some("inst"), 4, HardwareKind::Sampled)).unwrap();
        let mut shadow = elem("shadow", Some("sc"), 3, HardwareKind::ImpliedUnsampled);
        shadow.implied_link = Some(HardwareId::new("det").unwrap());
        store.insert(shadow).unwrap();

        let cascade = store.remove(&HardwareId::new("inst").unwrap()).unwrap();
        assert!(cascade
            .removed_ids
            .contains(&HardwareId::new("det").unwrap()));
        assert_eq!(
            cascade.cleared_implied,
            vec![HardwareId::new("shadow").unwrap()]
        );
        let shadow = store.get(&HardwareId::new("shadow").unwrap()).unwrap();
        assert!(shadow.implied_link.is_none());
    }

    #[test]
    fn at_store_04_remove_last_child_coerces_parent_back_to_component() {
        let mut store = HardwareStore::new();
        store.insert(elem("bus", None, 2, HardwareKind::Sampled)).unwrap();
        store.insert(elem("panel", Some("bus"), 3, HardwareKind::Sampled)).unwrap();

        let cascade = store.remove(&HardwareId::new("panel").unwrap()).unwrap();
        assert_eq!(cascade.coerced_parent, Some(HardwareId::new("bus").unwrap()));
        let bus = store.get(&HardwareId::new("bus").unwrap()).unwrap();
        assert!(bus.is_component());
        assert!(bus.dimension.is_none());
    }

    #[test]
    fn at_store_05_sample_fk_and_cascade_removal() {
        let mut hardware = HardwareStore::new();
        hardware.insert(elem("bus", None, 2, HardwareKind::Sampled)).unwrap();
        let mut samples = SampleStore::new();
        samples.insert(sample("s1", "bus"), &hardware).unwrap();
        assert!(matches!(
            samples.insert(sample("s2", "ghost"), &hardware),
            Err(StorageError::ForeignKeyViolation { .. })
        ));

        let removed = samples.remove_for_hardware(&[HardwareId::new("bus").unwrap()]);
        assert_eq!(removed.len(), 1);
        assert!(samples.is_empty());
    }

    #[test]
    fn at_store_06_simulation_fingerprint_is_content_addressed() {
        let mut a = SimulationStore::new();
        let mut b = SimulationStore::new();
        assert_eq!(a.fingerprint(), b.fingerprint());

        let rec = SimulationRecord::v1(
            SimMode::Spec,
            None,
            DrawSet::Scalar(50.0),
            DrawSet::Scalar(100.0),
        );
        a.upsert(HardwareId::new("bus").unwrap(), rec.clone());
        assert_ne!(a.fingerprint(), b.fingerprint());
        b.upsert(HardwareId::new("bus").unwrap(), rec);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
