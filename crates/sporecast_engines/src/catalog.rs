#![forbid(unsafe_code)]

use std::collections::BTreeMap;

use sporecast_contracts::hardware::{AnalogId, SpecClass};
use sporecast_contracts::sample::{DeviceType, Technique};

/// Lookup key for a recovery-efficiency distribution. The device family is
/// implied by the device type, so it is not part of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EfficiencyKey {
    pub device_type: DeviceType,
    pub technique: Technique,
}

/// Beta parameters for a device/technique pairing, or a pointer at another
/// pairing whose fitted parameters are reused.
#[derive(Debug, Clone, Copy, PartialEq)]
enum EfficiencyParams {
    Beta { alpha: f64, beta: f64 },
    Alias(EfficiencyKey),
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct EfficiencyEntry {
    params: EfficiencyParams,
    default_pour_fraction: f64,
}

/// Fitted Beta(alpha, beta) recovery-efficiency distributions per sampling
/// device type and processing technique, with the default pour fraction for
/// each pairing. Pairings without their own fit alias the closest fitted one;
/// aliases are resolved in a single hop.
#[derive(Debug, Clone)]
pub struct EfficiencyTable {
    entries: BTreeMap<EfficiencyKey, EfficiencyEntry>,
}

impl EfficiencyTable {
    pub fn builtin() -> Self {
        use DeviceType::*;
        use Technique::*;

        fn key(device_type: DeviceType, technique: Technique) -> EfficiencyKey {
            EfficiencyKey {
                device_type,
                technique,
            }
        }

        let mut entries = BTreeMap::new();
        let mut put = |k: EfficiencyKey, params: EfficiencyParams, fraction: f64| {
            entries.insert(
                k,
                EfficiencyEntry {
                    params,
                    default_pour_fraction: fraction,
                },
            );
        };
        let beta = |alpha: f64, beta: f64| EfficiencyParams::Beta { alpha, beta };
        let alias = |k: EfficiencyKey| EfficiencyParams::Alias(k);

        put(
            key(PuritanCotton, NasaStandard),
            beta(45.56431672969219, 100.24149680532281),
            0.8,
        );
        put(
            key(PuritanCotton, NasaStandardMembraneFiltration),
            beta(97.55218540553831, 191.9575261205754),
            0.92,
        );
        put(
            key(PuritanCotton, EsaStandard),
            alias(key(PuritanCotton, NasaStandard)),
            0.8,
        );
        put(
            key(PuritanCotton, EsaStandardMembraneFiltration),
            alias(key(PuritanCotton, NasaStandardMembraneFiltration)),
            0.92,
        );
        put(
            key(NylonFlocked, NasaStandard),
            beta(9.579630660559655, 23.74082381095219),
            0.8,
        );
        put(
            key(NylonFlocked, NasaStandardMembraneFiltration),
            alias(key(NylonFlocked, NasaStandard)),
            0.92,
        );
        put(
            key(NylonFlocked, EsaStandard),
            beta(68.16498856079723, 75.34025051456537),
            0.8,
        );
        put(
            key(NylonFlocked, EsaStandardMembraneFiltration),
            alias(key(NylonFlocked, EsaStandard)),
            0.92,
        );
        put(
            key(CopanPolyester, NasaStandard),
            alias(key(CopanPolyester, EsaStandard)),
            0.8,
        );
        put(
            key(CopanPolyester, NasaStandardMembraneFiltration),
            alias(key(CopanPolyester, EsaStandard)),
            0.92,
        );
        put(
            key(CopanPolyester, EsaStandard),
            beta(6.052080310455172, 42.3645621731862),
            0.8,
        );
        put(
            key(CopanPolyester, EsaStandardMembraneFiltration),
            alias(key(CopanPolyester, EsaStandard)),
            0.92,
        );
        put(
            key(CopanCotton, NasaStandard),
            beta(51.836071542660086, 362.8525007986206),
            0.8,
        );
        put(
            key(CopanCotton, NasaStandardMembraneFiltration),
            alias(key(CopanCotton, NasaStandard)),
            0.92,
        );
        put(
            key(CopanCotton, EsaStandard),
            alias(key(CopanCotton, NasaStandard)),
            0.8,
        );
        put(
            key(CopanCotton, EsaStandardMembraneFiltration),
            alias(key(CopanCotton, NasaStandard)),
            0.92,
        );
        put(
            key(Tx3211, NasaStandard),
            alias(key(Tx3211, NasaStandardMembraneFiltration)),
            0.25,
        );
        put(
            key(Tx3211, NasaStandardMembraneFiltration),
            beta(2.755428498737132, 7.13349822450835),
            0.92,
        );
        put(
            key(Tx3211, EsaStandard),
            alias(key(Tx3211, NasaStandardMembraneFiltration)),
            0.25,
        );
        put(
            key(Tx3211, EsaStandardMembraneFiltration),
            alias(key(Tx3211, NasaStandardMembraneFiltration)),
            0.92,
        );
        put(
            key(Tx3224, NasaStandard),
            alias(key(Tx3224, NasaStandardMembraneFiltration)),
            0.25,
        );
        put(
            key(Tx3224, NasaStandardMembraneFiltration),
            beta(38.27721767664384, 259.32814975926203),
            0.92,
        );
        put(
            key(Tx3224, EsaStandard),
            alias(key(Tx3224, NasaStandardMembraneFiltration)),
            0.25,
        );
        put(
            key(Tx3224, EsaStandardMembraneFiltration),
            alias(key(Tx3224, NasaStandardMembraneFiltration)),
            0.92,
        );

        Self { entries }
    }

    /// Beta parameters for a pairing, resolving an alias in one hop. `None`
    /// when the pairing is unknown or its alias target is not a direct fit.
    pub fn beta_params(&self, key: EfficiencyKey) -> Option<(f64, f64)> {
        match self.entries.get(&key)?.params {
            EfficiencyParams::Beta { alpha, beta } => Some((alpha, beta)),
            EfficiencyParams::Alias(target) => match self.entries.get(&target)?.params {
                EfficiencyParams::Beta { alpha, beta } => Some((alpha, beta)),
                EfficiencyParams::Alias(_) => None,
            },
        }
    }

    /// Whether the pairing borrows its parameters from another pairing.
    /// Aliased pairings still compute; callers may surface a caveat.
    pub fn is_alias(&self, key: EfficiencyKey) -> bool {
        matches!(
            self.entries.get(&key),
            Some(EfficiencyEntry {
                params: EfficiencyParams::Alias(_),
                ..
            })
        )
    }

    pub fn default_pour_fraction(&self, key: EfficiencyKey) -> Option<f64> {
        self.entries.get(&key).map(|e| e.default_pour_fraction)
    }
}

/// NASA-STD-8719.27 fixed bioburden densities per facility class. Area
/// classes are spores/m², volume classes spores/cm³.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecDensityTable;

impl SpecDensityTable {
    pub fn density(&self, class: SpecClass) -> f64 {
        match class {
            SpecClass::SurfaceIso7BioControl => 50.0,
            SpecClass::SurfaceIso7ParticleControl => 500.0,
            SpecClass::SurfaceIso8BioControl => 1_000.0,
            SpecClass::SurfaceIso8ParticleControl => 10_000.0,
            SpecClass::SurfaceUncontrolled => 100_000.0,
            SpecClass::EnclosedCleanroomParticleBioControl => 5_000.0,
            SpecClass::EnclosedCleanroomParticleControlOnly => 100_000.0,
            SpecClass::EnclosedUncontrolledManufacturing => 1_000_000.0,
            SpecClass::EncapsulatedElectronicsPieceParts => 150.0,
            SpecClass::EncapsulatedNonMetalAvg => 130.0,
            SpecClass::EncapsulatedNonMetalOther => 30.0,
        }
    }
}

#[derive(Debug)]
pub enum CatalogError {
    Parse(serde_json::Error),
    EmptyDraws { analog: String },
    NonFiniteDraw { analog: String },
    BadAnalogId { analog: String },
}

impl std::fmt::Display for CatalogError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parse(e) => write!(f, "prior catalog parse error: {e}"),
            Self::EmptyDraws { analog } => write!(f, "analog {analog}: empty draw vector"),
            Self::NonFiniteDraw { analog } => write!(f, "analog {analog}: non-finite draw"),
            Self::BadAnalogId { analog } => write!(f, "analog {analog}: invalid id"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<serde_json::Error> for CatalogError {
    fn from(e: serde_json::Error) -> Self {
        Self::Parse(e)
    }
}

/// Posterior density draws for each named analog, loaded from a JSON object
/// of `analog id -> [draws]`. Draw vectors are the empirical densities of
/// previously characterized hardware; they seed the prior for any Sampled
/// component that names the analog.
#[derive(Debug, Clone, Default)]
pub struct PriorCatalog {
    draws: BTreeMap<AnalogId, Vec<f64>>,
}

impl PriorCatalog {
    pub fn from_json_str(json: &str) -> Result<Self, CatalogError> {
        let raw: BTreeMap<String, Vec<f64>> = serde_json::from_str(json)?;
        let mut draws = BTreeMap::new();
        for (name, vals) in raw {
            if vals.is_empty() {
                return Err(CatalogError::EmptyDraws { analog: name });
            }
            if vals.iter().any(|v| !v.is_finite()) {
                return Err(CatalogError::NonFiniteDraw { analog: name });
            }
            let id = AnalogId::new(name.as_str())
                .map_err(|_| CatalogError::BadAnalogId { analog: name })?;
            draws.insert(id, vals);
        }
        Ok(Self { draws })
    }

    pub fn draws(&self, id: &AnalogId) -> Option<&[f64]> {
        self.draws.get(id).map(Vec::as_slice)
    }

    pub fn contains(&self, id: &AnalogId) -> bool {
        self.draws.contains_key(id)
    }
}

/// Everything the simulation engine looks up but never mutates.
#[derive(Debug, Clone)]
pub struct Catalogs {
    pub efficiency: EfficiencyTable,
    pub spec_density: SpecDensityTable,
    pub priors: PriorCatalog,
}

impl Catalogs {
    pub fn builtin_with_priors(priors: PriorCatalog) -> Self {
        Self {
            efficiency: EfficiencyTable::builtin(),
            spec_density: SpecDensityTable,
            priors,
        }
    }
}
