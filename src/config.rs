use std::fs;
use std::ops::Range;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::reinsurance::LossRecord;
use crate::treaty::{PolicyRecord, ReinsuranceModelFile, Treaty, TreatyKind};
use crate::types::{AggId, EventId, SiteId};

/// Read a YAML or JSON file, chosen by extension (YAML unless `.json`).
pub fn load_file<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let is_json = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    if is_json {
        Ok(serde_json::from_str(&text)?)
    } else {
        Ok(serde_yaml::from_str(&text)?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImtLevels {
    pub imt: String,
    pub levels: Vec<f64>,
}

/// Intensity measure types with their levels, in a fixed order. The levels
/// of all IMTs are concatenated along the level axis of a probability map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<ImtLevels>", into = "Vec<ImtLevels>")]
pub struct Imtls {
    entries: Vec<ImtLevels>,
    offsets: Vec<usize>,
}

impl From<Vec<ImtLevels>> for Imtls {
    fn from(entries: Vec<ImtLevels>) -> Self {
        let mut offsets = Vec::with_capacity(entries.len() + 1);
        let mut total = 0;
        offsets.push(0);
        for entry in &entries {
            total += entry.levels.len();
            offsets.push(total);
        }
        Imtls { entries, offsets }
    }
}

impl From<Imtls> for Vec<ImtLevels> {
    fn from(imtls: Imtls) -> Self {
        imtls.entries
    }
}

impl Imtls {
    pub fn new(pairs: Vec<(String, Vec<f64>)>) -> Self {
        pairs
            .into_iter()
            .map(|(imt, levels)| ImtLevels { imt, levels })
            .collect::<Vec<_>>()
            .into()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of levels over all IMTs.
    pub fn num_levels(&self) -> usize {
        self.offsets[self.entries.len()]
    }

    fn position(&self, imt: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.imt == imt)
    }

    pub fn levels(&self, imt: &str) -> Option<&[f64]> {
        self.position(imt).map(|i| self.entries[i].levels.as_slice())
    }

    /// Range of the level axis occupied by `imt`.
    pub fn slice(&self, imt: &str) -> Option<Range<usize>> {
        self.position(imt).map(|i| self.offsets[i]..self.offsets[i + 1])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[f64], Range<usize>)> {
        self.entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.imt.as_str(), e.levels.as_slice(), self.offsets[i]..self.offsets[i + 1]))
    }
}

/// Hazard curve of one site, PoEs on the concatenated levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteCurve {
    pub sid: SiteId,
    pub poes: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinsuranceJob {
    #[serde(flatten)]
    pub model: ReinsuranceModelFile,
    /// Names of the policies by policy ID, `?` first. Defaults to the
    /// order of the policies in the model.
    #[serde(default)]
    pub policy_index: Option<Vec<String>>,
    pub losses: Vec<LossRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalculationConfig {
    pub investigation_time: f64,
    pub imtls: Imtls,
    /// Target PoEs of the hazard maps.
    #[serde(default)]
    pub poes: Vec<f64>,
    #[serde(default)]
    pub curves: Vec<SiteCurve>,
    #[serde(default)]
    pub reinsurance: Option<ReinsuranceJob>,
}

impl CalculationConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let config: CalculationConfig = load_file(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.investigation_time.is_finite() || self.investigation_time <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "investigation_time must be positive, got {}",
                self.investigation_time
            )));
        }
        if self.imtls.is_empty() {
            return Err(ConfigError::Invalid("no intensity measure types".into()));
        }
        for (imt, levels, _) in self.imtls.iter() {
            if levels.is_empty() || levels[0] <= 0.0 || levels.windows(2).any(|w| w[1] <= w[0]) {
                return Err(ConfigError::Invalid(format!(
                    "the levels of {imt} must be positive and strictly increasing"
                )));
            }
        }
        if let Some(poe) = self.poes.iter().find(|p| p.is_nan() || **p <= 0.0 || **p > 1.0) {
            return Err(ConfigError::Invalid(format!("poe {poe} is not in (0, 1]")));
        }
        let num_levels = self.imtls.num_levels();
        if let Some(curve) = self.curves.iter().find(|c| c.poes.len() != num_levels) {
            return Err(ConfigError::Invalid(format!(
                "the curve of site {:?} has {} values, expected {num_levels}",
                curve.sid,
                curve.poes.len()
            )));
        }
        Ok(())
    }

    /// Built-in demonstration job: a two-site hazard curve set and the
    /// non-proportional programme of a small regional portfolio.
    pub fn canonical() -> Self {
        // ── Hazard ─────────────────────────────────────────────────────────
        let imtls = Imtls::new(vec![
            ("PGA".to_string(),     vec![0.005, 0.01, 0.05, 0.1, 0.2, 0.4, 0.8]),
            ("SA(1.0)".to_string(), vec![0.005, 0.01, 0.05, 0.1, 0.2, 0.4, 0.8]),
        ]);
        let curves = vec![
            SiteCurve {
                sid: SiteId(0),
                poes: vec![0.98, 0.9, 0.4, 0.15, 0.04, 0.006, 0.0004,
                           0.95, 0.8, 0.25, 0.08, 0.015, 0.002, 0.0001],
            },
            SiteCurve {
                sid: SiteId(1),
                poes: vec![0.7, 0.5, 0.1, 0.03, 0.005, 0.0004, 0.0,
                           0.6, 0.35, 0.05, 0.01, 0.001, 0.00005, 0.0],
            },
        ];

        // ── Reinsurance ────────────────────────────────────────────────────
        let wxlr = |deductible, limit| TreatyKind::WorkingExcessOfLoss { deductible, limit };
        let treaties = vec![
            Treaty::new("WXLR_metro", wxlr(500.0, 3500.0), 'A'),
            Treaty::new("WXLR_rural", wxlr(200.0, 5000.0), 'B'),
            Treaty::new("CatXL_reg", TreatyKind::CatastropheExcessOfLoss { deductible: 50.0, limit: 2500.0 }, 'C'),
        ];
        let policy = |name: &str, liability, deductible, flags: [f64; 3]| PolicyRecord {
            policy: name.to_string(),
            liability,
            deductible,
            fractions: treaties.iter().map(|t| t.id.clone()).zip(flags).collect(),
        };
        let policies = vec![
            policy("VA_region_1", 8000.0, 100.0, [0.0, 0.0, 1.0]),
            policy("VA_region_2", 4000.0, 200.0, [1.0, 1.0, 1.0]),
            policy("rur_Ant_1",   9000.0, 500.0, [1.0, 1.0, 0.0]),
        ];
        let row = |event_id, agg_id, loss| LossRecord { event_id: EventId(event_id), agg_id: AggId(agg_id), loss };
        let losses = vec![
            row(25, 2, 9159.046),
            row(27, 1, 3141.0974),
            row(28, 1, 3136.3154),
            row(26, 1, 2859.9182),
            row(29, 1, 2603.0217),
            row(23, 1, 1730.9891),
            row(41, 0, 1178.0742),
            row(41, 1, 1178.0742),
            row(40, 0, 1170.1654),
            row(40, 1, 1170.1654),
            row(21, 1, 1157.2078),
            row(33, 0, 1117.877),
            row(13, 0, 764.2781),
            row(13, 1, 764.2781),
            row(5,  1, 761.1264),
            row(5,  0, 761.1264),
        ];

        CalculationConfig {
            investigation_time: 50.0,
            imtls,
            poes: vec![0.1, 0.02],
            curves,
            reinsurance: Some(ReinsuranceJob {
                model: ReinsuranceModelFile { treaties, policies },
                policy_index: None,
                losses,
            }),
        }
    }
}
