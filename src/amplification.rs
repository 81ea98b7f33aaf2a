//! Site amplification of rock hazard curves.
//!
//! An amplification function gives, per site code and intensity measure
//! type, a median factor and a lognormal sigma as a function of the rock
//! intensity. Site curves are obtained by convolving the rock curve with
//! that function.

use std::collections::{BTreeMap, BTreeSet};

use ndarray::{Array1, Array3, ArrayView1, s};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::debug;

use crate::config::Imtls;
use crate::error::HazardError;
use crate::hazard_maps::interp;
use crate::pmap::ProbabilityMap;

/// One row of an amplification table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AmplificationRow {
    pub ampcode: String,
    #[serde(default)]
    pub mag: Option<f64>,
    #[serde(default)]
    pub dist: Option<f64>,
    /// Rock intensity the factors apply to.
    pub level: f64,
    /// Median amplification factor per IMT.
    pub af: BTreeMap<String, f64>,
    /// Lognormal standard deviation per IMT.
    pub sigma: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<AmplificationRow>", into = "Vec<AmplificationRow>")]
pub struct AmplificationTable {
    rows: Vec<AmplificationRow>,
    imts: Vec<String>,
}

impl TryFrom<Vec<AmplificationRow>> for AmplificationTable {
    type Error = HazardError;

    fn try_from(rows: Vec<AmplificationRow>) -> Result<Self, Self::Error> {
        AmplificationTable::new(rows)
    }
}

impl From<AmplificationTable> for Vec<AmplificationRow> {
    fn from(table: AmplificationTable) -> Self {
        table.rows
    }
}

impl AmplificationTable {
    /// Every row must carry a factor and a sigma for the same IMTs.
    pub fn new(rows: Vec<AmplificationRow>) -> Result<Self, HazardError> {
        let Some(first) = rows.first() else {
            return Err(HazardError::InvalidParameter("empty amplification table".into()));
        };
        let imts: Vec<String> = first.af.keys().cloned().collect();
        for row in &rows {
            if !row.af.keys().eq(imts.iter()) || !row.sigma.keys().eq(imts.iter()) {
                return Err(HazardError::InvalidParameter(format!(
                    "row {} at level {} does not cover the IMTs {:?}",
                    row.ampcode, row.level, imts
                )));
            }
            if row.level <= 0.0 {
                return Err(HazardError::InvalidParameter(format!(
                    "row {} has non-positive level {}",
                    row.ampcode, row.level
                )));
            }
            if let Some((imt, s)) = row.sigma.iter().find(|(_, s)| **s < 0.0) {
                return Err(HazardError::InvalidParameter(format!(
                    "negative sigma {s} for {imt} in row {}",
                    row.ampcode
                )));
            }
        }
        Ok(AmplificationTable { rows, imts })
    }

    pub fn imts(&self) -> &[String] {
        &self.imts
    }

    pub fn ampcodes(&self) -> BTreeSet<&str> {
        self.rows.iter().map(|r| r.ampcode.as_str()).collect()
    }

    /// The largest sigma anywhere in the table.
    pub fn get_max_sigma(&self) -> f64 {
        self.rows
            .iter()
            .flat_map(|r| r.sigma.values().copied())
            .fold(0.0, f64::max)
    }

    /// Restrict a magnitude/distance dependent table to the rows closest to
    /// the given scenario, per site code. Rows without magnitude (distance)
    /// are kept as they are.
    pub fn for_scenario(&self, mag: f64, dist: f64) -> Self {
        let mut rows = Vec::with_capacity(self.rows.len());
        for code in self.ampcodes() {
            let of_code: Vec<&AmplificationRow> = self.rows.iter().filter(|r| r.ampcode == code).collect();
            let by_mag = closest(&of_code, mag, |r| r.mag);
            rows.extend(closest(&by_mag, dist, |r| r.dist).into_iter().cloned());
        }
        AmplificationTable { rows, imts: self.imts.clone() }
    }

    /// Amplification function of one site code and IMT, sorted by level.
    pub fn function(&self, ampcode: &str, imt: &str) -> Result<AmplFunction, HazardError> {
        if !self.imts.iter().any(|i| i == imt) {
            return Err(HazardError::UnknownImt(imt.to_string()));
        }
        let mut points: Vec<(f64, f64, f64)> = self
            .rows
            .iter()
            .filter(|r| r.ampcode == ampcode)
            .map(|r| (r.level, r.af[imt], r.sigma[imt]))
            .collect();
        if points.is_empty() {
            return Err(HazardError::UnknownAmpcode(ampcode.to_string()));
        }
        points.sort_by(|a, b| a.0.total_cmp(&b.0));
        if let Some(w) = points.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(HazardError::InvalidParameter(format!(
                "{ampcode} has several rows at level {}; select a magnitude/distance scenario",
                w[0].0
            )));
        }
        Ok(AmplFunction {
            levels: points.iter().map(|p| p.0).collect(),
            factors: points.iter().map(|p| p.1).collect(),
            sigmas: points.iter().map(|p| p.2).collect(),
        })
    }
}

fn closest<'a>(
    rows: &[&'a AmplificationRow],
    target: f64,
    key: impl Fn(&AmplificationRow) -> Option<f64>,
) -> Vec<&'a AmplificationRow> {
    let best = rows
        .iter()
        .filter_map(|r| key(r))
        .min_by(|a, b| (a - target).abs().total_cmp(&(b - target).abs()));
    match best {
        Some(best) => rows.iter().copied().filter(|r| key(r).is_none_or(|v| v == best)).collect(),
        None => rows.to_vec(),
    }
}

/// Median factor and sigma along the rock level, linearly interpolated and
/// clamped at the end points.
#[derive(Debug, Clone, PartialEq)]
pub struct AmplFunction {
    levels: Vec<f64>,
    factors: Vec<f64>,
    sigmas: Vec<f64>,
}

impl AmplFunction {
    pub fn factor(&self, level: f64) -> f64 {
        interp(level, &self.levels, &self.factors)
    }

    pub fn sigma(&self, level: f64) -> f64 {
        interp(level, &self.levels, &self.sigmas)
    }
}

/// Convolution engine for rock-to-site amplification.
#[derive(Debug, Clone)]
pub struct Amplifier {
    table: AmplificationTable,
    rock_imtls: Imtls,
    site_imtls: Imtls,
    normal: Normal,
}

impl Amplifier {
    pub fn new(table: AmplificationTable, rock_imtls: Imtls, site_imtls: Imtls) -> Result<Self, HazardError> {
        for (imt, _, _) in rock_imtls.iter() {
            if !table.imts().iter().any(|i| i == imt) {
                return Err(HazardError::UnknownImt(imt.to_string()));
            }
            if site_imtls.levels(imt).is_none() {
                return Err(HazardError::UnknownImt(imt.to_string()));
            }
        }
        let normal = Normal::new(0.0, 1.0).map_err(|e| HazardError::InvalidParameter(e.to_string()))?;
        Ok(Amplifier { table, rock_imtls, site_imtls, normal })
    }

    /// Site PoEs at `site_levels` from a rock curve.
    ///
    /// The probability `p_i - p_{i+1}` that the rock intensity falls in
    /// interval `i` is concentrated at the geometric mid-level `m_i` (the
    /// last interval at the last level). Each contributes
    /// `P(AF(m_i) * m_i * exp(sigma(m_i) * eps) > y)` with `eps ~ N(0, 1)`.
    pub fn amplify_curve(
        &self,
        ampcode: &str,
        imt: &str,
        rock_levels: &[f64],
        rock_poes: ArrayView1<f64>,
        site_levels: &[f64],
    ) -> Result<Array1<f64>, HazardError> {
        if rock_poes.len() != rock_levels.len() {
            return Err(HazardError::LevelMismatch { got: rock_poes.len(), expected: rock_levels.len() });
        }
        let function = self.table.function(ampcode, imt)?;
        let n = rock_levels.len();
        let mut site_poes = Array1::<f64>::zeros(site_levels.len());
        for i in 0..n {
            let (next_poe, mid) = if i + 1 < n {
                (rock_poes[i + 1], (rock_levels[i] * rock_levels[i + 1]).sqrt())
            } else {
                (0.0, rock_levels[i])
            };
            let occurrence = rock_poes[i] - next_poe;
            if occurrence <= 0.0 {
                continue;
            }
            let median = function.factor(mid) * mid;
            let sigma = function.sigma(mid);
            for (poe, &y) in site_poes.iter_mut().zip(site_levels) {
                let exceedance = if sigma == 0.0 {
                    if median > y { 1.0 } else { 0.0 }
                } else {
                    1.0 - self.normal.cdf((y / median).ln() / sigma)
                };
                *poe += occurrence * exceedance;
            }
        }
        site_poes.mapv_inplace(|p| p.clamp(0.0, 1.0));
        Ok(site_poes)
    }

    /// Amplify every curve of a PoE-valued map on the rock levels, one site
    /// code per site. The result lives on the site levels.
    pub fn amplify(&self, pmap: &ProbabilityMap, ampcodes: &[String]) -> Result<ProbabilityMap, HazardError> {
        if pmap.shape_y() != self.rock_imtls.num_levels() {
            return Err(HazardError::LevelMismatch {
                got: pmap.shape_y(),
                expected: self.rock_imtls.num_levels(),
            });
        }
        if ampcodes.len() != pmap.sids().len() {
            return Err(HazardError::ShapeMismatch(format!(
                "{} site codes for {} sites",
                ampcodes.len(),
                pmap.sids().len()
            )));
        }
        let mut array = Array3::zeros((pmap.sids().len(), self.site_imtls.num_levels(), pmap.shape_z()));
        for (imt, rock_levels, rock_slice) in self.rock_imtls.iter() {
            let (site_levels, site_slice) = match (self.site_imtls.levels(imt), self.site_imtls.slice(imt)) {
                (Some(levels), Some(slice)) => (levels, slice),
                _ => return Err(HazardError::UnknownImt(imt.to_string())),
            };
            for (row, code) in ampcodes.iter().enumerate() {
                for z in 0..pmap.shape_z() {
                    let rock = pmap.array.slice(s![row, rock_slice.clone(), z]);
                    let site = self.amplify_curve(code, imt, rock_levels, rock, site_levels)?;
                    array.slice_mut(s![row, site_slice.clone(), z]).assign(&site);
                }
            }
            debug!(imt, sites = ampcodes.len(), "amplified hazard curves");
        }
        ProbabilityMap::from_array(pmap.sids().to_vec(), array)
    }
}
