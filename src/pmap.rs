use std::collections::HashMap;
use std::ops::{BitOrAssign, Range};
use std::sync::OnceLock;

use ndarray::{Array1, Array3, ArrayView1, ArrayView2, ArrayView3, Axis, s};
use rayon::prelude::*;
use tracing::{debug, info};

use crate::curve::ProbabilityCurve;
use crate::error::HazardError;
use crate::types::{RuptureId, SiteId, SourceId};

/// Replacement for a probability of no exceedance of exactly 0 (a PoE of
/// exactly 1, unphysical unless the level is 0) before taking logarithms.
pub const MIN_PNE: f64 = 1.11e-16;

/// Weights of mutually exclusive ruptures, keyed by (source, rupture).
pub type MutexWeights = HashMap<(SourceId, RuptureId), f64>;

/// Rupture contexts as produced by the source-management layer, one row
/// per (rupture, site) pair.
#[derive(Debug, Clone, Default)]
pub struct RuptureContexts {
    pub occurrence_rate: Vec<f64>,
    /// Probabilities of 0, 1, 2, ... occurrences in the investigation time.
    /// Empty for Poissonian ruptures.
    pub probs_occur: Vec<Vec<f64>>,
    pub sids: Vec<SiteId>,
    pub src_id: Vec<SourceId>,
    pub rup_id: Vec<RuptureId>,
}

impl RuptureContexts {
    pub fn len(&self) -> usize {
        self.sids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }
}

/// Probability of no exceedance of a rupture over `itime`.
///
/// Poissonian ruptures (empty `probs`) use `exp(-rate * poe * itime)`;
/// otherwise `sum_k probs[k] * (1 - poe)^k`, i.e. none of the `k`
/// occurrences causes an exceedance.
pub fn get_pnes(rate: f64, probs: &[f64], poes: ArrayView1<f64>, itime: f64) -> Array1<f64> {
    if probs.is_empty() {
        return poes.mapv(|poe| (-rate * poe * itime).exp());
    }
    let mut pnes = Array1::from_elem(poes.len(), probs[0]);
    for (k, &prob) in probs.iter().enumerate().skip(1) {
        pnes.zip_mut_with(&poes, |pne, &poe| *pne += prob * (1.0 - poe).powi(k as i32));
    }
    pnes.mapv_inplace(|p| p.clamp(0.0, 1.0));
    pnes
}

/// Dense `sites × levels × groups` array of probabilities of no exceedance.
#[derive(Debug, Clone)]
pub struct ProbabilityMap {
    sids: Vec<SiteId>,
    pub array: Array3<f64>,
    /// site ID -> row; built on first use, reset whenever `sids` changes.
    sidx: OnceLock<HashMap<SiteId, usize>>,
}

impl ProbabilityMap {
    pub fn new(sids: Vec<SiteId>, shape_y: usize, shape_z: usize) -> Self {
        let array = Array3::zeros((sids.len(), shape_y, shape_z));
        ProbabilityMap { sids, array, sidx: OnceLock::new() }
    }

    /// Fill with a constant: 1.0 is the identity for independent
    /// accumulation, 0.0 for mutually exclusive accumulation.
    pub fn fill(mut self, value: f64) -> Self {
        self.array.fill(value);
        self
    }

    pub fn from_array(sids: Vec<SiteId>, array: Array3<f64>) -> Result<Self, HazardError> {
        if array.dim().0 != sids.len() {
            return Err(HazardError::ShapeMismatch(format!(
                "{} rows for {} sites",
                array.dim().0,
                sids.len()
            )));
        }
        Ok(ProbabilityMap { sids, array, sidx: OnceLock::new() })
    }

    pub fn sids(&self) -> &[SiteId] {
        &self.sids
    }

    pub fn set_sids(&mut self, sids: Vec<SiteId>) -> Result<(), HazardError> {
        if sids.len() != self.array.dim().0 {
            return Err(HazardError::ShapeMismatch(format!(
                "{} sites for {} rows",
                sids.len(),
                self.array.dim().0
            )));
        }
        self.sids = sids;
        self.sidx = OnceLock::new();
        Ok(())
    }

    pub fn shape_y(&self) -> usize {
        self.array.dim().1
    }

    pub fn shape_z(&self) -> usize {
        self.array.dim().2
    }

    pub fn sidx(&self) -> &HashMap<SiteId, usize> {
        self.sidx
            .get_or_init(|| self.sids.iter().enumerate().map(|(i, &sid)| (sid, i)).collect())
    }

    fn positions(&self, sids: &[SiteId]) -> Result<Vec<usize>, HazardError> {
        let sidx = self.sidx();
        sids.iter()
            .map(|sid| sidx.get(sid).copied().ok_or(HazardError::UnknownSite(*sid)))
            .collect()
    }

    /// Fold the contributions of a batch of rupture contexts into the map.
    ///
    /// `poes` has shape `(U, L, G)`; row `invs[i]` holds the PoEs of context
    /// row `i`. With empty `mutex_weight` the ruptures are independent and
    /// their PNEs multiply into the accumulator; otherwise they are mutually
    /// exclusive and `(1 - pne) * weight` is added.
    pub fn update(
        &mut self,
        poes: ArrayView3<f64>,
        invs: &[usize],
        ctx: &RuptureContexts,
        itime: f64,
        mutex_weight: &MutexWeights,
    ) -> Result<(), HazardError> {
        let (num_unique, num_levels, num_groups) = poes.dim();
        if num_levels != self.shape_y() || num_groups != self.shape_z() {
            return Err(HazardError::ShapeMismatch(format!(
                "poes have shape {:?}, map has {:?}",
                poes.dim(),
                self.array.dim()
            )));
        }
        if invs.len() != ctx.len()
            || ctx.occurrence_rate.len() != ctx.len()
            || ctx.probs_occur.len() != ctx.len()
        {
            return Err(HazardError::ShapeMismatch(format!(
                "{} inverse indices for {} contexts",
                invs.len(),
                ctx.len()
            )));
        }
        if let Some(&bad) = invs.iter().find(|&&inv| inv >= num_unique) {
            return Err(HazardError::ShapeMismatch(format!(
                "inverse index {bad} out of {num_unique} poes"
            )));
        }
        let sidx = self.positions(&ctx.sids)?;

        if mutex_weight.is_empty() {
            for g in 0..num_groups {
                update_indep(&mut self.array, g, poes.index_axis(Axis(2), g), invs, ctx, &sidx, itime);
            }
        } else {
            let weights = ctx
                .src_id
                .iter()
                .zip(&ctx.rup_id)
                .map(|(src, rup)| {
                    mutex_weight.get(&(*src, *rup)).copied().ok_or_else(|| {
                        HazardError::InvalidParameter(format!(
                            "no mutex weight for source {src:?}, rupture {rup:?}"
                        ))
                    })
                })
                .collect::<Result<Vec<f64>, _>>()?;
            if weights.len() != ctx.len() {
                return Err(HazardError::ShapeMismatch(format!(
                    "{} weights for {} contexts",
                    weights.len(),
                    ctx.len()
                )));
            }
            for g in 0..num_groups {
                update_mutex(
                    &mut self.array,
                    g,
                    poes.index_axis(Axis(2), g),
                    invs,
                    ctx,
                    &weights,
                    &sidx,
                    itime,
                );
            }
        }
        debug!(
            contexts = ctx.len(),
            groups = num_groups,
            mutex = !mutex_weight.is_empty(),
            "updated probability map"
        );
        Ok(())
    }

    /// Annual occurrence rates `-ln(pne) / itime` for the given level slice.
    pub fn to_rates(&self, levels: Range<usize>, itime: f64) -> Array3<f64> {
        self.array.slice(s![.., levels, ..]).mapv(|pne| {
            let pne = if pne == 0.0 { MIN_PNE } else { pne };
            -pne.ln() / itime
        })
    }

    /// Fan a `N × L × Gt` map of rates out to `N × L × R` realizations.
    /// `trt_rlzs[g]` lists the realizations that group `g` contributes to.
    pub fn expand(&self, num_rlzs: usize, trt_rlzs: &[Vec<usize>]) -> Result<Self, HazardError> {
        if trt_rlzs.len() != self.shape_z() {
            return Err(HazardError::ShapeMismatch(format!(
                "{} groups in the map, {} in the realization mapping",
                self.shape_z(),
                trt_rlzs.len()
            )));
        }
        let mut out = ProbabilityMap::new(self.sids.clone(), self.shape_y(), num_rlzs);
        for (g, rlzs) in trt_rlzs.iter().enumerate() {
            let column = self.array.slice(s![.., .., g]);
            for &rlz in rlzs {
                if rlz >= num_rlzs {
                    return Err(HazardError::ShapeMismatch(format!(
                        "realization {rlz} out of {num_rlzs}"
                    )));
                }
                let mut target = out.array.slice_mut(s![.., .., rlz]);
                target += &column;
            }
        }
        Ok(out)
    }

    /// One group column as a single-column map.
    pub fn extract(&self, g: usize) -> Self {
        let array = self.array.slice(s![.., .., g..g + 1]).to_owned();
        ProbabilityMap { sids: self.sids.clone(), array, sidx: OnceLock::new() }
    }

    pub fn split(&self) -> Vec<Self> {
        (0..self.shape_z()).map(|g| self.extract(g)).collect()
    }

    /// Drop the sites whose values are all exactly zero, keeping at least
    /// one row so the result is never empty.
    pub fn remove_zeros(&self) -> Self {
        if self.sids.is_empty() {
            return self.clone();
        }
        let totals = self.array.sum_axis(Axis(2)).sum_axis(Axis(1));
        let mut keep: Vec<usize> =
            totals.iter().enumerate().filter(|(_, t)| **t != 0.0).map(|(i, _)| i).collect();
        if keep.is_empty() {
            keep.push(0);
        }
        let sids = keep.iter().map(|&i| self.sids[i]).collect();
        let array = self.array.select(Axis(0), &keep);
        ProbabilityMap { sids, array, sidx: OnceLock::new() }
    }

    /// `self[other.sids, :, g] *= other[:, :, i]`; `other` may cover a
    /// subset of the sites of `self`.
    pub fn multiply_pnes(&mut self, other: &ProbabilityMap, g: usize, i: usize) -> Result<(), HazardError> {
        if other.shape_y() != self.shape_y() || g >= self.shape_z() || i >= other.shape_z() {
            return Err(HazardError::ShapeMismatch(format!(
                "cannot multiply column {i} of {:?} into column {g} of {:?}",
                other.array.dim(),
                self.array.dim()
            )));
        }
        let positions = self.positions(&other.sids)?;
        for (row, pos) in positions.into_iter().enumerate() {
            let mut target = self.array.slice_mut(s![pos, .., g]);
            target *= &other.array.slice(s![row, .., i]);
        }
        Ok(())
    }

    /// Union of exceedance with another map: PNEs of shared sites multiply,
    /// sites only present in `other` are appended.
    pub fn union_assign(&mut self, other: &ProbabilityMap) -> Result<(), HazardError> {
        if other.shape_y() != self.shape_y() || other.shape_z() != self.shape_z() {
            return Err(HazardError::ShapeMismatch(format!(
                "cannot combine {:?} with {:?}",
                self.array.dim(),
                other.array.dim()
            )));
        }
        let mut shared = Vec::new();
        let mut missing = Vec::new();
        {
            let sidx = self.sidx();
            for (row, sid) in other.sids.iter().enumerate() {
                match sidx.get(sid) {
                    Some(&pos) => shared.push((pos, row)),
                    None => missing.push(row),
                }
            }
        }
        for (pos, row) in shared {
            let mut target = self.array.slice_mut(s![pos, .., ..]);
            target *= &other.array.slice(s![row, .., ..]);
        }
        if !missing.is_empty() {
            let extra = other.array.select(Axis(0), &missing);
            self.array = ndarray::concatenate(Axis(0), &[self.array.view(), extra.view()])
                .map_err(|e| HazardError::ShapeMismatch(e.to_string()))?;
            self.sids.extend(missing.iter().map(|&row| other.sids[row]));
            self.sidx = OnceLock::new();
        }
        Ok(())
    }

    /// Reduce partial maps computed by independent workers. The union is
    /// associative and commutative, so the merge order is irrelevant.
    pub fn combine(maps: Vec<ProbabilityMap>) -> Result<Option<ProbabilityMap>, HazardError> {
        let n = maps.len();
        let out = maps
            .into_par_iter()
            .map(Ok::<_, HazardError>)
            .try_reduce_with(|mut acc, other| {
                acc.union_assign(&other)?;
                Ok(acc)
            })
            .transpose()?;
        info!(partial_maps = n, "combined probability maps");
        Ok(out)
    }

    /// The complementary map of probabilities of exceedance.
    pub fn to_poes(&self) -> Self {
        ProbabilityMap {
            sids: self.sids.clone(),
            array: 1.0 - &self.array,
            sidx: OnceLock::new(),
        }
    }

    /// Hazard curve (PoEs) of one site, `levels × groups`.
    pub fn curve(&self, sid: SiteId) -> Option<ProbabilityCurve> {
        let pos = *self.sidx().get(&sid)?;
        let pnes = self.array.index_axis(Axis(0), pos);
        Some(ProbabilityCurve::new(1.0 - &pnes))
    }
}

impl BitOrAssign<&ProbabilityMap> for ProbabilityMap {
    /// # Panics
    ///
    /// If the level or group counts of the maps differ; use
    /// [`ProbabilityMap::union_assign`] to get the error instead.
    fn bitor_assign(&mut self, other: &ProbabilityMap) {
        if let Err(e) = self.union_assign(other) {
            panic!("{e}");
        }
    }
}

fn update_indep(
    arr: &mut Array3<f64>,
    g: usize,
    poes: ArrayView2<f64>,
    invs: &[usize],
    ctx: &RuptureContexts,
    sidx: &[usize],
    itime: f64,
) {
    let rows = invs.iter().zip(&ctx.occurrence_rate).zip(&ctx.probs_occur).zip(sidx);
    for (((&inv, &rate), probs), &pos) in rows {
        let poe = poes.row(inv);
        let mut acc = arr.slice_mut(s![pos, .., g]);
        if probs.is_empty() {
            acc.zip_mut_with(&poe, |pne, &p| *pne *= (-rate * p * itime).exp());
        } else {
            acc *= &get_pnes(rate, probs, poe, itime);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn update_mutex(
    arr: &mut Array3<f64>,
    g: usize,
    poes: ArrayView2<f64>,
    invs: &[usize],
    ctx: &RuptureContexts,
    weights: &[f64],
    sidx: &[usize],
    itime: f64,
) {
    let rows = invs.iter().zip(&ctx.occurrence_rate).zip(&ctx.probs_occur).zip(weights).zip(sidx);
    for ((((&inv, &rate), probs), &w), &pos) in rows {
        let pne = get_pnes(rate, probs, poes.row(inv), itime);
        let mut acc = arr.slice_mut(s![pos, .., g]);
        acc.zip_mut_with(&pne, |a, &p| *a += (1.0 - p) * w);
    }
}
