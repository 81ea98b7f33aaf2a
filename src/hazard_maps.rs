//! Hazard maps: intensities at target probabilities of exceedance.
//!
//! A hazard curve gives, for increasing intensity levels, decreasing PoEs.
//! The map value for a target PoE is found by inverting the curve with a
//! linear interpolation in log-log space.

use ndarray::{Array1, Array2, Array3, ArrayView1, ArrayView2, Axis, s};
use rayon::prelude::*;
use tracing::debug;

use crate::config::Imtls;
use crate::error::HazardError;
use crate::pmap::ProbabilityMap;
use crate::types::SiteId;

/// Floor applied to PoEs before taking logarithms.
pub const EPSILON: f64 = 1e-30;

/// Piecewise linear interpolation on ascending `xp`, clamped at both ends.
pub(crate) fn interp(x: f64, xp: &[f64], fp: &[f64]) -> f64 {
    let n = xp.len();
    if x <= xp[0] {
        return fp[0];
    }
    if x >= xp[n - 1] {
        return fp[n - 1];
    }
    if x.is_nan() {
        return f64::NAN;
    }
    let hi = xp.partition_point(|&v| v <= x);
    let lo = hi - 1;
    let dx = xp[hi] - xp[lo];
    if dx == 0.0 {
        return fp[hi];
    }
    fp[lo] + (x - xp[lo]) * (fp[hi] - fp[lo]) / dx
}

fn hazard_map_row(curve: ArrayView1<f64>, log_imls: &[f64], poes: &[f64]) -> Vec<f64> {
    let log_poes: Vec<f64> = curve.iter().rev().map(|&p| p.max(EPSILON).ln()).collect();
    // the greatest PoE of the curve, at the lowest level
    let max_log_poe = log_poes[log_poes.len() - 1];
    poes.iter()
        .map(|&poe| {
            if poe.ln() > max_log_poe {
                // the intensity would be below the lowest level: extrapolate to zero
                0.0
            } else {
                interp(poe.ln(), &log_poes, log_imls).exp()
            }
        })
        .collect()
}

/// Interpolate `N × L` hazard curves at the target `poes`, returning `N × P`
/// intensities. A target above the largest PoE of a curve maps to 0, so a
/// curve of zeros yields a map of zeros.
pub fn compute_hazard_maps(
    curves: ArrayView2<f64>,
    imls: &[f64],
    poes: &[f64],
) -> Result<Array2<f64>, HazardError> {
    let (num_curves, num_levels) = curves.dim();
    if num_levels != imls.len() {
        return Err(HazardError::LevelMismatch { got: num_levels, expected: imls.len() });
    }
    if num_levels == 0 {
        return Err(HazardError::InvalidParameter("empty intensity levels".into()));
    }
    if let Some(poe) = poes.iter().find(|p| p.is_nan()) {
        return Err(HazardError::InvalidParameter(format!("cannot interpolate at poe {poe}")));
    }
    let log_imls: Vec<f64> = imls.iter().rev().map(|l| l.ln()).collect();
    let values: Vec<f64> = (0..num_curves)
        .into_par_iter()
        .flat_map_iter(|i| hazard_map_row(curves.row(i), &log_imls, poes))
        .collect();
    Array2::from_shape_vec((num_curves, poes.len()), values)
        .map_err(|e| HazardError::ShapeMismatch(e.to_string()))
}

/// PoE of a curve at intensity `iml`, by log-log interpolation. Outside the
/// level range the curve is extended flat; a result at the [`EPSILON`]
/// floor is 0.
pub fn compute_poe_at(curve: ArrayView1<f64>, imls: &[f64], iml: f64) -> Result<f64, HazardError> {
    if curve.len() != imls.len() {
        return Err(HazardError::LevelMismatch { got: curve.len(), expected: imls.len() });
    }
    if imls.is_empty() || iml.is_nan() || iml <= 0.0 {
        return Err(HazardError::InvalidParameter(format!("cannot interpolate at iml {iml}")));
    }
    let log_imls: Vec<f64> = imls.iter().map(|l| l.ln()).collect();
    let log_poes: Vec<f64> = curve.iter().map(|&p| p.max(EPSILON).ln()).collect();
    // compared in log space, exp(ln(EPSILON)) is not exactly EPSILON
    let log_poe = interp(iml.ln(), &log_imls, &log_poes);
    Ok(if log_poe <= EPSILON.ln() { 0.0 } else { log_poe.exp() })
}

/// Hazard maps for every IMT of a PoE-valued map, as an `N × (I·P) × 1`
/// map; element `i * P + j` is the intensity of IMT `i` at `poes[j]`.
/// Only the first column of `pmap` is read.
pub fn make_hmap(pmap: &ProbabilityMap, imtls: &Imtls, poes: &[f64]) -> Result<ProbabilityMap, HazardError> {
    if pmap.shape_y() != imtls.num_levels() {
        return Err(HazardError::LevelMismatch { got: pmap.shape_y(), expected: imtls.num_levels() });
    }
    let num_poes = poes.len();
    let mut array = Array3::zeros((pmap.sids().len(), imtls.len() * num_poes, 1));
    for (i, (imt, levels, slice)) in imtls.iter().enumerate() {
        let curves = pmap.array.slice(s![.., slice, 0]);
        let data = compute_hazard_maps(curves, levels, poes)?;
        array
            .slice_mut(s![.., i * num_poes..(i + 1) * num_poes, 0])
            .assign(&data);
        debug!(imt, sites = data.nrows(), "computed hazard map");
    }
    ProbabilityMap::from_array(pmap.sids().to_vec(), array)
}

/// Spectral IMTs of `imtls` with their periods, sorted by period. PGA is
/// taken as `SA(0.0)`; other IMTs are left out.
pub fn imts_periods(imtls: &Imtls) -> Result<Vec<(String, f64)>, HazardError> {
    let mut out = Vec::new();
    for (imt, _, _) in imtls.iter() {
        let period = if imt == "PGA" {
            0.0
        } else if let Some(arg) = imt.strip_prefix("SA(").and_then(|rest| rest.strip_suffix(')')) {
            arg.trim()
                .parse::<f64>()
                .map_err(|_| HazardError::UnknownImt(imt.to_string()))?
        } else {
            continue;
        };
        out.push((imt.to_string(), period));
    }
    out.sort_by(|a, b| a.1.total_cmp(&b.1));
    Ok(out)
}

/// Uniform hazard spectra: for each site and target PoE, the intensity of
/// every spectral IMT in order of period.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformHazardSpectra {
    pub sids: Vec<SiteId>,
    pub poes: Vec<f64>,
    pub imts: Vec<String>,
    pub periods: Vec<f64>,
    /// `sites × poes × periods`.
    pub array: Array3<f64>,
}

impl UniformHazardSpectra {
    /// The spectrum of one site at `poes[p]`.
    pub fn spectrum(&self, sid: SiteId, p: usize) -> Option<ArrayView1<'_, f64>> {
        let row = self.sids.iter().position(|&s| s == sid)?;
        (p < self.poes.len()).then(|| self.array.slice(s![row, p, ..]))
    }
}

/// Uniform hazard spectra of a PoE-valued map, read off its hazard maps.
pub fn make_uhs(pmap: &ProbabilityMap, imtls: &Imtls, poes: &[f64]) -> Result<UniformHazardSpectra, HazardError> {
    let periods = imts_periods(imtls)?;
    let hmap = make_hmap(pmap, imtls, poes)?;
    let num_poes = poes.len();
    let mut array = Array3::zeros((pmap.sids().len(), num_poes, periods.len()));
    for (m, (imt, _)) in periods.iter().enumerate() {
        let i = imtls
            .iter()
            .position(|(name, _, _)| name == imt)
            .ok_or_else(|| HazardError::UnknownImt(imt.clone()))?;
        array
            .slice_mut(s![.., .., m])
            .assign(&hmap.array.slice(s![.., i * num_poes..(i + 1) * num_poes, 0]));
    }
    let (imts, periods) = periods.into_iter().unzip();
    Ok(UniformHazardSpectra { sids: pmap.sids().to_vec(), poes: poes.to_vec(), imts, periods, array })
}

/// Poissonian hazard curve from simulated ground motion values:
/// `1 - exp(-(investigation_time / duration) * #{gmv >= iml})`, where
/// `duration` is the time span covered by the simulation.
pub fn gmvs_to_haz_curve(gmvs: &[f64], imls: &[f64], investigation_time: f64, duration: f64) -> Array1<f64> {
    let ratio = investigation_time / duration;
    imls.iter()
        .map(|&iml| {
            let exceeding = gmvs.iter().filter(|&&gmv| gmv >= iml).count() as f64;
            1.0 - (-ratio * exceeding).exp()
        })
        .collect()
}

/// Hazard maps for a stack of curves `N × L × R`, one `N × P` map per
/// realization, stacked along the last axis.
pub fn compute_hazard_maps_by_rlz(
    curves: ndarray::ArrayView3<f64>,
    imls: &[f64],
    poes: &[f64],
) -> Result<Array3<f64>, HazardError> {
    let maps = curves
        .axis_iter(Axis(2))
        .map(|c| compute_hazard_maps(c, imls, poes).map(|m| m.insert_axis(Axis(2))))
        .collect::<Result<Vec<_>, _>>()?;
    let views: Vec<_> = maps.iter().map(|m| m.view()).collect();
    ndarray::concatenate(Axis(2), &views).map_err(|e| HazardError::ShapeMismatch(e.to_string()))
}
