//! Event-level treaty cascade.
//!
//! Policies sharing a treaty participation key are summed into one
//! `events × (2 + treaties)` matrix per key. Treaties are then applied one
//! layer at a time: at layer `t` every group taking part in treaty `t` has
//! it applied, and groups that agree on their participation in the
//! remaining treaties are merged. After the last layer one group is left.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use ndarray::{Array1, Array2, Axis};
use tracing::debug;

use crate::error::ReinsuranceError;
use crate::treaty::{Treaty, TreatyKind};

pub const RETENTION: usize = 0;
pub const CLAIM: usize = 1;
/// Column of the first treaty; treaty `t` is in column `TREATY_OFFSET + t`.
pub const TREATY_OFFSET: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct CascadeResult {
    /// `events × (2 + treaties)`: retention, claim, cession per treaty.
    pub matrix: Array2<f64>,
    /// Per treaty, the overspill per event, when there was any.
    pub overspill: Vec<Option<Array1<f64>>>,
}

/// Apply one treaty in place; returns the overspill per event, if any.
fn apply_treaty(kind: TreatyKind, col: usize, matrix: &mut Array2<f64>) -> Option<Array1<f64>> {
    let mut over = Array1::zeros(matrix.nrows());
    let mut spilled = false;
    match kind {
        TreatyKind::Proportional { max_cession_event } => {
            for (mut row, o) in matrix.axis_iter_mut(Axis(0)).zip(over.iter_mut()) {
                let excess = row[col] - max_cession_event;
                if excess > 0.0 {
                    row[col] = max_cession_event;
                    row[RETENTION] += excess;
                    *o = excess;
                    spilled = true;
                }
            }
        }
        // ceded policy by policy before aggregation
        TreatyKind::WorkingExcessOfLoss { .. } => {}
        TreatyKind::CatastropheExcessOfLoss { deductible, limit } => {
            for (mut row, o) in matrix.axis_iter_mut(Axis(0)).zip(over.iter_mut()) {
                let retention = row[RETENTION];
                let cession = (retention - deductible).clamp(0.0, limit - deductible);
                row[col] += cession;
                row[RETENTION] = retention - cession;
                if retention > limit {
                    *o = retention - cession;
                    spilled = true;
                }
            }
        }
    }
    spilled.then_some(over)
}

/// Run the cascade over groups keyed by policy group (one character per
/// treaty, `.` for non-participation). Consumes the group matrices.
pub fn cascade(
    groups: BTreeMap<String, Array2<f64>>,
    treaties: &[Treaty],
    num_events: usize,
) -> Result<CascadeResult, ReinsuranceError> {
    let width = TREATY_OFFSET + treaties.len();
    let mut current: BTreeMap<Vec<bool>, Array2<f64>> = BTreeMap::new();
    for (key, matrix) in groups {
        let flags: Vec<bool> = key.chars().map(|c| c != '.').collect();
        if flags.len() != treaties.len() || matrix.dim() != (num_events, width) {
            return Err(ReinsuranceError::InvalidInput(format!(
                "group {key:?} with a {:?} matrix does not fit {} treaties and {num_events} events",
                matrix.dim(),
                treaties.len()
            )));
        }
        merge(&mut current, flags, matrix);
    }

    let mut overspill: Vec<Option<Array1<f64>>> = vec![None; treaties.len()];
    for (t, treaty) in treaties.iter().enumerate() {
        let mut next = BTreeMap::new();
        for (key, mut matrix) in current {
            if key[0] {
                if let Some(over) = apply_treaty(treaty.kind, TREATY_OFFSET + t, &mut matrix) {
                    overspill[t] = Some(match overspill[t].take() {
                        Some(acc) => acc + over,
                        None => over,
                    });
                }
            }
            merge(&mut next, key[1..].to_vec(), matrix);
        }
        debug!(treaty = %treaty.id, kind = treaty.kind.label(), groups = next.len(), "applied treaty layer");
        current = next;
    }

    let matrix = current
        .into_values()
        .next()
        .unwrap_or_else(|| Array2::zeros((num_events, width)));
    Ok(CascadeResult { matrix, overspill })
}

fn merge(groups: &mut BTreeMap<Vec<bool>, Array2<f64>>, key: Vec<bool>, matrix: Array2<f64>) {
    match groups.entry(key) {
        Entry::Vacant(e) => {
            e.insert(matrix);
        }
        Entry::Occupied(mut e) => {
            *e.get_mut() += &matrix;
        }
    }
}
