//! Policy claims and event-level cessions of a reinsurance programme.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use ndarray::{Array2, s};
use rayon::prelude::*;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use tracing::{debug, info};

use crate::cascade::{CLAIM, RETENTION, TREATY_OFFSET, cascade};
use crate::error::ReinsuranceError;
use crate::treaty::{Policy, Treaty, TreatyKind};
use crate::types::{AggId, EventId, PolicyId, round6};

const RTOL: f64 = 1e-6;
const ATOL: f64 = 1e-6;

/// One row of the loss table produced by the risk calculation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossRecord {
    pub event_id: EventId,
    pub agg_id: AggId,
    pub loss: f64,
}

/// Claim of one policy for one event, split into retention and cessions.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyClaim {
    pub event_id: EventId,
    pub policy_id: PolicyId,
    pub claim: f64,
    pub retention: f64,
    /// One cession per treaty; non-proportional excess of loss per event
    /// is still 0 at this stage.
    pub cessions: Vec<f64>,
    pub policy_grp: String,
}

/// Insured part of a ground-up loss: `clip(loss, deductible, liability) - deductible`.
pub fn insured_losses(losses: &[f64], deductible: f64, liability: f64) -> Vec<f64> {
    losses
        .iter()
        .map(|&loss| (loss.clamp(deductible, liability.max(deductible)) - deductible).max(0.0))
        .collect()
}

/// Split claims into `retention, claim, <cession per treaty>` columns.
///
/// Proportional treaties take their fraction of the claim; working excess
/// of loss treaties then apply in order to what is retained. Catastrophe
/// treaties act on aggregated events and are left at 0 here. Cessions are
/// rounded to 6 decimals and the retention is what they leave of the claim.
pub fn claim_to_cessions(claims: &[f64], policy: &Policy, treaties: &[Treaty]) -> Array2<f64> {
    let mut out = Array2::zeros((claims.len(), TREATY_OFFSET + treaties.len()));
    for (mut row, &claim) in out.rows_mut().into_iter().zip(claims) {
        let mut retention = claim;
        for (t, (treaty, &fraction)) in treaties.iter().zip(&policy.fractions).enumerate() {
            if let TreatyKind::Proportional { .. } = treaty.kind {
                let cession = round6(claim * fraction);
                row[TREATY_OFFSET + t] = cession;
                retention -= cession;
            }
        }
        for (t, (treaty, &fraction)) in treaties.iter().zip(&policy.fractions).enumerate() {
            if let TreatyKind::WorkingExcessOfLoss { deductible, limit } = treaty.kind {
                if fraction > 0.0 {
                    let cession = round6((retention - deductible).clamp(0.0, limit - deductible));
                    row[TREATY_OFFSET + t] = cession;
                    retention -= cession;
                }
            }
        }
        row[RETENTION] = retention;
        row[CLAIM] = claim;
    }
    out
}

/// Claims of one policy: the losses of its aggregation key, net of
/// deductible and liability, in input order. Zero claims are dropped, and
/// the uninsured placeholder `PolicyId(0)` has none.
pub fn by_policy(losses: &[LossRecord], policy: &Policy, treaties: &[Treaty]) -> Vec<PolicyClaim> {
    let Some(agg_id) = policy.policy.agg_id() else {
        return Vec::new();
    };
    let (events, ground_up): (Vec<EventId>, Vec<f64>) = losses
        .iter()
        .filter(|r| r.agg_id == agg_id)
        .map(|r| (r.event_id, r.loss))
        .unzip();
    let claims = insured_losses(&ground_up, policy.deductible, policy.liability);
    let (events, claims): (Vec<EventId>, Vec<f64>) =
        events.into_iter().zip(claims).filter(|(_, c)| *c > 0.0).unzip();
    let matrix = claim_to_cessions(&claims, policy, treaties);
    let policy_grp = policy.policy_grp(treaties);
    events
        .into_iter()
        .zip(matrix.rows())
        .map(|(event_id, row)| PolicyClaim {
            event_id,
            policy_id: policy.policy,
            claim: row[CLAIM],
            retention: row[RETENTION],
            cessions: row.slice(s![TREATY_OFFSET..]).to_vec(),
            policy_grp: policy_grp.clone(),
        })
        .collect()
}

/// Cessions of one event after the whole cascade.
#[derive(Debug, Clone, PartialEq)]
pub struct EventCessions {
    pub event_id: EventId,
    pub retention: f64,
    pub claim: f64,
    /// One per treaty.
    pub cessions: Vec<f64>,
    /// One per entry of [`EventTable::overspill_codes`].
    pub overspill: Vec<f64>,
}

/// Output of [`by_event`], one row per event in increasing event order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventTable {
    pub treaty_ids: Vec<String>,
    /// Codes of the treaties that overspilled on at least one event.
    pub overspill_codes: Vec<char>,
    pub rows: Vec<EventCessions>,
}

impl EventTable {
    pub fn columns(&self) -> Vec<String> {
        ["event_id", "retention", "claim"]
            .iter()
            .map(|c| c.to_string())
            .chain(self.treaty_ids.iter().cloned())
            .chain(self.overspill_codes.iter().map(|c| format!("over_{c}")))
            .collect()
    }

    pub fn row(&self, event_id: EventId) -> Option<&EventCessions> {
        self.rows
            .binary_search_by_key(&event_id, |r| r.event_id)
            .ok()
            .map(|i| &self.rows[i])
    }

    /// Value of a named column for one event.
    pub fn value(&self, event_id: EventId, column: &str) -> Option<f64> {
        let row = self.row(event_id)?;
        match column {
            "retention" => Some(row.retention),
            "claim" => Some(row.claim),
            _ => {
                if let Some(t) = self.treaty_ids.iter().position(|id| id == column) {
                    return Some(row.cessions[t]);
                }
                let mut code = column.strip_prefix("over_")?.chars();
                let (Some(c), None) = (code.next(), code.next()) else {
                    return None;
                };
                let o = self.overspill_codes.iter().position(|&k| k == c)?;
                Some(row.overspill[o])
            }
        }
    }

    /// Column sums over all events, the event column excluded.
    pub fn totals(&self) -> Vec<(String, f64)> {
        let columns = self.columns();
        let mut sums = vec![0.0; columns.len() - 1];
        for row in &self.rows {
            let values = [row.retention, row.claim]
                .into_iter()
                .chain(row.cessions.iter().copied())
                .chain(row.overspill.iter().copied());
            for (sum, v) in sums.iter_mut().zip(values) {
                *sum += v;
            }
        }
        columns.into_iter().skip(1).zip(sums).collect()
    }

    /// Rows as serializable records with the table's column names.
    pub fn records(&self) -> impl Iterator<Item = EventRecord<'_>> {
        self.rows.iter().map(move |row| EventRecord { table: self, row })
    }
}

/// A row of an [`EventTable`] serialized as a map in column order.
pub struct EventRecord<'a> {
    table: &'a EventTable,
    row: &'a EventCessions,
}

impl Serialize for EventRecord<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let width = 3 + self.row.cessions.len() + self.row.overspill.len();
        let mut map = serializer.serialize_map(Some(width))?;
        map.serialize_entry("event_id", &self.row.event_id)?;
        map.serialize_entry("retention", &self.row.retention)?;
        map.serialize_entry("claim", &self.row.claim)?;
        for (id, cession) in self.table.treaty_ids.iter().zip(&self.row.cessions) {
            map.serialize_entry(id, cession)?;
        }
        for (code, over) in self.table.overspill_codes.iter().zip(&self.row.overspill) {
            map.serialize_entry(&format!("over_{code}"), over)?;
        }
        map.end()
    }
}

fn check_conservation(event_id: EventId, row: ndarray::ArrayView1<f64>) -> Result<(), ReinsuranceError> {
    let claim = row[CLAIM];
    let total = row[RETENTION] + row.slice(s![TREATY_OFFSET..]).sum();
    if (total - claim).abs() > ATOL + RTOL * claim.abs() {
        return Err(ReinsuranceError::ConservationViolated { event_id, total, claim });
    }
    Ok(())
}

/// Aggregate policy claims by event through the treaty cascade.
///
/// Fails with [`ReinsuranceError::ConservationViolated`] if, for any event,
/// retention plus cessions does not add up to the claim.
pub fn by_event(claims: &[PolicyClaim], treaties: &[Treaty]) -> Result<EventTable, ReinsuranceError> {
    let width = TREATY_OFFSET + treaties.len();
    let event_ids: Vec<EventId> = claims.iter().map(|c| c.event_id).collect::<BTreeSet<_>>().into_iter().collect();
    let eidx: HashMap<EventId, usize> = event_ids.iter().enumerate().map(|(i, &e)| (e, i)).collect();
    let num_events = event_ids.len();

    let mut groups: BTreeMap<String, Array2<f64>> = BTreeMap::new();
    for claim in claims {
        if claim.cessions.len() != treaties.len() {
            return Err(ReinsuranceError::InvalidInput(format!(
                "policy {:?} has {} cessions for {} treaties",
                claim.policy_id,
                claim.cessions.len(),
                treaties.len()
            )));
        }
        let matrix = groups
            .entry(claim.policy_grp.clone())
            .or_insert_with(|| Array2::zeros((num_events, width)));
        let mut row = matrix.row_mut(eidx[&claim.event_id]);
        row[RETENTION] += claim.retention;
        row[CLAIM] += claim.claim;
        for (t, cession) in claim.cessions.iter().enumerate() {
            row[TREATY_OFFSET + t] += cession;
        }
    }
    let num_groups = groups.len();
    debug!(events = num_events, groups = num_groups, "built event matrices");

    let result = cascade(groups, treaties, num_events)?;
    for (&event_id, row) in event_ids.iter().zip(result.matrix.rows()) {
        check_conservation(event_id, row)?;
    }

    let spilled: Vec<(char, ndarray::Array1<f64>)> = treaties
        .iter()
        .zip(result.overspill)
        .filter_map(|(t, over)| over.filter(|o| o.iter().any(|&v| v != 0.0)).map(|o| (t.code, o)))
        .collect();
    let rows = event_ids
        .iter()
        .zip(result.matrix.rows())
        .enumerate()
        .map(|(i, (&event_id, row))| EventCessions {
            event_id,
            retention: row[RETENTION],
            claim: row[CLAIM],
            cessions: row.slice(s![TREATY_OFFSET..]).to_vec(),
            overspill: spilled.iter().map(|(_, o)| o[i]).collect(),
        })
        .collect();
    info!(
        events = num_events,
        groups = num_groups,
        overspilling = spilled.len(),
        "aggregated reinsurance by event"
    );
    Ok(EventTable {
        treaty_ids: treaties.iter().map(|t| t.id.clone()).collect(),
        overspill_codes: spilled.into_iter().map(|(c, _)| c).collect(),
        rows,
    })
}

/// Claims of every policy, computed in parallel, and their event-level
/// aggregation.
pub fn by_policy_event(
    losses: &[LossRecord],
    policies: &[Policy],
    treaties: &[Treaty],
) -> Result<(Vec<PolicyClaim>, EventTable), ReinsuranceError> {
    let mut by_agg: HashMap<AggId, Vec<LossRecord>> = HashMap::new();
    for record in losses {
        by_agg.entry(record.agg_id).or_default().push(*record);
    }
    let claims: Vec<PolicyClaim> = policies
        .par_iter()
        .flat_map_iter(|policy| match policy.policy.agg_id().and_then(|agg_id| by_agg.get(&agg_id)) {
            Some(records) => by_policy(records, policy, treaties),
            None => Vec::new(),
        })
        .collect();
    debug!(policies = policies.len(), claims = claims.len(), "computed policy claims");
    let table = by_event(&claims, treaties)?;
    Ok((claims, table))
}
