//! Treaty and policy model of a reinsurance programme.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::load_file;
use crate::error::{Error, ReinsuranceError};
use crate::types::PolicyId;

/// Placeholder entry of a policy index for assets without a policy.
pub const NO_POLICY: &str = "?";

fn unlimited() -> f64 {
    f64::INFINITY
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum TreatyKind {
    /// Quota share / surplus: the policy cedes a fixed fraction of each
    /// claim; the treaty pays at most `max_cession_event` per event.
    #[serde(rename = "prop")]
    Proportional {
        #[serde(rename = "limit", default = "unlimited")]
        max_cession_event: f64,
    },
    /// Per-policy excess of loss.
    #[serde(rename = "wxlr")]
    WorkingExcessOfLoss { deductible: f64, limit: f64 },
    /// Per-event excess of loss on the aggregated retention.
    #[serde(rename = "catxl")]
    CatastropheExcessOfLoss { deductible: f64, limit: f64 },
}

impl TreatyKind {
    /// Position in the mandatory treaty order prop, wxlr, catxl.
    fn rank(&self) -> u8 {
        match self {
            TreatyKind::Proportional { .. } => 0,
            TreatyKind::WorkingExcessOfLoss { .. } => 1,
            TreatyKind::CatastropheExcessOfLoss { .. } => 2,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TreatyKind::Proportional { .. } => "prop",
            TreatyKind::WorkingExcessOfLoss { .. } => "wxlr",
            TreatyKind::CatastropheExcessOfLoss { .. } => "catxl",
        }
    }

    pub fn is_proportional(&self) -> bool {
        matches!(self, TreatyKind::Proportional { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Treaty {
    pub id: String,
    #[serde(flatten)]
    pub kind: TreatyKind,
    /// One-letter code, `A` for the first treaty of the model and so on.
    #[serde(skip)]
    pub code: char,
}

impl Treaty {
    pub fn new(id: &str, kind: TreatyKind, code: char) -> Self {
        Treaty { id: id.to_string(), kind, code }
    }

    /// Treaty codes by position.
    pub fn code_at(position: usize) -> char {
        char::from_u32('A' as u32 + position as u32).unwrap_or('?')
    }

    /// Name of the overspill column of this treaty.
    pub fn overspill_column(&self) -> String {
        format!("over_{}", self.code)
    }
}

/// A policy as written in the model file, with one fraction per treaty id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRecord {
    pub policy: String,
    pub liability: f64,
    pub deductible: f64,
    pub fractions: BTreeMap<String, f64>,
}

/// A resolved policy; `fractions[i]` refers to the `i`-th treaty.
#[derive(Debug, Clone, PartialEq)]
pub struct Policy {
    pub policy: PolicyId,
    pub liability: f64,
    pub deductible: f64,
    pub fractions: Vec<f64>,
}

impl Policy {
    /// One character per treaty: the treaty code when the policy takes
    /// part in it, `.` otherwise.
    pub fn policy_grp(&self, treaties: &[Treaty]) -> String {
        treaties
            .iter()
            .zip(&self.fractions)
            .map(|(t, &f)| if f > 0.0 { t.code } else { '.' })
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReinsuranceModelFile {
    pub treaties: Vec<Treaty>,
    pub policies: Vec<PolicyRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReinsuranceModel {
    pub treaties: Vec<Treaty>,
    pub policies: Vec<Policy>,
}

fn invalid(msg: impl Into<String>) -> ReinsuranceError {
    ReinsuranceError::InvalidInput(msg.into())
}

impl ReinsuranceModel {
    /// Load a model from YAML or JSON. Without a policy index the policies
    /// are numbered in file order.
    pub fn from_path(path: &Path, policy_index: Option<&[String]>) -> Result<Self, Error> {
        let file: ReinsuranceModelFile = load_file(path)?;
        let model = match policy_index {
            Some(index) => ReinsuranceModel::parse(file, index)?,
            None => {
                let index = default_index(&file);
                ReinsuranceModel::parse(file, &index)?
            }
        };
        info!(
            treaties = model.treaties.len(),
            policies = model.policies.len(),
            path = %path.display(),
            "loaded reinsurance model"
        );
        Ok(model)
    }

    /// Validate a model file against a policy index; the policy at position
    /// `k` of the index gets `PolicyId(k)`, position 0 being [`NO_POLICY`].
    pub fn parse(file: ReinsuranceModelFile, policy_index: &[String]) -> Result<Self, ReinsuranceError> {
        let ReinsuranceModelFile { mut treaties, policies } = file;

        for pair in treaties.windows(2) {
            if pair[1].kind.rank() < pair[0].kind.rank() {
                return Err(invalid(format!(
                    "treaties must be ordered prop, wxlr, catxl: {} ({}) comes after {} ({})",
                    pair[1].id,
                    pair[1].kind.label(),
                    pair[0].id,
                    pair[0].kind.label()
                )));
            }
        }
        let mut treaty_ids = HashSet::new();
        for (i, treaty) in treaties.iter_mut().enumerate() {
            if !treaty_ids.insert(treaty.id.clone()) {
                return Err(invalid(format!("treaty {} is duplicated", treaty.id)));
            }
            match treaty.kind {
                TreatyKind::Proportional { max_cession_event } if max_cession_event < 0.0 => {
                    return Err(invalid(format!("treaty {}: the limit must be => 0", treaty.id)));
                }
                TreatyKind::WorkingExcessOfLoss { deductible, limit }
                | TreatyKind::CatastropheExcessOfLoss { deductible, limit }
                    if deductible < 0.0 || limit < deductible =>
                {
                    return Err(invalid(format!(
                        "treaty {}: expected 0 <= deductible <= limit, got {deductible}, {limit}",
                        treaty.id
                    )));
                }
                _ => {}
            }
            treaty.code = Treaty::code_at(i);
        }

        if policies.iter().any(|p| p.liability < 0.0) {
            return Err(invalid("liabilities must be => 0"));
        }
        if policies.iter().any(|p| p.deductible < 0.0) {
            return Err(invalid("deductibles must be => 0"));
        }
        let mut names = HashSet::new();
        if !policies.iter().all(|p| names.insert(p.policy.as_str())) {
            return Err(invalid("policy contains duplicates"));
        }
        let ids: HashMap<&str, PolicyId> = policy_index
            .iter()
            .enumerate()
            .map(|(k, name)| (name.as_str(), PolicyId(k as u32)))
            .collect();
        for name in policy_index.iter().filter(|n| n.as_str() != NO_POLICY) {
            if !names.contains(name.as_str()) {
                return Err(invalid(format!("policy \"{name}\" is missing")));
            }
        }

        let mut resolved = Vec::with_capacity(policies.len());
        for record in &policies {
            let Some(&policy) = ids.get(record.policy.as_str()).filter(|id| id.0 > 0) else {
                return Err(invalid(format!("policy \"{}\" is not in the policy index", record.policy)));
            };
            if let Some(unknown) = record.fractions.keys().find(|k| !treaty_ids.contains(*k)) {
                return Err(invalid(format!("policy {}: unknown treaty {unknown}", record.policy)));
            }
            let mut fractions = Vec::with_capacity(treaties.len());
            for treaty in &treaties {
                let Some(&fraction) = record.fractions.get(&treaty.id) else {
                    return Err(invalid(format!("{} is missing", treaty.id)));
                };
                if treaty.kind.is_proportional() {
                    if !(0.0..=1.0).contains(&fraction) {
                        return Err(invalid(format!(
                            "invalid fraction {fraction} for {} in policy {}",
                            treaty.id, record.policy
                        )));
                    }
                } else if fraction != 0.0 && fraction != 1.0 {
                    return Err(invalid(format!("field {} must be 0 or 1", treaty.id)));
                }
                fractions.push(fraction);
            }
            let prop_sum: f64 = treaties
                .iter()
                .zip(&fractions)
                .filter(|(t, _)| t.kind.is_proportional())
                .map(|(_, f)| f)
                .sum();
            if prop_sum > 1.0 {
                return Err(invalid(format!(
                    "policy {}: the sum of the fractions must be under 1, got {prop_sum}",
                    record.policy
                )));
            }
            resolved.push(Policy {
                policy,
                liability: record.liability,
                deductible: record.deductible,
                fractions,
            });
        }
        resolved.sort_by_key(|p| p.policy);
        Ok(ReinsuranceModel { treaties, policies: resolved })
    }
}

/// `["?", <policies in file order>]`
pub fn default_index(file: &ReinsuranceModelFile) -> Vec<String> {
    std::iter::once(NO_POLICY.to_string())
        .chain(file.policies.iter().map(|p| p.policy.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL_NP: &str = r#"
treaties:
  - {id: WXLR_metro, type: wxlr, deductible: 500, limit: 3500}
  - {id: WXLR_rural, type: wxlr, deductible: 200, limit: 5000}
  - {id: CatXL_reg, type: catxl, deductible: 50, limit: 2500}
policies:
  - {policy: VA_region_1, liability: 8000, deductible: 100, fractions: {WXLR_metro: 0, WXLR_rural: 0, CatXL_reg: 1}}
  - {policy: VA_region_2, liability: 4000, deductible: 200, fractions: {WXLR_metro: 1, WXLR_rural: 1, CatXL_reg: 1}}
  - {policy: rur_Ant_1, liability: 9000, deductible: 500, fractions: {WXLR_metro: 1, WXLR_rural: 1, CatXL_reg: 0}}
"#;

    const MODEL_PR: &str = r#"
treaties:
  - {id: qshared, type: prop}
  - {id: surplus, type: prop, limit: 8000}
policies:
  - {policy: VA_region_1, liability: 10000, deductible: 100, fractions: {qshared: 0.1, surplus: 0.2}}
  - {policy: VA_region_2, liability: 10000, deductible: 100, fractions: {qshared: 0.1, surplus: 0.2}}
  - {policy: rur_Ant_1, liability: 10000, deductible: 100, fractions: {qshared: 0.1, surplus: 0.2}}
"#;

    fn policy_idx() -> Vec<String> {
        ["?", "VA_region_1", "VA_region_2", "rur_Ant_1"].iter().map(|s| s.to_string()).collect()
    }

    fn file(yaml: &str) -> ReinsuranceModelFile {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn parse_err(file: ReinsuranceModelFile) -> String {
        ReinsuranceModel::parse(file, &policy_idx()).unwrap_err().to_string()
    }

    #[test]
    fn parses_nonprop_model() {
        let model = ReinsuranceModel::parse(file(MODEL_NP), &policy_idx()).unwrap();
        let codes: String = model.treaties.iter().map(|t| t.code).collect();
        assert_eq!(codes, "ABC");
        assert_eq!(
            model.treaties[2].kind,
            TreatyKind::CatastropheExcessOfLoss { deductible: 50.0, limit: 2500.0 }
        );
        assert_eq!(model.policies[1].policy, PolicyId(2));
        assert_eq!(model.policies[1].fractions, vec![1.0, 1.0, 1.0]);
        assert_eq!(model.policies[0].policy_grp(&model.treaties), "..C");
        assert_eq!(model.policies[2].policy_grp(&model.treaties), "AB.");
    }

    #[test]
    fn proportional_limit_defaults_to_unlimited() {
        let model = ReinsuranceModel::parse(file(MODEL_PR), &policy_idx()).unwrap();
        assert_eq!(
            model.treaties[0].kind,
            TreatyKind::Proportional { max_cession_event: f64::INFINITY }
        );
        assert_eq!(model.treaties[1].kind, TreatyKind::Proportional { max_cession_event: 8000.0 });
        assert_eq!(model.treaties[1].overspill_column(), "over_B");
    }

    #[test]
    fn model_loads_from_json() {
        let json = r#"{
            "treaties": [{"id": "prop1", "type": "prop", "limit": 5000}],
            "policies": [{"policy": "p", "liability": 1, "deductible": 0, "fractions": {"prop1": 0.5}}]
        }"#;
        let file: ReinsuranceModelFile = serde_json::from_str(json).unwrap();
        let index = default_index(&file);
        let model = ReinsuranceModel::parse(file, &index).unwrap();
        assert_eq!(model.policies[0].policy, PolicyId(1));
    }

    #[test]
    fn policy_in_index_missing_from_model() {
        let mut f = file(MODEL_NP);
        f.policies.remove(1);
        assert!(parse_err(f).contains("policy \"VA_region_2\" is missing"));
    }

    #[test]
    fn policy_duplicated() {
        let mut f = file(MODEL_NP);
        f.policies[0].policy = "VA_region_2".to_string();
        assert!(parse_err(f).contains("policy contains duplicates"));
    }

    #[test]
    fn negative_liability() {
        let mut f = file(MODEL_PR);
        f.policies[1].liability = -10000.0;
        assert!(parse_err(f).contains("liabilities must be => 0"));
    }

    #[test]
    fn negative_deductible() {
        let mut f = file(MODEL_PR);
        f.policies[1].deductible = -100.0;
        assert!(parse_err(f).contains("deductibles must be => 0"));
    }

    #[test]
    fn nonprop_treaty_non_boolean() {
        let mut f = file(MODEL_NP);
        f.policies[1].fractions.insert("CatXL_reg".to_string(), 1.5);
        assert!(parse_err(f).contains("field CatXL_reg must be 0 or 1"));
    }

    #[test]
    fn treaty_missing_in_policy() {
        let mut f = file(MODEL_PR);
        for p in &mut f.policies {
            let value = p.fractions.remove("surplus").unwrap();
            p.fractions.insert("xxsurplus".to_string(), value);
        }
        // an unknown column is reported before the missing one
        assert!(parse_err(f.clone()).contains("unknown treaty xxsurplus"));
        for p in &mut f.policies {
            p.fractions.remove("xxsurplus");
        }
        assert!(parse_err(f).contains("surplus is missing"));
    }

    #[test]
    fn fractions_must_be_valid() {
        let mut f = file(MODEL_PR);
        f.policies[0].fractions.insert("qshared".to_string(), 1.2);
        assert!(parse_err(f).contains("invalid fraction"));

        let mut f = file(MODEL_PR);
        f.policies[2].fractions.insert("qshared".to_string(), 0.9);
        assert!(parse_err(f).contains("the sum of the fractions must be under 1"));
    }

    #[test]
    fn treaties_must_be_ordered() {
        let mut f = file(MODEL_NP);
        f.treaties.swap(1, 2);
        let err = ReinsuranceModel::parse(f, &policy_idx()).unwrap_err();
        assert!(matches!(err, ReinsuranceError::InvalidInput(_)));
        assert!(err.to_string().contains("must be ordered"));
    }

    #[test]
    fn unknown_policy_is_rejected() {
        let mut f = file(MODEL_NP);
        f.policies.push(PolicyRecord {
            policy: "elsewhere".to_string(),
            liability: 1.0,
            deductible: 0.0,
            fractions: f.policies[0].fractions.clone(),
        });
        assert!(parse_err(f).contains("not in the policy index"));
    }
}
