use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SiteId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EventId(pub u32);

/// 1-based policy identifier, as assigned by the policy index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PolicyId(pub u32);

/// 0-based aggregation key of the loss table; policy `p` aggregates on `AggId(p - 1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AggId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuptureId(pub u32);

impl PolicyId {
    /// The loss-table key this policy aggregates on. `PolicyId(0)` is the
    /// uninsured placeholder of the policy index and has none.
    pub fn agg_id(self) -> Option<AggId> {
        self.0.checked_sub(1).map(AggId)
    }
}

/// Round to 6 decimals. Applied to cessions so that repeated sums in the
/// cascade do not accumulate floating noise.
pub fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_aggregates_on_previous_index() {
        assert_eq!(PolicyId(1).agg_id(), Some(AggId(0)));
        assert_eq!(PolicyId(4).agg_id(), Some(AggId(3)));
        assert_eq!(PolicyId(0).agg_id(), None);
    }

    #[test]
    fn round6_drops_float_noise() {
        assert_eq!(round6(0.1 + 0.2), 0.3);
        assert_eq!(round6(2441.09740000001), 2441.0974);
    }

    #[test]
    fn ids_serialize_transparently() {
        let json = serde_json::to_string(&EventId(25)).unwrap();
        assert_eq!(json, "25");
        let sid: SiteId = serde_json::from_str("7").unwrap();
        assert_eq!(sid, SiteId(7));
    }
}
