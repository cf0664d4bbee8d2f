//! Versioned side metadata stored next to a driver.
//!
//! Every driver the compiler writes carries a `TermLedger` describing the
//! structured terms it was built from. Merge passes read the ledger instead of
//! re-parsing expression text; text recovery is only a fallback for drivers
//! written without one (older rigs, hand-authored drivers).

use serde::{Deserialize, Serialize};

use crate::channel::ChannelRef;
use crate::expression::{Expression, VarSource};

pub const LEDGER_VERSION: u32 = 1;

/// What part of the driver graph a channel plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerRole {
    /// Head of a property driver chain.
    Linear,
    /// Auxiliary overflow ("rest") level of a chain.
    Rest,
    /// Bone-transform driven output.
    Bone,
    /// Numbered scripted sub-channel of a sum driver.
    SumBatch,
    /// Additive aggregate of a sum driver.
    SumAggregate,
    /// Scale inheritance compensation on a bone scale component.
    ScaleCorrection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTerm {
    pub source: VarSource,
    pub factor: f64,
}

impl LedgerTerm {
    pub fn new(source: VarSource, factor: f64) -> Self {
        Self { source, factor }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermLedger {
    pub version: u32,
    pub role: LedgerRole,
    /// Linear terms rendered inline at this level, in emission order.
    #[serde(default)]
    pub terms: Vec<LedgerTerm>,
    #[serde(default)]
    pub multipliers: Vec<ChannelRef>,
    /// Next level of the overflow chain, if any.
    #[serde(default)]
    pub rest: Option<ChannelRef>,
    /// Preserved bone-transform part carried verbatim through rebuilds.
    #[serde(default)]
    pub bone_part: Option<Expression>,
    /// Channels whose values feed this one (sum batches, scale contributions).
    #[serde(default)]
    pub contributions: Vec<ChannelRef>,
}

impl TermLedger {
    pub fn new(role: LedgerRole) -> Self {
        Self {
            version: LEDGER_VERSION,
            role,
            terms: Vec::new(),
            multipliers: Vec::new(),
            rest: None,
            bone_part: None,
            contributions: Vec::new(),
        }
    }

    pub fn with_terms(mut self, terms: Vec<LedgerTerm>) -> Self {
        self.terms = terms;
        self
    }

    pub fn with_contributions(mut self, contributions: Vec<ChannelRef>) -> Self {
        self.contributions = contributions;
        self
    }

    /// Ledgers from a newer writer are not trusted for merging.
    pub fn is_current(&self) -> bool {
        self.version == LEDGER_VERSION
    }

    pub fn factor_for(&self, source: &VarSource) -> Option<f64> {
        self.terms
            .iter()
            .find(|t| &t.source == source)
            .map(|t| t.factor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ledger_serializes_with_version_and_role() {
        let ledger = TermLedger::new(LedgerRole::Rest).with_terms(vec![LedgerTerm::new(
            VarSource::channel(ChannelRef::property("Smile")),
            0.5,
        )]);
        let json = serde_json::to_value(&ledger).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["role"], "rest");
        assert_eq!(json["terms"][0]["source"]["channel"], "[\"Smile\"]");

        let back: TermLedger = serde_json::from_value(json).unwrap();
        assert_eq!(back, ledger);
        assert!(back.is_current());
    }

    #[test]
    fn ledger_missing_optional_fields_defaults() {
        let back: TermLedger =
            serde_json::from_str(r#"{"version": 2, "role": "sum_batch"}"#).unwrap();
        assert!(back.terms.is_empty());
        assert!(back.rest.is_none());
        assert!(!back.is_current());
    }
}
