//! Channel writes staged by the compiler and committed to a host in one go.
//!
//! A `ChannelWrite` serializes to JSON as a tagged object, e.g.
//!   { "op": "clear", "channel": "[\"Smile:R1\"]" }
//!
//! WriteBatch is a simple Vec<ChannelWrite> with helpers.

use serde::{Deserialize, Serialize};

use crate::channel::ChannelRef;
use crate::expression::Expression;
use crate::host::PropertyOwner;
use crate::ledger::TermLedger;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ChannelWrite {
    /// Replace the channel's driver with a scripted expression.
    SetExpression {
        channel: ChannelRef,
        expression: Expression,
        ledger: Option<TermLedger>,
    },
    /// Replace the channel's driver with a structural sum of sub-channels.
    SetAdditive {
        channel: ChannelRef,
        subchannels: Vec<ChannelRef>,
        ledger: Option<TermLedger>,
    },
    /// Remove the channel's driver and its ledger.
    Clear { channel: ChannelRef },
    /// Create the property if missing (auxiliary channels).
    EnsureProperty {
        owner: PropertyOwner,
        name: String,
        default: f64,
        min: f64,
        max: f64,
    },
}

impl ChannelWrite {
    /// Channel touched by this write, if it addresses an existing one.
    pub fn channel(&self) -> Option<&ChannelRef> {
        match self {
            ChannelWrite::SetExpression { channel, .. }
            | ChannelWrite::SetAdditive { channel, .. }
            | ChannelWrite::Clear { channel } => Some(channel),
            ChannelWrite::EnsureProperty { .. } => None,
        }
    }
}

/// A batch of channel writes. The compiler commits one batch per operation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WriteBatch(pub Vec<ChannelWrite>);

impl WriteBatch {
    pub fn new() -> Self {
        WriteBatch(Vec::new())
    }

    pub fn push(&mut self, op: ChannelWrite) {
        self.0.push(op);
    }

    pub fn extend(&mut self, other: impl IntoIterator<Item = ChannelWrite>) {
        self.0.extend(other);
    }

    pub fn into_vec(self) -> Vec<ChannelWrite> {
        self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &ChannelWrite> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Merge another batch in-place (append).
    pub fn append(&mut self, mut other: WriteBatch) {
        self.0.append(&mut other.0);
    }
}

impl IntoIterator for WriteBatch {
    type Item = ChannelWrite;
    type IntoIter = std::vec::IntoIter<ChannelWrite>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_serializes_tagged() {
        let w = ChannelWrite::Clear {
            channel: ChannelRef::property("Smile:R1"),
        };
        let json = serde_json::to_value(&w).unwrap();
        assert_eq!(json["op"], "clear");
        assert_eq!(json["channel"], "[\"Smile:R1\"]");
    }

    #[test]
    fn append_keeps_write_order() {
        let ch = ChannelRef::property("Smile");
        let mut batch = WriteBatch::new();
        batch.push(ChannelWrite::SetExpression {
            channel: ch.clone(),
            expression: Expression::new("a", Vec::new()),
            ledger: None,
        });
        let mut tail = WriteBatch::new();
        tail.push(ChannelWrite::Clear { channel: ch.clone() });
        batch.append(tail);
        assert_eq!(batch.len(), 2);
        assert!(matches!(
            batch.iter().last(),
            Some(ChannelWrite::Clear { .. })
        ));
        assert!(batch.iter().all(|w| w.channel() == Some(&ch)));
    }
}
