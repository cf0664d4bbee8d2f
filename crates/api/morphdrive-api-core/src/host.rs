//! Contract between the compiler and the scene graph that owns the channels.
//!
//! A channel holds at most one driver: either a scripted `Expression` or an
//! additive sum of sub-channels. Setting one kind replaces the other and drops
//! the channel's ledger; ledgers are attached afterwards with `set_ledger`.

use serde::{Deserialize, Serialize};

use crate::channel::{ChannelRef, TransformKind};
use crate::expression::{Expression, TransformSpace};
use crate::ledger::TermLedger;
use crate::write_ops::{ChannelWrite, WriteBatch};

/// Row-major 3x3 local transform basis. Row `i` is the bone-local effect of a
/// unit change along source axis `i`.
pub type Basis = [[f64; 3]; 3];

pub const IDENTITY_BASIS: Basis = [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];

/// Where a custom property lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PropertyOwner {
    /// The rig object itself (`["name"]`).
    #[default]
    Object,
    /// The armature data block (`data["name"]`).
    Data,
}

impl PropertyOwner {
    pub fn channel(&self, name: impl Into<String>) -> ChannelRef {
        match self {
            PropertyOwner::Object => ChannelRef::property(name),
            PropertyOwner::Data => ChannelRef::data_property(name),
        }
    }
}

pub trait RigHost {
    fn channel_exists(&self, channel: &ChannelRef) -> bool;

    /// Parse `path` and return the channel if it exists on this rig.
    fn resolve_channel(&self, path: &str) -> Option<ChannelRef> {
        ChannelRef::parse(path)
            .ok()
            .filter(|c| self.channel_exists(c))
    }

    fn get_expression(&self, channel: &ChannelRef) -> Option<Expression>;
    fn set_expression(&mut self, channel: &ChannelRef, expression: Expression);
    /// Remove whatever driver the channel carries, together with its ledger.
    fn clear_expression(&mut self, channel: &ChannelRef);

    fn add_additive_channel(&mut self, channel: &ChannelRef, subchannels: Vec<ChannelRef>);
    /// Sub-channels when the channel carries an additive driver.
    fn additive_channels(&self, channel: &ChannelRef) -> Option<Vec<ChannelRef>>;

    fn ledger(&self, channel: &ChannelRef) -> Option<TermLedger>;
    fn set_ledger(&mut self, channel: &ChannelRef, ledger: Option<TermLedger>);

    fn get_or_create_property(
        &mut self,
        owner: PropertyOwner,
        name: &str,
        default: f64,
        min: f64,
        max: f64,
    ) -> ChannelRef;

    fn bone_exists(&self, bone: &str) -> bool;
    fn local_transform_basis(&self, bone: &str) -> Option<Basis>;
    fn transform_reading(
        &self,
        bone: &str,
        kind: TransformKind,
        component: u8,
        space: TransformSpace,
    ) -> Option<f64>;
    fn bone_parent(&self, bone: &str) -> Option<String>;
    fn bone_names(&self) -> Vec<String>;
    fn inherits_scale(&self, bone: &str) -> bool;

    fn has_driver(&self, channel: &ChannelRef) -> bool {
        self.get_expression(channel).is_some() || self.additive_channels(channel).is_some()
    }

    /// Commit a staged batch in order.
    fn apply_writes(&mut self, batch: WriteBatch) {
        for write in batch {
            match write {
                ChannelWrite::SetExpression {
                    channel,
                    expression,
                    ledger,
                } => {
                    self.set_expression(&channel, expression);
                    self.set_ledger(&channel, ledger);
                }
                ChannelWrite::SetAdditive {
                    channel,
                    subchannels,
                    ledger,
                } => {
                    self.add_additive_channel(&channel, subchannels);
                    self.set_ledger(&channel, ledger);
                }
                ChannelWrite::Clear { channel } => self.clear_expression(&channel),
                ChannelWrite::EnsureProperty {
                    owner,
                    name,
                    default,
                    min,
                    max,
                } => {
                    self.get_or_create_property(owner, &name, default, min, max);
                }
            }
        }
    }
}
