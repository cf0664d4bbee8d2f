//! Staging area for the writes of one compile operation.
//!
//! Builders stage every write here; the compiler commits the batch to the host
//! only when the operation succeeds, so a failed build leaves live channels
//! exactly as they were.

use morphdrive_api_core::{
    ChannelRef, ChannelWrite, Expression, PropertyOwner, RigHost, TermLedger, WriteBatch,
};

#[derive(Debug, Default)]
pub struct Staging {
    batch: WriteBatch,
}

impl Staging {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop anything staged by a previous operation.
    #[inline]
    pub fn begin(&mut self) {
        self.batch = WriteBatch::new();
    }

    pub fn ensure_property(&mut self, name: &str, default: f64, min: f64, max: f64) -> ChannelRef {
        let owner = PropertyOwner::Object;
        let channel = owner.channel(name);
        self.batch.push(ChannelWrite::EnsureProperty {
            owner,
            name: name.to_string(),
            default,
            min,
            max,
        });
        channel
    }

    pub fn set_expression(
        &mut self,
        channel: &ChannelRef,
        expression: Expression,
        ledger: Option<TermLedger>,
    ) {
        self.batch.push(ChannelWrite::SetExpression {
            channel: channel.clone(),
            expression,
            ledger,
        });
    }

    pub fn set_additive(
        &mut self,
        channel: &ChannelRef,
        subchannels: Vec<ChannelRef>,
        ledger: Option<TermLedger>,
    ) {
        self.batch.push(ChannelWrite::SetAdditive {
            channel: channel.clone(),
            subchannels,
            ledger,
        });
    }

    pub fn clear(&mut self, channel: &ChannelRef) {
        self.batch.push(ChannelWrite::Clear {
            channel: channel.clone(),
        });
    }

    /// True when committing would change anything on the host.
    pub fn changes<H: RigHost + ?Sized>(&self, host: &H) -> bool {
        self.batch.iter().any(|write| match write {
            ChannelWrite::SetExpression {
                channel,
                expression,
                ledger,
            } => {
                host.get_expression(channel).as_ref() != Some(expression)
                    || host.ledger(channel) != *ledger
            }
            ChannelWrite::SetAdditive {
                channel,
                subchannels,
                ledger,
            } => {
                host.additive_channels(channel).as_ref() != Some(subchannels)
                    || host.ledger(channel) != *ledger
            }
            ChannelWrite::Clear { channel } => host.has_driver(channel),
            ChannelWrite::EnsureProperty { owner, name, .. } => {
                !host.channel_exists(&owner.channel(name.clone()))
            }
        })
    }

    pub fn take(&mut self) -> WriteBatch {
        std::mem::take(&mut self.batch)
    }
}
