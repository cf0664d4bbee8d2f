//! Sum drivers: many independent contributions to one channel, split into
//! numbered scripted sub-channels that an additive aggregate sums up.
//!
//! Rebuilding recovers what earlier passes put on the channel (ledgers first,
//! then batch text) so contributions loaded in earlier sessions survive.

use indexmap::IndexMap;

use morphdrive_api_core::{
    ChannelRef, Expression, LedgerRole, LedgerTerm, PropertyOwner, RigHost, TermLedger,
    TransformChannel, VarSource, VariableBinding,
};

use crate::ast::{format_number, ExprNode, LinearTerm};
use crate::bone::routed_name;
use crate::compiler::{CompileOutcome, Ctx};
use crate::diagnostics::DiagnosticCategory;
use crate::error::DriverError;
use crate::namespace::{VarNamespace, VarPool};
use crate::recover::parse_linear;
use crate::scale;

/// Contributions waiting for [`build`], per target channel, in arrival order.
#[derive(Debug, Default)]
pub struct SumQueue {
    pending: IndexMap<ChannelRef, IndexMap<ChannelRef, f64>>,
}

impl SumQueue {
    pub fn push(&mut self, target: ChannelRef, property: ChannelRef, factor: f64) {
        self.pending
            .entry(target)
            .or_default()
            .insert(property, factor);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn drain(&mut self) -> IndexMap<ChannelRef, IndexMap<ChannelRef, f64>> {
        std::mem::take(&mut self.pending)
    }
}

/// `<label>:NN`
pub(crate) fn batch_name(target: &ChannelRef, index: usize) -> String {
    format!("{}:{index:02}", target.label())
}

fn is_batch_name(target: &ChannelRef, member: &ChannelRef) -> bool {
    let Some(name) = member.property_name() else {
        return false;
    };
    match name.rsplit_once(':') {
        Some((head, digits)) => {
            head == target.label()
                && !digits.is_empty()
                && digits.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

/// Aggregates whose channel rests at 1 carry a constant-one member.
fn needs_unity(target: &ChannelRef) -> bool {
    matches!(
        target.transform_channel(),
        Some((TransformChannel::RotationQuaternion, 0)) | Some((TransformChannel::Scale, _))
    )
}

fn is_translation(target: &ChannelRef) -> bool {
    matches!(
        target.transform_channel(),
        Some((TransformChannel::Location, _))
    )
}

fn render_batch<H: RigHost>(
    ctx: &Ctx<'_, H>,
    target: &ChannelRef,
    batch: &[(ChannelRef, f64)],
    strength: Option<&ChannelRef>,
) -> Result<Expression, DriverError> {
    let mut ns = VarNamespace::for_channel(target.to_string(), ctx.config.two_letter_names);
    let mut bindings = Vec::new();
    let mut linear = Vec::new();
    for (property, factor) in batch {
        let var = ns.alloc(VarPool::General)?;
        bindings.push(VariableBinding::new(
            var.clone(),
            VarSource::channel(property.clone()),
        ));
        linear.push(LinearTerm::new(var, *factor));
    }
    let mut multipliers = Vec::new();
    if let Some(strength) = strength {
        let var = ns.alloc(VarPool::Multiplier)?;
        bindings.push(VariableBinding::new(
            var.clone(),
            VarSource::channel(strength.clone()),
        ));
        multipliers.push(var);
    }
    let text = ctx.render(&ExprNode::wrapped(multipliers, ExprNode::linear(linear)));
    Ok(Expression::new(text, bindings))
}

fn recover_text<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    channel: &ChannelRef,
    expr: &Expression,
    merged: &mut IndexMap<ChannelRef, f64>,
) {
    for parsed in parse_linear(&expr.text) {
        match parsed {
            Ok((var, factor)) => match expr.binding(&var).and_then(|b| b.source.as_channel()) {
                Some(property) => {
                    merged.insert(property.clone(), factor);
                }
                None => ctx.diagnostics.record(
                    DiagnosticCategory::RecoveryParse,
                    channel.to_string(),
                    format!("variable '{var}' does not read a property"),
                ),
            },
            Err(err) => ctx.diagnostics.record(
                DiagnosticCategory::RecoveryParse,
                channel.to_string(),
                err.to_string(),
            ),
        }
    }
}

fn merge_ledger_terms(ledger: &TermLedger, merged: &mut IndexMap<ChannelRef, f64>) {
    for term in &ledger.terms {
        if let Some(property) = term.source.as_channel() {
            merged.insert(property.clone(), term.factor);
        }
    }
}

pub(crate) fn build<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    target: &ChannelRef,
    contributions: &IndexMap<ChannelRef, f64>,
) -> Result<CompileOutcome, DriverError> {
    let correction = ctx
        .host
        .ledger(target)
        .filter(|l| l.is_current() && l.role == LedgerRole::ScaleCorrection);
    let mut attach_to_correction = false;
    let effective = match &correction {
        Some(ledger) => match ledger.contributions.first() {
            Some(existing) => existing.clone(),
            None => {
                attach_to_correction = true;
                ctx.aux_channel(&target.label())
            }
        },
        None => target.clone(),
    };

    let unity = PropertyOwner::Object.channel(ctx.config.truncate_name(&ctx.config.unity_property));
    let mut merged: IndexMap<ChannelRef, f64> = IndexMap::new();
    let mut extras: Vec<ChannelRef> = Vec::new();
    let mut old_batches: Vec<ChannelRef> = Vec::new();

    if let Some(members) = ctx.host.additive_channels(&effective) {
        for member in members {
            if member == unity {
                continue;
            }
            let ledger = ctx.host.ledger(&member).filter(|l| l.is_current());
            match ledger {
                Some(l) if l.role == LedgerRole::SumBatch => {
                    merge_ledger_terms(&l, &mut merged);
                    old_batches.push(member);
                }
                _ if is_batch_name(&effective, &member) => {
                    if let Some(expr) = ctx.host.get_expression(&member) {
                        recover_text(ctx, &member, &expr, &mut merged);
                    }
                    old_batches.push(member);
                }
                _ => extras.push(member),
            }
        }
    } else if let Some(expr) = ctx.host.get_expression(&effective) {
        let ledger = ctx.host.ledger(&effective).filter(|l| l.is_current());
        let bone_content = ledger.as_ref().map_or(false, |l| l.role == LedgerRole::Bone)
            || expr.has_transform_bindings();
        if bone_content {
            let moved = ctx.aux_channel(&routed_name(&effective));
            log::debug!("{effective}: relocating scripted bone content to {moved}");
            ctx.staging.set_expression(&moved, expr, ledger);
            extras.push(moved);
        } else {
            match &ledger {
                Some(l) => {
                    merge_ledger_terms(l, &mut merged);
                    if let Some(rest) = &l.rest {
                        merged.insert(rest.clone(), 1.0);
                    }
                }
                None => recover_text(ctx, &effective, &expr, &mut merged),
            }
        }
    }

    let recovered = merged.len();
    for (property, factor) in contributions {
        merged.insert(property.clone(), *factor);
    }
    let decimals = ctx.decimals();
    merged.retain(|_, factor| format_number(*factor, decimals) != "0");
    log::debug!(
        "{effective}: {} contributions ({recovered} recovered)",
        merged.len()
    );

    if merged.is_empty() && extras.is_empty() {
        log::debug!("{effective}: nothing to sum");
        return Ok(CompileOutcome::Unchanged);
    }

    let strength = if is_translation(&effective) {
        Some(ctx.strength_channel())
    } else {
        None
    };
    let mut batches: Vec<Vec<(ChannelRef, f64)>> = Vec::new();
    let mut current: Vec<(ChannelRef, f64)> = Vec::new();
    for (property, factor) in merged {
        let mut candidate = current.clone();
        candidate.push((property.clone(), factor));
        let overflow = candidate.len() > ctx.config.max_terms
            || render_batch(ctx, &effective, &candidate, strength.as_ref())?
                .text
                .len()
                > ctx.config.max_expr_len;
        if overflow && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            current.push((property, factor));
        } else {
            current = candidate;
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }

    let mut batch_channels = Vec::new();
    for (i, batch) in batches.iter().enumerate() {
        let channel = ctx.aux_channel(&batch_name(&effective, i + 1));
        let expression = render_batch(ctx, &effective, batch, strength.as_ref())?;
        let terms = batch
            .iter()
            .map(|(p, f)| LedgerTerm::new(VarSource::channel(p.clone()), *f))
            .collect();
        let mut ledger = TermLedger::new(LedgerRole::SumBatch).with_terms(terms);
        ledger.multipliers = strength.iter().cloned().collect();
        ctx.staging.set_expression(&channel, expression, Some(ledger));
        batch_channels.push(channel);
    }
    for stale in old_batches.iter().filter(|c| !batch_channels.contains(c)) {
        ctx.staging.clear(stale);
    }

    let mut members = batch_channels.clone();
    members.extend(extras);
    if needs_unity(&effective) {
        members.push(ctx.unity_channel());
    }
    let ledger = TermLedger::new(LedgerRole::SumAggregate).with_contributions(batch_channels);
    ctx.staging.set_additive(&effective, members, Some(ledger));

    if attach_to_correction {
        scale::attach_contribution(ctx, target, &effective)?;
    }
    Ok(CompileOutcome::Built)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_overrides_keep_first_position() {
        let mut q = SumQueue::default();
        let target = ChannelRef::bone("lHand", TransformChannel::RotationEuler, 0);
        q.push(target.clone(), ChannelRef::property("a"), 1.0);
        q.push(target.clone(), ChannelRef::property("b"), 2.0);
        q.push(target.clone(), ChannelRef::property("a"), 3.0);
        let drained = q.drain();
        assert!(q.is_empty());
        let contributions = &drained[&target];
        let order: Vec<_> = contributions.iter().map(|(k, v)| (k.label(), *v)).collect();
        assert_eq!(order, vec![("a".to_string(), 3.0), ("b".to_string(), 2.0)]);
    }

    #[test]
    fn batch_names_are_recognised() {
        let target = ChannelRef::bone("lHand", TransformChannel::Location, 1);
        assert_eq!(batch_name(&target, 3), "lHand:Loc1:03");
        assert!(is_batch_name(&target, &ChannelRef::property("lHand:Loc1:03")));
        assert!(!is_batch_name(&target, &ChannelRef::property("lHand:Loc1:Bone")));
        assert!(!is_batch_name(&target, &ChannelRef::property("rHand:Loc1:03")));
    }

    #[test]
    fn unity_for_quaternion_w_and_scale() {
        assert!(needs_unity(&ChannelRef::bone("hip", TransformChannel::RotationQuaternion, 0)));
        assert!(!needs_unity(&ChannelRef::bone("hip", TransformChannel::RotationQuaternion, 1)));
        assert!(needs_unity(&ChannelRef::bone("hip", TransformChannel::Scale, 2)));
        assert!(!needs_unity(&ChannelRef::property("hip:Sca2")));
    }
}
