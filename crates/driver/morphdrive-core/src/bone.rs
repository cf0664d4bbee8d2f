//! Outputs driven by bone transforms (corrective shapes, bone-to-bone links).
//!
//! Each term reads one component of a source bone. The formula's source axis
//! is projected through that bone's local basis and the dominant resulting
//! component is the one the variable actually reads. Bone outputs get the
//! same treatment on the driven side: the formula axis is projected through
//! the driven bone's basis to pick the component that is written.

use morphdrive_api_core::{
    ChannelRef, Expression, LedgerRole, LedgerTerm, PropertyOwner, RigHost, TermLedger,
    TransformChannel, TransformReading, VarSource, VariableBinding,
};

use crate::ast::{ExprNode, LinearTerm};
use crate::compiler::{CompileOutcome, Ctx};
use crate::diagnostics::DiagnosticCategory;
use crate::error::DriverError;
use crate::formula::{FormulaStage, Term};
use crate::namespace::VarPool;
use crate::spline;

/// Index of the largest magnitude; later components win exact ties.
pub fn dominant_axis(v: &[f64; 3]) -> usize {
    let mut axes = [0usize, 1, 2];
    axes.sort_by(|a, b| v[*a].abs().total_cmp(&v[*b].abs()));
    axes[2]
}

/// Property that carries bone content for an output whose driver is additive.
pub(crate) fn routed_name(output: &ChannelRef) -> String {
    format!("{}:Bone", output.label())
}

/// Component actually written for a bone output, and the sign carried over
/// from the driven bone's basis. Non-bone outputs pass through unchanged.
pub(crate) fn driven_component<H: RigHost>(host: &H, output: &ChannelRef) -> (ChannelRef, f64) {
    let ChannelRef::BoneTransform {
        bone,
        channel,
        index,
    } = output
    else {
        return (output.clone(), 1.0);
    };
    if !matches!(channel, TransformChannel::Location | TransformChannel::RotationEuler) {
        return (output.clone(), 1.0);
    }
    let Some(row) = host
        .local_transform_basis(bone)
        .and_then(|basis| basis.get(usize::from(*index)).copied())
    else {
        return (output.clone(), 1.0);
    };
    let axis = dominant_axis(&row);
    if row[axis] == 0.0 {
        return (output.clone(), 1.0);
    }
    let sign = if row[axis] < 0.0 { -1.0 } else { 1.0 };
    (ChannelRef::bone(bone.clone(), *channel, axis as u8), sign)
}

pub(crate) fn compile<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    output: &ChannelRef,
    terms: &[Term],
    multipliers: &[ChannelRef],
    keep_existing: bool,
) -> Result<CompileOutcome, DriverError> {
    let (driven, sign) = driven_component(ctx.host, output);
    if driven != *output {
        log::debug!("{output}: driven axis maps to {driven}");
    }
    let output = &driven;
    let label = output.to_string();
    let limit = ctx.config.max_expr_len;
    let aggregate_members = ctx.host.additive_channels(output);
    let target = match &aggregate_members {
        Some(_) => {
            PropertyOwner::Object.channel(ctx.config.truncate_name(&routed_name(output)))
        }
        None => output.clone(),
    };
    let existing = ctx.host.get_expression(&target);
    let ledger = ctx.host.ledger(&target).filter(|l| l.is_current());

    let mut ns = ctx.namespace(&target);
    let mut bindings: Vec<VariableBinding> = Vec::new();
    let mut preserved: Option<ExprNode> = None;
    if keep_existing {
        if let Some(expr) = &existing {
            let part = ledger
                .as_ref()
                .and_then(|l| l.bone_part.clone())
                .unwrap_or_else(|| expr.clone());
            for b in &part.bindings {
                ns.reserve(&b.name);
                bindings.push(b.clone());
            }
            preserved = Some(ExprNode::Opaque(part.text));
        }
    }

    let mut sums: Vec<ExprNode> = Vec::new();
    let mut products: Vec<ExprNode> = Vec::new();
    let mut ledger_terms: Vec<LedgerTerm> = Vec::new();
    for term in terms {
        let Some(reading) = term.reading() else {
            log::debug!("{label}: property term ignored on the bone path");
            continue;
        };
        let bone = reading.bone.as_str();
        if let Some(driven) = output.bone_name() {
            if ctx.host.bone_parent(bone).as_deref() == Some(driven) {
                ctx.diagnostics.record(
                    DiagnosticCategory::UnresolvedReference,
                    label.as_str(),
                    format!("dependency loop: {bone} is a child of {driven}"),
                );
                continue;
            }
        }
        let Some(basis) = ctx.host.local_transform_basis(bone) else {
            ctx.diagnostics.record(
                DiagnosticCategory::UnresolvedReference,
                bone,
                format!("bone driving {label} not found"),
            );
            continue;
        };
        let Some(row) = basis.get(usize::from(reading.component)) else {
            ctx.diagnostics.record(
                DiagnosticCategory::UnresolvedReference,
                bone,
                format!("component {} out of range", reading.component),
            );
            continue;
        };
        let unit = ctx.config.units.for_kind(reading.kind);
        let effect = [row[0] * unit, row[1] * unit, row[2] * unit];
        let axis = dominant_axis(&effect);
        let u = effect[axis];
        if u == 0.0 {
            ctx.diagnostics.record(
                DiagnosticCategory::UnresolvedReference,
                bone,
                format!("{} has no effect on any axis", reading.kind.as_str()),
            );
            continue;
        }
        let source = VarSource::transform(TransformReading::local(bone, reading.kind, axis as u8));
        if preserved.is_some() && bindings.iter().any(|b| b.source == source) {
            log::debug!("{label}: {bone} already drives this output");
            continue;
        }

        let (var, fresh) = match bindings.iter().find(|b| b.source == source) {
            Some(b) => (b.name.clone(), false),
            None => (ns.alloc(VarPool::General)?, true),
        };
        let node = match &term.spline {
            Some(points) => {
                let points: Vec<(f64, f64)> = points.iter().map(|&(x, y)| (x, sign * y)).collect();
                match spline::build(ctx, &label, &var, u, &points)? {
                    Some(node) => node,
                    None => continue,
                }
            }
            None => ExprNode::linear(vec![LinearTerm::new(var.clone(), sign * term.factor * u)]),
        };
        let negligible = match &node {
            ExprNode::Linear(t) => t.iter().all(|t| t.factor.abs() < ctx.config.min_factor),
            _ => false,
        };
        if negligible || node.is_empty(ctx.decimals()) {
            log::debug!("{label}: dropping negligible term from {bone}");
            continue;
        }
        if fresh {
            bindings.push(VariableBinding::new(var, source.clone()));
        }
        if term.spline.is_none() {
            ledger_terms.push(LedgerTerm::new(source, sign * term.factor * u));
        }
        match term.stage {
            FormulaStage::Sum => sums.push(node),
            FormulaStage::Mult => products.push(ExprNode::Clamped(Box::new(node))),
        }
    }

    if sums.is_empty() && products.is_empty() {
        if preserved.is_some() {
            return Ok(CompileOutcome::Unchanged);
        }
        if existing.is_some() {
            ctx.staging.clear(&target);
        }
        ctx.diagnostics.record(
            DiagnosticCategory::EmptyDriver,
            label,
            "no bone term could be bound",
        );
        return Ok(CompileOutcome::Removed);
    }

    let mut parts: Vec<ExprNode> = preserved.into_iter().collect();
    parts.extend(sums);
    if !products.is_empty() {
        parts.push(ExprNode::Product(products));
    }
    let bone_node = if parts.len() == 1 {
        parts.remove(0)
    } else {
        ExprNode::Sum(parts)
    };
    let bone_text = ctx.render(&bone_node);
    if bone_text.len() > limit {
        return Err(ctx.too_long(&target, &bone_text, limit));
    }
    let mut bone_part = Expression::new(bone_text.clone(), bindings.clone());
    bone_part.prune_unused();

    let mut mult_channels = Vec::new();
    let mut mult_vars = Vec::new();
    for m in multipliers {
        if mult_channels.contains(m) {
            continue;
        }
        mult_channels.push(m.clone());
        let source = VarSource::channel(m.clone());
        if bone_part.binding_for(&source).is_some() {
            log::debug!("{label}: multiplier {m} already bound");
            continue;
        }
        let var = ns.alloc(VarPool::Multiplier)?;
        bindings.push(VariableBinding::new(var.clone(), source));
        mult_vars.push(var);
    }
    let text = ctx.render(&ExprNode::wrapped(mult_vars, ExprNode::Opaque(bone_text)));
    let hard_limit = ctx.config.max_expression_size;
    if text.len() > hard_limit {
        return Err(ctx.too_long(&target, &text, hard_limit));
    }
    let mut expression = Expression::new(text, bindings);
    expression.prune_unused();

    let mut new_ledger = TermLedger::new(LedgerRole::Bone).with_terms(ledger_terms);
    new_ledger.multipliers = mult_channels;
    new_ledger.bone_part = Some(bone_part);

    match aggregate_members {
        Some(mut members) => {
            if let Some(name) = target.property_name() {
                ctx.aux_channel(name);
            }
            ctx.staging
                .set_expression(&target, expression, Some(new_ledger));
            if !members.contains(&target) {
                members.push(target.clone());
            }
            let aggregate_ledger = ctx.host.ledger(output);
            ctx.staging.set_additive(output, members, aggregate_ledger);
            log::debug!("{label}: bone content routed to {target}");
        }
        None => ctx
            .staging
            .set_expression(&target, expression, Some(new_ledger)),
    }
    Ok(CompileOutcome::Built)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dominant_axis_prefers_magnitude_then_last() {
        assert_eq!(dominant_axis(&[0.1, -0.9, 0.3]), 1);
        assert_eq!(dominant_axis(&[0.5, -0.5, 0.2]), 1);
        assert_eq!(dominant_axis(&[0.7, 0.7, 0.7]), 2);
        assert_eq!(dominant_axis(&[0.0, 0.0, 0.0]), 2);
    }
}
