//! Property driver synthesis: inline batches, multiplier wrapping and overflow levels.

use morphdrive_api_core::{
    ChannelRef, Expression, LedgerRole, LedgerTerm, RigHost, TermLedger, VarSource,
    VariableBinding,
};

use crate::ast::{ExprNode, LinearTerm};
use crate::chain;
use crate::compiler::{CompileOutcome, Ctx};
use crate::diagnostics::DiagnosticCategory;
use crate::error::DriverError;
use crate::formula::Term;
use crate::namespace::VarPool;
use crate::spline;

pub(crate) fn compile<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    output: &ChannelRef,
    terms: &[Term],
    multipliers: &[ChannelRef],
    primary: bool,
) -> Result<CompileOutcome, DriverError> {
    let resolved = resolve_terms(ctx, output, terms);
    let existing = ctx.host.get_expression(output);
    let ledger = ctx.host.ledger(output).filter(|l| l.is_current());

    if let (Some(expr), false) = (&existing, primary) {
        return chain::extend(ctx, output, expr.clone(), ledger, resolved, multipliers);
    }

    let bone_part = preserved_bone_part(existing.as_ref(), ledger.as_ref());
    let old_levels = chain::chain_levels(ctx.host, output);

    if resolved.is_empty() && bone_part.is_none() {
        for level in &old_levels {
            ctx.staging.clear(level);
        }
        if existing.is_some() {
            ctx.staging.clear(output);
        }
        ctx.diagnostics.record(
            DiagnosticCategory::EmptyDriver,
            output.to_string(),
            "no term could be bound",
        );
        return Ok(CompileOutcome::Removed);
    }

    let written = build_level(ctx, output, 0, output, bone_part, &resolved, multipliers)?;
    for stale in old_levels.iter().filter(|c| !written.contains(c)) {
        log::debug!("{output}: clearing stale overflow level {stale}");
        ctx.staging.clear(stale);
    }
    Ok(CompileOutcome::Built)
}

/// Property terms whose source exists, deduplicated by source (first wins).
pub(crate) fn resolve_terms<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    output: &ChannelRef,
    terms: &[Term],
) -> Vec<LedgerTerm> {
    let mut resolved: Vec<LedgerTerm> = Vec::new();
    for term in terms {
        let Some(source) = term.var_source() else {
            log::debug!("{output}: bone term ignored on the property path");
            continue;
        };
        if let Some(channel) = source.as_channel() {
            if !ctx.host.channel_exists(channel) {
                ctx.diagnostics.record(
                    DiagnosticCategory::UnresolvedReference,
                    channel.to_string(),
                    format!("source of {output} does not exist"),
                );
                continue;
            }
        }
        if resolved.iter().any(|t| t.source == source) {
            continue;
        }
        let factor = spline::property_factor(ctx.diagnostics, &output.to_string(), term);
        resolved.push(LedgerTerm::new(source, factor));
    }
    resolved
}

/// Bone-transform content of an existing driver that survives a rebuild.
pub(crate) fn preserved_bone_part(
    existing: Option<&Expression>,
    ledger: Option<&TermLedger>,
) -> Option<Expression> {
    if let Some(ledger) = ledger {
        if let Some(part) = &ledger.bone_part {
            return Some(part.clone());
        }
        if ledger.role != LedgerRole::Bone {
            return None;
        }
    }
    let expr = existing?;
    let all_transforms =
        !expr.bindings.is_empty() && expr.bindings.iter().all(|b| b.source.is_transform());
    all_transforms.then(|| expr.clone())
}

/// Name of overflow level `level` under `root`.
pub(crate) fn rest_name(root: &ChannelRef, level: usize) -> String {
    format!("{}:R{level}", root.label())
}

/// Build one level of a property driver chain and recurse into the remainder.
/// Returns every channel written, this level first.
pub(crate) fn build_level<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    root: &ChannelRef,
    level: usize,
    channel: &ChannelRef,
    bone_part: Option<Expression>,
    terms: &[LedgerTerm],
    multipliers: &[ChannelRef],
) -> Result<Vec<ChannelRef>, DriverError> {
    let limit = ctx.config.max_expression_size;
    let mut ns = ctx.namespace(channel);
    let mut bindings: Vec<VariableBinding> = Vec::new();
    if let Some(part) = &bone_part {
        for b in &part.bindings {
            ns.reserve(&b.name);
            bindings.push(b.clone());
        }
    }

    let mut mult_channels: Vec<ChannelRef> = Vec::new();
    let mut mult_vars: Vec<String> = Vec::new();
    for m in multipliers {
        if mult_channels.contains(m) {
            continue;
        }
        mult_channels.push(m.clone());
        let source = VarSource::channel(m.clone());
        let name = match bindings.iter().find(|b| b.source == source) {
            Some(b) => b.name.clone(),
            None => {
                let name = ns.alloc(VarPool::Multiplier)?;
                bindings.push(VariableBinding::new(name.clone(), source));
                name
            }
        };
        mult_vars.push(name);
    }

    let bone_node = bone_part.as_ref().map(|e| ExprNode::Opaque(e.text.clone()));
    let assemble = |linear: Vec<LinearTerm>, rest: Option<String>| {
        let mut parts: Vec<ExprNode> = bone_node.iter().cloned().collect();
        parts.push(ExprNode::linear(linear));
        ExprNode::wrapped(
            mult_vars.clone(),
            ExprNode::chain(ExprNode::Sum(parts), rest),
        )
    };

    let mut inline: Vec<LinearTerm> = Vec::new();
    for (i, term) in terms.iter().enumerate() {
        if inline.len() >= ctx.config.max_inline_terms {
            break;
        }
        let name = ns.alloc(VarPool::General)?;
        let mut candidate = inline.clone();
        candidate.push(LinearTerm::new(name.clone(), term.factor));
        let more = i + 1 < terms.len();
        let text = ctx.render(&assemble(candidate, more.then(|| "R".to_string())));
        if text.len() > limit {
            break;
        }
        bindings.push(VariableBinding::new(name.clone(), term.source.clone()));
        inline.push(LinearTerm::new(name, term.factor));
    }

    let remainder = &terms[inline.len()..];
    if !remainder.is_empty() && inline.is_empty() && bone_part.is_none() && mult_vars.is_empty() {
        // A lone term that does not fit would recurse forever.
        let text = ctx.render(&assemble(
            vec![LinearTerm::new("a", remainder[0].factor)],
            None,
        ));
        return Err(ctx.too_long(channel, &text, limit));
    }

    let rest = if remainder.is_empty() {
        None
    } else {
        let var = ns.alloc(VarPool::Rest)?;
        let rest_channel = ctx.aux_channel(&rest_name(root, level + 1));
        bindings.push(VariableBinding::new(
            var.clone(),
            VarSource::channel(rest_channel.clone()),
        ));
        Some((var, rest_channel))
    };

    let node = assemble(inline, rest.as_ref().map(|(var, _)| var.clone()));
    let text = ctx.render(&node);
    if text.len() > limit {
        return Err(ctx.too_long(channel, &text, limit));
    }
    let mut expression = Expression::new(text, bindings);
    expression.prune_unused();

    let inline_count = terms.len() - remainder.len();
    let role = if level == 0 {
        LedgerRole::Linear
    } else {
        LedgerRole::Rest
    };
    let mut ledger = TermLedger::new(role).with_terms(terms[..inline_count].to_vec());
    ledger.multipliers = mult_channels;
    ledger.rest = rest.as_ref().map(|(_, c)| c.clone());
    ledger.bone_part = bone_part;

    log::debug!(
        "{channel}: level {level} with {inline_count} inline terms, {} overflowing",
        remainder.len()
    );
    ctx.staging.set_expression(channel, expression, Some(ledger));

    let mut written = vec![channel.clone()];
    if let Some((_, rest_channel)) = rest {
        written.extend(build_level(
            ctx,
            root,
            level + 1,
            &rest_channel,
            None,
            remainder,
            &[],
        )?);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use morphdrive_api_core::{TransformKind, TransformReading};

    #[test]
    fn bone_part_prefers_ledger() {
        let reading = VarSource::transform(TransformReading::local("lForearm", TransformKind::Rotation, 0));
        let part = Expression::new("2*a", vec![VariableBinding::new("a", reading.clone())]);
        let mut ledger = TermLedger::new(LedgerRole::Linear);
        ledger.bone_part = Some(part.clone());
        let whole = Expression::new("2*a+b", Vec::new());
        assert_eq!(preserved_bone_part(Some(&whole), Some(&ledger)), Some(part.clone()));

        // Without a ledger only all-transform drivers count as bone content.
        assert_eq!(preserved_bone_part(Some(&part), None), Some(part.clone()));
        let mixed = Expression::new(
            "2*a+b",
            vec![
                VariableBinding::new("a", reading),
                VariableBinding::new("b", VarSource::channel(ChannelRef::property("x"))),
            ],
        );
        assert_eq!(preserved_bone_part(Some(&mixed), None), None);
    }

    #[test]
    fn rest_names_follow_root_label() {
        let root = ChannelRef::shape_key("Body", "eCTRLSmile");
        assert_eq!(rest_name(&root, 2), "eCTRLSmile:R2");
    }
}
