//! Overflow chains: extending an already-driven property channel without
//! rewriting what earlier passes put there.
//!
//! Each level references the next through the reserved variable `R`. New terms
//! always go into a fresh level appended at the tail, so the existing text of
//! every level is kept verbatim apart from the one appended `+R`.

use hashbrown::HashSet;

use morphdrive_api_core::{
    ChannelRef, Expression, LedgerTerm, RigHost, TermLedger, VarSource,
    VariableBinding,
};

use crate::ast::ExprNode;
use crate::compiler::{CompileOutcome, Ctx};
use crate::error::DriverError;
use crate::namespace::{VarPool, REST_NAME};
use crate::synth::{build_level, rest_name};

/// Next level referenced by a driver, from its ledger or its trailing `+R`.
pub(crate) fn rest_link(expr: &Expression, ledger: Option<&TermLedger>) -> Option<ChannelRef> {
    if let Some(rest) = ledger.and_then(|l| l.rest.clone()) {
        return Some(rest);
    }
    let channel = expr.binding(REST_NAME)?.source.as_channel()?;
    let tail = expr.text.trim_end().trim_end_matches(')');
    let marker = format!("+{REST_NAME}");
    (tail == REST_NAME || tail.ends_with(&marker)).then(|| channel.clone())
}

/// Overflow levels hanging off `root`, nearest first.
pub(crate) fn chain_levels<H: RigHost + ?Sized>(host: &H, root: &ChannelRef) -> Vec<ChannelRef> {
    let mut levels: Vec<ChannelRef> = Vec::new();
    let mut current = root.clone();
    while let Some(expr) = host.get_expression(&current) {
        let ledger = host.ledger(&current).filter(|l| l.is_current());
        let Some(next) = rest_link(&expr, ledger.as_ref()) else {
            break;
        };
        if next == *root || levels.contains(&next) {
            log::warn!("{root}: overflow chain loops back to {next}");
            break;
        }
        levels.push(next.clone());
        current = next;
    }
    levels
}

/// Every source read anywhere along the chain starting at `root`.
fn chain_sources<H: RigHost>(host: &H, root: &ChannelRef, root_expr: &Expression) -> HashSet<VarSource> {
    let mut sources: HashSet<VarSource> = HashSet::new();
    let mut collect = |expr: &Expression, ledger: Option<TermLedger>| {
        sources.extend(expr.bindings.iter().map(|b| b.source.clone()));
        if let Some(ledger) = ledger {
            sources.extend(ledger.terms.into_iter().map(|t| t.source));
        }
    };
    collect(root_expr, host.ledger(root));
    for level in chain_levels(host, root) {
        if let Some(expr) = host.get_expression(&level) {
            collect(&expr, host.ledger(&level));
        }
    }
    sources
}

pub(crate) fn extend<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    root: &ChannelRef,
    root_expr: Expression,
    root_ledger: Option<TermLedger>,
    terms: Vec<LedgerTerm>,
    multipliers: &[ChannelRef],
) -> Result<CompileOutcome, DriverError> {
    let limit = ctx.config.max_expression_size;
    let present = chain_sources(ctx.host, root, &root_expr);
    let fresh: Vec<LedgerTerm> = terms
        .into_iter()
        .filter(|t| !present.contains(&t.source))
        .collect();
    let mut missing_mults: Vec<ChannelRef> = Vec::new();
    for m in multipliers {
        let source = VarSource::channel(m.clone());
        if root_expr.binding_for(&source).is_none() && !missing_mults.contains(m) {
            missing_mults.push(m.clone());
        }
    }
    if fresh.is_empty() && missing_mults.is_empty() {
        log::debug!("{root}: chain already holds every term");
        return Ok(CompileOutcome::Unchanged);
    }

    let mut root_update = (root_expr.clone(), root_ledger.clone());
    if !fresh.is_empty() {
        let mut level = 0;
        let mut channel = root.clone();
        let mut expr = root_expr;
        let mut ledger = root_ledger;
        let mut visited = vec![root.clone()];
        loop {
            let Some(next) = rest_link(&expr, ledger.as_ref()) else {
                break;
            };
            if visited.contains(&next) {
                log::warn!("{root}: overflow chain loops back to {next}");
                break;
            }
            level += 1;
            match ctx.host.get_expression(&next) {
                Some(next_expr) => {
                    ledger = ctx.host.ledger(&next).filter(|l| l.is_current());
                    expr = next_expr;
                    visited.push(next.clone());
                    channel = next;
                }
                None => {
                    log::debug!("{root}: overflow level {next} lost its driver, rebuilding");
                    if let Some(name) = next.property_name() {
                        ctx.aux_channel(name);
                    }
                    build_level(ctx, root, level, &next, None, &fresh, &[])?;
                    return finish_root(ctx, root, root_update, &missing_mults, limit);
                }
            }
        }

        let mut ns = ctx.namespace(&channel);
        for b in &expr.bindings {
            ns.reserve(&b.name);
        }
        let var = ns.alloc(VarPool::Rest)?;
        let text = ctx.render(&ExprNode::chain(
            ExprNode::Opaque(expr.text.clone()),
            Some(var.clone()),
        ));
        if text.len() > limit {
            return Err(ctx.too_long(&channel, &text, limit));
        }
        let rest_channel = ctx.aux_channel(&rest_name(root, level + 1));
        let mut extended = expr;
        extended.text = text;
        extended.bindings.push(VariableBinding::new(
            var,
            VarSource::channel(rest_channel.clone()),
        ));
        let ledger = ledger.map(|mut l| {
            l.rest = Some(rest_channel.clone());
            l
        });
        if channel == *root {
            root_update = (extended, ledger);
        } else {
            ctx.staging.set_expression(&channel, extended, ledger);
        }
        build_level(ctx, root, level + 1, &rest_channel, None, &fresh, &[])?;
    }
    finish_root(ctx, root, root_update, &missing_mults, limit)
}

/// Stage the root, wrapped in any multipliers it does not read yet.
fn finish_root<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    root: &ChannelRef,
    (mut expr, mut ledger): (Expression, Option<TermLedger>),
    missing_mults: &[ChannelRef],
    limit: usize,
) -> Result<CompileOutcome, DriverError> {
    if !missing_mults.is_empty() {
        let mut ns = ctx.namespace(root);
        for b in &expr.bindings {
            ns.reserve(&b.name);
        }
        let mut vars = Vec::new();
        for m in missing_mults {
            let var = ns.alloc(VarPool::Multiplier)?;
            expr.bindings
                .push(VariableBinding::new(var.clone(), VarSource::channel(m.clone())));
            vars.push(var);
        }
        let text = ctx.render(&ExprNode::wrapped(vars, ExprNode::Opaque(expr.text.clone())));
        if text.len() > limit {
            return Err(ctx.too_long(root, &text, limit));
        }
        expr.text = text;
        if let Some(l) = ledger.as_mut() {
            l.multipliers.extend(missing_mults.iter().cloned());
        }
    }
    if ledger.is_none() {
        log::debug!("{root}: extending a driver without ledger");
    }
    ctx.staging.set_expression(root, expr, ledger);
    Ok(CompileOutcome::Built)
}
