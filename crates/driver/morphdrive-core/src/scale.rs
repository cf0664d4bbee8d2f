//! Scale inheritance correction.
//!
//! A bone that inherits scale from a driven parent gets a local scale driver
//! dividing out the parent's cumulative scale. Its own contribution, if any,
//! moves to a property named after the channel and is folded back in.

use std::collections::VecDeque;

use hashbrown::{HashMap, HashSet};

use morphdrive_api_core::{
    ChannelRef, Expression, LedgerRole, PropertyOwner, RigHost, TermLedger, TransformChannel,
    TransformKind, TransformReading, VarSource, VariableBinding,
};

use crate::ast::{ExprNode, LinearTerm};
use crate::compiler::{CompileOutcome, Ctx};
use crate::error::DriverError;
use crate::namespace::VarPool;

pub(crate) fn scale_channel(bone: &str, component: u8) -> ChannelRef {
    ChannelRef::bone(bone, TransformChannel::Scale, component)
}

/// Bones ordered so every parent precedes its children. Bones caught in a
/// parent cycle are appended in host order.
pub(crate) fn parents_first<H: RigHost + ?Sized>(host: &H) -> Vec<String> {
    let names = host.bone_names();
    let known: HashSet<&str> = names.iter().map(String::as_str).collect();
    let mut indegree: HashMap<&str, usize> = HashMap::new();
    let mut children: HashMap<String, Vec<&str>> = HashMap::new();
    for name in &names {
        indegree.entry(name.as_str()).or_insert(0);
        if let Some(parent) = host.bone_parent(name) {
            if known.contains(parent.as_str()) {
                *indegree.entry(name.as_str()).or_insert(0) += 1;
                children.entry(parent).or_default().push(name.as_str());
            }
        }
    }

    let mut queue: VecDeque<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|n| indegree.get(n).copied() == Some(0))
        .collect();
    let mut order = Vec::with_capacity(names.len());
    let mut placed: HashSet<&str> = HashSet::new();
    while let Some(bone) = queue.pop_front() {
        if !placed.insert(bone) {
            continue;
        }
        order.push(bone.to_string());
        if let Some(kids) = children.get(bone) {
            for kid in kids {
                if let Some(d) = indegree.get_mut(kid) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(*kid);
                    }
                }
            }
        }
    }
    if order.len() < names.len() {
        log::warn!("bone hierarchy has a parent cycle");
        for name in &names {
            if !placed.contains(name.as_str()) {
                order.push(name.clone());
            }
        }
    }
    order
}

/// What the corrected channel carried before correction.
enum Contribution {
    /// Summed members relocated to `x`: `(1+x)/p`.
    Additive(ChannelRef),
    /// Scripted value relocated to `x`: `x/p`.
    Scripted(ChannelRef),
    /// Nothing of its own: `1/p`.
    PassThrough,
}

fn correction_driver<H: RigHost>(
    ctx: &Ctx<'_, H>,
    channel: &ChannelRef,
    parent: &str,
    component: u8,
    contribution: &Contribution,
) -> Result<(Expression, TermLedger), DriverError> {
    let mut ns = ctx.namespace(channel);
    let mut bindings = Vec::new();
    let mut contributions = Vec::new();
    let numerator = match contribution {
        Contribution::Additive(x) | Contribution::Scripted(x) => {
            let var = ns.alloc(VarPool::General)?;
            bindings.push(VariableBinding::new(
                var.clone(),
                VarSource::channel(x.clone()),
            ));
            contributions.push(x.clone());
            let linear = ExprNode::linear(vec![LinearTerm::new(var, 1.0)]);
            match contribution {
                Contribution::Additive(_) => ExprNode::Sum(vec![ExprNode::Constant(1.0), linear]),
                _ => linear,
            }
        }
        Contribution::PassThrough => ExprNode::Constant(1.0),
    };
    let p = ns.alloc(VarPool::General)?;
    bindings.push(VariableBinding::new(
        p.clone(),
        VarSource::transform(TransformReading::pose(
            parent,
            TransformKind::Scale,
            component,
        )),
    ));
    let node = ExprNode::Ratio {
        numerator: Box::new(numerator),
        denominator: p,
    };
    let expression = Expression::new(ctx.render(&node), bindings);
    let ledger = TermLedger::new(LedgerRole::ScaleCorrection).with_contributions(contributions);
    Ok((expression, ledger))
}

pub(crate) fn correct_bone<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    bone: &str,
    component: u8,
    driven: &mut HashSet<String>,
) -> Result<CompileOutcome, DriverError> {
    let channel = scale_channel(bone, component);
    let ledger = ctx.host.ledger(&channel).filter(|l| l.is_current());
    if matches!(&ledger, Some(l) if l.role == LedgerRole::ScaleCorrection) {
        driven.insert(bone.to_string());
        return Ok(CompileOutcome::Unchanged);
    }
    let has_content = ctx.host.has_driver(&channel);
    let parent = ctx
        .host
        .bone_parent(bone)
        .filter(|p| driven.contains(p.as_str()) && ctx.host.inherits_scale(bone));
    let Some(parent) = parent else {
        if has_content {
            driven.insert(bone.to_string());
        }
        return Ok(CompileOutcome::Unchanged);
    };

    let contribution = if let Some(members) = ctx.host.additive_channels(&channel) {
        let unity =
            PropertyOwner::Object.channel(ctx.config.truncate_name(&ctx.config.unity_property));
        let members: Vec<ChannelRef> = members.into_iter().filter(|m| *m != unity).collect();
        let x = ctx.aux_channel(&channel.label());
        ctx.staging.set_additive(&x, members, ledger);
        Contribution::Additive(x)
    } else if let Some(expr) = ctx.host.get_expression(&channel) {
        let x = ctx.aux_channel(&channel.label());
        ctx.staging.set_expression(&x, expr, ledger);
        Contribution::Scripted(x)
    } else {
        Contribution::PassThrough
    };

    let (expression, ledger) = correction_driver(ctx, &channel, &parent, component, &contribution)?;
    log::debug!("{channel}: scale correction {}", expression.text);
    ctx.staging.set_expression(&channel, expression, Some(ledger));
    driven.insert(bone.to_string());
    Ok(CompileOutcome::Built)
}

/// Point an existing pass-through correction at a newly created contribution
/// property `x`, turning `1/p` into `(1+x)/p`.
pub(crate) fn attach_contribution<H: RigHost>(
    ctx: &mut Ctx<'_, H>,
    channel: &ChannelRef,
    x: &ChannelRef,
) -> Result<(), DriverError> {
    let Some((bone, component)) = channel
        .bone_name()
        .zip(channel.transform_channel().map(|(_, c)| c))
    else {
        return Ok(());
    };
    let Some(parent) = ctx.host.bone_parent(bone) else {
        return Ok(());
    };
    let (expression, ledger) = correction_driver(
        ctx,
        channel,
        &parent,
        component,
        &Contribution::Additive(x.clone()),
    )?;
    ctx.staging.set_expression(channel, expression, Some(ledger));
    Ok(())
}
