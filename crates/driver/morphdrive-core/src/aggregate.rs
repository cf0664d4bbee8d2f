//! Groups formulas into per-output term lists.
//!
//! Outputs keep the order in which they first appear in the formula list, so a
//! pass over the same formulas always visits channels in the same order.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use morphdrive_api_core::{ChannelRef, PropertyOwner, RigHost};

use crate::config::CompilerConfig;
use crate::diagnostics::{DiagnosticCategory, DiagnosticLog};
use crate::formula::{Formula, FormulaSource, Term, TermSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveMode {
    /// Built by the expression synthesizer (or queued as sum contributions).
    Property,
    /// Built by the bone transform driver builder.
    Bone,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutputTerms {
    pub output: ChannelRef,
    pub mode: DriveMode,
    pub terms: Vec<Term>,
}

fn ensure_output<H: RigHost>(host: &mut H, config: &CompilerConfig, output: &ChannelRef) -> bool {
    let (owner, name) = match output {
        ChannelRef::RigProperty { name } => (PropertyOwner::Object, name),
        ChannelRef::DataProperty { name } => (PropertyOwner::Data, name),
        other => return host.channel_exists(other),
    };
    host.get_or_create_property(
        owner,
        name,
        config.property_default,
        config.property_min,
        config.property_max,
    );
    true
}

/// Resolve every formula against the host and group the surviving terms by
/// output. Source properties are created on demand; missing bones and
/// outputs are reported and skipped.
pub fn aggregate<H: RigHost>(
    host: &mut H,
    config: &CompilerConfig,
    diagnostics: &mut DiagnosticLog,
    formulas: &[Formula],
) -> Vec<OutputTerms> {
    let mut grouped: IndexMap<ChannelRef, Vec<Term>> = IndexMap::new();
    let mut missing_outputs: Vec<ChannelRef> = Vec::new();

    for formula in formulas {
        if missing_outputs.contains(&formula.output) {
            continue;
        }
        if !grouped.contains_key(&formula.output) && !ensure_output(host, config, &formula.output)
        {
            diagnostics.record(
                DiagnosticCategory::UnresolvedReference,
                formula.output.to_string(),
                "output channel does not exist",
            );
            missing_outputs.push(formula.output.clone());
            continue;
        }

        let term = match &formula.source {
            FormulaSource::Property { name } => {
                let channel = host.get_or_create_property(
                    PropertyOwner::Object,
                    name,
                    config.property_default,
                    config.property_min,
                    config.property_max,
                );
                let mut term = formula.term();
                term.source = TermSource::Property { channel };
                term
            }
            FormulaSource::BoneTransform { bone, .. } => {
                if !host.bone_exists(bone) {
                    diagnostics.record(
                        DiagnosticCategory::UnresolvedReference,
                        bone.clone(),
                        format!("source bone of {} does not exist", formula.output),
                    );
                    continue;
                }
                formula.term()
            }
        };

        let terms = grouped.entry(formula.output.clone()).or_default();
        if terms
            .iter()
            .any(|t| t.source == term.source && t.stage == term.stage)
        {
            log::debug!("{}: duplicate term dropped", formula.output);
            continue;
        }
        terms.push(term);
    }

    grouped
        .into_iter()
        .filter_map(|(output, terms)| {
            let mode = if terms.iter().any(Term::is_bone) {
                DriveMode::Bone
            } else {
                DriveMode::Property
            };
            let terms: Vec<Term> = match mode {
                DriveMode::Bone => {
                    let dropped = terms.iter().filter(|t| !t.is_bone()).count();
                    if dropped > 0 {
                        log::debug!("{output}: {dropped} property terms ignored on a bone driver");
                    }
                    terms.into_iter().filter(Term::is_bone).collect()
                }
                DriveMode::Property => terms,
            };
            (!terms.is_empty()).then_some(OutputTerms {
                output,
                mode,
                terms,
            })
        })
        .collect()
}
