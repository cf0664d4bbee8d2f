//! One compilation pass over a rig.
//!
//! `DriverCompiler` borrows the host for the duration of the pass. Every
//! operation builds into a [`Staging`] area against a read-only view of the
//! host and commits only on success; fatal errors abort the operation and
//! leave the host as it was before it started.

use hashbrown::HashSet;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use morphdrive_api_core::{ChannelRef, RigHost};

use crate::aggregate::{self, DriveMode};
use crate::ast::ExprNode;
use crate::bone;
use crate::config::CompilerConfig;
use crate::diagnostics::{DiagnosticCategory, DiagnosticLog, PassReport, PassSummary};
use crate::error::DriverError;
use crate::formula::{Formula, Term};
use crate::namespace::VarNamespace;
use crate::scale;
use crate::spline;
use crate::staging::Staging;
use crate::sum_driver::{self, SumQueue};
use crate::synth;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompileOutcome {
    /// New driver state written.
    Built,
    /// The channel already held everything requested.
    Unchanged,
    /// No term could be bound; the driver was removed.
    Removed,
    /// Over a size limit; the prior driver was kept.
    Rejected,
    /// Deferred to the sum-driver aggregator.
    Queued,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PassOptions {
    /// Rebuild property drivers from this pass's terms instead of extending them.
    pub primary: bool,
    /// Compose new bone terms into existing bone drivers.
    pub keep_existing: bool,
}

impl Default for PassOptions {
    fn default() -> Self {
        Self {
            primary: true,
            keep_existing: false,
        }
    }
}

/// Read-only host view plus the mutable pieces a builder needs.
pub(crate) struct Ctx<'a, H: RigHost> {
    pub host: &'a H,
    pub config: &'a CompilerConfig,
    pub diagnostics: &'a mut DiagnosticLog,
    pub staging: &'a mut Staging,
}

impl<'a, H: RigHost> Ctx<'a, H> {
    pub fn decimals(&self) -> usize {
        self.config.coefficient_decimals
    }

    pub fn render(&self, node: &ExprNode) -> String {
        node.render(self.config.coefficient_decimals)
    }

    pub fn namespace(&self, channel: &ChannelRef) -> VarNamespace {
        VarNamespace::for_channel(channel.to_string(), self.config.two_letter_names)
    }

    /// Compiler-owned property (rest level, sum batch, relocated content).
    pub fn aux_channel(&mut self, name: &str) -> ChannelRef {
        let name = self.config.truncate_name(name);
        self.staging
            .ensure_property(&name, 0.0, self.config.aux_min, self.config.aux_max)
    }

    pub fn unity_channel(&mut self) -> ChannelRef {
        let name = self.config.truncate_name(&self.config.unity_property);
        self.staging.ensure_property(&name, 1.0, 1.0, 1.0)
    }

    pub fn strength_channel(&mut self) -> ChannelRef {
        let name = self.config.truncate_name(&self.config.translation_strength_property);
        self.staging.ensure_property(&name, 1.0, 0.0, 1.0)
    }

    pub fn too_long(&self, channel: &ChannelRef, text: &str, limit: usize) -> DriverError {
        DriverError::ExpressionTooLong {
            channel: channel.to_string(),
            len: text.len(),
            limit,
        }
    }
}

pub struct DriverCompiler<'h, H: RigHost> {
    host: &'h mut H,
    config: CompilerConfig,
    options: PassOptions,
    multipliers: IndexMap<ChannelRef, Vec<ChannelRef>>,
    diagnostics: DiagnosticLog,
    sums: SumQueue,
    staging: Staging,
    summary: PassSummary,
    sum_drivers: usize,
    scale_corrections: usize,
}

impl<'h, H: RigHost> DriverCompiler<'h, H> {
    pub fn new(host: &'h mut H, config: CompilerConfig) -> Self {
        let diagnostics = DiagnosticLog::new(config.diagnostics.clone());
        Self {
            host,
            config,
            options: PassOptions::default(),
            multipliers: IndexMap::new(),
            diagnostics,
            sums: SumQueue::default(),
            staging: Staging::new(),
            summary: PassSummary::default(),
            sum_drivers: 0,
            scale_corrections: 0,
        }
    }

    pub fn with_options(mut self, options: PassOptions) -> Self {
        self.options = options;
        self
    }

    /// Adjuster sliders multiplied into every driver built for `output`.
    pub fn set_multipliers(&mut self, output: ChannelRef, multipliers: Vec<ChannelRef>) {
        self.multipliers.insert(output, multipliers);
    }

    pub fn host(&self) -> &H {
        self.host
    }

    pub fn config(&self) -> &CompilerConfig {
        &self.config
    }

    pub fn options(&self) -> PassOptions {
        self.options
    }

    pub fn diagnostics(&self) -> &DiagnosticLog {
        &self.diagnostics
    }

    pub fn summary(&self) -> PassSummary {
        self.summary
    }

    /// Aggregate formulas per output and compile each output in definition order.
    pub fn compile_formulas(&mut self, formulas: &[Formula]) -> Result<PassSummary, DriverError> {
        let outputs = aggregate::aggregate(
            &mut *self.host,
            &self.config,
            &mut self.diagnostics,
            formulas,
        );
        let options = self.options;
        for group in outputs {
            let multipliers = self
                .multipliers
                .get(&group.output)
                .cloned()
                .unwrap_or_default();
            match group.mode {
                DriveMode::Bone => {
                    self.build_bone_driver(
                        &group.output,
                        &group.terms,
                        &multipliers,
                        options.keep_existing,
                    )?;
                }
                DriveMode::Property => {
                    self.compile_property_driver(
                        &group.output,
                        &group.terms,
                        &multipliers,
                        options.primary,
                    )?;
                }
            }
        }
        Ok(self.summary)
    }

    /// Property-sourced terms into `output`. Bone-transform outputs are queued
    /// for [`Self::finalize_sum_drivers`].
    pub fn compile_property_driver(
        &mut self,
        output: &ChannelRef,
        terms: &[Term],
        multipliers: &[ChannelRef],
        primary: bool,
    ) -> Result<CompileOutcome, DriverError> {
        if output.is_bone_transform() {
            for term in terms {
                match term.var_source().and_then(|s| s.as_channel().cloned()) {
                    Some(property) => {
                        let subject = output.to_string();
                        let factor = spline::property_factor(&mut self.diagnostics, &subject, term);
                        self.queue_sum_contribution(output.clone(), property, factor)
                    }
                    None => log::debug!("{output}: bone term skipped on sum-driver queue"),
                }
            }
            self.tally(CompileOutcome::Queued);
            return Ok(CompileOutcome::Queued);
        }
        let outcome =
            self.transact(output, |ctx| synth::compile(ctx, output, terms, multipliers, primary))?;
        self.tally(outcome);
        Ok(outcome)
    }

    /// Bone-transform terms into `output`, using the multipliers registered for it.
    pub fn compile_bone_driver(
        &mut self,
        output: &ChannelRef,
        terms: &[Term],
        keep_existing: bool,
    ) -> Result<CompileOutcome, DriverError> {
        let multipliers = self.multipliers.get(output).cloned().unwrap_or_default();
        self.build_bone_driver(output, terms, &multipliers, keep_existing)
    }

    fn build_bone_driver(
        &mut self,
        output: &ChannelRef,
        terms: &[Term],
        multipliers: &[ChannelRef],
        keep_existing: bool,
    ) -> Result<CompileOutcome, DriverError> {
        let outcome = self.transact(output, |ctx| {
            bone::compile(ctx, output, terms, multipliers, keep_existing)
        })?;
        self.tally(outcome);
        Ok(outcome)
    }

    /// Later contributions from the same property replace earlier ones.
    pub fn queue_sum_contribution(&mut self, target: ChannelRef, property: ChannelRef, factor: f64) {
        self.sums.push(target, property, factor);
    }

    pub fn pending_sum_targets(&self) -> usize {
        self.sums.len()
    }

    /// Build every queued sum driver. Returns the number of aggregates written.
    pub fn finalize_sum_drivers(&mut self) -> Result<usize, DriverError> {
        let mut built = 0;
        for (target, contributions) in self.sums.drain() {
            let outcome = self.transact(&target, |ctx| {
                sum_driver::build(ctx, &target, &contributions)
            })?;
            if outcome == CompileOutcome::Built {
                built += 1;
            }
        }
        self.sum_drivers += built;
        Ok(built)
    }

    /// Compensate inherited scale down every bone chain. Returns the number of
    /// components corrected.
    pub fn correct_scale_chain(&mut self) -> Result<usize, DriverError> {
        let order = scale::parents_first(&*self.host);
        let mut corrected = 0;
        for component in 0..3u8 {
            let mut driven: HashSet<String> = HashSet::new();
            for bone in &order {
                let channel = scale::scale_channel(bone, component);
                let outcome = self.transact(&channel, |ctx| {
                    scale::correct_bone(ctx, bone, component, &mut driven)
                })?;
                if outcome == CompileOutcome::Built {
                    corrected += 1;
                }
            }
        }
        self.scale_corrections += corrected;
        Ok(corrected)
    }

    /// Close the pass and hand back grouped diagnostics.
    pub fn finish(self) -> PassReport {
        PassReport {
            summary: self.summary,
            sum_drivers: self.sum_drivers,
            scale_corrections: self.scale_corrections,
            groups: self.diagnostics.groups(),
            max_subjects: self.config.diagnostics.max_subjects,
        }
    }

    /// Formulas, sum drivers and scale correction in one go.
    pub fn run_pass(mut self, formulas: &[Formula]) -> Result<PassReport, DriverError> {
        self.compile_formulas(formulas)?;
        self.finalize_sum_drivers()?;
        self.correct_scale_chain()?;
        Ok(self.finish())
    }

    fn tally(&mut self, outcome: CompileOutcome) {
        let s = &mut self.summary;
        match outcome {
            CompileOutcome::Built => s.built += 1,
            CompileOutcome::Unchanged => s.unchanged += 1,
            CompileOutcome::Removed => s.removed += 1,
            CompileOutcome::Rejected => s.rejected += 1,
            CompileOutcome::Queued => s.queued += 1,
        }
    }

    fn transact(
        &mut self,
        channel: &ChannelRef,
        build: impl FnOnce(&mut Ctx<'_, H>) -> Result<CompileOutcome, DriverError>,
    ) -> Result<CompileOutcome, DriverError> {
        self.staging.begin();
        let result = {
            let mut ctx = Ctx {
                host: &*self.host,
                config: &self.config,
                diagnostics: &mut self.diagnostics,
                staging: &mut self.staging,
            };
            build(&mut ctx).map(|outcome| {
                if outcome == CompileOutcome::Built && !ctx.staging.changes(ctx.host) {
                    CompileOutcome::Unchanged
                } else {
                    outcome
                }
            })
        };
        match result {
            Ok(outcome @ (CompileOutcome::Rejected | CompileOutcome::Unchanged)) => {
                self.staging.begin();
                Ok(outcome)
            }
            Ok(outcome) => {
                let batch = self.staging.take();
                log::debug!("{channel}: committing {} writes", batch.len());
                self.host.apply_writes(batch);
                Ok(outcome)
            }
            Err(err) if !err.is_fatal() => {
                self.staging.begin();
                self.diagnostics.record(
                    DiagnosticCategory::CapacityExceeded,
                    channel.to_string(),
                    err.to_string(),
                );
                Ok(CompileOutcome::Rejected)
            }
            Err(err) => {
                self.staging.begin();
                log::error!("{channel}: {err}");
                Err(err)
            }
        }
    }
}
