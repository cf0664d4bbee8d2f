//! morphdrive-core
//!
//! Compiles morph formulas into driver expressions on a rig and merges them
//! with whatever earlier passes left there. The rig itself is reached only
//! through [`morphdrive_api_core::RigHost`].
//!
//! A pass runs in three stages: formulas are grouped per output and compiled
//! (property drivers with overflow chaining, or bone transform drivers),
//! queued contributions to bone transform channels are built into sum
//! drivers, and finally inherited scale is corrected down every bone chain.

pub mod aggregate;
pub mod ast;
mod bone;
mod chain;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod formula;
pub mod namespace;
pub mod recover;
mod scale;
pub mod spline;
mod staging;
pub mod sum_driver;
mod synth;

pub use crate::aggregate::{aggregate, DriveMode, OutputTerms};
pub use crate::bone::dominant_axis;
pub use crate::compiler::{CompileOutcome, DriverCompiler, PassOptions};
pub use crate::config::{CompilerConfig, DiagnosticsCfg, UnitScale};
pub use crate::diagnostics::{
    Diagnostic, DiagnosticCategory, DiagnosticGroup, DiagnosticLog, PassReport, PassSummary,
};
pub use crate::error::DriverError;
pub use crate::formula::{Formula, FormulaSource, FormulaStage, Term, TermSource};
pub use crate::namespace::{VarNamespace, VarPool};
pub use crate::recover::{parse_linear, RecoverError};
pub use crate::sum_driver::SumQueue;

/// Compile `formulas` into `host` with default options and run the full pass.
pub fn compile_rig<H: morphdrive_api_core::RigHost>(
    host: &mut H,
    config: CompilerConfig,
    formulas: &[Formula],
) -> Result<PassReport, DriverError> {
    DriverCompiler::new(host, config).run_pass(formulas)
}
