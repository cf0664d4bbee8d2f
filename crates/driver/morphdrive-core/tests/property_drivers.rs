use morphdrive_api_core::{ChannelRef, LedgerRole, RigHost, VarSource};
use morphdrive_core::{
    parse_linear, CompileOutcome, CompilerConfig, DiagnosticCategory, DriverCompiler, Formula,
    PassOptions, Term,
};
use morphdrive_rig_memory::MemoryRig;

fn smile() -> ChannelRef {
    ChannelRef::shape_key("Body", "Smile")
}

fn face() -> MemoryRig {
    let mut rig = MemoryRig::new();
    rig.add_shape_key("Body", "Smile")
        .add_shape_key("Body", "Wide")
        .add_property("Happy", 0.0)
        .add_property("Joy", 0.0);
    rig
}

fn compile(rig: &mut MemoryRig, terms: &[Term], primary: bool) -> CompileOutcome {
    let mut compiler = DriverCompiler::new(rig, CompilerConfig::default());
    compiler
        .compile_property_driver(&smile(), terms, &[], primary)
        .expect("compile ok")
}

#[test]
fn single_term_renders_linear_text_and_ledger() {
    let mut rig = face();
    let outcome = compile(&mut rig, &[Term::property(ChannelRef::property("Happy"), 0.5)], true);
    assert_eq!(outcome, CompileOutcome::Built);

    let expr = rig.expression(&smile()).expect("driver present");
    assert_eq!(expr.text, "0.5*a");
    assert_eq!(
        expr.binding("a").map(|b| b.source.clone()),
        Some(VarSource::channel(ChannelRef::property("Happy")))
    );
    let ledger = rig.ledger_of(&smile()).expect("ledger present");
    assert_eq!(ledger.role, LedgerRole::Linear);
    assert_eq!(ledger.terms.len(), 1);
    assert!(ledger.rest.is_none());
}

#[test]
fn rebuilding_the_same_terms_is_a_no_op() {
    let mut rig = face();
    let terms = [
        Term::property(ChannelRef::property("Happy"), 1.0),
        Term::property(ChannelRef::property("Joy"), -0.25),
    ];
    assert_eq!(compile(&mut rig, &terms, true), CompileOutcome::Built);
    assert_eq!(rig.expression(&smile()).map(|e| e.text.as_str()), Some("a-0.25*b"));
    rig.take_conflicts();

    assert_eq!(compile(&mut rig, &terms, true), CompileOutcome::Unchanged);
    assert!(rig.conflicts().is_empty());
}

#[test]
fn wide_fanout_overflows_into_rest_levels() {
    let mut rig = face();
    let wide = ChannelRef::shape_key("Body", "Wide");
    let terms: Vec<Term> = (0..20)
        .map(|i| {
            let name = format!("P{i:02}");
            rig.add_property(&name, 0.0);
            Term::property(ChannelRef::property(name), (i + 1) as f64)
        })
        .collect();

    let mut compiler = DriverCompiler::new(&mut rig, CompilerConfig::default());
    let outcome = compiler
        .compile_property_driver(&wide, &terms, &[], true)
        .expect("compile ok");
    assert_eq!(outcome, CompileOutcome::Built);
    drop(compiler);

    let root = rig.expression(&wide).expect("root driver");
    assert_eq!(root.text, "a+2*b+3*c+4*d+5*e+6*f+7*g+8*h+9*i+R");
    assert_eq!(root.bindings.len(), 10);

    let r1 = ChannelRef::property("Wide:R1");
    let r2 = ChannelRef::property("Wide:R2");
    assert_eq!(
        root.binding("R").map(|b| b.source.clone()),
        Some(VarSource::channel(r1.clone()))
    );
    assert_eq!(
        rig.expression(&r1).map(|e| e.text.as_str()),
        Some("10*a+11*b+12*c+13*d+14*e+15*f+16*g+17*h+18*i+R")
    );
    assert_eq!(rig.expression(&r2).map(|e| e.text.as_str()), Some("19*a+20*b"));

    let ledger = rig.ledger_of(&wide).expect("root ledger");
    assert_eq!(ledger.terms.len(), 9);
    assert_eq!(ledger.rest, Some(r1.clone()));
    assert_eq!(rig.ledger_of(&r2).map(|l| l.role), Some(LedgerRole::Rest));
    assert!(rig.channel_exists(&r2));
}

#[test]
fn shrinking_a_chain_clears_stale_levels() {
    let mut rig = face();
    let wide = ChannelRef::shape_key("Body", "Wide");
    let terms: Vec<Term> = (0..12)
        .map(|i| {
            let name = format!("P{i:02}");
            rig.add_property(&name, 0.0);
            Term::property(ChannelRef::property(name), 1.0)
        })
        .collect();
    {
        let mut compiler = DriverCompiler::new(&mut rig, CompilerConfig::default());
        compiler
            .compile_property_driver(&wide, &terms, &[], true)
            .expect("compile ok");
    }
    assert!(rig.expression(&ChannelRef::property("Wide:R1")).is_some());
    {
        let mut compiler = DriverCompiler::new(&mut rig, CompilerConfig::default());
        compiler
            .compile_property_driver(&wide, &terms[..3], &[], true)
            .expect("compile ok");
    }
    assert_eq!(rig.expression(&wide).map(|e| e.text.as_str()), Some("a+b+c"));
    assert!(rig.expression(&ChannelRef::property("Wide:R1")).is_none());
}

#[test]
fn secondary_pass_appends_a_rest_level() {
    let mut rig = face();
    compile(&mut rig, &[Term::property(ChannelRef::property("Happy"), 1.0)], true);
    assert_eq!(rig.expression(&smile()).map(|e| e.text.as_str()), Some("a"));

    let outcome = compile(&mut rig, &[Term::property(ChannelRef::property("Joy"), 2.0)], false);
    assert_eq!(outcome, CompileOutcome::Built);
    assert_eq!(rig.expression(&smile()).map(|e| e.text.as_str()), Some("a+R"));
    let rest = ChannelRef::property("Smile:R1");
    let level = rig.expression(&rest).expect("rest level");
    assert_eq!(level.text, "2*a");
    assert_eq!(parse_linear(&level.text), vec![Ok(("a".to_string(), 2.0))]);
    let root = rig.expression(&smile()).expect("root");
    assert_eq!(parse_linear(&root.text)[0], Ok(("a".to_string(), 1.0)));
    assert_eq!(
        level.binding("a").map(|b| b.source.clone()),
        Some(VarSource::channel(ChannelRef::property("Joy")))
    );

    let both = [
        Term::property(ChannelRef::property("Happy"), 1.0),
        Term::property(ChannelRef::property("Joy"), 2.0),
    ];
    assert_eq!(compile(&mut rig, &both, false), CompileOutcome::Unchanged);
}

#[test]
fn unresolvable_terms_remove_the_driver() {
    let mut rig = face();
    compile(&mut rig, &[Term::property(ChannelRef::property("Happy"), 1.0)], true);

    let mut compiler = DriverCompiler::new(&mut rig, CompilerConfig::default());
    let outcome = compiler
        .compile_property_driver(&smile(), &[Term::property(ChannelRef::property("Ghost"), 1.0)], &[], true)
        .expect("compile ok");
    assert_eq!(outcome, CompileOutcome::Removed);
    assert_eq!(compiler.diagnostics().count(DiagnosticCategory::UnresolvedReference), 1);
    assert_eq!(compiler.diagnostics().count(DiagnosticCategory::EmptyDriver), 1);
    drop(compiler);

    assert!(rig.expression(&smile()).is_none());
    assert!(rig.ledger_of(&smile()).is_none());
}

#[test]
fn multipliers_wrap_the_whole_driver() {
    let mut rig = face();
    rig.add_property("Adjust", 1.0);
    let mut compiler = DriverCompiler::new(&mut rig, CompilerConfig::default())
        .with_options(PassOptions::default());
    compiler.set_multipliers(smile(), vec![ChannelRef::property("Adjust")]);
    let summary = compiler
        .compile_formulas(&[
            Formula::property(smile(), "Happy", 0.5),
            Formula::property(smile(), "Joy", 1.0),
        ])
        .expect("compile ok");
    assert_eq!(summary.built, 1);
    drop(compiler);

    let expr = rig.expression(&smile()).expect("driver");
    assert_eq!(expr.text, "M*(0.5*a+b)");
    assert_eq!(
        expr.binding("M").map(|b| b.source.clone()),
        Some(VarSource::channel(ChannelRef::property("Adjust")))
    );
    let ledger = rig.ledger_of(&smile()).expect("ledger");
    assert_eq!(ledger.multipliers, vec![ChannelRef::property("Adjust")]);
}

#[test]
fn over_long_single_term_is_rejected_and_prior_driver_kept() {
    let mut rig = face();
    compile(&mut rig, &[Term::property(ChannelRef::property("Happy"), 1.0)], true);

    let config = CompilerConfig {
        max_expression_size: 4,
        ..CompilerConfig::default()
    };
    let mut compiler = DriverCompiler::new(&mut rig, config);
    let outcome = compiler
        .compile_property_driver(&smile(), &[Term::property(ChannelRef::property("Joy"), 0.125)], &[], true)
        .expect("non-fatal");
    assert_eq!(outcome, CompileOutcome::Rejected);
    assert_eq!(compiler.diagnostics().count(DiagnosticCategory::CapacityExceeded), 1);
    drop(compiler);

    assert_eq!(rig.expression(&smile()).map(|e| e.text.as_str()), Some("a"));
}
