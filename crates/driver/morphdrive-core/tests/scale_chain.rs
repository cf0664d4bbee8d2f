use morphdrive_api_core::{
    ChannelRef, LedgerRole, TransformChannel, TransformKind, TransformReading, VarSource,
};
use morphdrive_core::{compile_rig, CompilerConfig, DriverCompiler, Formula};
use morphdrive_rig_memory::MemoryRig;

fn scale(bone: &str, c: u8) -> ChannelRef {
    ChannelRef::bone(bone, TransformChannel::Scale, c)
}

fn chain() -> MemoryRig {
    let mut rig = MemoryRig::new();
    rig.add_bone("root", None)
        .add_bone("mid", Some("root"))
        .add_bone("tip", Some("mid"));
    rig
}

fn bulk_formulas() -> Vec<Formula> {
    (0..3).map(|c| Formula::property(scale("root", c), "Bulk", 0.2)).collect()
}

fn pose_scale(bone: &str, c: u8) -> VarSource {
    VarSource::transform(TransformReading::pose(bone, TransformKind::Scale, c))
}

#[test]
fn pass_through_correction_runs_down_the_chain() {
    let mut rig = chain();
    let report = compile_rig(&mut rig, CompilerConfig::default(), &bulk_formulas()).expect("pass ok");
    assert_eq!(report.sum_drivers, 3);
    assert_eq!(report.scale_corrections, 6);

    for c in 0..3u8 {
        assert_eq!(
            rig.additive(&scale("root", c)).map(|m| m.to_vec()),
            Some(vec![
                ChannelRef::property(format!("root:Sca{c}:01")),
                ChannelRef::property("Unity"),
            ])
        );
        for (bone, parent) in [("mid", "root"), ("tip", "mid")] {
            let expr = rig.expression(&scale(bone, c)).expect("correction");
            assert_eq!(expr.text, "1/a");
            assert_eq!(
                expr.binding("a").map(|b| b.source.clone()),
                Some(pose_scale(parent, c))
            );
            assert_eq!(
                rig.ledger_of(&scale(bone, c)).map(|l| l.role),
                Some(LedgerRole::ScaleCorrection)
            );
        }
    }
}

#[test]
fn second_run_is_a_no_op() {
    let mut rig = chain();
    compile_rig(&mut rig, CompilerConfig::default(), &bulk_formulas()).expect("first pass");
    let drivers = rig.driver_count();
    rig.take_conflicts();

    let report = compile_rig(&mut rig, CompilerConfig::default(), &bulk_formulas()).expect("second pass");
    assert_eq!(report.scale_corrections, 0);
    assert_eq!(report.sum_drivers, 0);
    assert_eq!(report.summary.built, 0);
    assert_eq!(rig.driver_count(), drivers);
    assert!(rig.conflicts().is_empty());
}

#[test]
fn bones_not_inheriting_scale_are_left_alone() {
    let mut rig = chain();
    rig.set_inherit_scale("mid", false);
    let report = compile_rig(&mut rig, CompilerConfig::default(), &bulk_formulas()).expect("pass ok");
    assert_eq!(report.scale_corrections, 0);
    assert!(rig.expression(&scale("mid", 0)).is_none());
    assert!(rig.expression(&scale("tip", 0)).is_none());
}

#[test]
fn own_contribution_is_folded_into_the_correction() {
    let mut rig = chain();
    compile_rig(&mut rig, CompilerConfig::default(), &bulk_formulas()).expect("first pass");

    let mut compiler = DriverCompiler::new(&mut rig, CompilerConfig::default());
    compiler.queue_sum_contribution(scale("mid", 0), ChannelRef::property("Slim"), -0.5);
    assert_eq!(compiler.finalize_sum_drivers().expect("sum ok"), 1);
    drop(compiler);

    let contribution = ChannelRef::property("mid:Sca0");
    let expr = rig.expression(&scale("mid", 0)).expect("correction");
    assert_eq!(expr.text, "(1+a)/b");
    assert_eq!(
        expr.binding("a").map(|b| b.source.clone()),
        Some(VarSource::channel(contribution.clone()))
    );
    assert_eq!(expr.binding("b").map(|b| b.source.clone()), Some(pose_scale("root", 0)));
    assert_eq!(
        rig.additive(&contribution).map(|m| m.to_vec()),
        Some(vec![ChannelRef::property("mid:Sca0:01")])
    );
    assert_eq!(
        rig.expression(&ChannelRef::property("mid:Sca0:01")).map(|e| e.text.as_str()),
        Some("-0.5*a")
    );
}

#[test]
fn existing_scale_content_is_relocated_before_correction() {
    let mut rig = chain();
    let mut formulas = bulk_formulas();
    formulas.push(Formula::property(scale("mid", 1), "Slim", 0.3));
    compile_rig(&mut rig, CompilerConfig::default(), &formulas).expect("pass ok");

    let contribution = ChannelRef::property("mid:Sca1");
    assert_eq!(
        rig.expression(&scale("mid", 1)).map(|e| e.text.as_str()),
        Some("(1+a)/b")
    );
    assert_eq!(
        rig.additive(&contribution).map(|m| m.to_vec()),
        Some(vec![ChannelRef::property("mid:Sca1:01")])
    );
    // The tip still compensates for mid, which is now driven.
    assert_eq!(rig.expression(&scale("tip", 1)).map(|e| e.text.as_str()), Some("1/a"));
}
