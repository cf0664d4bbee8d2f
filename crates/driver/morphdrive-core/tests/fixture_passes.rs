use anyhow::Result;
use morphdrive_api_core::{ChannelRef, TransformChannel};
use morphdrive_core::{compile_rig, CompilerConfig, Formula, PassReport};
use morphdrive_rig_memory::{MemoryRig, RigSpec};
use morphdrive_test_fixtures::{formula_sets, rigs};

fn load_set(name: &str) -> Result<(MemoryRig, Vec<Formula>)> {
    let spec: RigSpec = rigs::load(&formula_sets::rig(name)?)?;
    let rig = MemoryRig::from_spec(spec)?;
    let formulas: Vec<Formula> = formula_sets::load(name)?;
    Ok((rig, formulas))
}

fn run(rig: &mut MemoryRig, formulas: &[Formula]) -> PassReport {
    compile_rig(rig, CompilerConfig::default(), formulas).expect("pass ok")
}

fn text(rig: &MemoryRig, channel: &ChannelRef) -> Option<String> {
    rig.expression(channel).map(|e| e.text.clone())
}

#[test]
fn every_formula_set_compiles_and_recompiles_cleanly() -> Result<()> {
    let mut names = formula_sets::keys();
    names.sort();
    for name in names {
        let (mut rig, formulas) = load_set(&name)?;
        let first = run(&mut rig, &formulas);
        assert!(!first.has_errors(), "{name}: {first}");
        rig.take_conflicts();

        let second = run(&mut rig, &formulas);
        assert_eq!(second.summary.built, 0, "{name}: {second}");
        assert_eq!(second.sum_drivers, 0, "{name}");
        assert_eq!(second.scale_corrections, 0, "{name}");
        assert!(rig.conflicts().is_empty(), "{name} rewrote drivers on recompile");
    }
    Ok(())
}

#[test]
fn face_basic_drivers() -> Result<()> {
    let (mut rig, formulas) = load_set("face-basic")?;
    let report = run(&mut rig, &formulas);
    assert_eq!(report.summary.built, 4);
    assert_eq!(report.summary.queued, 2);
    assert_eq!(report.sum_drivers, 2);

    let key = |k: &str| ChannelRef::shape_key("Body", k);
    assert_eq!(text(&rig, &key("MouthSmile")).as_deref(), Some("a-0.5*b"));
    assert_eq!(text(&rig, &key("MouthFrown")).as_deref(), Some("0.8*a"));
    assert_eq!(text(&rig, &key("BrowsUp")).as_deref(), Some("a"));
    assert_eq!(text(&rig, &key("MouthOpen")).as_deref(), Some("2*a"));

    let jaw = ChannelRef::bone("jaw", TransformChannel::RotationEuler, 0);
    assert_eq!(
        rig.additive(&jaw).map(|m| m.to_vec()),
        Some(vec![ChannelRef::property("jaw:Rot0:01")])
    );
    assert_eq!(
        text(&rig, &ChannelRef::property("jaw:Rot0:01")).as_deref(),
        Some("0.35*a")
    );
    assert_eq!(
        text(&rig, &ChannelRef::property("lEye:Loc1:01")).as_deref(),
        Some("M*(0.01*a)")
    );
    Ok(())
}

#[test]
fn face_wide_chains_overflow() -> Result<()> {
    let (mut rig, formulas) = load_set("face-wide")?;
    run(&mut rig, &formulas);
    let wide = ChannelRef::shape_key("Body", "Wide");
    let root = rig.expression(&wide).expect("root");
    assert_eq!(root.bindings.len(), 10);
    assert!(root.text.ends_with("+R"));
    assert!(rig.expression(&ChannelRef::property("Wide:R1")).is_some());
    let last = rig.expression(&ChannelRef::property("Wide:R2")).expect("last level");
    assert_eq!(last.text, "1.9*a+2*b");
    Ok(())
}

#[test]
fn arm_correctives() -> Result<()> {
    let (mut rig, formulas) = load_set("arm-correctives")?;
    run(&mut rig, &formulas);
    let key = |k: &str| ChannelRef::shape_key("Body", k);
    assert_eq!(text(&rig, &key("ElbowBend")).as_deref(), Some("0.5*a"));
    assert_eq!(
        text(&rig, &key("ShoulderUp")).as_deref(),
        Some("1.5*a+min(1,max(0,0.5*b))")
    );
    let fix = ChannelRef::bone("elbowFix", TransformChannel::RotationEuler, 0);
    assert_eq!(text(&rig, &fix).as_deref(), Some("0.5*a"));
    Ok(())
}

#[test]
fn scale_chain_fixture() -> Result<()> {
    let (mut rig, formulas) = load_set("scale-chain")?;
    let report = run(&mut rig, &formulas);
    assert_eq!(report.scale_corrections, 6);
    let root_x = ChannelRef::property("root:Sca0:01");
    assert_eq!(text(&rig, &root_x).as_deref(), Some("0.2*a-0.1*b"));
    Ok(())
}
