//! Tests for probe placement and the recomputed method metadata.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;

use common::{method_body, sample_class, EXPECTED_PROBES, SAMPLE};
use coverage_agent::classfile::frames::{FrameKind, VerificationType};
use coverage_agent::classfile::{opcodes, ClassFile, Insn, Label, ACC_BRIDGE};
use coverage_agent::instrument::probes::{RECORDER_CLASS, RECORDER_DESCRIPTOR, RECORDER_METHOD};
use coverage_agent::instrument::{find_probes, InjectionReport, ProbeId, ProbeInjector};
use coverage_agent::policy::ExclusionPolicy;
use coverage_agent::{InstrumentationEngine, TargetFilter};

fn instrumented() -> Vec<u8> {
    let mut class = ClassFile::parse(&sample_class()).unwrap();
    ProbeInjector::new("com.acme.Sample").inject(&mut class).unwrap();
    class.to_bytes().unwrap()
}

fn is_probe(body: &coverage_agent::classfile::CodeBody, at: usize) -> bool {
    body.insns[at].ldc_index().is_some() && body.insns[at + 1].invokestatic_index().is_some()
}

#[test]
fn test_report_counts() {
    let mut class = ClassFile::parse(&sample_class()).unwrap();
    let report = ProbeInjector::new("com.acme.Sample").inject(&mut class).unwrap();
    assert_eq!(report, InjectionReport { methods: 5, probes: 12 });
}

#[test]
fn test_probe_ids_per_method() {
    let class = ClassFile::parse(&instrumented()).unwrap();
    let probes = find_probes(&class).unwrap();

    let mut per_method: BTreeMap<String, Vec<u32>> = BTreeMap::new();
    for p in &probes {
        assert_eq!(p.unit, "com.acme.Sample");
        per_method.entry(p.method.clone()).or_default().push(p.site);
    }
    for (method, n) in EXPECTED_PROBES {
        let sites = &per_method[*method];
        assert_eq!(sites, &(0..*n as u32).collect::<Vec<_>>(), "{method}");
    }
    assert!(!per_method.contains_key("nativeCall()V"));

    assert_eq!(
        probes[1],
        ProbeId {
            unit: "com.acme.Sample".into(),
            method: "max(II)I".into(),
            site: 0,
        }
    );
}

#[test]
fn test_recorder_reference() {
    let class = ClassFile::parse(&instrumented()).unwrap();
    let body = method_body(&instrumented(), "<init>");
    let index = body.insns[1].invokestatic_index().unwrap();
    let target = class.constant_pool.member_ref(index).unwrap();
    assert_eq!(target.class, RECORDER_CLASS);
    assert_eq!(target.name, RECORDER_METHOD);
    assert_eq!(target.descriptor, RECORDER_DESCRIPTOR);
}

#[test]
fn test_conditional_branch_lands_on_probe() {
    let body = method_body(&instrumented(), "max");
    // probe, iload_0, iload_1, if_icmple, iload_0, ireturn, probe, iload_1, ireturn
    assert_eq!(body.len(), 11);
    assert!(is_probe(&body, 0));
    assert!(is_probe(&body, 7));
    assert_eq!(
        body.insns[4],
        Insn::Branch {
            opcode: opcodes::IF_ICMPLE,
            target: Label(7)
        }
    );

    let frames = body.frames().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].label, Label(7));
    assert_eq!(frames[0].kind, FrameKind::Same);

    let starts: Vec<usize> = body.line_numbers().map(|l| l.start.0).collect();
    assert_eq!(starts, vec![2, 5, 7]);
    assert!(body.max_stack >= 2);
}

#[test]
fn test_loop_back_edge_skips_entry_probe() {
    let body = method_body(&instrumented(), "sum");
    assert_eq!(body.len(), 21);
    assert!(is_probe(&body, 0));
    assert!(is_probe(&body, 6));
    assert!(is_probe(&body, 17));

    assert_eq!(
        body.insns[10],
        Insn::Branch {
            opcode: opcodes::IF_ICMPGE,
            target: Label(17)
        }
    );
    assert_eq!(
        body.insns[16],
        Insn::Branch {
            opcode: opcodes::GOTO,
            target: Label(6)
        }
    );

    let frames = body.frames().unwrap();
    assert_eq!(frames[0].label, Label(6));
    assert_eq!(
        frames[0].kind,
        FrameKind::Append(vec![VerificationType::Integer, VerificationType::Integer])
    );
    assert_eq!(frames[1].label, Label(17));
    assert_eq!(frames[1].kind, FrameKind::Chop(1));
    assert_eq!(body.max_locals, 3);
}

#[test]
fn test_exception_handler_gets_probe() {
    let bytes = instrumented();
    let body = method_body(&bytes, "safeDiv");
    assert_eq!(body.handlers.len(), 1);
    let h = body.handlers[0];
    assert_eq!(h.start, Label(2));
    assert_eq!(h.end, Label(6));
    assert_eq!(h.handler, Label(6));
    assert!(is_probe(&body, 6));

    let frames = body.frames().unwrap();
    assert_eq!(frames[0].label, Label(6));
    assert!(matches!(
        frames[0].kind,
        FrameKind::SameLocals1(VerificationType::Object(_))
    ));
    // exception on the stack plus the probe's string
    assert_eq!(body.max_stack, 2);
}

#[test]
fn test_tableswitch_targets_and_padding() {
    let body = method_body(&instrumented(), "classify");
    assert_eq!(body.len(), 16);
    assert_eq!(
        body.insns[3],
        Insn::TableSwitch {
            default: Label(12),
            low: 0,
            high: 1,
            targets: vec![Label(4), Label(8)],
        }
    );
    let labels: Vec<usize> = body.frames().unwrap().iter().map(|f| f.label.0).collect();
    assert_eq!(labels, vec![4, 8, 12]);
    assert_eq!(body.max_stack, 1);
}

#[test]
fn test_native_and_bridge_methods_skipped() {
    let mut class = ClassFile::parse(&sample_class()).unwrap();
    let pool = class.constant_pool.clone();
    for m in class.methods.iter_mut() {
        if m.name(&pool).unwrap() == "sum" {
            m.access_flags |= ACC_BRIDGE;
        }
    }
    let report = ProbeInjector::new("com.acme.Sample").inject(&mut class).unwrap();
    assert_eq!(report, InjectionReport { methods: 4, probes: 9 });
}

#[test]
fn test_rewritten_class_reparses_everywhere() {
    let bytes = instrumented();
    let class = ClassFile::parse(&bytes).unwrap();
    assert_eq!(class.to_bytes().unwrap(), bytes);
    for name in ["<init>", "max", "sum", "safeDiv", "classify"] {
        let body = method_body(&bytes, name);
        assert!(!body.is_empty());
        assert_eq!(body.dropped_attributes(), 0);
    }
}

#[test]
fn test_engine_uses_dotted_unit_name() {
    let filter = Arc::new(TargetFilter::new("com.acme").unwrap());
    let engine = InstrumentationEngine::new(filter, ExclusionPolicy::new());
    let bytes = sample_class();
    let outcome = engine.transform(SAMPLE, &bytes).unwrap();
    let class = ClassFile::parse(outcome.bytes(&bytes)).unwrap();
    assert!(find_probes(&class)
        .unwrap()
        .iter()
        .all(|p| p.to_string().starts_with("com.acme.Sample#")));
}
