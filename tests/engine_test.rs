//! Tests for the instrumentation engine's decisions and outputs.

mod common;

use std::sync::Arc;

use common::{expected_probe_total, sample_class, sample_class_named, SAMPLE};
use coverage_agent::classfile::ClassFile;
use coverage_agent::instrument::{find_probes, Decision, EngineError, Output, RewritePass};
use coverage_agent::policy::{Exclusion, ExclusionPolicy};
use coverage_agent::{InstrumentationEngine, TargetFilter};

fn engine(prefixes: &str) -> InstrumentationEngine {
    let filter = Arc::new(TargetFilter::new(prefixes).unwrap());
    InstrumentationEngine::new(filter, ExclusionPolicy::new())
}

#[test]
fn test_untargeted_unit_is_byte_identical() {
    let bytes = sample_class();
    let outcome = engine("org.other").transform(SAMPLE, &bytes).unwrap();

    assert_eq!(outcome.decision, Decision::NotTargeted);
    assert_eq!(outcome.output, Output::Unchanged);
    assert_eq!(outcome.bytes(&bytes), bytes.as_slice());
}

#[test]
fn test_targeted_unit_is_instrumented() {
    let bytes = sample_class();
    let outcome = engine("com.acme").transform(SAMPLE, &bytes).unwrap();

    assert_eq!(
        outcome.decision,
        Decision::Instrumented {
            methods: 5,
            probes: expected_probe_total(),
        }
    );
    assert!(outcome.is_rewritten());
    assert_eq!(outcome.name.dotted(), "com.acme.Sample");

    let rewritten = ClassFile::parse(outcome.bytes(&bytes)).unwrap();
    assert_eq!(rewritten.name().unwrap(), SAMPLE);
    assert_eq!(find_probes(&rewritten).unwrap().len(), expected_probe_total());
}

#[test]
fn test_dotted_and_internal_names_agree() {
    let bytes = sample_class();
    let e = engine("com.acme");
    let a = e.transform("com.acme.Sample", &bytes).unwrap();
    let b = e.transform("com/acme/Sample", &bytes).unwrap();
    assert_eq!(a.output, b.output);
}

#[test]
fn test_literal_prefix_matching() {
    let bytes = sample_class_named("com/acmeX/Sample");
    let outcome = engine("com.acme").transform("com/acmeX/Sample", &bytes).unwrap();
    assert!(matches!(outcome.decision, Decision::Instrumented { .. }));
}

#[test]
fn test_excluded_unit_is_an_error_when_strict() {
    let e = engine("java,com.acme");
    // Garbage bytes: exclusion is decided before anything is parsed.
    let err = e.transform("java/lang/Thing", b"not a class").unwrap_err();
    match err {
        EngineError::NotInstrumentable { name, reason } => {
            assert_eq!(name, "java.lang.Thing");
            assert_eq!(reason, Exclusion::CoreLibrary);
        }
        other => panic!("unexpected error {other:?}"),
    }

    let err = e.transform("coverage/agent/runtime/ProbeRecorder", b"").unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotInstrumentable {
            reason: Exclusion::AgentNamespace,
            ..
        }
    ));
}

#[test]
fn test_excluded_unit_on_load_path() {
    let e = engine("java");
    let outcome = e.transform_on_load("java/util/List", b"opaque").unwrap();
    assert_eq!(
        outcome.decision,
        Decision::Excluded {
            reason: Exclusion::CoreLibrary
        }
    );
    assert_eq!(outcome.output, Output::Unchanged);
    assert_eq!(e.stats().snapshot().excluded, 1);
}

#[test]
fn test_extra_exclusions() {
    let filter = Arc::new(TargetFilter::new("com.acme").unwrap());
    let e = InstrumentationEngine::new(filter, ExclusionPolicy::with_extra(["com/acme/"]));
    let err = e.transform(SAMPLE, &sample_class()).unwrap_err();
    assert!(matches!(
        err,
        EngineError::NotInstrumentable {
            reason: Exclusion::ThirdParty,
            ..
        }
    ));
}

#[test]
fn test_malformed_targeted_unit_fails() {
    let e = engine("com.acme");
    let err = e.transform(SAMPLE, b"\xCA\xFE\xBA\xBE\x00").unwrap_err();
    assert!(matches!(err, EngineError::Parse(_)));
    assert_eq!(e.stats().snapshot().failed, 1);
}

#[test]
fn test_malformed_untargeted_unit_still_parsed() {
    let err = engine("org.other").transform(SAMPLE, b"junk").unwrap_err();
    assert!(matches!(err, EngineError::Parse(_)));
}

#[test]
fn test_transform_is_deterministic() {
    let bytes = sample_class();
    let e = engine("com.acme");
    let first = e.transform(SAMPLE, &bytes).unwrap();
    let second = e.transform(SAMPLE, &bytes).unwrap();
    assert_eq!(first.output, second.output);
}

#[test]
fn test_no_passes_leaves_unit_unchanged() {
    let bytes = sample_class();
    let outcome = engine("com.acme").transform_with(SAMPLE, &bytes, &[]).unwrap();
    assert_eq!(outcome.decision, Decision::NotTargeted);
    assert_eq!(outcome.output, Output::Unchanged);

    let outcome = engine("com.acme")
        .transform_with(SAMPLE, &bytes, &[RewritePass::CoverageProbes])
        .unwrap();
    assert!(outcome.is_rewritten());
}

#[test]
fn test_stats_follow_decisions() {
    let e = engine("com.acme");
    let bytes = sample_class();
    e.transform(SAMPLE, &bytes).unwrap();
    e.transform("org/other/Sample", &sample_class_named("org/other/Sample")).unwrap();
    let _ = e.transform_on_load("java/lang/Object", b"");

    let stats = e.stats().snapshot();
    assert_eq!(stats.instrumented, 1);
    assert_eq!(stats.probes, expected_probe_total() as u64);
    assert_eq!(stats.not_targeted, 1);
    assert_eq!(stats.excluded, 1);
    assert_eq!(stats.failed, 0);
}

#[test]
fn test_decision_serializes_with_tag() {
    let json = serde_json::to_string(&Decision::Instrumented { methods: 2, probes: 5 }).unwrap();
    assert_eq!(json, r#"{"decision":"instrumented","methods":2,"probes":5}"#);
}
