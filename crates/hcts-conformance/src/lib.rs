#![forbid(unsafe_code)]

//! Self-validation suites for the HetCTS harness.
//!
//! Every property the harness promises to test authors is checked here
//! through the public surface of `hcts-coverage` and `hcts-harness`: pack
//! iteration order, vector-width expansion, outcome stickiness and
//! precedence, panic isolation, and evidence emission. CI runs
//! [`run_all_core_suites`] and requires every suite to pass.

use std::any::TypeId;
use std::fs;
use std::path::PathBuf;

use hcts_coverage::{
    for_all_types, for_all_types_and_vectors, named_type_pack, vector_type_name, NamedCasePack,
    TypeCheck, TypePack, VectorOf, VECTOR_WIDTHS,
};
use hcts_harness::registry::{TestInfo, TestRegistry, TestUnit};
use hcts_harness::report::EvidenceWriter;
use hcts_harness::{Logger, Outcome};

#[derive(Debug, Clone)]
pub struct SelfTestConfig {
    pub artifact_root: PathBuf,
    pub strict: bool,
}

impl SelfTestConfig {
    #[must_use]
    pub fn default_paths() -> Self {
        Self {
            artifact_root: std::env::temp_dir()
                .join("hcts-selftest")
                .join(std::process::id().to_string()),
            strict: true,
        }
    }
}

impl Default for SelfTestConfig {
    fn default() -> Self {
        Self::default_paths()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuiteReport {
    pub suite: &'static str,
    pub case_count: usize,
    pub pass_count: usize,
    pub failures: Vec<String>,
}

impl SuiteReport {
    fn new(suite: &'static str) -> Self {
        Self {
            suite,
            case_count: 0,
            pass_count: 0,
            failures: Vec::new(),
        }
    }

    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.case_count == self.pass_count && self.failures.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmokeReport {
    pub suite: &'static str,
    pub tests_executed: usize,
    pub all_passed: bool,
    pub strict: bool,
}

fn record_check(report: &mut SuiteReport, passed: bool, failure: String) {
    report.case_count += 1;
    if passed {
        report.pass_count += 1;
    } else {
        report.failures.push(failure);
    }
}

named_type_pack!(struct CoreScalarPack {
    "int" => i32,
    "float" => f32,
});

named_type_pack!(struct WideScalarPack {
    "char" => i8,
    "short" => i16,
    "int" => i32,
    "long" => i64,
    "float" => f32,
    "double" => f64,
});

type Trace = Vec<(TypeId, String)>;

#[derive(Default)]
struct Recorder;

impl TypeCheck<Trace> for Recorder {
    fn run<T: 'static>(&mut self, ctx: &mut Trace, type_name: &str) {
        ctx.push((TypeId::of::<T>(), type_name.to_string()));
    }
}

fn trace_names(trace: &Trace) -> Vec<String> {
    trace.iter().map(|(_, name)| name.clone()).collect()
}

/// Registers one trivially passing unit and runs it end to end.
#[must_use]
pub fn run_smoke(config: &SelfTestConfig) -> SmokeReport {
    #[derive(Default)]
    struct SmokeUnit;

    impl TestUnit for SmokeUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("smoke::noop", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.note("harness wiring reachable");
        }
    }

    let mut registry = TestRegistry::new();
    let registered = registry.register_unit::<SmokeUnit>().is_ok();
    let report = registry.run_all();

    SmokeReport {
        suite: "smoke",
        tests_executed: report.summary.total,
        all_passed: registered && report.all_passed(),
        strict: config.strict,
    }
}

/// Pack iteration: exactly-once visitation, declaration order, stable
/// name/type pairing, and idempotence across dispatches.
#[must_use]
pub fn run_dispatch_order_suite() -> SuiteReport {
    let mut report = SuiteReport::new("dispatch_order");

    let mut trace = Trace::new();
    for_all_types::<_, Recorder, _>(&CoreScalarPack, &mut trace);

    record_check(
        &mut report,
        trace.len() == 2,
        format!("expected 2 visits, observed {}", trace.len()),
    );
    record_check(
        &mut report,
        trace_names(&trace) == ["int", "float"],
        format!("visit order diverged: {:?}", trace_names(&trace)),
    );
    record_check(
        &mut report,
        trace.first().map(|(id, _)| *id) == Some(TypeId::of::<i32>()),
        "first entry is not i32".to_string(),
    );
    record_check(
        &mut report,
        trace.get(1).map(|(id, _)| *id) == Some(TypeId::of::<f32>()),
        "second entry is not f32".to_string(),
    );
    record_check(
        &mut report,
        CoreScalarPack.names() == ["int", "float"],
        "pack names accessor diverged from declaration".to_string(),
    );

    let mut replay = Trace::new();
    for_all_types::<_, Recorder, _>(&CoreScalarPack, &mut replay);
    record_check(
        &mut report,
        replay == trace,
        "repeated dispatch produced a different visit sequence".to_string(),
    );

    let mut wide = Trace::new();
    for_all_types::<_, Recorder, _>(&WideScalarPack, &mut wide);
    record_check(
        &mut report,
        wide.len() == WideScalarPack.len(),
        format!(
            "wide pack visited {} of {} entries",
            wide.len(),
            WideScalarPack.len()
        ),
    );

    // Runtime configuration packs follow the same ordering contract.
    match NamedCasePack::from_parallel(&["warp", "wave"], vec![32u32, 64u32]) {
        Ok(pack) => {
            let collected: Vec<(String, u32)> = pack
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect();
            record_check(
                &mut report,
                collected == [("warp".to_string(), 32), ("wave".to_string(), 64)],
                format!("case pack iteration diverged: {collected:?}"),
            );
        }
        Err(err) => record_check(
            &mut report,
            false,
            format!("case pack construction failed: {err}"),
        ),
    }

    report
}

/// Vector expansion: seven invocations per scalar, the exact standard width
/// family, width 1 never skipped, and predictable composed names.
#[must_use]
pub fn run_vector_coverage_suite() -> SuiteReport {
    let mut report = SuiteReport::new("vector_coverage");

    record_check(
        &mut report,
        VECTOR_WIDTHS == [1, 2, 3, 4, 8, 16],
        format!("unexpected width family: {VECTOR_WIDTHS:?}"),
    );

    let mut trace = Trace::new();
    for_all_types_and_vectors::<_, Recorder, _>(&CoreScalarPack, &mut trace);

    record_check(
        &mut report,
        trace.len() == CoreScalarPack.len() * (1 + VECTOR_WIDTHS.len()),
        format!(
            "expected {} invocations, observed {}",
            CoreScalarPack.len() * 7,
            trace.len()
        ),
    );

    let names = trace_names(&trace);
    for scalar in CoreScalarPack.names() {
        record_check(
            &mut report,
            names.iter().any(|name| name == scalar),
            format!("scalar entry `{scalar}` missing from vector dispatch"),
        );
        for width in VECTOR_WIDTHS {
            let composed = vector_type_name(scalar, width);
            record_check(
                &mut report,
                names.iter().any(|name| *name == composed),
                format!("composed entry `{composed}` missing"),
            );
        }
    }

    // The scalar leads its own width family, in declaration order.
    record_check(
        &mut report,
        names.first().map(String::as_str) == Some("int")
            && names.get(1).map(String::as_str) == Some("intx1")
            && names.get(7).map(String::as_str) == Some("float"),
        format!("per-scalar grouping diverged: {:?}", &names[..8.min(names.len())]),
    );
    record_check(
        &mut report,
        trace.get(1).map(|(id, _)| *id) == Some(TypeId::of::<VectorOf<i32, 1>>()),
        "width-1 tag is not VectorOf<i32, 1>".to_string(),
    );

    report
}

/// Logger lifecycle: sticky failure, fail-over-skip precedence, skip kept
/// distinct from pass, pending finalizing to pass, and advisory progress.
#[must_use]
pub fn run_outcome_lifecycle_suite() -> SuiteReport {
    let mut report = SuiteReport::new("outcome_lifecycle");

    let mut failed = Logger::new("lifecycle::fail");
    failed.fail("boom", 42);
    failed.note("unrelated");
    record_check(
        &mut report,
        failed.has_failed(),
        "has_failed() is false after fail()".to_string(),
    );
    record_check(
        &mut report,
        failed.outcome() == Outcome::Fail,
        format!("outcome after fail+note is {:?}", failed.outcome()),
    );
    record_check(
        &mut report,
        failed.diagnostics().first().map(|d| d.line) == Some(Some(42)),
        "failure diagnostic lost its source line".to_string(),
    );
    record_check(
        &mut report,
        failed.test_name() == "lifecycle::fail",
        "logger lost the name of the test it belongs to".to_string(),
    );

    let mut mixed = Logger::new("lifecycle::skip_then_fail");
    mixed.skip("no fp16 extension");
    mixed.fail("wrong bit pattern", 9);
    record_check(
        &mut report,
        mixed.outcome() == Outcome::Fail,
        "fail did not take precedence over an earlier skip".to_string(),
    );

    let mut skipped = Logger::new("lifecycle::skip");
    skipped.skip("no fp64 extension");
    record_check(
        &mut report,
        skipped.outcome() == Outcome::Skip && !skipped.has_failed(),
        "pure skip was not classified as skip".to_string(),
    );
    record_check(
        &mut report,
        skipped.outcome().finalized() == Outcome::Skip,
        "skip was silently finalized to pass".to_string(),
    );

    let silent = Logger::new("lifecycle::silent");
    record_check(
        &mut report,
        silent.outcome() == Outcome::Pending
            && silent.outcome().finalized() == Outcome::Pass,
        "silent body did not finalize to pass".to_string(),
    );

    let mut sweep = Logger::new("lifecycle::sweep");
    sweep.progress(250, 1000);
    record_check(
        &mut report,
        sweep.outcome() == Outcome::Pending,
        "progress reporting affected the outcome".to_string(),
    );
    record_check(
        &mut report,
        sweep.last_progress().map(|p| (p.done, p.total)) == Some((250, 1000)),
        "progress bookkeeping lost the last report".to_string(),
    );

    let mut doomed = Logger::new("lifecycle::fatal");
    doomed.fatal("no context", 1);
    doomed.skip("later skip");
    record_check(
        &mut report,
        doomed.outcome() == Outcome::Fatal,
        "fatal classification was downgraded".to_string(),
    );

    report
}

/// Panic isolation and run supervision: a panicking body becomes a failure
/// with a non-empty diagnostic, the run continues, fatal aborts it, and a
/// frozen registry rejects late registration.
#[must_use]
pub fn run_panic_isolation_suite() -> SuiteReport {
    #[derive(Default)]
    struct ThrowingUnit;

    impl TestUnit for ThrowingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("isolation::throwing", file!())
        }

        fn run(&mut self, _log: &mut Logger) {
            panic!("x");
        }
    }

    #[derive(Default)]
    struct SurvivorUnit;

    impl TestUnit for SurvivorUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("isolation::survivor", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.note("reached despite earlier panic");
        }
    }

    #[derive(Default)]
    struct AbortingUnit;

    impl TestUnit for AbortingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("isolation::aborting", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.fatal("environment unusable", 3);
        }
    }

    #[derive(Default)]
    struct AbortingThenThrowingUnit;

    impl TestUnit for AbortingThenThrowingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("isolation::aborting_then_throwing", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.fatal("device enumeration returned nothing", 5);
            panic!("teardown raced the abort");
        }
    }

    let mut report = SuiteReport::new("panic_isolation");

    let mut registry = TestRegistry::new();
    let registrations = registry
        .register_unit::<ThrowingUnit>()
        .and_then(|()| registry.register_unit::<SurvivorUnit>());
    record_check(
        &mut report,
        registrations.is_ok(),
        "registration phase rejected a valid unit".to_string(),
    );
    let run = registry.run_all();

    record_check(
        &mut report,
        run.results[0].outcome == Outcome::Fail,
        format!("panicking unit classified as {:?}", run.results[0].outcome),
    );
    record_check(
        &mut report,
        run.results[0]
            .diagnostics
            .first()
            .is_some_and(|d| !d.message.is_empty() && d.message.contains('x')),
        "panic diagnostic is empty or lost the payload".to_string(),
    );
    record_check(
        &mut report,
        run.results.len() == 2 && run.results[1].outcome == Outcome::Pass,
        "run did not continue past the panicking unit".to_string(),
    );

    let late = registry.register_unit::<SurvivorUnit>();
    record_check(
        &mut report,
        late.is_err(),
        "frozen registry accepted a late registration".to_string(),
    );

    let mut aborting = TestRegistry::new();
    let _ = aborting.register_unit::<AbortingUnit>();
    let _ = aborting.register_unit::<SurvivorUnit>();
    let aborted = aborting.run_all();
    record_check(
        &mut report,
        aborted.results.len() == 1 && aborted.summary.fatal,
        "fatal outcome did not abort the remaining run".to_string(),
    );
    record_check(
        &mut report,
        aborted.enforce_gate().is_err(),
        "gate accepted a fatal run".to_string(),
    );

    let mut racing = TestRegistry::new();
    let _ = racing.register_unit::<AbortingThenThrowingUnit>();
    let _ = racing.register_unit::<SurvivorUnit>();
    let raced = racing.run_all();
    record_check(
        &mut report,
        raced.results.len() == 1
            && raced.summary.fatal
            && raced.results[0].outcome == Outcome::Fatal,
        "a panic after fatal downgraded the abort".to_string(),
    );
    record_check(
        &mut report,
        raced.results.first().is_some_and(|result| {
            result
                .diagnostics
                .iter()
                .any(|d| d.message.contains("device enumeration returned nothing"))
        }),
        "diagnostics recorded before the panic were dropped".to_string(),
    );

    report
}

/// Evidence emission: artifacts exist, the manifest round-trips through
/// JSON, and summary counts agree with the recorded results.
pub fn run_evidence_suite(config: &SelfTestConfig) -> Result<SuiteReport, String> {
    #[derive(Default)]
    struct GoodUnit;

    impl TestUnit for GoodUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("evidence::good", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.note("verified");
        }
    }

    #[derive(Default)]
    struct BadUnit;

    impl TestUnit for BadUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("evidence::bad", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.fail("observed 0x7fc00000, expected 0x00000000", 23);
        }
    }

    let mut report = SuiteReport::new("evidence");

    let mut registry = TestRegistry::new();
    registry
        .register_unit::<GoodUnit>()
        .map_err(|err| err.to_string())?;
    registry
        .register_unit::<BadUnit>()
        .map_err(|err| err.to_string())?;
    let run = registry.run_all();

    let writer = EvidenceWriter::new(config.artifact_root.join("evidence_suite"))
        .map_err(|err| format!("failed to create evidence root: {err}"))?;
    let artifacts = writer
        .collect(&run)
        .map_err(|err| format!("failed to collect evidence: {err}"))?;

    record_check(
        &mut report,
        artifacts.run_manifest_path.exists(),
        "run manifest was not written".to_string(),
    );
    record_check(
        &mut report,
        artifacts.evidence_path.exists(),
        "evidence stream was not written".to_string(),
    );

    let manifest_raw = fs::read_to_string(&artifacts.run_manifest_path)
        .map_err(|err| format!("failed reading manifest: {err}"))?;
    let manifest: serde_json::Value =
        serde_json::from_str(&manifest_raw).map_err(|err| format!("invalid manifest: {err}"))?;
    record_check(
        &mut report,
        manifest["run_id"] == run.run_id.as_str(),
        "manifest run_id diverged from the report".to_string(),
    );
    record_check(
        &mut report,
        manifest["total"] == 2 && manifest["passed"] == 1 && manifest["failed"] == 1,
        format!("manifest counts diverged: {manifest}"),
    );

    let evidence = fs::read_to_string(&artifacts.evidence_path)
        .map_err(|err| format!("failed reading evidence: {err}"))?;
    let lines: Vec<&str> = evidence.lines().collect();
    record_check(
        &mut report,
        lines.len() == 1 + run.results.len(),
        format!(
            "expected {} evidence lines, found {}",
            1 + run.results.len(),
            lines.len()
        ),
    );
    let failing_line: serde_json::Value = serde_json::from_str(lines[2])
        .map_err(|err| format!("invalid evidence line: {err}"))?;
    record_check(
        &mut report,
        failing_line["outcome"] == "fail" && failing_line["diagnostics"][0]["line"] == 23,
        "failing result lost its diagnostic detail in evidence".to_string(),
    );

    fs::remove_dir_all(writer.root()).ok();
    Ok(report)
}

pub fn run_all_core_suites(config: &SelfTestConfig) -> Result<Vec<SuiteReport>, String> {
    Ok(vec![
        run_dispatch_order_suite(),
        run_vector_coverage_suite(),
        run_outcome_lifecycle_suite(),
        run_panic_isolation_suite(),
        run_evidence_suite(config)?,
    ])
}

#[cfg(test)]
mod tests {
    use super::{
        run_dispatch_order_suite, run_outcome_lifecycle_suite, run_panic_isolation_suite,
        run_smoke, run_vector_coverage_suite, SelfTestConfig,
    };

    #[test]
    fn smoke_runs_one_passing_test() {
        let report = run_smoke(&SelfTestConfig::default_paths());
        assert_eq!(report.suite, "smoke");
        assert_eq!(report.tests_executed, 1);
        assert!(report.all_passed);
    }

    #[test]
    fn dispatch_order_suite_is_clean() {
        let report = run_dispatch_order_suite();
        assert!(report.all_passed(), "failures: {:?}", report.failures);
    }

    #[test]
    fn vector_coverage_suite_is_clean() {
        let report = run_vector_coverage_suite();
        assert!(report.all_passed(), "failures: {:?}", report.failures);
    }

    #[test]
    fn outcome_lifecycle_suite_is_clean() {
        let report = run_outcome_lifecycle_suite();
        assert!(report.all_passed(), "failures: {:?}", report.failures);
    }

    #[test]
    fn panic_isolation_suite_is_clean() {
        let report = run_panic_isolation_suite();
        assert!(report.all_passed(), "failures: {:?}", report.failures);
    }
}
