//! Test registration and supervised execution.
//!
//! Registration is an explicit startup phase: test units are appended to a
//! [`TestRegistry`], the registry is frozen, and execution then walks the
//! catalog in registration order. [`run_test`] is the single recovery
//! boundary in the harness: a panic inside one test body becomes a failure
//! outcome for that test and never aborts the run.

use std::error::Error;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{Diagnostic, Logger, Outcome, Progress};

/// Immutable identity of a test unit, read once at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestInfo {
    pub name: String,
    pub file: String,
}

impl TestInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            file: file.into(),
        }
    }
}

/// The contract each test file implements.
pub trait TestUnit {
    fn info(&self) -> TestInfo;
    fn run(&mut self, log: &mut Logger);
}

type TestFactory = Box<dyn Fn() -> Box<dyn TestUnit> + Send>;

pub struct RegisteredTest {
    info: TestInfo,
    factory: TestFactory,
}

impl RegisteredTest {
    #[must_use]
    pub fn info(&self) -> &TestInfo {
        &self.info
    }
}

impl fmt::Debug for RegisteredTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTest")
            .field("info", &self.info)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Registration attempted after the registry was frozen for execution.
    Frozen { test_name: String },
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Frozen { test_name } => {
                write!(f, "registry is frozen; cannot register `{test_name}`")
            }
        }
    }
}

impl Error for RegistryError {}

/// Process-wide catalog of discoverable test units.
///
/// Duplicate names are a contract violation; callers keep names unique by
/// construction (module-qualified, as [`TestRegistry::register_unit`] users
/// do) rather than relying on runtime collision detection.
#[derive(Debug, Default)]
pub struct TestRegistry {
    entries: Vec<RegisteredTest>,
    frozen: bool,
}

impl TestRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, info: TestInfo, factory: TestFactory) -> Result<(), RegistryError> {
        if self.frozen {
            return Err(RegistryError::Frozen {
                test_name: info.name,
            });
        }
        self.entries.push(RegisteredTest { info, factory });
        Ok(())
    }

    /// Registers a default-constructible unit, querying its info exactly
    /// once.
    pub fn register_unit<T: TestUnit + Default + 'static>(&mut self) -> Result<(), RegistryError> {
        let info = T::default().info();
        self.register(info, Box::new(|| Box::new(T::default())))
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    #[must_use]
    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn entries(&self) -> &[RegisteredTest] {
        &self.entries
    }

    /// Freezes the registry and executes every entry in registration order.
    /// A fatal outcome stops the walk; anything else continues to the next
    /// test.
    pub fn run_all(&mut self) -> RunReport {
        self.freeze();

        let mut results = Vec::with_capacity(self.entries.len());
        let mut fatal = false;
        for entry in &self.entries {
            let result = run_test(entry);
            let aborted = result.outcome == Outcome::Fatal;
            results.push(result);
            if aborted {
                fatal = true;
                break;
            }
        }

        let summary = summarize(&results, fatal);
        let env_fingerprint = env_fingerprint();
        let run_id = derive_run_id(&env_fingerprint, &results);
        RunReport {
            run_id,
            env_fingerprint,
            summary,
            results,
        }
    }
}

/// Executes one registered test under panic supervision.
///
/// The outcome is always terminal: a body that reports nothing passes, and a
/// panic of any kind becomes a failure with a non-empty diagnostic instead of
/// propagating past this boundary. The logger lives outside the supervised
/// closure, so everything the body recorded before panicking survives — an
/// already-recorded fatal still aborts the run, and earlier failure
/// diagnostics stay in the result.
#[must_use]
pub fn run_test(entry: &RegisteredTest) -> TestResult {
    let info = entry.info.clone();
    let mut log = Logger::new(info.name.clone());
    let supervised = panic::catch_unwind(AssertUnwindSafe(|| {
        let mut unit = (entry.factory)();
        unit.run(&mut log);
    }));

    if let Err(payload) = supervised {
        log.record_failure(
            format!("test body panicked: {}", panic_payload_message(payload.as_ref())),
            None,
        );
    }
    TestResult::from_logger(info, log)
}

fn panic_payload_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestResult {
    pub name: String,
    pub file: String,
    pub outcome: Outcome,
    pub diagnostics: Vec<Diagnostic>,
    pub progress: Option<Progress>,
}

impl TestResult {
    fn from_logger(info: TestInfo, log: Logger) -> Self {
        let (outcome, diagnostics, progress) = log.into_parts();
        Self {
            name: info.name,
            file: info.file,
            outcome: outcome.finalized(),
            diagnostics,
            progress,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub timed_out: usize,
    pub fatal: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub env_fingerprint: String,
    pub summary: RunSummary,
    pub results: Vec<TestResult>,
}

impl RunReport {
    /// True only for a clean run: no failures, no timeouts, no fatal abort.
    /// Skips do not count against a pass but remain visible in the summary.
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.summary.failed == 0 && self.summary.timed_out == 0 && !self.summary.fatal
    }

    pub fn enforce_gate(&self) -> Result<(), GateError> {
        if self.all_passed() {
            Ok(())
        } else {
            Err(GateError {
                failed: self.summary.failed,
                timed_out: self.summary.timed_out,
                fatal: self.summary.fatal,
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateError {
    pub failed: usize,
    pub timed_out: usize,
    pub fatal: bool,
}

impl fmt::Display for GateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "conformance gate failed: failed={}, timed_out={}, fatal={}",
            self.failed, self.timed_out, self.fatal
        )
    }
}

impl Error for GateError {}

fn summarize(results: &[TestResult], fatal: bool) -> RunSummary {
    let mut summary = RunSummary {
        total: results.len(),
        passed: 0,
        failed: 0,
        skipped: 0,
        timed_out: 0,
        fatal,
    };
    for result in results {
        match result.outcome {
            Outcome::Pass => summary.passed += 1,
            Outcome::Fail => summary.failed += 1,
            Outcome::Skip => summary.skipped += 1,
            Outcome::Timeout => summary.timed_out += 1,
            Outcome::Fatal => summary.fatal = true,
            Outcome::Pending => {}
        }
    }
    summary
}

fn env_fingerprint() -> String {
    let toolchain =
        std::env::var("RUSTUP_TOOLCHAIN").unwrap_or_else(|_| "unknown".to_string());
    let envelope = format!(
        "toolchain={toolchain};os={};arch={}",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    sha256_hex(envelope.as_bytes())
}

fn derive_run_id(env_fingerprint: &str, results: &[TestResult]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(env_fingerprint.as_bytes());
    for result in results {
        hasher.update(result.name.as_bytes());
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(12);
    for byte in digest.iter().take(6) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("run-{hex}")
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{run_test, RegistryError, TestInfo, TestRegistry, TestUnit};
    use crate::{Logger, Outcome};

    #[derive(Default)]
    struct PassingUnit;

    impl TestUnit for PassingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::passing", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.note("all good");
        }
    }

    #[derive(Default)]
    struct SilentUnit;

    impl TestUnit for SilentUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::silent", file!())
        }

        fn run(&mut self, _log: &mut Logger) {}
    }

    #[derive(Default)]
    struct FailingUnit;

    impl TestUnit for FailingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::failing", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.fail("observed 3, expected 4", 42);
            log.note("continuing after failure");
        }
    }

    #[derive(Default)]
    struct SkippingUnit;

    impl TestUnit for SkippingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::skipping", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.skip("fp64 capability not present");
        }
    }

    #[derive(Default)]
    struct PanickingUnit;

    impl TestUnit for PanickingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::panicking", file!())
        }

        fn run(&mut self, _log: &mut Logger) {
            panic!("runtime raised an unexpected error");
        }
    }

    #[derive(Default)]
    struct FatalThenPanickingUnit;

    impl TestUnit for FatalThenPanickingUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::fatal_then_panicking", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.fail("first discrepancy", 19);
            log.fatal("no compute context available", 21);
            panic!("runtime tore down");
        }
    }

    #[derive(Default)]
    struct TimedOutUnit;

    impl TestUnit for TimedOutUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::timed_out", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.timed_out("kernel did not complete within the supervisor budget");
        }
    }

    #[derive(Default)]
    struct FatalUnit;

    impl TestUnit for FatalUnit {
        fn info(&self) -> TestInfo {
            TestInfo::new("registry::fatal", file!())
        }

        fn run(&mut self, log: &mut Logger) {
            log.fatal("no compute context available", 7);
        }
    }

    #[test]
    fn silent_unit_terminates_as_pass() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<SilentUnit>().unwrap();
        let report = registry.run_all();
        assert_eq!(report.results[0].outcome, Outcome::Pass);
        assert!(report.all_passed());
    }

    #[test]
    fn run_continues_past_one_failure() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<FailingUnit>().unwrap();
        registry.register_unit::<PassingUnit>().unwrap();
        let report = registry.run_all();

        assert_eq!(report.summary.total, 2);
        assert_eq!(report.summary.failed, 1);
        assert_eq!(report.summary.passed, 1);
        assert!(!report.all_passed());
        let gate = report.enforce_gate().unwrap_err();
        assert_eq!(gate.failed, 1);
    }

    #[test]
    fn panic_becomes_failure_and_run_continues() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<PanickingUnit>().unwrap();
        registry.register_unit::<PassingUnit>().unwrap();
        let report = registry.run_all();

        let panicked = &report.results[0];
        assert_eq!(panicked.outcome, Outcome::Fail);
        assert!(!panicked.diagnostics.is_empty());
        assert!(panicked.diagnostics[0]
            .message
            .contains("runtime raised an unexpected error"));

        assert_eq!(report.results[1].outcome, Outcome::Pass);
        assert_eq!(report.summary.total, 2);
    }

    #[test]
    fn skip_is_not_reported_as_pass() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<SkippingUnit>().unwrap();
        let report = registry.run_all();
        assert_eq!(report.results[0].outcome, Outcome::Skip);
        assert_eq!(report.summary.skipped, 1);
        assert_eq!(report.summary.passed, 0);
        // A skip-heavy run still passes the gate but stays visible.
        assert!(report.all_passed());
    }

    #[test]
    fn panic_preserves_outcome_and_diagnostics_recorded_before_it() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<FatalThenPanickingUnit>().unwrap();
        registry.register_unit::<PassingUnit>().unwrap();
        let report = registry.run_all();

        // The fatal recorded before the panic still aborts the run.
        assert_eq!(report.results.len(), 1);
        assert!(report.summary.fatal);

        let result = &report.results[0];
        assert_eq!(result.outcome, Outcome::Fatal);
        let messages: Vec<&str> = result
            .diagnostics
            .iter()
            .map(|d| d.message.as_str())
            .collect();
        assert!(messages.iter().any(|m| m.contains("first discrepancy")));
        assert!(messages
            .iter()
            .any(|m| m.contains("no compute context available")));
        assert!(messages.iter().any(|m| m.contains("runtime tore down")));
        assert_eq!(result.diagnostics[0].line, Some(19));
    }

    #[test]
    fn timed_out_unit_counts_against_the_gate() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<TimedOutUnit>().unwrap();
        registry.register_unit::<PassingUnit>().unwrap();
        let report = registry.run_all();

        assert_eq!(report.results[0].outcome, Outcome::Timeout);
        assert_eq!(report.summary.timed_out, 1);
        assert_eq!(report.summary.passed, 1);
        assert!(!report.all_passed());
        let gate = report.enforce_gate().unwrap_err();
        assert_eq!(gate.timed_out, 1);
        assert_eq!(gate.failed, 0);
    }

    #[test]
    fn fatal_aborts_the_remaining_run() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<PassingUnit>().unwrap();
        registry.register_unit::<FatalUnit>().unwrap();
        registry.register_unit::<PassingUnit>().unwrap();
        let report = registry.run_all();

        assert_eq!(report.results.len(), 2);
        assert!(report.summary.fatal);
        assert!(report.enforce_gate().is_err());
    }

    #[test]
    fn frozen_registry_rejects_registration() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<PassingUnit>().unwrap();
        registry.freeze();
        let err = registry.register_unit::<PassingUnit>().unwrap_err();
        assert_eq!(
            err,
            RegistryError::Frozen {
                test_name: "registry::passing".to_string()
            }
        );
    }

    #[test]
    fn run_test_reports_descriptor_fields() {
        let mut registry = TestRegistry::new();
        registry.register_unit::<FailingUnit>().unwrap();
        let result = run_test(&registry.entries()[0]);
        assert_eq!(result.name, "registry::failing");
        assert_eq!(result.file, file!());
        assert_eq!(result.diagnostics[0].line, Some(42));
    }

    #[test]
    fn run_id_is_deterministic_for_identical_catalogs() {
        let build = || {
            let mut registry = TestRegistry::new();
            registry.register_unit::<PassingUnit>().unwrap();
            registry.register_unit::<SkippingUnit>().unwrap();
            registry.run_all()
        };
        let first = build();
        let second = build();
        assert_eq!(first.run_id, second.run_id);
        assert!(first.run_id.starts_with("run-"));
    }
}
