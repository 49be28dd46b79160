#![forbid(unsafe_code)]

//! Outcome bookkeeping for HetCTS test units.
//!
//! One [`Logger`] exists per executing test. It accumulates diagnostics and a
//! single terminal [`Outcome`]; classification only ever escalates, so the
//! first recorded failure is sticky no matter what the test body reports
//! afterwards.

pub mod registry;
pub mod report;

use serde::Serialize;

/// Terminal classification of a test unit, declared in ascending severity.
///
/// `escalate` keeps the more severe side, which encodes the precedence rules
/// directly: fail beats skip, fatal beats everything, and nothing downgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Pending,
    Pass,
    Skip,
    Timeout,
    Fail,
    Fatal,
}

impl Outcome {
    #[must_use]
    pub fn escalate(self, next: Outcome) -> Outcome {
        self.max(next)
    }

    /// Final classification once the test body has returned. A body that
    /// reported nothing terminates as a pass; pending never escapes.
    #[must_use]
    pub fn finalized(self) -> Outcome {
        if self == Self::Pending {
            Self::Pass
        } else {
            self
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self != Self::Pending
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Failure,
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    /// Source line of the failed assertion, when the caller supplied one.
    pub line: Option<u32>,
}

/// Advisory progress for long brute-force sweeps. No bearing on outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: u64,
    pub total: u64,
}

/// Per-test outcome record and diagnostic accumulator.
#[derive(Debug)]
pub struct Logger {
    test_name: String,
    outcome: Outcome,
    diagnostics: Vec<Diagnostic>,
    progress: Option<Progress>,
}

impl Logger {
    #[must_use]
    pub fn new(test_name: impl Into<String>) -> Self {
        Self {
            test_name: test_name.into(),
            outcome: Outcome::Pending,
            diagnostics: Vec::new(),
            progress: None,
        }
    }

    /// Records a failed assertion. Does not unwind; the test body decides
    /// whether to continue with further independent checks.
    pub fn fail(&mut self, message: impl Into<String>, line: u32) {
        self.record_failure(message.into(), Some(line));
    }

    pub(crate) fn record_failure(&mut self, message: String, line: Option<u32>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Failure,
            message,
            line,
        });
        self.outcome = self.outcome.escalate(Outcome::Fail);
    }

    /// Records a condition that makes continuing the whole run meaningless,
    /// e.g. no compute context can be acquired at all. The runner aborts
    /// after this test.
    pub fn fatal(&mut self, message: impl Into<String>, line: u32) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Fatal,
            message: message.into(),
            line: Some(line),
        });
        self.outcome = self.outcome.escalate(Outcome::Fatal);
    }

    /// Informational diagnostic with no effect on classification.
    pub fn note(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Info,
            message: message.into(),
            line: None,
        });
    }

    /// Reports a required capability as unavailable in the environment under
    /// test. Distinct from both pass and fail in all aggregate reporting; a
    /// later `fail` still wins the terminal classification.
    pub fn skip(&mut self, reason: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Info,
            message: reason.into(),
            line: None,
        });
        self.outcome = self.outcome.escalate(Outcome::Skip);
    }

    /// Applies the timeout classification on behalf of an external
    /// supervisor. The in-process harness never detects timeouts itself.
    pub fn timed_out(&mut self, message: impl Into<String>) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Failure,
            message: message.into(),
            line: None,
        });
        self.outcome = self.outcome.escalate(Outcome::Timeout);
    }

    pub fn progress(&mut self, done: u64, total: u64) {
        self.progress = Some(Progress { done, total });
    }

    #[must_use]
    pub fn has_failed(&self) -> bool {
        matches!(self.outcome, Outcome::Fail | Outcome::Fatal)
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    #[must_use]
    pub fn test_name(&self) -> &str {
        &self.test_name
    }

    #[must_use]
    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diagnostics
    }

    #[must_use]
    pub fn last_progress(&self) -> Option<Progress> {
        self.progress
    }

    #[must_use]
    pub(crate) fn into_parts(self) -> (Outcome, Vec<Diagnostic>, Option<Progress>) {
        (self.outcome, self.diagnostics, self.progress)
    }
}
