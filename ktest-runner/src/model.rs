// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Descriptors of test work and the results the schedulers produce from it.
//!
//! [`Test`] and [`Suite`] are immutable once built; [`TestResult`] and
//! [`SuiteResult`] are built by the schedulers as work completes and are
//! never mutated afterwards.

use camino::Utf8PathBuf;
use std::time::Duration;

/// A single shell-style command to run against the SUT.
///
/// Mirrors the `Test` dataclass of the LTP-style runner this crate is
/// modeled on: a name, a command, its arguments, whether it may run
/// concurrently with other tests, and an optional working directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Test {
    name: String,
    cmd: String,
    args: Vec<String>,
    parallelizable: bool,
    cwd: Option<Utf8PathBuf>,
}

impl Test {
    /// Creates a new parallelizable test with no arguments.
    pub fn new(name: impl Into<String>, cmd: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cmd: cmd.into(),
            args: Vec::new(),
            parallelizable: true,
            cwd: None,
        }
    }

    /// Sets the argument list.
    #[must_use]
    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Marks this test as non-parallelizable: it must run alone.
    #[must_use]
    pub fn exclusive(mut self) -> Self {
        self.parallelizable = false;
        self
    }

    /// Sets the working directory the command runs from on the SUT.
    #[must_use]
    pub fn with_cwd(mut self, cwd: impl Into<Utf8PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    /// The test's unique name within its batch.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The executable name.
    pub fn cmd(&self) -> &str {
        &self.cmd
    }

    /// The ordered argument list.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Whether this test may run concurrently with other parallelizable tests.
    pub fn parallelizable(&self) -> bool {
        self.parallelizable
    }

    /// The working directory to run the command from, if any.
    pub fn cwd(&self) -> Option<&Utf8PathBuf> {
        self.cwd.as_ref()
    }

    /// The composed command line passed to `run_command`: `cmd` followed by
    /// the space-joined `args`. Arguments are not quoted; callers who need
    /// shell-meaningful tokens (`&&`, `|`, …) rely on that intentionally.
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.cmd.clone()
        } else {
            format!("{} {}", self.cmd, self.args.join(" "))
        }
    }
}

/// A named, ordered sequence of [`Test`]s.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Suite {
    name: String,
    tests: Vec<Test>,
}

impl Suite {
    /// Creates a new suite from a name and its ordered tests.
    pub fn new(name: impl Into<String>, tests: impl IntoIterator<Item = Test>) -> Self {
        Self {
            name: name.into(),
            tests: tests.into_iter().collect(),
        }
    }

    /// The suite's name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The ordered tests that make up this suite.
    pub fn tests(&self) -> &[Test] {
        &self.tests
    }
}

/// How a dispatched test concluded.
///
/// Exactly one of these maps to a `1` in the corresponding `TestResult`
/// counter; the rest are `0`. `Warnings` is tracked separately and doesn't
/// participate in this classification.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// `run_command` returned exit code 0 and no panic marker was seen.
    Passed,
    /// `run_command` returned a nonzero exit code and no panic marker was seen.
    Failed,
    /// The test didn't produce a natural exit: a per-test timeout or a
    /// kernel panic interrupted it.
    Broken,
    /// The test was never dispatched: a suite deadline or an external
    /// `stop()` retired it without running it.
    Skipped,
}

/// The one-shot record of a completed (or skipped) test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestResult {
    test: Test,
    outcome: Outcome,
    warnings: u32,
    exec_time: Duration,
    return_code: i32,
    stdout: String,
}

impl TestResult {
    /// Builds a result. `exec_time` must be strictly positive; `return_code`
    /// is `-1` exactly when `outcome` is `Broken` or `Skipped`.
    pub fn new(
        test: Test,
        outcome: Outcome,
        warnings: u32,
        exec_time: Duration,
        return_code: i32,
        stdout: impl Into<String>,
    ) -> Self {
        Self {
            test,
            outcome,
            warnings,
            exec_time,
            return_code,
            stdout: stdout.into(),
        }
    }

    /// The test this result belongs to.
    pub fn test(&self) -> &Test {
        &self.test
    }

    /// How the test concluded.
    pub fn outcome(&self) -> Outcome {
        self.outcome
    }

    /// `1` if the test passed cleanly, `0` otherwise.
    pub fn passed(&self) -> u32 {
        (self.outcome == Outcome::Passed) as u32
    }

    /// `1` if the test ran to a nonzero exit with no kernel event, `0` otherwise.
    pub fn failed(&self) -> u32 {
        (self.outcome == Outcome::Failed) as u32
    }

    /// `1` if the test was interrupted by a timeout or a kernel panic, `0` otherwise.
    pub fn broken(&self) -> u32 {
        (self.outcome == Outcome::Broken) as u32
    }

    /// `1` if the test was retired without running, `0` otherwise.
    pub fn skipped(&self) -> u32 {
        (self.outcome == Outcome::Skipped) as u32
    }

    /// Non-fatal warnings observed while the test ran.
    pub fn warnings(&self) -> u32 {
        self.warnings
    }

    /// Wall-clock time the test occupied. Always strictly positive.
    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    /// The process exit code, or `-1` if the test didn't exit naturally.
    pub fn return_code(&self) -> i32 {
        self.return_code
    }

    /// Captured standard output.
    pub fn stdout(&self) -> &str {
        &self.stdout
    }
}

/// The outcome of running one [`Suite`]: the suite reference plus one
/// [`TestResult`] per test that was actually dispatched (completed, skipped,
/// or retired by a SUT-level stop).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SuiteResult {
    suite: Suite,
    tests_results: Vec<TestResult>,
}

impl SuiteResult {
    pub(crate) fn new(suite: Suite, tests_results: Vec<TestResult>) -> Self {
        Self {
            suite,
            tests_results,
        }
    }

    /// The suite this result belongs to.
    pub fn suite(&self) -> &Suite {
        &self.suite
    }

    /// One entry per test dispatched from this suite, in suite order.
    pub fn tests_results(&self) -> &[TestResult] {
        &self.tests_results
    }
}
