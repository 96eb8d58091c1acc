// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The contract the schedulers require from a System Under Test.
//!
//! This module defines the interface only; no networked or SSH-backed
//! transport ships in this crate. A local-process implementation used to
//! exercise the schedulers lives in this crate's own test suite under
//! `tests/support/`.

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8Path;
use tokio::sync::watch;

/// Errors a [`Sut`] implementation may report back to a scheduler.
///
/// [`SutError::Timeout`] is the signal path for a *kernel*-timeout: it means
/// the transport itself judged the SUT unresponsive, as distinct from a
/// single test exceeding the scheduler's own per-test deadline (which the
/// scheduler detects on its own and never surfaces as a `SutError`).
#[derive(Debug, thiserror::Error)]
pub enum SutError {
    /// The transport gave up waiting for the SUT to respond.
    #[error("SUT transport timed out")]
    Timeout,
    /// Any other transport-level failure (connection lost, command could
    /// not be spawned, lifecycle hook failed, …).
    #[error("SUT transport error: {0}")]
    Transport(Box<dyn std::error::Error + Send + Sync>),
}

impl SutError {
    /// Wraps an arbitrary error as a transport failure.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Box::new(err))
    }
}

/// The kernel taint mask and human-readable reasons behind it.
///
/// A `mask` of `0` means the kernel is clean.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaintInfo {
    mask: u64,
    reasons: Vec<String>,
}

impl TaintInfo {
    /// Builds a taint report from a mask and its reasons.
    pub fn new(mask: u64, reasons: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            mask,
            reasons: reasons.into_iter().map(Into::into).collect(),
        }
    }

    /// The clean, untainted report.
    pub fn clean() -> Self {
        Self {
            mask: 0,
            reasons: Vec::new(),
        }
    }

    /// The taint bitmask; `0` means untainted.
    pub fn mask(&self) -> u64 {
        self.mask
    }

    /// Human-readable reasons the kernel is tainted, if any.
    pub fn reasons(&self) -> &[String] {
        &self.reasons
    }
}

/// What a completed `run_command` call reported.
///
/// `stdout` is not carried here: it is accumulated by the [`OutputSink`]
/// the scheduler passes in, since the sink is the live observer that scans
/// streamed chunks for a kernel panic marker as they arrive.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CommandOutcome {
    return_code: i32,
}

impl CommandOutcome {
    /// Builds a command outcome from the process' exit code.
    pub fn new(return_code: i32) -> Self {
        Self { return_code }
    }

    /// The process exit code.
    pub fn return_code(&self) -> i32 {
        self.return_code
    }
}

/// A live observer of a command's standard output stream.
///
/// `Sut` implementations must feed every output chunk through
/// [`OutputSink::on_chunk`] as it arrives, and check
/// [`OutputSink::should_abort`] after each call: once it returns `true` the
/// transport should terminate the command promptly (it has seen a kernel
/// panic marker and the scheduler needs the partial output now, not at
/// natural exit) and return whatever [`CommandOutcome`] it can put together.
pub trait OutputSink: Send {
    /// Called once per chunk of standard output, in arrival order.
    fn on_chunk(&mut self, chunk: Bytes);

    /// Whether the transport should cut the command short right now.
    fn should_abort(&self) -> bool {
        false
    }
}

/// Abstract access to the target kernel: runs commands, reports taint
/// status, and exposes lifecycle hooks.
///
/// All methods accept a `cancel` watch so implementations can race their
/// own I/O against cooperative cancellation requested by `stop()`.
#[async_trait]
pub trait Sut: Send + Sync {
    /// Runs a shell command on the SUT, feeding output chunks to `sink` as
    /// they arrive. `cwd`, if set, is the working directory for the
    /// command. Returns [`SutError::Timeout`] if the transport itself
    /// judges the SUT unresponsive — distinct from the scheduler's own
    /// per-test deadline, which wraps this call from the outside.
    async fn run_command(
        &self,
        command_line: &str,
        cwd: Option<&Utf8Path>,
        sink: &mut dyn OutputSink,
        cancel: watch::Receiver<bool>,
    ) -> Result<CommandOutcome, SutError>;

    /// Queries the kernel taint mask and its reasons.
    async fn get_tainted_info(&self) -> Result<TaintInfo, SutError>;

    /// Stops the SUT. Idempotent; cancels any in-flight `run_command` on
    /// this SUT.
    async fn stop(&self) -> Result<(), SutError>;

    /// Re-establishes communication with the SUT after a stop. Idempotent.
    async fn communicate(&self) -> Result<(), SutError>;

    /// Prepares the SUT for use. Idempotent.
    async fn setup(&self) -> Result<(), SutError>;

    /// Writes a short identifying marker to the kernel's log ring-buffer
    /// before a test launches, to aid correlation with dmesg output.
    ///
    /// Best-effort: the default implementation is a no-op, which is both
    /// the "disabled" behavior the mock transports in this crate's tests
    /// rely on and the override hook operators use to wire up real
    /// `/dev/kmsg` writes. A failure here must never be treated as fatal.
    fn write_kernel_marker(&self, _test_name: &str) {}
}

/// The literal substring the scheduler watches for in streamed stdout.
/// First occurrence during a test's execution wins over any other
/// classification for that test.
pub const PANIC_MARKER: &str = "Kernel panic";

/// An [`OutputSink`] that buffers the full captured output and scans it for
/// [`PANIC_MARKER`] as chunks arrive.
#[derive(Debug, Default)]
pub struct PanicWatchSink {
    buffer: Vec<u8>,
    panic_detected: bool,
}

impl PanicWatchSink {
    /// Creates an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the panic marker has been observed so far.
    pub fn panic_detected(&self) -> bool {
        self.panic_detected
    }

    /// The captured output so far, decoded lossily as UTF-8.
    pub fn captured(&self) -> String {
        String::from_utf8_lossy(&self.buffer).into_owned()
    }
}

impl OutputSink for PanicWatchSink {
    fn on_chunk(&mut self, chunk: Bytes) {
        self.buffer.extend_from_slice(&chunk);
        if !self.panic_detected {
            self.panic_detected = String::from_utf8_lossy(&self.buffer).contains(PANIC_MARKER);
        }
    }

    fn should_abort(&self) -> bool {
        self.panic_detected
    }
}
