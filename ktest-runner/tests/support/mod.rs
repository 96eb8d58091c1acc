// Copyright (c) The ktest-runner Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A local-process [`Sut`] used to exercise both schedulers against a real
//! shell rather than a hand-rolled fake. Commands run for real (`sh -c`);
//! only taint reporting and kernel-unresponsiveness are scripted, since
//! those are the signals a real kernel would give us but a dev box won't.

use async_trait::async_trait;
use bytes::Bytes;
use camino::Utf8Path;
use ktest_runner::{CommandOutcome, OutputSink, Sut, SutError, TaintInfo};
use std::collections::VecDeque;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, Once};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::watch;

static TRACING: Once = Once::new();

/// Installs a `tracing` subscriber that writes to the test harness's
/// captured output, once per process. Call at the top of every test so the
/// schedulers' `debug!`/`info!`/`warn!` events are visible with
/// `cargo test -- --nocapture`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_max_level(tracing::Level::DEBUG)
            .try_init();
    });
}

/// A scripted local-process SUT.
///
/// Taint reports are drained from a fixed sequence, one per call, sticking
/// on the last entry once exhausted; this is enough to script "clean, then
/// tainted" style scenarios without needing a real kernel to ask.
pub struct MockSut {
    taint_sequence: Mutex<VecDeque<TaintInfo>>,
    force_kernel_timeout: AtomicBool,
    stop_calls: AtomicUsize,
    communicate_calls: AtomicUsize,
    setup_calls: AtomicUsize,
}

impl MockSut {
    /// A SUT that reports a clean kernel forever.
    pub fn clean() -> Self {
        Self::with_taint_sequence([TaintInfo::clean()])
    }

    /// A SUT whose `get_tainted_info` replies are drawn from `sequence` in
    /// order, holding on the last entry once the sequence is exhausted.
    pub fn with_taint_sequence(sequence: impl IntoIterator<Item = TaintInfo>) -> Self {
        Self {
            taint_sequence: Mutex::new(sequence.into_iter().collect()),
            force_kernel_timeout: AtomicBool::new(false),
            stop_calls: AtomicUsize::new(0),
            communicate_calls: AtomicUsize::new(0),
            setup_calls: AtomicUsize::new(0),
        }
    }

    /// From the next `run_command` call onward, report the SUT transport as
    /// unresponsive instead of actually running anything.
    pub fn force_kernel_timeout(&self) {
        self.force_kernel_timeout.store(true, Ordering::SeqCst);
    }

    /// How many times `stop()` has been called.
    pub fn stop_calls(&self) -> usize {
        self.stop_calls.load(Ordering::SeqCst)
    }

    /// How many times `communicate()` has been called.
    pub fn communicate_calls(&self) -> usize {
        self.communicate_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Sut for MockSut {
    async fn run_command(
        &self,
        command_line: &str,
        cwd: Option<&Utf8Path>,
        sink: &mut dyn OutputSink,
        mut cancel: watch::Receiver<bool>,
    ) -> Result<CommandOutcome, SutError> {
        if self.force_kernel_timeout.load(Ordering::SeqCst) {
            return Err(SutError::Timeout);
        }

        let mut command = Command::new("sh");
        command.arg("-c").arg(command_line);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(SutError::transport)?;
        let mut stdout = child.stdout.take().expect("stdout was piped");
        let mut buf = [0u8; 4096];

        loop {
            if *cancel.borrow() || sink.should_abort() {
                let _ = child.start_kill();
                let _ = child.wait().await;
                return Ok(CommandOutcome::new(-1));
            }

            tokio::select! {
                biased;
                _ = cancel.changed() => {
                    let _ = child.start_kill();
                    let _ = child.wait().await;
                    return Ok(CommandOutcome::new(-1));
                }
                read = stdout.read(&mut buf) => {
                    let n = read.map_err(SutError::transport)?;
                    if n == 0 {
                        break;
                    }
                    sink.on_chunk(Bytes::copy_from_slice(&buf[..n]));
                    if sink.should_abort() {
                        let _ = child.start_kill();
                        let _ = child.wait().await;
                        return Ok(CommandOutcome::new(-1));
                    }
                }
            }
        }

        let status = child.wait().await.map_err(SutError::transport)?;
        Ok(CommandOutcome::new(status.code().unwrap_or(-1)))
    }

    async fn get_tainted_info(&self) -> Result<TaintInfo, SutError> {
        let mut seq = self.taint_sequence.lock().expect("taint_sequence poisoned");
        if seq.len() > 1 {
            Ok(seq.pop_front().expect("checked non-empty"))
        } else {
            Ok(seq.front().cloned().unwrap_or_else(TaintInfo::clean))
        }
    }

    async fn stop(&self) -> Result<(), SutError> {
        self.stop_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn communicate(&self) -> Result<(), SutError> {
        self.communicate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn setup(&self) -> Result<(), SutError> {
        self.setup_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
