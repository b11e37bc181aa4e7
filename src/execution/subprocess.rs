//! The subprocess handle.

use std::future::{Future, IntoFuture};

use futures_util::future::BoxFuture;
use futures_util::stream::{self, BoxStream, StreamExt};
use futures_util::FutureExt;
use tokio::sync::mpsc;

use super::command::Context;
use super::launcher::ProcessHandle;
use super::mode::{ConsumptionMode, ModeGate, SealGuard};
use super::pipeline;
use super::result::{Output, SubprocessError};
use super::stage::{Settlement, Stage};
use crate::config::Options;
use crate::error::{Result, SpawnError};
use crate::output::{LineStream, OutputSource};

/// A running subprocess, or the last stage of a pipeline.
///
/// Await it for the buffered [`Output`], or take a [`LineStream`] first
/// to consume the output line by line. The consumption mode is decided
/// at the first scheduling opportunity after creation: line sequences
/// must be requested before the creating task yields, and before the
/// handle is awaited, piped, asked for its process or dropped. A handle
/// that is only held is buffered to completion.
#[derive(Debug)]
pub struct Subprocess {
    stage: Stage,
    guard: SealGuard,
}

impl Subprocess {
    pub(crate) fn new(stage: Stage) -> Self {
        Self {
            guard: SealGuard::new(stage.gate.clone()),
            stage,
        }
    }

    /// A subprocess that failed before anything ran.
    pub(crate) fn failed(context: Context, failure: SubprocessError) -> Self {
        Self::new(Stage::failed(context, failure, true))
    }

    pub(crate) fn into_stage(self) -> Stage {
        self.stage
    }

    pub(crate) fn context(&self) -> &Context {
        &self.stage.context
    }

    pub(crate) fn gate(&self) -> &ModeGate {
        &self.stage.gate
    }

    pub(crate) fn stdout_piped(&self) -> bool {
        self.stage.stdout_piped
    }

    /// The human-readable command, `a | b` for a pipeline.
    pub fn command(&self) -> &str {
        self.stage.context.command()
    }

    /// Current consumption mode.
    pub fn mode(&self) -> ConsumptionMode {
        self.stage.gate.mode()
    }

    /// Lines of stdout and stderr, merged as they arrive.
    pub fn lines(&self) -> Result<LineStream> {
        self.claim(&[OutputSource::Stdout, OutputSource::Stderr])
    }

    /// Lines of stdout only.
    pub fn stdout_lines(&self) -> Result<LineStream> {
        self.claim(&[OutputSource::Stdout])
    }

    /// Lines of stderr only.
    pub fn stderr_lines(&self) -> Result<LineStream> {
        self.claim(&[OutputSource::Stderr])
    }

    fn claim(&self, sources: &[OutputSource]) -> Result<LineStream> {
        let receivers = self.stage.gate.claim_lines(sources)?;
        let lines = merge_lines(receivers);

        let settlement = self.stage.settlement.clone();
        let gate = self.stage.gate.clone();
        Ok(LineStream::new(
            lines,
            async move { settlement.wait().await.map(drop) },
            move || {
                gate.seal();
            },
        ))
    }

    /// The running process.
    ///
    /// Decides the consumption mode. Fails with the launch failure when
    /// the program could not be started.
    pub async fn process(&self) -> std::result::Result<ProcessHandle, SubprocessError> {
        self.stage.gate.seal();
        if let Some(handle) = &self.stage.process {
            return Ok(handle.clone());
        }

        match self.stage.settlement.clone().wait().await {
            Err(failure) => Err(failure),
            Ok(_) => Err(SubprocessError::usage(&self.stage.context, SpawnError::Abandoned)),
        }
    }

    /// Pipe stdout into `program`, returning the pipeline.
    pub fn pipe<I, S>(self, program: &str, args: I) -> Subprocess
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.pipe_with(program, args, Options::default())
    }

    /// Pipe stdout into `program` started with `options`.
    ///
    /// The downstream stdin defaults to a pipe. Configuration errors are
    /// reported when the pipeline is awaited.
    pub fn pipe_with<I, S>(self, program: &str, args: I, options: Options) -> Subprocess
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        pipeline::extend(self, program, args, options)
    }

    /// Wait for the subprocess to settle.
    ///
    /// Decides the consumption mode and releases this handle's hold on
    /// stdin.
    pub fn wait(self) -> impl Future<Output = std::result::Result<Output, SubprocessError>> + Send + 'static {
        let Self { stage, guard } = self;
        drop(guard);
        stage.settlement.wait()
    }
}

impl IntoFuture for Subprocess {
    type Output = std::result::Result<Output, SubprocessError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        self.wait().boxed()
    }
}

fn receiver_stream(rx: mpsc::Receiver<String>) -> BoxStream<'static, String> {
    stream::unfold(rx, |mut rx| async move { rx.recv().await.map(|line| (line, rx)) }).boxed()
}

/// Lines of every receiver, first ready first emitted.
fn merge_lines(receivers: Vec<mpsc::Receiver<String>>) -> BoxStream<'static, String> {
    stream::select_all(receivers.into_iter().map(receiver_stream)).boxed()
}
