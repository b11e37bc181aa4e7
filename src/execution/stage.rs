//! Per-stage driver task.
//!
//! One task owns the [`Child`] of a stage. Its first poll decides the
//! consumption mode; it then writes literal input, pumps both output
//! streams and waits for the exit concurrently, and publishes exactly one
//! [`Outcome`].

use std::io;
use std::process::ExitStatus;
use std::sync::Mutex;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, ChildStdin};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::command::Context;
use super::launcher::{launch, ProcessHandle};
use super::mode::{ConsumptionMode, ModeGate, Routing};
use super::result::{Failure, Outcome, Output, SubprocessError};
use crate::config::{Options, Stdio};
use crate::error::{Result, SpawnError};
use crate::output::{CapturedOutput, LineSplitter, OutputCollector, OutputSource, TextDecoder};

/// Default buffer size for reading subprocess output.
const READ_BUFFER_SIZE: usize = 8192;

/// Receiving side of a stage or pipeline outcome.
#[derive(Debug, Clone)]
pub(crate) struct Settlement {
    rx: watch::Receiver<Option<Outcome>>,
    context: Context,
}

impl Settlement {
    /// A settlement published later through the returned sender.
    pub fn pending(context: Context) -> (watch::Sender<Option<Outcome>>, Self) {
        let (tx, rx) = watch::channel(None);
        (tx, Self { rx, context })
    }

    /// A settlement that is already known.
    pub fn settled(context: Context, outcome: Outcome) -> Self {
        let (_tx, rx) = watch::channel(Some(outcome));
        Self { rx, context }
    }

    /// Wait for the outcome.
    pub async fn wait(mut self) -> Outcome {
        let current = self.rx.borrow().clone();
        if let Some(outcome) = current {
            return outcome;
        }

        let settled = match self.rx.wait_for(Option::is_some).await {
            Ok(settled) => settled.clone(),
            Err(_) => None,
        };
        settled.unwrap_or_else(|| Err(SubprocessError::usage(&self.context, SpawnError::Abandoned)))
    }
}

/// The parts of one started stage.
#[derive(Debug)]
pub(crate) struct Stage {
    pub context: Context,
    pub stdout_piped: bool,
    pub gate: ModeGate,
    pub process: Option<ProcessHandle>,
    pub settlement: Settlement,
}

impl Stage {
    /// Validate the options, launch the program and start its driver.
    ///
    /// A launch failure is not an error here: it settles the stage.
    /// Must run inside a tokio runtime.
    pub fn start(program: &str, args: &[String], options: Options, context: Context) -> Result<Self> {
        let invalid = |reason: String| SpawnError::InvalidOptions {
            command: context.command().to_owned(),
            reason,
        };
        if program.is_empty() {
            return Err(invalid("the program must not be empty".to_string()));
        }
        options.validate().map_err(invalid)?;

        let stdout_piped = options.output_mode(OutputSource::Stdout) == &Stdio::Pipe;
        let mut child = match launch(program, args, &options) {
            Ok(child) => child,
            Err(error) => {
                debug!(command = context.command(), %error, "subprocess failed to launch");
                let failure = SubprocessError::launch(&context, error);
                return Ok(Self::failed(context, failure, stdout_piped));
            }
        };

        let pid = child.id();
        debug!(command = context.command(), ?pid, "subprocess started");

        let stdin = child.stdin.take();
        let (input, stdin) = match options.stdin_mode() {
            Stdio::Input(text) => (stdin.map(|pipe| (pipe, text.clone())), None),
            _ => (None, stdin),
        };
        let terminate = options
            .signal
            .as_ref()
            .map(CancellationToken::child_token)
            .unwrap_or_default();
        let handle = ProcessHandle::new(pid, stdin, terminate);

        let gate = ModeGate::new();
        let (outcome_tx, settlement) = Settlement::pending(context.clone());
        let driver = Driver {
            context: context.clone(),
            gate: gate.clone(),
            terminate: handle.termination(),
            timeout: options.timeout,
            stdout_active: options.output_mode(OutputSource::Stdout).is_piped(),
            stderr_active: options.output_mode(OutputSource::Stderr).is_piped(),
        };
        tokio::spawn(async move {
            let outcome = driver.run(child, input).await;
            outcome_tx.send_replace(Some(outcome));
        });

        Ok(Self {
            context,
            stdout_piped,
            gate,
            process: Some(handle),
            settlement,
        })
    }

    /// A stage that settled without a running process.
    pub fn failed(context: Context, failure: SubprocessError, stdout_piped: bool) -> Self {
        let gate = ModeGate::detached();
        gate.seal_when_scheduled();
        Self {
            settlement: Settlement::settled(context.clone(), Err(failure)),
            context,
            stdout_piped,
            gate,
            process: None,
        }
    }
}

struct Driver {
    context: Context,
    gate: ModeGate,
    terminate: CancellationToken,
    timeout: Option<Duration>,
    stdout_active: bool,
    stderr_active: bool,
}

impl Driver {
    async fn run(self, mut child: Child, input: Option<(ChildStdin, String)>) -> Outcome {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let (status, ([out, err], captured), input) = tokio::join!(
            wait_for_exit(&mut child, self.timeout, &self.terminate),
            self.pump_streams(stdout, stderr),
            write_input(input),
        );

        debug!(command = self.context.command(), ?status, "subprocess exited");
        settle(&self.context, status, [out, err, input], captured)
    }

    async fn pump_streams<O, E>(&self, stdout: Option<O>, stderr: Option<E>) -> ([io::Result<()>; 2], CapturedOutput)
    where
        O: AsyncRead + Unpin,
        E: AsyncRead + Unpin,
    {
        // First poll of the driver: the creating task has yielded.
        self.gate.seal();
        let (mode, routing) = self.gate.decided().await;
        trace!(command = self.context.command(), ?mode, "output consumption decided");

        let collector = (mode == ConsumptionMode::Buffered)
            .then(|| Mutex::new(OutputCollector::new(self.stdout_active, self.stderr_active)));
        let Routing {
            stdout_lines,
            stderr_lines,
            relay,
        } = routing;

        let (out, err) = tokio::join!(
            pump(stdout, OutputSource::Stdout, collector.as_ref(), stdout_lines, relay),
            pump(stderr, OutputSource::Stderr, collector.as_ref(), stderr_lines, None),
        );

        let captured = match collector {
            Some(collector) => collector
                .into_inner()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .finish(),
            None => CapturedOutput::empty(self.stdout_active, self.stderr_active),
        };
        ([out, err], captured)
    }
}

/// Wait for the exit, requesting termination once on timeout or cancellation.
async fn wait_for_exit(
    child: &mut Child,
    timeout: Option<Duration>,
    terminate: &CancellationToken,
) -> io::Result<ExitStatus> {
    let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
    let mut armed = true;

    loop {
        tokio::select! {
            status = child.wait() => return status,
            _ = deadline_elapsed(deadline), if armed => {
                debug!(?timeout, "subprocess timed out");
                armed = false;
                request_termination(child);
            }
            _ = terminate.cancelled(), if armed => {
                debug!("subprocess cancelled");
                armed = false;
                request_termination(child);
            }
        }
    }
}

async fn deadline_elapsed(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

#[cfg(unix)]
fn request_termination(child: &mut Child) {
    let Some(pid) = child.id() else {
        return;
    };
    // SAFETY: `pid` is a child of this process that has not been reaped,
    // so it cannot have been reused.
    if unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) } == -1 {
        warn!(pid, error = %io::Error::last_os_error(), "failed to send SIGTERM");
    }
}

#[cfg(not(unix))]
fn request_termination(child: &mut Child) {
    if let Err(error) = child.start_kill() {
        warn!(%error, "failed to terminate subprocess");
    }
}

/// Read one stream to the end, routing every chunk.
///
/// A closed relay stops the read and drops the reader, so the writing
/// process sees a broken pipe.
async fn pump<R: AsyncRead + Unpin>(
    reader: Option<R>,
    source: OutputSource,
    collector: Option<&Mutex<OutputCollector>>,
    mut lines: Option<mpsc::Sender<String>>,
    relay: Option<mpsc::Sender<Vec<u8>>>,
) -> io::Result<()> {
    let Some(mut reader) = reader else {
        return Ok(());
    };
    let mut decoder = TextDecoder::new();
    let mut splitter = LineSplitter::new();
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        trace!(source = source.as_str(), bytes = n, "output chunk");

        if let Some(tx) = &relay {
            if tx.send(buf[..n].to_vec()).await.is_err() {
                debug!(source = source.as_str(), "relay closed, releasing stream");
                break;
            }
        }
        if collector.is_none() && lines.is_none() {
            continue;
        }

        let text = decoder.decode(&buf[..n]);
        if let Some(collector) = collector {
            lock(collector).push(source, &text);
        }
        send_lines(&mut lines, splitter.push(&text)).await;
    }

    let text = decoder.finish();
    if let Some(collector) = collector {
        lock(collector).push(source, &text);
    }
    send_lines(&mut lines, splitter.push(&text)).await;
    send_lines(&mut lines, splitter.finish().into_iter().collect()).await;
    Ok(())
}

fn lock(collector: &Mutex<OutputCollector>) -> std::sync::MutexGuard<'_, OutputCollector> {
    collector.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Send lines until the consumer goes away, then stop sending.
async fn send_lines(lines: &mut Option<mpsc::Sender<String>>, batch: Vec<String>) {
    let Some(tx) = lines.as_ref() else {
        return;
    };
    for line in batch {
        if tx.send(line).await.is_err() {
            *lines = None;
            return;
        }
    }
}

async fn write_input(input: Option<(ChildStdin, String)>) -> io::Result<()> {
    let Some((mut stdin, text)) = input else {
        return Ok(());
    };
    stdin.write_all(text.as_bytes()).await?;
    stdin.shutdown().await
}

/// Errors that only mean the other side went away first.
fn is_ignorable(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::UnexpectedEof
    )
}

/// Build the terminal record of a stage.
fn settle(
    context: &Context,
    status: io::Result<ExitStatus>,
    faults: [io::Result<()>; 3],
    captured: CapturedOutput,
) -> Outcome {
    let status = match status {
        Ok(status) => status,
        Err(error) => return Err(SubprocessError::failed(context, Failure::Fault(error), captured)),
    };

    if let Some(fault) = faults
        .into_iter()
        .filter_map(std::result::Result::err)
        .find(|error| !is_ignorable(error))
    {
        warn!(command = context.command(), error = %fault, "subprocess stream failed");
        return Err(SubprocessError::failed(context, Failure::Fault(fault), captured));
    }

    if let Some(name) = termination_signal(&status) {
        return Err(SubprocessError::failed(context, Failure::Signal(name), captured));
    }

    match status.code() {
        Some(code) if code != 0 => Err(SubprocessError::failed(context, Failure::ExitCode(code), captured)),
        _ => Ok(Output::new(captured, context)),
    }
}

#[cfg(unix)]
fn termination_signal(status: &ExitStatus) -> Option<String> {
    use std::os::unix::process::ExitStatusExt;

    status.signal().map(signal_name)
}

#[cfg(not(unix))]
fn termination_signal(_status: &ExitStatus) -> Option<String> {
    None
}

#[cfg(unix)]
fn signal_name(signal: i32) -> String {
    let name = match signal {
        libc::SIGHUP => "SIGHUP",
        libc::SIGINT => "SIGINT",
        libc::SIGQUIT => "SIGQUIT",
        libc::SIGILL => "SIGILL",
        libc::SIGTRAP => "SIGTRAP",
        libc::SIGABRT => "SIGABRT",
        libc::SIGBUS => "SIGBUS",
        libc::SIGFPE => "SIGFPE",
        libc::SIGKILL => "SIGKILL",
        libc::SIGUSR1 => "SIGUSR1",
        libc::SIGSEGV => "SIGSEGV",
        libc::SIGUSR2 => "SIGUSR2",
        libc::SIGPIPE => "SIGPIPE",
        libc::SIGALRM => "SIGALRM",
        libc::SIGTERM => "SIGTERM",
        other => return format!("SIG{other}"),
    };
    name.to_string()
}
