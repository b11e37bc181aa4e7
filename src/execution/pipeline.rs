//! Pipeline coordination.
//!
//! Piping a subprocess into a new program relays the upstream stdout
//! bytes into the downstream stdin, then settles once both stages have
//! settled. The upstream failure takes precedence over the downstream one.

use tokio::io::AsyncWriteExt;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::debug;

use super::command::Context;
use super::launcher::ProcessHandle;
use super::mode::ModeGate;
use super::result::{Outcome, SubprocessError};
use super::stage::{Settlement, Stage};
use super::subprocess::Subprocess;
use crate::config::{Options, Stdio};
use crate::error::{Result, SpawnError};

/// Pipe the stdout of `upstream` into a new stage.
pub(crate) fn extend(upstream: Subprocess, program: &str, args: Vec<String>, mut options: Options) -> Subprocess {
    let context = upstream.context().extend(program, &args);

    if Handle::try_current().is_err() {
        let failure = SubprocessError::usage(&context, SpawnError::NoRuntime(context.command().to_owned()));
        return Subprocess::failed(context, failure);
    }

    let relay = check_config(&upstream, &mut options).and_then(|()| upstream.gate().claim_relay());
    let upstream = upstream.into_stage();

    let relay = match relay {
        Ok(relay) => relay,
        Err(cause) => {
            debug!(command = context.command(), %cause, "pipeline misconfigured");
            return settle_misconfigured(upstream, context, cause);
        }
    };

    let downstream = match Stage::start(program, &args, options, context.clone()) {
        Ok(downstream) => downstream,
        Err(cause) => return settle_misconfigured(upstream, context, cause),
    };

    let (outcome_tx, settlement) = Settlement::pending(context.clone());
    let upstream_process = upstream.process;
    let downstream_process = downstream.process.clone();
    let upstream_settlement = upstream.settlement;
    let downstream_settlement = downstream.settlement.clone();
    let pipeline_context = context.clone();

    tokio::spawn(async move {
        let ((), upstream_outcome, downstream_outcome) = tokio::join!(
            link(relay, upstream_process, downstream_process),
            upstream_settlement.wait(),
            downstream_settlement.wait(),
        );
        let outcome: Outcome = match (upstream_outcome, downstream_outcome) {
            (Err(failure), _) | (Ok(_), Err(failure)) => Err(failure.in_context(&pipeline_context)),
            (Ok(_), Ok(output)) => Ok(output.in_context(&pipeline_context)),
        };
        outcome_tx.send_replace(Some(outcome));
    });

    Subprocess::new(Stage {
        context,
        settlement,
        ..downstream
    })
}

/// The downstream stdin must be a pipe, defaulting to one; the upstream
/// stdout must be a pipe.
fn check_config(upstream: &Subprocess, options: &mut Options) -> Result<()> {
    match &options.stdin {
        None => options.stdin = Some(Stdio::Pipe),
        Some(Stdio::Pipe) => {}
        Some(_) => return Err(SpawnError::DownstreamInputNotPiped),
    }
    if !upstream.stdout_piped() {
        return Err(SpawnError::UpstreamOutputNotPiped);
    }
    Ok(())
}

/// Report a configuration error once the upstream has settled.
fn settle_misconfigured(upstream: Stage, context: Context, cause: SpawnError) -> Subprocess {
    let failure = SubprocessError::usage(&context, cause);
    let (outcome_tx, settlement) = Settlement::pending(context.clone());
    let upstream_process = upstream.process;
    let upstream_settlement = upstream.settlement;

    tokio::spawn(async move {
        if let Some(process) = upstream_process {
            close_stdin(&process).await;
        }
        let _ = upstream_settlement.wait().await;
        outcome_tx.send_replace(Some(Err(failure)));
    });

    let gate = ModeGate::detached();
    gate.seal_when_scheduled();
    Subprocess::new(Stage {
        context,
        stdout_piped: true,
        gate,
        process: None,
        settlement,
    })
}

/// Relay upstream stdout chunks into the downstream stdin.
///
/// When the downstream failed to launch the upstream stdin is closed
/// and its output is drained, so the upstream runs to completion. A
/// failed upstream launch ends the relay immediately, closing the
/// downstream stdin. A write error means the downstream stopped reading:
/// the relay is dropped, which closes the upstream stdout. Each stage
/// reports its own errors.
async fn link(
    mut chunks: mpsc::Receiver<Vec<u8>>,
    upstream: Option<ProcessHandle>,
    downstream: Option<ProcessHandle>,
) {
    let Some(downstream) = downstream else {
        if let Some(upstream) = upstream {
            close_stdin(&upstream).await;
        }
        while chunks.recv().await.is_some() {}
        return;
    };
    drop(upstream);

    let Some(mut stdin) = downstream.take_stdin().await else {
        return;
    };
    while let Some(chunk) = chunks.recv().await {
        if let Err(error) = stdin.write_all(&chunk).await {
            debug!(%error, "pipeline relay stopped");
            break;
        }
    }
    if let Err(error) = stdin.shutdown().await {
        debug!(%error, "failed to close downstream stdin");
    }
}

async fn close_stdin(process: &ProcessHandle) {
    if let Err(error) = process.close_stdin().await {
        debug!(%error, "failed to close stdin");
    }
}
