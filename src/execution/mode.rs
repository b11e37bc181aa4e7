//! Output consumption mode and the claims made before it is decided.

use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};

use crate::error::{Result, SpawnError};
use crate::output::OutputSource;

/// Lines buffered per stream before the driver waits for the consumer.
pub(crate) const LINE_CHANNEL_CAPACITY: usize = 64;

/// Chunks buffered between two pipeline stages.
pub(crate) const RELAY_CHANNEL_CAPACITY: usize = 16;

/// How the output of a subprocess is consumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConsumptionMode {
    /// Nothing has been decided yet; line sequences can still be claimed.
    #[default]
    Undecided,
    /// Output is collected into strings.
    Buffered,
    /// Output is handed out line by line.
    Streamed,
}

impl ConsumptionMode {
    /// Check if transition to target mode is valid.
    ///
    /// Valid transitions:
    /// - Undecided -> Buffered
    /// - Undecided -> Streamed
    pub fn can_transition_to(&self, target: ConsumptionMode) -> bool {
        use ConsumptionMode::*;
        matches!((*self, target), (Undecided, Buffered) | (Undecided, Streamed))
    }

    /// Attempt to transition to a new mode.
    pub fn transition_to(&mut self, target: ConsumptionMode) -> Result<()> {
        if self.can_transition_to(target) {
            *self = target;
            Ok(())
        } else {
            Err(SpawnError::InvalidModeTransition {
                from: *self,
                to: target,
            })
        }
    }

    /// Whether the mode is final.
    pub fn is_decided(&self) -> bool {
        !matches!(self, ConsumptionMode::Undecided)
    }
}

/// Where the driver sends what it reads.
#[derive(Debug, Default)]
pub(crate) struct Routing {
    pub stdout_lines: Option<mpsc::Sender<String>>,
    pub stderr_lines: Option<mpsc::Sender<String>>,
    pub relay: Option<mpsc::Sender<Vec<u8>>>,
}

impl Routing {
    fn lines_slot(&mut self, source: OutputSource) -> &mut Option<mpsc::Sender<String>> {
        match source {
            OutputSource::Stdout => &mut self.stdout_lines,
            OutputSource::Stderr => &mut self.stderr_lines,
        }
    }

    fn has_lines(&self) -> bool {
        self.stdout_lines.is_some() || self.stderr_lines.is_some()
    }
}

#[derive(Debug, Default)]
struct Gate {
    mode: ConsumptionMode,
    routing: Routing,
    detached: bool,
}

/// Shared consumption state of one stage.
///
/// The handle side claims line sequences and seals the mode; the driver
/// side waits for the seal and takes the routing.
#[derive(Debug, Clone)]
pub(crate) struct ModeGate {
    tx: Arc<watch::Sender<Gate>>,
}

impl ModeGate {
    /// Gate of a stage with a running driver.
    pub fn new() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(Gate::default())),
        }
    }

    /// Gate of a stage without a driver. Sealing it drops every claim,
    /// so claimed sequences end immediately.
    pub fn detached() -> Self {
        Self {
            tx: Arc::new(watch::Sender::new(Gate {
                detached: true,
                ..Gate::default()
            })),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> ConsumptionMode {
        self.tx.borrow().mode
    }

    /// Claim the line sequences of `sources`, all or none.
    pub fn claim_lines(&self, sources: &[OutputSource]) -> Result<Vec<mpsc::Receiver<String>>> {
        let mut claimed = Err(SpawnError::LateIteration);
        self.tx.send_if_modified(|gate| {
            if gate.mode.is_decided() {
                return false;
            }
            if let Some(taken) = sources
                .iter()
                .copied()
                .find(|source| gate.routing.lines_slot(*source).is_some())
            {
                claimed = Err(SpawnError::LinesTaken(taken));
                return false;
            }

            let receivers = sources
                .iter()
                .map(|source| {
                    let (tx, rx) = mpsc::channel(LINE_CHANNEL_CAPACITY);
                    *gate.routing.lines_slot(*source) = Some(tx);
                    rx
                })
                .collect();
            claimed = Ok(receivers);
            false
        });
        claimed
    }

    /// Claim the raw stdout bytes for a downstream stage.
    ///
    /// Fails once the mode is decided or stdout lines were claimed.
    pub fn claim_relay(&self) -> Result<mpsc::Receiver<Vec<u8>>> {
        let mut claimed = Err(SpawnError::UpstreamOutputConsumed);
        self.tx.send_if_modified(|gate| {
            if gate.mode.is_decided()
                || gate.routing.stdout_lines.is_some()
                || gate.routing.relay.is_some()
            {
                return false;
            }
            let (tx, rx) = mpsc::channel(RELAY_CHANNEL_CAPACITY);
            gate.routing.relay = Some(tx);
            claimed = Ok(rx);
            false
        });
        claimed
    }

    /// Decide the mode if it is still open, returning the final mode.
    pub fn seal(&self) -> ConsumptionMode {
        let mut sealed = ConsumptionMode::Undecided;
        self.tx.send_if_modified(|gate| {
            if gate.mode.is_decided() {
                sealed = gate.mode;
                return false;
            }

            let target = if gate.routing.has_lines() {
                ConsumptionMode::Streamed
            } else {
                ConsumptionMode::Buffered
            };
            let changed = gate.mode.transition_to(target).is_ok();
            if gate.detached {
                gate.routing = Routing::default();
            }
            sealed = gate.mode;
            changed
        });
        sealed
    }

    /// Seal from a task of its own, at the next scheduling opportunity.
    ///
    /// Used by stages without a driver. Outside a runtime the gate is only
    /// sealed by its handle.
    pub fn seal_when_scheduled(&self) {
        let Ok(runtime) = Handle::try_current() else {
            return;
        };
        let gate = self.clone();
        runtime.spawn(async move {
            gate.seal();
        });
    }

    /// Wait for the seal, then take the routing. Driver side.
    pub async fn decided(&self) -> (ConsumptionMode, Routing) {
        let mut rx = self.tx.subscribe();
        let mode = rx
            .wait_for(|gate| gate.mode.is_decided())
            .await
            .map(|gate| gate.mode)
            .unwrap_or(ConsumptionMode::Buffered);

        let mut routing = Routing::default();
        self.tx.send_if_modified(|gate| {
            routing = std::mem::take(&mut gate.routing);
            false
        });
        (mode, routing)
    }
}

/// Seals the gate when the owning handle is dropped.
#[derive(Debug)]
pub(crate) struct SealGuard(ModeGate);

impl SealGuard {
    pub fn new(gate: ModeGate) -> Self {
        Self(gate)
    }
}

impl Drop for SealGuard {
    fn drop(&mut self) {
        self.0.seal();
    }
}
