//! Fill-cycle state machine.
//!
//! One controller owns one pump, one pulse source, and one shared pulse
//! counter. `start_filling` is the only transition taken on the caller's
//! thread; everything after that (progress, completion, abort, the max-fill
//! deadline) flows through a single dispatch thread fed by a command
//! channel, so terminal transitions are serialized and a pulse arriving from
//! the sensor's interrupt context never calls into observer code directly.

use crate::backend::{Backend, SaleRecord};
use crate::error::{AbortReason, DispenseError};
use crate::pulse::{PulseCounter, PulseOutcome};
use crate::volume::{VolumeOption, VolumeTable};
use crossbeam_channel as xch;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};
use vendo_traits::{Pump, PulseSink, PulseSource};

/// Controller lifecycle. `Idle` is reachable from both terminal states via
/// `reset`; a second `start_filling` anywhere else is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FillState {
    Idle,
    Filling,
    Completed,
    Failed,
}

/// Events published to the UI shell.
#[derive(Debug, Clone, PartialEq)]
pub enum FillEvent {
    /// Percentage in [0, 100], non-decreasing within one session.
    Progress(u8),
    Completed(SaleRecord),
    Failed(String),
}

/// Transient per-fill value; lives from `start_filling` until the terminal
/// state is cleared by `reset`.
#[derive(Debug, Clone)]
pub struct FillSession {
    pub option: VolumeOption,
    pub started_at: Instant,
}

enum Command {
    Progress(u8),
    Complete { pulses: u32 },
    Abort(AbortReason),
}

struct Shared {
    state: FillState,
    session: Option<FillSession>,
    cmd_tx: Option<xch::Sender<Command>>,
    dispatcher: Option<JoinHandle<()>>,
}

type SharedPump = Arc<Mutex<Box<dyn Pump + Send>>>;
type SharedSource = Arc<Mutex<Box<dyn PulseSource + Send>>>;

/// Locks that ignore poisoning: the guarded values are plain state that
/// remains sound after a panicked holder, and the pump must still be
/// stoppable from cleanup paths.
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(p) => p.into_inner(),
    }
}

pub struct DispenseController {
    table: VolumeTable,
    pump: SharedPump,
    source: SharedSource,
    counter: PulseCounter,
    backend: Arc<dyn Backend>,
    shared: Arc<Mutex<Shared>>,
    events_tx: xch::Sender<FillEvent>,
    max_fill: Duration,
}

impl DispenseController {
    /// Build a controller and the event stream observers read from.
    pub fn new(
        table: VolumeTable,
        pump: Box<dyn Pump + Send>,
        source: Box<dyn PulseSource + Send>,
        backend: Arc<dyn Backend>,
        max_fill: Duration,
    ) -> (Self, xch::Receiver<FillEvent>) {
        let (events_tx, events_rx) = xch::unbounded();
        let controller = Self {
            table,
            pump: Arc::new(Mutex::new(pump)),
            source: Arc::new(Mutex::new(source)),
            counter: PulseCounter::new(),
            backend,
            shared: Arc::new(Mutex::new(Shared {
                state: FillState::Idle,
                session: None,
                cmd_tx: None,
                dispatcher: None,
            })),
            events_tx,
            max_fill,
        };
        (controller, events_rx)
    }

    pub fn state(&self) -> FillState {
        lock(&self.shared).state
    }

    /// Snapshot of the current session: the active fill, or the last one if
    /// the controller is terminal and not yet reset.
    pub fn session(&self) -> Option<FillSession> {
        lock(&self.shared).session.clone()
    }

    /// Pulses counted so far in the current (or last) session.
    pub fn pulses(&self) -> u32 {
        self.counter.count()
    }

    /// Start one fill cycle. Valid only from `Idle`. An unknown size is a
    /// user-input error and leaves the state untouched; a motor-start
    /// failure transitions to `Failed` before any progress is emitted.
    pub fn start_filling(&self, size: &str) -> Result<(), DispenseError> {
        let (option, cmd_tx, cmd_rx) = {
            let mut shared = lock(&self.shared);
            if shared.state != FillState::Idle {
                return Err(DispenseError::AlreadyRunning);
            }
            // Reap the previous dispatcher; it exited when it set the
            // terminal state that `reset` cleared.
            if let Some(handle) = shared.dispatcher.take() {
                let _ = handle.join();
            }
            let option = self.table.lookup(size)?.clone();
            self.counter.reset(option.target_pulses)?;
            let (cmd_tx, cmd_rx) = xch::unbounded();
            shared.state = FillState::Filling;
            shared.session = Some(FillSession {
                option: option.clone(),
                started_at: Instant::now(),
            });
            shared.cmd_tx = Some(cmd_tx.clone());
            (option, cmd_tx, cmd_rx)
        };

        tracing::info!(
            size = %option.name,
            target = option.target_pulses,
            "fill start"
        );

        // Start the pump before sensing so a dead motor never emits progress.
        // Bound separately so the pump guard is released before the failure
        // path re-locks it to issue the fail-safe stop.
        let started = lock(&self.pump).start();
        if let Err(e) = started {
            self.fail_before_dispatch(&option, AbortReason::MotorStart, &e.to_string());
            return Err(DispenseError::MotorStartFailure(e.to_string()));
        }

        let sink: PulseSink = {
            let counter = self.counter.clone();
            let tx = cmd_tx;
            Arc::new(move || match counter.on_pulse() {
                PulseOutcome::Ignored => {}
                PulseOutcome::Progress(p) => {
                    let _ = tx.send(Command::Progress(p));
                }
                PulseOutcome::Complete { pulses } => {
                    let _ = tx.send(Command::Complete { pulses });
                }
            })
        };
        let attached = lock(&self.source).attach(sink);
        if let Err(e) = attached {
            let detail = e.to_string();
            self.fail_before_dispatch(&option, AbortReason::Internal(detail.clone()), &detail);
            return Err(DispenseError::Hardware(detail));
        }

        let dispatcher = Dispatcher {
            pump: Arc::clone(&self.pump),
            source: Arc::clone(&self.source),
            counter: self.counter.clone(),
            backend: Arc::clone(&self.backend),
            shared: Arc::clone(&self.shared),
            events_tx: self.events_tx.clone(),
        };
        let deadline = Instant::now() + self.max_fill;
        let handle = std::thread::spawn(move || dispatcher.run(cmd_rx, option, deadline));
        lock(&self.shared).dispatcher = Some(handle);
        Ok(())
    }

    /// Abort an in-flight fill. A no-op if the fill already reached a
    /// terminal state concurrently; an invariant violation from `Idle`.
    pub fn abort(&self, reason: AbortReason) -> Result<(), DispenseError> {
        let shared = lock(&self.shared);
        match shared.state {
            FillState::Filling => {
                if let Some(tx) = &shared.cmd_tx {
                    // A failed send means the dispatcher already went
                    // terminal; resolve the race as "ignore abort".
                    let _ = tx.send(Command::Abort(reason));
                }
                Ok(())
            }
            FillState::Completed | FillState::Failed => Ok(()),
            FillState::Idle => Err(DispenseError::State("no fill in progress".into())),
        }
    }

    /// Return a terminal controller to `Idle` for the next customer.
    pub fn reset(&self) -> Result<(), DispenseError> {
        let handle = {
            let mut shared = lock(&self.shared);
            if shared.state == FillState::Filling {
                return Err(DispenseError::State("fill in progress".into()));
            }
            shared.state = FillState::Idle;
            shared.session = None;
            shared.dispatcher.take()
        };
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        Ok(())
    }

    /// Terminal failure on the start path, before the dispatcher exists.
    fn fail_before_dispatch(&self, option: &VolumeOption, reason: AbortReason, detail: &str) {
        self.counter.disarm();
        if let Err(e) = lock(&self.pump).stop() {
            tracing::error!(error = %e, "pump stop failed after start failure");
        }
        {
            let mut shared = lock(&self.shared);
            shared.state = FillState::Failed;
            shared.cmd_tx = None;
        }
        tracing::error!(
            size = %option.name,
            target = option.target_pulses,
            error = detail,
            "fill failed before sensing started"
        );
        let _ = self.events_tx.send(FillEvent::Failed(reason.to_string()));
    }
}

impl Drop for DispenseController {
    fn drop(&mut self) {
        let handle = {
            let mut shared = lock(&self.shared);
            if shared.state == FillState::Filling
                && let Some(tx) = &shared.cmd_tx
            {
                let _ = tx.send(Command::Abort(AbortReason::Internal(
                    "controller shut down".into(),
                )));
            }
            shared.dispatcher.take()
        };
        if let Some(handle) = handle
            && handle.join().is_err()
        {
            tracing::warn!("dispatch thread panicked during shutdown");
        }
    }
}

/// Stops the pump on drop unless disarmed. Covers unwinds inside the
/// dispatch thread; the motor must never stay energized past the fill.
struct PumpGuard {
    pump: SharedPump,
    armed: bool,
}

impl PumpGuard {
    fn new(pump: SharedPump) -> Self {
        Self { pump, armed: true }
    }
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for PumpGuard {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = lock(&self.pump).stop()
        {
            tracing::error!(error = %e, "pump stop failed in dispatch guard");
        }
    }
}

struct Dispatcher {
    pump: SharedPump,
    source: SharedSource,
    counter: PulseCounter,
    backend: Arc<dyn Backend>,
    shared: Arc<Mutex<Shared>>,
    events_tx: xch::Sender<FillEvent>,
}

impl Dispatcher {
    fn run(self, rx: xch::Receiver<Command>, option: VolumeOption, deadline: Instant) {
        let guard = PumpGuard::new(Arc::clone(&self.pump));
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match rx.recv_timeout(remaining) {
                Ok(Command::Progress(p)) => {
                    // Snapshotted outside the counter lock; counts are
                    // monotonic, so so is the published sequence.
                    let _ = self.events_tx.send(FillEvent::Progress(p));
                }
                Ok(Command::Complete { pulses }) => {
                    self.finish_complete(&option, pulses);
                    break;
                }
                Ok(Command::Abort(reason)) => {
                    self.finish_failed(&option, reason);
                    break;
                }
                Err(xch::RecvTimeoutError::Timeout) => {
                    self.finish_failed(&option, AbortReason::MaxFillTime);
                    break;
                }
                Err(xch::RecvTimeoutError::Disconnected) => {
                    self.finish_failed(
                        &option,
                        AbortReason::Internal("pulse command channel closed".into()),
                    );
                    break;
                }
            }
        }
        guard.disarm();
    }

    fn finish_complete(&self, option: &VolumeOption, pulses: u32) {
        if let Err(e) = lock(&self.pump).stop() {
            tracing::warn!(error = %e, "pump stop failed on completion");
        }
        lock(&self.source).detach();
        {
            let mut shared = lock(&self.shared);
            if shared.state != FillState::Filling {
                return;
            }
            shared.state = FillState::Completed;
            shared.cmd_tx = None;
        }
        let record = SaleRecord {
            volume_ml: option.milliliters,
            price: option.price,
            recorded_at: SystemTime::now(),
        };
        tracing::info!(
            size = %option.name,
            pulses,
            target = option.target_pulses,
            volume_ml = record.volume_ml,
            price = record.price,
            "fill complete"
        );
        // Sale persistence is fire-and-report: the water is already
        // dispensed, so a failed report is logged, never propagated.
        let backend = Arc::clone(&self.backend);
        let report = record.clone();
        std::thread::spawn(move || {
            if !backend.record_sale(&report) {
                tracing::warn!(
                    volume_ml = report.volume_ml,
                    price = report.price,
                    "sale report failed; water already dispensed"
                );
            }
        });
        let _ = self.events_tx.send(FillEvent::Progress(100));
        let _ = self.events_tx.send(FillEvent::Completed(record));
    }

    fn finish_failed(&self, option: &VolumeOption, reason: AbortReason) {
        if let Err(e) = lock(&self.pump).stop() {
            tracing::warn!(error = %e, "pump stop failed on abort");
        }
        lock(&self.source).detach();
        self.counter.disarm();
        {
            let mut shared = lock(&self.shared);
            if shared.state != FillState::Filling {
                return;
            }
            shared.state = FillState::Failed;
            shared.cmd_tx = None;
        }
        tracing::error!(
            reason = %reason,
            size = %option.name,
            pulses = self.counter.count(),
            target = option.target_pulses,
            "fill aborted"
        );
        let _ = self.events_tx.send(FillEvent::Failed(reason.to_string()));
    }
}
