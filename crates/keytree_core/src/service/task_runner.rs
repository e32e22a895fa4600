//! Off-thread execution of mutation commands.
//!
//! # Responsibility
//! - Run one command on a worker thread while reporting indeterminate progress.
//! - Deliver the command result exactly once over a single-shot channel.
//!
//! # Invariants
//! - At most one command is in flight per runner; a second `run` is refused,
//!   never queued.
//! - Completion is delivered only after the command's save step returned.
//! - The in-flight flag is cleared before completion becomes observable.

use crate::service::mutation::{MutationCommand, MutationResult};
use crate::service::store::StoreHandle;
use log::{debug, error};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

/// Progress label shown while a command runs.
pub const SAVING_LABEL: &str = "saving database";

/// Receives the indeterminate progress signal of a running command.
pub trait ProgressObserver: Send {
    fn on_start(&self, label: &str);
    fn on_finish(&self);
}

impl<P: ProgressObserver + Sync + ?Sized> ProgressObserver for Arc<P> {
    fn on_start(&self, label: &str) {
        (**self).on_start(label);
    }

    fn on_finish(&self) {
        (**self).on_finish();
    }
}

/// Observer that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressObserver for NoProgress {
    fn on_start(&self, _label: &str) {}

    fn on_finish(&self) {}
}

/// Errors from scheduling a command or collecting its result.
#[derive(Debug)]
pub enum RunnerError {
    /// Another command is still running.
    Busy,
    /// Worker thread could not be spawned.
    Spawn(std::io::Error),
    /// Worker ended without delivering a result.
    Disconnected,
}

impl Display for RunnerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Busy => write!(f, "another change is still being saved"),
            Self::Spawn(err) => write!(f, "failed to start worker: {err}"),
            Self::Disconnected => write!(f, "worker ended without a result"),
        }
    }
}

impl Error for RunnerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Spawn(err) => Some(err),
            Self::Busy | Self::Disconnected => None,
        }
    }
}

/// Handle to the single result of one dispatched command.
#[derive(Debug)]
pub struct PendingMutation {
    op: &'static str,
    rx: Receiver<MutationResult>,
    delivered: bool,
}

impl PendingMutation {
    pub fn op_name(&self) -> &'static str {
        self.op
    }

    /// Blocks until the command finished.
    pub fn wait(self) -> Result<MutationResult, RunnerError> {
        self.rx.recv().map_err(|_| RunnerError::Disconnected)
    }

    /// Returns the result if the command finished; yields it at most once.
    pub fn try_take(&mut self) -> Option<Result<MutationResult, RunnerError>> {
        if self.delivered {
            return None;
        }
        let polled = match self.rx.try_recv() {
            Ok(result) => Ok(result),
            Err(TryRecvError::Empty) => return None,
            Err(TryRecvError::Disconnected) => Err(RunnerError::Disconnected),
        };
        self.delivered = true;
        Some(polled)
    }
}

/// Clears the in-flight flag when the worker is done or was never started.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs mutation commands against one store off the calling thread.
#[derive(Debug, Clone)]
pub struct TaskRunner {
    store: StoreHandle,
    in_flight: Arc<AtomicBool>,
}

impl TaskRunner {
    pub fn new(store: StoreHandle) -> Self {
        Self {
            store,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// `true` while a dispatched command has not finished.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Starts `command` and returns the handle to its result.
    ///
    /// # Errors
    /// - `Busy` when another command is still running.
    /// - `Spawn` when the worker thread cannot start.
    pub fn run(
        &self,
        command: MutationCommand,
        progress: impl ProgressObserver + 'static,
    ) -> Result<PendingMutation, RunnerError> {
        let op = command.op_name();
        let (tx, rx) = mpsc::sync_channel(1);
        self.spawn(command, progress, move |result| {
            // Receiver may be gone if the caller dropped the handle.
            let _ = tx.send(result);
        })?;
        Ok(PendingMutation {
            op,
            rx,
            delivered: false,
        })
    }

    /// Starts `command` and calls `on_complete` exactly once on the worker.
    pub fn run_with_callback(
        &self,
        command: MutationCommand,
        progress: impl ProgressObserver + 'static,
        on_complete: impl FnOnce(MutationResult) + Send + 'static,
    ) -> Result<(), RunnerError> {
        self.spawn(command, progress, on_complete)
    }

    fn spawn(
        &self,
        command: MutationCommand,
        progress: impl ProgressObserver + 'static,
        on_complete: impl FnOnce(MutationResult) + Send + 'static,
    ) -> Result<(), RunnerError> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(
                "event=task_run module=service status=rejected op={} reason=busy",
                command.op_name()
            );
            return Err(RunnerError::Busy);
        }

        let guard = InFlightGuard(Arc::clone(&self.in_flight));
        let store = self.store.clone();
        let op = command.op_name();
        thread::Builder::new()
            .name(format!("keytree-{op}"))
            .spawn(move || {
                progress.on_start(SAVING_LABEL);
                let result = command.execute(&store);
                progress.on_finish();
                drop(guard);
                on_complete(result);
            })
            .map(|_| ())
            .map_err(|err| {
                error!("event=task_run module=service status=error op={op} error={err}");
                RunnerError::Spawn(err)
            })
    }
}
