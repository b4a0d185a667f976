//! The owner thread: the only thread that ever touches sessions, the
//! backend, or the native event pump.

use std::any::Any;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, ThreadId};
use std::time::Duration;

use crossbeam_channel::{bounded, select, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use serde::Serialize;

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::envelope::{Envelope, Operation, Reply, ReplyResult};
use crate::error::EngineError;
use crate::handle::HandleCounter;
use crate::session::{Backend, EngineEnv, EventPump, PumpStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnerState {
    Initializing,
    Running,
    Draining,
    Stopped,
}

impl OwnerState {
    pub fn name(self) -> &'static str {
        match self {
            OwnerState::Initializing => "initializing",
            OwnerState::Running => "running",
            OwnerState::Draining => "draining",
            OwnerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for OwnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StateCell(Arc<Mutex<OwnerState>>);

impl StateCell {
    pub(crate) fn new(state: OwnerState) -> Self {
        StateCell(Arc::new(Mutex::new(state)))
    }

    pub(crate) fn get(&self) -> OwnerState {
        *self.0.lock()
    }

    fn set(&self, state: OwnerState) {
        let previous = std::mem::replace(&mut *self.0.lock(), state);
        debug!("owner thread {previous} -> {state}");
    }
}

/// Everything the owner thread takes with it when it is spawned.
pub(crate) struct OwnerContext {
    pub(crate) backend: Arc<dyn Backend>,
    pub(crate) env: EngineEnv,
    pub(crate) config: EngineConfig,
    pub(crate) counter: HandleCounter,
    pub(crate) sequence: Arc<AtomicU64>,
    pub(crate) state: StateCell,
    pub(crate) running: Arc<AtomicBool>,
}

enum StopReason {
    Shutdown(Sender<ReplyResult>),
    PumpQuit,
    UserEnd,
    Disconnected,
}

impl StopReason {
    fn describe(&self) -> &'static str {
        match self {
            StopReason::Shutdown(_) => "shutdown requested",
            StopReason::PumpQuit => "event loop quit",
            StopReason::UserEnd => "last window closed",
            StopReason::Disconnected => "engine handle dropped",
        }
    }
}

/// An owner thread that has been spawned but has not reported ready yet.
pub(crate) struct Starting {
    handle: JoinHandle<()>,
    ready: Receiver<Result<(), String>>,
    timeout: Duration,
}

impl Starting {
    pub(crate) fn thread_id(&self) -> ThreadId {
        self.handle.thread().id()
    }

    /// Blocks until the owner thread reports ready, fails, or the start-up
    /// timeout expires.
    pub(crate) fn wait_ready(self) -> Result<JoinHandle<()>, EngineError> {
        match self.ready.recv_timeout(self.timeout) {
            Ok(Ok(())) => Ok(self.handle),
            Ok(Err(message)) => {
                let _ = self.handle.join();
                Err(EngineError::Startup(message))
            }
            Err(RecvTimeoutError::Timeout) => Err(EngineError::Startup(format!(
                "owner thread did not become ready within {} ms",
                self.timeout.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                let _ = self.handle.join();
                Err(EngineError::Startup(
                    "owner thread exited during start-up".to_string(),
                ))
            }
        }
    }
}

/// Spawns the owner thread. Readiness is awaited separately through
/// [`Starting::wait_ready`].
pub(crate) fn spawn(
    ctx: OwnerContext,
    requests: Receiver<Envelope>,
) -> Result<Starting, EngineError> {
    let timeout = ctx.config.startup_timeout();
    let (ready_tx, ready) = bounded::<Result<(), String>>(1);
    let state = ctx.state.clone();
    state.set(OwnerState::Initializing);

    let handle = thread::Builder::new()
        .name(ctx.config.thread_name.clone())
        .spawn(move || run(ctx, requests, ready_tx))
        .map_err(|err| {
            state.set(OwnerState::Stopped);
            EngineError::Startup(format!("failed to spawn owner thread: {err}"))
        })?;
    Ok(Starting {
        handle,
        ready,
        timeout,
    })
}

fn run(ctx: OwnerContext, requests: Receiver<Envelope>, ready: Sender<Result<(), String>>) {
    let backend = ctx.backend.clone();
    let pump = match catch_unwind(AssertUnwindSafe(|| backend.create_pump())) {
        Ok(Ok(pump)) => pump,
        Ok(Err(err)) => {
            ctx.state.set(OwnerState::Stopped);
            let _ = ready.send(Err(format!("event loop setup failed: {err}")));
            return;
        }
        Err(payload) => {
            ctx.state.set(OwnerState::Stopped);
            let _ = ready.send(Err(format!(
                "event loop setup panicked: {}",
                panic_message(payload.as_ref())
            )));
            return;
        }
    };

    let mut dispatcher = Dispatcher::new(
        ctx.backend.clone(),
        ctx.env.clone(),
        ctx.counter.clone(),
        ctx.sequence.clone(),
    );
    ctx.running.store(true, Ordering::Release);
    ctx.state.set(OwnerState::Running);
    info!("owner thread {:?} running", thread::current().id());
    if ready.send(Ok(())).is_err() {
        warn!("engine stopped waiting for the owner thread before it was ready");
    }
    drop(ready);

    let mut pump = pump;
    let reason = serve(&ctx, &requests, pump.as_mut(), &mut dispatcher);
    drain(&ctx, &requests, dispatcher, pump, reason);
}

fn serve(
    ctx: &OwnerContext,
    requests: &Receiver<Envelope>,
    pump: &mut dyn EventPump,
    dispatcher: &mut Dispatcher,
) -> StopReason {
    let slice = ctx.config.pump_slice();
    let poll = ctx.config.poll_interval();

    loop {
        let status = match catch_unwind(AssertUnwindSafe(|| pump.pump(slice))) {
            Ok(status) => status,
            Err(payload) => {
                error!("event pump panicked: {}", panic_message(payload.as_ref()));
                PumpStatus::Quit
            }
        };
        if status == PumpStatus::Quit {
            return StopReason::PumpQuit;
        }
        if dispatcher.user_end_allowed() && !dispatcher.has_open_windows() {
            return StopReason::UserEnd;
        }

        let message = select! {
            recv(requests) -> message => Some(message),
            default(poll) => None,
        };
        let envelope = match message {
            None => continue,
            Some(Ok(envelope)) => envelope,
            Some(Err(_)) => return StopReason::Disconnected,
        };
        if envelope.is_abandoned() {
            debug!("skipping abandoned {} request", envelope.kind());
            continue;
        }

        let (operation, reply) = envelope.into_parts();
        if matches!(operation, Operation::Shutdown) {
            return StopReason::Shutdown(reply);
        }
        let kind = operation.kind();
        let result = match catch_unwind(AssertUnwindSafe(|| dispatcher.dispatch(operation))) {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!("{kind} panicked on the owner thread: {message}");
                Err(EngineError::Panicked {
                    operation: kind.name(),
                    message,
                })
            }
        };
        if reply.send(result).is_err() {
            debug!("caller of {kind} gave up before the reply arrived");
        }
    }
}

fn drain(
    ctx: &OwnerContext,
    requests: &Receiver<Envelope>,
    mut dispatcher: Dispatcher,
    pump: Box<dyn EventPump>,
    reason: StopReason,
) {
    ctx.running.store(false, Ordering::Release);
    ctx.state.set(OwnerState::Draining);
    info!("owner thread draining: {}", reason.describe());

    for envelope in requests.try_iter() {
        let (_, reply) = envelope.into_parts();
        let _ = reply.send(Err(EngineError::NotRunning));
    }

    for handle in dispatcher.handles() {
        match catch_unwind(AssertUnwindSafe(|| dispatcher.destroy(handle))) {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!("destroying window {handle} during shutdown failed: {err}"),
            Err(payload) => error!(
                "destroying window {handle} during shutdown panicked: {}",
                panic_message(payload.as_ref())
            ),
        }
    }
    if let Err(payload) = catch_unwind(AssertUnwindSafe(|| dispatcher.finalize_if_needed())) {
        error!(
            "backend finalization panicked: {}",
            panic_message(payload.as_ref())
        );
    }
    drop(pump);
    drop(dispatcher);

    ctx.state.set(OwnerState::Stopped);
    info!("owner thread stopped");
    if let StopReason::Shutdown(reply) = reason {
        let _ = reply.send(Ok(Reply::Done));
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
