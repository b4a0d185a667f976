//! Calling-thread side of the request/response handshake.
//!
//! A call holds the message lock for its whole cycle, publishes its envelope
//! into the single-slot request channel, and waits on a private reply
//! channel. All three waits share one deadline, so a call never blocks for
//! longer than its timeout no matter where it gets stuck.

use std::sync::atomic::Ordering;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendTimeoutError, Sender};
use log::{debug, warn};
use parking_lot::{Mutex, MutexGuard};

use crate::envelope::{Envelope, Operation, ReplyResult};
use crate::error::EngineError;

/// Creates the single-slot request channel shared by callers and the owner.
pub(crate) fn request_channel() -> (Sender<Envelope>, Receiver<Envelope>) {
    bounded(1)
}

pub(crate) struct CallChannel {
    requests: Sender<Envelope>,
    message_lock: Mutex<()>,
}

impl CallChannel {
    pub(crate) fn new(requests: Sender<Envelope>) -> Self {
        CallChannel {
            requests,
            message_lock: Mutex::new(()),
        }
    }

    /// Runs one full request/response cycle.
    pub(crate) fn call(&self, operation: Operation, timeout: Option<Duration>) -> ReplyResult {
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        let kind = operation.kind();

        let _message = self.lock_message(deadline)?;

        let (reply_tx, reply_rx) = bounded(1);
        let envelope = Envelope::new(operation, reply_tx);
        let abandoned = envelope.abandon_flag();

        let published = match deadline {
            Some(deadline) => self.requests.send_deadline(envelope, deadline).map_err(|err| match err {
                SendTimeoutError::Timeout(_) => EngineError::Timeout,
                SendTimeoutError::Disconnected(_) => EngineError::NotRunning,
            }),
            None => self
                .requests
                .send(envelope)
                .map_err(|_| EngineError::NotRunning),
        };
        if let Err(err) = published {
            debug!("{kind} was not published: {err}");
            return Err(err);
        }

        let reply = match deadline {
            Some(deadline) => reply_rx.recv_deadline(deadline).map_err(|err| match err {
                RecvTimeoutError::Timeout => {
                    abandoned.store(true, Ordering::Release);
                    warn!("{kind} timed out waiting for the owner thread; request abandoned");
                    EngineError::Timeout
                }
                RecvTimeoutError::Disconnected => EngineError::NotRunning,
            }),
            None => reply_rx.recv().map_err(|_| EngineError::NotRunning),
        };
        reply?
    }

    fn lock_message(&self, deadline: Option<Instant>) -> Result<MutexGuard<'_, ()>, EngineError> {
        match deadline {
            Some(deadline) => self
                .message_lock
                .try_lock_until(deadline)
                .ok_or(EngineError::Timeout),
            None => Ok(self.message_lock.lock()),
        }
    }
}
