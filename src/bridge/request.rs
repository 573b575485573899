//! Callback-to-call bridging for adapter and device requests.
//!
//! A request moves `Idle → Requested → {Resolved, Failed, TimedOut}`. The
//! native completion callback and the waiting caller race for the terminal
//! state under one mutex, so exactly one of them decides the outcome:
//!
//! - callback first: the phase becomes `Resolved`/`Failed` and the status is
//!   sent over a single-slot channel the caller is waiting on
//! - timeout first: the phase becomes `TimedOut`; a callback arriving later
//!   sees that, sends nothing, and hands any delivered object to `discard`
//!
//! A timed-out request is never cancelled on the native side.
//!
//! The deadline is fixed when the host call enters, not when a worker picks
//! the request up, so time spent queued counts against the same bound. A
//! request whose deadline has already passed is never issued.

use std::sync::Arc;
use std::time::{Duration, Instant};

use flume::RecvTimeoutError;
use parking_lot::Mutex;

use crate::errors::BridgeError;
use crate::native::{RequestCallback, RequestStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestPhase {
    Idle,
    Requested,
    Resolved,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    Failed(String),
    TimedOut(Duration),
}

impl From<RequestError> for BridgeError {
    fn from(err: RequestError) -> Self {
        match err {
            RequestError::Failed(reason) => BridgeError::RequestFailed(reason),
            RequestError::TimedOut(after) => BridgeError::RequestTimedOut(after),
        }
    }
}

/// Extra time the caller allows a worker to report its own timeout.
const REPLY_GRACE: Duration = Duration::from_millis(25);

/// Bound on one acquisition, fixed when the host call enters.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    pub(crate) timeout: Duration,
    pub(crate) at: Instant,
}

impl Deadline {
    pub(crate) fn after(timeout: Duration) -> Self {
        let now = Instant::now();
        let at = now
            .checked_add(timeout)
            .unwrap_or_else(|| now + Duration::from_secs(60 * 60 * 24 * 365));
        Self { timeout, at }
    }

    /// When the caller stops waiting for the worker's reply.
    pub(crate) fn reply_by(self) -> Instant {
        self.at.checked_add(REPLY_GRACE).unwrap_or(self.at)
    }
}

/// Issues one native request and waits for its outcome.
///
/// `issue` must hand the callback to the native API. `discard` receives any
/// object delivered after the caller stopped waiting. `timeout` is the
/// configured bound reported on expiry; `deadline` is when it runs out.
pub(crate) fn acquire<T, I, D>(
    kind: &'static str,
    timeout: Duration,
    deadline: Instant,
    issue: I,
    discard: D,
) -> Result<T, RequestError>
where
    T: Send + 'static,
    I: FnOnce(RequestCallback<T>),
    D: FnOnce(T) + Send + 'static,
{
    if Instant::now() >= deadline {
        log::warn!("{kind} request expired in the queue, not issued");
        return Err(RequestError::TimedOut(timeout));
    }

    let phase = Arc::new(Mutex::new(RequestPhase::Idle));
    let (sender, receiver) = flume::bounded::<RequestStatus<T>>(1);

    let callback_phase = Arc::clone(&phase);
    let callback: RequestCallback<T> = Box::new(move |status| {
        let mut current = callback_phase.lock();
        if *current == RequestPhase::Requested {
            *current = match status {
                RequestStatus::Success(_) => RequestPhase::Resolved,
                RequestStatus::Failure(_) => RequestPhase::Failed,
            };
            log::debug!("{kind} request {:?}", *current);
            // Single-slot channel, single send: never blocks.
            let _ = sender.send(status);
            return;
        }
        let late = *current;
        drop(current);
        log::warn!("{kind} callback arrived after {late:?}, discarding result");
        if let RequestStatus::Success(value) = status {
            discard(value);
        }
    });

    *phase.lock() = RequestPhase::Requested;
    log::debug!("{kind} request issued");
    issue(callback);

    match receiver.recv_deadline(deadline) {
        Ok(status) => into_result(status),
        Err(RecvTimeoutError::Timeout) => {
            let mut current = phase.lock();
            if *current == RequestPhase::Requested {
                *current = RequestPhase::TimedOut;
                log::warn!("{kind} request timed out after {timeout:?}");
                return Err(RequestError::TimedOut(timeout));
            }
            drop(current);
            // The callback won the race between the timeout and the lock.
            receiver
                .try_recv()
                .map_or(Err(RequestError::TimedOut(timeout)), into_result)
        }
        Err(RecvTimeoutError::Disconnected) => {
            log::warn!("{kind} callback dropped without being called");
            Err(RequestError::Failed(format!("{kind} callback dropped")))
        }
    }
}

fn into_result<T>(status: RequestStatus<T>) -> Result<T, RequestError> {
    match status {
        RequestStatus::Success(value) => Ok(value),
        RequestStatus::Failure(reason) => Err(RequestError::Failed(reason)),
    }
}
