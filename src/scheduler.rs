//! Dirty Scheduler
//!
//! Adapter and device acquisition block until the native callback fires or
//! the timeout expires. Running that wait on the caller's thread would tie up
//! a host scheduler that other, prompt calls share, so such calls are moved
//! onto a pool of dedicated worker threads instead. The caller still sees
//! straight-line call/return semantics.
//!
//! The pool is elastic: `core` workers live as long as the scheduler, and a
//! job that finds every worker busy gets an overflow worker of its own, up to
//! `max` workers in total. Overflow workers exit after sitting idle for
//! [`OVERFLOW_LINGER`]. A slow or hung job therefore never holds up the jobs
//! queued behind it unless the pool is at its cap, and even then the caller of
//! [`DirtyScheduler::run_until`] gives up at its own deadline.
//!
//! Jobs travel over a `flume` channel; each job carries its own single-use
//! reply channel.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::errors::{BridgeError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// How long an overflow worker waits for another job before exiting.
pub const OVERFLOW_LINGER: Duration = Duration::from_secs(2);

/// Worker bookkeeping. Every job sent is matched by exactly one of: a claimed
/// idle worker, a freshly spawned worker, or a backlog slot.
#[derive(Debug, Default)]
struct PoolState {
    live: usize,
    idle: usize,
    backlog: usize,
    next_index: usize,
}

struct Pool {
    receiver: flume::Receiver<Job>,
    state: Mutex<PoolState>,
    core: usize,
    max: usize,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

/// A worker thread that cannot be started is a resource shortage, reported
/// like any other failed allocation.
fn spawn_failed(index: usize, err: &std::io::Error) -> BridgeError {
    log::error!("cannot spawn dirty worker {index}: {err}");
    BridgeError::AllocFailed
}

impl Pool {
    fn spawn_worker(self: &Arc<Self>, index: usize, core: bool) -> Result<()> {
        let pool = Arc::clone(self);
        let handle = thread::Builder::new()
            .name(format!("exdawn-dirty-{index}"))
            .spawn(move || pool.work(index, core))
            .map_err(|e| spawn_failed(index, &e))?;
        let mut handles = self.handles.lock();
        handles.retain(|h| !h.is_finished());
        handles.push(handle);
        Ok(())
    }

    fn work(&self, index: usize, core: bool) {
        loop {
            let job = if core {
                self.receiver.recv().ok()
            } else {
                match self.receiver.recv_timeout(OVERFLOW_LINGER) {
                    Ok(job) => Some(job),
                    Err(flume::RecvTimeoutError::Timeout) => {
                        let mut state = self.state.lock();
                        // A job may have been sent for this worker's idle slot
                        // between the timeout and the lock.
                        if let Ok(job) = self.receiver.try_recv() {
                            drop(state);
                            Some(job)
                        } else {
                            state.idle = state.idle.saturating_sub(1);
                            state.live = state.live.saturating_sub(1);
                            log::debug!("overflow worker {index} retiring");
                            return;
                        }
                    }
                    Err(flume::RecvTimeoutError::Disconnected) => None,
                }
            };
            let Some(job) = job else { break };
            job();

            let mut state = self.state.lock();
            if state.backlog > 0 {
                state.backlog -= 1;
            } else {
                state.idle += 1;
            }
        }
        log::debug!("dirty worker {index} exiting");
    }
}

/// Elastic pool of worker threads for blocking bridge calls.
pub struct DirtyScheduler {
    sender: Option<flume::Sender<Job>>,
    pool: Arc<Pool>,
}

impl DirtyScheduler {
    /// Spawns `core` permanent workers (at least one) and allows the pool to
    /// grow to `max` workers under load.
    pub fn new(core: usize, max: usize) -> Result<Self> {
        let core = core.max(1);
        let (sender, receiver) = flume::unbounded::<Job>();
        let pool = Arc::new(Pool {
            receiver,
            state: Mutex::new(PoolState::default()),
            core,
            max: max.max(core),
            handles: Mutex::new(Vec::new()),
        });
        for index in 0..core {
            pool.spawn_worker(index, true)?;
            let mut state = pool.state.lock();
            state.live += 1;
            state.idle += 1;
            state.next_index += 1;
        }
        log::debug!("dirty scheduler started: {core} core workers, at most {}", pool.max);
        Ok(Self {
            sender: Some(sender),
            pool,
        })
    }

    /// Workers currently alive, core and overflow.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.pool.state.lock().live
    }

    #[must_use]
    pub fn core_workers(&self) -> usize {
        self.pool.core
    }

    /// Runs `job` on a worker thread and blocks until it returns.
    pub fn run<R, F>(&self, job: F) -> Result<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let reply_rx = self.submit(job)?;
        reply_rx
            .recv()
            .map_err(|_| BridgeError::NotLoaded("dirty worker dropped the job".to_string()))
    }

    /// Like [`run`](Self::run), but stops waiting at `deadline`. Returns
    /// `None` if the job has not answered by then; its result, if it ever
    /// comes, is dropped.
    pub fn run_until<R, F>(&self, deadline: Instant, job: F) -> Result<Option<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let reply_rx = self.submit(job)?;
        match reply_rx.recv_deadline(deadline) {
            Ok(value) => Ok(Some(value)),
            Err(flume::RecvTimeoutError::Timeout) => Ok(None),
            Err(flume::RecvTimeoutError::Disconnected) => Err(BridgeError::NotLoaded(
                "dirty worker dropped the job".to_string(),
            )),
        }
    }

    fn submit<R, F>(&self, job: F) -> Result<flume::Receiver<R>>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| BridgeError::NotLoaded("dirty scheduler shut down".to_string()))?;
        let (reply_tx, reply_rx) = flume::bounded(1);
        let job: Job = Box::new(move || {
            // The caller may have given up; a closed reply channel is fine.
            let _ = reply_tx.send(job());
        });

        let mut state = self.pool.state.lock();
        if state.idle > 0 {
            state.idle -= 1;
        } else if state.live < self.pool.max {
            let index = state.next_index;
            self.pool.spawn_worker(index, false)?;
            state.next_index += 1;
            state.live += 1;
            log::debug!("dirty pool grew to {} workers", state.live);
        } else {
            state.backlog += 1;
            log::warn!("dirty pool saturated at {} workers, job queued", state.live);
        }
        // Sent under the state lock so a retiring worker sees it.
        sender
            .send(job)
            .map_err(|_| BridgeError::NotLoaded("dirty scheduler shut down".to_string()))?;
        drop(state);
        Ok(reply_rx)
    }
}

impl Drop for DirtyScheduler {
    fn drop(&mut self) {
        // Closing the job channel lets every worker drain and exit.
        self.sender.take();
        let handles = std::mem::take(&mut *self.pool.handles.lock());
        for worker in handles {
            if worker.join().is_err() {
                log::error!("dirty worker panicked");
            }
        }
    }
}
