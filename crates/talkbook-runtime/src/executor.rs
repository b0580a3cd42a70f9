#![forbid(unsafe_code)]

//! Dedicated document owner thread.
//!
//! Document state ([`Presentation`](crate::Presentation), navigation
//! indexes, hook hosts) is built on `Rc`/`RefCell` and is therefore
//! `!Send`: the compiler already forbids touching it from another thread.
//! [`DocumentExecutor`] gives that state a home. The state is constructed
//! *on* the worker thread and every access is a job marshalled onto it.
//!
//! ```text
//!   UI / background threads                 owner thread
//!   ───────────────────────                 ──────────────────────────────
//!   handle.post(job) ───► sync_channel ───► job(&mut state)   (FIFO)
//!   handle.call(job) ───►       │       ──► result ──► oneshot ──► caller
//! ```
//!
//! # Failure Modes
//!
//! - **Self-call**: `call` from the owner thread would wait on itself; it
//!   returns [`ExecutorError::WouldDeadlock`] instead.
//! - **Self-post on a full queue**: `post` from the owner thread never
//!   blocks. Jobs that do not fit in the channel go to an owner-side
//!   overflow queue, drained before the worker waits on the channel again.
//! - **Panicking job**: the worker unwinds and exits. Later posts and calls
//!   report [`ExecutorError::Disconnected`].

use std::collections::VecDeque;
use std::fmt;
use std::sync::mpsc::{self, TrySendError};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};

use thiserror::Error;
use tracing::{debug, info, trace, trace_span};

use crate::config::ExecutorConfig;

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;

enum ExecMsg<S> {
    Run(Job<S>),
    Shutdown,
}

/// Jobs posted by the owner thread while the channel was full.
type Overflow<S> = Arc<Mutex<VecDeque<Job<S>>>>;

fn pop_overflow<S>(overflow: &Overflow<S>) -> Option<Job<S>> {
    overflow
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .pop_front()
}

/// Errors from [`DocumentExecutor`] and [`ExecutorHandle`].
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("failed to spawn document thread: {0}")]
    Spawn(#[from] std::io::Error),

    /// The worker has stopped (shut down or panicked).
    #[error("document thread is no longer running")]
    Disconnected,

    /// A blocking call was made from the owner thread itself.
    #[error("blocking call from the document thread would deadlock")]
    WouldDeadlock,
}

/// Cloneable, `Send` handle for scheduling work on the owner thread.
pub struct ExecutorHandle<S> {
    sender: mpsc::SyncSender<ExecMsg<S>>,
    overflow: Overflow<S>,
    owner: ThreadId,
}

impl<S> Clone for ExecutorHandle<S> {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            overflow: Arc::clone(&self.overflow),
            owner: self.owner,
        }
    }
}

impl<S> fmt::Debug for ExecutorHandle<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutorHandle")
            .field("owner", &self.owner)
            .finish()
    }
}

impl<S: 'static> ExecutorHandle<S> {
    /// Whether the current thread is the owner thread.
    #[must_use]
    pub fn is_owner_thread(&self) -> bool {
        thread::current().id() == self.owner
    }

    /// Queue `job` to run on the owner thread. Jobs from one thread run in
    /// posting order.
    ///
    /// Other threads block while the queue is full. The owner thread never
    /// blocks: its job runs after the current one.
    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) -> Result<(), ExecutorError> {
        let job: Job<S> = Box::new(job);
        if !self.is_owner_thread() {
            return self
                .sender
                .send(ExecMsg::Run(job))
                .map_err(|_| ExecutorError::Disconnected);
        }
        let mut overflow = self.overflow.lock().unwrap_or_else(PoisonError::into_inner);
        if !overflow.is_empty() {
            overflow.push_back(job);
            return Ok(());
        }
        match self.sender.try_send(ExecMsg::Run(job)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(ExecMsg::Run(job))) => {
                trace!(queued = overflow.len() + 1, "job queue full, job deferred on owner");
                overflow.push_back(job);
                Ok(())
            }
            Err(TrySendError::Full(ExecMsg::Shutdown)) => Ok(()),
            Err(TrySendError::Disconnected(_)) => Err(ExecutorError::Disconnected),
        }
    }

    /// Run `job` on the owner thread and wait for its result.
    pub fn call<R, F>(&self, job: F) -> Result<R, ExecutorError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_owner_thread() {
            return Err(ExecutorError::WouldDeadlock);
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.post(move |state| {
            let _ = tx.send(job(state));
        })?;
        rx.recv().map_err(|_| ExecutorError::Disconnected)
    }
}

/// Owns a worker thread and the `!Send` state living on it.
///
/// Dropping the executor stops the worker after the already-queued jobs
/// and joins it.
pub struct DocumentExecutor<S> {
    handle: ExecutorHandle<S>,
    thread: Option<JoinHandle<()>>,
}

impl<S> fmt::Debug for DocumentExecutor<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentExecutor")
            .field("owner", &self.handle.owner)
            .field("running", &self.thread.is_some())
            .finish()
    }
}

impl<S: 'static> DocumentExecutor<S> {
    /// Spawn the worker and build the state on it with `init`.
    pub fn spawn<F>(config: &ExecutorConfig, init: F) -> Result<Self, ExecutorError>
    where
        F: FnOnce() -> S + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel::<ExecMsg<S>>(config.queue_capacity.max(1));
        let overflow: Overflow<S> = Arc::new(Mutex::new(VecDeque::new()));
        let worker_overflow = Arc::clone(&overflow);
        let name = config.thread_name.clone();
        let thread = thread::Builder::new()
            .name(name.clone())
            .spawn(move || run_loop(init, rx, worker_overflow))?;
        info!(thread = name.as_str(), "document thread started");
        Ok(Self {
            handle: ExecutorHandle {
                sender: tx,
                overflow,
                owner: thread.thread().id(),
            },
            thread: Some(thread),
        })
    }

    /// A handle that can be moved to other threads.
    #[must_use]
    pub fn handle(&self) -> ExecutorHandle<S> {
        self.handle.clone()
    }

    #[must_use]
    pub fn is_owner_thread(&self) -> bool {
        self.handle.is_owner_thread()
    }

    pub fn post(&self, job: impl FnOnce(&mut S) + Send + 'static) -> Result<(), ExecutorError> {
        self.handle.post(job)
    }

    pub fn call<R, F>(&self, job: F) -> Result<R, ExecutorError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        self.handle.call(job)
    }

    /// Stop after queued jobs and join the worker.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl<S> Drop for DocumentExecutor<S> {
    fn drop(&mut self) {
        let _ = self.handle.sender.send(ExecMsg::Shutdown);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
            debug!("document thread joined");
        }
    }
}

fn run_loop<S, F: FnOnce() -> S>(
    init: F,
    rx: mpsc::Receiver<ExecMsg<S>>,
    overflow: Overflow<S>,
) {
    let mut state = init();
    let mut jobs: u64 = 0;
    let mut run = |job: Job<S>, state: &mut S| {
        jobs += 1;
        let _span = trace_span!("talkbook.executor.job", seq = jobs).entered();
        job(state);
    };
    loop {
        // Channel first: overflow jobs were posted after it filled up.
        let msg = match rx.try_recv() {
            Ok(msg) => msg,
            Err(mpsc::TryRecvError::Empty) => match pop_overflow(&overflow) {
                Some(job) => {
                    run(job, &mut state);
                    continue;
                }
                None => match rx.recv() {
                    Ok(msg) => msg,
                    Err(_) => break,
                },
            },
            Err(mpsc::TryRecvError::Disconnected) => break,
        };
        match msg {
            ExecMsg::Run(job) => run(job, &mut state),
            ExecMsg::Shutdown => break,
        }
    }
    while let Some(job) = pop_overflow(&overflow) {
        run(job, &mut state);
    }
    debug!(jobs, "document thread stopping");
}
