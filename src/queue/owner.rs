//! Single-owner coordination loop for the queue.
//!
//! The persister is not threadsafe, so exactly one thread owns it and
//! everything else talks to that thread over channels. Push is
//! synchronous because callers need the durability acknowledgement; done
//! is fire-and-forget because acknowledgement cannot fail the caller's
//! work.

use std::sync::Mutex;
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam::channel::{bounded, Receiver, Sender};

use super::job::Job;
use super::persister::JournalPersister;
use super::{QueueError, QueueResult};

const REQUEST_BUFFER: usize = 100;

struct PushRequest {
    job: Job,
    reply: Sender<QueueResult<Job>>,
}

struct Pending {
    persister: JournalPersister,
    push_rx: Receiver<PushRequest>,
    done_rx: Receiver<Job>,
    get_tx: Sender<Job>,
    shutdown_rx: Receiver<()>,
}

/// Handle to a journaled job queue driven by a single owner thread.
///
/// Shareable across threads behind an `Arc`; all methods take `&self`.
pub struct JobQueue {
    push_tx: Sender<PushRequest>,
    done_tx: Sender<Job>,
    get_rx: Receiver<Job>,
    shutdown_tx: Sender<()>,
    pending: Mutex<Option<Pending>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl JobQueue {
    pub fn new(persister: JournalPersister) -> Self {
        let (push_tx, push_rx) = bounded(REQUEST_BUFFER);
        let (done_tx, done_rx) = bounded(REQUEST_BUFFER);
        // Rendezvous channel: the loop only offers when it has a job.
        let (get_tx, get_rx) = bounded(0);
        let (shutdown_tx, shutdown_rx) = bounded(1);
        JobQueue {
            push_tx,
            done_tx,
            get_rx,
            shutdown_tx,
            pending: Mutex::new(Some(Pending {
                persister,
                push_rx,
                done_rx,
                get_tx,
                shutdown_rx,
            })),
            handle: Mutex::new(None),
        }
    }

    /// Start the owner thread. Idempotent; later calls do nothing.
    pub fn start(&self) {
        let pending = self
            .pending
            .lock()
            .expect("job queue state lock poisoned")
            .take();
        let Some(pending) = pending else {
            return;
        };
        let handle = std::thread::spawn(move || run(pending));
        let mut slot = self.handle.lock().expect("job queue state lock poisoned");
        *slot = Some(handle);
    }

    /// Persist a job and return it with its assigned id. Blocks until the
    /// owner loop has durably appended it.
    pub fn push(&self, payload: impl Into<Bytes>) -> QueueResult<Job> {
        let (reply_tx, reply_rx) = bounded(1);
        let request = PushRequest {
            job: Job::new(payload.into()),
            reply: reply_tx,
        };
        self.push_tx
            .send(request)
            .map_err(|_| QueueError::NotRunning)?;
        reply_rx.recv().map_err(|_| QueueError::NotRunning)?
    }

    /// Block until a job is available. Returns `None` once the queue has
    /// shut down.
    pub fn get(&self) -> Option<Job> {
        self.get_rx.recv().ok()
    }

    /// Non-blocking probe: a job if the loop is currently offering one.
    pub fn try_get(&self) -> Option<Job> {
        self.get_rx.try_recv().ok()
    }

    /// Acknowledge a delivered job. Fire-and-forget.
    pub fn done(&self, job: Job) {
        if self.done_tx.send(job).is_err() {
            tracing::warn!("acknowledgement dropped: job queue is not running");
        }
    }

    /// Stop the owner loop and wait for it to finish. Blocked getters
    /// observe `None`.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        let handle = self
            .handle
            .lock()
            .expect("job queue state lock poisoned")
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}

fn run(pending: Pending) {
    let Pending {
        mut persister,
        push_rx,
        done_rx,
        get_tx,
        shutdown_rx,
    } = pending;

    // One-job look-ahead. While it is empty the loop does not offer on
    // the get channel, so a getter can never observe a spurious empty
    // delivery: the persister shows a push to the very next get.
    let mut next_get = fetch(&mut persister);
    loop {
        if let Some(job) = next_get.clone() {
            crossbeam::select! {
                recv(push_rx) -> msg => match msg {
                    Ok(request) => handle_push(&mut persister, request),
                    Err(_) => break,
                },
                recv(done_rx) -> msg => match msg {
                    Ok(job) => handle_done(&mut persister, &job),
                    Err(_) => break,
                },
                send(get_tx, job) -> result => match result {
                    Ok(()) => next_get = fetch(&mut persister),
                    Err(_) => break,
                },
                recv(shutdown_rx) -> _msg => break,
            }
        } else {
            crossbeam::select! {
                recv(push_rx) -> msg => match msg {
                    Ok(request) => {
                        handle_push(&mut persister, request);
                        next_get = fetch(&mut persister);
                    }
                    Err(_) => break,
                },
                recv(done_rx) -> msg => match msg {
                    Ok(job) => handle_done(&mut persister, &job),
                    Err(_) => break,
                },
                recv(shutdown_rx) -> _msg => break,
            }
        }
    }
}

fn handle_push(persister: &mut JournalPersister, request: PushRequest) {
    let PushRequest { mut job, reply } = request;
    let result = persister.push(&mut job).map(|()| job);
    if reply.send(result).is_err() {
        tracing::warn!("push caller went away before receiving its result");
    }
}

fn handle_done(persister: &mut JournalPersister, job: &Job) {
    if let Err(err) = persister.done(job) {
        tracing::warn!(id = job.id(), "acknowledgement failed: {err}");
    }
}

fn fetch(persister: &mut JournalPersister) -> Option<Job> {
    match persister.get() {
        Ok(job) => job,
        Err(err) => {
            tracing::warn!("job queue read failed: {err}");
            None
        }
    }
}
