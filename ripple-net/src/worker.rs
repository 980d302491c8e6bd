//! Worker dispatch.
//!
//! Decoded messages leave the network's I/O thread as [`WorkerEvent`]s and
//! get processed by a [`Worker`] callback, by default on the threads of a
//! [`WorkerPool`].

use std::any::Any;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam_channel::{unbounded, Receiver, Sender};
use fnv::FnvHasher;

use crate::msg::Message;
use crate::network::NetworkHandle;
use crate::Result;

/// Single decoded message along with the connection it came from.
#[derive(Clone)]
pub struct WorkerEvent {
    /// Network the message was received on, can be used for replies
    pub network: NetworkHandle,
    pub remote: SocketAddr,
    pub message: Message,
}

/// Receives events straight from the network's I/O thread.
///
/// Implementations must return quickly, anything blocking here stalls all
/// the connections of the network.
pub trait Dispatch: Send {
    fn dispatch(&self, event: WorkerEvent);
}

/// Callback invoked once per decoded message.
pub trait Worker: Send + Sync + 'static {
    fn handle_event(&self, event: &WorkerEvent) -> Result<()>;
}

impl<W: Worker> Worker for Arc<W> {
    fn handle_event(&self, event: &WorkerEvent) -> Result<()> {
        (**self).handle_event(event)
    }
}

/// Wraps a closure so it can be used as a worker.
pub struct FnWorker<F>(pub F);

impl<F> Worker for FnWorker<F>
where
    F: Fn(&WorkerEvent) -> Result<()> + Send + Sync + 'static,
{
    fn handle_event(&self, event: &WorkerEvent) -> Result<()> {
        (self.0)(event)
    }
}

/// Number of worker threads used when not specified otherwise.
pub fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Pool of threads running a worker callback.
///
/// Each thread has its own lane. Events are assigned to lanes based on the
/// address of the originating connection, so events from one connection are
/// always processed in order of arrival. Events from different connections
/// may interleave.
pub struct WorkerPool<W: Worker> {
    worker: Arc<W>,
    lanes: Vec<Sender<WorkerEvent>>,
    handles: Vec<JoinHandle<()>>,
}

impl<W: Worker> WorkerPool<W> {
    /// Creates a pool with one thread per available processor.
    pub fn new(worker: W) -> Result<Self> {
        Self::with_threads(worker, default_threads())
    }

    pub fn with_threads(worker: W, threads: usize) -> Result<Self> {
        let worker = Arc::new(worker);
        let mut lanes = Vec::new();
        let mut handles = Vec::new();
        for n in 0..threads.max(1) {
            let (sender, receiver) = unbounded();
            let _worker = worker.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ripple-worker-{}", n))
                .spawn(move || run_lane(_worker, receiver))?;
            lanes.push(sender);
            handles.push(handle);
        }
        debug!("started worker pool with {} threads", lanes.len());
        Ok(Self {
            worker,
            lanes,
            handles,
        })
    }

    pub fn worker(&self) -> &Arc<W> {
        &self.worker
    }

    pub fn threads(&self) -> usize {
        self.handles.len()
    }

    /// Queues the event on the lane assigned to its connection.
    pub fn process(&self, event: WorkerEvent) {
        if self.lanes.is_empty() {
            warn!("worker pool is shut down, dropping event from {}", event.remote);
            return;
        }
        let lane = lane_for(&event.remote, self.lanes.len());
        if self.lanes[lane].send(event).is_err() {
            error!("worker lane {} is gone, dropping event", lane);
        }
    }

    /// Stops accepting events and waits for the threads to process what's
    /// already queued.
    pub fn shutdown(&mut self) {
        self.lanes.clear();
        for handle in self.handles.drain(..) {
            if handle.join().is_err() {
                error!("worker thread panicked outside of event handling");
            }
        }
    }
}

impl<W: Worker> Drop for WorkerPool<W> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl<W: Worker> Dispatch for WorkerPool<W> {
    fn dispatch(&self, event: WorkerEvent) {
        self.process(event)
    }
}

impl<D: Dispatch + Sync> Dispatch for Arc<D> {
    fn dispatch(&self, event: WorkerEvent) {
        (**self).dispatch(event)
    }
}

fn lane_for(addr: &SocketAddr, lanes: usize) -> usize {
    let mut hasher = FnvHasher::default();
    addr.hash(&mut hasher);
    (hasher.finish() % lanes as u64) as usize
}

fn run_lane<W: Worker>(worker: Arc<W>, events: Receiver<WorkerEvent>) {
    for event in events.iter() {
        match panic::catch_unwind(AssertUnwindSafe(|| worker.handle_event(&event))) {
            Ok(Ok(())) => (),
            Ok(Err(e)) => error!(
                "failed handling {:?} message from {}: {}",
                event.message.type_(),
                event.remote,
                e
            ),
            Err(panic) => error!(
                "worker panicked handling {:?} message from {}: {}",
                event.message.type_(),
                event.remote,
                panic_message(&panic)
            ),
        }
    }
}

fn panic_message(panic: &Box<dyn Any + Send>) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
