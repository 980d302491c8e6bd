use std::collections::VecDeque;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::grid::{GridJob, JobId};
use crate::msg::{GridMessage, GridMessageType, Message};
use crate::network::NetworkHandle;
use crate::service::Service;
use crate::util;
use crate::{Error, Result};

/// Time a compute thread waits before retrying after failing to get a job.
const RETRY_DELAY: Duration = Duration::from_secs(1);

/// Result of computing a single job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobOutcome {
    pub correct: bool,
    pub result: Vec<u8>,
}

/// Computation run by the grid worker's threads.
pub trait GridThread: Send + Sync {
    /// Receives the static data shared by all the jobs, before any job is
    /// handed out.
    fn set_init_data(&self, data: &[u8]);

    fn compute(&self, job: &GridJob) -> Result<JobOutcome>;
}

/// Worker side of the grid.
///
/// All compute threads pull jobs from one shared queue, filled with the jobs
/// the coordinator sends.
pub struct GridClient {
    network: NetworkHandle,
    thread: Arc<dyn GridThread>,
    queue: Mutex<VecDeque<GridJob>>,
    job_ready: Condvar,
    /// Serializes `get_next_job` calls
    fetch: Mutex<()>,
    running: AtomicBool,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl GridClient {
    pub fn new(network: NetworkHandle, thread: Arc<dyn GridThread>) -> Self {
        Self {
            network,
            thread,
            queue: Mutex::new(VecDeque::new()),
            job_ready: Condvar::new(),
            fetch: Mutex::new(()),
            running: AtomicBool::new(true),
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Registers with the coordinator and starts the compute threads.
    pub fn initiate(self: &Arc<Self>, threads: usize) -> Result<()> {
        self.network
            .send_to_server(&Message::Grid(GridMessage::new(GridMessageType::Register)))?;
        let mut handles = util::lock(&self.handles);
        for n in 0..threads.max(1) {
            let client = self.clone();
            let handle = std::thread::Builder::new()
                .name(format!("ripple-grid-{}", n))
                .spawn(move || client.run())?;
            handles.push(handle);
        }
        info!("grid worker started with {} compute threads", handles.len());
        Ok(())
    }

    /// Takes the next job off the queue.
    ///
    /// If the queue is empty a single request for new data is sent to the
    /// coordinator and the call blocks until a job arrives.
    pub fn get_next_job(&self) -> Result<GridJob> {
        let _fetch = util::lock(&self.fetch);
        if !self.is_running() {
            return Err(Error::ShuttingDown);
        }
        if util::lock(&self.queue).is_empty() {
            trace!("job queue empty, requesting new data");
            self.network
                .send_to_server(&Message::Grid(GridMessage::new(GridMessageType::NewData)))?;
        }
        let mut queue = util::lock(&self.queue);
        loop {
            if let Some(job) = queue.pop_front() {
                return Ok(job);
            }
            if !self.is_running() {
                return Err(Error::ShuttingDown);
            }
            queue = util::wait(&self.job_ready, queue);
        }
    }

    /// Reports a computed job to the coordinator.
    pub fn job_done(&self, job_id: JobId, correct: bool, result: Vec<u8>) -> Result<()> {
        let type_ = if correct {
            GridMessageType::CompSuccessful
        } else {
            GridMessageType::CompIncorrect
        };
        self.network
            .send_to_server(&Message::Grid(GridMessage::with_data(type_, job_id, result)))
    }

    /// Reports a job that couldn't be computed, the coordinator will hand
    /// it out again.
    pub fn job_error(&self, job_id: JobId) -> Result<()> {
        self.network.send_to_server(&Message::Grid(GridMessage::with_job(
            GridMessageType::CompError,
            job_id,
        )))
    }

    /// Adds a job to the queue, waking up a waiting compute thread.
    pub fn push_job(&self, job: GridJob) {
        util::lock(&self.queue).push_back(job);
        self.job_ready.notify_one();
    }

    pub fn queued_jobs(&self) -> usize {
        util::lock(&self.queue).len()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Stops the compute threads, unregistering from the coordinator.
    ///
    /// Jobs in progress are finished and reported first.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        {
            // taking the lock makes sure no waiter misses the wakeup
            let _queue = util::lock(&self.queue);
            self.job_ready.notify_all();
        }
        let handles = util::lock(&self.handles).drain(..).collect::<Vec<_>>();
        let current = std::thread::current().id();
        for handle in handles {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                error!("grid compute thread panicked");
            }
        }
        if let Err(e) = self
            .network
            .send_to_server(&Message::Grid(GridMessage::new(GridMessageType::Unregister)))
        {
            debug!("failed unregistering from coordinator: {}", e);
        }
    }

    /// Compute thread loop.
    fn run(&self) {
        while self.is_running() {
            let job = match self.get_next_job() {
                Ok(job) => job,
                Err(Error::ShuttingDown) => break,
                Err(e) => {
                    warn!("failed getting next job: {}", e);
                    std::thread::sleep(RETRY_DELAY);
                    continue;
                }
            };
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.thread.compute(&job)))
                .unwrap_or_else(|_| Err(Error::Other("compute panicked".to_string())));
            let reported = match outcome {
                Ok(outcome) => self.job_done(job.job_id, outcome.correct, outcome.result),
                Err(e) => {
                    warn!("job {} failed: {}", job.job_id, e);
                    self.job_error(job.job_id)
                }
            };
            if let Err(e) = reported {
                warn!("failed reporting job {}: {}", job.job_id, e);
            }
        }
    }
}

impl Service for GridClient {
    fn handle_message(&self, message: &Message, remote: &SocketAddr) -> Result<()> {
        let grid = match message {
            Message::Grid(grid) => grid,
            _ => return Ok(()),
        };
        match grid.type_ {
            GridMessageType::InitData => {
                debug!("got init data from {}", remote);
                self.thread
                    .set_init_data(grid.data.as_deref().unwrap_or_default());
            }
            GridMessageType::CompData => match &grid.data {
                Some(data) => self.push_job(GridJob::new(grid.job_id, data.clone())),
                None => {
                    return Err(Error::UnexpectedMessage(format!(
                        "job {} without data",
                        grid.job_id
                    )))
                }
            },
            other => trace!("grid worker ignoring {:?} from {}", other, remote),
        }
        Ok(())
    }
}
