use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fnv::FnvHashMap;

use crate::grid::{GridJob, JobId};
use crate::msg::{GridMessage, GridMessageType, Message};
use crate::network::NetworkHandle;
use crate::service::Service;
use crate::util::{self, Ticker};
use crate::Result;

/// Produces the jobs handed out by the coordinator.
pub trait GridJobGenerator: Send + Sync {
    /// Static data sent to every worker once, when it registers.
    fn init_values(&self) -> Vec<u8>;

    fn generate_job(&self) -> Vec<u8>;
}

/// Receives the results reported by workers.
pub trait GridResultHandler: Send + Sync {
    fn result_event(&self, job_id: JobId, correct: bool, result: Option<&[u8]>);

    /// Called when a job is given up on after failing on workers too many
    /// times.
    fn job_failed(&self, _job_id: JobId) {}
}

/// Configuration settings for a grid coordinator.
#[derive(Debug, Clone)]
pub struct GridConfig {
    /// Jobs not reported back within this time are handed out again
    pub job_timeout: Duration,
    /// Interval at which outstanding jobs are checked for timeouts
    pub maintenance_interval: Duration,
    /// Jobs reported as failed after being handed out this many times are
    /// dropped
    pub max_attempts: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(30 * 60),
            maintenance_interval: Duration::from_secs(60),
            max_attempts: 3,
        }
    }
}

struct GridState {
    /// Jobs handed out and not yet reported
    jobs: FnvHashMap<JobId, GridJob>,
    resend_queue: VecDeque<JobId>,
    next_job_id: JobId,
}

/// Coordinator side of the grid.
pub struct GridServer {
    network: NetworkHandle,
    config: GridConfig,
    generator: Box<dyn GridJobGenerator>,
    results: Box<dyn GridResultHandler>,
    state: Mutex<GridState>,
}

impl GridServer {
    pub fn new<G, R>(network: NetworkHandle, generator: G, results: R) -> Self
    where
        G: GridJobGenerator + 'static,
        R: GridResultHandler + 'static,
    {
        Self::with_config(network, generator, results, GridConfig::default())
    }

    pub fn with_config<G, R>(network: NetworkHandle, generator: G, results: R, config: GridConfig) -> Self
    where
        G: GridJobGenerator + 'static,
        R: GridResultHandler + 'static,
    {
        Self {
            network,
            config,
            generator: Box::new(generator),
            results: Box::new(results),
            state: Mutex::new(GridState {
                jobs: FnvHashMap::default(),
                resend_queue: VecDeque::new(),
                next_job_id: 0,
            }),
        }
    }

    /// Starts the thread periodically putting timed out jobs up for
    /// resending. Runs until the returned ticker is dropped.
    pub fn start_maintainer(self: &Arc<Self>) -> Result<Ticker> {
        let server = self.clone();
        Ticker::start(
            "ripple-grid-maintainer",
            self.config.maintenance_interval,
            move || {
                let requeued = server.requeue_stale_jobs();
                if requeued > 0 {
                    info!("{} timed out jobs queued for resending", requeued);
                }
            },
        )
    }

    /// Queues jobs older than the job timeout for resending, oldest first.
    /// Returns the number of jobs queued.
    pub fn requeue_stale_jobs(&self) -> usize {
        let mut state = util::lock(&self.state);
        let mut stale = state
            .jobs
            .values()
            .filter(|job| job.age() > self.config.job_timeout)
            .filter(|job| !state.resend_queue.contains(&job.job_id))
            .map(|job| (job.timestamp, job.job_id))
            .collect::<Vec<_>>();
        stale.sort();
        let count = stale.len();
        state.resend_queue.extend(stale.into_iter().map(|(_, id)| id));
        count
    }

    /// Hands out a job, preferring jobs waiting to be resent.
    pub fn next_job(&self) -> GridJob {
        let mut state = util::lock(&self.state);
        while let Some(id) = state.resend_queue.pop_front() {
            // jobs reported in the meantime are gone from the map
            if let Some(job) = state.jobs.get_mut(&id) {
                job.renew_timestamp();
                job.attempts += 1;
                trace!("resending job {} (attempt {})", id, job.attempts);
                return job.clone();
            }
        }
        let id = state.next_job_id;
        state.next_job_id = state.next_job_id.wrapping_add(1);
        let mut job = GridJob::new(id, self.generator.generate_job());
        job.attempts = 1;
        state.jobs.insert(id, job.clone());
        job
    }

    /// Number of jobs handed out and not reported back yet.
    pub fn outstanding_jobs(&self) -> usize {
        util::lock(&self.state).jobs.len()
    }

    pub fn queued_for_resend(&self) -> usize {
        util::lock(&self.state).resend_queue.len()
    }

    fn retire_job(&self, job_id: JobId) -> bool {
        util::lock(&self.state).jobs.remove(&job_id).is_some()
    }

    /// Queues a failed job for resending, or drops it if it already used up
    /// its attempts.
    fn job_error(&self, job_id: JobId, remote: &SocketAddr) {
        let mut state = util::lock(&self.state);
        let attempts = match state.jobs.get(&job_id) {
            Some(job) => job.attempts,
            None => {
                debug!("ignoring error for unknown job {} from {}", job_id, remote);
                return;
            }
        };
        if attempts >= self.config.max_attempts {
            state.jobs.remove(&job_id);
            drop(state);
            warn!("job {} failed {} times, giving up on it", job_id, attempts);
            self.results.job_failed(job_id);
        } else if !state.resend_queue.contains(&job_id) {
            debug!("job {} failed on {}, queueing for resend", job_id, remote);
            state.resend_queue.push_back(job_id);
        }
    }
}

impl Service for GridServer {
    fn handle_message(&self, message: &Message, remote: &SocketAddr) -> Result<()> {
        let grid = match message {
            Message::Grid(grid) => grid,
            _ => return Ok(()),
        };
        match grid.type_ {
            GridMessageType::Register => {
                info!("grid worker registered: {}", remote);
                let init = GridMessage::with_data(
                    GridMessageType::InitData,
                    0,
                    self.generator.init_values(),
                );
                self.network.send(remote, &Message::Grid(init))?;
            }
            GridMessageType::Unregister => info!("grid worker unregistered: {}", remote),
            GridMessageType::NewData => {
                let job = self.next_job();
                trace!("sending job {} to {}", job.job_id, remote);
                let data = GridMessage::with_data(GridMessageType::CompData, job.job_id, job.job);
                self.network.send(remote, &Message::Grid(data))?;
            }
            GridMessageType::CompSuccessful | GridMessageType::CompIncorrect => {
                if self.retire_job(grid.job_id) {
                    self.results.result_event(
                        grid.job_id,
                        grid.type_ == GridMessageType::CompSuccessful,
                        grid.data.as_deref(),
                    );
                } else {
                    debug!("ignoring result for unknown job {} from {}", grid.job_id, remote);
                }
            }
            GridMessageType::CompError => self.job_error(grid.job_id, remote),
            other => trace!("grid coordinator ignoring {:?} from {}", other, remote),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::Network;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct Counting(AtomicU32);

    impl GridJobGenerator for Counting {
        fn init_values(&self) -> Vec<u8> {
            vec![1, 2, 3]
        }
        fn generate_job(&self) -> Vec<u8> {
            vec![self.0.fetch_add(1, Ordering::SeqCst) as u8]
        }
    }

    #[derive(Clone, Default)]
    struct Results(Arc<Mutex<Vec<(JobId, bool)>>>, Arc<Mutex<Vec<JobId>>>);

    impl GridResultHandler for Results {
        fn result_event(&self, job_id: JobId, correct: bool, _: Option<&[u8]>) {
            self.0.lock().unwrap().push((job_id, correct));
        }

        fn job_failed(&self, job_id: JobId) {
            self.1.lock().unwrap().push(job_id);
        }
    }

    fn remote() -> SocketAddr {
        "10.0.0.1:1".parse().unwrap()
    }

    fn coordinator(config: GridConfig) -> (Network, GridServer, Results) {
        let network = Network::server("127.0.0.1:0").unwrap();
        let results = Results::default();
        let server = GridServer::with_config(
            network.handle(),
            Counting::default(),
            results.clone(),
            config,
        );
        (network, server, results)
    }

    #[test]
    fn failed_jobs_are_resent_first() {
        let (_network, server, _) = coordinator(GridConfig::default());
        let first = server.next_job();
        let second = server.next_job();
        assert_eq!((first.job_id, second.job_id), (0, 1));

        let error = GridMessage::with_job(GridMessageType::CompError, first.job_id);
        server.handle_message(&error.into(), &remote()).unwrap();
        let resent = server.next_job();
        assert_eq!(resent.job_id, first.job_id);
        assert_eq!(resent.job, first.job);
        assert!(resent.timestamp >= first.timestamp);
        assert_eq!(server.next_job().job_id, 2);
    }

    #[test]
    fn reported_jobs_are_retired() {
        let (_network, server, results) = coordinator(GridConfig::default());
        let job = server.next_job();
        let other = server.next_job();
        let done = GridMessage::with_data(GridMessageType::CompSuccessful, job.job_id, vec![]);
        server.handle_message(&done.clone().into(), &remote()).unwrap();
        let wrong = GridMessage::with_data(GridMessageType::CompIncorrect, other.job_id, vec![]);
        server.handle_message(&wrong.into(), &remote()).unwrap();
        // duplicate report is ignored
        server.handle_message(&done.into(), &remote()).unwrap();

        assert_eq!(server.outstanding_jobs(), 0);
        assert_eq!(*results.0.lock().unwrap(), vec![(0, true), (1, false)]);

        // retired jobs don't get resent
        let error = GridMessage::with_job(GridMessageType::CompError, job.job_id);
        server.handle_message(&error.into(), &remote()).unwrap();
        assert_eq!(server.queued_for_resend(), 0);
    }

    #[test]
    fn stale_jobs_are_requeued_once() {
        let (_network, server, _) = coordinator(GridConfig {
            job_timeout: Duration::from_millis(0),
            ..Default::default()
        });
        server.next_job();
        server.next_job();
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(server.requeue_stale_jobs(), 2);
        assert_eq!(server.requeue_stale_jobs(), 0);
        assert_eq!(server.queued_for_resend(), 2);
        assert_eq!(server.next_job().job_id, 0);
    }

    #[test]
    fn always_failing_job_is_given_up() {
        let (_network, server, results) = coordinator(GridConfig {
            max_attempts: 2,
            ..Default::default()
        });
        let job = server.next_job();
        assert_eq!(job.attempts, 1);
        let error = GridMessage::with_job(GridMessageType::CompError, job.job_id);

        server.handle_message(&error.clone().into(), &remote()).unwrap();
        let resent = server.next_job();
        assert_eq!((resent.job_id, resent.attempts), (job.job_id, 2));

        server.handle_message(&error.into(), &remote()).unwrap();
        assert_eq!(server.outstanding_jobs(), 0);
        assert_eq!(server.queued_for_resend(), 0);
        assert_eq!(*results.1.lock().unwrap(), vec![job.job_id]);
        // new work goes out again
        assert_eq!(server.next_job().job_id, 1);
    }
}
