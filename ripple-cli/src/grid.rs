//! Grid coordinator and worker running a distributed prime search.
//!
//! The coordinator splits the numbers below the limit into ranges of `batch`
//! numbers, each range being a single job. Workers report the primes found
//! in the range. A range without any primes is reported as an incorrect
//! result. Jobs handed out after the limit is covered get empty ranges.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use anyhow::{Error, Result};
use clap::ArgMatches;
use crossbeam_channel::{select, tick, unbounded, Sender};
use ripple_net::grid::{
    GridClient, GridJob, GridJobGenerator, GridResultHandler, GridServer, GridThread, JobId,
    JobOutcome,
};
use ripple_net::{pack, unpack, Encoding, Network, ServiceRegistry, SystemWorker, WorkerPool};

use crate::config::Config;
use crate::util;

const DEFAULT_BATCH: u64 = 10_000;

/// Static data every worker receives on registration.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SearchParams {
    batch: u64,
    limit: u64,
}

/// Hands out consecutive ranges, identified by the first number.
struct RangeGenerator {
    params: SearchParams,
    encoding: Encoding,
    next: AtomicU64,
}

impl GridJobGenerator for RangeGenerator {
    fn init_values(&self) -> Vec<u8> {
        pack(&self.params, &self.encoding).unwrap_or_default()
    }

    fn generate_job(&self) -> Vec<u8> {
        let start = self.next.fetch_add(self.params.batch, Ordering::SeqCst);
        pack(&start.min(self.params.limit), &self.encoding).unwrap_or_default()
    }
}

#[derive(Default)]
struct SearchProgress {
    ranges: u64,
    failed: u64,
    primes: u64,
    largest: u64,
}

impl SearchProgress {
    fn finished(&self) -> u64 {
        self.ranges + self.failed
    }
}

/// Tallies the reported primes, signaling once enough ranges are done.
struct PrimeTally {
    encoding: Encoding,
    ranges_needed: u64,
    progress: Mutex<SearchProgress>,
    done: Sender<()>,
}

impl GridResultHandler for PrimeTally {
    fn result_event(&self, job_id: JobId, correct: bool, result: Option<&[u8]>) {
        if job_id as u64 >= self.ranges_needed {
            trace!("job {} is past the search limit", job_id);
            return;
        }
        let primes: Vec<u64> = match result.map(|r| unpack(r, &self.encoding)) {
            Some(Ok(primes)) => primes,
            Some(Err(e)) => {
                warn!("failed decoding result of job {}: {}", job_id, e);
                return;
            }
            None => Vec::new(),
        };
        if !correct {
            debug!("job {} found no primes", job_id);
        }
        let mut progress = self.progress();
        progress.ranges += 1;
        progress.primes += primes.len() as u64;
        if let Some(largest) = primes.iter().max() {
            progress.largest = progress.largest.max(*largest);
        }
        self.check_done(&progress);
    }

    fn job_failed(&self, job_id: JobId) {
        if job_id as u64 >= self.ranges_needed {
            return;
        }
        warn!("range of job {} couldn't be searched", job_id);
        let mut progress = self.progress();
        progress.failed += 1;
        self.check_done(&progress);
    }
}

impl PrimeTally {
    fn progress(&self) -> MutexGuard<SearchProgress> {
        match self.progress.lock() {
            Ok(p) => p,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn check_done(&self, progress: &SearchProgress) {
        if progress.finished() == self.ranges_needed {
            let _ = self.done.send(());
        }
    }

    fn ranges(&self) -> u64 {
        self.progress().finished()
    }

    /// Searched ranges, failed ranges, primes found and the largest prime.
    fn summary(&self) -> (u64, u64, u64, u64) {
        let progress = self.progress();
        (progress.ranges, progress.failed, progress.primes, progress.largest)
    }
}

/// Lets the coordinator report into a tally the command keeps reading.
struct SharedTally(Arc<PrimeTally>);

impl GridResultHandler for SharedTally {
    fn result_event(&self, job_id: JobId, correct: bool, result: Option<&[u8]>) {
        self.0.result_event(job_id, correct, result)
    }

    fn job_failed(&self, job_id: JobId) {
        self.0.job_failed(job_id)
    }
}

/// Runs the coordinator until the search limit is covered or ctrl-c is
/// pressed.
pub fn start_coordinator(matches: &ArgMatches, config: &Config) -> Result<()> {
    let addr = matches
        .value_of("address")
        .ok_or_else(|| Error::msg("missing coordinator address"))?;
    let limit: u64 = util::parse_arg(matches, "limit")?;
    let batch: u64 = util::parse_arg(matches, "batch")?;
    if limit == 0 || batch == 0 {
        return Err(Error::msg("limit and batch size must be greater than zero"));
    }

    let network_config = config.network_config()?;
    let encoding = network_config.encoding;
    let mut network = Network::server_with_config(addr, network_config)?;
    let registry = Arc::new(ServiceRegistry::new(network.handle()));

    let (done_sender, done) = unbounded();
    let ranges_needed = (limit + batch - 1) / batch;
    let tally = Arc::new(PrimeTally {
        encoding,
        ranges_needed,
        progress: Mutex::new(SearchProgress::default()),
        done: done_sender,
    });
    let server = Arc::new(GridServer::with_config(
        network.handle(),
        RangeGenerator {
            params: SearchParams { batch, limit },
            encoding,
            next: AtomicU64::new(0),
        },
        SharedTally(tally.clone()),
        config.grid_config(),
    ));
    registry.set_grid(server.clone());
    let _maintainer = server.start_maintainer()?;
    network.start(WorkerPool::with_threads(
        SystemWorker::new(registry),
        config.worker_threads(),
    )?)?;
    println!(
        "searching primes below {} in {} ranges, waiting for workers on: {}",
        limit,
        ranges_needed,
        network.local_addr()
    );

    let started = Instant::now();
    let ctrl_c = util::ctrl_channel()?;
    let status = tick(Duration::from_secs(5));
    loop {
        select! {
            recv(done) -> _ => break,
            recv(ctrl_c) -> _ => {
                println!("Initiating graceful shutdown...");
                break;
            }
            recv(status) -> _ => {
                let ranges = tally.ranges();
                info!(
                    "{}/{} ranges done, {} jobs outstanding, {} workers connected",
                    ranges,
                    ranges_needed,
                    server.outstanding_jobs(),
                    network.connections().len()
                );
            }
        }
    }

    let (ranges, failed, primes, largest) = tally.summary();
    println!(
        "{} ranges searched in {:.2}s, found {} primes, largest: {}",
        ranges,
        started.elapsed().as_secs_f64(),
        primes,
        largest
    );
    if failed > 0 {
        println!("{} ranges failed and were skipped", failed);
    }
    network.shutdown();
    Ok(())
}

/// Computes the primes in a range.
struct PrimeSearch {
    encoding: Encoding,
    batch: AtomicU64,
    limit: AtomicU64,
}

impl PrimeSearch {
    fn new(encoding: Encoding) -> Self {
        Self {
            encoding,
            batch: AtomicU64::new(DEFAULT_BATCH),
            limit: AtomicU64::new(u64::MAX),
        }
    }
}

impl GridThread for PrimeSearch {
    fn set_init_data(&self, data: &[u8]) {
        match unpack::<SearchParams>(data, &self.encoding) {
            Ok(params) => {
                debug!("received search params: {:?}", params);
                self.batch.store(params.batch, Ordering::SeqCst);
                self.limit.store(params.limit, Ordering::SeqCst);
            }
            Err(e) => error!("failed decoding search params: {}", e),
        }
    }

    fn compute(&self, job: &GridJob) -> ripple_net::Result<JobOutcome> {
        let start: u64 = job.unpack(&self.encoding)?;
        let end = start
            .saturating_add(self.batch.load(Ordering::SeqCst))
            .min(self.limit.load(Ordering::SeqCst));
        let primes = (start..end).filter(|n| is_prime(*n)).collect::<Vec<_>>();
        trace!("job {}: {} primes in {}..{}", job.job_id, primes.len(), start, end);
        Ok(JobOutcome {
            correct: !primes.is_empty(),
            result: pack(&primes, &self.encoding)?,
        })
    }
}

/// Runs a worker until ctrl-c is pressed or the coordinator goes away.
pub fn start_worker(matches: &ArgMatches, config: &Config) -> Result<()> {
    let addr = matches
        .value_of("address")
        .ok_or_else(|| Error::msg("missing coordinator address"))?;
    let threads = match matches.value_of("threads") {
        Some(_) => util::parse_arg(matches, "threads")?,
        None => config
            .grid
            .threads
            .unwrap_or_else(ripple_net::default_threads),
    };

    let network_config = config.network_config()?;
    let encoding = network_config.encoding;
    let mut network = Network::client_with_config(addr, network_config)?;
    let coordinator = network
        .remote_addr()
        .ok_or_else(|| Error::msg("client network has no remote address"))?;
    let registry = Arc::new(ServiceRegistry::new(network.handle()));
    let client = Arc::new(GridClient::new(
        network.handle(),
        Arc::new(PrimeSearch::new(encoding)),
    ));
    registry.set_grid(client.clone());
    network.start(WorkerPool::with_threads(SystemWorker::new(registry), 1)?)?;
    client.initiate(threads)?;
    println!("working for coordinator {} on {} threads", coordinator, threads);

    let ctrl_c = util::ctrl_channel()?;
    let connection_check = tick(Duration::from_secs(1));
    loop {
        select! {
            recv(ctrl_c) -> _ => break,
            recv(connection_check) -> _ => {
                if !network.is_connected(&coordinator) {
                    println!("coordinator went away");
                    break;
                }
            }
        }
    }

    println!("Initiating graceful shutdown...");
    client.shutdown();
    network.shutdown();
    Ok(())
}

fn is_prime(n: u64) -> bool {
    if n < 2 {
        return false;
    }
    if n % 2 == 0 {
        return n == 2;
    }
    let mut d = 3;
    while d * d <= n {
        if n % d == 0 {
            return false;
        }
        d += 2;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primes_below_thirty() {
        let primes = (0..30).filter(|n| is_prime(*n)).collect::<Vec<u64>>();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
    }

    #[test]
    fn search_reports_range_without_primes_as_incorrect() {
        let search = PrimeSearch::new(Encoding::Bincode);
        let params = SearchParams { batch: 5, limit: 100 };
        search.set_init_data(&pack(&params, &Encoding::Bincode).unwrap());

        let job = GridJob::new(0, pack(&24u64, &Encoding::Bincode).unwrap());
        let outcome = search.compute(&job).unwrap();
        assert!(!outcome.correct);

        let job = GridJob::new(1, pack(&10u64, &Encoding::Bincode).unwrap());
        let outcome = search.compute(&job).unwrap();
        assert!(outcome.correct);
        let primes: Vec<u64> = unpack(&outcome.result, &Encoding::Bincode).unwrap();
        assert_eq!(primes, vec![11, 13]);
    }

    #[test]
    fn generator_hands_out_consecutive_ranges() {
        let generator = RangeGenerator {
            params: SearchParams { batch: 100, limit: 1000 },
            encoding: Encoding::Bincode,
            next: AtomicU64::new(0),
        };
        let starts = (0..3)
            .map(|_| unpack::<u64>(&generator.generate_job(), &Encoding::Bincode).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(starts, vec![0, 100, 200]);
    }

    #[test]
    fn last_range_stops_at_limit() {
        let params = SearchParams { batch: 10, limit: 25 };
        let generator = RangeGenerator {
            params: params.clone(),
            encoding: Encoding::Bincode,
            next: AtomicU64::new(0),
        };
        let search = PrimeSearch::new(Encoding::Bincode);
        search.set_init_data(&generator.init_values());

        let primes = (0..4)
            .map(|id| {
                let job = GridJob::new(id, generator.generate_job());
                let outcome = search.compute(&job).unwrap();
                unpack::<Vec<u64>>(&outcome.result, &Encoding::Bincode).unwrap()
            })
            .collect::<Vec<_>>();
        assert_eq!(primes[2], vec![23]);
        // past the limit
        assert!(primes[3].is_empty());
    }

    #[test]
    fn tally_ignores_jobs_past_limit_and_counts_failures() {
        let (done_sender, done) = unbounded();
        let tally = PrimeTally {
            encoding: Encoding::Bincode,
            ranges_needed: 3,
            progress: Mutex::new(SearchProgress::default()),
            done: done_sender,
        };
        let primes = pack(&vec![2u64, 3, 5, 7], &Encoding::Bincode).unwrap();
        tally.result_event(0, true, Some(&primes));
        tally.result_event(3, false, Some(&pack(&Vec::<u64>::new(), &Encoding::Bincode).unwrap()));
        tally.job_failed(4);
        assert_eq!(tally.ranges(), 1);

        tally.job_failed(1);
        assert!(done.try_recv().is_err());
        tally.result_event(2, false, None);
        assert!(done.try_recv().is_ok());
        assert_eq!(tally.summary(), (2, 1, 4, 7));
    }
}
