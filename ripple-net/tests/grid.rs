mod common;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use ripple_net::grid::{
    GridClient, GridJob, GridJobGenerator, GridResultHandler, GridServer, GridThread, JobId,
    JobOutcome,
};
use ripple_net::msg::{GridMessage, GridMessageType};
use ripple_net::{
    pack, Encoding, Error, FnWorker, Message, Network, Result, WorkerEvent, WorkerPool,
};

use common::{test_config, Node, TIMEOUT};

/// Squares the number in the job, treating multiples of 7 as failures.
struct Squares {
    offset: Mutex<u64>,
}

impl GridThread for Squares {
    fn set_init_data(&self, data: &[u8]) {
        *self.offset.lock().unwrap() = ripple_net::unpack(data, &Encoding::Bincode).unwrap();
    }

    fn compute(&self, job: &GridJob) -> Result<JobOutcome> {
        let n: u64 = job.unpack(&Encoding::Bincode)?;
        if n % 7 == 0 {
            return Err(Error::Other(format!("refusing to compute {}", n)));
        }
        let result = n * n + *self.offset.lock().unwrap();
        Ok(JobOutcome {
            correct: result % 2 == 0,
            result: pack(&result, &Encoding::Bincode)?,
        })
    }
}

struct Numbers(AtomicU32);

impl GridJobGenerator for Numbers {
    fn init_values(&self) -> Vec<u8> {
        pack(&1u64, &Encoding::Bincode).unwrap()
    }

    fn generate_job(&self) -> Vec<u8> {
        let n = self.0.fetch_add(1, Ordering::SeqCst) as u64;
        pack(&n, &Encoding::Bincode).unwrap()
    }
}

struct Collect(Sender<(JobId, bool, u64)>);

impl GridResultHandler for Collect {
    fn result_event(&self, job_id: JobId, correct: bool, result: Option<&[u8]>) {
        let value = result
            .map(|r| ripple_net::unpack(r, &Encoding::Bincode).unwrap())
            .unwrap_or_default();
        let _ = self.0.send((job_id, correct, value));
    }
}

/// Server that forwards every grid message it receives to a channel.
fn capturing_server() -> (Network, Receiver<(SocketAddr, GridMessage)>) {
    let (sender, receiver) = unbounded();
    let mut server = Network::server_with_config("127.0.0.1:0", test_config()).unwrap();
    let pool = WorkerPool::with_threads(
        FnWorker(move |event: &WorkerEvent| -> Result<()> {
            if let Message::Grid(grid) = &event.message {
                let _ = sender.send((event.remote, grid.clone()));
            }
            Ok(())
        }),
        1,
    )
    .unwrap();
    server.start(pool).unwrap();
    (server, receiver)
}

#[test]
fn empty_queue_requests_new_data_once() {
    common::init_logging();
    let (server, captured) = capturing_server();

    let mut network = Network::client_with_config(server.local_addr(), test_config()).unwrap();
    let registry = Arc::new(ripple_net::ServiceRegistry::new(network.handle()));
    let client = Arc::new(GridClient::new(
        network.handle(),
        Arc::new(Squares {
            offset: Mutex::new(0),
        }),
    ));
    registry.set_grid(client.clone());
    network
        .start(WorkerPool::with_threads(ripple_net::SystemWorker::new(registry), 1).unwrap())
        .unwrap();

    let _client = client.clone();
    let fetcher = std::thread::spawn(move || _client.get_next_job());

    let (worker_addr, request) = captured.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(request.type_, GridMessageType::NewData);
    // still blocked, and no second request
    assert!(captured.recv_timeout(Duration::from_millis(200)).is_err());

    let job = GridMessage::with_data(GridMessageType::CompData, 7, vec![1, 2]);
    server.send(&worker_addr, &job.into()).unwrap();
    let job = fetcher.join().unwrap().unwrap();
    assert_eq!(job.job_id, 7);
    assert_eq!(job.job, vec![1, 2]);

    client.job_done(7, true, vec![3]).unwrap();
    client.job_done(8, false, vec![4]).unwrap();
    client.job_error(9).unwrap();
    let reports = (0..3)
        .map(|_| captured.recv_timeout(TIMEOUT).unwrap().1)
        .map(|msg| (msg.type_, msg.job_id, msg.data))
        .collect::<Vec<_>>();
    assert_eq!(
        reports,
        vec![
            (GridMessageType::CompSuccessful, 7, Some(vec![3])),
            (GridMessageType::CompIncorrect, 8, Some(vec![4])),
            (GridMessageType::CompError, 9, None),
        ]
    );
}

#[test]
fn coordinator_and_worker_complete_jobs() {
    common::init_logging();

    let (sender, results) = unbounded();
    let mut coordinator = Node::server();
    let server = Arc::new(GridServer::new(
        coordinator.network.handle(),
        Numbers(AtomicU32::new(1)),
        Collect(sender),
    ));
    coordinator.registry.set_grid(server.clone());
    coordinator.start();

    let mut worker = Node::client(&coordinator);
    let client = Arc::new(GridClient::new(
        worker.network.handle(),
        Arc::new(Squares {
            offset: Mutex::new(0),
        }),
    ));
    worker.registry.set_grid(client.clone());
    worker.start();
    client.initiate(2).unwrap();

    let mut completed = Vec::new();
    while completed.len() < 20 {
        let (job_id, correct, value) = results.recv_timeout(TIMEOUT).unwrap();
        assert_eq!(correct, value % 2 == 0);
        completed.push(job_id);
    }
    client.shutdown();

    // multiples of 7 fail on every attempt and get dropped
    assert!(completed.iter().all(|id| (*id as u64 + 1) % 7 != 0));
    completed.sort();
    completed.dedup();
    assert_eq!(completed.len(), 20);
}
