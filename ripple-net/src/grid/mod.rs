//! Distributed job computation.
//!
//! A coordinator ([`GridServer`]) hands out jobs produced by a
//! [`GridJobGenerator`] to any number of workers ([`GridClient`]). Workers
//! register, receive the static initialization data once, and then keep
//! asking for jobs, computing them on a pool of threads and reporting the
//! results back.
//!
//! Jobs that fail on a worker, or don't get reported within the configured
//! timeout, are handed out again.

use std::time::{Duration, Instant};

use serde::de::DeserializeOwned;

use crate::socket::{unpack, Encoding};
use crate::Result;

mod client;
mod server;

pub use crate::msg::grid::JobId;
pub use client::{GridClient, GridThread, JobOutcome};
pub use server::{GridConfig, GridJobGenerator, GridResultHandler, GridServer};

/// Single unit of work.
#[derive(Debug, Clone, PartialEq)]
pub struct GridJob {
    pub job_id: JobId,
    pub job: Vec<u8>,
    /// Time the job was last handed out
    pub timestamp: Instant,
    /// Number of times the job was handed out
    pub attempts: u32,
}

impl GridJob {
    pub fn new(job_id: JobId, job: Vec<u8>) -> Self {
        Self {
            job_id,
            job,
            timestamp: Instant::now(),
            attempts: 0,
        }
    }

    pub fn renew_timestamp(&mut self) {
        self.timestamp = Instant::now();
    }

    /// Time since the job was last handed out.
    pub fn age(&self) -> Duration {
        self.timestamp.elapsed()
    }

    pub fn unpack<P: DeserializeOwned>(&self, encoding: &Encoding) -> Result<P> {
        unpack(&self.job, encoding)
    }
}
