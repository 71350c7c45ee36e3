//! Fixed-size pool of worker threads that run client sessions

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use tracing::{debug, trace};

use crate::smtp::error::{Result, SmtpError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs jobs on a fixed number of threads, in submission order.
///
/// Jobs queue up when every worker is busy. With a single worker all jobs
/// run one after another.
#[derive(Debug)]
pub struct WorkerPool {
    workers: Vec<Worker>,
    sender: Option<Sender<Job>>,
}

#[derive(Debug)]
struct Worker {
    handle: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `size` worker threads. A size of zero is rejected.
    pub fn new(size: usize) -> Result<Self> {
        if size == 0 {
            return Err(SmtpError::InvalidOption(
                "worker pool needs at least one thread".to_owned(),
            ));
        }

        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..size)
            .map(|id| Worker::spawn(id, Arc::clone(&receiver)))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            workers,
            sender: Some(sender),
        })
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a job. Jobs submitted after `shutdown` are dropped.
    pub fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        match &self.sender {
            Some(sender) => {
                if sender.send(Box::new(job)).is_err() {
                    debug!("Worker pool is gone, dropping job");
                }
            }
            None => debug!("Worker pool is shut down, dropping job"),
        }
    }

    /// Close the job queue.
    ///
    /// Queued jobs still run. Workers exit once the queue is drained; they
    /// are not joined here, so a long session does not hold up the caller.
    pub fn shutdown(&mut self) {
        if self.sender.take().is_some() {
            debug!(workers = self.workers.len(), "Worker pool shutting down");
        }
    }

    /// Close the job queue and wait for every worker to finish
    #[cfg(test)]
    fn join(mut self) {
        self.shutdown();
        for worker in &mut self.workers {
            if let Some(handle) = worker.handle.take() {
                let name = handle.thread().name().unwrap_or_default().to_owned();
                if handle.join().is_err() {
                    debug!(worker = name, "Worker panicked");
                }
            }
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Worker {
    fn spawn(id: usize, receiver: Arc<Mutex<Receiver<Job>>>) -> Result<Self> {
        let handle = thread::Builder::new()
            .name(format!("smtp-worker-{id}"))
            .spawn(move || {
                loop {
                    // Hold the lock only while waiting for the next job
                    let job = receiver
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .recv();

                    match job {
                        Ok(job) => {
                            trace!(worker = id, "Running job");
                            job();
                        }
                        Err(_) => break,
                    }
                }
                trace!(worker = id, "Worker exiting");
            })?;

        Ok(Self {
            handle: Some(handle),
        })
    }
}
