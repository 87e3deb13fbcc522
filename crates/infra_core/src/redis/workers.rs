//! Bounded worker pool running message handlers off the connection reader.

use infra_api::{InfraMessage, MessageHandler};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

/// One handler invocation waiting in the queue.
pub struct Job {
    pub channel: Arc<str>,
    pub message: Arc<InfraMessage>,
    pub handler: MessageHandler,
}

/// Fixed set of named threads draining a bounded job queue.
///
/// A full queue rejects new jobs instead of blocking the reader. Once shut
/// down, queued jobs are discarded.
pub struct WorkerPool {
    sender: mpsc::Sender<Job>,
    closed: Arc<AtomicBool>,
}

impl WorkerPool {
    pub fn start(worker_count: usize, queue_capacity: usize) -> std::io::Result<Self> {
        let (sender, receiver) = mpsc::channel::<Job>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let closed = Arc::new(AtomicBool::new(false));

        for index in 0..worker_count.max(1) {
            let receiver = receiver.clone();
            let closed = closed.clone();
            std::thread::Builder::new()
                .name(format!("crown-bus-worker-{index}"))
                .spawn(move || run_worker(receiver, closed))?;
        }

        Ok(Self { sender, closed })
    }

    /// Queues a job. Returns `false` when it was dropped.
    pub fn submit(&self, job: Job) -> bool {
        match self.sender.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(job)) => {
                warn!(
                    "⚠️ Handler queue full, dropping message {} on {}",
                    job.message.meta().message_id(),
                    job.channel
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn shutdown(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(receiver: Arc<Mutex<mpsc::Receiver<Job>>>, closed: Arc<AtomicBool>) {
    loop {
        let job = {
            let Ok(mut guard) = receiver.lock() else {
                return;
            };
            guard.blocking_recv()
        };
        let Some(job) = job else {
            return;
        };
        if closed.load(Ordering::Acquire) {
            return;
        }

        let result = catch_unwind(AssertUnwindSafe(|| {
            (job.handler)(&job.channel, &job.message)
        }));
        if result.is_err() {
            error!(
                "❌ Handler panicked on {} for message type {}",
                job.channel,
                job.message.message_type()
            );
        }
    }
}
