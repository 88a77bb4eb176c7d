// jobs.rs - named job queues drained by parked worker threads
//
// Three queues: Main is drained by whoever owns the main loop, Graphics by
// one dedicated worker, Pool by a small clamped set of task workers. Workers
// block on their queue and exit once the system shuts down and the queue has
// drained.

use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum QueueId {
    Main,
    Graphics,
    Pool,
}

pub const MIN_POOL_WORKERS: u32 = 2;
pub const MAX_POOL_WORKERS: u32 = 8;

#[derive(Copy, Clone, Debug)]
pub struct JobSystemInfo {
    pub pool_workers: u32,
}

impl Default for JobSystemInfo {
    fn default() -> Self {
        let parallelism = std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(MIN_POOL_WORKERS);
        JobSystemInfo {
            pool_workers: parallelism,
        }
    }
}

pub struct JobSystem {
    main_tx: Option<Sender<Job>>,
    main_rx: Receiver<Job>,
    graphics_tx: Option<Sender<Job>>,
    pool_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    pool_worker_count: u32,
}

impl JobSystem {
    pub fn new(info: JobSystemInfo) -> JobSystem {
        let pool_worker_count = info.pool_workers.clamp(MIN_POOL_WORKERS, MAX_POOL_WORKERS);

        let (main_tx, main_rx) = unbounded::<Job>();
        let (graphics_tx, graphics_rx) = unbounded::<Job>();
        let (pool_tx, pool_rx) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(pool_worker_count as usize + 1);
        workers.push(spawn_worker("keel-gfx".to_string(), graphics_rx));
        for index in 0..pool_worker_count {
            workers.push(spawn_worker(format!("keel-task-{index}"), pool_rx.clone()));
        }

        JobSystem {
            main_tx: Some(main_tx),
            main_rx,
            graphics_tx: Some(graphics_tx),
            pool_tx: Some(pool_tx),
            workers,
            pool_worker_count,
        }
    }

    pub fn pool_worker_count(&self) -> u32 {
        self.pool_worker_count
    }

    /// Queue a job. Returns false once the system is shutting down.
    pub fn submit(&self, queue: QueueId, job: impl FnOnce() + Send + 'static) -> bool {
        let sender = match queue {
            QueueId::Main => &self.main_tx,
            QueueId::Graphics => &self.graphics_tx,
            QueueId::Pool => &self.pool_tx,
        };
        match sender {
            Some(sender) => sender.send(Box::new(job)).is_ok(),
            None => false,
        }
    }

    /// Drain the main queue on the calling thread: wait up to `timeout` for
    /// the first job, then run whatever else is queued without blocking.
    pub fn run_main_jobs(&self, timeout: Duration) -> u32 {
        let mut executed = 0u32;
        let mut wait = timeout;
        while let Ok(job) = self.main_rx.recv_timeout(wait) {
            job();
            executed += 1;
            wait = Duration::ZERO;
        }
        executed
    }

    /// Block until every worker has returned from its current job and the
    /// queues have drained.
    pub fn shutdown(mut self) {
        self.join_workers();
    }

    fn join_workers(&mut self) {
        self.main_tx = None;
        self.graphics_tx = None;
        self.pool_tx = None;
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

impl Drop for JobSystem {
    fn drop(&mut self) {
        self.join_workers();
    }
}

fn spawn_worker(name: String, queue: Receiver<Job>) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name(name)
        .spawn(move || {
            // Remaining queued jobs are still delivered after the senders
            // drop; the loop ends once the queue is empty and disconnected.
            while let Ok(job) = queue.recv() {
                job();
            }
        })
        .expect("failed to spawn job worker")
}
