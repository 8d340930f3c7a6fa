use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;

use tracing::{debug, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of connection worker threads.
///
/// Jobs arrive over a channel shared behind a mutex; dropping the pool
/// closes the channel and joins every worker, so in-flight connections
/// finish before shutdown completes.
pub struct ThreadPool {
    workers: Vec<Worker>,
    sender: Option<mpsc::Sender<Job>>,
    queued: Arc<AtomicUsize>,
}

struct Worker {
    id: usize,
    thread: Option<thread::JoinHandle<()>>,
}

impl Worker {
    fn new(id: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>, queued: Arc<AtomicUsize>) -> Self {
        let builder = thread::Builder::new().name(format!("mayfly-conn-{id}"));
        let thread = builder
            .spawn(move || loop {
                let message = receiver.lock().unwrap().recv();
                match message {
                    Ok(job) => {
                        queued.fetch_sub(1, Ordering::Relaxed);
                        job();
                    }
                    Err(_) => {
                        debug!(worker = id, "connection worker shutting down");
                        break;
                    }
                }
            })
            .expect("failed to spawn connection worker");
        Worker {
            id,
            thread: Some(thread),
        }
    }
}

impl ThreadPool {
    /// Create a pool with `size` workers. `size` must be nonzero.
    #[must_use]
    pub fn new(size: usize) -> Self {
        assert!(size > 0);
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let queued = Arc::new(AtomicUsize::new(0));

        let mut workers = Vec::with_capacity(size);
        for id in 0..size {
            workers.push(Worker::new(
                id,
                Arc::clone(&receiver),
                Arc::clone(&queued),
            ));
        }
        debug!(workers = size, "connection pool started");

        ThreadPool {
            workers,
            sender: Some(sender),
            queued,
        }
    }

    /// Queue a job. Dropped silently if the pool is already shutting down.
    pub fn execute<F>(&self, f: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if let Some(sender) = &self.sender {
            self.queued.fetch_add(1, Ordering::Relaxed);
            if sender.send(Box::new(f)).is_err() {
                self.queued.fetch_sub(1, Ordering::Relaxed);
                warn!("connection pool is shut down, dropping job");
            }
        }
    }

    /// Jobs accepted but not yet picked up by a worker.
    #[must_use]
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::Relaxed)
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        drop(self.sender.take());
        for worker in &mut self.workers {
            if let Some(thread) = worker.thread.take() {
                debug!(worker = worker.id, "joining connection worker");
                let _ = thread.join();
            }
        }
    }
}
