//! Request broker: a FIFO queue drained by a fixed worker pool.
//!
//! The readiness loop must never block, but handling a request means
//! file I/O, hashing and socket writes. The broker is the seam between
//! the two: the loop enqueues decoded requests without waiting, and a
//! fixed pool of worker threads consumes them one at a time, handing
//! each to the injected [`RequestHandler`].

use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, warn};

use crate::error::NetError;
use crate::request::Request;

/// How long a waiting worker sleeps before re-checking the termination
/// flag.
const WAKE_INTERVAL: Duration = Duration::from_millis(100);

/// Pluggable request-handling strategy. The uploader and receiver roles
/// are the two implementations; injecting one is what gives the broker
/// its behavior.
pub trait RequestHandler: Send + Sync {
    /// Handle one request to completion. Blocking work is expected
    /// here; failures are logged at the worker boundary and never take
    /// the worker down.
    ///
    /// # Errors
    ///
    /// Implementations report any failure they cannot resolve locally.
    fn handle(&self, request: Request) -> anyhow::Result<()>;
}

/// FIFO request queue plus the worker pool that drains it.
pub struct Broker {
    queue: Sender<Request>,
    terminate: Arc<AtomicBool>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Broker {
    /// Start `n_workers` named worker threads draining the queue into
    /// `handler`.
    #[must_use]
    pub fn new(handler: Arc<dyn RequestHandler>, n_workers: usize) -> Self {
        let (queue, feed) = crossbeam_channel::unbounded::<Request>();
        let terminate = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(n_workers);
        for id in 0..n_workers {
            let feed = feed.clone();
            let terminate = terminate.clone();
            let handler = handler.clone();
            let handle = thread::Builder::new()
                .name(format!("barge-worker-{id}"))
                .spawn(move || worker_loop(id, &feed, &terminate, handler.as_ref()))
                .expect("failed to spawn worker thread");
            workers.push(handle);
        }

        Self {
            queue,
            terminate,
            workers: Mutex::new(workers),
        }
    }

    /// Append a request to the queue and wake a waiting worker. Never
    /// blocks; the queue is unbounded.
    ///
    /// # Errors
    ///
    /// Returns `ShuttingDown` once termination has been signaled.
    pub fn enqueue(&self, request: Request) -> Result<(), NetError> {
        if self.terminate.load(Ordering::Acquire) {
            return Err(NetError::ShuttingDown);
        }
        self.queue
            .send(request)
            .map_err(|_| NetError::ShuttingDown)
    }

    /// Signal termination and join every worker. Idempotent; also runs
    /// on drop.
    pub fn shutdown(&self) {
        self.terminate.store(true, Ordering::Release);
        let workers = mem::take(&mut *self.workers.lock().unwrap());
        for worker in workers {
            if worker.join().is_err() {
                error!("request worker panicked during shutdown");
            }
        }
    }
}

impl Drop for Broker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(
    id: usize,
    feed: &Receiver<Request>,
    terminate: &AtomicBool,
    handler: &dyn RequestHandler,
) {
    debug!("worker {id} starting");
    while !terminate.load(Ordering::Acquire) {
        match feed.recv_timeout(WAKE_INTERVAL) {
            Ok(request) => {
                match panic::catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!("request handler failed: {e:#}"),
                    Err(_) => error!("request handler panicked"),
                }
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
    debug!("worker {id} exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use barge_proto::{Body, Message};
    use std::sync::Weak;
    use std::time::Instant;
    use uuid::Uuid;

    struct Recording {
        seen: Mutex<Vec<u16>>,
    }

    impl RequestHandler for Recording {
        fn handle(&self, request: Request) -> anyhow::Result<()> {
            let message = request.into_message();
            if message.file_name == "panic" {
                panic!("boom");
            }
            if message.file_name == "fail" {
                anyhow::bail!("handler says no");
            }
            self.seen.lock().unwrap().push(message.seq);
            Ok(())
        }
    }

    fn request(seq: u16, file_name: &str) -> Request {
        Request::new(
            Weak::new(),
            Message {
                seq,
                peer: Uuid::from_bytes([1; 16]),
                file_name: file_name.into(),
                body: Body::Complete,
            },
        )
    }

    fn wait_for(len: usize, handler: &Recording) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while handler.seen.lock().unwrap().len() < len {
            assert!(Instant::now() < deadline, "handler never saw {len} requests");
            thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn requests_reach_the_handler() {
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let broker = Broker::new(handler.clone(), 2);

        for seq in 0..10 {
            broker.enqueue(request(seq, "data.bin")).unwrap();
        }
        wait_for(10, &handler);

        let mut seen = handler.seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn single_worker_preserves_fifo_order() {
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let broker = Broker::new(handler.clone(), 1);

        for seq in 0..20 {
            broker.enqueue(request(seq, "data.bin")).unwrap();
        }
        wait_for(20, &handler);

        assert_eq!(*handler.seen.lock().unwrap(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn workers_survive_failures_and_panics() {
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let broker = Broker::new(handler.clone(), 1);

        broker.enqueue(request(0, "panic")).unwrap();
        broker.enqueue(request(1, "fail")).unwrap();
        broker.enqueue(request(2, "data.bin")).unwrap();
        wait_for(1, &handler);

        assert_eq!(*handler.seen.lock().unwrap(), vec![2]);
    }

    #[test]
    fn shutdown_joins_and_rejects_new_work() {
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let broker = Broker::new(handler.clone(), 4);

        broker.enqueue(request(0, "data.bin")).unwrap();
        wait_for(1, &handler);

        broker.shutdown();
        assert!(matches!(
            broker.enqueue(request(1, "data.bin")),
            Err(NetError::ShuttingDown)
        ));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let handler = Arc::new(Recording {
            seen: Mutex::new(Vec::new()),
        });
        let broker = Broker::new(handler, 2);
        broker.shutdown();
        broker.shutdown();
    }
}
