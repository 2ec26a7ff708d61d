//! A fixed-size pool of worker threads draining a bounded descriptor queue.
//!
//! The multiplexer thread is the sole producer; workers are consumers that
//! each call into the dispatcher for whatever descriptor they pop. Sizing the
//! queue well above the expected concurrent-client count (the default auto-size
//! is `2 * workers * 64`) makes the full-queue case vanishingly rare in
//! practice, per the design's back-pressure note.

use std::os::fd::RawFd;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Sender};

pub struct WorkerPool {
    sender: Sender<RawFd>,
    _handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads, each looping on `recv` and invoking `dispatch`
    /// for every descriptor it pops.
    pub fn new<F>(workers: usize, queue_capacity: usize, dispatch: F) -> Self
    where
        F: Fn(RawFd) + Send + Sync + 'static,
    {
        let (sender, receiver) = bounded(queue_capacity);
        let dispatch = Arc::new(dispatch);

        let handles = (0..workers)
            .map(|id| {
                let receiver = receiver.clone();
                let dispatch = dispatch.clone();
                thread::Builder::new()
                    .name(format!("rembash-worker-{id}"))
                    .spawn(move || {
                        while let Ok(fd) = receiver.recv() {
                            dispatch(fd);
                        }
                    })
                    .expect("failed to spawn worker thread")
            })
            .collect();

        WorkerPool {
            sender,
            _handles: handles,
        }
    }

    /// Non-blocking enqueue. Returns `false` if the queue is full. The
    /// multiplexer must not block waiting for a worker, so on failure it
    /// rearms the descriptor directly rather than losing the edge.
    pub fn try_enqueue(&self, fd: RawFd) -> bool {
        self.sender.try_send(fd).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;
    use std::time::Duration;

    #[test]
    fn every_enqueued_fd_is_dispatched_exactly_once() {
        let seen = Arc::new(AtomicUsize::new(0));
        let (done_tx, done_rx) = mpsc::channel();
        let seen_for_pool = seen.clone();
        let pool = WorkerPool::new(4, 64, move |_fd| {
            if seen_for_pool.fetch_add(1, Ordering::SeqCst) + 1 == 100 {
                let _ = done_tx.send(());
            }
        });

        for fd in 0..100 {
            assert!(pool.try_enqueue(fd));
        }

        done_rx.recv_timeout(Duration::from_secs(2)).expect("all dispatches completed");
        assert_eq!(seen.load(Ordering::SeqCst), 100);
    }
}
