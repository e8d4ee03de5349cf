//! Bounded worker pool for I/O-bound tasks.
//!
//! Tasks are nullary value-returning closures pushed onto a shared
//! FIFO; a fixed set of workers drains it. Each submission opens a
//! one-shot result channel, and `wait_data` collects every submitted
//! task's value in submission order. Tasks that need input-order
//! reassembly return `(id, value)` pairs and let the caller key a map
//! by `id`.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;

use cf_common::{CfError, CfResult};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded pool of workers computing values of type `T`.
pub struct ThreadPool<T> {
    sender: Option<Sender<Job>>,
    workers: Vec<thread::JoinHandle<()>>,
    pending: VecDeque<Receiver<thread::Result<T>>>,
}

impl<T: Send + 'static> ThreadPool<T> {
    /// Create a pool. `size <= 0` means one worker per available
    /// processor; otherwise exactly `size` workers.
    pub fn new(size: i32) -> Self {
        let n = if size <= 0 {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            size as usize
        };

        let (sender, receiver) = mpsc::channel::<Job>();
        let receiver = Arc::new(Mutex::new(receiver));

        let workers = (0..n)
            .map(|_| {
                let receiver = Arc::clone(&receiver);
                thread::spawn(move || loop {
                    let job = {
                        let guard = match receiver.lock() {
                            Ok(guard) => guard,
                            Err(poisoned) => poisoned.into_inner(),
                        };
                        guard.recv()
                    };
                    match job {
                        Ok(job) => job(),
                        // channel closed: the pool is shutting down
                        Err(_) => break,
                    }
                })
            })
            .collect();

        Self {
            sender: Some(sender),
            workers,
            pending: VecDeque::new(),
        }
    }

    /// Number of workers.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Queue a task. Its result is collected by the next
    /// [`wait_data`](Self::wait_data) call. Panics inside the task are
    /// captured and surfaced there, not propagated.
    pub fn push_task<F>(&mut self, task: F)
    where
        F: FnOnce() -> T + Send + 'static,
    {
        let (result_tx, result_rx) = mpsc::sync_channel(1);
        let job: Job = Box::new(move || {
            let result = catch_unwind(AssertUnwindSafe(task));
            // the receiver may be gone if the pool was dropped early
            let _ = result_tx.send(result);
        });
        if let Some(sender) = &self.sender {
            // workers hold the receiving end for the pool's lifetime
            let _ = sender.send(job);
        }
        self.pending.push_back(result_rx);
    }

    /// Block until every submitted task has finished, appending the
    /// results to `out` in submission order.
    pub fn wait_data(&mut self, out: &mut Vec<T>) -> CfResult<()> {
        while let Some(receiver) = self.pending.pop_front() {
            match receiver.recv() {
                Ok(Ok(value)) => out.push(value),
                Ok(Err(_)) => {
                    return Err(CfError::Internal(
                        "worker task panicked".to_string(),
                    ))
                }
                Err(_) => {
                    return Err(CfError::Internal(
                        "worker exited before returning a result".to_string(),
                    ))
                }
            }
        }
        Ok(())
    }
}

impl<T> Drop for ThreadPool<T> {
    fn drop(&mut self) {
        // closing the channel stops the workers
        self.sender.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_in_submission_order() {
        let mut pool = ThreadPool::new(4);
        for i in 0..16u64 {
            pool.push_task(move || {
                // vary the work so completion order differs
                std::thread::sleep(std::time::Duration::from_millis((16 - i) % 5));
                (i, i * i)
            });
        }
        let mut results = Vec::new();
        pool.wait_data(&mut results).unwrap();
        assert_eq!(results.len(), 16);
        for (i, (id, sq)) in results.iter().enumerate() {
            assert_eq!(*id, i as u64);
            assert_eq!(*sq, id * id);
        }
    }

    #[test]
    fn test_negative_size_uses_processor_count() {
        let pool: ThreadPool<()> = ThreadPool::new(-1);
        assert!(pool.size() >= 1);
        let pool: ThreadPool<()> = ThreadPool::new(3);
        assert_eq!(pool.size(), 3);
    }

    #[test]
    fn test_panic_is_captured() {
        let mut pool: ThreadPool<u32> = ThreadPool::new(2);
        pool.push_task(|| panic!("boom"));
        let mut results = Vec::new();
        assert!(pool.wait_data(&mut results).is_err());

        // the pool stays usable afterwards
        pool.push_task(|| 7);
        let mut results = Vec::new();
        pool.wait_data(&mut results).unwrap();
        assert_eq!(results, vec![7]);
    }
}
