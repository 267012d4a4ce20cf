//! Asynchronous command queue of an emulated device.
//!
//! Each device owns one worker thread that executes enqueued batches in order.
//! Enqueueing returns as soon as the batch is accepted; completion is only
//! observed through [`CommandQueue::synchronize`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crate::error::{DistError, DistResult};

/// Work item executed by the device worker.
pub type Job = Box<dyn FnOnce() -> DistResult<()> + Send + 'static>;

enum Command {
    Batch(Job),
    Fence(Sender<()>),
}

/// In-order command queue with a dedicated worker.
pub struct CommandQueue {
    device: usize,
    sender: Mutex<Option<Sender<Command>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    failure: Arc<Mutex<Option<DistError>>>,
    launches: AtomicUsize,
}

impl CommandQueue {
    /// Spawn the worker of device `device`.
    pub fn new(device: usize) -> DistResult<Self> {
        let (sender, receiver) = mpsc::channel();
        let failure = Arc::new(Mutex::new(None));
        let worker = std::thread::Builder::new()
            .name(format!("device-{device}"))
            .spawn({
                let failure = Arc::clone(&failure);
                move || run_worker(device, receiver, failure)
            })
            .map_err(|err| DistError::config(format!("cannot start device {device}: {err}")))?;

        Ok(Self {
            device,
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            failure,
            launches: AtomicUsize::new(0),
        })
    }

    /// Device index.
    pub fn device(&self) -> usize {
        self.device
    }

    /// Number of batches accepted so far.
    pub fn launches(&self) -> usize {
        self.launches.load(Ordering::Acquire)
    }

    /// Hand a batch to the device. Returns once the queue accepted it.
    pub fn enqueue(&self, job: Job) -> DistResult<()> {
        self.push(Command::Batch(job))?;
        self.launches.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Block until every batch enqueued so far has run.
    ///
    /// Returns the first error raised by a batch since the last synchronization.
    pub fn synchronize(&self) -> DistResult<()> {
        let (done, wait) = mpsc::channel();
        self.push(Command::Fence(done))?;
        wait.recv().map_err(|_| {
            DistError::config(format!("device {} worker stopped", self.device))
        })?;

        let mut failure = self
            .failure
            .lock()
            .map_err(|_| DistError::Poisoned("device queue failure slot"))?;
        match failure.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn push(&self, command: Command) -> DistResult<()> {
        let sender = self
            .sender
            .lock()
            .map_err(|_| DistError::Poisoned("device queue sender"))?;
        sender
            .as_ref()
            .and_then(|tx| tx.send(command).ok())
            .ok_or_else(|| DistError::config(format!("device {} queue is closed", self.device)))
    }
}

fn run_worker(device: usize, receiver: Receiver<Command>, failure: Arc<Mutex<Option<DistError>>>) {
    for command in receiver {
        match command {
            Command::Batch(job) => {
                if let Err(err) = job() {
                    tracing::warn!(device, error = %err, "device batch failed");
                    if let Ok(mut slot) = failure.lock() {
                        slot.get_or_insert(err);
                    }
                }
            }
            Command::Fence(done) => {
                // The waiter may have given up; nothing to report then.
                let _ = done.send(());
            }
        }
    }
}

impl Drop for CommandQueue {
    fn drop(&mut self) {
        if let Ok(mut sender) = self.sender.lock() {
            sender.take();
        }
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[test]
    fn test_queue_runs_in_order() {
        let queue = CommandQueue::new(0).unwrap();
        let trace = Arc::new(Mutex::new(Vec::new()));
        for id in 0..8 {
            let trace = Arc::clone(&trace);
            queue
                .enqueue(Box::new(move || {
                    trace.lock().unwrap().push(id);
                    Ok(())
                }))
                .unwrap();
        }
        queue.synchronize().unwrap();
        assert_eq!(*trace.lock().unwrap(), (0..8).collect::<Vec<_>>());
        assert_eq!(queue.launches(), 8);
    }

    #[test]
    fn test_queue_reports_failure_once() {
        let queue = CommandQueue::new(1).unwrap();
        let ran = Arc::new(AtomicU32::new(0));
        queue
            .enqueue(Box::new(|| Err(DistError::kernel("gemm", "bad shape"))))
            .unwrap();
        let counter = Arc::clone(&ran);
        queue
            .enqueue(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();

        assert!(matches!(queue.synchronize(), Err(DistError::Kernel { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        assert!(queue.synchronize().is_ok());
    }
}
