//====================================================================

use std::{
    collections::VecDeque,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::JoinHandle,
};

use crossbeam::channel::{Receiver, Sender, TryRecvError};
use parking_lot::Mutex;

//====================================================================

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Runs load jobs somewhere other than the calling frame.
pub trait TaskSpawner: 'static + Send + Sync {
    fn spawn(&self, job: Job);
}

//====================================================================

#[derive(Clone, Default, Debug)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

//====================================================================

#[derive(Debug, PartialEq, Eq)]
pub enum TaskPoll<T> {
    Pending,
    Ready(T),
    Cancelled,
}

/// Handle to a piece of work started on a [`TaskSpawner`].
///
/// The result is delivered at most once. Polling again after `Ready`, or
/// polling a task whose job was dropped without producing a value, yields
/// `Cancelled`.
#[derive(Debug)]
pub struct LoadTask<T> {
    receiver: Receiver<T>,
    token: CancelToken,
}

impl<T: Send + 'static> LoadTask<T> {
    pub fn spawn<F>(spawner: &dyn TaskSpawner, work: F) -> Self
    where
        F: FnOnce(&CancelToken) -> T + Send + 'static,
    {
        let (sender, receiver) = crossbeam::channel::bounded(1);
        let token = CancelToken::new();
        let job_token = token.clone();

        spawner.spawn(Box::new(move || {
            if job_token.is_cancelled() {
                return;
            }

            let result = work(&job_token);

            // Cancelled while running. Result dropped here.
            if job_token.is_cancelled() {
                return;
            }

            Self::deliver(sender, result);
        }));

        Self { receiver, token }
    }

    pub fn ready(value: T) -> Self {
        let (sender, receiver) = crossbeam::channel::bounded(1);
        Self::deliver(sender, value);

        Self {
            receiver,
            token: CancelToken::new(),
        }
    }

    fn deliver(sender: Sender<T>, value: T) {
        if sender.send(value).is_err() {
            log::trace!("Load task dropped before its result arrived");
        }
    }
}

impl<T> LoadTask<T> {
    pub fn poll(&mut self) -> TaskPoll<T> {
        if self.token.is_cancelled() {
            return TaskPoll::Cancelled;
        }

        match self.receiver.try_recv() {
            Ok(value) => TaskPoll::Ready(value),
            Err(TryRecvError::Empty) => TaskPoll::Pending,
            Err(TryRecvError::Disconnected) => TaskPoll::Cancelled,
        }
    }

    #[inline]
    pub fn cancel(self) {
        self.token.cancel();
    }

    #[inline]
    pub fn token(&self) -> &CancelToken {
        &self.token
    }
}

//====================================================================

pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(threads: usize) -> std::io::Result<Self> {
        let (sender, receiver) = crossbeam::channel::unbounded::<Job>();

        let workers = (0..threads.max(1))
            .map(|index| {
                let receiver = receiver.clone();

                std::thread::Builder::new()
                    .name(format!("stowage-worker-{}", index))
                    .spawn(move || {
                        while let Ok(job) = receiver.recv() {
                            if std::panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                                log::error!("Load job panicked on worker {}", index);
                            }
                        }
                    })
            })
            .collect::<std::io::Result<Vec<_>>>()?;

        log::debug!("Started worker pool with {} threads", workers.len());

        Ok(Self {
            sender: Some(sender),
            workers,
        })
    }

    #[inline]
    pub fn threads(&self) -> usize {
        self.workers.len()
    }
}

impl TaskSpawner for WorkerPool {
    fn spawn(&self, job: Job) {
        match &self.sender {
            Some(sender) => {
                if sender.send(job).is_err() {
                    log::warn!("Worker pool has shut down, dropping job");
                }
            }
            None => log::warn!("Worker pool has shut down, dropping job"),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();

        self.workers.drain(..).for_each(|worker| {
            if worker.join().is_err() {
                log::warn!("Worker thread exited with a panic");
            }
        });
    }
}

//====================================================================

/// Queues jobs until the owner calls [`DeferredSpawner::run_pending`].
/// Lets a frame loop (or a test) decide exactly when background work happens.
#[derive(Default)]
pub struct DeferredSpawner {
    queue: Mutex<VecDeque<Job>>,
}

impl DeferredSpawner {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the jobs queued so far. Jobs queued while running wait for the next call.
    pub fn run_pending(&self) -> usize {
        let jobs = std::mem::take(&mut *self.queue.lock());
        let count = jobs.len();

        jobs.into_iter().for_each(|job| job());

        count
    }

    #[inline]
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl TaskSpawner for DeferredSpawner {
    #[inline]
    fn spawn(&self, job: Job) {
        self.queue.lock().push_back(job);
    }
}

//====================================================================


//====================================================================
