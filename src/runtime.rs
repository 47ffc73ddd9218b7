//! The three cooperative, single-threaded queues from SPEC_FULL.md §5:
//! `core` (state machines), `media` (call transport/ICE/media engine) and
//! `application` (delegate callbacks).
//!
//! Each queue is realised as one `tokio::task` draining an unbounded mpsc
//! channel of boxed closures, in strict FIFO order — a direct async
//! rendition of "one single-threaded actor per queue". Posting from any
//! queue (or from outside the runtime entirely) is just a channel send;
//! the job itself runs later, on the target queue's task, so no lock is
//! ever held across the post.

use tokio::sync::mpsc;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A single cooperative queue: jobs posted to it run strictly in the order
/// they were posted, one at a time, never concurrently with each other.
pub struct Queue {
    tx: mpsc::UnboundedSender<Job>,
    _handle: tokio::task::JoinHandle<()>,
}

impl Queue {
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job();
            }
        });
        Self {
            tx,
            _handle: handle,
        }
    }

    /// Post a job to this queue. Never blocks; the job runs asynchronously
    /// on the queue's owning task. Returns `false` if the queue's task has
    /// already shut down (the job is dropped, not run).
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }

    /// Post a job and await its result through a oneshot channel. Useful at
    /// the few entry points (tests, synchronous FFI-ish calls) that need to
    /// observe a queue's output rather than fire-and-forget.
    pub async fn post_and_wait<R, F>(&self, job: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let posted = self.post(move || {
            let _ = tx.send(job());
        });
        if !posted {
            return None;
        }
        rx.await.ok()
    }
}

/// The three named queues, bundled together so every component can be
/// constructed with a single `&Queues` reference instead of three loose
/// handles.
pub struct Queues {
    pub core: Queue,
    pub media: Queue,
    pub application: Queue,
}

impl Queues {
    pub fn spawn() -> Self {
        Self {
            core: Queue::spawn(),
            media: Queue::spawn(),
            application: Queue::spawn(),
        }
    }
}

/// Dedupes "please re-run step() soon" self-notifications (SPEC_FULL.md
/// §9: "async self-notifications used to defer work" become a single
/// pending-flag-guarded post).
#[derive(Default)]
pub struct StepPending(std::sync::atomic::AtomicBool);

impl StepPending {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if this call should actually post a step job (it was
    /// not already pending); flips the flag to pending as a side effect.
    pub fn mark_and_should_post(&self) -> bool {
        !self.0.swap(true, std::sync::atomic::Ordering::AcqRel)
    }

    /// Called by the step job itself right before running, so a
    /// notification arriving during the step schedules exactly one more.
    pub fn clear(&self) {
        self.0.store(false, std::sync::atomic::Ordering::Release);
    }
}
