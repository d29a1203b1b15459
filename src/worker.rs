//! Worker (C6).
//!
//! A single background thread drains a FIFO queue of jobs. Each job closes
//! over a [`Weak`] reference to its target waveform so a waveform dropped
//! mid-flight makes the job a no-op rather than keeping it alive; the
//! worker resolves the weak reference, runs `work`, and posts the result to
//! the main thread through an mpsc channel for the caller to drain with
//! [`WorkerHandle::drain`] — the same `try_recv`-in-a-loop shape the rest of
//! the codebase uses to bring background results back onto the main
//! thread. Generic over the message type `M` so both peakfile-generation
//! and hi-res-peak jobs can share one worker implementation.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use crate::waveform::{Waveform, WaveformId};

/// Flag shared between an enqueued job and [`WorkerHandle::cancel_waveform`];
/// flipping it causes the worker to skip `work` and `done` for that job.
type CancelFlag = Arc<AtomicBool>;

/// What family of background work a job performs, used only to tell two
/// jobs against the same waveform apart for deduplication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Peakfile,
    HiresBlock,
}

/// Identity of a job for deduplication purposes: same waveform, same kind,
/// same block (where applicable) is the same logical request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub waveform: WaveformId,
    pub kind: JobKind,
    pub block_index: Option<u64>,
}

struct Job<M> {
    key: JobKey,
    cancelled: CancelFlag,
    work: Box<dyn FnOnce() -> Option<M> + Send>,
}

struct Queue<M> {
    jobs: VecDeque<Job<M>>,
    shutdown: bool,
}

/// Point-in-time counters for diagnostics and logging (`original_source`'s
/// `worker.c` keeps equivalent counters for its idle-queue draining).
#[derive(Debug, Default)]
pub struct WorkerStats {
    pub jobs_run: u64,
    pub jobs_cancelled: u64,
    pub queue_depth: usize,
}

struct Counters {
    jobs_run: AtomicU64,
    jobs_cancelled: AtomicU64,
}

/// Handle to the worker thread: enqueue jobs, cancel a waveform's pending
/// jobs, and drain completion messages on the main thread.
pub struct WorkerHandle<M: Send + 'static> {
    queue: Arc<(Mutex<Queue<M>>, Condvar)>,
    counters: Arc<Counters>,
    cancel_flags: Mutex<std::collections::HashMap<WaveformId, Vec<CancelFlag>>>,
    receiver: Receiver<M>,
    thread: Option<JoinHandle<()>>,
}

impl<M: Send + 'static> WorkerHandle<M> {
    /// Spawn the worker thread.
    pub fn spawn() -> Self {
        let queue = Arc::new((
            Mutex::new(Queue {
                jobs: VecDeque::new(),
                shutdown: false,
            }),
            Condvar::new(),
        ));
        let counters = Arc::new(Counters {
            jobs_run: AtomicU64::new(0),
            jobs_cancelled: AtomicU64::new(0),
        });
        let (sender, receiver): (Sender<M>, Receiver<M>) = mpsc::channel();

        let thread_queue = queue.clone();
        let thread_counters = counters.clone();
        let thread = std::thread::Builder::new()
            .name("peakwave-worker".into())
            .spawn(move || run_worker_loop(thread_queue, thread_counters, sender))
            .expect("spawn peakwave worker thread");

        Self {
            queue,
            counters,
            cancel_flags: Mutex::new(std::collections::HashMap::new()),
            receiver,
            thread: Some(thread),
        }
    }

    /// Enqueue a job against `waveform` keyed by `key`. `work` runs on the
    /// worker thread and returns `None` to signal a failed/cancelled-mid-flight
    /// attempt (no message is posted in that case).
    ///
    /// If a non-cancelled job with the same `key` is already pending, this is
    /// a no-op: the spec's ordering guarantee (§5) requires at most one
    /// in-flight request per `(waveform, block)` pair, since callers such as
    /// the actor's draw loop call `load_block` every frame a block isn't
    /// ready yet and would otherwise flood the queue with duplicates.
    pub fn enqueue(
        &self,
        waveform: &Arc<Waveform>,
        key: JobKey,
        work: impl FnOnce(std::sync::Weak<Waveform>) -> Option<M> + Send + 'static,
    ) {
        let (lock, cvar) = &*self.queue;
        let mut queue = lock.lock().expect("worker queue lock");
        let duplicate = queue
            .jobs
            .iter()
            .any(|job| job.key == key && !job.cancelled.load(Ordering::SeqCst));
        if duplicate {
            return;
        }

        let cancelled: CancelFlag = Arc::new(AtomicBool::new(false));
        let weak = Arc::downgrade(waveform);
        let id = waveform.id();

        self.cancel_flags
            .lock()
            .expect("worker cancel flags lock")
            .entry(id)
            .or_default()
            .push(cancelled.clone());

        queue.jobs.push_back(Job {
            key,
            cancelled,
            work: Box::new(move || work(weak)),
        });
        cvar.notify_one();
    }

    /// Mark every pending job against `waveform` cancelled. Already-running
    /// work is not interrupted, but its completion message is dropped.
    pub fn cancel_waveform(&self, waveform: WaveformId) {
        let mut flags = self.cancel_flags.lock().expect("worker cancel flags lock");
        if let Some(list) = flags.remove(&waveform) {
            for flag in list {
                flag.store(true, Ordering::SeqCst);
            }
        }
    }

    /// Drain every completion message currently available without blocking.
    pub fn drain(&self) -> Vec<M> {
        let mut out = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(message) => out.push(message),
                Err(TryRecvError::Empty | TryRecvError::Disconnected) => break,
            }
        }
        out
    }

    pub fn stats(&self) -> WorkerStats {
        let (lock, _) = &*self.queue;
        let queue_depth = lock.lock().expect("worker queue lock").jobs.len();
        WorkerStats {
            jobs_run: self.counters.jobs_run.load(Ordering::Relaxed),
            jobs_cancelled: self.counters.jobs_cancelled.load(Ordering::Relaxed),
            queue_depth,
        }
    }
}

impl<M: Send + 'static> Drop for WorkerHandle<M> {
    fn drop(&mut self) {
        {
            let (lock, cvar) = &*self.queue;
            lock.lock().expect("worker queue lock").shutdown = true;
            cvar.notify_all();
        }
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

fn run_worker_loop<M: Send + 'static>(
    queue: Arc<(Mutex<Queue<M>>, Condvar)>,
    counters: Arc<Counters>,
    sender: Sender<M>,
) {
    loop {
        let job = {
            let (lock, cvar) = &*queue;
            let mut guard = lock.lock().expect("worker queue lock");
            loop {
                if let Some(job) = guard.jobs.pop_front() {
                    break Some(job);
                }
                if guard.shutdown {
                    break None;
                }
                guard = cvar.wait(guard).expect("worker queue condvar wait");
            }
        };
        let Some(job) = job else { break };

        if job.cancelled.load(Ordering::SeqCst) {
            counters.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
            continue;
        }

        let _ = job.key;
        if let Some(message) = (job.work)() {
            counters.jobs_run.fetch_add(1, Ordering::Relaxed);
            if sender.send(message).is_err() {
                break;
            }
        } else {
            counters.jobs_cancelled.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::time::Duration;

    fn peakfile_key(waveform: WaveformId) -> JobKey {
        JobKey { waveform, kind: JobKind::Peakfile, block_index: None }
    }

    fn hires_key(waveform: WaveformId, block_index: u64) -> JobKey {
        JobKey { waveform, kind: JobKind::HiresBlock, block_index: Some(block_index) }
    }

    #[test]
    fn jobs_against_dropped_waveform_yield_no_message() {
        let worker: WorkerHandle<u64> = WorkerHandle::spawn();
        let waveform = Waveform::new("a.wav".into(), 100, 1, 44_100);

        worker.enqueue(&waveform, peakfile_key(waveform.id()), |weak| weak.upgrade().map(|_| 1));
        drop(waveform);

        std::thread::sleep(Duration::from_millis(50));
        let messages = worker.drain();
        assert!(messages.is_empty());
    }

    #[test]
    fn cancel_waveform_suppresses_pending_jobs() {
        let worker: WorkerHandle<u64> = WorkerHandle::spawn();
        let waveform = Waveform::new("a.wav".into(), 100, 1, 44_100);
        let (tx, rx) = mpsc::channel();

        // Block the worker thread on the first job so the rest queue up
        // behind it before we cancel.
        worker.enqueue(&waveform, hires_key(waveform.id(), 0), move |_weak| {
            rx.recv_timeout(Duration::from_secs(2)).ok();
            None
        });
        for i in 1..11u64 {
            worker.enqueue(&waveform, hires_key(waveform.id(), i), |weak| weak.upgrade().map(|_| 1));
        }
        worker.cancel_waveform(waveform.id());
        let _ = tx.send(());

        std::thread::sleep(Duration::from_millis(100));
        let messages = worker.drain();
        assert!(messages.is_empty());
    }

    #[test]
    fn jobs_run_in_enqueue_order() {
        let worker: WorkerHandle<u64> = WorkerHandle::spawn();
        let waveform = Waveform::new("a.wav".into(), 100, 1, 44_100);
        for i in 0..5u64 {
            worker.enqueue(&waveform, hires_key(waveform.id(), i), move |weak| weak.upgrade().map(|_| i));
        }
        std::thread::sleep(Duration::from_millis(50));
        let messages = worker.drain();
        assert_eq!(messages, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn duplicate_pending_job_is_not_enqueued_twice() {
        let worker: WorkerHandle<u64> = WorkerHandle::spawn();
        let waveform = Waveform::new("a.wav".into(), 100, 1, 44_100);
        let (tx, rx) = mpsc::channel();

        // Block the worker thread so the next two enqueues stay pending.
        worker.enqueue(&waveform, hires_key(waveform.id(), 99), move |_weak| {
            rx.recv_timeout(Duration::from_secs(2)).ok();
            None
        });
        worker.enqueue(&waveform, hires_key(waveform.id(), 0), |weak| weak.upgrade().map(|_| 1));
        worker.enqueue(&waveform, hires_key(waveform.id(), 0), |weak| weak.upgrade().map(|_| 2));
        assert_eq!(worker.stats().queue_depth, 2);

        let _ = tx.send(());
        std::thread::sleep(Duration::from_millis(50));
        let messages = worker.drain();
        assert_eq!(messages, vec![1]);
    }
}
