//! Worker pool and timer thread shared by channels and registries.
//!
//! Handlers, maintenance passes and timer callbacks all run on the pool.
//! A panic in a job is logged and contained; the worker keeps serving.

use std::any::Any;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, error, trace};

use crate::config::NodelConfig;
use crate::error::{PeerError, Result};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size pool of named worker threads fed by an unbounded queue.
pub struct WorkerPool {
    name: String,
    sender: Mutex<Option<Sender<Job>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    pub fn new(name: &str, threads: usize) -> Result<Self> {
        let (tx, rx) = channel::unbounded::<Job>();
        let mut workers = Vec::with_capacity(threads.max(1));
        for index in 0..threads.max(1) {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || {
                    for job in rx.iter() {
                        run_contained(job);
                    }
                })
                .map_err(PeerError::Spawn)?;
            workers.push(handle);
        }

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
        })
    }

    /// Queue a job. Returns `false` once the pool has been shut down.
    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        let sender = lock(&self.sender);
        match sender.as_ref() {
            Some(tx) => tx.send(Box::new(job)).is_ok(),
            None => {
                trace!(pool = %self.name, "pool shut down; job dropped");
                false
            }
        }
    }

    /// Stop accepting jobs, let queued ones drain and join the workers.
    ///
    /// Safe to call from a worker; that worker is simply not joined.
    pub fn shutdown(&self) {
        lock(&self.sender).take();
        let workers = std::mem::take(&mut *lock(&self.workers));
        let current = thread::current().id();
        for worker in workers {
            if worker.thread().id() != current {
                let _ = worker.join();
            }
        }
    }
}

fn run_contained(job: Job) {
    if let Err(panic) = catch_unwind(AssertUnwindSafe(job)) {
        error!(panic = %panic_message(panic.as_ref()), "handler panicked; worker continues");
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Cancellation handle for a scheduled timer.
#[derive(Debug, Clone, Default)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
}

impl TimerHandle {
    /// Stop future firings. A firing already handed to the pool still checks
    /// this flag before running.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

type TimerTask = Arc<dyn Fn() + Send + Sync + 'static>;

struct ScheduledTimer {
    id: u64,
    due: Instant,
    period: Option<Duration>,
    handle: TimerHandle,
    task: TimerTask,
}

enum TimerCommand {
    Schedule(ScheduledTimer),
    Shutdown,
}

/// Single timer thread ordering deadlines in a min-heap. Due tasks run on
/// the worker pool, never on the timer thread itself.
pub struct Timers {
    commands: Sender<TimerCommand>,
    next_id: AtomicU64,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Timers {
    pub fn new(pool: Arc<WorkerPool>) -> Result<Self> {
        let (tx, rx) = channel::unbounded();
        let thread = thread::Builder::new()
            .name("nodel-timers".to_string())
            .spawn(move || timer_loop(rx, pool))
            .map_err(PeerError::Spawn)?;

        Ok(Self {
            commands: tx,
            next_id: AtomicU64::new(1),
            thread: Mutex::new(Some(thread)),
        })
    }

    /// Run `task` once after `delay`.
    pub fn schedule_once(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerHandle {
        let cell = Mutex::new(Some(task));
        let task: TimerTask = Arc::new(move || {
            if let Some(task) = lock(&cell).take() {
                task();
            }
        });
        self.schedule(delay, None, task)
    }

    /// Run `task` every `period`, first after one period.
    pub fn schedule_repeating(
        &self,
        period: Duration,
        task: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        self.schedule(period, Some(period), Arc::new(task))
    }

    fn schedule(&self, delay: Duration, period: Option<Duration>, task: TimerTask) -> TimerHandle {
        let handle = TimerHandle::default();
        let timer = ScheduledTimer {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            due: Instant::now() + delay,
            period,
            handle: handle.clone(),
            task,
        };
        if self.commands.send(TimerCommand::Schedule(timer)).is_err() {
            handle.cancel();
        }
        handle
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(TimerCommand::Shutdown);
        if let Some(thread) = lock(&self.thread).take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}

fn timer_loop(commands: Receiver<TimerCommand>, pool: Arc<WorkerPool>) {
    let mut heap: BinaryHeap<Reverse<(Instant, u64)>> = BinaryHeap::new();
    let mut timers: HashMap<u64, ScheduledTimer> = HashMap::new();

    loop {
        let now = Instant::now();
        while let Some(Reverse((due, id))) = heap.peek().copied() {
            if due > now {
                break;
            }
            heap.pop();
            let Some(mut timer) = timers.remove(&id) else {
                continue;
            };
            if timer.handle.is_cancelled() {
                continue;
            }

            let task = Arc::clone(&timer.task);
            let handle = timer.handle.clone();
            pool.execute(move || {
                if !handle.is_cancelled() {
                    task();
                }
            });

            if let Some(period) = timer.period {
                timer.due = now + period;
                heap.push(Reverse((timer.due, timer.id)));
                timers.insert(timer.id, timer);
            }
        }

        let command = match heap.peek() {
            Some(Reverse((due, _))) => {
                commands.recv_timeout(due.saturating_duration_since(Instant::now()))
            }
            None => commands.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match command {
            Ok(TimerCommand::Schedule(timer)) => {
                heap.push(Reverse((timer.due, timer.id)));
                timers.insert(timer.id, timer);
            }
            Ok(TimerCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
    }

    debug!(pending = timers.len(), "timer thread stopped");
}

/// Worker pool plus timers, shared by everything in one host.
pub struct Runtime {
    pool: Arc<WorkerPool>,
    timers: Timers,
}

impl Runtime {
    pub fn new(config: &NodelConfig) -> Result<Arc<Self>> {
        let pool = Arc::new(WorkerPool::new("nodel-worker", config.worker_threads)?);
        let timers = Timers::new(Arc::clone(&pool))?;
        Ok(Arc::new(Self { pool, timers }))
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    pub fn execute(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.pool.execute(job)
    }

    pub fn schedule_once(&self, delay: Duration, task: impl FnOnce() + Send + 'static) -> TimerHandle {
        self.timers.schedule_once(delay, task)
    }

    pub fn schedule_repeating(
        &self,
        period: Duration,
        task: impl Fn() + Send + Sync + 'static,
    ) -> TimerHandle {
        self.timers.schedule_repeating(period, task)
    }

    /// Stop the timer thread first so nothing new is queued, then drain the pool.
    pub fn shutdown(&self) {
        self.timers.shutdown();
        self.pool.shutdown();
    }
}

/// FIFO drained by at most one thread at a time.
///
/// Items pushed from any thread are handed to the drainer in push order and
/// never run concurrently with each other.
pub struct SerialQueue<T> {
    inner: Mutex<SerialState<T>>,
}

struct SerialState<T> {
    items: VecDeque<T>,
    draining: bool,
}

impl<T> Default for SerialQueue<T> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(SerialState {
                items: VecDeque::new(),
                draining: false,
            }),
        }
    }
}

impl<T: Send + 'static> SerialQueue<T> {
    pub fn push(&self, item: T) {
        lock(&self.inner).items.push_back(item);
    }

    /// Run `run` over queued items until the queue is empty.
    ///
    /// Returns at once if another thread is draining; that thread also
    /// picks up whatever this caller queued. Panics are logged per item.
    pub fn drain(&self, mut run: impl FnMut(T)) {
        {
            let mut state = lock(&self.inner);
            if state.draining {
                return;
            }
            state.draining = true;
        }
        loop {
            let next = {
                let mut state = lock(&self.inner);
                let next = state.items.pop_front();
                if next.is_none() {
                    state.draining = false;
                }
                next
            };
            let Some(item) = next else {
                return;
            };
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| run(item))) {
                error!(panic = %panic_message(panic.as_ref()), "serial job panicked");
            }
        }
    }

    /// Queue `item` and drain on the pool.
    pub fn submit(
        self: &Arc<Self>,
        pool: &WorkerPool,
        item: T,
        run: impl FnMut(T) + Send + 'static,
    ) -> bool {
        self.push(item);
        let queue = Arc::clone(self);
        pool.execute(move || queue.drain(run))
    }

    pub fn len(&self) -> usize {
        lock(&self.inner).items.len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.inner).items.is_empty()
    }
}

/// Lock a mutex, recovering the data if a panicking thread poisoned it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    #[test]
    fn pool_runs_jobs_and_survives_panics() {
        let pool = WorkerPool::new("test-pool", 2).unwrap();
        let (tx, rx) = channel::unbounded();

        pool.execute(|| panic!("boom"));
        for i in 0..4 {
            let tx = tx.clone();
            pool.execute(move || tx.send(i).unwrap());
        }

        let mut seen: Vec<i32> = (0..4)
            .map(|_| rx.recv_timeout(Duration::from_secs(2)).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        pool.shutdown();
        assert!(!pool.execute(|| {}));
    }

    #[test]
    fn serial_queue_keeps_push_order_across_workers() {
        let pool = WorkerPool::new("serial-test", 4).unwrap();
        let queue: Arc<SerialQueue<u32>> = Arc::new(SerialQueue::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let active = Arc::new(AtomicUsize::new(0));

        for i in 0..200 {
            let seen = Arc::clone(&seen);
            let active = Arc::clone(&active);
            queue.submit(&pool, i, move |value| {
                assert_eq!(active.fetch_add(1, Ordering::SeqCst), 0);
                seen.lock().unwrap().push(value);
                active.fetch_sub(1, Ordering::SeqCst);
            });
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().unwrap().len() < 200 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(*seen.lock().unwrap(), (0..200).collect::<Vec<_>>());
        assert!(queue.is_empty());
        pool.shutdown();
    }

    #[test]
    fn serial_queue_survives_a_panicking_item() {
        let queue: SerialQueue<u32> = SerialQueue::default();
        let mut seen = Vec::new();
        queue.push(1);
        queue.push(2);
        queue.push(3);
        queue.drain(|value| {
            if value == 2 {
                panic!("bad item");
            }
            seen.push(value);
        });
        assert_eq!(seen, vec![1, 3]);

        queue.push(4);
        queue.drain(|value| seen.push(value));
        assert_eq!(seen, vec![1, 3, 4]);
    }

    #[test]
    fn once_timer_fires_once() {
        let runtime = Runtime::new(&NodelConfig::default().with_worker_threads(2)).unwrap();
        let (tx, rx) = channel::unbounded();
        runtime.schedule_once(Duration::from_millis(20), move || tx.send(()).unwrap());

        assert!(rx.recv_timeout(Duration::from_secs(2)).is_ok());
        assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
        runtime.shutdown();
    }

    #[test]
    fn earlier_deadline_fires_first() {
        let runtime = Runtime::new(&NodelConfig::default().with_worker_threads(1)).unwrap();
        let (tx, rx) = channel::unbounded();
        let late = tx.clone();
        runtime.schedule_once(Duration::from_millis(150), move || late.send("late").unwrap());
        runtime.schedule_once(Duration::from_millis(10), move || tx.send("early").unwrap());

        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "early");
        assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "late");
        runtime.shutdown();
    }

    #[test]
    fn cancelled_repeating_timer_stops() {
        let runtime = Runtime::new(&NodelConfig::default().with_worker_threads(2)).unwrap();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        let handle = runtime.schedule_repeating(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        thread::sleep(Duration::from_millis(100));
        handle.cancel();
        thread::sleep(Duration::from_millis(30));
        let after_cancel = count.load(Ordering::SeqCst);
        assert!(after_cancel >= 2);
        thread::sleep(Duration::from_millis(80));
        assert_eq!(count.load(Ordering::SeqCst), after_cancel);
        runtime.shutdown();
    }

    #[test]
    fn cancel_before_due_prevents_firing() {
        let runtime = Runtime::new(&NodelConfig::default().with_worker_threads(1)).unwrap();
        let (tx, rx) = channel::unbounded::<()>();
        let handle = runtime.schedule_once(Duration::from_millis(50), move || tx.send(()).unwrap());
        handle.cancel();
        assert!(rx.recv_timeout(Duration::from_millis(150)).is_err());
        runtime.shutdown();
    }
}
