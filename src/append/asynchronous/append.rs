// Copyright 2024 FastLabs Developers
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use arc_swap::ArcSwapOption;
use crossbeam_channel::Receiver;
use crossbeam_channel::SendTimeoutError;
use crossbeam_channel::TrySendError;

use crate::Append;
use crate::Error;
use crate::ErrorKind;
use crate::Trap;
use crate::append::asynchronous::EventRoute;
use crate::append::asynchronous::OverflowPolicy;
use crate::append::asynchronous::OverflowRegistry;
use crate::append::asynchronous::QueueState;
use crate::append::asynchronous::Task;
use crate::append::asynchronous::state::AsyncState;
use crate::append::asynchronous::state::WorkerHandle;
use crate::append::asynchronous::worker;
use crate::append::asynchronous::worker::Worker;
use crate::record::Record;
use crate::trap::DefaultTrap;
use crate::trap::WarnOnce;

const DEFAULT_CAPACITY: usize = 1024;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(100);
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// A composable appender, delivering records to other appenders on a background thread.
///
/// See the [module documentation](crate::append::asynchronous) for an example.
#[derive(Debug)]
pub struct Async {
    appends: Arc<[Box<dyn Append>]>,
    error_append: Option<Box<dyn Append>>,
    overflow: OverflowPolicy,
    capacity: Option<usize>,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    trap: Arc<dyn Trap>,

    state: ArcSwapOption<AsyncState>,
    shutdown: AtomicBool,
    worker: Mutex<Option<WorkerHandle>>,
    // a spare receiver to deliver whatever is left once the worker has exited
    leftover: Receiver<Task>,

    discarded: AtomicU64,
    discard_warning: WarnOnce,
    stopped_warning: WarnOnce,
}

impl Append for Async {
    fn append(&self, record: &Record) -> Result<(), Error> {
        let state = self.state.load();
        let Some(state) = state.as_ref() else {
            self.stopped_warning.trap_once(&*self.trap, || {
                Error::with_kind(
                    ErrorKind::Shutdown,
                    "async appender is stopped; records are discarded",
                )
            });
            self.drop_record(record.clone());
            return Ok(());
        };

        let on_consumer_thread = state.on_consumer_thread();
        let queue = QueueState::new(state.sender.len(), self.capacity);
        match self
            .overflow
            .decide(queue, on_consumer_thread, record.level())
        {
            EventRoute::Enqueue => self.enqueue(state, record.clone(), on_consumer_thread),
            EventRoute::Synchronous => self.dispatch_now(record),
            EventRoute::Discard => self.discard(record.clone()),
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        let Some(state) = self.state.load_full() else {
            return Ok(());
        };

        if state.on_consumer_thread() {
            return worker::flush(&self.appends);
        }

        let (done, flushed) = oneshot::channel();
        if let Some(task) = self.send_blocking(&state, Task::Flush { done }) {
            // the appender is stopping and the worker flushes on exit
            drop(task);
            return Ok(());
        }
        drop(state);

        let mut stopping_since = None;
        loop {
            match flushed.recv_timeout(self.poll_interval) {
                Ok(result) => return result,
                Err(oneshot::RecvTimeoutError::Disconnected) => {
                    return Err(Error::with_kind(
                        ErrorKind::Shutdown,
                        "async appender worker exited before flushing",
                    ));
                }
                Err(oneshot::RecvTimeoutError::Timeout) => {
                    if !self.shutdown.load(Ordering::Acquire) {
                        continue;
                    }
                    let since = *stopping_since.get_or_insert_with(Instant::now);
                    if since.elapsed() >= self.shutdown_timeout {
                        return Err(Error::with_kind(
                            ErrorKind::Shutdown,
                            "async appender stopped before flushing",
                        ));
                    }
                }
            }
        }
    }

    fn stop(&self) -> Result<(), Error> {
        self.shutdown.store(true, Ordering::Release);
        let Some(state) = self.state.swap(None) else {
            return Ok(());
        };

        if state.on_consumer_thread() {
            // cannot wait for ourselves; deliver what is queued here and let the worker exit
            // once it returns to the loop
            self.drain_leftover();
            if state.sender.try_send(Task::Shutdown).is_err() {
                self.trap.trap(&Error::with_kind(
                    ErrorKind::Shutdown,
                    "failed to signal shutdown to async appender worker",
                ));
            }
            drop(state);
            return self.stop_appends();
        }

        let deadline = Instant::now() + self.shutdown_timeout;
        if state.sender.send_deadline(Task::Shutdown, deadline).is_err() {
            self.trap.trap(&Error::with_kind(
                ErrorKind::Shutdown,
                "failed to signal shutdown to async appender worker",
            ));
        }

        let handle = self
            .worker
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let joined = match handle {
            None => true,
            Some(handle) => {
                let timeout = deadline.saturating_duration_since(Instant::now());
                match handle.join(timeout) {
                    Ok(()) => true,
                    Err(err) => {
                        self.trap.trap(&err);
                        false
                    }
                }
            }
        };

        if joined {
            // blocked producers give up within one poll interval once the worker is gone
            let deadline = deadline.max(Instant::now() + self.poll_interval * 2);
            self.wait_for_producers(state, deadline);
            self.drain_leftover();
        }

        self.stop_appends()
    }
}

impl Async {
    /// The number of records waiting in the queue.
    pub fn len(&self) -> usize {
        self.state.load().as_ref().map_or(0, |s| s.sender.len())
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The capacity of the queue, `None` if unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// The number of records dropped by the overflow policy or because the appender is stopped.
    pub fn discard_count(&self) -> u64 {
        self.discarded.load(Ordering::Acquire)
    }

    // Producers that loaded the state before it was swapped out may still be sending.
    fn wait_for_producers(&self, state: Arc<AsyncState>, deadline: Instant) {
        while Arc::strong_count(&state) > 1 {
            if Instant::now() >= deadline {
                self.trap.trap(&Error::with_kind(
                    ErrorKind::Shutdown,
                    "producers of async appender did not finish before the shutdown timeout",
                ));
                return;
            }
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    fn drain_leftover(&self) {
        while let Ok(task) = self.leftover.try_recv() {
            worker::handle_task(task, &self.appends, &*self.trap);
        }
    }

    fn stop_appends(&self) -> Result<(), Error> {
        let mut result = Ok(());
        let appends = self.appends.iter().chain(self.error_append.as_ref());
        for append in appends {
            if let Err(err) = append.stop() {
                let err = Error::dispatch("failed to stop appender").with_source(err);
                self.trap.trap(&err);
                if result.is_ok() {
                    result = Err(err);
                }
            }
        }
        result
    }

    fn enqueue(&self, state: &AsyncState, record: Record, on_consumer_thread: bool) {
        let task = Task::log(record);

        if on_consumer_thread {
            // never wait on ourselves, even if the queue filled up after the decision
            match state.sender.try_send(task) {
                Ok(()) => {}
                Err(TrySendError::Full(task) | TrySendError::Disconnected(task)) => {
                    if let Some(record) = task.into_record() {
                        self.dispatch_now(&record);
                    }
                }
            }
            return;
        }

        if let Some(task) = self.send_blocking(state, task)
            && let Some(record) = task.into_record()
        {
            self.discard(record);
        }
    }

    /// Send a task, waiting for free space in slices of the poll interval so that a shutdown is
    /// observed. Return the task if it could not be sent.
    fn send_blocking(&self, state: &AsyncState, mut task: Task) -> Option<Task> {
        loop {
            match state.sender.send_timeout(task, self.poll_interval) {
                Ok(()) => return None,
                Err(SendTimeoutError::Disconnected(t)) => return Some(t),
                Err(SendTimeoutError::Timeout(t)) => {
                    if self.shutdown.load(Ordering::Acquire) {
                        return Some(t);
                    }
                    task = t;
                }
            }
        }
    }

    fn dispatch_now(&self, record: &Record) {
        worker::dispatch(&self.appends, record, None, &*self.trap);
    }

    fn discard(&self, record: Record) {
        self.discard_warning.trap_once(&*self.trap, || {
            Error::with_kind(
                ErrorKind::Dispatch,
                "async appender queue is full; discarding records",
            )
            .with_context("capacity", format!("{:?}", self.capacity))
            .with_context("policy", format!("{:?}", self.overflow))
        });
        self.drop_record(record);
    }

    fn drop_record(&self, record: Record) {
        self.discarded.fetch_add(1, Ordering::AcqRel);
        if let Some(error_append) = &self.error_append
            && let Err(err) = error_append.append(&record)
        {
            let err = Error::dispatch("failed to append discarded record").with_source(err);
            self.trap.trap(&err);
        }
    }
}

impl Drop for Async {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

/// A builder for configuring an async appender.
pub struct AsyncBuilder {
    thread_name: String,
    appends: Vec<Box<dyn Append>>,
    error_append: Option<Box<dyn Append>>,
    capacity: Option<NonZeroUsize>,
    overflow: OverflowPolicy,
    poll_interval: Duration,
    shutdown_timeout: Duration,
    trap: Arc<dyn Trap>,
}

impl AsyncBuilder {
    /// Create a new async appender builder.
    ///
    /// The consumer thread is named `thread_name`.
    pub fn new(thread_name: impl Into<String>) -> AsyncBuilder {
        AsyncBuilder {
            thread_name: thread_name.into(),
            appends: vec![],
            error_append: None,
            capacity: NonZeroUsize::new(DEFAULT_CAPACITY),
            overflow: OverflowPolicy::Block,
            poll_interval: DEFAULT_POLL_INTERVAL,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            trap: Arc::new(DefaultTrap::default()),
        }
    }

    /// Set the maximum number of queued records.
    ///
    /// Default to 1024.
    #[must_use]
    pub fn capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    /// Never consider the queue full. The overflow policy has no effect.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.capacity = None;
        self
    }

    /// Set the overflow policy.
    ///
    /// Default to [`OverflowPolicy::Block`].
    #[must_use]
    pub fn overflow(mut self, overflow: OverflowPolicy) -> Self {
        self.overflow = overflow;
        self
    }

    /// Set the overflow policy by name, resolved with `registry`.
    ///
    /// Resolution failures are reported to the trap configured so far, and the default policy is
    /// used instead.
    #[must_use]
    pub fn overflow_named(
        mut self,
        registry: &OverflowRegistry,
        name: &str,
        threshold: Option<&str>,
    ) -> Self {
        self.overflow = registry.resolve(name, threshold, &*self.trap);
        self
    }

    /// Set how long the consumer waits for a record before checking its state again, and how
    /// long a blocked producer waits before checking for shutdown.
    ///
    /// Default to 100ms.
    #[must_use]
    pub fn poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set how long [`Append::stop`] waits for queued records to be delivered.
    ///
    /// Default to 5s.
    #[must_use]
    pub fn shutdown_timeout(mut self, shutdown_timeout: Duration) -> Self {
        self.shutdown_timeout = shutdown_timeout;
        self
    }

    /// Set the trap for this async appender.
    #[must_use]
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = Arc::from(trap.into());
        self
    }

    /// Add an appender to this async appender.
    #[must_use]
    pub fn append(mut self, append: impl Into<Box<dyn Append>>) -> Self {
        self.appends.push(append.into());
        self
    }

    /// Set an appender that receives the records dropped by the overflow policy.
    #[must_use]
    pub fn error_append(mut self, append: impl Into<Box<dyn Append>>) -> Self {
        self.error_append = Some(append.into());
        self
    }

    /// Build the async appender and start its consumer thread.
    ///
    /// # Panics
    ///
    /// Panics if the consumer thread cannot be spawned.
    pub fn build(self) -> Async {
        let Self {
            thread_name,
            appends,
            error_append,
            capacity,
            overflow,
            poll_interval,
            shutdown_timeout,
            trap,
        } = self;

        let appends: Arc<[Box<dyn Append>]> = appends.into_boxed_slice().into();
        let capacity = capacity.map(NonZeroUsize::get);

        let (sender, receiver) = match capacity {
            Some(capacity) => crossbeam_channel::bounded(capacity),
            None => crossbeam_channel::unbounded(),
        };
        let leftover = receiver.clone();
        let (exited_tx, exited_rx) = crossbeam_channel::bounded(0);

        let worker = Worker::new(
            receiver,
            appends.clone(),
            trap.clone(),
            poll_interval,
            exited_tx,
        );
        let thread_handle = std::thread::Builder::new()
            .name(thread_name)
            .spawn(move || worker.run())
            .expect("failed to spawn async appender thread");
        let consumer = thread_handle.thread().id();

        Async {
            appends,
            error_append,
            overflow,
            capacity,
            poll_interval,
            shutdown_timeout,
            trap,
            state: ArcSwapOption::from(Some(Arc::new(AsyncState::new(sender, consumer)))),
            shutdown: AtomicBool::new(false),
            worker: Mutex::new(Some(WorkerHandle::new(thread_handle, exited_rx))),
            leftover,
            discarded: AtomicU64::new(0),
            discard_warning: WarnOnce::default(),
            stopped_warning: WarnOnce::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::sync::mpsc;

    use super::*;
    use crate::append::Testing;
    use crate::record::Level;
    use crate::trap::testing::CollectTrap;

    fn record(level: Level, payload: &str) -> Record {
        Record::builder().level(level).payload(payload).build()
    }

    /// Blocks the consumer thread in `append` until released.
    #[derive(Debug)]
    struct Gate {
        entered: Mutex<mpsc::Sender<()>>,
        release: Arc<Barrier>,
    }

    impl Append for Gate {
        fn append(&self, _: &Record) -> Result<(), Error> {
            let _ = self.entered.lock().unwrap().send(());
            self.release.wait();
            Ok(())
        }
    }

    #[test]
    fn test_discard_policy_drops_only_verbose_records() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let release = Arc::new(Barrier::new(2));
        let testing = Testing::default();
        let trap = CollectTrap::default();

        let asynchronous = AsyncBuilder::new("async-discard")
            .capacity(NonZeroUsize::new(2).unwrap())
            .overflow(OverflowPolicy::discard())
            .trap(trap.clone())
            .append(Gate {
                entered: Mutex::new(entered_tx),
                release: release.clone(),
            })
            .append(testing.clone())
            .build();

        // the consumer holds the first record, the queue holds the next two
        asynchronous.append(&record(Level::Info, "held")).unwrap();
        entered_rx.recv().unwrap();
        asynchronous.append(&record(Level::Info, "q1")).unwrap();
        asynchronous.append(&record(Level::Info, "q2")).unwrap();
        assert_eq!(asynchronous.len(), 2);

        asynchronous.append(&record(Level::Debug, "dropped")).unwrap();
        asynchronous.append(&record(Level::Trace, "dropped")).unwrap();
        assert_eq!(asynchronous.len(), 2);
        assert_eq!(asynchronous.discard_count(), 2);

        // the last two releases let the queued records through
        for _ in 0..3 {
            release.wait();
        }
        asynchronous.stop().unwrap();

        assert_eq!(testing.payloads(), vec!["held", "q1", "q2"]);
        assert_eq!(trap.errors().len(), 1);
        drop(entered_rx);
    }

    #[test]
    fn test_discarded_records_reach_error_append() {
        let (entered_tx, entered_rx) = mpsc::channel();
        let release = Arc::new(Barrier::new(2));
        let errors = Testing::default();

        let asynchronous = AsyncBuilder::new("async-error-append")
            .capacity(NonZeroUsize::new(1).unwrap())
            .overflow(OverflowPolicy::Discard {
                threshold: Level::Error,
            })
            .trap(CollectTrap::default())
            .append(Gate {
                entered: Mutex::new(entered_tx),
                release: release.clone(),
            })
            .error_append(errors.clone())
            .build();

        asynchronous.append(&record(Level::Error, "held")).unwrap();
        entered_rx.recv().unwrap();
        asynchronous.append(&record(Level::Error, "queued")).unwrap();
        asynchronous.append(&record(Level::Warn, "overflow")).unwrap();

        release.wait();
        release.wait();
        asynchronous.stop().unwrap();

        assert_eq!(errors.payloads(), vec!["overflow"]);
        assert!(errors.is_stopped());
    }

    #[test]
    fn test_failing_appender_does_not_stall_queue() {
        let trap = CollectTrap::default();
        let testing = Testing::default();
        let asynchronous = AsyncBuilder::new("async-failing")
            .trap(trap.clone())
            .append(Testing::default().failing())
            .append(testing.clone())
            .build();

        for i in 0..10 {
            asynchronous.append(&record(Level::Info, &i.to_string())).unwrap();
        }
        asynchronous.stop().unwrap();

        assert_eq!(testing.len(), 10);
        let errors = trap.errors();
        assert_eq!(errors.len(), 10);
        assert!(errors.iter().all(|(kind, _)| *kind == ErrorKind::Dispatch));
    }

    #[test]
    fn test_stop_drains_and_is_idempotent() {
        let testing = Testing::default();
        let trap = CollectTrap::default();
        let asynchronous = AsyncBuilder::new("async-drain")
            .capacity(NonZeroUsize::new(64).unwrap())
            .trap(trap.clone())
            .append(testing.clone().with_delay(Duration::from_millis(1)))
            .build();

        for i in 0..50 {
            asynchronous.append(&record(Level::Info, &i.to_string())).unwrap();
        }
        asynchronous.stop().unwrap();
        asynchronous.stop().unwrap();

        let expected = (0..50).map(|i| i.to_string()).collect::<Vec<_>>();
        assert_eq!(testing.payloads(), expected);
        assert!(testing.is_stopped());
        assert!(trap.errors().is_empty());

        // records after stop are discarded with a single warning
        asynchronous.append(&record(Level::Info, "late")).unwrap();
        asynchronous.append(&record(Level::Info, "later")).unwrap();
        assert_eq!(asynchronous.discard_count(), 2);
        assert_eq!(trap.errors().len(), 1);
        assert_eq!(testing.len(), 50);
    }

    #[test]
    fn test_shutdown_timeout_is_bounded() {
        let trap = CollectTrap::default();
        let asynchronous = AsyncBuilder::new("async-slow")
            .capacity(NonZeroUsize::new(8).unwrap())
            .shutdown_timeout(Duration::from_millis(50))
            .trap(trap.clone())
            .append(Testing::default().with_delay(Duration::from_millis(200)))
            .build();

        for i in 0..4 {
            asynchronous.append(&record(Level::Info, &i.to_string())).unwrap();
        }

        let start = Instant::now();
        asynchronous.stop().unwrap();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert!(
            trap.errors()
                .iter()
                .any(|(kind, _)| *kind == ErrorKind::Shutdown)
        );
    }

    #[test]
    fn test_flush_from_producer_waits_for_queue() {
        let testing = Testing::default();
        let asynchronous = AsyncBuilder::new("async-flush")
            .append(testing.clone().with_delay(Duration::from_millis(5)))
            .build();

        for i in 0..5 {
            asynchronous.append(&record(Level::Info, &i.to_string())).unwrap();
        }
        asynchronous.flush().unwrap();
        assert_eq!(testing.len(), 5);
        assert_eq!(testing.flushes(), 1);
    }

    /// Stops its owning async appender from the consumer thread.
    #[derive(Debug, Default)]
    struct StopOwner {
        owner: std::sync::OnceLock<std::sync::Weak<Async>>,
    }

    impl Append for StopOwner {
        fn append(&self, _: &Record) -> Result<(), Error> {
            if let Some(owner) = self.owner.get().and_then(|owner| owner.upgrade()) {
                owner.stop()?;
            }
            Ok(())
        }
    }

    #[test]
    fn test_stop_on_consumer_thread_stops_appenders() {
        let testing = Testing::default();
        let error_testing = Testing::default();
        let trap = CollectTrap::default();
        let stop_owner = Arc::new(StopOwner::default());
        let asynchronous = Arc::new(
            AsyncBuilder::new("async-self-stop")
                .trap(trap.clone())
                .append(testing.clone())
                .append(stop_owner.clone())
                .error_append(error_testing.clone())
                .build(),
        );
        stop_owner
            .owner
            .set(Arc::downgrade(&asynchronous))
            .unwrap();

        asynchronous.append(&record(Level::Info, "hello")).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while !testing.is_stopped() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(testing.is_stopped());
        assert!(error_testing.is_stopped());
        assert_eq!(testing.payloads(), vec!["hello"]);
        assert!(trap.errors().is_empty());

        // a later stop from another thread is a no-op
        asynchronous.stop().unwrap();
    }
}
