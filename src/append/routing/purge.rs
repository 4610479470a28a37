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

use std::thread;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;

/// Removes routes that have not received a record for a while.
///
/// Every `check_interval`, routes idle for at least `idle_timeout` are removed and their
/// appenders stopped. The next record for a purged key creates the route again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdlePurgePolicy {
    idle_timeout: Duration,
    check_interval: Duration,
}

impl IdlePurgePolicy {
    /// Creates a new [`IdlePurgePolicy`] that checks once per `idle_timeout`.
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            idle_timeout,
            check_interval: idle_timeout,
        }
    }

    /// Set how often idle routes are looked for.
    #[must_use]
    pub fn check_interval(mut self, check_interval: Duration) -> Self {
        self.check_interval = check_interval;
        self
    }

    /// How long a route may stay unused before it is purged.
    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub(crate) fn interval(&self) -> Duration {
        // a zero interval would spin
        self.check_interval.max(Duration::from_millis(1))
    }
}

/// A background thread that runs a purge cycle on a fixed interval until cancelled.
#[derive(Debug)]
pub(crate) struct PurgeTimer {
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PurgeTimer {
    pub(crate) fn spawn(
        thread_name: String,
        interval: Duration,
        tick: impl Fn() + Send + 'static,
    ) -> Self {
        let (cancel, cancelled) = crossbeam_channel::bounded::<()>(0);
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || {
                loop {
                    match cancelled.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => tick(),
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            })
            .expect("failed to spawn purge thread");

        Self {
            cancel: Some(cancel),
            handle: Some(handle),
        }
    }

    /// Stop the thread and wait for the running cycle, if any, to finish.
    pub(crate) fn cancel(&mut self) {
        drop(self.cancel.take());
        let Some(handle) = self.handle.take() else {
            return;
        };
        // a route appender stopped by the timer itself may end up here
        if handle.thread().id() == thread::current().id() {
            return;
        }
        let _ = handle.join();
    }
}

impl Drop for PurgeTimer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    use super::*;

    #[test]
    fn test_timer_ticks_until_cancelled() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let mut timer = PurgeTimer::spawn("purge-test".to_string(), Duration::from_millis(5), {
            let ticks = ticks.clone();
            move || {
                ticks.fetch_add(1, Ordering::SeqCst);
            }
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        while ticks.load(Ordering::SeqCst) < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert!(ticks.load(Ordering::SeqCst) >= 3);

        let start = Instant::now();
        timer.cancel();
        assert!(start.elapsed() < Duration::from_secs(1));

        let after_cancel = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(30));
        assert_eq!(ticks.load(Ordering::SeqCst), after_cancel);
    }

    #[test]
    fn test_check_interval_defaults_to_idle_timeout() {
        let policy = IdlePurgePolicy::new(Duration::from_secs(60));
        assert_eq!(policy.interval(), Duration::from_secs(60));
        let policy = policy.check_interval(Duration::ZERO);
        assert_eq!(policy.interval(), Duration::from_millis(1));
        assert_eq!(policy.idle_timeout(), Duration::from_secs(60));
    }
}
