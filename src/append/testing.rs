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

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::Error;
use crate::append::Append;
use crate::record::Record;

/// An appender that keeps log records in memory so that a test harness can inspect them.
///
/// Clones share the same buffer, so a test can hand one clone to a composite appender and keep
/// the other to observe what was delivered.
///
/// # Examples
///
/// ```
/// use logforth_delivery::append::Append;
/// use logforth_delivery::append::Testing;
/// use logforth_delivery::record::Record;
///
/// let testing = Testing::default();
/// let observer = testing.clone();
///
/// testing.append(&Record::builder().payload("hello").build()).unwrap();
/// assert_eq!(observer.payloads(), vec!["hello"]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct Testing {
    shared: Arc<Shared>,
    delay: Option<Duration>,
    failing: bool,
}

#[derive(Debug, Default)]
struct Shared {
    records: Mutex<Vec<Record>>,
    started: AtomicBool,
    stopped: AtomicBool,
    flushes: AtomicUsize,
}

impl Testing {
    /// Sleep for `delay` before keeping each record, to emulate a slow sink.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Reject every record with an error.
    #[must_use]
    pub fn failing(mut self) -> Self {
        self.failing = true;
        self
    }

    /// All records appended so far, in order.
    pub fn records(&self) -> Vec<Record> {
        self.lock().clone()
    }

    /// The payloads of all records appended so far, in order.
    pub fn payloads(&self) -> Vec<String> {
        self.lock().iter().map(|r| r.payload().to_owned()).collect()
    }

    /// The number of records appended so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether no record has been appended.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Whether [`Append::start`] has been called.
    pub fn is_started(&self) -> bool {
        self.shared.started.load(Ordering::Acquire)
    }

    /// Whether [`Append::stop`] has been called.
    pub fn is_stopped(&self) -> bool {
        self.shared.stopped.load(Ordering::Acquire)
    }

    /// The number of times [`Append::flush`] has been called.
    pub fn flushes(&self) -> usize {
        self.shared.flushes.load(Ordering::Acquire)
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Record>> {
        self.shared
            .records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}

impl Append for Testing {
    fn start(&self) -> Result<(), Error> {
        self.shared.started.store(true, Ordering::Release);
        Ok(())
    }

    fn append(&self, record: &Record) -> Result<(), Error> {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        if self.failing {
            return Err(Error::dispatch("testing appender rejects every record"));
        }
        if self.is_stopped() {
            return Err(Error::dispatch("testing appender is stopped"));
        }
        self.lock().push(record.clone());
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        self.shared.flushes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    fn stop(&self) -> Result<(), Error> {
        self.shared.stopped.store(true, Ordering::Release);
        Ok(())
    }
}
