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

//! Log record and level.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::thread;
use std::thread::ThreadId;
use std::time::SystemTime;

use crate::Error;

/// An immutable snapshot of one log event.
///
/// A record owns all of its data, so it can be moved across threads (for example into the queue
/// of an [`Async`](crate::append::Async) appender) without borrowing from the call site. Cloning
/// is cheap: the payload is shared.
#[derive(Clone, Debug)]
pub struct Record {
    // the observed time
    now: SystemTime,

    // the metadata
    level: Level,
    target: Cow<'static, str>,
    thread: ThreadInfo,
    marker: Option<Cow<'static, str>>,

    // the payload
    payload: Arc<str>,

    // structural logging, copied at creation
    context: Arc<BTreeMap<String, String>>,
}

/// The thread a record was produced on.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ThreadInfo {
    id: ThreadId,
    name: Option<Arc<str>>,
}

impl ThreadInfo {
    /// Capture the current thread.
    pub fn current() -> Self {
        let current = thread::current();
        Self {
            id: current.id(),
            name: current.name().map(Arc::from),
        }
    }

    /// The thread id.
    pub fn id(&self) -> ThreadId {
        self.id
    }

    /// The thread name, if any.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl Record {
    /// Returns a new builder.
    pub fn builder() -> RecordBuilder {
        RecordBuilder::default()
    }

    /// The observed time.
    pub fn time(&self) -> SystemTime {
        self.now
    }

    /// The verbosity level of the message.
    pub fn level(&self) -> Level {
        self.level
    }

    /// The logger name.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// The thread the record was produced on.
    pub fn thread(&self) -> &ThreadInfo {
        &self.thread
    }

    /// The optional marker.
    pub fn marker(&self) -> Option<&str> {
        self.marker.as_deref()
    }

    /// The message body.
    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// The context map.
    pub fn context(&self) -> &BTreeMap<String, String> {
        &self.context
    }

    /// Look up one entry in the context map.
    pub fn context_value(&self, key: &str) -> Option<&str> {
        self.context.get(key).map(String::as_str)
    }

    /// Create a builder initialized with the current record's values.
    ///
    /// The new record does not share state with this one: changing the builder's context does
    /// not affect `self`.
    pub fn to_builder(&self) -> RecordBuilder {
        RecordBuilder {
            record: self.clone(),
        }
    }
}

/// Builder for [`Record`].
#[derive(Debug)]
pub struct RecordBuilder {
    record: Record,
}

impl Default for RecordBuilder {
    fn default() -> Self {
        RecordBuilder {
            record: Record {
                now: SystemTime::now(),
                level: Level::Info,
                target: Cow::Borrowed(""),
                thread: ThreadInfo::current(),
                marker: None,
                payload: Arc::from(""),
                context: Arc::default(),
            },
        }
    }
}

impl RecordBuilder {
    /// Set [`time`](Record::time).
    #[must_use]
    pub fn time(mut self, now: SystemTime) -> Self {
        self.record.now = now;
        self
    }

    /// Set [`level`](Record::level).
    #[must_use]
    pub fn level(mut self, level: Level) -> Self {
        self.record.level = level;
        self
    }

    /// Set [`target`](Record::target).
    #[must_use]
    pub fn target(mut self, target: impl Into<Cow<'static, str>>) -> Self {
        self.record.target = target.into();
        self
    }

    /// Set [`marker`](Record::marker).
    #[must_use]
    pub fn marker(mut self, marker: impl Into<Cow<'static, str>>) -> Self {
        self.record.marker = Some(marker.into());
        self
    }

    /// Set [`payload`](Record::payload).
    #[must_use]
    pub fn payload(mut self, payload: impl AsRef<str>) -> Self {
        self.record.payload = Arc::from(payload.as_ref());
        self
    }

    /// Add one entry to the [`context`](Record::context) map.
    #[must_use]
    pub fn context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        Arc::make_mut(&mut self.record.context).insert(key.into(), value.into());
        self
    }

    /// Replace the whole [`context`](Record::context) map.
    #[must_use]
    pub fn context_map(mut self, context: BTreeMap<String, String>) -> Self {
        self.record.context = Arc::new(context);
        self
    }

    /// Set [`thread`](Record::thread).
    #[must_use]
    pub fn thread(mut self, thread: ThreadInfo) -> Self {
        self.record.thread = thread;
        self
    }

    /// Invoke the builder and return a `Record`.
    pub fn build(self) -> Record {
        self.record
    }
}

/// An enum representing the available verbosity levels of the logger.
///
/// Levels are ordered by verbosity: a more severe level compares less than a less severe one,
/// so `Level::Fatal < Level::Trace`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Designates failures the application cannot recover from.
    Fatal,
    /// Designates very serious errors.
    Error,
    /// Designates hazardous situations.
    Warn,
    /// Designates useful information.
    Info,
    /// Designates lower priority information.
    Debug,
    /// Designates very low priority, often extremely verbose, information.
    Trace,
}

impl Level {
    /// All levels, from the most severe to the least severe.
    pub const ALL: [Level; 6] = [
        Level::Fatal,
        Level::Error,
        Level::Warn,
        Level::Info,
        Level::Debug,
        Level::Trace,
    ];

    /// Return the string representation of the `Level`.
    ///
    /// This returns the same string as the `fmt::Display` implementation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Fatal => "FATAL",
            Level::Error => "ERROR",
            Level::Warn => "WARN",
            Level::Info => "INFO",
            Level::Debug => "DEBUG",
            Level::Trace => "TRACE",
        }
    }

    /// Whether this level is less severe than `other`.
    ///
    /// ```
    /// use logforth_delivery::record::Level;
    ///
    /// assert!(Level::Debug.is_less_severe_than(Level::Info));
    /// assert!(!Level::Info.is_less_severe_than(Level::Info));
    /// assert!(!Level::Fatal.is_less_severe_than(Level::Info));
    /// ```
    pub fn is_less_severe_than(&self, other: Level) -> bool {
        *self > other
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Level {
    type Err = Error;

    fn from_str(s: &str) -> Result<Level, Self::Err> {
        for (name, level) in [
            ("fatal", Level::Fatal),
            ("crit", Level::Fatal),
            ("critical", Level::Fatal),
            ("error", Level::Error),
            ("warn", Level::Warn),
            ("warning", Level::Warn),
            ("info", Level::Info),
            ("debug", Level::Debug),
            ("trace", Level::Trace),
        ] {
            if s.trim().eq_ignore_ascii_case(name) {
                return Ok(level);
            }
        }

        Err(Error::config(format!("malformed level: {s:?}")))
    }
}
