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

use std::fmt;
use std::sync::Arc;

use crate::Error;
use crate::Trap;
use crate::record::Level;

/// What to do with a record offered to an [`Async`](crate::append::Async) appender.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum EventRoute {
    /// Put the record in the queue, waiting for free space if the queue is full.
    Enqueue,
    /// Bypass the queue and dispatch the record on the calling thread.
    Synchronous,
    /// Drop the record.
    Discard,
}

/// A snapshot of the queue fullness.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct QueueState {
    len: usize,
    capacity: Option<usize>,
}

impl QueueState {
    /// Create a snapshot. `capacity` is `None` for an unbounded queue.
    pub fn new(len: usize, capacity: Option<usize>) -> Self {
        Self { len, capacity }
    }

    /// The number of queued entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the queue holds no entry.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The capacity of the queue, `None` if unbounded.
    pub fn capacity(&self) -> Option<usize> {
        self.capacity
    }

    /// Whether an insertion would have to wait.
    pub fn is_full(&self) -> bool {
        self.capacity.is_some_and(|cap| self.len >= cap)
    }
}

/// A user-provided decision for a full queue.
///
/// It is consulted only when the queue is full. Implementations must not block and must not
/// return [`EventRoute::Enqueue`] for the consumer thread, which would wait on itself.
pub trait QueueFullPolicy: fmt::Debug + Send + Sync + 'static {
    /// Decide the route of a record that arrives while the queue is full.
    fn route(&self, on_consumer_thread: bool, level: Level) -> EventRoute;
}

/// The overflow policy of an [`Async`](crate::append::Async) appender.
///
/// When the queue is not full, every policy enqueues. When it is full:
///
/// * [`Block`](OverflowPolicy::Block) waits for free space, unless the record is produced by the
///   consumer thread itself (for example, an appender logging while it handles a record), in
///   which case the record is dispatched synchronously.
/// * [`Discard`](OverflowPolicy::Discard) drops records less severe than the threshold and
///   behaves like `Block` for the others.
/// * [`Custom`](OverflowPolicy::Custom) delegates to a [`QueueFullPolicy`].
#[derive(Clone, Default)]
#[non_exhaustive]
pub enum OverflowPolicy {
    /// Wait until the queue has free space.
    #[default]
    Block,
    /// Drop records less severe than `threshold`.
    Discard {
        /// The least severe level that is never discarded.
        threshold: Level,
    },
    /// A user-provided policy.
    Custom(Arc<dyn QueueFullPolicy>),
}

impl fmt::Debug for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverflowPolicy::Block => f.write_str("Block"),
            OverflowPolicy::Discard { threshold } => f
                .debug_struct("Discard")
                .field("threshold", threshold)
                .finish(),
            OverflowPolicy::Custom(policy) => f.debug_tuple("Custom").field(policy).finish(),
        }
    }
}

impl OverflowPolicy {
    /// A discarding policy with the default threshold, [`Level::Info`].
    pub fn discard() -> Self {
        OverflowPolicy::Discard {
            threshold: Level::Info,
        }
    }

    /// Resolve a built-in policy by name.
    ///
    /// Shorthand for [`OverflowRegistry::resolve`] on an empty registry.
    pub fn from_name(name: &str, threshold: Option<&str>, trap: &dyn Trap) -> Self {
        OverflowRegistry::default().resolve(name, threshold, trap)
    }

    /// Decide the route of a record.
    ///
    /// This is a pure function of the queue fullness, whether the caller is the consumer thread,
    /// and the record level.
    pub fn decide(&self, queue: QueueState, on_consumer_thread: bool, level: Level) -> EventRoute {
        if !queue.is_full() {
            return EventRoute::Enqueue;
        }

        match self {
            OverflowPolicy::Block => block_route(on_consumer_thread),
            OverflowPolicy::Discard { threshold } => {
                if level.is_less_severe_than(*threshold) {
                    EventRoute::Discard
                } else {
                    block_route(on_consumer_thread)
                }
            }
            OverflowPolicy::Custom(policy) => match policy.route(on_consumer_thread, level) {
                EventRoute::Enqueue if on_consumer_thread => EventRoute::Synchronous,
                route => route,
            },
        }
    }
}

fn block_route(on_consumer_thread: bool) -> EventRoute {
    if on_consumer_thread {
        EventRoute::Synchronous
    } else {
        EventRoute::Enqueue
    }
}

type Constructor = Box<dyn Fn() -> Result<OverflowPolicy, Error> + Send + Sync>;

/// Resolves overflow policies by name.
///
/// The built-in names are matched case-insensitively:
///
/// * `default`, `block`: [`OverflowPolicy::Block`];
/// * `discard`, `discarding`: [`OverflowPolicy::Discard`] with the given threshold.
///
/// Other names are looked up in the registered constructors. A name that cannot be resolved, or
/// a constructor that fails, falls back to [`OverflowPolicy::Block`] and reports a warning to the
/// trap.
///
/// # Examples
///
/// ```
/// use logforth_delivery::append::asynchronous::OverflowPolicy;
/// use logforth_delivery::append::asynchronous::OverflowRegistry;
/// use logforth_delivery::record::Level;
/// use logforth_delivery::trap::DefaultTrap;
///
/// let registry = OverflowRegistry::default();
/// let policy = registry.resolve("Discard", Some("warn"), &DefaultTrap::default());
/// assert!(matches!(policy, OverflowPolicy::Discard { threshold: Level::Warn }));
/// ```
#[derive(Default)]
pub struct OverflowRegistry {
    custom: Vec<(String, Constructor)>,
}

impl fmt::Debug for OverflowRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OverflowRegistry")
            .field(
                "custom",
                &self.custom.iter().map(|(n, _)| n).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl OverflowRegistry {
    /// Register a named constructor.
    ///
    /// Built-in names take precedence over registered ones.
    #[must_use]
    pub fn register<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn() -> Result<OverflowPolicy, Error> + Send + Sync + 'static,
    {
        self.custom.push((name.into(), Box::new(constructor)));
        self
    }

    /// Resolve a policy name.
    ///
    /// Built-in names also match as the last segment of a dotted path.
    ///
    /// `threshold` is only used by the discarding policy; it is parsed case-insensitively and
    /// defaults to [`Level::Info`] when absent or malformed.
    pub fn resolve(&self, name: &str, threshold: Option<&str>, trap: &dyn Trap) -> OverflowPolicy {
        let name = name.trim();
        let simple = name.rsplit('.').next().unwrap_or(name);
        if name.is_empty()
            || matches_any(simple, &["default", "block", "defaultasyncqueuefullpolicy"])
        {
            return OverflowPolicy::Block;
        }

        if matches_any(simple, &["discard", "discarding", "discardingasyncqueuefullpolicy"]) {
            let threshold = match threshold {
                None => Level::Info,
                Some(threshold) => threshold.parse().unwrap_or_else(|err: Error| {
                    trap.trap(
                        &Error::config("invalid discard threshold; use INFO instead")
                            .with_source(err),
                    );
                    Level::Info
                }),
            };
            return OverflowPolicy::Discard { threshold };
        }

        let constructor = self
            .custom
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, c)| c);

        match constructor {
            Some(constructor) => constructor().unwrap_or_else(|err| {
                trap.trap(
                    &Error::config("failed to create overflow policy; use default policy instead")
                        .with_context("name", name)
                        .with_source(err),
                );
                OverflowPolicy::Block
            }),
            None => {
                trap.trap(
                    &Error::config("unknown overflow policy; use default policy instead")
                        .with_context("name", name),
                );
                OverflowPolicy::Block
            }
        }
    }
}

fn matches_any(name: &str, candidates: &[&str]) -> bool {
    candidates.iter().any(|c| name.eq_ignore_ascii_case(c))
}
