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

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::OnceLock;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use crate::Append;
use crate::Error;
use crate::Trap;
use crate::append::routing::AppendFactory;

/// One created route: the appender and its bookkeeping.
#[derive(Debug)]
pub(crate) struct RouteEntry {
    append: Box<dyn Append>,
    // held for read by every dispatch and for write by stop
    stopped: RwLock<bool>,
    // nanoseconds since the table's epoch
    last_used: AtomicU64,
    purgeable: bool,
}

impl RouteEntry {
    fn new(append: Box<dyn Append>, purgeable: bool, now: u64) -> Self {
        Self {
            append,
            stopped: RwLock::new(false),
            last_used: AtomicU64::new(now),
            purgeable,
        }
    }

    /// Run `f` with the appender unless the entry has been stopped.
    ///
    /// The entry cannot be stopped while `f` runs.
    pub(crate) fn with_append<R>(&self, f: impl FnOnce(&dyn Append) -> R) -> Option<R> {
        let stopped = self.stopped.read().unwrap_or_else(|e| e.into_inner());
        if *stopped {
            return None;
        }
        Some(f(&*self.append))
    }

    fn touch(&self, now: u64) {
        self.last_used.fetch_max(now, Ordering::Relaxed);
    }

    fn stop(&self, trap: &dyn Trap) {
        let mut stopped = self.stopped.write().unwrap_or_else(|e| e.into_inner());
        if *stopped {
            return;
        }
        *stopped = true;
        if let Err(err) = self.append.stop() {
            trap.trap(&Error::dispatch("failed to stop route appender").with_source(err));
        }
    }
}

#[derive(Debug, Default)]
struct Slot {
    entry: OnceLock<Arc<RouteEntry>>,
    // true once the slot has left the table; serializes creation with retirement
    retired: Mutex<bool>,
}

impl Slot {
    fn retire(&self, trap: &dyn Trap) {
        let mut retired = self.retired.lock().unwrap_or_else(|e| e.into_inner());
        *retired = true;
        drop(retired);

        if let Some(entry) = self.entry.get() {
            entry.stop(trap);
        }
    }
}

#[derive(Debug, Default)]
struct Slots {
    slots: HashMap<String, Arc<Slot>>,
    closed: bool,
}

/// The outcome of a route lookup.
pub(crate) enum Lookup {
    Found(Arc<RouteEntry>),
    Missing,
    Closed,
}

/// Maps route keys to their appenders, creating each one at most once.
#[derive(Debug)]
pub(crate) struct RouteTable {
    slots: RwLock<Slots>,
    epoch: Instant,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            slots: RwLock::default(),
            epoch: Instant::now(),
        }
    }
}

impl RouteTable {
    /// Bind `key` to an appender that is never purged.
    pub(crate) fn insert_static(&self, key: String, append: Box<dyn Append>) {
        let slot = Slot::default();
        let entry = Arc::new(RouteEntry::new(append, false, self.now()));
        let _ = slot.entry.set(entry);
        self.write().slots.insert(key, Arc::new(slot));
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.read().slots.contains_key(key)
    }

    /// Find the route for `key`, creating it with `factory` on first use.
    ///
    /// Concurrent first lookups of the same key create a single appender and all observe it.
    pub(crate) fn lookup(
        &self,
        key: &str,
        factory: Option<&dyn AppendFactory>,
    ) -> Result<Lookup, Error> {
        loop {
            let slot = {
                let slots = self.read();
                if slots.closed {
                    return Ok(Lookup::Closed);
                }
                slots.slots.get(key).cloned()
            };

            let slot = match (slot, factory) {
                (Some(slot), _) => slot,
                (None, None) => return Ok(Lookup::Missing),
                (None, Some(_)) => {
                    let mut slots = self.write();
                    if slots.closed {
                        return Ok(Lookup::Closed);
                    }
                    slots.slots.entry(key.to_string()).or_default().clone()
                }
            };

            if let Some(entry) = slot.entry.get() {
                entry.touch(self.now());
                return Ok(Lookup::Found(entry.clone()));
            }

            let retired = slot.retired.lock().unwrap_or_else(|e| e.into_inner());
            if *retired {
                // purged or removed between the table read and now; look again
                continue;
            }
            if let Some(entry) = slot.entry.get() {
                entry.touch(self.now());
                return Ok(Lookup::Found(entry.clone()));
            }

            let Some(factory) = factory else {
                return Ok(Lookup::Missing);
            };
            let append = match factory.create(key).and_then(|append| {
                append.start()?;
                Ok(append)
            }) {
                Ok(append) => append,
                Err(err) => {
                    drop(retired);
                    self.forget_empty(key, &slot);
                    return Err(err);
                }
            };

            let entry = Arc::new(RouteEntry::new(append, true, self.now()));
            let _ = slot.entry.set(entry.clone());
            return Ok(Lookup::Found(entry));
        }
    }

    // Drop a slot whose creation failed so that an unused key does not linger.
    fn forget_empty(&self, key: &str, slot: &Arc<Slot>) {
        let mut slots = self.write();
        if let Some(current) = slots.slots.get(key)
            && Arc::ptr_eq(current, slot)
            && slot.entry.get().is_none()
        {
            slots.slots.remove(key);
        }
    }

    /// Remove and stop every purgeable route unused for at least `idle_timeout`.
    ///
    /// Returns the purged keys.
    pub(crate) fn purge(&self, idle_timeout: Duration, trap: &dyn Trap) -> Vec<String> {
        let now = self.now();
        let idle_timeout = duration_nanos(idle_timeout);
        let expired = {
            let mut slots = self.write();
            let keys = slots
                .slots
                .iter()
                .filter(|(_, slot)| {
                    slot.entry.get().is_some_and(|entry| {
                        let last_used = entry.last_used.load(Ordering::Relaxed);
                        entry.purgeable && now.saturating_sub(last_used) >= idle_timeout
                    })
                })
                .map(|(key, _)| key.clone())
                .collect::<Vec<_>>();
            keys.into_iter()
                .filter_map(|key| slots.slots.remove_entry(&key))
                .collect::<Vec<_>>()
        };

        expired
            .into_iter()
            .map(|(key, slot)| {
                slot.retire(trap);
                key
            })
            .collect()
    }

    /// Remove and stop the route of `key`, if any.
    pub(crate) fn remove(&self, key: &str, trap: &dyn Trap) -> bool {
        let slot = self.write().slots.remove(key);
        match slot {
            Some(slot) => {
                slot.retire(trap);
                true
            }
            None => false,
        }
    }

    /// The keys of all routes.
    pub(crate) fn keys(&self) -> Vec<String> {
        let mut keys = self
            .read()
            .slots
            .iter()
            .filter(|(_, slot)| slot.entry.get().is_some())
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        keys.sort();
        keys
    }

    /// The entries of all routes.
    pub(crate) fn entries(&self) -> Vec<Arc<RouteEntry>> {
        self.read()
            .slots
            .values()
            .filter_map(|slot| slot.entry.get().cloned())
            .collect()
    }

    /// Refuse new routes, then remove and stop every route.
    pub(crate) fn close(&self, trap: &dyn Trap) {
        let drained = {
            let mut slots = self.write();
            slots.closed = true;
            std::mem::take(&mut slots.slots)
        };
        for slot in drained.into_values() {
            slot.retire(trap);
        }
    }

    fn now(&self) -> u64 {
        duration_nanos(self.epoch.elapsed())
    }

    fn read(&self) -> RwLockReadGuard<'_, Slots> {
        self.slots.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Slots> {
        self.slots.write().unwrap_or_else(|e| e.into_inner())
    }
}

fn duration_nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)
}
