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
use std::num::NonZeroU64;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use jiff::Zoned;

use crate::append::file::Rotation;

/// A read-only view of the live file, handed to a [`TriggerPolicy`].
#[derive(Debug, Clone, Copy)]
pub struct FileState<'a> {
    /// The tracked size of the live file in bytes.
    pub size: u64,
    /// The start of the period the live file belongs to.
    pub period_start: &'a Zoned,
    /// The current time.
    pub now: &'a Zoned,
}

/// Decides when the live file must be rolled over.
///
/// Policies are consulted before every write, so they must be cheap.
pub trait TriggerPolicy: fmt::Debug + Send + Sync + 'static {
    /// Whether the live file should be rolled over before the next write.
    fn is_triggering(&self, state: &FileState<'_>) -> bool;
}

impl<T: TriggerPolicy> From<T> for Box<dyn TriggerPolicy> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

/// Triggers once the live file has reached a size.
#[derive(Debug, Clone, Copy)]
pub struct SizeTrigger {
    max_size: NonZeroU64,
}

impl SizeTrigger {
    /// Creates a new [`SizeTrigger`].
    pub fn new(max_size: NonZeroU64) -> Self {
        Self { max_size }
    }
}

impl TriggerPolicy for SizeTrigger {
    fn is_triggering(&self, state: &FileState<'_>) -> bool {
        state.size >= self.max_size.get()
    }
}

/// Triggers when a calendar boundary has been crossed since the period start.
#[derive(Debug, Clone, Copy)]
pub struct TimeTrigger {
    rotation: Rotation,
}

impl TimeTrigger {
    /// Creates a new [`TimeTrigger`].
    pub fn new(rotation: Rotation) -> Self {
        Self { rotation }
    }
}

impl TriggerPolicy for TimeTrigger {
    fn is_triggering(&self, state: &FileState<'_>) -> bool {
        match self.rotation.next_boundary(state.period_start) {
            Some(next) => state.now.timestamp() >= next.timestamp(),
            None => false,
        }
    }
}

/// Triggers at most once: on the first evaluation, if the file left by a previous run is at
/// least `min_size` bytes.
#[derive(Debug)]
pub struct StartupTrigger {
    min_size: u64,
    evaluated: AtomicBool,
}

impl StartupTrigger {
    /// Creates a new [`StartupTrigger`].
    pub fn new(min_size: u64) -> Self {
        Self {
            min_size,
            evaluated: AtomicBool::new(false),
        }
    }
}

impl TriggerPolicy for StartupTrigger {
    fn is_triggering(&self, state: &FileState<'_>) -> bool {
        if self.evaluated.swap(true, Ordering::AcqRel) {
            return false;
        }
        state.size > 0 && state.size >= self.min_size
    }
}

/// Triggers when any of its policies triggers.
#[derive(Debug, Default)]
pub struct CompositeTrigger {
    policies: Vec<Box<dyn TriggerPolicy>>,
}

impl CompositeTrigger {
    /// Creates a new [`CompositeTrigger`].
    pub fn new(policies: Vec<Box<dyn TriggerPolicy>>) -> Self {
        Self { policies }
    }

    /// Add one more policy.
    #[must_use]
    pub fn with(mut self, policy: impl Into<Box<dyn TriggerPolicy>>) -> Self {
        self.policies.push(policy.into());
        self
    }

    pub(crate) fn push(&mut self, policy: Box<dyn TriggerPolicy>) {
        self.policies.push(policy);
    }
}

impl TriggerPolicy for CompositeTrigger {
    fn is_triggering(&self, state: &FileState<'_>) -> bool {
        // evaluate all of them so that one-shot policies observe the first check
        self.policies
            .iter()
            .fold(false, |acc, p| p.is_triggering(state) || acc)
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn at(s: &str) -> Zoned {
        Zoned::from_str(s).unwrap()
    }

    #[test]
    fn test_size_trigger() {
        let now = at("2024-08-10T17:12:52+08:00[+08:00]");
        let trigger = SizeTrigger::new(NonZeroU64::new(1000).unwrap());
        let state = |size| FileState {
            size,
            period_start: &now,
            now: &now,
        };
        assert!(!trigger.is_triggering(&state(999)));
        assert!(trigger.is_triggering(&state(1000)));
        assert!(trigger.is_triggering(&state(1500)));
    }

    #[test]
    fn test_time_trigger() {
        let start = at("2024-08-10T17:12:52+08:00[+08:00]");
        let trigger = TimeTrigger::new(Rotation::Hourly);
        let state = |now| FileState {
            size: 0,
            period_start: &start,
            now,
        };
        let t1 = at("2024-08-10T17:59:59+08:00[+08:00]");
        let t2 = at("2024-08-10T18:00:00+08:00[+08:00]");
        let t3 = at("2025-08-10T18:00:00+08:00[+08:00]");
        assert!(!trigger.is_triggering(&state(&t1)));
        assert!(trigger.is_triggering(&state(&t2)));

        let never = TimeTrigger::new(Rotation::Never);
        assert!(!never.is_triggering(&state(&t3)));
    }

    #[test]
    fn test_startup_trigger_fires_once() {
        let now = at("2024-08-10T17:12:52+08:00[+08:00]");
        let state = |size| FileState {
            size,
            period_start: &now,
            now: &now,
        };

        let trigger = StartupTrigger::new(10);
        assert!(trigger.is_triggering(&state(10)));
        assert!(!trigger.is_triggering(&state(10)));

        let trigger = StartupTrigger::new(10);
        assert!(!trigger.is_triggering(&state(9)));
        assert!(!trigger.is_triggering(&state(100)));

        let trigger = StartupTrigger::new(0);
        assert!(!trigger.is_triggering(&state(0)));
    }

    #[test]
    fn test_composite_trigger_is_logical_or() {
        let now = at("2024-08-10T17:12:52+08:00[+08:00]");
        let state = FileState {
            size: 50,
            period_start: &now,
            now: &now,
        };

        let composite = CompositeTrigger::default()
            .with(SizeTrigger::new(NonZeroU64::new(100).unwrap()))
            .with(StartupTrigger::new(10));
        assert!(composite.is_triggering(&state));
        assert!(!composite.is_triggering(&state));

        assert!(!CompositeTrigger::default().is_triggering(&state));
    }
}
