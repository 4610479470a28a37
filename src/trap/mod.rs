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

//! Traps for errors that happen while delivering log records.
//!
//! Delivery components never propagate internal failures to the logging call site. Instead, they
//! report them to a [`Trap`], which usually writes them somewhere outside the logging pipeline.

use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use crate::Error;

mod default;

pub use self::default::DefaultTrap;

/// A sink for errors that cannot be returned to the caller.
pub trait Trap: fmt::Debug + Send + Sync + 'static {
    /// Handle an error.
    fn trap(&self, err: &Error);
}

impl<T: Trap> From<T> for Box<dyn Trap> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

/// A latch that lets a component report a condition through its trap only once.
#[derive(Debug, Default)]
pub(crate) struct WarnOnce(AtomicBool);

impl WarnOnce {
    pub(crate) fn trap_once(&self, trap: &dyn Trap, err: impl FnOnce() -> Error) {
        if !self.0.swap(true, Ordering::AcqRel) {
            trap.trap(&err());
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::Trap;
    use crate::Error;
    use crate::ErrorKind;

    /// Keeps every trapped error in memory.
    #[derive(Debug, Clone, Default)]
    pub(crate) struct CollectTrap(Arc<Mutex<Vec<(ErrorKind, String)>>>);

    impl CollectTrap {
        pub(crate) fn errors(&self) -> Vec<(ErrorKind, String)> {
            self.0.lock().unwrap().clone()
        }
    }

    impl Trap for CollectTrap {
        fn trap(&self, err: &Error) {
            self.0.lock().unwrap().push((err.kind(), err.to_string()));
        }
    }
}
