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

//! A composable appender, delivering records to other appenders on a background thread.
//!
//! Producers put records in a bounded queue; a single consumer thread takes them out and
//! dispatches them. What happens when the queue is full is decided by an [`OverflowPolicy`].
//!
//! # Example
//!
//! ```
//! use std::num::NonZeroUsize;
//!
//! use logforth_delivery::append::Append;
//! use logforth_delivery::append::AsyncBuilder;
//! use logforth_delivery::append::Testing;
//! use logforth_delivery::append::asynchronous::OverflowPolicy;
//! use logforth_delivery::record::Record;
//!
//! let testing = Testing::default();
//! let asynchronous = AsyncBuilder::new("async-appender")
//!     .capacity(NonZeroUsize::new(128).unwrap())
//!     .overflow(OverflowPolicy::discard())
//!     .append(testing.clone())
//!     .build();
//!
//! asynchronous.append(&Record::builder().payload("hello").build()).unwrap();
//! asynchronous.flush().unwrap();
//! assert_eq!(testing.payloads(), vec!["hello"]);
//! ```

use std::thread::ThreadId;

use crate::Error;
use crate::record::Record;

mod append;
mod overflow;
mod state;
mod worker;

pub use self::append::Async;
pub use self::append::AsyncBuilder;
pub use self::overflow::EventRoute;
pub use self::overflow::OverflowPolicy;
pub use self::overflow::OverflowRegistry;
pub use self::overflow::QueueFullPolicy;
pub use self::overflow::QueueState;

/// An entry of the queue.
pub(crate) enum Task {
    Log {
        record: Record,
        producer: ThreadId,
    },
    Flush {
        done: oneshot::Sender<Result<(), Error>>,
    },
    Shutdown,
}

impl Task {
    fn log(record: Record) -> Self {
        let producer = std::thread::current().id();
        Task::Log { record, producer }
    }

    fn into_record(self) -> Option<Record> {
        match self {
            Task::Log { record, .. } => Some(record),
            Task::Flush { .. } | Task::Shutdown => None,
        }
    }
}
