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

//! Dispatch log records to various targets.

use std::fmt;
use std::sync::Arc;

use crate::Error;
use crate::record::Record;

pub mod asynchronous;
pub mod file;
pub mod routing;
mod testing;

pub use self::asynchronous::Async;
pub use self::asynchronous::AsyncBuilder;
pub use self::file::File;
pub use self::file::FileBuilder;
pub use self::routing::Routing;
pub use self::routing::RoutingBuilder;
pub use self::testing::Testing;

/// An appender that can process log records.
///
/// Appenders are the sinks of the delivery pipeline. Composite appenders such as [`Async`] and
/// [`Routing`] are appenders themselves and forward to the appenders they own.
pub trait Append: fmt::Debug + Send + Sync + 'static {
    /// Prepare the appender for receiving records.
    ///
    /// Default to a no-op.
    fn start(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Dispatch a log record to the append target.
    fn append(&self, record: &Record) -> Result<(), Error>;

    /// Flush any buffered records.
    ///
    /// Default to a no-op.
    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }

    /// Release the resources held by this appender. No record is appended after `stop`.
    ///
    /// Default to [`flush`](Append::flush).
    fn stop(&self) -> Result<(), Error> {
        self.flush()
    }
}

impl<T: Append> From<T> for Box<dyn Append> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

impl<T: Append + ?Sized> Append for Arc<T> {
    fn start(&self) -> Result<(), Error> {
        (**self).start()
    }

    fn append(&self, record: &Record) -> Result<(), Error> {
        (**self).append(record)
    }

    fn flush(&self) -> Result<(), Error> {
        (**self).flush()
    }

    fn stop(&self) -> Result<(), Error> {
        (**self).stop()
    }
}
