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

use std::thread::JoinHandle;
use std::thread::ThreadId;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;

use crate::Error;
use crate::ErrorKind;
use crate::append::asynchronous::Task;

/// The producer side of a running async appender.
///
/// It is swapped out when the appender stops, so producers that arrive later find no queue.
#[derive(Debug)]
pub(crate) struct AsyncState {
    pub(crate) sender: Sender<Task>,
    pub(crate) consumer: ThreadId,
}

impl AsyncState {
    pub(crate) fn new(sender: Sender<Task>, consumer: ThreadId) -> Self {
        Self { sender, consumer }
    }

    pub(crate) fn on_consumer_thread(&self) -> bool {
        std::thread::current().id() == self.consumer
    }
}

/// The handle of the consumer thread.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
    handle: JoinHandle<()>,
    // disconnected once the worker returns
    exited: Receiver<()>,
}

impl WorkerHandle {
    pub(crate) fn new(handle: JoinHandle<()>, exited: Receiver<()>) -> Self {
        Self { handle, exited }
    }

    /// Wait for the worker to exit, at most `timeout`.
    ///
    /// The worker thread is detached if it does not exit in time.
    pub(crate) fn join(self, timeout: Duration) -> Result<(), Error> {
        match self.exited.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => Err(Error::with_kind(
                ErrorKind::Shutdown,
                "async appender worker did not exit within the shutdown timeout",
            )
            .with_context("timeout", format!("{timeout:?}"))),
            Ok(()) | Err(RecvTimeoutError::Disconnected) => self.handle.join().map_err(|_| {
                Error::with_kind(ErrorKind::Shutdown, "async appender worker panicked")
            }),
        }
    }
}
