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
use std::thread::ThreadId;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;

use crate::Append;
use crate::Error;
use crate::Trap;
use crate::append::asynchronous::Task;
use crate::record::Record;

pub(crate) struct Worker {
    receiver: Receiver<Task>,
    appends: Arc<[Box<dyn Append>]>,
    trap: Arc<dyn Trap>,
    poll_interval: Duration,
    // dropped on exit to notify the stopping thread
    _exited: Sender<()>,
}

impl Worker {
    pub(crate) fn new(
        receiver: Receiver<Task>,
        appends: Arc<[Box<dyn Append>]>,
        trap: Arc<dyn Trap>,
        poll_interval: Duration,
        exited: Sender<()>,
    ) -> Self {
        Self {
            receiver,
            appends,
            trap,
            poll_interval,
            _exited: exited,
        }
    }

    pub(crate) fn run(self) {
        loop {
            match self.receiver.recv_timeout(self.poll_interval) {
                Ok(Task::Shutdown) => break,
                Ok(task) => handle_task(task, &self.appends, &*self.trap),
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => return,
            }
        }

        // everything enqueued before the shutdown signal is still delivered
        while let Ok(task) = self.receiver.try_recv() {
            handle_task(task, &self.appends, &*self.trap);
        }
        if let Err(err) = flush(&self.appends) {
            self.trap.trap(&err);
        }
    }
}

pub(crate) fn handle_task(task: Task, appends: &[Box<dyn Append>], trap: &dyn Trap) {
    match task {
        Task::Log { record, producer } => dispatch(appends, &record, Some(producer), trap),
        Task::Flush { done } => {
            // the flusher may have given up waiting
            let _ = done.send(flush(appends));
        }
        Task::Shutdown => {}
    }
}

/// Deliver a record to every appender. A failing appender never stops the others.
pub(crate) fn dispatch(
    appends: &[Box<dyn Append>],
    record: &Record,
    producer: Option<ThreadId>,
    trap: &dyn Trap,
) {
    for append in appends.iter() {
        if let Err(err) = append.append(record) {
            let mut err = Error::dispatch("failed to append record").with_source(err);
            if let Some(producer) = producer {
                err = err.with_context("producer", format!("{producer:?}"));
            }
            trap.trap(&err);
        }
    }
}

/// Flush every appender and return the first failure.
pub(crate) fn flush(appends: &[Box<dyn Append>]) -> Result<(), Error> {
    let mut result = Ok(());
    for append in appends.iter() {
        if let Err(err) = append.flush() {
            let err = Error::dispatch("failed to flush").with_source(err);
            if result.is_ok() {
                result = Err(err);
            }
        }
    }
    result
}
