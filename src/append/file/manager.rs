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

use std::fs;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;

use jiff::Timestamp;
use jiff::Zoned;

use crate::Error;
use crate::ErrorKind;
use crate::Trap;
use crate::append::file::FileState;
use crate::append::file::RolloverContext;
use crate::append::file::RolloverStrategy;
use crate::append::file::TriggerPolicy;
use crate::append::file::clock::Clock;
use crate::trap::DefaultTrap;

/// Owns the live log file: its handle, its tracked size and its rollover.
///
/// The tracked size always equals the file's length on disk, including right after startup when
/// the manager picks up a file left by a previous run.
///
/// A manager is not synchronized; [`File`](crate::append::File) keeps it behind a mutex, which
/// serializes writes with rollovers. A writer that was waiting for the lock re-evaluates the
/// trigger against the fresh file and does not roll it over again.
#[derive(Debug)]
pub struct FileManager {
    path: PathBuf,
    writer: Option<fs::File>,
    size: u64,
    period_start: Zoned,
    trigger: Box<dyn TriggerPolicy>,
    strategy: Box<dyn RolloverStrategy>,
    clock: Clock,
    trap: Box<dyn Trap>,
}

impl Drop for FileManager {
    fn drop(&mut self) {
        if let Err(err) = self.flush() {
            let err = Error::new("failed to flush file writer on dropped").with_source(err);
            self.trap.trap(&err);
        }
    }
}

impl FileManager {
    /// Open the file the strategy starts with.
    pub fn new(
        trigger: impl Into<Box<dyn TriggerPolicy>>,
        strategy: impl Into<Box<dyn RolloverStrategy>>,
    ) -> Result<Self, Error> {
        Self::with_clock(
            trigger.into(),
            strategy.into(),
            Clock::DefaultClock,
            Box::new(DefaultTrap::default()),
        )
    }

    pub(crate) fn with_clock(
        trigger: Box<dyn TriggerPolicy>,
        strategy: Box<dyn RolloverStrategy>,
        clock: Clock,
        trap: Box<dyn Trap>,
    ) -> Result<Self, Error> {
        let now = clock.now();
        let path = strategy.initial_path(&now)?;
        let (writer, metadata) = open(&path)?;
        let size = metadata.len();

        // continue the period of a file left by a previous run
        let period_start = match metadata.modified() {
            Ok(mtime) if size > 0 => Timestamp::try_from(mtime)
                .map(|ts| ts.to_zoned(now.time_zone().clone()))
                .unwrap_or(now),
            _ => now,
        };

        Ok(Self {
            path,
            writer: Some(writer),
            size,
            period_start,
            trigger,
            strategy,
            clock,
            trap,
        })
    }

    /// Set the trap for rollover failures.
    pub fn set_trap(&mut self, trap: impl Into<Box<dyn Trap>>) {
        self.trap = trap.into();
    }

    /// The path currently written to.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The size of the current file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Roll over the current file if the trigger policy says so.
    ///
    /// Returns whether a rollover happened. A failed rollover is reported to the trap and
    /// writes continue to the current file.
    pub fn check_rollover(&mut self) -> bool {
        let now = self.clock.now();
        let state = FileState {
            size: self.size,
            period_start: &self.period_start,
            now: &now,
        };
        if !self.trigger.is_triggering(&state) {
            return false;
        }
        self.rollover(now)
    }

    /// Roll over the current file regardless of the trigger policy.
    pub fn rollover_now(&mut self) -> bool {
        let now = self.clock.now();
        self.rollover(now)
    }

    /// Append all of `buf` to the current file.
    pub fn write(&mut self, buf: &[u8]) -> Result<(), Error> {
        if self.writer.is_none() {
            self.reopen();
        }
        let Some(writer) = self.writer.as_mut() else {
            return Err(Error::with_kind(ErrorKind::Io, "log file is not open")
                .with_context("path", self.path.display()));
        };

        match writer.write_all(buf) {
            Ok(()) => {
                self.size += buf.len() as u64;
                Ok(())
            }
            Err(err) => {
                // a partial write still grew the file
                if let Ok(metadata) = writer.metadata() {
                    self.size = metadata.len();
                }
                Err(Error::from_io_error(err).with_context("path", self.path.display()))
            }
        }
    }

    /// Flush the current file.
    pub fn flush(&mut self) -> Result<(), Error> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush().map_err(Error::from_io_error),
            None => Ok(()),
        }
    }

    fn rollover(&mut self, now: Zoned) -> bool {
        if let Some(mut writer) = self.writer.take() {
            if let Err(err) = writer.flush() {
                let err = Error::new("failed to flush file writer before rollover").with_source(err);
                self.trap.trap(&err);
            }
        }

        let ctx = RolloverContext {
            current: &self.path,
            period_start: &self.period_start,
            now: &now,
            trap: &*self.trap,
        };
        let result = self
            .strategy
            .rollover(&ctx)
            .and_then(|next| open(&next).map(|opened| (next, opened)));

        match result {
            Ok((next, (writer, metadata))) => {
                self.path = next;
                self.writer = Some(writer);
                self.size = metadata.len();
                self.period_start = now;
                true
            }
            Err(err) => {
                let err = Error::with_kind(err.kind(), "failed to roll over log file")
                    .with_context("path", self.path.display())
                    .with_source(err);
                self.trap.trap(&err);
                self.reopen();
                false
            }
        }
    }

    fn reopen(&mut self) {
        match open(&self.path) {
            Ok((writer, metadata)) => {
                self.writer = Some(writer);
                self.size = metadata.len();
            }
            Err(err) => self.trap.trap(&err),
        }
    }

    #[cfg(test)]
    pub(crate) fn clock_mut(&mut self) -> &mut Clock {
        &mut self.clock
    }
}

fn open(path: &Path) -> Result<(fs::File, fs::Metadata), Error> {
    if let Some(dir) = path.parent()
        && !dir.as_os_str().is_empty()
    {
        fs::create_dir_all(dir).map_err(|err| {
            Error::with_kind(ErrorKind::Io, "failed to create log directory")
                .with_context("dir", dir.display())
                .with_source(err)
        })?;
    }

    let open = || -> std::io::Result<(fs::File, fs::Metadata)> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let metadata = file.metadata()?;
        Ok((file, metadata))
    };
    open().map_err(|err| {
        Error::with_kind(ErrorKind::Io, "failed to open log file")
            .with_context("path", path.display())
            .with_source(err)
    })
}
