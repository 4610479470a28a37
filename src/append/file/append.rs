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

use std::num::NonZeroU64;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::MutexGuard;

use crate::Error;
use crate::Layout;
use crate::Trap;
use crate::append::Append;
use crate::append::file::CompositeTrigger;
use crate::append::file::DirectWriteStrategy;
use crate::append::file::FileManager;
use crate::append::file::FilePattern;
use crate::append::file::IndexDirection;
use crate::append::file::IndexedStrategy;
use crate::append::file::Rotation;
use crate::append::file::RolloverStrategy;
use crate::append::file::SizeTrigger;
use crate::append::file::StartupTrigger;
use crate::append::file::TimeTrigger;
use crate::append::file::TriggerPolicy;
use crate::append::file::clock::Clock;
use crate::layout::PlainTextLayout;
use crate::record::Record;
use crate::trap::DefaultTrap;

#[derive(Debug)]
enum Target {
    // a live file renamed to indexed archives
    Live(PathBuf),
    // files named by the pattern, written in place
    Direct(String),
}

/// A builder to configure and create an [`File`] appender.
#[derive(Debug)]
pub struct FileBuilder {
    target: Target,
    file_pattern: Option<String>,
    layout: Box<dyn Layout>,
    trap: Box<dyn Trap>,
    triggers: CompositeTrigger,
    rotation: Rotation,
    max_files: Option<NonZeroUsize>,
    min_index: u32,
    direction: IndexDirection,
    clock: Clock,
}

impl FileBuilder {
    /// Create a new file appender builder that writes to the live file at `path`.
    ///
    /// On rollover, the live file is renamed to an archive named by the
    /// [file pattern](Self::file_pattern) and a fresh live file is opened.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_target(Target::Live(path.into()))
    }

    /// Create a new file appender builder that writes directly to the files named by `pattern`.
    ///
    /// There is no live file: a rollover closes the current file and advances the index.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::num::NonZeroU64;
    ///
    /// use logforth_delivery::append::FileBuilder;
    ///
    /// let builder = FileBuilder::direct("logs/app-%d{%Y-%m-%d}-%i.log")
    ///     .rollover_size(NonZeroU64::new(10 * 1024 * 1024).unwrap())
    ///     .rollover_daily();
    /// ```
    pub fn direct(pattern: impl Into<String>) -> Self {
        Self::with_target(Target::Direct(pattern.into()))
    }

    fn with_target(target: Target) -> Self {
        Self {
            target,
            file_pattern: None,
            layout: Box::new(PlainTextLayout::default()),
            trap: Box::new(DefaultTrap::default()),
            triggers: CompositeTrigger::default(),
            rotation: Rotation::Never,
            max_files: NonZeroUsize::new(7),
            min_index: 1,
            direction: IndexDirection::default(),
            clock: Clock::DefaultClock,
        }
    }

    /// Build the [`File`] appender.
    ///
    /// # Errors
    ///
    /// Return an error if either:
    ///
    /// * The file pattern is malformed or has no `%i`.
    /// * The log directory or the log file cannot be created.
    pub fn build(self) -> Result<File, Error> {
        let FileBuilder {
            target,
            file_pattern,
            layout,
            trap,
            triggers,
            rotation,
            max_files,
            min_index,
            direction,
            clock,
        } = self;

        let strategy: Box<dyn RolloverStrategy> = match target {
            Target::Live(path) => {
                if path.as_os_str().is_empty() {
                    return Err(Error::config("log file path must not be empty"));
                }
                let pattern = match file_pattern {
                    Some(pattern) => pattern,
                    None => default_pattern(&path, rotation),
                };
                let strategy = IndexedStrategy::new(path, FilePattern::parse(&pattern)?)?
                    .min_index(min_index)
                    .max_files(max_files)
                    .direction(direction);
                Box::new(strategy)
            }
            Target::Direct(pattern) => {
                let pattern = file_pattern.unwrap_or(pattern);
                let strategy = DirectWriteStrategy::new(FilePattern::parse(&pattern)?)?
                    .min_index(min_index)
                    .max_files(max_files);
                Box::new(strategy)
            }
        };

        let manager = FileManager::with_clock(Box::new(triggers), strategy, clock, trap)?;
        Ok(File::new(manager, layout))
    }

    /// Set the layout for the logs.
    ///
    /// Default to [`PlainTextLayout`].
    #[must_use]
    pub fn layout(mut self, layout: impl Into<Box<dyn Layout>>) -> Self {
        self.layout = layout.into();
        self
    }

    /// Set the trap for handling rollover failures.
    ///
    /// Default to [`DefaultTrap`].
    #[must_use]
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = trap.into();
        self
    }

    /// Set the pattern archives are named by.
    ///
    /// See [`FilePattern`] for the syntax. Defaults to `<path>.%i`, or
    /// `<path>.%d{<date>}.%i` when a time-based rollover is set.
    #[must_use]
    pub fn file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }

    /// Add a trigger policy. The file rolls over when any of the policies triggers.
    #[must_use]
    pub fn trigger(mut self, trigger: impl Into<Box<dyn TriggerPolicy>>) -> Self {
        self.triggers.push(trigger.into());
        self
    }

    /// Roll over log files once the current one reaches the given size.
    #[must_use]
    pub fn rollover_size(self, n: NonZeroU64) -> Self {
        self.trigger(SizeTrigger::new(n))
    }

    /// Roll over log files minutely.
    #[must_use]
    pub fn rollover_minutely(self) -> Self {
        self.rollover_on(Rotation::Minutely)
    }

    /// Roll over log files hourly.
    #[must_use]
    pub fn rollover_hourly(self) -> Self {
        self.rollover_on(Rotation::Hourly)
    }

    /// Roll over log files daily at 00:00 in the local time zone.
    #[must_use]
    pub fn rollover_daily(self) -> Self {
        self.rollover_on(Rotation::Daily)
    }

    fn rollover_on(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self.trigger(TimeTrigger::new(rotation))
    }

    /// Roll over the file left by a previous run before the first write, if it holds at least
    /// `min_size` bytes.
    #[must_use]
    pub fn rollover_on_startup(self, min_size: u64) -> Self {
        self.trigger(StartupTrigger::new(min_size))
    }

    /// Set the maximum number of archives to keep per period.
    ///
    /// Default to 7.
    #[must_use]
    pub fn max_files(mut self, n: NonZeroUsize) -> Self {
        self.max_files = Some(n);
        self
    }

    /// Keep every archive.
    #[must_use]
    pub fn unlimited_files(mut self) -> Self {
        self.max_files = None;
        self
    }

    /// Set the lowest archive index.
    ///
    /// Default to 1.
    #[must_use]
    pub fn min_index(mut self, n: u32) -> Self {
        self.min_index = n;
        self
    }

    /// Set the direction archive indexes move in. Has no effect on direct writes.
    #[must_use]
    pub fn index_direction(mut self, direction: IndexDirection) -> Self {
        self.direction = direction;
        self
    }

    #[cfg(test)]
    pub(crate) fn clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }
}

fn default_pattern(path: &std::path::Path, rotation: Rotation) -> String {
    let path = path.display().to_string().replace('%', "%%");
    match rotation {
        Rotation::Never => format!("{path}.%i"),
        rotation => format!("{path}.%d{{{}}}.%i", rotation.date_format()),
    }
}

/// An appender that writes log records to rolling files.
///
/// # Examples
///
/// ```no_run
/// use std::num::NonZeroU64;
/// use std::num::NonZeroUsize;
///
/// use logforth_delivery::append::FileBuilder;
///
/// let file = FileBuilder::new("logs/app.log")
///     .file_pattern("logs/app-%d{%Y-%m-%d}-%i.log.gz")
///     .rollover_size(NonZeroU64::new(1024 * 1024).unwrap())
///     .rollover_daily()
///     .max_files(NonZeroUsize::new(10).unwrap())
///     .build()
///     .unwrap();
/// ```
#[derive(Debug)]
pub struct File {
    manager: Mutex<FileManager>,
    layout: Box<dyn Layout>,
}

impl File {
    fn new(manager: FileManager, layout: Box<dyn Layout>) -> Self {
        let manager = Mutex::new(manager);
        Self { manager, layout }
    }

    /// The path currently written to.
    pub fn path(&self) -> PathBuf {
        self.manager().path().to_path_buf()
    }

    /// The size of the current file in bytes.
    pub fn size(&self) -> u64 {
        self.manager().size()
    }

    /// Roll over the current file now.
    pub fn rollover(&self) -> bool {
        self.manager().rollover_now()
    }

    fn manager(&self) -> MutexGuard<'_, FileManager> {
        self.manager.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Append for File {
    fn append(&self, record: &Record) -> Result<(), Error> {
        let mut bytes = self.layout.format(record)?;
        bytes.push(b'\n');
        let mut manager = self.manager();
        manager.check_rollover();
        manager.write(&bytes)
    }

    fn flush(&self) -> Result<(), Error> {
        self.manager().flush()
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::str::FromStr;
    use std::sync::Arc;
    use std::sync::Barrier;
    use std::thread;

    use jiff::Zoned;
    use tempfile::TempDir;

    use super::*;
    use crate::append::file::clock::ManualClock;

    #[test]
    fn test_default_patterns() {
        let path = std::path::Path::new("logs/100%/app.log");
        assert_eq!(
            default_pattern(path, Rotation::Never),
            "logs/100%%/app.log.%i"
        );
        assert_eq!(
            default_pattern(path, Rotation::Hourly),
            "logs/100%%/app.log.%d{%Y-%m-%d-%H}.%i"
        );
    }

    #[test]
    fn test_empty_path_is_rejected() {
        assert!(FileBuilder::new("").build().is_err());
        assert!(FileBuilder::direct("logs/app.log").build().is_err());
    }

    #[test]
    fn test_daily_rollover_uses_dated_archives() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let start = Zoned::from_str("2024-08-10T23:59:58+08:00[+08:00]").unwrap();
        let file = FileBuilder::new(temp_dir.path().join("app.log"))
            .rollover_daily()
            .clock(Clock::ManualClock(ManualClock::new(start)))
            .build()
            .unwrap();

        file.append(&Record::builder().payload("before midnight").build())
            .unwrap();
        file.manager()
            .clock_mut()
            .set_now(Zoned::from_str("2024-08-11T00:00:01+08:00[+08:00]").unwrap());
        file.append(&Record::builder().payload("after midnight").build())
            .unwrap();

        let archive = temp_dir.path().join("app.log.2024-08-10.1");
        let archived = fs::read_to_string(archive).unwrap();
        assert!(archived.ends_with("before midnight\n"));
        let live = fs::read_to_string(temp_dir.path().join("app.log")).unwrap();
        assert!(live.ends_with("after midnight\n"));
        assert_eq!(file.size(), live.len() as u64);
    }

    #[test]
    fn test_racing_writers_roll_over_one_at_a_time() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let file = FileBuilder::new(temp_dir.path().join("app.log"))
            .rollover_size(NonZeroU64::new(1).unwrap())
            .unlimited_files()
            .build()
            .unwrap();
        file.append(&Record::builder().payload("seed").build())
            .unwrap();

        let file = Arc::new(file);
        let barrier = Arc::new(Barrier::new(8));
        let handles = (0..8)
            .map(|i| {
                let file = file.clone();
                let barrier = barrier.clone();
                thread::spawn(move || {
                    barrier.wait();
                    let record = Record::builder().payload(format!("writer {i}")).build();
                    file.append(&record).unwrap();
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        // every write found a non-empty file, so each one rolled exactly one record away
        let archives = fs::read_dir(temp_dir.path()).unwrap().count() - 1;
        assert_eq!(archives, 8);
        for entry in fs::read_dir(temp_dir.path()).unwrap() {
            let content = fs::read_to_string(entry.unwrap().path()).unwrap();
            assert_eq!(content.lines().count(), 1);
        }
    }
}
