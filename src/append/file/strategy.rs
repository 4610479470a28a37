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
use std::fs;
use std::io;
use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;

use flate2::Compression;
use flate2::write::GzEncoder;
use jiff::Zoned;

use crate::Error;
use crate::ErrorKind;
use crate::Trap;
use crate::append::file::FilePattern;
use crate::append::file::pattern::Archive;

/// What a [`RolloverStrategy`] is told about the file being closed.
#[derive(Clone, Copy)]
pub struct RolloverContext<'a> {
    /// The file that was just closed.
    pub current: &'a Path,
    /// The start of the period the closed file belongs to.
    pub period_start: &'a Zoned,
    /// The current time.
    pub now: &'a Zoned,
    /// Where to report problems that do not abandon the rollover.
    pub trap: &'a dyn Trap,
}

impl fmt::Debug for RolloverContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RolloverContext")
            .field("current", &self.current)
            .field("period_start", &self.period_start)
            .field("now", &self.now)
            .finish_non_exhaustive()
    }
}

/// Names archives and moves files around when the live file is rolled over.
pub trait RolloverStrategy: fmt::Debug + Send + Sync + 'static {
    /// The path to write to when the appender starts.
    fn initial_path(&self, now: &Zoned) -> Result<PathBuf, Error>;

    /// Archive the closed file and return the path to continue writing to.
    ///
    /// An error abandons this rollover; the caller keeps writing to `ctx.current`.
    fn rollover(&self, ctx: &RolloverContext<'_>) -> Result<PathBuf, Error>;
}

impl<T: RolloverStrategy> From<T> for Box<dyn RolloverStrategy> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

/// The direction archive indexes move in.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum IndexDirection {
    /// The newest archive always takes the minimum index; older archives shift up.
    #[default]
    Descending,
    /// The newest archive takes the next free index; when the cap is reached the lowest index is
    /// deleted and the others shift down.
    Ascending,
}

/// Renames the live file to an indexed archive and reopens the live file.
#[derive(Debug)]
pub struct IndexedStrategy {
    live: PathBuf,
    pattern: FilePattern,
    min_index: u32,
    max_files: Option<NonZeroUsize>,
    direction: IndexDirection,
}

impl IndexedStrategy {
    /// Creates a new [`IndexedStrategy`].
    ///
    /// The pattern must contain an index placeholder.
    pub fn new(live: impl Into<PathBuf>, pattern: FilePattern) -> Result<Self, Error> {
        if !pattern.has_index() {
            return Err(Error::config("archive pattern must contain %i"));
        }
        Ok(Self {
            live: live.into(),
            pattern,
            min_index: 1,
            max_files: NonZeroUsize::new(7),
            direction: IndexDirection::Descending,
        })
    }

    /// Set the lowest index an archive can take.
    #[must_use]
    pub fn min_index(mut self, min_index: u32) -> Self {
        self.min_index = min_index;
        self
    }

    /// Set the maximum number of archives to keep per period; `None` keeps all of them.
    #[must_use]
    pub fn max_files(mut self, max_files: Option<NonZeroUsize>) -> Self {
        self.max_files = max_files;
        self
    }

    /// Set the direction archive indexes move in.
    #[must_use]
    pub fn direction(mut self, direction: IndexDirection) -> Self {
        self.direction = direction;
        self
    }

    fn archives(&self, date: &Zoned) -> Result<Vec<Archive>, Error> {
        let mut archives = self.pattern.list(date)?;
        archives.retain(|a| a.index >= self.min_index && a.path != self.live);
        Ok(archives)
    }

    fn shift_up(&self, date: &Zoned, trap: &dyn Trap) -> Result<(), Error> {
        let mut archives = self.archives(date)?;
        if let Some(max) = self.max_files {
            let max_index = self.min_index.saturating_add(cap(max) - 1);
            for archive in archives.iter().filter(|a| a.index >= max_index) {
                remove(&archive.path, trap);
            }
            archives.retain(|a| a.index < max_index);
        }

        for archive in archives.iter().rev() {
            let target = self.target(date, archive.index + 1, archive.compressed);
            rename(&archive.path, &target)?;
        }
        Ok(())
    }

    fn next_ascending(&self, date: &Zoned, trap: &dyn Trap) -> Result<u32, Error> {
        let mut archives = self.archives(date)?;
        let next_free = |archives: &[Archive]| {
            archives
                .last()
                .map_or(self.min_index, |a| a.index.saturating_add(1))
        };

        let Some(max) = self.max_files else {
            return Ok(next_free(&archives));
        };
        if archives.len() < max.get() {
            return Ok(next_free(&archives));
        }

        let excess = archives.len() + 1 - max.get();
        for archive in archives.drain(..excess) {
            remove(&archive.path, trap);
        }
        let mut index = self.min_index;
        for archive in archives.iter() {
            if archive.index != index {
                let target = self.target(date, index, archive.compressed);
                rename(&archive.path, &target)?;
            }
            index += 1;
        }
        Ok(index)
    }

    fn target(&self, date: &Zoned, index: u32, compressed: bool) -> PathBuf {
        if compressed {
            self.pattern.archive_path(date, index)
        } else {
            self.pattern.format(date, index)
        }
    }
}

impl RolloverStrategy for IndexedStrategy {
    fn initial_path(&self, _: &Zoned) -> Result<PathBuf, Error> {
        Ok(self.live.clone())
    }

    fn rollover(&self, ctx: &RolloverContext<'_>) -> Result<PathBuf, Error> {
        if !ctx.current.exists() {
            // nothing to archive; someone removed the live file
            return Ok(self.live.clone());
        }

        let date = ctx.period_start;
        let index = match self.direction {
            IndexDirection::Descending => {
                self.shift_up(date, ctx.trap)?;
                self.min_index
            }
            IndexDirection::Ascending => self.next_ascending(date, ctx.trap)?,
        };

        let target = self.pattern.format(date, index);
        let archive = self.pattern.archive_path(date, index);
        if target.exists() || archive.exists() {
            return Err(Error::with_kind(ErrorKind::Io, "archive already exists")
                .with_context("path", archive.display()));
        }
        create_parent(&target)?;
        rename(ctx.current, &target)?;

        if self.pattern.is_compressed() {
            // keep the uncompressed archive if compression fails
            if let Err(err) = gzip(&target, &archive) {
                ctx.trap.trap(&err);
            }
        }
        Ok(self.live.clone())
    }
}

/// Writes straight to the file named by the pattern; a rollover only advances the index.
#[derive(Debug)]
pub struct DirectWriteStrategy {
    pattern: FilePattern,
    min_index: u32,
    max_files: Option<NonZeroUsize>,
}

impl DirectWriteStrategy {
    /// Creates a new [`DirectWriteStrategy`].
    ///
    /// The pattern must contain an index placeholder.
    pub fn new(pattern: FilePattern) -> Result<Self, Error> {
        if !pattern.has_index() {
            return Err(Error::config("file pattern must contain %i"));
        }
        Ok(Self {
            pattern,
            min_index: 1,
            max_files: NonZeroUsize::new(7),
        })
    }

    /// Set the lowest index a file can take.
    #[must_use]
    pub fn min_index(mut self, min_index: u32) -> Self {
        self.min_index = min_index;
        self
    }

    /// Set the maximum number of closed files to keep per period; `None` keeps all of them.
    #[must_use]
    pub fn max_files(mut self, max_files: Option<NonZeroUsize>) -> Self {
        self.max_files = max_files;
        self
    }

    fn archives(&self, date: &Zoned) -> Result<Vec<Archive>, Error> {
        let mut archives = self.pattern.list(date)?;
        archives.retain(|a| a.index >= self.min_index);
        Ok(archives)
    }

    fn next_path(&self, now: &Zoned) -> Result<PathBuf, Error> {
        let index = self
            .archives(now)?
            .last()
            .map_or(self.min_index, |a| a.index.saturating_add(1));
        Ok(self.pattern.format(now, index))
    }
}

impl RolloverStrategy for DirectWriteStrategy {
    fn initial_path(&self, now: &Zoned) -> Result<PathBuf, Error> {
        match self.archives(now)?.pop() {
            Some(last) if !last.compressed => Ok(last.path),
            _ => self.next_path(now),
        }
    }

    fn rollover(&self, ctx: &RolloverContext<'_>) -> Result<PathBuf, Error> {
        if self.pattern.is_compressed() && ctx.current.exists() {
            let mut archive = ctx.current.as_os_str().to_owned();
            archive.push(".gz");
            if let Err(err) = gzip(ctx.current, Path::new(&archive)) {
                ctx.trap.trap(&err);
            }
        }

        if let Some(max) = self.max_files {
            let archives = self.archives(ctx.period_start)?;
            let excess = archives.len().saturating_sub(max.get());
            for archive in archives.iter().take(excess) {
                remove(&archive.path, ctx.trap);
            }
        }

        self.next_path(ctx.now)
    }
}

fn cap(max: NonZeroUsize) -> u32 {
    u32::try_from(max.get()).unwrap_or(u32::MAX)
}

fn create_parent(path: &Path) -> Result<(), Error> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => fs::create_dir_all(dir).map_err(|err| {
            Error::with_kind(ErrorKind::Io, "failed to create log directory")
                .with_context("dir", dir.display())
                .with_source(err)
        }),
        _ => Ok(()),
    }
}

fn rename(from: &Path, to: &Path) -> Result<(), Error> {
    fs::rename(from, to).map_err(|err| {
        Error::with_kind(ErrorKind::Io, "failed to rename log file")
            .with_context("from", from.display())
            .with_context("to", to.display())
            .with_source(err)
    })
}

// Eviction failures do not abandon the rollover.
fn remove(path: &Path, trap: &dyn Trap) {
    if let Err(err) = fs::remove_file(path) {
        let err = Error::with_kind(ErrorKind::Io, "failed to remove old log file")
            .with_context("path", path.display())
            .with_source(err);
        trap.trap(&err);
    }
}

/// Compress `src` into `dst` with gzip and remove `src`.
fn gzip(src: &Path, dst: &Path) -> Result<(), Error> {
    let compress = || -> io::Result<()> {
        let mut input = fs::File::open(src)?;
        let output = fs::File::create(dst)?;
        let mut encoder = GzEncoder::new(output, Compression::default());
        io::copy(&mut input, &mut encoder)?;
        encoder.finish()?.sync_all()
    };

    if let Err(err) = compress() {
        let _ = fs::remove_file(dst);
        return Err(Error::with_kind(ErrorKind::Io, "failed to compress log file")
            .with_context("path", src.display())
            .with_source(err));
    }

    fs::remove_file(src).map_err(|err| {
        Error::with_kind(ErrorKind::Io, "failed to remove compressed log file")
            .with_context("path", src.display())
            .with_source(err)
    })
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::str::FromStr;

    use flate2::read::GzDecoder;
    use tempfile::TempDir;

    use super::*;
    use crate::trap::testing::CollectTrap;

    fn date() -> Zoned {
        Zoned::from_str("2024-08-10T17:12:52+08:00[+08:00]").unwrap()
    }

    struct Fixture {
        dir: TempDir,
        trap: CollectTrap,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                dir: TempDir::new().expect("failed to create a temporary directory"),
                trap: CollectTrap::default(),
            }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn pattern(&self, pattern: &str) -> FilePattern {
            FilePattern::parse(&format!("{}/{pattern}", self.dir.path().display())).unwrap()
        }

        // Write the live file and roll it over, so each archive holds its generation number.
        fn roll(&self, strategy: &dyn RolloverStrategy, current: &Path, content: &str) -> PathBuf {
            fs::write(current, content).unwrap();
            let now = date();
            let ctx = RolloverContext {
                current,
                period_start: &now,
                now: &now,
                trap: &self.trap,
            };
            strategy.rollover(&ctx).unwrap()
        }

        fn read(&self, name: &str) -> String {
            fs::read_to_string(self.path(name)).unwrap()
        }

        fn names(&self) -> Vec<String> {
            let mut names = fs::read_dir(self.dir.path())
                .unwrap()
                .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                .collect::<Vec<_>>();
            names.sort();
            names
        }
    }

    #[test]
    fn test_descending_shifts_and_caps() {
        let fixture = Fixture::new();
        let live = fixture.path("app.log");
        let strategy = IndexedStrategy::new(&live, fixture.pattern("app.log.%i"))
            .unwrap()
            .max_files(NonZeroUsize::new(3));

        for generation in 0..5 {
            let next = fixture.roll(&strategy, &live, &generation.to_string());
            assert_eq!(next, live);
        }

        assert_eq!(fixture.names(), vec!["app.log.1", "app.log.2", "app.log.3"]);
        assert_eq!(fixture.read("app.log.1"), "4");
        assert_eq!(fixture.read("app.log.2"), "3");
        assert_eq!(fixture.read("app.log.3"), "2");
        assert!(fixture.trap.errors().is_empty());
    }

    #[test]
    fn test_ascending_fills_then_slides() {
        let fixture = Fixture::new();
        let live = fixture.path("app.log");
        let strategy = IndexedStrategy::new(&live, fixture.pattern("app-%i.log"))
            .unwrap()
            .direction(IndexDirection::Ascending)
            .max_files(NonZeroUsize::new(3));

        for generation in 0..2 {
            fixture.roll(&strategy, &live, &generation.to_string());
        }
        assert_eq!(fixture.names(), vec!["app-1.log", "app-2.log"]);

        for generation in 2..6 {
            fixture.roll(&strategy, &live, &generation.to_string());
        }
        assert_eq!(fixture.names(), vec!["app-1.log", "app-2.log", "app-3.log"]);
        assert_eq!(fixture.read("app-1.log"), "3");
        assert_eq!(fixture.read("app-2.log"), "4");
        assert_eq!(fixture.read("app-3.log"), "5");
    }

    #[test]
    fn test_no_cap_keeps_everything() {
        let fixture = Fixture::new();
        let live = fixture.path("app.log");
        let strategy = IndexedStrategy::new(&live, fixture.pattern("app-%i.log"))
            .unwrap()
            .min_index(0)
            .max_files(None);

        for generation in 0..10 {
            fixture.roll(&strategy, &live, &generation.to_string());
        }
        assert_eq!(fixture.names().len(), 10);
        assert_eq!(fixture.read("app-0.log"), "9");
        assert_eq!(fixture.read("app-9.log"), "0");
    }

    #[test]
    fn test_compressed_archives() {
        let fixture = Fixture::new();
        let live = fixture.path("app.log");
        let strategy =
            IndexedStrategy::new(&live, fixture.pattern("app-%d{%Y%m%d}-%i.log.gz")).unwrap();

        fixture.roll(&strategy, &live, "first");
        fixture.roll(&strategy, &live, "second");
        assert_eq!(
            fixture.names(),
            vec!["app-20240810-1.log.gz", "app-20240810-2.log.gz"]
        );

        let archive = fs::File::open(fixture.path("app-20240810-2.log.gz")).unwrap();
        let mut decoder = GzDecoder::new(archive);
        let mut content = String::new();
        decoder.read_to_string(&mut content).unwrap();
        assert_eq!(content, "first");
    }

    #[test]
    fn test_occupied_target_abandons_rollover() {
        let fixture = Fixture::new();
        let live = fixture.path("app.log");
        let strategy = IndexedStrategy::new(&live, fixture.pattern("app-%i.log"))
            .unwrap()
            .direction(IndexDirection::Ascending)
            .min_index(3);

        // an index below the minimum is never touched
        fs::write(fixture.path("app-1.log"), "foreign").unwrap();
        fixture.roll(&strategy, &live, "first");
        assert_eq!(fixture.names(), vec!["app-1.log", "app-3.log"]);

        fs::create_dir(fixture.path("app-4.log")).unwrap();
        fs::write(&live, "second").unwrap();
        let now = date();
        let ctx = RolloverContext {
            current: &live,
            period_start: &now,
            now: &now,
            trap: &fixture.trap,
        };
        assert!(strategy.rollover(&ctx).is_err());
        assert_eq!(fixture.read("app.log"), "second");
        assert_eq!(fixture.read("app-3.log"), "first");
    }

    #[test]
    fn test_direct_write_advances_and_evicts() {
        let fixture = Fixture::new();
        let strategy = DirectWriteStrategy::new(fixture.pattern("app-%i.log"))
            .unwrap()
            .max_files(NonZeroUsize::new(2));

        let mut current = strategy.initial_path(&date()).unwrap();
        assert_eq!(current, fixture.path("app-1.log"));

        for generation in 0..4 {
            current = fixture.roll(&strategy, &current, &generation.to_string());
        }
        assert_eq!(current, fixture.path("app-5.log"));
        assert_eq!(fixture.names(), vec!["app-3.log", "app-4.log"]);

        // resume the highest uncompressed file on restart
        fs::write(&current, "live").unwrap();
        assert_eq!(strategy.initial_path(&date()).unwrap(), current);
    }

    #[test]
    fn test_direct_write_compresses_closed_file() {
        let fixture = Fixture::new();
        let strategy = DirectWriteStrategy::new(fixture.pattern("app-%i.log.gz")).unwrap();

        let current = strategy.initial_path(&date()).unwrap();
        let next = fixture.roll(&strategy, &current, "hello");
        assert_eq!(next, fixture.path("app-2.log"));
        assert_eq!(fixture.names(), vec!["app-1.log.gz"]);

        // a compressed file is never resumed
        assert_eq!(strategy.initial_path(&date()).unwrap(), next);
    }

    #[test]
    fn test_pattern_without_index_is_rejected() {
        let pattern = FilePattern::parse("app-%d.log").unwrap();
        assert!(IndexedStrategy::new("app.log", pattern.clone()).is_err());
        assert!(DirectWriteStrategy::new(pattern).is_err());
    }
}
