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
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use jiff::Zoned;
use jiff::fmt::strtime;

use crate::Error;
use crate::append::file::Rotation;

const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d";
const GZIP_SUFFIX: &str = ".gz";

// Stands in for the index while splitting a rendered name; never produced by strftime.
const INDEX_MARK: char = '\u{1}';

/// A file name pattern for archived (or directly written) log files.
///
/// Supported placeholders:
///
/// * `%d{fmt}`: the date of the period being archived, rendered with the strftime format `fmt`.
///   A bare `%d` means `%d{%Y-%m-%d}`.
/// * `%i`: the archive index. At most one, and only in the file name component.
/// * `%%`: a literal percent sign.
///
/// A trailing `.gz` selects gzip compression of the archive.
///
/// # Examples
///
/// ```
/// use logforth_delivery::append::file::FilePattern;
///
/// let pattern = FilePattern::parse("logs/app-%d{%Y-%m}-%i.log.gz").unwrap();
/// assert!(pattern.has_date());
/// assert!(pattern.has_index());
/// assert!(pattern.is_compressed());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilePattern {
    segments: Vec<Segment>,
    compressed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Date(String),
    Index,
}

/// An existing file that matched a [`FilePattern`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Archive {
    pub(crate) index: u32,
    pub(crate) path: PathBuf,
    pub(crate) compressed: bool,
}

impl FilePattern {
    /// Parse a file pattern.
    pub fn parse(pattern: &str) -> Result<FilePattern, Error> {
        let (body, compressed) = match pattern.strip_suffix(GZIP_SUFFIX) {
            Some(body) => (body, true),
            None => (pattern, false),
        };

        let mut segments = vec![];
        let mut literal = String::new();
        let mut chars = body.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                literal.push(c);
                continue;
            }

            match chars.next() {
                Some('%') => literal.push('%'),
                Some('i') => {
                    flush_literal(&mut segments, &mut literal);
                    segments.push(Segment::Index);
                }
                Some('d') => {
                    flush_literal(&mut segments, &mut literal);
                    if chars.peek() == Some(&'{') {
                        chars.next();
                        let mut format = String::new();
                        loop {
                            match chars.next() {
                                Some('}') => break,
                                Some(c) => format.push(c),
                                None => {
                                    return Err(Error::config("unclosed date format")
                                        .with_context("pattern", pattern));
                                }
                            }
                        }
                        if format.is_empty() {
                            format.push_str(DEFAULT_DATE_FORMAT);
                        }
                        if let Err(err) = strtime::format(&format, &Zoned::now()) {
                            return Err(Error::config("malformed date format")
                                .with_context("pattern", pattern)
                                .with_source(err));
                        }
                        segments.push(Segment::Date(format));
                    } else {
                        segments.push(Segment::Date(DEFAULT_DATE_FORMAT.to_string()));
                    }
                }
                Some(c) => {
                    return Err(Error::config(format!("unknown placeholder: %{c}"))
                        .with_context("pattern", pattern));
                }
                None => {
                    return Err(Error::config("dangling '%' at the end of file pattern")
                        .with_context("pattern", pattern));
                }
            }
        }
        flush_literal(&mut segments, &mut literal);

        if segments.is_empty() {
            return Err(Error::config("file pattern must not be empty"));
        }

        let indexes = segments
            .iter()
            .filter(|s| matches!(s, Segment::Index))
            .count();
        if indexes > 1 {
            return Err(Error::config("file pattern must contain at most one %i")
                .with_context("pattern", pattern));
        }

        let parsed = FilePattern {
            segments,
            compressed,
        };
        if parsed.has_index() {
            let sample = parsed.render(&Zoned::now(), None);
            let sample = Path::new(&sample);
            if sample
                .parent()
                .is_some_and(|dir| dir.to_string_lossy().contains(INDEX_MARK))
            {
                return Err(Error::config("%i must appear in the file name, not the directory")
                    .with_context("pattern", pattern));
            }
        }
        Ok(parsed)
    }

    /// Whether the pattern contains a `%d` placeholder.
    pub fn has_date(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Date(_)))
    }

    /// Whether the pattern contains a `%i` placeholder.
    pub fn has_index(&self) -> bool {
        self.segments.iter().any(|s| matches!(s, Segment::Index))
    }

    /// Whether archives are gzip compressed.
    pub fn is_compressed(&self) -> bool {
        self.compressed
    }

    /// The smallest calendar unit used by the date placeholders.
    ///
    /// Returns [`Rotation::Never`] if the pattern carries no date.
    pub fn granularity(&self) -> Rotation {
        let mut granularity = Rotation::Never;
        for segment in &self.segments {
            let Segment::Date(format) = segment else {
                continue;
            };
            let rotation = date_granularity(format);
            granularity = match (granularity, rotation) {
                (Rotation::Minutely, _) | (_, Rotation::Minutely) => Rotation::Minutely,
                (Rotation::Hourly, _) | (_, Rotation::Hourly) => Rotation::Hourly,
                _ => Rotation::Daily,
            };
        }
        granularity
    }

    /// Render the path for the given period and index, without the compression suffix.
    pub fn format(&self, date: &Zoned, index: u32) -> PathBuf {
        PathBuf::from(self.render(date, Some(index)))
    }

    /// Render the path an archive is finally stored at, including the compression suffix.
    pub fn archive_path(&self, date: &Zoned, index: u32) -> PathBuf {
        let mut path = self.render(date, Some(index));
        if self.compressed {
            path.push_str(GZIP_SUFFIX);
        }
        PathBuf::from(path)
    }

    /// Recover the index of `path` if it was produced by this pattern for the period `date`.
    ///
    /// Compressed and uncompressed variants are both recognized.
    pub fn parse_index(&self, path: &Path, date: &Zoned) -> Option<u32> {
        let (dir, prefix, suffix) = self.split(date)?;
        if path.parent().unwrap_or(Path::new("")) != dir {
            return None;
        }
        let name = path.file_name()?.to_str()?;
        match_index(name, &prefix, &suffix).map(|(index, _)| index)
    }

    /// List every existing file produced by this pattern for the period `date`, sorted by index.
    pub(crate) fn list(&self, date: &Zoned) -> Result<Vec<Archive>, Error> {
        let Some((dir, prefix, suffix)) = self.split(date) else {
            return Ok(vec![]);
        };

        let read_dir = match fs::read_dir(dir_or_cwd(&dir)) {
            Ok(read_dir) => read_dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => {
                return Err(Error::from_io_error(err).with_context("dir", dir.display()));
            }
        };

        let mut archives = read_dir
            .filter_map(|entry| {
                let entry = entry.ok()?;
                let metadata = entry.metadata().ok()?;
                // the appender only creates files, not directories or symlinks
                if !metadata.is_file() {
                    return None;
                }

                let filename = entry.file_name();
                // if the filename is not a UTF-8 string, skip it.
                let filename = filename.to_str()?;
                let (index, compressed) = match_index(filename, &prefix, &suffix)?;
                Some(Archive {
                    index,
                    path: dir.join(filename),
                    compressed,
                })
            })
            .collect::<Vec<_>>();
        archives.sort_by_key(|a| a.index);
        Ok(archives)
    }

    fn render(&self, date: &Zoned, index: Option<u32>) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Date(format) => match strtime::format(format, date) {
                    Ok(date) => out.push_str(&date),
                    Err(_) => out.push_str(format),
                },
                Segment::Index => match index {
                    Some(index) => out.push_str(&index.to_string()),
                    None => out.push(INDEX_MARK),
                },
            }
        }
        out
    }

    // The directory, and the file name around the index placeholder.
    fn split(&self, date: &Zoned) -> Option<(PathBuf, String, String)> {
        if !self.has_index() {
            return None;
        }
        let rendered = self.render(date, None);
        let rendered = Path::new(&rendered);
        let dir = rendered.parent().unwrap_or(Path::new("")).to_path_buf();
        let name = rendered.file_name()?.to_str()?;
        let (prefix, suffix) = name.split_once(INDEX_MARK)?;
        Some((dir, prefix.to_string(), suffix.to_string()))
    }
}

impl FromStr for FilePattern {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilePattern::parse(s)
    }
}

pub(crate) fn dir_or_cwd(dir: &Path) -> &Path {
    if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    }
}

fn flush_literal(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn match_index(filename: &str, prefix: &str, suffix: &str) -> Option<(u32, bool)> {
    let (filename, compressed) = match filename.strip_suffix(GZIP_SUFFIX) {
        Some(stripped) => (stripped, true),
        None => (filename, false),
    };
    let middle = filename.strip_prefix(prefix)?.strip_suffix(suffix)?;
    if middle.is_empty() || !middle.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index = middle.parse().ok()?;
    Some((index, compressed))
}

fn date_granularity(format: &str) -> Rotation {
    let mut granularity = Rotation::Daily;
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        // skip strftime flags and padding
        let mut spec = chars.next();
        while let Some(c) = spec {
            if c.is_ascii_digit() || matches!(c, '-' | '_' | '0' | '^' | '#' | ':') {
                spec = chars.next();
            } else {
                break;
            }
        }
        match spec {
            Some('M' | 'S' | 'R' | 'T' | 'c' | 's' | 'f') => return Rotation::Minutely,
            Some('H' | 'I' | 'k' | 'l') => granularity = Rotation::Hourly,
            _ => {}
        }
    }
    granularity
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use tempfile::TempDir;

    use super::*;

    fn date() -> Zoned {
        Zoned::from_str("2024-08-10T17:12:52+08:00[+08:00]").unwrap()
    }

    #[test]
    fn test_format() {
        let pattern = FilePattern::parse("logs/app-%d{%Y-%m-%d}-%i.log").unwrap();
        assert_eq!(
            pattern.format(&date(), 3),
            PathBuf::from("logs/app-2024-08-10-3.log")
        );

        let pattern = FilePattern::parse("logs/app-%d.%i.log.gz").unwrap();
        assert_eq!(
            pattern.format(&date(), 1),
            PathBuf::from("logs/app-2024-08-10.1.log")
        );
        assert_eq!(
            pattern.archive_path(&date(), 1),
            PathBuf::from("logs/app-2024-08-10.1.log.gz")
        );

        let pattern = FilePattern::parse("100%%-%i").unwrap();
        assert_eq!(pattern.format(&date(), 7), PathBuf::from("100%-7"));
    }

    #[test]
    fn test_parse_errors() {
        assert!(FilePattern::parse("").is_err());
        assert!(FilePattern::parse("app-%i-%i.log").is_err());
        assert!(FilePattern::parse("app-%x.log").is_err());
        assert!(FilePattern::parse("app-%d{%Y.log").is_err());
        assert!(FilePattern::parse("app.log%").is_err());
        assert!(FilePattern::parse("app-%d{%Q}.log").is_err());
        assert!(FilePattern::parse("%i/app.log").is_err());
    }

    #[test]
    fn test_granularity() {
        let granularity = |p: &str| FilePattern::parse(p).unwrap().granularity();
        assert_eq!(granularity("app-%i.log"), Rotation::Never);
        assert_eq!(granularity("app-%d-%i.log"), Rotation::Daily);
        assert_eq!(granularity("app-%d{%Y-%m-%d-%H}-%i.log"), Rotation::Hourly);
        assert_eq!(granularity("app-%d{%Y-%m-%d-%H-%M}-%i.log"), Rotation::Minutely);
        assert_eq!(granularity("%d{%Y}/app-%d{%H}-%i.log"), Rotation::Hourly);
    }

    #[test]
    fn test_parse_index() {
        let pattern = FilePattern::parse("logs/app-%d-%i.log.gz").unwrap();
        let date = date();

        let index = |p: &str| pattern.parse_index(Path::new(p), &date);
        assert_eq!(index("logs/app-2024-08-10-12.log"), Some(12));
        assert_eq!(index("logs/app-2024-08-10-12.log.gz"), Some(12));
        assert_eq!(index("logs/app-2024-08-11-12.log"), None);
        assert_eq!(index("logs/app-2024-08-10-.log"), None);
        assert_eq!(index("logs/app-2024-08-10-x1.log"), None);
        assert_eq!(index("other/app-2024-08-10-1.log"), None);
    }

    #[test]
    fn test_list_sorted_by_index() {
        let temp_dir = TempDir::new().expect("failed to create a temporary directory");
        let pattern = format!("{}/app.%i.log.gz", temp_dir.path().display());
        let pattern = FilePattern::parse(&pattern).unwrap();

        for name in ["app.10.log.gz", "app.2.log", "app.1.log.gz", "app.log", "other.3.log"] {
            File::create(temp_dir.path().join(name)).unwrap();
        }
        fs::create_dir(temp_dir.path().join("app.4.log")).unwrap();

        let archives = pattern.list(&date()).unwrap();
        let indexes = archives
            .iter()
            .map(|a| (a.index, a.compressed))
            .collect::<Vec<_>>();
        assert_eq!(indexes, vec![(1, true), (2, false), (10, true)]);
    }
}
