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

use std::fmt::Write;
use std::time::SystemTime;

use crate::Error;
use crate::Layout;
use crate::record::Record;

/// A layout that formats log record as plain text.
///
/// Output format:
///
/// ```text
/// 1760092868730397000 ERROR [main] simple: Hello error! user=alice
/// 1760092868730572000  WARN [worker-1] simple: {AUDIT} Hello warn!
/// ```
///
/// # Examples
///
/// ```
/// use logforth_delivery::layout::PlainTextLayout;
///
/// let text_layout = PlainTextLayout::default();
/// ```
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct PlainTextLayout {}

impl Layout for PlainTextLayout {
    fn format(&self, record: &Record) -> Result<Vec<u8>, Error> {
        let mut text = String::new();

        // SAFETY: write to a string always succeeds
        match record.time().duration_since(SystemTime::UNIX_EPOCH) {
            Ok(dur) => write!(&mut text, "{}", dur.as_nanos()).unwrap(),
            Err(err) => write!(&mut text, "-{}", err.duration().as_nanos()).unwrap(),
        }

        let level = record.level();
        let thread = record.thread().name().unwrap_or("unnamed");
        let target = record.target();
        write!(&mut text, " {level:>5} [{thread}] {target}:").unwrap();
        if let Some(marker) = record.marker() {
            write!(&mut text, " {{{marker}}}").unwrap();
        }
        write!(&mut text, " {}", record.payload()).unwrap();
        for (key, value) in record.context() {
            write!(&mut text, " {key}={value}").unwrap();
        }

        Ok(text.into_bytes())
    }
}
