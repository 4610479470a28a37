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

use jiff::RoundMode;
use jiff::ToSpan;
use jiff::Unit;
use jiff::Zoned;
use jiff::ZonedRound;

/// Defines a fixed calendar period for rolling over a log file.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub enum Rotation {
    /// Roll over at the start of every minute.
    Minutely,
    /// Roll over at the start of every hour.
    Hourly,
    /// Roll over at midnight.
    Daily,
    /// No time-based rollover.
    Never,
}

impl Rotation {
    /// The start of the period that follows the one containing `current`.
    pub fn next_boundary(&self, current: &Zoned) -> Option<Zoned> {
        let (unit, span) = match self {
            Rotation::Minutely => (Unit::Minute, 1.minute()),
            Rotation::Hourly => (Unit::Hour, 1.hour()),
            Rotation::Daily => (Unit::Day, 1.day()),
            Rotation::Never => return None,
        };

        let start = current
            .round(ZonedRound::new().smallest(unit).mode(RoundMode::Trunc))
            .ok()?;
        start.checked_add(span).ok()
    }

    /// The date format used in archive names when no file pattern is given.
    pub(crate) fn date_format(&self) -> &'static str {
        match self {
            Rotation::Minutely => "%Y-%m-%d-%H-%M",
            Rotation::Hourly => "%Y-%m-%d-%H",
            Rotation::Daily | Rotation::Never => "%Y-%m-%d",
        }
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_next_boundary() {
        let current = Zoned::from_str("2024-08-10T17:12:52+08:00[+08:00]").unwrap();

        assert_eq!(
            Rotation::Minutely.next_boundary(&current),
            Some(Zoned::from_str("2024-08-10T17:13:00+08:00[+08:00]").unwrap())
        );
        assert_eq!(
            Rotation::Hourly.next_boundary(&current),
            Some(Zoned::from_str("2024-08-10T18:00:00+08:00[+08:00]").unwrap())
        );
        assert_eq!(
            Rotation::Daily.next_boundary(&current),
            Some(Zoned::from_str("2024-08-11T00:00:00+08:00[+08:00]").unwrap())
        );
        assert_eq!(Rotation::Never.next_boundary(&current), None);
    }
}
