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

//! A bridge to forward logs from the `log` crate to an appender.

use std::fmt;

use crate::Append;
use crate::Error;
use crate::Trap;
use crate::record::Level;
use crate::record::Record;
use crate::trap::DefaultTrap;

impl From<log::Level> for Level {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Error => Self::Error,
            log::Level::Warn => Self::Warn,
            log::Level::Info => Self::Info,
            log::Level::Debug => Self::Debug,
            log::Level::Trace => Self::Trace,
        }
    }
}

/// A [`log::Log`] implementation that hands every enabled record to one appender.
///
/// Key-values of the `log` record are copied into the context map of the delivered record.
pub struct LogBridge {
    append: Box<dyn Append>,
    max_level: log::LevelFilter,
    trap: Box<dyn Trap>,
}

impl fmt::Debug for LogBridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogBridge")
            .field("append", &self.append)
            .field("max_level", &self.max_level)
            .finish_non_exhaustive()
    }
}

impl LogBridge {
    /// Create a bridge to `append` that forwards every level.
    pub fn new(append: impl Into<Box<dyn Append>>) -> Self {
        Self {
            append: append.into(),
            max_level: log::LevelFilter::Trace,
            trap: Box::new(DefaultTrap::default()),
        }
    }

    /// Only forward records at `max_level` or more severe.
    #[must_use]
    pub fn max_level(mut self, max_level: log::LevelFilter) -> Self {
        self.max_level = max_level;
        self
    }

    /// Set the trap for errors returned by the appender.
    ///
    /// Default to [`DefaultTrap`].
    #[must_use]
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = trap.into();
        self
    }

    fn convert(record: &log::Record) -> Record {
        let mut builder = Record::builder()
            .level(record.level().into())
            .target(record.target().to_string())
            .payload(record.args().to_string());

        struct KeyValueVisitor {
            kvs: Vec<(String, String)>,
        }

        impl<'kvs> log::kv::VisitSource<'kvs> for KeyValueVisitor {
            fn visit_pair(
                &mut self,
                key: log::kv::Key<'kvs>,
                value: log::kv::Value<'kvs>,
            ) -> Result<(), log::kv::Error> {
                self.kvs.push((key.as_str().to_string(), value.to_string()));
                Ok(())
            }
        }

        let mut visitor = KeyValueVisitor { kvs: vec![] };
        // the visitor never fails
        let _ = record.key_values().visit(&mut visitor);
        for (key, value) in visitor.kvs {
            builder = builder.context(key, value);
        }
        builder.build()
    }
}

impl log::Log for LogBridge {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.max_level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        if let Err(err) = self.append.append(&Self::convert(record)) {
            let err = Error::dispatch("failed to append log record").with_source(err);
            self.trap.trap(&err);
        }
    }

    fn flush(&self) {
        if let Err(err) = self.append.flush() {
            let err = Error::dispatch("failed to flush appender").with_source(err);
            self.trap.trap(&err);
        }
    }
}

/// Set up the log crate global logger with `bridge`.
///
/// The global maximum log level is set to the bridge's maximum level.
///
/// # Errors
///
/// Return an error if the log crate global logger has already been set.
///
/// # Examples
///
/// ```
/// use logforth_delivery::append::AsyncBuilder;
/// use logforth_delivery::append::Testing;
/// use logforth_delivery::bridge::log::LogBridge;
///
/// let asynchronous = AsyncBuilder::new("log-bridge")
///     .append(Testing::default())
///     .build();
/// let bridge = LogBridge::new(asynchronous).max_level(log::LevelFilter::Info);
/// if let Err(err) = logforth_delivery::bridge::log::setup_log_crate(bridge) {
///     eprintln!("failed to setup log crate: {err}");
/// }
///
/// log::info!("hello");
/// ```
pub fn setup_log_crate(bridge: LogBridge) -> Result<(), log::SetLoggerError> {
    let max_level = bridge.max_level;
    log::set_boxed_logger(Box::new(bridge))?;
    log::set_max_level(max_level);
    Ok(())
}

#[cfg(test)]
mod tests {
    use log::Log;

    use super::*;
    use crate::append::Testing;
    use crate::trap::testing::CollectTrap;

    #[test]
    fn test_converts_level_target_and_key_values() {
        let testing = Testing::default();
        let bridge = LogBridge::new(testing.clone());

        bridge.log(
            &log::Record::builder()
                .args(format_args!("user {} logged in", 42))
                .level(log::Level::Warn)
                .target("auth")
                .key_values(&[("user", "alice"), ("ip", "10.0.0.1")])
                .build(),
        );

        let records = testing.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].payload(), "user 42 logged in");
        assert_eq!(records[0].level(), Level::Warn);
        assert_eq!(records[0].target(), "auth");
        assert_eq!(records[0].context_value("user"), Some("alice"));
        assert_eq!(records[0].context_value("ip"), Some("10.0.0.1"));
    }

    #[test]
    fn test_max_level_filters() {
        let testing = Testing::default();
        let bridge = LogBridge::new(testing.clone()).max_level(log::LevelFilter::Info);

        for level in [log::Level::Error, log::Level::Info, log::Level::Debug] {
            bridge.log(
                &log::Record::builder()
                    .args(format_args!("{level}"))
                    .level(level)
                    .build(),
            );
        }
        assert_eq!(testing.payloads(), vec!["ERROR", "INFO"]);
    }

    #[test]
    fn test_appender_errors_are_trapped() {
        let trap = CollectTrap::default();
        let bridge = LogBridge::new(Testing::default().failing()).trap(trap.clone());

        bridge.log(&log::Record::builder().args(format_args!("lost")).build());
        bridge.flush();

        assert_eq!(trap.errors().len(), 1);
    }
}
