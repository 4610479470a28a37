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

//! Appenders and utilities for writing log records to rolling files.
//!
//! A [`File`] appender formats records and hands them to a [`FileManager`], which owns the
//! live file. Before every write the manager asks a [`TriggerPolicy`] whether to roll over; a
//! [`RolloverStrategy`] then decides what the closed file is renamed to, which old archives
//! are evicted, and where writing continues.
//!
//! # Examples
//!
//! ```no_run
//! use std::num::NonZeroU64;
//!
//! use logforth_delivery::append::File;
//! use logforth_delivery::append::FileBuilder;
//! use logforth_delivery::append::file::IndexDirection;
//!
//! let file: File = FileBuilder::new("logs/app.log")
//!     .file_pattern("logs/app.%i.log.gz")
//!     .index_direction(IndexDirection::Ascending)
//!     .rollover_size(NonZeroU64::new(64 * 1024 * 1024).unwrap())
//!     .rollover_on_startup(1)
//!     .build()
//!     .unwrap();
//! ```

pub use self::append::File;
pub use self::append::FileBuilder;
pub use self::manager::FileManager;
pub use self::pattern::FilePattern;
pub use self::rotation::Rotation;
pub use self::strategy::DirectWriteStrategy;
pub use self::strategy::IndexDirection;
pub use self::strategy::IndexedStrategy;
pub use self::strategy::RolloverContext;
pub use self::strategy::RolloverStrategy;
pub use self::trigger::CompositeTrigger;
pub use self::trigger::FileState;
pub use self::trigger::SizeTrigger;
pub use self::trigger::StartupTrigger;
pub use self::trigger::TimeTrigger;
pub use self::trigger::TriggerPolicy;

mod append;
mod clock;
mod manager;
mod pattern;
mod rotation;
mod strategy;
mod trigger;
