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

//! The event delivery core of Logforth.
//!
//! This crate moves log records from application threads to their destinations through three
//! composable appenders:
//!
//! * [`Async`](append::Async) hands records over to a background thread through a bounded queue,
//!   deciding what to do when the queue is full with an
//!   [`OverflowPolicy`](append::asynchronous::OverflowPolicy).
//! * [`File`](append::File) writes to a file and rolls it over by size, time or startup, with
//!   indexed or dated archives, optional gzip compression and a cap on retained archives.
//! * [`Routing`](append::Routing) computes a key for every record and dispatches it to an
//!   appender created on first use for that key and purged once idle.
//!
//! Each of them is an [`Append`], so they nest: an `Async` can feed a `Routing` that creates
//! one `File` per tenant.
//!
//! Failures that cannot be returned to the logging call site go to a [`Trap`].
//!
//! # Examples
//!
//! ```
//! use logforth_delivery::append::Append;
//! use logforth_delivery::append::AsyncBuilder;
//! use logforth_delivery::append::RoutingBuilder;
//! use logforth_delivery::append::Testing;
//! use logforth_delivery::append::routing::ContextKey;
//! use logforth_delivery::record::Record;
//!
//! let routing = RoutingBuilder::new("tenants", ContextKey::new("tenant"))
//!     .factory(|_: &str| Ok(Testing::default()))
//!     .build();
//! let asynchronous = AsyncBuilder::new("logforth-async")
//!     .append(routing)
//!     .build();
//!
//! let record = Record::builder()
//!     .payload("hello")
//!     .context("tenant", "acme")
//!     .build();
//! asynchronous.append(&record).unwrap();
//! asynchronous.stop().unwrap();
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod append;
pub mod layout;
pub mod record;
pub mod trap;

#[cfg(feature = "bridge-log")]
pub mod bridge;

mod error;

pub use append::Append;
pub use error::Error;
pub use error::ErrorKind;
pub use layout::Layout;
pub use trap::Trap;
