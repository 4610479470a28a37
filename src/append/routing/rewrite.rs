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

use crate::record::Record;

/// Transforms a record before it is routed.
///
/// A rewrite runs once per record, before the route key is evaluated. The rewritten record is
/// what the route key sees and what reaches the chosen appender.
///
/// Closures of type `Fn(&Record) -> Record` implement this trait.
///
/// # Examples
///
/// ```
/// use logforth_delivery::append::routing::Rewrite;
/// use logforth_delivery::record::Record;
///
/// let mask = |record: &Record| record.to_builder().context("password", "***").build();
///
/// let record = Record::builder().context("password", "hunter2").build();
/// assert_eq!(mask.rewrite(&record).context_value("password"), Some("***"));
/// ```
pub trait Rewrite: Send + Sync + 'static {
    /// Produce the record to route in place of `record`.
    fn rewrite(&self, record: &Record) -> Record;
}

impl<F> Rewrite for F
where
    F: Fn(&Record) -> Record + Send + Sync + 'static,
{
    fn rewrite(&self, record: &Record) -> Record {
        self(record)
    }
}
