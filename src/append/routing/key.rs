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

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::RwLockReadGuard;
use std::sync::RwLockWriteGuard;

use crate::record::Record;

/// Computes the route key of a record.
///
/// Returning `None` sends the record to the default route. Evaluation happens on the producer
/// thread, so it should be fast.
///
/// Closures of type `Fn(&Record, &Bindings) -> Option<String>` implement this trait.
pub trait RouteKey: Send + Sync + 'static {
    /// Compute the route key of `record`.
    fn evaluate(&self, record: &Record, bindings: &Bindings) -> Option<String>;
}

impl<F> RouteKey for F
where
    F: Fn(&Record, &Bindings) -> Option<String> + Send + Sync + 'static,
{
    fn evaluate(&self, record: &Record, bindings: &Bindings) -> Option<String> {
        self(record, bindings)
    }
}

/// Routes every record to the same key.
#[derive(Debug, Clone)]
pub struct StaticKey(String);

impl StaticKey {
    /// Creates a new [`StaticKey`].
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }
}

impl RouteKey for StaticKey {
    fn evaluate(&self, _: &Record, _: &Bindings) -> Option<String> {
        Some(self.0.clone())
    }
}

/// Routes by the record's target (logger name).
#[derive(Debug, Default, Clone, Copy)]
pub struct TargetKey;

impl RouteKey for TargetKey {
    fn evaluate(&self, record: &Record, _: &Bindings) -> Option<String> {
        let target = record.target();
        (!target.is_empty()).then(|| target.to_string())
    }
}

/// Routes by one entry of the record's context map.
#[derive(Debug, Clone)]
pub struct ContextKey(String);

impl ContextKey {
    /// Creates a new [`ContextKey`] reading the context entry `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }
}

impl RouteKey for ContextKey {
    fn evaluate(&self, record: &Record, _: &Bindings) -> Option<String> {
        record.context_value(&self.0).map(str::to_string)
    }
}

/// Routes by the record's marker.
#[derive(Debug, Default, Clone, Copy)]
pub struct MarkerKey;

impl RouteKey for MarkerKey {
    fn evaluate(&self, record: &Record, _: &Bindings) -> Option<String> {
        record.marker().map(str::to_string)
    }
}

/// A key-value store shared by every route key evaluation of one [`Routing`] appender.
///
/// Evaluators may read and write it concurrently from any producer thread.
///
/// [`Routing`]: crate::append::Routing
#[derive(Debug, Default)]
pub struct Bindings {
    values: RwLock<HashMap<String, String>>,
}

impl Bindings {
    /// Get the value of `key`.
    pub fn get(&self, key: &str) -> Option<String> {
        self.read().get(key).cloned()
    }

    /// Set the value of `key`, returning the previous value.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.write().insert(key.into(), value.into())
    }

    /// Remove `key`, returning its value.
    pub fn remove(&self, key: &str) -> Option<String> {
        self.write().remove(key)
    }

    /// The number of bindings.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether there is no binding.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// A copy of all bindings.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.read().clone()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, String>> {
        self.values.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, String>> {
        self.values.write().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn test_builtin_keys() {
        let bindings = Bindings::default();
        let record = Record::builder()
            .target("db::pool")
            .marker("AUDIT")
            .context("tenant", "acme")
            .build();

        assert_eq!(StaticKey::new("all").evaluate(&record, &bindings), Some("all".into()));
        assert_eq!(TargetKey.evaluate(&record, &bindings), Some("db::pool".into()));
        assert_eq!(MarkerKey.evaluate(&record, &bindings), Some("AUDIT".into()));
        assert_eq!(
            ContextKey::new("tenant").evaluate(&record, &bindings),
            Some("acme".into())
        );
        assert_eq!(ContextKey::new("user").evaluate(&record, &bindings), None);

        let empty = Record::builder().build();
        assert_eq!(TargetKey.evaluate(&empty, &bindings), None);
        assert_eq!(MarkerKey.evaluate(&empty, &bindings), None);
    }

    #[test]
    fn test_closure_reads_and_writes_bindings() {
        let bindings = Bindings::default();
        bindings.insert("region", "eu");

        // remember the last tenant seen, and route by region
        let key = |record: &Record, bindings: &Bindings| {
            if let Some(tenant) = record.context_value("tenant") {
                bindings.insert("last_tenant", tenant);
            }
            bindings.get("region")
        };

        let record = Record::builder().context("tenant", "acme").build();
        assert_eq!(key.evaluate(&record, &bindings), Some("eu".into()));
        assert_eq!(bindings.get("last_tenant"), Some("acme".into()));
        assert_eq!(bindings.len(), 2);
    }

    #[test]
    fn test_bindings_are_shared_across_threads() {
        let bindings = Arc::new(Bindings::default());
        let handles = (0..8)
            .map(|i| {
                let bindings = bindings.clone();
                thread::spawn(move || {
                    for j in 0..100 {
                        bindings.insert(format!("{i}-{j}"), j.to_string());
                        assert!(bindings.get(&format!("{i}-{j}")).is_some());
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(bindings.len(), 800);
        assert_eq!(bindings.remove("0-0"), Some("0".into()));
        assert_eq!(bindings.snapshot().len(), 799);
    }
}
