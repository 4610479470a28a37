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
use std::sync::Arc;
use std::sync::Mutex;

use crate::Append;
use crate::Error;
use crate::ErrorKind;
use crate::Trap;
use crate::append::routing::AppendFactory;
use crate::append::routing::Bindings;
use crate::append::routing::IdlePurgePolicy;
use crate::append::routing::Rewrite;
use crate::append::routing::RouteKey;
use crate::append::routing::factory::FnFactory;
use crate::append::routing::purge::PurgeTimer;
use crate::append::routing::table::Lookup;
use crate::append::routing::table::RouteTable;
use crate::record::Record;
use crate::trap::DefaultTrap;
use crate::trap::WarnOnce;

const DEFAULT_ROUTE_KEY: &str = "default";

/// A builder to configure and create a [`Routing`] appender.
pub struct RoutingBuilder {
    name: String,
    key: Box<dyn RouteKey>,
    default_key: String,
    default_eager: bool,
    routes: Vec<(String, Box<dyn Append>)>,
    factory: Option<Box<dyn AppendFactory>>,
    rewrite: Option<Box<dyn Rewrite>>,
    purge: Option<IdlePurgePolicy>,
    bindings: Bindings,
    trap: Box<dyn Trap>,
}

impl fmt::Debug for RoutingBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoutingBuilder")
            .field("name", &self.name)
            .field("default_key", &self.default_key)
            .field("default_eager", &self.default_eager)
            .field("routes", &self.routes)
            .field("purge", &self.purge)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl RoutingBuilder {
    /// Create a new routing appender builder.
    ///
    /// `name` names the purge thread; `key` computes the route key of every record.
    pub fn new(name: impl Into<String>, key: impl RouteKey) -> Self {
        Self {
            name: name.into(),
            key: Box::new(key),
            default_key: DEFAULT_ROUTE_KEY.to_string(),
            default_eager: false,
            routes: vec![],
            factory: None,
            rewrite: None,
            purge: None,
            bindings: Bindings::default(),
            trap: Box::new(DefaultTrap::default()),
        }
    }

    /// Build the [`Routing`] appender.
    ///
    /// Static routes are started here. Failures to start them, or to create an eager default
    /// route, are reported to the trap.
    pub fn build(self) -> Routing {
        let RoutingBuilder {
            name,
            key,
            default_key,
            default_eager,
            routes,
            factory,
            rewrite,
            purge,
            bindings,
            trap,
        } = self;

        let trap: Arc<dyn Trap> = Arc::from(trap);
        let table = Arc::new(RouteTable::default());

        for (key, append) in routes {
            if let Err(err) = append.start() {
                let err = Error::dispatch("failed to start route appender")
                    .with_context("key", &key)
                    .with_source(err);
                trap.trap(&err);
            }
            table.insert_static(key, append);
        }

        if default_eager
            && !table.contains(&default_key)
            && let Some(factory) = factory.as_deref()
        {
            // an eager default route is never purged
            match factory.create(&default_key).and_then(|append| {
                append.start()?;
                Ok(append)
            }) {
                Ok(append) => table.insert_static(default_key.clone(), append),
                Err(err) => {
                    let err = Error::dispatch("failed to create default route appender")
                        .with_context("key", &default_key)
                        .with_source(err);
                    trap.trap(&err);
                }
            }
        }

        let timer = purge.map(|policy| {
            let table = table.clone();
            let trap = trap.clone();
            PurgeTimer::spawn(format!("{name}-purge"), policy.interval(), move || {
                table.purge(policy.idle_timeout(), &*trap);
            })
        });

        Routing {
            name,
            key,
            default_key,
            factory,
            rewrite,
            purge,
            bindings,
            table,
            trap,
            timer: Mutex::new(timer),
            stopped_warning: WarnOnce::default(),
        }
    }

    /// Set the key used when the route key evaluates to nothing, or when no route exists for it
    /// and there is no factory.
    ///
    /// Default to `"default"`.
    #[must_use]
    pub fn default_key(mut self, key: impl Into<String>) -> Self {
        self.default_key = key.into();
        self
    }

    /// Create the default route when the appender is built rather than on its first record.
    ///
    /// An eagerly created default route is never purged.
    #[must_use]
    pub fn default_route_eager(mut self, eager: bool) -> Self {
        self.default_eager = eager;
        self
    }

    /// Bind `key` to an existing appender. Such routes are never purged.
    #[must_use]
    pub fn route(mut self, key: impl Into<String>, append: impl Into<Box<dyn Append>>) -> Self {
        self.routes.push((key.into(), append.into()));
        self
    }

    /// Create appenders for unseen keys with a closure.
    #[must_use]
    pub fn factory<F, A>(self, f: F) -> Self
    where
        F: Fn(&str) -> Result<A, Error> + Send + Sync + 'static,
        A: Append,
    {
        self.append_factory(FnFactory::new(f))
    }

    /// Create appenders for unseen keys with an [`AppendFactory`].
    #[must_use]
    pub fn append_factory(mut self, factory: impl Into<Box<dyn AppendFactory>>) -> Self {
        self.factory = Some(factory.into());
        self
    }

    /// Rewrite every record before it is routed.
    #[must_use]
    pub fn rewrite(mut self, rewrite: impl Rewrite) -> Self {
        self.rewrite = Some(Box::new(rewrite));
        self
    }

    /// Purge idle routes on a background thread.
    #[must_use]
    pub fn purge(mut self, policy: IdlePurgePolicy) -> Self {
        self.purge = Some(policy);
        self
    }

    /// Set an initial binding visible to the route key.
    #[must_use]
    pub fn binding(self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.bindings.insert(key, value);
        self
    }

    /// Set the trap for handling errors during routing.
    ///
    /// Default to [`DefaultTrap`].
    #[must_use]
    pub fn trap(mut self, trap: impl Into<Box<dyn Trap>>) -> Self {
        self.trap = trap.into();
        self
    }
}

/// An appender that dispatches every record to an appender chosen by a route key.
///
/// Appenders for keys without a static route are created on first use by the factory, at most
/// once per key even when many threads see a key at the same time, and are stopped when the
/// purge policy finds them idle or when the routing appender stops. A route is never stopped
/// while a record is being appended to it.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use logforth_delivery::append::Append;
/// use logforth_delivery::append::RoutingBuilder;
/// use logforth_delivery::append::Testing;
/// use logforth_delivery::append::routing::IdlePurgePolicy;
/// use logforth_delivery::append::routing::TargetKey;
/// use logforth_delivery::record::Record;
///
/// let audit = Testing::default();
/// let routing = RoutingBuilder::new("by-target", TargetKey)
///     .route("audit", audit.clone())
///     .factory(|_: &str| Ok(Testing::default()))
///     .purge(IdlePurgePolicy::new(Duration::from_secs(300)))
///     .build();
///
/// routing
///     .append(&Record::builder().target("audit").payload("login").build())
///     .unwrap();
/// routing
///     .append(&Record::builder().target("db").payload("query").build())
///     .unwrap();
///
/// assert_eq!(audit.payloads(), vec!["login"]);
/// assert_eq!(routing.routes(), vec!["audit", "db"]);
/// routing.stop().unwrap();
/// ```
pub struct Routing {
    name: String,
    key: Box<dyn RouteKey>,
    default_key: String,
    factory: Option<Box<dyn AppendFactory>>,
    rewrite: Option<Box<dyn Rewrite>>,
    purge: Option<IdlePurgePolicy>,
    bindings: Bindings,

    table: Arc<RouteTable>,
    trap: Arc<dyn Trap>,
    timer: Mutex<Option<PurgeTimer>>,
    stopped_warning: WarnOnce,
}

impl fmt::Debug for Routing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Routing")
            .field("name", &self.name)
            .field("default_key", &self.default_key)
            .field("routes", &self.table.keys())
            .field("purge", &self.purge)
            .field("bindings", &self.bindings)
            .finish_non_exhaustive()
    }
}

impl Routing {
    /// The name of this appender.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bindings shared by all route key evaluations.
    pub fn bindings(&self) -> &Bindings {
        &self.bindings
    }

    /// The keys of all current routes, sorted.
    pub fn routes(&self) -> Vec<String> {
        self.table.keys()
    }

    /// Run one purge cycle now, returning the purged keys.
    ///
    /// Does nothing if no purge policy is configured.
    pub fn purge(&self) -> Vec<String> {
        match self.purge {
            Some(policy) => self.table.purge(policy.idle_timeout(), &*self.trap),
            None => vec![],
        }
    }

    /// Remove the route of `key` and stop its appender.
    ///
    /// Returns whether a route was removed. A later record for `key` creates it again.
    pub fn remove(&self, key: &str) -> bool {
        self.table.remove(key, &*self.trap)
    }

    fn dispatch(&self, key: &str, record: &Record) {
        let factory = self.factory.as_deref();
        let mut key = key;
        loop {
            let entry = match self.table.lookup(key, factory) {
                Ok(Lookup::Found(entry)) => entry,
                Ok(Lookup::Missing) if key != self.default_key => {
                    key = self.default_key.as_str();
                    continue;
                }
                Ok(Lookup::Missing) => {
                    let err = Error::config("no route for record").with_context("key", key);
                    self.trap.trap(&err);
                    return;
                }
                Ok(Lookup::Closed) => {
                    self.stopped_warning.trap_once(&*self.trap, || {
                        Error::with_kind(
                            ErrorKind::Shutdown,
                            "routing appender is stopped; records are discarded",
                        )
                        .with_context("name", &self.name)
                    });
                    return;
                }
                Err(err) => {
                    let err = Error::dispatch("failed to create route appender")
                        .with_context("key", key)
                        .with_source(err);
                    self.trap.trap(&err);
                    return;
                }
            };

            match entry.with_append(|append| append.append(record)) {
                Some(Ok(())) => return,
                Some(Err(err)) => {
                    let err = Error::dispatch("failed to append record to route")
                        .with_context("key", key)
                        .with_source(err);
                    self.trap.trap(&err);
                    return;
                }
                // purged after the lookup; the next lookup recreates the route
                None => continue,
            }
        }
    }
}

impl Append for Routing {
    fn append(&self, record: &Record) -> Result<(), Error> {
        let rewritten;
        let record = match &self.rewrite {
            Some(rewrite) => {
                rewritten = rewrite.rewrite(record);
                &rewritten
            }
            None => record,
        };

        let key = self.key.evaluate(record, &self.bindings);
        let key = key.as_deref().unwrap_or(self.default_key.as_str());
        self.dispatch(key, record);
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        let mut result = Ok(());
        for entry in self.table.entries() {
            if let Some(Err(err)) = entry.with_append(|append| append.flush())
                && result.is_ok()
            {
                result = Err(err);
            }
        }
        result
    }

    fn stop(&self) -> Result<(), Error> {
        let timer = self
            .timer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(mut timer) = timer {
            timer.cancel();
        }
        self.table.close(&*self.trap);
        Ok(())
    }
}

impl Drop for Routing {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}
