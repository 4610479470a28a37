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

//! Dispatch log records to appenders chosen by a route key.
//!
//! A [`Routing`] appender evaluates a [`RouteKey`] for every record, optionally after a
//! [`Rewrite`], and forwards the record to the appender bound to that key. Appenders for new
//! keys come from an [`AppendFactory`]; an [`IdlePurgePolicy`] stops the ones that have gone
//! quiet. Route keys may keep state in the routing appender's [`Bindings`].

pub use self::append::Routing;
pub use self::append::RoutingBuilder;
pub use self::factory::AppendFactory;
pub use self::key::Bindings;
pub use self::key::ContextKey;
pub use self::key::MarkerKey;
pub use self::key::RouteKey;
pub use self::key::StaticKey;
pub use self::key::TargetKey;
pub use self::purge::IdlePurgePolicy;
pub use self::rewrite::Rewrite;

mod append;
mod factory;
mod key;
mod purge;
mod rewrite;
mod table;
