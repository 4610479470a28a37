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

use std::marker::PhantomData;

use crate::Append;
use crate::Error;

/// Creates the appender for a route key seen for the first time.
pub trait AppendFactory: Send + Sync + 'static {
    /// Create the appender for `key`.
    fn create(&self, key: &str) -> Result<Box<dyn Append>, Error>;
}

impl<T: AppendFactory> From<T> for Box<dyn AppendFactory> {
    fn from(value: T) -> Self {
        Box::new(value)
    }
}

// Adapts a closure returning any appender type.
pub(crate) struct FnFactory<F, A> {
    f: F,
    _append: PhantomData<fn() -> A>,
}

impl<F, A> FnFactory<F, A>
where
    F: Fn(&str) -> Result<A, Error> + Send + Sync + 'static,
    A: Append,
{
    pub(crate) fn new(f: F) -> Self {
        Self {
            f,
            _append: PhantomData,
        }
    }
}

impl<F, A> AppendFactory for FnFactory<F, A>
where
    F: Fn(&str) -> Result<A, Error> + Send + Sync + 'static,
    A: Append,
{
    fn create(&self, key: &str) -> Result<Box<dyn Append>, Error> {
        (self.f)(key).map(|append| Box::new(append) as Box<dyn Append>)
    }
}
