// Copyright 2026 gpucache Project Authors
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

//! A budgeted, dual-keyed GPU resource cache.
//!
//! [`ResourceCache`] owns every cached GPU object, indexes it by scratch and unique keys, keeps idle objects in a
//! least-recently-used queue and evicts them while the budget is exceeded. Objects dropped on other threads come back
//! through the cache's [`Mailbox`].

mod budget;
mod builder;
mod cache;
mod config;
mod context;
mod eviction;
mod frame;
mod indexer;
mod key;
mod listener;
mod mailbox;
mod record;
mod resource;
mod stats;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

mod prelude;
pub use prelude::*;
