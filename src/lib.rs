// Copyright 2026 The sluse Authors
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

#![deny(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unused_imports
)]
// Disallow warnings in examples.
#![doc(test(attr(deny(warnings))))]

//! sluse is a prefork HTTP/1.1 static file server: a master process forks a
//! fixed fleet of workers sharing one listening socket, each worker hands
//! accepted connections to a fixed thread pool through a bounded
//! semaphore-ring queue, and overload is answered with `503` instead of
//! unbounded queueing. Observability endpoints (`/health`, `/metrics`,
//! `/stats`) bypass the queue so they stay responsive under load.

pub mod cache;
pub mod config;
pub mod handler;
pub mod listener;
pub mod master;
pub mod mime;
pub mod queue;
pub mod sem;
pub mod signals;
pub mod stats;
pub mod worker;
