// Copyright 2025 eraflo
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

//! Acts as the **[A]gent** for image decoding.
//!
//! Submissions enter through a [`DecodeSubmitter`]. When a pool worker is idle
//! the request is built on the spot and handed to it; otherwise a deferred
//! creation record is buffered and turned into a queued request the next time
//! the owner thread pumps the [`DecodeCoordinator`].
//!
//! [`DecodeService`] wraps the coordinator and either pumps it on the
//! caller's thread or on a dedicated owner thread.

mod config;
mod coordinator;
mod engine;
mod metrics;
mod pool;
mod service;

pub use config::{ConfigError, DecodeConfig, PoolSize};
pub use coordinator::{DecodeCoordinator, DecodeSubmitter};
pub use engine::{EngineConfig, PriorityQueueEngine};
pub use metrics::DecodeMetrics;
pub use pool::{PoolSlot, WorkerPool};
pub use service::{DecodeService, ServiceError};
