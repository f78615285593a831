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

//! # Texel Agents
//!
//! Tactical layer of the decode scheduler. Agents decide *where* and *when* a
//! decode runs (the shared priority queue or a dedicated pool worker) while
//! the lanes in `texel-lanes` do the actual decoding.

#![warn(missing_docs)]

pub mod decode_agent;

pub use decode_agent::{
    ConfigError, DecodeConfig, DecodeCoordinator, DecodeMetrics, DecodeService, DecodeSubmitter,
    EngineConfig, PoolSize, PoolSlot, PriorityQueueEngine, ServiceError, WorkerPool,
};
