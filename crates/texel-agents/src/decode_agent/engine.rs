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

//! Cooperative, time-sliced priority queue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use texel_core::{HandleAllocator, Request, RequestFlags, WorkHandle};

/// Slices handed to requests stepped by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Slice for ordinary queued requests.
    pub short_slice: Duration,
    /// Slice for requests flagged `LONG_BUDGET`.
    pub long_slice: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            short_slice: Duration::from_millis(100),
            long_slice: Duration::from_secs(10),
        }
    }
}

/// A queued request with its FIFO sequence number.
struct QueuedRequest {
    seq: u64,
    request: Request,
}

impl PartialEq for QueuedRequest {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl Eq for QueuedRequest {}

impl PartialOrd for QueuedRequest {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedRequest {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max heap: higher priority first, then lower sequence.
        self.request
            .priority()
            .cmp(&other.request.priority())
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Single-owner priority queue of [`Request`]s.
///
/// Requests are stepped one slice at a time in priority order. A request
/// that is not done goes back to the end of its priority tier, unless it is
/// flagged `AUTO_COMPLETE`, in which case it is finished as abandoned.
pub struct PriorityQueueEngine {
    queue: BinaryHeap<QueuedRequest>,
    next_seq: u64,
    handles: Arc<HandleAllocator>,
    config: EngineConfig,
    shutting_down: bool,
}

impl PriorityQueueEngine {
    /// Creates an engine with its own handle allocator.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_allocator(config, Arc::new(HandleAllocator::new()))
    }

    /// Creates an engine drawing handles from a shared allocator.
    pub fn with_allocator(config: EngineConfig, handles: Arc<HandleAllocator>) -> Self {
        Self {
            queue: BinaryHeap::new(),
            next_seq: 0,
            handles,
            config,
            shutting_down: false,
        }
    }

    /// Issues a fresh handle. Safe to call from any thread through the shared
    /// allocator.
    pub fn generate_handle(&self) -> WorkHandle {
        self.handles.generate()
    }

    /// The allocator handles are drawn from.
    pub fn allocator(&self) -> &Arc<HandleAllocator> {
        &self.handles
    }

    /// The slice configuration.
    pub fn config(&self) -> EngineConfig {
        self.config
    }

    /// Queues `request`. Returns `false` once shutdown has begun, in which
    /// case the request is dropped without being finished.
    pub fn submit(&mut self, request: Request) -> bool {
        if self.shutting_down {
            log::warn!(
                "Rejected request {}: engine is shutting down",
                request.handle()
            );
            return false;
        }
        self.push(request);
        true
    }

    /// Steps queued requests until `budget` is spent or the queue is empty,
    /// and returns the number of requests still queued.
    ///
    /// At least one request is stepped per call, even with a zero budget.
    pub fn pump(&mut self, budget: Duration) -> usize {
        let started = Instant::now();

        while let Some(QueuedRequest { mut request, .. }) = self.queue.pop() {
            let remaining = budget.saturating_sub(started.elapsed());
            let slice = self.slice_for(&request).min(remaining);

            if request.run(slice) {
                request.finish(true);
            } else if request.flags().contains(RequestFlags::AUTO_COMPLETE) {
                log::trace!(
                    "Request {} did not complete in its slice, abandoning",
                    request.handle()
                );
                request.finish(false);
            } else {
                self.push(request);
            }

            if started.elapsed() >= budget {
                break;
            }
        }

        self.queue.len()
    }

    /// Refuses further submissions. Already queued requests are kept.
    pub fn begin_shutdown(&mut self) {
        self.shutting_down = true;
    }

    /// Returns `true` once [`begin_shutdown`](Self::begin_shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down
    }

    /// Number of queued requests.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Returns `true` if nothing is queued.
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Pumps until every queued request has been finished.
    pub fn run_to_completion(&mut self) {
        while !self.queue.is_empty() {
            self.pump(self.config.long_slice);
        }
    }

    fn slice_for(&self, request: &Request) -> Duration {
        if request.flags().contains(RequestFlags::LONG_BUDGET) {
            self.config.long_slice
        } else {
            self.config.short_slice
        }
    }

    fn push(&mut self, request: Request) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(QueuedRequest { seq, request });
    }
}

impl std::fmt::Debug for PriorityQueueEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriorityQueueEngine")
            .field("pending", &self.queue.len())
            .field("config", &self.config)
            .field("shutting_down", &self.shutting_down)
            .finish()
    }
}
