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

//! Submission front-end and pump owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use texel_core::{EncodedImage, HandleAllocator, ImageCodec, Responder, WorkHandle};
use texel_lanes::DecodeRequest;
use texel_telemetry::MetricsRegistry;

use super::config::DecodeConfig;
use super::engine::PriorityQueueEngine;
use super::metrics::{record, DecodeMetrics};
use super::pool::WorkerPool;

/// Everything needed to build a queued decode request later, on the owner
/// thread.
struct DeferredCreationRecord {
    handle: WorkHandle,
    image: EncodedImage,
    priority: u32,
    target_detail: i32,
    needs_aux: bool,
    responder: Arc<dyn Responder>,
}

impl DeferredCreationRecord {
    fn into_request(self, codec: &Arc<dyn ImageCodec>) -> texel_core::Request {
        DecodeRequest::new(
            self.image,
            Arc::clone(codec),
            self.target_detail,
            self.needs_aux,
            Some(self.responder),
        )
        .into_request(self.handle, self.priority)
    }
}

/// State shared by the coordinator and every submitter clone.
struct Shared {
    handles: Arc<HandleAllocator>,
    codec: Arc<dyn ImageCodec>,
    pool: Option<Arc<WorkerPool>>,
    creation: Mutex<Vec<DeferredCreationRecord>>,
    shutting_down: AtomicBool,
    metrics: DecodeMetrics,
}

impl Shared {
    fn creation(&self) -> MutexGuard<'_, Vec<DeferredCreationRecord>> {
        self.creation.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Thread-safe submission front-end of a [`DecodeCoordinator`].
///
/// Cheap to clone; every clone feeds the same coordinator.
#[derive(Clone)]
pub struct DecodeSubmitter {
    shared: Arc<Shared>,
}

impl DecodeSubmitter {
    /// Submits an image for decoding and returns its handle.
    ///
    /// The handle is returned even when the submission is dropped (after
    /// shutdown, or when the pool refuses the hand-off); the responder is
    /// then never called. Otherwise it is called exactly once, on whichever
    /// thread finishes the decode.
    ///
    /// `target_detail` is a discard level (each level halves both
    /// dimensions); pass a negative value to decode at full size.
    pub fn submit_decode(
        &self,
        image: EncodedImage,
        priority: u32,
        target_detail: i32,
        needs_aux: bool,
        responder: Option<Arc<dyn Responder>>,
    ) -> WorkHandle {
        let shared = &*self.shared;
        let handle = shared.handles.generate();
        record(shared.metrics.submitted.increment());

        if shared.shutting_down.load(Ordering::SeqCst) {
            log::warn!(
                "Decode of '{}' submitted after shutdown, request {handle} dropped",
                image.name()
            );
            record(shared.metrics.rejected.increment());
            return handle;
        }

        let responder = shared.metrics.observe(responder);

        if let Some(slot) = shared.pool.as_deref().and_then(WorkerPool::try_reserve) {
            let request = DecodeRequest::new(
                image,
                Arc::clone(&shared.codec),
                target_detail,
                needs_aux,
                Some(responder),
            )
            .with_long_budget()
            .into_request(handle, priority);

            if slot.enqueue(request) {
                log::debug!("Decode request {handle} handed to a pool worker");
                record(shared.metrics.pooled.increment());
            } else {
                record(shared.metrics.rejected.increment());
            }
            return handle;
        }

        let mut creation = shared.creation();
        if shared.shutting_down.load(Ordering::SeqCst) {
            log::warn!(
                "Decode of '{}' submitted during shutdown, request {handle} dropped",
                image.name()
            );
            record(shared.metrics.rejected.increment());
            return handle;
        }
        creation.push(DeferredCreationRecord {
            handle,
            image,
            priority,
            target_detail,
            needs_aux,
            responder,
        });
        drop(creation);

        log::debug!("Decode request {handle} deferred to the shared queue");
        record(shared.metrics.buffered.increment());
        handle
    }

    /// Number of deferred creation records waiting for the next pump.
    pub fn buffered(&self) -> usize {
        self.shared.creation().len()
    }

    /// Returns `true` once the coordinator began shutting down.
    pub fn is_shutting_down(&self) -> bool {
        self.shared.shutting_down.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for DecodeSubmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeSubmitter")
            .field("buffered", &self.buffered())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// Owner of the shared decode queue.
///
/// Only the thread holding the coordinator pumps the queue; any thread can
/// submit through a [`DecodeSubmitter`].
pub struct DecodeCoordinator {
    submitter: DecodeSubmitter,
    engine: PriorityQueueEngine,
    finished: bool,
}

impl DecodeCoordinator {
    /// Creates a coordinator, spawning the worker pool the configuration asks
    /// for. Metrics are registered in `registry`.
    pub fn new(
        config: &DecodeConfig,
        codec: Arc<dyn ImageCodec>,
        registry: &MetricsRegistry,
    ) -> Self {
        let handles = Arc::new(HandleAllocator::new());
        let engine = PriorityQueueEngine::with_allocator(config.engine_config(), Arc::clone(&handles));

        let pool_size = config.pool_size.resolve();
        let pool = (pool_size > 0).then(|| Arc::new(WorkerPool::new(pool_size, config.long_slice())));
        log::info!("Decode coordinator created (pool size {pool_size})");

        let shared = Shared {
            handles,
            codec,
            pool,
            creation: Mutex::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            metrics: DecodeMetrics::register(registry),
        };

        Self {
            submitter: DecodeSubmitter {
                shared: Arc::new(shared),
            },
            engine,
            finished: false,
        }
    }

    /// A submission front-end that can be moved to other threads.
    pub fn submitter(&self) -> DecodeSubmitter {
        self.submitter.clone()
    }

    /// Same as [`DecodeSubmitter::submit_decode`].
    pub fn submit_decode(
        &self,
        image: EncodedImage,
        priority: u32,
        target_detail: i32,
        needs_aux: bool,
        responder: Option<Arc<dyn Responder>>,
    ) -> WorkHandle {
        self.submitter
            .submit_decode(image, priority, target_detail, needs_aux, responder)
    }

    /// Turns every deferred creation record into a queued request. Returns
    /// the number of requests admitted.
    pub fn drain_creation_buffer(&mut self) -> usize {
        let records = std::mem::take(&mut *self.submitter.shared.creation());
        if records.is_empty() {
            return 0;
        }

        let codec = &self.submitter.shared.codec;
        let mut admitted = 0;
        for deferred in records {
            let handle = deferred.handle;
            if self.engine.submit(deferred.into_request(codec)) {
                admitted += 1;
            } else {
                log::warn!("Deferred decode request {handle} dropped by the queue");
                record(self.submitter.shared.metrics.rejected.increment());
            }
        }
        log::trace!("Admitted {admitted} deferred decode requests");
        admitted
    }

    /// Admits deferred requests, then steps the queue for up to `budget`.
    /// Returns the number of requests still queued or buffered.
    pub fn pump(&mut self, budget: Duration) -> usize {
        let shared = Arc::clone(&self.submitter.shared);
        let pending = {
            let _timer = shared.metrics.time_pump();
            self.drain_creation_buffer();
            self.engine.pump(budget)
        };
        let pending = pending + self.submitter.buffered();
        shared.metrics.set_pending(pending);
        pending
    }

    /// Requests queued or buffered.
    pub fn pending(&self) -> usize {
        self.engine.pending() + self.submitter.buffered()
    }

    /// Number of deferred creation records waiting for the next pump.
    pub fn buffered(&self) -> usize {
        self.submitter.buffered()
    }

    /// The worker pool, if one was configured.
    pub fn pool(&self) -> Option<&WorkerPool> {
        self.submitter.shared.pool.as_deref()
    }

    /// The metrics this coordinator reports to.
    pub fn metrics(&self) -> &DecodeMetrics {
        &self.submitter.shared.metrics
    }

    /// Closes admission, discards deferred records that were never admitted,
    /// waits for pooled decodes and runs the queue to completion. Calling it
    /// again does nothing.
    pub fn shutdown(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;

        let shared = &self.submitter.shared;
        let discarded = {
            let mut creation = shared.creation();
            shared.shutting_down.store(true, Ordering::SeqCst);
            std::mem::take(&mut *creation)
        };
        if !discarded.is_empty() {
            log::info!(
                "Discarding {} decode requests that were never admitted",
                discarded.len()
            );
            record(shared.metrics.rejected.increment_by(discarded.len() as u64));
        }

        if let Some(pool) = &shared.pool {
            pool.shutdown();
        }

        self.engine.begin_shutdown();
        self.engine.run_to_completion();
        shared.metrics.set_pending(0);
        log::info!("Decode coordinator shut down");
    }
}

impl Drop for DecodeCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DecodeCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeCoordinator")
            .field("engine", &self.engine)
            .field("pool", &self.pool())
            .field("buffered", &self.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use texel_core::{ChannelDecoder, CodecError, ImageHeader, Raster};

    /// Decodes any input to a 2x2 RGBA raster in one call.
    struct TinyCodec;

    struct TinyDecoder;

    impl ImageCodec for TinyCodec {
        fn parse_header(&self, _image: &EncodedImage) -> Result<ImageHeader, CodecError> {
            Ok(ImageHeader {
                width: 2,
                height: 2,
                channels: 4,
            })
        }

        fn decoder(
            &self,
            _image: &EncodedImage,
            _target: &ImageHeader,
        ) -> Result<Box<dyn ChannelDecoder>, CodecError> {
            Ok(Box::new(TinyDecoder))
        }
    }

    impl ChannelDecoder for TinyDecoder {
        fn decode_channels(
            &mut self,
            raster: &mut Raster,
            _slice: Duration,
            _first_channel: u8,
            _channel_count: u8,
        ) -> Result<bool, CodecError> {
            raster.data_mut().fill(0xff);
            Ok(true)
        }
    }

    fn coordinator() -> DecodeCoordinator {
        let config = DecodeConfig {
            pool_size: crate::PoolSize::Fixed(0),
            ..DecodeConfig::default()
        };
        DecodeCoordinator::new(&config, Arc::new(TinyCodec), &MetricsRegistry::new())
    }

    fn counting(calls: &Arc<AtomicUsize>) -> Option<Arc<dyn Responder>> {
        let calls = Arc::clone(calls);
        Some(Arc::new(move |ok: bool, _p: Option<Raster>, _a: Option<Raster>| {
            assert!(ok);
            calls.fetch_add(1, Ordering::SeqCst);
        }))
    }

    #[test]
    fn test_submissions_are_buffered_until_pumped() {
        let mut coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        let image = EncodedImage::new("tiny", vec![0u8; 4]);

        let first = coordinator.submit_decode(image.clone(), 1, -1, false, counting(&calls));
        let second = coordinator.submit_decode(image, 1, -1, false, counting(&calls));
        assert_ne!(first, second);
        assert_eq!(coordinator.buffered(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        assert_eq!(coordinator.pump(Duration::from_secs(1)), 0);
        assert_eq!(coordinator.buffered(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(coordinator.metrics().completed.get().unwrap(), 2);
    }

    #[test]
    fn test_shutdown_discards_unadmitted_records() {
        let mut coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        coordinator.submit_decode(EncodedImage::new("tiny", vec![1u8]), 0, -1, false, counting(&calls));

        coordinator.shutdown();
        coordinator.shutdown();

        assert_eq!(coordinator.buffered(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(coordinator.metrics().rejected.get().unwrap(), 1);
        assert!(coordinator.submitter().is_shutting_down());
    }

    #[test]
    fn test_drain_drops_records_the_queue_refuses() {
        let mut coordinator = coordinator();
        let calls = Arc::new(AtomicUsize::new(0));
        coordinator.submit_decode(EncodedImage::new("tiny", vec![2u8]), 0, -1, false, counting(&calls));
        coordinator.engine.begin_shutdown();

        assert_eq!(coordinator.drain_creation_buffer(), 0);
        assert_eq!(coordinator.buffered(), 0);
        assert!(coordinator.engine.is_empty());
        assert_eq!(coordinator.metrics().rejected.get().unwrap(), 1);

        coordinator.shutdown();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
