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

//! Decode service: the coordinator pumped either inline or on an owner thread.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{RecvTimeoutError, Sender};
use texel_core::{EncodedImage, ImageCodec, Responder, WorkHandle};
use texel_telemetry::MetricsRegistry;

use super::config::{ConfigError, DecodeConfig};
use super::coordinator::{DecodeCoordinator, DecodeSubmitter};

/// Errors raised while starting a [`DecodeService`].
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// The configuration did not validate.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The owner thread could not be spawned.
    #[error("failed to spawn the decode owner thread: {0}")]
    Spawn(#[from] std::io::Error),
}

enum Mode {
    Inline(DecodeCoordinator),
    Threaded(OwnerThread),
    Stopped,
}

struct OwnerThread {
    running: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    wake: Sender<()>,
    handle: thread::JoinHandle<()>,
}

/// The decode scheduler as seen by the host application.
pub struct DecodeService {
    submitter: DecodeSubmitter,
    mode: Mode,
    budget: Duration,
}

impl DecodeService {
    /// Validates `config` and starts the service. With `config.threaded` the
    /// queue is pumped on a dedicated owner thread.
    pub fn new(
        config: DecodeConfig,
        codec: Arc<dyn ImageCodec>,
        registry: &MetricsRegistry,
    ) -> Result<Self, ServiceError> {
        config.validate()?;
        let coordinator = DecodeCoordinator::new(&config, codec, registry);
        let submitter = coordinator.submitter();
        let budget = config.pump_budget();

        let mode = if config.threaded {
            Mode::Threaded(OwnerThread::spawn(coordinator, budget, config.idle_wait())?)
        } else {
            Mode::Inline(coordinator)
        };

        Ok(Self {
            submitter,
            mode,
            budget,
        })
    }

    /// Returns `true` if the queue is pumped on an owner thread.
    pub fn is_threaded(&self) -> bool {
        matches!(self.mode, Mode::Threaded(_))
    }

    /// Submits an image; see [`DecodeSubmitter::submit_decode`].
    pub fn submit_decode(
        &self,
        image: EncodedImage,
        priority: u32,
        target_detail: i32,
        needs_aux: bool,
        responder: Option<Arc<dyn Responder>>,
    ) -> WorkHandle {
        let handle = self
            .submitter
            .submit_decode(image, priority, target_detail, needs_aux, responder);
        if let Mode::Threaded(owner) = &self.mode {
            owner.wake();
        }
        handle
    }

    /// A submission front-end that can be moved to other threads.
    pub fn submitter(&self) -> DecodeSubmitter {
        self.submitter.clone()
    }

    /// Steps the queue for up to `budget` and returns the pending count.
    ///
    /// In threaded mode this only wakes the owner thread and returns the
    /// count it last published.
    pub fn pump(&mut self, budget: Duration) -> usize {
        match &mut self.mode {
            Mode::Inline(coordinator) => coordinator.pump(budget),
            Mode::Threaded(owner) => {
                owner.wake();
                owner.pending.load(Ordering::SeqCst)
            }
            Mode::Stopped => 0,
        }
    }

    /// [`pump`](Self::pump) with the configured budget.
    pub fn pump_default(&mut self) -> usize {
        self.pump(self.budget)
    }

    /// Stops the service: admission closes, never-admitted submissions are
    /// discarded and admitted ones run to completion. Calling it again does
    /// nothing.
    pub fn shutdown(&mut self) {
        match std::mem::replace(&mut self.mode, Mode::Stopped) {
            Mode::Inline(mut coordinator) => coordinator.shutdown(),
            Mode::Threaded(owner) => owner.stop(),
            Mode::Stopped => {}
        }
    }
}

impl Drop for DecodeService {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for DecodeService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mode = match self.mode {
            Mode::Inline(_) => "inline",
            Mode::Threaded(_) => "threaded",
            Mode::Stopped => "stopped",
        };
        f.debug_struct("DecodeService")
            .field("mode", &mode)
            .field("budget", &self.budget)
            .finish()
    }
}

impl OwnerThread {
    fn spawn(
        mut coordinator: DecodeCoordinator,
        budget: Duration,
        idle_wait: Duration,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let pending = Arc::new(AtomicUsize::new(0));
        let (wake, wake_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_running = Arc::clone(&running);
        let thread_pending = Arc::clone(&pending);
        let handle = thread::Builder::new()
            .name("texel-decode-owner".to_owned())
            .spawn(move || {
                log::info!("Decode owner thread started");

                while thread_running.load(Ordering::SeqCst) {
                    let left = coordinator.pump(budget);
                    thread_pending.store(left, Ordering::SeqCst);

                    if left == 0 {
                        match wake_rx.recv_timeout(idle_wait) {
                            Ok(()) | Err(RecvTimeoutError::Timeout) => {}
                            Err(RecvTimeoutError::Disconnected) => break,
                        }
                    }
                }

                coordinator.shutdown();
                thread_pending.store(0, Ordering::SeqCst);
                log::info!("Decode owner thread stopped");
            })?;

        Ok(Self {
            running,
            pending,
            wake,
            handle,
        })
    }

    fn wake(&self) {
        // A full channel already carries a pending wake-up.
        let _ = self.wake.try_send(());
    }

    fn stop(self) {
        self.running.store(false, Ordering::SeqCst);
        self.wake();
        if self.handle.join().is_err() {
            log::error!("Decode owner thread panicked");
        }
    }
}
