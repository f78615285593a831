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

//! Fixed-size pool of dedicated decode workers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use texel_core::{Request, RequestFlags};

/// A pool of named worker threads, each running one request at a time with
/// the long slice.
///
/// Capacity is tracked by an idle counter. A submitter first claims an idle
/// worker with [`try_reserve`](Self::try_reserve) and then hands the request
/// over through the returned [`PoolSlot`], so two submitters can never both
/// count on the same worker.
pub struct WorkerPool {
    sender: Mutex<Option<Sender<Request>>>,
    idle: Arc<AtomicUsize>,
    size: usize,
    shutting_down: AtomicBool,
    workers: Mutex<Vec<thread::JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawns `size` workers. A size of zero creates an empty pool that never
    /// accepts work.
    pub fn new(size: usize, long_slice: Duration) -> Self {
        let (tx, rx) = crossbeam_channel::unbounded::<Request>();
        let idle = Arc::new(AtomicUsize::new(0));
        let mut workers = Vec::with_capacity(size);

        for worker_id in 1..=size {
            let rx = rx.clone();
            let idle_counter = Arc::clone(&idle);
            let spawned = thread::Builder::new()
                .name(format!("texel-decode-{worker_id}"))
                .spawn(move || worker_loop(worker_id, rx, idle_counter, long_slice));

            match spawned {
                Ok(handle) => {
                    idle.fetch_add(1, Ordering::SeqCst);
                    workers.push(handle);
                }
                Err(e) => log::error!("Failed to spawn decode worker {worker_id}: {e}"),
            }
        }

        let size = workers.len();
        if size > 0 {
            log::info!("Decode worker pool started with {size} threads");
        }

        Self {
            sender: Mutex::new(Some(tx)),
            idle,
            size,
            shutting_down: AtomicBool::new(false),
            workers: Mutex::new(workers),
        }
    }

    /// Number of worker threads.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Number of workers not currently running (or claimed for) a request.
    pub fn idle(&self) -> usize {
        self.idle.load(Ordering::SeqCst)
    }

    /// Returns `true` once [`shutdown`](Self::shutdown) was called.
    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    /// Claims an idle worker, if any.
    pub fn try_reserve(&self) -> Option<PoolSlot<'_>> {
        if self.is_shutting_down() {
            return None;
        }
        self.idle
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |idle| idle.checked_sub(1))
            .ok()
            .map(|_| PoolSlot {
                pool: self,
                used: false,
            })
    }

    /// Reserves a worker and hands `request` to it. Returns `false` if no
    /// worker can take it; the request is then dropped unfinished.
    pub fn enqueue(&self, request: Request) -> bool {
        match self.try_reserve() {
            Some(slot) => slot.enqueue(request),
            None => {
                log::debug!("No idle decode worker for request {}", request.handle());
                false
            }
        }
    }

    /// Stops accepting work, lets already handed-over requests finish and
    /// joins every worker. Calling it again does nothing.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        // Closing the channel ends each worker's receive loop once drained.
        self.sender.lock().unwrap_or_else(|p| p.into_inner()).take();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(|p| p.into_inner()));
        for handle in workers {
            if handle.join().is_err() {
                log::error!("A decode worker panicked");
            }
        }
        if self.size > 0 {
            log::info!("Decode worker pool stopped");
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size)
            .field("idle", &self.idle())
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

/// A claimed idle worker. Dropping an unused slot releases the claim.
pub struct PoolSlot<'a> {
    pool: &'a WorkerPool,
    used: bool,
}

impl PoolSlot<'_> {
    /// Hands `request` to the claimed worker. Returns `false` if the pool was
    /// shut down in the meantime; the request is then dropped unfinished.
    pub fn enqueue(mut self, request: Request) -> bool {
        let sender = self.pool.sender.lock().unwrap_or_else(|p| p.into_inner());
        let Some(tx) = sender.as_ref() else {
            log::warn!(
                "Decode pool is shutting down, dropping request {}",
                request.handle()
            );
            return false;
        };
        match tx.send(request) {
            Ok(()) => {
                self.used = true;
                true
            }
            Err(e) => {
                log::warn!("Decode pool rejected request {}", e.into_inner().handle());
                false
            }
        }
    }
}

impl Drop for PoolSlot<'_> {
    fn drop(&mut self) {
        if !self.used {
            self.pool.idle.fetch_add(1, Ordering::SeqCst);
        }
    }
}

fn worker_loop(worker_id: usize, rx: Receiver<Request>, idle: Arc<AtomicUsize>, slice: Duration) {
    log::debug!("Decode worker {worker_id} started");

    while let Ok(mut request) = rx.recv() {
        log::trace!("Decode worker {worker_id} picked up request {}", request.handle());
        let completed = if request.flags().contains(RequestFlags::AUTO_COMPLETE) {
            request.run(slice)
        } else {
            while !request.run(slice) {}
            true
        };
        request.finish(completed);
        idle.fetch_add(1, Ordering::SeqCst);
    }

    log::debug!("Decode worker {worker_id} stopped");
}
