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

//! Opaque identifiers for submitted units of work.

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque token identifying one submitted unit of work.
///
/// A handle is handed back to the caller at submission time and stays valid as
/// a correlation token even while the request behind it has not been built
/// yet (construction may be deferred to the scheduler's owning thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkHandle(NonZeroU64);

impl WorkHandle {
    /// Returns the raw numeric value of the handle. Never zero.
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for WorkHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread-safe generator of never-reused [`WorkHandle`]s.
///
/// Allocation is a single atomic increment, so it is safe to call from any
/// thread and never contends with queue mutation.
#[derive(Debug)]
pub struct HandleAllocator {
    next: AtomicU64,
}

impl HandleAllocator {
    /// Creates an allocator whose first handle is `#1`.
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh handle.
    pub fn generate(&self) -> WorkHandle {
        let raw = self.next.fetch_add(1, Ordering::Relaxed);
        // The counter starts at 1 and a u64 cannot realistically wrap.
        WorkHandle(NonZeroU64::new(raw).unwrap_or(NonZeroU64::MIN))
    }

    /// Number of handles issued so far.
    pub fn issued(&self) -> u64 {
        self.next.load(Ordering::Relaxed) - 1
    }
}

impl Default for HandleAllocator {
    fn default() -> Self {
        Self::new()
    }
}
