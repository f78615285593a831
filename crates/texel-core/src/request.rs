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

//! # Requests
//!
//! A [`Request`] is the unit of schedulable work. It pairs scheduling metadata
//! (handle, priority, flags) with a boxed [`Work`] implementation that knows how
//! to advance itself within a time slice and how to report its outcome.
//!
//! Ownership is strictly single: a request lives either in the shared queue or
//! on one pool worker, never both. [`Request::finish`] takes `self` by value, so
//! the completion path can run at most once and the request is dropped right
//! after it.

use crate::handle::WorkHandle;
use std::fmt;
use std::time::Duration;

/// Scheduling flags attached to a [`Request`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RequestFlags {
    bits: u8,
}

impl RequestFlags {
    /// No flags.
    pub const NONE: Self = Self { bits: 0 };
    /// Treat any return from `run` as terminal instead of re-queueing.
    pub const AUTO_COMPLETE: Self = Self { bits: 1 << 0 };
    /// Run with the extended time slice (pooled, out-of-band execution).
    pub const LONG_BUDGET: Self = Self { bits: 1 << 1 };

    /// Returns the raw bits.
    pub const fn bits(&self) -> u8 {
        self.bits
    }

    /// Combines two sets of flags.
    pub const fn union(self, other: Self) -> Self {
        Self {
            bits: self.bits | other.bits,
        }
    }

    /// Returns `true` if every flag in `other` is set.
    pub const fn contains(&self, other: Self) -> bool {
        (self.bits & other.bits) == other.bits
    }

    /// Returns `true` if no flag is set.
    pub const fn is_empty(&self) -> bool {
        self.bits == 0
    }
}

impl std::ops::BitOr for RequestFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        self.union(rhs)
    }
}

impl std::ops::BitOrAssign for RequestFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = self.union(rhs);
    }
}

/// Where a request is in its lifecycle.
///
/// There is no "finished" variant: finishing consumes the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Built but never run.
    Created,
    /// Run at least once and not yet finished.
    Running,
}

/// The behaviour behind a [`Request`].
pub trait Work: Send {
    /// Advances the work for at most roughly `slice` of wall-clock time.
    ///
    /// Returns `true` once the work reached a terminal state, successful or
    /// not. Must return once the slice is spent, even if incomplete.
    fn run(&mut self, slice: Duration) -> bool;

    /// Reports the outcome. `completed` is `false` when the scheduler gave up
    /// on the work before `run` signalled done.
    fn finish(self: Box<Self>, completed: bool);
}

/// A unit of schedulable work.
pub struct Request {
    handle: WorkHandle,
    priority: u32,
    flags: RequestFlags,
    status: RequestStatus,
    work: Box<dyn Work>,
}

impl Request {
    /// Wraps `work` with its scheduling metadata.
    pub fn new(
        handle: WorkHandle,
        priority: u32,
        flags: RequestFlags,
        work: impl Work + 'static,
    ) -> Self {
        Self {
            handle,
            priority,
            flags,
            status: RequestStatus::Created,
            work: Box::new(work),
        }
    }

    /// The handle returned to the submitter.
    pub fn handle(&self) -> WorkHandle {
        self.handle
    }

    /// Ordering key, higher runs first.
    pub fn priority(&self) -> u32 {
        self.priority
    }

    /// Scheduling flags.
    pub fn flags(&self) -> RequestFlags {
        self.flags
    }

    /// Current lifecycle state.
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    /// Runs one time slice of the underlying work.
    pub fn run(&mut self, slice: Duration) -> bool {
        self.status = RequestStatus::Running;
        self.work.run(slice)
    }

    /// Finishes the request, consuming it.
    pub fn finish(self, completed: bool) {
        log::trace!("Request {} finished (completed={completed})", self.handle);
        self.work.finish(completed);
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("handle", &self.handle)
            .field("priority", &self.priority)
            .field("flags", &self.flags)
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::HandleAllocator;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Countdown {
        steps: u32,
        finished: Arc<AtomicUsize>,
    }

    impl Work for Countdown {
        fn run(&mut self, _slice: Duration) -> bool {
            self.steps = self.steps.saturating_sub(1);
            self.steps == 0
        }

        fn finish(self: Box<Self>, _completed: bool) {
            self.finished.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_flags_combine() {
        let flags = RequestFlags::AUTO_COMPLETE | RequestFlags::LONG_BUDGET;
        assert!(flags.contains(RequestFlags::AUTO_COMPLETE));
        assert!(flags.contains(RequestFlags::LONG_BUDGET));
        assert!(!RequestFlags::NONE.contains(RequestFlags::LONG_BUDGET));
        assert!(RequestFlags::default().is_empty());
    }

    #[test]
    fn test_request_lifecycle() {
        let finished = Arc::new(AtomicUsize::new(0));
        let handles = HandleAllocator::new();
        let mut request = Request::new(
            handles.generate(),
            7,
            RequestFlags::NONE,
            Countdown {
                steps: 2,
                finished: finished.clone(),
            },
        );

        assert_eq!(request.status(), RequestStatus::Created);
        assert!(!request.run(Duration::from_millis(1)));
        assert_eq!(request.status(), RequestStatus::Running);
        assert!(request.run(Duration::from_millis(1)));

        request.finish(true);
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }
}
