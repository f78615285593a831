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

//! Completion sinks for decode requests.

use crate::image::Raster;

/// Caller-supplied completion sink.
///
/// Invoked exactly once per admitted request, on the thread that ran the
/// request to its end (the pump owner or a pool worker), never on the
/// submitting thread. Implementations must not block.
pub trait Responder: Send + Sync {
    /// Delivers the outcome and whatever rasters were produced.
    fn completed(&self, success: bool, primary: Option<Raster>, aux: Option<Raster>);
}

impl<F> Responder for F
where
    F: Fn(bool, Option<Raster>, Option<Raster>) + Send + Sync,
{
    fn completed(&self, success: bool, primary: Option<Raster>, aux: Option<Raster>) {
        self(success, primary, aux)
    }
}
