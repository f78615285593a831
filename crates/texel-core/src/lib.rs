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

//! # Texel Core
//!
//! Foundational crate containing the contracts shared by every layer of the
//! decode scheduler: work handles, schedulable requests, completion responders
//! and the codec interface the scheduler drives without knowing any pixel
//! format.

#![warn(missing_docs)]

pub mod codec;
pub mod handle;
pub mod image;
pub mod request;
pub mod responder;

pub use codec::{ChannelDecoder, CodecError, ImageCodec};
pub use handle::{HandleAllocator, WorkHandle};
pub use image::{EncodedImage, ImageHeader, Raster};
pub use request::{Request, RequestFlags, RequestStatus, Work};
pub use responder::Responder;
