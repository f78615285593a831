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

//! # Texel Lanes
//!
//! Hot-path decode work. A lane here is the code that actually burns CPU
//! inside a time slice: the resumable decode request and the codec adapters it
//! drives. Scheduling decisions live one layer up, in `texel-agents`.

#![warn(missing_docs)]

pub mod decode_lane;

pub use decode_lane::{DecodeRequest, DecodeStage, ImageCrateCodec, AUX_CHANNEL};
