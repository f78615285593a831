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

//! The codec contract consumed by decode requests.
//!
//! The scheduler never interprets pixel formats. It parses a header, allocates
//! a raster of the declared size and then asks a [`ChannelDecoder`] to fill it
//! one time slice at a time.

use crate::image::{EncodedImage, ImageHeader, Raster};
use std::time::Duration;

/// Errors reported by codec implementations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The header could not be parsed.
    #[error("invalid image header: {0}")]
    InvalidHeader(String),
    /// The pixel stream is corrupt or truncated.
    #[error("corrupt image data: {0}")]
    Corrupt(String),
    /// The requested channel range does not exist in the source.
    #[error("channels {first}..{end} out of range for a {available}-channel image")]
    ChannelOutOfRange {
        /// First requested channel.
        first: u8,
        /// One past the last requested channel.
        end: u16,
        /// Channels present in the source.
        available: u8,
    },
    /// The destination raster does not match the decode target.
    #[error("raster is {actual:?}, expected {expected:?}")]
    RasterMismatch {
        /// Expected (width, height, channels).
        expected: (u32, u32, u8),
        /// Actual (width, height, channels).
        actual: (u32, u32, u8),
    },
}

/// A format-specific image codec.
pub trait ImageCodec: Send + Sync {
    /// Parses the header of `image`.
    fn parse_header(&self, image: &EncodedImage) -> Result<ImageHeader, CodecError>;

    /// Starts a resumable decode of `image` producing rasters of `target`
    /// dimensions (which may be reduced from the header by a discard level).
    fn decoder(
        &self,
        image: &EncodedImage,
        target: &ImageHeader,
    ) -> Result<Box<dyn ChannelDecoder>, CodecError>;
}

/// Resumable decode state for one image.
pub trait ChannelDecoder: Send {
    /// Decodes `channel_count` channels starting at `first_channel` into
    /// `raster` for at most roughly `slice`.
    ///
    /// Returns `Ok(true)` once the raster is complete. Implementations make at
    /// least one unit of progress per call, even with a zero slice, and may
    /// erase the raster when they hit an error.
    fn decode_channels(
        &mut self,
        raster: &mut Raster,
        slice: Duration,
        first_channel: u8,
        channel_count: u8,
    ) -> Result<bool, CodecError>;
}
