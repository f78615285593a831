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

//! Encoded sources and decoded rasters.

use std::fmt;
use std::sync::Arc;

/// A compressed image already resident in memory.
///
/// Cloning is cheap: the bytes are shared, so a submission can hand the same
/// source to the creation buffer, the queue and a pool worker without copying.
#[derive(Clone)]
pub struct EncodedImage {
    name: Arc<str>,
    bytes: Arc<[u8]>,
}

impl EncodedImage {
    /// Wraps encoded bytes under a name used in log lines.
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            name: Arc::from(name.into()),
            bytes: Arc::from(bytes.into()),
        }
    }

    /// Name used in log lines.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The encoded bytes.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Shared handle on the encoded bytes.
    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }
}

impl fmt::Debug for EncodedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedImage")
            .field("name", &self.name)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Dimensions declared by an encoded image header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageHeader {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Number of 8-bit channels per pixel.
    pub channels: u8,
}

impl ImageHeader {
    /// Returns `true` if any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0 || self.channels == 0
    }

    /// Applies a discard level: every level halves both dimensions, never
    /// going below one pixel.
    pub fn with_discard(self, level: u32) -> Self {
        let shift = level.min(31);
        Self {
            width: (self.width >> shift).max(1),
            height: (self.height >> shift).max(1),
            channels: self.channels,
        }
    }
}

/// A decoded, tightly packed 8-bit raster.
#[derive(Clone, PartialEq, Eq)]
pub struct Raster {
    width: u32,
    height: u32,
    channels: u8,
    data: Vec<u8>,
}

impl Raster {
    /// Allocates a zeroed raster, or `None` when the size overflows or the
    /// allocator cannot satisfy the request.
    pub fn try_allocate(width: u32, height: u32, channels: u8) -> Option<Self> {
        let len = (width as usize)
            .checked_mul(height as usize)?
            .checked_mul(channels as usize)?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).ok()?;
        data.resize(len, 0);
        Some(Self {
            width,
            height,
            channels,
            data,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Channels per pixel.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Bytes per row.
    pub fn row_stride(&self) -> usize {
        self.width as usize * self.channels as usize
    }

    /// Returns `true` if the raster holds no pixel data, either because it is
    /// zero-sized or because a decoder erased it.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Raw pixel bytes.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable raw pixel bytes.
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Drops the pixel data. Decoders call this when they fail midway.
    pub fn erase(&mut self) {
        self.data = Vec::new();
    }

    /// Consumes the raster, returning its pixel bytes.
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

impl fmt::Debug for Raster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Raster({}x{}x{}, {} bytes)",
            self.width,
            self.height,
            self.channels,
            self.data.len()
        )
    }
}
