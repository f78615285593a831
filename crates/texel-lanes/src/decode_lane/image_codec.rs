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

//! Codec adapter over the `image` crate.
//!
//! The `image` crate decodes a whole picture in one call, so the first slice
//! pays for decompression (and the discard-level resize). Later slices copy
//! rows of the requested channels into the destination raster until their
//! deadline passes.

use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{imageops::FilterType, ImageDecoder, ImageReader};
use texel_core::{ChannelDecoder, CodecError, EncodedImage, ImageCodec, ImageHeader, Raster};

/// Decodes PNG, JPEG, BMP, TGA and every other format the `image` crate was
/// built with.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateCodec;

impl ImageCodec for ImageCrateCodec {
    fn parse_header(&self, image: &EncodedImage) -> Result<ImageHeader, CodecError> {
        let decoder = ImageReader::new(Cursor::new(image.bytes()))
            .with_guessed_format()
            .map_err(|e| CodecError::InvalidHeader(e.to_string()))?
            .into_decoder()
            .map_err(|e| CodecError::InvalidHeader(e.to_string()))?;

        let (width, height) = decoder.dimensions();
        Ok(ImageHeader {
            width,
            height,
            channels: decoder.color_type().channel_count(),
        })
    }

    fn decoder(
        &self,
        image: &EncodedImage,
        target: &ImageHeader,
    ) -> Result<Box<dyn ChannelDecoder>, CodecError> {
        Ok(Box::new(ImageCrateDecoder {
            bytes: image.shared_bytes(),
            target: *target,
            pixels: None,
            next_row: 0,
            cursor: (0, 0),
        }))
    }
}

struct ImageCrateDecoder {
    bytes: Arc<[u8]>,
    target: ImageHeader,
    /// Tightly packed 8-bit pixels at the target size, once decompressed.
    pixels: Option<Vec<u8>>,
    next_row: u32,
    /// Channel range the current row cursor belongs to.
    cursor: (u8, u8),
}

impl ImageCrateDecoder {
    fn decompress(&self) -> Result<Vec<u8>, CodecError> {
        let mut img = image::load_from_memory(&self.bytes)
            .map_err(|e| CodecError::Corrupt(format!("Failed to decode image from memory: {e}")))?;

        if img.width() != self.target.width || img.height() != self.target.height {
            img = img.resize_exact(self.target.width, self.target.height, FilterType::Triangle);
        }

        Ok(match self.target.channels {
            1 => img.to_luma8().into_raw(),
            2 => img.to_luma_alpha8().into_raw(),
            3 => img.to_rgb8().into_raw(),
            _ => img.to_rgba8().into_raw(),
        })
    }
}

impl ChannelDecoder for ImageCrateDecoder {
    fn decode_channels(
        &mut self,
        raster: &mut Raster,
        slice: Duration,
        first_channel: u8,
        channel_count: u8,
    ) -> Result<bool, CodecError> {
        let deadline = Instant::now() + slice;
        let available = self.target.channels.min(4);
        let end = u16::from(first_channel) + u16::from(channel_count);
        if channel_count == 0 || end > u16::from(available) {
            return Err(CodecError::ChannelOutOfRange {
                first: first_channel,
                end,
                available,
            });
        }

        let expected = (self.target.width, self.target.height, channel_count);
        let actual = (raster.width(), raster.height(), raster.channels());
        if expected != actual {
            return Err(CodecError::RasterMismatch { expected, actual });
        }

        if self.cursor != (first_channel, channel_count) {
            self.cursor = (first_channel, channel_count);
            self.next_row = 0;
        }

        if self.pixels.is_none() {
            match self.decompress() {
                Ok(pixels) => self.pixels = Some(pixels),
                Err(e) => {
                    raster.erase();
                    return Err(e);
                }
            }
        }
        let Some(pixels) = self.pixels.as_deref() else {
            return Ok(false);
        };

        let source_channels = usize::from(available);
        let first = usize::from(first_channel);
        let count = usize::from(channel_count);
        let width = self.target.width as usize;
        let src_stride = width * source_channels;
        let dst_stride = raster.row_stride();

        while self.next_row < self.target.height {
            let row = self.next_row as usize;
            let src = &pixels[row * src_stride..(row + 1) * src_stride];
            let dst = &mut raster.data_mut()[row * dst_stride..(row + 1) * dst_stride];
            for (src_px, dst_px) in src
                .chunks_exact(source_channels)
                .zip(dst.chunks_exact_mut(count))
            {
                dst_px.copy_from_slice(&src_px[first..first + count]);
            }
            self.next_row += 1;

            if Instant::now() >= deadline {
                break;
            }
        }

        Ok(self.next_row >= self.target.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};

    fn encoded_png(width: u32, height: u32) -> EncodedImage {
        let img = RgbaImage::from_fn(width, height, |x, y| {
            Rgba([x as u8, y as u8, 0x80, 0xff])
        });
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        EncodedImage::new("gradient.png", bytes)
    }

    fn decode_all(decoder: &mut dyn ChannelDecoder, raster: &mut Raster, first: u8, count: u8) {
        let mut calls = 0;
        while !decoder
            .decode_channels(raster, Duration::from_secs(1), first, count)
            .unwrap()
        {
            calls += 1;
            assert!(calls < 10_000, "decode never finished");
        }
    }

    #[test]
    fn test_parse_png_header() {
        let header = ImageCrateCodec.parse_header(&encoded_png(64, 32)).unwrap();
        assert_eq!(
            header,
            ImageHeader {
                width: 64,
                height: 32,
                channels: 4
            }
        );
    }

    #[test]
    fn test_garbage_header_is_rejected() {
        let garbage = EncodedImage::new("garbage", vec![1u8, 2, 3, 4, 5]);
        assert!(matches!(
            ImageCrateCodec.parse_header(&garbage),
            Err(CodecError::InvalidHeader(_))
        ));
    }

    #[test]
    fn test_decode_primary_channels() {
        let image = encoded_png(16, 8);
        let header = ImageCrateCodec.parse_header(&image).unwrap();
        let mut decoder = ImageCrateCodec.decoder(&image, &header).unwrap();
        let mut raster = Raster::try_allocate(16, 8, 4).unwrap();

        decode_all(decoder.as_mut(), &mut raster, 0, 4);

        let px = |x: usize, y: usize| &raster.data()[(y * 16 + x) * 4..(y * 16 + x) * 4 + 4];
        assert_eq!(px(3, 5), &[3, 5, 0x80, 0xff]);
    }

    #[test]
    fn test_zero_slice_still_makes_progress() {
        let image = encoded_png(4, 4);
        let header = ImageCrateCodec.parse_header(&image).unwrap();
        let mut decoder = ImageCrateCodec.decoder(&image, &header).unwrap();
        let mut raster = Raster::try_allocate(4, 4, 4).unwrap();

        let mut calls = 0;
        while !decoder
            .decode_channels(&mut raster, Duration::ZERO, 0, 4)
            .unwrap()
        {
            calls += 1;
        }
        assert!(calls <= 4);
    }

    #[test]
    fn test_discard_target_resizes() {
        let image = encoded_png(32, 32);
        let target = ImageCrateCodec.parse_header(&image).unwrap().with_discard(1);
        let mut decoder = ImageCrateCodec.decoder(&image, &target).unwrap();
        let mut raster = Raster::try_allocate(16, 16, 4).unwrap();

        decode_all(decoder.as_mut(), &mut raster, 0, 4);
        assert!(!raster.is_empty());
    }

    #[test]
    fn test_aux_channel_out_of_range() {
        let image = encoded_png(4, 4);
        let header = ImageCrateCodec.parse_header(&image).unwrap();
        let mut decoder = ImageCrateCodec.decoder(&image, &header).unwrap();
        let mut raster = Raster::try_allocate(4, 4, 1).unwrap();

        let result = decoder.decode_channels(&mut raster, Duration::from_secs(1), 4, 1);
        assert!(matches!(result, Err(CodecError::ChannelOutOfRange { .. })));
    }

    #[test]
    fn test_corrupt_body_erases_raster() {
        let mut bytes = encoded_png(32, 32).bytes().to_vec();
        bytes.truncate(bytes.len() / 2);
        let image = EncodedImage::new("truncated.png", bytes);
        let header = ImageCrateCodec.parse_header(&image).unwrap();
        let mut decoder = ImageCrateCodec.decoder(&image, &header).unwrap();
        let mut raster = Raster::try_allocate(32, 32, 4).unwrap();

        assert!(decoder
            .decode_channels(&mut raster, Duration::from_secs(1), 0, 4)
            .is_err());
        assert!(raster.is_empty());
    }
}
