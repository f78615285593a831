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

//! Test codecs and responders shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender};
use texel_agents::DecodeCoordinator;
use texel_core::{
    ChannelDecoder, CodecError, EncodedImage, ImageCodec, ImageHeader, Raster, Responder,
};

/// Codec that "decodes" any input to a fixed header, a few rows per call.
#[derive(Clone)]
pub struct ScriptedCodec {
    header: ImageHeader,
    rows_per_call: u32,
    row_delay: Duration,
    gate: Option<Receiver<()>>,
}

impl ScriptedCodec {
    pub fn new(width: u32, height: u32, channels: u8) -> Self {
        Self {
            header: ImageHeader {
                width,
                height,
                channels,
            },
            rows_per_call: u32::MAX,
            row_delay: Duration::ZERO,
            gate: None,
        }
    }

    /// Decodes at most `rows` rows per call.
    pub fn rows_per_call(mut self, rows: u32) -> Self {
        self.rows_per_call = rows.max(1);
        self
    }

    /// Sleeps this long per decoded row.
    pub fn row_delay(mut self, delay: Duration) -> Self {
        self.row_delay = delay;
        self
    }

    /// Every decode call first takes one token from `gate`.
    pub fn gated(mut self, gate: Receiver<()>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn shared(self) -> Arc<dyn ImageCodec> {
        Arc::new(self)
    }
}

impl ImageCodec for ScriptedCodec {
    fn parse_header(&self, _image: &EncodedImage) -> Result<ImageHeader, CodecError> {
        Ok(self.header)
    }

    fn decoder(
        &self,
        _image: &EncodedImage,
        target: &ImageHeader,
    ) -> Result<Box<dyn ChannelDecoder>, CodecError> {
        Ok(Box::new(ScriptedDecoder {
            target: *target,
            source_channels: self.header.channels,
            rows_per_call: self.rows_per_call,
            row_delay: self.row_delay,
            gate: self.gate.clone(),
            next_row: 0,
            cursor: (0, 0),
        }))
    }
}

struct ScriptedDecoder {
    target: ImageHeader,
    source_channels: u8,
    rows_per_call: u32,
    row_delay: Duration,
    gate: Option<Receiver<()>>,
    next_row: u32,
    cursor: (u8, u8),
}

impl ChannelDecoder for ScriptedDecoder {
    fn decode_channels(
        &mut self,
        raster: &mut Raster,
        slice: Duration,
        first_channel: u8,
        channel_count: u8,
    ) -> Result<bool, CodecError> {
        let deadline = Instant::now() + slice;
        if let Some(gate) = &self.gate {
            gate.recv()
                .map_err(|_| CodecError::Corrupt("gate closed".into()))?;
        }

        let end = u16::from(first_channel) + u16::from(channel_count);
        if end > u16::from(self.source_channels) {
            return Err(CodecError::ChannelOutOfRange {
                first: first_channel,
                end,
                available: self.source_channels,
            });
        }
        if self.cursor != (first_channel, channel_count) {
            self.cursor = (first_channel, channel_count);
            self.next_row = 0;
        }

        let stride = raster.row_stride();
        let mut rows = 0;
        while self.next_row < self.target.height && rows < self.rows_per_call {
            let start = self.next_row as usize * stride;
            raster.data_mut()[start..start + stride].fill(first_channel + 1);
            if !self.row_delay.is_zero() {
                thread::sleep(self.row_delay);
            }
            self.next_row += 1;
            rows += 1;
            if Instant::now() >= deadline {
                break;
            }
        }
        Ok(self.next_row >= self.target.height)
    }
}

/// What a responder was told.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub name: String,
    pub success: bool,
    pub primary: Option<(u32, u32, u8)>,
    pub aux: Option<(u32, u32, u8)>,
    pub thread: Option<String>,
}

fn dims(raster: &Option<Raster>) -> Option<(u32, u32, u8)> {
    raster
        .as_ref()
        .map(|r| (r.width(), r.height(), r.channels()))
}

/// A responder forwarding its outcome, tagged with `name`, to `tx`.
pub fn reporter(name: &str, tx: &Sender<Outcome>) -> Option<Arc<dyn Responder>> {
    let name = name.to_owned();
    let tx = tx.clone();
    Some(Arc::new(
        move |success: bool, primary: Option<Raster>, aux: Option<Raster>| {
            let _ = tx.send(Outcome {
                name: name.clone(),
                success,
                primary: dims(&primary),
                aux: dims(&aux),
                thread: thread::current().name().map(str::to_owned),
            });
        },
    ))
}

pub fn image(name: &str) -> EncodedImage {
    EncodedImage::new(name, vec![0u8; 16])
}

/// Pumps `coordinator` until `expected` outcomes arrived on `rx`.
pub fn pump_until(
    coordinator: &mut DecodeCoordinator,
    rx: &Receiver<Outcome>,
    expected: usize,
) -> Vec<Outcome> {
    let deadline = Instant::now() + Duration::from_secs(10);
    let mut outcomes = Vec::new();
    while outcomes.len() < expected {
        assert!(Instant::now() < deadline, "timed out waiting for decodes");
        coordinator.pump(Duration::from_millis(20));
        while let Ok(outcome) = rx.recv_timeout(Duration::from_millis(1)) {
            outcomes.push(outcome);
        }
    }
    outcomes
}
