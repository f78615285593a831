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

//! The resumable decode request.
//!
//! One [`DecodeRequest`] drives a single image through header parsing, the
//! primary (colour) channels and, when asked for, the auxiliary channel. Every
//! call to `run` does at most one slice worth of codec work and remembers where
//! it stopped in an explicit [`DecodeStage`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use texel_core::{
    ChannelDecoder, EncodedImage, ImageCodec, ImageHeader, Raster, Request, RequestFlags,
    Responder, Work, WorkHandle,
};

/// Index of the auxiliary channel: the first channel past RGBA.
pub const AUX_CHANNEL: u8 = 4;

/// Progress of a [`DecodeRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStage {
    /// Header not parsed yet.
    Unstarted,
    /// Filling the primary raster.
    DecodingPrimary,
    /// Filling the single-channel auxiliary raster.
    DecodingAux,
    /// Terminal, successfully or not.
    Finished,
}

enum Progress {
    Pending,
    Decoded,
    Failed,
}

/// Decodes one image to a requested level of detail.
pub struct DecodeRequest {
    image: EncodedImage,
    codec: Arc<dyn ImageCodec>,
    target_detail: i32,
    needs_aux: bool,
    long_budget: bool,
    responder: Option<Arc<dyn Responder>>,

    stage: DecodeStage,
    target: Option<ImageHeader>,
    decoder: Option<Box<dyn ChannelDecoder>>,
    primary: Option<Raster>,
    aux: Option<Raster>,
    primary_decoded: bool,
    aux_decoded: bool,
}

impl DecodeRequest {
    /// Creates a request. A negative `target_detail` keeps the full
    /// resolution; otherwise it is the number of halvings to apply.
    pub fn new(
        image: EncodedImage,
        codec: Arc<dyn ImageCodec>,
        target_detail: i32,
        needs_aux: bool,
        responder: Option<Arc<dyn Responder>>,
    ) -> Self {
        Self {
            image,
            codec,
            target_detail,
            needs_aux,
            long_budget: false,
            responder,
            stage: DecodeStage::Unstarted,
            target: None,
            decoder: None,
            primary: None,
            aux: None,
            primary_decoded: false,
            aux_decoded: false,
        }
    }

    /// Marks the request for dedicated (pooled) execution with the long slice.
    pub fn with_long_budget(mut self) -> Self {
        self.long_budget = true;
        self
    }

    /// Wraps the request for scheduling.
    pub fn into_request(self, handle: WorkHandle, priority: u32) -> Request {
        let flags = if self.long_budget {
            RequestFlags::LONG_BUDGET
        } else {
            RequestFlags::NONE
        };
        Request::new(handle, priority, flags, self)
    }

    /// Current stage.
    pub fn stage(&self) -> DecodeStage {
        self.stage
    }

    /// Returns `true` if someone will hear about the outcome.
    pub fn has_responder(&self) -> bool {
        self.responder.is_some()
    }

    /// Parses the header and allocates the primary raster.
    fn start(&mut self) -> bool {
        let header = match self.codec.parse_header(&self.image) {
            Ok(header) => header,
            Err(e) => {
                log::warn!("Failed to parse header of '{}': {e}", self.image.name());
                return false;
            }
        };
        if header.is_empty() {
            log::warn!(
                "Image '{}' declares an empty size {}x{}x{}",
                self.image.name(),
                header.width,
                header.height,
                header.channels
            );
            return false;
        }

        let target = match u32::try_from(self.target_detail) {
            Ok(level) => header.with_discard(level),
            Err(_) => header,
        };

        let Some(raster) = Raster::try_allocate(target.width, target.height, target.channels)
        else {
            log::warn!(
                "No memory for raster of size {}x{}x{}",
                target.width,
                target.height,
                target.channels
            );
            return false;
        };

        match self.codec.decoder(&self.image, &target) {
            Ok(decoder) => self.decoder = Some(decoder),
            Err(e) => {
                log::warn!("Codec refused '{}': {e}", self.image.name());
                return false;
            }
        }

        self.target = Some(target);
        self.primary = Some(raster);
        true
    }

    fn start_aux(&mut self) -> bool {
        let Some(target) = self.target else {
            return false;
        };
        match Raster::try_allocate(target.width, target.height, 1) {
            Some(raster) => {
                self.aux = Some(raster);
                true
            }
            None => {
                log::warn!(
                    "No memory for auxiliary raster of size {}x{}",
                    target.width,
                    target.height
                );
                false
            }
        }
    }

    fn step(&mut self, slice: Duration, aux: bool) -> Progress {
        let (raster, first, count) = if aux {
            (self.aux.as_mut(), AUX_CHANNEL, 1)
        } else {
            let channels = self.target.map_or(0, |t| t.channels);
            (self.primary.as_mut(), 0, channels)
        };
        let (Some(decoder), Some(raster)) = (self.decoder.as_mut(), raster) else {
            return Progress::Failed;
        };

        match decoder.decode_channels(raster, slice, first, count) {
            // Some decoders erase their output when they fail late.
            Ok(true) if raster.is_empty() => {
                log::warn!(
                    "Decoder reported '{}' done but produced no data",
                    self.image.name()
                );
                Progress::Failed
            }
            Ok(true) => Progress::Decoded,
            Ok(false) => {
                if self.long_budget {
                    log::warn!(
                        "Image decoding of '{}' failed to complete with time slice={slice:?}",
                        self.image.name()
                    );
                } else {
                    log::trace!("Decode slice of '{}' expired", self.image.name());
                }
                Progress::Pending
            }
            Err(e) => {
                log::warn!("Decoding '{}' failed: {e}", self.image.name());
                Progress::Failed
            }
        }
    }
}

impl Work for DecodeRequest {
    fn run(&mut self, slice: Duration) -> bool {
        let started = Instant::now();

        if self.stage == DecodeStage::Unstarted {
            if !self.start() {
                self.stage = DecodeStage::Finished;
                return true;
            }
            self.stage = DecodeStage::DecodingPrimary;
        }

        if self.stage == DecodeStage::DecodingPrimary {
            match self.step(slice, false) {
                Progress::Pending => return false,
                Progress::Failed => {
                    self.stage = DecodeStage::Finished;
                    return true;
                }
                Progress::Decoded => {
                    self.primary_decoded = true;
                    if !self.needs_aux || !self.start_aux() {
                        self.stage = DecodeStage::Finished;
                        return true;
                    }
                    self.stage = DecodeStage::DecodingAux;
                }
            }
        }

        if self.stage == DecodeStage::DecodingAux {
            let remaining = slice.saturating_sub(started.elapsed());
            match self.step(remaining, true) {
                Progress::Pending => return false,
                Progress::Failed => {}
                Progress::Decoded => self.aux_decoded = true,
            }
            self.stage = DecodeStage::Finished;
        }

        true
    }

    fn finish(self: Box<Self>, completed: bool) {
        let this = *self;
        let Some(responder) = this.responder else {
            return;
        };

        let success = completed && this.primary_decoded && (!this.needs_aux || this.aux_decoded);
        let primary = this.primary.filter(|_| this.primary_decoded);
        let aux = this.aux.filter(|_| this.aux_decoded);
        responder.completed(success, primary, aux);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use texel_core::CodecError;

    /// Fills `rows_per_call` rows per call with the channel index.
    #[derive(Clone)]
    struct StripCodec {
        header: ImageHeader,
        rows_per_call: u32,
        erase_on_done: bool,
        source_channels: u8,
    }

    impl StripCodec {
        fn new(width: u32, height: u32, channels: u8) -> Self {
            Self {
                header: ImageHeader {
                    width,
                    height,
                    channels,
                },
                rows_per_call: height,
                erase_on_done: false,
                source_channels: channels,
            }
        }
    }

    struct StripDecoder {
        codec: StripCodec,
        next_row: u32,
        /// Channel range `next_row` belongs to.
        cursor: (u8, u8),
    }

    impl ImageCodec for StripCodec {
        fn parse_header(&self, _image: &EncodedImage) -> Result<ImageHeader, CodecError> {
            Ok(self.header)
        }

        fn decoder(
            &self,
            _image: &EncodedImage,
            _target: &ImageHeader,
        ) -> Result<Box<dyn ChannelDecoder>, CodecError> {
            Ok(Box::new(StripDecoder {
                codec: self.clone(),
                next_row: 0,
                cursor: (0, 0),
            }))
        }
    }

    impl ChannelDecoder for StripDecoder {
        fn decode_channels(
            &mut self,
            raster: &mut Raster,
            _slice: Duration,
            first_channel: u8,
            channel_count: u8,
        ) -> Result<bool, CodecError> {
            if u16::from(first_channel) + u16::from(channel_count)
                > u16::from(self.codec.source_channels)
            {
                return Err(CodecError::ChannelOutOfRange {
                    first: first_channel,
                    end: u16::from(first_channel) + u16::from(channel_count),
                    available: self.codec.source_channels,
                });
            }
            if self.cursor != (first_channel, channel_count) {
                self.cursor = (first_channel, channel_count);
                self.next_row = 0;
            }
            let stride = raster.row_stride();
            let end = (self.next_row + self.codec.rows_per_call).min(raster.height());
            for row in self.next_row..end {
                let start = row as usize * stride;
                raster.data_mut()[start..start + stride].fill(first_channel + 1);
            }
            self.next_row = end;
            let done = self.next_row >= raster.height();
            if done && self.codec.erase_on_done {
                raster.erase();
            }
            Ok(done)
        }
    }

    type Outcome = (bool, Option<Raster>, Option<Raster>);

    fn capture() -> (Arc<dyn Responder>, Arc<Mutex<Vec<Outcome>>>) {
        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let sink = outcomes.clone();
        let responder: Arc<dyn Responder> = Arc::new(
            move |success: bool, primary: Option<Raster>, aux: Option<Raster>| {
                sink.lock().unwrap().push((success, primary, aux));
            },
        );
        (responder, outcomes)
    }

    fn request(codec: StripCodec, detail: i32, aux: bool) -> (Box<DecodeRequest>, Arc<Mutex<Vec<Outcome>>>) {
        let (responder, outcomes) = capture();
        let request = DecodeRequest::new(
            EncodedImage::new("test", vec![0u8; 4]),
            Arc::new(codec),
            detail,
            aux,
            Some(responder),
        );
        (Box::new(request), outcomes)
    }

    fn run_to_end(request: &mut DecodeRequest) -> usize {
        let mut calls = 1;
        while !request.run(Duration::from_millis(5)) {
            calls += 1;
            assert!(calls < 1000, "decode never finished");
        }
        calls
    }

    #[test]
    fn test_primary_decode_success() {
        let (mut req, outcomes) = request(StripCodec::new(64, 64, 4), -1, false);
        assert!(req.has_responder());
        run_to_end(&mut req);
        assert_eq!(req.stage(), DecodeStage::Finished);
        req.finish(true);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        let (success, primary, aux) = &outcomes[0];
        assert!(*success);
        let primary = primary.as_ref().unwrap();
        assert_eq!((primary.width(), primary.height(), primary.channels()), (64, 64, 4));
        assert!(aux.is_none());
    }

    #[test]
    fn test_zero_width_fails_on_first_run() {
        let (mut req, outcomes) = request(StripCodec::new(0, 64, 4), -1, false);
        assert!(req.run(Duration::from_millis(5)));
        req.finish(true);

        let outcomes = outcomes.lock().unwrap();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].0);
        assert!(outcomes[0].1.is_none());
        assert!(outcomes[0].2.is_none());
    }

    #[test]
    fn test_resumes_across_slices() {
        let mut codec = StripCodec::new(8, 8, 3);
        codec.rows_per_call = 2;
        let (mut req, outcomes) = request(codec, -1, false);

        assert!(!req.run(Duration::ZERO));
        assert_eq!(req.stage(), DecodeStage::DecodingPrimary);
        assert_eq!(run_to_end(&mut req), 3);
        req.finish(true);

        assert!(outcomes.lock().unwrap()[0].0);
    }

    #[test]
    fn test_discard_level_shrinks_raster() {
        let (mut req, outcomes) = request(StripCodec::new(64, 32, 4), 2, false);
        run_to_end(&mut req);
        req.finish(true);

        let outcomes = outcomes.lock().unwrap();
        let primary = outcomes[0].1.as_ref().unwrap();
        assert_eq!((primary.width(), primary.height()), (16, 8));
    }

    #[test]
    fn test_erased_output_counts_as_failure() {
        let mut codec = StripCodec::new(4, 4, 4);
        codec.erase_on_done = true;
        let (mut req, outcomes) = request(codec, -1, false);
        run_to_end(&mut req);
        req.finish(true);

        let outcomes = outcomes.lock().unwrap();
        assert!(!outcomes[0].0);
        assert!(outcomes[0].1.is_none());
    }

    #[test]
    fn test_aux_channel_decoded_when_requested() {
        let mut codec = StripCodec::new(4, 4, 4);
        codec.source_channels = 5;
        let (mut req, outcomes) = request(codec, -1, true);
        run_to_end(&mut req);
        req.finish(true);

        let outcomes = outcomes.lock().unwrap();
        let (success, primary, aux) = &outcomes[0];
        assert!(*success);
        assert!(primary.is_some());
        let aux = aux.as_ref().unwrap();
        assert_eq!(aux.channels(), 1);
        assert!(aux.data().iter().all(|&b| b == AUX_CHANNEL + 1));
    }

    #[test]
    fn test_missing_aux_channel_fails_overall() {
        let (mut req, outcomes) = request(StripCodec::new(4, 4, 4), -1, true);
        run_to_end(&mut req);
        req.finish(true);

        let outcomes = outcomes.lock().unwrap();
        let (success, primary, aux) = &outcomes[0];
        assert!(!*success);
        assert!(primary.is_some());
        assert!(aux.is_none());
    }

    #[test]
    fn test_abandoned_request_reports_failure() {
        let mut codec = StripCodec::new(4, 4, 4);
        codec.rows_per_call = 1;
        let (mut req, outcomes) = request(codec, -1, false);
        assert!(!req.run(Duration::ZERO));
        req.finish(false);

        let outcomes = outcomes.lock().unwrap();
        assert!(!outcomes[0].0);
        assert!(outcomes[0].1.is_none());
    }

    #[test]
    fn test_long_budget_sets_flag() {
        let (req, _outcomes) = request(StripCodec::new(4, 4, 4), -1, false);
        let handles = texel_core::HandleAllocator::new();
        let scheduled = req.with_long_budget().into_request(handles.generate(), 3);
        assert!(scheduled.flags().contains(RequestFlags::LONG_BUDGET));
        assert_eq!(scheduled.priority(), 3);
    }
}
