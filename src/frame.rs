//! Raw frame assembly.
//!
//! The transcoder emits headerless interleaved RGB frames; size alone
//! delimits them. `FrameAssembler` turns that byte stream back into whole
//! `FrameBuffer`s and never forwards a partial frame.

use image::RgbImage;
use std::io::{self, Read};

use crate::config::FrameSettings;
use crate::error::PipelineError;

/// One decoded frame: `width * height * 3` bytes, no padding.
pub struct FrameBuffer {
    image: RgbImage,
    index: u64,
}

// No Clone: a frame lives for exactly one detection cycle.

impl FrameBuffer {
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>, index: u64) -> Result<Self, PipelineError> {
        let expected = width as usize * height as usize * 3;
        let actual = data.len();
        let image = RgbImage::from_raw(width, height, data).ok_or(PipelineError::ShortRead {
            expected,
            actual,
        })?;
        Ok(Self { image, index })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Position of this frame in the stream, starting at 0.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.image.as_raw()
    }

    pub fn image(&self) -> &RgbImage {
        &self.image
    }

    pub fn into_image(self) -> RgbImage {
        self.image
    }
}

impl std::fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("index", &self.index)
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

pub struct FrameAssembler<R: Read> {
    input: R,
    settings: FrameSettings,
    frames: u64,
}

impl<R: Read> FrameAssembler<R> {
    pub fn new(input: R, settings: FrameSettings) -> Self {
        Self {
            input,
            settings,
            frames: 0,
        }
    }

    pub fn frame_len(&self) -> usize {
        self.settings.frame_len()
    }

    pub fn frames_read(&self) -> u64 {
        self.frames
    }

    /// Read the next whole frame.
    ///
    /// - `Ok(Some(frame))`: exactly `frame_len()` bytes were read.
    /// - `Ok(None)`: the stream was closed at a frame boundary.
    /// - `Err(ShortRead)`: the stream closed part-way through a frame.
    pub fn next_frame(&mut self) -> Result<Option<FrameBuffer>, PipelineError> {
        let expected = self.frame_len();
        let mut data = vec![0u8; expected];
        let mut filled = 0;
        while filled < expected {
            match self.input.read(&mut data[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        if filled == 0 {
            return Ok(None);
        }
        if filled < expected {
            return Err(PipelineError::ShortRead {
                expected,
                actual: filled,
            });
        }
        let frame = FrameBuffer::from_raw(
            self.settings.width,
            self.settings.height,
            data,
            self.frames,
        )?;
        self.frames += 1;
        Ok(Some(frame))
    }
}
