//! Per-task worker and the external collaborator seams it drives.
//!
//! A worker is stateless: it takes one received task, hands the payload to the
//! external codec, and reports the outcome. Encode failures are isolated to the
//! one task they occurred on. Payload generation and encoding are consumed
//! through narrow traits so the pipeline never depends on a concrete codec.

use thiserror::Error;
use tracing::debug;

use crate::task::{Task, PAYLOAD_SIZE};

/// Pixel layout of the frames flowing through one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelLayout {
    Rgb8,
    Gray8,
}

impl PixelLayout {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelLayout::Rgb8 => 3,
            PixelLayout::Gray8 => 1,
        }
    }
}

/// Process-wide image geometry, held constant for the lifetime of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGeometry {
    pub width: u32,
    pub height: u32,
    pub pixel_layout: PixelLayout,
}

impl ImageGeometry {
    /// Bytes one frame of this geometry occupies.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * self.pixel_layout.bytes_per_pixel()
    }

    /// The geometry must describe exactly one fixed-size payload; a mismatch
    /// would silently truncate or overflow frames, so it is rejected up front.
    pub fn validate(&self) -> Result<(), String> {
        let frame = self.frame_len();
        if frame != PAYLOAD_SIZE {
            return Err(format!(
                "geometry {}x{} ({:?}) is {frame} bytes per frame, payload is {PAYLOAD_SIZE}",
                self.width, self.height, self.pixel_layout
            ));
        }
        Ok(())
    }
}

impl Default for ImageGeometry {
    fn default() -> Self {
        // 64x64 RGB: exactly PAYLOAD_SIZE bytes.
        Self {
            width: 64,
            height: 64,
            pixel_layout: PixelLayout::Rgb8,
        }
    }
}

/// Options forwarded verbatim to the external codec.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
    pub quality: u8,
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self { quality: 90 }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncodeError {
    #[error("codec rejected frame: {0}")]
    Codec(String),
}

/// External codec seam: `encode(payload, width, height, options)`.
pub trait Encoder: Send + Sync {
    fn encode(
        &self,
        payload: &[u8],
        width: u32,
        height: u32,
        options: &EncodeOptions,
    ) -> Result<(), EncodeError>;
}

/// External content-generation seam: fills one frame for the given geometry.
pub trait PayloadGenerator: Send + Sync {
    fn generate(&self, geometry: &ImageGeometry) -> Vec<u8>;
}

/// Encoder that swallows every byte; used for measurement-only runs where the
/// codec output is irrelevant.
#[derive(Debug, Default)]
pub struct NullEncoder;

impl Encoder for NullEncoder {
    fn encode(
        &self,
        _payload: &[u8],
        _width: u32,
        _height: u32,
        _options: &EncodeOptions,
    ) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// Deterministic gradient frames; pure function of the geometry.
#[derive(Debug, Default)]
pub struct GradientGenerator;

impl PayloadGenerator for GradientGenerator {
    fn generate(&self, geometry: &ImageGeometry) -> Vec<u8> {
        let len = geometry.frame_len();
        let mut frame = vec![0u8; len];
        for (i, byte) in frame.iter_mut().enumerate() {
            *byte = (i % 256) as u8;
        }
        frame
    }
}

/// Run one task through the codec.
///
/// Stateless across invocations; concurrent workers share nothing mutable.
pub fn process(
    task: &Task,
    geometry: &ImageGeometry,
    options: &EncodeOptions,
    encoder: &dyn Encoder,
) -> Result<(), EncodeError> {
    debug!(task_id = task.id, source = "worker", "encoding frame");
    encoder.encode(&task.payload, geometry.width, geometry.height, options)
}
