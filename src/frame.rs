//! Frame containers passed between pipeline stages.
//!
//! - `RawFrame`: packed RGB24 pixels straight from a source.
//! - `EncodedFrame`: compressed, immutable payload shared by every subscriber.

use std::sync::Arc;

use anyhow::{anyhow, Result};

// ----------------------------------------------------------------------------
// RawFrame: decoded pixels
// ----------------------------------------------------------------------------

/// Decoded frame in packed RGB24 layout (`width * height * 3` bytes).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawFrame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl RawFrame {
    /// Wrap RGB24 pixels, validating the buffer length against the dimensions.
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        Ok(Self {
            pixels,
            width,
            height,
        })
    }

    /// Solid-colour frame.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..len / 3 {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// RGB value at `(x, y)`, or `None` outside the frame.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        Some([
            self.pixels[offset],
            self.pixels[offset + 1],
            self.pixels[offset + 2],
        ])
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

// ----------------------------------------------------------------------------
// EncodedFrame: transport-ready payload
// ----------------------------------------------------------------------------

/// One compressed image ready for the wire.
///
/// The byte buffer is reference counted so fan-out to N subscribers never
/// copies the payload.
#[derive(Clone, Debug)]
pub struct EncodedFrame {
    /// Index of the producing pipeline.
    pub source: usize,
    /// Monotonic per-pipeline sequence number, starting at 1.
    pub sequence: u64,
    pub content_type: &'static str,
    bytes: Arc<[u8]>,
}

impl EncodedFrame {
    pub fn new(source: usize, sequence: u64, content_type: &'static str, bytes: Vec<u8>) -> Self {
        Self {
            source,
            sequence,
            content_type,
            bytes: bytes.into(),
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}
