//! Overlay and compression stage.
//!
//! `Annotator` draws a fixed-style outline per box onto a copy of the frame;
//! `FrameEncoder` compresses the result into an `EncodedFrame`.

use std::str::FromStr;

use anyhow::anyhow;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{ExtendedColorType, ImageBuffer, ImageEncoder, Rgb, RgbImage};
use serde::Deserialize;

use crate::detect::BoundingBox;
use crate::error::EncodeError;
use crate::frame::{EncodedFrame, RawFrame};

pub const BOX_COLOR: [u8; 3] = [255, 0, 0];
pub const BOX_THICKNESS: u32 = 2;

/// Draws box outlines.
#[derive(Clone, Copy, Debug)]
pub struct Annotator {
    color: Rgb<u8>,
    thickness: u32,
}

impl Default for Annotator {
    fn default() -> Self {
        Self {
            color: Rgb(BOX_COLOR),
            thickness: BOX_THICKNESS,
        }
    }
}

impl Annotator {
    /// Return a copy of `frame` with one outline per box. `frame` is untouched.
    pub fn annotate(&self, frame: &RawFrame, boxes: &[BoundingBox]) -> RawFrame {
        if boxes.is_empty() {
            return frame.clone();
        }
        let mut image: RgbImage = match ImageBuffer::from_raw(
            frame.width,
            frame.height,
            frame.pixels().to_vec(),
        ) {
            Some(image) => image,
            None => return frame.clone(),
        };
        for bbox in boxes {
            self.draw_outline(&mut image, bbox);
        }
        frame_from_image(image, frame)
    }

    fn draw_outline(&self, image: &mut RgbImage, bbox: &BoundingBox) {
        let (width, height) = image.dimensions();
        let right = bbox.right().min(width);
        let bottom = bbox.bottom().min(height);
        if bbox.x >= right || bbox.y >= bottom {
            return;
        }
        let t = self.thickness.max(1);
        for y in bbox.y..bottom {
            for x in bbox.x..right {
                let on_edge = x < bbox.x + t || x + t >= right || y < bbox.y + t || y + t >= bottom;
                if on_edge {
                    image.put_pixel(x, y, self.color);
                }
            }
        }
    }
}

fn frame_from_image(image: RgbImage, fallback: &RawFrame) -> RawFrame {
    let (width, height) = image.dimensions();
    RawFrame::new(image.into_raw(), width, height).unwrap_or_else(|_| fallback.clone())
}

/// Wire image format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFormat {
    Jpeg,
    Png,
}

impl EncodeFormat {
    pub fn content_type(self) -> &'static str {
        match self {
            EncodeFormat::Jpeg => "image/jpeg",
            EncodeFormat::Png => "image/png",
        }
    }
}

impl FromStr for EncodeFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "jpeg" | "jpg" => Ok(EncodeFormat::Jpeg),
            "png" => Ok(EncodeFormat::Png),
            other => Err(anyhow!("unsupported encode format '{}'", other)),
        }
    }
}

/// Compresses frames for the wire.
#[derive(Clone, Copy, Debug)]
pub struct FrameEncoder {
    format: EncodeFormat,
    quality: u8,
}

impl FrameEncoder {
    pub fn new(format: EncodeFormat, quality: u8) -> Self {
        Self {
            format,
            quality: quality.clamp(1, 100),
        }
    }

    pub fn encode(
        &self,
        frame: &RawFrame,
        source: usize,
        sequence: u64,
    ) -> Result<EncodedFrame, EncodeError> {
        let mut buffer = Vec::new();
        let result = match self.format {
            EncodeFormat::Jpeg => JpegEncoder::new_with_quality(&mut buffer, self.quality)
                .write_image(frame.pixels(), frame.width, frame.height, ExtendedColorType::Rgb8),
            EncodeFormat::Png => PngEncoder::new(&mut buffer).write_image(
                frame.pixels(),
                frame.width,
                frame.height,
                ExtendedColorType::Rgb8,
            ),
        };
        result.map_err(|err| EncodeError(err.to_string()))?;
        if buffer.is_empty() {
            return Err(EncodeError("encoder produced no bytes".to_string()));
        }
        Ok(EncodedFrame::new(
            source,
            sequence,
            self.format.content_type(),
            buffer,
        ))
    }
}
