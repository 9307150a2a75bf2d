//! V4L2 frame source.
//!
//! This module provides `V4l2Source` for capturing from local V4L2 devices
//! opened by camera index (e.g., index 0 → /dev/video0).
//!
//! The V4L2 source is responsible for:
//! - Negotiating RGB24 with the device, accepting YUYV/NV12 when refused
//! - Normalizing captured buffers to RGB24 in-memory
//! - Holding the device exclusively until dropped

use ouroboros::self_referencing;

use super::normalize::{normalize_to_rgb, PixelFormat};
use super::{FrameSource, SourceStats};
use crate::error::SourceError;
use crate::frame::RawFrame;

/// Configuration for a V4L2 source.
#[derive(Clone, Debug)]
pub struct V4l2Config {
    /// Device path (e.g., "/dev/video0")
    pub device: String,
    /// Requested frame rate. Zero leaves the driver default.
    pub target_fps: u32,
    /// Preferred frame width.
    pub width: u32,
    /// Preferred frame height.
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 15,
            width: 640,
            height: 480,
        }
    }
}

pub struct V4l2Source {
    index: usize,
    config: V4l2Config,
    state: DeviceV4l2State,
    format: PixelFormat,
    frame_count: u64,
    active_width: u32,
    active_height: u32,
}

#[self_referencing]
struct DeviceV4l2State {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

impl V4l2Source {
    /// Open and start streaming from the device.
    pub fn open(index: usize, config: V4l2Config) -> Result<Self, SourceError> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        let mut device = v4l::Device::with_path(&config.device).map_err(|err| {
            SourceError::unavailable(index, format!("open {}: {}", config.device, err))
        })?;
        let mut requested = device
            .format()
            .map_err(|err| SourceError::unavailable(index, format!("read format: {}", err)))?;
        requested.width = config.width;
        requested.height = config.height;
        requested.fourcc = v4l::FourCC::new(b"RGB3");

        let format = match device.set_format(&requested) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    config.device,
                    err
                );
                device.format().map_err(|err| {
                    SourceError::unavailable(index, format!("read format after set failure: {}", err))
                })?
            }
        };

        let pixel_format = match &format.fourcc.repr {
            b"RGB3" => PixelFormat::Rgb24,
            b"YUYV" => PixelFormat::Yuyv,
            b"NV12" => PixelFormat::Nv12,
            other => {
                return Err(SourceError::unavailable(
                    index,
                    format!(
                        "unsupported pixel format {}",
                        String::from_utf8_lossy(other)
                    ),
                ))
            }
        };

        if config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!("V4l2Source: failed to set fps on {}: {}", config.device, err);
            }
        }

        let state = DeviceV4l2StateTryBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
            },
        }
        .try_build()
        .map_err(|err| SourceError::unavailable(index, format!("create buffer stream: {}", err)))?;

        log::info!(
            "V4l2Source: camera {} connected to {} ({}x{} {:?})",
            index,
            config.device,
            format.width,
            format.height,
            pixel_format
        );
        Ok(Self {
            index,
            config,
            state,
            format: pixel_format,
            frame_count: 0,
            active_width: format.width,
            active_height: format.height,
        })
    }
}

impl FrameSource for V4l2Source {
    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        use v4l::io::traits::CaptureStream;

        let index = self.index;
        let (width, height, format) = (self.active_width, self.active_height, self.format);
        let pixels = self.state.with_mut(|fields| {
            let (buf, meta) = fields
                .stream
                .next()
                .map_err(|err| SourceError::exhausted(index, format!("capture: {}", err)))?;
            let used = (meta.bytesused as usize).min(buf.len());
            let used = if used == 0 { buf.len() } else { used };
            normalize_to_rgb(&buf[..used], width, height, format)
                .map_err(|err| SourceError::exhausted(index, err))
        })?;

        self.frame_count += 1;
        RawFrame::new(pixels, width, height).map_err(|err| SourceError::exhausted(index, err))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            description: self.config.device.clone(),
        }
    }
}
