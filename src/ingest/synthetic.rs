//! Synthetic frame source.
//!
//! This module provides `SyntheticSource`, a deterministic stand-in for a
//! camera. Each frame is a gray gradient background with a configurable number
//! of marker-coloured squares ("subjects") drifting inside disjoint columns,
//! so a marker detector sees exactly `subjects` objects per frame.
//!
//! The synthetic source is responsible for:
//! - Pacing frames to the target fps
//! - Simulating a mid-stream failure after `fail_after` frames

use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceStats};
use crate::error::SourceError;
use crate::frame::RawFrame;

/// Colour painted for every subject.
pub const MARKER_RGB: [u8; 3] = [220, 30, 30];

/// Configuration for a synthetic source.
#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub width: u32,
    pub height: u32,
    /// Target frame rate. Zero disables pacing.
    pub target_fps: u32,
    /// Number of marker squares per frame.
    pub subjects: usize,
    /// Fail with `SourceExhausted` once this many frames were produced.
    pub fail_after: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            target_fps: 15,
            subjects: 1,
            fail_after: None,
        }
    }
}

pub struct SyntheticSource {
    index: usize,
    config: SyntheticConfig,
    frame_count: u64,
    /// Per-source phase so two cameras never render the same scene.
    phase: u64,
    last_frame_at: Option<Instant>,
}

impl SyntheticSource {
    pub fn open(index: usize, config: SyntheticConfig) -> Result<Self, SourceError> {
        if config.width == 0 || config.height == 0 {
            return Err(SourceError::unavailable(
                index,
                "synthetic frame dimensions must be non-zero",
            ));
        }
        let phase = StdRng::seed_from_u64(index as u64).gen_range(0..1_000);
        log::info!(
            "SyntheticSource: opened camera {} ({}x{}, {} subjects)",
            index,
            config.width,
            config.height,
            config.subjects
        );
        Ok(Self {
            index,
            config,
            frame_count: 0,
            phase,
            last_frame_at: None,
        })
    }

    fn pace(&mut self) {
        if self.config.target_fps == 0 {
            return;
        }
        let interval = Duration::from_millis(1000 / self.config.target_fps as u64);
        if let Some(last) = self.last_frame_at {
            let elapsed = last.elapsed();
            if elapsed < interval {
                std::thread::sleep(interval - elapsed);
            }
        }
        self.last_frame_at = Some(Instant::now());
    }

    /// Square placements `(x, y, side)` for the current frame.
    pub fn subject_boxes(&self) -> Vec<(u32, u32, u32)> {
        let subjects = self.config.subjects as u32;
        if subjects == 0 {
            return Vec::new();
        }
        let cell_w = self.config.width / subjects;
        let side = (cell_w.min(self.config.height) / 2).max(1);
        // Two columns of slack keep neighbouring squares from touching.
        let travel_x = cell_w.saturating_sub(side + 2) as u64;
        let travel_y = self.config.height.saturating_sub(side) as u64;
        let t = self.frame_count + self.phase;

        (0..subjects)
            .map(|i| {
                let x = i * cell_w + 1 + bounce(t * 3 + i as u64 * 17, travel_x) as u32;
                let y = bounce(t * 2 + i as u64 * 29, travel_y) as u32;
                (x, y, side)
            })
            .collect()
    }

    fn generate_pixels(&self) -> Vec<u8> {
        let width = self.config.width as usize;
        let height = self.config.height as usize;
        let mut pixels = vec![0u8; width * height * 3];
        for y in 0..height {
            for x in 0..width {
                let v = 60 + ((x + y + self.frame_count as usize) % 64) as u8;
                let offset = (y * width + x) * 3;
                pixels[offset..offset + 3].copy_from_slice(&[v, v, v]);
            }
        }
        for (sx, sy, side) in self.subject_boxes() {
            let x_end = (sx + side).min(self.config.width) as usize;
            let y_end = (sy + side).min(self.config.height) as usize;
            for y in sy as usize..y_end {
                for x in sx as usize..x_end {
                    let offset = (y * width + x) * 3;
                    pixels[offset..offset + 3].copy_from_slice(&MARKER_RGB);
                }
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn read_frame(&mut self) -> Result<RawFrame, SourceError> {
        if let Some(limit) = self.config.fail_after {
            if self.frame_count >= limit {
                return Err(SourceError::exhausted(
                    self.index,
                    format!("synthetic source stopped after {} frames", limit),
                ));
            }
        }
        self.pace();
        self.frame_count += 1;
        let pixels = self.generate_pixels();
        RawFrame::new(pixels, self.config.width, self.config.height)
            .map_err(|err| SourceError::exhausted(self.index, err))
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            description: format!("synthetic://camera{}", self.index),
        }
    }
}

/// Triangle wave over `0..=span`.
fn bounce(t: u64, span: u64) -> u64 {
    if span == 0 {
        return 0;
    }
    let p = t % (2 * span);
    if p <= span {
        p
    } else {
        2 * span - p
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(subjects: usize) -> SyntheticConfig {
        SyntheticConfig {
            width: 120,
            height: 60,
            target_fps: 0,
            subjects,
            fail_after: None,
        }
    }

    #[test]
    fn synthetic_source_produces_frames() {
        let mut source = SyntheticSource::open(0, config(1)).unwrap();
        let frame = source.read_frame().unwrap();
        assert_eq!(frame.width, 120);
        assert_eq!(frame.height, 60);
        assert_eq!(frame.pixels().len(), 120 * 60 * 3);
    }

    #[test]
    fn subjects_are_painted_with_marker_colour() {
        let mut source = SyntheticSource::open(1, config(2)).unwrap();
        let frame = source.read_frame().unwrap();
        for (x, y, side) in source.subject_boxes() {
            assert_eq!(frame.pixel(x, y), Some(MARKER_RGB));
            assert_eq!(frame.pixel(x + side - 1, y + side - 1), Some(MARKER_RGB));
        }
    }

    #[test]
    fn subjects_never_touch() {
        let mut source = SyntheticSource::open(2, config(3)).unwrap();
        for _ in 0..40 {
            source.read_frame().unwrap();
            let boxes = source.subject_boxes();
            for pair in boxes.windows(2) {
                let (ax, _, side) = pair[0];
                let (bx, _, _) = pair[1];
                assert!(ax + side < bx, "{:?}", boxes);
            }
        }
    }

    #[test]
    fn fails_after_configured_frames() {
        let mut cfg = config(1);
        cfg.fail_after = Some(3);
        let mut source = SyntheticSource::open(4, cfg).unwrap();
        for _ in 0..3 {
            source.read_frame().unwrap();
        }
        assert!(matches!(
            source.read_frame(),
            Err(SourceError::Exhausted { index: 4, .. })
        ));
    }

    #[test]
    fn zero_sized_source_is_unavailable() {
        let mut cfg = config(1);
        cfg.width = 0;
        assert!(matches!(
            SyntheticSource::open(0, cfg),
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[test]
    fn bounce_stays_in_range() {
        for t in 0..100 {
            assert!(bounce(t, 7) <= 7);
        }
        assert_eq!(bounce(5, 0), 0);
    }
}
