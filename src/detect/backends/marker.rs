use crate::detect::backend::DetectorBackend;
use crate::detect::result::Detection;
use crate::error::DetectError;
use crate::frame::RawFrame;

/// Components smaller than this many pixels are treated as noise.
const DEFAULT_MIN_PIXELS: usize = 16;

/// CPU backend that finds saturated red regions.
///
/// Every 4-connected region of marker-coloured pixels becomes one detection
/// labelled with `label`. Confidence is the fraction of the region's bounding
/// box that is actually filled, so solid squares score 1.0.
#[derive(Clone, Debug)]
pub struct MarkerBackend {
    label: String,
    min_pixels: usize,
}

impl MarkerBackend {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            min_pixels: DEFAULT_MIN_PIXELS,
        }
    }

    pub fn with_min_pixels(mut self, min_pixels: usize) -> Self {
        self.min_pixels = min_pixels.max(1);
        self
    }
}

fn is_marker(rgb: &[u8]) -> bool {
    rgb[0] >= 160 && rgb[1] <= 80 && rgb[2] <= 80
}

impl DetectorBackend for MarkerBackend {
    fn name(&self) -> &'static str {
        "marker"
    }

    fn detect(&mut self, frame: &RawFrame) -> Result<Vec<Detection>, DetectError> {
        let width = frame.width as usize;
        let height = frame.height as usize;
        let pixels = frame.pixels();
        let mask: Vec<bool> = pixels.chunks_exact(3).map(is_marker).collect();
        if mask.len() != width * height {
            return Err(DetectError::Frame(format!(
                "expected {} pixels, received {}",
                width * height,
                mask.len()
            )));
        }

        let mut visited = vec![false; mask.len()];
        let mut stack = Vec::new();
        let mut detections = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] || visited[start] {
                continue;
            }
            visited[start] = true;
            stack.push(start);
            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut filled = 0usize;

            while let Some(idx) = stack.pop() {
                let (x, y) = (idx % width, idx / width);
                filled += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let mut visit = |n: usize| {
                    if mask[n] && !visited[n] {
                        visited[n] = true;
                        stack.push(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < width {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - width);
                }
                if y + 1 < height {
                    visit(idx + width);
                }
            }

            if filled < self.min_pixels {
                continue;
            }
            let box_area = (max_x - min_x + 1) * (max_y - min_y + 1);
            detections.push(Detection::new(
                self.label.clone(),
                filled as f32 / box_area as f32,
                [
                    min_x as f32,
                    min_y as f32,
                    (max_x + 1) as f32,
                    (max_y + 1) as f32,
                ],
            ));
        }

        Ok(detections)
    }
}
