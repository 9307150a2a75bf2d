/// One raw detector output, in the detector's native corner form.
///
/// Coordinates are pixels and may fall outside the frame or be inverted;
/// `BoundingBox::from_corners` normalizes them.
#[derive(Clone, Debug, PartialEq)]
pub struct Detection {
    pub label: String,
    pub confidence: f32,
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f32, corners: [f32; 4]) -> Self {
        Self {
            label: label.into(),
            confidence,
            x1: corners[0],
            y1: corners[1],
            x2: corners[2],
            y2: corners[3],
        }
    }
}

/// Axis-aligned box inside a frame. `width` and `height` are always > 0 and
/// `x + width <= frame width`, `y + height <= frame height`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl BoundingBox {
    /// Convert corner coordinates into a box clamped to the frame.
    ///
    /// Returns `None` when nothing of the box survives clamping.
    pub fn from_corners(
        x1: f32,
        y1: f32,
        x2: f32,
        y2: f32,
        frame_width: u32,
        frame_height: u32,
    ) -> Option<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return None;
        }
        let clamp_x = |v: f32| v.round().clamp(0.0, frame_width as f32) as u32;
        let clamp_y = |v: f32| v.round().clamp(0.0, frame_height as f32) as u32;
        let (left, right) = (clamp_x(x1.min(x2)), clamp_x(x1.max(x2)));
        let (top, bottom) = (clamp_y(y1.min(y2)), clamp_y(y1.max(y2)));
        let width = right.saturating_sub(left);
        let height = bottom.saturating_sub(top);
        if width == 0 || height == 0 {
            return None;
        }
        Some(Self {
            x: left,
            y: top,
            width,
            height,
        })
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }
}

/// Filtered boxes for one frame, in detector order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DetectionResult {
    pub boxes: Vec<BoundingBox>,
}

impl DetectionResult {
    pub fn count(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }
}
