use serde::{Deserialize, Serialize};

/// Crop selections with a span at or below this many canvas units are discarded
pub const MIN_CROP_SPAN: f64 = 20.0;

/// Size of the preview canvas that crop selections are drawn on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Default for CanvasSize {
    fn default() -> Self {
        Self::new(700, 400)
    }
}

/// A crop rectangle in preview canvas coordinates
///
/// Always normalized (`x1 < x2`, `y1 < y2`) and larger than the minimum span
/// in both directions; the constructors refuse anything else.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "[f64; 4]", into = "[f64; 4]")]
pub struct CropRegion {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

/// A crop box in frame pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Build a region from two opposite corners in any order
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Option<Self> {
        Self::from_drag((x1, y1), (x2, y2), MIN_CROP_SPAN)
    }

    /// Build a region from the start and end points of a drag gesture
    ///
    /// Returns `None` when either span is not larger than `min_span`.
    pub fn from_drag(start: (f64, f64), end: (f64, f64), min_span: f64) -> Option<Self> {
        let (x1, x2) = (start.0.min(end.0), start.0.max(end.0));
        let (y1, y2) = (start.1.min(end.1), start.1.max(end.1));

        if !(x2 - x1 > min_span && y2 - y1 > min_span) {
            return None;
        }

        Some(Self { x1, y1, x2, y2 })
    }

    pub fn corners(&self) -> (f64, f64, f64, f64) {
        (self.x1, self.y1, self.x2, self.y2)
    }

    /// Map the region from `canvas` space into a `width`x`height` frame
    ///
    /// Each corner is scaled by frame size over canvas size and truncated,
    /// then the box is clipped to the frame. `None` means nothing of the
    /// frame is left.
    pub fn remap(&self, width: u32, height: u32, canvas: CanvasSize) -> Option<CropBox> {
        if canvas.width == 0 || canvas.height == 0 {
            return None;
        }

        let scale_x = width as f64 / canvas.width as f64;
        let scale_y = height as f64 / canvas.height as f64;
        let to_frame = |value: f64, scale: f64, limit: u32| -> i64 {
            ((value * scale).trunc() as i64).clamp(0, limit as i64)
        };

        let left = to_frame(self.x1, scale_x, width);
        let top = to_frame(self.y1, scale_y, height);
        let right = to_frame(self.x2, scale_x, width);
        let bottom = to_frame(self.y2, scale_y, height);

        if right <= left || bottom <= top {
            return None;
        }

        Some(CropBox {
            x: left as u32,
            y: top as u32,
            width: (right - left) as u32,
            height: (bottom - top) as u32,
        })
    }
}

impl TryFrom<[f64; 4]> for CropRegion {
    type Error = String;

    fn try_from(value: [f64; 4]) -> Result<Self, Self::Error> {
        let [x1, y1, x2, y2] = value;
        Self::new(x1, y1, x2, y2)
            .ok_or_else(|| format!("crop region {:?} is smaller than {} units", value, MIN_CROP_SPAN))
    }
}

impl From<CropRegion> for [f64; 4] {
    fn from(region: CropRegion) -> Self {
        [region.x1, region.y1, region.x2, region.y2]
    }
}
