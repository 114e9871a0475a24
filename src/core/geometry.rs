use serde::{Deserialize, Serialize};

use crate::core::error::{LabelError, LabelResult};
use crate::core::raster::{PageImage, PixelRect};

// Guards float noise such as 0.3 * 100.0 = 30.000000000000004 when snapping to pixels.
const PIXEL_EPSILON: f64 = 1e-9;

/// Axis-aligned box. Word and line boxes are normalized to `[0, 1]` relative to
/// the page image; `scale` produces the same box in pixel units.
///
/// Serialized as `[min_x, min_y, max_x, max_y]`; deserialization only accepts
/// normalized, non-inverted boxes.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(into = "[f64; 4]", try_from = "[f64; 4]")]
pub struct BBox {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> LabelResult<Self> {
        let edges = [min_x, min_y, max_x, max_y];
        if edges.iter().any(|v| !v.is_finite()) {
            return Err(LabelError::invalid_geometry(format!(
                "non-finite edge in {edges:?}"
            )));
        }
        if min_x > max_x || min_y > max_y {
            return Err(LabelError::invalid_geometry(format!(
                "inverted box {edges:?}"
            )));
        }
        Ok(Self {
            min_x,
            min_y,
            max_x,
            max_y,
        })
    }

    /// Box whose edges all lie in `[0, 1]`.
    pub fn normalized(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> LabelResult<Self> {
        let bbox = Self::new(min_x, min_y, max_x, max_y)?;
        if [min_x, min_y, max_x, max_y]
            .iter()
            .any(|v| !(0.0..=1.0).contains(v))
        {
            return Err(LabelError::invalid_geometry(format!(
                "box {:?} is not normalized",
                bbox.to_ltrb()
            )));
        }
        Ok(bbox)
    }

    pub fn from_pixels(rect: PixelRect, width: u32, height: u32) -> Self {
        let w = f64::from(width.max(1));
        let h = f64::from(height.max(1));
        Self {
            min_x: f64::from(rect.x0) / w,
            min_y: f64::from(rect.y0) / h,
            max_x: f64::from(rect.x1.max(rect.x0)) / w,
            max_y: f64::from(rect.y1.max(rect.y0)) / h,
        }
    }

    pub fn min_x(&self) -> f64 {
        self.min_x
    }

    pub fn min_y(&self) -> f64 {
        self.min_y
    }

    pub fn max_x(&self) -> f64 {
        self.max_x
    }

    pub fn max_y(&self) -> f64 {
        self.max_y
    }

    pub fn to_ltrb(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn width(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0)
    }

    pub fn height(&self) -> f64 {
        (self.max_y - self.min_y).max(0.0)
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn union(&self, other: &Self) -> Self {
        Self {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }

    pub fn intersection_area(&self, other: &Self) -> f64 {
        let w = self.max_x.min(other.max_x) - self.min_x.max(other.min_x);
        let h = self.max_y.min(other.max_y) - self.min_y.max(other.min_y);
        if w <= 0.0 || h <= 0.0 {
            0.0
        } else {
            w * h
        }
    }

    /// Normalized box to absolute pixel units.
    pub fn scale(&self, width: u32, height: u32) -> Self {
        let w = f64::from(width);
        let h = f64::from(height);
        Self {
            min_x: self.min_x * w,
            min_y: self.min_y * h,
            max_x: self.max_x * w,
            max_y: self.max_y * h,
        }
    }

    /// Pixel box back to normalized units.
    pub fn normalize(&self, width: u32, height: u32) -> LabelResult<Self> {
        if width == 0 || height == 0 {
            return Err(LabelError::invalid_geometry(format!(
                "cannot normalize against a {width}x{height} image"
            )));
        }
        let w = f64::from(width);
        let h = f64::from(height);
        Self::new(
            self.min_x / w,
            self.min_y / h,
            self.max_x / w,
            self.max_y / h,
        )
    }

    /// Pixel rectangle covering this normalized box, clipped to the image.
    pub fn to_pixels(&self, width: u32, height: u32) -> PixelRect {
        let snap_down = |v: f64, limit: u32| -> u32 {
            ((v * f64::from(limit)) + PIXEL_EPSILON).floor().clamp(0.0, f64::from(limit)) as u32
        };
        let snap_up = |v: f64, limit: u32| -> u32 {
            ((v * f64::from(limit)) - PIXEL_EPSILON).ceil().clamp(0.0, f64::from(limit)) as u32
        };
        let x0 = snap_down(self.min_x, width);
        let y0 = snap_down(self.min_y, height);
        PixelRect {
            x0,
            y0,
            x1: snap_up(self.max_x, width).max(x0),
            y1: snap_up(self.max_y, height).max(y0),
        }
    }

    /// Splits horizontally at `offset`, a fraction of this box's own width.
    /// The halves share the split edge and do not overlap.
    pub fn split_at(&self, offset: f64) -> LabelResult<(Self, Self)> {
        if !(offset > 0.0 && offset < 1.0) {
            return Err(LabelError::out_of_range(
                "split offset",
                offset,
                "0 < offset < 1",
            ));
        }
        let split_x = self.min_x + offset * self.width();
        let left = Self {
            max_x: split_x,
            ..*self
        };
        let right = Self {
            min_x: split_x,
            ..*self
        };
        Ok((left, right))
    }

    /// Pixel margins (left, top, right, bottom) added to the scaled box.
    /// Positive values move an edge right/down. The result must stay inside
    /// the image and keep a non-inverted shape.
    pub fn with_pixel_margins(
        &self,
        margins: [i32; 4],
        width: u32,
        height: u32,
    ) -> LabelResult<Self> {
        let scaled = self.scale(width, height);
        let moved = [
            scaled.min_x + f64::from(margins[0]),
            scaled.min_y + f64::from(margins[1]),
            scaled.max_x + f64::from(margins[2]),
            scaled.max_y + f64::from(margins[3]),
        ];
        let limits = [width, height, width, height];
        for (value, limit) in moved.iter().zip(limits) {
            if *value < -PIXEL_EPSILON || *value > f64::from(limit) + PIXEL_EPSILON {
                return Err(LabelError::out_of_range(
                    "bbox margin",
                    format!("{margins:?}"),
                    format!("edges within {width}x{height}"),
                ));
            }
        }
        let clamp = |v: f64, limit: u32| v.clamp(0.0, f64::from(limit));
        Self::new(
            clamp(moved[0], width),
            clamp(moved[1], height),
            clamp(moved[2], width),
            clamp(moved[3], height),
        )?
        .normalize(width, height)
    }

    /// Grows each edge outward while the pixel row/column just outside it
    /// contains ink. Edges that do not move keep their exact value.
    pub fn expand_to_content(&self, image: &PageImage) -> Self {
        let (width, height) = image.dimensions();
        let start = self.to_pixels(width, height);
        let mut rect = start;
        loop {
            let mut grew = false;
            if rect.x0 > 0 && image.column_has_ink(rect.x0 - 1, rect.y0, rect.y1) {
                rect.x0 -= 1;
                grew = true;
            }
            if rect.x1 < width && image.column_has_ink(rect.x1, rect.y0, rect.y1) {
                rect.x1 += 1;
                grew = true;
            }
            if rect.y0 > 0 && image.row_has_ink(rect.y0 - 1, rect.x0, rect.x1) {
                rect.y0 -= 1;
                grew = true;
            }
            if rect.y1 < height && image.row_has_ink(rect.y1, rect.x0, rect.x1) {
                rect.y1 += 1;
                grew = true;
            }
            if !grew {
                break;
            }
        }
        self.with_moved_edges(start, rect, width, height)
    }

    /// Shrinks to the tightest box around the ink inside it, then pads every
    /// side by `padding_px`, clipped to the image. Boxes without ink are
    /// returned unchanged.
    pub fn refine(&self, image: &PageImage, padding_px: u32) -> Self {
        let (width, height) = image.dimensions();
        let Some(ink) = image.ink_bounds(self.to_pixels(width, height)) else {
            return *self;
        };
        let padded = PixelRect {
            x0: ink.x0.saturating_sub(padding_px),
            y0: ink.y0.saturating_sub(padding_px),
            x1: ink.x1.saturating_add(padding_px).min(width),
            y1: ink.y1.saturating_add(padding_px).min(height),
        };
        Self::from_pixels(padded, width, height)
    }

    /// Drops blank rows from the top edge only.
    pub fn crop_top(&self, image: &PageImage) -> Self {
        let (width, height) = image.dimensions();
        let start = self.to_pixels(width, height);
        let mut rect = start;
        while rect.y0 < rect.y1 && !image.row_has_ink(rect.y0, rect.x0, rect.x1) {
            rect.y0 += 1;
        }
        if rect.y0 == rect.y1 {
            return *self;
        }
        self.with_moved_edges(start, rect, width, height)
    }

    /// Drops blank rows from the bottom edge only.
    pub fn crop_bottom(&self, image: &PageImage) -> Self {
        let (width, height) = image.dimensions();
        let start = self.to_pixels(width, height);
        let mut rect = start;
        while rect.y1 > rect.y0 && !image.row_has_ink(rect.y1 - 1, rect.x0, rect.x1) {
            rect.y1 -= 1;
        }
        if rect.y0 == rect.y1 {
            return *self;
        }
        self.with_moved_edges(start, rect, width, height)
    }

    fn with_moved_edges(&self, start: PixelRect, end: PixelRect, width: u32, height: u32) -> Self {
        let w = f64::from(width.max(1));
        let h = f64::from(height.max(1));
        let pick = |before: u32, after: u32, original: f64, scale: f64| {
            if before == after {
                original
            } else {
                f64::from(after) / scale
            }
        };
        Self {
            min_x: pick(start.x0, end.x0, self.min_x, w),
            min_y: pick(start.y0, end.y0, self.min_y, h),
            max_x: pick(start.x1, end.x1, self.max_x, w),
            max_y: pick(start.y1, end.y1, self.max_y, h),
        }
    }
}

impl From<BBox> for [f64; 4] {
    fn from(bbox: BBox) -> Self {
        bbox.to_ltrb()
    }
}

impl TryFrom<[f64; 4]> for BBox {
    type Error = LabelError;

    fn try_from(value: [f64; 4]) -> Result<Self, Self::Error> {
        Self::normalized(value[0], value[1], value[2], value[3])
    }
}
