use std::path::{Path, PathBuf};

use image::{DynamicImage, GrayImage, RgbImage};
use imageproc::contrast::otsu_level;

use crate::core::error::LabelResult;

/// How foreground (ink) pixels are separated from the page background.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InkThreshold {
    /// Otsu level computed once from the page histogram.
    #[default]
    Otsu,
    /// Pixels with luma at or below this value are ink.
    Fixed(u8),
}

/// Half-open pixel rectangle: `x0 <= x < x1`, `y0 <= y < y1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelRect {
    pub fn width(&self) -> u32 {
        self.x1.saturating_sub(self.x0)
    }

    pub fn height(&self) -> u32 {
        self.y1.saturating_sub(self.y0)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }
}

/// Decoded page raster plus the ink threshold used by box refinement.
///
/// Never persisted; documents only reference the image path.
#[derive(Debug, Clone)]
pub struct PageImage {
    rgb: RgbImage,
    gray: GrayImage,
    level: u8,
    path: Option<PathBuf>,
}

impl PageImage {
    pub fn open(path: &Path, threshold: InkThreshold) -> LabelResult<Self> {
        let decoded = image::open(path)?;
        let mut page = Self::from_dynamic(decoded, threshold);
        page.path = Some(path.to_path_buf());
        Ok(page)
    }

    pub fn from_dynamic(image: DynamicImage, threshold: InkThreshold) -> Self {
        let gray = image.to_luma8();
        let rgb = image.to_rgb8();
        let level = match threshold {
            InkThreshold::Otsu => otsu_level(&gray),
            InkThreshold::Fixed(level) => level,
        };
        Self {
            rgb,
            gray,
            level,
            path: None,
        }
    }

    pub fn from_gray(gray: GrayImage, threshold: InkThreshold) -> Self {
        Self::from_dynamic(DynamicImage::ImageLuma8(gray), threshold)
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.gray.dimensions()
    }

    pub fn rgb(&self) -> &RgbImage {
        &self.rgb
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn ink_level(&self) -> u8 {
        self.level
    }

    pub fn is_ink(&self, x: u32, y: u32) -> bool {
        self.gray.get_pixel(x, y).0[0] <= self.level
    }

    /// Any ink on row `y` between columns `x0..x1`.
    pub fn row_has_ink(&self, y: u32, x0: u32, x1: u32) -> bool {
        if y >= self.height() {
            return false;
        }
        (x0..x1.min(self.width())).any(|x| self.is_ink(x, y))
    }

    /// Any ink on column `x` between rows `y0..y1`.
    pub fn column_has_ink(&self, x: u32, y0: u32, y1: u32) -> bool {
        if x >= self.width() {
            return false;
        }
        (y0..y1.min(self.height())).any(|y| self.is_ink(x, y))
    }

    /// Tightest rectangle inside `area` containing every ink pixel of `area`.
    pub fn ink_bounds(&self, area: PixelRect) -> Option<PixelRect> {
        let x1 = area.x1.min(self.width());
        let y1 = area.y1.min(self.height());
        let mut bounds: Option<PixelRect> = None;
        for y in area.y0..y1 {
            for x in area.x0..x1 {
                if !self.is_ink(x, y) {
                    continue;
                }
                bounds = Some(match bounds {
                    None => PixelRect {
                        x0: x,
                        y0: y,
                        x1: x + 1,
                        y1: y + 1,
                    },
                    Some(b) => PixelRect {
                        x0: b.x0.min(x),
                        y0: b.y0.min(y),
                        x1: b.x1.max(x + 1),
                        y1: b.y1.max(y + 1),
                    },
                });
            }
        }
        bounds
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::page_with_ink;
    use super::*;

    #[test]
    fn finds_ink_bounds() {
        let page = page_with_ink(20, 10, &[(3, 2, 6, 5), (10, 4, 12, 8)]);
        let bounds = page
            .ink_bounds(PixelRect {
                x0: 0,
                y0: 0,
                x1: 20,
                y1: 10,
            })
            .expect("page has ink");
        assert_eq!(
            bounds,
            PixelRect {
                x0: 3,
                y0: 2,
                x1: 12,
                y1: 8
            }
        );
    }

    #[test]
    fn blank_area_has_no_bounds() {
        let page = page_with_ink(20, 10, &[(3, 2, 6, 5)]);
        let area = PixelRect {
            x0: 10,
            y0: 0,
            x1: 20,
            y1: 10,
        };
        assert!(page.ink_bounds(area).is_none());
        assert!(!page.row_has_ink(3, 10, 20));
        assert!(page.column_has_ink(4, 0, 10));
    }

    #[test]
    fn otsu_separates_black_text() {
        let mut page = page_with_ink(8, 8, &[(2, 2, 4, 4)]);
        page = PageImage::from_dynamic(
            image::DynamicImage::ImageRgb8(page.rgb().clone()),
            InkThreshold::Otsu,
        );
        assert!(page.is_ink(2, 2));
        assert!(!page.is_ink(6, 6));
    }
}
