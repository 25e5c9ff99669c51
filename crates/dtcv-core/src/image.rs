//! RGB pixel buffers, display regions and lamp luminance

use serde::{Deserialize, Serialize};

/// Default luminance above which a lamp counts as lit
pub const DEFAULT_LAMP_THRESHOLD: f32 = 100.0;

/// A rectangle in frame pixel coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// Row-major RGB8 frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl PixelBuffer {
    /// Wrap raw RGB8 bytes; `None` if the length does not match the dimensions
    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Option<Self> {
        (data.len() == width as usize * height as usize * 3).then_some(Self {
            width,
            height,
            data,
        })
    }

    /// A frame filled with one color
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * 3)
            .collect();
        Self {
            width,
            height,
            data,
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.data[i], self.data[i + 1], self.data[i + 2]])
    }

    /// Paint a rectangle (clipped to the frame)
    pub fn fill_region(&mut self, region: Region, rgb: [u8; 3]) {
        let x_end = region.x.saturating_add(region.width).min(self.width);
        let y_end = region.y.saturating_add(region.height).min(self.height);
        for y in region.y..y_end {
            for x in region.x..x_end {
                let i = (y as usize * self.width as usize + x as usize) * 3;
                self.data[i..i + 3].copy_from_slice(&rgb);
            }
        }
    }

    pub fn contains(&self, region: &Region) -> bool {
        !region.is_empty()
            && region.x.checked_add(region.width).is_some_and(|r| r <= self.width)
            && region.y.checked_add(region.height).is_some_and(|b| b <= self.height)
    }

    /// Copy a region into a new buffer; `None` if it leaves the frame
    pub fn crop(&self, region: &Region) -> Option<PixelBuffer> {
        if !self.contains(region) {
            return None;
        }
        let row_len = region.width as usize * 3;
        let mut data = Vec::with_capacity(row_len * region.height as usize);
        for y in region.y..region.y + region.height {
            let start = (y as usize * self.width as usize + region.x as usize) * 3;
            data.extend_from_slice(&self.data[start..start + row_len]);
        }
        Some(PixelBuffer {
            width: region.width,
            height: region.height,
            data,
        })
    }

    /// Mean luminance (0.299R + 0.587G + 0.114B)
    pub fn mean_luminance(&self) -> f32 {
        let pixels = self.data.len() / 3;
        if pixels == 0 {
            return 0.0;
        }
        let total: f64 = self
            .data
            .chunks_exact(3)
            .map(|p| 0.299 * p[0] as f64 + 0.587 * p[1] as f64 + 0.114 * p[2] as f64)
            .sum();
        (total / pixels as f64) as f32
    }
}

/// Whether a lamp region is lit
pub fn lamp_on(region: &PixelBuffer, threshold: f32) -> bool {
    region.mean_luminance() > threshold
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgb_checks_length() {
        assert!(PixelBuffer::from_rgb(2, 2, vec![0; 12]).is_some());
        assert!(PixelBuffer::from_rgb(2, 2, vec![0; 11]).is_none());
    }

    #[test]
    fn test_crop_copies_region() {
        let mut frame = PixelBuffer::filled(10, 10, [0, 0, 0]);
        frame.fill_region(Region::new(2, 3, 2, 2), [255, 255, 255]);

        let crop = frame.crop(&Region::new(2, 3, 2, 2)).unwrap();
        assert_eq!(crop.width(), 2);
        assert_eq!(crop.pixel(1, 1), Some([255, 255, 255]));

        // Mutating the source afterwards leaves the crop untouched
        frame.fill_region(Region::new(0, 0, 10, 10), [0, 0, 0]);
        assert_eq!(crop.pixel(0, 0), Some([255, 255, 255]));
    }

    #[test]
    fn test_crop_outside_frame() {
        let frame = PixelBuffer::filled(10, 10, [0, 0, 0]);
        assert!(frame.crop(&Region::new(8, 8, 5, 5)).is_none());
        assert!(frame.crop(&Region::new(0, 0, 0, 5)).is_none());
        assert!(frame.crop(&Region::new(u32::MAX, 0, 2, 2)).is_none());
    }

    #[test]
    fn test_luminance_threshold() {
        let amber = PixelBuffer::filled(4, 4, [255, 191, 0]);
        let dark = PixelBuffer::filled(4, 4, [20, 20, 20]);
        assert!((dark.mean_luminance() - 20.0).abs() < 0.01);
        assert!(lamp_on(&amber, DEFAULT_LAMP_THRESHOLD));
        assert!(!lamp_on(&dark, DEFAULT_LAMP_THRESHOLD));
    }
}
