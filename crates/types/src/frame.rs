//! Rendered frames handed from the compositor to the device link.

use std::fmt;
use std::sync::Arc;

/// Panel resolution
pub const DISPLAY_WIDTH: u32 = 1280;
pub const DISPLAY_HEIGHT: u32 = 480;

/// An immutable RGBA8 image (straight alpha, row-major, no padding).
///
/// Cloning is cheap; pixel data is shared.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Build a frame from RGBA bytes. Returns `None` when the buffer size
    /// does not match the dimensions.
    pub fn from_rgba(sequence: u64, width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != width as usize * height as usize * 4 {
            return None;
        }
        Some(Self {
            sequence,
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// Single-color frame at panel resolution
    pub fn solid(sequence: u64, rgba: [u8; 4]) -> Self {
        let count = DISPLAY_WIDTH as usize * DISPLAY_HEIGHT as usize;
        let mut pixels = Vec::with_capacity(count * 4);
        for _ in 0..count {
            pixels.extend_from_slice(&rgba);
        }
        Self {
            sequence,
            width: DISPLAY_WIDTH,
            height: DISPLAY_HEIGHT,
            pixels: pixels.into(),
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = (y as usize * self.width as usize + x as usize) * 4;
        Some([
            self.pixels[i],
            self.pixels[i + 1],
            self.pixels[i + 2],
            self.pixels[i + 3],
        ])
    }

    /// RGB888 bytes with alpha dropped, for encoders without alpha support
    pub fn to_rgb(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.pixels.len() / 4 * 3);
        for px in self.pixels.chunks_exact(4) {
            out.extend_from_slice(&px[..3]);
        }
        out
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("bytes", &self.pixels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_rgba_checks_size() {
        assert!(Frame::from_rgba(0, 2, 2, vec![0; 16]).is_some());
        assert!(Frame::from_rgba(0, 2, 2, vec![0; 15]).is_none());
    }

    #[test]
    fn test_solid_frame() {
        let frame = Frame::solid(7, [1, 2, 3, 255]);
        assert_eq!(frame.sequence, 7);
        assert_eq!(frame.pixel(1279, 479), Some([1, 2, 3, 255]));
        assert_eq!(frame.pixel(1280, 0), None);
        assert_eq!(frame.to_rgb().len(), 1280 * 480 * 3);
    }
}
