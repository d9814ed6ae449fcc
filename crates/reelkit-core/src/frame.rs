use serde::{Deserialize, Serialize};

use crate::color::Color;
use crate::error::{ReelkitError, ReelkitResult};

/// Pixel format of a frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PixelFormat {
    /// 8-bit RGBA (4 bytes per pixel).
    Rgba8,
    /// 8-bit RGB (3 bytes per pixel, no alpha).
    Rgb8,
}

impl PixelFormat {
    /// Bytes per pixel for this format.
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgba8 => 4,
            PixelFormat::Rgb8 => 3,
        }
    }
}

/// A raw pixel buffer: a decoded source image, a video frame or a rendered
/// transition frame. Row 0 is the top of the image.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameBuffer {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
}

impl FrameBuffer {
    /// Create a zeroed frame buffer (transparent black).
    pub fn new(width: u32, height: u32, format: PixelFormat) -> Self {
        let size = (width as usize) * (height as usize) * format.bytes_per_pixel();
        Self {
            data: vec![0u8; size],
            width,
            height,
            format,
        }
    }

    /// Wrap existing RGBA8 pixels, checking the buffer length.
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> ReelkitResult<Self> {
        let expected = (width as usize) * (height as usize) * 4;
        if data.len() != expected {
            return Err(ReelkitError::InvalidArgument(format!(
                "expected {} bytes for {}x{} RGBA, got {}",
                expected,
                width,
                height,
                data.len()
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            format: PixelFormat::Rgba8,
        })
    }

    /// Create a frame buffer filled with a solid color.
    pub fn solid(width: u32, height: u32, color: &Color) -> Self {
        let pixel = color.to_rgba8();
        let data = pixel
            .iter()
            .copied()
            .cycle()
            .take((width as usize) * (height as usize) * 4)
            .collect();
        Self {
            data,
            width,
            height,
            format: PixelFormat::Rgba8,
        }
    }

    /// The "asset failed" placeholder: a two-tone checkerboard with `cell`-pixel squares.
    pub fn checkerboard(width: u32, height: u32, cell: u32) -> Self {
        let cell = cell.max(1);
        let light = Color::PLACEHOLDER_LIGHT.to_rgba8();
        let dark = Color::PLACEHOLDER_DARK.to_rgba8();
        let mut frame = Self::new(width, height, PixelFormat::Rgba8);
        for (i, px) in frame.data.chunks_exact_mut(4).enumerate() {
            let x = (i as u32) % width;
            let y = (i as u32) / width;
            let even = ((x / cell) + (y / cell)) % 2 == 0;
            px.copy_from_slice(if even { &light } else { &dark });
        }
        frame
    }

    pub fn pixel_count(&self) -> usize {
        (self.width as usize) * (self.height as usize)
    }

    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Get the RGBA value at a pixel coordinate. Returns None if out of bounds.
    pub fn get_pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * bpp;
        let px = &self.data[offset..offset + bpp];
        Some(match self.format {
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Rgb8 => [px[0], px[1], px[2], 255],
        })
    }

    /// Set the RGBA value at a pixel coordinate. No-op if out of bounds.
    pub fn set_pixel(&mut self, x: u32, y: u32, rgba: [u8; 4]) {
        if x >= self.width || y >= self.height {
            return;
        }
        let bpp = self.format.bytes_per_pixel();
        let offset = ((y as usize) * (self.width as usize) + (x as usize)) * bpp;
        self.data[offset..offset + bpp].copy_from_slice(&rgba[..bpp]);
    }

    /// Convert to RGBA8, copying. RGB sources get an opaque alpha channel.
    pub fn to_rgba8(&self) -> FrameBuffer {
        match self.format {
            PixelFormat::Rgba8 => self.clone(),
            PixelFormat::Rgb8 => {
                let mut data = Vec::with_capacity(self.pixel_count() * 4);
                for px in self.data.chunks_exact(3) {
                    data.extend_from_slice(&[px[0], px[1], px[2], 255]);
                }
                FrameBuffer {
                    data,
                    width: self.width,
                    height: self.height,
                    format: PixelFormat::Rgba8,
                }
            }
        }
    }

    /// Largest per-channel difference against another buffer of the same size.
    /// Returns None when dimensions differ.
    pub fn max_channel_diff(&self, other: &FrameBuffer) -> Option<u8> {
        if self.width != other.width || self.height != other.height {
            return None;
        }
        let a = self.to_rgba8();
        let b = other.to_rgba8();
        Some(
            a.data
                .iter()
                .zip(b.data.iter())
                .map(|(x, y)| x.abs_diff(*y))
                .max()
                .unwrap_or(0),
        )
    }
}
