//! Bitmap decoding job.

use reelkit_core::frame::FrameBuffer;
use reelkit_core::{Bitmap, ReelkitError, ReelkitResult};

/// Turns encoded image bytes into a [`Bitmap`]. Implementations run on the
/// worker pool, or on the blocking pool when the worker is unavailable.
pub trait BitmapDecoder: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &[u8]) -> ReelkitResult<Bitmap>;
}

/// Decodes PNG, JPEG, WebP and the other formats the `image` crate enables.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCrateDecoder;

impl BitmapDecoder for ImageCrateDecoder {
    fn name(&self) -> &'static str {
        "image"
    }

    fn decode(&self, bytes: &[u8]) -> ReelkitResult<Bitmap> {
        if bytes.is_empty() {
            return Err(ReelkitError::decode_failed("<memory>", "no bytes provided"));
        }
        let img = image::load_from_memory(bytes)
            .map_err(|e| ReelkitError::decode_failed("<memory>", e.to_string()))?;
        let rgba = img.to_rgba8();
        let (width, height) = rgba.dimensions();
        let frame = FrameBuffer::from_rgba8(width, height, rgba.into_raw())?;
        Ok(Bitmap::new(frame))
    }
}
