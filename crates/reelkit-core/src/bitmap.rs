//! Decoded, upload-ready bitmap handles.
//!
//! A [`Bitmap`] is cheap to clone: clones share the same pixel storage, so a
//! renderer that still holds a handle after the cache evicts the entry keeps
//! reading valid pixels until it drops its clone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::frame::FrameBuffer;

static NEXT_BITMAP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a decoded bitmap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BitmapId(u64);

impl BitmapId {
    fn next() -> Self {
        Self(NEXT_BITMAP_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for BitmapId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "bitmap#{}", self.0)
    }
}

/// An opaque decoded image in RGBA8.
#[derive(Debug, Clone)]
pub struct Bitmap {
    id: BitmapId,
    frame: Arc<FrameBuffer>,
}

impl Bitmap {
    /// Wrap a frame buffer; non-RGBA formats are converted first.
    pub fn new(frame: FrameBuffer) -> Self {
        let frame = match frame.format {
            crate::frame::PixelFormat::Rgba8 => frame,
            _ => frame.to_rgba8(),
        };
        Self {
            id: BitmapId::next(),
            frame: Arc::new(frame),
        }
    }

    pub fn id(&self) -> BitmapId {
        self.id
    }

    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    /// Shared pixel storage, for uploads that outlive this handle.
    pub fn shared_frame(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.frame)
    }

    /// Number of live handles sharing this bitmap's pixels.
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.frame)
    }
}

impl PartialEq for Bitmap {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Bitmap {}
