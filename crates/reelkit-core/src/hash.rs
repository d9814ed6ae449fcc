//! SHA-256 fingerprints for frames and raw blobs.
//!
//! Rendering a given progress value must always produce the same pixels, so
//! frame digests double as a cheap determinism check.

use sha2::{Digest, Sha256};

use crate::frame::FrameBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 32]);

impl ContentHash {
    pub fn to_hex(&self) -> String {
        self.0.iter().map(|b| format!("{:02x}", b)).collect()
    }

    /// First 12 hex characters, for log lines.
    pub fn short(&self) -> String {
        let mut hex = self.to_hex();
        hex.truncate(12);
        hex
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl std::fmt::Display for ContentHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

fn finish(hasher: Sha256) -> ContentHash {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&hasher.finalize());
    ContentHash(bytes)
}

/// Digest of a frame's dimensions, format and pixels.
pub fn hash_frame(frame: &FrameBuffer) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(frame.width.to_le_bytes());
    hasher.update(frame.height.to_le_bytes());
    hasher.update([frame.format as u8]);
    hasher.update(&frame.data);
    finish(hasher)
}

/// Digest of an undecoded blob.
pub fn hash_bytes(bytes: &[u8]) -> ContentHash {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    finish(hasher)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Color;

    #[test]
    fn test_same_pixels_same_hash() {
        let a = FrameBuffer::solid(10, 10, &Color::WHITE);
        let b = FrameBuffer::solid(10, 10, &Color::WHITE);
        assert_eq!(hash_frame(&a), hash_frame(&b));
    }

    #[test]
    fn test_size_is_part_of_hash() {
        // 4x1 and 2x2 of the same color share identical bytes
        let a = FrameBuffer::solid(4, 1, &Color::BLACK);
        let b = FrameBuffer::solid(2, 2, &Color::BLACK);
        assert_eq!(a.data, b.data);
        assert_ne!(hash_frame(&a), hash_frame(&b));
    }

    #[test]
    fn test_known_blob_digest() {
        let h = hash_bytes(b"abc");
        assert_eq!(
            h.to_hex(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(h.short(), "ba7816bf8f01");
    }
}
