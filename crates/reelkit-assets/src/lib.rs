//! # reelkit-assets
//!
//! Loads images for the compositor. URLs are resolved to bytes by scheme,
//! decoded on the compute service with an in-process fallback, and kept in a
//! bounded LRU cache that releases evicted resources exactly once.

pub mod cache;
pub mod decode;
pub mod loader;
pub mod resolve;
pub mod video;

pub use cache::{
    AssetCache, EntryStatus, FailureKind, LoadFailure, LoadedAsset, ReleasedEntry,
    ResourceReleaser, StandardReleaser,
};
pub use decode::{AcceleratedDecode, DecodeChain, DecodeStrategy, ImageHandle, InlineDecode};
pub use loader::AssetLoader;
pub use resolve::{
    BlobStore, MemoryBlobStore, ObjectUrls, ResolverChain, StoredBlob, TransientUrl, UrlResolver,
};
pub use video::{
    FfmpegVideoOpener, NoVideo, PlaybackDirective, VideoFeed, VideoOpener, VideoSource,
};
