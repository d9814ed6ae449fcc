//! The asset loader: cache lookup, URL resolution and decode fallback.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use reelkit_compute::{ComputeService, Priority};
use reelkit_core::{hash_bytes, AssetRef, ReelkitConfig, ReelkitError, ReelkitResult};

use crate::cache::{AssetCache, Claim, LoadFailure, LoadedAsset, Lookup};
use crate::decode::{DecodeChain, ImageHandle};
use crate::resolve::{BlobStore, ObjectUrls, ResolverChain};
use crate::video::{
    needs_spooling, open_spooled, FfmpegVideoOpener, PlaybackDirective, VideoOpener, VideoSource,
};

/// Loads assets into decoded image handles. Clones share the cache.
#[derive(Clone)]
pub struct AssetLoader {
    inner: Arc<LoaderInner>,
}

struct LoaderInner {
    cache: Arc<AssetCache>,
    resolvers: ResolverChain,
    decoders: DecodeChain,
    video: Arc<dyn VideoOpener>,
}

impl AssetLoader {
    pub fn new(cache: Arc<AssetCache>, resolvers: ResolverChain, decoders: DecodeChain) -> Self {
        Self {
            inner: Arc::new(LoaderInner {
                cache,
                resolvers,
                decoders,
                video: Arc::new(FfmpegVideoOpener::default()),
            }),
        }
    }

    /// The standard resolver and decoder chains over a fresh cache.
    pub fn standard(
        config: &ReelkitConfig,
        compute: ComputeService,
        blobs: Arc<dyn BlobStore>,
    ) -> Self {
        let cache = Arc::new(AssetCache::new(&config.cache));
        let resolvers = ResolverChain::standard(blobs, ObjectUrls::new());
        Self::new(cache, resolvers, DecodeChain::standard(compute))
    }

    /// Replace the video opener. Only valid before the loader is cloned.
    pub fn with_video_opener(mut self, opener: Arc<dyn VideoOpener>) -> Self {
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.video = opener,
            None => warn!("video opener not replaced: loader already shared"),
        }
        self
    }

    pub fn cache(&self) -> &Arc<AssetCache> {
        &self.inner.cache
    }

    /// Return a decoded handle for `url`.
    ///
    /// A cached handle is returned immediately. A URL that failed before fails
    /// fast with `AssetUnavailable`. Concurrent loads of the same URL share a
    /// single attempt.
    pub async fn load(&self, url: &str, priority: Priority) -> ReelkitResult<ImageHandle> {
        if url.is_empty() {
            return Err(ReelkitError::InvalidArgument("no URL provided".to_string()));
        }
        let cache = &self.inner.cache;
        loop {
            match cache.begin(url) {
                Lookup::Hit(handle) => return Ok(handle),
                Lookup::Failed(failure) => {
                    return Err(ReelkitError::asset_unavailable(
                        url,
                        format!("previously failed to load: {}", failure.reason),
                    ))
                }
                Lookup::Wait(settled) => match settled.await {
                    Ok(Ok(handle)) => return Ok(handle),
                    Ok(Err(failure)) => return Err(failure.to_error(url)),
                    // the load we waited on was abandoned; try again
                    Err(_) => continue,
                },
                Lookup::Claimed(claim) => {
                    let guard = ClaimGuard {
                        cache: Arc::clone(cache),
                        claim: Some(claim),
                    };
                    let outcome = self.fetch(url, priority).await;
                    return cache.complete(guard.disarm(), outcome);
                }
            }
        }
    }

    async fn fetch(&self, url: &str, priority: Priority) -> Result<LoadedAsset, LoadFailure> {
        let resolved = self
            .inner
            .resolvers
            .resolve(url)
            .await
            .map_err(|e| LoadFailure::from_error(&e))?;
        debug!(url, bytes = resolved.bytes.len(), digest = %hash_bytes(&resolved.bytes).short(), "asset resolved");
        let handle = self
            .inner
            .decoders
            .decode(url, resolved.bytes, priority)
            .await
            .map_err(|e| LoadFailure::from_error(&e))?;
        debug!(url, decoded_by = handle.decoded_by(), "asset loaded");
        Ok(LoadedAsset {
            handle,
            transient: resolved.transient,
        })
    }

    /// Start a low-priority load in the background and forget about it.
    /// Failures are logged, never returned. Without a tokio runtime this is a no-op.
    pub fn preload(&self, url: impl Into<String>) -> Option<JoinHandle<()>> {
        let url = url.into();
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(handle) => handle,
            Err(_) => {
                debug!(url = %url, "preload skipped: no runtime");
                return None;
            }
        };
        let loader = self.clone();
        Some(runtime.spawn(async move {
            if let Err(e) = loader.load(&url, Priority::Low).await {
                debug!(url = %url, "preload skipped: {}", e);
            }
        }))
    }

    /// Open a live video source for `asset` with the given playback directive.
    ///
    /// `local://`, `blob:` and `data:` videos are resolved like images and
    /// their bytes spooled to a temporary file for the opener. Other URLs go
    /// to the opener as they are.
    pub async fn open_video(
        &self,
        asset: &AssetRef,
        directive: PlaybackDirective,
    ) -> ReelkitResult<Box<dyn VideoSource>> {
        let opener = Arc::clone(&self.inner.video);
        let url = asset.url().to_string();
        let opened = if needs_spooling(&url) {
            let resolved = self.inner.resolvers.resolve(&url).await?;
            debug!(id = %asset.id(), bytes = resolved.bytes.len(), "spooling video");
            tokio::task::spawn_blocking(move || open_spooled(opener.as_ref(), &resolved.bytes, directive))
                .await
        } else {
            tokio::task::spawn_blocking(move || opener.open(&url, directive)).await
        };
        opened.map_err(|e| ReelkitError::Other(format!("video open aborted: {}", e)))?
    }
}

impl std::fmt::Debug for AssetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLoader")
            .field("cache", &self.inner.cache)
            .field("decoders", &self.inner.decoders.len())
            .finish()
    }
}

/// Abandons the pending entry if the load future is dropped mid-flight.
struct ClaimGuard {
    cache: Arc<AssetCache>,
    claim: Option<Claim>,
}

impl ClaimGuard {
    fn disarm(mut self) -> Claim {
        // always Some until disarmed or dropped
        match self.claim.take() {
            Some(claim) => claim,
            None => unreachable!("claim guard disarmed twice"),
        }
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if let Some(claim) = self.claim.take() {
            debug!(url = claim.url(), "load dropped before completion");
            self.cache.abandon(claim);
        }
    }
}
