//! URL resolution: turning an asset URL into raw encoded bytes.
//!
//! Each scheme has its own [`UrlResolver`]. A [`ResolverChain`] picks the
//! first resolver that accepts a URL and follows redirects, which is how a
//! local-store entry holding a URL string gets resolved a second time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use base64::Engine;
use dashmap::DashMap;
use tracing::debug;

use reelkit_core::{ReelkitError, ReelkitResult};

const MAX_REDIRECTS: usize = 4;

/// What the local blob store holds for an id.
#[derive(Debug, Clone)]
pub enum StoredBlob {
    Bytes(Arc<[u8]>),
    /// A URL to resolve again (usually a data URL or a remote address).
    Url(String),
}

/// Source of `local://<id>` blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn get(&self, id: &str) -> ReelkitResult<Option<StoredBlob>>;
}

/// In-memory blob store.
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, StoredBlob>,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_bytes(&self, id: impl Into<String>, bytes: impl Into<Arc<[u8]>>) {
        self.blobs.insert(id.into(), StoredBlob::Bytes(bytes.into()));
    }

    pub fn insert_url(&self, id: impl Into<String>, url: impl Into<String>) {
        self.blobs.insert(id.into(), StoredBlob::Url(url.into()));
    }

    pub fn remove(&self, id: &str) -> bool {
        self.blobs.remove(id).is_some()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn get(&self, id: &str) -> ReelkitResult<Option<StoredBlob>> {
        Ok(self.blobs.get(id).map(|b| b.value().clone()))
    }
}

/// Registry of short-lived `blob:` URLs minted for resolved local blobs.
#[derive(Debug, Default)]
pub struct ObjectUrls {
    next: AtomicU64,
    live: DashMap<String, Arc<[u8]>>,
}

impl ObjectUrls {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mint a URL for `bytes`. It stays resolvable until revoked.
    pub fn create(self: &Arc<Self>, bytes: Arc<[u8]>) -> TransientUrl {
        let n = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let url = format!("blob:reelkit/{}", n);
        self.live.insert(url.clone(), bytes);
        TransientUrl {
            url,
            registry: Arc::downgrade(self),
            revoked: false,
        }
    }

    pub fn get(&self, url: &str) -> Option<Arc<[u8]>> {
        self.live.get(url).map(|b| Arc::clone(b.value()))
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }
}

/// A minted `blob:` URL. Revoked explicitly, or when dropped.
#[derive(Debug)]
pub struct TransientUrl {
    url: String,
    registry: Weak<ObjectUrls>,
    revoked: bool,
}

impl TransientUrl {
    pub fn as_str(&self) -> &str {
        &self.url
    }

    pub fn revoke(mut self) {
        self.revoke_in_place();
    }

    fn revoke_in_place(&mut self) {
        if self.revoked {
            return;
        }
        self.revoked = true;
        if let Some(registry) = self.registry.upgrade() {
            registry.live.remove(&self.url);
        }
    }
}

impl Drop for TransientUrl {
    fn drop(&mut self) {
        self.revoke_in_place();
    }
}

/// Bytes for one URL plus any transient resource minted along the way.
#[derive(Debug)]
pub struct Resolved {
    pub bytes: Arc<[u8]>,
    pub transient: Option<TransientUrl>,
}

impl Resolved {
    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            bytes: bytes.into(),
            transient: None,
        }
    }
}

#[derive(Debug)]
pub enum Resolution {
    Bytes(Resolved),
    Redirect(String),
}

/// One URL resolution strategy.
#[async_trait]
pub trait UrlResolver: Send + Sync {
    fn name(&self) -> &'static str;

    fn accepts(&self, url: &str) -> bool;

    async fn resolve(&self, url: &str) -> ReelkitResult<Resolution>;
}

/// `local://<id>` through a [`BlobStore`].
pub struct LocalStoreResolver {
    store: Arc<dyn BlobStore>,
    object_urls: Arc<ObjectUrls>,
}

impl LocalStoreResolver {
    pub fn new(store: Arc<dyn BlobStore>, object_urls: Arc<ObjectUrls>) -> Self {
        Self { store, object_urls }
    }
}

#[async_trait]
impl UrlResolver for LocalStoreResolver {
    fn name(&self) -> &'static str {
        "local"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with("local://")
    }

    async fn resolve(&self, url: &str) -> ReelkitResult<Resolution> {
        let id = url.trim_start_matches("local://");
        match self.store.get(id).await? {
            Some(StoredBlob::Bytes(bytes)) => {
                let transient = self.object_urls.create(Arc::clone(&bytes));
                Ok(Resolution::Bytes(Resolved {
                    bytes,
                    transient: Some(transient),
                }))
            }
            Some(StoredBlob::Url(next)) => Ok(Resolution::Redirect(next)),
            None => Err(ReelkitError::asset_unavailable(url, "not in local store")),
        }
    }
}

/// `blob:` URLs previously minted by [`ObjectUrls`].
pub struct ObjectUrlResolver {
    object_urls: Arc<ObjectUrls>,
}

impl ObjectUrlResolver {
    pub fn new(object_urls: Arc<ObjectUrls>) -> Self {
        Self { object_urls }
    }
}

#[async_trait]
impl UrlResolver for ObjectUrlResolver {
    fn name(&self) -> &'static str {
        "object-url"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with("blob:")
    }

    async fn resolve(&self, url: &str) -> ReelkitResult<Resolution> {
        self.object_urls
            .get(url)
            .map(|bytes| Resolution::Bytes(Resolved::bytes(bytes)))
            .ok_or_else(|| ReelkitError::asset_unavailable(url, "object URL was revoked"))
    }
}

/// Inline `data:` URLs, base64 or percent-encoded.
#[derive(Debug, Default)]
pub struct DataUrlResolver;

impl DataUrlResolver {
    pub fn decode(url: &str) -> ReelkitResult<Vec<u8>> {
        let body = url
            .strip_prefix("data:")
            .ok_or_else(|| ReelkitError::asset_unavailable(url, "not a data URL"))?;
        let (meta, payload) = body
            .split_once(',')
            .ok_or_else(|| ReelkitError::asset_unavailable(url, "data URL has no payload"))?;
        if meta.split(';').any(|p| p.eq_ignore_ascii_case("base64")) {
            let compact: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
            base64::engine::general_purpose::STANDARD
                .decode(compact.as_bytes())
                .map_err(|e| ReelkitError::asset_unavailable(short(url), e.to_string()))
        } else {
            Ok(urlencoding::decode_binary(payload.as_bytes()).into_owned())
        }
    }
}

#[async_trait]
impl UrlResolver for DataUrlResolver {
    fn name(&self) -> &'static str {
        "data"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with("data:")
    }

    async fn resolve(&self, url: &str) -> ReelkitResult<Resolution> {
        Ok(Resolution::Bytes(Resolved::bytes(Self::decode(url)?)))
    }
}

/// `file://` URLs and bare filesystem paths.
#[derive(Debug, Default)]
pub struct FileResolver;

impl FileResolver {
    fn path_of(url: &str) -> ReelkitResult<PathBuf> {
        if url.starts_with("file://") {
            url::Url::parse(url)
                .ok()
                .and_then(|u| u.to_file_path().ok())
                .ok_or_else(|| ReelkitError::asset_unavailable(url, "malformed file URL"))
        } else {
            Ok(PathBuf::from(url))
        }
    }
}

#[async_trait]
impl UrlResolver for FileResolver {
    fn name(&self) -> &'static str {
        "file"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with("file://") || !url.contains(':') || looks_like_windows_path(url)
    }

    async fn resolve(&self, url: &str) -> ReelkitResult<Resolution> {
        let path = Self::path_of(url)?;
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| ReelkitError::asset_unavailable(url, e.to_string()))?;
        Ok(Resolution::Bytes(Resolved::bytes(bytes)))
    }
}

fn looks_like_windows_path(url: &str) -> bool {
    let b = url.as_bytes();
    b.len() > 2 && b[0].is_ascii_alphabetic() && b[1] == b':' && (b[2] == b'\\' || b[2] == b'/')
}

/// Remote `http(s)://` resources.
#[derive(Debug, Clone, Default)]
pub struct HttpResolver {
    client: reqwest::Client,
}

impl HttpResolver {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl UrlResolver for HttpResolver {
    fn name(&self) -> &'static str {
        "http"
    }

    fn accepts(&self, url: &str) -> bool {
        url.starts_with("http://") || url.starts_with("https://")
    }

    async fn resolve(&self, url: &str) -> ReelkitResult<Resolution> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| ReelkitError::asset_unavailable(url, e.to_string()))?;
        let bytes = res
            .bytes()
            .await
            .map_err(|e| ReelkitError::asset_unavailable(url, e.to_string()))?;
        Ok(Resolution::Bytes(Resolved::bytes(bytes.as_ref())))
    }
}

/// Ordered resolvers, first match wins.
#[derive(Clone, Default)]
pub struct ResolverChain {
    resolvers: Vec<Arc<dyn UrlResolver>>,
}

impl ResolverChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// local, blob, data, file and http resolvers in that order.
    pub fn standard(store: Arc<dyn BlobStore>, object_urls: Arc<ObjectUrls>) -> Self {
        Self::new()
            .with(LocalStoreResolver::new(store, Arc::clone(&object_urls)))
            .with(ObjectUrlResolver::new(object_urls))
            .with(DataUrlResolver)
            .with(FileResolver)
            .with(HttpResolver::default())
    }

    pub fn with(mut self, resolver: impl UrlResolver + 'static) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Resolve `url` to bytes. Every failure is reported as `AssetUnavailable`.
    pub async fn resolve(&self, url: &str) -> ReelkitResult<Resolved> {
        let mut current = url.to_string();
        for _ in 0..=MAX_REDIRECTS {
            let resolver = self
                .resolvers
                .iter()
                .find(|r| r.accepts(&current))
                .ok_or_else(|| {
                    ReelkitError::asset_unavailable(short(&current), "no resolver for URL scheme")
                })?;
            debug!(resolver = resolver.name(), url = %short(&current), "resolving asset");
            match resolver.resolve(&current).await {
                Ok(Resolution::Bytes(resolved)) => return Ok(resolved),
                Ok(Resolution::Redirect(next)) => current = next,
                Err(e @ ReelkitError::AssetUnavailable { .. }) => return Err(e),
                Err(e) => return Err(ReelkitError::asset_unavailable(short(url), e.to_string())),
            }
        }
        Err(ReelkitError::asset_unavailable(
            short(url),
            "too many redirects",
        ))
    }
}

/// Data URLs can be megabytes long; keep errors and logs readable.
fn short(url: &str) -> String {
    const LIMIT: usize = 64;
    match url.char_indices().nth(LIMIT) {
        Some((idx, _)) => format!("{}...", &url[..idx]),
        None => url.to_string(),
    }
}
