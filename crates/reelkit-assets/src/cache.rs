//! The bounded asset cache.
//!
//! One entry per URL. An entry starts `Pending` when a load claims it and
//! resolves to `Loaded` or `Failed`. When the number of resolved entries
//! exceeds the bound, the least recently accessed share of them is evicted
//! and each evicted entry's resources are released exactly once, outside the
//! cache lock.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use reelkit_core::config::CacheConfig;
use reelkit_core::{ReelkitError, ReelkitResult};

use crate::decode::ImageHandle;
use crate::resolve::TransientUrl;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Pending,
    Loaded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The URL could not be resolved to bytes.
    Unavailable,
    /// Bytes resolved but every decoder refused them.
    Decode,
}

/// Why a load failed, kept on the entry so later lookups fail fast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadFailure {
    pub kind: FailureKind,
    pub reason: String,
}

impl LoadFailure {
    pub fn from_error(err: &ReelkitError) -> Self {
        match err {
            ReelkitError::AssetUnavailable { reason, .. } => Self {
                kind: FailureKind::Unavailable,
                reason: reason.clone(),
            },
            ReelkitError::DecodeFailed { reason, .. } => Self {
                kind: FailureKind::Decode,
                reason: reason.clone(),
            },
            other => Self {
                kind: FailureKind::Unavailable,
                reason: other.to_string(),
            },
        }
    }

    pub fn to_error(&self, url: &str) -> ReelkitError {
        match self.kind {
            FailureKind::Unavailable => ReelkitError::asset_unavailable(url, self.reason.clone()),
            FailureKind::Decode => ReelkitError::decode_failed(url, self.reason.clone()),
        }
    }
}

/// A successfully loaded asset and the transient resources minted for it.
#[derive(Debug)]
pub struct LoadedAsset {
    pub handle: ImageHandle,
    pub transient: Option<TransientUrl>,
}

type Settled = Result<ImageHandle, LoadFailure>;

/// Resources of an entry leaving the cache.
#[derive(Debug)]
pub struct ReleasedEntry {
    pub url: String,
    pub status: EntryStatus,
    pub element: Option<ImageHandle>,
    pub transient: Option<TransientUrl>,
}

/// Called once for every resolved entry that leaves the cache.
pub trait ResourceReleaser: Send + Sync {
    fn release(&self, entry: ReleasedEntry);
}

/// Revokes the entry's transient URL and drops the cache's bitmap handle.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardReleaser;

impl ResourceReleaser for StandardReleaser {
    fn release(&self, entry: ReleasedEntry) {
        debug!(url = %entry.url, status = ?entry.status, "releasing cache entry");
        if let Some(transient) = entry.transient {
            transient.revoke();
        }
    }
}

/// Result of [`AssetCache::begin`].
pub enum Lookup {
    Hit(ImageHandle),
    /// An earlier attempt failed; no retry until the entry is invalidated or evicted.
    Failed(LoadFailure),
    /// Another load of this URL is in flight. The receiver closes without a
    /// value if that load is abandoned.
    Wait(oneshot::Receiver<Settled>),
    /// The caller now owns the pending entry and must `complete` or `abandon` it.
    Claimed(Claim),
}

/// Ownership of a pending entry.
#[derive(Debug, PartialEq, Eq)]
pub struct Claim {
    url: String,
    token: u64,
}

impl Claim {
    pub fn url(&self) -> &str {
        &self.url
    }
}

enum Slot {
    Pending {
        token: u64,
        waiters: Vec<oneshot::Sender<Settled>>,
    },
    Loaded {
        handle: ImageHandle,
        transient: Option<TransientUrl>,
    },
    Failed(LoadFailure),
}

struct CacheEntry {
    slot: Slot,
    last_access: u64,
}

impl CacheEntry {
    fn status(&self) -> EntryStatus {
        match self.slot {
            Slot::Pending { .. } => EntryStatus::Pending,
            Slot::Loaded { .. } => EntryStatus::Loaded,
            Slot::Failed(_) => EntryStatus::Failed,
        }
    }

    fn into_released(self, url: String) -> Option<ReleasedEntry> {
        match self.slot {
            Slot::Pending { .. } => None,
            Slot::Loaded { handle, transient } => Some(ReleasedEntry {
                url,
                status: EntryStatus::Loaded,
                element: Some(handle),
                transient,
            }),
            Slot::Failed(_) => Some(ReleasedEntry {
                url,
                status: EntryStatus::Failed,
                element: None,
                transient: None,
            }),
        }
    }
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    /// Logical clock for recency.
    tick: u64,
    next_token: u64,
}

impl CacheState {
    fn touch(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    fn resolved_len(&self) -> usize {
        self.entries
            .values()
            .filter(|e| !matches!(e.slot, Slot::Pending { .. }))
            .count()
    }
}

pub struct AssetCache {
    state: Mutex<CacheState>,
    max_entries: usize,
    evict_fraction: f64,
    releaser: Arc<dyn ResourceReleaser>,
}

impl AssetCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_releaser(config, Arc::new(StandardReleaser))
    }

    pub fn with_releaser(config: &CacheConfig, releaser: Arc<dyn ResourceReleaser>) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            max_entries: config.max_entries.max(1),
            evict_fraction: config.evict_fraction,
            releaser,
        }
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    /// Look `url` up, touching its recency. On a miss the caller receives a
    /// [`Claim`] and the entry becomes `Pending`.
    pub fn begin(&self, url: &str) -> Lookup {
        let mut state = self.state.lock();
        let tick = state.touch();
        if let Some(entry) = state.entries.get_mut(url) {
            entry.last_access = tick;
            return match &mut entry.slot {
                Slot::Loaded { handle, .. } => Lookup::Hit(handle.clone()),
                Slot::Failed(failure) => Lookup::Failed(failure.clone()),
                Slot::Pending { waiters, .. } => {
                    let (tx, rx) = oneshot::channel();
                    waiters.push(tx);
                    Lookup::Wait(rx)
                }
            };
        }

        state.next_token += 1;
        let token = state.next_token;
        state.entries.insert(
            url.to_string(),
            CacheEntry {
                slot: Slot::Pending {
                    token,
                    waiters: Vec::new(),
                },
                last_access: tick,
            },
        );
        Lookup::Claimed(Claim {
            url: url.to_string(),
            token,
        })
    }

    /// Settle a claimed entry, wake coalesced waiters and run the eviction check.
    ///
    /// If the entry was invalidated while loading, the outcome is returned to
    /// the caller but not cached.
    pub fn complete(
        &self,
        claim: Claim,
        outcome: Result<LoadedAsset, LoadFailure>,
    ) -> ReelkitResult<ImageHandle> {
        let (waiters, evicted, settled) = {
            let mut state = self.state.lock();
            let tick = state.touch();
            let owned = matches!(
                state.entries.get(&claim.url),
                Some(CacheEntry { slot: Slot::Pending { token, .. }, .. }) if *token == claim.token
            );
            if !owned {
                debug!(url = %claim.url, "load finished after its entry was invalidated");
                return outcome
                    .map(|loaded| loaded.handle)
                    .map_err(|f| f.to_error(&claim.url));
            }

            let settled: Settled = outcome
                .as_ref()
                .map(|l| l.handle.clone())
                .map_err(|f| f.clone());
            let slot = match outcome {
                Ok(loaded) => Slot::Loaded {
                    handle: loaded.handle,
                    transient: loaded.transient,
                },
                Err(failure) => Slot::Failed(failure),
            };
            let previous = state.entries.insert(
                claim.url.clone(),
                CacheEntry {
                    slot,
                    last_access: tick,
                },
            );
            let waiters = match previous.map(|e| e.slot) {
                Some(Slot::Pending { waiters, .. }) => waiters,
                _ => Vec::new(),
            };
            let evicted = self.collect_evictions(&mut state);
            (waiters, evicted, settled)
        };

        for waiter in waiters {
            let _ = waiter.send(settled.clone());
        }
        self.release_all(evicted);
        settled.map_err(|f| f.to_error(&claim.url))
    }

    /// Drop a claim without a result. Waiters see their channel close and retry.
    pub fn abandon(&self, claim: Claim) {
        let mut state = self.state.lock();
        let owned = matches!(
            state.entries.get(&claim.url),
            Some(CacheEntry { slot: Slot::Pending { token, .. }, .. }) if *token == claim.token
        );
        if owned {
            state.entries.remove(&claim.url);
            debug!(url = %claim.url, "abandoned pending load");
        }
    }

    /// Remove `url` so the next load retries it. Returns whether an entry existed.
    pub fn invalidate(&self, url: &str) -> bool {
        let removed = self.state.lock().entries.remove(url);
        match removed {
            Some(entry) => {
                if let Some(released) = entry.into_released(url.to_string()) {
                    self.releaser.release(released);
                }
                true
            }
            None => false,
        }
    }

    /// Remove every entry, releasing each resolved one.
    pub fn clear(&self) {
        let drained: Vec<(String, CacheEntry)> = self.state.lock().entries.drain().collect();
        let released = drained
            .into_iter()
            .filter_map(|(url, entry)| entry.into_released(url))
            .collect();
        self.release_all(released);
    }

    /// Cached handle for `url` if loaded, touching its recency.
    pub fn get(&self, url: &str) -> Option<ImageHandle> {
        let mut state = self.state.lock();
        let tick = state.touch();
        let entry = state.entries.get_mut(url)?;
        match &entry.slot {
            Slot::Loaded { handle, .. } => {
                entry.last_access = tick;
                Some(handle.clone())
            }
            _ => None,
        }
    }

    /// Number of resolved (loaded or failed) entries. Never exceeds the bound
    /// once an insertion has settled.
    pub fn len(&self) -> usize {
        self.state.lock().resolved_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn pending(&self) -> usize {
        let state = self.state.lock();
        state.entries.len() - state.resolved_len()
    }

    /// Whether `url` has a resolved entry.
    pub fn contains(&self, url: &str) -> bool {
        matches!(
            self.status(url),
            Some(EntryStatus::Loaded | EntryStatus::Failed)
        )
    }

    pub fn status(&self, url: &str) -> Option<EntryStatus> {
        self.state.lock().entries.get(url).map(CacheEntry::status)
    }

    fn collect_evictions(&self, state: &mut CacheState) -> Vec<ReleasedEntry> {
        let resolved = state.resolved_len();
        if resolved <= self.max_entries {
            return Vec::new();
        }
        let share = (self.max_entries as f64 * self.evict_fraction).floor() as usize;
        let count = share.max(resolved - self.max_entries);

        let mut oldest: Vec<(u64, String)> = state
            .entries
            .iter()
            .filter(|(_, e)| !matches!(e.slot, Slot::Pending { .. }))
            .map(|(url, e)| (e.last_access, url.clone()))
            .collect();
        oldest.sort_unstable();
        oldest.truncate(count);

        debug!(count = oldest.len(), resolved, bound = self.max_entries, "evicting cache entries");
        oldest
            .into_iter()
            .filter_map(|(_, url)| {
                let entry = state.entries.remove(&url)?;
                entry.into_released(url)
            })
            .collect()
    }

    fn release_all(&self, released: Vec<ReleasedEntry>) {
        for entry in released {
            self.releaser.release(entry);
        }
    }
}

impl fmt::Debug for AssetCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AssetCache")
            .field("len", &self.len())
            .field("max_entries", &self.max_entries)
            .finish()
    }
}

impl Drop for AssetCache {
    fn drop(&mut self) {
        self.clear();
    }
}
