//! Decode strategies, tried in order until one produces a bitmap.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use reelkit_compute::{BitmapDecoder, ComputeService, ImageCrateDecoder, Priority};
use reelkit_core::{Bitmap, ReelkitError, ReelkitResult};

/// A decoded, renderable image as handed out by the loader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageHandle {
    bitmap: Bitmap,
    decoded_by: &'static str,
}

impl ImageHandle {
    pub fn new(bitmap: Bitmap, decoded_by: &'static str) -> Self {
        Self { bitmap, decoded_by }
    }

    pub fn bitmap(&self) -> &Bitmap {
        &self.bitmap
    }

    pub fn into_bitmap(self) -> Bitmap {
        self.bitmap
    }

    /// Name of the strategy that produced the bitmap.
    pub fn decoded_by(&self) -> &'static str {
        self.decoded_by
    }
}

#[async_trait]
pub trait DecodeStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether this strategy currently decodes in-process. After one
    /// in-process attempt fails, the chain skips the others.
    fn decodes_inline(&self) -> bool {
        false
    }

    async fn decode(&self, bytes: Arc<[u8]>, priority: Priority) -> ReelkitResult<Bitmap>;
}

/// Offloads decoding to the background compute service.
#[derive(Debug, Clone)]
pub struct AcceleratedDecode {
    service: ComputeService,
}

impl AcceleratedDecode {
    pub fn new(service: ComputeService) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DecodeStrategy for AcceleratedDecode {
    fn name(&self) -> &'static str {
        "accelerated"
    }

    fn decodes_inline(&self) -> bool {
        self.service.is_degraded()
    }

    async fn decode(&self, bytes: Arc<[u8]>, priority: Priority) -> ReelkitResult<Bitmap> {
        self.service.decode_bitmap(bytes, priority).await
    }
}

/// Decodes in-process without the worker, on the blocking pool so the
/// calling task is never stalled.
#[derive(Clone)]
pub struct InlineDecode {
    decoder: Arc<dyn BitmapDecoder>,
}

impl InlineDecode {
    pub fn new(decoder: Arc<dyn BitmapDecoder>) -> Self {
        Self { decoder }
    }
}

impl Default for InlineDecode {
    fn default() -> Self {
        Self::new(Arc::new(ImageCrateDecoder))
    }
}

#[async_trait]
impl DecodeStrategy for InlineDecode {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn decodes_inline(&self) -> bool {
        true
    }

    async fn decode(&self, bytes: Arc<[u8]>, _priority: Priority) -> ReelkitResult<Bitmap> {
        let decoder = Arc::clone(&self.decoder);
        tokio::task::spawn_blocking(move || decoder.decode(&bytes))
            .await
            .map_err(|e| ReelkitError::Other(format!("inline decode aborted: {}", e)))?
    }
}

/// Ordered fallback list of decode strategies.
#[derive(Clone, Default)]
pub struct DecodeChain {
    strategies: Vec<Arc<dyn DecodeStrategy>>,
}

impl DecodeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Worker decode first, in-process decode as the fallback.
    pub fn standard(service: ComputeService) -> Self {
        Self::new()
            .with(AcceleratedDecode::new(service))
            .with(InlineDecode::default())
    }

    pub fn with(mut self, strategy: impl DecodeStrategy + 'static) -> Self {
        self.strategies.push(Arc::new(strategy));
        self
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    /// Try each strategy in order. Fails with `DecodeFailed` only when all of them failed.
    pub async fn decode(
        &self,
        url: &str,
        bytes: Arc<[u8]>,
        priority: Priority,
    ) -> ReelkitResult<ImageHandle> {
        let mut reasons = Vec::new();
        let mut inline_failed = false;
        for strategy in &self.strategies {
            let inline = strategy.decodes_inline();
            if inline && inline_failed {
                debug!(strategy = strategy.name(), url, "skipped: bytes already failed in-process");
                continue;
            }
            match strategy.decode(Arc::clone(&bytes), priority).await {
                Ok(bitmap) => return Ok(ImageHandle::new(bitmap, strategy.name())),
                Err(e) => {
                    inline_failed |= inline;
                    warn!(strategy = strategy.name(), url, "decode failed, trying next: {}", e);
                    reasons.push(format!("{}: {}", strategy.name(), e));
                }
            }
        }
        if reasons.is_empty() {
            reasons.push("no decode strategy configured".to_string());
        }
        Err(ReelkitError::decode_failed(url, reasons.join("; ")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_core::frame::FrameBuffer;
    use reelkit_core::PixelFormat;

    struct Refuse;

    #[async_trait]
    impl DecodeStrategy for Refuse {
        fn name(&self) -> &'static str {
            "refuse"
        }

        async fn decode(&self, _bytes: Arc<[u8]>, _priority: Priority) -> ReelkitResult<Bitmap> {
            Err(ReelkitError::ServiceStopped)
        }
    }

    struct Blank;

    #[async_trait]
    impl DecodeStrategy for Blank {
        fn name(&self) -> &'static str {
            "blank"
        }

        async fn decode(&self, bytes: Arc<[u8]>, _priority: Priority) -> ReelkitResult<Bitmap> {
            Ok(Bitmap::new(FrameBuffer::new(bytes.len() as u32, 1, PixelFormat::Rgba8)))
        }
    }

    #[tokio::test]
    async fn test_falls_through_to_next_strategy() {
        let chain = DecodeChain::new().with(Refuse).with(Blank);
        let handle = chain
            .decode("a", Arc::from(vec![0u8; 3]), Priority::High)
            .await
            .unwrap();
        assert_eq!(handle.decoded_by(), "blank");
        assert_eq!(handle.bitmap().width(), 3);
    }

    #[tokio::test]
    async fn test_all_failing_is_decode_failed() {
        let chain = DecodeChain::new().with(Refuse).with(InlineDecode::default());
        let err = chain
            .decode("local://x", Arc::from(b"garbage".to_vec()), Priority::Low)
            .await
            .unwrap_err();
        match err {
            ReelkitError::DecodeFailed { url, reason } => {
                assert_eq!(url, "local://x");
                assert!(reason.contains("refuse"));
                assert!(reason.contains("inline"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    /// Counts attempts; refuses everything.
    #[derive(Default)]
    struct CountingInline {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl DecodeStrategy for Arc<CountingInline> {
        fn name(&self) -> &'static str {
            "counting"
        }

        fn decodes_inline(&self) -> bool {
            true
        }

        async fn decode(&self, _bytes: Arc<[u8]>, _priority: Priority) -> ReelkitResult<Bitmap> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Err(ReelkitError::ServiceStopped)
        }
    }

    #[tokio::test]
    async fn test_degraded_failure_is_not_decoded_twice() {
        let mut config = reelkit_core::ReelkitConfig::default();
        config.compute.worker_enabled = false;
        let counting = Arc::new(CountingInline::default());
        let chain = DecodeChain::new()
            .with(AcceleratedDecode::new(ComputeService::new(&config)))
            .with(Arc::clone(&counting));

        let err = chain
            .decode("local://x", Arc::from(b"garbage".to_vec()), Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, ReelkitError::DecodeFailed { .. }));
        assert_eq!(counting.calls.load(std::sync::atomic::Ordering::SeqCst), 0);

        // with a live worker the in-process fallback still runs
        let chain = DecodeChain::new()
            .with(AcceleratedDecode::new(ComputeService::new(&reelkit_core::ReelkitConfig::default())))
            .with(Arc::clone(&counting));
        assert!(chain
            .decode("local://x", Arc::from(b"garbage".to_vec()), Priority::High)
            .await
            .is_err());
        assert_eq!(counting.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_chain() {
        let err = DecodeChain::new()
            .decode("u", Arc::from(vec![1u8]), Priority::High)
            .await
            .unwrap_err();
        assert!(matches!(err, ReelkitError::DecodeFailed { .. }));
    }
}
