//! The transition compositor.
//!
//! One compositor drives one rendering surface. `configure` swaps in a new
//! (previous, current) pair and starts loading both sources in the
//! background; `render_frame` never waits for them. It returns `Ok(None)`
//! until the sources have arrived, then a blended frame for every call.
//!
//! Sources are tagged with the configure generation that requested them.
//! Anything that arrives for an older generation is dropped unused.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use reelkit_assets::{AssetLoader, PlaybackDirective, VideoFeed};
use reelkit_compute::Priority;
use reelkit_core::config::RenderConfig;
use reelkit_core::diagnostics::{self, DiagnosticEvent, DiagnosticsSink, Severity};
use reelkit_core::frame::FrameBuffer;
use reelkit_core::{AssetRef, Bitmap, ReelkitError, ReelkitResult, TransitionKind};

use crate::backend::{GraphicsBackend, ProgramId, SoftwareBackend, TextureId};
use crate::params::TransitionParams;

const PLACEHOLDER_SIZE: u32 = 64;
const PLACEHOLDER_CELL: u32 = 8;

/// A source as it comes back from the loader.
enum LoadedSource {
    Still(Bitmap),
    Video {
        feed: VideoFeed,
        first: FrameBuffer,
    },
    Failed(ReelkitError),
}

struct Arrival {
    generation: u64,
    prev: Option<LoadedSource>,
    curr: LoadedSource,
}

/// A source bound to a backend texture.
struct BoundSource {
    texture: TextureId,
    video: Option<VideoFeed>,
    /// Keeps the decoded pixels alive while the pair is configured.
    _bitmap: Option<Bitmap>,
}

struct TransitionState {
    prev: Option<BoundSource>,
    curr: BoundSource,
}

struct ActiveProgram {
    kind: TransitionKind,
    id: ProgramId,
}

struct Halt {
    program: String,
    log: String,
}

pub struct TransitionCompositor {
    backend: Box<dyn GraphicsBackend>,
    loader: AssetLoader,
    params: TransitionParams,
    width: u32,
    height: u32,
    diagnostics: Option<Arc<dyn DiagnosticsSink>>,
    program: Option<ActiveProgram>,
    state: Option<TransitionState>,
    halted: Option<Halt>,
    generation: u64,
    configured: bool,
    arrivals_tx: mpsc::UnboundedSender<Arrival>,
    arrivals_rx: mpsc::UnboundedReceiver<Arrival>,
}

impl TransitionCompositor {
    pub fn new(backend: Box<dyn GraphicsBackend>, loader: AssetLoader, config: &RenderConfig) -> Self {
        let (arrivals_tx, arrivals_rx) = mpsc::unbounded_channel();
        info!(backend = backend.name(), width = config.width, height = config.height, "compositor created");
        Self {
            backend,
            loader,
            params: TransitionParams::from_config(config),
            width: config.width,
            height: config.height,
            diagnostics: None,
            program: None,
            state: None,
            halted: None,
            generation: 0,
            configured: false,
            arrivals_tx,
            arrivals_rx,
        }
    }

    /// A compositor on the CPU backend.
    pub fn software(loader: AssetLoader, config: &RenderConfig) -> Self {
        Self::new(Box::new(SoftwareBackend::new()), loader, config)
    }

    pub fn with_diagnostics(mut self, sink: Arc<dyn DiagnosticsSink>) -> Self {
        self.diagnostics = Some(sink);
        self
    }

    pub fn with_params(mut self, params: TransitionParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> &TransitionParams {
        &self.params
    }

    /// Ken-Burns range, duration and focal points for subsequent frames.
    pub fn set_params(&mut self, params: TransitionParams) {
        self.params = params;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub fn backend(&self) -> &dyn GraphicsBackend {
        self.backend.as_ref()
    }

    /// The program in use, after any per-asset override.
    pub fn active_kind(&self) -> Option<TransitionKind> {
        self.program.as_ref().map(|p| p.kind)
    }

    /// Whether both sources of the configured pair are bound.
    pub fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    /// Whether a program failed to build. A halted compositor renders
    /// nothing and must be replaced.
    pub fn is_halted(&self) -> bool {
        self.halted.is_some()
    }

    /// Swap in a new pair and start loading it.
    ///
    /// Textures of the previous pair are released first. A transition set
    /// on `curr` itself takes precedence over `kind`. Must be called from
    /// within a tokio runtime.
    pub fn configure(
        &mut self,
        prev: Option<&AssetRef>,
        curr: &AssetRef,
        kind: TransitionKind,
    ) -> ReelkitResult<()> {
        self.ensure_live()?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ReelkitError::Other("compositor requires a tokio runtime".to_string()))?;

        self.release_pair();
        self.generation += 1;
        self.configured = true;

        let kind = curr.transition().unwrap_or(kind);
        self.use_program(kind)?;

        let generation = self.generation;
        let loader = self.loader.clone();
        let prev = prev.cloned();
        let curr = curr.clone();
        let arrivals = self.arrivals_tx.clone();
        debug!(
            generation,
            prev = prev.as_ref().map(|a| a.id().as_str()),
            curr = curr.id().as_str(),
            %kind,
            "configuring transition"
        );
        runtime.spawn(async move {
            let prev = match &prev {
                Some(asset) => Some(load_source(&loader, asset).await),
                None => None,
            };
            let curr = load_source(&loader, &curr).await;
            // the compositor may be gone by now
            let _ = arrivals.send(Arrival {
                generation,
                prev,
                curr,
            });
        });
        Ok(())
    }

    /// Render the fixed frame for `progress` at `elapsed` seconds into the pair.
    ///
    /// Returns `Ok(None)` while the configured sources are still loading.
    pub fn render_frame(&mut self, progress: f32, elapsed: f32) -> ReelkitResult<Option<FrameBuffer>> {
        self.ensure_live()?;
        if !self.configured {
            return Err(ReelkitError::NotConfigured);
        }
        while let Ok(arrival) = self.arrivals_rx.try_recv() {
            self.accept(arrival)?;
        }
        let Some(program) = self.program.as_ref().map(|p| p.id) else {
            return Err(ReelkitError::NotConfigured);
        };
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };

        // video frames are extracted off this thread; take what has finished
        // and ask for the next one
        for bound in std::iter::once(&mut state.curr).chain(state.prev.as_mut()) {
            if let Some(feed) = bound.video.as_mut() {
                match feed.latest() {
                    Some(Ok(frame)) => self.backend.update_texture(bound.texture, &frame)?,
                    Some(Err(e)) => warn!("keeping last video frame: {}", e),
                    None => {}
                }
                feed.request(elapsed as f64);
            }
        }

        let uniforms = self.params.uniforms(progress, elapsed, state.prev.is_some());
        let b = state.curr.texture;
        let a = state.prev.as_ref().map_or(b, |p| p.texture);
        self.backend
            .draw(program, a, b, &uniforms, self.width, self.height)
            .map(Some)
    }

    /// Wait until the configured pair is bound.
    pub async fn wait_until_ready(&mut self) -> ReelkitResult<()> {
        loop {
            self.ensure_live()?;
            if !self.configured {
                return Err(ReelkitError::NotConfigured);
            }
            if self.state.is_some() {
                return Ok(());
            }
            match self.arrivals_rx.recv().await {
                Some(arrival) => self.accept(arrival)?,
                None => return Err(ReelkitError::Other("source channel closed".to_string())),
            }
        }
    }

    /// Release the pair's textures and the program. In-flight loads are
    /// discarded when they arrive.
    pub fn release_all(&mut self) {
        self.release_pair();
        if let Some(program) = self.program.take() {
            self.backend.release_program(program.id);
        }
        self.generation += 1;
        self.configured = false;
    }

    fn ensure_live(&self) -> ReelkitResult<()> {
        match &self.halted {
            Some(halt) => Err(ReelkitError::shader_build(&halt.program, &halt.log)),
            None => Ok(()),
        }
    }

    fn use_program(&mut self, kind: TransitionKind) -> ReelkitResult<()> {
        if self.active_kind() == Some(kind) {
            return Ok(());
        }
        if let Some(old) = self.program.take() {
            debug!(from = %old.kind, to = %kind, "switching transition program");
            self.backend.release_program(old.id);
        }
        match self.backend.build_program(kind) {
            Ok(id) => {
                self.program = Some(ActiveProgram { kind, id });
                Ok(())
            }
            Err(e) => {
                if let ReelkitError::ShaderBuildFailed { program, log } = &e {
                    self.halt(program.clone(), log.clone());
                }
                Err(e)
            }
        }
    }

    fn halt(&mut self, program: String, log: String) {
        error!(program = %program, "transition program failed to build, halting: {}", log);
        diagnostics::report(
            self.diagnostics.as_ref(),
            DiagnosticEvent::new(
                "compositor",
                Severity::Fatal,
                format!("shader build failed for '{}': {}", program, log),
            ),
        );
        self.release_pair();
        self.halted = Some(Halt { program, log });
    }

    fn accept(&mut self, arrival: Arrival) -> ReelkitResult<()> {
        if arrival.generation != self.generation {
            debug!(
                stale = arrival.generation,
                current = self.generation,
                "discarding sources for a superseded pair"
            );
            return Ok(());
        }
        let curr = self.bind(arrival.curr)?;
        let prev = match arrival.prev.map(|p| self.bind(p)).transpose() {
            Ok(prev) => prev,
            Err(e) => {
                self.backend.release_texture(curr.texture);
                return Err(e);
            }
        };
        self.state = Some(TransitionState { prev, curr });
        Ok(())
    }

    fn bind(&mut self, source: LoadedSource) -> ReelkitResult<BoundSource> {
        match source {
            LoadedSource::Still(bitmap) => Ok(BoundSource {
                texture: self.backend.upload_texture(bitmap.frame())?,
                video: None,
                _bitmap: Some(bitmap),
            }),
            LoadedSource::Video { feed, first } => Ok(BoundSource {
                texture: self.backend.upload_texture(&first)?,
                video: Some(feed),
                _bitmap: None,
            }),
            LoadedSource::Failed(e) => {
                warn!("binding placeholder for failed source: {}", e);
                let placeholder =
                    FrameBuffer::checkerboard(PLACEHOLDER_SIZE, PLACEHOLDER_SIZE, PLACEHOLDER_CELL);
                Ok(BoundSource {
                    texture: self.backend.upload_texture(&placeholder)?,
                    video: None,
                    _bitmap: None,
                })
            }
        }
    }

    fn release_pair(&mut self) {
        if let Some(state) = self.state.take() {
            self.backend.release_texture(state.curr.texture);
            if let Some(prev) = state.prev {
                self.backend.release_texture(prev.texture);
            }
        }
    }
}

impl Drop for TransitionCompositor {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl std::fmt::Debug for TransitionCompositor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransitionCompositor")
            .field("backend", &self.backend.name())
            .field("kind", &self.active_kind())
            .field("generation", &self.generation)
            .field("ready", &self.is_ready())
            .field("halted", &self.is_halted())
            .finish()
    }
}

async fn load_source(loader: &AssetLoader, asset: &AssetRef) -> LoadedSource {
    if asset.is_video() {
        let mut source = match loader.open_video(asset, PlaybackDirective::BACKGROUND_LOOP).await {
            Ok(source) => source,
            Err(e) => return LoadedSource::Failed(e),
        };
        let first = tokio::task::spawn_blocking(move || {
            let frame = source.frame_at(0.0);
            (source, frame)
        })
        .await;
        return match first {
            Ok((source, Ok(first))) => LoadedSource::Video {
                feed: VideoFeed::spawn(source),
                first,
            },
            Ok((_, Err(e))) => LoadedSource::Failed(e),
            Err(e) => LoadedSource::Failed(ReelkitError::Other(format!("video open aborted: {}", e))),
        };
    }
    match loader.load(asset.url(), Priority::High).await {
        Ok(handle) => LoadedSource::Still(handle.into_bitmap()),
        Err(e) => LoadedSource::Failed(e),
    }
}
