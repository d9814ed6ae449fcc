use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use reelkit_assets::{AssetLoader, MemoryBlobStore};
use reelkit_compute::{CanvasAsset, ComputeService, GraphNode};
use reelkit_core::{
    hash_frame, AssetRef, DiagnosticsSink, FocalPoint, FrameBuffer, ReelkitConfig, TracingDiagnostics,
    TransitionKind,
};
use reelkit_render::{GraphicsBackend, SoftwareBackend, TransitionCompositor, TransitionParams};

const DEFAULT_CONFIG: &str = "reelkit.toml";

#[derive(Parser)]
#[command(
    name = "reelkit",
    version,
    about = "Reelkit: asset loading, background compute and transition rendering"
)]
struct Cli {
    /// Config file (default: ./reelkit.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a transition between two images to a PNG frame sequence
    Render {
        /// Image shown when the transition starts
        #[arg()]
        from: PathBuf,

        /// Image shown when the transition ends
        #[arg()]
        to: PathBuf,

        /// Transition name (default: render.default_transition)
        #[arg(short, long)]
        transition: Option<String>,

        /// Number of frames to write, first and last included
        #[arg(short, long, default_value_t = 30)]
        frames: u32,

        #[arg(long)]
        width: Option<u32>,

        #[arg(long)]
        height: Option<u32>,

        /// Focal point of the first image as "x,y" in [0, 1]
        #[arg(long)]
        focal_from: Option<String>,

        /// Focal point of the second image as "x,y" in [0, 1]
        #[arg(long)]
        focal_to: Option<String>,

        /// Output directory
        #[arg(short, long, default_value = "output")]
        output: PathBuf,

        /// Render with wgpu instead of the CPU (requires the `gpu` feature)
        #[arg(long)]
        gpu: bool,
    },

    /// Compute synapse edges for a JSON array of canvas assets
    Synapses {
        /// JSON file holding the asset records
        #[arg()]
        file: PathBuf,

        /// Id of the focused asset
        #[arg(long)]
        focused: Option<String>,

        /// Write edges here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Display version, transitions and the resolved configuration
    Info,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // stdout carries command output, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Render {
            from,
            to,
            transition,
            frames,
            width,
            height,
            focal_from,
            focal_to,
            output,
            gpu,
        } => {
            let kind = transition
                .as_deref()
                .map(TransitionKind::from_name_or_default)
                .unwrap_or(config.render.default_transition);
            let focal = (
                focal_from.as_deref().map(parse_focal).transpose()?,
                focal_to.as_deref().map(parse_focal).transpose()?,
            );
            let mut config = config;
            config.render.width = width.unwrap_or(config.render.width);
            config.render.height = height.unwrap_or(config.render.height);
            let backend = backend_for(gpu)?;
            cmd_render(&config, backend, &from, &to, kind, frames, focal, &output).await
        }
        Commands::Synapses {
            file,
            focused,
            output,
        } => cmd_synapses(&config, &file, focused, output.as_deref()).await,
        Commands::Info => cmd_info(&config),
    }
}

fn load_config(path: Option<&Path>) -> Result<ReelkitConfig> {
    match path {
        Some(path) => ReelkitConfig::load_from_file(path)
            .with_context(|| format!("failed to load config: {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            ReelkitConfig::load_from_file(Path::new(DEFAULT_CONFIG))
                .with_context(|| format!("failed to load config: {}", DEFAULT_CONFIG))
        }
        None => Ok(ReelkitConfig::default()),
    }
}

fn parse_focal(value: &str) -> Result<FocalPoint> {
    let (x, y) = value
        .split_once(',')
        .with_context(|| format!("focal point must be \"x,y\", got '{}'", value))?;
    let x: f32 = x.trim().parse().context("focal x is not a number")?;
    let y: f32 = y.trim().parse().context("focal y is not a number")?;
    Ok(FocalPoint::new(x, y))
}

fn asset_for(path: &Path) -> Result<AssetRef> {
    let path = std::fs::canonicalize(path)
        .with_context(|| format!("image not found: {}", path.display()))?;
    let id = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    Ok(AssetRef::image(id, path.to_string_lossy().into_owned()))
}

fn backend_for(gpu: bool) -> Result<Box<dyn GraphicsBackend>> {
    if !gpu {
        return Ok(Box::new(SoftwareBackend::new()));
    }
    #[cfg(feature = "gpu")]
    {
        let backend = reelkit_render::GpuBackend::init().context("no usable GPU adapter")?;
        Ok(Box::new(backend))
    }
    #[cfg(not(feature = "gpu"))]
    {
        anyhow::bail!("--gpu needs reelkit built with the `gpu` feature")
    }
}

async fn cmd_render(
    config: &ReelkitConfig,
    backend: Box<dyn GraphicsBackend>,
    from: &Path,
    to: &Path,
    kind: TransitionKind,
    frames: u32,
    focal: (Option<FocalPoint>, Option<FocalPoint>),
    output: &Path,
) -> Result<()> {
    if frames == 0 {
        anyhow::bail!("--frames must be at least 1");
    }
    config.validate()?;
    let (prev, curr) = (asset_for(from)?, asset_for(to)?);

    let diagnostics: Arc<dyn DiagnosticsSink> = Arc::new(TracingDiagnostics);
    let compute = ComputeService::builder(config)
        .diagnostics(diagnostics.clone())
        .start();
    if let Some(reason) = compute.degraded_reason() {
        tracing::warn!("compute worker unavailable, decoding inline: {}", reason);
    }
    let loader = AssetLoader::standard(config, compute.clone(), Arc::new(MemoryBlobStore::new()));

    let params = TransitionParams::from_config(&config.render).with_focal_points(
        focal.0.unwrap_or(FocalPoint::CENTER),
        focal.1.unwrap_or(FocalPoint::CENTER),
    );
    let renderer = backend.name();
    let mut compositor = TransitionCompositor::new(backend, loader, &config.render)
        .with_params(params)
        .with_diagnostics(diagnostics);

    std::fs::create_dir_all(output)
        .with_context(|| format!("failed to create output directory: {}", output.display()))?;

    println!(
        "🎞  Rendering {} → {} ({}, {})",
        from.display(),
        to.display(),
        kind,
        renderer
    );
    let start = Instant::now();
    compositor.configure(Some(&prev), &curr, kind)?;
    compositor.wait_until_ready().await?;

    let duration = config.render.duration_secs;
    let last = frames.saturating_sub(1).max(1) as f32;
    for i in 0..frames {
        let progress = i as f32 / last;
        let frame = compositor
            .render_frame(progress, progress * duration)?
            .context("sources were not bound after loading")?;
        tracing::debug!(frame = i, progress, hash = %hash_frame(&frame).short(), "rendered");
        let path = output.join(format!("frame_{:04}.png", i));
        write_png(&frame, &path)?;
    }

    let elapsed = start.elapsed();
    println!(
        "   ✓ {} frame(s) at {}x{} in {:.2?}",
        frames, config.render.width, config.render.height, elapsed
    );
    println!("   Output: {}", output.display());

    compositor.release_all();
    compute.shutdown();
    Ok(())
}

fn write_png(frame: &FrameBuffer, path: &Path) -> Result<()> {
    let rgba = frame.to_rgba8();
    let img = image::RgbaImage::from_raw(rgba.width, rgba.height, rgba.data)
        .context("frame buffer does not match its dimensions")?;
    img.save(path)
        .with_context(|| format!("failed to write {}", path.display()))
}

async fn cmd_synapses(
    config: &ReelkitConfig,
    file: &Path,
    focused: Option<String>,
    output: Option<&Path>,
) -> Result<()> {
    let contents = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let assets: Vec<CanvasAsset> = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a JSON array of assets", file.display()))?;
    let nodes: Vec<GraphNode> = assets.iter().map(GraphNode::project).collect();

    let compute = ComputeService::new(config);
    let edges = compute.calculate_synapses(nodes, focused).await?;
    compute.shutdown();
    tracing::info!(assets = assets.len(), edges = edges.len(), "synapses computed");

    let json = serde_json::to_string_pretty(&edges)?;
    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("failed to write {}", path.display()))?,
        None => println!("{}", json),
    }
    Ok(())
}

fn cmd_info(config: &ReelkitConfig) -> Result<()> {
    println!("🎬 Reelkit");
    println!("   Version:      {}", env!("CARGO_PKG_VERSION"));
    if cfg!(feature = "gpu") {
        println!("   Renderers:    software (rayon), wgpu (--gpu)");
    } else {
        println!("   Renderers:    software (rayon)");
    }
    println!("   Compute:      {} worker thread(s)", config.compute.worker_threads);
    println!("   Transitions:");
    for kind in TransitionKind::ALL {
        let marker = if kind == config.render.default_transition {
            " (default)"
        } else {
            ""
        };
        println!("      - {}{}", kind, marker);
    }
    println!();
    println!("   Configuration:");
    let toml = toml::to_string_pretty(config).context("failed to serialize config")?;
    for line in toml.lines() {
        println!("      {}", line);
    }
    Ok(())
}
