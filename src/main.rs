use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use plane_stream::{
    CpuTextures, FramePacer, Gpu, PlaneCache, TiffStripDecoder, ViewMode, Viewer, ViewerConfig,
    WgpuBackend, channel_window::ChannelWindow, enums::Channel, volume::compose_plane,
};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Mode {
    /// Whole stack resident, clip box under a perspective camera
    Volume,
    /// One plane pair resident, quad under an orthographic camera
    Slice,
}

impl From<Mode> for ViewMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Volume => ViewMode::Volume,
            Mode::Slice => ViewMode::Slice,
        }
    }
}

#[derive(Parser)]
#[command(name = "plane-stream")]
#[command(author, version, about = "Render a two-channel TIFF stack offscreen")]
struct Cli {
    /// Multi-directory 16-bit TIFF container
    path: PathBuf,

    /// Viewer settings in RON
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Viewer variant, overrides the config
    #[arg(short, long, value_enum)]
    mode: Option<Mode>,

    /// Depth cut in planes
    #[arg(short, long, default_value = "0")]
    depth: i32,

    /// Frames to render before the snapshot
    #[arg(short, long, default_value = "1")]
    frames: u64,

    /// Output image
    #[arg(short, long, default_value = "frame.png")]
    output: PathBuf,

    /// Composite the plane pair on the CPU instead of rendering with wgpu
    #[arg(long)]
    cpu: bool,
}

/// Stream the plane pair at `depth` into CPU textures and composite it.
fn render_cpu(cli: &Cli, config: &ViewerConfig, decoder: TiffStripDecoder) -> Result<()> {
    let mut cache = PlaneCache::new(decoder, ViewMode::Slice)?.with_mipmaps(false);
    let depth = cache.volume().clamp_plane(i64::from(cli.depth));
    let mut textures = CpuTextures::default();
    let report = cache.initialize(&mut textures, depth);
    if !report.is_complete() {
        warn!(failed = report.strips_failed, "plane pair is incomplete");
    }

    let window = ChannelWindow::from_raw(config.channel_min, config.channel_max);
    let (Some(r), Some(g)) = (textures.plane(Channel::R, 0), textures.plane(Channel::G, 0)) else {
        bail!("no plane resident after load");
    };
    let image = compose_plane(&r, &g, &window).context("channel planes differ in shape")?;
    image
        .save(&cli.output)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;
    info!(depth, output = %cli.output.display(), "wrote composite");
    Ok(())
}

async fn render_gpu(cli: &Cli, config: &ViewerConfig, decoder: TiffStripDecoder) -> Result<()> {
    let gpu = Gpu::headless().await.context("Failed to set up graphics device")?;
    let mut backend = WgpuBackend::new(gpu, config);
    let mut viewer = Viewer::new(decoder, config)?;
    viewer.set_depth_cut(cli.depth);

    let report = viewer.initialize(&mut backend);
    info!(
        images = report.images,
        strips = report.strips_loaded,
        failed = report.strips_failed,
        "initial load"
    );

    let mut pacer = FramePacer::new(config.max_fps);
    let reports = viewer.run(&mut backend, &mut pacer, cli.frames.max(1));
    let errors: usize = reports.iter().map(|r| r.diagnostics.len()).sum();
    if errors > 0 {
        warn!(errors, "frames reported graphics errors");
    }

    let image = backend.snapshot().await.context("Failed to read back frame")?;
    image
        .save(&cli.output)
        .with_context(|| format!("Failed to write {}", cli.output.display()))?;
    info!(frames = reports.len(), output = %cli.output.display(), "wrote snapshot");
    Ok(())
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => ViewerConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => ViewerConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode.into();
    }

    let decoder = TiffStripDecoder::open(&cli.path)
        .with_context(|| format!("Failed to open container {}", cli.path.display()))?;

    if cli.cpu {
        render_cpu(&cli, &config, decoder)
    } else {
        render_gpu(&cli, &config, decoder).await
    }
}
