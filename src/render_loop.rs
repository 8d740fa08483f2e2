//! Per-frame driver tying camera, clip geometry, plane cache and the
//! graphics backend together.

use std::time::Duration;

use glam::{Mat4, Vec2};
use tracing::{debug, error};
use web_time::Instant;

use crate::camera::{CameraState, TransformEvaluator, Viewport};
use crate::channel_window::ChannelWindow;
use crate::clip_geometry::{ClipGeometry, VolumeExtents};
use crate::config::ViewerConfig;
use crate::enums::{DragButton, ViewMode};
use crate::plane_cache::{LoadReport, PlaneCache, RefreshOutcome, TextureSink};
use crate::strip_decoder::{DecodeError, StripSource};

/// Uniform block shared by both shader variants.
///
/// Layout must match the WGSL `Uniforms` struct.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FrameUniforms {
    pub mvp: [[f32; 4]; 4],
    /// `(min, max, unused, padding)` of the intensity window.
    pub window: [f32; 4],
}

impl FrameUniforms {
    pub fn new(mvp: Mat4, window: &ChannelWindow) -> Self {
        let [min, max, unused] = window.uniform();
        Self {
            mvp: mvp.to_cols_array_2d(),
            window: [min, max, unused, 0.0],
        }
    }
}

/// A graphics error collected at a checkpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphicsDiagnostic {
    pub checkpoint: &'static str,
    pub message: String,
}

/// Graphics collaborator driven once per frame.
///
/// Errors are not surfaced per call. The backend accumulates them and hands
/// them over at [`RenderBackend::end_frame`].
pub trait RenderBackend: TextureSink {
    fn resize(&mut self, viewport: Viewport);

    /// Replace the vertex, texture coordinate and index buffers.
    fn upload_geometry(&mut self, geometry: &ClipGeometry);

    /// Draw `index_count` indices with the current textures and geometry.
    fn draw(&mut self, uniforms: &FrameUniforms, index_count: u32);

    /// Close the frame and return everything that went wrong since the last
    /// checkpoint.
    fn end_frame(&mut self) -> Vec<GraphicsDiagnostic>;
}

/// Caps how often frames run. `None` means uncapped.
#[derive(Debug, Clone, Copy)]
pub struct FramePacer {
    min_interval: Option<Duration>,
    last: Option<Instant>,
}

impl FramePacer {
    pub fn new(max_fps: Option<u32>) -> Self {
        Self {
            min_interval: max_fps
                .filter(|&fps| fps > 0)
                .map(|fps| Duration::from_secs_f64(1.0 / f64::from(fps))),
            last: None,
        }
    }

    /// Time left before the next frame may start.
    pub fn time_until_next(&self, now: Instant) -> Duration {
        match (self.min_interval, self.last) {
            (Some(interval), Some(last)) => {
                interval.saturating_sub(now.saturating_duration_since(last))
            }
            _ => Duration::ZERO,
        }
    }

    /// Claim a frame slot at `now` if one is available.
    pub fn try_begin(&mut self, now: Instant) -> bool {
        if self.time_until_next(now).is_zero() {
            self.last = Some(now);
            true
        } else {
            false
        }
    }

    /// Claim the slot at `now` regardless of the cap.
    pub fn force(&mut self, now: Instant) {
        self.last = Some(now);
    }

    /// Block until a frame slot is available and claim it.
    pub fn wait(&mut self) {
        let remaining = self.time_until_next(Instant::now());
        if !remaining.is_zero() {
            std::thread::sleep(remaining);
        }
        self.last = Some(Instant::now());
    }
}

/// Collapses redraw requests into at most one pending redraw.
///
/// A deferred request waits for the next paced frame. An urgent request
/// (resize, expose) is served on the next loop iteration even if the frame
/// cap has not elapsed.
#[derive(Debug, Clone, Copy, Default)]
pub struct RedrawScheduler {
    pending: bool,
    urgent: bool,
    collapsed: u64,
}

impl RedrawScheduler {
    /// Ask for a redraw on the next paced frame. Returns `false` if one was
    /// already pending.
    pub fn request(&mut self) -> bool {
        if self.pending {
            self.collapsed += 1;
            return false;
        }
        self.pending = true;
        true
    }

    /// Ask for a redraw that bypasses the frame cap.
    pub fn request_now(&mut self) -> bool {
        let fresh = self.request();
        self.urgent = true;
        fresh
    }

    /// Consume the pending request, if any.
    pub fn take(&mut self) -> bool {
        self.urgent = false;
        std::mem::take(&mut self.pending)
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_urgent(&self) -> bool {
        self.urgent
    }

    /// Requests folded into an already pending redraw.
    pub fn collapsed(&self) -> u64 {
        self.collapsed
    }
}

/// Outcome of one tick.
#[derive(Debug, Clone)]
pub struct FrameReport {
    pub frame: u64,
    pub mvp: Mat4,
    pub refresh: RefreshOutcome,
    pub diagnostics: Vec<GraphicsDiagnostic>,
}

/// The viewer core: one plane cache plus the state the user edits.
///
/// The 2D and 3D variants differ only in the [`ViewMode`] passed through
/// [`ViewerConfig`].
#[derive(Debug)]
pub struct Viewer<S> {
    cache: PlaneCache<S>,
    mode: ViewMode,
    extents: VolumeExtents,
    evaluator: TransformEvaluator,
    camera: CameraState,
    window: ChannelWindow,
    depth_cut: u32,
    viewport: Viewport,
    redraw: RedrawScheduler,
    frame: u64,
}

impl<S: StripSource> Viewer<S> {
    /// # Errors
    ///
    /// Fails if the container does not describe a usable volume.
    pub fn new(source: S, config: &ViewerConfig) -> Result<Self, DecodeError> {
        let cache = PlaneCache::new(source, config.mode)?.with_mipmaps(config.mipmaps);
        let plane_count = cache.volume().plane_count;
        let mut redraw = RedrawScheduler::default();
        redraw.request();

        Ok(Self {
            extents: config.extents.with_plane_count(plane_count),
            evaluator: TransformEvaluator::new(
                config.mode,
                config.fov_y_degrees,
                config.near,
                config.far,
            ),
            camera: config.initial_camera(),
            window: ChannelWindow::from_raw(config.channel_min, config.channel_max),
            depth_cut: 0,
            viewport: config.viewport,
            mode: config.mode,
            cache,
            redraw,
            frame: 0,
        })
    }

    /// Size the backend and load the initial texture content.
    pub fn initialize(&mut self, backend: &mut impl RenderBackend) -> LoadReport {
        backend.resize(self.viewport);
        self.cache.initialize(backend, self.depth_cut)
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn cache(&self) -> &PlaneCache<S> {
        &self.cache
    }

    pub fn camera(&self) -> &CameraState {
        &self.camera
    }

    pub fn channel_window(&self) -> &ChannelWindow {
        &self.window
    }

    pub fn depth_cut(&self) -> u32 {
        self.depth_cut
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn redraw(&self) -> &RedrawScheduler {
        &self.redraw
    }

    fn changed(&mut self, changed: bool) -> bool {
        if changed {
            self.redraw.request();
        }
        changed
    }

    pub fn set_x_rotation(&mut self, angle: i32) -> bool {
        let changed = self.camera.set_x_rotation(angle);
        self.changed(changed)
    }

    pub fn set_y_rotation(&mut self, angle: i32) -> bool {
        let changed = self.camera.set_y_rotation(angle);
        self.changed(changed)
    }

    pub fn set_z_rotation(&mut self, angle: i32) -> bool {
        let changed = self.camera.set_z_rotation(angle);
        self.changed(changed)
    }

    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        let changed = self.camera.set_zoom(zoom);
        self.changed(changed)
    }

    pub fn set_pan(&mut self, pan: Vec2) -> bool {
        let changed = self.camera.set_pan(pan);
        self.changed(changed)
    }

    pub fn drag(&mut self, dx: i32, dy: i32, button: DragButton) -> bool {
        let changed = self.camera.drag(dx, dy, button, self.mode);
        self.changed(changed)
    }

    pub fn set_channel_min(&mut self, raw: i32) -> bool {
        let changed = self.window.set_min(raw);
        self.changed(changed)
    }

    pub fn set_channel_max(&mut self, raw: i32) -> bool {
        let changed = self.window.set_max(raw);
        self.changed(changed)
    }

    /// Select the visible depth, clamped into the plane range.
    pub fn set_depth_cut(&mut self, cut: i32) -> bool {
        let cut = self.cache.volume().clamp_plane(i64::from(cut));
        let changed = cut != self.depth_cut;
        self.depth_cut = cut;
        self.changed(changed)
    }

    pub fn resize(&mut self, backend: &mut impl RenderBackend, width: u32, height: u32) {
        let viewport = Viewport::new(width, height);
        if viewport != self.viewport {
            self.viewport = viewport;
            backend.resize(viewport);
        }
        self.redraw.request_now();
    }

    /// Run one frame: transform, geometry, cache refresh, draw.
    pub fn tick(&mut self, backend: &mut impl RenderBackend) -> FrameReport {
        let mvp = self.evaluator.evaluate(&self.camera, self.viewport);

        let geometry =
            ClipGeometry::build(self.mode.dimensionality(), &self.extents, self.depth_cut);
        backend.upload_geometry(&geometry);

        let refresh = self.cache.refresh(backend, self.depth_cut);

        backend.draw(&FrameUniforms::new(mvp, &self.window), geometry.index_count());

        let diagnostics = backend.end_frame();
        for diagnostic in &diagnostics {
            error!(
                frame = self.frame,
                checkpoint = diagnostic.checkpoint,
                "graphics error: {}",
                diagnostic.message
            );
        }

        self.redraw.take();
        let report = FrameReport {
            frame: self.frame,
            mvp,
            refresh,
            diagnostics,
        };
        self.frame += 1;
        report
    }

    /// Event-loop entry point: tick only when a redraw is pending.
    ///
    /// Urgent redraws run at once. Deferred ones wait for the pacer.
    pub fn pump(
        &mut self,
        backend: &mut impl RenderBackend,
        pacer: &mut FramePacer,
        now: Instant,
    ) -> Option<FrameReport> {
        if self.redraw.is_urgent() {
            pacer.force(now);
            return Some(self.tick(backend));
        }
        (self.redraw.is_pending() && pacer.try_begin(now)).then(|| self.tick(backend))
    }

    /// Free-running loop for `frames` frames, paced by `pacer`. Urgent
    /// redraws skip the wait.
    pub fn run(
        &mut self,
        backend: &mut impl RenderBackend,
        pacer: &mut FramePacer,
        frames: u64,
    ) -> Vec<FrameReport> {
        let start = Instant::now();
        let reports: Vec<_> = (0..frames)
            .map(|_| {
                if self.redraw.is_urgent() {
                    pacer.force(Instant::now());
                } else {
                    pacer.wait();
                }
                self.tick(backend)
            })
            .collect();
        debug!(frames, elapsed = ?start.elapsed(), "render loop finished");
        reports
    }

    /// Release the container.
    pub fn into_source(self) -> S {
        self.cache.into_source()
    }
}
