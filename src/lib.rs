//! # Plane-stream library
//!
//! This crate renders two-channel microscopy stacks stored as multi-directory
//! 16-bit TIFF containers. Directory `2·p` holds the red channel of plane `p`
//! and directory `2·p + 1` its green channel.
//!
//! Planes are streamed strip by strip from the container into GPU textures.
//! Two viewer variants share one core:
//!  - Volume: the whole stack is resident in two 3D textures and a clip box,
//!    shortened by the depth cut, is drawn under a perspective camera.
//!  - Slice: only the plane pair at the depth cut is resident in two 2D
//!    textures and drawn on a single quad under an orthographic camera.
//!
//! A depth change in slice mode triggers exactly one load pass. Strips that
//! fail to decode leave the previous texture content in place and flag the
//! channel as stale; the render loop never sees decode errors.
//!
//! Rendering goes through the [`RenderBackend`] trait. [`WgpuBackend`]
//! renders offscreen with wgpu, while [`CpuTextures`] keeps the textures in
//! memory for headless use and testing.
//!
//! # Examples
//!
//! ## Loading a plane pair without a GPU
//!
//! ```no_run
//! # use plane_stream::{ChannelWindow, CpuTextures, PlaneCache, TiffStripDecoder, ViewMode};
//! # use plane_stream::{enums::Channel, volume::compose_plane};
//! let decoder = TiffStripDecoder::open("stack.tif").expect("should have opened container");
//! let mut cache = PlaneCache::new(decoder, ViewMode::Slice).expect("should hold a volume");
//! let mut textures = CpuTextures::default();
//! cache.initialize(&mut textures, 50);
//!
//! let image = compose_plane(
//!     &textures.plane(Channel::R, 0).expect("red plane resident"),
//!     &textures.plane(Channel::G, 0).expect("green plane resident"),
//!     &ChannelWindow::from_raw(96, 1600),
//! )
//! .expect("channels should have matching shapes");
//! image.save("plane-50.png").expect("should have written image");
//! ```

pub mod camera;
pub mod channel_window;
pub mod clip_geometry;
pub mod config;
pub mod enums;
pub mod gpu;
pub mod plane_cache;
pub mod render_loop;
pub mod strip_decoder;
pub mod texture_mirror;
pub mod volume;

pub use camera::{CameraState, TransformEvaluator, Viewport};
pub use channel_window::ChannelWindow;
pub use clip_geometry::{ClipGeometry, VolumeExtents};
pub use config::{ConfigError, ViewerConfig};
pub use enums::ViewMode;
pub use gpu::{Gpu, GpuError, WgpuBackend};
pub use plane_cache::{LoadReport, PlaneCache, RefreshOutcome, TextureSink};
pub use render_loop::{FramePacer, FrameReport, RenderBackend, Viewer};
pub use strip_decoder::{DecodeError, MemoryStripSource, StripSource, TiffStripDecoder};
pub use texture_mirror::CpuTextures;
