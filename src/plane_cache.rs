//! Streaming loader keeping the two channel textures in step with the
//! requested depth.
//!
//! The cache owns the container exclusively. A refresh compares the
//! requested plane with the last plane it loaded and only then walks the
//! strips of that plane's two directories, pushing each strip into the
//! matching rows of the resident texture. Nothing is read back from the
//! graphics side to decide whether a load is due.

use tracing::{debug, info, warn};

use crate::enums::{Channel, ViewMode};
use crate::strip_decoder::{DecodeError, ImageLayout, StripSource};
use crate::volume::VolumeLayout;

/// Size of a resident channel texture. `depth` is 1 for 2D textures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// Destination of one strip upload: `rows` full-width rows starting at row
/// `y` of slice `z`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRegion {
    pub y: u32,
    pub z: u32,
    pub width: u32,
    pub rows: u32,
}

/// Graphics-side owner of the two resident channel textures.
pub trait TextureSink {
    /// (Re)create the texture for `channel`; previous contents are discarded.
    fn allocate(&mut self, channel: Channel, extent: TextureExtent);

    /// Overwrite `region` of the base level with `texels` (row-major).
    fn write_rows(&mut self, channel: Channel, region: RowRegion, texels: &[u16]);

    /// Rebuild the mip chain of `channel` from its base level.
    fn generate_mipmaps(&mut self, channel: Channel);
}

/// Strip accounting for one load pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub images: usize,
    pub strips_loaded: usize,
    pub strips_failed: usize,
}

impl LoadReport {
    fn merge(&mut self, other: LoadReport) {
        self.images += other.images;
        self.strips_loaded += other.strips_loaded;
        self.strips_failed += other.strips_failed;
    }

    pub fn is_complete(&self) -> bool {
        self.strips_failed == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// The resident textures already match the request.
    Unchanged,
    /// A load pass ran.
    Loaded(LoadReport),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Residency {
    Empty,
    Plane(u32),
    Volume,
}

pub struct PlaneCache<S> {
    source: S,
    mode: ViewMode,
    volume: VolumeLayout,
    image: ImageLayout,
    strip_buf: Vec<u16>,
    residency: Residency,
    stale: [bool; 2],
    mipmaps: bool,
    passes: usize,
}

impl<S: std::fmt::Debug> std::fmt::Debug for PlaneCache<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaneCache")
            .field("source", &self.source)
            .field("mode", &self.mode)
            .field("volume", &self.volume)
            .field("residency", &self.residency)
            .field("stale", &self.stale)
            .field("passes", &self.passes)
            .finish_non_exhaustive()
    }
}

impl<S: StripSource> PlaneCache<S> {
    /// Take ownership of `source` and read the layout of its first image.
    ///
    /// # Errors
    ///
    /// Fails if the first directory cannot be selected or the container does
    /// not hold at least one plane pair.
    pub fn new(mut source: S, mode: ViewMode) -> Result<Self, DecodeError> {
        let image = source.select_image(0)?;
        let volume = VolumeLayout::from_container(&image, source.image_count());
        if volume.plane_count == 0 {
            return Err(DecodeError::UnsupportedLayout(
                "container holds no plane pairs".into(),
            ));
        }
        info!(
            width = volume.width,
            height = volume.height,
            planes = volume.plane_count,
            strips = image.strip_count,
            rows_per_strip = image.rows_per_strip,
            ?mode,
            "plane cache ready"
        );

        Ok(Self {
            source,
            mode,
            volume,
            image,
            strip_buf: vec![0; image.max_strip_len()],
            residency: Residency::Empty,
            stale: [false; 2],
            mipmaps: true,
            passes: 0,
        })
    }

    pub fn with_mipmaps(mut self, mipmaps: bool) -> Self {
        self.mipmaps = mipmaps;
        self
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn volume(&self) -> &VolumeLayout {
        &self.volume
    }

    pub fn texture_extent(&self) -> TextureExtent {
        TextureExtent {
            width: self.volume.width,
            height: self.volume.height,
            depth: match self.mode {
                ViewMode::Volume => self.volume.plane_count,
                ViewMode::Slice => 1,
            },
        }
    }

    /// Plane currently resident in slice mode.
    pub fn resident_plane(&self) -> Option<u32> {
        match self.residency {
            Residency::Plane(plane) => Some(plane),
            _ => None,
        }
    }

    pub fn is_volume_resident(&self) -> bool {
        self.residency == Residency::Volume
    }

    /// Whether the last pass left strips of `channel` with older content.
    pub fn is_stale(&self, channel: Channel) -> bool {
        self.stale[channel.index()]
    }

    /// Number of load passes run so far.
    pub fn passes(&self) -> usize {
        self.passes
    }

    /// Forget what is resident so the next refresh reloads.
    pub fn invalidate(&mut self) {
        self.residency = Residency::Empty;
    }

    /// Allocate both channel textures and load the initial content.
    pub fn initialize(&mut self, sink: &mut impl TextureSink, depth: u32) -> LoadReport {
        let extent = self.texture_extent();
        for channel in Channel::ALL {
            sink.allocate(channel, extent);
        }
        self.residency = Residency::Empty;
        match self.refresh(sink, depth) {
            RefreshOutcome::Loaded(report) => report,
            RefreshOutcome::Unchanged => LoadReport::default(),
        }
    }

    /// Bring the resident textures in line with `depth`.
    ///
    /// In volume mode the whole stack is loaded once and later calls are
    /// no-ops. In slice mode the plane pair at `depth` is loaded unless it is
    /// already resident.
    pub fn refresh(&mut self, sink: &mut impl TextureSink, depth: u32) -> RefreshOutcome {
        let target = match self.mode {
            ViewMode::Volume => Residency::Volume,
            ViewMode::Slice => Residency::Plane(self.volume.clamp_plane(i64::from(depth))),
        };
        if target == self.residency {
            return RefreshOutcome::Unchanged;
        }

        let planes = match target {
            Residency::Plane(plane) => plane..plane + 1,
            _ => 0..self.volume.plane_count,
        };
        debug!(?planes, "load pass");

        let mut report = LoadReport::default();
        self.stale = [false; 2];
        for channel in Channel::ALL {
            for plane in planes.clone() {
                let z = match self.mode {
                    ViewMode::Volume => plane,
                    ViewMode::Slice => 0,
                };
                report.merge(self.load_image(sink, channel, plane, z));
            }
            if self.mipmaps {
                sink.generate_mipmaps(channel);
            }
        }

        self.residency = target;
        self.passes += 1;
        if report.is_complete() {
            info!(
                images = report.images,
                strips = report.strips_loaded,
                "texture load complete"
            );
        } else {
            warn!(
                images = report.images,
                strips = report.strips_loaded,
                failed = report.strips_failed,
                "texture load left stale strips"
            );
        }
        RefreshOutcome::Loaded(report)
    }

    /// Stream every strip of one channel image of `plane` into slice `z`.
    fn load_image(
        &mut self,
        sink: &mut impl TextureSink,
        channel: Channel,
        plane: u32,
        z: u32,
    ) -> LoadReport {
        let directory = self.volume.directory_index(plane, channel);
        let expected = self.image;
        let mut report = LoadReport {
            images: 1,
            ..LoadReport::default()
        };

        let layout = match self.source.select_image(directory) {
            Ok(layout) if layout.width == expected.width && layout.height == expected.height => {
                layout
            }
            Ok(layout) => {
                warn!(
                    directory,
                    ?layout,
                    ?expected,
                    "directory size differs from volume, skipping"
                );
                self.stale[channel.index()] = true;
                report.strips_failed = expected.strip_count as usize;
                return report;
            }
            Err(err) => {
                warn!(directory, %err, "cannot select directory");
                self.stale[channel.index()] = true;
                report.strips_failed = expected.strip_count as usize;
                return report;
            }
        };

        if layout.max_strip_len() > self.strip_buf.len() {
            self.strip_buf.resize(layout.max_strip_len(), 0);
        }

        for strip in 0..layout.strip_count {
            match self.source.read_strip(strip, &mut self.strip_buf) {
                Ok(samples) => {
                    let region = RowRegion {
                        y: layout.strip_offset(strip),
                        z,
                        width: layout.width,
                        rows: layout.strip_rows(strip),
                    };
                    sink.write_rows(channel, region, &self.strip_buf[..samples]);
                    report.strips_loaded += 1;
                }
                Err(err) => {
                    warn!(directory, strip, %err, "strip decode failed");
                    self.stale[channel.index()] = true;
                    report.strips_failed += 1;
                }
            }
        }
        report
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Release the container.
    pub fn into_source(self) -> S {
        self.source
    }
}
