//! Viewer settings, loadable from RON.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::camera::{CameraState, Viewport};
use crate::clip_geometry::VolumeExtents;
use crate::enums::ViewMode;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Settings shared by the 2D and 3D viewer variants.
///
/// Angles are in sixteenths of a degree, channel bounds in raw slider units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewerConfig {
    pub mode: ViewMode,
    pub extents: VolumeExtents,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Frame rate cap, `None` for free-running.
    pub max_fps: Option<u32>,
    pub viewport: Viewport,
    pub x_rotation: i32,
    pub y_rotation: i32,
    pub z_rotation: i32,
    pub channel_min: i32,
    pub channel_max: i32,
    pub mipmaps: bool,
    pub clear_color: [f64; 4],
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self {
            mode: ViewMode::Volume,
            extents: VolumeExtents::default(),
            fov_y_degrees: 60.0,
            near: 0.1,
            far: 10.0,
            max_fps: Some(60),
            viewport: Viewport::default(),
            x_rotation: 160 * 16,
            y_rotation: 180 * 16,
            z_rotation: 180 * 16,
            channel_min: 96,
            channel_max: 1600,
            mipmaps: true,
            clear_color: [1.0, 1.0, 1.0, 1.0],
        }
    }
}

impl ViewerConfig {
    /// 3D variant: clip box under a perspective camera.
    pub fn volume() -> Self {
        Self {
            mode: ViewMode::Volume,
            ..Self::default()
        }
    }

    /// 2D variant: single quad under an orthographic camera.
    pub fn slice() -> Self {
        Self {
            mode: ViewMode::Slice,
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid RON, or holds values
    /// no viewer can use.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_ron(&text)?;
        debug!(path = %path.display(), mode = ?config.mode, "loaded viewer config");
        Ok(config)
    }

    pub fn from_ron(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.near > 0.0 && self.far > self.near) {
            return Err(ConfigError::Invalid(format!(
                "clip planes must satisfy 0 < near < far, got near={} far={}",
                self.near, self.far
            )));
        }
        if !(self.fov_y_degrees > 0.0 && self.fov_y_degrees < 180.0) {
            return Err(ConfigError::Invalid(format!(
                "field of view must be within (0, 180) degrees, got {}",
                self.fov_y_degrees
            )));
        }
        Ok(())
    }

    pub fn initial_camera(&self) -> CameraState {
        CameraState::with_rotation(self.x_rotation, self.y_rotation, self.z_rotation)
    }

    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn variants_differ_only_in_mode() {
        let volume = ViewerConfig::volume();
        let slice = ViewerConfig::slice();
        assert_eq!(volume.mode, ViewMode::Volume);
        assert_eq!(slice.mode, ViewMode::Slice);
        assert_eq!(
            ViewerConfig {
                mode: ViewMode::Volume,
                ..slice
            },
            volume
        );
    }

    #[test]
    fn initial_camera_uses_fixed_point_angles() {
        let camera = ViewerConfig::default().initial_camera();
        assert_eq!(camera.rotation(), (2560, 2880, 2880));
    }

    #[test]
    fn partial_ron_keeps_defaults() {
        let config = ViewerConfig::from_ron("(mode: slice, max_fps: None)").unwrap();
        assert_eq!(config.mode, ViewMode::Slice);
        assert_eq!(config.max_fps, None);
        assert_eq!(config.fov_y_degrees, 60.0);
        assert_eq!(config.extents, VolumeExtents::default());
    }

    #[test]
    fn rejects_inverted_clip_planes() {
        let err = ViewerConfig::from_ron("(near: 5.0, far: 1.0)").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "(extents: (half_x: 256.0), channel_max: 2000)").unwrap();
        let config = ViewerConfig::load(file.path()).unwrap();
        assert_eq!(config.extents.half_x, 256.0);
        assert_eq!(config.extents.half_y, 512.0);
        assert_eq!(config.channel_max, 2000);
    }

    #[test]
    fn missing_file_reports_path() {
        let err = ViewerConfig::load("/nonexistent/viewer.ron").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
