use crate::channel_window::ChannelWindow;
use crate::enums::Channel;
use crate::strip_decoder::ImageLayout;

use image::{ImageBuffer, Rgb};
use ndarray::ArrayView2;
use rayon::prelude::*;
use tracing::warn;

/// How planes and channels map onto container directories.
///
/// Directory `2 * plane` holds channel R of `plane`, `2 * plane + 1` holds
/// channel G.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VolumeLayout {
    pub width: u32,
    pub height: u32,
    pub plane_count: u32,
}

impl VolumeLayout {
    /// Derive the volume layout from the first image and the directory count.
    pub fn from_container(first: &ImageLayout, image_count: usize) -> Self {
        if image_count % 2 != 0 {
            warn!(
                image_count,
                "odd directory count, ignoring trailing unpaired image"
            );
        }
        Self {
            width: first.width,
            height: first.height,
            plane_count: (image_count / 2) as u32,
        }
    }

    #[inline]
    pub fn directory_index(&self, plane: u32, channel: Channel) -> usize {
        plane as usize * 2 + channel.index()
    }

    /// Clamp a requested depth into the valid plane range.
    #[inline]
    pub fn clamp_plane(&self, plane: i64) -> u32 {
        plane.clamp(0, i64::from(self.plane_count.saturating_sub(1))) as u32
    }
}

#[inline]
fn window_to_u8(value: u16, window: &ChannelWindow) -> u8 {
    (window.map(value) * 255.0).round().clamp(0.0, 255.0) as u8
}

/// Composite a resident plane pair through the intensity window.
///
/// Channel R goes to red, channel G to green, blue stays empty. Both views
/// must have the same `(height, width)` shape.
pub fn compose_plane(
    r: &ArrayView2<'_, u16>,
    g: &ArrayView2<'_, u16>,
    window: &ChannelWindow,
) -> Option<ImageBuffer<Rgb<u8>, Vec<u8>>> {
    if r.dim() != g.dim() {
        return None;
    }
    let (height, width) = r.dim();
    let r = r.as_standard_layout();
    let g = g.as_standard_layout();
    let pixel_data: Vec<u8> = r
        .as_slice()?
        .par_iter()
        .zip(g.as_slice()?.par_iter())
        .flat_map_iter(|(&r, &g)| [window_to_u8(r, window), window_to_u8(g, window), 0])
        .collect();
    ImageBuffer::from_raw(width as u32, height as u32, pixel_data)
}
