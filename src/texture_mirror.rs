//! CPU-side copies of the resident channel textures.
//!
//! wgpu has no mipmap generation, so the GPU backend keeps a mirror of each
//! base level and derives the mip chain here. The same store doubles as a
//! headless [`TextureSink`].

use ndarray::{Array3, ArrayView2, Zip, s};

use crate::enums::Channel;
use crate::plane_cache::{RowRegion, TextureExtent, TextureSink};

/// Number of levels in a full mip chain for `extent`.
pub fn mip_level_count(extent: TextureExtent) -> u32 {
    let largest = extent.width.max(extent.height).max(extent.depth).max(1);
    u32::BITS - largest.leading_zeros()
}

/// Halve every axis longer than one texel with a box filter.
///
/// Odd trailing texels are dropped, matching the floor sizing of mip levels.
pub fn downsample(level: &Array3<u16>) -> Array3<u16> {
    let (depth, height, width) = level.dim();
    let half = |n: usize| (n / 2).max(1);
    let span = |i: usize, n: usize| if n > 1 { 2 * i..(2 * i + 2).min(n) } else { 0..1 };

    let mut out = Array3::<u16>::zeros((half(depth), half(height), half(width)));
    Zip::indexed(&mut out).par_for_each(|(z, y, x), texel| {
        let block = level.slice(s![span(z, depth), span(y, height), span(x, width)]);
        let sum: u64 = block.iter().map(|&v| u64::from(v)).sum();
        let count = block.len() as u64;
        *texel = ((sum + count / 2) / count) as u16;
    });
    out
}

/// Base level plus derived mip levels of one channel texture.
#[derive(Debug, Clone)]
pub struct TextureMirror {
    base: Array3<u16>,
    mips: Vec<Array3<u16>>,
}

impl TextureMirror {
    pub fn new(extent: TextureExtent) -> Self {
        Self {
            base: Array3::zeros((
                extent.depth as usize,
                extent.height as usize,
                extent.width as usize,
            )),
            mips: Vec::new(),
        }
    }

    pub fn extent(&self) -> TextureExtent {
        let (depth, height, width) = self.base.dim();
        TextureExtent {
            width: width as u32,
            height: height as u32,
            depth: depth as u32,
        }
    }

    /// Copy a strip into the base level. Rows or columns outside the texture
    /// are ignored.
    pub fn write_rows(&mut self, region: RowRegion, texels: &[u16]) {
        let (depth, height, width) = self.base.dim();
        let (z, y) = (region.z as usize, region.y as usize);
        if z >= depth || y >= height || region.width == 0 {
            return;
        }
        let rows = (region.rows as usize).min(height - y);
        let cols = (region.width as usize).min(width);
        for (row, chunk) in texels
            .chunks_exact(region.width as usize)
            .take(rows)
            .enumerate()
        {
            self.base
                .slice_mut(s![z, y + row, ..cols])
                .iter_mut()
                .zip(&chunk[..cols])
                .for_each(|(dst, &src)| *dst = src);
        }
    }

    /// Recompute every level below the base.
    pub fn rebuild_mips(&mut self) {
        let mut mips: Vec<Array3<u16>> = Vec::new();
        loop {
            let current = mips.last().unwrap_or(&self.base);
            if current.len() <= 1 {
                break;
            }
            let next = downsample(current);
            mips.push(next);
        }
        self.mips = mips;
    }

    pub fn base(&self) -> &Array3<u16> {
        &self.base
    }

    /// Levels 1.. of the chain, largest first.
    pub fn mips(&self) -> &[Array3<u16>] {
        &self.mips
    }

    pub fn plane(&self, z: usize) -> Option<ArrayView2<'_, u16>> {
        (z < self.base.dim().0).then(|| self.base.slice(s![z, .., ..]))
    }
}

/// Headless texture store for both channels.
#[derive(Debug, Clone, Default)]
pub struct CpuTextures {
    channels: [Option<TextureMirror>; 2],
    mip_generations: [usize; 2],
    row_writes: [usize; 2],
}

impl CpuTextures {
    pub fn mirror(&self, channel: Channel) -> Option<&TextureMirror> {
        self.channels[channel.index()].as_ref()
    }

    pub fn extent(&self, channel: Channel) -> Option<TextureExtent> {
        self.mirror(channel).map(TextureMirror::extent)
    }

    pub fn plane(&self, channel: Channel, z: usize) -> Option<ArrayView2<'_, u16>> {
        self.mirror(channel)?.plane(z)
    }

    /// How many times the mip chain of `channel` was rebuilt.
    pub fn mip_generations(&self, channel: Channel) -> usize {
        self.mip_generations[channel.index()]
    }

    /// How many strip writes `channel` received.
    pub fn row_writes(&self, channel: Channel) -> usize {
        self.row_writes[channel.index()]
    }
}

impl TextureSink for CpuTextures {
    fn allocate(&mut self, channel: Channel, extent: TextureExtent) {
        self.channels[channel.index()] = Some(TextureMirror::new(extent));
    }

    fn write_rows(&mut self, channel: Channel, region: RowRegion, texels: &[u16]) {
        if let Some(mirror) = self.channels[channel.index()].as_mut() {
            mirror.write_rows(region, texels);
            self.row_writes[channel.index()] += 1;
        }
    }

    fn generate_mipmaps(&mut self, channel: Channel) {
        if let Some(mirror) = self.channels[channel.index()].as_mut() {
            mirror.rebuild_mips();
            self.mip_generations[channel.index()] += 1;
        }
    }
}
