//! Bounding box / quad geometry exposing the selected depth range.

use serde::{Deserialize, Serialize};

use crate::enums::Dimensionality;

/// Two triangles per face, six faces, four unshared vertices per face.
pub const BOX_INDICES: [u16; 36] = [
    0, 1, 2, 2, 3, 0, // front
    4, 5, 6, 6, 7, 4, // top
    8, 9, 10, 10, 11, 8, // back
    12, 13, 14, 14, 15, 12, // bottom
    16, 17, 18, 18, 19, 16, // left
    20, 21, 22, 22, 23, 20, // right
];

pub const QUAD_INDICES: [u16; 6] = [0, 1, 2, 2, 3, 0];

/// Corner selectors `(x, y, z)` into the low (0) / high (1) limits, per face.
const BOX_FACES: [[(usize, usize, usize); 4]; 6] = [
    [(0, 0, 1), (1, 0, 1), (1, 1, 1), (0, 1, 1)],
    [(0, 1, 1), (1, 1, 1), (1, 1, 0), (0, 1, 0)],
    [(1, 0, 0), (0, 0, 0), (0, 1, 0), (1, 1, 0)],
    [(0, 0, 0), (1, 0, 0), (1, 0, 1), (0, 0, 1)],
    [(0, 0, 0), (0, 0, 1), (0, 1, 1), (0, 1, 0)],
    [(1, 0, 1), (1, 0, 0), (1, 1, 0), (1, 1, 1)],
];

const QUAD_CORNERS: [(usize, usize); 4] = [(0, 0), (1, 0), (1, 1), (0, 1)];

/// Fixed world-space size of the volume.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VolumeExtents {
    pub half_x: f32,
    pub half_y: f32,
    /// Physical distance between adjacent planes, in x/y voxel units.
    pub plane_spacing: f32,
    #[serde(skip)]
    pub plane_count: u32,
}

impl Default for VolumeExtents {
    fn default() -> Self {
        Self {
            half_x: 512.0,
            half_y: 512.0,
            plane_spacing: 1.772_701,
            plane_count: 144,
        }
    }
}

impl VolumeExtents {
    pub fn with_plane_count(mut self, plane_count: u32) -> Self {
        self.plane_count = plane_count;
        self
    }

    /// Half of the full physical depth.
    pub fn half_z(&self) -> f32 {
        self.plane_count as f32 / 2.0 * self.plane_spacing
    }

    /// `(near, far)` z limits with `depth_cut` planes removed from the far end.
    pub fn z_limits(&self, depth_cut: u32) -> [f32; 2] {
        let cut = depth_cut.min(self.plane_count.saturating_sub(1));
        let remaining = (self.plane_count - cut) as f32;
        [
            -self.half_z(),
            (remaining - self.plane_count as f32 / 2.0) * self.plane_spacing,
        ]
    }
}

/// Per-frame geometry: flat position and texture coordinate arrays plus a
/// fixed triangle list.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipGeometry {
    pub dimensionality: Dimensionality,
    pub positions: Vec<f32>,
    pub tex_coords: Vec<f32>,
    pub indices: &'static [u16],
}

impl ClipGeometry {
    pub fn build(dimensionality: Dimensionality, extents: &VolumeExtents, depth_cut: u32) -> Self {
        match dimensionality {
            Dimensionality::Three => Self::clip_box(extents, depth_cut),
            Dimensionality::Two => Self::quad(extents),
        }
    }

    /// Box whose far z face is pulled in by `depth_cut` planes.
    pub fn clip_box(extents: &VolumeExtents, depth_cut: u32) -> Self {
        let xlim = [-extents.half_x, extents.half_x];
        let ylim = [-extents.half_y, extents.half_y];
        let zlim = extents.z_limits(depth_cut);

        // Normalized texture depth follows world z so the cut face samples
        // the plane it sits on.
        let full_depth = extents.plane_count as f32 * extents.plane_spacing;
        let tex_z = if full_depth > 0.0 {
            [0.0, (zlim[1] - zlim[0]) / full_depth]
        } else {
            [0.0, 0.0]
        };

        let mut positions = Vec::with_capacity(24 * 3);
        let mut tex_coords = Vec::with_capacity(24 * 3);
        for &(x, y, z) in BOX_FACES.iter().flatten() {
            positions.extend_from_slice(&[xlim[x], ylim[y], zlim[z]]);
            tex_coords.extend_from_slice(&[x as f32, y as f32, tex_z[z]]);
        }

        Self {
            dimensionality: Dimensionality::Three,
            positions,
            tex_coords,
            indices: &BOX_INDICES,
        }
    }

    /// Single quad spanning the plane; independent of the depth cut.
    pub fn quad(extents: &VolumeExtents) -> Self {
        let xlim = [-extents.half_x, extents.half_x];
        let ylim = [-extents.half_y, extents.half_y];

        let mut positions = Vec::with_capacity(8);
        let mut tex_coords = Vec::with_capacity(8);
        for &(x, y) in &QUAD_CORNERS {
            positions.extend_from_slice(&[xlim[x], ylim[y]]);
            tex_coords.extend_from_slice(&[x as f32, y as f32]);
        }

        Self {
            dimensionality: Dimensionality::Two,
            positions,
            tex_coords,
            indices: &QUAD_INDICES,
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.positions.len() / self.dimensionality.components()
    }

    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    /// Largest z among the vertices; 0 for a quad.
    pub fn max_z(&self) -> f32 {
        match self.dimensionality {
            Dimensionality::Two => 0.0,
            Dimensionality::Three => self
                .positions
                .chunks_exact(3)
                .map(|p| p[2])
                .fold(f32::NEG_INFINITY, f32::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn extents() -> VolumeExtents {
        VolumeExtents::default().with_plane_count(144)
    }

    #[test]
    fn box_has_unshared_faces() {
        let geometry = ClipGeometry::clip_box(&extents(), 0);
        assert_eq!(geometry.vertex_count(), 24);
        assert_eq!(geometry.tex_coords.len(), 72);
        assert_eq!(geometry.index_count(), 36);
        assert!(geometry.indices.iter().all(|&i| i < 24));
    }

    #[test]
    fn uncut_box_reaches_full_half_depth() {
        let extents = extents();
        let geometry = ClipGeometry::clip_box(&extents, 0);
        assert_relative_eq!(geometry.max_z(), extents.half_z(), epsilon = 1e-3);
        assert_relative_eq!(extents.half_z(), 72.0 * 1.772_701, epsilon = 1e-3);
        let max_tex_z = geometry
            .tex_coords
            .chunks_exact(3)
            .map(|t| t[2])
            .fold(0.0, f32::max);
        assert_relative_eq!(max_tex_z, 1.0, epsilon = 1e-5);
    }

    #[test]
    fn far_face_moves_in_monotonically() {
        let extents = extents();
        let mut previous = f32::INFINITY;
        for cut in 0..200 {
            let z = ClipGeometry::clip_box(&extents, cut).max_z();
            assert!(z <= previous, "cut {cut}: {z} > {previous}");
            assert!(z > -extents.half_z());
            previous = z;
        }
    }

    #[test]
    fn cut_texture_depth_tracks_world_depth() {
        let extents = extents();
        let geometry = ClipGeometry::clip_box(&extents, 44);
        let max_tex_z = geometry
            .tex_coords
            .chunks_exact(3)
            .map(|t| t[2])
            .fold(0.0, f32::max);
        assert_relative_eq!(max_tex_z, 100.0 / 144.0, epsilon = 1e-5);
    }

    #[test]
    fn quad_ignores_depth_cut() {
        let extents = extents();
        let quad = ClipGeometry::build(Dimensionality::Two, &extents, 0);
        assert_eq!(quad, ClipGeometry::build(Dimensionality::Two, &extents, 90));
        assert_eq!(quad.vertex_count(), 4);
        assert_eq!(quad.index_count(), 6);
        assert_eq!(quad.tex_coords, vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn rebuilding_is_idempotent() {
        let extents = extents();
        let a = ClipGeometry::build(Dimensionality::Three, &extents, 17);
        let b = ClipGeometry::build(Dimensionality::Three, &extents, 17);
        assert_eq!(a, b);
    }
}
