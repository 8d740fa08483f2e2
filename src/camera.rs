//! Camera state and per-frame model-view-projection evaluation.

use glam::{Mat4, Vec2, Vec3};

use crate::enums::{DragButton, ProjectionKind, ViewMode};

/// Fixed-point angle units per degree.
pub const ANGLE_UNITS_PER_DEGREE: i32 = 16;

/// One full turn in fixed-point units.
pub const FULL_TURN: i32 = 360 * ANGLE_UNITS_PER_DEGREE;

pub const MIN_ZOOM: f32 = 0.05;
pub const MAX_ZOOM: f32 = 50.0;

/// Fixed-point units applied per pixel of mouse drag.
const DRAG_GAIN: i32 = 8;

/// Wrap a fixed-point angle into `[0, FULL_TURN)`.
#[inline]
pub fn normalize_angle(angle: i32) -> i32 {
    angle.rem_euclid(FULL_TURN)
}

/// Mouse travel in pixels to an angle step, reduced first so any delta fits.
fn drag_step(pixels: i32) -> i32 {
    pixels.rem_euclid(FULL_TURN) * DRAG_GAIN
}

#[inline]
fn to_radians(angle: i32) -> f32 {
    (angle as f32 / ANGLE_UNITS_PER_DEGREE as f32).to_radians()
}

/// Size of the render surface in pixels. Either side may be zero while the
/// window is unmapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 800,
            height: 600,
        }
    }
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width over height; 1 for a degenerate viewport.
    pub fn aspect(&self) -> f32 {
        if self.width == 0 || self.height == 0 {
            1.0
        } else {
            self.width as f32 / self.height as f32
        }
    }

    fn shorter_side(&self) -> f32 {
        self.width.min(self.height).max(1) as f32
    }
}

/// Rotation, zoom and pan as set by the user.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    x_rot: i32,
    y_rot: i32,
    z_rot: i32,
    zoom: f32,
    /// Pan offset in viewport pixels, y up.
    pan: Vec2,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            x_rot: 0,
            y_rot: 0,
            z_rot: 0,
            zoom: 1.0,
            pan: Vec2::ZERO,
        }
    }
}

impl CameraState {
    pub fn with_rotation(x: i32, y: i32, z: i32) -> Self {
        Self {
            x_rot: normalize_angle(x),
            y_rot: normalize_angle(y),
            z_rot: normalize_angle(z),
            ..Self::default()
        }
    }

    pub fn rotation(&self) -> (i32, i32, i32) {
        (self.x_rot, self.y_rot, self.z_rot)
    }

    pub fn zoom(&self) -> f32 {
        self.zoom
    }

    pub fn pan(&self) -> Vec2 {
        self.pan
    }

    fn set_angle(slot: &mut i32, angle: i32) -> bool {
        let angle = normalize_angle(angle);
        if *slot == angle {
            return false;
        }
        *slot = angle;
        true
    }

    pub fn set_x_rotation(&mut self, angle: i32) -> bool {
        Self::set_angle(&mut self.x_rot, angle)
    }

    pub fn set_y_rotation(&mut self, angle: i32) -> bool {
        Self::set_angle(&mut self.y_rot, angle)
    }

    pub fn set_z_rotation(&mut self, angle: i32) -> bool {
        Self::set_angle(&mut self.z_rot, angle)
    }

    pub fn set_zoom(&mut self, zoom: f32) -> bool {
        let zoom = if zoom.is_finite() {
            zoom.clamp(MIN_ZOOM, MAX_ZOOM)
        } else {
            1.0
        };
        if zoom == self.zoom {
            return false;
        }
        self.zoom = zoom;
        true
    }

    pub fn set_pan(&mut self, pan: Vec2) -> bool {
        if pan == self.pan || !pan.is_finite() {
            return false;
        }
        self.pan = pan;
        true
    }

    /// Apply a mouse drag of `(dx, dy)` pixels (y down).
    ///
    /// In volume mode the left button tilts about X and Y, the right button
    /// about X and Z. In slice mode the left button pans and the right
    /// button rolls.
    pub fn drag(&mut self, dx: i32, dy: i32, button: DragButton, mode: ViewMode) -> bool {
        match (mode, button) {
            (ViewMode::Volume, DragButton::Left) => {
                let x = self.set_x_rotation(self.x_rot + drag_step(dy));
                let y = self.set_y_rotation(self.y_rot - drag_step(dx));
                x || y
            }
            (ViewMode::Volume, DragButton::Right) => {
                let x = self.set_x_rotation(self.x_rot + drag_step(dy));
                let z = self.set_z_rotation(self.z_rot - drag_step(dx));
                x || z
            }
            (ViewMode::Slice, DragButton::Left) => {
                self.set_pan(self.pan + Vec2::new(dx as f32, -(dy as f32)))
            }
            (ViewMode::Slice, DragButton::Right) => {
                self.set_z_rotation(self.z_rot - drag_step(dx))
            }
        }
    }
}

/// Fixed scene setup from which the per-frame matrix is derived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransformEvaluator {
    pub projection: ProjectionKind,
    pub fov_y_degrees: f32,
    pub near: f32,
    pub far: f32,
}

impl TransformEvaluator {
    pub fn new(mode: ViewMode, fov_y_degrees: f32, near: f32, far: f32) -> Self {
        Self {
            projection: mode.projection(),
            fov_y_degrees,
            near,
            far,
        }
    }

    /// Model-view-projection for this frame.
    pub fn evaluate(&self, camera: &CameraState, viewport: Viewport) -> Mat4 {
        match self.projection {
            ProjectionKind::Perspective => self.perspective_mvp(camera, viewport),
            ProjectionKind::Orthographic => self.orthographic_mvp(camera, viewport),
        }
    }

    fn perspective_mvp(&self, camera: &CameraState, viewport: Viewport) -> Mat4 {
        let rotation = Mat4::from_rotation_x(to_radians(camera.x_rot))
            * Mat4::from_rotation_y(to_radians(camera.y_rot))
            * Mat4::from_rotation_z(to_radians(camera.z_rot));
        let model = Mat4::from_translation(Vec3::new(0.0, 0.0, -4.0))
            * Mat4::from_scale(Vec3::splat(camera.zoom / 256.0));
        let view = Mat4::look_at_rh(
            Vec3::new(0.0, 2.0, 0.0),
            Vec3::new(0.0, 0.0, -4.0),
            Vec3::Y,
        );
        let pan = camera.pan * (4.0 / viewport.shorter_side());
        let projection = Mat4::perspective_rh(
            self.fov_y_degrees.to_radians(),
            viewport.aspect(),
            self.near,
            self.far,
        );

        projection * Mat4::from_translation(pan.extend(0.0)) * view * model * rotation
    }

    fn orthographic_mvp(&self, camera: &CameraState, viewport: Viewport) -> Mat4 {
        let roll = Mat4::from_rotation_z(to_radians(camera.z_rot));
        let model = Mat4::from_scale(Vec3::splat(1.0 / 1024.0));
        let view = Mat4::look_at_rh(Vec3::Z, Vec3::ZERO, Vec3::Y);

        let range = viewport.shorter_side() * 2.0 * camera.zoom;
        let half_w = viewport.width.max(1) as f32 / range;
        let half_h = viewport.height.max(1) as f32 / range;
        let projection = Mat4::orthographic_rh(-half_w, half_w, -half_h, half_h, -10.0, 10.0);
        let pan = camera.pan / (viewport.shorter_side() * camera.zoom);

        projection * Mat4::from_translation(pan.extend(0.0)) * view * model * roll
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use glam::Vec4;

    fn clip_to_ndc(clip: Vec4) -> Vec3 {
        clip.truncate() / clip.w
    }

    #[test]
    fn normalization_lands_in_range_and_is_idempotent() {
        for angle in [-100_000, -5761, -5760, -1, 0, 1, 5759, 5760, 5761, 123_456] {
            let once = normalize_angle(angle);
            assert!((0..FULL_TURN).contains(&once), "{angle} -> {once}");
            assert_eq!(normalize_angle(once), once);
        }
        assert_eq!(normalize_angle(-16), FULL_TURN - 16);
        assert_eq!(normalize_angle(FULL_TURN), 0);
    }

    #[test]
    fn setters_report_changes_only() {
        let mut camera = CameraState::default();
        assert!(camera.set_x_rotation(160 * 16));
        assert!(!camera.set_x_rotation(160 * 16 + FULL_TURN));
        assert!(!camera.set_zoom(1.0));
        assert!(camera.set_zoom(500.0));
        assert_relative_eq!(camera.zoom(), MAX_ZOOM);
        assert!(camera.set_zoom(f32::NAN));
        assert_relative_eq!(camera.zoom(), 1.0);
    }

    #[test]
    fn huge_drag_wraps_instead_of_overflowing() {
        let mut camera = CameraState::default();
        assert!(camera.drag(300_000_000, 0, DragButton::Left, ViewMode::Volume));
        // 300_000_000 px is 1920 px modulo a full turn.
        assert_eq!(camera.rotation(), (0, normalize_angle(-1920 * 8), 0));

        camera.drag(i32::MIN, i32::MAX, DragButton::Right, ViewMode::Volume);
        camera.drag(i32::MAX, 0, DragButton::Right, ViewMode::Slice);
        let (x, y, z) = camera.rotation();
        for angle in [x, y, z] {
            assert!((0..FULL_TURN).contains(&angle));
        }
    }

    #[test]
    fn volume_drag_follows_mouse_gain() {
        let mut camera = CameraState::default();
        assert!(camera.drag(2, 3, DragButton::Left, ViewMode::Volume));
        assert_eq!(camera.rotation(), (24, FULL_TURN - 16, 0));
        assert!(camera.drag(1, 0, DragButton::Right, ViewMode::Volume));
        assert_eq!(camera.rotation(), (24, FULL_TURN - 16, FULL_TURN - 8));
        assert!(!camera.drag(0, 0, DragButton::Left, ViewMode::Volume));
    }

    #[test]
    fn slice_drag_pans_and_rolls() {
        let mut camera = CameraState::default();
        assert!(camera.drag(10, 4, DragButton::Left, ViewMode::Slice));
        assert_eq!(camera.pan(), Vec2::new(10.0, -4.0));
        assert_eq!(camera.rotation(), (0, 0, 0));
        assert!(camera.drag(2, 0, DragButton::Right, ViewMode::Slice));
        assert_eq!(camera.rotation().2, FULL_TURN - 16);
    }

    #[test]
    fn zero_height_viewport_yields_finite_matrix() {
        let camera = CameraState::with_rotation(2560, 2880, 2880);
        for mode in [ViewMode::Volume, ViewMode::Slice] {
            let evaluator = TransformEvaluator::new(mode, 60.0, 0.1, 10.0);
            for viewport in [Viewport::new(800, 0), Viewport::new(0, 0), Viewport::new(0, 600)] {
                let mvp = evaluator.evaluate(&camera, viewport);
                assert!(mvp.is_finite(), "{mode:?} {viewport:?}");
            }
        }
    }

    #[test]
    fn volume_centre_projects_inside_clip_space() {
        let evaluator = TransformEvaluator::new(ViewMode::Volume, 60.0, 0.1, 10.0);
        let camera = CameraState::with_rotation(2560, 2880, 2880);
        let mvp = evaluator.evaluate(&camera, Viewport::new(800, 600));
        let ndc = clip_to_ndc(mvp * Vec4::new(0.0, 0.0, 0.0, 1.0));
        assert!(ndc.x.abs() <= 1.0 && ndc.y.abs() <= 1.0, "{ndc}");
        assert!((0.0..=1.0).contains(&ndc.z), "{ndc}");
    }

    #[test]
    fn full_turn_matches_no_rotation() {
        let evaluator = TransformEvaluator::new(ViewMode::Volume, 60.0, 0.1, 10.0);
        let viewport = Viewport::new(640, 480);
        let a = evaluator.evaluate(&CameraState::with_rotation(0, 0, 0), viewport);
        let b = evaluator.evaluate(&CameraState::with_rotation(FULL_TURN, -FULL_TURN, 0), viewport);
        assert!(a.abs_diff_eq(b, 1e-6));
    }

    #[test]
    fn slice_quad_fills_shorter_side() {
        let evaluator = TransformEvaluator::new(ViewMode::Slice, 60.0, 0.1, 10.0);
        let camera = CameraState::default();
        let mvp = evaluator.evaluate(&camera, Viewport::new(800, 600));
        let corner = clip_to_ndc(mvp * Vec4::new(512.0, 512.0, 0.0, 1.0));
        // The quad spans the shorter side exactly.
        assert_relative_eq!(corner.y, 1.0, epsilon = 1e-5);
        assert_relative_eq!(corner.x, 0.75, epsilon = 1e-5);

        let mut zoomed = camera;
        zoomed.set_zoom(2.0);
        let mvp = evaluator.evaluate(&zoomed, Viewport::new(800, 600));
        let corner = clip_to_ndc(mvp * Vec4::new(512.0, 512.0, 0.0, 1.0));
        assert_relative_eq!(corner.y, 2.0, epsilon = 1e-5);
    }
}
