use glam::{Mat3, Mat4, Quat, Vec3, Vec4};

/// Clip-space depth convention of the projection matrix.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum DepthRange {
    /// OpenGL: near plane at -1, far plane at +1.
    NegativeOneToOne,
    /// Direct3D: near plane at 0, far plane at 1.
    ZeroToOne,
}

/// Smallest accepted tunnel vision factor.
pub const MIN_TUNNEL_VISION: f32 = 1.0e-3;

/// Perspective camera.
///
/// Axes follow the engine's world convention: forward is +X, left is +Y and
/// up is +Z when the orientation is the identity.
///
/// The tunnel vision factor `t ∈ (0, 1]` pulls the near plane toward the
/// camera origin (`near · t`) while moving the eye forward by
/// `(1 - t) · near` and widening the field of view so that the near-plane
/// rectangle and far plane stay where they were. At `t = 1` nothing changes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Camera {
    pub position: Vec3,
    orientation: Quat,
    near_clip: f32,
    far_clip: f32,
    fov_rad: f32,
    tunnel_vision_factor: f32,
}

impl Default for Camera {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            orientation: Quat::IDENTITY,
            near_clip: 10.0,
            far_clip: 1000.0,
            fov_rad: std::f32::consts::FRAC_PI_2,
            tunnel_vision_factor: 1.0,
        }
    }
}

impl Camera {
    pub fn new(position: Vec3, orientation: Quat, near_clip: f32, far_clip: f32, fov_rad: f32) -> Self {
        let mut camera = Self {
            position,
            ..Self::default()
        };
        camera.set_orientation(orientation);
        camera.set_clip(near_clip, far_clip);
        camera.set_fov_rad(fov_rad);
        camera
    }

    // ── orientation ───────────────────────────────────────────────────────

    pub fn orientation(&self) -> Quat {
        self.orientation
    }

    pub fn set_orientation(&mut self, orientation: Quat) {
        self.orientation = if orientation.length_squared() > f32::EPSILON {
            orientation.normalize()
        } else {
            Quat::IDENTITY
        };
    }

    #[inline]
    pub fn forward(&self) -> Vec3 {
        self.orientation * Vec3::X
    }

    #[inline]
    pub fn left(&self) -> Vec3 {
        self.orientation * Vec3::Y
    }

    #[inline]
    pub fn up(&self) -> Vec3 {
        self.orientation * Vec3::Z
    }

    /// Turns left by `theta` radians around the camera's up axis.
    pub fn adjust_yaw(&mut self, theta: f32) {
        self.rotate(Quat::from_axis_angle(self.up(), theta));
    }

    /// Tilts the view up by `phi` radians.
    pub fn adjust_pitch(&mut self, phi: f32) {
        self.rotate(Quat::from_axis_angle(self.left(), -phi));
    }

    /// Rolls clockwise (as seen by the camera) by `rho` radians.
    pub fn adjust_roll(&mut self, rho: f32) {
        self.rotate(Quat::from_axis_angle(self.forward(), rho));
    }

    /// Points the camera at `target`, keeping `world_up` as close to up as possible.
    pub fn look_at(&mut self, target: Vec3, world_up: Vec3) {
        let dir = target - self.position;
        if dir.length_squared() <= f32::EPSILON {
            return;
        }
        let forward = dir.normalize();
        let left = world_up.cross(forward);
        if left.length_squared() <= f32::EPSILON {
            self.set_orientation(Quat::from_rotation_arc(Vec3::X, forward));
            return;
        }
        let left = left.normalize();
        let up = forward.cross(left);
        self.set_orientation(Quat::from_mat3(&Mat3::from_cols(forward, left, up)));
    }

    fn rotate(&mut self, rotation: Quat) {
        self.set_orientation(rotation * self.orientation);
    }

    // ── movement ──────────────────────────────────────────────────────────

    pub fn move_forward(&mut self, distance: f32) {
        self.position += self.forward() * distance;
    }

    pub fn move_left(&mut self, distance: f32) {
        self.position += self.left() * distance;
    }

    pub fn move_up(&mut self, distance: f32) {
        self.position += self.up() * distance;
    }

    // ── clip planes / fov ─────────────────────────────────────────────────

    pub fn near_clip(&self) -> f32 {
        self.near_clip
    }

    pub fn far_clip(&self) -> f32 {
        self.far_clip
    }

    /// Sets both clip distances. `near` is kept positive and `far` beyond it.
    pub fn set_clip(&mut self, near: f32, far: f32) {
        self.near_clip = if near.is_finite() && near > 0.0 { near } else { f32::EPSILON };
        self.far_clip = if far.is_finite() && far > self.near_clip {
            far
        } else {
            self.near_clip * 2.0
        };
    }

    pub fn fov_rad(&self) -> f32 {
        self.fov_rad
    }

    pub fn fov_deg(&self) -> f32 {
        self.fov_rad.to_degrees()
    }

    /// Vertical field of view, clamped to `(0, π)`.
    pub fn set_fov_rad(&mut self, fov_rad: f32) {
        let max = std::f32::consts::PI - 1.0e-4;
        self.fov_rad = if fov_rad.is_finite() { fov_rad.clamp(1.0e-4, max) } else { self.fov_rad };
    }

    pub fn set_fov_deg(&mut self, fov_deg: f32) {
        self.set_fov_rad(fov_deg.to_radians());
    }

    // ── tunnel vision ─────────────────────────────────────────────────────

    pub fn tunnel_vision_factor(&self) -> f32 {
        self.tunnel_vision_factor
    }

    /// Clamped to `[MIN_TUNNEL_VISION, 1]`; non-finite input resets to 1.
    pub fn set_tunnel_vision_factor(&mut self, factor: f32) {
        self.tunnel_vision_factor = if factor.is_finite() {
            factor.clamp(MIN_TUNNEL_VISION, 1.0)
        } else {
            1.0
        };
    }

    pub fn tunneled_position(&self) -> Vec3 {
        self.position + self.forward() * ((1.0 - self.tunnel_vision_factor) * self.near_clip)
    }

    pub fn tunneled_near_clip(&self) -> f32 {
        self.near_clip * self.tunnel_vision_factor
    }

    pub fn tunneled_far_clip(&self) -> f32 {
        self.far_clip - self.near_clip + self.tunneled_near_clip()
    }

    pub fn tunneled_fov_rad(&self) -> f32 {
        if self.tunnel_vision_factor == 1.0 {
            return self.fov_rad;
        }
        2.0 * ((self.fov_rad * 0.5).tan() / self.tunnel_vision_factor).atan()
    }

    pub fn tunneled_fov_deg(&self) -> f32 {
        self.tunneled_fov_rad().to_degrees()
    }

    // ── matrices ──────────────────────────────────────────────────────────

    /// World-to-view transform, looking along [`forward`](Self::forward) from
    /// the tunneled eye position.
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_to_rh(self.tunneled_position(), self.forward(), self.up())
    }

    /// Perspective projection for a viewport of the given width/height ratio.
    pub fn projection_matrix(&self, aspect: f32, depth: DepthRange) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        let (fov, near, far) = (
            self.tunneled_fov_rad(),
            self.tunneled_near_clip(),
            self.tunneled_far_clip(),
        );
        match depth {
            DepthRange::NegativeOneToOne => Mat4::perspective_rh_gl(fov, aspect, near, far),
            DepthRange::ZeroToOne => Mat4::perspective_rh(fov, aspect, near, far),
        }
    }

    /// Projects a world-space point to normalized device coordinates.
    ///
    /// Returns `None` for points at or behind the eye.
    pub fn project(&self, point: Vec3, aspect: f32, depth: DepthRange) -> Option<Vec3> {
        let clip = self.projection_matrix(aspect, depth) * self.view_matrix() * point.extend(1.0);
        (clip.w > f32::EPSILON).then(|| Vec4::truncate(clip / clip.w))
    }
}
