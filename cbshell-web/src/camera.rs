use cbshell_shared::math;
use cbshell_shared::FrameUniforms;
use glam::{Mat4, Vec2, Vec3};

use crate::settings::{SettingSpec, Settings};

pub const CAMERA: &str = "camera";

const MIN_DISTANCE: f32 = 10.0;
const MAX_DISTANCE: f32 = 20_000.0;
const MIN_PITCH: f32 = 0.1;
const MAX_PITCH: f32 = 1.5;
const NEAR: f32 = 1.0;
const FAR: f32 = 100_000.0;

/// Wheel units per e-fold of zoom at `zoomSpeed = 1`.
const ZOOM_SCALE: f32 = 500.0;
/// Pan per wheel/drag pixel, as a fraction of the camera distance.
const PAN_SCALE: f32 = 0.002;
/// Radians per drag pixel at `rotationSpeed = 1`.
const ROTATE_SCALE: f32 = 0.005;

pub fn settings_spec() -> Vec<(&'static str, SettingSpec)> {
    vec![
        ("zoomSpeed", SettingSpec::new(1.0, "Zoom Speed", 0.1, 5.0, 0.1)),
        ("panSpeed", SettingSpec::new(1.0, "Pan Speed", 0.1, 5.0, 0.1)),
        ("rotationSpeed", SettingSpec::new(1.0, "Rotation Speed", 0.1, 5.0, 0.1)),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraSettings {
    pub zoom_speed: f32,
    pub pan_speed: f32,
    pub rotation_speed: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self {
            zoom_speed: 1.0,
            pan_speed: 1.0,
            rotation_speed: 1.0,
        }
    }
}

impl CameraSettings {
    pub fn from_settings(settings: &Settings) -> Self {
        let defaults = Self::default();
        let read = |option, fallback: f32| {
            settings
                .get(CAMERA, option)
                .map(|v| v as f32)
                .unwrap_or(fallback)
        };
        Self {
            zoom_speed: read("zoomSpeed", defaults.zoom_speed),
            pan_speed: read("panSpeed", defaults.pan_speed),
            rotation_speed: read("rotationSpeed", defaults.rotation_speed),
        }
    }
}

// ─── Input ───────────────────────────────────────────────────────────

/// Mouse button bitmask as reported by `MouseEvent.buttons`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MouseButtons(pub u16);

impl MouseButtons {
    pub const NONE: Self = Self(0);
    pub const PRIMARY: Self = Self(1);
    pub const SECONDARY: Self = Self(2);
    pub const AUXILIARY: Self = Self(4);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WheelInput {
    pub delta: Vec2,
    pub shift: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MouseMoveInput {
    pub position: Vec2,
    pub movement: Vec2,
    pub buttons: MouseButtons,
}

/// Input received since the last tick, not yet applied.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PendingInput {
    pub zoom: f32,
    pub pan: Vec2,
    pub rotate: Vec2,
}

// ─── Camera State ────────────────────────────────────────────────────

/// Orbit camera over the z = 0 ground plane.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    pub target: Vec3,
    pub distance: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub fov_y: f32,
    pub viewport: Vec2,
    pub pending: PendingInput,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            target: Vec3::ZERO,
            distance: 500.0,
            yaw: -std::f32::consts::FRAC_PI_2,
            pitch: 0.8,
            fov_y: std::f32::consts::FRAC_PI_4,
            viewport: Vec2::new(1024.0, 768.0),
            pending: PendingInput::default(),
        }
    }
}

impl CameraState {
    /// Accumulate a wheel event. `delta.y` zooms and `delta.x` pans; with
    /// shift held both axes pan.
    pub fn with_wheel(&self, wheel: WheelInput) -> CameraState {
        let mut next = *self;
        if wheel.shift {
            next.pending.pan += wheel.delta;
        } else {
            next.pending.zoom += wheel.delta.y;
            next.pending.pan.x += wheel.delta.x;
        }
        next
    }

    /// Accumulate a mouse move. Middle-button drag pans, right-button drag
    /// rotates.
    pub fn with_mouse_move(&self, input: MouseMoveInput) -> CameraState {
        let mut next = *self;
        if input.buttons.contains(MouseButtons::AUXILIARY) {
            next.pending.pan -= input.movement;
        }
        if input.buttons.contains(MouseButtons::SECONDARY) {
            next.pending.rotate += input.movement;
        }
        next
    }

    pub fn with_viewport(&self, viewport: Vec2) -> CameraState {
        CameraState {
            viewport: viewport.max(Vec2::ONE),
            ..*self
        }
    }

    /// Apply pending input in the order zoom, pan, rotate and clear it.
    pub fn settled(&self, settings: &CameraSettings) -> CameraState {
        let mut next = *self;
        let pending = self.pending;

        next.distance = (next.distance
            * (pending.zoom * settings.zoom_speed / ZOOM_SCALE).exp())
        .clamp(MIN_DISTANCE, MAX_DISTANCE);

        // Screen pan is rotated into the ground plane by the current yaw.
        let scale = next.distance * PAN_SCALE * settings.pan_speed;
        let forward = -Vec2::new(next.yaw.cos(), next.yaw.sin());
        let right = Vec2::new(-forward.y, forward.x);
        let shift = (right * pending.pan.x - forward * pending.pan.y) * scale;
        next.target += shift.extend(0.0);

        next.yaw -= pending.rotate.x * ROTATE_SCALE * settings.rotation_speed;
        next.pitch = (next.pitch + pending.rotate.y * ROTATE_SCALE * settings.rotation_speed)
            .clamp(MIN_PITCH, MAX_PITCH);

        next.pending = PendingInput::default();
        next
    }

    pub fn eye(&self) -> Vec3 {
        math::orbit_eye(self.target, self.distance, self.yaw, self.pitch)
    }

    /// Matrices and conversions for this exact state.
    pub fn projection(&self) -> Projection {
        let view = Mat4::look_at_rh(self.eye(), self.target, Vec3::Z);
        let aspect = self.viewport.x / self.viewport.y.max(1.0);
        let perspective = Mat4::perspective_rh_gl(self.fov_y, aspect, NEAR, FAR);
        let view_proj = perspective * view;
        Projection {
            view,
            perspective,
            viewport: self.viewport,
            view_proj,
            inv_view_proj: view_proj.inverse(),
        }
    }
}

// ─── Projection ──────────────────────────────────────────────────────

/// 2D/3D conversion derived from one [`CameraState`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projection {
    pub view: Mat4,
    pub perspective: Mat4,
    pub viewport: Vec2,
    view_proj: Mat4,
    inv_view_proj: Mat4,
}

impl Projection {
    /// Ground-plane point under a screen position, if the ray hits the ground.
    pub fn project_2d_to_3d(&self, screen: Vec2) -> Option<Vec3> {
        let ndc = math::screen_to_ndc(screen, self.viewport);
        let (origin, direction) = math::ndc_ray(&self.inv_view_proj, ndc);
        math::intersect_ground(origin, direction, 0.0)
    }

    /// Screen position of a world point, `None` behind the eye.
    pub fn project_3d_to_2d(&self, world: Vec3) -> Option<Vec2> {
        let ndc = math::world_to_ndc(&self.view_proj, world)?;
        Some(math::ndc_to_screen(ndc.truncate(), self.viewport))
    }

    pub fn uniforms(&self, retina_factor: f32) -> FrameUniforms {
        FrameUniforms::new(self.view, self.perspective, self.viewport, retina_factor)
    }
}
