// camera.rs - Orbit camera and the input controller that drives it
//
// Input mapping:
//   primary drag                      -> orbit (yaw / pitch around target)
//   drag with shift or ctrl           -> pan target on the ground plane
//   secondary or middle button drag   -> pan
//   scroll                            -> zoom (log distance)
//
// Input never moves the camera directly. It adds to velocities which
// update(dt) drains with exponential damping, so motion eases out. Events with
// non-finite coordinates are dropped. The controller only ever touches its
// own CameraState.

use glam::{Mat4, Vec2, Vec3};

use crate::config::CameraConfig;

pub const FOV_Y: f32 = std::f32::consts::FRAC_PI_4;
pub const NEAR: f32 = 0.05;

const MIN_PITCH: f32 = 0.05;
const MAX_PITCH: f32 = std::f32::consts::FRAC_PI_2 - 0.01;

/// Velocities below this are treated as at rest
const REST_EPSILON: f32 = 1e-5;

// ============================================================================
// Input events
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Modifiers {
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum InputEvent {
    PointerDown {
        x: f32,
        y: f32,
        button: PointerButton,
        modifiers: Modifiers,
    },
    PointerMove {
        x: f32,
        y: f32,
    },
    PointerUp,
    /// Positive delta zooms out
    Scroll {
        delta: f32,
    },
}

// ============================================================================
// Camera state
// ============================================================================

/// Orbit pose: a point on a sphere of radius `distance` around `target`,
/// `yaw` around +Y and `pitch` above the ground plane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CameraState {
    target: Vec3,
    yaw: f32,
    pitch: f32,
    distance: f32,
    min_distance: f32,
    max_distance: f32,
    damping: f32,
}

impl CameraState {
    pub fn new(config: &CameraConfig) -> Self {
        let min_distance = config.min_distance.max(1e-3);
        let max_distance = config.max_distance.max(min_distance);
        Self {
            target: Vec3::ZERO,
            yaw: config.initial_yaw,
            pitch: config.initial_pitch.clamp(MIN_PITCH, MAX_PITCH),
            distance: config.initial_distance.clamp(min_distance, max_distance),
            min_distance,
            max_distance,
            damping: config.damping.clamp(1e-3, 1.0),
        }
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    pub fn yaw(&self) -> f32 {
        self.yaw
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn distance(&self) -> f32 {
        self.distance
    }

    pub fn distance_limits(&self) -> (f32, f32) {
        (self.min_distance, self.max_distance)
    }

    pub fn damping(&self) -> f32 {
        self.damping
    }

    /// Unit vector from target to eye
    fn offset_dir(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(cp * sy, sp, cp * cy)
    }

    pub fn position(&self) -> Vec3 {
        self.target + self.offset_dir() * self.distance
    }

    pub fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.position(), self.target, Vec3::Y)
    }

    pub fn projection(&self, aspect: f32) -> Mat4 {
        let aspect = if aspect.is_finite() && aspect > 0.0 { aspect } else { 1.0 };
        Mat4::perspective_rh(FOV_Y, aspect, NEAR, self.max_distance * 4.0)
    }

    pub fn view_projection(&self, aspect: f32) -> Mat4 {
        self.projection(aspect) * self.view()
    }

    /// Camera right and ground-projected forward for the current yaw
    fn ground_axes(&self) -> (Vec3, Vec3) {
        let (sy, cy) = self.yaw.sin_cos();
        (Vec3::new(cy, 0.0, -sy), Vec3::new(-sy, 0.0, -cy))
    }
}

// ============================================================================
// Controller
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum DragMode {
    Orbit,
    Pan,
}

#[derive(Clone, Copy, Debug)]
struct Drag {
    mode: DragMode,
    last: Vec2,
}

pub struct CameraController {
    state: CameraState,
    config: CameraConfig,
    drag: Option<Drag>,

    // Pending motion, drained by update()
    yaw_vel: f32,
    pitch_vel: f32,
    pan_vel: Vec3,
    zoom_vel: f32,
}

impl CameraController {
    pub fn new(config: CameraConfig) -> Self {
        Self {
            state: CameraState::new(&config),
            config,
            drag: None,
            yaw_vel: 0.0,
            pitch_vel: 0.0,
            pan_vel: Vec3::ZERO,
            zoom_vel: 0.0,
        }
    }

    pub fn state(&self) -> &CameraState {
        &self.state
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn is_settled(&self) -> bool {
        self.yaw_vel.abs() < REST_EPSILON
            && self.pitch_vel.abs() < REST_EPSILON
            && self.pan_vel.length() < REST_EPSILON
            && self.zoom_vel.abs() < REST_EPSILON
    }

    pub fn handle(&mut self, event: InputEvent) {
        match event {
            InputEvent::PointerDown { x, y, button, modifiers } => {
                if !(x.is_finite() && y.is_finite()) {
                    return;
                }
                let mode = if button != PointerButton::Primary || modifiers.shift || modifiers.ctrl {
                    DragMode::Pan
                } else {
                    DragMode::Orbit
                };
                self.drag = Some(Drag { mode, last: Vec2::new(x, y) });
            }
            InputEvent::PointerMove { x, y } => {
                if !(x.is_finite() && y.is_finite()) {
                    return;
                }
                let Some(drag) = self.drag.as_mut() else { return };
                let pos = Vec2::new(x, y);
                let delta = pos - drag.last;
                drag.last = pos;
                match drag.mode {
                    DragMode::Orbit => {
                        self.yaw_vel -= delta.x * self.config.rotate_speed;
                        self.pitch_vel += delta.y * self.config.rotate_speed;
                    }
                    DragMode::Pan => {
                        let (right, forward) = self.state.ground_axes();
                        let scale = self.config.pan_speed * self.state.distance;
                        self.pan_vel += (forward * delta.y - right * delta.x) * scale;
                    }
                }
            }
            InputEvent::PointerUp => self.drag = None,
            InputEvent::Scroll { delta } => {
                if delta.is_finite() {
                    self.zoom_vel += delta * self.config.zoom_speed;
                }
            }
        }
    }

    /// Advance damping by `dt` seconds. Each 60 Hz frame consumes `damping`
    /// of the remaining motion, so total travel does not depend on frame rate.
    pub fn update(&mut self, dt: f32) {
        if !(dt.is_finite() && dt > 0.0) {
            return;
        }
        let k = 1.0 - (1.0 - self.state.damping).powf(dt * 60.0);
        let s = &mut self.state;

        s.yaw = (s.yaw + self.yaw_vel * k).rem_euclid(std::f32::consts::TAU);
        s.pitch = (s.pitch + self.pitch_vel * k).clamp(MIN_PITCH, MAX_PITCH);
        s.target += self.pan_vel * k;
        if self.zoom_vel != 0.0 {
            let log = s.distance.ln() + self.zoom_vel * k;
            s.distance = if log >= s.max_distance.ln() {
                s.max_distance
            } else if log <= s.min_distance.ln() {
                s.min_distance
            } else {
                log.exp()
            };
        }

        let keep = 1.0 - k;
        self.yaw_vel *= keep;
        self.pitch_vel *= keep;
        self.pan_vel *= keep;
        self.zoom_vel *= keep;
    }
}
