//! CPU camera and its GPU uniform.
//!
//! The camera is a free-flying eye with yaw/pitch/roll. Every update it
//! produces a [`CameraUniform`] holding the eye, three corners of the image
//! plane in world space (`p0` top-left, `p1` top-right, `p2` bottom-left),
//! the inverse resolution and the number of 16×16 tiles covering the output.
//! Shaders reconstruct a primary ray per pixel by interpolating the corners.

use glam::{EulerRot, Mat3, Vec3};

use crate::gpu::{BindingKind, BindingLayout};
use crate::params::CameraParams;

/// Thread tile edge used by the viewport-sized passes.
pub const TILE: u32 = 16;

/// Layout of the camera descriptor set (set 0).
pub const CAMERA_BINDINGS: [BindingLayout; 1] =
    [BindingLayout::new("camera", 0, 0, BindingKind::UniformBuffer)];

bitflags::bitflags! {
    /// Camera state bits shared with the shaders.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
    pub struct CameraFlags: u32 {
        /// Composite the UI overlay on top of the frame.
        const USE_UI = 1;
        /// Accumulate samples across submissions.
        const USE_SUPERSAMPLING = 2;
    }
}

/// GPU layout of the camera uniform, matching `Camera` in the shaders.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, bytemuck::Pod, bytemuck::Zeroable)]
pub struct CameraUniform {
    pub eye: [f32; 3],
    pub fov: f32,
    pub p0: [f32; 3],
    pub width: u32,
    pub p1: [f32; 3],
    pub height: u32,
    pub p2: [f32; 3],
    pub flags: u32,
    pub inv_res: [f32; 2],
    pub tiles: [u32; 2],
}

/// A free-flying camera.
#[derive(Clone, Copy, Debug)]
pub struct Camera {
    pub eye: Vec3,
    /// Radians around +Y.
    pub yaw: f32,
    /// Radians around +X.
    pub pitch: f32,
    /// Radians around -Z.
    pub roll: f32,
    /// Vertical field of view in degrees.
    pub fov: f32,
    /// Units per second.
    pub speed: f32,
    pub flags: CameraFlags,
    pub width: u32,
    pub height: u32,
}

impl Default for Camera {
    fn default() -> Self {
        let params = CameraParams::default();
        Self {
            eye: Vec3::new(0.0, 2.0, 8.0),
            yaw: 0.0,
            pitch: 0.0,
            roll: 0.0,
            fov: params.fov,
            speed: params.speed,
            flags: CameraFlags::USE_UI,
            width: 1,
            height: 1,
        }
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn at(mut self, x: f32, y: f32, z: f32) -> Self {
        self.eye = Vec3::new(x, y, z);
        self
    }

    pub fn with_fov(mut self, fov_degrees: f32) -> Self {
        self.fov = fov_degrees;
        self
    }

    /// Camera-to-world rotation.
    pub fn rotation(&self) -> Mat3 {
        Mat3::from_euler(EulerRot::YXZ, self.yaw, self.pitch, self.roll)
    }

    pub fn forward(&self) -> Vec3 {
        self.rotation() * Vec3::NEG_Z
    }

    /// Sets the output resolution.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    pub fn apply_params(&mut self, params: &CameraParams) {
        self.fov = params.fov;
        self.speed = params.speed;
    }

    /// Moves the eye along the view-space `direction` (each axis in -1..=1).
    pub fn advance(&mut self, direction: Vec3, dt: f32) {
        let d = direction.clamp(Vec3::splat(-1.0), Vec3::splat(1.0)) * dt * self.speed;
        self.eye += self.rotation() * d;
    }

    /// Image plane corners in world space: top-left, top-right, bottom-left.
    pub fn frustum_corners(&self) -> [Vec3; 3] {
        let aspect = self.width as f32 / self.height as f32;
        let distance = 1.0 / (self.fov.to_radians() * 0.5).tan();
        let rot = self.rotation();
        let corner = |x: f32, y: f32| self.eye + rot * Vec3::new(x * aspect, y, -distance);
        [corner(-1.0, 1.0), corner(1.0, 1.0), corner(-1.0, -1.0)]
    }

    pub fn uniform(&self) -> CameraUniform {
        let [p0, p1, p2] = self.frustum_corners();
        CameraUniform {
            eye: self.eye.to_array(),
            fov: self.fov,
            p0: p0.to_array(),
            width: self.width,
            p1: p1.to_array(),
            height: self.height,
            p2: p2.to_array(),
            flags: self.flags.bits(),
            inv_res: [1.0 / self.width as f32, 1.0 / self.height as f32],
            tiles: [self.width.div_ceil(TILE), self.height.div_ceil(TILE)],
        }
    }
}
