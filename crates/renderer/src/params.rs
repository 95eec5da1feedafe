use glam::{Mat4, Vec4};

use crate::camera::Camera;

/// Ink splash controls shared by the ink and post-process shaders.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Splash {
    pub color: Vec4,
    pub count: f32,
    pub scale_var: f32,
}

/// Per-frame values the driver hands to a pipeline call.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FrameParams {
    pub color1: Vec4,
    pub color2: Vec4,
    pub splash: Splash,
    pub freq: f32,
    pub time: f32,
    pub layer_num: i32,
}

/// Model and view-projection pair uploaded to a pass.
#[derive(Clone, Copy, Debug, PartialEq)]
pub(crate) struct PassMatrices {
    pub model: Mat4,
    pub view_proj: Mat4,
}

impl PassMatrices {
    pub fn from_camera<C: Camera + ?Sized>(camera: &C) -> Self {
        Self {
            model: Mat4::IDENTITY,
            view_proj: camera.view_projection(),
        }
    }

    /// Full-screen quads are authored in clip space.
    pub fn screen_space() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
        }
    }
}
