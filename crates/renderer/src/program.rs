//! Uniform-setter capabilities a shader program exposes to the pipelines.
//!
//! Each pipeline bounds its program parameters by exactly the setters its
//! passes call, so wiring a program that lacks one fails to compile.
//! Setters take `&self`: uniform values live in the program object, as they
//! do in GL, and programs are only borrowed by the renderer.

use glam::{Mat4, Vec4};

use crate::device::GraphicsDevice;
use crate::error::DeviceError;

/// Setters every pass calls, plus the draw entry point.
pub trait ShaderProgram<D: GraphicsDevice + ?Sized> {
    /// `false` when linking failed; the renderer refuses to run a pipeline
    /// with an unlinked program.
    fn is_linked(&self) -> bool {
        true
    }

    fn set_model_matrix(&self, model: &Mat4);
    fn set_view_proj_matrix(&self, view_proj: &Mat4);
    fn set_time(&self, time: f32);
    fn set_geometry_color1(&self, color: Vec4);

    /// Draws `drawable` into whatever the device currently has bound.
    fn draw(&self, device: &mut D, drawable: &D::Drawable) -> Result<(), DeviceError>;
}

pub trait SecondaryColor {
    fn set_geometry_color2(&self, color: Vec4);
}

/// Animation controls of the layered scene shader.
pub trait SceneWave {
    fn set_freq(&self, freq: f32);
    fn set_layer_num(&self, layers: i32);
}

pub trait SplashUniforms {
    fn set_geometry_splash_color(&self, color: Vec4);
    fn set_splash_count(&self, count: f32);
    fn set_splash_scale_var(&self, variance: f32);
}

pub trait ResolutionUniform {
    fn set_resolution(&self, width: f32, height: f32);
}

/// Program samples the scene target's color attachment.
pub trait SceneSampler {
    fn set_scene_texture(&self, unit: u32);
}

/// Program samples the ink target's color attachment.
pub trait InkSampler {
    fn set_ink_texture(&self, unit: u32);
}
