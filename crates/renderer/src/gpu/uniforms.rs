use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec4};

/// CPU mirror of the uniform block every program binds at `@group(0) @binding(0)`.
///
/// ```wgsl
/// struct Uniforms {
///     model: mat4x4<f32>,
///     view_proj: mat4x4<f32>,
///     color1: vec4<f32>,
///     color2: vec4<f32>,
///     splash_color: vec4<f32>,
///     resolution: vec2<f32>,
///     time: f32,
///     freq: f32,
///     splash_count: f32,
///     splash_scale_var: f32,
///     layer_num: i32,
/// };
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub(crate) struct ProgramUniforms {
    pub model: [[f32; 4]; 4],
    pub view_proj: [[f32; 4]; 4],
    pub color1: [f32; 4],
    pub color2: [f32; 4],
    pub splash_color: [f32; 4],
    pub resolution: [f32; 2],
    pub time: f32,
    pub freq: f32,
    pub splash_count: f32,
    pub splash_scale_var: f32,
    pub layer_num: i32,
    pub _padding: u32,
}

impl Default for ProgramUniforms {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY.to_cols_array_2d(),
            view_proj: Mat4::IDENTITY.to_cols_array_2d(),
            color1: [0.0; 4],
            color2: [0.0; 4],
            splash_color: [0.0; 4],
            resolution: [0.0; 2],
            time: 0.0,
            freq: 0.0,
            splash_count: 0.0,
            splash_scale_var: 0.0,
            layer_num: 0,
            _padding: 0,
        }
    }
}

pub(crate) fn color(value: Vec4) -> [f32; 4] {
    value.to_array()
}
