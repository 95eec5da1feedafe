use std::cell::RefCell;
use std::fmt;

use glam::{Mat4, Vec2, Vec4};

use super::{Fragment, HeadlessDevice, HeadlessMesh, Sampler};
use crate::error::DeviceError;
use crate::program::{
    InkSampler, ResolutionUniform, SceneSampler, SceneWave, SecondaryColor, ShaderProgram,
    SplashUniforms,
};

/// Uniform values a [`HeadlessProgram`] currently holds.
#[derive(Clone, Debug, PartialEq)]
pub struct UniformValues {
    pub model: Mat4,
    pub view_proj: Mat4,
    pub time: f32,
    pub color1: Vec4,
    pub color2: Vec4,
    pub splash_color: Vec4,
    pub splash_count: f32,
    pub splash_scale_var: f32,
    pub freq: f32,
    pub layer_num: i32,
    pub resolution: Vec2,
    pub scene_texture: Option<u32>,
    pub ink_texture: Option<u32>,
}

impl Default for UniformValues {
    fn default() -> Self {
        Self {
            model: Mat4::IDENTITY,
            view_proj: Mat4::IDENTITY,
            time: 0.0,
            color1: Vec4::ZERO,
            color2: Vec4::ZERO,
            splash_color: Vec4::ZERO,
            splash_count: 0.0,
            splash_scale_var: 0.0,
            freq: 0.0,
            layer_num: 0,
            resolution: Vec2::ZERO,
            scene_texture: None,
            ink_texture: None,
        }
    }
}

/// Everything a CPU shade function can read for one fragment.
pub struct ShadeInput<'a> {
    pub fragment: Fragment,
    pub uniforms: &'a UniformValues,
    scene: Option<&'a Sampler>,
    ink: Option<&'a Sampler>,
}

impl ShadeInput<'_> {
    /// Samples the scene texture; transparent black when none is bound.
    pub fn sample_scene(&self, uv: Vec2) -> Vec4 {
        self.scene.map_or(Vec4::ZERO, |sampler| sampler.sample(uv))
    }

    /// Samples the ink texture; transparent black when none is bound.
    pub fn sample_ink(&self, uv: Vec2) -> Vec4 {
        self.ink.map_or(Vec4::ZERO, |sampler| sampler.sample(uv))
    }
}

type ShadeFn = dyn Fn(&ShadeInput<'_>) -> Vec4;

/// Shader program for [`HeadlessDevice`] whose fragment stage is a Rust
/// closure.
///
/// Every setter call is recorded by name so tests can check which uniforms a
/// pass assigned.
pub struct HeadlessProgram {
    label: &'static str,
    linked: bool,
    fail_draws: bool,
    uniforms: RefCell<UniformValues>,
    assignments: RefCell<Vec<&'static str>>,
    shade: Box<ShadeFn>,
}

impl HeadlessProgram {
    pub fn new<F>(label: &'static str, shade: F) -> Self
    where
        F: Fn(&ShadeInput<'_>) -> Vec4 + 'static,
    {
        Self {
            label,
            linked: true,
            fail_draws: false,
            uniforms: RefCell::new(UniformValues::default()),
            assignments: RefCell::new(Vec::new()),
            shade: Box::new(shade),
        }
    }

    /// A program whose link step failed.
    pub fn unlinked(label: &'static str) -> Self {
        Self {
            linked: false,
            ..Self::new(label, |_| Vec4::ZERO)
        }
    }

    /// Makes every draw fail, standing in for a mid-frame GPU error.
    pub fn with_failing_draws(mut self) -> Self {
        self.fail_draws = true;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn uniforms(&self) -> UniformValues {
        self.uniforms.borrow().clone()
    }

    /// Setter names called since the last call, in call order.
    pub fn take_assignments(&self) -> Vec<&'static str> {
        std::mem::take(&mut *self.assignments.borrow_mut())
    }

    fn assign(&self, name: &'static str, update: impl FnOnce(&mut UniformValues)) {
        update(&mut self.uniforms.borrow_mut());
        self.assignments.borrow_mut().push(name);
    }
}

impl fmt::Debug for HeadlessProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HeadlessProgram")
            .field("label", &self.label)
            .field("linked", &self.linked)
            .field("uniforms", &self.uniforms.borrow())
            .finish_non_exhaustive()
    }
}

impl ShaderProgram<HeadlessDevice> for HeadlessProgram {
    fn is_linked(&self) -> bool {
        self.linked
    }

    fn set_model_matrix(&self, model: &Mat4) {
        self.assign("model", |u| u.model = *model);
    }

    fn set_view_proj_matrix(&self, view_proj: &Mat4) {
        self.assign("view_proj", |u| u.view_proj = *view_proj);
    }

    fn set_time(&self, time: f32) {
        self.assign("time", |u| u.time = time);
    }

    fn set_geometry_color1(&self, color: Vec4) {
        self.assign("color1", |u| u.color1 = color);
    }

    fn draw(&self, device: &mut HeadlessDevice, mesh: &HeadlessMesh) -> Result<(), DeviceError> {
        if self.fail_draws {
            return Err(DeviceError::Draw(format!("{} draw rejected", self.label)));
        }
        let uniforms = self.uniforms();
        let scene = uniforms.scene_texture.and_then(|unit| device.sampler(unit));
        let ink = uniforms.ink_texture.and_then(|unit| device.sampler(unit));
        device.rasterize(self.label, mesh, |fragment| {
            (self.shade)(&ShadeInput {
                fragment,
                uniforms: &uniforms,
                scene: scene.as_ref(),
                ink: ink.as_ref(),
            })
        })?;
        Ok(())
    }
}

impl SecondaryColor for HeadlessProgram {
    fn set_geometry_color2(&self, color: Vec4) {
        self.assign("color2", |u| u.color2 = color);
    }
}

impl SceneWave for HeadlessProgram {
    fn set_freq(&self, freq: f32) {
        self.assign("freq", |u| u.freq = freq);
    }

    fn set_layer_num(&self, layers: i32) {
        self.assign("layer_num", |u| u.layer_num = layers);
    }
}

impl SplashUniforms for HeadlessProgram {
    fn set_geometry_splash_color(&self, color: Vec4) {
        self.assign("splash_color", |u| u.splash_color = color);
    }

    fn set_splash_count(&self, count: f32) {
        self.assign("splash_count", |u| u.splash_count = count);
    }

    fn set_splash_scale_var(&self, variance: f32) {
        self.assign("splash_scale_var", |u| u.splash_scale_var = variance);
    }
}

impl ResolutionUniform for HeadlessProgram {
    fn set_resolution(&self, width: f32, height: f32) {
        self.assign("resolution", |u| u.resolution = Vec2::new(width, height));
    }
}

impl SceneSampler for HeadlessProgram {
    fn set_scene_texture(&self, unit: u32) {
        self.assign("scene_texture", |u| u.scene_texture = Some(unit));
    }
}

impl InkSampler for HeadlessProgram {
    fn set_ink_texture(&self, unit: u32) {
        self.assign("ink_texture", |u| u.ink_texture = Some(unit));
    }
}
