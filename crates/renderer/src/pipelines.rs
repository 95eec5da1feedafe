use glam::Vec4;
use tracing::{debug, trace};

use crate::camera::Camera;
use crate::device::{ClearMask, FramebufferBinding, GraphicsDevice, TextureId, Viewport};
use crate::error::{DeviceError, ProgramRole, RenderError};
use crate::params::{FrameParams, PassMatrices};
use crate::program::{
    InkSampler, ResolutionUniform, SceneSampler, SceneWave, SecondaryColor, ShaderProgram,
    SplashUniforms,
};
use crate::targets::{RenderTarget, RenderTargetSet};

/// Texture unit the scene color attachment is sampled from.
pub const SCENE_TEXTURE_UNIT: u32 = 0;
/// Texture unit the ink color attachment is sampled from.
pub const INK_TEXTURE_UNIT: u32 = 1;

/// Offscreen passes of the composite pipeline clear to this so unpainted
/// pixels keep alpha 0.
const TRANSPARENT: Vec4 = Vec4::ZERO;

/// Owns the device and the render-target set and sequences the passes of the
/// four visual modes.
///
/// Every pipeline call starts from and returns to the same binding state:
/// screen framebuffer bound, depth test enabled, texture units 0 and 1
/// unbound with unit 0 active, and the configured clear color applied. This
/// also holds when a call fails part-way.
pub struct Renderer<D: GraphicsDevice> {
    device: D,
    targets: RenderTargetSet,
    width: u32,
    height: u32,
    clear_color: Vec4,
}

impl<D: GraphicsDevice> Renderer<D> {
    /// Wraps `device` and allocates targets for a `width`×`height` canvas.
    pub fn new(device: D, width: u32, height: u32) -> Result<Self, RenderError> {
        if device.is_context_lost() {
            return Err(RenderError::ContextUnavailable);
        }
        let clear_color = device.binding_state().clear_color;
        let mut renderer = Self {
            device,
            targets: RenderTargetSet::new(),
            width: 0,
            height: 0,
            clear_color,
        };
        renderer.set_size(width, height)?;
        Ok(renderer)
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Releases the render targets and hands the device back.
    pub fn into_device(mut self) -> D {
        self.targets.release(&mut self.device);
        self.device
    }

    pub fn targets(&self) -> &RenderTargetSet {
        &self.targets
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn clear_color(&self) -> Vec4 {
        self.clear_color
    }

    /// Sets the color used whenever the screen is cleared.
    pub fn set_clear_color(&mut self, r: f32, g: f32, b: f32, a: f32) {
        self.clear_color = Vec4::new(r, g, b, a);
        self.device.set_clear_color(self.clear_color);
    }

    /// Resizes the canvas and recreates every render target at the new size.
    ///
    /// A zero dimension (minimised window) is ignored and the current
    /// targets stay valid.
    pub fn set_size(&mut self, width: u32, height: u32) -> Result<(), RenderError> {
        if width == 0 || height == 0 {
            debug!(width, height, "ignoring zero-sized canvas resize");
            return Ok(());
        }
        self.ensure_context()?;

        let max = self.device.max_texture_dimension();
        if width > max || height > max {
            return Err(RenderError::SizeExceedsLimit { width, height, max });
        }

        self.targets.release(&mut self.device);
        self.width = width;
        self.height = height;
        self.device
            .resize_surface(width, height)
            .map_err(RenderError::Surface)?;
        self.targets
            .allocate(&mut self.device, width, height)
            .map_err(|source| RenderError::Allocation {
                width,
                height,
                source,
            })?;
        debug!(
            width,
            height,
            generation = self.targets.generation(),
            "canvas resized"
        );
        Ok(())
    }

    /// Clears color and depth of whatever framebuffer is bound.
    pub fn clear(&mut self) -> Result<(), RenderError> {
        self.device
            .clear(ClearMask::COLOR_AND_DEPTH)
            .map_err(|err| match err {
                DeviceError::ContextLost => RenderError::ContextUnavailable,
                err => RenderError::Surface(err),
            })
    }

    /// Renders the scene into the scene target, then draws the post-process
    /// program over a full-screen quad sampling it.
    pub fn render_with_post<C, S, P>(
        &mut self,
        camera: &C,
        scene: &S,
        post: &P,
        drawables: &[&D::Drawable],
        screen_quad: &D::Drawable,
        params: &FrameParams,
    ) -> Result<(), RenderError>
    where
        C: Camera + ?Sized,
        S: ShaderProgram<D> + SecondaryColor + SceneWave + ?Sized,
        P: ShaderProgram<D>
            + SecondaryColor
            + SplashUniforms
            + ResolutionUniform
            + SceneSampler
            + ?Sized,
    {
        self.ensure_context()?;
        ensure_linked::<D, _>(ProgramRole::Scene, scene)?;
        ensure_linked::<D, _>(ProgramRole::PostProcess, post)?;
        let scene_target = self.scene_target()?;
        let matrices = PassMatrices::from_camera(camera);

        self.run_pipeline("post", |renderer| {
            let clear_color = renderer.clear_color;
            renderer.begin_pass(
                FramebufferBinding::Offscreen(scene_target.framebuffer()),
                true,
                clear_color,
                ProgramRole::Scene,
            )?;
            set_scene_uniforms::<D, _>(scene, &matrices, params);
            renderer.draw_each(ProgramRole::Scene, scene, drawables)?;

            renderer.begin_pass(
                FramebufferBinding::Screen,
                false,
                clear_color,
                ProgramRole::PostProcess,
            )?;
            let screen = PassMatrices::screen_space();
            post.set_model_matrix(&screen.model);
            post.set_view_proj_matrix(&screen.view_proj);
            post.set_time(params.time);
            post.set_geometry_color1(params.color1);
            post.set_geometry_color2(params.color2);
            post.set_geometry_splash_color(params.splash.color);
            post.set_splash_count(params.splash.count);
            post.set_splash_scale_var(params.splash.scale_var);
            post.set_resolution(renderer.width as f32, renderer.height as f32);
            renderer.bind_sampled(SCENE_TEXTURE_UNIT, scene_target.color());
            post.set_scene_texture(SCENE_TEXTURE_UNIT);
            renderer.draw_one(ProgramRole::PostProcess, post, screen_quad)
        })
    }

    /// Renders the ink mask and the scene into their own targets with
    /// transparent backgrounds, then composites both over the paper program.
    #[allow(clippy::too_many_arguments)]
    pub fn render_ink_scene_paper<C, S, I, P>(
        &mut self,
        camera: &C,
        scene: &S,
        ink: &I,
        paper: &P,
        drawables: &[&D::Drawable],
        screen_quad: &D::Drawable,
        params: &FrameParams,
    ) -> Result<(), RenderError>
    where
        C: Camera + ?Sized,
        S: ShaderProgram<D> + SecondaryColor + SceneWave + ?Sized,
        I: ShaderProgram<D> + SplashUniforms + ResolutionUniform + ?Sized,
        P: ShaderProgram<D>
            + SecondaryColor
            + ResolutionUniform
            + SceneSampler
            + InkSampler
            + ?Sized,
    {
        self.ensure_context()?;
        ensure_linked::<D, _>(ProgramRole::Scene, scene)?;
        ensure_linked::<D, _>(ProgramRole::Ink, ink)?;
        ensure_linked::<D, _>(ProgramRole::Paper, paper)?;
        let scene_target = self.scene_target()?;
        let ink_target = self.ink_target()?;
        let matrices = PassMatrices::from_camera(camera);

        self.run_pipeline("ink-scene-paper", |renderer| {
            renderer.begin_pass(
                FramebufferBinding::Offscreen(ink_target.framebuffer()),
                false,
                TRANSPARENT,
                ProgramRole::Ink,
            )?;
            renderer.set_ink_uniforms(ink, params);
            renderer.draw_one(ProgramRole::Ink, ink, screen_quad)?;

            renderer.begin_pass(
                FramebufferBinding::Offscreen(scene_target.framebuffer()),
                true,
                TRANSPARENT,
                ProgramRole::Scene,
            )?;
            set_scene_uniforms::<D, _>(scene, &matrices, params);
            renderer.draw_each(ProgramRole::Scene, scene, drawables)?;

            let clear_color = renderer.clear_color;
            renderer.begin_pass(
                FramebufferBinding::Screen,
                false,
                clear_color,
                ProgramRole::Paper,
            )?;
            let screen = PassMatrices::screen_space();
            paper.set_model_matrix(&screen.model);
            paper.set_view_proj_matrix(&screen.view_proj);
            paper.set_time(params.time);
            paper.set_geometry_color1(params.color1);
            paper.set_geometry_color2(params.color2);
            paper.set_resolution(renderer.width as f32, renderer.height as f32);
            renderer.bind_sampled(SCENE_TEXTURE_UNIT, scene_target.color());
            paper.set_scene_texture(SCENE_TEXTURE_UNIT);
            renderer.bind_sampled(INK_TEXTURE_UNIT, ink_target.color());
            paper.set_ink_texture(INK_TEXTURE_UNIT);
            renderer.draw_one(ProgramRole::Paper, paper, screen_quad)
        })
    }

    /// Draws the ink program straight to the screen.
    pub fn render_ink_only<I>(
        &mut self,
        ink: &I,
        screen_quad: &D::Drawable,
        params: &FrameParams,
    ) -> Result<(), RenderError>
    where
        I: ShaderProgram<D> + SplashUniforms + ResolutionUniform + ?Sized,
    {
        self.ensure_context()?;
        ensure_linked::<D, _>(ProgramRole::Ink, ink)?;

        self.run_pipeline("ink", |renderer| {
            let clear_color = renderer.clear_color;
            renderer.begin_pass(FramebufferBinding::Screen, false, clear_color, ProgramRole::Ink)?;
            renderer.set_ink_uniforms(ink, params);
            renderer.draw_one(ProgramRole::Ink, ink, screen_quad)
        })
    }

    /// Draws the scene straight to the screen with depth testing.
    pub fn render_scene_only<C, S>(
        &mut self,
        camera: &C,
        scene: &S,
        drawables: &[&D::Drawable],
        params: &FrameParams,
    ) -> Result<(), RenderError>
    where
        C: Camera + ?Sized,
        S: ShaderProgram<D> + SecondaryColor + SceneWave + ?Sized,
    {
        self.ensure_context()?;
        ensure_linked::<D, _>(ProgramRole::Scene, scene)?;
        let matrices = PassMatrices::from_camera(camera);

        self.run_pipeline("scene", |renderer| {
            let clear_color = renderer.clear_color;
            renderer.begin_pass(FramebufferBinding::Screen, true, clear_color, ProgramRole::Scene)?;
            set_scene_uniforms::<D, _>(scene, &matrices, params);
            renderer.draw_each(ProgramRole::Scene, scene, drawables)
        })
    }

    fn run_pipeline<F>(&mut self, name: &'static str, passes: F) -> Result<(), RenderError>
    where
        F: FnOnce(&mut Self) -> Result<(), RenderError>,
    {
        trace!(pipeline = name, "running pipeline");
        let result = passes(self);
        self.restore_baseline();
        if let Err(err) = &result {
            debug!(pipeline = name, error = %err, "pipeline aborted");
        }
        result
    }

    fn restore_baseline(&mut self) {
        self.device.bind_framebuffer(FramebufferBinding::Screen);
        self.device.set_depth_test(true);
        for unit in [INK_TEXTURE_UNIT, SCENE_TEXTURE_UNIT] {
            self.device.set_active_texture(unit);
            self.device.bind_texture(None);
        }
        self.device.set_clear_color(self.clear_color);
    }

    fn ensure_context(&self) -> Result<(), RenderError> {
        if self.device.is_context_lost() {
            Err(RenderError::ContextUnavailable)
        } else {
            Ok(())
        }
    }

    fn scene_target(&self) -> Result<RenderTarget, RenderError> {
        self.targets
            .scene()
            .copied()
            .ok_or(RenderError::TargetsUnallocated)
    }

    fn ink_target(&self) -> Result<RenderTarget, RenderError> {
        self.targets
            .ink()
            .copied()
            .ok_or(RenderError::TargetsUnallocated)
    }

    fn begin_pass(
        &mut self,
        target: FramebufferBinding,
        depth_test: bool,
        clear_color: Vec4,
        role: ProgramRole,
    ) -> Result<(), RenderError> {
        self.device.bind_framebuffer(target);
        self.device.set_depth_test(depth_test);
        self.device.set_viewport(Viewport::full(self.width, self.height));
        self.device.set_clear_color(clear_color);
        self.device
            .clear(ClearMask::COLOR_AND_DEPTH)
            .map_err(RenderError::pass(role))
    }

    fn bind_sampled(&mut self, unit: u32, texture: TextureId) {
        self.device.set_active_texture(unit);
        self.device.bind_texture(Some(texture));
    }

    fn set_ink_uniforms<I>(&self, ink: &I, params: &FrameParams)
    where
        I: ShaderProgram<D> + SplashUniforms + ResolutionUniform + ?Sized,
    {
        let screen = PassMatrices::screen_space();
        ink.set_model_matrix(&screen.model);
        ink.set_view_proj_matrix(&screen.view_proj);
        ink.set_time(params.time);
        ink.set_geometry_color1(params.color1);
        ink.set_geometry_splash_color(params.splash.color);
        ink.set_splash_count(params.splash.count);
        ink.set_splash_scale_var(params.splash.scale_var);
        ink.set_resolution(self.width as f32, self.height as f32);
    }

    fn draw_one<P>(
        &mut self,
        role: ProgramRole,
        program: &P,
        drawable: &D::Drawable,
    ) -> Result<(), RenderError>
    where
        P: ShaderProgram<D> + ?Sized,
    {
        program
            .draw(&mut self.device, drawable)
            .map_err(RenderError::pass(role))
    }

    fn draw_each<P>(
        &mut self,
        role: ProgramRole,
        program: &P,
        drawables: &[&D::Drawable],
    ) -> Result<(), RenderError>
    where
        P: ShaderProgram<D> + ?Sized,
    {
        for drawable in drawables {
            self.draw_one(role, program, *drawable)?;
        }
        Ok(())
    }
}

fn ensure_linked<D, P>(role: ProgramRole, program: &P) -> Result<(), RenderError>
where
    D: GraphicsDevice,
    P: ShaderProgram<D> + ?Sized,
{
    if program.is_linked() {
        Ok(())
    } else {
        Err(RenderError::ProgramNotLinked { role })
    }
}

fn set_scene_uniforms<D, S>(scene: &S, matrices: &PassMatrices, params: &FrameParams)
where
    D: GraphicsDevice,
    S: ShaderProgram<D> + SecondaryColor + SceneWave + ?Sized,
{
    scene.set_model_matrix(&matrices.model);
    scene.set_view_proj_matrix(&matrices.view_proj);
    scene.set_geometry_color1(params.color1);
    scene.set_geometry_color2(params.color2);
    scene.set_freq(params.freq);
    scene.set_time(params.time);
    scene.set_layer_num(params.layer_num);
}
