//! CPU reference implementation of [`GraphicsDevice`].
//!
//! `HeadlessDevice` keeps every attachment as an RGBA `f32` image with a
//! bottom-left origin, rasterizes axis-aligned clip-space rectangles, and
//! logs each state transition. It backs the tests and the `inkfire` preview
//! tool, and is the place to check resource lifetimes: every handle it hands
//! out can be queried for liveness after release.

mod program;

use std::collections::HashMap;

use glam::{Vec2, Vec4};
use tracing::warn;

use crate::device::{
    BindingState, ClearMask, ColorTextureDesc, DepthBufferId, FramebufferBinding, FramebufferId,
    GraphicsDevice, TextureFilter, TextureId, TextureWrap, Viewport,
};
use crate::error::DeviceError;

pub use program::{HeadlessProgram, ShadeInput, UniformValues};

pub const MAX_TEXTURE_UNITS: usize = 8;
const DEFAULT_MAX_TEXTURE_DIMENSION: u32 = 8192;
/// Depth value written by a depth clear (the far plane).
const FAR_DEPTH: f32 = 1.0;

/// Axis-aligned rectangle in clip space at a constant depth.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeadlessMesh {
    pub min: Vec2,
    pub max: Vec2,
    /// Clip-space z in `[-1, 1]`.
    pub depth: f32,
}

impl HeadlessMesh {
    pub fn rect(min: Vec2, max: Vec2, depth: f32) -> Self {
        Self { min, max, depth }
    }

    /// Covers the whole viewport at depth 0.
    pub fn full_screen() -> Self {
        Self::rect(Vec2::splat(-1.0), Vec2::splat(1.0), 0.0)
    }

    fn contains(&self, ndc: Vec2) -> bool {
        ndc.x >= self.min.x && ndc.x <= self.max.x && ndc.y >= self.min.y && ndc.y <= self.max.y
    }
}

/// A fragment produced while rasterizing a [`HeadlessMesh`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Fragment {
    /// Pixel coordinate, bottom-left origin.
    pub x: u32,
    pub y: u32,
    /// Normalised position within the bound attachment.
    pub uv: Vec2,
}

/// One entry of the device's command log.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DeviceCommand {
    ResizeSurface { width: u32, height: u32 },
    CreateTexture(TextureId),
    CreateDepthBuffer(DepthBufferId),
    CreateFramebuffer(FramebufferId),
    DeleteFramebuffer(FramebufferId),
    DeleteTexture(TextureId),
    DeleteDepthBuffer(DepthBufferId),
    BindFramebuffer(FramebufferBinding),
    Viewport(Viewport),
    ClearColor(Vec4),
    Clear {
        target: FramebufferBinding,
        mask: ClearMask,
        color: Vec4,
    },
    DepthTest(bool),
    ActiveTexture(u32),
    BindTexture {
        unit: u32,
        texture: Option<TextureId>,
    },
    Draw {
        program: &'static str,
        target: FramebufferBinding,
        depth_test: bool,
        fragments: usize,
    },
}

/// RGBA image with a bottom-left origin.
#[derive(Clone, Debug, PartialEq)]
pub struct Image {
    width: u32,
    height: u32,
    pixels: Vec<Vec4>,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec4::ZERO; (width as usize) * (height as usize)],
        }
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel(&self, x: u32, y: u32) -> Vec4 {
        self.pixels[self.index(x, y)]
    }

    pub fn pixels(&self) -> &[Vec4] {
        &self.pixels
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y as usize) * (self.width as usize) + x as usize
    }

    fn fill(&mut self, color: Vec4) {
        self.pixels.fill(color);
    }

    fn texel(&self, x: i64, y: i64, wrap: TextureWrap) -> Vec4 {
        let (w, h) = (i64::from(self.width), i64::from(self.height));
        let (x, y) = match wrap {
            TextureWrap::ClampToEdge => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
            TextureWrap::Repeat => (x.rem_euclid(w), y.rem_euclid(h)),
        };
        self.pixels[(y as usize) * (self.width as usize) + x as usize]
    }
}

#[derive(Clone, Debug)]
struct DepthImage {
    width: u32,
    values: Vec<f32>,
}

impl DepthImage {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            values: vec![FAR_DEPTH; (width as usize) * (height as usize)],
        }
    }
}

#[derive(Clone, Debug)]
struct TextureSlot {
    image: Image,
    filter: TextureFilter,
    wrap: TextureWrap,
}

#[derive(Clone, Copy, Debug)]
struct Attachments {
    color: TextureId,
    depth: Option<DepthBufferId>,
}

/// Read-only copy of a bound texture taken just before a draw.
#[derive(Clone, Debug)]
pub struct Sampler {
    slot: TextureSlot,
}

impl Sampler {
    /// Samples at `uv` honouring the texture's filter and wrap modes.
    pub fn sample(&self, uv: Vec2) -> Vec4 {
        let image = &self.slot.image;
        let wrap = self.slot.wrap;
        let x = uv.x * image.width as f32 - 0.5;
        let y = uv.y * image.height as f32 - 0.5;
        match self.slot.filter {
            TextureFilter::Nearest => image.texel(x.round() as i64, y.round() as i64, wrap),
            TextureFilter::Linear => {
                let (x0, y0) = (x.floor(), y.floor());
                let (tx, ty) = (x - x0, y - y0);
                let (x0, y0) = (x0 as i64, y0 as i64);
                let bottom = image
                    .texel(x0, y0, wrap)
                    .lerp(image.texel(x0 + 1, y0, wrap), tx);
                let top = image
                    .texel(x0, y0 + 1, wrap)
                    .lerp(image.texel(x0 + 1, y0 + 1, wrap), tx);
                bottom.lerp(top, ty)
            }
        }
    }
}

pub struct HeadlessDevice {
    next_handle: u64,
    textures: HashMap<TextureId, TextureSlot>,
    depth_buffers: HashMap<DepthBufferId, DepthImage>,
    framebuffers: HashMap<FramebufferId, Attachments>,
    screen: Image,
    screen_depth: DepthImage,
    state: BindingState,
    texture_units: [Option<TextureId>; MAX_TEXTURE_UNITS],
    commands: Vec<DeviceCommand>,
    context_lost: bool,
    max_texture_dimension: u32,
    allocation_budget: Option<usize>,
    fail_surface_resizes: bool,
    feedback_reads: usize,
}

impl HeadlessDevice {
    /// Creates a device whose default framebuffer is `width`×`height`.
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            next_handle: 1,
            textures: HashMap::new(),
            depth_buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            screen: Image::new(width, height),
            screen_depth: DepthImage::new(width, height),
            state: BindingState {
                framebuffer: FramebufferBinding::Screen,
                depth_test: true,
                active_texture_unit: 0,
                clear_color: Vec4::ZERO,
                viewport: Viewport::full(width, height),
            },
            texture_units: [None; MAX_TEXTURE_UNITS],
            commands: Vec::new(),
            context_lost: false,
            max_texture_dimension: DEFAULT_MAX_TEXTURE_DIMENSION,
            allocation_budget: None,
            fail_surface_resizes: false,
            feedback_reads: 0,
        }
    }

    pub fn with_max_texture_dimension(mut self, max: u32) -> Self {
        self.max_texture_dimension = max;
        self
    }

    /// Simulates a lost context; every later draw or clear fails.
    pub fn lose_context(&mut self) {
        self.context_lost = true;
    }

    /// Limits how many more objects can be created before creation reports
    /// out-of-memory. `None` removes the limit.
    pub fn set_allocation_budget(&mut self, budget: Option<usize>) {
        self.allocation_budget = budget;
    }

    /// Makes `resize_surface` fail until switched off again.
    pub fn set_surface_resize_failure(&mut self, fail: bool) {
        self.fail_surface_resizes = fail;
    }

    pub fn screen(&self) -> &Image {
        &self.screen
    }

    pub fn texture(&self, texture: TextureId) -> Option<&Image> {
        self.textures.get(&texture).map(|slot| &slot.image)
    }

    pub fn texture_size(&self, texture: TextureId) -> Option<(u32, u32)> {
        self.texture(texture).map(Image::size)
    }

    /// Depth value at a screen pixel.
    pub fn screen_depth(&self, x: u32, y: u32) -> f32 {
        let depth = &self.screen_depth;
        depth.values[(y as usize) * (depth.width as usize) + x as usize]
    }

    pub fn bound_texture(&self, unit: u32) -> Option<TextureId> {
        self.texture_units.get(unit as usize).copied().flatten()
    }

    pub fn is_texture_live(&self, texture: TextureId) -> bool {
        self.textures.contains_key(&texture)
    }

    pub fn is_depth_buffer_live(&self, depth: DepthBufferId) -> bool {
        self.depth_buffers.contains_key(&depth)
    }

    pub fn is_framebuffer_live(&self, framebuffer: FramebufferId) -> bool {
        self.framebuffers.contains_key(&framebuffer)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_depth_buffers(&self) -> usize {
        self.depth_buffers.len()
    }

    pub fn live_framebuffers(&self) -> usize {
        self.framebuffers.len()
    }

    pub fn commands(&self) -> &[DeviceCommand] {
        &self.commands
    }

    pub fn take_commands(&mut self) -> Vec<DeviceCommand> {
        std::mem::take(&mut self.commands)
    }

    /// Number of times a program sampled a texture attached to the
    /// framebuffer it was drawing into.
    pub fn feedback_reads(&self) -> usize {
        self.feedback_reads
    }

    /// Copies the texture bound to `unit` for sampling during the next draw.
    pub fn sampler(&mut self, unit: u32) -> Option<Sampler> {
        let texture = self.bound_texture(unit)?;
        if self.is_attached_to_bound_framebuffer(texture) {
            self.feedback_reads += 1;
            warn!(
                unit,
                texture = texture.raw(),
                "sampling a texture attached to the bound framebuffer"
            );
        }
        self.textures
            .get(&texture)
            .map(|slot| Sampler { slot: slot.clone() })
    }

    /// Runs `shade` for every pixel of the bound attachment covered by `mesh`
    /// that passes the depth test. Returns the number of fragments written.
    pub fn rasterize<F>(
        &mut self,
        program: &'static str,
        mesh: &HeadlessMesh,
        mut shade: F,
    ) -> Result<usize, DeviceError>
    where
        F: FnMut(Fragment) -> Vec4,
    {
        if self.context_lost {
            return Err(DeviceError::ContextLost);
        }

        let target = self.state.framebuffer;
        let viewport = self.state.viewport;
        let depth_test = self.state.depth_test;
        let (color, mut depth) = self.attachments_mut(target)?;
        let fragment_depth = mesh.depth * 0.5 + 0.5;

        let x_end = (viewport.x.max(0) as u32 + viewport.width).min(color.width);
        let y_end = (viewport.y.max(0) as u32 + viewport.height).min(color.height);
        let mut fragments = 0;
        for y in viewport.y.max(0) as u32..y_end {
            for x in viewport.x.max(0) as u32..x_end {
                let ndc = Vec2::new(
                    (x as f32 + 0.5 - viewport.x as f32) / viewport.width as f32 * 2.0 - 1.0,
                    (y as f32 + 0.5 - viewport.y as f32) / viewport.height as f32 * 2.0 - 1.0,
                );
                if !mesh.contains(ndc) {
                    continue;
                }
                if depth_test {
                    if let Some(depth) = depth.as_deref_mut() {
                        let index = (y as usize) * (depth.width as usize) + x as usize;
                        if fragment_depth >= depth.values[index] {
                            continue;
                        }
                        depth.values[index] = fragment_depth;
                    }
                }
                let uv = Vec2::new(
                    (x as f32 + 0.5) / color.width as f32,
                    (y as f32 + 0.5) / color.height as f32,
                );
                let index = color.index(x, y);
                color.pixels[index] = shade(Fragment { x, y, uv });
                fragments += 1;
            }
        }

        self.commands.push(DeviceCommand::Draw {
            program,
            target,
            depth_test,
            fragments,
        });
        Ok(fragments)
    }

    fn attachments_mut(
        &mut self,
        target: FramebufferBinding,
    ) -> Result<(&mut Image, Option<&mut DepthImage>), DeviceError> {
        match target {
            FramebufferBinding::Screen => Ok((&mut self.screen, Some(&mut self.screen_depth))),
            FramebufferBinding::Offscreen(id) => {
                let attachments = *self
                    .framebuffers
                    .get(&id)
                    .ok_or(DeviceError::UnknownHandle("framebuffer"))?;
                let color = self
                    .textures
                    .get_mut(&attachments.color)
                    .ok_or(DeviceError::UnknownHandle("texture"))?;
                let depth = match attachments.depth {
                    Some(depth) => Some(
                        self.depth_buffers
                            .get_mut(&depth)
                            .ok_or(DeviceError::UnknownHandle("depth buffer"))?,
                    ),
                    None => None,
                };
                Ok((&mut color.image, depth))
            }
        }
    }

    fn is_attached_to_bound_framebuffer(&self, texture: TextureId) -> bool {
        match self.state.framebuffer {
            FramebufferBinding::Screen => false,
            FramebufferBinding::Offscreen(id) => self
                .framebuffers
                .get(&id)
                .is_some_and(|attachments| attachments.color == texture),
        }
    }

    fn reserve(&mut self, what: &'static str, width: u32, height: u32) -> Result<u64, DeviceError> {
        if self.context_lost {
            return Err(DeviceError::ContextLost);
        }
        if let Some(budget) = self.allocation_budget.as_mut() {
            if *budget == 0 {
                return Err(DeviceError::OutOfMemory {
                    what,
                    width,
                    height,
                });
            }
            *budget -= 1;
        }
        let handle = self.next_handle;
        self.next_handle += 1;
        Ok(handle)
    }
}

impl GraphicsDevice for HeadlessDevice {
    type Drawable = HeadlessMesh;

    fn is_context_lost(&self) -> bool {
        self.context_lost
    }

    fn max_texture_dimension(&self) -> u32 {
        self.max_texture_dimension
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if self.context_lost {
            return Err(DeviceError::ContextLost);
        }
        if self.fail_surface_resizes {
            return Err(DeviceError::Surface(format!(
                "surface rejected resize to {width}x{height}"
            )));
        }
        self.screen = Image::new(width, height);
        self.screen_depth = DepthImage::new(width, height);
        self.commands
            .push(DeviceCommand::ResizeSurface { width, height });
        Ok(())
    }

    fn create_color_texture(&mut self, desc: &ColorTextureDesc) -> Result<TextureId, DeviceError> {
        let id = TextureId::from_raw(self.reserve(desc.label, desc.width, desc.height)?);
        self.textures.insert(
            id,
            TextureSlot {
                image: Image::new(desc.width, desc.height),
                filter: desc.filter,
                wrap: desc.wrap,
            },
        );
        self.commands.push(DeviceCommand::CreateTexture(id));
        Ok(id)
    }

    fn create_depth_buffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<DepthBufferId, DeviceError> {
        let id = DepthBufferId::from_raw(self.reserve("depth buffer", width, height)?);
        self.depth_buffers.insert(id, DepthImage::new(width, height));
        self.commands.push(DeviceCommand::CreateDepthBuffer(id));
        Ok(id)
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<DepthBufferId>,
    ) -> Result<FramebufferId, DeviceError> {
        let (width, height) = self
            .texture_size(color)
            .ok_or(DeviceError::UnknownHandle("texture"))?;
        if let Some(depth) = depth {
            if !self.is_depth_buffer_live(depth) {
                return Err(DeviceError::UnknownHandle("depth buffer"));
            }
        }
        let id = FramebufferId::from_raw(self.reserve("framebuffer", width, height)?);
        self.framebuffers.insert(id, Attachments { color, depth });
        self.commands.push(DeviceCommand::CreateFramebuffer(id));
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some() {
            if self.state.framebuffer == FramebufferBinding::Offscreen(framebuffer) {
                self.state.framebuffer = FramebufferBinding::Screen;
            }
            self.commands
                .push(DeviceCommand::DeleteFramebuffer(framebuffer));
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if self.textures.remove(&texture).is_some() {
            for unit in self.texture_units.iter_mut() {
                if *unit == Some(texture) {
                    *unit = None;
                }
            }
            self.commands.push(DeviceCommand::DeleteTexture(texture));
        }
    }

    fn delete_depth_buffer(&mut self, depth: DepthBufferId) {
        if self.depth_buffers.remove(&depth).is_some() {
            self.commands.push(DeviceCommand::DeleteDepthBuffer(depth));
        }
    }

    fn bind_framebuffer(&mut self, target: FramebufferBinding) {
        self.state.framebuffer = target;
        self.commands.push(DeviceCommand::BindFramebuffer(target));
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
        self.commands.push(DeviceCommand::Viewport(viewport));
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.state.clear_color = color;
        self.commands.push(DeviceCommand::ClearColor(color));
    }

    fn clear(&mut self, mask: ClearMask) -> Result<(), DeviceError> {
        if self.context_lost {
            return Err(DeviceError::ContextLost);
        }
        let target = self.state.framebuffer;
        let color = self.state.clear_color;
        let (image, depth) = self.attachments_mut(target)?;
        if mask.color {
            image.fill(color);
        }
        if mask.depth {
            if let Some(depth) = depth {
                depth.values.fill(FAR_DEPTH);
            }
        }
        self.commands.push(DeviceCommand::Clear {
            target,
            mask,
            color,
        });
        Ok(())
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
        self.commands.push(DeviceCommand::DepthTest(enabled));
    }

    fn set_active_texture(&mut self, unit: u32) {
        self.state.active_texture_unit = unit;
        self.commands.push(DeviceCommand::ActiveTexture(unit));
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        let unit = self.state.active_texture_unit;
        if let Some(slot) = self.texture_units.get_mut(unit as usize) {
            *slot = texture;
        }
        self.commands
            .push(DeviceCommand::BindTexture { unit, texture });
    }

    fn binding_state(&self) -> BindingState {
        self.state
    }
}
