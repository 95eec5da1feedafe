use std::collections::HashMap;

use anyhow::Result;
use glam::Vec4;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use winit::dpi::PhysicalSize;

use super::context::{GpuContext, GpuPowerPreference, PresentPreference};
use super::mesh::GpuMesh;
use crate::device::{
    BindingState, ClearMask, ColorTextureDesc, DepthBufferId, FramebufferBinding, FramebufferId,
    GraphicsDevice, TextureFilter, TextureId, TextureWrap, Viewport,
};
use crate::error::DeviceError;

pub(crate) const OFFSCREEN_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub(crate) const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth16Unorm;
const TEXTURE_UNITS: usize = 8;

/// How the bound target is attached to depth, which selects a pipeline variant.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) enum DepthMode {
    /// Target has no depth attachment.
    None,
    /// `LESS` compare with depth writes.
    Test,
    /// Depth attachment present but testing disabled.
    Ignore,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TargetKey {
    pub color_format: wgpu::TextureFormat,
    pub depth: DepthMode,
}

struct ColorTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    sampler: wgpu::Sampler,
}

struct DepthTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
}

#[derive(Clone, Copy)]
struct Framebuffer {
    color: TextureId,
    depth: Option<DepthBufferId>,
}

struct SurfaceFrame {
    texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
}

struct ResolvedTarget {
    color: wgpu::TextureView,
    depth: Option<wgpu::TextureView>,
    size: (u32, u32),
}

/// [`GraphicsDevice`] over wgpu.
///
/// wgpu has no ambient binding state, so this device keeps it on the CPU and
/// turns every clear and draw into its own render pass against whatever is
/// bound at that moment. Each pass is submitted immediately, which keeps
/// uniform-buffer writes ordered with the draws that read them.
///
/// The surface frame is acquired on the first pass that targets the screen
/// and stays current until [`WgpuDevice::present`].
pub struct WgpuDevice {
    context: GpuContext,
    next_handle: u64,
    textures: HashMap<TextureId, ColorTexture>,
    depth_buffers: HashMap<DepthBufferId, DepthTexture>,
    framebuffers: HashMap<FramebufferId, Framebuffer>,
    screen_depth: DepthTexture,
    frame: Option<SurfaceFrame>,
    state: BindingState,
    texture_units: [Option<TextureId>; TEXTURE_UNITS],
    placeholder: ColorTexture,
}

impl WgpuDevice {
    pub fn new(context: GpuContext) -> Self {
        let size = context.size;
        let screen_depth = create_depth(&context.device, "screen depth", size.width, size.height);
        let placeholder = create_placeholder(&context.device, &context.queue);
        Self {
            context,
            next_handle: 1,
            textures: HashMap::new(),
            depth_buffers: HashMap::new(),
            framebuffers: HashMap::new(),
            screen_depth,
            frame: None,
            state: BindingState {
                framebuffer: FramebufferBinding::Screen,
                depth_test: true,
                active_texture_unit: 0,
                clear_color: Vec4::ZERO,
                viewport: Viewport::full(size.width, size.height),
            },
            texture_units: [None; TEXTURE_UNITS],
            placeholder,
        }
    }

    pub fn from_window<T>(
        target: &T,
        size: PhysicalSize<u32>,
        power: GpuPowerPreference,
        present: PresentPreference,
    ) -> Result<Self>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let context = GpuContext::new(target, size, power, present)?;
        Ok(Self::new(context))
    }

    pub fn context(&self) -> &GpuContext {
        &self.context
    }

    pub fn gpu(&self) -> &wgpu::Device {
        &self.context.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.context.queue
    }

    pub fn surface_format(&self) -> wgpu::TextureFormat {
        self.context.config.format
    }

    /// Presents the frame rendered since the last call, if any pass touched
    /// the screen.
    pub fn present(&mut self) {
        if let Some(frame) = self.frame.take() {
            frame.texture.present();
        }
    }

    pub(crate) fn target_key(&self) -> Result<TargetKey, DeviceError> {
        let (color_format, has_depth) = match self.state.framebuffer {
            FramebufferBinding::Screen => (self.surface_format(), true),
            FramebufferBinding::Offscreen(id) => {
                let framebuffer = self
                    .framebuffers
                    .get(&id)
                    .ok_or(DeviceError::UnknownHandle("framebuffer"))?;
                (OFFSCREEN_FORMAT, framebuffer.depth.is_some())
            }
        };
        let depth = match (has_depth, self.state.depth_test) {
            (false, _) => DepthMode::None,
            (true, true) => DepthMode::Test,
            (true, false) => DepthMode::Ignore,
        };
        Ok(TargetKey {
            color_format,
            depth,
        })
    }

    /// View and sampler bound to `unit`, or a transparent 1x1 texture when the
    /// unit is empty.
    pub(crate) fn sampled(&self, unit: Option<u32>) -> (wgpu::TextureView, wgpu::Sampler) {
        let texture = unit
            .and_then(|unit| self.texture_units.get(unit as usize).copied().flatten())
            .and_then(|id| self.textures.get(&id))
            .unwrap_or(&self.placeholder);
        (texture.view.clone(), texture.sampler.clone())
    }

    /// Records one render pass against the bound target and submits it.
    pub(crate) fn encode_pass<F>(
        &mut self,
        label: &str,
        color_clear: Option<Vec4>,
        depth_clear: bool,
        record: F,
    ) -> Result<(), DeviceError>
    where
        F: FnOnce(&mut wgpu::RenderPass<'_>),
    {
        if self.context.is_lost() {
            return Err(DeviceError::ContextLost);
        }
        let target = self.resolve_target()?;

        let load = match color_clear {
            Some(color) => wgpu::LoadOp::Clear(wgpu::Color {
                r: f64::from(color.x),
                g: f64::from(color.y),
                b: f64::from(color.z),
                a: f64::from(color.w),
            }),
            None => wgpu::LoadOp::Load,
        };
        let depth_load = if depth_clear {
            wgpu::LoadOp::Clear(1.0)
        } else {
            wgpu::LoadOp::Load
        };

        let mut encoder = self
            .context
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some(label),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target.color,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load,
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: target.depth.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: depth_load,
                            store: wgpu::StoreOp::Store,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            if let Some((x, y, width, height)) = flipped_viewport(self.state.viewport, target.size)
            {
                pass.set_viewport(x, y, width, height, 0.0, 1.0);
                record(&mut pass);
            }
        }
        self.context.queue.submit(Some(encoder.finish()));
        Ok(())
    }

    fn resolve_target(&mut self) -> Result<ResolvedTarget, DeviceError> {
        match self.state.framebuffer {
            FramebufferBinding::Screen => {
                let color = self.ensure_frame()?.clone();
                let size = self.context.size;
                Ok(ResolvedTarget {
                    color,
                    depth: Some(self.screen_depth.view.clone()),
                    size: (size.width, size.height),
                })
            }
            FramebufferBinding::Offscreen(id) => {
                let framebuffer = *self
                    .framebuffers
                    .get(&id)
                    .ok_or(DeviceError::UnknownHandle("framebuffer"))?;
                let color = self
                    .textures
                    .get(&framebuffer.color)
                    .ok_or(DeviceError::UnknownHandle("texture"))?;
                let depth = match framebuffer.depth {
                    Some(depth) => Some(
                        self.depth_buffers
                            .get(&depth)
                            .ok_or(DeviceError::UnknownHandle("depth buffer"))?
                            .view
                            .clone(),
                    ),
                    None => None,
                };
                let extent = color.texture.size();
                Ok(ResolvedTarget {
                    color: color.view.clone(),
                    depth,
                    size: (extent.width, extent.height),
                })
            }
        }
    }

    fn ensure_frame(&mut self) -> Result<&wgpu::TextureView, DeviceError> {
        if self.frame.is_none() {
            let texture = match self.context.surface.get_current_texture() {
                Ok(texture) => texture,
                Err(wgpu::SurfaceError::Lost | wgpu::SurfaceError::Outdated) => {
                    tracing::debug!("surface stale; reconfiguring");
                    self.context.reconfigure();
                    self.context
                        .surface
                        .get_current_texture()
                        .map_err(|err| DeviceError::Surface(err.to_string()))?
                }
                Err(wgpu::SurfaceError::OutOfMemory) => {
                    return Err(DeviceError::OutOfMemory {
                        what: "surface frame",
                        width: self.context.size.width,
                        height: self.context.size.height,
                    })
                }
                Err(err) => return Err(DeviceError::Surface(err.to_string())),
            };
            let view = texture
                .texture
                .create_view(&wgpu::TextureViewDescriptor::default());
            self.frame = Some(SurfaceFrame { texture, view });
        }
        self.frame
            .as_ref()
            .map(|frame| &frame.view)
            .ok_or_else(|| DeviceError::Surface("no surface frame".into()))
    }

    fn next_raw(&mut self) -> u64 {
        let raw = self.next_handle;
        self.next_handle += 1;
        raw
    }

    fn out_of_memory_scope<T>(
        &self,
        what: &'static str,
        width: u32,
        height: u32,
        create: impl FnOnce(&wgpu::Device) -> T,
    ) -> Result<T, DeviceError> {
        let device = &self.context.device;
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        let value = create(device);
        match pollster::block_on(device.pop_error_scope()) {
            Some(err) => {
                tracing::warn!(what, width, height, error = %err, "GPU allocation failed");
                Err(DeviceError::OutOfMemory {
                    what,
                    width,
                    height,
                })
            }
            None => Ok(value),
        }
    }
}

impl GraphicsDevice for WgpuDevice {
    type Drawable = GpuMesh;

    fn is_context_lost(&self) -> bool {
        self.context.is_lost()
    }

    fn max_texture_dimension(&self) -> u32 {
        self.context.limits.max_texture_dimension_2d
    }

    fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), DeviceError> {
        if self.context.is_lost() {
            return Err(DeviceError::ContextLost);
        }
        // A frame acquired at the old size cannot be presented after reconfiguring.
        self.frame = None;
        self.context.resize(PhysicalSize::new(width, height));
        let depth = self.out_of_memory_scope("screen depth", width, height, |device| {
            create_depth(device, "screen depth", width, height)
        })?;
        let previous = std::mem::replace(&mut self.screen_depth, depth);
        previous.texture.destroy();
        Ok(())
    }

    fn create_color_texture(&mut self, desc: &ColorTextureDesc) -> Result<TextureId, DeviceError> {
        let texture = self.out_of_memory_scope(desc.label, desc.width, desc.height, |device| {
            let texture = device.create_texture(&wgpu::TextureDescriptor {
                label: Some(desc.label),
                size: wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: OFFSCREEN_FORMAT,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT
                    | wgpu::TextureUsages::TEXTURE_BINDING,
                view_formats: &[],
            });
            let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
            let sampler = create_sampler(device, desc.label, desc.filter, desc.wrap);
            ColorTexture {
                texture,
                view,
                sampler,
            }
        })?;
        let id = TextureId::from_raw(self.next_raw());
        self.textures.insert(id, texture);
        Ok(id)
    }

    fn create_depth_buffer(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<DepthBufferId, DeviceError> {
        let depth = self.out_of_memory_scope("depth buffer", width, height, |device| {
            create_depth(device, "depth buffer", width, height)
        })?;
        let id = DepthBufferId::from_raw(self.next_raw());
        self.depth_buffers.insert(id, depth);
        Ok(id)
    }

    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<DepthBufferId>,
    ) -> Result<FramebufferId, DeviceError> {
        if !self.textures.contains_key(&color) {
            return Err(DeviceError::UnknownHandle("texture"));
        }
        if let Some(depth) = depth {
            if !self.depth_buffers.contains_key(&depth) {
                return Err(DeviceError::UnknownHandle("depth buffer"));
            }
        }
        let id = FramebufferId::from_raw(self.next_raw());
        self.framebuffers.insert(id, Framebuffer { color, depth });
        Ok(id)
    }

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId) {
        if self.framebuffers.remove(&framebuffer).is_some()
            && self.state.framebuffer == FramebufferBinding::Offscreen(framebuffer)
        {
            self.state.framebuffer = FramebufferBinding::Screen;
        }
    }

    fn delete_texture(&mut self, texture: TextureId) {
        if let Some(removed) = self.textures.remove(&texture) {
            removed.texture.destroy();
            for unit in self.texture_units.iter_mut() {
                if *unit == Some(texture) {
                    *unit = None;
                }
            }
        }
    }

    fn delete_depth_buffer(&mut self, depth: DepthBufferId) {
        if let Some(removed) = self.depth_buffers.remove(&depth) {
            removed.texture.destroy();
        }
    }

    fn bind_framebuffer(&mut self, target: FramebufferBinding) {
        self.state.framebuffer = target;
    }

    fn set_viewport(&mut self, viewport: Viewport) {
        self.state.viewport = viewport;
    }

    fn set_clear_color(&mut self, color: Vec4) {
        self.state.clear_color = color;
    }

    fn clear(&mut self, mask: ClearMask) -> Result<(), DeviceError> {
        let color = mask.color.then_some(self.state.clear_color);
        self.encode_pass("clear", color, mask.depth, |_| {})
    }

    fn set_depth_test(&mut self, enabled: bool) {
        self.state.depth_test = enabled;
    }

    fn set_active_texture(&mut self, unit: u32) {
        if unit as usize >= TEXTURE_UNITS {
            tracing::warn!(unit, "texture unit out of range");
        }
        self.state.active_texture_unit = unit;
    }

    fn bind_texture(&mut self, texture: Option<TextureId>) {
        let unit = self.state.active_texture_unit as usize;
        if let Some(slot) = self.texture_units.get_mut(unit) {
            *slot = texture;
        }
    }

    fn binding_state(&self) -> BindingState {
        self.state
    }
}

/// Converts a bottom-left-origin viewport into wgpu's top-left space, clipped
/// to the target. `None` when nothing of it remains.
fn flipped_viewport(viewport: Viewport, target: (u32, u32)) -> Option<(f32, f32, f32, f32)> {
    let (target_width, target_height) = (target.0 as i64, target.1 as i64);
    let left = i64::from(viewport.x).max(0);
    let right = (i64::from(viewport.x) + i64::from(viewport.width)).min(target_width);
    let bottom = i64::from(viewport.y).max(0);
    let top = (i64::from(viewport.y) + i64::from(viewport.height)).min(target_height);
    if right <= left || top <= bottom {
        return None;
    }
    Some((
        left as f32,
        (target_height - top) as f32,
        (right - left) as f32,
        (top - bottom) as f32,
    ))
}

fn create_depth(device: &wgpu::Device, label: &str, width: u32, height: u32) -> DepthTexture {
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: wgpu::Extent3d {
            width: width.max(1),
            height: height.max(1),
            depth_or_array_layers: 1,
        },
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: DEPTH_FORMAT,
        usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
        view_formats: &[],
    });
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    DepthTexture { texture, view }
}

fn create_sampler(
    device: &wgpu::Device,
    label: &str,
    filter: TextureFilter,
    wrap: TextureWrap,
) -> wgpu::Sampler {
    let filter_mode = match filter {
        TextureFilter::Linear => wgpu::FilterMode::Linear,
        TextureFilter::Nearest => wgpu::FilterMode::Nearest,
    };
    let address_mode = match wrap {
        TextureWrap::ClampToEdge => wgpu::AddressMode::ClampToEdge,
        TextureWrap::Repeat => wgpu::AddressMode::Repeat,
    };
    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some(label),
        address_mode_u: address_mode,
        address_mode_v: address_mode,
        address_mode_w: address_mode,
        mag_filter: filter_mode,
        min_filter: filter_mode,
        mipmap_filter: wgpu::FilterMode::Nearest,
        ..Default::default()
    })
}

fn create_placeholder(device: &wgpu::Device, queue: &wgpu::Queue) -> ColorTexture {
    let size = wgpu::Extent3d {
        width: 1,
        height: 1,
        depth_or_array_layers: 1,
    };
    let texture = device.create_texture(&wgpu::TextureDescriptor {
        label: Some("empty texture unit"),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: OFFSCREEN_FORMAT,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        &[0u8; 4],
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(4),
            rows_per_image: Some(1),
        },
        size,
    );
    let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
    let sampler = create_sampler(
        device,
        "empty texture unit",
        TextureFilter::Nearest,
        TextureWrap::ClampToEdge,
    );
    ColorTexture {
        texture,
        view,
        sampler,
    }
}
