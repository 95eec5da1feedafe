//! The binding-state seam between the pipelines and a concrete GPU backend.
//!
//! Graphics APIs in the GL family keep the current framebuffer, depth-test
//! flag, clear color and texture units as ambient state. [`GraphicsDevice`]
//! exposes exactly those transitions plus object creation, so the pipelines in
//! [`crate::Renderer`] can be written once and driven by the headless
//! reference device or by wgpu.

use glam::Vec4;

use crate::error::DeviceError;

macro_rules! device_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(u64);

        impl $name {
            pub fn from_raw(raw: u64) -> Self {
                Self(raw)
            }

            pub fn raw(self) -> u64 {
                self.0
            }
        }
    };
}

device_handle!(
    /// A color texture owned by a device.
    TextureId
);
device_handle!(
    /// A depth-only attachment owned by a device.
    DepthBufferId
);
device_handle!(
    /// A framebuffer object tying a color texture to an optional depth buffer.
    FramebufferId
);

/// Where draws and clears currently land.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FramebufferBinding {
    /// The default framebuffer, i.e. the visible surface.
    Screen,
    Offscreen(FramebufferId),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureFilter {
    Linear,
    Nearest,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TextureWrap {
    ClampToEdge,
    Repeat,
}

/// Parameters for an RGBA8 color attachment that can also be sampled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ColorTextureDesc {
    pub label: &'static str,
    pub width: u32,
    pub height: u32,
    pub filter: TextureFilter,
    pub wrap: TextureWrap,
}

/// Pixel rectangle with a bottom-left origin.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Viewport {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClearMask {
    pub color: bool,
    pub depth: bool,
}

impl ClearMask {
    pub const COLOR: ClearMask = ClearMask {
        color: true,
        depth: false,
    };
    pub const COLOR_AND_DEPTH: ClearMask = ClearMask {
        color: true,
        depth: true,
    };
}

/// Snapshot of the ambient state a backend currently holds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BindingState {
    pub framebuffer: FramebufferBinding,
    pub depth_test: bool,
    pub active_texture_unit: u32,
    pub clear_color: Vec4,
    pub viewport: Viewport,
}

impl BindingState {
    /// State expected between pipeline calls: screen bound, depth testing on,
    /// texture unit 0 active.
    pub fn is_baseline(&self) -> bool {
        self.framebuffer == FramebufferBinding::Screen
            && self.depth_test
            && self.active_texture_unit == 0
    }
}

/// GPU backend driven by the pipelines.
///
/// Deletion of an unknown handle is a no-op so callers can release
/// unconditionally. Creation reports resource exhaustion as
/// [`DeviceError::OutOfMemory`].
pub trait GraphicsDevice {
    /// Geometry handle that programs targeting this device know how to draw.
    type Drawable: ?Sized;

    fn is_context_lost(&self) -> bool;
    fn max_texture_dimension(&self) -> u32;

    /// Resizes the default framebuffer (and its depth buffer).
    fn resize_surface(&mut self, width: u32, height: u32) -> Result<(), DeviceError>;

    fn create_color_texture(&mut self, desc: &ColorTextureDesc) -> Result<TextureId, DeviceError>;
    fn create_depth_buffer(&mut self, width: u32, height: u32)
        -> Result<DepthBufferId, DeviceError>;
    fn create_framebuffer(
        &mut self,
        color: TextureId,
        depth: Option<DepthBufferId>,
    ) -> Result<FramebufferId, DeviceError>;

    fn delete_framebuffer(&mut self, framebuffer: FramebufferId);
    fn delete_texture(&mut self, texture: TextureId);
    fn delete_depth_buffer(&mut self, depth: DepthBufferId);

    fn bind_framebuffer(&mut self, target: FramebufferBinding);
    fn set_viewport(&mut self, viewport: Viewport);
    fn set_clear_color(&mut self, color: Vec4);
    fn clear(&mut self, mask: ClearMask) -> Result<(), DeviceError>;
    fn set_depth_test(&mut self, enabled: bool);
    fn set_active_texture(&mut self, unit: u32);
    /// Binds `texture` to the active texture unit; `None` unbinds it.
    fn bind_texture(&mut self, texture: Option<TextureId>);

    fn binding_state(&self) -> BindingState;
}
