//! Offscreen render targets sized to the output surface.
//!
//! A [`RenderTargetSet`] holds one scene target (color + depth) and one ink
//! target (color only). Targets never change size; a resize releases every
//! object and allocates a new set, which advances the size generation.

use tracing::debug;

use crate::device::{
    ColorTextureDesc, DepthBufferId, FramebufferId, GraphicsDevice, TextureFilter, TextureId,
    TextureWrap,
};
use crate::error::DeviceError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RenderTarget {
    framebuffer: FramebufferId,
    color: TextureId,
    depth: Option<DepthBufferId>,
    width: u32,
    height: u32,
    generation: u64,
}

impl RenderTarget {
    pub fn framebuffer(&self) -> FramebufferId {
        self.framebuffer
    }

    pub fn color(&self) -> TextureId {
        self.color
    }

    pub fn depth(&self) -> Option<DepthBufferId> {
        self.depth
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Size generation this target was allocated in.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

#[derive(Clone, Copy, Debug)]
struct AllocatedTargets {
    scene: RenderTarget,
    ink: RenderTarget,
}

#[derive(Debug, Default)]
pub struct RenderTargetSet {
    current: Option<AllocatedTargets>,
    generation: u64,
}

impl RenderTargetSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Releases the current targets and allocates a fresh scene and ink pair.
    ///
    /// On error nothing created during this call survives and the set is left
    /// empty.
    pub fn allocate<D>(&mut self, device: &mut D, width: u32, height: u32) -> Result<(), DeviceError>
    where
        D: GraphicsDevice + ?Sized,
    {
        self.release(device);

        let generation = self.generation + 1;
        let scene = create_target(device, "scene color", width, height, true, generation)?;
        let ink = match create_target(device, "ink color", width, height, false, generation) {
            Ok(ink) => ink,
            Err(err) => {
                destroy_target(device, &scene);
                return Err(err);
            }
        };

        self.generation = generation;
        self.current = Some(AllocatedTargets { scene, ink });
        debug!(width, height, generation, "allocated render targets");
        Ok(())
    }

    /// Deletes every object owned by the set. Safe to call when empty.
    pub fn release<D>(&mut self, device: &mut D)
    where
        D: GraphicsDevice + ?Sized,
    {
        let Some(targets) = self.current.take() else {
            return;
        };
        destroy_target(device, &targets.scene);
        destroy_target(device, &targets.ink);
        debug!(
            generation = targets.scene.generation,
            "released render targets"
        );
    }

    pub fn is_allocated(&self) -> bool {
        self.current.is_some()
    }

    pub fn scene(&self) -> Option<&RenderTarget> {
        self.current.as_ref().map(|targets| &targets.scene)
    }

    pub fn ink(&self) -> Option<&RenderTarget> {
        self.current.as_ref().map(|targets| &targets.ink)
    }

    /// Number of successful allocations so far.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

fn create_target<D>(
    device: &mut D,
    label: &'static str,
    width: u32,
    height: u32,
    with_depth: bool,
    generation: u64,
) -> Result<RenderTarget, DeviceError>
where
    D: GraphicsDevice + ?Sized,
{
    let color = device.create_color_texture(&ColorTextureDesc {
        label,
        width,
        height,
        filter: TextureFilter::Linear,
        wrap: TextureWrap::ClampToEdge,
    })?;

    let depth = if with_depth {
        match device.create_depth_buffer(width, height) {
            Ok(depth) => Some(depth),
            Err(err) => {
                device.delete_texture(color);
                return Err(err);
            }
        }
    } else {
        None
    };

    let framebuffer = match device.create_framebuffer(color, depth) {
        Ok(framebuffer) => framebuffer,
        Err(err) => {
            device.delete_texture(color);
            if let Some(depth) = depth {
                device.delete_depth_buffer(depth);
            }
            return Err(err);
        }
    };

    Ok(RenderTarget {
        framebuffer,
        color,
        depth,
        width,
        height,
        generation,
    })
}

fn destroy_target<D>(device: &mut D, target: &RenderTarget)
where
    D: GraphicsDevice + ?Sized,
{
    device.delete_framebuffer(target.framebuffer);
    device.delete_texture(target.color);
    if let Some(depth) = target.depth {
        device.delete_depth_buffer(depth);
    }
}
