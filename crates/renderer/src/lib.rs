//! Render-target management and the four visual pipelines of inkfire.
//!
//! The crate is split along the binding-state seam:
//!
//! ```text
//!   driver (inkfire) ── FrameParams, Camera, programs, drawables
//!          │
//!          ▼
//!   Renderer ──▶ RenderTargetSet (scene: color+depth, ink: color)
//!          │
//!          ▼
//!   GraphicsDevice ──▶ HeadlessDevice (CPU reference, tests, previews)
//!                  └─▶ WgpuDevice     (wgpu surface + GL-style state emulation)
//! ```
//!
//! `Renderer` owns the device and the offscreen targets. Each pipeline call
//! binds, clears and draws its passes in a fixed order and puts the device
//! back into the baseline binding state before returning, whether or not a
//! pass failed. Programs are borrowed for the duration of a call; the uniform
//! setters a pipeline needs are expressed as trait bounds, see [`program`].

pub mod camera;
pub mod device;
mod error;
pub mod gpu;
pub mod headless;
mod params;
mod pipelines;
pub mod program;
mod targets;

pub use camera::Camera;
pub use device::{
    BindingState, ClearMask, ColorTextureDesc, DepthBufferId, FramebufferBinding, FramebufferId,
    GraphicsDevice, TextureFilter, TextureId, TextureWrap, Viewport,
};
pub use error::{DeviceError, ProgramRole, RenderError};
pub use params::{FrameParams, Splash};
pub use pipelines::{Renderer, INK_TEXTURE_UNIT, SCENE_TEXTURE_UNIT};
pub use program::{
    InkSampler, ResolutionUniform, SceneSampler, SceneWave, SecondaryColor, ShaderProgram,
    SplashUniforms,
};
pub use targets::{RenderTarget, RenderTargetSet};
