//! wgpu backend for the pipelines.
//!
//! - `context` owns wgpu instance/device/surface wiring and rebuilds
//!   swapchain state when the window resizes.
//! - `device` emulates GL-style binding state on top of wgpu and implements
//!   [`GraphicsDevice`](crate::GraphicsDevice).
//! - `program` compiles WGSL into render pipelines, one per target format and
//!   depth mode, and implements the uniform-setter traits.
//! - `uniforms` mirrors the WGSL uniform block.
//! - `mesh` holds vertex/index buffers drawn by programs.

mod context;
mod device;
mod mesh;
mod program;
mod uniforms;

pub use context::{GpuContext, GpuPowerPreference, PresentPreference};
pub use device::WgpuDevice;
pub use mesh::{GpuMesh, GpuVertex};
pub use program::WgpuProgram;
