use std::fmt;

/// Names the shader stage a pipeline pass runs, used when reporting failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ProgramRole {
    Scene,
    PostProcess,
    Ink,
    Paper,
}

impl fmt::Display for ProgramRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProgramRole::Scene => "scene",
            ProgramRole::PostProcess => "post-process",
            ProgramRole::Ink => "ink",
            ProgramRole::Paper => "paper",
        };
        f.write_str(name)
    }
}

/// Failures reported by a [`GraphicsDevice`](crate::GraphicsDevice) backend.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    #[error("rendering context unavailable")]
    ContextLost,
    #[error("out of GPU memory allocating {what} ({width}x{height})")]
    OutOfMemory {
        what: &'static str,
        width: u32,
        height: u32,
    },
    #[error("{0} handle is not live on this device")]
    UnknownHandle(&'static str),
    #[error("surface error: {0}")]
    Surface(String),
    #[error("draw failed: {0}")]
    Draw(String),
}

/// Errors surfaced by [`Renderer`](crate::Renderer).
///
/// Every variant is fatal for the call that produced it. Nothing is retried;
/// the next `set_size` or pipeline invocation starts again from the baseline
/// binding state.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("rendering context unavailable")]
    ContextUnavailable,
    #[error("{role} program is not linked")]
    ProgramNotLinked { role: ProgramRole },
    #[error("render targets are not allocated")]
    TargetsUnallocated,
    #[error("GPU max texture dimension is {max}, requested surface is {width}x{height}")]
    SizeExceedsLimit { width: u32, height: u32, max: u32 },
    #[error("failed to resize the output surface")]
    Surface(#[source] DeviceError),
    #[error("failed to allocate render targets at {width}x{height}")]
    Allocation {
        width: u32,
        height: u32,
        #[source]
        source: DeviceError,
    },
    #[error("{role} pass failed")]
    Pass {
        role: ProgramRole,
        #[source]
        source: DeviceError,
    },
}

impl RenderError {
    pub(crate) fn pass(role: ProgramRole) -> impl FnOnce(DeviceError) -> RenderError {
        move |source| match source {
            DeviceError::ContextLost => RenderError::ContextUnavailable,
            source => RenderError::Pass { role, source },
        }
    }
}
