use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use renderer::gpu::{GpuPowerPreference, PresentPreference, WgpuDevice, WgpuProgram};
use renderer::{FrameParams, RenderError, Renderer};
use sceneconfig::{RenderMode, SceneConfig};
use tracing::{error, info, warn};
use winit::dpi::PhysicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::{ControlFlow, EventLoop};
use winit::window::{Window, WindowBuilder};

use crate::gpu_scene::SceneMeshes;
use crate::run::{frame_params, render_mode, SUBJECT_HALF_EXTENT};
use crate::scene::FixedCamera;
use crate::shading::Programs;

/// GPU state for one window. Fields drop in declaration order, so the
/// renderer and its surface go before the window they were created from.
struct WindowSession {
    renderer: Renderer<WgpuDevice>,
    programs: Programs<WgpuProgram>,
    meshes: SceneMeshes,
    camera: FixedCamera,
    params: FrameParams,
    mode: RenderMode,
    time_step: f32,
    frames: u64,
    window: Arc<Window>,
}

impl WindowSession {
    fn new(window: Arc<Window>, config: &SceneConfig) -> Result<Self> {
        let size = window.inner_size();
        let (width, height) = (size.width.max(1), size.height.max(1));
        let device = WgpuDevice::from_window(
            window.as_ref(),
            PhysicalSize::new(width, height),
            GpuPowerPreference::default(),
            PresentPreference::default(),
        )?;
        let mut renderer =
            Renderer::new(device, width, height).context("failed to initialise renderer")?;
        let [r, g, b, a] = config.surface.clear_color.to_array();
        renderer.set_clear_color(r, g, b, a);

        let programs = Programs::<WgpuProgram>::compile(renderer.device())?;
        let meshes = SceneMeshes::upload(renderer.device(), SUBJECT_HALF_EXTENT);

        Ok(Self {
            renderer,
            programs,
            meshes,
            camera: FixedCamera::new(width, height),
            params: frame_params(config),
            mode: config.mode,
            time_step: config.animation.time_step,
            frames: 0,
            window,
        })
    }

    fn resize(&mut self, size: PhysicalSize<u32>) -> Result<(), RenderError> {
        self.renderer.set_size(size.width, size.height)?;
        if size.width > 0 && size.height > 0 {
            self.camera = FixedCamera::new(size.width, size.height);
        }
        Ok(())
    }

    fn render_frame(&mut self) -> Result<(), RenderError> {
        self.params.time += self.time_step;
        self.renderer.clear()?;
        render_mode(
            &mut self.renderer,
            self.mode,
            &self.camera,
            &self.programs,
            &self.meshes.subject,
            &self.meshes.quad,
            &self.params,
        )?;
        self.renderer.device_mut().present();
        self.frames += 1;
        Ok(())
    }
}

/// Errors after which no later frame can succeed.
fn is_fatal(err: &RenderError) -> bool {
    match err {
        RenderError::ContextUnavailable
        | RenderError::Allocation { .. }
        | RenderError::TargetsUnallocated
        | RenderError::ProgramNotLinked { .. } => true,
        RenderError::Pass { .. }
        | RenderError::Surface(_)
        | RenderError::SizeExceedsLimit { .. } => false,
    }
}

/// Opens a window at the configured surface size and renders the configured
/// pipeline every frame until the window is closed.
pub fn run_window(config: &SceneConfig) -> Result<()> {
    let event_loop =
        EventLoop::new().map_err(|err| anyhow!("failed to create event loop: {err}"))?;
    let window = WindowBuilder::new()
        .with_title(format!("inkfire ({})", config.mode))
        .with_inner_size(PhysicalSize::new(
            config.surface.width,
            config.surface.height,
        ))
        .build(&event_loop)
        .map_err(|err| anyhow!("failed to create window: {err}"))?;
    let mut session = WindowSession::new(Arc::new(window), config)
        .context("failed to initialise window renderer")?;
    info!(mode = %config.mode, "window renderer ready");

    let mut failure: Option<anyhow::Error> = None;
    let failure_slot = &mut failure;
    let run_result = event_loop.run(move |event, elwt| match event {
        Event::WindowEvent { window_id, event } if window_id == session.window.id() => {
            match event {
                WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                    info!(frames = session.frames, "window closed");
                    elwt.exit();
                }
                WindowEvent::Resized(size) => {
                    if let Err(err) = session.resize(size) {
                        if is_fatal(&err) {
                            error!(error = %err, "resize failed");
                            *failure_slot =
                                Some(anyhow::Error::new(err).context("resize failed"));
                            elwt.exit();
                        } else {
                            warn!(
                                error = %err,
                                width = size.width,
                                height = size.height,
                                "resize rejected"
                            );
                        }
                    }
                }
                WindowEvent::RedrawRequested => {
                    if let Err(err) = session.render_frame() {
                        if is_fatal(&err) {
                            error!(error = %err, "frame failed");
                            *failure_slot = Some(
                                anyhow::Error::new(err)
                                    .context(format!("frame failed in {} mode", session.mode)),
                            );
                            elwt.exit();
                        } else {
                            warn!(error = %err, "frame skipped");
                        }
                    }
                }
                _ => {}
            }
        }
        Event::AboutToWait => {
            session.window.request_redraw();
            elwt.set_control_flow(ControlFlow::Wait);
        }
        _ => {}
    });

    if let Err(err) = run_result {
        return Err(anyhow!("window event loop error: {err}"));
    }
    match failure {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use renderer::{DeviceError, ProgramRole};

    #[test]
    fn lost_context_and_missing_targets_end_the_session() {
        assert!(is_fatal(&RenderError::ContextUnavailable));
        assert!(is_fatal(&RenderError::TargetsUnallocated));
        assert!(is_fatal(&RenderError::Allocation {
            width: 4,
            height: 4,
            source: DeviceError::OutOfMemory {
                what: "scene color",
                width: 4,
                height: 4,
            },
        }));
        assert!(is_fatal(&RenderError::ProgramNotLinked {
            role: ProgramRole::Scene,
        }));
    }

    #[test]
    fn transient_failures_skip_a_frame() {
        assert!(!is_fatal(&RenderError::Pass {
            role: ProgramRole::Ink,
            source: DeviceError::Draw("timeout".to_string()),
        }));
        assert!(!is_fatal(&RenderError::Surface(DeviceError::Surface(
            "outdated".to_string()
        ))));
        assert!(!is_fatal(&RenderError::SizeExceedsLimit {
            width: 1 << 16,
            height: 1,
            max: 8192,
        }));
    }
}
