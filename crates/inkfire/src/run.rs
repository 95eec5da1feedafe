use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use glam::Vec4;
use image::imageops::flip_vertical_in_place;
use image::{ImageFormat, RgbaImage};
use renderer::headless::{HeadlessDevice, HeadlessMesh, HeadlessProgram, Image};
use renderer::{
    FrameParams, GraphicsDevice, InkSampler, RenderError, Renderer, ResolutionUniform,
    SceneSampler, SceneWave, SecondaryColor, ShaderProgram, Splash, SplashUniforms,
};
use sceneconfig::{RenderMode, Rgba, SceneConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

use crate::cli::{ensure_png_path, parse_surface_size, Cli};
use crate::scene::{subject_mesh, FixedCamera};
use crate::shading::Programs;

/// Half-extent of the subject in world units.
pub(crate) const SUBJECT_HALF_EXTENT: f32 = 1.0;

pub fn initialise_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub mode: RenderMode,
    pub width: u32,
    pub height: u32,
    pub frames: u32,
    /// Time uniform of the last rendered frame.
    pub time: f32,
    pub target_generation: u64,
    pub mean_color: [f32; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

pub fn run(cli: Cli) -> Result<()> {
    if let Some(path) = &cli.output {
        ensure_png_path(path).map_err(|err| anyhow::anyhow!(err))?;
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if let Some(size) = cli.size.as_deref() {
        let (width, height) = parse_surface_size(size)
            .with_context(|| format!("invalid --size value '{size}'"))?;
        config.surface.width = width;
        config.surface.height = height;
    }

    if cli.window {
        return crate::window::run_window(&config);
    }

    let summary = render_frames(&config, cli.frames, cli.output.as_deref())?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("failed to encode summary")?
        );
    } else {
        println!(
            "Rendered {} frame(s) in {} mode at {}x{} (time {})",
            summary.frames, summary.mode, summary.width, summary.height, summary.time
        );
        let [r, g, b, a] = summary.mean_color;
        println!("  mean color: {r:.4} {g:.4} {b:.4} {a:.4}");
        if let Some(output) = &summary.output {
            println!("  wrote {}", output.display());
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<SceneConfig> {
    let Some(path) = path else {
        tracing::debug!("no --config given; using built-in scene defaults");
        return Ok(SceneConfig::default());
    };
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config at {}", path.display()))?;
    let config = SceneConfig::from_toml_str(&contents)
        .with_context(|| format!("failed to load config at {}", path.display()))?;
    tracing::debug!(path = %path.display(), mode = %config.mode, "loaded scene config");
    Ok(config)
}

pub fn render_frames(
    config: &SceneConfig,
    frames: u32,
    output: Option<&Path>,
) -> Result<RunSummary> {
    let (width, height) = (config.surface.width, config.surface.height);
    let device = HeadlessDevice::new(width, height);
    let mut renderer =
        Renderer::new(device, width, height).context("failed to initialise renderer")?;
    let [r, g, b, a] = config.surface.clear_color.to_array();
    renderer.set_clear_color(r, g, b, a);

    let programs = Programs::<HeadlessProgram>::headless();
    let camera = FixedCamera::new(width, height);
    let subject = subject_mesh(&camera, SUBJECT_HALF_EXTENT);
    let quad = HeadlessMesh::full_screen();
    let mut params = frame_params(config);

    for frame in 0..frames {
        params.time += config.animation.time_step;
        renderer.clear().context("failed to clear the screen")?;
        let result = render_mode(
            &mut renderer,
            config.mode,
            &camera,
            &programs,
            &subject,
            &quad,
            &params,
        );
        result.with_context(|| format!("frame {frame} failed in {} mode", config.mode))?;
        tracing::trace!(frame, time = params.time, "frame rendered");
    }

    let screen = renderer.device().screen();
    if let Some(path) = output {
        export_png(screen, path)?;
        tracing::info!(
            path = %path.display(),
            width,
            height,
            "exported final frame"
        );
    }

    Ok(RunSummary {
        mode: config.mode,
        width,
        height,
        frames,
        time: params.time,
        target_generation: renderer.targets().generation(),
        mean_color: mean_color(screen).to_array(),
        output: output.map(Path::to_path_buf),
    })
}

/// Runs the pipeline `mode` selects over the subject and the screen quad.
pub(crate) fn render_mode<D, P>(
    renderer: &mut Renderer<D>,
    mode: RenderMode,
    camera: &FixedCamera,
    programs: &Programs<P>,
    subject: &D::Drawable,
    quad: &D::Drawable,
    params: &FrameParams,
) -> Result<(), RenderError>
where
    D: GraphicsDevice,
    P: ShaderProgram<D>
        + SecondaryColor
        + SceneWave
        + SplashUniforms
        + ResolutionUniform
        + SceneSampler
        + InkSampler,
{
    match mode {
        RenderMode::Post => renderer.render_with_post(
            camera,
            &programs.scene,
            &programs.post,
            &[subject],
            quad,
            params,
        ),
        RenderMode::InkScenePaper => renderer.render_ink_scene_paper(
            camera,
            &programs.scene,
            &programs.ink,
            &programs.paper,
            &[subject],
            quad,
            params,
        ),
        RenderMode::Ink => renderer.render_ink_only(&programs.ink, quad, params),
        RenderMode::Scene => {
            renderer.render_scene_only(camera, &programs.scene, &[subject], params)
        }
    }
}

pub(crate) fn frame_params(config: &SceneConfig) -> FrameParams {
    FrameParams {
        color1: to_vec4(config.palette.color1),
        color2: to_vec4(config.palette.color2),
        splash: Splash {
            color: to_vec4(config.splash.color),
            count: config.splash.count,
            scale_var: config.splash.scale_variance,
        },
        freq: config.animation.frequency,
        time: 0.0,
        layer_num: config.animation.layers,
    }
}

fn to_vec4(color: Rgba) -> Vec4 {
    Vec4::from_array(color.to_array())
}

fn mean_color(image: &Image) -> Vec4 {
    let pixels = image.pixels();
    if pixels.is_empty() {
        return Vec4::ZERO;
    }
    pixels.iter().copied().sum::<Vec4>() / pixels.len() as f32
}

/// Writes `image` as PNG with a top-left origin.
pub fn export_png(image: &Image, path: &Path) -> Result<()> {
    let (width, height) = image.size();
    let raw: Vec<u8> = image
        .pixels()
        .iter()
        .flat_map(|pixel| pixel.to_array().map(to_byte))
        .collect();
    let mut rgba = RgbaImage::from_raw(width, height, raw)
        .context("screen buffer does not match its dimensions")?;
    flip_vertical_in_place(&mut rgba);

    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    rgba.save_with_format(path, ImageFormat::Png)
        .with_context(|| format!("failed to write PNG to {}", path.display()))
}

fn to_byte(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config(mode: RenderMode) -> SceneConfig {
        let mut config = SceneConfig::default();
        config.mode = mode;
        config.surface.width = 24;
        config.surface.height = 16;
        config
    }

    #[test]
    fn every_mode_renders_the_requested_frames() {
        for mode in RenderMode::ALL {
            let summary = render_frames(&small_config(mode), 3, None).expect("render");
            assert_eq!(summary.mode, mode);
            assert_eq!(summary.frames, 3);
            assert_eq!(summary.time, 3.0);
            assert_eq!(summary.target_generation, 1);
        }
    }

    #[test]
    fn scene_mode_leaves_corners_at_clear_color() {
        let config = small_config(RenderMode::Scene);
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("scene.png");
        render_frames(&config, 1, Some(&path)).expect("render");

        let png = image::open(&path).expect("open png").to_rgba8();
        assert_eq!(png.dimensions(), (24, 16));
        let expected = config.surface.clear_color.to_array().map(to_byte);
        assert_eq!(png.get_pixel(0, 0).0, expected);
        assert_eq!(png.get_pixel(23, 15).0, expected);
        assert_ne!(png.get_pixel(12, 8).0, expected);
    }

    #[test]
    fn export_flips_to_top_left_origin() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/flip.png");
        let mut renderer = Renderer::new(HeadlessDevice::new(2, 2), 2, 2).expect("renderer");
        renderer.set_clear_color(1.0, 0.0, 0.0, 1.0);
        renderer.clear().expect("clear");
        let upper_half = HeadlessMesh::rect(glam::Vec2::new(-1.0, 0.0), glam::Vec2::ONE, 0.0);
        renderer
            .device_mut()
            .rasterize("upper", &upper_half, |_| Vec4::new(0.0, 0.0, 1.0, 1.0))
            .expect("rasterize");

        export_png(renderer.device().screen(), &path).expect("export");

        let png = image::open(&path).expect("open png").to_rgba8();
        assert_eq!(png.get_pixel(0, 0).0, [0, 0, 255, 255]);
        assert_eq!(png.get_pixel(1, 1).0, [255, 0, 0, 255]);
    }

    #[test]
    fn byte_conversion_clamps_and_rounds() {
        assert_eq!(to_byte(-0.5), 0);
        assert_eq!(to_byte(0.98), 250);
        assert_eq!(to_byte(2.0), 255);
    }
}
