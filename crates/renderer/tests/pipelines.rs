use glam::{Mat4, Vec2, Vec3, Vec4};
use renderer::headless::{DeviceCommand, HeadlessDevice, HeadlessMesh, HeadlessProgram};
use renderer::{
    Camera, DeviceError, FramebufferBinding, FrameParams, GraphicsDevice, ProgramRole, RenderError, Renderer,
    Splash, INK_TEXTURE_UNIT, SCENE_TEXTURE_UNIT,
};

const PAPER: Vec4 = Vec4::new(0.98, 0.965, 0.93, 1.0);

struct FixedCamera;

impl Camera for FixedCamera {
    fn projection_matrix(&self) -> Mat4 {
        Mat4::from_scale(Vec3::new(1.0, 1.0, 0.5))
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::from_translation(Vec3::new(0.0, 0.0, -0.25))
    }
}

fn params() -> FrameParams {
    FrameParams {
        color1: Vec4::new(1.0, 180.0 / 255.0, 125.0 / 255.0, 1.0),
        color2: Vec4::new(57.0 / 255.0, 15.0 / 255.0, 1.0, 1.0),
        splash: Splash {
            color: Vec4::new(0.1, 0.1, 0.2, 1.0),
            count: 12.0,
            scale_var: 0.4,
        },
        freq: 1.0,
        time: 3.0,
        layer_num: 4,
    }
}

fn renderer(width: u32, height: u32) -> Renderer<HeadlessDevice> {
    let mut renderer =
        Renderer::new(HeadlessDevice::new(width, height), width, height).expect("renderer");
    renderer.set_clear_color(PAPER.x, PAPER.y, PAPER.z, PAPER.w);
    renderer
}

fn scene_program() -> HeadlessProgram {
    HeadlessProgram::new("scene", |input| input.uniforms.color1)
}

fn post_program() -> HeadlessProgram {
    HeadlessProgram::new("post", |input| input.sample_scene(input.fragment.uv))
}

/// Paints splash color on the left half of the canvas only.
fn ink_program() -> HeadlessProgram {
    HeadlessProgram::new("ink", |input| {
        if input.fragment.uv.x < 0.5 {
            input.uniforms.splash_color
        } else {
            Vec4::ZERO
        }
    })
}

fn over(top: Vec4, bottom: Vec4) -> Vec4 {
    let alpha = top.w + bottom.w * (1.0 - top.w);
    let rgb = top.truncate() * top.w + bottom.truncate() * (1.0 - top.w);
    rgb.extend(alpha)
}

fn paper_program() -> HeadlessProgram {
    HeadlessProgram::new("paper", |input| {
        let uv = input.fragment.uv;
        over(input.sample_scene(uv), over(input.sample_ink(uv), PAPER))
    })
}

fn right_half() -> HeadlessMesh {
    HeadlessMesh::rect(Vec2::new(0.0, -1.0), Vec2::splat(1.0), 0.0)
}

fn assert_close(actual: Vec4, expected: Vec4) {
    assert!(
        (actual - expected).abs().max_element() < 1e-4,
        "{actual:?} != {expected:?}"
    );
}

fn assert_baseline(renderer: &Renderer<HeadlessDevice>) {
    let device = renderer.device();
    let state = device.binding_state();
    assert!(state.is_baseline(), "{state:?}");
    assert_eq!(state.framebuffer, FramebufferBinding::Screen);
    assert_eq!(state.clear_color, renderer.clear_color());
    assert_eq!(device.bound_texture(SCENE_TEXTURE_UNIT), None);
    assert_eq!(device.bound_texture(INK_TEXTURE_UNIT), None);
}

fn clears(commands: &[DeviceCommand]) -> Vec<(FramebufferBinding, Vec4)> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::Clear { target, color, .. } => Some((*target, *color)),
            _ => None,
        })
        .collect()
}

fn draws(commands: &[DeviceCommand]) -> Vec<(&'static str, bool)> {
    commands
        .iter()
        .filter_map(|command| match command {
            DeviceCommand::Draw {
                program,
                depth_test,
                ..
            } => Some((*program, *depth_test)),
            _ => None,
        })
        .collect()
}

fn sorted(mut names: Vec<&'static str>) -> Vec<&'static str> {
    names.sort_unstable();
    names
}

#[test]
fn every_pipeline_returns_to_the_baseline_state() {
    let mut renderer = renderer(8, 4);
    let (scene, post, ink, paper) = (
        scene_program(),
        post_program(),
        ink_program(),
        paper_program(),
    );
    let quad = HeadlessMesh::full_screen();
    let mesh = right_half();
    let params = params();

    renderer
        .render_with_post(&FixedCamera, &scene, &post, &[&mesh], &quad, &params)
        .expect("post");
    assert_baseline(&renderer);

    renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&mesh], &quad, &params)
        .expect("composite");
    assert_baseline(&renderer);

    renderer
        .render_ink_only(&ink, &quad, &params)
        .expect("ink only");
    assert_baseline(&renderer);

    renderer
        .render_scene_only(&FixedCamera, &scene, &[&mesh], &params)
        .expect("scene only");
    assert_baseline(&renderer);

    assert_eq!(renderer.device().feedback_reads(), 0);
}

#[test]
fn scene_only_after_resize_fills_canvas_and_clears_depth() {
    let mut renderer = renderer(2, 2);
    renderer.set_size(100, 100).expect("resize");
    let scene = scene_program();
    let quad = HeadlessMesh::full_screen();
    let params = params();

    for _ in 0..2 {
        renderer.device_mut().take_commands();
        renderer
            .render_scene_only(&FixedCamera, &scene, &[&quad], &params)
            .expect("scene only");
        // Same depth every frame: only passes LESS when depth was cleared.
        let drawn: usize = renderer
            .device()
            .commands()
            .iter()
            .filter_map(|command| match command {
                DeviceCommand::Draw { fragments, .. } => Some(*fragments),
                _ => None,
            })
            .sum();
        assert_eq!(drawn, 100 * 100);
    }

    let screen = renderer.device().screen();
    assert_eq!(screen.size(), (100, 100));
    for pixel in screen.pixels() {
        assert_close(*pixel, params.color1);
    }
    assert!((renderer.device().screen_depth(50, 50) - 0.5).abs() < 1e-6);
}

#[test]
fn post_with_no_scene_geometry_shows_the_cleared_scene() {
    let mut renderer = renderer(6, 6);
    let (scene, post) = (scene_program(), post_program());
    let quad = HeadlessMesh::full_screen();

    renderer
        .render_with_post(&FixedCamera, &scene, &post, &[], &quad, &params())
        .expect("post");

    for pixel in renderer.device().screen().pixels() {
        assert_close(*pixel, PAPER);
    }
}

#[test]
fn post_renders_scene_offscreen_then_samples_it_on_screen() {
    let mut renderer = renderer(8, 4);
    let (scene, post) = (scene_program(), post_program());
    let quad = HeadlessMesh::full_screen();
    let mesh = right_half();
    let params = params();
    let scene_fb = renderer.targets().scene().expect("scene target").framebuffer();
    renderer.device_mut().take_commands();

    renderer
        .render_with_post(&FixedCamera, &scene, &post, &[&mesh], &quad, &params)
        .expect("post");

    let commands = renderer.device().commands();
    assert_eq!(
        clears(commands),
        vec![
            (FramebufferBinding::Offscreen(scene_fb), PAPER),
            (FramebufferBinding::Screen, PAPER),
        ]
    );
    assert_eq!(draws(commands), vec![("scene", true), ("post", false)]);

    let screen = renderer.device().screen();
    assert_close(screen.pixel(1, 2), PAPER);
    assert_close(screen.pixel(6, 2), params.color1);
}

#[test]
fn composite_keeps_offscreen_backgrounds_transparent() {
    let mut renderer = renderer(8, 4);
    let (scene, ink, paper) = (scene_program(), ink_program(), paper_program());
    let quad = HeadlessMesh::full_screen();
    let mesh = right_half();
    let params = params();

    renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&mesh], &quad, &params)
        .expect("composite");

    let scene_color = renderer.targets().scene().expect("scene").color();
    let ink_color = renderer.targets().ink().expect("ink").color();
    let device = renderer.device();

    let scene_image = device.texture(scene_color).expect("scene texture");
    assert_eq!(scene_image.pixel(1, 1).w, 0.0);
    assert_close(scene_image.pixel(6, 1), params.color1);

    let ink_image = device.texture(ink_color).expect("ink texture");
    assert_close(ink_image.pixel(1, 1), params.splash.color);
    assert_eq!(ink_image.pixel(6, 1).w, 0.0);

    let screen = device.screen();
    assert_close(screen.pixel(1, 1), params.splash.color);
    assert_close(screen.pixel(6, 1), params.color1);
}

#[test]
fn composite_gap_shows_only_the_paper_background() {
    const BACKGROUND: Vec4 = Vec4::new(0.3, 0.6, 0.9, 1.0);
    let mut renderer = renderer(8, 4);
    renderer.set_clear_color(1.0, 0.0, 1.0, 1.0);
    let scene = scene_program();
    let ink = HeadlessProgram::new("ink", |input| {
        if input.fragment.uv.x < 0.25 {
            input.uniforms.splash_color
        } else {
            Vec4::ZERO
        }
    });
    let paper = HeadlessProgram::new("paper", |input| {
        let uv = input.fragment.uv;
        over(input.sample_scene(uv), over(input.sample_ink(uv), BACKGROUND))
    });
    let quad = HeadlessMesh::full_screen();
    // pixel columns 6 and 7 only
    let mesh = HeadlessMesh::rect(Vec2::new(0.5, -1.0), Vec2::splat(1.0), 0.0);
    let params = params();

    renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&mesh], &quad, &params)
        .expect("composite");

    let screen = renderer.device().screen();
    for y in 0..4 {
        for x in 2..6 {
            assert_close(screen.pixel(x, y), BACKGROUND);
        }
    }
    assert_close(screen.pixel(0, 1), params.splash.color);
    assert_close(screen.pixel(7, 1), params.color1);
    assert_baseline(&renderer);
}

#[test]
fn composite_runs_ink_then_scene_then_paper() {
    let mut renderer = renderer(8, 4);
    let (scene, ink, paper) = (scene_program(), ink_program(), paper_program());
    let quad = HeadlessMesh::full_screen();
    let mesh = right_half();
    let scene_fb = renderer.targets().scene().expect("scene").framebuffer();
    let ink_fb = renderer.targets().ink().expect("ink").framebuffer();
    renderer.device_mut().take_commands();

    renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&mesh], &quad, &params())
        .expect("composite");

    let commands = renderer.device().commands();
    assert_eq!(
        clears(commands),
        vec![
            (FramebufferBinding::Offscreen(ink_fb), Vec4::ZERO),
            (FramebufferBinding::Offscreen(scene_fb), Vec4::ZERO),
            (FramebufferBinding::Screen, PAPER),
        ]
    );
    assert_eq!(
        draws(commands),
        vec![("ink", false), ("scene", true), ("paper", false)]
    );
}

#[test]
fn paper_pass_reads_the_current_frame() {
    let mut renderer = renderer(8, 4);
    let (scene, ink, paper) = (scene_program(), ink_program(), paper_program());
    let quad = HeadlessMesh::full_screen();
    let mesh = right_half();
    let mut params = params();

    renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&mesh], &quad, &params)
        .expect("first frame");

    params.color1 = Vec4::new(0.2, 0.4, 0.6, 1.0);
    params.splash.color = Vec4::new(0.5, 0.0, 0.0, 1.0);
    renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&mesh], &quad, &params)
        .expect("second frame");

    let screen = renderer.device().screen();
    assert_close(screen.pixel(1, 1), params.splash.color);
    assert_close(screen.pixel(6, 1), params.color1);
}

#[test]
fn ink_only_draws_straight_to_screen_over_clear_color() {
    let mut renderer = renderer(8, 4);
    let ink = ink_program();
    let params = params();
    renderer.device_mut().take_commands();

    renderer
        .render_ink_only(&ink, &HeadlessMesh::full_screen(), &params)
        .expect("ink only");

    let commands = renderer.device().commands();
    assert_eq!(clears(commands), vec![(FramebufferBinding::Screen, PAPER)]);
    assert_eq!(draws(commands), vec![("ink", false)]);

    let screen = renderer.device().screen();
    assert_close(screen.pixel(1, 1), params.splash.color);
    // The ink shader writes transparent black on the right; no blending.
    assert_close(screen.pixel(6, 1), Vec4::ZERO);
}

#[test]
fn passes_assign_their_uniform_sets() {
    let mut renderer = renderer(8, 4);
    let (scene, post, ink, paper) = (
        scene_program(),
        post_program(),
        ink_program(),
        paper_program(),
    );
    let quad = HeadlessMesh::full_screen();
    let params = params();

    renderer
        .render_with_post(&FixedCamera, &scene, &post, &[&quad], &quad, &params)
        .expect("post");
    assert_eq!(
        sorted(scene.take_assignments()),
        sorted(vec!["model", "view_proj", "color1", "color2", "freq", "time", "layer_num"])
    );
    assert_eq!(
        sorted(post.take_assignments()),
        sorted(vec![
            "model",
            "view_proj",
            "time",
            "color1",
            "color2",
            "splash_color",
            "splash_count",
            "splash_scale_var",
            "resolution",
            "scene_texture",
        ])
    );

    renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&quad], &quad, &params)
        .expect("composite");
    assert_eq!(
        sorted(ink.take_assignments()),
        sorted(vec![
            "model",
            "view_proj",
            "time",
            "color1",
            "splash_color",
            "splash_count",
            "splash_scale_var",
            "resolution",
        ])
    );
    assert_eq!(
        sorted(paper.take_assignments()),
        sorted(vec![
            "model",
            "view_proj",
            "time",
            "color1",
            "color2",
            "resolution",
            "scene_texture",
            "ink_texture",
        ])
    );

    let scene_uniforms = scene.uniforms();
    assert_eq!(scene_uniforms.view_proj, FixedCamera.view_projection());
    assert_eq!(scene_uniforms.model, Mat4::IDENTITY);
    assert_eq!(scene_uniforms.layer_num, 4);

    let post_uniforms = post.uniforms();
    assert_eq!(post_uniforms.view_proj, Mat4::IDENTITY);
    assert_eq!(post_uniforms.resolution, Vec2::new(8.0, 4.0));
    assert_eq!(post_uniforms.scene_texture, Some(SCENE_TEXTURE_UNIT));

    let paper_uniforms = paper.uniforms();
    assert_eq!(paper_uniforms.scene_texture, Some(SCENE_TEXTURE_UNIT));
    assert_eq!(paper_uniforms.ink_texture, Some(INK_TEXTURE_UNIT));
    assert_eq!(paper_uniforms.time, 3.0);
}

#[test]
fn unlinked_program_is_rejected_before_any_pass() {
    let mut renderer = renderer(4, 4);
    let scene = scene_program();
    let post = HeadlessProgram::unlinked("post");
    let quad = HeadlessMesh::full_screen();
    renderer.device_mut().take_commands();

    let err = renderer
        .render_with_post(&FixedCamera, &scene, &post, &[&quad], &quad, &params())
        .unwrap_err();

    assert!(matches!(
        err,
        RenderError::ProgramNotLinked {
            role: ProgramRole::PostProcess
        }
    ));
    assert!(clears(renderer.device().commands()).is_empty());
    assert!(draws(renderer.device().commands()).is_empty());
    assert!(scene.take_assignments().is_empty());
    assert_baseline(&renderer);
}

#[test]
fn lost_context_is_reported_without_rendering() {
    let mut renderer = renderer(4, 4);
    let scene = scene_program();
    renderer.device_mut().lose_context();

    let err = renderer
        .render_scene_only(&FixedCamera, &scene, &[&HeadlessMesh::full_screen()], &params())
        .unwrap_err();
    assert!(matches!(err, RenderError::ContextUnavailable));

    let err = renderer.set_size(8, 8).unwrap_err();
    assert!(matches!(err, RenderError::ContextUnavailable));
    assert_eq!(renderer.size(), (4, 4));
}

#[test]
fn failing_draw_aborts_the_pipeline_and_restores_state() {
    let mut renderer = renderer(8, 4);
    let scene = scene_program().with_failing_draws();
    let (ink, paper) = (ink_program(), paper_program());
    let quad = HeadlessMesh::full_screen();
    renderer.device_mut().take_commands();

    let err = renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&quad], &quad, &params())
        .unwrap_err();

    assert!(matches!(
        err,
        RenderError::Pass {
            role: ProgramRole::Scene,
            ..
        }
    ));
    assert_eq!(draws(renderer.device().commands()), vec![("ink", false)]);
    assert!(paper.take_assignments().is_empty());
    assert_baseline(&renderer);
}

#[test]
fn resize_recreates_targets_and_retires_old_handles() {
    let mut renderer = renderer(8, 4);
    let old_scene = *renderer.targets().scene().expect("scene");
    let old_ink = *renderer.targets().ink().expect("ink");
    let generation = renderer.targets().generation();

    renderer.set_size(32, 16).expect("resize");

    let device = renderer.device();
    assert!(!device.is_texture_live(old_scene.color()));
    assert!(!device.is_framebuffer_live(old_scene.framebuffer()));
    assert!(!device.is_depth_buffer_live(old_scene.depth().expect("scene depth")));
    assert!(!device.is_texture_live(old_ink.color()));

    let scene = renderer.targets().scene().expect("scene");
    let ink = renderer.targets().ink().expect("ink");
    assert_eq!(scene.size(), (32, 16));
    assert_eq!(device.texture_size(scene.color()), Some((32, 16)));
    assert_eq!(device.texture_size(ink.color()), Some((32, 16)));
    assert!(ink.depth().is_none());
    assert_eq!(renderer.targets().generation(), generation + 1);
    assert_eq!(device.screen().size(), (32, 16));
    assert_eq!(device.live_textures(), 2);
    assert_eq!(device.live_framebuffers(), 2);
    assert_eq!(device.live_depth_buffers(), 1);
}

#[test]
fn zero_sized_resize_keeps_current_targets() {
    let mut renderer = renderer(8, 4);
    let scene = *renderer.targets().scene().expect("scene");
    let generation = renderer.targets().generation();

    renderer.set_size(0, 600).expect("zero width");
    renderer.set_size(800, 0).expect("zero height");

    assert_eq!(renderer.size(), (8, 4));
    assert_eq!(renderer.targets().generation(), generation);
    assert_eq!(renderer.targets().scene(), Some(&scene));
    assert!(renderer.device().is_texture_live(scene.color()));
}

#[test]
fn oversized_resize_is_rejected_and_targets_survive() {
    let device = HeadlessDevice::new(8, 4).with_max_texture_dimension(64);
    let mut renderer = Renderer::new(device, 8, 4).expect("renderer");
    let scene = *renderer.targets().scene().expect("scene");

    let err = renderer.set_size(65, 10).unwrap_err();
    assert!(matches!(
        err,
        RenderError::SizeExceedsLimit {
            width: 65,
            height: 10,
            max: 64
        }
    ));
    assert_eq!(renderer.size(), (8, 4));
    assert!(renderer.device().is_texture_live(scene.color()));
}

#[test]
fn failed_allocation_leaves_targets_unallocated() {
    let mut renderer = renderer(8, 4);
    let (scene, post, ink) = (scene_program(), post_program(), ink_program());
    let quad = HeadlessMesh::full_screen();
    renderer.device_mut().set_allocation_budget(Some(2));

    let err = renderer.set_size(16, 16).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Allocation {
            width: 16,
            height: 16,
            ..
        }
    ));
    assert!(!renderer.targets().is_allocated());
    assert_eq!(renderer.device().live_textures(), 0);
    assert_eq!(renderer.device().live_depth_buffers(), 0);

    let err = renderer
        .render_with_post(&FixedCamera, &scene, &post, &[&quad], &quad, &params())
        .unwrap_err();
    assert!(matches!(err, RenderError::TargetsUnallocated));

    renderer
        .render_ink_only(&ink, &quad, &params())
        .expect("ink only needs no targets");

    renderer.device_mut().set_allocation_budget(None);
    renderer.set_size(16, 16).expect("retry");
    assert!(renderer.targets().is_allocated());
}

#[test]
fn failed_surface_resize_leaves_targets_unallocated() {
    let mut renderer = renderer(8, 4);
    let (scene, post, ink, paper) = (
        scene_program(),
        post_program(),
        ink_program(),
        paper_program(),
    );
    let quad = HeadlessMesh::full_screen();
    let old_scene = *renderer.targets().scene().expect("scene");
    let generation = renderer.targets().generation();
    renderer.device_mut().set_surface_resize_failure(true);

    let err = renderer.set_size(16, 8).unwrap_err();
    assert!(matches!(err, RenderError::Surface(DeviceError::Surface(_))));
    assert_eq!(renderer.size(), (16, 8));
    assert!(!renderer.targets().is_allocated());
    assert!(!renderer.device().is_texture_live(old_scene.color()));
    assert_eq!(renderer.device().live_textures(), 0);
    assert_eq!(renderer.device().live_framebuffers(), 0);

    let err = renderer
        .render_with_post(&FixedCamera, &scene, &post, &[&quad], &quad, &params())
        .unwrap_err();
    assert!(matches!(err, RenderError::TargetsUnallocated));
    let err = renderer
        .render_ink_scene_paper(&FixedCamera, &scene, &ink, &paper, &[&quad], &quad, &params())
        .unwrap_err();
    assert!(matches!(err, RenderError::TargetsUnallocated));
    assert_baseline(&renderer);

    renderer.device_mut().set_surface_resize_failure(false);
    renderer.set_size(16, 8).expect("retry");
    assert_eq!(renderer.targets().generation(), generation + 1);
    assert_eq!(renderer.device().screen().size(), (16, 8));
}

#[test]
fn into_device_releases_every_target() {
    let renderer = renderer(8, 4);
    let device = renderer.into_device();
    assert_eq!(device.live_textures(), 0);
    assert_eq!(device.live_depth_buffers(), 0);
    assert_eq!(device.live_framebuffers(), 0);
}
