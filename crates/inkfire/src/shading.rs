//! CPU fragment stages for the headless device.
//!
//! These are deterministic stand-ins for the GPU shaders: a banded fireball
//! for the scene, ink splashes, a post-process pass that stains the scene
//! with ink, and a paper composite.

use std::f32::consts::PI;

use glam::{Vec2, Vec4};
use renderer::headless::{HeadlessProgram, ShadeInput};

/// Base tone of the paper under the composite.
pub const PAPER_TONE: Vec4 = Vec4::new(0.98, 0.965, 0.93, 1.0);
const MAX_SPLASHES: u32 = 64;
const SPLASH_RADIUS: f32 = 0.08;

/// The four programs a frame can need, one per pipeline role.
pub struct Programs<P> {
    pub scene: P,
    pub post: P,
    pub ink: P,
    pub paper: P,
}

impl Programs<HeadlessProgram> {
    pub fn headless() -> Self {
        Self {
            scene: HeadlessProgram::new("fireball", fireball),
            post: HeadlessProgram::new("post", post_process),
            ink: HeadlessProgram::new("ink", ink),
            paper: HeadlessProgram::new("paper", paper),
        }
    }
}

fn fireball(input: &ShadeInput<'_>) -> Vec4 {
    let u = input.uniforms;
    let distance = (input.fragment.uv - Vec2::splat(0.5)).length() * 2.0;
    let layers = u.layer_num.max(1) as f32;
    let wave = (distance * layers * PI - u.time * u.freq * 0.05).sin() * 0.5 + 0.5;
    u.color1.lerp(u.color2, wave).truncate().extend(1.0)
}

fn ink(input: &ShadeInput<'_>) -> Vec4 {
    let u = input.uniforms;
    let coverage = splash_coverage(
        input.fragment.uv,
        u.resolution,
        u.splash_count,
        u.splash_scale_var,
        u.time,
    );
    u.splash_color.truncate().extend(u.splash_color.w * coverage)
}

fn post_process(input: &ShadeInput<'_>) -> Vec4 {
    let u = input.uniforms;
    let uv = input.fragment.uv;
    let scene = input.sample_scene(uv);
    let coverage = splash_coverage(uv, u.resolution, u.splash_count, u.splash_scale_var, u.time);
    let stain = u.splash_color.truncate().extend(u.splash_color.w * coverage * 0.6);
    over(stain, scene)
}

fn paper(input: &ShadeInput<'_>) -> Vec4 {
    let uv = input.fragment.uv;
    let grain = hash(uv.x * 1e3 + uv.y * 7.31e4) * 0.03 - 0.015;
    let base = (PAPER_TONE.truncate() + glam::Vec3::splat(grain)).extend(1.0);
    over(input.sample_scene(uv), over(input.sample_ink(uv), base))
}

/// Porter-Duff "over" on straight-alpha colors.
pub fn over(top: Vec4, bottom: Vec4) -> Vec4 {
    let alpha = top.w + bottom.w * (1.0 - top.w);
    if alpha <= 0.0 {
        return Vec4::ZERO;
    }
    let rgb = (top.truncate() * top.w + bottom.truncate() * bottom.w * (1.0 - top.w)) / alpha;
    rgb.extend(alpha)
}

/// Ink coverage in `[0, 1]` from up to `count` soft discs placed
/// deterministically and drifting slowly with `time`.
fn splash_coverage(uv: Vec2, resolution: Vec2, count: f32, scale_var: f32, time: f32) -> f32 {
    let aspect = if resolution.y > 0.0 {
        resolution.x / resolution.y
    } else {
        1.0
    };
    let splashes = (count.max(0.0) as u32).min(MAX_SPLASHES);
    let mut coverage: f32 = 0.0;
    for index in 0..splashes {
        let seed = index as f32;
        let centre = Vec2::new(
            0.1 + 0.8 * hash(seed * 1.7 + 0.3),
            0.1 + 0.8 * hash(seed * 3.1 + 0.7) + (time * 0.01 + seed).sin() * 0.02,
        );
        let radius = SPLASH_RADIUS * (1.0 + scale_var * (hash(seed + 0.5) * 2.0 - 1.0)).max(0.1);
        let offset = (uv - centre) * Vec2::new(aspect, 1.0);
        let edge = smoothstep(radius, radius * 0.8, offset.length());
        coverage = coverage.max(edge);
    }
    coverage
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

fn hash(x: f32) -> f32 {
    ((x * 12.9898).sin() * 43758.547).fract().abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn over_with_opaque_top_keeps_top() {
        let top = Vec4::new(0.2, 0.3, 0.4, 1.0);
        assert_eq!(over(top, PAPER_TONE), top);
    }

    #[test]
    fn over_with_transparent_top_keeps_bottom() {
        let result = over(Vec4::ZERO, PAPER_TONE);
        assert!((result - PAPER_TONE).abs().max_element() < 1e-6);
        assert_eq!(over(Vec4::ZERO, Vec4::ZERO), Vec4::ZERO);
    }

    #[test]
    fn no_splashes_means_no_coverage() {
        let coverage = splash_coverage(Vec2::splat(0.5), Vec2::new(64.0, 64.0), 0.0, 0.5, 1.0);
        assert_eq!(coverage, 0.0);
    }

    #[test]
    fn splash_centre_is_fully_covered() {
        let centre = Vec2::new(0.1 + 0.8 * hash(0.3), 0.1 + 0.8 * hash(0.7));
        let coverage = splash_coverage(centre, Vec2::new(64.0, 64.0), 1.0, 0.0, 0.0);
        assert!((coverage - 1.0).abs() < 1e-6);
    }

    #[test]
    fn hash_stays_in_unit_range() {
        for step in 0..256 {
            let value = hash(step as f32 * 0.37);
            assert!((0.0..1.0).contains(&value));
        }
    }
}
