use glam::{Mat4, Vec2, Vec3};
use renderer::headless::HeadlessMesh;
use renderer::Camera;

/// Perspective camera looking at the origin from a fixed eye point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FixedCamera {
    pub eye: Vec3,
    pub target: Vec3,
    pub fovy: f32,
    pub aspect: f32,
    pub near: f32,
    pub far: f32,
}

impl FixedCamera {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            eye: Vec3::new(0.0, 0.0, 7.0),
            target: Vec3::ZERO,
            fovy: 45f32.to_radians(),
            aspect: width as f32 / height as f32,
            near: 0.1,
            far: 1000.0,
        }
    }
}

impl Camera for FixedCamera {
    fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective_rh_gl(self.fovy, self.aspect, self.near, self.far)
    }

    fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye, self.target, Vec3::Y)
    }
}

/// Screen-space footprint of an origin-centred subject with the given
/// half-extent, as seen through `camera`.
pub fn subject_mesh<C: Camera>(camera: &C, half_extent: f32) -> HeadlessMesh {
    let view_proj = camera.view_projection();
    let mut min = Vec2::splat(f32::INFINITY);
    let mut max = Vec2::splat(f32::NEG_INFINITY);
    for corner in 0..8u32 {
        let pick = |bit: u32| if corner & bit == 0 { -half_extent } else { half_extent };
        let ndc = view_proj.project_point3(Vec3::new(pick(1), pick(2), pick(4)));
        min = min.min(ndc.truncate());
        max = max.max(ndc.truncate());
    }
    let depth = view_proj.project_point3(Vec3::ZERO).z;
    HeadlessMesh::rect(
        min.clamp(Vec2::NEG_ONE, Vec2::ONE),
        max.clamp(Vec2::NEG_ONE, Vec2::ONE),
        depth,
    )
}
