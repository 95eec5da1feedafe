//! WGSL programs and meshes for the windowed renderer.

use anyhow::{Context, Result};
use glam::Vec3;
use renderer::gpu::{GpuMesh, GpuVertex, WgpuDevice, WgpuProgram};

use crate::shading::Programs;

const PRELUDE: &str = include_str!("../shaders/prelude.wgsl");
const SCENE_STAGE: &str = include_str!("../shaders/scene.wgsl");
const POST_STAGE: &str = include_str!("../shaders/post.wgsl");
const INK_STAGE: &str = include_str!("../shaders/ink.wgsl");
const PAPER_STAGE: &str = include_str!("../shaders/paper.wgsl");

/// Prepends the shared uniform block, bindings and vertex stage to a
/// fragment stage.
fn program_source(stage: &str) -> String {
    format!("{PRELUDE}\n{stage}")
}

impl Programs<WgpuProgram> {
    pub fn compile(device: &WgpuDevice) -> Result<Self> {
        Ok(Self {
            scene: compile(device, "fireball", SCENE_STAGE)?,
            post: compile(device, "post", POST_STAGE)?,
            ink: compile(device, "ink", INK_STAGE)?,
            paper: compile(device, "paper", PAPER_STAGE)?,
        })
    }
}

fn compile(device: &WgpuDevice, label: &str, stage: &str) -> Result<WgpuProgram> {
    WgpuProgram::new(device, label, &program_source(stage))
        .with_context(|| format!("failed to build the {label} program"))
}

pub struct SceneMeshes {
    pub subject: GpuMesh,
    pub quad: GpuMesh,
}

impl SceneMeshes {
    pub fn upload(device: &WgpuDevice, half_extent: f32) -> Self {
        let (vertices, indices) = cube_geometry(half_extent);
        let subject = GpuMesh::new(device, "subject", &vertices, &indices);
        let (vertices, indices) = screen_quad_geometry();
        let quad = GpuMesh::new(device, "screen quad", &vertices, &indices);
        Self { subject, quad }
    }
}

/// Axis-aligned cube centred on the origin, four vertices per face so each
/// face keeps a flat normal. Triangles wind counter-clockwise seen from
/// outside.
pub fn cube_geometry(half_extent: f32) -> (Vec<GpuVertex>, Vec<u32>) {
    // (normal, u, v) with u × v = normal
    let faces = [
        (Vec3::X, Vec3::NEG_Z, Vec3::Y),
        (Vec3::NEG_X, Vec3::Z, Vec3::Y),
        (Vec3::Y, Vec3::X, Vec3::NEG_Z),
        (Vec3::NEG_Y, Vec3::X, Vec3::Z),
        (Vec3::Z, Vec3::X, Vec3::Y),
        (Vec3::NEG_Z, Vec3::NEG_X, Vec3::Y),
    ];

    let mut vertices = Vec::with_capacity(24);
    let mut indices = Vec::with_capacity(36);
    for (normal, u, v) in faces {
        let base = vertices.len() as u32;
        let centre = normal * half_extent;
        for (su, sv) in [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)] {
            let position = centre + (u * su + v * sv) * half_extent;
            vertices.push(GpuVertex {
                position: position.extend(1.0).to_array(),
                normal: normal.extend(0.0).to_array(),
            });
        }
        indices.extend([base, base + 1, base + 2, base, base + 2, base + 3]);
    }
    (vertices, indices)
}

/// Clip-space quad covering the whole viewport.
pub fn screen_quad_geometry() -> (Vec<GpuVertex>, Vec<u32>) {
    let vertices = [(-1.0, -1.0), (1.0, -1.0), (1.0, 1.0), (-1.0, 1.0)]
        .into_iter()
        .map(|(x, y)| GpuVertex {
            position: [x, y, 0.0, 1.0],
            normal: [0.0, 0.0, 1.0, 0.0],
        })
        .collect();
    (vertices, vec![0, 1, 2, 0, 2, 3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const STAGES: [(&str, &str); 4] = [
        ("fireball", SCENE_STAGE),
        ("post", POST_STAGE),
        ("ink", INK_STAGE),
        ("paper", PAPER_STAGE),
    ];

    #[test]
    fn every_program_is_valid_wgsl() {
        for (label, stage) in STAGES {
            let module = naga::front::wgsl::parse_str(&program_source(stage))
                .unwrap_or_else(|err| panic!("{label} failed to parse: {err}"));
            naga::valid::Validator::new(
                naga::valid::ValidationFlags::all(),
                naga::valid::Capabilities::all(),
            )
            .validate(&module)
            .unwrap_or_else(|err| panic!("{label} failed validation: {err:?}"));

            let entry_points: Vec<&str> = module
                .entry_points
                .iter()
                .map(|entry| entry.name.as_str())
                .collect();
            assert!(entry_points.contains(&"vs_main"), "{label}: {entry_points:?}");
            assert!(entry_points.contains(&"fs_main"), "{label}: {entry_points:?}");
        }
    }

    #[test]
    fn cube_faces_wind_outward() {
        let (vertices, indices) = cube_geometry(0.5);
        assert_eq!(vertices.len(), 24);
        assert_eq!(indices.len(), 36);
        assert!(indices.iter().all(|index| (*index as usize) < vertices.len()));

        for triangle in indices.chunks(3) {
            let corner =
                |i: usize| Vec4::from_array(vertices[triangle[i] as usize].position).truncate();
            let normal = Vec4::from_array(vertices[triangle[0] as usize].normal).truncate();
            let winding = (corner(1) - corner(0)).cross(corner(2) - corner(0));
            assert!(winding.dot(normal) > 0.0, "{triangle:?}");
        }
    }

    #[test]
    fn cube_vertices_sit_on_their_face() {
        let (vertices, _) = cube_geometry(2.0);
        for vertex in vertices {
            let position = Vec4::from_array(vertex.position);
            let normal = Vec4::from_array(vertex.normal).truncate();
            assert_eq!(position.w, 1.0);
            assert_eq!(position.truncate().dot(normal), 2.0);
            assert_eq!(position.truncate().abs().max_element(), 2.0);
        }
    }

    #[test]
    fn screen_quad_spans_clip_space() {
        let (vertices, indices) = screen_quad_geometry();
        assert_eq!(indices, vec![0, 1, 2, 0, 2, 3]);
        let xs: Vec<f32> = vertices.iter().map(|vertex| vertex.position[0]).collect();
        let ys: Vec<f32> = vertices.iter().map(|vertex| vertex.position[1]).collect();
        assert_eq!(xs, vec![-1.0, 1.0, 1.0, -1.0]);
        assert_eq!(ys, vec![-1.0, -1.0, 1.0, 1.0]);
    }
}
