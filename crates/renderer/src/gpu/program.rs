use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use anyhow::{anyhow, Result};
use glam::{Mat4, Vec4};

use super::device::{DepthMode, TargetKey, WgpuDevice, DEPTH_FORMAT};
use super::mesh::{GpuMesh, GpuVertex};
use super::uniforms::{color, ProgramUniforms};
use crate::error::DeviceError;
use crate::program::{
    InkSampler, ResolutionUniform, SceneSampler, SceneWave, SecondaryColor, ShaderProgram,
    SplashUniforms,
};

/// A WGSL program with `vs_main`/`fs_main` entry points.
///
/// The module sees the uniform block from [`ProgramUniforms`] at
/// `@group(0) @binding(0)` and two sampled textures in group 1: the scene at
/// bindings 0 (texture) and 1 (sampler), ink at bindings 2 and 3. Unassigned
/// samplers read a transparent texel.
///
/// Render pipelines are built lazily per target format and depth mode.
pub struct WgpuProgram {
    label: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    module: wgpu::ShaderModule,
    layout: wgpu::PipelineLayout,
    texture_layout: wgpu::BindGroupLayout,
    uniform_buffer: wgpu::Buffer,
    uniform_bind_group: wgpu::BindGroup,
    uniforms: Cell<ProgramUniforms>,
    scene_unit: Cell<Option<u32>>,
    ink_unit: Cell<Option<u32>>,
    pipelines: RefCell<HashMap<TargetKey, wgpu::RenderPipeline>>,
}

impl WgpuProgram {
    /// Compiles `source`. Validation failures are reported here rather than on
    /// the first draw.
    pub fn new(device: &WgpuDevice, label: &str, source: &str) -> Result<Self> {
        let gpu = device.gpu();
        gpu.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(label),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(err) = pollster::block_on(gpu.pop_error_scope()) {
            return Err(anyhow!("failed to compile {label} program: {err}"));
        }

        let uniform_layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("program uniform layout"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let texture_layout = gpu.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("program texture layout"),
            entries: &texture_layout_entries(),
        });
        let layout = gpu.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(label),
            bind_group_layouts: &[&uniform_layout, &texture_layout],
            push_constant_ranges: &[],
        });

        let uniform_buffer = gpu.create_buffer(&wgpu::BufferDescriptor {
            label: Some("program uniforms"),
            size: std::mem::size_of::<ProgramUniforms>() as wgpu::BufferAddress,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let uniform_bind_group = gpu.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("program uniforms"),
            layout: &uniform_layout,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: uniform_buffer.as_entire_binding(),
            }],
        });

        Ok(Self {
            label: label.to_owned(),
            device: gpu.clone(),
            queue: device.queue().clone(),
            module,
            layout,
            texture_layout,
            uniform_buffer,
            uniform_bind_group,
            uniforms: Cell::new(ProgramUniforms::default()),
            scene_unit: Cell::new(None),
            ink_unit: Cell::new(None),
            pipelines: RefCell::new(HashMap::new()),
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    fn update(&self, apply: impl FnOnce(&mut ProgramUniforms)) {
        let mut uniforms = self.uniforms.get();
        apply(&mut uniforms);
        self.uniforms.set(uniforms);
    }

    fn pipeline(&self, key: TargetKey) -> wgpu::RenderPipeline {
        if let Some(pipeline) = self.pipelines.borrow().get(&key) {
            return pipeline.clone();
        }
        tracing::debug!(program = %self.label, ?key, "building render pipeline");
        let pipeline = self
            .device
            .create_render_pipeline(&wgpu::RenderPipelineDescriptor {
                label: Some(&self.label),
                layout: Some(&self.layout),
                vertex: wgpu::VertexState {
                    module: &self.module,
                    entry_point: Some("vs_main"),
                    buffers: &[GpuVertex::layout()],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                },
                primitive: wgpu::PrimitiveState {
                    topology: wgpu::PrimitiveTopology::TriangleList,
                    strip_index_format: None,
                    front_face: wgpu::FrontFace::Ccw,
                    cull_mode: None,
                    polygon_mode: wgpu::PolygonMode::Fill,
                    unclipped_depth: false,
                    conservative: false,
                },
                depth_stencil: depth_stencil_for(key),
                multisample: wgpu::MultisampleState::default(),
                fragment: Some(wgpu::FragmentState {
                    module: &self.module,
                    entry_point: Some("fs_main"),
                    targets: &[Some(wgpu::ColorTargetState {
                        format: key.color_format,
                        blend: None,
                        write_mask: wgpu::ColorWrites::ALL,
                    })],
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                }),
                multiview: None,
                cache: None,
            });
        self.pipelines.borrow_mut().insert(key, pipeline.clone());
        pipeline
    }

    fn texture_bind_group(&self, device: &WgpuDevice) -> wgpu::BindGroup {
        let (scene_view, scene_sampler) = device.sampled(self.scene_unit.get());
        let (ink_view, ink_sampler) = device.sampled(self.ink_unit.get());
        self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("program textures"),
            layout: &self.texture_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&scene_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&scene_sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&ink_view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&ink_sampler),
                },
            ],
        })
    }
}

impl ShaderProgram<WgpuDevice> for WgpuProgram {
    fn set_model_matrix(&self, model: &Mat4) {
        self.update(|u| u.model = model.to_cols_array_2d());
    }

    fn set_view_proj_matrix(&self, view_proj: &Mat4) {
        self.update(|u| u.view_proj = view_proj.to_cols_array_2d());
    }

    fn set_time(&self, time: f32) {
        self.update(|u| u.time = time);
    }

    fn set_geometry_color1(&self, value: Vec4) {
        self.update(|u| u.color1 = color(value));
    }

    fn draw(&self, device: &mut WgpuDevice, mesh: &GpuMesh) -> Result<(), DeviceError> {
        if mesh.index_count == 0 {
            return Ok(());
        }
        let pipeline = self.pipeline(device.target_key()?);
        let textures = self.texture_bind_group(device);
        self.queue.write_buffer(
            &self.uniform_buffer,
            0,
            bytemuck::bytes_of(&self.uniforms.get()),
        );
        device.encode_pass(&self.label, None, false, |pass| {
            pass.set_pipeline(&pipeline);
            pass.set_bind_group(0, &self.uniform_bind_group, &[]);
            pass.set_bind_group(1, &textures, &[]);
            pass.set_vertex_buffer(0, mesh.vertex_buffer.slice(..));
            pass.set_index_buffer(mesh.index_buffer.slice(..), wgpu::IndexFormat::Uint32);
            pass.draw_indexed(0..mesh.index_count, 0, 0..1);
        })
    }
}

impl SecondaryColor for WgpuProgram {
    fn set_geometry_color2(&self, value: Vec4) {
        self.update(|u| u.color2 = color(value));
    }
}

impl SceneWave for WgpuProgram {
    fn set_freq(&self, freq: f32) {
        self.update(|u| u.freq = freq);
    }

    fn set_layer_num(&self, layers: i32) {
        self.update(|u| u.layer_num = layers);
    }
}

impl SplashUniforms for WgpuProgram {
    fn set_geometry_splash_color(&self, value: Vec4) {
        self.update(|u| u.splash_color = color(value));
    }

    fn set_splash_count(&self, count: f32) {
        self.update(|u| u.splash_count = count);
    }

    fn set_splash_scale_var(&self, variance: f32) {
        self.update(|u| u.splash_scale_var = variance);
    }
}

impl ResolutionUniform for WgpuProgram {
    fn set_resolution(&self, width: f32, height: f32) {
        self.update(|u| u.resolution = [width, height]);
    }
}

impl SceneSampler for WgpuProgram {
    fn set_scene_texture(&self, unit: u32) {
        self.scene_unit.set(Some(unit));
    }
}

impl InkSampler for WgpuProgram {
    fn set_ink_texture(&self, unit: u32) {
        self.ink_unit.set(Some(unit));
    }
}

fn texture_layout_entries() -> Vec<wgpu::BindGroupLayoutEntry> {
    let mut entries = Vec::with_capacity(4);
    for index in 0..2u32 {
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
            },
            count: None,
        });
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: index * 2 + 1,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
            count: None,
        });
    }
    entries
}

fn depth_stencil_for(key: TargetKey) -> Option<wgpu::DepthStencilState> {
    let (depth_write_enabled, depth_compare) = match key.depth {
        DepthMode::None => return None,
        DepthMode::Test => (true, wgpu::CompareFunction::Less),
        DepthMode::Ignore => (false, wgpu::CompareFunction::Always),
    };
    Some(wgpu::DepthStencilState {
        format: DEPTH_FORMAT,
        depth_write_enabled,
        depth_compare,
        stencil: wgpu::StencilState::default(),
        bias: wgpu::DepthBiasState::default(),
    })
}
