//! wgpu backend. Built with the `gpu` feature.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};
use wgpu::util::DeviceExt;
use wgpu::{
    Adapter, Device, Extent3d, Instance, Queue, Texture, TextureDescriptor, TextureFormat,
    TextureUsages,
};

use reelkit_core::frame::{FrameBuffer, PixelFormat};
use reelkit_core::{ReelkitError, ReelkitResult, TransitionKind};

use crate::backend::{GraphicsBackend, ProgramId, TextureId};
use crate::params::FrameUniforms;
use crate::shaders;

const TARGET_FORMAT: TextureFormat = TextureFormat::Rgba8Unorm;

/// A shared context for all GPU work.
pub struct GpuContext {
    pub instance: Instance,
    pub adapter: Adapter,
    pub device: Device,
    pub queue: Queue,
}

impl GpuContext {
    /// Initializes wgpu headless, picking the best available backend.
    pub fn init() -> ReelkitResult<Self> {
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        }))
        .ok_or_else(|| ReelkitError::Other("no suitable wgpu adapter".to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(
            &wgpu::DeviceDescriptor {
                label: Some("reelkit headless device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
            },
            None,
        ))
        .map_err(|e| ReelkitError::Other(format!("wgpu device request failed: {}", e)))?;

        info!(adapter = ?adapter.get_info().name, "gpu context ready");
        Ok(Self {
            instance,
            adapter,
            device,
            queue,
        })
    }
}

#[derive(Hash, Eq, PartialEq, Clone, Copy)]
struct TargetKey {
    width: u32,
    height: u32,
}

/// Render targets recycled between frames of the same size.
#[derive(Default)]
struct TargetPool {
    free: HashMap<TargetKey, Vec<Texture>>,
}

impl TargetPool {
    fn acquire(&mut self, device: &Device, width: u32, height: u32) -> Texture {
        let key = TargetKey { width, height };
        if let Some(texture) = self.free.get_mut(&key).and_then(Vec::pop) {
            return texture;
        }
        device.create_texture(&TextureDescriptor {
            label: Some("transition_target"),
            size: Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: TextureUsages::RENDER_ATTACHMENT | TextureUsages::COPY_SRC,
            view_formats: &[],
        })
    }

    fn release(&mut self, texture: Texture, width: u32, height: u32) {
        self.free
            .entry(TargetKey { width, height })
            .or_default()
            .push(texture);
    }

    #[cfg(test)]
    fn pooled(&self) -> usize {
        self.free.values().map(Vec::len).sum()
    }
}

struct SourceTexture {
    texture: Texture,
    view: wgpu::TextureView,
    width: u32,
    height: u32,
}

pub struct GpuBackend {
    gpu: Arc<GpuContext>,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    sampler: wgpu::Sampler,
    next_id: u64,
    textures: HashMap<TextureId, SourceTexture>,
    programs: HashMap<ProgramId, wgpu::RenderPipeline>,
    targets: TargetPool,
}

impl GpuBackend {
    pub fn new(gpu: Arc<GpuContext>) -> Self {
        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("transition_bind_group_layout"),
            entries: &[
                texture_entry(0),
                texture_entry(1),
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("transition_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let sampler = gpu.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("transition_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        Self {
            gpu,
            bind_group_layout,
            pipeline_layout,
            sampler,
            next_id: 0,
            textures: HashMap::new(),
            programs: HashMap::new(),
            targets: TargetPool::default(),
        }
    }

    /// Initialize a context and wrap it.
    pub fn init() -> ReelkitResult<Self> {
        Ok(Self::new(Arc::new(GpuContext::init()?)))
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn create_source(&self, frame: &FrameBuffer) -> SourceTexture {
        let frame = frame.to_rgba8();
        let size = Extent3d {
            width: frame.width.max(1),
            height: frame.height.max(1),
            depth_or_array_layers: 1,
        };
        let texture = self.gpu.device.create_texture(&TextureDescriptor {
            label: Some("transition_source"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: TARGET_FORMAT,
            usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let source = SourceTexture {
            view: texture.create_view(&wgpu::TextureViewDescriptor::default()),
            texture,
            width: frame.width,
            height: frame.height,
        };
        self.write_source(&source, &frame);
        source
    }

    fn write_source(&self, source: &SourceTexture, frame: &FrameBuffer) {
        if frame.is_empty() {
            return;
        }
        self.gpu.queue.write_texture(
            wgpu::ImageCopyTexture {
                texture: &source.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &frame.data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(frame.width * 4),
                rows_per_image: Some(frame.height),
            },
            Extent3d {
                width: frame.width,
                height: frame.height,
                depth_or_array_layers: 1,
            },
        );
    }

    fn source(&self, id: TextureId) -> ReelkitResult<&SourceTexture> {
        self.textures
            .get(&id)
            .ok_or_else(|| ReelkitError::InvalidArgument(format!("unknown texture {}", id.0)))
    }

    fn read_back(
        &self,
        target: &Texture,
        width: u32,
        height: u32,
        mut encoder: wgpu::CommandEncoder,
    ) -> ReelkitResult<FrameBuffer> {
        let padded_bytes_per_row = (width * 4 + 255) & !255;
        let readback = self.gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("transition_readback"),
            size: (padded_bytes_per_row * height) as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: target,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded_bytes_per_row),
                    rows_per_image: Some(height),
                },
            },
            Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.gpu.queue.submit(Some(encoder.finish()));

        let slice = readback.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            let _ = tx.send(v);
        });
        self.gpu.device.poll(wgpu::Maintain::Wait);

        match rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(ReelkitError::Other(format!("readback map failed: {}", e))),
            Err(_) => return Err(ReelkitError::Other("readback callback dropped".to_string())),
        }

        let mut frame = FrameBuffer::new(width, height, PixelFormat::Rgba8);
        {
            let data = slice.get_mapped_range();
            let row_bytes = (width * 4) as usize;
            for (y, dst) in frame.data.chunks_exact_mut(row_bytes).enumerate() {
                let start = y * padded_bytes_per_row as usize;
                dst.copy_from_slice(&data[start..start + row_bytes]);
            }
        }
        readback.unmap();
        Ok(frame)
    }
}

impl GraphicsBackend for GpuBackend {
    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn build_program(&mut self, kind: TransitionKind) -> ReelkitResult<ProgramId> {
        let label = shaders::program_label(kind);
        let device = &self.gpu.device;
        device.push_error_scope(wgpu::ErrorFilter::Validation);

        let module = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(&label),
            source: wgpu::ShaderSource::Wgsl(shaders::program_source(kind).into()),
        });
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some(&label),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: shaders::VERTEX_ENTRY,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: shaders::FRAGMENT_ENTRY,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: TARGET_FORMAT,
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: None,
            multisample: wgpu::MultisampleState::default(),
            multiview: None,
        });

        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(ReelkitError::shader_build(label, err.to_string()));
        }

        let id = ProgramId(self.next());
        self.programs.insert(id, pipeline);
        debug!(program = id.0, %kind, "built gpu program");
        Ok(id)
    }

    fn release_program(&mut self, program: ProgramId) {
        self.programs.remove(&program);
    }

    fn upload_texture(&mut self, frame: &FrameBuffer) -> ReelkitResult<TextureId> {
        let source = self.create_source(frame);
        let id = TextureId(self.next());
        self.textures.insert(id, source);
        Ok(id)
    }

    fn update_texture(&mut self, texture: TextureId, frame: &FrameBuffer) -> ReelkitResult<()> {
        let current = self.source(texture)?;
        if current.width == frame.width && current.height == frame.height {
            let frame = frame.to_rgba8();
            self.write_source(current, &frame);
        } else {
            let replacement = self.create_source(frame);
            if let Some(old) = self.textures.insert(texture, replacement) {
                old.texture.destroy();
            }
        }
        Ok(())
    }

    fn release_texture(&mut self, texture: TextureId) {
        if let Some(source) = self.textures.remove(&texture) {
            source.texture.destroy();
        }
    }

    fn draw(
        &mut self,
        program: ProgramId,
        a: TextureId,
        b: TextureId,
        uniforms: &FrameUniforms,
        width: u32,
        height: u32,
    ) -> ReelkitResult<FrameBuffer> {
        if width == 0 || height == 0 {
            return Ok(FrameBuffer::new(width, height, PixelFormat::Rgba8));
        }
        let pipeline = self
            .programs
            .get(&program)
            .ok_or_else(|| ReelkitError::InvalidArgument(format!("unknown program {}", program.0)))?;
        let (view_a, view_b) = (&self.source(a)?.view, &self.source(b)?.view);

        let uniform_buffer = self.gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("transition_uniforms"),
            contents: bytemuck::cast_slice(std::slice::from_ref(uniforms)),
            usage: wgpu::BufferUsages::UNIFORM,
        });
        let bind_group = self.gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("transition_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(view_a),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(view_b),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: uniform_buffer.as_entire_binding(),
                },
            ],
        });

        // after the lookups: an early return must not strand a pooled target
        let target = self.targets.acquire(&self.gpu.device, width, height);
        let target_view = target.create_view(&wgpu::TextureViewDescriptor::default());
        let mut encoder = self
            .gpu
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("transition_encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("transition_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &target_view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color::BLACK),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(pipeline);
            pass.set_bind_group(0, &bind_group, &[]);
            pass.draw(0..3, 0..1);
        }

        let frame = self.read_back(&target, width, height, encoder);
        self.targets.release(target, width, height);
        frame
    }

    fn live_textures(&self) -> usize {
        self.textures.len()
    }

    fn live_programs(&self) -> usize {
        self.programs.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reelkit_core::Color;

    #[test]
    fn test_every_program_validates() {
        // machines without an adapter skip
        let Ok(mut backend) = GpuBackend::init() else {
            return;
        };
        for kind in TransitionKind::ALL {
            let id = backend
                .build_program(kind)
                .unwrap_or_else(|e| panic!("{kind}: {e}"));
            backend.release_program(id);
        }
        assert_eq!(backend.live_programs(), 0);
    }

    #[test]
    fn test_cut_matches_source() {
        let Ok(mut backend) = GpuBackend::init() else {
            return;
        };
        let a = backend
            .upload_texture(&FrameBuffer::solid(4, 4, &Color::rgb(1.0, 0.0, 0.0)))
            .unwrap();
        let b = backend
            .upload_texture(&FrameBuffer::solid(4, 4, &Color::rgb(0.0, 0.0, 1.0)))
            .unwrap();
        let program = backend.build_program(TransitionKind::Cut).unwrap();
        let uniforms = FrameUniforms {
            progress: 0.25,
            zoom_a: 1.0,
            zoom_b: 1.0,
            _pad: 0.0,
            focal_a: [0.5, 0.5],
            focal_b: [0.5, 0.5],
        };
        let out = backend.draw(program, a, b, &uniforms, 8, 8).unwrap();
        assert_eq!(out.get_pixel(3, 3), Some([255, 0, 0, 255]));
    }

    #[test]
    fn test_unknown_program_keeps_target_pooled() {
        let Ok(mut backend) = GpuBackend::init() else {
            return;
        };
        let a = backend.upload_texture(&FrameBuffer::checkerboard(4, 4, 2)).unwrap();
        let program = backend.build_program(TransitionKind::Fade).unwrap();
        let uniforms = FrameUniforms {
            progress: 0.5,
            zoom_a: 1.0,
            zoom_b: 1.0,
            _pad: 0.0,
            focal_a: [0.5, 0.5],
            focal_b: [0.5, 0.5],
        };
        backend.draw(program, a, a, &uniforms, 8, 8).unwrap();
        assert_eq!(backend.targets.pooled(), 1);

        backend.release_program(program);
        assert!(backend.draw(program, a, a, &uniforms, 8, 8).is_err());
        assert!(backend.draw(ProgramId(u64::MAX), a, a, &uniforms, 8, 8).is_err());
        assert_eq!(backend.targets.pooled(), 1);
    }
}
