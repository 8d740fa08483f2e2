//! Headless wgpu implementation of [`RenderBackend`].
//!
//! Renders into an offscreen RGBA target that can be read back with
//! [`WgpuBackend::snapshot`]. Validation errors are captured with error scopes
//! and reported at the end of each frame.

use std::borrow::Cow;

use image::RgbaImage;
use ndarray::Array3;
use thiserror::Error;
use tracing::{debug, info};
use wgpu::{PollType, util::DeviceExt};

use crate::camera::Viewport;
use crate::clip_geometry::ClipGeometry;
use crate::config::ViewerConfig;
use crate::enums::{Channel, Dimensionality, ViewMode};
use crate::plane_cache::{RowRegion, TextureExtent, TextureSink};
use crate::render_loop::{FrameUniforms, GraphicsDiagnostic, RenderBackend};
use crate::texture_mirror::{TextureMirror, mip_level_count};

const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
const CHANNEL_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R16Unorm;

#[derive(Debug, Error)]
pub enum GpuError {
    #[error("no suitable graphics adapter")]
    Adapter(#[from] wgpu::RequestAdapterError),
    #[error("could not create graphics device")]
    Device(#[from] wgpu::RequestDeviceError),
    #[error("adapter lacks required features: {0:?}")]
    MissingFeatures(wgpu::Features),
    #[error("readback failed")]
    Readback(#[from] wgpu::BufferAsyncError),
    #[error("readback was cancelled")]
    ReadbackCancelled,
    #[error("snapshot of {width}x{height} does not fit its buffer")]
    Snapshot { width: u32, height: u32 },
}

/// Device and queue handed to the backend.
pub struct Gpu {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
}

impl Gpu {
    /// Create a headless device able to sample 16-bit normalized textures.
    pub async fn headless() -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await?;

        let required = wgpu::Features::TEXTURE_FORMAT_16BIT_NORM;
        let missing = required.difference(adapter.features());
        if !missing.is_empty() {
            return Err(GpuError::MissingFeatures(missing));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("plane-stream device"),
                required_features: required,
                ..Default::default()
            })
            .await?;
        info!(adapter = ?adapter.get_info().name, "graphics device ready");
        Ok(Self { device, queue })
    }
}

struct ChannelTexture {
    texture: wgpu::Texture,
    view: wgpu::TextureView,
    mirror: TextureMirror,
}

struct GeometryBuffers {
    positions: wgpu::Buffer,
    tex_coords: wgpu::Buffer,
    indices: wgpu::Buffer,
}

struct RenderTarget {
    size: wgpu::Extent3d,
    color: wgpu::Texture,
    color_view: wgpu::TextureView,
    depth_view: Option<wgpu::TextureView>,
}

pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    mode: ViewMode,
    mipmaps: bool,
    clear_color: wgpu::Color,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    uniform_buffer: wgpu::Buffer,
    channels: [Option<ChannelTexture>; 2],
    bind_group: Option<wgpu::BindGroup>,
    geometry: Option<GeometryBuffers>,
    target: RenderTarget,
    scope_open: bool,
    pending: Vec<GraphicsDiagnostic>,
}

impl WgpuBackend {
    pub fn new(gpu: Gpu, config: &ViewerConfig) -> Self {
        let Gpu { device, queue } = gpu;
        let mode = config.mode;
        let (view_dimension, shader_source, vertex_format) = match mode.dimensionality() {
            Dimensionality::Three => (
                wgpu::TextureViewDimension::D3,
                include_str!("shaders/volume.wgsl"),
                wgpu::VertexFormat::Float32x3,
            ),
            Dimensionality::Two => (
                wgpu::TextureViewDimension::D2,
                include_str!("shaders/slice.wgsl"),
                wgpu::VertexFormat::Float32x2,
            ),
        };

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("Channel Sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            mipmap_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("Channel Shader"),
            source: wgpu::ShaderSource::Wgsl(Cow::Borrowed(shader_source)),
        });

        let texture_entry = |binding| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: true },
                view_dimension,
                multisampled: false,
            },
            count: None,
        };
        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Channel Bind Group Layout"),
            entries: &[
                // Uniforms
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                texture_entry(1),
                texture_entry(2),
                wgpu::BindGroupLayoutEntry {
                    binding: 3,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Channel Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let stride = (mode.dimensionality().components() * std::mem::size_of::<f32>()) as u64;
        let position_attributes = [wgpu::VertexAttribute {
            format: vertex_format,
            offset: 0,
            shader_location: 0,
        }];
        let tex_coord_attributes = [wgpu::VertexAttribute {
            format: vertex_format,
            offset: 0,
            shader_location: 1,
        }];

        // Only the 3D box needs depth testing.
        let depth_stencil = (mode == ViewMode::Volume).then(|| wgpu::DepthStencilState {
            format: DEPTH_FORMAT,
            depth_write_enabled: true,
            depth_compare: wgpu::CompareFunction::Less,
            stencil: wgpu::StencilState::default(),
            bias: wgpu::DepthBiasState::default(),
        });

        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("Channel Pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[
                    wgpu::VertexBufferLayout {
                        array_stride: stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &position_attributes,
                    },
                    wgpu::VertexBufferLayout {
                        array_stride: stride,
                        step_mode: wgpu::VertexStepMode::Vertex,
                        attributes: &tex_coord_attributes,
                    },
                ],
            },
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState::default(),
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: COLOR_FORMAT,
                    blend: Some(wgpu::BlendState::ALPHA_BLENDING),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            multiview: None,
            cache: None,
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Uniform Buffer"),
            size: std::mem::size_of::<FrameUniforms>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let target = Self::create_target(&device, mode, config.viewport);

        Self {
            device,
            queue,
            mode,
            mipmaps: config.mipmaps,
            clear_color: config.clear_color(),
            pipeline,
            bind_group_layout,
            sampler,
            uniform_buffer,
            channels: [None, None],
            bind_group: None,
            geometry: None,
            target,
            scope_open: false,
            pending: Vec::new(),
        }
    }

    fn create_target(device: &wgpu::Device, mode: ViewMode, viewport: Viewport) -> RenderTarget {
        let size = wgpu::Extent3d {
            width: viewport.width.max(1),
            height: viewport.height.max(1),
            depth_or_array_layers: 1,
        };
        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("Color Target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: COLOR_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let color_view = color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = (mode == ViewMode::Volume).then(|| {
            device
                .create_texture(&wgpu::TextureDescriptor {
                    label: Some("Depth Target"),
                    size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: DEPTH_FORMAT,
                    usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                    view_formats: &[],
                })
                .create_view(&wgpu::TextureViewDescriptor::default())
        });
        RenderTarget {
            size,
            color,
            color_view,
            depth_view,
        }
    }

    /// Open an error scope for the current frame if none is open.
    fn open_scope(&mut self) {
        if !self.scope_open {
            self.device.push_error_scope(wgpu::ErrorFilter::Validation);
            self.scope_open = true;
        }
    }

    fn report(&mut self, checkpoint: &'static str, message: impl Into<String>) {
        self.pending.push(GraphicsDiagnostic {
            checkpoint,
            message: message.into(),
        });
    }

    fn upload_level(&self, texture: &wgpu::Texture, mip_level: u32, level: &Array3<u16>) -> bool {
        let Some(texels) = level.as_slice() else {
            return false;
        };
        let (depth, height, width) = level.dim();
        let (depth, height, width) = (depth as u32, height as u32, width as u32);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfoBase {
                texture,
                mip_level,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(texels),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(width * std::mem::size_of::<u16>() as u32),
                rows_per_image: Some(height),
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: depth,
            },
        );
        true
    }

    fn ensure_bind_group(&mut self) -> bool {
        if self.bind_group.is_some() {
            return true;
        }
        let [Some(r), Some(g)] = &self.channels else {
            return false;
        };
        self.bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("Channel Bind Group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::TextureView(&r.view),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: wgpu::BindingResource::TextureView(&g.view),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        }));
        true
    }

    /// Read the last rendered frame back from the GPU.
    pub async fn snapshot(&self) -> Result<RgbaImage, GpuError> {
        let wgpu::Extent3d { width, height, .. } = self.target.size;
        let unpadded = width * 4;
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = unpadded.div_ceil(align) * align;

        let staging_buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Snapshot Buffer"),
            size: u64::from(padded) * u64::from(height),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Snapshot Encoder"),
            });
        encoder.copy_texture_to_buffer(
            wgpu::TexelCopyTextureInfoBase {
                texture: &self.target.color,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyBufferInfoBase {
                buffer: &staging_buffer,
                layout: wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(height),
                },
            },
            self.target.size,
        );
        self.queue.submit(Some(encoder.finish()));

        let buffer_slice = staging_buffer.slice(..);
        let (sender, receiver) = futures::channel::oneshot::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = sender.send(result);
        });
        let _ = self.device.poll(PollType::Wait {
            submission_index: None,
            timeout: None,
        });
        receiver.await.map_err(|_| GpuError::ReadbackCancelled)??;

        let data = buffer_slice.get_mapped_range();
        let pixels: Vec<u8> = data
            .chunks_exact(padded as usize)
            .flat_map(|row| &row[..unpadded as usize])
            .copied()
            .collect();
        drop(data);
        staging_buffer.unmap();

        RgbaImage::from_raw(width, height, pixels).ok_or(GpuError::Snapshot { width, height })
    }
}

impl TextureSink for WgpuBackend {
    fn allocate(&mut self, channel: Channel, extent: TextureExtent) {
        self.open_scope();
        let dimension = match self.mode.dimensionality() {
            Dimensionality::Three => wgpu::TextureDimension::D3,
            Dimensionality::Two => wgpu::TextureDimension::D2,
        };
        let mip_level_count = if self.mipmaps {
            mip_level_count(extent)
        } else {
            1
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(match channel {
                Channel::R => "Channel R",
                Channel::G => "Channel G",
            }),
            size: wgpu::Extent3d {
                width: extent.width,
                height: extent.height,
                depth_or_array_layers: extent.depth,
            },
            mip_level_count,
            sample_count: 1,
            dimension,
            format: CHANNEL_FORMAT,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        info!(?channel, ?extent, mip_level_count, "allocated channel texture");

        self.channels[channel.index()] = Some(ChannelTexture {
            texture,
            view,
            mirror: TextureMirror::new(extent),
        });
        self.bind_group = None;
    }

    fn write_rows(&mut self, channel: Channel, region: RowRegion, texels: &[u16]) {
        self.open_scope();
        let Some(slot) = self.channels[channel.index()].as_mut() else {
            self.report("write_rows", format!("{channel:?} texture not allocated"));
            return;
        };
        let needed = region.width as usize * region.rows as usize;
        if texels.len() < needed {
            self.report(
                "write_rows",
                format!("strip holds {} texels, region needs {needed}", texels.len()),
            );
            return;
        }

        slot.mirror.write_rows(region, texels);
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfoBase {
                texture: &slot.texture,
                mip_level: 0,
                origin: wgpu::Origin3d {
                    x: 0,
                    y: region.y,
                    z: region.z,
                },
                aspect: wgpu::TextureAspect::All,
            },
            bytemuck::cast_slice(&texels[..needed]),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(region.width * std::mem::size_of::<u16>() as u32),
                rows_per_image: Some(region.rows),
            },
            wgpu::Extent3d {
                width: region.width,
                height: region.rows,
                depth_or_array_layers: 1,
            },
        );
    }

    fn generate_mipmaps(&mut self, channel: Channel) {
        if !self.mipmaps {
            return;
        }
        self.open_scope();
        let Some(mut slot) = self.channels[channel.index()].take() else {
            return;
        };
        slot.mirror.rebuild_mips();
        let levels = slot.texture.mip_level_count().saturating_sub(1) as usize;
        let mut uploaded = 0;
        for (level, mip) in slot.mirror.mips().iter().take(levels).zip(1u32..) {
            if self.upload_level(&slot.texture, mip, level) {
                uploaded += 1;
            }
        }
        if uploaded < levels {
            self.report(
                "generate_mipmaps",
                format!("{channel:?}: {uploaded}/{levels} levels uploaded"),
            );
        }
        debug!(?channel, levels, "mip chain regenerated");
        self.channels[channel.index()] = Some(slot);
    }
}

impl RenderBackend for WgpuBackend {
    fn resize(&mut self, viewport: Viewport) {
        self.open_scope();
        self.target = Self::create_target(&self.device, self.mode, viewport);
        debug!(width = viewport.width, height = viewport.height, "render target resized");
    }

    fn upload_geometry(&mut self, geometry: &ClipGeometry) {
        self.open_scope();
        let positions: &[u8] = bytemuck::cast_slice(&geometry.positions);
        let tex_coords: &[u8] = bytemuck::cast_slice(&geometry.tex_coords);
        let indices: &[u8] = bytemuck::cast_slice(geometry.indices);

        if let Some(buffers) = &self.geometry
            && buffers.positions.size() == positions.len() as u64
            && buffers.indices.size() == indices.len() as u64
        {
            self.queue.write_buffer(&buffers.positions, 0, positions);
            self.queue.write_buffer(&buffers.tex_coords, 0, tex_coords);
            return;
        }

        let vertex_buffer = |label: &'static str, contents: &[u8]| {
            self.device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
                })
        };
        let buffers = GeometryBuffers {
            positions: vertex_buffer("Position Buffer", positions),
            tex_coords: vertex_buffer("Texture Coordinate Buffer", tex_coords),
            indices: self
                .device
                .create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some("Index Buffer"),
                    contents: indices,
                    usage: wgpu::BufferUsages::INDEX,
                }),
        };
        self.geometry = Some(buffers);
    }

    fn draw(&mut self, uniforms: &FrameUniforms, index_count: u32) {
        self.open_scope();
        if !self.ensure_bind_group() {
            self.report("draw", "channel textures not allocated");
            return;
        }
        let (Some(bind_group), Some(geometry)) = (&self.bind_group, &self.geometry) else {
            self.report("draw", "no geometry uploaded");
            return;
        };

        self.queue
            .write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(uniforms));

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Frame Encoder"),
            });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Frame Pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &self.target.color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(self.clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: self.target.depth_view.as_ref().map(|view| {
                    wgpu::RenderPassDepthStencilAttachment {
                        view,
                        depth_ops: Some(wgpu::Operations {
                            load: wgpu::LoadOp::Clear(1.0),
                            store: wgpu::StoreOp::Discard,
                        }),
                        stencil_ops: None,
                    }
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, bind_group, &[]);
            pass.set_vertex_buffer(0, geometry.positions.slice(..));
            pass.set_vertex_buffer(1, geometry.tex_coords.slice(..));
            pass.set_index_buffer(geometry.indices.slice(..), wgpu::IndexFormat::Uint16);
            pass.draw_indexed(0..index_count, 0, 0..1);
        }
        self.queue.submit(Some(encoder.finish()));
    }

    fn end_frame(&mut self) -> Vec<GraphicsDiagnostic> {
        if self.scope_open {
            self.scope_open = false;
            if let Some(err) = futures::executor::block_on(self.device.pop_error_scope()) {
                self.report("end_frame", err.to_string());
            }
        }
        std::mem::take(&mut self.pending)
    }
}
