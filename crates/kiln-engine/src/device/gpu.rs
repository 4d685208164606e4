use std::collections::HashMap;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use glam::UVec2;
use wgpu::util::DeviceExt;
use wgpu::SurfaceError;
use winit::window::Window;

use crate::coords::{Color, PixelRect};

use super::contract::{
    BlendMode, BufferHandle, Device, DeviceError, DeviceInfo, DeviceParams, DeviceStats, DrawCall,
    FrameStatus, Geometry, MipLevel, PipelineState, SamplerState, TextureHandle, Topology,
};
use super::uniforms::{GpuVertex, SceneUniforms};

const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

const UNIFORM_SIZE: NonZeroU64 = match NonZeroU64::new(std::mem::size_of::<SceneUniforms>() as u64) {
    Some(size) => size,
    None => panic!("SceneUniforms must not be zero-sized"),
};

/// Initialization parameters for [`WgpuDevice`].
#[derive(Debug, Clone)]
pub struct WgpuDeviceConfig {
    /// Backends the instance may pick from. The OpenGL video API restricts
    /// this to [`wgpu::Backends::GL`].
    pub backends: wgpu::Backends,

    pub power_preference: wgpu::PowerPreference,

    /// Prefer an sRGB surface format when available.
    pub prefer_srgb: bool,

    /// If provided but unsupported on the current surface, a supported mode is selected.
    pub alpha_mode: Option<wgpu::CompositeAlphaMode>,

    pub required_limits: wgpu::Limits,

    /// This value is a hint; support depends on platform/backend.
    pub desired_maximum_frame_latency: u32,
}

impl Default for WgpuDeviceConfig {
    fn default() -> Self {
        Self {
            backends: wgpu::Backends::all(),
            power_preference: wgpu::PowerPreference::HighPerformance,
            prefer_srgb: true,
            alpha_mode: None,
            required_limits: wgpu::Limits::default(),
            desired_maximum_frame_latency: 2,
        }
    }
}

/// [`Device`] backed by wgpu, presenting to a window surface.
///
/// The instance and surface live as long as the window. Each session
/// (`open` .. `close`) owns its own adapter, logical device and every
/// resource created on it, so closing a session is a full device teardown.
///
/// Draws are recorded during the frame and encoded into a single render pass
/// at [`end_frame`](Device::end_frame).
pub struct WgpuDevice {
    config: WgpuDeviceConfig,
    instance: wgpu::Instance,
    surface: wgpu::Surface<'static>,
    session: Option<Session>,
    frame: Option<Frame>,
    next_handle: u64,
    stats: DeviceStats,
}

struct UniformRing {
    buffer: wgpu::Buffer,
    bind_group: wgpu::BindGroup,
    slots: usize,
}

struct VertexRing {
    buffer: wgpu::Buffer,
    capacity: usize,
}

struct GpuTexture {
    _texture: wgpu::Texture,
    view: wgpu::TextureView,
}

struct GpuBuffer {
    buffer: wgpu::Buffer,
    len: u32,
}

type PipelineKey = (Topology, PipelineState);

struct Session {
    device: wgpu::Device,
    queue: wgpu::Queue,
    surface_config: wgpu::SurfaceConfiguration,
    texture_format: wgpu::TextureFormat,
    sample_count: u32,
    uniform_stride: usize,
    lost: Arc<AtomicBool>,

    depth_view: wgpu::TextureView,
    msaa_view: Option<wgpu::TextureView>,

    shader: wgpu::ShaderModule,
    uniform_bgl: wgpu::BindGroupLayout,
    texture_bgl: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    pipelines: HashMap<PipelineKey, wgpu::RenderPipeline>,

    uniform_ring: Option<UniformRing>,
    immediate: Option<VertexRing>,

    textures: HashMap<u64, GpuTexture>,
    buffers: HashMap<u64, GpuBuffer>,
    samplers: HashMap<SamplerState, wgpu::Sampler>,
    bind_groups: HashMap<(u64, SamplerState), wgpu::BindGroup>,
    white_bind_group: wgpu::BindGroup,
}

enum Source {
    Immediate { first: u32 },
    Buffer { handle: BufferHandle, first: u32 },
}

struct PendingDraw {
    source: Source,
    count: u32,
    topology: Topology,
    pipeline: PipelineState,
    texture: Option<(TextureHandle, SamplerState)>,
    viewport: PixelRect,
}

struct Frame {
    surface_texture: wgpu::SurfaceTexture,
    view: wgpu::TextureView,
    clear: Color,
    draws: Vec<PendingDraw>,
    uniforms: Vec<SceneUniforms>,
    immediate: Vec<GpuVertex>,
}

impl WgpuDevice {
    /// Creates the instance and the window surface. No GPU device is
    /// acquired until [`Device::open`].
    pub fn new(window: Arc<Window>, config: WgpuDeviceConfig) -> anyhow::Result<Self> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: config.backends,
            ..Default::default()
        });

        let surface = instance
            .create_surface(window)
            .context("failed to create wgpu surface")?;

        Ok(Self {
            config,
            instance,
            surface,
            session: None,
            frame: None,
            next_handle: 1,
            stats: DeviceStats::default(),
        })
    }

    /// Active surface format, while a session is open.
    pub fn surface_format(&self) -> Option<wgpu::TextureFormat> {
        self.session.as_ref().map(|s| s.surface_config.format)
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn refresh_counts(&mut self) {
        let (textures, buffers) = self
            .session
            .as_ref()
            .map_or((0, 0), |s| (s.textures.len(), s.buffers.len()));
        self.stats.live_textures = textures;
        self.stats.live_buffers = buffers;
    }
}

impl Device for WgpuDevice {
    fn open(&mut self, params: &DeviceParams) -> Result<DeviceInfo, DeviceError> {
        self.close();

        let adapter = pollster::block_on(self.instance.request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: self.config.power_preference,
            compatible_surface: Some(&self.surface),
            force_fallback_adapter: false,
        }))
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("kiln device"),
            required_features: wgpu::Features::empty(),
            required_limits: self.config.required_limits.clone(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::Performance,
            trace: wgpu::Trace::Off,
        }))
        .map_err(|e| DeviceError::Unavailable(e.to_string()))?;

        let caps = self.surface.get_capabilities(&adapter);
        let format = choose_surface_format(&caps, self.config.prefer_srgb)
            .ok_or_else(|| DeviceError::Unavailable("no supported surface formats".into()))?;

        let samples = params.sample_count.max(1);
        let color_ok = adapter
            .get_texture_format_features(format)
            .flags
            .sample_count_supported(samples);
        let depth_ok = adapter
            .get_texture_format_features(DEPTH_FORMAT)
            .flags
            .sample_count_supported(samples);
        if !(color_ok && depth_ok) {
            return Err(DeviceError::Unsupported(format!("{samples} samples per pixel")));
        }

        let alpha_mode = self
            .config
            .alpha_mode
            .filter(|m| caps.alpha_modes.contains(m))
            .unwrap_or_else(|| {
                caps.alpha_modes
                    .first()
                    .copied()
                    .unwrap_or(wgpu::CompositeAlphaMode::Auto)
            });

        let surface_config = wgpu::SurfaceConfiguration {
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            format,
            width: params.size.x.max(1),
            height: params.size.y.max(1),
            present_mode: if params.vsync {
                wgpu::PresentMode::Fifo
            } else {
                wgpu::PresentMode::AutoNoVsync
            },
            alpha_mode,
            view_formats: vec![],
            desired_maximum_frame_latency: self.config.desired_maximum_frame_latency,
        };
        self.surface.configure(&device, &surface_config);

        let lost = Arc::new(AtomicBool::new(false));
        {
            let lost = Arc::clone(&lost);
            device.set_device_lost_callback(move |reason, message| {
                log::error!("wgpu device lost ({reason:?}): {message}");
                lost.store(true, Ordering::Release);
            });
        }

        let info = DeviceInfo {
            name: adapter.get_info().name,
            max_texture_size: device.limits().max_texture_dimension_2d,
            max_anisotropy: 16,
        };

        self.session = Some(Session::new(device, queue, surface_config, samples, lost));
        self.stats.sessions_opened += 1;
        self.refresh_counts();
        log::info!(
            "wgpu: opened {} ({}x{}, {format:?}, {samples}x MSAA)",
            info.name,
            params.size.x,
            params.size.y
        );
        Ok(info)
    }

    fn close(&mut self) {
        self.frame = None;
        if self.session.take().is_some() {
            log::info!("wgpu: session closed");
        }
        self.refresh_counts();
    }

    fn is_open(&self) -> bool {
        self.session.is_some()
    }

    /// wgpu does not support configuring a surface with a 0x0 size; in that
    /// case configuration is deferred until a non-empty size arrives.
    fn resize(&mut self, size: UVec2) -> Result<(), DeviceError> {
        let session = self.session.as_mut().ok_or(DeviceError::NotOpen)?;
        if size.x == 0 || size.y == 0 {
            return Ok(());
        }
        session.surface_config.width = size.x;
        session.surface_config.height = size.y;
        self.surface.configure(&session.device, &session.surface_config);
        session.rebuild_attachments();
        Ok(())
    }

    fn create_texture(&mut self, label: &str, levels: &[MipLevel]) -> Result<TextureHandle, DeviceError> {
        let h = self.handle();
        let session = self.session.as_mut().ok_or(DeviceError::NotOpen)?;
        session.create_texture(h, label, levels)?;
        self.refresh_counts();
        Ok(TextureHandle(h))
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        if let Some(session) = self.session.as_mut() {
            session.textures.remove(&handle.0);
            session.bind_groups.retain(|(h, _), _| *h != handle.0);
        }
        self.refresh_counts();
    }

    fn create_buffer(&mut self, label: &str, vertices: &[GpuVertex]) -> Result<BufferHandle, DeviceError> {
        let h = self.handle();
        let session = self.session.as_mut().ok_or(DeviceError::NotOpen)?;
        if vertices.is_empty() {
            return Err(DeviceError::Unsupported("empty vertex buffer".into()));
        }
        let buffer = session.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some(label),
            contents: bytemuck::cast_slice(vertices),
            usage: wgpu::BufferUsages::VERTEX,
        });
        session.buffers.insert(
            h,
            GpuBuffer {
                buffer,
                len: vertices.len() as u32,
            },
        );
        self.refresh_counts();
        Ok(BufferHandle(h))
    }

    fn destroy_buffer(&mut self, handle: BufferHandle) {
        if let Some(session) = self.session.as_mut() {
            session.buffers.remove(&handle.0);
        }
        self.refresh_counts();
    }

    fn begin_frame(&mut self, clear: Color) -> FrameStatus {
        let Some(session) = self.session.as_ref() else {
            return FrameStatus::Lost;
        };
        if session.lost.load(Ordering::Acquire) {
            return FrameStatus::Lost;
        }
        if self.frame.take().is_some() {
            log::warn!("wgpu: previous frame was never ended; dropped");
        }

        let surface_texture = match self.surface.get_current_texture() {
            Ok(t) => t,
            Err(err) => return surface_error_status(err, &self.surface, session),
        };
        let view = surface_texture
            .texture
            .create_view(&wgpu::TextureViewDescriptor::default());

        self.frame = Some(Frame {
            surface_texture,
            view,
            clear,
            draws: Vec::new(),
            uniforms: Vec::new(),
            immediate: Vec::new(),
        });
        self.stats.frames += 1;
        FrameStatus::Ready
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        let Some(frame) = self.frame.as_mut() else {
            log::warn!("wgpu: draw outside of a frame ignored");
            return;
        };

        let source = match call.geometry {
            Geometry::Immediate(vertices) => {
                let first = frame.immediate.len() as u32;
                frame.immediate.extend_from_slice(vertices);
                Source::Immediate { first }
            }
            Geometry::Buffer { handle, first, .. } => Source::Buffer { handle, first },
        };

        frame.uniforms.push(call.uniforms);
        frame.draws.push(PendingDraw {
            source,
            count: call.geometry.vertex_count(),
            topology: call.topology,
            pipeline: call.pipeline,
            texture: call.texture,
            viewport: call.viewport,
        });
        self.stats.draw_calls += 1;
    }

    fn end_frame(&mut self) {
        let Some(frame) = self.frame.take() else {
            return;
        };
        let Some(session) = self.session.as_mut() else {
            return;
        };
        session.submit(frame);
    }

    fn stats(&self) -> DeviceStats {
        self.stats
    }
}

impl Session {
    fn new(
        device: wgpu::Device,
        queue: wgpu::Queue,
        surface_config: wgpu::SurfaceConfiguration,
        sample_count: u32,
        lost: Arc<AtomicBool>,
    ) -> Self {
        let texture_format = if surface_config.format.is_srgb() {
            wgpu::TextureFormat::Rgba8UnormSrgb
        } else {
            wgpu::TextureFormat::Rgba8Unorm
        };
        let align = device.limits().min_uniform_buffer_offset_alignment.max(1) as usize;
        let uniform_stride = UNIFORM_SIZE.get() as usize;
        let uniform_stride = uniform_stride.div_ceil(align) * align;

        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("kiln scene shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("shaders/scene.wgsl").into()),
        });

        let uniform_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kiln scene bgl"),
            entries: &[wgpu::BindGroupLayoutEntry {
                binding: 0,
                visibility: wgpu::ShaderStages::VERTEX_FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: true,
                    min_binding_size: Some(UNIFORM_SIZE),
                },
                count: None,
            }],
        });

        let texture_bgl = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("kiln texture bgl"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("kiln scene pipeline layout"),
            bind_group_layouts: &[&uniform_bgl, &texture_bgl],
            immediate_size: 0,
        });

        let (depth_view, msaa_view) = create_attachments(&device, &surface_config, sample_count);

        // Untextured draws bind a 1x1 white texel.
        let white = device.create_texture_with_data(
            &queue,
            &wgpu::TextureDescriptor {
                label: Some("kiln white texel"),
                size: wgpu::Extent3d {
                    width: 1,
                    height: 1,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: texture_format,
                usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            &[255, 255, 255, 255],
        );
        let white_view = white.create_view(&wgpu::TextureViewDescriptor::default());
        let white_sampler = create_sampler(&device, SamplerState::default());
        let white_bind_group = texture_bind_group(&device, &texture_bgl, &white_view, &white_sampler);

        Self {
            device,
            queue,
            surface_config,
            texture_format,
            sample_count,
            uniform_stride,
            lost,
            depth_view,
            msaa_view,
            shader,
            uniform_bgl,
            texture_bgl,
            pipeline_layout,
            pipelines: HashMap::new(),
            uniform_ring: None,
            immediate: None,
            textures: HashMap::new(),
            buffers: HashMap::new(),
            samplers: HashMap::new(),
            bind_groups: HashMap::new(),
            white_bind_group,
        }
    }

    fn rebuild_attachments(&mut self) {
        let (depth, msaa) = create_attachments(&self.device, &self.surface_config, self.sample_count);
        self.depth_view = depth;
        self.msaa_view = msaa;
    }

    fn create_texture(&mut self, id: u64, label: &str, levels: &[MipLevel]) -> Result<(), DeviceError> {
        let Some(base) = levels.first() else {
            return Err(DeviceError::Unsupported("texture without pixel data".into()));
        };
        let max = self.device.limits().max_texture_dimension_2d;
        if base.width == 0 || base.height == 0 || base.width.max(base.height) > max {
            return Err(DeviceError::Unsupported(format!(
                "{}x{} texture (limit {max})",
                base.width, base.height
            )));
        }
        for (i, level) in levels.iter().enumerate() {
            let expected = ((base.width >> i).max(1), (base.height >> i).max(1));
            if (level.width, level.height) != expected
                || level.rgba.len() != level.width as usize * level.height as usize * 4
            {
                return Err(DeviceError::Unsupported(format!("malformed mip level {i}")));
            }
        }

        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size: wgpu::Extent3d {
                width: base.width,
                height: base.height,
                depth_or_array_layers: 1,
            },
            mip_level_count: levels.len() as u32,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.texture_format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        for (i, level) in levels.iter().enumerate() {
            self.queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture: &texture,
                    mip_level: i as u32,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                &level.rgba,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(level.width * 4),
                    rows_per_image: Some(level.height),
                },
                wgpu::Extent3d {
                    width: level.width,
                    height: level.height,
                    depth_or_array_layers: 1,
                },
            );
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        self.textures.insert(
            id,
            GpuTexture {
                _texture: texture,
                view,
            },
        );
        Ok(())
    }

    // ── lazy-init helpers ──────────────────────────────────────────────────

    fn ensure_pipeline(&mut self, key: PipelineKey) {
        if self.pipelines.contains_key(&key) {
            return;
        }
        let (topology, state) = key;

        let pipeline = self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("kiln scene pipeline"),
            layout: Some(&self.pipeline_layout),
            vertex: wgpu::VertexState {
                module: &self.shader,
                entry_point: Some("vs_main"),
                compilation_options: Default::default(),
                buffers: &[GpuVertex::layout()],
            },
            fragment: Some(wgpu::FragmentState {
                module: &self.shader,
                entry_point: Some("fs_main"),
                compilation_options: Default::default(),
                targets: &[Some(wgpu::ColorTargetState {
                    format: self.surface_config.format,
                    blend: blend_state(state.blend),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
            }),
            primitive: wgpu::PrimitiveState {
                topology: match topology {
                    Topology::Points => wgpu::PrimitiveTopology::PointList,
                    Topology::Lines => wgpu::PrimitiveTopology::LineList,
                    Topology::Triangles => wgpu::PrimitiveTopology::TriangleList,
                },
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: state.cull_backfaces.then_some(wgpu::Face::Back),
                polygon_mode: wgpu::PolygonMode::Fill,
                unclipped_depth: false,
                conservative: false,
            },
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DEPTH_FORMAT,
                depth_write_enabled: state.depth_write,
                depth_compare: if state.depth_test {
                    wgpu::CompareFunction::LessEqual
                } else {
                    wgpu::CompareFunction::Always
                },
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: self.sample_count,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview_mask: None,
            cache: None,
        });

        log::debug!("wgpu: built pipeline for {topology:?} {state:?}");
        self.pipelines.insert(key, pipeline);
    }

    /// Returns `false` when the texture is unknown.
    fn ensure_texture_bind_group(&mut self, id: u64, sampler: SamplerState) -> bool {
        if self.bind_groups.contains_key(&(id, sampler)) {
            return true;
        }
        let Some(texture) = self.textures.get(&id) else {
            return false;
        };
        let device = &self.device;
        let sampler_obj = self
            .samplers
            .entry(sampler)
            .or_insert_with(|| create_sampler(device, sampler));
        let bind_group = texture_bind_group(device, &self.texture_bgl, &texture.view, sampler_obj);
        self.bind_groups.insert((id, sampler), bind_group);
        true
    }

    fn ensure_uniform_ring(&mut self, count: usize) {
        if self.uniform_ring.as_ref().is_some_and(|r| r.slots >= count) {
            return;
        }
        let slots = count.next_power_of_two().max(64);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kiln scene uniforms"),
            size: (slots * self.uniform_stride) as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let bind_group = self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("kiln scene bind group"),
            layout: &self.uniform_bgl,
            entries: &[wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                    buffer: &buffer,
                    offset: 0,
                    size: Some(UNIFORM_SIZE),
                }),
            }],
        });
        self.uniform_ring = Some(UniformRing {
            buffer,
            bind_group,
            slots,
        });
    }

    fn ensure_immediate_capacity(&mut self, count: usize) {
        if count == 0 || self.immediate.as_ref().is_some_and(|r| r.capacity >= count) {
            return;
        }
        let capacity = count.next_power_of_two().max(1024);
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("kiln immediate vertices"),
            size: (capacity * std::mem::size_of::<GpuVertex>()) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        self.immediate = Some(VertexRing { buffer, capacity });
    }

    // ── submission ─────────────────────────────────────────────────────────

    fn submit(&mut self, frame: Frame) {
        let Frame {
            surface_texture,
            view,
            clear,
            draws,
            uniforms,
            immediate,
        } = frame;

        // ── mutable operations before any immutable borrows ────────────────
        self.ensure_uniform_ring(uniforms.len().max(1));
        self.ensure_immediate_capacity(immediate.len());

        let stride = self.uniform_stride;
        let mut bytes = vec![0u8; stride * uniforms.len()];
        for (i, u) in uniforms.iter().enumerate() {
            bytes[i * stride..i * stride + UNIFORM_SIZE.get() as usize].copy_from_slice(bytemuck::bytes_of(u));
        }
        if let Some(ring) = self.uniform_ring.as_ref() {
            if !bytes.is_empty() {
                self.queue.write_buffer(&ring.buffer, 0, &bytes);
            }
        }
        if let Some(ring) = self.immediate.as_ref() {
            if !immediate.is_empty() {
                self.queue.write_buffer(&ring.buffer, 0, bytemuck::cast_slice(&immediate));
            }
        }

        let mut textures = Vec::with_capacity(draws.len());
        for draw in &draws {
            self.ensure_pipeline((draw.topology, draw.pipeline));
            let key = match draw.texture {
                Some((handle, sampler)) if self.ensure_texture_bind_group(handle.0, sampler) => {
                    Some((handle.0, sampler))
                }
                Some((handle, _)) => {
                    log::warn!("wgpu: unknown texture {handle:?}; drawing untextured");
                    None
                }
                None => None,
            };
            textures.push(key);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("kiln frame encoder"),
            });

        // ── immutable borrows ──────────────────────────────────────────────
        {
            let (target, resolve_target) = match self.msaa_view.as_ref() {
                Some(msaa) => (msaa, Some(&view)),
                None => (&view, None),
            };

            let mut rpass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("kiln scene pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: target,
                    resolve_target,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(wgpu::Color {
                            r: clear.r as f64,
                            g: clear.g as f64,
                            b: clear.b as f64,
                            a: clear.a as f64,
                        }),
                        store: wgpu::StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
                multiview_mask: None,
            });

            let Some(ring) = self.uniform_ring.as_ref() else {
                return;
            };

            for (i, (draw, texture)) in draws.iter().zip(&textures).enumerate() {
                let Some(pipeline) = self.pipelines.get(&(draw.topology, draw.pipeline)) else {
                    continue;
                };
                let bind_group = match texture {
                    Some(key) => match self.bind_groups.get(key) {
                        Some(bg) => bg,
                        None => continue,
                    },
                    None => &self.white_bind_group,
                };
                let (buffer, first) = match draw.source {
                    Source::Immediate { first } => match self.immediate.as_ref() {
                        Some(ring) => (&ring.buffer, first),
                        None => continue,
                    },
                    Source::Buffer { handle, first } => match self.buffers.get(&handle.0) {
                        Some(b) if first + draw.count <= b.len => (&b.buffer, first),
                        _ => {
                            log::warn!("wgpu: invalid vertex buffer range on {handle:?}");
                            continue;
                        }
                    },
                };
                let Some((x, y, w, h)) = clamp_viewport(
                    draw.viewport,
                    self.surface_config.width,
                    self.surface_config.height,
                ) else {
                    continue;
                };

                rpass.set_viewport(x, y, w, h, 0.0, 1.0);
                rpass.set_pipeline(pipeline);
                rpass.set_bind_group(0, &ring.bind_group, &[(i * stride) as u32]);
                rpass.set_bind_group(1, bind_group, &[]);
                rpass.set_vertex_buffer(0, buffer.slice(..));
                rpass.draw(first..first + draw.count, 0..1);
            }
        }

        self.queue.submit(std::iter::once(encoder.finish()));
        surface_texture.present();
    }
}

fn create_attachments(
    device: &wgpu::Device,
    config: &wgpu::SurfaceConfiguration,
    sample_count: u32,
) -> (wgpu::TextureView, Option<wgpu::TextureView>) {
    let size = wgpu::Extent3d {
        width: config.width.max(1),
        height: config.height.max(1),
        depth_or_array_layers: 1,
    };
    let attachment = |label: &str, format: wgpu::TextureFormat| {
        device
            .create_texture(&wgpu::TextureDescriptor {
                label: Some(label),
                size,
                mip_level_count: 1,
                sample_count,
                dimension: wgpu::TextureDimension::D2,
                format,
                usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
                view_formats: &[],
            })
            .create_view(&wgpu::TextureViewDescriptor::default())
    };

    let depth = attachment("kiln depth", DEPTH_FORMAT);
    let msaa = (sample_count > 1).then(|| attachment("kiln msaa color", config.format));
    (depth, msaa)
}

fn create_sampler(device: &wgpu::Device, state: SamplerState) -> wgpu::Sampler {
    let filter = if state.bilinear {
        wgpu::FilterMode::Linear
    } else {
        wgpu::FilterMode::Nearest
    };
    let address = if state.repeat {
        wgpu::AddressMode::Repeat
    } else {
        wgpu::AddressMode::ClampToEdge
    };
    // Anisotropic filtering requires linear filtering on every axis.
    let anisotropy = if state.bilinear && state.mipmapping {
        state.anisotropy.clamp(1, 16)
    } else {
        1
    };

    device.create_sampler(&wgpu::SamplerDescriptor {
        label: Some("kiln sampler"),
        address_mode_u: address,
        address_mode_v: address,
        address_mode_w: address,
        mag_filter: filter,
        min_filter: filter,
        mipmap_filter: if state.mipmapping && state.bilinear {
            wgpu::MipmapFilterMode::Linear
        } else {
            wgpu::MipmapFilterMode::Nearest
        },
        lod_max_clamp: if state.mipmapping { 32.0 } else { 0.0 },
        anisotropy_clamp: anisotropy,
        ..Default::default()
    })
}

fn texture_bind_group(
    device: &wgpu::Device,
    layout: &wgpu::BindGroupLayout,
    view: &wgpu::TextureView,
    sampler: &wgpu::Sampler,
) -> wgpu::BindGroup {
    device.create_bind_group(&wgpu::BindGroupDescriptor {
        label: Some("kiln texture bind group"),
        layout,
        entries: &[
            wgpu::BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(view),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: wgpu::BindingResource::Sampler(sampler),
            },
        ],
    })
}

fn blend_state(mode: BlendMode) -> Option<wgpu::BlendState> {
    let component = |src_factor, dst_factor| wgpu::BlendComponent {
        src_factor,
        dst_factor,
        operation: wgpu::BlendOperation::Add,
    };
    use wgpu::BlendFactor as F;
    match mode {
        BlendMode::Opaque => None,
        BlendMode::Alpha => Some(wgpu::BlendState::ALPHA_BLENDING),
        BlendMode::Additive => Some(wgpu::BlendState {
            color: component(F::SrcAlpha, F::One),
            alpha: component(F::One, F::One),
        }),
        BlendMode::Multiply => Some(wgpu::BlendState {
            color: component(F::Dst, F::Zero),
            alpha: component(F::DstAlpha, F::Zero),
        }),
    }
}

/// Intersects a pixel rectangle with the render target.
fn clamp_viewport(rect: PixelRect, width: u32, height: u32) -> Option<(f32, f32, f32, f32)> {
    let x0 = rect.min.x.clamp(0, width as i32);
    let y0 = rect.min.y.clamp(0, height as i32);
    let x1 = rect.max.x.clamp(0, width as i32);
    let y1 = rect.max.y.clamp(0, height as i32);
    (x1 > x0 && y1 > y0).then(|| (x0 as f32, y0 as f32, (x1 - x0) as f32, (y1 - y0) as f32))
}

/// Maps a surface acquisition error onto a frame status.
fn surface_error_status(err: SurfaceError, surface: &wgpu::Surface<'_>, session: &Session) -> FrameStatus {
    match err {
        SurfaceError::Lost | SurfaceError::Outdated => {
            surface.configure(&session.device, &session.surface_config);
            FrameStatus::Skipped
        }
        SurfaceError::OutOfMemory => {
            log::error!("wgpu: surface out of memory");
            FrameStatus::Lost
        }
        SurfaceError::Timeout | SurfaceError::Other => FrameStatus::Skipped,
    }
}

fn choose_surface_format(
    caps: &wgpu::SurfaceCapabilities,
    prefer_srgb: bool,
) -> Option<wgpu::TextureFormat> {
    if caps.formats.is_empty() {
        return None;
    }

    if prefer_srgb {
        let preferred = [
            wgpu::TextureFormat::Bgra8UnormSrgb,
            wgpu::TextureFormat::Rgba8UnormSrgb,
        ];
        for f in preferred {
            if caps.formats.contains(&f) {
                return Some(f);
            }
        }
    }

    Some(caps.formats[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec2;

    #[test]
    fn viewport_is_clipped_to_target() {
        let rect = PixelRect::new(IVec2::new(-10, 100), IVec2::new(900, 700));
        assert_eq!(clamp_viewport(rect, 800, 600), Some((0.0, 100.0, 800.0, 500.0)));
    }

    #[test]
    fn viewport_outside_target_is_dropped() {
        let rect = PixelRect::new(IVec2::new(900, 0), IVec2::new(1000, 10));
        assert_eq!(clamp_viewport(rect, 800, 600), None);
    }

    #[test]
    fn opaque_mode_disables_blending() {
        assert!(blend_state(BlendMode::Opaque).is_none());
        assert_eq!(blend_state(BlendMode::Alpha), Some(wgpu::BlendState::ALPHA_BLENDING));
    }
}
