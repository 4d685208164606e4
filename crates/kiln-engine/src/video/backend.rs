use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;

use glam::{Mat4, UVec2, Vec2, Vec4};
use image::RgbaImage;

use crate::camera::DepthRange;
use crate::coords::{Color, PixelRect, Rect};
use crate::device::{
    BufferHandle, Device, DeviceError, DeviceInfo, DeviceParams, DrawCall, FrameStatus, GpuVertex,
    TextureHandle,
};

use super::error::VideoError;
use super::renderable::Vertex;
use super::texels;

// ── api ───────────────────────────────────────────────────────────────────

/// Which rendering API's conventions the backend presents.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum VideoApi {
    OpenGl,
    Dx9,
}

impl VideoApi {
    /// Direct3D 9 on Windows, OpenGL elsewhere.
    pub fn platform_default() -> Self {
        if cfg!(windows) { Self::Dx9 } else { Self::OpenGl }
    }
}

impl fmt::Display for VideoApi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OpenGl => "OpenGL",
            Self::Dx9 => "DX9",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown video API '{0}'")]
pub struct ParseVideoApiError(pub String);

impl FromStr for VideoApi {
    type Err = ParseVideoApiError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "opengl" | "gl" => Ok(Self::OpenGl),
            "dx9" | "d3d9" | "direct3d9" => Ok(Self::Dx9),
            other => Err(ParseVideoApiError(other.to_string())),
        }
    }
}

// ── conventions ───────────────────────────────────────────────────────────

/// Conventions a backend variant presents to the application.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct BackendCaps {
    pub depth_range: DepthRange,
    /// Added to the 2D projection, in pixels.
    pub pixel_offset: Vec2,
    pub pow2_textures: bool,
    /// Vertex colors are stored as 8-bit ARGB.
    pub packed_vertex_colors: bool,
}

/// A change to the presentation surface the backend must react to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceChange {
    Resized,
    FocusRegained { fullscreen: bool },
    FullscreenToggled,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum SurfaceAction {
    Nothing,
    /// Keep the device and resize its drawable.
    Reconfigure,
    /// Tear the device down and rebuild it.
    LoseDevice,
}

/// Maps OpenGL clip depth `[-1, 1]` onto the device's `[0, 1]`.
const GL_TO_DEVICE_CLIP: Mat4 = Mat4::from_cols(
    Vec4::new(1.0, 0.0, 0.0, 0.0),
    Vec4::new(0.0, 1.0, 0.0, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 0.0),
    Vec4::new(0.0, 0.0, 0.5, 1.0),
);

// ── shared state ──────────────────────────────────────────────────────────

/// Buffers whose owners went away, tagged with the device session they were
/// created in. Cloned into every owner; the backend drains it.
#[derive(Debug, Clone, Default)]
pub struct RetiredBuffers(Rc<RefCell<Vec<(u64, BufferHandle)>>>);

impl RetiredBuffers {
    pub fn retire(&self, generation: u64, handle: BufferHandle) {
        self.0.borrow_mut().push((generation, handle));
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    fn take(&self) -> Vec<(u64, BufferHandle)> {
        std::mem::take(&mut *self.0.borrow_mut())
    }
}

/// Device ownership shared by every backend variant.
pub struct BackendCore {
    device: Box<dyn Device>,
    session: Option<DeviceParams>,
    info: Option<DeviceInfo>,
    generation: u64,
    retired: RetiredBuffers,
}

impl BackendCore {
    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            device,
            session: None,
            info: None,
            generation: 0,
            retired: RetiredBuffers::default(),
        }
    }

    /// Counts successful device opens. Handles are only valid in the
    /// generation that created them.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn retired_buffers(&self) -> &RetiredBuffers {
        &self.retired
    }

    pub fn device(&self) -> &dyn Device {
        self.device.as_ref()
    }

    pub fn device_mut(&mut self) -> &mut dyn Device {
        self.device.as_mut()
    }

    /// Parameters of the open session, after multisample negotiation.
    pub fn session(&self) -> Option<DeviceParams> {
        self.session
    }

    pub fn info(&self) -> Option<&DeviceInfo> {
        self.info.as_ref()
    }
}

impl fmt::Debug for BackendCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendCore")
            .field("session", &self.session)
            .field("info", &self.info)
            .field("generation", &self.generation)
            .field("retired", &self.retired.len())
            .finish_non_exhaustive()
    }
}

// ── backend ───────────────────────────────────────────────────────────────

/// One rendering API variant on top of a [`Device`].
///
/// Variants supply their conventions ([`caps`](Self::caps)), their
/// multisample fallback and their reaction to surface changes; everything
/// else is shared and provided.
pub trait RenderBackend {
    fn api(&self) -> VideoApi;

    fn caps(&self) -> BackendCaps;

    fn core(&self) -> &BackendCore;

    fn core_mut(&mut self) -> &mut BackendCore;

    /// Sample count to try after `rejected` was refused by the device.
    fn next_sample_count(&self, rejected: u32) -> u32;

    fn surface_change(&self, change: SurfaceChange) -> SurfaceAction;

    fn is_open(&self) -> bool {
        self.core().device().is_open()
    }

    fn session(&self) -> Option<DeviceParams> {
        self.core().session()
    }

    /// Opens the device, lowering the sample count until it is accepted.
    fn init(&mut self, desired: &DeviceParams) -> Result<DeviceInfo, VideoError> {
        let api = self.api();
        let mut params = *desired;
        params.sample_count = params.sample_count.max(1);

        loop {
            match self.core_mut().device.open(&params) {
                Ok(info) => {
                    log::info!(
                        "{api}: opened '{}' at {}x{}, {} sample(s)",
                        info.name,
                        params.size.x,
                        params.size.y,
                        params.sample_count
                    );
                    let core = self.core_mut();
                    core.session = Some(params);
                    core.info = Some(info.clone());
                    core.generation += 1;
                    return Ok(info);
                }
                Err(DeviceError::Unsupported(reason)) if params.sample_count > 1 => {
                    let next = self.next_sample_count(params.sample_count).clamp(1, params.sample_count - 1);
                    log::warn!("{api}: {reason}; retrying with {next} sample(s)");
                    params.sample_count = next;
                }
                Err(source) => {
                    log::error!("{api}: device initialization failed: {source}");
                    return Err(VideoError::DeviceInit { api, source });
                }
            }
        }
    }

    fn uninit(&mut self) {
        self.collect_retired();
        let core = self.core_mut();
        if core.device.is_open() {
            log::info!("device closed");
        }
        core.device.close();
        core.session = None;
        core.info = None;
    }

    fn resize(&mut self, size: UVec2) -> Result<(), DeviceError> {
        let core = self.core_mut();
        core.device.resize(size)?;
        if let Some(session) = core.session.as_mut() {
            session.size = size;
        }
        Ok(())
    }

    /// Converts a projection built in this API's depth convention into the
    /// device's clip space.
    fn to_device_clip(&self, projection: Mat4) -> Mat4 {
        match self.caps().depth_range {
            DepthRange::NegativeOneToOne => GL_TO_DEVICE_CLIP * projection,
            DepthRange::ZeroToOne => projection,
        }
    }

    /// Orthographic projection showing `virtual_window` in `viewport`, in this
    /// API's depth convention.
    fn ortho_2d(&self, virtual_window: Rect, viewport: PixelRect) -> Mat4 {
        let caps = self.caps();
        let pixels = Vec2::new(viewport.width().max(1) as f32, viewport.height().max(1) as f32);
        let offset = caps.pixel_offset * (virtual_window.size() / pixels);

        let (left, right) = (virtual_window.min.x + offset.x, virtual_window.max.x + offset.x);
        let (top, bottom) = (virtual_window.min.y + offset.y, virtual_window.max.y + offset.y);
        match caps.depth_range {
            DepthRange::NegativeOneToOne => Mat4::orthographic_rh_gl(left, right, bottom, top, -1.0, 1.0),
            DepthRange::ZeroToOne => Mat4::orthographic_rh(left, right, bottom, top, -1.0, 1.0),
        }
    }

    fn prepare_vertex(&self, vertex: &Vertex) -> GpuVertex {
        let mut v = *vertex;
        if self.caps().packed_vertex_colors {
            v.color = v.color.quantized();
        }
        v.to_gpu()
    }

    /// Uploads `image`, rescaled to the device's limits and this API's size
    /// constraints.
    fn create_texture(&mut self, label: &str, image: &RgbaImage, mipmap: bool) -> Result<TextureHandle, VideoError> {
        let pow2 = self.caps().pow2_textures;
        let max = self.core().info().map_or(0, |i| i.max_texture_size);
        let fitted = texels::fit_texture_size(image, pow2, max);
        let levels = texels::mip_chain(&fitted, mipmap);

        let handle = self
            .core_mut()
            .device
            .create_texture(label, &levels)
            .map_err(|source| VideoError::ResourceCreation {
                what: format!("texture '{label}'"),
                source,
            })?;
        log::debug!("texture '{label}' realized ({} level(s))", levels.len());
        Ok(handle)
    }

    fn destroy_texture(&mut self, handle: TextureHandle) {
        self.core_mut().device.destroy_texture(handle);
    }

    fn create_vertex_buffer(&mut self, label: &str, vertices: &[Vertex]) -> Result<BufferHandle, VideoError> {
        let gpu: Vec<GpuVertex> = vertices.iter().map(|v| self.prepare_vertex(v)).collect();
        self.core_mut()
            .device
            .create_buffer(label, &gpu)
            .map_err(|source| VideoError::ResourceCreation {
                what: format!("vertex buffer '{label}'"),
                source,
            })
    }

    fn destroy_vertex_buffer(&mut self, handle: BufferHandle) {
        self.core_mut().device.destroy_buffer(handle);
    }

    /// Destroys the retired buffers created on the open device and forgets
    /// the ones a previous device took with it. Returns how many were
    /// destroyed.
    fn collect_retired(&mut self) -> usize {
        let core = self.core_mut();
        let current = core.device.is_open().then_some(core.generation);
        let mut destroyed = 0;
        for (generation, handle) in core.retired.take() {
            if Some(generation) == current {
                core.device.destroy_buffer(handle);
                destroyed += 1;
            }
        }
        if destroyed > 0 {
            log::debug!("destroyed {destroyed} retired vertex buffer(s)");
        }
        destroyed
    }

    fn begin_frame(&mut self, clear: Color) -> FrameStatus {
        self.core_mut().device.begin_frame(clear)
    }

    fn draw(&mut self, call: &DrawCall<'_>) {
        self.core_mut().device.draw(call);
    }

    fn end_frame(&mut self) {
        self.core_mut().device.end_frame();
    }
}

impl fmt::Debug for dyn RenderBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RenderBackend")
            .field("api", &self.api())
            .field("core", self.core())
            .finish()
    }
}

/// Builds the backend variant for `api` on top of `device`.
pub fn create_backend(api: VideoApi, device: Box<dyn Device>) -> Box<dyn RenderBackend> {
    match api {
        VideoApi::OpenGl => Box::new(super::gl::GlBackend::new(device)),
        VideoApi::Dx9 => Box::new(super::dx9::Dx9Backend::new(device)),
    }
}
