use glam::UVec2;

use crate::coords::{Color, PixelRect};

use super::uniforms::{GpuVertex, SceneUniforms};

/// Opaque id of a texture living on a [`Device`].
///
/// Handles are only meaningful for the device session that issued them; a
/// device that is closed and reopened invalidates every outstanding handle.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct TextureHandle(pub(crate) u64);

/// Opaque id of a vertex buffer living on a [`Device`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct BufferHandle(pub(crate) u64);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeviceError {
    /// No adapter or context could be created.
    #[error("graphics device unavailable: {0}")]
    Unavailable(String),

    /// The request is valid but not supported by this device (sample count,
    /// texture size, format).
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("device out of memory")]
    OutOfMemory,

    #[error("device is not open")]
    NotOpen,

    #[error("unknown handle")]
    InvalidHandle,
}

/// Parameters of one device session.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct DeviceParams {
    /// Drawable size in physical pixels.
    pub size: UVec2,
    /// MSAA sample count; 1 disables multisampling.
    pub sample_count: u32,
    pub vsync: bool,
}

impl Default for DeviceParams {
    fn default() -> Self {
        Self {
            size: UVec2::new(800, 600),
            sample_count: 1,
            vsync: true,
        }
    }
}

/// Static facts about an open device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub max_texture_size: u32,
    pub max_anisotropy: u16,
}

/// One mip level of RGBA8 pixel data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MipLevel {
    pub width: u32,
    pub height: u32,
    pub rgba: Vec<u8>,
}

/// Result of [`Device::begin_frame`].
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FrameStatus {
    /// Drawing may proceed.
    Ready,
    /// Transient failure; skip this frame.
    Skipped,
    /// The device is gone and must be rebuilt before the next frame.
    Lost,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum Topology {
    Points,
    Lines,
    Triangles,
}

#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Hash)]
pub enum BlendMode {
    /// Source replaces destination.
    Opaque,
    /// Straight alpha: `src·a + dst·(1 - a)`.
    #[default]
    Alpha,
    /// `src·a + dst`.
    Additive,
    /// `src · dst`.
    Multiply,
}

/// Fixed-function state baked into a pipeline.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct PipelineState {
    pub blend: BlendMode,
    pub cull_backfaces: bool,
    pub depth_test: bool,
    pub depth_write: bool,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            blend: BlendMode::Alpha,
            cull_backfaces: false,
            depth_test: true,
            depth_write: true,
        }
    }
}

/// Texture sampling settings.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct SamplerState {
    pub bilinear: bool,
    pub mipmapping: bool,
    /// 1 disables anisotropic filtering.
    pub anisotropy: u16,
    /// Wrap (`true`) or clamp (`false`) outside `[0, 1]`.
    pub repeat: bool,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            bilinear: true,
            mipmapping: true,
            anisotropy: 1,
            repeat: true,
        }
    }
}

#[derive(Debug, Copy, Clone)]
pub enum Geometry<'a> {
    /// Vertices uploaded for this draw only.
    Immediate(&'a [GpuVertex]),
    /// A range of a retained vertex buffer.
    Buffer {
        handle: BufferHandle,
        first: u32,
        count: u32,
    },
}

impl Geometry<'_> {
    pub fn vertex_count(&self) -> u32 {
        match self {
            Geometry::Immediate(v) => v.len() as u32,
            Geometry::Buffer { count, .. } => *count,
        }
    }
}

/// Everything a device needs to issue one draw.
#[derive(Debug, Clone)]
pub struct DrawCall<'a> {
    pub geometry: Geometry<'a>,
    pub topology: Topology,
    pub uniforms: SceneUniforms,
    pub texture: Option<(TextureHandle, SamplerState)>,
    pub pipeline: PipelineState,
    pub viewport: PixelRect,
}

/// Counters accumulated over the device's lifetime.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct DeviceStats {
    pub sessions_opened: u32,
    pub frames: u64,
    pub draw_calls: u64,
    pub live_textures: usize,
    pub live_buffers: usize,
}

/// Executes drawing commands for a render backend.
///
/// A device alternates between closed and open sessions. Resources created
/// during a session are destroyed when it closes.
pub trait Device {
    /// Opens a session. Fails with [`DeviceError::Unsupported`] when the
    /// requested sample count is rejected.
    fn open(&mut self, params: &DeviceParams) -> Result<DeviceInfo, DeviceError>;

    /// Closes the session, releasing every resource it owns.
    fn close(&mut self);

    fn is_open(&self) -> bool;

    /// Adjusts the drawable size without closing the session.
    fn resize(&mut self, size: UVec2) -> Result<(), DeviceError>;

    fn create_texture(&mut self, label: &str, levels: &[MipLevel]) -> Result<TextureHandle, DeviceError>;

    fn destroy_texture(&mut self, handle: TextureHandle);

    fn create_buffer(&mut self, label: &str, vertices: &[GpuVertex]) -> Result<BufferHandle, DeviceError>;

    fn destroy_buffer(&mut self, handle: BufferHandle);

    fn begin_frame(&mut self, clear: Color) -> FrameStatus;

    fn draw(&mut self, call: &DrawCall<'_>);

    /// Submits and presents the frame started by [`begin_frame`](Self::begin_frame).
    fn end_frame(&mut self);

    fn stats(&self) -> DeviceStats;
}
