//! Command execution layer beneath the render backends.
//!
//! A [`Device`] owns GPU objects and turns [`DrawCall`]s into pixels. Two
//! implementations exist:
//! - [`WgpuDevice`]: the windowed device, presenting to a winit surface
//! - [`HeadlessDevice`]: in-memory device that records draws, used for tests
//!   and offscreen runs

mod contract;
mod gpu;
mod headless;
mod uniforms;

pub use contract::{
    BlendMode, BufferHandle, Device, DeviceError, DeviceInfo, DeviceParams, DeviceStats, DrawCall,
    FrameStatus, Geometry, MipLevel, PipelineState, SamplerState, TextureHandle, Topology,
};
pub use gpu::{WgpuDevice, WgpuDeviceConfig};
pub use headless::{DrawRecord, HeadlessDevice, HeadlessProbe, TextureRecord};
pub use uniforms::{GpuLight, GpuVertex, SceneUniforms, MAX_LIGHTS};
