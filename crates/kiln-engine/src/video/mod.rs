//! Render backends and the [`Video`] facade.
//!
//! Two backend variants present the conventions of their API on top of a
//! shared [`Device`](crate::device::Device):
//! - [`GlBackend`]: OpenGL
//! - [`Dx9Backend`]: Direct3D 9
//!
//! The facade owns the active variant, the transform stack and render state,
//! and runs the device-loss protocol: `pre_uninit` fires before the device is
//! torn down, `post_reinit` once a new one is open.

mod backend;
mod config;
mod dx9;
mod error;
mod facade;
mod gl;
mod lifecycle;
mod renderable;
mod state;
mod texels;
mod viewport;

pub use backend::{
    create_backend, BackendCaps, BackendCore, ParseVideoApiError, RenderBackend, RetiredBuffers,
    SurfaceAction, SurfaceChange, VideoApi,
};
pub use config::{ConfigError, TextureSettings, VideoConfig, DEFAULT_VIDEO_CONFIG};
pub use dx9::Dx9Backend;
pub use error::VideoError;
pub use facade::{Video, VideoMode};
pub use gl::GlBackend;
pub use lifecycle::{DeviceEvent, DeviceObserver, ObserverId};
pub use renderable::{Line, Point, Quad, Renderable, Shape, Triangle, Vertex};
pub use state::{Fog, FogMode, Light, LightType, Material, RenderState};
pub use texels::{fit_texture_size, mip_chain, power_of_two_at_least};
pub use viewport::{calculate_viewport, fit_aspect_ratio};
