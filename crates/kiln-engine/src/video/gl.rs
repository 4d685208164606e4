use glam::Vec2;

use crate::camera::DepthRange;
use crate::device::Device;

use super::backend::{BackendCaps, BackendCore, RenderBackend, SurfaceAction, SurfaceChange, VideoApi};

/// OpenGL conventions: `[-1, 1]` clip depth, no pixel offset, textures of
/// any size, float vertex colors.
///
/// A resize only reconfigures the drawable; the context survives. Switching
/// to or from fullscreen recreates the context.
#[derive(Debug)]
pub struct GlBackend {
    core: BackendCore,
}

impl GlBackend {
    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            core: BackendCore::new(device),
        }
    }
}

impl RenderBackend for GlBackend {
    fn api(&self) -> VideoApi {
        VideoApi::OpenGl
    }

    fn caps(&self) -> BackendCaps {
        BackendCaps {
            depth_range: DepthRange::NegativeOneToOne,
            pixel_offset: Vec2::ZERO,
            pow2_textures: false,
            packed_vertex_colors: false,
        }
    }

    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    /// Multisampling is all or nothing.
    fn next_sample_count(&self, _rejected: u32) -> u32 {
        1
    }

    fn surface_change(&self, change: SurfaceChange) -> SurfaceAction {
        match change {
            SurfaceChange::Resized => SurfaceAction::Reconfigure,
            SurfaceChange::FocusRegained { .. } => SurfaceAction::Nothing,
            SurfaceChange::FullscreenToggled => SurfaceAction::LoseDevice,
        }
    }
}
