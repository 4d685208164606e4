use glam::Vec2;

use crate::camera::DepthRange;
use crate::device::Device;

use super::backend::{BackendCaps, BackendCore, RenderBackend, SurfaceAction, SurfaceChange, VideoApi};

/// Direct3D 9 conventions: `[0, 1]` clip depth, half-pixel 2D offset,
/// power-of-two textures, 8-bit ARGB vertex colors.
///
/// The device is lost on every resize and fullscreen switch, and when focus
/// returns to a fullscreen window.
#[derive(Debug)]
pub struct Dx9Backend {
    core: BackendCore,
}

impl Dx9Backend {
    pub const PIXEL_OFFSET: Vec2 = Vec2::new(0.5, 0.5);

    pub fn new(device: Box<dyn Device>) -> Self {
        Self {
            core: BackendCore::new(device),
        }
    }
}

impl RenderBackend for Dx9Backend {
    fn api(&self) -> VideoApi {
        VideoApi::Dx9
    }

    fn caps(&self) -> BackendCaps {
        BackendCaps {
            depth_range: DepthRange::ZeroToOne,
            pixel_offset: Self::PIXEL_OFFSET,
            pow2_textures: true,
            packed_vertex_colors: true,
        }
    }

    fn core(&self) -> &BackendCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut BackendCore {
        &mut self.core
    }

    fn next_sample_count(&self, rejected: u32) -> u32 {
        if rejected <= 2 { 1 } else { rejected - 1 }
    }

    fn surface_change(&self, change: SurfaceChange) -> SurfaceAction {
        match change {
            SurfaceChange::Resized | SurfaceChange::FullscreenToggled => SurfaceAction::LoseDevice,
            SurfaceChange::FocusRegained { fullscreen: true } => SurfaceAction::LoseDevice,
            SurfaceChange::FocusRegained { fullscreen: false } => SurfaceAction::Nothing,
        }
    }
}
