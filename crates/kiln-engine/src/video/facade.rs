use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use glam::{Mat4, Quat, UVec2, Vec3};
use image::RgbaImage;

use crate::camera::Camera;
use crate::coords::{Color, PixelRect, Rect};
use crate::device::{
    BlendMode, BufferHandle, Device, DeviceParams, DeviceStats, DrawCall, FrameStatus, Geometry,
    GpuVertex, SamplerState, TextureHandle, Topology, MAX_LIGHTS,
};
use crate::event::Event;

use super::backend::{create_backend, BackendCaps, RenderBackend, SurfaceAction, SurfaceChange, VideoApi};
use super::config::{TextureSettings, VideoConfig};
use super::error::VideoError;
use super::lifecycle::{self, DeviceEvent, DeviceObserver, ObserverId};
use super::renderable::{Renderable, Vertex};
use super::state::{Fog, Light, Material, RenderState};
use super::viewport::calculate_viewport;

/// Window-level settings the device is opened with.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct VideoMode {
    pub size: UVec2,
    pub fullscreen: bool,
    /// Requested MSAA samples.
    pub multisampling: u32,
    pub vsync: bool,
}

impl Default for VideoMode {
    fn default() -> Self {
        VideoMode::from(&VideoConfig::default())
    }
}

impl From<&VideoConfig> for VideoMode {
    fn from(config: &VideoConfig) -> Self {
        Self {
            size: config.resolution,
            fullscreen: config.fullscreen,
            multisampling: config.multisampling,
            vsync: config.vsync,
        }
    }
}

impl VideoMode {
    pub fn device_params(&self) -> DeviceParams {
        DeviceParams {
            size: self.size,
            sample_count: self.multisampling.max(1),
            vsync: self.vsync,
        }
    }
}

/// How projection and view were last chosen, so they can be re-derived
/// when the window changes size.
#[derive(Debug, Clone, PartialEq)]
enum View {
    Flat { virtual_window: Rect, fix_aspect_ratio: bool },
    Perspective { camera: Camera, viewport: Option<PixelRect> },
}

/// The rendering facade: one backend variant plus transforms, render state
/// and the device lifecycle protocol.
///
/// Device loss is handled internally. Before the device is torn down,
/// [`pre_uninit`](Self::pre_uninit) fires and every resource owner releases
/// its handles; once a new device is open, [`post_reinit`](Self::post_reinit)
/// fires and they rebuild them.
pub struct Video {
    backend: Box<dyn RenderBackend>,
    pre_uninit: DeviceEvent,
    post_reinit: DeviceEvent,

    mode: VideoMode,
    focused: bool,
    needs_restore: bool,
    rendering: bool,

    state: RenderState,
    texture_settings: TextureSettings,
    texture: Option<(TextureHandle, SamplerState)>,

    world: Vec<Mat4>,
    view_mode: View,
    view: Mat4,
    projection: Mat4,
    viewport: PixelRect,
}

impl fmt::Debug for Video {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Video")
            .field("backend", &self.backend)
            .field("mode", &self.mode)
            .field("focused", &self.focused)
            .field("needs_restore", &self.needs_restore)
            .field("rendering", &self.rendering)
            .field("viewport", &self.viewport)
            .finish_non_exhaustive()
    }
}

impl Video {
    /// Opens the backend's device. Fires no lifecycle events.
    pub fn new(mut backend: Box<dyn RenderBackend>, mode: VideoMode) -> Result<Self, VideoError> {
        backend.init(&mode.device_params())?;
        let mut video = Self {
            backend,
            pre_uninit: Event::new(),
            post_reinit: Event::new(),
            mode,
            focused: true,
            needs_restore: false,
            rendering: false,
            state: RenderState::default(),
            texture_settings: TextureSettings::default(),
            texture: None,
            world: vec![Mat4::IDENTITY],
            view_mode: View::Flat {
                virtual_window: Rect::from_size(mode.size.x as f32, mode.size.y as f32),
                fix_aspect_ratio: false,
            },
            view: Mat4::IDENTITY,
            projection: Mat4::IDENTITY,
            viewport: PixelRect::default(),
        };
        video.set_2d();
        Ok(video)
    }

    /// Builds the configured backend variant on `device` and opens it.
    pub fn create(config: &VideoConfig, device: Box<dyn Device>) -> Result<Self, VideoError> {
        let mut video = Self::new(create_backend(config.api, device), VideoMode::from(config))?;
        video.texture_settings = config.textures;
        Ok(video)
    }

    // ── accessors ─────────────────────────────────────────────────────────

    pub fn api(&self) -> VideoApi {
        self.backend.api()
    }

    pub fn caps(&self) -> BackendCaps {
        self.backend.caps()
    }

    pub fn backend(&self) -> &dyn RenderBackend {
        self.backend.as_ref()
    }

    /// Direct backend access for resource creation.
    pub fn backend_mut(&mut self) -> &mut dyn RenderBackend {
        self.backend.as_mut()
    }

    pub fn mode(&self) -> VideoMode {
        self.mode
    }

    pub fn window_size(&self) -> UVec2 {
        self.mode.size
    }

    pub fn is_fullscreen(&self) -> bool {
        self.mode.fullscreen
    }

    /// Samples per pixel of the open device, after negotiation.
    pub fn sample_count(&self) -> Option<u32> {
        self.backend.session().map(|s| s.sample_count)
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering
    }

    pub fn device_stats(&self) -> DeviceStats {
        self.backend.core().device().stats()
    }

    pub fn viewport(&self) -> PixelRect {
        self.viewport
    }

    pub fn view_matrix(&self) -> Mat4 {
        self.view
    }

    /// Projection in the backend API's own clip convention.
    pub fn projection_matrix(&self) -> Mat4 {
        self.projection
    }

    pub fn render_state(&self) -> &RenderState {
        &self.state
    }

    pub fn texture_settings(&self) -> TextureSettings {
        self.texture_settings
    }

    /// Takes effect for textures bound after the call.
    pub fn set_texture_settings(&mut self, settings: TextureSettings) {
        self.texture_settings = settings;
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    pub fn pre_uninit(&self) -> &DeviceEvent {
        &self.pre_uninit
    }

    pub fn post_reinit(&self) -> &DeviceEvent {
        &self.post_reinit
    }

    pub fn lend_observer<O: DeviceObserver + 'static>(&self, observer: &Rc<RefCell<O>>) -> ObserverId {
        lifecycle::lend(&self.pre_uninit, &self.post_reinit, observer)
    }

    pub fn give_observer<O: DeviceObserver + 'static>(&self, observer: O) -> ObserverId {
        lifecycle::give(&self.pre_uninit, &self.post_reinit, observer)
    }

    pub fn remove_observer(&self, id: ObserverId) -> bool {
        lifecycle::remove(&self.pre_uninit, &self.post_reinit, id)
    }

    /// Tears the device down and rebuilds it, letting every observer release
    /// and recreate its resources.
    ///
    /// Only a failure to open the new device is reported. In that case the
    /// rebuild is retried at the next [`begin_render`](Self::begin_render).
    pub fn lose_device(&mut self) -> Result<(), VideoError> {
        if !self.needs_restore {
            log::info!("{}: device lost; releasing resources", self.api());
            self.rendering = false;
            self.texture = None;
            self.pre_uninit.fire(self.backend.as_mut());
            self.backend.uninit();
            self.needs_restore = true;
        }
        self.restore()
    }

    fn restore(&mut self) -> Result<(), VideoError> {
        self.backend.init(&self.mode.device_params())?;
        self.needs_restore = false;
        self.post_reinit.fire(self.backend.as_mut());
        log::info!("{}: device restored", self.api());
        Ok(())
    }

    fn surface_changed(&mut self, change: SurfaceChange) -> Result<(), VideoError> {
        match self.backend.surface_change(change) {
            SurfaceAction::Nothing => Ok(()),
            SurfaceAction::Reconfigure => match self.backend.resize(self.mode.size) {
                Ok(()) => Ok(()),
                Err(e) => {
                    log::warn!("{}: resize failed ({e}); rebuilding device", self.api());
                    self.lose_device()
                }
            },
            SurfaceAction::LoseDevice => self.lose_device(),
        }
    }

    /// Reacts to a new window size in physical pixels.
    pub fn handle_resize(&mut self, size: UVec2) -> Result<(), VideoError> {
        if size == self.mode.size {
            return Ok(());
        }
        log::debug!("window resized to {}x{}", size.x, size.y);
        self.mode.size = size;
        self.refresh_view();
        if size.x == 0 || size.y == 0 {
            return Ok(());
        }
        self.surface_changed(SurfaceChange::Resized)
    }

    pub fn handle_focus_change(&mut self, focused: bool) -> Result<(), VideoError> {
        let regained = focused && !self.focused;
        self.focused = focused;
        if regained {
            self.surface_changed(SurfaceChange::FocusRegained {
                fullscreen: self.mode.fullscreen,
            })
        } else {
            Ok(())
        }
    }

    pub fn set_fullscreen(&mut self, fullscreen: bool) -> Result<(), VideoError> {
        if fullscreen == self.mode.fullscreen {
            return Ok(());
        }
        self.mode.fullscreen = fullscreen;
        log::info!("fullscreen {}", if fullscreen { "on" } else { "off" });
        self.surface_changed(SurfaceChange::FullscreenToggled)
    }

    pub fn toggle_fullscreen(&mut self) -> Result<(), VideoError> {
        self.set_fullscreen(!self.mode.fullscreen)
    }

    // ── views ─────────────────────────────────────────────────────────────

    fn window_rect(&self) -> PixelRect {
        PixelRect::from_size(self.mode.size.x as i32, self.mode.size.y as i32)
    }

    /// 2D view with one virtual unit per window pixel.
    pub fn set_2d(&mut self) {
        let size = self.mode.size;
        self.set_2d_view(Rect::from_size(size.x as f32, size.y as f32), false);
    }

    /// 2D view showing `virtual_window`, optionally letterboxed to keep its
    /// aspect ratio.
    pub fn set_2d_view(&mut self, virtual_window: Rect, fix_aspect_ratio: bool) {
        self.view_mode = View::Flat {
            virtual_window,
            fix_aspect_ratio,
        };
        self.refresh_view();
    }

    /// 3D view through `camera` covering the whole window.
    pub fn set_3d(&mut self, camera: &Camera) {
        self.view_mode = View::Perspective {
            camera: *camera,
            viewport: None,
        };
        self.refresh_view();
    }

    /// 3D view through `camera` restricted to `viewport`.
    pub fn set_3d_view(&mut self, camera: &Camera, viewport: PixelRect) {
        self.view_mode = View::Perspective {
            camera: *camera,
            viewport: Some(viewport),
        };
        self.refresh_view();
    }

    pub fn is_3d(&self) -> bool {
        matches!(self.view_mode, View::Perspective { .. })
    }

    fn refresh_view(&mut self) {
        let window = self.window_rect();
        match &self.view_mode {
            View::Flat {
                virtual_window,
                fix_aspect_ratio,
            } => {
                self.viewport = calculate_viewport(*virtual_window, window, *fix_aspect_ratio);
                self.projection = self.backend.ortho_2d(*virtual_window, self.viewport);
                self.view = Mat4::IDENTITY;
            }
            View::Perspective { camera, viewport } => {
                self.viewport = viewport.unwrap_or(window);
                let aspect = self.viewport.aspect_ratio().unwrap_or(1.0);
                self.projection = camera.projection_matrix(aspect, self.backend.caps().depth_range);
                self.view = camera.view_matrix();
            }
        }
    }

    // ── world transform ───────────────────────────────────────────────────

    pub fn world_matrix(&self) -> Mat4 {
        self.world.last().copied().unwrap_or(Mat4::IDENTITY)
    }

    fn top(&mut self) -> &mut Mat4 {
        if self.world.is_empty() {
            self.world.push(Mat4::IDENTITY);
        }
        let last = self.world.len() - 1;
        &mut self.world[last]
    }

    /// Saves the current world transform.
    pub fn push_world(&mut self) {
        let top = self.world_matrix();
        self.world.push(top);
    }

    /// Restores the transform saved by the matching [`push_world`](Self::push_world).
    pub fn pop_world(&mut self) -> Result<(), VideoError> {
        if self.world.len() <= 1 {
            return Err(VideoError::InvalidState("world stack underflow".into()));
        }
        self.world.pop();
        Ok(())
    }

    pub fn translate_scene(&mut self, offset: Vec3) {
        *self.top() *= Mat4::from_translation(offset);
    }

    pub fn rotate_scene(&mut self, rotation: Quat) {
        *self.top() *= Mat4::from_quat(rotation);
    }

    pub fn scale_scene(&mut self, factor: Vec3) {
        *self.top() *= Mat4::from_scale(factor);
    }

    pub fn transform_scene(&mut self, transform: Mat4) {
        *self.top() *= transform;
    }

    // ── render state ──────────────────────────────────────────────────────

    pub fn set_lighting(&mut self, on: bool) {
        self.state.lighting = on;
    }

    pub fn set_ambient_lighting(&mut self, color: Color) {
        self.state.ambient = color;
    }

    pub fn set_light(&mut self, index: usize, light: Light) -> Result<(), VideoError> {
        let slot = self.light_slot(index)?;
        *slot = Some(light);
        Ok(())
    }

    pub fn unset_light(&mut self, index: usize) -> Result<(), VideoError> {
        let slot = self.light_slot(index)?;
        *slot = None;
        Ok(())
    }

    fn light_slot(&mut self, index: usize) -> Result<&mut Option<Light>, VideoError> {
        self.state.lights.get_mut(index).ok_or_else(|| {
            VideoError::InvalidState(format!("light index {index} out of range 0..{MAX_LIGHTS}"))
        })
    }

    pub fn set_material(&mut self, material: Material) {
        self.state.material = material;
    }

    pub fn set_fog(&mut self, fog: Option<Fog>) {
        self.state.fog = fog;
    }

    pub fn set_blend_mode(&mut self, blend: BlendMode) {
        self.state.pipeline.blend = blend;
    }

    pub fn set_backface_culling(&mut self, on: bool) {
        self.state.pipeline.cull_backfaces = on;
    }

    pub fn set_zwrite(&mut self, on: bool) {
        self.state.pipeline.depth_write = on;
    }

    pub fn set_ztest(&mut self, on: bool) {
        self.state.pipeline.depth_test = on;
    }

    pub fn set_clear_color(&mut self, color: Color) {
        self.state.clear_color = color;
    }

    // ── textures ──────────────────────────────────────────────────────────

    /// Binds a texture for subsequent draws; `None` unbinds.
    pub fn bind_texture(&mut self, texture: Option<(TextureHandle, SamplerState)>) {
        self.texture = texture;
    }

    pub fn unbind_texture(&mut self) {
        self.texture = None;
    }

    pub fn bound_texture(&self) -> Option<TextureHandle> {
        self.texture.map(|(h, _)| h)
    }

    pub fn create_texture(&mut self, label: &str, image: &RgbaImage, mipmap: bool) -> Result<TextureHandle, VideoError> {
        self.backend.create_texture(label, image, mipmap)
    }

    pub fn destroy_texture(&mut self, handle: TextureHandle) {
        if self.bound_texture() == Some(handle) {
            self.texture = None;
        }
        self.backend.destroy_texture(handle);
    }

    pub fn create_vertex_buffer(&mut self, label: &str, vertices: &[Vertex]) -> Result<BufferHandle, VideoError> {
        self.backend.create_vertex_buffer(label, vertices)
    }

    pub fn destroy_vertex_buffer(&mut self, handle: BufferHandle) {
        self.backend.destroy_vertex_buffer(handle);
    }

    // ── frames ────────────────────────────────────────────────────────────

    /// Starts a frame. Returns `Ok(false)` when this frame must be skipped.
    ///
    /// A device reported lost here is rebuilt before returning. Buffers
    /// retired since the last frame are destroyed first.
    pub fn begin_render(&mut self) -> Result<bool, VideoError> {
        if self.rendering {
            return Err(VideoError::InvalidState("begin_render called twice".into()));
        }
        if self.needs_restore {
            self.restore()?;
        }
        self.backend.collect_retired();

        match self.backend.begin_frame(self.state.clear_color) {
            FrameStatus::Ready => {
                self.rendering = true;
                self.world.clear();
                self.world.push(Mat4::IDENTITY);
                Ok(true)
            }
            FrameStatus::Skipped => Ok(false),
            FrameStatus::Lost => {
                log::warn!("{}: device lost at frame start", self.api());
                self.lose_device()?;
                Ok(false)
            }
        }
    }

    pub fn end_render(&mut self) -> Result<(), VideoError> {
        if !self.rendering {
            return Err(VideoError::NotRendering);
        }
        self.backend.end_frame();
        self.rendering = false;
        Ok(())
    }

    /// Draws one primitive with the current state.
    pub fn render(&mut self, renderable: &dyn Renderable) -> Result<(), VideoError> {
        let vertices: Vec<GpuVertex> = renderable
            .vertices()
            .iter()
            .map(|v| self.backend.prepare_vertex(v))
            .collect();
        self.submit(Geometry::Immediate(&vertices), renderable.topology(), renderable.material())
    }

    /// Draws `count` vertices of a retained buffer starting at `first`.
    pub fn render_buffer(
        &mut self,
        handle: BufferHandle,
        first: u32,
        count: u32,
        material: Option<&Material>,
    ) -> Result<(), VideoError> {
        self.submit(
            Geometry::Buffer { handle, first, count },
            Topology::Triangles,
            material,
        )
    }

    fn submit(&mut self, geometry: Geometry<'_>, topology: Topology, material: Option<&Material>) -> Result<(), VideoError> {
        if !self.rendering {
            log::warn!("draw outside begin_render/end_render rejected");
            return Err(VideoError::NotRendering);
        }
        if geometry.vertex_count() == 0 {
            return Ok(());
        }

        let projection = self.backend.to_device_clip(self.projection);
        let mut uniforms = self
            .state
            .uniforms(self.world_matrix(), self.view, projection, self.texture.is_some());
        if let Some(material) = material {
            material.apply(&mut uniforms);
        }

        self.backend.draw(&DrawCall {
            geometry,
            topology,
            uniforms,
            texture: self.texture,
            pipeline: self.state.pipeline,
            viewport: self.viewport,
        });
        Ok(())
    }
}

impl Drop for Video {
    fn drop(&mut self) {
        self.pre_uninit.clear();
        self.post_reinit.clear();
        self.backend.uninit();
    }
}
