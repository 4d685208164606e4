use std::cell::RefCell;
use std::convert::Infallible;
use std::rc::{Rc, Weak};

use crate::device::BufferHandle;
use crate::registry::Singleton;
use crate::video::{
    DeviceObserver, Material, Quad, RenderBackend, Renderable, RetiredBuffers, Triangle, Vertex, Video, VideoError,
};

use super::textures::Textures;

/// A triangle waiting in a [`VertexBuffer`].
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedTriangle {
    pub vertices: [Vertex; 3],
    pub material: Option<Material>,
    /// Name of the texture applied while drawing it.
    pub texture: Option<String>,
}

/// A run of triangles drawn with one texture and material.
#[derive(Debug, Clone, PartialEq)]
struct Batch {
    texture: Option<String>,
    material: Option<Material>,
    first: u32,
    count: u32,
}

/// A device buffer and the device session it belongs to.
#[derive(Debug)]
struct Upload {
    handle: BufferHandle,
    generation: u64,
    retired: RetiredBuffers,
}

/// Static triangles uploaded once and drawn in batches.
///
/// Triangles are grouped by texture and material when the buffer is first
/// drawn. Adding triangles afterwards rebuilds the upload at the next draw.
/// Dropping a realized buffer hands its upload back to the backend, which
/// destroys it at the next frame.
#[derive(Debug)]
pub struct VertexBuffer {
    label: String,
    triangles: Vec<BufferedTriangle>,
    batches: Vec<Batch>,
    upload: Option<Upload>,
    batches_stale: bool,
    upload_stale: bool,
}

impl VertexBuffer {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            triangles: Vec::new(),
            batches: Vec::new(),
            upload: None,
            batches_stale: false,
            upload_stale: false,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn give_triangle(&mut self, triangle: &Triangle, texture: Option<&str>) {
        self.push(triangle.corners, triangle.material, texture);
    }

    /// Adds a quad as the two triangles of its fan.
    pub fn give_quad(&mut self, quad: &Quad, texture: Option<&str>) {
        for tri in quad.vertices().chunks_exact(3) {
            self.push([tri[0], tri[1], tri[2]], quad.material, texture);
        }
    }

    fn push(&mut self, vertices: [Vertex; 3], material: Option<Material>, texture: Option<&str>) {
        self.triangles.push(BufferedTriangle {
            vertices,
            material,
            texture: texture.map(str::to_string),
        });
        self.batches_stale = true;
        self.upload_stale = true;
    }

    pub fn triangles(&self) -> &[BufferedTriangle] {
        &self.triangles
    }

    pub fn len(&self) -> usize {
        self.triangles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.triangles.is_empty()
    }

    pub fn is_realized(&self) -> bool {
        self.upload.is_some()
    }

    /// Number of draws one [`render`](Self::render) issues.
    pub fn batch_count(&mut self) -> usize {
        self.prerender();
        self.batches.len()
    }

    /// Untextured triangles first, then by texture name; equal neighbours
    /// share a batch.
    fn prerender(&mut self) {
        if !self.batches_stale {
            return;
        }
        self.triangles.sort_by(|a, b| a.texture.cmp(&b.texture));

        self.batches.clear();
        for (i, tri) in self.triangles.iter().enumerate() {
            match self.batches.last_mut() {
                Some(batch) if batch.texture == tri.texture && batch.material == tri.material => {
                    batch.count += 3;
                }
                _ => self.batches.push(Batch {
                    texture: tri.texture.clone(),
                    material: tri.material,
                    first: (i * 3) as u32,
                    count: 3,
                }),
            }
        }
        self.batches_stale = false;
    }

    /// Uploads the triangles unless an up-to-date upload exists.
    ///
    /// An upload left over from an earlier device session is discarded
    /// without touching the current device.
    pub fn realize(&mut self, backend: &mut dyn RenderBackend) -> Result<BufferHandle, VideoError> {
        self.prerender();
        let generation = backend.core().generation();
        if self.upload.as_ref().is_some_and(|u| u.generation != generation) {
            log::debug!("vertex buffer {:?}: dropping upload from a previous device", self.label);
            self.upload = None;
        }
        if self.upload_stale {
            self.release(backend);
        }
        if let Some(upload) = &self.upload {
            return Ok(upload.handle);
        }

        let vertices: Vec<Vertex> = self.triangles.iter().flat_map(|t| t.vertices).collect();
        let handle = backend.create_vertex_buffer(&self.label, &vertices)?;
        log::debug!(
            "vertex buffer {:?}: {} triangles in {} batches",
            self.label,
            self.triangles.len(),
            self.batches.len()
        );
        self.upload = Some(Upload {
            handle,
            generation,
            retired: backend.core().retired_buffers().clone(),
        });
        self.upload_stale = false;
        Ok(handle)
    }

    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        let Some(upload) = self.upload.take() else {
            return;
        };
        if backend.is_open() && upload.generation == backend.core().generation() {
            backend.destroy_vertex_buffer(upload.handle);
        }
    }

    /// Draws every batch, applying its texture through `textures`.
    ///
    /// A failed upload skips the draw with a warning.
    pub fn render(&mut self, video: &mut Video, textures: &mut Textures) -> Result<(), VideoError> {
        if !video.is_rendering() {
            log::warn!("vertex buffer {:?} drawn outside a frame", self.label);
            return Err(VideoError::NotRendering);
        }
        if self.triangles.is_empty() {
            return Ok(());
        }
        let handle = match self.realize(video.backend_mut()) {
            Ok(handle) => handle,
            Err(e) => {
                log::warn!("vertex buffer {:?} skipped: {e}", self.label);
                return Ok(());
            }
        };

        for batch in &self.batches {
            match &batch.texture {
                Some(name) => {
                    textures.apply(name, video);
                }
                None => video.unbind_texture(),
            }
            video.render_buffer(handle, batch.first, batch.count, batch.material.as_ref())?;
        }
        video.unbind_texture();
        Ok(())
    }
}

impl Drop for VertexBuffer {
    fn drop(&mut self) {
        if let Some(upload) = self.upload.take() {
            upload.retired.retire(upload.generation, upload.handle);
        }
    }
}

/// Tracks every live vertex buffer so their uploads follow device resets.
#[derive(Debug, Default)]
pub struct VertexBuffers {
    buffers: Vec<Weak<RefCell<VertexBuffer>>>,
    lost: Vec<Weak<RefCell<VertexBuffer>>>,
}

impl VertexBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new, empty buffer. The manager holds it weakly.
    pub fn create(&mut self, label: impl Into<String>) -> Rc<RefCell<VertexBuffer>> {
        self.buffers.retain(|b| b.strong_count() > 0);
        let buffer = Rc::new(RefCell::new(VertexBuffer::new(label)));
        self.buffers.push(Rc::downgrade(&buffer));
        buffer
    }

    /// Number of buffers still alive.
    pub fn live(&self) -> usize {
        self.buffers.iter().filter(|b| b.strong_count() > 0).count()
    }
}

impl DeviceObserver for VertexBuffers {
    fn on_device_lost(&mut self, backend: &mut dyn RenderBackend) {
        self.lost.clear();
        for weak in &self.buffers {
            let Some(buffer) = weak.upgrade() else {
                continue;
            };
            let Ok(mut buffer) = buffer.try_borrow_mut() else {
                log::warn!("vertex buffer busy during device loss; it re-uploads at its next draw");
                continue;
            };
            if buffer.is_realized() {
                buffer.release(backend);
                self.lost.push(Weak::clone(weak));
            }
        }
        log::info!("vertex buffers: released {} uploads", self.lost.len());
    }

    fn on_device_restored(&mut self, backend: &mut dyn RenderBackend) {
        for buffer in std::mem::take(&mut self.lost).iter().filter_map(Weak::upgrade) {
            let Ok(mut buffer) = buffer.try_borrow_mut() else {
                continue;
            };
            if let Err(e) = buffer.realize(backend) {
                log::warn!("vertex buffer {:?} not restored: {e}", buffer.label());
            }
        }
    }
}

impl Singleton for VertexBuffers {
    type Error = Infallible;

    fn create() -> Result<Self, Infallible> {
        Ok(Self::new())
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec2;
    use image::RgbaImage;

    use super::*;
    use crate::coords::Color;
    use crate::device::{HeadlessDevice, HeadlessProbe};
    use crate::resources::ImageTexture;
    use crate::video::{VideoApi, VideoConfig};

    fn video(api: VideoApi) -> (Video, HeadlessProbe) {
        let device = HeadlessDevice::new();
        let probe = device.probe();
        let config = VideoConfig {
            api,
            ..VideoConfig::default()
        };
        (Video::create(&config, Box::new(device)).unwrap(), probe)
    }

    fn tri(x: f32) -> Triangle {
        Triangle::new([
            Vertex::at_2d(x, 0.0, Color::white()),
            Vertex::at_2d(x + 1.0, 0.0, Color::white()),
            Vertex::at_2d(x, 1.0, Color::white()),
        ])
    }

    fn textures(video: &mut Video) -> Textures {
        let mut textures = Textures::new();
        for name in ["a", "b"] {
            let image = ImageTexture::new(name, RgbaImage::new(2, 2), false);
            textures.give(name, image, true, video);
        }
        textures
    }

    // ── batching ──────────────────────────────────────────────────────────

    #[test]
    fn quad_adds_two_triangles() {
        let mut vb = VertexBuffer::new("quad");
        vb.give_quad(&Quad::rect_2d(Vec2::ZERO, Vec2::ONE, Color::white()), None);
        assert_eq!(vb.len(), 2);
    }

    #[test]
    fn triangles_group_by_texture_then_material() {
        let red = Material::colored(Color::rgba(1.0, 0.0, 0.0, 1.0));
        let mut vb = VertexBuffer::new("mixed");
        vb.give_triangle(&tri(0.0), Some("b"));
        vb.give_triangle(&tri(1.0), None);
        vb.give_triangle(&tri(2.0), Some("a"));
        vb.give_triangle(&tri(3.0), Some("b"));
        vb.give_triangle(&tri(4.0).with_material(red), Some("b"));

        assert_eq!(vb.batch_count(), 4);
        let order: Vec<Option<&str>> = vb.triangles().iter().map(|t| t.texture.as_deref()).collect();
        assert_eq!(order, [None, Some("a"), Some("b"), Some("b"), Some("b")]);
        // Stable within a texture.
        assert_eq!(vb.triangles()[2].vertices[0].position.x, 0.0);
    }

    // ── drawing ───────────────────────────────────────────────────────────

    #[test]
    fn render_uploads_once_and_draws_each_batch() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let mut textures = textures(&mut video);
        let mut vb = VertexBuffer::new("scene");
        vb.give_triangle(&tri(0.0), Some("a"));
        vb.give_triangle(&tri(1.0), None);

        for _ in 0..2 {
            assert!(video.begin_render().unwrap());
            vb.render(&mut video, &mut textures).unwrap();
            video.end_render().unwrap();
        }

        assert_eq!(probe.stats().live_buffers, 1);
        let draws = probe.draws();
        assert_eq!(draws.len(), 2);
        assert!(draws[0].texture.is_none());
        assert!(draws[1].texture.is_some());
        assert_eq!(draws[1].vertices.len(), 3);
        assert!(video.bound_texture().is_none());
    }

    #[test]
    fn adding_after_upload_rebuilds() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let mut textures = Textures::new();
        let mut vb = VertexBuffer::new("grow");
        vb.give_triangle(&tri(0.0), None);

        video.begin_render().unwrap();
        vb.render(&mut video, &mut textures).unwrap();
        vb.give_triangle(&tri(1.0), None);
        vb.render(&mut video, &mut textures).unwrap();
        video.end_render().unwrap();

        assert_eq!(probe.stats().live_buffers, 1);
        assert_eq!(probe.draws().last().unwrap().vertices.len(), 6);
    }

    #[test]
    fn counting_batches_keeps_the_pending_rebuild() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let mut textures = Textures::new();
        let mut vb = VertexBuffer::new("counted");
        vb.give_triangle(&tri(0.0), None);

        video.begin_render().unwrap();
        vb.render(&mut video, &mut textures).unwrap();
        video.end_render().unwrap();

        vb.give_triangle(&tri(1.0), None);
        assert_eq!(vb.batch_count(), 1);

        video.begin_render().unwrap();
        vb.render(&mut video, &mut textures).unwrap();
        video.end_render().unwrap();

        let handle = vb.realize(video.backend_mut()).unwrap();
        assert_eq!(probe.buffer(handle).map(|v| v.len()), Some(6));
        assert_eq!(probe.draws()[0].vertices.len(), 6);
        assert_eq!(probe.stats().live_buffers, 1);
    }

    #[test]
    fn missing_texture_draws_untextured() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let mut textures = Textures::new();
        let mut vb = VertexBuffer::new("orphan");
        vb.give_triangle(&tri(0.0), Some("nowhere"));

        video.begin_render().unwrap();
        vb.render(&mut video, &mut textures).unwrap();
        video.end_render().unwrap();
        assert!(probe.draws()[0].texture.is_none());
    }

    #[test]
    fn render_outside_frame_is_rejected() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let mut vb = VertexBuffer::new("early");
        vb.give_triangle(&tri(0.0), None);
        let err = vb.render(&mut video, &mut Textures::new()).unwrap_err();
        assert_eq!(err, VideoError::NotRendering);
        assert_eq!(probe.stats().live_buffers, 0);
    }

    #[test]
    fn dx9_upload_packs_colors() {
        let (mut video, probe) = video(VideoApi::Dx9);
        let mut vb = VertexBuffer::new("packed");
        let odd = Color::rgba(0.3, 0.3, 0.3, 1.0);
        vb.give_triangle(
            &Triangle::new([
                Vertex::at_2d(0.0, 0.0, odd),
                Vertex::at_2d(1.0, 0.0, odd),
                Vertex::at_2d(0.0, 1.0, odd),
            ]),
            None,
        );
        video.begin_render().unwrap();
        vb.render(&mut video, &mut Textures::new()).unwrap();
        video.end_render().unwrap();
        assert_eq!(probe.draws()[0].vertices[0].color, odd.quantized().to_array());
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[test]
    fn manager_restores_realized_buffers() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let manager = Rc::new(RefCell::new(VertexBuffers::new()));
        video.lend_observer(&manager);

        let drawn = manager.borrow_mut().create("drawn");
        let idle = manager.borrow_mut().create("idle");
        drawn.borrow_mut().give_triangle(&tri(0.0), None);
        idle.borrow_mut().give_triangle(&tri(0.0), None);

        video.begin_render().unwrap();
        drawn.borrow_mut().render(&mut video, &mut Textures::new()).unwrap();
        video.end_render().unwrap();

        video.lose_device().unwrap();
        assert!(drawn.borrow().is_realized());
        assert!(!idle.borrow().is_realized());
        assert_eq!(probe.stats().live_buffers, 1);
    }

    #[test]
    fn dropping_a_realized_buffer_frees_it_at_the_next_frame() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let mut manager = VertexBuffers::new();
        let vb = manager.create("short-lived");
        vb.borrow_mut().give_triangle(&tri(0.0), None);

        video.begin_render().unwrap();
        vb.borrow_mut().render(&mut video, &mut Textures::new()).unwrap();
        video.end_render().unwrap();
        assert_eq!(probe.stats().live_buffers, 1);

        drop(vb);
        assert_eq!(video.backend().core().retired_buffers().len(), 1);
        video.begin_render().unwrap();
        video.end_render().unwrap();
        assert_eq!(probe.stats().live_buffers, 0);
        assert!(video.backend().core().retired_buffers().is_empty());
    }

    #[test]
    fn buffer_busy_during_loss_reuploads_on_the_new_device() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let manager = Rc::new(RefCell::new(VertexBuffers::new()));
        video.lend_observer(&manager);
        let vb = manager.borrow_mut().create("busy");
        vb.borrow_mut().give_triangle(&tri(0.0), None);

        let old = vb.borrow_mut().realize(video.backend_mut()).unwrap();
        {
            let _held = vb.borrow();
            video.lose_device().unwrap();
        }
        assert!(probe.buffer(old).is_none());

        let fresh = vb.borrow_mut().realize(video.backend_mut()).unwrap();
        assert_ne!(fresh, old);
        assert_eq!(probe.buffer(fresh).map(|v| v.len()), Some(3));
        assert_eq!(probe.stats().live_buffers, 1);
    }

    #[test]
    fn upload_from_a_closed_device_is_not_retired_into_the_next() {
        let (mut video, probe) = video(VideoApi::OpenGl);
        let mut vb = VertexBuffer::new("orphaned");
        vb.give_triangle(&tri(0.0), None);
        vb.realize(video.backend_mut()).unwrap();

        video.lose_device().unwrap();
        let survivor = video
            .create_vertex_buffer("survivor", &[Vertex::default(); 3])
            .unwrap();
        drop(vb);
        assert_eq!(video.backend().core().retired_buffers().len(), 1);
        video.begin_render().unwrap();
        video.end_render().unwrap();
        assert!(video.backend().core().retired_buffers().is_empty());
        assert!(probe.buffer(survivor).is_some());
        assert_eq!(probe.stats().live_buffers, 1);
    }

    #[test]
    fn dropped_buffers_are_forgotten() {
        let mut manager = VertexBuffers::new();
        let kept = manager.create("kept");
        drop(manager.create("temporary"));
        assert_eq!(manager.live(), 1);
        drop(kept);
        assert_eq!(manager.live(), 0);
    }
}
