use std::path::Path;

use glam::UVec2;
use image::RgbaImage;

use crate::database::{LoadError, ResourceId};
use crate::device::TextureHandle;
use crate::video::{RenderBackend, VideoError};

/// Decoded pixels plus the device texture they are currently uploaded as.
///
/// The pixels are kept for the texture's whole lifetime so the upload can be
/// repeated after a device reset.
#[derive(Debug, Clone)]
pub struct ImageTexture {
    label: String,
    pixels: RgbaImage,
    repeat: bool,
    handle: Option<TextureHandle>,
}

impl ImageTexture {
    pub fn new(label: impl Into<String>, pixels: RgbaImage, repeat: bool) -> Self {
        Self {
            label: label.into(),
            pixels,
            repeat,
            handle: None,
        }
    }

    /// Decodes an image file (PNG, JPEG, BMP or TGA).
    pub fn open(label: impl Into<String>, path: &Path, repeat: bool) -> Result<Self, LoadError> {
        let pixels = image::open(path)
            .map_err(|e| format!("{}: {e}", path.display()))?
            .to_rgba8();
        Ok(Self::new(label, pixels, repeat))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pixels(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn size(&self) -> UVec2 {
        UVec2::new(self.pixels.width(), self.pixels.height())
    }

    /// Whether texture coordinates outside `[0, 1]` wrap.
    pub fn repeat(&self) -> bool {
        self.repeat
    }

    pub fn handle(&self) -> Option<TextureHandle> {
        self.handle
    }

    pub fn is_realized(&self) -> bool {
        self.handle.is_some()
    }

    /// Uploads the pixels unless already uploaded.
    pub fn realize(&mut self, backend: &mut dyn RenderBackend, mipmap: bool) -> Result<TextureHandle, VideoError> {
        if let Some(handle) = self.handle {
            return Ok(handle);
        }
        let handle = backend.create_texture(&self.label, &self.pixels, mipmap)?;
        log::debug!("texture {:?} uploaded as {handle:?}", self.label);
        self.handle = Some(handle);
        Ok(handle)
    }

    pub(crate) fn take_handle(&mut self) -> Option<TextureHandle> {
        self.handle.take()
    }

    /// Destroys the device texture. The pixels stay.
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(handle) = self.handle.take() {
            backend.destroy_texture(handle);
        }
    }
}

/// `set_current_frame` was given an index past the last frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("frame {frame} out of range for a sprite with {count} frames")]
pub struct FrameOutOfRange {
    pub frame: usize,
    pub count: usize,
}

/// One frame of a sprite: the name of another texture and, once looked up,
/// its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpriteFrame {
    pub name: String,
    pub(crate) id: Option<ResourceId>,
}

/// An animation over other textures, one of which is current.
#[derive(Debug, Clone, Default)]
pub struct Sprite {
    frames: Vec<SpriteFrame>,
    current: usize,
    /// Frames decoded from the manifest record itself, waiting to be stored
    /// as their own entries.
    pub(crate) inline: Vec<(usize, ImageTexture)>,
}

impl Sprite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a frame showing the texture named `name`.
    pub fn append_frame(&mut self, name: impl Into<String>) -> usize {
        self.frames.push(SpriteFrame {
            name: name.into(),
            id: None,
        });
        self.frames.len() - 1
    }

    pub fn frames(&self) -> &[SpriteFrame] {
        &self.frames
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current
    }

    pub fn set_current_frame(&mut self, frame: usize) -> Result<(), FrameOutOfRange> {
        if frame >= self.frames.len() {
            return Err(FrameOutOfRange {
                frame,
                count: self.frames.len(),
            });
        }
        self.current = frame;
        Ok(())
    }

    pub(crate) fn current(&self) -> Option<&SpriteFrame> {
        self.frames.get(self.current)
    }

    pub(crate) fn set_frame_id(&mut self, index: usize, id: ResourceId) {
        if let Some(frame) = self.frames.get_mut(index) {
            frame.id = Some(id);
        }
    }
}

/// A texture database entry.
#[derive(Debug, Clone)]
pub enum Texture {
    Image(ImageTexture),
    Sprite(Sprite),
}

impl Texture {
    pub fn is_sprite(&self) -> bool {
        matches!(self, Texture::Sprite(_))
    }

    pub fn as_image(&self) -> Option<&ImageTexture> {
        match self {
            Texture::Image(image) => Some(image),
            Texture::Sprite(_) => None,
        }
    }

    pub fn as_sprite(&self) -> Option<&Sprite> {
        match self {
            Texture::Sprite(sprite) => Some(sprite),
            Texture::Image(_) => None,
        }
    }

    pub fn as_sprite_mut(&mut self) -> Option<&mut Sprite> {
        match self {
            Texture::Sprite(sprite) => Some(sprite),
            Texture::Image(_) => None,
        }
    }

    /// Releases the device texture of an image. Sprites own none.
    pub fn release(&mut self, backend: &mut dyn RenderBackend) {
        if let Texture::Image(image) = self {
            image.release(backend);
        }
    }
}

impl From<ImageTexture> for Texture {
    fn from(image: ImageTexture) -> Self {
        Texture::Image(image)
    }
}

impl From<Sprite> for Texture {
    fn from(sprite: Sprite) -> Self {
        Texture::Sprite(sprite)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceParams, HeadlessDevice, HeadlessProbe};
    use crate::video::GlBackend;

    fn backend() -> (GlBackend, HeadlessProbe) {
        let device = HeadlessDevice::new();
        let probe = device.probe();
        let mut backend = GlBackend::new(Box::new(device));
        backend.init(&DeviceParams::default()).unwrap();
        (backend, probe)
    }

    fn checker() -> ImageTexture {
        ImageTexture::new("checker", RgbaImage::new(4, 2), true)
    }

    // ── images ────────────────────────────────────────────────────────────

    #[test]
    fn realize_uploads_once() {
        let (mut backend, probe) = backend();
        let mut tex = checker();
        let first = tex.realize(&mut backend, false).unwrap();
        let second = tex.realize(&mut backend, false).unwrap();
        assert_eq!(first, second);
        assert_eq!(probe.stats().live_textures, 1);
        assert_eq!(probe.texture(first).unwrap().width, 4);
    }

    #[test]
    fn release_keeps_pixels() {
        let (mut backend, probe) = backend();
        let mut tex = checker();
        tex.realize(&mut backend, false).unwrap();
        tex.release(&mut backend);
        assert!(!tex.is_realized());
        assert_eq!(probe.stats().live_textures, 0);
        assert_eq!(tex.size(), UVec2::new(4, 2));

        tex.realize(&mut backend, false).unwrap();
        assert_eq!(probe.stats().live_textures, 1);
    }

    #[test]
    fn open_reports_path_of_missing_file() {
        let err = ImageTexture::open("x", Path::new("no/such/file.png"), false).unwrap_err();
        assert!(err.to_string().contains("file.png"));
    }

    #[test]
    fn open_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dot.png");
        RgbaImage::from_pixel(3, 5, image::Rgba([1, 2, 3, 255])).save(&path).unwrap();

        let tex = ImageTexture::open("dot", &path, false).unwrap();
        assert_eq!(tex.size(), UVec2::new(3, 5));
        assert_eq!(tex.pixels().get_pixel(0, 0).0, [1, 2, 3, 255]);
    }

    // ── sprites ───────────────────────────────────────────────────────────

    #[test]
    fn frames_are_appended_in_order() {
        let mut sprite = Sprite::new();
        assert_eq!(sprite.append_frame("a"), 0);
        assert_eq!(sprite.append_frame("b"), 1);
        let names: Vec<&str> = sprite.frames().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
    }

    #[test]
    fn current_frame_is_range_checked() {
        let mut sprite = Sprite::new();
        sprite.append_frame("a");
        sprite.append_frame("b");
        sprite.set_current_frame(1).unwrap();
        assert_eq!(sprite.current_frame(), 1);
        assert_eq!(
            sprite.set_current_frame(2),
            Err(FrameOutOfRange { frame: 2, count: 2 })
        );
        assert_eq!(sprite.current_frame(), 1);
    }

    #[test]
    fn sprite_release_is_a_no_op() {
        let (mut backend, _) = backend();
        let mut texture = Texture::from(Sprite::new());
        texture.release(&mut backend);
        assert!(texture.is_sprite());
        assert!(texture.as_image().is_none());
    }
}
