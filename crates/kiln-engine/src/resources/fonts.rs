use std::path::{Path, PathBuf};

use glam::{UVec2, Vec2};

use crate::coords::Color;
use crate::database::{Database, DatabaseError, LoadError, ManifestEntry, ResourceId};
use crate::registry::Singleton;
use crate::video::{DeviceObserver, RenderBackend, Video, VideoConfig, VideoError};

use super::font::{Font, Justify, VirtualScreen};

/// Conventional location of the font manifest.
pub const DEFAULT_FONTS: &str = "config/fonts.xml";

const KIND: &str = "Fonts";

/// Height of the virtual screen a font is sized against, for a window of
/// `window` pixels.
///
/// Width only: the width scaled by the window's aspect ratio. Height only:
/// the height. Both: whichever yields the larger height. Neither: the
/// window height.
pub fn resolve_virtual_screen_height(width: Option<f32>, height: Option<f32>, window: UVec2) -> f32 {
    VirtualScreen { width, height }.resolve_height(window)
}

/// The font database, rasterizing faces for the current window.
#[derive(Debug)]
pub struct Fonts {
    db: Database<Font>,
    window: UVec2,
    lost: Vec<ResourceId>,
}

impl Fonts {
    /// A font database rasterizing for a window of `window` pixels.
    pub fn new(window: UVec2) -> Self {
        Self::with_asset_root(".", window)
    }

    pub fn with_asset_root(root: impl Into<PathBuf>, window: UVec2) -> Self {
        Self {
            db: Database::new(KIND).with_asset_root(root),
            window,
            lost: Vec::new(),
        }
    }

    pub fn database(&self) -> &Database<Font> {
        &self.db
    }

    pub fn window(&self) -> UVec2 {
        self.window
    }

    /// Window size used for fonts loaded from now on.
    pub fn set_window(&mut self, window: UVec2) {
        self.window = window;
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), DatabaseError> {
        self.db.load_file(path)
    }

    pub fn load_str(&mut self, label: &str, text: &str) -> Result<(), DatabaseError> {
        self.db.load_str(label, text)
    }

    pub fn get_or_load(&mut self, name: &str) -> Result<&mut Font, DatabaseError> {
        let window = self.window;
        self.db.get_or_load(name, |entry: &ManifestEntry| load_font(entry, window))
    }

    /// The cached font. Never loads.
    pub fn get(&self, name: &str) -> Option<&Font> {
        self.db.get_by_name(name)
    }

    /// Stores a programmatic font, destroying whatever it replaces.
    pub fn give(&mut self, name: &str, font: Font, keep: bool, video: &mut Video) -> ResourceId {
        let (id, previous) = self.db.give(name, font, keep);
        if let Some(mut previous) = previous {
            previous.release(video.backend_mut());
        }
        id
    }

    /// Draws `text` with the named font. A font that cannot be loaded is
    /// reported with a warning and the text is skipped.
    pub fn render_text(
        &mut self,
        name: &str,
        video: &mut Video,
        text: &str,
        position: Vec2,
        color: Color,
        justify: Justify,
    ) -> Result<(), VideoError> {
        match self.get_or_load(name) {
            Ok(font) => font.render_text(video, text, position, color, justify),
            Err(e) => {
                log::warn!("text skipped: {e}");
                Ok(())
            }
        }
    }

    pub fn reload(&mut self, video: &mut Video) -> Result<(), DatabaseError> {
        let backend = video.backend_mut();
        for mut font in self.db.reload()? {
            font.release(backend);
        }
        for (_, font) in self.db.iter_mut() {
            font.release(backend);
        }
        Ok(())
    }

    pub fn clear(&mut self, video: &mut Video) {
        let backend = video.backend_mut();
        for mut font in self.db.clear() {
            font.release(backend);
        }
    }
}

fn load_font(entry: &ManifestEntry, window: UVec2) -> Result<Font, LoadError> {
    let path = entry.resolve(entry.field("filepath")?.text());
    let height = entry.field("height")?.to_f32()?;

    let mut screen = VirtualScreen::default();
    if let Some(vs) = entry.get("virtual_screen") {
        screen.width = vs.child("width").map(|w| w.to_f32()).transpose()?;
        screen.height = vs.child("height").map(|h| h.to_f32()).transpose()?;
    }

    let bytes = std::fs::read(&path).map_err(|e| format!("{}: {e}", path.display()))?;
    Font::from_bytes(entry.name(), &bytes, height, screen, window)
}

impl DeviceObserver for Fonts {
    fn on_device_lost(&mut self, backend: &mut dyn RenderBackend) {
        self.lost.clear();
        for (id, font) in self.db.iter_mut() {
            if font.is_realized() {
                font.release(backend);
                self.lost.push(id);
            }
        }
    }

    fn on_device_restored(&mut self, backend: &mut dyn RenderBackend) {
        if let Some(session) = backend.session() {
            self.window = session.size;
        }
        let window = self.window;
        for (_, font) in self.db.iter_mut() {
            if font.window() != window && window.y > 0 {
                font.rerasterize(window, backend);
            }
        }
        for id in std::mem::take(&mut self.lost) {
            if let Some(font) = self.db.get_mut(id) {
                if let Err(e) = font.realize(backend) {
                    log::warn!("font {:?} not restored: {e}", font.name());
                }
            }
        }
    }
}

impl Singleton for Fonts {
    type Error = DatabaseError;

    fn create() -> Result<Self, DatabaseError> {
        let mut fonts = Fonts::new(VideoConfig::default().resolution);
        super::load_default(&mut fonts.db, DEFAULT_FONTS)?;
        Ok(fonts)
    }
}
