use std::path::{Path, PathBuf};

use crate::database::{Database, DatabaseError, LoadError, ManifestEntry, ResourceId};
use crate::device::TextureHandle;
use crate::registry::Singleton;
use crate::video::{DeviceObserver, RenderBackend, TextureSettings, Video, VideoError};

use super::texture::{FrameOutOfRange, ImageTexture, Sprite, Texture};

/// Conventional location of the texture manifest.
pub const DEFAULT_TEXTURES: &str = "config/textures.xml";

const KIND: &str = "Textures";

/// Sprites may show other sprites; deeper chains are treated as cycles.
const MAX_SPRITE_DEPTH: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum TextureError {
    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error("sprite {0:?} has no frames")]
    EmptySprite(String),

    #[error("sprite {0:?} nests more than {MAX_SPRITE_DEPTH} levels deep")]
    TooDeep(String),

    #[error("{0:?} is not a sprite")]
    NotSprite(String),

    #[error(transparent)]
    Frame(#[from] FrameOutOfRange),

    #[error("failed to upload texture {name:?}")]
    Upload {
        name: String,
        #[source]
        source: VideoError,
    },
}

/// The texture database: images and sprites loaded from `<Textures>`
/// manifests and uploaded on first use.
///
/// Register it as a [`DeviceObserver`] so uploads survive device resets.
#[derive(Debug)]
pub struct Textures {
    db: Database<Texture>,
    settings: TextureSettings,
    /// Images released at the last device loss, uploaded again on restore.
    lost: Vec<ResourceId>,
}

impl Default for Textures {
    fn default() -> Self {
        Self::new()
    }
}

impl Textures {
    pub fn new() -> Self {
        Self::with_asset_root(".")
    }

    /// A texture database resolving image paths against `root`.
    pub fn with_asset_root(root: impl Into<PathBuf>) -> Self {
        Self {
            db: Database::new(KIND).with_asset_root(root),
            settings: TextureSettings::default(),
            lost: Vec::new(),
        }
    }

    pub fn database(&self) -> &Database<Texture> {
        &self.db
    }

    pub fn settings(&self) -> TextureSettings {
        self.settings
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), DatabaseError> {
        self.db.load_file(path)
    }

    pub fn load_str(&mut self, label: &str, text: &str) -> Result<(), DatabaseError> {
        self.db.load_str(label, text)
    }

    /// Removes a manifest, destroying the textures it provided.
    pub fn unload_file(&mut self, path: impl AsRef<Path>, video: &mut Video) -> Result<(), DatabaseError> {
        let evicted = self.db.unload_file(path)?;
        release(evicted, video);
        Ok(())
    }

    // ── lookup ────────────────────────────────────────────────────────────

    /// Id of `name`, decoding it on first request.
    ///
    /// Loading a sprite also stores each of its `<file>` frames as an entry
    /// of its own, named `sprite/<frame index>`.
    pub fn get_id(&mut self, name: &str) -> Result<ResourceId, DatabaseError> {
        let id = self.db.get_id(name, load_texture)?;

        let inline = match self.db.get_mut(id) {
            Some(Texture::Sprite(sprite)) => std::mem::take(&mut sprite.inline),
            _ => Vec::new(),
        };
        for (frame, image) in inline {
            let frame_name = format!("{name}/{frame}");
            let (frame_id, previous) = self.db.give(&frame_name, image.into(), false);
            if previous.is_some() {
                log::debug!("textures: sprite frame {frame_name:?} replaced an earlier entry");
            }
            if let Some(Texture::Sprite(sprite)) = self.db.get_mut(id) {
                sprite.set_frame_id(frame, frame_id);
            }
        }
        Ok(id)
    }

    /// The cached entry for `name`. Never loads.
    pub fn get(&self, name: &str) -> Option<&Texture> {
        self.db.get_by_name(name)
    }

    /// Stores a programmatic texture, destroying whatever it replaces.
    ///
    /// `keep` entries survive [`reload`](Self::reload).
    pub fn give(&mut self, name: &str, texture: impl Into<Texture>, keep: bool, video: &mut Video) -> ResourceId {
        let (id, previous) = self.db.give(name, texture.into(), keep);
        release(previous, video);
        id
    }

    pub fn is_sprite(&mut self, name: &str) -> Result<bool, TextureError> {
        let id = self.get_id(name)?;
        Ok(self.db.get(id).is_some_and(Texture::is_sprite))
    }

    pub fn frame_count(&mut self, name: &str) -> Result<usize, TextureError> {
        Ok(self.sprite_mut(name)?.frame_count())
    }

    pub fn current_frame(&mut self, name: &str) -> Result<usize, TextureError> {
        Ok(self.sprite_mut(name)?.current_frame())
    }

    pub fn set_current_frame(&mut self, name: &str, frame: usize) -> Result<(), TextureError> {
        Ok(self.sprite_mut(name)?.set_current_frame(frame)?)
    }

    fn sprite_mut(&mut self, name: &str) -> Result<&mut Sprite, TextureError> {
        let id = self.get_id(name)?;
        self.db
            .get_mut(id)
            .and_then(Texture::as_sprite_mut)
            .ok_or_else(|| TextureError::NotSprite(name.to_string()))
    }

    // ── binding ───────────────────────────────────────────────────────────

    /// Binds `name` for subsequent draws, uploading it if needed.
    ///
    /// On failure the texture unit is left empty and a warning is logged, so
    /// the frame goes on untextured.
    pub fn apply(&mut self, name: &str, video: &mut Video) -> bool {
        match self.try_apply(name, video) {
            Ok(_) => true,
            Err(e) => {
                log::warn!("texture {name:?} not applied: {e}");
                video.unbind_texture();
                false
            }
        }
    }

    /// Like [`apply`](Self::apply), but reports the failure instead.
    pub fn try_apply(&mut self, name: &str, video: &mut Video) -> Result<TextureHandle, TextureError> {
        let id = self.resolve_image(name)?;
        let mipmap = self.settings.mipmapping;
        let Some(Texture::Image(image)) = self.db.get_mut(id) else {
            return Err(DatabaseError::EntryNotFound {
                kind: KIND,
                name: name.to_string(),
            }
            .into());
        };

        let handle = image
            .realize(video.backend_mut(), mipmap)
            .map_err(|source| TextureError::Upload {
                name: name.to_string(),
                source,
            })?;
        video.bind_texture(Some((handle, self.settings.sampler(image.repeat()))));
        Ok(handle)
    }

    /// Follows sprites through their current frames down to an image.
    fn resolve_image(&mut self, name: &str) -> Result<ResourceId, TextureError> {
        let mut id = self.get_id(name)?;
        for _ in 0..MAX_SPRITE_DEPTH {
            let (index, frame) = match self.db.get(id) {
                Some(Texture::Image(_)) => return Ok(id),
                Some(Texture::Sprite(sprite)) => match sprite.current() {
                    Some(frame) => (sprite.current_frame(), frame.clone()),
                    None => {
                        let sprite_name = self.db.name_of(id).unwrap_or(name).to_string();
                        return Err(TextureError::EmptySprite(sprite_name));
                    }
                },
                None => {
                    return Err(DatabaseError::EntryNotFound {
                        kind: KIND,
                        name: name.to_string(),
                    }
                    .into());
                }
            };

            id = match frame.id.filter(|fid| self.db.get(*fid).is_some()) {
                Some(fid) => fid,
                None => {
                    let fid = self.get_id(&frame.name)?;
                    if let Some(Texture::Sprite(sprite)) = self.db.get_mut(id) {
                        sprite.set_frame_id(index, fid);
                    }
                    fid
                }
            };
        }
        Err(TextureError::TooDeep(name.to_string()))
    }

    // ── bulk operations ───────────────────────────────────────────────────

    /// Changes filtering; when anything differs every texture is reloaded so
    /// it is uploaded again with the new settings.
    pub fn set_texturing_mode(&mut self, settings: TextureSettings, video: &mut Video) -> Result<(), DatabaseError> {
        video.set_texture_settings(settings);
        if settings == self.settings {
            return Ok(());
        }
        log::info!(
            "textures: filtering changed (anisotropy {}, bilinear {}, mipmapping {})",
            settings.anisotropy,
            settings.bilinear,
            settings.mipmapping
        );
        self.settings = settings;
        self.reload(video)
    }

    /// Re-reads the manifests and destroys every cached texture except kept
    /// programmatic ones, which are only released.
    pub fn reload(&mut self, video: &mut Video) -> Result<(), DatabaseError> {
        let evicted = self.db.reload()?;
        release(evicted, video);
        for (_, texture) in self.db.iter_mut() {
            release_one(texture, video);
        }
        Ok(())
    }

    /// Destroys every cached texture. Manifests stay loaded.
    pub fn clear(&mut self, video: &mut Video) {
        let evicted = self.db.clear();
        release(evicted, video);
    }
}

fn release(textures: impl IntoIterator<Item = Texture>, video: &mut Video) {
    for mut texture in textures {
        release_one(&mut texture, video);
    }
}

fn release_one(texture: &mut Texture, video: &mut Video) {
    if let Texture::Image(image) = texture {
        if let Some(handle) = image.take_handle() {
            video.destroy_texture(handle);
        }
    }
}

fn load_texture(entry: &ManifestEntry) -> Result<Texture, LoadError> {
    if !entry.flag("is_sprite")? {
        let path = entry.field("filepath")?.text();
        let repeat = entry.flag("tile")?;
        return Ok(ImageTexture::open(entry.name(), &entry.resolve(path), repeat)?.into());
    }

    let mut sprite = Sprite::new();
    for child in entry.element().children() {
        match child.tag() {
            "is_sprite" => {}
            "token" => {
                sprite.append_frame(child.text());
            }
            "file" => {
                let frame = sprite.frame_count();
                let name = format!("{}/{frame}", entry.name());
                let path = child
                    .child("filepath")
                    .ok_or_else(|| format!("{name}: missing <filepath>"))?
                    .text();
                let repeat = match child.child("tile") {
                    Some(tile) => tile.to_bool()?,
                    None => false,
                };
                let image = ImageTexture::open(name.clone(), &entry.resolve(path), repeat)?;
                sprite.append_frame(name);
                sprite.inline.push((frame, image));
            }
            other => return Err(format!("{}: unexpected <{other}> in a sprite", entry.name()).into()),
        }
    }
    if sprite.frame_count() == 0 {
        return Err(format!("{}: sprite has no frames", entry.name()).into());
    }
    Ok(sprite.into())
}

impl DeviceObserver for Textures {
    fn on_device_lost(&mut self, backend: &mut dyn RenderBackend) {
        self.lost.clear();
        for (id, texture) in self.db.iter_mut() {
            if let Texture::Image(image) = texture {
                if image.is_realized() {
                    image.release(backend);
                    self.lost.push(id);
                }
            }
        }
        log::info!("textures: released {} uploads", self.lost.len());
    }

    fn on_device_restored(&mut self, backend: &mut dyn RenderBackend) {
        let mipmap = self.settings.mipmapping;
        let mut restored = 0;
        for id in std::mem::take(&mut self.lost) {
            let Some(Texture::Image(image)) = self.db.get_mut(id) else {
                continue;
            };
            match image.realize(backend, mipmap) {
                Ok(_) => restored += 1,
                Err(e) => log::warn!("textures: {:?} not restored: {e}", image.label()),
            }
        }
        log::info!("textures: restored {restored} uploads");
    }
}

impl Singleton for Textures {
    type Error = DatabaseError;

    fn create() -> Result<Self, DatabaseError> {
        let mut textures = Textures::new();
        super::load_default(&mut textures.db, DEFAULT_TEXTURES)?;
        Ok(textures)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::rc::Rc;

    use image::{Rgba, RgbaImage};

    use super::*;
    use crate::device::{HeadlessDevice, HeadlessProbe};
    use crate::video::{VideoApi, VideoConfig};

    const MANIFEST: &str = "<Textures>
        <crate><filepath>crate.png</filepath><tile>true</tile></crate>
        <grass><filepath>grass.png</filepath></grass>
        <boom>
          <is_sprite>true</is_sprite>
          <token>crate</token>
          <file><filepath>boom.png</filepath><tile>false</tile></file>
        </boom>
        <bad_sprite><is_sprite>1</is_sprite><sound>x</sound></bad_sprite>
        <missing><filepath>nowhere.png</filepath></missing>
    </Textures>";

    struct Fixture {
        _dir: tempfile::TempDir,
        textures: Textures,
        video: Video,
        probe: HeadlessProbe,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        for (file, width) in [("crate.png", 4), ("grass.png", 8), ("boom.png", 2)] {
            RgbaImage::from_pixel(width, 2, Rgba([255, 0, 0, 255]))
                .save(dir.path().join(file))
                .unwrap();
        }
        let mut textures = Textures::with_asset_root(dir.path());
        textures.load_str("test", MANIFEST).unwrap();

        let device = HeadlessDevice::new();
        let probe = device.probe();
        let config = VideoConfig {
            api: VideoApi::OpenGl,
            ..VideoConfig::default()
        };
        let video = Video::create(&config, Box::new(device)).unwrap();
        Fixture {
            _dir: dir,
            textures,
            video,
            probe,
        }
    }

    fn label_of(f: &Fixture, handle: TextureHandle) -> String {
        f.probe.texture(handle).unwrap().label
    }

    // ── loading ───────────────────────────────────────────────────────────

    #[test]
    fn nothing_is_decoded_until_requested() {
        let mut f = fixture();
        assert!(f.textures.database().is_empty());
        f.textures.get_id("crate").unwrap();
        assert_eq!(f.textures.database().len(), 1);
        assert_eq!(f.probe.stats().live_textures, 0);
    }

    #[test]
    fn image_entry_reads_tile_flag() {
        let mut f = fixture();
        f.textures.get_id("crate").unwrap();
        f.textures.get_id("grass").unwrap();
        assert!(f.textures.get("crate").and_then(Texture::as_image).unwrap().repeat());
        assert!(!f.textures.get("grass").and_then(Texture::as_image).unwrap().repeat());
    }

    #[test]
    fn sprite_frames_follow_manifest_order() {
        let mut f = fixture();
        assert!(f.textures.is_sprite("boom").unwrap());
        assert_eq!(f.textures.frame_count("boom").unwrap(), 2);

        let names: Vec<String> = f
            .textures
            .get("boom")
            .and_then(Texture::as_sprite)
            .unwrap()
            .frames()
            .iter()
            .map(|frame| frame.name.clone())
            .collect();
        assert_eq!(names, ["crate", "boom/1"]);
        assert!(f.textures.get("boom/1").is_some());
    }

    #[test]
    fn unexpected_sprite_element_fails_the_entry() {
        let mut f = fixture();
        let err = f.textures.get_id("bad_sprite").unwrap_err();
        assert!(matches!(err, DatabaseError::LoadEntryFailed { .. }));
        assert!(f.textures.get("bad_sprite").is_none());
    }

    #[test]
    fn sprite_operations_reject_images() {
        let mut f = fixture();
        assert!(matches!(
            f.textures.frame_count("grass"),
            Err(TextureError::NotSprite(_))
        ));
    }

    // ── binding ───────────────────────────────────────────────────────────

    #[test]
    fn apply_uploads_and_binds() {
        let mut f = fixture();
        assert!(f.textures.apply("grass", &mut f.video));
        let bound = f.video.bound_texture().unwrap();
        assert_eq!(label_of(&f, bound), "grass");

        assert!(f.textures.apply("grass", &mut f.video));
        assert_eq!(f.probe.stats().live_textures, 1);
    }

    #[test]
    fn failed_apply_unbinds() {
        let mut f = fixture();
        f.textures.apply("grass", &mut f.video);
        assert!(!f.textures.apply("nonexistent", &mut f.video));
        assert!(f.video.bound_texture().is_none());

        f.textures.apply("grass", &mut f.video);
        assert!(!f.textures.apply("missing", &mut f.video));
        assert!(f.video.bound_texture().is_none());
    }

    #[test]
    fn sprite_binds_its_current_frame() {
        let mut f = fixture();
        f.textures.apply("boom", &mut f.video);
        let first = f.video.bound_texture().unwrap();
        assert_eq!(label_of(&f, first), "crate");

        f.textures.set_current_frame("boom", 1).unwrap();
        f.textures.apply("boom", &mut f.video);
        let second = f.video.bound_texture().unwrap();
        assert_eq!(label_of(&f, second), "boom/1");

        assert!(matches!(
            f.textures.set_current_frame("boom", 2),
            Err(TextureError::Frame(_))
        ));
    }

    #[test]
    fn self_referencing_sprite_is_reported() {
        let mut f = fixture();
        let mut looping = Sprite::new();
        looping.append_frame("loop");
        f.textures.give("loop", looping, false, &mut f.video);
        assert!(matches!(
            f.textures.try_apply("loop", &mut f.video),
            Err(TextureError::TooDeep(_))
        ));
    }

    // ── lifecycle ─────────────────────────────────────────────────────────

    #[test]
    fn uploads_survive_device_loss() {
        let mut f = fixture();
        f.textures.apply("crate", &mut f.video);
        f.textures.get_id("grass").unwrap();
        let before = f.video.bound_texture().unwrap();

        let shared = Rc::new(RefCell::new(std::mem::take(&mut f.textures)));
        f.video.lend_observer(&shared);
        f.video.lose_device().unwrap();

        assert!(f.video.bound_texture().is_none());
        assert_eq!(f.probe.stats().live_textures, 1);
        let after = shared.borrow().get("crate").and_then(Texture::as_image).unwrap().handle();
        assert!(after.is_some_and(|h| h != before));
        assert!(!shared.borrow().get("grass").and_then(Texture::as_image).unwrap().is_realized());
    }

    #[test]
    fn texturing_mode_change_reloads() {
        let mut f = fixture();
        f.textures.apply("crate", &mut f.video);

        let same = f.textures.settings();
        f.textures.set_texturing_mode(same, &mut f.video).unwrap();
        assert_eq!(f.probe.stats().live_textures, 1);

        let changed = TextureSettings {
            mipmapping: false,
            ..same
        };
        f.textures.set_texturing_mode(changed, &mut f.video).unwrap();
        assert_eq!(f.probe.stats().live_textures, 0);
        assert!(f.textures.database().is_empty());
        assert_eq!(f.video.texture_settings(), changed);
    }

    #[test]
    fn kept_entries_survive_reload_unrealized() {
        let mut f = fixture();
        let dot = ImageTexture::new("dot", RgbaImage::new(1, 1), false);
        f.textures.give("dot", dot, true, &mut f.video);
        f.textures.apply("dot", &mut f.video);
        f.textures.apply("grass", &mut f.video);

        f.textures.reload(&mut f.video).unwrap();
        assert_eq!(f.probe.stats().live_textures, 0);
        assert!(!f.textures.get("dot").and_then(Texture::as_image).unwrap().is_realized());
        assert!(f.textures.get("grass").is_none());
    }
}
