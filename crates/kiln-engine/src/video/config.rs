use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use glam::UVec2;

use crate::database::Element;
use crate::device::{DeviceParams, SamplerState};

use super::backend::VideoApi;

/// Conventional location of the video configuration.
pub const DEFAULT_VIDEO_CONFIG: &str = "config/video.xml";

const ROOT: &str = "Zenilib";
const MAX_SAMPLES: u32 = 16;
const MAX_ANISOTROPY: u16 = 16;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to access {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] roxmltree::Error),

    #[error("expected <{expected}> root element, found <{found}>")]
    WrongRoot { expected: &'static str, found: String },
}

/// Texture filtering chosen by the user.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TextureSettings {
    /// 1 disables anisotropic filtering.
    pub anisotropy: u16,
    pub bilinear: bool,
    pub mipmapping: bool,
}

impl Default for TextureSettings {
    fn default() -> Self {
        Self {
            anisotropy: 1,
            bilinear: true,
            mipmapping: true,
        }
    }
}

impl TextureSettings {
    /// Sampler for a texture that tiles (`repeat`) or clamps.
    pub fn sampler(&self, repeat: bool) -> SamplerState {
        SamplerState {
            bilinear: self.bilinear,
            mipmapping: self.mipmapping,
            anisotropy: self.anisotropy.max(1),
            repeat,
        }
    }
}

/// Startup video settings.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoConfig {
    pub api: VideoApi,
    pub resolution: UVec2,
    pub fullscreen: bool,
    /// Requested MSAA samples; the backend may settle for fewer.
    pub multisampling: u32,
    pub vsync: bool,
    pub textures: TextureSettings,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            api: VideoApi::platform_default(),
            resolution: UVec2::new(800, 600),
            fullscreen: false,
            multisampling: 1,
            vsync: true,
            textures: TextureSettings::default(),
        }
    }
}

impl VideoConfig {
    /// Parses a `<Zenilib>` document. Absent or unreadable fields keep their
    /// defaults.
    pub fn from_xml(text: &str) -> Result<Self, ConfigError> {
        let root = Element::parse_document(text)?;
        if root.tag() != ROOT {
            return Err(ConfigError::WrongRoot {
                expected: ROOT,
                found: root.tag().to_string(),
            });
        }

        let mut config = Self::default();
        if let Some(video) = root.child("Video") {
            if let Some(api) = video.child("API") {
                match api.text().parse() {
                    Ok(api) => config.api = api,
                    Err(e) => log::warn!("video config: {e}; using {}", config.api),
                }
            }
            if let Some(res) = video.child("Resolution") {
                let width = read(res, "Width", Element::to_u32).filter(|w| *w > 0);
                let height = read(res, "Height", Element::to_u32).filter(|h| *h > 0);
                if let (Some(w), Some(h)) = (width, height) {
                    config.resolution = UVec2::new(w, h);
                }
            }
            if let Some(fullscreen) = read(video, "Full_Screen", Element::to_bool) {
                config.fullscreen = fullscreen;
            }
            if let Some(samples) = read(video, "Multisampling", to_i64) {
                config.multisampling = clamp_level(samples, MAX_SAMPLES);
            }
            if let Some(vsync) = read(video, "Vertical_Sync", Element::to_bool) {
                config.vsync = vsync;
            }
        }

        if let Some(textures) = root.child("Textures") {
            if let Some(aniso) = read(textures, "Anisotropy", to_i64) {
                config.textures.anisotropy = clamp_level(aniso, u32::from(MAX_ANISOTROPY)) as u16;
            }
            if let Some(bilinear) = read(textures, "Bilinear_Filtering", Element::to_bool) {
                config.textures.bilinear = bilinear;
            }
            if let Some(mipmapping) = read(textures, "Mipmapping", Element::to_bool) {
                config.textures.mipmapping = mipmapping;
            }
        }
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_xml(&text)
    }

    /// Loads `path`, falling back to the failsafe defaults when it is missing
    /// or broken.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match Self::load(path) {
            Ok(config) => {
                log::info!("video config loaded from {}", path.display());
                config
            }
            Err(e) => {
                log::warn!("{e}; using failsafe video settings");
                Self::default()
            }
        }
    }

    pub fn to_xml(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "<?xml version=\"1.0\" encoding=\"utf-8\"?>");
        let _ = writeln!(s, "<{ROOT}>");
        let _ = writeln!(s, "  <Video>");
        let _ = writeln!(s, "    <API>{}</API>", self.api);
        let _ = writeln!(s, "    <Resolution>");
        let _ = writeln!(s, "      <Width>{}</Width>", self.resolution.x);
        let _ = writeln!(s, "      <Height>{}</Height>", self.resolution.y);
        let _ = writeln!(s, "    </Resolution>");
        let _ = writeln!(s, "    <Full_Screen>{}</Full_Screen>", self.fullscreen);
        let _ = writeln!(s, "    <Multisampling>{}</Multisampling>", self.multisampling);
        let _ = writeln!(s, "    <Vertical_Sync>{}</Vertical_Sync>", self.vsync);
        let _ = writeln!(s, "  </Video>");
        let _ = writeln!(s, "  <Textures>");
        let _ = writeln!(s, "    <Anisotropy>{}</Anisotropy>", self.textures.anisotropy);
        let _ = writeln!(s, "    <Bilinear_Filtering>{}</Bilinear_Filtering>", self.textures.bilinear);
        let _ = writeln!(s, "    <Mipmapping>{}</Mipmapping>", self.textures.mipmapping);
        let _ = writeln!(s, "  </Textures>");
        let _ = writeln!(s, "</{ROOT}>");
        s
    }

    /// Writes the configuration, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(io)?;
        }
        std::fs::write(path, self.to_xml()).map_err(io)
    }

    pub fn device_params(&self) -> DeviceParams {
        DeviceParams {
            size: self.resolution,
            sample_count: self.multisampling.max(1),
            vsync: self.vsync,
        }
    }
}

fn read<T, E: std::fmt::Display>(parent: &Element, tag: &str, parse: impl Fn(&Element) -> Result<T, E>) -> Option<T> {
    let element = parent.child(tag)?;
    match parse(element) {
        Ok(value) => Some(value),
        Err(e) => {
            log::warn!("video config: {e}; keeping default");
            None
        }
    }
}

fn to_i64(element: &Element) -> Result<i64, String> {
    element
        .text()
        .parse()
        .map_err(|_| format!("<{}>: expected an integer, found {:?}", element.tag(), element.text()))
}

/// Negative values request the maximum; zero means off (one sample).
fn clamp_level(value: i64, max: u32) -> u32 {
    if value < 0 {
        max
    } else {
        (value as u64).clamp(1, u64::from(max)) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
        <Zenilib>
          <Video>
            <API>DX9</API>
            <Resolution><Width>1024</Width><Height>768</Height></Resolution>
            <Full_Screen>true</Full_Screen>
            <Multisampling>4</Multisampling>
            <Vertical_Sync>false</Vertical_Sync>
          </Video>
          <Textures>
            <Anisotropy>8</Anisotropy>
            <Bilinear_Filtering>0</Bilinear_Filtering>
            <Mipmapping>1</Mipmapping>
          </Textures>
        </Zenilib>"#;

    // ── parsing ───────────────────────────────────────────────────────────

    #[test]
    fn reads_every_field() {
        let c = VideoConfig::from_xml(FULL).unwrap();
        assert_eq!(c.api, VideoApi::Dx9);
        assert_eq!(c.resolution, UVec2::new(1024, 768));
        assert!(c.fullscreen);
        assert_eq!(c.multisampling, 4);
        assert!(!c.vsync);
        assert_eq!(
            c.textures,
            TextureSettings {
                anisotropy: 8,
                bilinear: false,
                mipmapping: true
            }
        );
    }

    #[test]
    fn missing_fields_keep_defaults() {
        let c = VideoConfig::from_xml("<Zenilib><Video><Full_Screen>1</Full_Screen></Video></Zenilib>").unwrap();
        assert!(c.fullscreen);
        assert_eq!(c.resolution, VideoConfig::default().resolution);
        assert_eq!(c.textures, TextureSettings::default());
    }

    #[test]
    fn invalid_fields_keep_defaults() {
        let c = VideoConfig::from_xml(
            "<Zenilib><Video><API>Glide</API><Vertical_Sync>maybe</Vertical_Sync>\
             <Resolution><Width>0</Width><Height>600</Height></Resolution></Video></Zenilib>",
        )
        .unwrap();
        assert_eq!(c, VideoConfig::default());
    }

    #[test]
    fn negative_levels_mean_maximum() {
        let c = VideoConfig::from_xml(
            "<Zenilib><Video><Multisampling>-1</Multisampling></Video>\
             <Textures><Anisotropy>-1</Anisotropy></Textures></Zenilib>",
        )
        .unwrap();
        assert_eq!(c.multisampling, 16);
        assert_eq!(c.textures.anisotropy, 16);
    }

    #[test]
    fn wrong_root_is_rejected() {
        assert!(matches!(
            VideoConfig::from_xml("<Config/>"),
            Err(ConfigError::WrongRoot { .. })
        ));
        assert!(matches!(VideoConfig::from_xml("<Zenilib>"), Err(ConfigError::Parse(_))));
    }

    // ── files ─────────────────────────────────────────────────────────────

    #[test]
    fn save_then_load_preserves_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config").join("video.xml");
        let config = VideoConfig::from_xml(FULL).unwrap();
        config.save(&path).unwrap();
        assert_eq!(VideoConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_file_yields_failsafe_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let c = VideoConfig::load_or_default(dir.path().join("nope.xml"));
        assert_eq!(c, VideoConfig::default());
    }

    // ── derived values ────────────────────────────────────────────────────

    #[test]
    fn device_params_follow_config() {
        let p = VideoConfig::from_xml(FULL).unwrap().device_params();
        assert_eq!((p.size, p.sample_count, p.vsync), (UVec2::new(1024, 768), 4, false));
    }

    #[test]
    fn sampler_reflects_texture_settings() {
        let s = TextureSettings {
            anisotropy: 0,
            bilinear: false,
            mipmapping: true,
        }
        .sampler(false);
        assert_eq!(s.anisotropy, 1);
        assert!(!s.bilinear && s.mipmapping && !s.repeat);
    }
}
