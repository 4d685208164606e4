use std::path::{Path, PathBuf};

use crate::coords::Color;
use crate::database::{Database, DatabaseError, LoadError, ManifestEntry, ResourceId};
use crate::registry::Singleton;

/// Conventional location of the color manifest.
pub const DEFAULT_COLORS: &str = "config/colors.xml";

/// Named colors from `<Colors>` manifests.
#[derive(Debug)]
pub struct Colors {
    db: Database<Color>,
}

impl Default for Colors {
    fn default() -> Self {
        Self::new()
    }
}

impl Colors {
    pub fn new() -> Self {
        Self {
            db: Database::new("Colors"),
        }
    }

    pub fn with_asset_root(root: impl Into<PathBuf>) -> Self {
        Self {
            db: Database::new("Colors").with_asset_root(root),
        }
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), DatabaseError> {
        self.db.load_file(path)
    }

    pub fn load_str(&mut self, label: &str, text: &str) -> Result<(), DatabaseError> {
        self.db.load_str(label, text)
    }

    pub fn unload_file(&mut self, path: impl AsRef<Path>) -> Result<(), DatabaseError> {
        self.db.unload_file(path).map(drop)
    }

    /// The color named `name`, loading it on first request.
    pub fn get(&mut self, name: &str) -> Result<Color, DatabaseError> {
        self.db.get_or_load(name, load_color).map(|c| *c)
    }

    pub fn get_id(&mut self, name: &str) -> Result<ResourceId, DatabaseError> {
        self.db.get_id(name, load_color)
    }

    pub fn give(&mut self, name: &str, color: Color, keep: bool) -> ResourceId {
        self.db.give(name, color, keep).0
    }

    pub fn reload(&mut self) -> Result<(), DatabaseError> {
        self.db.reload().map(drop)
    }

    pub fn clear(&mut self) {
        self.db.clear();
    }

    pub fn len(&self) -> usize {
        self.db.len()
    }

    pub fn is_empty(&self) -> bool {
        self.db.is_empty()
    }
}

fn load_color(entry: &ManifestEntry) -> Result<Color, LoadError> {
    let channel = |name: &str| -> Result<f32, LoadError> { Ok(entry.field(name)?.to_f32()?) };
    let color = Color::argb(channel("alpha")?, channel("red")?, channel("green")?, channel("blue")?);
    if !color.is_finite() {
        return Err(format!("{}: color channels must be finite", entry.name()).into());
    }
    Ok(color)
}

impl Singleton for Colors {
    type Error = DatabaseError;

    fn create() -> Result<Self, DatabaseError> {
        let mut colors = Colors::new();
        super::load_default(&mut colors.db, DEFAULT_COLORS)?;
        Ok(colors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = "<Colors>
        <red><alpha>1</alpha><red>1</red><green>0</green><blue>0</blue></red>
        <ghost><alpha>0.25</alpha><red>0.5</red><green>0.5</green><blue>1</blue></ghost>
        <partial><alpha>1</alpha><red>1</red></partial>
    </Colors>";

    fn colors() -> Colors {
        let mut colors = Colors::new();
        colors.load_str("test", MANIFEST).unwrap();
        colors
    }

    #[test]
    fn channels_are_read_alpha_first() {
        let mut colors = colors();
        assert_eq!(colors.get("red").unwrap(), Color::rgba(1.0, 0.0, 0.0, 1.0));
        assert_eq!(colors.get("ghost").unwrap(), Color::rgba(0.5, 0.5, 1.0, 0.25));
    }

    #[test]
    fn missing_channel_fails_without_caching() {
        let mut colors = colors();
        assert!(matches!(
            colors.get("partial"),
            Err(DatabaseError::LoadEntryFailed { .. })
        ));
        assert!(colors.is_empty());
    }

    #[test]
    fn kept_colors_survive_reload() {
        let mut colors = colors();
        colors.give("sky", Color::rgba(0.4, 0.6, 1.0, 1.0), true);
        colors.get("red").unwrap();
        colors.reload().unwrap();
        assert_eq!(colors.len(), 1);
        assert_eq!(colors.get("sky").unwrap().b, 1.0);
    }

    #[test]
    fn unknown_name_is_not_found() {
        assert!(matches!(
            colors().get("chartreuse"),
            Err(DatabaseError::EntryNotFound { .. })
        ));
    }
}
