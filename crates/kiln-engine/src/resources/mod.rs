//! Resource managers built on [`Database`](crate::database::Database).
//!
//! Each manager owns one database, supplies its loader and, for GPU
//! resources, implements [`DeviceObserver`](crate::video::DeviceObserver) so
//! uploads are released before a device reset and rebuilt after it:
//! - [`Textures`]: images and sprites, uploaded on first bind
//! - [`VertexBuffers`]: static triangle batches
//! - [`Fonts`]: glyph atlases rasterized for the current window
//! - [`Colors`], [`Sounds`]: plain decoded data

mod colors;
mod font;
mod fonts;
mod sounds;
mod texture;
mod textures;
mod vertex_buffer;

use std::path::Path;

use crate::database::{Database, DatabaseError};

pub use colors::{Colors, DEFAULT_COLORS};
pub use font::{Font, GlyphAtlas, Justify, RasterGlyph, VirtualScreen, GLYPHS};
pub use fonts::{resolve_virtual_screen_height, Fonts, DEFAULT_FONTS};
pub use sounds::{SoundBuffer, Sounds, DEFAULT_SOUNDS};
pub use texture::{FrameOutOfRange, ImageTexture, Sprite, SpriteFrame, Texture};
pub use textures::{TextureError, Textures, DEFAULT_TEXTURES};
pub use vertex_buffer::{BufferedTriangle, VertexBuffer, VertexBuffers};

/// Loads a manager's conventional manifest if it exists. A missing file
/// leaves the database empty.
fn load_default<T>(db: &mut Database<T>, path: &str) -> Result<(), DatabaseError> {
    if Path::new(path).is_file() {
        db.load_file(path)
    } else {
        log::info!("{}: no {path}; starting empty", db.kind());
        Ok(())
    }
}
