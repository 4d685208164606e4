use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::database::{Database, DatabaseError, LoadError, ManifestEntry, ResourceId};
use crate::registry::Singleton;

/// Conventional location of the sound manifest.
pub const DEFAULT_SOUNDS: &str = "config/sounds.xml";

/// Decoded PCM audio, interleaved and normalized to `[-1, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SoundBuffer {
    pub samples: Vec<f32>,
    pub channels: u16,
    pub sample_rate: u32,
}

impl SoundBuffer {
    /// Decodes a WAV stream.
    pub fn from_wav(reader: impl std::io::Read) -> Result<Self, LoadError> {
        let mut reader = hound::WavReader::new(reader)?;
        let spec = reader.spec();
        if spec.channels == 0 || spec.sample_rate == 0 {
            return Err("WAV header declares no channels or a zero sample rate".into());
        }

        let samples: Result<Vec<f32>, _> = match spec.sample_format {
            hound::SampleFormat::Float => reader.samples::<f32>().collect(),
            hound::SampleFormat::Int => {
                let max = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|s| s as f32 / max))
                    .collect()
            }
        };

        Ok(Self {
            samples: samples?,
            channels: spec.channels,
            sample_rate: spec.sample_rate,
        })
    }

    pub fn open(path: &Path) -> Result<Self, LoadError> {
        let file = std::fs::File::open(path).map_err(|e| format!("{}: {e}", path.display()))?;
        Self::from_wav(std::io::BufReader::new(file)).map_err(|e| format!("{}: {e}", path.display()).into())
    }

    /// Samples per channel.
    pub fn frames(&self) -> usize {
        self.samples.len() / usize::from(self.channels.max(1))
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / f64::from(self.sample_rate.max(1)))
    }
}

/// Named sound buffers from `<Sounds>` manifests. Decoded once, shared by
/// name.
#[derive(Debug)]
pub struct Sounds {
    db: Database<SoundBuffer>,
}

impl Default for Sounds {
    fn default() -> Self {
        Self::new()
    }
}

impl Sounds {
    pub fn new() -> Self {
        Self::with_asset_root(".")
    }

    pub fn with_asset_root(root: impl Into<PathBuf>) -> Self {
        Self {
            db: Database::new("Sounds").with_asset_root(root),
        }
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), DatabaseError> {
        self.db.load_file(path)
    }

    pub fn load_str(&mut self, label: &str, text: &str) -> Result<(), DatabaseError> {
        self.db.load_str(label, text)
    }

    pub fn get(&mut self, name: &str) -> Result<&SoundBuffer, DatabaseError> {
        self.db.get_or_load(name, load_sound).map(|s| &*s)
    }

    pub fn get_id(&mut self, name: &str) -> Result<ResourceId, DatabaseError> {
        self.db.get_id(name, load_sound)
    }

    pub fn give(&mut self, name: &str, buffer: SoundBuffer, keep: bool) -> ResourceId {
        self.db.give(name, buffer, keep).0
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

fn load_sound(entry: &ManifestEntry) -> Result<SoundBuffer, LoadError> {
    SoundBuffer::open(&entry.resolve(entry.field("filepath")?.text()))
}

impl Singleton for Sounds {
    type Error = DatabaseError;

    fn create() -> Result<Self, DatabaseError> {
        let mut sounds = Sounds::new();
        super::load_default(&mut sounds.db, DEFAULT_SOUNDS)?;
        Ok(sounds)
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    fn write_wav(path: &Path, channels: u16, samples: &[i16]) {
        let spec = hound::WavSpec {
            channels,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for &s in samples {
            writer.write_sample(s).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn int_samples_are_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tone.wav");
        write_wav(&path, 1, &[0, 16384, -32768]);

        let buffer = SoundBuffer::open(&path).unwrap();
        assert_eq!(buffer.channels, 1);
        assert_eq!(buffer.sample_rate, 8000);
        assert_relative_eq!(buffer.samples[1], 0.5);
        assert_relative_eq!(buffer.samples[2], -1.0);
    }

    #[test]
    fn duration_counts_frames_not_samples() {
        let buffer = SoundBuffer {
            samples: vec![0.0; 16000],
            channels: 2,
            sample_rate: 8000,
        };
        assert_eq!(buffer.frames(), 8000);
        assert_eq!(buffer.duration(), Duration::from_secs(1));
    }

    #[test]
    fn garbage_is_rejected() {
        assert!(SoundBuffer::from_wav(&[0u8, 1, 2, 3, 4][..]).is_err());
    }

    #[test]
    fn manifest_entries_load_once() {
        let dir = tempfile::tempdir().unwrap();
        write_wav(&dir.path().join("click.wav"), 2, &[1, 2, 3, 4]);
        let mut sounds = Sounds::with_asset_root(dir.path());
        sounds
            .load_str(
                "test",
                "<Sounds><click><filepath>click.wav</filepath></click>\
                 <gone><filepath>gone.wav</filepath></gone></Sounds>",
            )
            .unwrap();

        assert_eq!(sounds.get("click").unwrap().frames(), 2);
        let id = sounds.get_id("click").unwrap();
        assert_eq!(sounds.get_id("click").unwrap(), id);
        assert!(matches!(sounds.get("gone"), Err(DatabaseError::LoadEntryFailed { .. })));
        assert_eq!(sounds.len(), 1);
    }
}
