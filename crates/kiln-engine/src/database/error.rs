use std::path::PathBuf;

/// Error type returned by resource factories.
pub type LoadError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    /// The name is neither cached nor listed in any loaded manifest.
    #[error("{kind}: no entry named {name:?}")]
    EntryNotFound { kind: &'static str, name: String },

    #[error("{kind}: manifest {} is not loaded", path.display())]
    FileNotLoaded { kind: &'static str, path: PathBuf },

    /// The manifest entry exists but its factory failed; nothing was cached.
    #[error("{kind}: failed to load {name:?}")]
    LoadEntryFailed {
        kind: &'static str,
        name: String,
        #[source]
        source: LoadError,
    },

    #[error("{kind}: invalid manifest {source_name}: {reason}")]
    Manifest {
        kind: &'static str,
        source_name: String,
        reason: String,
    },

    #[error("failed to read {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
