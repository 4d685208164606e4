use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::error::{DatabaseError, LoadError};
use super::manifest::{Manifest, ManifestEntry, ManifestSource};

/// Stable small integer naming one database entry.
///
/// Assigned the first time a name is loaded or given, and never reassigned for
/// the lifetime of the database (eviction keeps the mapping).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct ResourceId(u32);

impl ResourceId {
    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

/// Builds a resource from its manifest record.
pub trait Loader<T> {
    fn load(&mut self, entry: &ManifestEntry) -> Result<T, LoadError>;
}

impl<T, F> Loader<T> for F
where
    F: FnMut(&ManifestEntry) -> Result<T, LoadError>,
{
    fn load(&mut self, entry: &ManifestEntry) -> Result<T, LoadError> {
        self(entry)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    Manifest(ManifestSource),
    Given,
}

struct Cached<T> {
    value: T,
    keep: bool,
    origin: Origin,
}

/// Name-indexed cache of one resource kind, populated lazily from manifests.
///
/// Manifests are consulted newest first, so a later [`load_file`] overrides
/// records of earlier ones. Entries stay cached until evicted by
/// [`reload`], [`clear`], [`clear_entry`] or [`unload_file`]; eviction hands
/// the values back so owners of GPU handles can release them.
///
/// [`load_file`]: Self::load_file
/// [`reload`]: Self::reload
/// [`clear`]: Self::clear
/// [`clear_entry`]: Self::clear_entry
/// [`unload_file`]: Self::unload_file
pub struct Database<T> {
    kind: &'static str,
    asset_root: PathBuf,
    manifests: Vec<Manifest>,
    names: Vec<String>,
    ids: HashMap<String, ResourceId>,
    cached: HashMap<ResourceId, Cached<T>>,
}

impl<T> Database<T> {
    /// Creates an empty database whose manifests use `<kind>` as root element.
    pub fn new(kind: &'static str) -> Self {
        Self {
            kind,
            asset_root: PathBuf::from("."),
            manifests: Vec::new(),
            names: Vec::new(),
            ids: HashMap::new(),
            cached: HashMap::new(),
        }
    }

    /// Directory that manifest-relative asset paths are resolved against.
    pub fn with_asset_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.asset_root = root.into();
        self
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn asset_root(&self) -> &Path {
        &self.asset_root
    }

    // ── manifests ─────────────────────────────────────────────────────────

    /// Loads a manifest file at the highest priority.
    ///
    /// Loading an already-loaded path re-reads it in place. Entries that are
    /// already cached keep their current value until reloaded.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), DatabaseError> {
        let path = path.as_ref();
        let manifest = Manifest::read(self.kind, path, &self.asset_root)?;
        log::info!("{}: loaded manifest {} ({} entries)", self.kind, path.display(), manifest.len());
        self.push_manifest(manifest);
        Ok(())
    }

    /// Loads manifest text at the highest priority under a descriptive label.
    pub fn load_str(&mut self, label: &str, text: &str) -> Result<(), DatabaseError> {
        let source = ManifestSource::Inline(label.to_string());
        let manifest = Manifest::parse(self.kind, text, source, &self.asset_root)?;
        self.push_manifest(manifest);
        Ok(())
    }

    /// Removes a manifest file and evicts the entries it provided.
    pub fn unload_file(&mut self, path: impl AsRef<Path>) -> Result<Vec<T>, DatabaseError> {
        let source = ManifestSource::File(path.as_ref().to_path_buf());
        let Some(pos) = self.manifests.iter().position(|m| *m.source() == source) else {
            return Err(DatabaseError::FileNotLoaded {
                kind: self.kind,
                path: path.as_ref().to_path_buf(),
            });
        };
        self.manifests.remove(pos);

        let origin = Origin::Manifest(source);
        Ok(self.evict_where(|c| c.origin == origin))
    }

    pub fn is_file_loaded(&self, path: impl AsRef<Path>) -> bool {
        let source = ManifestSource::File(path.as_ref().to_path_buf());
        self.manifests.iter().any(|m| *m.source() == source)
    }

    /// The highest-priority manifest record for `name`.
    pub fn manifest_entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.manifests.iter().rev().find_map(|m| m.entry(name))
    }

    fn push_manifest(&mut self, manifest: Manifest) {
        self.manifests.retain(|m| m.source() != manifest.source());
        self.manifests.push(manifest);
    }

    // ── lookup ────────────────────────────────────────────────────────────

    /// Returns the cached value, loading it through `loader` on a miss.
    pub fn get_or_load(
        &mut self,
        name: &str,
        loader: impl Loader<T>,
    ) -> Result<&mut T, DatabaseError> {
        let id = self.get_id(name, loader)?;
        self.cached
            .get_mut(&id)
            .map(|c| &mut c.value)
            .ok_or_else(|| DatabaseError::EntryNotFound {
                kind: self.kind,
                name: name.to_string(),
            })
    }

    /// Returns the id of `name`, loading the entry through `loader` on a miss.
    ///
    /// A miss with no manifest record fails with
    /// [`DatabaseError::EntryNotFound`] and leaves the database untouched; a
    /// failing factory yields [`DatabaseError::LoadEntryFailed`] and caches
    /// nothing.
    pub fn get_id(
        &mut self,
        name: &str,
        mut loader: impl Loader<T>,
    ) -> Result<ResourceId, DatabaseError> {
        if let Some(id) = self.find(name) {
            return Ok(id);
        }

        let Some(entry) = self.manifest_entry(name) else {
            return Err(DatabaseError::EntryNotFound {
                kind: self.kind,
                name: name.to_string(),
            });
        };

        let origin = Origin::Manifest(entry.source().clone());
        let value = loader
            .load(entry)
            .map_err(|source| DatabaseError::LoadEntryFailed {
                kind: self.kind,
                name: name.to_string(),
                source,
            })?;

        let id = self.assign_id(name);
        log::debug!("{}: loaded {name:?} as {id:?}", self.kind);
        self.cached.insert(
            id,
            Cached {
                value,
                keep: false,
                origin,
            },
        );
        Ok(id)
    }

    /// The id of a cached entry. Never loads.
    pub fn find(&self, name: &str) -> Option<ResourceId> {
        self.ids
            .get(name)
            .copied()
            .filter(|id| self.cached.contains_key(id))
    }

    pub fn get(&self, id: ResourceId) -> Option<&T> {
        self.cached.get(&id).map(|c| &c.value)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut T> {
        self.cached.get_mut(&id).map(|c| &mut c.value)
    }

    /// The cached value for `name`. Never loads.
    pub fn get_by_name(&self, name: &str) -> Option<&T> {
        self.find(name).and_then(|id| self.get(id))
    }

    pub fn name_of(&self, id: ResourceId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// `true` if `name` is cached or has a manifest record.
    pub fn is_known(&self, name: &str) -> bool {
        self.find(name).is_some() || self.manifest_entry(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &T)> {
        self.cached.iter().map(|(id, c)| (*id, &c.value))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (ResourceId, &mut T)> {
        self.cached.iter_mut().map(|(id, c)| (*id, &mut c.value))
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.cached.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cached.is_empty()
    }

    // ── programmatic entries ──────────────────────────────────────────────

    /// Stores `value` under `name`, taking ownership.
    ///
    /// `keep` entries survive [`reload`](Self::reload). Returns the id and the
    /// value previously cached under that name, if any.
    pub fn give(&mut self, name: &str, value: T, keep: bool) -> (ResourceId, Option<T>) {
        let id = self.assign_id(name);
        let previous = self.cached.insert(
            id,
            Cached {
                value,
                keep,
                origin: Origin::Given,
            },
        );
        (id, previous.map(|c| c.value))
    }

    /// Evicts one entry. Its id stays reserved for the name.
    pub fn clear_entry(&mut self, name: &str) -> Option<T> {
        let id = self.find(name)?;
        self.cached.remove(&id).map(|c| c.value)
    }

    // ── bulk eviction ─────────────────────────────────────────────────────

    /// Re-reads every manifest file and evicts all cached entries except
    /// given entries marked `keep`.
    ///
    /// Manifest files are re-read before anything is evicted; on a read
    /// error the database is left unchanged.
    pub fn reload(&mut self) -> Result<Vec<T>, DatabaseError> {
        let mut fresh = Vec::with_capacity(self.manifests.len());
        for manifest in &self.manifests {
            match manifest.source() {
                ManifestSource::File(path) => {
                    fresh.push(Manifest::read(self.kind, path, &self.asset_root)?)
                }
                ManifestSource::Inline(_) => fresh.push(manifest.clone()),
            }
        }
        self.manifests = fresh;

        let evicted = self.evict_where(|c| !(c.keep && c.origin == Origin::Given));
        log::info!("{}: reloaded, {} entries evicted", self.kind, evicted.len());
        Ok(evicted)
    }

    /// Evicts every cached entry. Manifests stay loaded.
    pub fn clear(&mut self) -> Vec<T> {
        self.cached.drain().map(|(_, c)| c.value).collect()
    }

    fn evict_where(&mut self, mut pred: impl FnMut(&Cached<T>) -> bool) -> Vec<T> {
        let doomed: Vec<ResourceId> = self
            .cached
            .iter()
            .filter(|(_, c)| pred(c))
            .map(|(id, _)| *id)
            .collect();
        doomed
            .into_iter()
            .filter_map(|id| self.cached.remove(&id))
            .map(|c| c.value)
            .collect()
    }

    fn assign_id(&mut self, name: &str) -> ResourceId {
        if let Some(&id) = self.ids.get(name) {
            return id;
        }
        let id = ResourceId(self.names.len() as u32);
        self.names.push(name.to_string());
        self.ids.insert(name.to_string(), id);
        id
    }
}

impl<T> std::fmt::Debug for Database<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("kind", &self.kind)
            .field("manifests", &self.manifests.len())
            .field("cached", &self.cached.len())
            .finish()
    }
}
