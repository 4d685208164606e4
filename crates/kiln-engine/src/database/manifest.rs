use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use super::error::{DatabaseError, LoadError};

/// Owned XML element: tag, trimmed text and child elements.
///
/// Manifests are small; converting the parsed document into owned data keeps
/// entries independent of the source text's lifetime.
#[derive(Debug, Clone, PartialEq)]
pub struct Element {
    tag: String,
    text: String,
    children: Vec<Element>,
}

/// A manifest field whose text does not parse as the requested type.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("<{tag}>: expected {expected}, found {found:?}")]
pub struct FieldError {
    pub tag: String,
    pub expected: &'static str,
    pub found: String,
}

impl Element {
    /// Parses an XML document and returns its root element.
    pub fn parse_document(text: &str) -> Result<Element, roxmltree::Error> {
        let doc = roxmltree::Document::parse(text)?;
        Ok(Self::from_node(doc.root_element()))
    }

    fn from_node(node: roxmltree::Node<'_, '_>) -> Element {
        let text = node
            .children()
            .filter(|n| n.is_text())
            .filter_map(|n| n.text())
            .collect::<String>()
            .trim()
            .to_string();

        Element {
            tag: node.tag_name().name().to_string(),
            text,
            children: node
                .children()
                .filter(|n| n.is_element())
                .map(Self::from_node)
                .collect(),
        }
    }

    #[cfg(test)]
    pub(crate) fn leaf(tag: &str, text: &str) -> Element {
        Element {
            tag: tag.to_string(),
            text: text.to_string(),
            children: Vec::new(),
        }
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    /// First child with the given tag.
    pub fn child(&self, tag: &str) -> Option<&Element> {
        self.children.iter().find(|c| c.tag == tag)
    }

    pub fn to_f32(&self) -> Result<f32, FieldError> {
        self.text.parse().map_err(|_| self.mismatch("a number"))
    }

    pub fn to_u32(&self) -> Result<u32, FieldError> {
        self.text.parse().map_err(|_| self.mismatch("an unsigned integer"))
    }

    /// Accepts `true`/`false`/`1`/`0`, case-insensitively.
    pub fn to_bool(&self) -> Result<bool, FieldError> {
        match self.text.to_ascii_lowercase().as_str() {
            "true" | "1" => Ok(true),
            "false" | "0" => Ok(false),
            _ => Err(self.mismatch("a boolean")),
        }
    }

    fn mismatch(&self, expected: &'static str) -> FieldError {
        FieldError {
            tag: self.tag.clone(),
            expected,
            found: self.text.clone(),
        }
    }
}

/// Where a manifest came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ManifestSource {
    File(PathBuf),
    Inline(String),
}

impl fmt::Display for ManifestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestSource::File(path) => write!(f, "{}", path.display()),
            ManifestSource::Inline(label) => write!(f, "<{label}>"),
        }
    }
}

/// One named record of a manifest.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestEntry {
    element: Element,
    source: ManifestSource,
    base_dir: PathBuf,
}

impl ManifestEntry {
    /// The resource name (the record's tag).
    pub fn name(&self) -> &str {
        self.element.tag()
    }

    pub fn element(&self) -> &Element {
        &self.element
    }

    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    pub fn get(&self, field: &str) -> Option<&Element> {
        self.element.child(field)
    }

    /// A required field.
    pub fn field(&self, field: &str) -> Result<&Element, LoadError> {
        self.get(field)
            .ok_or_else(|| format!("{}: missing <{field}>", self.name()).into())
    }

    /// Optional boolean field; absent means `false`.
    pub fn flag(&self, field: &str) -> Result<bool, LoadError> {
        match self.get(field) {
            Some(e) => Ok(e.to_bool()?),
            None => Ok(false),
        }
    }

    /// Resolves a path relative to the database's asset root.
    pub fn resolve(&self, relative: &str) -> PathBuf {
        self.base_dir.join(relative)
    }
}

/// A parsed manifest: every child of the `<Kind>` root is one entry.
#[derive(Debug, Clone)]
pub struct Manifest {
    source: ManifestSource,
    entries: Vec<ManifestEntry>,
    index: HashMap<String, usize>,
}

impl Manifest {
    /// Parses manifest text.
    ///
    /// The root element must be `<kind>`, or a `<Zenilib>` wrapper holding one.
    /// A name listed twice resolves to its last record.
    pub fn parse(
        kind: &'static str,
        text: &str,
        source: ManifestSource,
        base_dir: &Path,
    ) -> Result<Manifest, DatabaseError> {
        let invalid = |reason: String| DatabaseError::Manifest {
            kind,
            source_name: source.to_string(),
            reason,
        };

        let root = Element::parse_document(text).map_err(|e| invalid(e.to_string()))?;
        let root = if root.tag() == kind {
            &root
        } else {
            root.child(kind).ok_or_else(|| {
                invalid(format!("expected <{kind}> root, found <{}>", root.tag()))
            })?
        };

        let mut entries = Vec::with_capacity(root.children().len());
        let mut index = HashMap::new();
        for element in root.children() {
            let name = element.tag().to_string();
            let entry = ManifestEntry {
                element: element.clone(),
                source: source.clone(),
                base_dir: base_dir.to_path_buf(),
            };
            if let Some(&pos) = index.get(&name) {
                log::warn!("{kind} manifest {source}: duplicate entry {name}; last one wins");
                entries[pos] = entry;
            } else {
                index.insert(name, entries.len());
                entries.push(entry);
            }
        }

        Ok(Manifest {
            source,
            entries,
            index,
        })
    }

    /// Reads and parses a manifest file.
    pub fn read(kind: &'static str, path: &Path, base_dir: &Path) -> Result<Manifest, DatabaseError> {
        let text = std::fs::read_to_string(path).map_err(|source| DatabaseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(kind, &text, ManifestSource::File(path.to_path_buf()), base_dir)
    }

    pub fn source(&self) -> &ManifestSource {
        &self.source
    }

    pub fn entry(&self, name: &str) -> Option<&ManifestEntry> {
        self.index.get(name).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> impl Iterator<Item = &ManifestEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<Manifest, DatabaseError> {
        Manifest::parse(
            "Textures",
            text,
            ManifestSource::Inline("test".into()),
            Path::new("assets"),
        )
    }

    // ── parsing ───────────────────────────────────────────────────────────

    #[test]
    fn entries_are_children_of_root() {
        let m = parse(
            "<Textures>
               <crate><filepath>textures/crate.png</filepath><tile>true</tile></crate>
               <grass><filepath>textures/grass.png</filepath></grass>
             </Textures>",
        )
        .unwrap();

        assert_eq!(m.len(), 2);
        let e = m.entry("crate").unwrap();
        assert_eq!(e.name(), "crate");
        assert_eq!(e.field("filepath").unwrap().text(), "textures/crate.png");
        assert!(e.flag("tile").unwrap());
        assert!(!m.entry("grass").unwrap().flag("tile").unwrap());
    }

    #[test]
    fn accepts_wrapped_root() {
        let m = parse("<Zenilib><Textures><a><filepath>a.png</filepath></a></Textures></Zenilib>")
            .unwrap();
        assert!(m.entry("a").is_some());
    }

    #[test]
    fn wrong_root_is_rejected() {
        let err = parse("<Fonts><a/></Fonts>").unwrap_err();
        assert!(matches!(err, DatabaseError::Manifest { .. }), "{err}");
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(matches!(parse("<Textures><a>"), Err(DatabaseError::Manifest { .. })));
    }

    #[test]
    fn duplicate_name_keeps_last_record() {
        let m = parse(
            "<Textures><a><filepath>old.png</filepath></a><a><filepath>new.png</filepath></a></Textures>",
        )
        .unwrap();
        assert_eq!(m.len(), 1);
        assert_eq!(m.entry("a").unwrap().field("filepath").unwrap().text(), "new.png");
    }

    #[test]
    fn resolve_joins_base_dir() {
        let m = parse("<Textures><a><filepath>x.png</filepath></a></Textures>").unwrap();
        assert_eq!(m.entry("a").unwrap().resolve("x.png"), Path::new("assets/x.png"));
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = Manifest::read("Textures", Path::new("/nonexistent/kiln.xml"), Path::new("."))
            .unwrap_err();
        assert!(matches!(err, DatabaseError::Io { .. }));
    }

    // ── fields ────────────────────────────────────────────────────────────

    #[test]
    fn typed_field_conversions() {
        assert_eq!(Element::leaf("height", "24").to_f32().unwrap(), 24.0);
        assert_eq!(Element::leaf("n", "3").to_u32().unwrap(), 3);
        assert!(Element::leaf("b", "TRUE").to_bool().unwrap());
        assert!(!Element::leaf("b", "0").to_bool().unwrap());
        assert!(Element::leaf("b", "yes").to_bool().is_err());
    }

    #[test]
    fn parsed_text_is_trimmed() {
        let root = Element::parse_document("<a>\n  <b>  1.5 </b>\n</a>").unwrap();
        assert_eq!(root.child("b").unwrap().to_f32().unwrap(), 1.5);
    }
}
