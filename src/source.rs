//! Where ontologies come from.
//!
//! The service does not own its axioms; it mirrors an external source of truth
//! that the refresh job polls. Each document carries a version string so an
//! unchanged ontology can be kept as-is across refreshes.

use std::collections::BTreeMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::error::SourceError;
use crate::ontology::AxiomSet;

/// One named ontology as published by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OntologyDocument {
    pub name: String,
    /// Opaque; equal versions mean equal axioms.
    pub version: String,
    pub axioms: AxiomSet,
}

/// A published document that could not be read.
#[derive(Debug)]
pub struct RejectedDocument {
    pub name: String,
    pub error: SourceError,
}

/// What a source publishes at one point in time.
#[derive(Debug, Default)]
pub struct Catalog {
    /// Sorted by name.
    pub documents: Vec<OntologyDocument>,
    pub rejected: Vec<RejectedDocument>,
}

impl Catalog {
    pub fn new(documents: Vec<OntologyDocument>) -> Self {
        Self {
            documents,
            rejected: Vec::new(),
        }
    }
}

/// An external source of ontologies.
pub trait OntologySource: Send + Sync {
    /// Human-readable location, for logs.
    fn describe(&self) -> String;

    /// Every ontology currently published. A document that cannot be read is
    /// listed in [`Catalog::rejected`]; `Err` means the source as a whole is
    /// unavailable.
    fn load(&self) -> Result<Catalog, SourceError>;
}

/// On-disk document layout.
#[derive(Debug, Serialize, Deserialize)]
pub struct DocumentFile {
    #[serde(default)]
    pub axioms: AxiomSet,
}

/// Reads every `*.json` file of a directory; the file stem names the ontology.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    dir: PathBuf,
}

impl DirectorySource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_document(path: &Path, name: &str) -> Result<OntologyDocument, SourceError> {
        let content = std::fs::read(path).map_err(|e| SourceError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let file: DocumentFile =
            serde_json::from_slice(&content).map_err(|e| SourceError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Ok(OntologyDocument {
            name: name.to_string(),
            version: format!("{:016x}", hasher.finish()),
            axioms: file.axioms,
        })
    }
}

impl OntologySource for DirectorySource {
    fn describe(&self) -> String {
        format!("directory {}", self.dir.display())
    }

    fn load(&self) -> Result<Catalog, SourceError> {
        let io_err = |e: std::io::Error| SourceError::Io {
            path: self.dir.display().to_string(),
            source: e,
        };
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir).map_err(io_err)? {
            let path = entry.map_err(io_err)?.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();

        let mut catalog = Catalog::default();
        for path in &paths {
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match Self::read_document(path, name) {
                Ok(doc) => catalog.documents.push(doc),
                Err(error) => catalog.rejected.push(RejectedDocument {
                    name: name.to_string(),
                    error,
                }),
            }
        }
        tracing::debug!(
            dir = %self.dir.display(),
            ontologies = catalog.documents.len(),
            rejected = catalog.rejected.len(),
            "ontology directory scanned"
        );
        Ok(catalog)
    }
}

/// An in-process source; publishing bumps the ontology's version.
#[derive(Debug, Default)]
pub struct MemorySource {
    docs: Mutex<BTreeMap<String, (u64, AxiomSet)>>,
}

impl MemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) an ontology.
    pub fn publish(&self, name: impl Into<String>, axioms: AxiomSet) {
        let mut docs = self.docs.lock().expect("memory source lock poisoned");
        let entry = docs.entry(name.into()).or_insert((0, AxiomSet::new()));
        entry.0 += 1;
        entry.1 = axioms;
    }

    /// Withdraw an ontology. Returns whether it was published.
    pub fn remove(&self, name: &str) -> bool {
        self.docs
            .lock()
            .expect("memory source lock poisoned")
            .remove(name)
            .is_some()
    }
}

impl OntologySource for MemorySource {
    fn describe(&self) -> String {
        "in-memory source".into()
    }

    fn load(&self) -> Result<Catalog, SourceError> {
        let docs = self.docs.lock().expect("memory source lock poisoned");
        Ok(Catalog::new(
            docs.iter()
                .map(|(name, (version, axioms))| OntologyDocument {
                    name: name.clone(),
                    version: format!("v{version}"),
                    axioms: axioms.clone(),
                })
                .collect(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ontology::Axiom;

    #[test]
    fn directory_source_reads_json_documents() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("zoo.json"),
            r#"{"axioms": [{"sub_class_of": {"sub": "Dog", "sup": "Animal"}}]}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let docs = DirectorySource::new(dir.path()).load().unwrap().documents;
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].name, "zoo");
        assert!(docs[0].axioms.contains(&Axiom::sub_class_of("Dog", "Animal")));
    }

    #[test]
    fn version_follows_content() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("zoo.json");
        let source = DirectorySource::new(dir.path());

        std::fs::write(&path, r#"{"axioms": []}"#).unwrap();
        let version = || source.load().unwrap().documents[0].version.clone();
        let first = version();
        assert_eq!(version(), first);

        std::fs::write(
            &path,
            r#"{"axioms": [{"class_assertion": {"class": "Dog", "individual": "rex"}}]}"#,
        )
        .unwrap();
        assert_ne!(version(), first);
    }

    #[test]
    fn bad_json_is_rejected_alone() {
        let dir = tempfile::TempDir::new().unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        std::fs::write(dir.path().join("zoo.json"), r#"{"axioms": []}"#).unwrap();

        let catalog = DirectorySource::new(dir.path()).load().unwrap();
        assert_eq!(catalog.documents.len(), 1);
        assert_eq!(catalog.documents[0].name, "zoo");
        assert_eq!(catalog.rejected.len(), 1);
        let rejected = &catalog.rejected[0];
        assert_eq!(rejected.name, "broken");
        assert!(matches!(
            rejected.error,
            SourceError::Parse { ref path, .. } if path.ends_with("broken.json")
        ));
    }

    #[test]
    fn missing_directory_is_io_error() {
        let source = DirectorySource::new("/nonexistent/schemad-ontologies");
        assert!(matches!(source.load(), Err(SourceError::Io { .. })));
    }

    #[test]
    fn memory_source_bumps_versions() {
        let source = MemorySource::new();
        source.publish("zoo", AxiomSet::new());
        let v1 = source.load().unwrap().documents[0].version.clone();
        source.publish("zoo", AxiomSet::new());
        assert_ne!(source.load().unwrap().documents[0].version, v1);

        assert!(source.remove("zoo"));
        assert!(source.load().unwrap().documents.is_empty());
    }
}
