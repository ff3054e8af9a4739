//! Validated document and collection paths
//!
//! Paths are slash-separated with alternating collection and document
//! segments. A `DocPath` has an even segment count, a `CollectionPath` an
//! odd one. Segments are non-empty and contain no slashes.

use crate::{StoreError, StoreResult};
use serde::{Deserialize, Serialize};
use std::fmt;

fn validate_segments(raw: &str) -> StoreResult<Vec<&str>> {
    if raw.is_empty() {
        return Err(StoreError::InvalidPath("empty path".to_string()));
    }
    let segments: Vec<&str> = raw.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(StoreError::InvalidPath(format!("empty segment in '{raw}'")));
    }
    Ok(segments)
}

/// Path of a single document
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocPath(String);

impl DocPath {
    pub fn parse(raw: impl Into<String>) -> StoreResult<Self> {
        let raw = raw.into();
        let segments = validate_segments(&raw)?;
        if segments.len() % 2 != 0 {
            return Err(StoreError::InvalidPath(format!(
                "'{raw}' has an odd segment count; expected a document path"
            )));
        }
        Ok(DocPath(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final segment: the document id
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().expect("validated non-empty path")
    }

    /// The collection this document belongs to
    pub fn parent_collection(&self) -> CollectionPath {
        let cut = self.0.rfind('/').expect("document paths have >= 2 segments");
        CollectionPath(self.0[..cut].to_string())
    }

    /// A subcollection under this document
    pub fn collection(&self, name: &str) -> StoreResult<CollectionPath> {
        if name.is_empty() || name.contains('/') {
            return Err(StoreError::InvalidPath(format!(
                "invalid collection segment '{name}'"
            )));
        }
        Ok(CollectionPath(format!("{}/{name}", self.0)))
    }

    pub fn segment_count(&self) -> usize {
        self.0.split('/').count()
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Path of a collection of sibling documents
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn parse(raw: impl Into<String>) -> StoreResult<Self> {
        let raw = raw.into();
        let segments = validate_segments(&raw)?;
        if segments.len() % 2 != 1 {
            return Err(StoreError::InvalidPath(format!(
                "'{raw}' has an even segment count; expected a collection path"
            )));
        }
        Ok(CollectionPath(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final segment: the collection id
    pub fn id(&self) -> &str {
        self.0.rsplit('/').next().expect("validated non-empty path")
    }

    /// A document inside this collection
    pub fn doc(&self, id: &str) -> StoreResult<DocPath> {
        if id.is_empty() || id.contains('/') {
            return Err(StoreError::InvalidPath(format!("invalid document id '{id}'")));
        }
        Ok(DocPath(format!("{}/{id}", self.0)))
    }

    /// The owning document, if this is a subcollection
    pub fn parent_doc(&self) -> Option<DocPath> {
        self.0.rfind('/').map(|cut| DocPath(self.0[..cut].to_string()))
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_doc_path_requires_even_segments() {
        assert!(DocPath::parse("clients/AVII").is_ok());
        assert!(DocPath::parse("clients/AVII/units/101/dues/2026").is_ok());
        assert!(DocPath::parse("clients").is_err());
        assert!(DocPath::parse("clients/AVII/units").is_err());
        assert!(DocPath::parse("clients//units/101").is_err());
        assert!(DocPath::parse("").is_err());
    }

    #[test]
    fn test_collection_path_requires_odd_segments() {
        assert!(CollectionPath::parse("clients").is_ok());
        assert!(CollectionPath::parse("clients/AVII/transactions").is_ok());
        assert!(CollectionPath::parse("clients/AVII").is_err());
    }

    #[test]
    fn test_navigation() {
        let doc = DocPath::parse("clients/AVII/units/101").unwrap();
        assert_eq!(doc.id(), "101");
        assert_eq!(doc.parent_collection().as_str(), "clients/AVII/units");

        let dues = doc.collection("dues").unwrap();
        assert_eq!(dues.as_str(), "clients/AVII/units/101/dues");
        assert_eq!(dues.doc("2026").unwrap().as_str(), "clients/AVII/units/101/dues/2026");
        assert_eq!(dues.parent_doc().unwrap(), doc);

        let root = CollectionPath::parse("clients").unwrap();
        assert_eq!(root.parent_doc(), None);
    }

    #[test]
    fn test_rejects_slash_in_segment_builders() {
        let doc = DocPath::parse("clients/AVII").unwrap();
        assert!(doc.collection("a/b").is_err());
        let col = CollectionPath::parse("clients").unwrap();
        assert!(col.doc("a/b").is_err());
        assert!(col.doc("").is_err());
    }
}
