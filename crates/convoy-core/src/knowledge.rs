//! Knowledge documents consumed by the fallback keyword KB.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// A help-center document the fallback resolver ranks against queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeDoc {
    /// Numeric id, assigned by storage.
    pub id: i64,
    /// Title; title hits weigh double in fallback ranking.
    pub title: String,
    /// Body text.
    pub body: String,
    /// Category tag.
    pub category: String,
    /// Tag set; tag hits weigh 1.5x in fallback ranking.
    pub tags: BTreeSet<String>,
}

impl KnowledgeDoc {
    /// Create a document with empty tags.
    #[must_use]
    pub fn new(id: i64, title: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id,
            title: title.into(),
            body: body.into(),
            category: String::new(),
            tags: BTreeSet::new(),
        }
    }

    /// Add a tag.
    #[must_use]
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}
