use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: Uuid,
    pub filename: String,
    pub department: String,
    pub document_type: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub uploaded_by: Uuid,
    pub uploader_email: String,
    pub uploaded_at: DateTime<Utc>,
    pub size_bytes: i64,
    pub mime_type: String,
    #[serde(skip_serializing)]
    pub content_hash: String,
    #[serde(skip_serializing)]
    pub storage_location: String,
    pub chunk_count: i32,
}

impl Document {
    /// Vector ids for every chunk of this document.
    pub fn vector_ids(&self) -> Vec<String> {
        (0..self.chunk_count.max(0) as usize)
            .map(|i| vector_id(self.id, i))
            .collect()
    }
}

pub fn vector_id(document_id: Uuid, chunk_index: usize) -> String {
    format!("{document_id}#{chunk_index}")
}

/// Parse `"{document_id}#{chunk_index}"`.
pub fn parse_vector_id(id: &str) -> Option<(Uuid, usize)> {
    let (doc, idx) = id.split_once('#')?;
    Some((Uuid::parse_str(doc).ok()?, idx.parse().ok()?))
}

/// Trim, lowercase, de-duplicate and sort tags.
pub fn normalize_tags<I, S>(tags: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out: Vec<String> = tags
        .into_iter()
        .map(|t| t.as_ref().trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

/// Metadata listing filter. Every present field narrows the result.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DocumentFilter {
    /// Restrict to these departments; `None` means unrestricted.
    pub departments: Option<Vec<String>>,
    pub document_type: Option<String>,
    pub uploaded_by: Option<Uuid>,
    /// Documents carrying at least one of these tags.
    pub tags: Vec<String>,
    pub date_from: Option<DateTime<Utc>>,
    pub date_to: Option<DateTime<Utc>>,
    pub limit: i64,
    pub offset: i64,
}

impl DocumentFilter {
    pub fn matches(&self, doc: &Document) -> bool {
        if let Some(departments) = &self.departments {
            if !departments.contains(&doc.department) {
                return false;
            }
        }
        if self.document_type.as_ref().is_some_and(|t| t != &doc.document_type) {
            return false;
        }
        if self.uploaded_by.is_some_and(|u| u != doc.uploaded_by) {
            return false;
        }
        if !self.tags.is_empty() && !self.tags.iter().any(|t| doc.tags.contains(t)) {
            return false;
        }
        if self.date_from.is_some_and(|from| doc.uploaded_at < from) {
            return false;
        }
        if self.date_to.is_some_and(|to| doc.uploaded_at > to) {
            return false;
        }
        true
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CountBy {
    pub key: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RecentUpload {
    pub id: Uuid,
    pub filename: String,
    pub department: String,
    pub uploader_email: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<&Document> for RecentUpload {
    fn from(doc: &Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename.clone(),
            department: doc.department.clone(),
            uploader_email: doc.uploader_email.clone(),
            uploaded_at: doc.uploaded_at,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DocumentStats {
    pub total_documents: i64,
    pub total_chunks: i64,
    pub storage_bytes: i64,
    pub by_department: Vec<CountBy>,
    pub by_type: Vec<CountBy>,
    pub by_uploader: Vec<CountBy>,
    pub recent_uploads: Vec<RecentUpload>,
    pub last_updated: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_id_roundtrip() {
        let id = Uuid::new_v4();
        assert_eq!(parse_vector_id(&vector_id(id, 7)), Some((id, 7)));
        assert_eq!(parse_vector_id("garbage"), None);
        assert_eq!(parse_vector_id("not-a-uuid#1"), None);
    }

    #[test]
    fn test_normalize_tags() {
        assert_eq!(
            normalize_tags(["Leave", " leave", "", "HR "]),
            vec!["hr".to_string(), "leave".to_string()]
        );
    }
}
