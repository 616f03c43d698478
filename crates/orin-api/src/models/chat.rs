use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One answered question, kept for conversational context.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_id: Option<Uuid>,
    pub department: Option<String>,
    pub question: String,
    pub answer: String,
    pub source_document_ids: Vec<Uuid>,
    pub created_at: DateTime<Utc>,
}

// ===== REQUEST MODELS =====

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    /// Free-form context; `department` and `document_type` keys are honoured.
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

impl ChatRequest {
    fn context_str(&self, key: &str) -> Option<String> {
        self.context
            .as_ref()
            .and_then(|c| c.get(key))
            .and_then(|v| v.as_str())
            .map(str::to_string)
    }

    /// Explicit field first, then the context object.
    pub fn department_filter(&self) -> Option<String> {
        self.department
            .clone()
            .or_else(|| self.context_str("department"))
            .filter(|d| !d.trim().is_empty())
    }

    pub fn document_type_filter(&self) -> Option<String> {
        self.document_type
            .clone()
            .or_else(|| self.context_str("document_type"))
            .filter(|d| !d.trim().is_empty())
    }
}

// ===== RESPONSE MODELS =====

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceRef {
    pub document_id: Uuid,
    pub filename: String,
    pub department: String,
    pub document_type: String,
    pub score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatResponse {
    pub answer: String,
    pub sources: Vec<SourceRef>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_filters_fall_back_to_context() {
        let req: ChatRequest = serde_json::from_value(json!({
            "message": "leave?",
            "context": {"department": "hr", "document_type": "policy"}
        }))
        .unwrap();
        assert_eq!(req.department_filter().as_deref(), Some("hr"));
        assert_eq!(req.document_type_filter().as_deref(), Some("policy"));

        let req: ChatRequest = serde_json::from_value(json!({
            "message": "leave?",
            "department": "finance",
            "context": {"department": "hr"}
        }))
        .unwrap();
        assert_eq!(req.department_filter().as_deref(), Some("finance"));
    }
}
