use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Activity type categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    Login,
    LoginFailed,
    Registered,
    ApiKeyCreated,
    ApiKeyRevoked,
    DocumentUploaded,
    DocumentUploadFailed,
    DocumentDeleted,
    ChatAnswered,
    ChatFailed,
    UserCreated,
    UserUpdated,
    AdminAccessDenied,
}

impl ActivityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Login => "login",
            Self::LoginFailed => "login_failed",
            Self::Registered => "registered",
            Self::ApiKeyCreated => "api_key_created",
            Self::ApiKeyRevoked => "api_key_revoked",
            Self::DocumentUploaded => "document_uploaded",
            Self::DocumentUploadFailed => "document_upload_failed",
            Self::DocumentDeleted => "document_deleted",
            Self::ChatAnswered => "chat_answered",
            Self::ChatFailed => "chat_failed",
            Self::UserCreated => "user_created",
            Self::UserUpdated => "user_updated",
            Self::AdminAccessDenied => "admin_access_denied",
        }
    }
}

/// Activity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityStatus {
    Success,
    Error,
    Denied,
}

impl ActivityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Error => "error",
            Self::Denied => "denied",
        }
    }
}

/// Complete activity log entry
#[derive(Debug, Clone)]
pub struct ActivityLog {
    pub actor_id: Option<Uuid>,
    pub actor_email: Option<String>,

    pub activity_type: ActivityType,
    pub activity_status: ActivityStatus,

    /// Document, user or key the activity was about
    pub target_id: Option<Uuid>,
    pub detail: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: Option<i64>,

    pub created_at: DateTime<Utc>,
}

impl ActivityLog {
    pub fn builder(activity_type: ActivityType) -> ActivityLogBuilder {
        ActivityLogBuilder::new(activity_type)
    }
}

/// Builder pattern for ActivityLog
pub struct ActivityLogBuilder {
    log: ActivityLog,
}

impl ActivityLogBuilder {
    pub fn new(activity_type: ActivityType) -> Self {
        Self {
            log: ActivityLog {
                actor_id: None,
                actor_email: None,
                activity_type,
                activity_status: ActivityStatus::Success,
                target_id: None,
                detail: None,
                error_message: None,
                duration_ms: None,
                created_at: Utc::now(),
            },
        }
    }

    pub fn actor(mut self, id: Uuid, email: impl Into<String>) -> Self {
        self.log.actor_id = Some(id);
        self.log.actor_email = Some(email.into());
        self
    }

    pub fn actor_email(mut self, email: impl Into<String>) -> Self {
        self.log.actor_email = Some(email.into());
        self
    }

    pub fn status(mut self, status: ActivityStatus) -> Self {
        self.log.activity_status = status;
        self
    }

    pub fn target(mut self, id: Uuid) -> Self {
        self.log.target_id = Some(id);
        self
    }

    pub fn detail(mut self, detail: impl Into<String>) -> Self {
        self.log.detail = Some(detail.into());
        self
    }

    pub fn duration_ms(mut self, ms: u128) -> Self {
        self.log.duration_ms = Some(i64::try_from(ms).unwrap_or(i64::MAX));
        self
    }

    pub fn error(mut self, message: impl Into<String>) -> Self {
        self.log.error_message = Some(message.into());
        self.log.activity_status = ActivityStatus::Error;
        self
    }

    pub fn build(self) -> ActivityLog {
        self.log
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_error_sets_status() {
        let id = Uuid::new_v4();
        let log = ActivityLog::builder(ActivityType::DocumentUploadFailed)
            .actor(id, "staff@orin.go.id")
            .detail("policy.pdf")
            .error("vector index unavailable")
            .build();

        assert_eq!(log.activity_status, ActivityStatus::Error);
        assert_eq!(log.actor_id, Some(id));
        assert_eq!(log.activity_type.as_str(), "document_upload_failed");
    }
}
