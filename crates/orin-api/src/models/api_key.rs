use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Stored API key. Only the SHA-256 hash of the secret is kept.
#[derive(Debug, Clone)]
pub struct ApiKey {
    pub id: Uuid,
    pub user_id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub key_hash: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub revoked_at: Option<DateTime<Utc>>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl ApiKey {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        !self.revoked && self.expires_at.is_none_or(|exp| exp > now)
    }
}

/// What a key listing shows.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyInfo {
    pub id: Uuid,
    pub name: String,
    pub key_prefix: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked: bool,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl From<&ApiKey> for ApiKeyInfo {
    fn from(key: &ApiKey) -> Self {
        Self {
            id: key.id,
            name: key.name.clone(),
            key_prefix: key.key_prefix.clone(),
            created_at: key.created_at,
            expires_at: key.expires_at,
            revoked: key.revoked,
            last_used_at: key.last_used_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn key() -> ApiKey {
        ApiKey {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "ci".into(),
            key_prefix: "orin_abcdefg".into(),
            key_hash: "00".into(),
            created_at: Utc::now(),
            expires_at: None,
            revoked: false,
            revoked_at: None,
            last_used_at: None,
        }
    }

    #[test]
    fn test_usable_unless_revoked_or_expired() {
        let now = Utc::now();
        assert!(key().is_usable(now));

        let mut revoked = key();
        revoked.revoked = true;
        assert!(!revoked.is_usable(now));

        let mut expired = key();
        expired.expires_at = Some(now - Duration::minutes(1));
        assert!(!expired.is_usable(now));
    }
}
