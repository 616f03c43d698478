use serde::Serialize;
use uuid::Uuid;

use crate::models::{Role, User};

/// The authenticated caller, attached to request extensions by the
/// authentication middleware.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    pub full_name: Option<String>,
    pub department: String,
    pub role: Role,
    pub is_admin: bool,
    /// Set when the request authenticated with an API key.
    pub api_key_id: Option<Uuid>,
}

impl Identity {
    pub fn from_user(user: &User, is_admin: bool, api_key_id: Option<Uuid>) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            full_name: user.full_name.clone(),
            department: user.department.clone(),
            role: user.role,
            is_admin,
            api_key_id,
        }
    }
}
