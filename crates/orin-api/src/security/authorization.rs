use std::sync::Arc;
use tracing::{debug, warn};

use crate::auth::Identity;
use crate::models::user::normalize_department;
use crate::models::Document;
use crate::repositories::DocumentRepository;
use crate::utils::error::{ApiError, ApiResult};

/// Department-scoped access policy.
///
/// Admins reach every department. Everyone else reaches their own
/// department plus the configured shared ones.
pub struct DepartmentAuthorization {
    documents: Arc<dyn DocumentRepository>,
    shared_departments: Vec<String>,
}

impl DepartmentAuthorization {
    pub fn new(documents: Arc<dyn DocumentRepository>, shared_departments: &[String]) -> Self {
        Self {
            documents,
            shared_departments: shared_departments
                .iter()
                .map(|d| normalize_department(d))
                .collect(),
        }
    }

    fn standard_departments(&self, identity: &Identity) -> Vec<String> {
        let mut departments = vec![identity.department.clone()];
        for shared in &self.shared_departments {
            if !departments.contains(shared) {
                departments.push(shared.clone());
            }
        }
        departments
    }

    /// Every department the caller may read from.
    pub async fn accessible_departments(&self, identity: &Identity) -> ApiResult<Vec<String>> {
        if identity.is_admin {
            let departments = self
                .documents
                .departments()
                .await
                .map_err(|e| ApiError::DatabaseError(e.to_string()))?;
            debug!("Admin {} reaches {} departments", identity.email, departments.len());
            return Ok(departments);
        }
        Ok(self.standard_departments(identity))
    }

    /// Departments a request is scoped to. A requested department outside
    /// the caller's reach is forbidden, never silently widened.
    pub async fn resolve_scope(
        &self,
        identity: &Identity,
        requested: Option<&str>,
    ) -> ApiResult<Vec<String>> {
        match requested.map(normalize_department) {
            Some(department) => {
                if identity.is_admin || self.standard_departments(identity).contains(&department) {
                    Ok(vec![department])
                } else {
                    warn!(
                        "User {} denied access to department '{}'",
                        identity.email, department
                    );
                    Err(ApiError::Forbidden(format!(
                        "No access to department '{department}'"
                    )))
                }
            }
            None => self.accessible_departments(identity).await,
        }
    }

    pub fn can_view(&self, identity: &Identity, doc: &Document) -> bool {
        identity.is_admin || self.standard_departments(identity).contains(&doc.department)
    }

    /// Standard users may only file documents into departments they read.
    pub fn require_upload_to(&self, identity: &Identity, department: &str) -> ApiResult<()> {
        if identity.is_admin || self.standard_departments(identity).iter().any(|d| d == department) {
            Ok(())
        } else {
            Err(ApiError::Forbidden(format!(
                "Cannot upload into department '{department}'"
            )))
        }
    }
}
