//! Registration, login, credential resolution, API keys and user management.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use crate::auth::{api_key, Identity, JwtManager, PasswordService};
use crate::logging::{ActivityLog, ActivityLogger, ActivityStatus, ActivityType};
use crate::models::api_key::ApiKeyInfo;
use crate::models::auth::{
    AdminCreateUserRequest, AdminUpdateUserRequest, CreateApiKeyRequest, CreatedApiKey,
    LoginRequest, RegisterRequest, TokenResponse, UpdateProfileRequest,
};
use crate::models::user::{normalize_department, normalize_email, UserProfile};
use crate::models::{ApiKey, Role, User};
use crate::repositories::{is_duplicate, ApiKeyRepository, UserRepository};
use crate::utils::error::{ApiError, ApiResult};

/// Department assigned when registration does not name one.
pub const DEFAULT_DEPARTMENT: &str = "general";

pub struct AuthService {
    users: Arc<dyn UserRepository>,
    api_keys: Arc<dyn ApiKeyRepository>,
    jwt: Arc<JwtManager>,
    admin_emails: Vec<String>,
    activity: ActivityLogger,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserRepository>,
        api_keys: Arc<dyn ApiKeyRepository>,
        jwt: Arc<JwtManager>,
        admin_emails: &[String],
        activity: ActivityLogger,
    ) -> Self {
        Self {
            users,
            api_keys,
            jwt,
            admin_emails: admin_emails.iter().map(|e| normalize_email(e)).collect(),
            activity,
        }
    }

    pub fn is_admin(&self, user: &User) -> bool {
        user.role == Role::Admin || self.admin_emails.contains(&user.email)
    }

    fn profile(&self, user: &User) -> UserProfile {
        UserProfile::from_user(user, self.is_admin(user))
    }

    fn hash_password(password: &str) -> ApiResult<String> {
        PasswordService::hash(password).map_err(|e| ApiError::InternalError(e.to_string()))
    }

    async fn load_user(&self, id: Uuid) -> ApiResult<User> {
        self.users
            .find_by_id(id)
            .await?
            .ok_or_else(|| ApiError::NotFound(format!("User {id} not found")))
    }

    async fn insert_user(&self, user: &User) -> ApiResult<()> {
        self.users.create(user).await.map_err(|e| {
            if is_duplicate(&e) {
                ApiError::Conflict(format!("Email {} is already registered", user.email))
            } else {
                ApiError::DatabaseError(e.to_string())
            }
        })
    }

    /// Self-service registration. Always a standard user, unless the email
    /// is a configured bootstrap admin.
    pub async fn register(&self, req: RegisterRequest) -> ApiResult<UserProfile> {
        req.validate()?;

        let email = normalize_email(&req.email);
        let role = if self.admin_emails.contains(&email) {
            Role::Admin
        } else {
            Role::User
        };
        let department = req
            .department
            .as_deref()
            .filter(|d| !d.trim().is_empty())
            .unwrap_or(DEFAULT_DEPARTMENT);

        let user = User::new(
            &email,
            Self::hash_password(&req.password)?,
            req.full_name,
            department,
            role,
        );
        self.insert_user(&user).await?;

        info!("Registered user {} in department '{}'", user.email, user.department);
        self.activity.log(
            ActivityLog::builder(ActivityType::Registered)
                .actor(user.id, &user.email)
                .target(user.id)
                .build(),
        );

        Ok(self.profile(&user))
    }

    pub async fn login(&self, req: LoginRequest) -> ApiResult<TokenResponse> {
        req.validate()?;
        let email = normalize_email(&req.email);

        let user = match self.users.find_by_email(&email).await? {
            Some(user) if user.is_active && PasswordService::verify(&req.password, &user.password_hash) => user,
            found => {
                warn!("Login failed for {}", email);
                self.activity.log(
                    ActivityLog::builder(ActivityType::LoginFailed)
                        .actor_email(&email)
                        .status(ActivityStatus::Denied)
                        .detail(if found.is_some() { "bad credentials or inactive" } else { "unknown email" })
                        .build(),
                );
                return Err(ApiError::Unauthorized("Incorrect email or password".into()));
            }
        };

        let access_token = self
            .jwt
            .generate_token(user.id, &user.email, user.role)
            .map_err(|e| ApiError::InternalError(format!("Token generation failed: {e}")))?;

        info!("User {} logged in", user.email);
        self.activity.log(
            ActivityLog::builder(ActivityType::Login)
                .actor(user.id, &user.email)
                .build(),
        );

        Ok(TokenResponse {
            access_token,
            token_type: "bearer".into(),
            expires_in: self.jwt.expiration_seconds(),
        })
    }

    /// Resolve a bearer JWT into the caller's identity.
    pub async fn authenticate_token(&self, token: &str) -> ApiResult<Identity> {
        let claims = self
            .jwt
            .validate_token(token)
            .map_err(|_| ApiError::Unauthorized("Could not validate credentials".into()))?;
        let user_id = claims
            .user_id()
            .ok_or_else(|| ApiError::Unauthorized("Could not validate credentials".into()))?;

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ApiError::Unauthorized("User not found or inactive".into()))?;

        Ok(Identity::from_user(&user, self.is_admin(&user), None))
    }

    /// Resolve an API key into its owner's identity.
    pub async fn authenticate_api_key(&self, key: &str) -> ApiResult<Identity> {
        if !api_key::looks_like_api_key(key) {
            return Err(ApiError::Unauthorized("Invalid API key".into()));
        }

        let now = Utc::now();
        let stored = self
            .api_keys
            .find_by_hash(&api_key::hash(key))
            .await?
            .filter(|k| k.is_usable(now))
            .ok_or_else(|| ApiError::Unauthorized("Invalid, revoked or expired API key".into()))?;

        let owner = self
            .users
            .find_by_id(stored.user_id)
            .await?
            .filter(|u| u.is_active)
            .ok_or_else(|| ApiError::Unauthorized("API key owner inactive".into()))?;

        if let Err(e) = self.api_keys.touch(stored.id, now).await {
            warn!("Failed to record API key usage for {}: {}", stored.id, e);
        }

        Ok(Identity::from_user(&owner, self.is_admin(&owner), Some(stored.id)))
    }

    pub async fn get_profile(&self, identity: &Identity) -> ApiResult<UserProfile> {
        let user = self.load_user(identity.user_id).await?;
        Ok(self.profile(&user))
    }

    pub async fn update_profile(
        &self,
        identity: &Identity,
        req: UpdateProfileRequest,
    ) -> ApiResult<UserProfile> {
        req.validate()?;
        let mut user = self.load_user(identity.user_id).await?;

        if let Some(full_name) = req.full_name {
            user.full_name = Some(full_name.trim().to_string());
        }
        if let Some(department) = req.department {
            user.department = normalize_department(&department);
        }
        if let Some(password) = req.password {
            user.password_hash = Self::hash_password(&password)?;
        }
        user.updated_at = Utc::now();

        self.users.update(&user).await?;
        info!("User {} updated their profile", user.email);
        Ok(self.profile(&user))
    }

    pub async fn create_api_key(
        &self,
        identity: &Identity,
        req: CreateApiKeyRequest,
    ) -> ApiResult<CreatedApiKey> {
        req.validate()?;
        let now = Utc::now();
        if req.expires_at.is_some_and(|exp| exp <= now) {
            return Err(ApiError::BadRequest("expires_at must be in the future".into()));
        }

        let generated = api_key::generate();
        let key = ApiKey {
            id: Uuid::new_v4(),
            user_id: identity.user_id,
            name: req.name.trim().to_string(),
            key_prefix: generated.display_prefix,
            key_hash: generated.hash,
            created_at: now,
            expires_at: req.expires_at,
            revoked: false,
            revoked_at: None,
            last_used_at: None,
        };
        self.api_keys.create(&key).await?;

        info!("User {} created API key {}", identity.email, key.id);
        self.activity.log(
            ActivityLog::builder(ActivityType::ApiKeyCreated)
                .actor(identity.user_id, &identity.email)
                .target(key.id)
                .build(),
        );

        Ok(CreatedApiKey {
            api_key: generated.plaintext,
            info: ApiKeyInfo::from(&key),
        })
    }

    pub async fn list_api_keys(&self, identity: &Identity) -> ApiResult<Vec<ApiKeyInfo>> {
        let keys = self.api_keys.list_for_user(identity.user_id).await?;
        Ok(keys.iter().map(ApiKeyInfo::from).collect())
    }

    /// Owners revoke their own keys; admins revoke any key.
    pub async fn revoke_api_key(&self, identity: &Identity, key_id: Uuid) -> ApiResult<()> {
        let key = self
            .api_keys
            .find_by_id(key_id)
            .await?
            .filter(|k| identity.is_admin || k.user_id == identity.user_id)
            .ok_or_else(|| ApiError::NotFound(format!("API key {key_id} not found")))?;

        if !self.api_keys.revoke(key.id, Utc::now()).await? {
            return Err(ApiError::NotFound(format!("API key {key_id} already revoked")));
        }

        info!("API key {} revoked by {}", key.id, identity.email);
        self.activity.log(
            ActivityLog::builder(ActivityType::ApiKeyRevoked)
                .actor(identity.user_id, &identity.email)
                .target(key.id)
                .build(),
        );
        Ok(())
    }

    pub async fn admin_create_user(
        &self,
        admin: &Identity,
        req: AdminCreateUserRequest,
    ) -> ApiResult<UserProfile> {
        req.validate()?;

        let user = User::new(
            &req.email,
            Self::hash_password(&req.password)?,
            req.full_name,
            &req.department,
            req.role,
        );
        self.insert_user(&user).await?;

        info!("Admin {} created user {} ({})", admin.email, user.email, user.role);
        self.activity.log(
            ActivityLog::builder(ActivityType::UserCreated)
                .actor(admin.user_id, &admin.email)
                .target(user.id)
                .detail(user.role.as_str())
                .build(),
        );
        Ok(self.profile(&user))
    }

    pub async fn admin_list_users(&self) -> ApiResult<Vec<UserProfile>> {
        let users = self.users.list().await?;
        Ok(users.iter().map(|u| self.profile(u)).collect())
    }

    pub async fn admin_update_user(
        &self,
        admin: &Identity,
        user_id: Uuid,
        req: AdminUpdateUserRequest,
    ) -> ApiResult<UserProfile> {
        req.validate()?;
        let mut user = self.load_user(user_id).await?;

        if user.id == admin.user_id
            && (req.is_active == Some(false) || req.role == Some(Role::User))
        {
            return Err(ApiError::BadRequest(
                "Admins cannot deactivate or demote themselves".into(),
            ));
        }

        if let Some(full_name) = req.full_name {
            user.full_name = Some(full_name.trim().to_string());
        }
        if let Some(department) = req.department {
            user.department = normalize_department(&department);
        }
        if let Some(role) = req.role {
            user.role = role;
        }
        if let Some(is_active) = req.is_active {
            user.is_active = is_active;
        }
        user.updated_at = Utc::now();
        self.users.update(&user).await?;

        info!("Admin {} updated user {}", admin.email, user.email);
        self.activity.log(
            ActivityLog::builder(ActivityType::UserUpdated)
                .actor(admin.user_id, &admin.email)
                .target(user.id)
                .build(),
        );
        Ok(self.profile(&user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repositories::memory::MemoryStore;

    fn service() -> (AuthService, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let service = AuthService::new(
            store.clone(),
            store.clone(),
            Arc::new(JwtManager::new("test-secret", 1800)),
            &["Boss@Orin.go.id".to_string()],
            ActivityLogger::disabled(),
        );
        (service, store)
    }

    fn register_req(email: &str, department: Option<&str>) -> RegisterRequest {
        RegisterRequest {
            email: email.into(),
            password: "password123".into(),
            full_name: Some("Staff".into()),
            department: department.map(str::to_string),
        }
    }

    #[tokio::test]
    async fn test_register_then_login() {
        let (service, _) = service();
        let profile = service
            .register(register_req("Staff@Orin.go.id", Some("HR")))
            .await
            .unwrap();
        assert_eq!(profile.email, "staff@orin.go.id");
        assert_eq!(profile.department, "hr");
        assert_eq!(profile.role, Role::User);
        assert!(!profile.is_admin);

        let token = service
            .login(LoginRequest {
                email: "staff@orin.go.id".into(),
                password: "password123".into(),
            })
            .await
            .unwrap();
        assert_eq!(token.token_type, "bearer");

        let identity = service.authenticate_token(&token.access_token).await.unwrap();
        assert_eq!(identity.user_id, profile.id);
        assert_eq!(identity.department, "hr");
    }

    #[tokio::test]
    async fn test_register_validation_and_duplicates() {
        let (service, _) = service();
        let short = RegisterRequest {
            password: "short".into(),
            ..register_req("a@orin.go.id", None)
        };
        assert!(matches!(service.register(short).await, Err(ApiError::BadRequest(_))));

        service.register(register_req("a@orin.go.id", None)).await.unwrap();
        assert!(matches!(
            service.register(register_req("A@orin.go.id", None)).await,
            Err(ApiError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_bootstrap_admin_email() {
        let (service, _) = service();
        let profile = service.register(register_req("boss@orin.go.id", None)).await.unwrap();
        assert_eq!(profile.role, Role::Admin);
        assert!(profile.is_admin);
        assert_eq!(profile.department, DEFAULT_DEPARTMENT);
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let (service, _) = service();
        service.register(register_req("a@orin.go.id", None)).await.unwrap();
        let result = service
            .login(LoginRequest {
                email: "a@orin.go.id".into(),
                password: "wrong-password".into(),
            })
            .await;
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }

    #[tokio::test]
    async fn test_api_key_lifecycle() {
        let (service, _) = service();
        let profile = service.register(register_req("a@orin.go.id", Some("hr"))).await.unwrap();
        let identity = service.authenticate_token(
            &service
                .login(LoginRequest { email: "a@orin.go.id".into(), password: "password123".into() })
                .await
                .unwrap()
                .access_token,
        )
        .await
        .unwrap();

        let created = service
            .create_api_key(&identity, CreateApiKeyRequest { name: "ci".into(), expires_at: None })
            .await
            .unwrap();
        assert!(created.api_key.starts_with("orin_"));

        let via_key = service.authenticate_api_key(&created.api_key).await.unwrap();
        assert_eq!(via_key.user_id, profile.id);
        assert_eq!(via_key.api_key_id, Some(created.info.id));

        let listed = service.list_api_keys(&identity).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].last_used_at.is_some());

        service.revoke_api_key(&identity, created.info.id).await.unwrap();
        assert!(matches!(
            service.authenticate_api_key(&created.api_key).await,
            Err(ApiError::Unauthorized(_))
        ));
    }

    #[tokio::test]
    async fn test_other_users_cannot_revoke_key() {
        let (service, _) = service();
        let owner = service.register(register_req("a@orin.go.id", None)).await.unwrap();
        let other = service.register(register_req("b@orin.go.id", None)).await.unwrap();
        let owner_id = Identity {
            user_id: owner.id,
            email: owner.email.clone(),
            full_name: None,
            department: owner.department.clone(),
            role: Role::User,
            is_admin: false,
            api_key_id: None,
        };
        let other_id = Identity { user_id: other.id, email: other.email.clone(), ..owner_id.clone() };

        let created = service
            .create_api_key(&owner_id, CreateApiKeyRequest { name: "k".into(), expires_at: None })
            .await
            .unwrap();
        assert!(matches!(
            service.revoke_api_key(&other_id, created.info.id).await,
            Err(ApiError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_deactivated_user_loses_access() {
        let (service, _) = service();
        let admin = service.register(register_req("boss@orin.go.id", None)).await.unwrap();
        let admin_identity = Identity {
            user_id: admin.id,
            email: admin.email.clone(),
            full_name: None,
            department: admin.department.clone(),
            role: Role::Admin,
            is_admin: true,
            api_key_id: None,
        };
        let staff = service
            .admin_create_user(
                &admin_identity,
                AdminCreateUserRequest {
                    email: "staff@orin.go.id".into(),
                    password: "password123".into(),
                    full_name: None,
                    department: "Finance".into(),
                    role: Role::User,
                },
            )
            .await
            .unwrap();
        assert_eq!(staff.department, "finance");

        let token = service
            .login(LoginRequest { email: "staff@orin.go.id".into(), password: "password123".into() })
            .await
            .unwrap();

        service
            .admin_update_user(
                &admin_identity,
                staff.id,
                AdminUpdateUserRequest { is_active: Some(false), ..Default::default() },
            )
            .await
            .unwrap();

        assert!(matches!(
            service.authenticate_token(&token.access_token).await,
            Err(ApiError::Unauthorized(_))
        ));
        assert_eq!(service.admin_list_users().await.unwrap().len(), 2);
    }
}
