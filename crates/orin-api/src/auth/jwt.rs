use anyhow::Result;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::models::Role;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // User ID (Subject)
    pub email: String,
    pub role: Role,
    pub iat: u64,
    pub exp: u64,
}

impl Claims {
    pub fn user_id(&self) -> Option<Uuid> {
        Uuid::parse_str(&self.sub).ok()
    }
}

pub struct JwtManager {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    expiration_seconds: u64,
}

impl JwtManager {
    pub fn new(secret: &str, expiration_seconds: u64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            expiration_seconds,
        }
    }

    pub fn expiration_seconds(&self) -> u64 {
        self.expiration_seconds
    }

    pub fn generate_token(&self, user_id: Uuid, email: &str, role: Role) -> Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();

        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            role,
            iat: now,
            exp: now + self.expiration_seconds,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    pub fn validate_token(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        let token_data = decode::<Claims>(token, &self.decoding_key, &validation)?;
        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_and_validate() {
        let jwt = JwtManager::new("secret", 60);
        let id = Uuid::new_v4();
        let token = jwt.generate_token(id, "staff@orin.go.id", Role::User).unwrap();

        let claims = jwt.validate_token(&token).unwrap();
        assert_eq!(claims.user_id(), Some(id));
        assert_eq!(claims.email, "staff@orin.go.id");
        assert_eq!(claims.role, Role::User);
    }

    #[test]
    fn test_rejects_foreign_signature() {
        let token = JwtManager::new("one", 60)
            .generate_token(Uuid::new_v4(), "a@b.c", Role::Admin)
            .unwrap();
        assert!(JwtManager::new("two", 60).validate_token(&token).is_err());
    }

    #[test]
    fn test_rejects_expired() {
        let jwt = JwtManager::new("secret", 0);
        let token = jwt.generate_token(Uuid::new_v4(), "a@b.c", Role::User).unwrap();
        std::thread::sleep(std::time::Duration::from_millis(1100));
        assert!(jwt.validate_token(&token).is_err());
    }
}
