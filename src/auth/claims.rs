/// JWT Claims structure
///
/// Payload shared by access, refresh and reset-password tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::roles::Role;
use crate::error::{AppError, AuthError};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (user ID as UUID string)
    pub sub: String,
    pub email: String,
    pub role: Role,
    /// Expiration time (Unix timestamp)
    pub exp: i64,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    pub iss: String,
    /// Unique token id; keeps tokens minted in the same second distinct.
    pub jti: String,
    /// IP the refresh token was issued to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by_ip: Option<String>,
}

impl Claims {
    pub fn new(
        user_id: Uuid,
        email: String,
        role: Role,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        issuer: String,
    ) -> Self {
        Self {
            sub: user_id.to_string(),
            email,
            role,
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            iss: issuer,
            jti: Uuid::new_v4().to_string(),
            created_by_ip: None,
        }
    }

    pub fn with_created_by_ip(mut self, ip: Option<&str>) -> Self {
        self.created_by_ip = ip.map(str::to_string);
        self
    }

    /// Extract user ID from claims
    pub fn user_id(&self) -> Result<Uuid, AppError> {
        Uuid::parse_str(&self.sub).map_err(|_| AppError::Auth(AuthError::TokenInvalid))
    }
}
