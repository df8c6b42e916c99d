/// JWT Token Issuer
///
/// Signs and verifies the three token kinds. Each kind has its own secret
/// and lifetime, so a refresh token never verifies as an access token.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::Serialize;

use crate::auth::claims::Claims;
use crate::configuration::JwtSettings;
use crate::error::{AppError, AuthError, ConfigError};
use crate::store::User;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    Access,
    Refresh,
    ResetPassword,
}

/// A signed token and the exact instant it stops being valid.
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone)]
struct KeyPair {
    encoding: EncodingKey,
    decoding: DecodingKey,
    lifetime: Duration,
}

impl KeyPair {
    fn new(secret: &str, lifetime: Duration) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            lifetime,
        }
    }
}

#[derive(Clone)]
pub struct TokenIssuer {
    issuer: String,
    access: KeyPair,
    refresh: KeyPair,
    reset_password: KeyPair,
}

impl TokenIssuer {
    /// Builds the issuer from validated settings.
    ///
    /// # Errors
    /// Returns a configuration error if a secret is empty or a lifetime
    /// does not parse.
    pub fn new(settings: &JwtSettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            issuer: settings.issuer.clone(),
            access: KeyPair::new(&settings.access_token_secret, settings.access_token_lifetime()?),
            refresh: KeyPair::new(
                &settings.refresh_token_secret,
                settings.refresh_token_lifetime()?,
            ),
            reset_password: KeyPair::new(
                &settings.reset_password_token_secret,
                settings.reset_password_token_lifetime()?,
            ),
        })
    }

    fn keys(&self, kind: TokenKind) -> &KeyPair {
        match kind {
            TokenKind::Access => &self.access,
            TokenKind::Refresh => &self.refresh,
            TokenKind::ResetPassword => &self.reset_password,
        }
    }

    pub fn issue(
        &self,
        kind: TokenKind,
        user: &User,
        created_by_ip: Option<&str>,
    ) -> Result<IssuedToken, AppError> {
        self.issue_at(kind, user, created_by_ip, Utc::now())
    }

    /// Signs a token as if issued at `now`.
    ///
    /// `created_by_ip` is only embedded in refresh tokens.
    pub fn issue_at(
        &self,
        kind: TokenKind,
        user: &User,
        created_by_ip: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<IssuedToken, AppError> {
        let keys = self.keys(kind);
        let expires_at = now
            .checked_add_signed(keys.lifetime)
            .ok_or_else(|| AppError::Internal(format!("{:?} token expiry out of range", kind)))?;

        let mut claims = Claims::new(
            user.id,
            user.email.clone(),
            user.role,
            now,
            expires_at,
            self.issuer.clone(),
        );
        if kind == TokenKind::Refresh {
            claims = claims.with_created_by_ip(created_by_ip);
        }

        let token = encode(&Header::default(), &claims, &keys.encoding)
            .map_err(|e| AppError::Internal(format!("Token generation failed: {}", e)))?;

        Ok(IssuedToken { token, expires_at })
    }

    /// Verifies signature, issuer and expiry for `kind`.
    pub fn decode(&self, kind: TokenKind, token: &str) -> Result<Claims, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&self.issuer]);
        validation.set_required_spec_claims(&["exp", "sub", "iss"]);
        validation.leeway = 0;

        decode::<Claims>(token, &self.keys(kind).decoding, &validation)
            .map(|data| data.claims)
            .map_err(|e| {
                tracing::warn!(kind = ?kind, "JWT validation error: {}", e);
                match e.kind() {
                    jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
                        AppError::Auth(AuthError::TokenExpired)
                    }
                    _ => AppError::Auth(AuthError::TokenInvalid),
                }
            })
    }
}
