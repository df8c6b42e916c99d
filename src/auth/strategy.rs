/// Request Authentication Strategies
///
/// Two independent ways of turning a request into an [`Identity`]:
/// a bearer access token, or the refresh token cookie. Routes pick one
/// when they install [`crate::middleware::AuthGuard`].

use actix_web::cookie::{time::OffsetDateTime, Cookie};
use actix_web::HttpRequest;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::auth::jwt::{IssuedToken, TokenIssuer, TokenKind};
use crate::auth::refresh_token::validate_refresh_token;
use crate::auth::roles::Role;
use crate::error::{AppError, AuthError};
use crate::store::{RefreshTokenRecord, RefreshTokenStore, UserStore};

pub const REFRESH_TOKEN_COOKIE: &str = "refreshToken";

/// Authenticated caller attached to request extensions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Identity {
    pub id: Uuid,
    pub email: String,
    pub role: Role,
}

#[derive(Debug, Clone)]
pub struct Authenticated {
    pub identity: Identity,
    /// Set by the refresh strategy; the validated record for rotation.
    pub refresh_record: Option<RefreshTokenRecord>,
}

/// Implementations are shared across workers; the returned future is not
/// required to be `Send` because actix handlers run on one thread.
#[async_trait(?Send)]
pub trait AuthStrategy: Send + Sync {
    async fn authenticate(&self, req: &HttpRequest) -> Result<Authenticated, AppError>;
}

/// `Authorization: Bearer <access token>`.
pub struct AccessTokenStrategy {
    issuer: Arc<TokenIssuer>,
}

impl AccessTokenStrategy {
    pub fn new(issuer: Arc<TokenIssuer>) -> Self {
        Self { issuer }
    }
}

fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(actix_web::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

#[async_trait(?Send)]
impl AuthStrategy for AccessTokenStrategy {
    async fn authenticate(&self, req: &HttpRequest) -> Result<Authenticated, AppError> {
        let token = bearer_token(req).ok_or(AppError::Auth(AuthError::MissingToken))?;
        let claims = self.issuer.decode(TokenKind::Access, token)?;

        Ok(Authenticated {
            identity: Identity {
                id: claims.user_id()?,
                email: claims.email,
                role: claims.role,
            },
            refresh_record: None,
        })
    }
}

/// Cookie payload holding the refresh token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenCookie {
    pub refresh_token: String,
    pub expiration_date_time: DateTime<Utc>,
}

impl RefreshTokenCookie {
    pub fn from_issued(issued: &IssuedToken) -> Self {
        Self {
            refresh_token: issued.token.clone(),
            expiration_date_time: issued.expires_at,
        }
    }

    /// `HttpOnly` cookie expiring with the token.
    pub fn to_cookie(&self) -> Result<Cookie<'static>, AppError> {
        let json = serde_json::to_string(self)
            .map_err(|e| AppError::Internal(format!("cookie serialization failed: {}", e)))?;
        let expires = OffsetDateTime::from_unix_timestamp(self.expiration_date_time.timestamp())
            .map_err(|e| AppError::Internal(format!("cookie expiry out of range: {}", e)))?;

        Ok(Cookie::build(REFRESH_TOKEN_COOKIE, urlencoding::encode(&json).into_owned())
            .http_only(true)
            .path("/")
            .expires(expires)
            .finish())
    }

    /// Parses a cookie value, percent-encoded or not.
    pub fn parse(value: &str) -> Option<Self> {
        let decoded = urlencoding::decode(value).ok()?;
        serde_json::from_str(&decoded).ok()
    }

    pub fn from_request(req: &HttpRequest) -> Option<Self> {
        req.cookie(REFRESH_TOKEN_COOKIE)
            .and_then(|c| Self::parse(c.value()))
            .filter(|c| !c.refresh_token.is_empty())
    }
}

/// Refresh token from the cookie, checked against signature, user and
/// persisted state, in that order.
pub struct RefreshTokenStrategy {
    issuer: Arc<TokenIssuer>,
    users: Arc<dyn UserStore>,
    tokens: Arc<dyn RefreshTokenStore>,
}

impl RefreshTokenStrategy {
    pub fn new(
        issuer: Arc<TokenIssuer>,
        users: Arc<dyn UserStore>,
        tokens: Arc<dyn RefreshTokenStore>,
    ) -> Self {
        Self { issuer, users, tokens }
    }
}

#[async_trait(?Send)]
impl AuthStrategy for RefreshTokenStrategy {
    async fn authenticate(&self, req: &HttpRequest) -> Result<Authenticated, AppError> {
        let cookie =
            RefreshTokenCookie::from_request(req).ok_or(AppError::Auth(AuthError::MissingToken))?;
        let claims = self.issuer.decode(TokenKind::Refresh, &cookie.refresh_token)?;

        let user = self
            .users
            .find_by_id(claims.user_id()?)
            .await?
            .ok_or(AppError::Auth(AuthError::TokenInvalid))?;

        let record =
            validate_refresh_token(self.tokens.as_ref(), &cookie.refresh_token, Utc::now())
                .await?
                .ok_or(AppError::Auth(AuthError::TokenInvalid))?;

        if record.user_id != user.id {
            tracing::warn!(token_id = %record.id, "Refresh token subject does not match its owner");
            return Err(AppError::Auth(AuthError::TokenInvalid));
        }

        Ok(Authenticated {
            identity: Identity {
                id: user.id,
                email: user.email,
                role: user.role,
            },
            refresh_record: Some(record),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::refresh_token::start_session;
    use crate::auth::test_support::{jwt_settings, user_with_role};
    use crate::store::{InMemoryRefreshTokenStore, InMemoryUserStore};
    use actix_web::test::TestRequest;

    struct Fixture {
        issuer: Arc<TokenIssuer>,
        users: Arc<InMemoryUserStore>,
        tokens: Arc<InMemoryRefreshTokenStore>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                issuer: Arc::new(TokenIssuer::new(&jwt_settings()).unwrap()),
                users: Arc::new(InMemoryUserStore::new()),
                tokens: Arc::new(InMemoryRefreshTokenStore::new()),
            }
        }

        fn refresh_strategy(&self) -> RefreshTokenStrategy {
            RefreshTokenStrategy::new(self.issuer.clone(), self.users.clone(), self.tokens.clone())
        }
    }

    fn with_cookie(issued: &IssuedToken) -> HttpRequest {
        let cookie = RefreshTokenCookie::from_issued(issued).to_cookie().unwrap();
        TestRequest::default().cookie(cookie).to_http_request()
    }

    #[test]
    fn test_cookie_round_trip() {
        let issued = IssuedToken {
            token: "a.b.c".to_string(),
            expires_at: DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        let payload = RefreshTokenCookie::from_issued(&issued);
        let cookie = payload.to_cookie().unwrap();

        assert_eq!(cookie.name(), REFRESH_TOKEN_COOKIE);
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(RefreshTokenCookie::parse(cookie.value()), Some(payload.clone()));

        let raw = serde_json::to_string(&payload).unwrap();
        assert!(raw.contains("\"refreshToken\""));
        assert!(raw.contains("\"expirationDateTime\""));
        assert_eq!(RefreshTokenCookie::parse(&raw), Some(payload));
    }

    #[actix_web::test]
    async fn test_access_strategy_missing_header() {
        let fixture = Fixture::new();
        let strategy = AccessTokenStrategy::new(fixture.issuer.clone());

        for header in ["", "Bearer", "Bearer ", "Basic dXNlcjpwYXNz", "BearerToken"] {
            let req = TestRequest::default()
                .insert_header(("Authorization", header))
                .to_http_request();
            let err = strategy.authenticate(&req).await.unwrap_err();
            assert_eq!(err.as_auth(), Some(&AuthError::MissingToken), "header {:?}", header);
        }
    }

    #[actix_web::test]
    async fn test_access_strategy_resolves_identity() {
        let fixture = Fixture::new();
        let strategy = AccessTokenStrategy::new(fixture.issuer.clone());
        let user = user_with_role("bob@example.com", Role::User);
        let issued = fixture.issuer.issue(TokenKind::Access, &user, None).unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", issued.token)))
            .to_http_request();
        let auth = strategy.authenticate(&req).await.unwrap();

        assert_eq!(auth.identity.id, user.id);
        assert_eq!(auth.identity.role, Role::User);
        assert!(auth.refresh_record.is_none());
    }

    #[actix_web::test]
    async fn test_access_strategy_rejects_refresh_token() {
        let fixture = Fixture::new();
        let strategy = AccessTokenStrategy::new(fixture.issuer.clone());
        let user = user_with_role("bob@example.com", Role::User);
        let refresh = fixture.issuer.issue(TokenKind::Refresh, &user, None).unwrap();

        let req = TestRequest::default()
            .insert_header(("Authorization", format!("Bearer {}", refresh.token)))
            .to_http_request();
        let err = strategy.authenticate(&req).await.unwrap_err();
        assert_eq!(err.as_auth(), Some(&AuthError::TokenInvalid));
    }

    #[actix_web::test]
    async fn test_refresh_strategy_attaches_record() {
        let fixture = Fixture::new();
        let user = user_with_role("bob@example.com", Role::User);
        fixture.users.insert(&user).await.unwrap();
        let tokens = start_session(fixture.tokens.as_ref(), &fixture.issuer, &user, "ip", Utc::now())
            .await
            .unwrap();

        let auth = fixture
            .refresh_strategy()
            .authenticate(&with_cookie(&tokens.refresh))
            .await
            .unwrap();

        assert_eq!(auth.identity.id, user.id);
        let record = auth.refresh_record.unwrap();
        assert_eq!(record.token_hash, crate::store::hash_token(&tokens.refresh.token));
    }

    #[actix_web::test]
    async fn test_refresh_strategy_requires_live_user() {
        let fixture = Fixture::new();
        let user = user_with_role("ghost@example.com", Role::User);
        let tokens = start_session(fixture.tokens.as_ref(), &fixture.issuer, &user, "ip", Utc::now())
            .await
            .unwrap();

        let err = fixture
            .refresh_strategy()
            .authenticate(&with_cookie(&tokens.refresh))
            .await
            .unwrap_err();
        assert_eq!(err.as_auth(), Some(&AuthError::TokenInvalid));
    }

    #[actix_web::test]
    async fn test_refresh_strategy_requires_persisted_token() {
        let fixture = Fixture::new();
        let user = user_with_role("bob@example.com", Role::User);
        fixture.users.insert(&user).await.unwrap();
        // Correctly signed but never stored.
        let issued = fixture.issuer.issue(TokenKind::Refresh, &user, Some("ip")).unwrap();

        let err = fixture
            .refresh_strategy()
            .authenticate(&with_cookie(&issued))
            .await
            .unwrap_err();
        assert_eq!(err.as_auth(), Some(&AuthError::TokenInvalid));
    }

    #[actix_web::test]
    async fn test_refresh_strategy_without_cookie() {
        let fixture = Fixture::new();
        let req = TestRequest::default().to_http_request();

        let err = fixture.refresh_strategy().authenticate(&req).await.unwrap_err();
        assert_eq!(err.as_auth(), Some(&AuthError::MissingToken));
    }
}
