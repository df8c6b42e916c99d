/// Refresh Token Lifecycle
///
/// Validation of persisted state, rotation and revocation. Signature
/// checks happen upstream in the refresh strategy; everything here works
/// on stored records only.
///
/// Each rotation links the old record to its successor through
/// `replaced_by_token_hash`, so the full history of a session can be
/// walked with [`rotation_chain`].

use chrono::{DateTime, Utc};

use crate::auth::jwt::{IssuedToken, TokenIssuer, TokenKind};
use crate::error::{AppError, AuthError};
use crate::store::{RefreshTokenRecord, RefreshTokenStore, User};

/// Upper bound on chain walks; rotation chains never loop, but stored data
/// is not trusted.
const MAX_CHAIN_LENGTH: usize = 10_000;

/// Tokens handed back after sign-in or a successful rotation.
#[derive(Debug, Clone)]
pub struct SessionTokens {
    pub access: IssuedToken,
    pub refresh: IssuedToken,
}

/// Returns the stored record if `token` is usable at `now`.
///
/// Fails closed: unknown, expired (`expires <= now`) and revoked tokens
/// all yield `None`.
pub async fn validate_refresh_token(
    store: &dyn RefreshTokenStore,
    token: &str,
    now: DateTime<Utc>,
) -> Result<Option<RefreshTokenRecord>, AppError> {
    let record = match store.find_by_token(token).await? {
        Some(record) => record,
        None => {
            tracing::warn!("Refresh token not found in store");
            return Ok(None);
        }
    };

    if record.is_active_at(now) {
        return Ok(Some(record));
    }

    if record.revoked.is_some() {
        // Possible replay of a stolen token. The chain is left intact.
        tracing::warn!(
            token_id = %record.id,
            user_id = %record.user_id,
            replaced_by = ?record.replaced_by_token_hash,
            "Revoked refresh token presented again"
        );
    } else {
        tracing::info!(token_id = %record.id, user_id = %record.user_id, "Refresh token expired");
    }

    Ok(None)
}

/// Issues tokens for a fresh sign-in and persists the refresh record.
pub async fn start_session(
    store: &dyn RefreshTokenStore,
    issuer: &TokenIssuer,
    user: &User,
    ip: &str,
    now: DateTime<Utc>,
) -> Result<SessionTokens, AppError> {
    let access = issuer.issue_at(TokenKind::Access, user, None, now)?;
    let refresh = issuer.issue_at(TokenKind::Refresh, user, Some(ip), now)?;

    let record = RefreshTokenRecord::new(user.id, &refresh.token, refresh.expires_at, ip, now);
    store.save(&record).await?;

    tracing::info!(user_id = %user.id, token_id = %record.id, "Refresh token issued");
    Ok(SessionTokens { access, refresh })
}

/// Replaces `old` with a newly issued refresh token.
///
/// The old record is revoked and chained to the new one in a single store
/// operation. Once this returns `Ok` the old token can never be used again.
/// If another request rotated `old` first, this fails with
/// `AuthError::TokenRevoked` and nothing is written.
pub async fn rotate_refresh_token(
    store: &dyn RefreshTokenStore,
    issuer: &TokenIssuer,
    old: RefreshTokenRecord,
    user: &User,
    ip: &str,
    now: DateTime<Utc>,
) -> Result<SessionTokens, AppError> {
    if old.user_id != user.id {
        return Err(AppError::Auth(AuthError::TokenInvalid));
    }

    let refresh = issuer.issue_at(TokenKind::Refresh, user, Some(ip), now)?;
    let new_record = RefreshTokenRecord::new(user.id, &refresh.token, refresh.expires_at, ip, now);

    let mut old = old;
    old.revoke(now, Some(new_record.token_hash.clone()));

    store.rotate(&old, &new_record).await?;

    let access = issuer.issue_at(TokenKind::Access, user, None, now)?;

    tracing::info!(
        user_id = %user.id,
        old_token_id = %old.id,
        new_token_id = %new_record.id,
        "Refresh token rotated"
    );
    Ok(SessionTokens { access, refresh })
}

/// Revokes `record` without issuing a successor.
pub async fn revoke_refresh_token(
    store: &dyn RefreshTokenStore,
    record: &RefreshTokenRecord,
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    if !store.revoke(record.id, now).await? {
        return Err(AppError::Auth(AuthError::TokenRevoked));
    }
    tracing::info!(user_id = %record.user_id, token_id = %record.id, "Refresh token revoked");
    Ok(())
}

/// Walks successors starting at `start` (inclusive), oldest first.
pub async fn rotation_chain(
    store: &dyn RefreshTokenStore,
    start: RefreshTokenRecord,
) -> Result<Vec<RefreshTokenRecord>, AppError> {
    let mut next = start.replaced_by_token_hash.clone();
    let mut chain = vec![start];

    while let Some(hash) = next {
        if chain.len() >= MAX_CHAIN_LENGTH {
            return Err(AppError::Internal("refresh token chain too long".to_string()));
        }
        match store.find_by_hash(&hash).await? {
            Some(record) => {
                next = record.replaced_by_token_hash.clone();
                chain.push(record);
            }
            None => break,
        }
    }

    Ok(chain)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{jwt_settings, user_with_role};
    use crate::auth::Role;
    use crate::store::InMemoryRefreshTokenStore;
    use chrono::Duration;
    use uuid::Uuid;

    fn issuer() -> TokenIssuer {
        TokenIssuer::new(&jwt_settings()).unwrap()
    }

    fn stored(
        expires: DateTime<Utc>,
        revoked: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> RefreshTokenRecord {
        let mut record =
            RefreshTokenRecord::new(Uuid::new_v4(), &Uuid::new_v4().to_string(), expires, "ip", now);
        record.revoked = revoked;
        record
    }

    #[tokio::test]
    async fn test_validity_truth_table() {
        let now = Utc::now();
        let future = now + Duration::hours(1);
        let past = now - Duration::hours(1);

        let cases = [
            (future, None, true),
            (future, Some(past), false),
            (past, None, false),
            (past, Some(past), false),
        ];

        for (expires, revoked, expected) in cases {
            let store = InMemoryRefreshTokenStore::new();
            let token = Uuid::new_v4().to_string();
            let mut record = RefreshTokenRecord::new(Uuid::new_v4(), &token, expires, "ip", now);
            record.revoked = revoked;
            store.save(&record).await.unwrap();

            let result = validate_refresh_token(&store, &token, now).await.unwrap();
            assert_eq!(
                result.is_some(),
                expected,
                "expires={:?} revoked={:?}",
                expires,
                revoked
            );
        }
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_invalid() {
        let store = InMemoryRefreshTokenStore::new();
        let now = Utc::now();
        let record = RefreshTokenRecord::new(Uuid::new_v4(), "tok", now, "ip", now);
        store.save(&record).await.unwrap();

        assert!(validate_refresh_token(&store, "tok", now).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_unknown_token_is_invalid() {
        let store = InMemoryRefreshTokenStore::new();
        store.save(&stored(Utc::now() + Duration::days(1), None, Utc::now())).await.unwrap();

        assert!(validate_refresh_token(&store, "nope", Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_token_expires_after_seven_days() {
        let store = InMemoryRefreshTokenStore::new();
        let issuer = issuer();
        let user = user_with_role("bob@example.com", Role::User);
        let t0 = Utc::now();

        let tokens = start_session(&store, &issuer, &user, "127.0.0.1", t0).await.unwrap();
        let token = tokens.refresh.token;

        let just_before = t0 + Duration::days(7) - Duration::seconds(1);
        assert!(validate_refresh_token(&store, &token, just_before).await.unwrap().is_some());

        let after = t0 + Duration::days(7) + Duration::seconds(1);
        assert!(validate_refresh_token(&store, &token, after).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rotation_is_single_use() {
        let store = InMemoryRefreshTokenStore::new();
        let issuer = issuer();
        let user = user_with_role("bob@example.com", Role::User);
        let now = Utc::now();

        let first = start_session(&store, &issuer, &user, "ip", now).await.unwrap();
        let record = validate_refresh_token(&store, &first.refresh.token, now)
            .await
            .unwrap()
            .unwrap();

        let rotated = rotate_refresh_token(&store, &issuer, record.clone(), &user, "ip", now)
            .await
            .unwrap();
        assert_ne!(rotated.refresh.token, first.refresh.token);

        assert!(validate_refresh_token(&store, &first.refresh.token, now)
            .await
            .unwrap()
            .is_none());
        assert!(validate_refresh_token(&store, &rotated.refresh.token, now)
            .await
            .unwrap()
            .is_some());

        // A stale copy of the old record cannot be rotated again.
        let err = rotate_refresh_token(&store, &issuer, record, &user, "ip", now)
            .await
            .unwrap_err();
        assert_eq!(err.as_auth(), Some(&AuthError::TokenRevoked));
    }

    #[tokio::test]
    async fn test_rotation_preserves_identity() {
        let store = InMemoryRefreshTokenStore::new();
        let issuer = issuer();
        let user = user_with_role("root@example.com", Role::Admin);
        let now = Utc::now();

        let first = start_session(&store, &issuer, &user, "ip", now).await.unwrap();
        let record = store.find_by_token(&first.refresh.token).await.unwrap().unwrap();
        let rotated = rotate_refresh_token(&store, &issuer, record, &user, "ip", now)
            .await
            .unwrap();

        let claims = issuer.decode(TokenKind::Access, &rotated.access.token).unwrap();
        assert_eq!(claims.sub, user.id.to_string());
        assert_eq!(claims.email, user.email);
        assert_eq!(claims.role, Role::Admin);
    }

    #[tokio::test]
    async fn test_rotation_rejects_foreign_record() {
        let store = InMemoryRefreshTokenStore::new();
        let issuer = issuer();
        let owner = user_with_role("bob@example.com", Role::User);
        let other = user_with_role("eve@example.com", Role::User);
        let now = Utc::now();

        let tokens = start_session(&store, &issuer, &owner, "ip", now).await.unwrap();
        let record = store.find_by_token(&tokens.refresh.token).await.unwrap().unwrap();

        assert!(rotate_refresh_token(&store, &issuer, record, &other, "ip", now).await.is_err());
        assert!(validate_refresh_token(&store, &tokens.refresh.token, now)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_concurrent_rotation_yields_one_successor() {
        let store = InMemoryRefreshTokenStore::new();
        let issuer = issuer();
        let user = user_with_role("bob@example.com", Role::User);
        let now = Utc::now();

        let tokens = start_session(&store, &issuer, &user, "ip", now).await.unwrap();
        let a = validate_refresh_token(&store, &tokens.refresh.token, now).await.unwrap().unwrap();
        let b = a.clone();

        let (ra, rb) = tokio::join!(
            rotate_refresh_token(&store, &issuer, a, &user, "ip", now),
            rotate_refresh_token(&store, &issuer, b, &user, "ip", now),
        );
        assert_eq!(ra.is_ok() as u8 + rb.is_ok() as u8, 1);

        let winner = ra.or(rb).unwrap();
        let old = store.find_by_token(&tokens.refresh.token).await.unwrap().unwrap();
        let chain = rotation_chain(&store, old).await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[1].token_hash, crate::store::hash_token(&winner.refresh.token));
    }

    #[tokio::test]
    async fn test_rotation_chain_follows_successors() {
        let store = InMemoryRefreshTokenStore::new();
        let issuer = issuer();
        let user = user_with_role("bob@example.com", Role::User);
        let now = Utc::now();

        let mut tokens = start_session(&store, &issuer, &user, "ip", now).await.unwrap();
        let origin = tokens.refresh.token.clone();
        for _ in 0..3 {
            let record = store.find_by_token(&tokens.refresh.token).await.unwrap().unwrap();
            tokens = rotate_refresh_token(&store, &issuer, record, &user, "ip", now)
                .await
                .unwrap();
        }

        let start = store.find_by_token(&origin).await.unwrap().unwrap();
        let chain = rotation_chain(&store, start).await.unwrap();

        assert_eq!(chain.len(), 4);
        assert!(chain[..3].iter().all(|r| r.revoked.is_some()));
        assert!(chain[3].revoked.is_none());
        assert_eq!(chain[3].token_hash, crate::store::hash_token(&tokens.refresh.token));
    }

    #[tokio::test]
    async fn test_revoke_then_refresh_is_rejected() {
        let store = InMemoryRefreshTokenStore::new();
        let issuer = issuer();
        let user = user_with_role("bob@example.com", Role::User);
        let now = Utc::now();

        let tokens = start_session(&store, &issuer, &user, "ip", now).await.unwrap();
        let record = store.find_by_token(&tokens.refresh.token).await.unwrap().unwrap();

        revoke_refresh_token(&store, &record, now).await.unwrap();

        assert!(validate_refresh_token(&store, &tokens.refresh.token, now)
            .await
            .unwrap()
            .is_none());
        let stored = store.find_by_token(&tokens.refresh.token).await.unwrap().unwrap();
        assert!(stored.replaced_by_token_hash.is_none());
        assert_eq!(
            revoke_refresh_token(&store, &record, now).await.unwrap_err().as_auth(),
            Some(&AuthError::TokenRevoked)
        );
    }
}
