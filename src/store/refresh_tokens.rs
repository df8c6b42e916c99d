/// Refresh token persistence
///
/// Records are append-only: rows are created at sign-in and refresh, and
/// afterwards only `revoked` and `replaced_by_token_hash` change. Only the
/// SHA-256 digest of a token is stored.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::error::{AppError, AuthError, DatabaseError};

/// Column width of `created_by_ip`.
const MAX_IP_LENGTH: usize = 50;

/// Hash a refresh token using SHA-256
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RefreshTokenRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires: DateTime<Utc>,
    pub revoked: Option<DateTime<Utc>>,
    pub replaced_by_token_hash: Option<String>,
    pub created_by_ip: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RefreshTokenRecord {
    pub fn new(
        user_id: Uuid,
        token: &str,
        expires: DateTime<Utc>,
        created_by_ip: &str,
        now: DateTime<Utc>,
    ) -> Self {
        let created_by_ip: String = created_by_ip.chars().take(MAX_IP_LENGTH).collect();
        Self {
            id: Uuid::new_v4(),
            user_id,
            token_hash: hash_token(token),
            expires,
            revoked: None,
            replaced_by_token_hash: None,
            created_by_ip,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.revoked.is_none() && self.expires > now
    }

    /// Marks this record revoked, optionally chaining it to its successor.
    pub fn revoke(&mut self, now: DateTime<Utc>, replaced_by: Option<String>) {
        self.revoked = Some(now);
        self.replaced_by_token_hash = replaced_by;
        self.updated_at = now;
    }
}

#[async_trait]
pub trait RefreshTokenStore: Send + Sync {
    /// Upsert by id. A second record with an existing digest is an
    /// integrity violation.
    async fn save(&self, record: &RefreshTokenRecord) -> Result<(), AppError>;

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AppError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        self.find_by_hash(&hash_token(token)).await
    }

    /// Writes the revoked `old` record and inserts `new` atomically.
    ///
    /// `old` is only written if it is still active in storage, otherwise
    /// nothing changes and `AuthError::TokenRevoked` is returned.
    async fn rotate(
        &self,
        old: &RefreshTokenRecord,
        new: &RefreshTokenRecord,
    ) -> Result<(), AppError>;

    /// Conditionally revokes `id`. Returns false if it was already revoked.
    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;
}

const COLUMNS: &str = "id, user_id, token_hash, expires, revoked, replaced_by_token_hash, \
                       created_by_ip, created_at, updated_at";

#[derive(Clone)]
pub struct PgRefreshTokenStore {
    pool: PgPool,
}

impl PgRefreshTokenStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const INSERT_SQL: &str = r#"
    INSERT INTO refresh_tokens (id, user_id, token_hash, expires, revoked, replaced_by_token_hash,
                                created_by_ip, created_at, updated_at)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

#[async_trait]
impl RefreshTokenStore for PgRefreshTokenStore {
    async fn save(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        let upsert = format!(
            "{INSERT_SQL}
             ON CONFLICT (id) DO UPDATE
             SET revoked = EXCLUDED.revoked,
                 replaced_by_token_hash = EXCLUDED.replaced_by_token_hash,
                 updated_at = EXCLUDED.updated_at"
        );
        sqlx::query(&upsert)
            .bind(record.id)
            .bind(record.user_id)
            .bind(&record.token_hash)
            .bind(record.expires)
            .bind(record.revoked)
            .bind(&record.replaced_by_token_hash)
            .bind(&record.created_by_ip)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM refresh_tokens WHERE token_hash = $1");
        let record = sqlx::query_as::<_, RefreshTokenRecord>(&query)
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(record)
    }

    async fn rotate(
        &self,
        old: &RefreshTokenRecord,
        new: &RefreshTokenRecord,
    ) -> Result<(), AppError> {
        let mut tx = self.pool.begin().await?;

        let revoked = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = $2, replaced_by_token_hash = $3, updated_at = $4
            WHERE id = $1 AND revoked IS NULL
            "#,
        )
        .bind(old.id)
        .bind(old.revoked)
        .bind(&old.replaced_by_token_hash)
        .bind(old.updated_at)
        .execute(&mut tx)
        .await?;

        if revoked.rows_affected() == 0 {
            tx.rollback().await?;
            tracing::warn!(
                token_id = %old.id,
                user_id = %old.user_id,
                "Refresh token already rotated by a concurrent request"
            );
            return Err(AuthError::TokenRevoked.into());
        }

        sqlx::query(INSERT_SQL)
            .bind(new.id)
            .bind(new.user_id)
            .bind(&new.token_hash)
            .bind(new.expires)
            .bind(new.revoked)
            .bind(&new.replaced_by_token_hash)
            .bind(&new.created_by_ip)
            .bind(new.created_at)
            .bind(new.updated_at)
            .execute(&mut tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE refresh_tokens
            SET revoked = $2, updated_at = $2
            WHERE id = $1 AND revoked IS NULL
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Map-backed store with the same contract as [`PgRefreshTokenStore`].
///
/// A single mutex covers each call, which gives `rotate` the same
/// all-or-nothing behaviour as the Postgres transaction.
#[derive(Default)]
pub struct InMemoryRefreshTokenStore {
    records: Mutex<HashMap<Uuid, RefreshTokenRecord>>,
}

impl InMemoryRefreshTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_records<T>(
        &self,
        f: impl FnOnce(&mut HashMap<Uuid, RefreshTokenRecord>) -> Result<T, AppError>,
    ) -> Result<T, AppError> {
        let mut records = self
            .records
            .lock()
            .map_err(|_| AppError::Internal("refresh token store lock poisoned".to_string()))?;
        f(&mut records)
    }
}

fn check_unique_digest(
    records: &HashMap<Uuid, RefreshTokenRecord>,
    record: &RefreshTokenRecord,
) -> Result<(), AppError> {
    let clash = records
        .values()
        .any(|r| r.token_hash == record.token_hash && r.id != record.id);
    if clash {
        tracing::error!(token_id = %record.id, "Duplicate refresh token digest");
        return Err(DatabaseError::IntegrityViolation(
            "duplicate refresh token digest".to_string(),
        )
        .into());
    }
    Ok(())
}

#[async_trait]
impl RefreshTokenStore for InMemoryRefreshTokenStore {
    async fn save(&self, record: &RefreshTokenRecord) -> Result<(), AppError> {
        self.with_records(|records| {
            check_unique_digest(records, record)?;
            records.insert(record.id, record.clone());
            Ok(())
        })
    }

    async fn find_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, AppError> {
        self.with_records(|records| {
            Ok(records.values().find(|r| r.token_hash == token_hash).cloned())
        })
    }

    async fn rotate(
        &self,
        old: &RefreshTokenRecord,
        new: &RefreshTokenRecord,
    ) -> Result<(), AppError> {
        self.with_records(|records| {
            let still_active = records.get(&old.id).map_or(false, |r| r.revoked.is_none());
            if !still_active {
                return Err(AuthError::TokenRevoked.into());
            }
            check_unique_digest(records, new)?;
            records.insert(old.id, old.clone());
            records.insert(new.id, new.clone());
            Ok(())
        })
    }

    async fn revoke(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        self.with_records(|records| match records.get_mut(&id) {
            Some(record) if record.revoked.is_none() => {
                record.revoke(now, None);
                Ok(true)
            }
            _ => Ok(false),
        })
    }
}
