/// User persistence
///
/// The token core only reads `id`, `email` and `role`; the rest of the
/// record backs sign-up, email verification and password reset.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::auth::Role;
use crate::error::{AppError, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub password_hash: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub email_verified: bool,
    pub verification_token: Option<String>,
    pub reset_password_token: Option<String>,
    pub password_changed: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(
        email: String,
        password_hash: String,
        first_name: String,
        last_name: String,
        role: Role,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            email,
            password_hash,
            first_name,
            last_name,
            role,
            email_verified: false,
            verification_token: None,
            reset_password_token: None,
            password_changed: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Public user shape returned by account endpoints.
#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            role: user.role,
        }
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Fails with `UniqueConstraintViolation` when the email is taken.
    async fn insert(&self, user: &User) -> Result<(), AppError>;
    /// Persists every mutable field of an existing user.
    async fn update(&self, user: &User) -> Result<(), AppError>;
    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError>;
    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError>;
    async fn find_by_verification_token(&self, token: &str) -> Result<Option<User>, AppError>;
    async fn list(&self) -> Result<Vec<User>, AppError>;
}

const COLUMNS: &str = "id, email, password_hash, first_name, last_name, role, email_verified, \
                       verification_token, reset_password_token, password_changed, created_at, updated_at";

#[derive(sqlx::FromRow)]
struct UserRow {
    id: Uuid,
    email: String,
    password_hash: String,
    first_name: String,
    last_name: String,
    role: String,
    email_verified: bool,
    verification_token: Option<String>,
    reset_password_token: Option<String>,
    password_changed: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for User {
    type Error = AppError;

    fn try_from(row: UserRow) -> Result<Self, Self::Error> {
        Ok(User {
            id: row.id,
            email: row.email,
            password_hash: row.password_hash,
            first_name: row.first_name,
            last_name: row.last_name,
            role: row.role.parse()?,
            email_verified: row.email_verified,
            verification_token: row.verification_token,
            reset_password_token: row.reset_password_token,
            password_changed: row.password_changed,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(Clone)]
pub struct PgUserStore {
    pool: PgPool,
}

impl PgUserStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(&self, clause: &str, value: &str) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE {clause} = $1");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(value)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn insert(&self, user: &User) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO users (id, email, password_hash, first_name, last_name, role,
                               email_verified, verification_token, reset_password_token,
                               password_changed, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(&user.verification_token)
        .bind(&user.reset_password_token)
        .bind(user.password_changed)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update(&self, user: &User) -> Result<(), AppError> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET email = $2, password_hash = $3, first_name = $4, last_name = $5, role = $6,
                email_verified = $7, verification_token = $8, reset_password_token = $9,
                password_changed = $10, updated_at = $11
            WHERE id = $1
            "#,
        )
        .bind(user.id)
        .bind(&user.email)
        .bind(&user.password_hash)
        .bind(&user.first_name)
        .bind(&user.last_name)
        .bind(user.role.as_str())
        .bind(user.email_verified)
        .bind(&user.verification_token)
        .bind(&user.reset_password_token)
        .bind(user.password_changed)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("user {}", user.id)).into());
        }
        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, UserRow>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .map(User::try_from)
            .transpose()
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.fetch_one_where("email", email).await
    }

    async fn find_by_verification_token(&self, token: &str) -> Result<Option<User>, AppError> {
        self.fetch_one_where("verification_token", token).await
    }

    async fn list(&self) -> Result<Vec<User>, AppError> {
        let query = format!("SELECT {COLUMNS} FROM users ORDER BY created_at");
        sqlx::query_as::<_, UserRow>(&query)
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(User::try_from)
            .collect()
    }
}

/// Map-backed store with the same contract as [`PgUserStore`].
#[derive(Default)]
pub struct InMemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_users<T>(&self, f: impl FnOnce(&mut HashMap<Uuid, User>) -> T) -> Result<T, AppError> {
        let mut users = self
            .users
            .lock()
            .map_err(|_| AppError::Internal("user store lock poisoned".to_string()))?;
        Ok(f(&mut users))
    }

    fn find_where(&self, pred: impl Fn(&User) -> bool) -> Result<Option<User>, AppError> {
        self.with_users(|users| users.values().find(|u| pred(u)).cloned())
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn insert(&self, user: &User) -> Result<(), AppError> {
        self.with_users(|users| {
            if users.values().any(|u| u.email == user.email) {
                return Err(DatabaseError::UniqueConstraintViolation("Email in use".to_string()).into());
            }
            users.insert(user.id, user.clone());
            Ok(())
        })?
    }

    async fn update(&self, user: &User) -> Result<(), AppError> {
        self.with_users(|users| match users.get_mut(&user.id) {
            Some(existing) => {
                *existing = User {
                    updated_at: Utc::now(),
                    ..user.clone()
                };
                Ok(())
            }
            None => Err(DatabaseError::NotFound(format!("user {}", user.id)).into()),
        })?
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, AppError> {
        self.with_users(|users| users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, AppError> {
        self.find_where(|u| u.email == email)
    }

    async fn find_by_verification_token(&self, token: &str) -> Result<Option<User>, AppError> {
        self.find_where(|u| u.verification_token.as_deref() == Some(token))
    }

    async fn list(&self) -> Result<Vec<User>, AppError> {
        self.with_users(|users| {
            let mut all: Vec<User> = users.values().cloned().collect();
            all.sort_by_key(|u| u.created_at);
            all
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(email: &str) -> User {
        User::new(
            email.to_string(),
            "hash".to_string(),
            "Bob".to_string(),
            "Test".to_string(),
            Role::User,
        )
    }

    #[tokio::test]
    async fn test_insert_and_find() {
        let store = InMemoryUserStore::new();
        let bob = user("bob@example.com");
        store.insert(&bob).await.unwrap();

        assert_eq!(store.find_by_id(bob.id).await.unwrap().unwrap().email, bob.email);
        assert!(store.find_by_email("bob@example.com").await.unwrap().is_some());
        assert!(store.find_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected() {
        let store = InMemoryUserStore::new();
        store.insert(&user("bob@example.com")).await.unwrap();

        let err = store.insert(&user("bob@example.com")).await.unwrap_err();
        assert!(matches!(
            err,
            AppError::Database(DatabaseError::UniqueConstraintViolation(_))
        ));
    }

    #[tokio::test]
    async fn test_update_and_token_lookup() {
        let store = InMemoryUserStore::new();
        let mut bob = user("bob@example.com");
        store.insert(&bob).await.unwrap();

        bob.verification_token = Some("verify-me".to_string());
        store.update(&bob).await.unwrap();

        let found = store.find_by_verification_token("verify-me").await.unwrap();
        assert_eq!(found.map(|u| u.id), Some(bob.id));
    }

    #[tokio::test]
    async fn test_update_missing_user() {
        let store = InMemoryUserStore::new();
        let err = store.update(&user("ghost@example.com")).await.unwrap_err();
        assert!(matches!(err, AppError::Database(DatabaseError::NotFound(_))));
    }
}
