/// Password Hashing and Credential Verification
///
/// Passwords are hashed with bcrypt. `verify_credentials` is the sign-in
/// path: it checks the password and then the email-verification gate.

use bcrypt::{hash, verify, DEFAULT_COST};

use crate::auth::roles::Role;
use crate::error::{AppError, AuthError, ValidationError};
use crate::store::{User, UserStore};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_PASSWORD_LENGTH: usize = 72;

/// Hash a password using bcrypt after checking its strength.
pub fn hash_password(password: &str) -> Result<String, AppError> {
    validate_password_strength(password)?;

    hash(password, DEFAULT_COST)
        .map_err(|e| AppError::Internal(format!("Password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool, AppError> {
    verify(password, hash)
        .map_err(|e| AppError::Internal(format!("Password verification failed: {}", e)))
}

/// Requirements: 8 to 72 bytes (bcrypt limit), at least one digit, one
/// lowercase and one uppercase letter.
fn validate_password_strength(password: &str) -> Result<(), AppError> {
    if password.len() < MIN_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooShort(
            "password".to_string(),
            MIN_PASSWORD_LENGTH,
        )));
    }

    if password.len() > MAX_PASSWORD_LENGTH {
        return Err(AppError::Validation(ValidationError::TooLong(
            "password".to_string(),
            MAX_PASSWORD_LENGTH,
        )));
    }

    let has_digit = password.chars().any(|c| c.is_numeric());
    let has_lowercase = password.chars().any(|c| c.is_lowercase());
    let has_uppercase = password.chars().any(|c| c.is_uppercase());

    if !has_digit || !has_lowercase || !has_uppercase {
        return Err(AppError::Validation(ValidationError::InvalidFormat(
            "password must contain at least one digit, one lowercase letter, and one uppercase letter"
                .to_string(),
        )));
    }

    Ok(())
}

/// Checks `email`/`password` against the stored hash.
///
/// Unknown email and wrong password fail identically. Non-admin users must
/// have verified their email; admins are never gated.
pub async fn verify_credentials(
    users: &dyn UserStore,
    email: &str,
    password: &str,
) -> Result<User, AppError> {
    let user = users
        .find_by_email(email)
        .await?
        .ok_or(AppError::Auth(AuthError::InvalidCredentials))?;

    if !verify_password(password, &user.password_hash)? {
        return Err(AppError::Auth(AuthError::InvalidCredentials));
    }

    if user.role != Role::Admin && !user.email_verified {
        tracing::info!(user_id = %user.id, "Sign-in refused until email is verified");
        return Err(AppError::Auth(AuthError::EmailNotVerified));
    }

    Ok(user)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::user_with_password;
    use crate::store::InMemoryUserStore;

    #[test]
    fn test_hash_password() {
        let password = "ValidPassword123";
        let hash = hash_password(password).expect("Failed to hash password");

        assert_ne!(password, hash);
        assert!(hash.starts_with("$2"));
        assert!(verify_password(password, &hash).unwrap());
        assert!(!verify_password("WrongPassword123", &hash).unwrap());
    }

    #[test]
    fn test_weak_passwords_rejected() {
        let too_long = "a".repeat(MAX_PASSWORD_LENGTH + 1) + "A1";
        for weak in ["Short1", "NoDigitsPassword", "NOLOWERCASE1", "nouppercase1", too_long.as_str()] {
            assert!(hash_password(weak).is_err(), "accepted {:?}", weak);
        }
    }

    #[tokio::test]
    async fn test_valid_credentials() {
        let users = InMemoryUserStore::new();
        let user = user_with_password("bob@example.com", "Secret123", Role::User, true);
        users.insert(&user).await.unwrap();

        let found = verify_credentials(&users, "bob@example.com", "Secret123").await.unwrap();
        assert_eq!(found.id, user.id);
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_email_look_the_same() {
        let users = InMemoryUserStore::new();
        users
            .insert(&user_with_password("bob@example.com", "Secret123", Role::User, true))
            .await
            .unwrap();

        let wrong = verify_credentials(&users, "bob@example.com", "Secret124").await.unwrap_err();
        let unknown = verify_credentials(&users, "eve@example.com", "Secret123").await.unwrap_err();

        assert_eq!(wrong.as_auth(), Some(&AuthError::InvalidCredentials));
        assert_eq!(unknown.as_auth(), Some(&AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_unverified_user_is_gated() {
        let users = InMemoryUserStore::new();
        users
            .insert(&user_with_password("bob@example.com", "Secret123", Role::User, false))
            .await
            .unwrap();

        let err = verify_credentials(&users, "bob@example.com", "Secret123").await.unwrap_err();
        assert_eq!(err.as_auth(), Some(&AuthError::EmailNotVerified));
    }

    #[tokio::test]
    async fn test_unverified_admin_bypasses_gate() {
        let users = InMemoryUserStore::new();
        users
            .insert(&user_with_password("root@example.com", "Secret123", Role::Admin, false))
            .await
            .unwrap();

        assert!(verify_credentials(&users, "root@example.com", "Secret123").await.is_ok());
    }

    #[tokio::test]
    async fn test_unverified_user_with_wrong_password_gets_generic_error() {
        let users = InMemoryUserStore::new();
        users
            .insert(&user_with_password("bob@example.com", "Secret123", Role::User, false))
            .await
            .unwrap();

        let err = verify_credentials(&users, "bob@example.com", "nope").await.unwrap_err();
        assert_eq!(err.as_auth(), Some(&AuthError::InvalidCredentials));
    }
}
