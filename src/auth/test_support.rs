use crate::auth::Role;
use crate::configuration::JwtSettings;
use crate::store::User;

pub fn jwt_settings() -> JwtSettings {
    JwtSettings {
        issuer: "test".to_string(),
        access_token_secret: "access-secret-key-at-least-32-characters".to_string(),
        access_token_expiration: "15m".to_string(),
        refresh_token_secret: "refresh-secret-key-at-least-32-characters".to_string(),
        refresh_token_expiration: "7d".to_string(),
        reset_password_token_secret: "reset-secret-key-at-least-32-characters".to_string(),
        reset_password_token_expiration: "30m".to_string(),
    }
}

pub fn user_with_role(email: &str, role: Role) -> User {
    let mut user = User::new(
        email.to_string(),
        "not-a-real-hash".to_string(),
        "Bob".to_string(),
        "Test".to_string(),
        role,
    );
    user.email_verified = true;
    user
}

/// Minimum bcrypt cost keeps tests fast.
pub fn user_with_password(email: &str, password: &str, role: Role, verified: bool) -> User {
    let mut user = user_with_role(email, role);
    user.password_hash = bcrypt::hash(password, 4).expect("bcrypt hash");
    user.email_verified = verified;
    user
}
