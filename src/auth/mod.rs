/// Authentication module
///
/// Token issuing and verification, password hashing, the refresh token
/// lifecycle and the request strategies used by the guard middleware.

mod claims;
mod expiration;
mod jwt;
mod password;
mod refresh_token;
mod roles;
mod strategy;

#[cfg(test)]
pub(crate) mod test_support;

pub use claims::Claims;
pub use expiration::parse_expiration;
pub use jwt::{IssuedToken, TokenIssuer, TokenKind};
pub use password::{hash_password, verify_credentials, verify_password};
pub use refresh_token::{
    revoke_refresh_token, rotate_refresh_token, rotation_chain, start_session,
    validate_refresh_token, SessionTokens,
};
pub use roles::{Role, RoutePolicy};
pub use strategy::{
    AccessTokenStrategy, AuthStrategy, Authenticated, Identity, RefreshTokenCookie,
    RefreshTokenStrategy, REFRESH_TOKEN_COOKIE,
};
