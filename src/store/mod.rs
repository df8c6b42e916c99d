/// Persistence collaborators
///
/// Both stores are traits so the token core runs against Postgres in
/// production and against in-memory maps in tests.

mod refresh_tokens;
mod users;

pub use refresh_tokens::hash_token;
pub use refresh_tokens::InMemoryRefreshTokenStore;
pub use refresh_tokens::PgRefreshTokenStore;
pub use refresh_tokens::RefreshTokenRecord;
pub use refresh_tokens::RefreshTokenStore;
pub use users::InMemoryUserStore;
pub use users::PgUserStore;
pub use users::User;
pub use users::UserResponse;
pub use users::UserStore;
