mod auth;
mod health_check;
mod users;

pub use auth::{
    forgot_password, me, refresh_token, reset_password, revoke_token, signin, signup,
    verify_email,
};
pub use health_check::health_check;
pub use users::{get_user, list_users};
