/// Middleware module
///
/// Authorization guard and request logging.

mod auth_guard;
mod request_logger;

pub use auth_guard::{AuthGuard, AuthGuardService};
pub use request_logger::RequestLogger;
