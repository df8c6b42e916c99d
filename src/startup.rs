use actix_web::dev::Server;
use actix_web::{web, App, HttpServer};
use std::net::TcpListener;
use std::sync::Arc;

use crate::auth::{AccessTokenStrategy, AuthStrategy, RefreshTokenStrategy, Role, TokenIssuer};
use crate::email_client::Mailer;
use crate::middleware::{AuthGuard, RequestLogger};
use crate::routes::{
    forgot_password, get_user, health_check, list_users, me, refresh_token, reset_password,
    revoke_token, signin, signup, verify_email,
};
use crate::store::{RefreshTokenStore, UserStore};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<TokenIssuer>,
    pub users: Arc<dyn UserStore>,
    pub refresh_tokens: Arc<dyn RefreshTokenStore>,
    pub mailer: Arc<dyn Mailer>,
    /// Base of links sent by email.
    pub api_host_url: String,
}

/// Registers every route with its guard and policy.
pub fn configure_routes(cfg: &mut web::ServiceConfig, state: AppState) {
    let access: Arc<dyn AuthStrategy> = Arc::new(AccessTokenStrategy::new(state.issuer.clone()));
    let refresh: Arc<dyn AuthStrategy> = Arc::new(RefreshTokenStrategy::new(
        state.issuer.clone(),
        state.users.clone(),
        state.refresh_tokens.clone(),
    ));

    cfg.app_data(web::Data::new(state))
        // Public routes
        .route("/health_check", web::get().to(health_check))
        .service(
            web::scope("/auth")
                .route("/signup", web::post().to(signup))
                .route("/signin", web::post().to(signin))
                .route("/verify-email", web::get().to(verify_email))
                .route("/forgot-password", web::post().to(forgot_password))
                .route("/reset-password", web::post().to(reset_password))
                // Refresh token cookie
                .service(
                    web::resource("/refresh-token")
                        .route(web::post().to(refresh_token))
                        .wrap(AuthGuard::new(refresh.clone())),
                )
                .service(
                    web::resource("/revoke-token")
                        .route(web::post().to(revoke_token))
                        .wrap(AuthGuard::new(refresh)),
                )
                // Bearer access token
                .service(
                    web::resource("/me")
                        .route(web::get().to(me))
                        .wrap(AuthGuard::new(access.clone())),
                ),
        )
        .service(
            web::scope("/users")
                .route("", web::get().to(list_users))
                .route("/{id}", web::get().to(get_user))
                .wrap(AuthGuard::new(access).require_roles([Role::Admin])),
        );
}

pub fn run(listener: TcpListener, state: AppState) -> Result<Server, std::io::Error> {
    let server = HttpServer::new(move || {
        let state = state.clone();
        App::new()
            .wrap(RequestLogger)
            .configure(move |cfg| configure_routes(cfg, state))
    })
    .listen(listener)?
    .run();

    Ok(server)
}
