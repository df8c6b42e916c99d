/// Authentication Routes
///
/// Sign-up, sign-in, refresh token rotation and revocation, email
/// verification and the password reset flow.

use actix_web::{web, HttpRequest, HttpResponse};
use chrono::{DateTime, Utc};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::{
    hash_password, revoke_refresh_token, rotate_refresh_token, start_session, verify_credentials,
    Identity, RefreshTokenCookie, Role, SessionTokens, TokenKind,
};
use crate::email_client::EmailMessage;
use crate::error::{AppError, AuthError, ErrorContext, ValidationError};
use crate::startup::AppState;
use crate::store::{RefreshTokenRecord, User, UserResponse};
use crate::validators::{is_valid_email, is_valid_name};

const VERIFICATION_TOKEN_LENGTH: usize = 32;

#[derive(Deserialize)]
pub struct SignupRequest {
    pub email: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
}

#[derive(Deserialize)]
pub struct SigninRequest {
    pub email: String,
    pub password: String,
}

#[derive(Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Deserialize)]
pub struct ResetPasswordRequest {
    #[serde(alias = "newPassword")]
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct TokenQuery {
    pub token: Option<String>,
}

/// Body returned by sign-in and refresh.
#[derive(Serialize)]
pub struct SessionResponse {
    pub id: Uuid,
    pub email: String,
    pub access_token: String,
    pub access_token_expiration: DateTime<Utc>,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub message: String,
}

/// Socket peer address. Forwarding headers are client-controlled and ignored.
fn client_ip(req: &HttpRequest) -> String {
    req.peer_addr()
        .map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn session_response(user: &User, tokens: &SessionTokens) -> Result<HttpResponse, AppError> {
    let cookie = RefreshTokenCookie::from_issued(&tokens.refresh).to_cookie()?;

    Ok(HttpResponse::Ok().cookie(cookie).json(SessionResponse {
        id: user.id,
        email: user.email.clone(),
        access_token: tokens.access.token.clone(),
        access_token_expiration: tokens.access.expires_at,
    }))
}

fn random_token() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(VERIFICATION_TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// POST /auth/signup
///
/// Creates an unverified user and emails a verification link.
///
/// # Errors
/// - 400: Invalid email, name or weak password
/// - 409: Email already registered
/// - 503: Verification email could not be sent
pub async fn signup(
    body: web::Json<SignupRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_signup");

    let email = is_valid_email(&body.email)?;
    let first_name = is_valid_name("first_name", &body.first_name)?;
    let last_name = is_valid_name("last_name", &body.last_name)?;
    let password_hash = hash_password(&body.password)?;

    let verification_token = random_token();
    let mut user = User::new(email, password_hash, first_name, last_name, Role::User);
    user.verification_token = Some(verification_token.clone());
    state.users.insert(&user).await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        "User signed up"
    );

    let message = EmailMessage::verification(&user, &state.api_host_url, &verification_token);
    state.mailer.send(&message).await?;

    Ok(HttpResponse::Created().json(UserResponse::from(&user)))
}

/// POST /auth/signin
///
/// Unknown email and wrong password both answer 401 `Unauthorized`.
/// Unverified non-admin users get 401 `Email must be verified`.
pub async fn signin(
    req: HttpRequest,
    body: web::Json<SigninRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("user_signin");

    let email = body.email.trim().to_lowercase();
    let user = verify_credentials(state.users.as_ref(), &email, &body.password).await?;

    let tokens = start_session(
        state.refresh_tokens.as_ref(),
        &state.issuer,
        &user,
        &client_ip(&req),
        Utc::now(),
    )
    .await?;

    tracing::info!(
        request_id = %context.request_id,
        user_id = %user.id,
        "User signed in"
    );

    session_response(&user, &tokens)
}

/// GET /auth/verify-email?token=
pub async fn verify_email(
    query: web::Query<TokenQuery>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let invalid = || AppError::Validation(ValidationError::BadRequest("invalid token".to_string()));

    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(invalid)?;

    let mut user = state
        .users
        .find_by_verification_token(token)
        .await?
        .ok_or_else(invalid)?;

    user.email_verified = true;
    user.verification_token = None;
    user.updated_at = Utc::now();
    state.users.update(&user).await?;

    tracing::info!(user_id = %user.id, "Email verified");
    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "email address was successfully verified".to_string(),
    }))
}

/// POST /auth/refresh-token
///
/// Runs behind the refresh guard, which has already validated the cookie
/// and attached the stored record. The old token is single-use.
pub async fn refresh_token(
    req: HttpRequest,
    identity: web::ReqData<Identity>,
    record: web::ReqData<RefreshTokenRecord>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("token_refresh").with_user_id(identity.id.to_string());

    let user = state
        .users
        .find_by_id(identity.id)
        .await?
        .ok_or(AppError::Auth(AuthError::TokenInvalid))?;

    let tokens = rotate_refresh_token(
        state.refresh_tokens.as_ref(),
        &state.issuer,
        record.into_inner(),
        &user,
        &client_ip(&req),
        Utc::now(),
    )
    .await
    .map_err(|e| {
        context.log_error(&e);
        e
    })?;

    session_response(&user, &tokens)
}

/// POST /auth/revoke-token
pub async fn revoke_token(
    record: web::ReqData<RefreshTokenRecord>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    revoke_refresh_token(state.refresh_tokens.as_ref(), &record, Utc::now()).await?;

    Ok(HttpResponse::Ok().json(MessageResponse {
        message: "token successfully revoked".to_string(),
    }))
}

/// POST /auth/forgot-password
///
/// Always answers 200 with an empty body, whether or not the email is
/// registered and whether or not the email could be sent.
pub async fn forgot_password(
    body: web::Json<ForgotPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let context = ErrorContext::new("forgot_password");

    let email = body.email.trim().to_lowercase();
    let mut user = match state.users.find_by_email(&email).await? {
        Some(user) => user,
        None => {
            tracing::info!(request_id = %context.request_id, "Password reset requested for unknown email");
            return Ok(HttpResponse::Ok().finish());
        }
    };

    let issued = state.issuer.issue(TokenKind::ResetPassword, &user, None)?;
    user.reset_password_token = Some(issued.token.clone());
    user.updated_at = Utc::now();
    state.users.update(&user).await?;

    let message = EmailMessage::reset_password(&user, &state.api_host_url, &issued.token);
    if let Err(e) = state.mailer.send(&message).await {
        context.clone().with_user_id(user.id.to_string()).log_error(&e);
    } else {
        tracing::info!(request_id = %context.request_id, user_id = %user.id, "Password reset email sent");
    }

    Ok(HttpResponse::Ok().finish())
}

/// POST /auth/reset-password?token=
///
/// # Errors
/// - 400: Missing token or weak password
/// - 401: Token invalid, expired or superseded by a newer request
pub async fn reset_password(
    query: web::Query<TokenQuery>,
    body: web::Json<ResetPasswordRequest>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let token = query
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| {
            AppError::Validation(ValidationError::BadRequest("token is required".to_string()))
        })?;

    let claims = state.issuer.decode(TokenKind::ResetPassword, token)?;

    let mut user = state
        .users
        .find_by_id(claims.user_id()?)
        .await?
        .ok_or(AppError::Auth(AuthError::TokenInvalid))?;

    // Only the most recently issued reset token is honoured, and only once.
    if user.reset_password_token.as_deref() != Some(token) {
        return Err(AppError::Auth(AuthError::TokenInvalid));
    }

    let now = Utc::now();
    user.password_hash = hash_password(&body.new_password)?;
    user.reset_password_token = None;
    user.password_changed = Some(now);
    user.updated_at = now;
    state.users.update(&user).await?;

    tracing::info!(user_id = %user.id, "Password reset");
    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}

/// GET /auth/me
pub async fn me(identity: web::ReqData<Identity>) -> HttpResponse {
    HttpResponse::Ok().json(identity.into_inner())
}
