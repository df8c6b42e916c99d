use actix_web::{web, HttpResponse};
use uuid::Uuid;

use crate::error::{AppError, DatabaseError};
use crate::startup::AppState;
use crate::store::UserResponse;

/// GET /users
pub async fn list_users(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let users = state.users.list().await?;
    let body: Vec<UserResponse> = users.iter().map(UserResponse::from).collect();
    Ok(HttpResponse::Ok().json(body))
}

/// GET /users/{id}
pub async fn get_user(
    path: web::Path<Uuid>,
    state: web::Data<AppState>,
) -> Result<HttpResponse, AppError> {
    let id = path.into_inner();
    let user = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::Database(DatabaseError::NotFound(format!("user {}", id))))?;

    Ok(HttpResponse::Ok().json(UserResponse::from(&user)))
}
