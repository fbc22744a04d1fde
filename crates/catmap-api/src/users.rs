use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::{info, warn};
use uuid::Uuid;

use catmap_db::models::{NewUser, UserChanges, UserRow, UserWrite};
use catmap_types::api::{MessageResponse, RegisterRequest, UpdateUserRequest, UserResponse};
use catmap_types::models::{Role, UserOutput};

use crate::access::Outcome;
use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Principal;
use crate::validation::{IdPath, ValidJson};

const USER_NOT_FOUND: &str = "User not found";
const NAME_OR_EMAIL_TAKEN: &str = "user_name or email already in use";

fn saved(write: UserWrite) -> ApiResult<UserRow> {
    match write {
        UserWrite::Saved(row) => Ok(row),
        UserWrite::Taken => Err(ApiError::BadRequest(NAME_OR_EMAIL_TAKEN.into())),
        UserWrite::Missing => Err(ApiError::NotFound(USER_NOT_FOUND.into())),
    }
}

/// GET /users
pub async fn list_users(State(state): State<AppState>) -> ApiResult<Json<Vec<UserOutput>>> {
    let rows = blocking(&state, |state| state.db.list_users()).await?;
    Ok(Json(rows.iter().map(|row| row.to_output()).collect()))
}

/// GET /users/{id}
pub async fn get_user(
    State(state): State<AppState>,
    IdPath(id): IdPath,
) -> ApiResult<Json<UserOutput>> {
    let row = blocking(&state, move |state| state.db.get_user_by_id(&id.to_string())).await?;
    let user = Outcome::from(row).into_result(USER_NOT_FOUND)?;
    Ok(Json(user.to_output()))
}

/// POST /users: registration. Role is always `user`.
pub async fn register(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    let write = blocking(&state, move |state| {
        // hash outside the write transaction
        let password_hash = state.auth.hash_password(&req.password)?;
        state.db.create_user(&NewUser {
            id: Uuid::new_v4(),
            user_name: &req.user_name,
            email: &req.email,
            role: Role::User,
            password_hash: &password_hash,
        })
    })
    .await?;
    let row = saved(write)?;

    info!("Registered user {}", row.user_name);
    let body: UserResponse = MessageResponse::new("user created", row.to_output());
    Ok((StatusCode::CREATED, Json(body)))
}

/// PUT /users/me
pub async fn update_current(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    ValidJson(req): ValidJson<UpdateUserRequest>,
) -> ApiResult<Json<UserResponse>> {
    let id = principal.id.to_string();
    let write = blocking(&state, move |state| {
        let password_hash = req
            .password
            .as_deref()
            .map(|p| state.auth.hash_password(p))
            .transpose()?;

        let changes = UserChanges {
            user_name: req.user_name,
            email: req.email,
            password_hash,
        };
        state.db.update_user(&id, &changes)
    })
    .await?;

    let user = saved(write)?;
    info!("User {} updated their account", user.user_name);
    Ok(Json(MessageResponse::new("user updated", user.to_output())))
}

/// DELETE /users/me: the user's cats and their pictures go with it.
pub async fn delete_current(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<UserResponse>> {
    let id = principal.id.to_string();
    let deleted = blocking(&state, move |state| state.db.delete_user(&id)).await?;

    let deleted = Outcome::from(deleted).into_result(USER_NOT_FOUND)?;
    for cat in &deleted.cats {
        if let Err(e) = state.storage.delete(&cat.filename).await {
            warn!("Failed to remove upload {} of cat {}: {}", cat.filename, cat.id, e);
        }
    }
    info!(
        "User {} deleted their account ({} cats removed)",
        deleted.user.user_name,
        deleted.cats.len()
    );
    Ok(Json(MessageResponse::new("user deleted", deleted.user.to_output())))
}

/// GET /users/token: echo the authenticated principal.
pub async fn check_token(Extension(principal): Extension<Principal>) -> Json<UserOutput> {
    Json(principal.to_output())
}
