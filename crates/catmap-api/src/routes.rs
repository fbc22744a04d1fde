use axum::{
    Json, Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};
use serde_json::{Value, json};
use tower_http::services::ServeDir;

use crate::auth::{self, AppState};
use crate::middleware::require_auth;
use crate::storage::MAX_UPLOAD_SIZE;
use crate::{cats, users};

/// Room for the multipart text fields next to the picture.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Full API router. Layers that depend on deployment (CORS, tracing) are
/// added by the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/login", post(auth::login))
        .route("/users", get(users::list_users).post(users::register))
        .route("/users/{id}", get(users::get_user))
        .route("/cats", get(cats::list_cats))
        .route("/cats/area", get(cats::cats_in_area))
        .route("/cats/{id}", get(cats::get_cat))
        .with_state(state.clone());

    let protected_routes = Router::new()
        .route("/users/token", get(users::check_token))
        .route("/users/me", put(users::update_current).delete(users::delete_current))
        .route("/cats", post(cats::create_cat))
        .route("/cats/user", get(cats::cats_of_current_user))
        .route("/cats/{id}", put(cats::update_cat).delete(cats::delete_cat))
        .route("/cats/admin/{id}", put(cats::update_cat_admin).delete(cats::delete_cat_admin))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state.clone());

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .nest_service("/uploads", ServeDir::new(state.storage.dir()))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_SIZE + MULTIPART_OVERHEAD))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
