use axum::{
    extract::{FromRequestParts, Request, State},
    middleware::Next,
    response::Response,
};
use axum_extra::{
    TypedHeader,
    headers::{Authorization, authorization::Bearer},
};
use tracing::debug;
use uuid::Uuid;

use catmap_db::models::UserRow;
use catmap_types::api::Claims;
use catmap_types::models::{Role, UserOutput};

use crate::auth::AppState;
use crate::blocking;
use crate::error::ApiError;

/// Authenticated identity attached to the request by [`require_auth`].
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub user_name: String,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    pub fn to_output(&self) -> UserOutput {
        UserOutput {
            id: self.id,
            user_name: self.user_name.clone(),
            email: self.email.clone(),
        }
    }
}

impl From<Claims> for Principal {
    fn from(claims: Claims) -> Self {
        Self {
            id: claims.sub,
            user_name: claims.user_name,
            email: claims.email,
            role: claims.role,
        }
    }
}

impl From<&UserRow> for Principal {
    fn from(row: &UserRow) -> Self {
        Self {
            id: row.uuid(),
            user_name: row.user_name.clone(),
            email: row.email.clone(),
            role: row.role(),
        }
    }
}

/// Extract and verify the bearer token, then insert the [`Principal`]
/// into the request extensions. The account must still exist; the
/// principal carries its current name, email and role.
pub async fn require_auth(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let (mut parts, body) = req.into_parts();

    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(&mut parts, &state)
            .await
            .map_err(|_| ApiError::Forbidden("token not valid".into()))?;

    let claimed = state.auth.verify_token(bearer.token()).map_err(|e| {
        debug!("Rejected bearer token: {}", e);
        ApiError::Forbidden("token not valid".into())
    })?;

    let id = claimed.id.to_string();
    let Some(row) = blocking(&state, move |state| state.db.get_user_by_id(&id)).await? else {
        debug!("Rejected bearer token of deleted user {}", claimed.id);
        return Err(ApiError::Forbidden("token not valid".into()));
    };

    parts.extensions.insert(Principal::from(&row));
    Ok(next.run(Request::from_parts(parts, body)).await)
}
