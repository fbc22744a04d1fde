use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

use crate::geo::Corner;
use crate::models::{LoginUser, Role, UserOutput};

// -- JWT Claims --

/// Bearer token payload. The principal is rebuilt from these claims on
/// every authenticated request without touching the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub user_name: String,
    pub email: String,
    pub role: Role,
    pub exp: usize,
}

// -- Envelope --

/// Success envelope used by mutating endpoints.
#[derive(Debug, Serialize)]
pub struct MessageResponse<T> {
    pub message: String,
    pub data: T,
}

impl<T> MessageResponse<T> {
    pub fn new(message: impl Into<String>, data: T) -> Self {
        Self {
            message: message.into(),
            data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub message: String,
    pub status: u16,
}

// -- Auth --

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    /// Matched against the stored email.
    #[validate(length(min = 1, message = "must not be empty"))]
    pub username: String,
    #[validate(length(min = 1, message = "must not be empty"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub message: String,
    pub token: String,
    pub user: LoginUser,
}

// -- Users --

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    #[validate(length(min = 3, message = "must be at least 3 characters"))]
    pub user_name: String,
    #[validate(email(message = "must be a valid email"))]
    pub email: String,
    #[validate(length(min = 5, message = "must be at least 5 characters"))]
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[validate(length(min = 3, message = "must be at least 3 characters"))]
    pub user_name: Option<String>,
    #[validate(email(message = "must be a valid email"))]
    pub email: Option<String>,
    #[validate(length(min = 5, message = "must be at least 5 characters"))]
    pub password: Option<String>,
}

pub type UserResponse = MessageResponse<UserOutput>;

// -- Cats --

/// Text fields of the multipart create request, after parsing.
/// Owner is never part of it: it comes from the principal.
#[derive(Debug, Validate)]
pub struct CreateCatRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub cat_name: String,
    #[validate(range(exclusive_min = 0.0, message = "must be positive"))]
    pub weight: f64,
    pub birthdate: NaiveDate,
    #[validate(range(min = -90.0, max = 90.0, message = "out of range"))]
    pub lat: f64,
    #[validate(range(min = -180.0, max = 180.0, message = "out of range"))]
    pub lng: f64,
}

#[derive(Debug, Default, Deserialize, Validate)]
#[validate(schema(function = "location_pair"))]
pub struct UpdateCatRequest {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub cat_name: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "must be positive"))]
    pub weight: Option<f64>,
    pub birthdate: Option<NaiveDate>,
    #[validate(range(min = -90.0, max = 90.0, message = "out of range"))]
    pub lat: Option<f64>,
    #[validate(range(min = -180.0, max = 180.0, message = "out of range"))]
    pub lng: Option<f64>,
}

fn location_pair(req: &UpdateCatRequest) -> Result<(), ValidationError> {
    if req.lat.is_some() != req.lng.is_some() {
        let mut error = ValidationError::new("location_pair");
        error.message = Some("lat and lng must be supplied together".into());
        return Err(error);
    }
    Ok(())
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AreaQuery {
    pub top_right: Corner,
    pub bottom_left: Corner,
}
