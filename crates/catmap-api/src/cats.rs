use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{
        Multipart, State,
        multipart::{MultipartError, MultipartRejection},
    },
    http::StatusCode,
    response::IntoResponse,
};
use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;
use validator::Validate;

use catmap_db::models::{CatChanges, CatRow, NewCat};
use catmap_types::api::{AreaQuery, CreateCatRequest, MessageResponse, UpdateCatRequest};
use catmap_types::geo::{Coordinate, rectangle_bounds};
use catmap_types::models::Cat;

use crate::access::{Outcome, Scope, admin_scope};
use crate::auth::AppState;
use crate::blocking;
use crate::error::{ApiError, ApiResult};
use crate::middleware::Principal;
use crate::storage::MAX_UPLOAD_SIZE;
use crate::validation::{FieldErrors, IdPath, ValidJson, ValidQuery};

const CAT_NOT_FOUND: &str = "Cat not found";

/// Multipart part carrying the picture.
const FILE_FIELD: &str = "cat";
const FILE_NOT_VALID: &str = "file not valid";

pub type CatResponse = MessageResponse<Cat>;

fn into_models(rows: Vec<CatRow>) -> Vec<Cat> {
    rows.into_iter().map(CatRow::into_model).collect()
}

/// GET /cats
pub async fn list_cats(State(state): State<AppState>) -> ApiResult<Json<Vec<Cat>>> {
    let rows = blocking(&state, |state| state.db.list_cats()).await?;
    Ok(Json(into_models(rows)))
}

/// GET /cats/{id}
pub async fn get_cat(State(state): State<AppState>, IdPath(id): IdPath) -> ApiResult<Json<Cat>> {
    let row = blocking(&state, move |state| state.db.get_cat(&id.to_string())).await?;
    let cat = Outcome::from(row).into_result(CAT_NOT_FOUND)?;
    Ok(Json(cat.into_model()))
}

/// GET /cats/area?topRight=lat,lng&bottomLeft=lat,lng
pub async fn cats_in_area(
    State(state): State<AppState>,
    ValidQuery(query): ValidQuery<AreaQuery>,
) -> ApiResult<Json<Vec<Cat>>> {
    let polygon = rectangle_bounds(query.top_right.0, query.bottom_left.0);
    let bounds = polygon.bounds();
    let rows = blocking(&state, move |state| state.db.cats_within(&bounds)).await?;
    Ok(Json(into_models(rows)))
}

/// GET /cats/user: the principal's own cats.
pub async fn cats_of_current_user(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<Vec<Cat>>> {
    let owner_id = principal.id.to_string();
    let rows = blocking(&state, move |state| state.db.cats_by_owner(&owner_id)).await?;
    Ok(Json(into_models(rows)))
}

/// POST /cats: multipart: text fields plus the picture in the `cat` part.
/// The owner is always the principal; an `owner` field is ignored.
pub async fn create_cat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<impl IntoResponse> {
    let mut multipart = multipart.map_err(|e| ApiError::Validation(e.body_text()))?;

    let mut fields = HashMap::new();
    let mut upload = None;
    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let Some(name) = field.name().map(str::to_string) else {
            continue;
        };

        if name == FILE_FIELD {
            let is_image = field
                .content_type()
                .is_some_and(|ct| ct.starts_with("image/"));
            let file_name = field.file_name().map(str::to_string);

            let mut data = Vec::new();
            while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                if data.len() + chunk.len() > MAX_UPLOAD_SIZE {
                    debug!("Rejected upload over {} bytes", MAX_UPLOAD_SIZE);
                    return Err(ApiError::BadRequest(FILE_NOT_VALID.into()));
                }
                data.extend_from_slice(&chunk);
            }
            upload = (is_image && !data.is_empty()).then_some((file_name, data));
        } else {
            let text = field.text().await.map_err(multipart_error)?;
            fields.insert(name, text);
        }
    }

    let req = parse_create_fields(&fields)?;
    let Some((file_name, data)) = upload else {
        return Err(ApiError::BadRequest(FILE_NOT_VALID.into()));
    };

    let filename = state.storage.save(file_name.as_deref(), &data).await?;

    let new_cat = NewCat {
        id: Uuid::new_v4(),
        cat_name: req.cat_name,
        weight: req.weight,
        birthdate: req.birthdate,
        owner_id: principal.id,
        filename: filename.clone(),
        location: Coordinate::new(req.lat, req.lng),
    };
    let row = match blocking(&state, move |state| state.db.insert_cat(&new_cat)).await {
        Ok(Some(row)) => row,
        // the principal's account was deleted after the token check
        Ok(None) => {
            let gone = ApiError::Forbidden("token not valid".into());
            return Err(discard_upload(&state, &filename, gone).await);
        }
        Err(e) => return Err(discard_upload(&state, &filename, e).await),
    };

    let cat = row.into_model();
    info!("Cat {} created by {}", cat.id, principal.user_name);
    Ok((StatusCode::CREATED, Json(MessageResponse::new("cat created", cat))))
}

async fn discard_upload(state: &AppState, filename: &str, err: ApiError) -> ApiError {
    if let Err(cleanup) = state.storage.delete(filename).await {
        warn!("Failed to remove orphaned upload {}: {}", filename, cleanup);
    }
    err
}

/// A body over the request limit can only come from the picture.
fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::BadRequest(FILE_NOT_VALID.into())
    } else {
        ApiError::Validation(e.body_text())
    }
}

/// PUT /cats/{id}: owner only.
pub async fn update_cat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    IdPath(id): IdPath,
    ValidJson(req): ValidJson<UpdateCatRequest>,
) -> ApiResult<Json<CatResponse>> {
    update_scoped(&state, id, Outcome::Done(Scope::owned_by(&principal)), req).await
}

/// DELETE /cats/{id}: owner only.
pub async fn delete_cat(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    IdPath(id): IdPath,
) -> ApiResult<Json<CatResponse>> {
    delete_scoped(&state, id, Outcome::Done(Scope::owned_by(&principal))).await
}

/// PUT /cats/admin/{id}: any cat, admins only.
pub async fn update_cat_admin(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    IdPath(id): IdPath,
    ValidJson(req): ValidJson<UpdateCatRequest>,
) -> ApiResult<Json<CatResponse>> {
    update_scoped(&state, id, admin_scope(&principal), req).await
}

/// DELETE /cats/admin/{id}: any cat, admins only.
pub async fn delete_cat_admin(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    IdPath(id): IdPath,
) -> ApiResult<Json<CatResponse>> {
    delete_scoped(&state, id, admin_scope(&principal)).await
}

async fn update_scoped(
    state: &AppState,
    id: Uuid,
    scope: Outcome<Scope>,
    req: UpdateCatRequest,
) -> ApiResult<Json<CatResponse>> {
    // role gate before touching the record layer
    let scope = scope.into_result(CAT_NOT_FOUND)?;

    let changes = CatChanges {
        cat_name: req.cat_name,
        weight: req.weight,
        birthdate: req.birthdate,
        location: req.lat.zip(req.lng).map(|(lat, lng)| Coordinate::new(lat, lng)),
    };
    let row = blocking(state, move |state| {
        state
            .db
            .update_cat(&id.to_string(), scope.owner_filter().as_deref(), &changes)
    })
    .await?;

    let cat = Outcome::from(row).into_result(CAT_NOT_FOUND)?.into_model();
    info!("Cat {} updated", cat.id);
    Ok(Json(MessageResponse::new("cat updated", cat)))
}

async fn delete_scoped(
    state: &AppState,
    id: Uuid,
    scope: Outcome<Scope>,
) -> ApiResult<Json<CatResponse>> {
    let scope = scope.into_result(CAT_NOT_FOUND)?;

    let row = blocking(state, move |state| {
        state
            .db
            .delete_cat(&id.to_string(), scope.owner_filter().as_deref())
    })
    .await?;

    let cat = Outcome::from(row).into_result(CAT_NOT_FOUND)?.into_model();
    if let Err(e) = state.storage.delete(&cat.filename).await {
        warn!("Failed to remove upload {} of cat {}: {}", cat.filename, cat.id, e);
    }
    info!("Cat {} deleted", cat.id);
    Ok(Json(MessageResponse::new("cat deleted", cat)))
}

/// Parse and check the text parts of a create request, collecting every
/// problem before failing.
fn parse_create_fields(fields: &HashMap<String, String>) -> ApiResult<CreateCatRequest> {
    let mut errors = FieldErrors::default();

    let cat_name = required(fields, &mut errors, "cat_name");
    let weight = required(fields, &mut errors, "weight");
    let birthdate = required(fields, &mut errors, "birthdate");
    let lat = required(fields, &mut errors, "lat");
    let lng = required(fields, &mut errors, "lng");

    let weight = weight.and_then(|v| number(&mut errors, "weight", v));
    let lat = lat.and_then(|v| number(&mut errors, "lat", v));
    let lng = lng.and_then(|v| number(&mut errors, "lng", v));
    let birthdate = birthdate.and_then(|v| match NaiveDate::parse_from_str(v, "%Y-%m-%d") {
        Ok(date) => Some(date),
        Err(_) => {
            errors.add("birthdate", "must be a date (YYYY-MM-DD)");
            None
        }
    });

    let (Some(cat_name), Some(weight), Some(birthdate), Some(lat), Some(lng)) =
        (cat_name, weight, birthdate, lat, lng)
    else {
        return Err(errors
            .into_result()
            .err()
            .unwrap_or_else(|| ApiError::Validation("Invalid value: body".into())));
    };

    let req = CreateCatRequest {
        cat_name: cat_name.to_string(),
        weight,
        birthdate,
        lat,
        lng,
    };
    if let Err(e) = req.validate() {
        errors.extend(&e);
    }
    errors.into_result()?;
    Ok(req)
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    errors: &mut FieldErrors,
    name: &str,
) -> Option<&'a str> {
    let value = fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty());
    if value.is_none() {
        errors.add(name, "is required");
    }
    value
}

fn number(errors: &mut FieldErrors, name: &str, value: &str) -> Option<f64> {
    match value.parse::<f64>() {
        Ok(n) if n.is_finite() => Some(n),
        _ => {
            errors.add(name, "must be a number");
            None
        }
    }
}
