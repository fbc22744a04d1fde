//! Owner and role gates for mutating requests.

use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::Principal;

/// Result of a gated mutation.
#[derive(Debug, PartialEq)]
pub enum Outcome<T> {
    Done(T),
    /// No record matched the filter: missing id or not the owner.
    NotFound,
    Forbidden,
}

impl<T> Outcome<T> {
    pub fn into_result(self, not_found: &str) -> Result<T, ApiError> {
        match self {
            Outcome::Done(value) => Ok(value),
            Outcome::NotFound => Err(ApiError::NotFound(not_found.to_string())),
            Outcome::Forbidden => Err(ApiError::Forbidden("Admin only".into())),
        }
    }
}

impl<T> From<Option<T>> for Outcome<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Outcome::NotFound, Outcome::Done)
    }
}

/// Which records a principal may mutate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scope {
    /// Only records owned by this principal.
    Owner(Uuid),
    /// Any record; admin routes only.
    Any,
}

impl Scope {
    pub fn owned_by(principal: &Principal) -> Self {
        Scope::Owner(principal.id)
    }

    /// Owner filter to hand to the record layer.
    pub fn owner_filter(&self) -> Option<String> {
        match self {
            Scope::Owner(id) => Some(id.to_string()),
            Scope::Any => None,
        }
    }
}

/// Role gate: admin routes proceed only for admins, checked before any
/// record-layer call.
pub fn admin_scope(principal: &Principal) -> Outcome<Scope> {
    if principal.is_admin() {
        Outcome::Done(Scope::Any)
    } else {
        Outcome::Forbidden
    }
}
