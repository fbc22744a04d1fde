//! Database row types. These map directly to SQLite rows and stay
//! distinct from the catmap-types API models.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use tracing::warn;
use uuid::Uuid;

use catmap_types::geo::Coordinate;
use catmap_types::models::{Cat, LoginUser, Role, UserOutput};

pub struct UserRow {
    pub id: String,
    pub user_name: String,
    pub email: String,
    pub role: String,
    pub password: String,
    pub created_at: String,
}

impl UserRow {
    pub fn uuid(&self) -> Uuid {
        parse_uuid(&self.id, "user id")
    }

    pub fn role(&self) -> Role {
        self.role.parse().unwrap_or_else(|e| {
            warn!("Corrupt role on user '{}': {}", self.id, e);
            Role::User
        })
    }

    pub fn to_output(&self) -> UserOutput {
        UserOutput {
            id: self.uuid(),
            user_name: self.user_name.clone(),
            email: self.email.clone(),
        }
    }

    pub fn to_login_user(&self) -> LoginUser {
        LoginUser {
            id: self.uuid(),
            user_name: self.user_name.clone(),
            email: self.email.clone(),
            role: self.role(),
        }
    }
}

/// Cat joined with its owner's public columns.
pub struct CatRow {
    pub id: String,
    pub cat_name: String,
    pub weight: f64,
    pub birthdate: String,
    pub owner_id: String,
    pub owner_user_name: String,
    pub owner_email: String,
    pub filename: String,
    pub lat: f64,
    pub lng: f64,
    pub created_at: String,
}

impl CatRow {
    pub fn into_model(self) -> Cat {
        let birthdate = NaiveDate::parse_from_str(&self.birthdate, "%Y-%m-%d").unwrap_or_else(|e| {
            warn!("Corrupt birthdate '{}' on cat '{}': {}", self.birthdate, self.id, e);
            NaiveDate::default()
        });

        Cat {
            id: parse_uuid(&self.id, "cat id"),
            cat_name: self.cat_name,
            weight: self.weight,
            birthdate,
            owner: UserOutput {
                id: parse_uuid(&self.owner_id, "owner id"),
                user_name: self.owner_user_name,
                email: self.owner_email,
            },
            filename: self.filename,
            location: Coordinate::new(self.lat, self.lng),
            created_at: parse_timestamp(&self.created_at),
        }
    }
}

pub struct NewUser<'a> {
    pub id: Uuid,
    pub user_name: &'a str,
    pub email: &'a str,
    pub role: Role,
    pub password_hash: &'a str,
}

/// Partial user update; `None` keeps the stored value.
#[derive(Default)]
pub struct UserChanges {
    pub user_name: Option<String>,
    pub email: Option<String>,
    pub password_hash: Option<String>,
}

/// Result of a user write that must keep user names and emails unique.
pub enum UserWrite {
    Saved(UserRow),
    /// Another account already holds the user name or the email.
    Taken,
    /// No account with that id.
    Missing,
}

/// A deleted account and the cats removed with it.
pub struct DeletedUser {
    pub user: UserRow,
    pub cats: Vec<CatRow>,
}

pub struct NewCat {
    pub id: Uuid,
    pub cat_name: String,
    pub weight: f64,
    pub birthdate: NaiveDate,
    pub owner_id: Uuid,
    pub filename: String,
    pub location: Coordinate,
}

/// Partial cat update; `None` keeps the stored value. There is no owner
/// column here: ownership is fixed at creation.
#[derive(Default)]
pub struct CatChanges {
    pub cat_name: Option<String>,
    pub weight: Option<f64>,
    pub birthdate: Option<NaiveDate>,
    pub location: Option<Coordinate>,
}

fn parse_uuid(value: &str, what: &str) -> Uuid {
    value.parse().unwrap_or_else(|e| {
        warn!("Corrupt {} '{}': {}", what, value, e);
        Uuid::default()
    })
}

fn parse_timestamp(value: &str) -> DateTime<Utc> {
    value
        .parse::<DateTime<Utc>>()
        .or_else(|_| {
            // SQLite stores timestamps as "YYYY-MM-DD HH:MM:SS" without timezone.
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").map(|ndt| ndt.and_utc())
        })
        .unwrap_or_else(|e| {
            warn!("Corrupt timestamp '{}': {}", value, e);
            DateTime::default()
        })
}
