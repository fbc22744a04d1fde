use crate::Database;
use crate::models::{CatChanges, CatRow, DeletedUser, NewCat, NewUser, UserChanges, UserRow, UserWrite};
use anyhow::Result;
use catmap_types::geo::Bounds;
use catmap_types::models::Role;
use rusqlite::{Connection, ErrorCode, Row, params};

const USER_COLUMNS: &str = "id, user_name, email, role, password, created_at";

const CAT_SELECT: &str = "SELECT c.id, c.cat_name, c.weight, c.birthdate, c.owner_id, u.user_name, u.email,
            c.filename, c.lat, c.lng, c.created_at
     FROM cats c
     JOIN users u ON c.owner_id = u.id";

impl Database {
    // -- Users --

    /// Inserts the user unless the user name or email is already held.
    /// The check and the insert share one transaction.
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<UserWrite> {
        self.with_conn_mut(|conn| {
            if name_or_email_taken(conn, Some(user.user_name), Some(user.email), None)? {
                return Ok(UserWrite::Taken);
            }

            let inserted = conn
                .execute(
                    "INSERT INTO users (id, user_name, email, role, password) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        user.id.to_string(),
                        user.user_name,
                        user.email,
                        user.role.as_str(),
                        user.password_hash
                    ],
                )
                .unless_constraint()?;
            if inserted.is_none() {
                return Ok(UserWrite::Taken);
            }

            let row = query_user(conn, "id", &user.id.to_string())?
                .ok_or_else(|| anyhow::anyhow!("User vanished after insert: {}", user.id))?;
            Ok(UserWrite::Saved(row))
        })
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {} FROM users ORDER BY created_at, user_name",
                USER_COLUMNS
            ))?;
            let rows = stmt
                .query_map([], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(rows)
        })
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn has_admin(&self) -> Result<bool> {
        self.with_conn(|conn| {
            let exists: bool = conn.query_row(
                "SELECT EXISTS (SELECT 1 FROM users WHERE role = ?1)",
                [Role::Admin.as_str()],
                |row| row.get(0),
            )?;
            Ok(exists)
        })
    }

    pub fn update_user(&self, id: &str, changes: &UserChanges) -> Result<UserWrite> {
        self.with_conn_mut(|conn| {
            if (changes.user_name.is_some() || changes.email.is_some())
                && name_or_email_taken(
                    conn,
                    changes.user_name.as_deref(),
                    changes.email.as_deref(),
                    Some(id),
                )?
            {
                return Ok(UserWrite::Taken);
            }

            let changed = conn
                .execute(
                    "UPDATE users SET
                         user_name = COALESCE(?2, user_name),
                         email     = COALESCE(?3, email),
                         password  = COALESCE(?4, password)
                     WHERE id = ?1",
                    params![id, changes.user_name, changes.email, changes.password_hash],
                )
                .unless_constraint()?;
            match changed {
                None => Ok(UserWrite::Taken),
                Some(0) => Ok(UserWrite::Missing),
                Some(_) => Ok(query_user(conn, "id", id)?.map_or(UserWrite::Missing, UserWrite::Saved)),
            }
        })
    }

    /// Deletes the user and, through the foreign key, their cats.
    /// Returns the deleted row with the cats it took along.
    pub fn delete_user(&self, id: &str) -> Result<Option<DeletedUser>> {
        self.with_conn_mut(|conn| {
            let Some(user) = query_user(conn, "id", id)? else {
                return Ok(None);
            };
            let cats = query_cats(
                conn,
                &format!("{} WHERE c.owner_id = ?1", CAT_SELECT),
                [id],
            )?;
            conn.execute("DELETE FROM users WHERE id = ?1", [id])?;
            Ok(Some(DeletedUser { user, cats }))
        })
    }

    // -- Cats --

    /// Inserts the cat. `None` when the owner no longer exists.
    pub fn insert_cat(&self, cat: &NewCat) -> Result<Option<CatRow>> {
        self.with_conn_mut(|conn| {
            let inserted = conn.execute(
                "INSERT INTO cats (id, cat_name, weight, birthdate, owner_id, filename, lat, lng)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    cat.id.to_string(),
                    cat.cat_name,
                    cat.weight,
                    cat.birthdate.format("%Y-%m-%d").to_string(),
                    cat.owner_id.to_string(),
                    cat.filename,
                    cat.location.lat,
                    cat.location.lng,
                ],
            )
            .unless_constraint()?;
            if inserted.is_none() {
                return Ok(None);
            }
            let row = query_cat(conn, &cat.id.to_string())?
                .ok_or_else(|| anyhow::anyhow!("Cat vanished after insert: {}", cat.id))?;
            Ok(Some(row))
        })
    }

    pub fn list_cats(&self) -> Result<Vec<CatRow>> {
        self.with_conn(|conn| {
            query_cats(conn, &format!("{} ORDER BY c.created_at, c.cat_name", CAT_SELECT), params![])
        })
    }

    pub fn get_cat(&self, id: &str) -> Result<Option<CatRow>> {
        self.with_conn(|conn| query_cat(conn, id))
    }

    pub fn cats_by_owner(&self, owner_id: &str) -> Result<Vec<CatRow>> {
        self.with_conn(|conn| {
            query_cats(
                conn,
                &format!("{} WHERE c.owner_id = ?1 ORDER BY c.created_at, c.cat_name", CAT_SELECT),
                [owner_id],
            )
        })
    }

    /// Cats whose location lies inside `bounds`, edges included.
    pub fn cats_within(&self, bounds: &Bounds) -> Result<Vec<CatRow>> {
        self.with_conn(|conn| {
            query_cats(
                conn,
                &format!(
                    "{} WHERE c.lat BETWEEN ?1 AND ?2 AND c.lng BETWEEN ?3 AND ?4
                     ORDER BY c.created_at, c.cat_name",
                    CAT_SELECT
                ),
                params![bounds.min_lat, bounds.max_lat, bounds.min_lng, bounds.max_lng],
            )
        })
    }

    /// Applies `changes` to the cat matching `id` and, when given, `owner_id`.
    /// Returns `None` when no row matches the filter.
    pub fn update_cat(
        &self,
        id: &str,
        owner_id: Option<&str>,
        changes: &CatChanges,
    ) -> Result<Option<CatRow>> {
        self.with_conn_mut(|conn| {
            let changed = conn.execute(
                "UPDATE cats SET
                     cat_name  = COALESCE(?3, cat_name),
                     weight    = COALESCE(?4, weight),
                     birthdate = COALESCE(?5, birthdate),
                     lat       = COALESCE(?6, lat),
                     lng       = COALESCE(?7, lng)
                 WHERE id = ?1 AND (?2 IS NULL OR owner_id = ?2)",
                params![
                    id,
                    owner_id,
                    changes.cat_name,
                    changes.weight,
                    changes.birthdate.map(|d| d.format("%Y-%m-%d").to_string()),
                    changes.location.map(|c| c.lat),
                    changes.location.map(|c| c.lng),
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            query_cat(conn, id)
        })
    }

    /// Deletes the cat matching `id` and, when given, `owner_id`.
    /// Returns the deleted row, or `None` when no row matches the filter.
    pub fn delete_cat(&self, id: &str, owner_id: Option<&str>) -> Result<Option<CatRow>> {
        self.with_conn_mut(|conn| {
            let Some(cat) = query_cat(conn, id)? else {
                return Ok(None);
            };
            if owner_id.is_some_and(|owner| owner != cat.owner_id) {
                return Ok(None);
            }
            conn.execute("DELETE FROM cats WHERE id = ?1", [id])?;
            Ok(Some(cat))
        })
    }
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        user_name: row.get(1)?,
        email: row.get(2)?,
        role: row.get(3)?,
        password: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn cat_from_row(row: &Row<'_>) -> rusqlite::Result<CatRow> {
    Ok(CatRow {
        id: row.get(0)?,
        cat_name: row.get(1)?,
        weight: row.get(2)?,
        birthdate: row.get(3)?,
        owner_id: row.get(4)?,
        owner_user_name: row.get(5)?,
        owner_email: row.get(6)?,
        filename: row.get(7)?,
        lat: row.get(8)?,
        lng: row.get(9)?,
        created_at: row.get(10)?,
    })
}

/// True if an account other than `except_id` holds the user name or the email.
fn name_or_email_taken(
    conn: &Connection,
    user_name: Option<&str>,
    email: Option<&str>,
    except_id: Option<&str>,
) -> Result<bool> {
    let taken: bool = conn.query_row(
        "SELECT EXISTS (
             SELECT 1 FROM users
             WHERE (user_name = ?1 OR email = ?2)
               AND (?3 IS NULL OR id <> ?3)
         )",
        params![user_name, email, except_id],
        |row| row.get(0),
    )?;
    Ok(taken)
}

/// `column` is always one of our own literals, never user input.
fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM users WHERE {} = ?1",
        USER_COLUMNS, column
    ))?;
    let row = stmt.query_row([value], user_from_row).optional()?;
    Ok(row)
}

fn query_cat(conn: &Connection, id: &str) -> Result<Option<CatRow>> {
    let mut stmt = conn.prepare(&format!("{} WHERE c.id = ?1", CAT_SELECT))?;
    let row = stmt.query_row([id], cat_from_row).optional()?;
    Ok(row)
}

fn query_cats<P: rusqlite::Params>(conn: &Connection, sql: &str, params: P) -> Result<Vec<CatRow>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, cat_from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// Turns a UNIQUE / FOREIGN KEY failure into `None`.
trait ConstraintExt<T> {
    fn unless_constraint(self) -> Result<Option<T>>;
}

impl<T> ConstraintExt<T> for std::result::Result<T, rusqlite::Error> {
    fn unless_constraint(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
