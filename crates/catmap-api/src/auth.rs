use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use tracing::{info, warn};
use uuid::Uuid;

use catmap_db::Database;
use catmap_db::models::{NewUser, UserRow, UserWrite};
use catmap_types::api::{Claims, LoginRequest, LoginResponse};
use catmap_types::models::{LoginUser, Role};

use crate::error::{ApiError, ApiResult};
use crate::blocking;
use crate::middleware::Principal;
use crate::storage::Storage;
use crate::validation::ValidJson;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub auth: AuthService,
    pub storage: Storage,
}

/// Password hashing and bearer-token issuing/verification.
///
/// Built once at startup and shared through [`AppState`].
pub struct AuthService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    token_ttl: chrono::Duration,
    /// Verified against when the user does not exist, so unknown users
    /// cost the same as wrong passwords.
    dummy_hash: String,
}

impl AuthService {
    pub fn new(jwt_secret: &str, token_ttl: chrono::Duration) -> anyhow::Result<Self> {
        let dummy_hash = hash_password("catmap-dummy-password")?;
        Ok(Self {
            encoding_key: EncodingKey::from_secret(jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(jwt_secret.as_bytes()),
            token_ttl,
            dummy_hash,
        })
    }

    pub fn hash_password(&self, password: &str) -> anyhow::Result<String> {
        hash_password(password)
    }

    /// Check a login attempt. `None` covers both an unknown user and a wrong
    /// password; callers cannot tell them apart.
    pub fn verify_credentials(
        &self,
        db: &Database,
        email: &str,
        password: &str,
    ) -> anyhow::Result<Option<UserRow>> {
        let Some(user) = db.get_user_by_email(email)? else {
            let _ = verify_password(&self.dummy_hash, password);
            return Ok(None);
        };

        if verify_password(&user.password, password)? {
            Ok(Some(user))
        } else {
            Ok(None)
        }
    }

    pub fn issue_token(&self, user: &LoginUser) -> anyhow::Result<String> {
        let claims = Claims {
            sub: user.id,
            user_name: user.user_name.clone(),
            email: user.email.clone(),
            role: user.role,
            exp: (chrono::Utc::now() + self.token_ttl).timestamp() as usize,
        };

        let token = encode(&Header::default(), &claims, &self.encoding_key)?;
        Ok(token)
    }

    pub fn verify_token(&self, token: &str) -> anyhow::Result<Principal> {
        let data = decode::<Claims>(token, &self.decoding_key, &Validation::default())?;
        Ok(Principal::from(data.claims))
    }
}

fn hash_password(password: &str) -> anyhow::Result<String> {
    // Argon2id with a fresh salt
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?
        .to_string();
    Ok(hash)
}

fn verify_password(hash: &str, password: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| anyhow::anyhow!("Corrupt password hash: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}

/// POST /auth/login: `username` is the account email.
pub async fn login(
    State(state): State<AppState>,
    ValidJson(req): ValidJson<LoginRequest>,
) -> ApiResult<Json<LoginResponse>> {
    let user = blocking(&state, move |state| {
        state.auth.verify_credentials(&state.db, &req.username, &req.password)
    })
    .await?;

    let Some(user) = user else {
        warn!("Failed login attempt");
        return Err(ApiError::Unauthorized("Incorrect username/password".into()));
    };

    let login_user = user.to_login_user();
    let token = state.auth.issue_token(&login_user)?;
    info!("User {} logged in", login_user.user_name);

    Ok(Json(LoginResponse {
        message: "Login successful".into(),
        token,
        user: login_user,
    }))
}

/// Seed account created at startup when no admin exists yet.
pub struct AdminSeed {
    pub user_name: String,
    pub email: String,
    pub password: String,
}

/// Create the admin account unless one already exists.
pub fn bootstrap_admin(state: &AppStateInner, seed: &AdminSeed) -> anyhow::Result<()> {
    if state.db.has_admin()? {
        return Ok(());
    }

    if seed.password.trim().is_empty() {
        anyhow::bail!("admin bootstrap password is empty (set CATMAP_ADMIN_PASSWORD)");
    }

    let password_hash = state.auth.hash_password(&seed.password)?;
    let created = state.db.create_user(&NewUser {
        id: Uuid::new_v4(),
        user_name: &seed.user_name,
        email: &seed.email,
        role: Role::Admin,
        password_hash: &password_hash,
    })?;
    if !matches!(created, UserWrite::Saved(_)) {
        anyhow::bail!(
            "admin user name '{}' or email '{}' already belongs to another account",
            seed.user_name,
            seed.email
        );
    }

    warn!("Bootstrapped admin user '{}' ({})", seed.user_name, seed.email);
    Ok(())
}
