//! Identity bootstrap: registration, login, token verification, password
//! reset. Tokens are HS256 bearer JWTs carrying the caller's role, group and
//! assigned property ids; the [`Identity`] extractor turns a validated token
//! into the typed value the core consumes.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use diesel::prelude::*;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use log::{info, warn};
use rand::distributions::Alphanumeric;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::access::Identity;
use crate::notify::NotificationEvent;
use crate::shared::enums::Role;
use crate::shared::error::ApiError;
use crate::shared::models::{PasswordReset, User};
use crate::shared::schema::{password_resets, user_properties, users};
use crate::shared::state::AppState;
use crate::shared::utils::get_conn;

const TOKEN_TTL_HOURS: i64 = 24;
const RESET_TTL_MINUTES: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub username: String,
    pub role: String,
    pub group: Option<String>,
    pub properties: Vec<Uuid>,
    pub exp: i64,
    pub iat: i64,
}

pub fn issue_token(user: &User, properties: Vec<Uuid>, secret: &str) -> Result<String, ApiError> {
    let now = Utc::now();
    let claims = Claims {
        sub: user.id.to_string(),
        username: user.username.clone(),
        role: user.role.as_str().to_string(),
        group: user.group_name.clone(),
        properties,
        exp: (now + Duration::hours(TOKEN_TTL_HOURS)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Unexpected(format!("token encode: {e}")))
}

pub fn validate_token(token: &str, secret: &str) -> Result<Identity, ApiError> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| ApiError::Unauthenticated(format!("invalid token: {e}")))?;

    let claims = data.claims;
    let user_id = Uuid::parse_str(&claims.sub)
        .map_err(|_| ApiError::Unauthenticated("invalid subject".to_string()))?;
    let role: Role = claims
        .role
        .parse()
        .map_err(|_| ApiError::Unauthenticated("invalid role".to_string()))?;

    Ok(Identity {
        user_id,
        username: claims.username,
        role,
        group: claims.group,
        property_ids: claims.properties,
    })
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for Identity {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".to_string()))?;
        let token = header
            .strip_prefix("Bearer ")
            .or_else(|| header.strip_prefix("bearer "))
            .ok_or_else(|| ApiError::Unauthenticated("missing bearer token".to_string()))?;
        validate_token(token, &state.config.jwt_secret)
    }
}

pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Unexpected(format!("password hash: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    PasswordHash::new(hash)
        .map(|parsed| {
            Argon2::default()
                .verify_password(password.as_bytes(), &parsed)
                .is_ok()
        })
        .unwrap_or(false)
}

fn assigned_property_ids(conn: &mut PgConnection, user_id: Uuid) -> Result<Vec<Uuid>, ApiError> {
    user_properties::table
        .filter(user_properties::user_id.eq(user_id))
        .select(user_properties::property_id)
        .load(conn)
        .map_err(ApiError::from)
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub group: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: User,
}

pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterRequest>,
) -> Result<(axum::http::StatusCode, Json<User>), ApiError> {
    if req.username.trim().is_empty() || req.email.trim().is_empty() {
        return Err(ApiError::validation("username and email are required"));
    }
    if req.password.len() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }

    let mut conn = get_conn(&state.conn)?;
    let now = Utc::now();
    let user = User {
        id: Uuid::new_v4(),
        username: req.username.trim().to_string(),
        email: req.email.trim().to_ascii_lowercase(),
        password_hash: hash_password(&req.password)?,
        role: Role::User,
        group_name: req.group,
        phone: req.phone,
        is_active: true,
        manager_id: None,
        created_at: now,
        updated_at: now,
    };

    diesel::insert_into(users::table)
        .values(&user)
        .execute(&mut conn)?;

    info!("registered user {}", user.username);
    Ok((axum::http::StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(req): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let mut conn = get_conn(&state.conn)?;

    let user: Option<User> = users::table
        .filter(users::username.eq(&req.username))
        .first(&mut conn)
        .optional()?;

    let user = match user {
        Some(u) if u.is_active && verify_password(&req.password, &u.password_hash) => u,
        _ => return Err(ApiError::Unauthenticated("bad credentials".to_string())),
    };

    let properties = assigned_property_ids(&mut conn, user.id)?;
    let token = issue_token(&user, properties, &state.config.jwt_secret)?;
    Ok(Json(LoginResponse { token, user }))
}

pub async fn verify_token_handler(identity: Identity) -> Json<Identity> {
    Json(identity)
}

pub async fn ping() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

pub async fn profile(
    State(state): State<Arc<AppState>>,
    identity: Identity,
) -> Result<Json<User>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let user: User = users::table
        .filter(users::id.eq(identity.user_id))
        .first(&mut conn)?;
    Ok(Json(user))
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

pub async fn change_password(
    State(state): State<Arc<AppState>>,
    identity: Identity,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.new_password.len() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }
    let mut conn = get_conn(&state.conn)?;
    let user: User = users::table
        .filter(users::id.eq(identity.user_id))
        .first(&mut conn)?;
    if !verify_password(&req.current_password, &user.password_hash) {
        return Err(ApiError::forbidden("current password does not match"));
    }

    diesel::update(users::table.filter(users::id.eq(user.id)))
        .set((
            users::password_hash.eq(hash_password(&req.new_password)?),
            users::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;
    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct RequestResetRequest {
    pub email: String,
}

pub async fn request_reset(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RequestResetRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut conn = get_conn(&state.conn)?;
    let user: Option<User> = users::table
        .filter(users::email.eq(req.email.trim().to_ascii_lowercase()))
        .first(&mut conn)
        .optional()?;

    // Unknown addresses get the same response so the endpoint cannot be used
    // to enumerate accounts.
    if let Some(user) = user {
        let token: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(48)
            .map(char::from)
            .collect();
        let now = Utc::now();
        let reset = PasswordReset {
            id: Uuid::new_v4(),
            user_id: user.id,
            token: token.clone(),
            expires_at: now + Duration::minutes(RESET_TTL_MINUTES),
            used: false,
            created_at: now,
        };
        diesel::insert_into(password_resets::table)
            .values(&reset)
            .execute(&mut conn)?;

        state.notifier.dispatch(NotificationEvent::PasswordReset {
            user_id: user.id,
            email: user.email.clone(),
            username: user.username.clone(),
            token,
        });
    } else {
        warn!("password reset requested for unknown email");
    }

    Ok(Json(serde_json::json!({ "success": true })))
}

#[derive(Debug, Deserialize)]
pub struct ResetPasswordRequest {
    pub token: String,
    pub new_password: String,
}

pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetPasswordRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if req.new_password.len() < 8 {
        return Err(ApiError::validation(
            "password must be at least 8 characters",
        ));
    }
    let mut conn = get_conn(&state.conn)?;

    let reset: PasswordReset = password_resets::table
        .filter(password_resets::token.eq(&req.token))
        .first(&mut conn)
        .map_err(|_| ApiError::validation("invalid or expired reset token"))?;

    if reset.used || reset.expires_at < Utc::now() {
        return Err(ApiError::validation("invalid or expired reset token"));
    }

    conn.transaction::<_, ApiError, _>(|conn| {
        diesel::update(users::table.filter(users::id.eq(reset.user_id)))
            .set((
                users::password_hash.eq(hash_password(&req.new_password)?),
                users::updated_at.eq(Utc::now()),
            ))
            .execute(conn)?;
        diesel::update(password_resets::table.filter(password_resets::id.eq(reset.id)))
            .set(password_resets::used.eq(true))
            .execute(conn)?;
        Ok(())
    })?;

    Ok(Json(serde_json::json!({ "success": true })))
}

pub fn configure_auth_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/verify-token", get(verify_token_handler))
        .route("/ping", get(ping))
        .route("/profile", get(profile))
        .route("/profile/password", post(change_password))
        .route("/auth/request-reset", post(request_reset))
        .route("/auth/reset-password", post(reset_password))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shared::enums::Role;

    fn test_user() -> User {
        let now = Utc::now();
        User {
            id: Uuid::new_v4(),
            username: "marta".into(),
            email: "marta@example.com".into(),
            password_hash: String::new(),
            role: Role::Manager,
            group_name: Some("Engineering".into()),
            phone: None,
            is_active: true,
            manager_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_token_round_trip() {
        let user = test_user();
        let props = vec![Uuid::new_v4(), Uuid::new_v4()];
        let secret = "a-test-secret-at-least-32-chars-long";

        let token = issue_token(&user, props.clone(), secret).unwrap();
        let identity = validate_token(&token, secret).unwrap();

        assert_eq!(identity.user_id, user.id);
        assert_eq!(identity.role, Role::Manager);
        assert_eq!(identity.group.as_deref(), Some("Engineering"));
        assert_eq!(identity.property_ids, props);
    }

    #[test]
    fn test_token_rejects_wrong_secret() {
        let user = test_user();
        let token = issue_token(&user, Vec::new(), "secret-one-that-is-long-enough").unwrap();
        assert!(validate_token(&token, "secret-two-that-is-long-enough").is_err());
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("hunter22hunter22").unwrap();
        assert!(verify_password("hunter22hunter22", &hash));
        assert!(!verify_password("wrong-password", &hash));
    }
}
