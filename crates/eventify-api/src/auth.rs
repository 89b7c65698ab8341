use std::sync::OnceLock;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::info;
use uuid::Uuid;

use eventify_types::api::{AuthResponse, Claims, LoginRequest, SignupRequest};
use eventify_types::models::{Role, User};

use crate::error::{ApiError, ApiJson, ApiResult};
use crate::middleware::Principal;
use crate::policy::{Operation, authorize};
use crate::state::AppState;

const INVALID_CREDENTIALS: &str = "Invalid credentials";

pub async fn signup(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SignupRequest>,
) -> ApiResult<impl IntoResponse> {
    let (Some(username), Some(email), Some(password), Some(role)) =
        (req.username, req.email, req.password, req.role)
    else {
        return Err(ApiError::validation("All fields are required"));
    };

    let username = username.trim().to_string();
    let email = normalize_email(&email);
    if username.is_empty() || email.is_empty() || password.is_empty() {
        return Err(ApiError::validation("All fields are required"));
    }
    if !email.contains('@') {
        return Err(ApiError::validation("Invalid email address"));
    }

    let role: Role = role.parse().map_err(ApiError::Validation)?;
    if role == Role::Admin && !state.allow_admin_signup {
        return Err(ApiError::Forbidden(
            "Admin accounts cannot be created through signup".to_string(),
        ));
    }

    let password_hash = tokio::task::spawn_blocking(move || hash_password(&password)).await??;

    let user_id = Uuid::new_v4();
    let created = {
        let (username, email) = (username.clone(), email.clone());
        state
            .db(move |db| db.create_user(user_id, &username, &email, &password_hash, role))
            .await?
    };
    if !created {
        return Err(ApiError::Conflict("Email already exists".to_string()));
    }

    let user = state
        .db(move |db| db.get_user_by_id(user_id))
        .await?
        .ok_or_else(|| ApiError::Internal(anyhow::anyhow!("User {} vanished after insert", user_id)))?;

    info!("{} signed up as {} ({})", username, role, user_id);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User created successfully".to_string(),
            token: None,
            user: User::from(user),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<LoginRequest>,
) -> ApiResult<Json<AuthResponse>> {
    let (Some(email), Some(password)) = (req.email, req.password) else {
        return Err(ApiError::validation("Email and password are required"));
    };
    let email = normalize_email(&email);

    let user = state.db(move |db| db.get_user_by_email(&email)).await?;

    // Same work and the same answer whether or not the account exists.
    let stored_hash = user.as_ref().map(|u| u.password.clone());
    let verified = tokio::task::spawn_blocking(move || match stored_hash {
        Some(hash) => verify_password(&password, &hash),
        None => {
            let _ = verify_password(&password, dummy_hash());
            false
        }
    })
    .await?;

    let user = match user {
        Some(user) if verified => user,
        _ => return Err(ApiError::Auth(INVALID_CREDENTIALS.to_string())),
    };

    if user.is_blocked {
        return Err(ApiError::Forbidden("User is blocked".to_string()));
    }

    let token = create_token(&state.jwt_secret, user.id, user.role, state.token_ttl)?;

    info!("{} ({}) logged in", user.username, user.id);

    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        token: Some(token),
        user: User::from(user),
    }))
}

pub async fn profile(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> ApiResult<Json<AuthResponse>> {
    authorize(Operation::ViewProfile, &principal)?;

    let user = state
        .db(move |db| db.get_user_by_id(principal.id))
        .await?
        .ok_or_else(|| ApiError::not_found("User"))?;

    Ok(Json(AuthResponse {
        message: "User profile fetched successfully".to_string(),
        token: None,
        user: User::from(user),
    }))
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Argon2id PHC string with a fresh random salt.
pub fn hash_password(password: &str) -> ApiResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| ApiError::Internal(anyhow::anyhow!("Password hashing failed: {}", e)))
}

pub fn verify_password(password: &str, stored: &str) -> bool {
    match PasswordHash::new(stored) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

fn dummy_hash() -> &'static str {
    static DUMMY: OnceLock<String> = OnceLock::new();
    DUMMY.get_or_init(|| hash_password("not-a-real-password").unwrap_or_default())
}

pub fn create_token(
    secret: &str,
    user_id: Uuid,
    role: Role,
    ttl: chrono::Duration,
) -> ApiResult<String> {
    let now = chrono::Utc::now();
    let claims = Claims {
        sub: user_id,
        role,
        iat: now.timestamp() as usize,
        exp: (now + ttl).timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| ApiError::Internal(e.into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::decode_token;

    #[test]
    fn password_hash_round_trip() {
        let hash = hash_password("hunter22").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("hunter22", &hash));
        assert!(!verify_password("hunter23", &hash));
        assert!(!verify_password("hunter22", "not a phc string"));
    }

    #[test]
    fn each_hash_gets_a_fresh_salt() {
        let first = hash_password("hunter22").unwrap();
        let second = hash_password("hunter22").unwrap();
        assert_ne!(first, second);
        assert!(verify_password("hunter22", &second));
    }

    #[test]
    fn token_carries_subject_and_role() {
        let id = Uuid::new_v4();
        let token = create_token("secret", id, Role::Host, chrono::Duration::hours(1)).unwrap();
        let claims = decode_token(&token, "secret").unwrap();
        assert_eq!(claims.sub, id);
        assert_eq!(claims.role, Role::Host);
        assert!(decode_token(&token, "other-secret").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let token =
            create_token("secret", Uuid::new_v4(), Role::User, chrono::Duration::hours(-2)).unwrap();
        assert!(matches!(decode_token(&token, "secret"), Err(ApiError::Auth(_))));
    }

    #[test]
    fn emails_are_normalized() {
        assert_eq!(normalize_email("  Fan@Example.COM "), "fan@example.com");
    }
}
