use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};
use uuid::Uuid;

use eventify_types::api::Claims;
use eventify_types::models::Role;

use crate::error::ApiError;
use crate::state::AppState;

/// The authenticated caller, resolved against the live user record.
#[derive(Debug, Clone)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

/// Extract and validate the JWT from the Authorization header, then load
/// the user it names. Blocked users are refused even with a valid token.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .ok_or_else(|| ApiError::Auth("Unauthorized, no token".to_string()))?;

    let claims = decode_token(token, &state.jwt_secret)?;

    let user = state
        .db(move |db| db.get_user_by_id(claims.sub))
        .await?
        .ok_or_else(|| ApiError::Auth("Invalid or expired token".to_string()))?;

    if user.is_blocked {
        return Err(ApiError::Forbidden("User is blocked".to_string()));
    }

    req.extensions_mut().insert(Principal {
        id: user.id,
        username: user.username,
        email: user.email,
        role: user.role,
    });
    Ok(next.run(req).await)
}

pub fn decode_token(token: &str, secret: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Auth("Invalid or expired token".to_string()))
}
