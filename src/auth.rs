use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{StatusCode, header::AUTHORIZATION, request::Parts},
};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::{AppState, error::AuthError, model::UserId};

/// Turns a bearer token into the user it was issued to.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError>;
}

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    exp: Option<u64>,
}

/// HS256 tokens carrying a `user_id` claim. `exp` is honoured when present.
pub struct JwtAuthenticator {
    decoding_key: DecodingKey,
    encoding_key: EncodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.required_spec_claims.clear();

        Self {
            decoding_key: DecodingKey::from_secret(secret),
            encoding_key: EncodingKey::from_secret(secret),
            validation,
        }
    }

    pub fn issue_token(&self, user_id: UserId, ttl_secs: u64) -> Result<String, jsonwebtoken::errors::Error> {
        let claims = Claims {
            user_id: user_id.0,
            exp: Some(jsonwebtoken::get_current_timestamp() + ttl_secs),
        };
        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
    }
}

impl Authenticator for JwtAuthenticator {
    fn authenticate(&self, token: &str) -> Result<UserId, AuthError> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| UserId(data.claims.user_id))
            .map_err(|e| AuthError::Unauthenticated(e.to_string()))
    }
}

/// The authenticated user making an HTTP request.
/// Accepts `Authorization: Bearer <token>` or a bare token in the header.
#[derive(Debug, Clone, Copy)]
pub struct Caller(pub UserId);

impl<S> FromRequestParts<S> for Caller
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = StatusCode;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or(StatusCode::UNAUTHORIZED)?;
        let token = header.strip_prefix("Bearer ").unwrap_or(header);

        let authenticator: Arc<dyn Authenticator> = AppState::from_ref(state).authenticator;
        match authenticator.authenticate(token) {
            Ok(user_id) => Ok(Caller(user_id)),
            Err(e) => {
                tracing::debug!(error = %e, "rejected http caller");
                Err(StatusCode::UNAUTHORIZED)
            }
        }
    }
}
