use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Bearer token claims. Token issuance lives outside this service; only
/// validation happens here, and the identity is used for attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub role: String,
    pub exp: i64,
}

#[derive(Clone)]
pub struct TokenVerifier {
    key: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, jsonwebtoken::errors::Error> {
        decode::<Claims>(token, &self.key, &Validation::default()).map(|data| data.claims)
    }
}

/// Extracts the authenticated identity from the Authorization header.
pub struct AuthUser(pub Claims);

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    TokenVerifier: FromRef<S>,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or_else(|| unauthorized("missing bearer token"))?;

        let verifier = TokenVerifier::from_ref(state);
        let claims = verifier
            .verify(token)
            .map_err(|_| unauthorized("invalid or expired token"))?;

        Ok(AuthUser(claims))
    }
}

fn unauthorized(reason: &str) -> Response {
    (
        StatusCode::UNAUTHORIZED,
        axum::Json(serde_json::json!({ "error": reason })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn issue(secret: &str, exp: i64) -> String {
        let claims = Claims {
            sub: Uuid::new_v4(),
            username: "alice".to_string(),
            role: "manager".to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn valid_token_yields_claims() {
        let token = issue("secret", Utc::now().timestamp() + 3600);
        let claims = TokenVerifier::new("secret").verify(&token).unwrap();
        assert_eq!(claims.username, "alice");
        assert_eq!(claims.role, "manager");
    }

    #[test]
    fn expired_token_is_rejected() {
        let token = issue("secret", Utc::now().timestamp() - 3600);
        assert!(TokenVerifier::new("secret").verify(&token).is_err());
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let token = issue("secret", Utc::now().timestamp() + 3600);
        assert!(TokenVerifier::new("other").verify(&token).is_err());
    }
}
