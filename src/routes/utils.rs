use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::ApiError;

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    sub: Uuid, // user_id
    exp: i64,  // expiration timestamp
    iat: i64,  // issued at timestamp
}

// Token issuance (registration/login) belongs to the identity service; this
// backend only verifies the bearer tokens it is handed.
pub struct AuthService {
    jwt_secret: String,
}

impl AuthService {
    pub fn new(jwt_secret: String) -> Self {
        Self { jwt_secret }
    }

    pub fn verify_token(&self, token: &str) -> Result<Uuid, ApiError> {
        let mut validation = jsonwebtoken::Validation::default();

        validation.leeway = 10;
        validation.validate_exp = true;
        validation.algorithms = vec![jsonwebtoken::Algorithm::HS256];

        let token_data = jsonwebtoken::decode::<Claims>(
            token,
            &jsonwebtoken::DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &validation,
        )
        .map_err(|err| {
            tracing::error!("Error decoding token: {:?}", err);
            ApiError::Unauthorized("Invalid token")
        })?;

        Ok(token_data.claims.sub)
    }
}

#[inline]
pub fn validate_auth_token(headers: HeaderMap, service: &AuthService) -> Result<Uuid, ApiError> {
    let jwt_header_token = match headers.get("Authorization").map(|token| token.to_str()) {
        Some(Ok(token)) => token,
        _ => {
            return Err(ApiError::Unauthorized("Invalid token"));
        }
    };
    service.verify_token(jwt_header_token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn issue(secret: &str, sub: Uuid, exp_offset: i64) -> String {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub,
            exp: now + exp_offset,
            iat: now,
        };
        jsonwebtoken::encode(
            &jsonwebtoken::Header::default(),
            &claims,
            &jsonwebtoken::EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn accepts_a_valid_token() {
        let service = AuthService::new("secret".into());
        let user = Uuid::new_v4();
        let token = issue("secret", user, 900);
        assert_eq!(service.verify_token(&token).unwrap(), user);
    }

    #[test]
    fn rejects_expired_and_forged_tokens() {
        let service = AuthService::new("secret".into());
        let user = Uuid::new_v4();
        assert!(service.verify_token(&issue("secret", user, -3600)).is_err());
        assert!(service.verify_token(&issue("other-secret", user, 900)).is_err());
    }

    #[test]
    fn missing_header_is_unauthorized() {
        let service = AuthService::new("secret".into());
        let result = validate_auth_token(HeaderMap::new(), &service);
        assert!(matches!(result, Err(ApiError::Unauthorized(_))));
    }
}
