use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

// Crate-wide error taxonomy. Every handler funnels failures through this
// type so the wire format stays uniform.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0}")]
    Configuration(String),

    #[error("payment gateway error: {message}")]
    Gateway { status: u16, message: String },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ApiError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            // gateway-side client errors pass through, everything else is a bad upstream
            Self::Gateway { status, .. } => StatusCode::from_u16(*status)
                .ok()
                .filter(|code| code.is_client_error())
                .unwrap_or(StatusCode::BAD_GATEWAY),
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        let status = err.status().map(|code| code.as_u16()).unwrap_or(502);
        Self::Gateway {
            status,
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status_code();
        // database details stay in the logs, not on the wire
        let message = match &self {
            ApiError::Database(err) => {
                tracing::error!("database error: {err}");
                "internal server error".to_string()
            }
            other => other.to_string(),
        };
        if status.is_server_error() {
            tracing::error!("request failed with {status}: {message}");
        }
        let body = Json(json!({
            "error": {
                "message": message,
                "status": status.as_u16(),
            }
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_client_errors_pass_through() {
        let err = ApiError::Gateway {
            status: 422,
            message: "invalid preference".into(),
        };
        assert_eq!(err.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn gateway_server_errors_become_bad_gateway() {
        let err = ApiError::Gateway {
            status: 500,
            message: "upstream exploded".into(),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn not_found_maps_to_404() {
        assert_eq!(ApiError::NotFound("order").status_code(), StatusCode::NOT_FOUND);
    }
}
