use axum::{
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

use stockflow_core::UserId;

use crate::app::errors;
use crate::context::UserContext;

pub const USER_ID_HEADER: &str = "x-user-id";

/// Attach a [`UserContext`] to every request. A malformed header is a 400.
pub async fn user_context_middleware(
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user_id = match extract_user_id(req.headers()) {
        Ok(id) => id,
        Err(message) => {
            let path = req.uri().path().to_string();
            return errors::json_error(StatusCode::BAD_REQUEST, message, &path).into_response();
        }
    };

    req.extensions_mut().insert(UserContext::new(user_id));
    next.run(req).await
}

fn extract_user_id(headers: &HeaderMap) -> Result<Option<UserId>, String> {
    let Some(value) = headers.get(USER_ID_HEADER) else {
        return Ok(None);
    };
    let value = value
        .to_str()
        .map_err(|_| "X-User-Id must be a UUID".to_string())?
        .trim();
    if value.is_empty() {
        return Ok(None);
    }
    value
        .parse::<UserId>()
        .map(Some)
        .map_err(|e| format!("X-User-Id must be a UUID ({e})"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn missing_or_blank_header_is_anonymous() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_user_id(&headers).unwrap(), None);

        headers.insert(USER_ID_HEADER, HeaderValue::from_static("  "));
        assert_eq!(extract_user_id(&headers).unwrap(), None);
    }

    #[test]
    fn uuid_header_becomes_the_user() {
        let id = UserId::new();
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_str(&id.to_string()).unwrap());
        assert_eq!(extract_user_id(&headers).unwrap(), Some(id));
    }

    #[test]
    fn garbage_header_is_rejected() {
        let mut headers = HeaderMap::new();
        headers.insert(USER_ID_HEADER, HeaderValue::from_static("alice"));
        assert!(extract_user_id(&headers).is_err());
    }
}
