//! Standard Bearer token header handling.

use http::header::{HeaderValue, AUTHORIZATION};
use reqwest::Request;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{http_error, Error, HttpErrorKind};

/// Scheme prefix of the `Authorization` header value.
pub const BEARER_PREFIX: &str = "Bearer ";

/// Build an `Authorization` header value for `token`.
///
/// A token that already carries the `Bearer ` prefix (in any letter case) is
/// used as is, so callers that stored the full header value never end up with
/// `Bearer Bearer ...`.
pub fn bearer_value(token: &str) -> String {
    if has_bearer_prefix(token) {
        token.to_string()
    } else {
        format!("{BEARER_PREFIX}{token}")
    }
}

/// Strip a leading `Bearer ` scheme from a header value, if present.
pub fn strip_bearer(value: &str) -> &str {
    if has_bearer_prefix(value) {
        value[BEARER_PREFIX.len()..].trim()
    } else {
        value.trim()
    }
}

fn has_bearer_prefix(value: &str) -> bool {
    value
        .get(..BEARER_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(BEARER_PREFIX))
}

/// Set `Authorization: Bearer <token>` on an outgoing request, replacing any
/// value the caller supplied.
pub fn apply_bearer(request: &mut Request, token: &SecretString) -> Result<(), Error> {
    let mut value = HeaderValue::from_str(&bearer_value(token.expose_secret())).map_err(|_| {
        http_error(
            HttpErrorKind::BuilderFailed,
            "Credential contains characters not allowed in a header",
        )
    })?;
    value.set_sensitive(true);
    request.headers_mut().insert(AUTHORIZATION, value);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> Request {
        Request::new(
            reqwest::Method::GET,
            "http://localhost/rooms".parse().unwrap(),
        )
    }

    #[test]
    fn test_bearer_value_adds_prefix() {
        assert_eq!(bearer_value("abc"), "Bearer abc");
    }

    #[test]
    fn test_bearer_value_does_not_double_prefix() {
        assert_eq!(bearer_value("Bearer abc"), "Bearer abc");
        assert_eq!(bearer_value("bearer abc"), "bearer abc");
    }

    #[test]
    fn test_strip_bearer() {
        assert_eq!(strip_bearer("Bearer xyz"), "xyz");
        assert_eq!(strip_bearer("BEARER xyz "), "xyz");
        assert_eq!(strip_bearer("xyz"), "xyz");
        assert_eq!(strip_bearer("Bear"), "Bear");
    }

    #[test]
    fn test_apply_bearer_sets_sensitive_header() {
        let mut req = request();
        apply_bearer(&mut req, &SecretString::new("abc".to_string())).unwrap();

        let value = req.headers().get(AUTHORIZATION).unwrap();
        assert_eq!(value, "Bearer abc");
        assert!(value.is_sensitive());
    }

    #[test]
    fn test_apply_bearer_replaces_existing_header() {
        let mut req = request();
        req.headers_mut()
            .insert(AUTHORIZATION, HeaderValue::from_static("Bearer stale"));
        apply_bearer(&mut req, &SecretString::new("fresh".to_string())).unwrap();
        assert_eq!(req.headers().get(AUTHORIZATION).unwrap(), "Bearer fresh");
    }

    #[test]
    fn test_apply_bearer_rejects_invalid_header_characters() {
        let mut req = request();
        let result = apply_bearer(&mut req, &SecretString::new("bad\ntoken".to_string()));
        assert!(result.is_err());
    }
}
