//! Bearer-token extraction.
//!
//! HTTP handlers read the `Authorization` header; WebSocket upgrades may
//! carry the token in a `?token=` query parameter instead, with equivalent
//! trust. Both paths funnel through [`bearer_token`].

/// Extract a bearer token from an `Authorization` header value and/or a
/// raw query string, preferring the header.
#[must_use]
pub fn bearer_token(auth_header: Option<&str>, query: Option<&str>) -> Option<String> {
    if let Some(header) = auth_header {
        let mut parts = header.splitn(2, ' ');
        if let (Some(scheme), Some(token)) = (parts.next(), parts.next()) {
            if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let query = query?;
    for pair in query.split('&') {
        if let Some(value) = pair.strip_prefix("token=") {
            if !value.is_empty() {
                return Some(value.to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_wins() {
        let token = bearer_token(Some("Bearer abc"), Some("token=xyz"));
        assert_eq!(token.as_deref(), Some("abc"));
    }

    #[test]
    fn scheme_is_case_insensitive() {
        assert_eq!(bearer_token(Some("bearer abc"), None).as_deref(), Some("abc"));
    }

    #[test]
    fn query_fallback() {
        let token = bearer_token(None, Some("foo=1&token=xyz&bar=2"));
        assert_eq!(token.as_deref(), Some("xyz"));
    }

    #[test]
    fn missing_everywhere() {
        assert!(bearer_token(None, Some("foo=1")).is_none());
        assert!(bearer_token(Some("Basic abc"), None).is_none());
        assert!(bearer_token(Some("Bearer"), None).is_none());
    }
}
