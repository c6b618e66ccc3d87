//! Inbound client authentication against the single shared gateway token.
//! Orthogonal to provider selection; runs before dispatch.

use http::HeaderMap;

/// Pulls the client's credential out of `x-api-key` or a bearer
/// `Authorization` header.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }

    let authorization = header_value(headers, "authorization")?;
    let authorization = authorization.trim();
    let (scheme, token) = authorization.split_once(' ')?;
    if scheme.eq_ignore_ascii_case("bearer") && !token.trim().is_empty() {
        return Some(token.trim().to_string());
    }
    None
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn headers(pairs: &[(&str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(
                http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    #[test]
    fn x_api_key_is_preferred() {
        let map = headers(&[("x-api-key", "alpha"), ("authorization", "Bearer beta")]);
        assert_eq!(extract_api_key(&map), Some("alpha".to_string()));
    }

    #[test]
    fn bearer_token_is_extracted() {
        let map = headers(&[("authorization", "Bearer secret")]);
        assert_eq!(extract_api_key(&map), Some("secret".to_string()));
        let map = headers(&[("authorization", "bearer secret")]);
        assert_eq!(extract_api_key(&map), Some("secret".to_string()));
    }

    #[test]
    fn non_bearer_schemes_do_not_authenticate() {
        let map = headers(&[("authorization", "Basic dXNlcjpwdw==")]);
        assert_eq!(extract_api_key(&map), None);
        assert_eq!(extract_api_key(&HeaderMap::new()), None);
    }
}
