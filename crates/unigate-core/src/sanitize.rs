//! Header rewriting at both edges of the relay.
//!
//! Outbound, the client's credentials and connection-scoped headers must
//! never reach the upstream; exactly one auth header is injected, mirroring
//! the scheme the client used so OpenAI-, Anthropic-, and Gemini-style
//! upstreams all receive what they expect. Inbound, framing and encoding
//! headers are dropped since the relay neither re-chunks nor re-encodes.

use unigate_provider::{Headers, header_get};

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailers",
    "transfer-encoding",
    "upgrade",
    "content-length",
];

const CLIENT_AUTH: &[&str] = &["authorization", "x-api-key", "x-goog-api-key"];

fn is_hop_by_hop(name: &str) -> bool {
    HOP_BY_HOP.iter().any(|h| name.eq_ignore_ascii_case(h))
}

fn is_client_auth(name: &str) -> bool {
    CLIENT_AUTH.iter().any(|h| name.eq_ignore_ascii_case(h))
}

/// The auth header to inject upstream, mirroring the inbound scheme.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeader {
    pub name: &'static str,
    pub value_prefix: String,
}

pub fn choose_auth_header(inbound: &Headers) -> AuthHeader {
    // Explicit API-key headers win; otherwise mirror the authorization
    // scheme; bearer is the default for standard API keys.
    for name in ["x-goog-api-key", "x-api-key"] {
        if header_get(inbound, name).is_some() {
            return AuthHeader {
                name: if name == "x-goog-api-key" {
                    "x-goog-api-key"
                } else {
                    "x-api-key"
                },
                value_prefix: String::new(),
            };
        }
    }
    if let Some(authorization) = header_get(inbound, "authorization") {
        let prefix = match authorization.split_once(' ') {
            Some((scheme, _)) => format!("{scheme} "),
            None => String::new(),
        };
        return AuthHeader {
            name: "Authorization",
            value_prefix: prefix,
        };
    }
    AuthHeader {
        name: "Authorization",
        value_prefix: "Bearer ".to_string(),
    }
}

/// Client request headers, ready for the upstream: hop-by-hop, `host`, and
/// every client auth header stripped, then the provider's key injected.
pub fn outbound_headers(inbound: &Headers, api_key: &str) -> Headers {
    let auth = choose_auth_header(inbound);
    let mut out: Headers = inbound
        .iter()
        .filter(|(name, _)| {
            !is_hop_by_hop(name) && !is_client_auth(name) && !name.eq_ignore_ascii_case("host")
        })
        .cloned()
        .collect();
    out.push((
        auth.name.to_string(),
        format!("{}{}", auth.value_prefix, api_key).trim().to_string(),
    ));
    out
}

/// Upstream response headers, ready for the client: hop-by-hop and
/// `content-encoding` dropped, everything else (notably `content-type`)
/// preserved.
pub fn response_headers(upstream: &Headers) -> Headers {
    upstream
        .iter()
        .filter(|(name, _)| !is_hop_by_hop(name) && !name.eq_ignore_ascii_case("content-encoding"))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use unigate_provider::header_get;

    fn inbound_with(auth: &[(&str, &str)]) -> Headers {
        let mut headers: Headers = vec![
            ("Host".into(), "gateway.local".into()),
            ("Content-Type".into(), "application/json".into()),
            ("Accept".into(), "text/event-stream".into()),
            ("Connection".into(), "keep-alive".into()),
            ("Content-Length".into(), "42".into()),
        ];
        for (name, value) in auth {
            headers.push(((*name).into(), (*value).into()));
        }
        headers
    }

    #[test]
    fn outbound_strips_client_auth_and_hop_by_hop() {
        let headers = outbound_headers(
            &inbound_with(&[("Authorization", "Bearer client-secret")]),
            "upstream-key",
        );
        assert!(header_get(&headers, "host").is_none());
        assert!(header_get(&headers, "connection").is_none());
        assert!(header_get(&headers, "content-length").is_none());
        assert!(header_get(&headers, "x-api-key").is_none());
        assert_eq!(header_get(&headers, "content-type"), Some("application/json"));
        assert_eq!(
            header_get(&headers, "authorization"),
            Some("Bearer upstream-key")
        );
        // Exactly one auth header survives.
        let auth_count = headers
            .iter()
            .filter(|(name, _)| name.eq_ignore_ascii_case("authorization"))
            .count();
        assert_eq!(auth_count, 1);
    }

    #[test]
    fn api_key_header_scheme_is_mirrored() {
        let headers = outbound_headers(
            &inbound_with(&[("x-api-key", "client-secret")]),
            "upstream-key",
        );
        assert_eq!(header_get(&headers, "x-api-key"), Some("upstream-key"));
        assert!(header_get(&headers, "authorization").is_none());

        let headers = outbound_headers(
            &inbound_with(&[("x-goog-api-key", "client-secret")]),
            "upstream-key",
        );
        assert_eq!(header_get(&headers, "x-goog-api-key"), Some("upstream-key"));
        assert!(header_get(&headers, "authorization").is_none());
    }

    #[test]
    fn non_bearer_scheme_is_preserved() {
        let headers = outbound_headers(
            &inbound_with(&[("Authorization", "Token client-secret")]),
            "upstream-key",
        );
        assert_eq!(
            header_get(&headers, "authorization"),
            Some("Token upstream-key")
        );
    }

    #[test]
    fn missing_client_auth_defaults_to_bearer() {
        let headers = outbound_headers(&inbound_with(&[]), "upstream-key");
        assert_eq!(
            header_get(&headers, "authorization"),
            Some("Bearer upstream-key")
        );
    }

    #[test]
    fn response_filter_drops_framing_and_encoding() {
        let upstream: Headers = vec![
            ("Content-Type".into(), "text/event-stream".into()),
            ("Transfer-Encoding".into(), "chunked".into()),
            ("Content-Encoding".into(), "gzip".into()),
            ("Connection".into(), "close".into()),
            ("x-request-id".into(), "abc".into()),
        ];
        let headers = response_headers(&upstream);
        assert_eq!(
            header_get(&headers, "content-type"),
            Some("text/event-stream")
        );
        assert_eq!(header_get(&headers, "x-request-id"), Some("abc"));
        assert!(header_get(&headers, "transfer-encoding").is_none());
        assert!(header_get(&headers, "content-encoding").is_none());
        assert!(header_get(&headers, "connection").is_none());
    }
}
