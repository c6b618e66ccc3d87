use bytes::Bytes;
use http::StatusCode;

/// A response synthesized by the gateway itself, as opposed to one relayed
/// from an upstream. Bodies are small JSON documents; internals never leak.
#[derive(Debug)]
pub struct GatewayError {
    pub status: StatusCode,
    pub body: Bytes,
}

fn detail(status: StatusCode, message: &str) -> GatewayError {
    GatewayError {
        status,
        body: Bytes::from(serde_json::json!({ "detail": message }).to_string()),
    }
}

impl GatewayError {
    pub fn unauthorized() -> Self {
        detail(StatusCode::UNAUTHORIZED, "Invalid or missing API key")
    }

    pub fn missing_model() -> Self {
        detail(StatusCode::BAD_REQUEST, "Request must include a model field")
    }

    pub fn no_candidates(model: Option<&str>) -> Self {
        let message = match model {
            Some(model) => format!("No providers available for model '{model}'"),
            None => "No providers available".to_string(),
        };
        detail(StatusCode::SERVICE_UNAVAILABLE, &message)
    }

    pub fn all_attempts_failed(failures: &[String]) -> Self {
        let message = if failures.is_empty() {
            "All providers failed".to_string()
        } else {
            failures.join("; ")
        };
        detail(StatusCode::BAD_GATEWAY, &message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exhaustion_joins_reasons() {
        let err = GatewayError::all_attempts_failed(&[
            "a: HTTP 503".to_string(),
            "b: timeout: deadline elapsed".to_string(),
        ]);
        assert_eq!(err.status, StatusCode::BAD_GATEWAY);
        let body = String::from_utf8(err.body.to_vec()).unwrap();
        assert!(body.contains("a: HTTP 503; b: timeout: deadline elapsed"));
    }

    #[test]
    fn empty_candidate_set_is_503() {
        let err = GatewayError::no_candidates(Some("gpt-4"));
        assert_eq!(err.status, StatusCode::SERVICE_UNAVAILABLE);
        let body = String::from_utf8(err.body.to_vec()).unwrap();
        assert!(body.contains("gpt-4"));
    }
}
