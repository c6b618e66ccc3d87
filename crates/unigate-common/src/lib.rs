//! Small shared pieces: request ids and the boolean-literal coercion used by
//! both config parsing and streaming-intent detection.

/// Generates a sortable per-request trace id.
pub fn new_trace_id() -> String {
    uuid::Uuid::now_v7().to_string()
}

/// Parses the recognised truthy/falsy literals (`1|true|yes|on`,
/// `0|false|no|off`, case-insensitive, surrounding whitespace ignored).
/// Returns `None` for anything else.
pub fn parse_bool_literal(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::parse_bool_literal;

    #[test]
    fn bool_literals_parse() {
        for truthy in ["1", "true", "YES", " on "] {
            assert_eq!(parse_bool_literal(truthy), Some(true), "{truthy}");
        }
        for falsy in ["0", "false", "No", "off"] {
            assert_eq!(parse_bool_literal(falsy), Some(false), "{falsy}");
        }
        assert_eq!(parse_bool_literal("maybe"), None);
        assert_eq!(parse_bool_literal(""), None);
    }
}
