//! Header lists travel through the gateway as ordered name/value pairs so
//! duplicates and casing survive the round trip to the upstream.

pub type Headers = Vec<(String, String)>;

pub fn header_get<'a>(headers: &'a Headers, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Replaces the first matching header in place, or appends when absent.
pub fn header_set(headers: &mut Headers, name: impl Into<String>, value: impl Into<String>) {
    let name = name.into();
    let value = value.into();
    if let Some((_, existing)) = headers
        .iter_mut()
        .find(|(key, _)| key.eq_ignore_ascii_case(&name))
    {
        *existing = value;
        return;
    }
    headers.push((name, value));
}

/// Removes every occurrence of `name`, returning the first removed value.
pub fn header_remove(headers: &mut Headers, name: &str) -> Option<String> {
    let mut removed = None;
    headers.retain_mut(|(key, value)| {
        if key.eq_ignore_ascii_case(name) {
            if removed.is_none() {
                removed = Some(std::mem::take(value));
            }
            false
        } else {
            true
        }
    });
    removed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_case_insensitively() {
        let mut headers: Headers = vec![("Content-Type".into(), "text/plain".into())];
        header_set(&mut headers, "content-type", "application/json");
        assert_eq!(headers.len(), 1);
        assert_eq!(header_get(&headers, "CONTENT-TYPE"), Some("application/json"));
    }

    #[test]
    fn remove_drops_all_occurrences() {
        let mut headers: Headers = vec![
            ("x-tag".into(), "one".into()),
            ("X-Tag".into(), "two".into()),
            ("accept".into(), "*/*".into()),
        ];
        assert_eq!(header_remove(&mut headers, "x-tag"), Some("one".into()));
        assert_eq!(headers.len(), 1);
        assert_eq!(header_remove(&mut headers, "x-tag"), None);
    }
}
