//! Joins a provider base URL with the inbound request path.
//!
//! Providers are often configured with a version suffix (`.../v1`, `.../v3`)
//! while clients send paths that carry their own version prefix. A duplicate
//! boundary segment collapses; two *different* version markers resolve in
//! favour of the base, which is how a provider pinned to a non-default API
//! version is honoured transparently. Any other overlap concatenates as-is.

pub fn join_upstream_url(base_url: &str, path: &str) -> String {
    if base_url.is_empty() {
        return path.to_string();
    }
    if path.is_empty() {
        return base_url.to_string();
    }

    let (without_fragment, fragment) = match base_url.split_once('#') {
        Some((head, tail)) => (head, Some(tail)),
        None => (base_url, None),
    };
    let (without_query, query) = match without_fragment.split_once('?') {
        Some((head, tail)) => (head, Some(tail)),
        None => (without_fragment, None),
    };
    let (prefix, base_path) = split_authority(without_query);

    let base_segments: Vec<&str> = base_path.split('/').filter(|s| !s.is_empty()).collect();
    let path_segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();

    let mut base_path = base_path.to_string();
    let mut path_part = path.to_string();
    if let (Some(&base_last), Some(&path_first)) = (base_segments.last(), path_segments.first()) {
        if base_last == path_first {
            // Exact duplicate boundary segment: drop it from the base.
            base_path = rebuild_path(&base_segments[..base_segments.len() - 1]);
        } else if is_version_segment(base_last) && is_version_segment(path_first) {
            // Conflicting version markers: the base's version wins.
            path_part = rebuild_path(&path_segments[1..]);
        }
    }

    let joined_path = match (base_path.ends_with('/'), path_part.starts_with('/')) {
        (true, true) => format!("{base_path}{}", &path_part[1..]),
        (false, false) => format!("{base_path}/{path_part}"),
        _ => format!("{base_path}{path_part}"),
    };

    let mut url = format!("{prefix}{joined_path}");
    if let Some(query) = query {
        url.push('?');
        url.push_str(query);
    }
    if let Some(fragment) = fragment {
        url.push('#');
        url.push_str(fragment);
    }
    url
}

/// Splits `scheme://authority` off the front, leaving the path.
fn split_authority(url: &str) -> (&str, &str) {
    let Some(scheme_end) = url.find("://") else {
        return ("", url);
    };
    let after_scheme = scheme_end + 3;
    match url[after_scheme..].find('/') {
        Some(path_start) => url.split_at(after_scheme + path_start),
        None => (url, ""),
    }
}

fn rebuild_path(segments: &[&str]) -> String {
    if segments.is_empty() {
        String::new()
    } else {
        format!("/{}", segments.join("/"))
    }
}

/// Matches `v<digits>` with an optional `beta<digits>` suffix, case
/// insensitively (`v1`, `v1beta`, `V2beta3`).
fn is_version_segment(segment: &str) -> bool {
    let bytes = segment.as_bytes();
    if bytes.first().map(|b| b.to_ascii_lowercase()) != Some(b'v') {
        return false;
    }
    let rest = &bytes[1..];
    let digits = rest.iter().take_while(|b| b.is_ascii_digit()).count();
    if digits == 0 {
        return false;
    }
    let tail = &rest[digits..];
    if tail.is_empty() {
        return true;
    }
    let Some(beta_digits) = tail
        .len()
        .checked_sub(4)
        .filter(|_| tail[..4].eq_ignore_ascii_case(b"beta"))
        .map(|_| &tail[4..])
    else {
        return false;
    };
    beta_digits.iter().all(|b| b.is_ascii_digit())
}
