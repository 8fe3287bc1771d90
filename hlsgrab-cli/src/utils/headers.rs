use tracing::{info, warn};

/// Parse a header string in format "Name: Value".
///
/// Returns `None` (and logs why) for malformed input.
pub fn parse_header(header_str: &str) -> Option<(String, String)> {
    // The first colon separates name and value
    let Some((name, value)) = header_str.split_once(':') else {
        warn!(
            "Invalid header format: '{}'. Expected 'Name: Value'",
            header_str
        );
        return None;
    };

    let name = name.trim();
    let value = value.trim();
    let valid_name = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid_name {
        warn!("Invalid header name: '{}'", name);
        return None;
    }
    if value.bytes().any(|b| b.is_ascii_control() && b != b'\t') {
        warn!("Invalid header value: '{}'", value);
        return None;
    }

    info!("Adding header: {}: {}", name, value);
    Some((name.to_string(), value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_and_value() {
        assert_eq!(
            parse_header("Referer: https://video.test/watch?v=1"),
            Some((
                "Referer".to_string(),
                "https://video.test/watch?v=1".to_string()
            ))
        );
    }

    #[test]
    fn rejects_malformed_headers() {
        assert_eq!(parse_header("no colon here"), None);
        assert_eq!(parse_header("bad name: x"), None);
        assert_eq!(parse_header(": empty"), None);
    }
}
