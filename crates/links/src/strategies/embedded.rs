use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;
use tracing::debug;

use crate::error::ExtractorError;

/// Assignment of the player response object in any of its usual spellings.
pub(crate) static PLAYER_RESPONSE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?:\bvar\s+ytInitialPlayerResponse|window\[\s*["']ytInitialPlayerResponse["']\s*\]|\bytInitialPlayerResponse)\s*=\s*\{"#,
    )
    .unwrap()
});

pub(crate) fn scan(page: &str) -> Result<Vec<String>, ExtractorError> {
    let mut found = Vec::new();
    let mut last_error = None;

    for m in PLAYER_RESPONSE_REGEX.find_iter(page) {
        // The match ends right after the opening brace.
        let start = m.end() - 1;
        let Some(object) = balanced_object(&page[start..]) else {
            last_error = Some(ExtractorError::MalformedState(
                "unterminated player response object".to_string(),
            ));
            continue;
        };

        match serde_json::from_str::<Value>(object) {
            Ok(state) => {
                let before = found.len();
                collect_manifest_urls(&state, &mut found);
                debug!(urls = found.len() - before, "Parsed embedded player response");
            }
            Err(e) => last_error = Some(ExtractorError::MalformedState(e.to_string())),
        }
    }

    match last_error {
        Some(err) if found.is_empty() => Err(err),
        _ => Ok(found),
    }
}

/// Slice of `text` holding the `{...}` object it starts with, honouring
/// string literals and escapes.
fn balanced_object(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (idx, byte) in text.bytes().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..=idx]);
                }
            }
            _ => {}
        }
    }
    None
}

fn collect_manifest_urls(state: &Value, out: &mut Vec<String>) {
    let Some(streaming) = state.get("streamingData") else {
        return;
    };

    if let Some(url) = streaming.get("hlsManifestUrl").and_then(Value::as_str) {
        out.push(url.to_string());
    }

    for list in ["formats", "adaptiveFormats"] {
        let urls = streaming
            .get(list)
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|format| format.get("url").and_then(Value::as_str))
            .filter(|url| looks_like_manifest(url));
        out.extend(urls.map(str::to_string));
    }
}

fn looks_like_manifest(url: &str) -> bool {
    url.contains(".m3u8") || url.contains("/manifest/hls")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_hls_manifest_url() {
        let page = r#"<script>var ytInitialPlayerResponse = {"videoDetails":{"title":"a } b"},"streamingData":{"hlsManifestUrl":"https://manifest.test/api/manifest/hls_variant/id/1/file/index.m3u8","formats":[{"url":"https://media.test/v.mp4"}]}};var meta = {};</script>"#;
        let urls = scan(page).unwrap();
        assert_eq!(
            urls,
            vec!["https://manifest.test/api/manifest/hls_variant/id/1/file/index.m3u8"]
        );
    }

    #[test]
    fn accepts_window_assignment_and_adaptive_formats() {
        let page = r#"window["ytInitialPlayerResponse"] = {"streamingData":{"adaptiveFormats":[{"url":"https://media.test/a.m3u8?sig=\"x\""},{"url":"https://media.test/b.webm"}]}};"#;
        let urls = scan(page).unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls[0].starts_with("https://media.test/a.m3u8"));
    }

    #[test]
    fn malformed_json_is_an_error() {
        let page = "ytInitialPlayerResponse = {\"streamingData\": {hlsManifestUrl: nope}};";
        assert!(matches!(scan(page), Err(ExtractorError::MalformedState(_))));
    }

    #[test]
    fn absent_state_is_empty() {
        assert_eq!(scan("<html><body>nothing</body></html>").unwrap(), Vec::<String>::new());
    }

    #[test]
    fn braces_inside_strings_are_ignored() {
        assert_eq!(balanced_object(r#"{"a":"}{\"}"} tail"#), Some(r#"{"a":"}{\"}"}"#));
        assert_eq!(balanced_object("{\"a\": {"), None);
    }
}
