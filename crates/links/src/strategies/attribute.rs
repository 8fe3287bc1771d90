use std::sync::LazyLock;

use regex::Regex;

/// Markup attributes (and `file:` player options) whose value is an `.m3u8` URL.
pub(crate) static ATTRIBUTE_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b(?:data-video-src|data-src|data-url|data-hls|src|href|content|file)\s*[=:]\s*["']([^"'<>\s]+?\.m3u8(?:\?[^"'<>\s]*)?)["']"#,
    )
    .unwrap()
});

pub(crate) fn scan(page: &str) -> Vec<String> {
    ATTRIBUTE_REGEX
        .captures_iter(page)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_values_of_known_attributes() {
        let page = r#"
            <video data-src="https://cdn.test/a/index.m3u8?token=1&amp;t=2"></video>
            <source src='/b/index.m3u8' type="application/x-mpegURL">
            <meta property="og:video" content="https://cdn.test/c.m3u8">
            <a href="/not-a-playlist.mp4">x</a>
            <script>player.setup({ file: "https://cdn.test/d.m3u8" });</script>
        "#;
        let found = scan(page);
        assert_eq!(
            found,
            vec![
                "https://cdn.test/a/index.m3u8?token=1&amp;t=2",
                "/b/index.m3u8",
                "https://cdn.test/c.m3u8",
                "https://cdn.test/d.m3u8",
            ]
        );
    }

    #[test]
    fn ignores_unrelated_attributes() {
        assert!(scan(r#"<div title="x.m3u8" alt="y.m3u8"></div>"#).is_empty());
    }
}
