use std::sync::LazyLock;

use regex::Regex;

/// Any absolute http(s) URL ending in `.m3u8`, including the JSON-escaped
/// `https:\/\/...` form.
pub(crate) static M3U8_URL_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"https?:(?:\\?/){2}[^\s"'<>()]+?\.m3u8(?:\?[^\s"'<>()]*)?"#).unwrap()
});

pub(crate) fn scan(page: &str) -> Vec<String> {
    M3U8_URL_REGEX
        .find_iter(page)
        .map(|m| m.as_str().to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_plain_and_escaped_urls() {
        let page = r#"var cfg = {"u":"https:\/\/cdn.test\/live\/a.m3u8?x=1&y=2"}; load('http://cdn.test/b.m3u8')"#;
        let found = scan(page);
        assert_eq!(
            found,
            vec![
                r"https:\/\/cdn.test\/live\/a.m3u8?x=1&y=2",
                "http://cdn.test/b.m3u8",
            ]
        );
    }
}
