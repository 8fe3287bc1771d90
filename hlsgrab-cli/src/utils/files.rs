use std::path::PathBuf;

use hlsgrab_engine::DownloadSource;

/// Output file used when none is given: the last path segment of the URL with
/// a `.ts` extension, in the current directory.
pub fn default_output(source: &DownloadSource) -> PathBuf {
    let stem = source
        .url()
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .map(|name| name.rsplit_once('.').map_or(name, |(stem, _)| stem))
        .map(sanitize)
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "output".to_string());
    PathBuf::from(format!("{stem}.ts"))
}

fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_alphanumeric() || matches!(c, '-' | '_') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_name_from_url() {
        let source = DownloadSource::parse("https://cdn.test/vod/episode-1.m3u8?t=1").unwrap();
        assert_eq!(default_output(&source), PathBuf::from("episode-1.ts"));

        let source = DownloadSource::parse("https://video.test/").unwrap();
        assert_eq!(default_output(&source), PathBuf::from("output.ts"));

        let source = DownloadSource::parse("https://video.test/watch").unwrap();
        assert_eq!(default_output(&source), PathBuf::from("watch.ts"));
    }
}
