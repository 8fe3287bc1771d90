use std::path::PathBuf;

use clap::{ArgAction, Parser, ValueEnum};
use hlsgrab_engine::ProxyType;
use hlsgrab_engine::hls::{GapPolicy, MergeMode};
use hlsgrab_links::ExtractionMethod;

/// How to interpret the input URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SourceKind {
    /// `.m3u8`/`.m3u` URLs are manifests, anything else is a page
    Auto,
    Manifest,
    Page,
}

/// Define CLI arguments
#[derive(Parser)]
#[command(
    version,
    about = "HLS video-on-demand downloader",
    long_about = "Downloads an HLS (m3u8) media playlist into a single file.\n\
                  \n\
                  The input is either the playlist URL itself or the URL of a web page that\n\
                  embeds one; playlist links are then extracted from the page content.\n\
                  AES-128 encrypted streams are decrypted, and the output can optionally be\n\
                  remuxed through ffmpeg."
)]
pub struct CliArgs {
    /// Playlist or page URL
    #[arg(required = true, help = "URL of an HLS media playlist or of a page embedding one")]
    pub input: String,

    /// Output file
    #[arg(
        short,
        long,
        help = "Output file (default: derived from the URL, e.g. ./index.ts)"
    )]
    pub output: Option<PathBuf>,

    #[arg(
        long,
        value_enum,
        default_value_t = SourceKind::Auto,
        help = "Treat the input as a manifest or a page instead of detecting it"
    )]
    pub source: SourceKind,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable detailed debug logging")]
    pub verbose: bool,

    /// Show a progress bar
    #[arg(
        short = 'P',
        long = "progress",
        default_value = "false",
        help = "Show a progress bar while downloading"
    )]
    pub show_progress: bool,

    /// Number of concurrent segment downloads
    #[arg(
        short = 'c',
        long,
        default_value = "3",
        help = "Maximum number of concurrent segment downloads"
    )]
    pub concurrency: usize,

    /// Segment retry attempts
    #[arg(
        long,
        default_value = "3",
        help = "Number of retry attempts for failed segment downloads"
    )]
    pub retries: u32,

    /// Segment timeout in seconds
    #[arg(
        long,
        default_value = "20",
        help = "Timeout for individual segment downloads in seconds"
    )]
    pub segment_timeout: u64,

    #[arg(
        long,
        value_enum,
        default_value_t = GapPolicy::Abort,
        help = "What to do with a segment that keeps failing: abort the download or skip it"
    )]
    pub gap_policy: GapPolicy,

    #[arg(
        long,
        value_enum,
        default_value_t = MergeMode::Concat,
        help = "How segments are merged: plain concatenation, or through ffmpeg (pipe, concat-list)"
    )]
    pub merge_mode: MergeMode,

    /// ffmpeg binary
    #[arg(
        long,
        help = "Path to the ffmpeg binary (default: $FFMPEG_PATH, then ffmpeg on PATH)"
    )]
    pub ffmpeg: Option<PathBuf>,

    #[arg(
        long,
        default_value = "1800",
        help = "Maximum time in seconds the ffmpeg process may run"
    )]
    pub transcoder_timeout: u64,

    #[arg(
        long,
        help = "Do not check that decrypted segments look like a media container"
    )]
    pub no_verify: bool,

    /// Extraction strategies for page inputs
    #[arg(
        long = "strategy",
        value_enum,
        value_delimiter = ',',
        help = "Link extraction strategies to use for page inputs (default: all)"
    )]
    pub strategies: Vec<ExtractionMethod>,

    /// Custom HTTP headers
    #[arg(
        long = "header",
        short = 'H',
        help = "Add custom HTTP header to requests (can be used multiple times). Format: 'Name: Value'",
        value_name = "HEADER"
    )]
    pub headers: Vec<String>,

    #[arg(
        long,
        help = "Cookies sent with the page and media requests. Format: 'name=value; name2=value2'"
    )]
    pub cookies: Option<String>,

    #[arg(long, help = "Override the User-Agent header")]
    pub user_agent: Option<String>,

    /// Overall request timeout in seconds
    #[arg(
        long,
        default_value = "30",
        help = "Overall timeout in seconds for HTTP requests"
    )]
    pub timeout: u64,

    /// Connection timeout in seconds
    #[arg(
        long,
        default_value = "10",
        help = "Connection timeout in seconds (time to establish initial connection)"
    )]
    pub connect_timeout: u64,

    /// Proxy URL (e.g., "http://proxy.example.com:8080")
    #[arg(
        long,
        help = "Proxy server URL for downloads (e.g., \"http://proxy.example.com:8080\")"
    )]
    pub proxy: Option<String>,

    #[arg(long, value_enum, default_value_t = ProxyType::Http, help = "Proxy type")]
    pub proxy_type: ProxyType,

    /// Proxy username
    #[arg(long, help = "Username for proxy authentication")]
    pub proxy_user: Option<String>,

    /// Proxy password
    #[arg(long, help = "Password for proxy authentication")]
    pub proxy_pass: Option<String>,

    /// Use system proxy settings for downloads
    #[arg(
        long,
        action = ArgAction::Set,
        default_value_t = true,
        value_name = "BOOL",
        help = "Use system proxy settings for downloads if no explicit proxy is configured"
    )]
    pub use_system_proxy: bool,

    /// Disable all proxy settings for downloads
    #[arg(
        long,
        help = "Disable all proxy settings (including system proxy) for downloads"
    )]
    pub no_proxy: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    const INPUT: &str = "https://cdn.test/vod/index.m3u8";

    #[test]
    fn system_proxy_is_on_by_default() {
        let args = CliArgs::try_parse_from(["hlsgrab", INPUT]).unwrap();
        assert!(args.use_system_proxy);
        assert!(!args.no_proxy);
    }

    #[test]
    fn system_proxy_can_be_turned_off() {
        let args =
            CliArgs::try_parse_from(["hlsgrab", "--use-system-proxy", "false", INPUT]).unwrap();
        assert!(!args.use_system_proxy);

        let args =
            CliArgs::try_parse_from(["hlsgrab", "--use-system-proxy=true", INPUT]).unwrap();
        assert!(args.use_system_proxy);
    }
}
