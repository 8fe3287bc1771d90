use std::time::Duration;

use clap::Parser;
use error::AppError;
use hlsgrab_engine::hls::{HlsConfig, MergeMode};
use hlsgrab_engine::{
    DownloadResult, DownloadSource, DownloaderConfig, HlsDownloader, ProxyAuth, ProxyConfig,
};
use hlsgrab_links::ExtractOptions;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

mod cli;
mod error;
mod utils;

use cli::{CliArgs, SourceKind};
use utils::progress::ProgressManager;
use utils::{default_output, parse_header};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// How a run ended, mapped to the process exit code.
enum Outcome {
    Success,
    /// Output produced with skipped segments.
    Partial,
    Cancelled,
}

impl Outcome {
    fn exit_code(&self) -> i32 {
        match self {
            Self::Success => 0,
            Self::Partial => 2,
            Self::Cancelled => 130,
        }
    }
}

fn main() {
    // Parse command-line arguments
    let args = CliArgs::parse();

    let log_guard = match init_logging(args.verbose) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Error: {e}");
            std::process::exit(1);
        }
    };

    let code = exit_code(run(args));
    // process::exit skips destructors; flush the log file first.
    drop(log_guard);
    std::process::exit(code);
}

/// Print and log a fatal error, and map the run result to the exit code.
fn exit_code(result: Result<Outcome, AppError>) -> i32 {
    match result {
        Ok(outcome) => outcome.exit_code(),
        Err(e) => {
            eprintln!("Error: {e}");
            if let Some(hint) = e.hint() {
                eprintln!("Hint: {hint}");
            }
            // Log the full error for debugging
            error!(error = ?e, "Application failed");
            1
        }
    }
}

/// Log to stdout and `hlsgrab.log`. RUST_LOG wins over `--verbose`.
/// The returned guard must outlive every log call.
fn init_logging(verbose: bool) -> Result<WorkerGuard, AppError> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open("hlsgrab.log")?;
    let (file_writer, guard) = tracing_appender::non_blocking(log_file);

    let multi_writer = MakeWriterExt::and(std::io::stdout, file_writer);

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(multi_writer)
        .with_ansi(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| AppError::Initialization(e.to_string()))?;
    Ok(guard)
}

#[tokio::main]
async fn run(args: CliArgs) -> Result<Outcome, AppError> {
    info!("hlsgrab {} - HLS video-on-demand downloader", env!("CARGO_PKG_VERSION"));

    let detected = DownloadSource::parse(&args.input)?;
    let source = match args.source {
        SourceKind::Auto => detected,
        SourceKind::Manifest => DownloadSource::Manifest(detected.url().clone()),
        SourceKind::Page => DownloadSource::Page(detected.url().clone()),
    };
    let output = args.output.clone().unwrap_or_else(|| default_output(&source));
    info!(source = %source, output = %output.display(), "Starting download");

    let hls_config = build_hls_config(&args)?;
    let extract_options = build_extract_options(&args);

    let downloader = HlsDownloader::new(hls_config)?.with_extract_options(extract_options);
    let id = downloader.submit(source, &output);

    let progress = if args.show_progress {
        ProgressManager::new()
    } else {
        ProgressManager::new_disabled()
    };
    let tracker = progress.track(downloader.tasks().subscribe(id)?);

    // Ctrl-C cancels the task; the wait below then resolves to its terminal result.
    let wait = downloader.tasks().wait(id);
    tokio::pin!(wait);
    let mut interrupted = false;
    let result = loop {
        tokio::select! {
            result = &mut wait => break result?,
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                signal?;
                warn!("Interrupted, cancelling download");
                interrupted = true;
                downloader.cancel(id)?;
            }
        }
    };
    // The tracker exits on the terminal snapshot.
    let _ = tracker.await;

    match result {
        DownloadResult::Success {
            output,
            bytes_written,
            segments_merged,
            missing,
        } => {
            info!(
                output = %output.display(),
                bytes = bytes_written,
                segments = segments_merged,
                "Download complete"
            );
            if missing.is_empty() {
                Ok(Outcome::Success)
            } else {
                warn!(missing = ?missing, "Output is missing {} segment(s)", missing.len());
                Ok(Outcome::Partial)
            }
        }
        DownloadResult::Failure { error, .. } if error.is_cancelled() => {
            info!("Download cancelled");
            Ok(Outcome::Cancelled)
        }
        DownloadResult::Failure {
            error,
            segments_completed,
            ..
        } => {
            info!(segments_completed, "Download failed");
            Err(error.into())
        }
    }
}

fn build_hls_config(args: &CliArgs) -> Result<HlsConfig, AppError> {
    if args.concurrency == 0 {
        return Err(AppError::InvalidInput(
            "concurrency must be at least 1".to_string(),
        ));
    }

    // Handle proxy configuration
    let (proxy_config, use_system_proxy) = if args.no_proxy {
        // No proxy flag overrides everything else
        info!("All proxy settings disabled (--no-proxy flag)");
        (None, false)
    } else if let Some(proxy_url) = args.proxy.as_ref() {
        // Configure proxy authentication if both username and password are provided
        let auth = match (&args.proxy_user, &args.proxy_pass) {
            (Some(username), Some(password)) => Some(ProxyAuth {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        };

        info!(
            proxy_url = %proxy_url,
            proxy_type = ?args.proxy_type,
            has_auth = auth.is_some(),
            "Using explicit proxy configuration for downloads"
        );

        let proxy = ProxyConfig {
            url: proxy_url.clone(),
            proxy_type: args.proxy_type,
            auth,
        };
        (Some(proxy), false)
    } else {
        (None, args.use_system_proxy)
    };

    let download_config = {
        let mut builder = DownloaderConfig::builder()
            .with_timeout(Duration::from_secs(args.timeout))
            .with_connect_timeout(Duration::from_secs(args.connect_timeout));
        if let Some(user_agent) = &args.user_agent {
            builder = builder.with_user_agent(user_agent.clone());
        }
        if let Some(proxy) = proxy_config {
            builder = builder.with_proxy(proxy);
        } else {
            builder = builder.with_system_proxy(use_system_proxy);
        }
        builder.build()
    };

    let mut config = HlsConfig {
        base: download_config,
        ..HlsConfig::default()
    };
    config.scheduler_config.download_concurrency = args.concurrency;
    config.fetcher_config.max_segment_retries = args.retries;
    config.fetcher_config.segment_download_timeout = Duration::from_secs(args.segment_timeout);
    config.fetcher_config.gap_policy = args.gap_policy;
    config.decryption_config.verify_container = !args.no_verify;
    config.output_config.merge_mode = args.merge_mode;
    config.output_config.ffmpeg_path = args.ffmpeg.clone();
    config.output_config.transcoder_timeout = Duration::from_secs(args.transcoder_timeout);

    if args.merge_mode != MergeMode::Concat {
        info!(
            merge_mode = ?args.merge_mode,
            ffmpeg = %config.output_config.resolve_ffmpeg().display(),
            "Segments will be merged through ffmpeg"
        );
    }

    Ok(config)
}

fn build_extract_options(args: &CliArgs) -> ExtractOptions {
    let mut options = ExtractOptions::new();
    if !args.strategies.is_empty() {
        options = options.with_strategies(args.strategies.iter().copied());
    }
    for (name, value) in args.headers.iter().filter_map(|h| parse_header(h)) {
        options = options.with_header(name, value);
    }
    if let Some(cookies) = &args.cookies {
        options.set_cookies_from_string(cookies);
    }
    options
}
