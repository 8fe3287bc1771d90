// HLS Merger: writes the ordered segment stream into the final output file.
//
// Output always goes to a temporary sibling of the destination and is only
// renamed into place after the merge succeeded. Dropping the temporary file
// (failure, cancellation) removes the partial output.

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use bytes::Bytes;
use futures::{Stream, StreamExt};
use tempfile::{NamedTempFile, TempDir};
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DownloadError, FsOperation, ProcessingError};
use crate::hls::config::{HlsOutputConfig, MergeMode};
use crate::hls::events::{DownloadEvent, ProgressSink};

const STDERR_TAIL: usize = 2048;

pub struct SegmentMerger {
    config: HlsOutputConfig,
    progress: Arc<dyn ProgressSink>,
}

impl SegmentMerger {
    pub fn new(config: HlsOutputConfig, progress: Arc<dyn ProgressSink>) -> Self {
        Self { config, progress }
    }

    /// Consume `segments` and produce `destination`. Returns the size of the
    /// committed output file.
    pub async fn merge<S>(
        &self,
        segments: S,
        destination: &Path,
        token: &CancellationToken,
    ) -> Result<u64, DownloadError>
    where
        S: Stream<Item = Bytes> + Unpin,
    {
        let temp = create_sibling_temp(destination)?;
        info!(
            mode = ?self.config.merge_mode,
            destination = %destination.display(),
            "Merging segments"
        );

        match self.config.merge_mode {
            MergeMode::Concat => self.concat(segments, temp.path(), token).await?,
            MergeMode::Pipe => self.pipe(segments, temp.path(), token).await?,
            MergeMode::ConcatList => self.concat_list(segments, temp.path(), token).await?,
        };

        if token.is_cancelled() {
            return Err(DownloadError::cancelled());
        }

        let size = tokio::fs::metadata(temp.path())
            .await
            .map_err(|e| DownloadError::io(FsOperation::Read, temp.path(), &e))?
            .len();
        if size == 0 {
            return Err(ProcessingError::ConversionFailed {
                tool: self.tool_name(),
                exit_code: Some(0),
                stderr: "output file is empty".to_string(),
            }
            .into());
        }

        self.progress.on_event(&DownloadEvent::Finalizing);
        temp.persist(destination)
            .map_err(|e| DownloadError::io(FsOperation::Move, destination, &e.error))?;

        info!(destination = %destination.display(), bytes = size, "Output committed");
        self.progress.on_event(&DownloadEvent::OutputCommitted {
            path: destination.to_path_buf(),
            bytes: size,
        });
        Ok(size)
    }

    fn tool_name(&self) -> String {
        match self.config.merge_mode {
            MergeMode::Concat => "concat".to_string(),
            MergeMode::Pipe | MergeMode::ConcatList => {
                self.config.resolve_ffmpeg().display().to_string()
            }
        }
    }

    async fn concat<S>(
        &self,
        mut segments: S,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<(), DownloadError>
    where
        S: Stream<Item = Bytes> + Unpin,
    {
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(path)
            .await
            .map_err(|e| DownloadError::io(FsOperation::CreateFile, path, &e))?;
        let mut writer = BufWriter::new(file);
        let mut written = 0u64;

        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::cancelled()),
                next = segments.next() => next,
            };
            let Some(data) = next else {
                break;
            };
            writer
                .write_all(&data)
                .await
                .map_err(|e| DownloadError::io(FsOperation::Write, path, &e))?;
            written += data.len() as u64;
            self.progress
                .on_event(&DownloadEvent::BytesWritten { total: written });
        }

        writer
            .flush()
            .await
            .map_err(|e| DownloadError::io(FsOperation::Write, path, &e))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|e| DownloadError::io(FsOperation::Write, path, &e))?;
        debug!(bytes = written, "Concatenated segments");
        Ok(())
    }

    async fn pipe<S>(
        &self,
        mut segments: S,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<(), DownloadError>
    where
        S: Stream<Item = Bytes> + Unpin,
    {
        let args = pipe_args(path);
        let mut child = self.spawn(&args, Stdio::piped())?;
        let stderr = collect_stderr(&mut child);

        let mut stdin = child.stdin.take();
        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    kill(&mut child).await;
                    return Err(DownloadError::cancelled());
                }
                next = segments.next() => next,
            };
            let Some(data) = next else {
                break;
            };
            let Some(pipe) = stdin.as_mut() else {
                break;
            };
            if let Err(e) = pipe.write_all(&data).await {
                // The transcoder exited early; its status and stderr tell why.
                warn!(error = %e, "Transcoder stdin closed");
                stdin = None;
                continue;
            }
            written += data.len() as u64;
            self.progress
                .on_event(&DownloadEvent::BytesWritten { total: written });
        }
        drop(stdin);

        self.wait(child, stderr, token).await
    }

    async fn concat_list<S>(
        &self,
        mut segments: S,
        path: &Path,
        token: &CancellationToken,
    ) -> Result<(), DownloadError>
    where
        S: Stream<Item = Bytes> + Unpin,
    {
        let spool = tempfile::Builder::new()
            .prefix("hlsgrab-")
            .tempdir()
            .map_err(|e| DownloadError::io(FsOperation::CreateDirectory, &std::env::temp_dir(), &e))?;

        let mut list = String::new();
        let mut index = 0usize;
        let mut written = 0u64;
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return Err(DownloadError::cancelled()),
                next = segments.next() => next,
            };
            let Some(data) = next else {
                break;
            };
            let part = spool.path().join(format!("part{index:06}.seg"));
            tokio::fs::write(&part, &data)
                .await
                .map_err(|e| DownloadError::io(FsOperation::Write, &part, &e))?;
            list.push_str(&concat_list_entry(&part));
            index += 1;
            written += data.len() as u64;
            self.progress
                .on_event(&DownloadEvent::BytesWritten { total: written });
        }

        let list_path = write_list(&spool, &list).await?;
        debug!(parts = index, list = %list_path.display(), "Spooled segments for concat");

        let mut child = self.spawn(&concat_list_args(&list_path, path), Stdio::null())?;
        let stderr = collect_stderr(&mut child);
        self.wait(child, stderr, token).await
    }

    fn spawn(&self, args: &[OsString], stdin: Stdio) -> Result<Child, DownloadError> {
        let program = self.config.resolve_ffmpeg();
        debug!(program = %program.display(), ?args, "Spawning transcoder");
        Command::new(&program)
            .args(args)
            .env("LC_ALL", "C")
            .stdin(stdin)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ProcessingError::ToolNotFound {
                        tool: program.display().to_string(),
                    }
                    .into()
                } else {
                    ProcessingError::ConversionFailed {
                        tool: program.display().to_string(),
                        exit_code: None,
                        stderr: e.to_string(),
                    }
                    .into()
                }
            })
    }

    async fn wait(
        &self,
        mut child: Child,
        stderr: tokio::task::JoinHandle<String>,
        token: &CancellationToken,
    ) -> Result<(), DownloadError> {
        let tool = self.tool_name();
        let timeout = self.config.transcoder_timeout;

        let status = tokio::select! {
            _ = token.cancelled() => {
                kill(&mut child).await;
                return Err(DownloadError::cancelled());
            }
            status = tokio::time::timeout(timeout, child.wait()) => status,
        };

        let status = match status {
            Ok(Ok(status)) => status,
            Ok(Err(e)) => {
                return Err(ProcessingError::ConversionFailed {
                    tool,
                    exit_code: None,
                    stderr: e.to_string(),
                }
                .into());
            }
            Err(_) => {
                kill(&mut child).await;
                return Err(ProcessingError::ConversionFailed {
                    tool,
                    exit_code: None,
                    stderr: format!("timed out after {}s", timeout.as_secs()),
                }
                .into());
            }
        };

        let stderr = stderr.await.unwrap_or_default();
        if !status.success() {
            return Err(ProcessingError::ConversionFailed {
                tool,
                exit_code: status.code(),
                stderr: tail(&stderr, STDERR_TAIL),
            }
            .into());
        }
        if !stderr.trim().is_empty() {
            debug!(stderr = %stderr.trim(), "Transcoder output");
        }
        Ok(())
    }
}

fn create_sibling_temp(destination: &Path) -> Result<NamedTempFile, DownloadError> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let stem = destination
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    // Keep the destination extension last so the transcoder picks the right muxer.
    let suffix = match destination.extension() {
        Some(ext) => format!(".part.{}", ext.to_string_lossy()),
        None => ".part".to_string(),
    };

    tempfile::Builder::new()
        .prefix(&format!(".{stem}."))
        .suffix(&suffix)
        .tempfile_in(&parent)
        .map_err(|e| DownloadError::io(FsOperation::CreateFile, &parent, &e))
}

fn collect_stderr(child: &mut Child) -> tokio::task::JoinHandle<String> {
    let stderr = child.stderr.take();
    tokio::spawn(async move {
        let mut buf = Vec::new();
        if let Some(mut stderr) = stderr {
            let _ = stderr.read_to_end(&mut buf).await;
        }
        String::from_utf8_lossy(&buf).into_owned()
    })
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        warn!(error = %e, "Failed to kill transcoder");
    }
}

async fn write_list(spool: &TempDir, list: &str) -> Result<PathBuf, DownloadError> {
    let list_path = spool.path().join("list.txt");
    tokio::fs::write(&list_path, list)
        .await
        .map_err(|e| DownloadError::io(FsOperation::Write, &list_path, &e))?;
    Ok(list_path)
}

fn tail(text: &str, max: usize) -> String {
    let text = text.trim();
    if text.len() <= max {
        return text.to_string();
    }
    let mut start = text.len() - max;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

pub(crate) fn pipe_args(output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-i", "pipe:0", "-c", "copy"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(output.as_os_str().to_owned());
    args
}

pub(crate) fn concat_list_args(list: &Path, output: &Path) -> Vec<OsString> {
    let mut args: Vec<OsString> = ["-hide_banner", "-loglevel", "error", "-y", "-f", "concat", "-safe", "0", "-i"]
        .into_iter()
        .map(OsString::from)
        .collect();
    args.push(list.as_os_str().to_owned());
    args.extend(["-c", "copy"].into_iter().map(OsString::from));
    args.push(output.as_os_str().to_owned());
    args
}

// ffmpeg concat demuxer line; single quotes are closed, escaped and reopened.
fn concat_list_entry(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', r"'\''");
    format!("file '{escaped}'\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::events::NoopProgress;

    fn merger(mode: MergeMode, ffmpeg: Option<PathBuf>) -> SegmentMerger {
        let config = HlsOutputConfig {
            merge_mode: mode,
            ffmpeg_path: ffmpeg,
            ..Default::default()
        };
        SegmentMerger::new(config, Arc::new(NoopProgress))
    }

    fn stream(parts: &[&'static [u8]]) -> impl Stream<Item = Bytes> + Unpin {
        futures::stream::iter(parts.iter().map(|p| Bytes::from_static(p)).collect::<Vec<_>>())
    }

    #[tokio::test]
    async fn concat_writes_and_commits() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.ts");
        let size = merger(MergeMode::Concat, None)
            .merge(stream(&[b"abc", b"de"]), &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(size, 5);
        assert_eq!(std::fs::read(&dest).unwrap(), b"abcde");
        // Only the committed file is left behind.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn cancelled_concat_leaves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.ts");
        let token = CancellationToken::new();
        token.cancel();
        let err = merger(MergeMode::Concat, None)
            .merge(futures::stream::pending::<Bytes>(), &dest, &token)
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn empty_stream_is_conversion_failure() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.ts");
        let err = merger(MergeMode::Concat, None)
            .merge(stream(&[]), &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conversion_failed");
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn missing_transcoder_is_tool_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");
        let err = merger(
            MergeMode::Pipe,
            Some(PathBuf::from("/nonexistent/hlsgrab-ffmpeg")),
        )
        .merge(stream(&[b"\x47"]), &dest, &CancellationToken::new())
        .await
        .unwrap_err();
        assert_eq!(err.code(), "tool_not_found");
        assert!(!dest.exists());
    }

    /// Executable shell script standing in for ffmpeg.
    #[cfg(unix)]
    fn fake_transcoder(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failing_transcoder_reports_exit_and_stderr() {
        let tools = tempfile::tempdir().unwrap();
        let ffmpeg = fake_transcoder(
            tools.path(),
            "echo 'pipe:0: Invalid data found when processing input' >&2\nexit 1",
        );
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");

        let err = merger(MergeMode::Pipe, Some(ffmpeg.clone()))
            .merge(stream(&[b"\x47abc", b"\x47def"]), &dest, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            DownloadError::Processing(ProcessingError::ConversionFailed {
                tool,
                exit_code,
                stderr,
            }) => {
                assert_eq!(tool, ffmpeg.display().to_string());
                assert_eq!(exit_code, Some(1));
                assert_eq!(stderr, "pipe:0: Invalid data found when processing input");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(!dest.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn pipe_mode_commits_transcoder_output() {
        let tools = tempfile::tempdir().unwrap();
        // Copies stdin to the last argument, like `-c copy` into the output path.
        let ffmpeg = fake_transcoder(tools.path(), "for out; do :; done\ncat > \"$out\"");
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");

        let size = merger(MergeMode::Pipe, Some(ffmpeg))
            .merge(stream(&[b"\x47abc", b"\x47de"]), &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 7);
        assert_eq!(std::fs::read(&dest).unwrap(), b"\x47abc\x47de");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn concat_list_mode_reads_spooled_parts() {
        let tools = tempfile::tempdir().unwrap();
        // Joins the files named in the list that follows `-i`.
        let ffmpeg = fake_transcoder(
            tools.path(),
            r#"list=""; prev=""
for arg; do
  if [ "$prev" = "-i" ]; then list="$arg"; fi
  prev="$arg"; out="$arg"
done
sed -n "s/^file '\(.*\)'\$/\1/p" "$list" | while read -r part; do cat "$part"; done > "$out""#,
        );
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out.mp4");

        let size = merger(MergeMode::ConcatList, Some(ffmpeg))
            .merge(stream(&[b"one", b"two", b"three"]), &dest, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(size, 11);
        assert_eq!(std::fs::read(&dest).unwrap(), b"onetwothree");
    }

    #[test]
    fn transcoder_arguments_are_deterministic() {
        let args = pipe_args(Path::new("/tmp/out.mp4"));
        assert_eq!(
            args,
            ["-hide_banner", "-loglevel", "error", "-y", "-i", "pipe:0", "-c", "copy", "/tmp/out.mp4"]
                .map(OsString::from)
        );
        let args = concat_list_args(Path::new("/tmp/list.txt"), Path::new("/tmp/out.mp4"));
        assert_eq!(args[4], "-f");
        assert_eq!(args[5], "concat");
        assert_eq!(args[9], "/tmp/list.txt");
        assert_eq!(args.last().map(OsString::as_os_str), Some(Path::new("/tmp/out.mp4").as_os_str()));
    }

    #[test]
    fn list_entries_escape_quotes() {
        assert_eq!(
            concat_list_entry(Path::new("/tmp/it's.seg")),
            "file '/tmp/it'\\''s.seg'\n"
        );
    }
}
