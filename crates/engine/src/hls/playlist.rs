// HLS Playlist Resolver: fetches an M3U8 document and turns it into a resolved media playlist.

use std::collections::HashMap;
use std::sync::Arc;

use m3u8_rs::{Playlist, parse_playlist_res};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use url::Url;

use crate::error::{DownloadError, ProcessingError};
use crate::hls::config::HlsConfig;
use crate::hls::retry::{RetryPolicy, classify_fetch, retry_with_backoff};
use crate::hls::segment::{
    ByteRange, EncryptionKey, InitSection, KeyMethod, MediaPlaylist, Segment,
};
use crate::http::{FetchRequest, HttpClient};

pub struct PlaylistResolver {
    http_client: Arc<dyn HttpClient>,
    config: Arc<HlsConfig>,
    headers: Vec<(String, String)>,
}

impl PlaylistResolver {
    pub fn new(http_client: Arc<dyn HttpClient>, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
            headers: Vec::new(),
        }
    }

    /// Extra request headers (cookies, referer) sent with the manifest request.
    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    /// Fetch the manifest at `url` and resolve it with `url` as base.
    pub async fn fetch(
        &self,
        url: &Url,
        token: &CancellationToken,
    ) -> Result<MediaPlaylist, DownloadError> {
        let policy = RetryPolicy::for_playlist(&self.config);
        let timeout = self.config.playlist_config.playlist_fetch_timeout;

        let fetched = retry_with_backoff(&policy, token, |_| {
            let request = FetchRequest::get(url.clone(), timeout).with_headers(self.headers.clone());
            async move {
                let result = self.http_client.fetch(request).await;
                classify_fetch(result, url, "playlist fetch")
            }
        })
        .await?;

        let playlist = Self::resolve(&fetched.value, url)?;
        info!(
            url = %url,
            segments = playlist.len(),
            encrypted = playlist.is_encrypted(),
            duration_secs = playlist.total_duration().as_secs_f64(),
            "Resolved media playlist"
        );
        Ok(playlist)
    }

    /// Parse `manifest` and resolve every URI against `base_url`.
    pub fn resolve(manifest: &[u8], base_url: &Url) -> Result<MediaPlaylist, DownloadError> {
        let text = std::str::from_utf8(manifest)
            .map_err(|e| DownloadError::malformed_playlist(format!("not valid UTF-8: {e}")))?;
        let text = text.trim_start_matches('\u{feff}').trim_start();
        if !text.starts_with("#EXTM3U") {
            return Err(DownloadError::malformed_playlist("missing #EXTM3U header"));
        }

        let parsed = match parse_playlist_res(text.as_bytes()) {
            Ok(Playlist::MasterPlaylist(_)) => {
                return Err(ProcessingError::UnsupportedPlaylist.into());
            }
            Ok(Playlist::MediaPlaylist(pl)) => pl,
            Err(e) => {
                return Err(DownloadError::malformed_playlist(format!(
                    "could not parse playlist: {e}"
                )));
            }
        };

        let join = |uri: &str| {
            base_url.join(uri.trim()).map_err(|e| {
                DownloadError::malformed_playlist(format!(
                    "cannot resolve `{uri}` against {base_url}: {e}"
                ))
            })
        };

        // Last byte offset per resource, for ranges that omit `@offset`.
        let mut range_ends: HashMap<Url, u64> = HashMap::new();
        let mut resolve_range =
            |url: &Url, range: Option<&m3u8_rs::ByteRange>| -> Option<ByteRange> {
                let range = range?;
                let offset = range
                    .offset
                    .unwrap_or_else(|| range_ends.get(url).copied().unwrap_or(0));
                range_ends.insert(url.clone(), offset + range.length);
                Some(ByteRange {
                    length: range.length,
                    offset,
                })
            };

        let mut init = match playlist_level_map(&parsed.unknown_tags) {
            Some((uri, range)) => {
                let url = join(&uri)?;
                let byte_range = resolve_range(&url, range.as_ref());
                Some(InitSection { url, byte_range })
            }
            None => None,
        };

        let mut current_key: Option<EncryptionKey> = None;
        let mut first_key: Option<EncryptionKey> = None;
        let mut segments = Vec::with_capacity(parsed.segments.len());
        let mut last_sequence: Option<u64> = None;

        for (idx, seg) in parsed.segments.iter().enumerate() {
            if let Some(key) = &seg.key {
                current_key = convert_key(key, &join)?;
                if first_key.is_none() {
                    first_key.clone_from(&current_key);
                }
            }

            if init.is_none()
                && let Some(map) = &seg.map
            {
                let url = join(&map.uri)?;
                let byte_range = resolve_range(&url, map.byte_range.as_ref());
                init = Some(InitSection { url, byte_range });
            }

            let sequence = parsed
                .media_sequence
                .checked_add(idx as u64)
                .ok_or_else(|| DownloadError::malformed_playlist("media sequence overflow"))?;
            if last_sequence.is_some_and(|last| sequence <= last) {
                return Err(DownloadError::malformed_playlist(format!(
                    "sequence number {sequence} is not strictly increasing"
                )));
            }
            last_sequence = Some(sequence);

            let url = join(&seg.uri)?;
            let byte_range = resolve_range(&url, seg.byte_range.as_ref());

            segments.push(Segment {
                url,
                duration: seg.duration,
                sequence,
                key: current_key.clone(),
                byte_range,
                discontinuity: seg.discontinuity,
                title: seg.title.clone().filter(|t| !t.is_empty()),
            });
        }

        if segments.is_empty() {
            return Err(ProcessingError::EmptyPlaylist.into());
        }

        debug!(
            base = %base_url,
            segments = segments.len(),
            media_sequence = parsed.media_sequence,
            "Parsed media playlist"
        );

        Ok(MediaPlaylist {
            base_url: base_url.clone(),
            segments,
            key: first_key,
            target_duration: parsed.target_duration,
            media_sequence: parsed.media_sequence,
            discontinuity_sequence: parsed.discontinuity_sequence,
            end_list: parsed.end_list,
            init,
        })
    }
}

fn convert_key<F>(key: &m3u8_rs::Key, join: &F) -> Result<Option<EncryptionKey>, DownloadError>
where
    F: Fn(&str) -> Result<Url, DownloadError>,
{
    let method = match &key.method {
        m3u8_rs::KeyMethod::None => return Ok(None),
        m3u8_rs::KeyMethod::AES128 => KeyMethod::Aes128,
        m3u8_rs::KeyMethod::SampleAES => KeyMethod::SampleAes,
        m3u8_rs::KeyMethod::Other(other) => KeyMethod::Other(other.clone()),
    };
    let uri = key.uri.as_deref().map(join).transpose()?;
    let iv = key.iv.as_deref().map(parse_iv).transpose()?;
    Ok(Some(EncryptionKey {
        method,
        uri,
        iv,
        key_format: key.keyformat.clone(),
    }))
}

fn parse_iv(raw: &str) -> Result<[u8; 16], DownloadError> {
    let digits = raw
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X");
    let bytes = hex::decode(digits)
        .map_err(|e| DownloadError::malformed_playlist(format!("invalid IV `{raw}`: {e}")))?;
    <[u8; 16]>::try_from(bytes.as_slice()).map_err(|_| {
        DownloadError::malformed_playlist(format!("IV `{raw}` is not 16 bytes"))
    })
}

// An EXT-X-MAP that precedes the first segment is not attached to any
// segment by m3u8-rs; it ends up as an unknown `X-MAP` tag.
fn playlist_level_map(tags: &[m3u8_rs::ExtTag]) -> Option<(String, Option<m3u8_rs::ByteRange>)> {
    let rest = tags.iter().find(|t| t.tag == "X-MAP")?.rest.as_deref()?;

    let mut uri = None;
    let mut byte_range = None;
    for part in split_attributes(rest) {
        let Some((k, v)) = part.split_once('=') else {
            continue;
        };
        let value = v.trim().trim_matches('"');
        if k.trim().eq_ignore_ascii_case("URI") {
            uri = Some(value.to_string());
        } else if k.trim().eq_ignore_ascii_case("BYTERANGE") {
            let (len, offset) = value.split_once('@').unwrap_or((value, ""));
            if let Ok(length) = len.trim().parse::<u64>() {
                byte_range = Some(m3u8_rs::ByteRange {
                    length,
                    offset: offset.trim().parse().ok(),
                });
            }
        }
    }
    uri.map(|u| (u, byte_range))
}

// Comma-separated attribute list, commas inside quotes kept.
fn split_attributes(rest: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut in_quotes = false;
    let mut start = 0;
    for (idx, ch) in rest.char_indices() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ',' if !in_quotes => {
                parts.push(rest[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(rest[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}
