// HLS Decryption Service: fetches AES-128 keys once per URI and decrypts segments.

use std::collections::HashMap;
use std::sync::Arc;

use aes::Aes128;
use bytes::Bytes;
use cipher::{BlockDecryptMut, KeyIvInit, block_padding::Pkcs7};
use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::error::{DownloadError, ProcessingError};
use crate::hls::config::HlsConfig;
use crate::hls::retry::{RetryPolicy, classify_fetch, retry_with_backoff};
use crate::hls::segment::{KeyMethod, Segment};
use crate::http::{FetchRequest, HttpClient};

type Aes128CbcDec = cbc::Decryptor<Aes128>;

fn decryption_error(url: &Url, reason: impl Into<String>) -> DownloadError {
    ProcessingError::Decryption {
        url: url.to_string(),
        reason: reason.into(),
    }
    .into()
}

/// Runs AES-128-CBC either inline or on the blocking thread pool.
pub struct DecryptionOffloader {
    enabled: bool,
}

impl DecryptionOffloader {
    pub fn new(enabled: bool) -> Self {
        Self { enabled }
    }

    pub async fn decrypt(
        &self,
        data: Bytes,
        key: &[u8; 16],
        iv: &[u8; 16],
    ) -> Result<Bytes, String> {
        if self.enabled {
            let key = *key;
            let iv = *iv;
            tokio::task::spawn_blocking(move || Self::decrypt_sync(&data, &key, &iv))
                .await
                .map_err(|e| format!("decryption task failed: {e}"))?
        } else {
            Self::decrypt_sync(&data, key, iv)
        }
    }

    pub fn decrypt_sync(data: &[u8], key: &[u8; 16], iv: &[u8; 16]) -> Result<Bytes, String> {
        let mut buffer = data.to_vec();
        let cipher = Aes128CbcDec::new(&(*key).into(), &(*iv).into());
        let len = cipher
            .decrypt_padded_mut::<Pkcs7>(&mut buffer)
            .map_err(|e| format!("AES-128-CBC: {e}"))?
            .len();
        buffer.truncate(len);
        Ok(Bytes::from(buffer))
    }
}

/// Fetches key material, at most once per key URI for the lifetime of the fetcher.
pub struct KeyFetcher {
    http_client: Arc<dyn HttpClient>,
    config: Arc<HlsConfig>,
    headers: Vec<(String, String)>,
    keys: Mutex<HashMap<Url, Arc<OnceCell<[u8; 16]>>>>,
}

impl KeyFetcher {
    pub fn new(http_client: Arc<dyn HttpClient>, config: Arc<HlsConfig>) -> Self {
        Self {
            http_client,
            config,
            headers: Vec::new(),
            keys: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub async fn key(
        &self,
        key_url: &Url,
        token: &CancellationToken,
    ) -> Result<[u8; 16], DownloadError> {
        let cell = self
            .keys
            .lock()
            .entry(key_url.clone())
            .or_default()
            .clone();
        cell.get_or_try_init(|| self.fetch_key(key_url, token))
            .await
            .copied()
    }

    async fn fetch_key(
        &self,
        key_url: &Url,
        token: &CancellationToken,
    ) -> Result<[u8; 16], DownloadError> {
        let policy = RetryPolicy::for_keys(&self.config.fetcher_config);
        let timeout = self.config.fetcher_config.key_download_timeout;

        let fetched = retry_with_backoff(&policy, token, |_| {
            let request = FetchRequest::get(key_url.clone(), timeout).with_headers(self.headers.clone());
            async move {
                let result = self.http_client.fetch(request).await;
                classify_fetch(result, key_url, "key fetch")
            }
        })
        .await?;

        let key = <[u8; 16]>::try_from(fetched.value.as_ref()).map_err(|_| {
            decryption_error(
                key_url,
                format!("key is {} bytes, expected 16", fetched.value.len()),
            )
        })?;
        debug!(url = %key_url, "Fetched decryption key");
        Ok(key)
    }
}

/// Turns raw segment bytes into clear media bytes.
pub struct DecryptionService {
    config: Arc<HlsConfig>,
    key_fetcher: Arc<KeyFetcher>,
    offloader: DecryptionOffloader,
}

impl DecryptionService {
    pub fn new(config: Arc<HlsConfig>, key_fetcher: Arc<KeyFetcher>) -> Self {
        let offloader =
            DecryptionOffloader::new(config.decryption_config.offload_decryption_to_cpu_pool);
        Self {
            config,
            key_fetcher,
            offloader,
        }
    }

    /// Decrypt `data` of `segment` if a key is in effect; otherwise pass it through.
    pub async fn process(
        &self,
        segment: &Segment,
        data: Bytes,
        token: &CancellationToken,
    ) -> Result<Bytes, DownloadError> {
        let Some(key) = segment.key.as_ref() else {
            return Ok(data);
        };

        match &key.method {
            KeyMethod::None => return Ok(data),
            KeyMethod::Aes128 => {}
            KeyMethod::SampleAes => {
                return Err(decryption_error(
                    &segment.url,
                    "SAMPLE-AES encryption is not supported",
                ));
            }
            KeyMethod::Other(method) => {
                return Err(decryption_error(
                    &segment.url,
                    format!("unsupported encryption method `{method}`"),
                ));
            }
        }

        let key_url = key
            .uri
            .as_ref()
            .ok_or_else(|| decryption_error(&segment.url, "AES-128 key without URI"))?;
        let key_bytes = self.key_fetcher.key(key_url, token).await?;
        let iv = key.iv_for(segment.sequence);

        let clear = self
            .offloader
            .decrypt(data, &key_bytes, &iv)
            .await
            .map_err(|reason| decryption_error(&segment.url, reason))?;

        if self.config.decryption_config.verify_container && !looks_like_media(&clear) {
            return Err(ProcessingError::CorruptedSource {
                url: segment.url.to_string(),
                reason: "decrypted data is not a recognizable media container".to_string(),
            }
            .into());
        }

        trace!(sequence = segment.sequence, size = clear.len(), "Decrypted segment");
        Ok(clear)
    }
}

/// Cheap container sniffing: MPEG-TS, ISO-BMFF, ID3-tagged or ADTS audio.
pub fn looks_like_media(data: &[u8]) -> bool {
    if data.is_empty() {
        return false;
    }
    if data[0] == 0x47 {
        return true;
    }
    if data.len() >= 8
        && matches!(
            &data[4..8],
            b"ftyp" | b"styp" | b"moof" | b"moov" | b"sidx" | b"emsg" | b"free"
        )
    {
        return true;
    }
    if data.starts_with(b"ID3") {
        return true;
    }
    // ADTS sync word 0xFFF
    data.len() >= 2 && data[0] == 0xFF && (data[1] & 0xF0) == 0xF0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hls::segment::EncryptionKey;
    use crate::http::{MemoryHttpClient, MockReply};
    use cipher::BlockEncryptMut;

    type Aes128CbcEnc = cbc::Encryptor<Aes128>;

    const KEY: [u8; 16] = *b"0123456789abcdef";

    fn encrypt(plain: &[u8], iv: &[u8; 16]) -> Vec<u8> {
        let mut buf = vec![0u8; plain.len() + 16];
        buf[..plain.len()].copy_from_slice(plain);
        let len = Aes128CbcEnc::new(&KEY.into(), &(*iv).into())
            .encrypt_padded_mut::<Pkcs7>(&mut buf, plain.len())
            .unwrap()
            .len();
        buf.truncate(len);
        buf
    }

    fn encrypted_segment(sequence: u64, key_url: &str) -> Segment {
        Segment {
            url: Url::parse(&format!("https://cdn.test/{sequence}.ts")).unwrap(),
            duration: 4.0,
            sequence,
            key: Some(EncryptionKey {
                method: KeyMethod::Aes128,
                uri: Some(Url::parse(key_url).unwrap()),
                iv: None,
                key_format: None,
            }),
            byte_range: None,
            discontinuity: false,
            title: None,
        }
    }

    fn service(client: Arc<MemoryHttpClient>, offload: bool) -> DecryptionService {
        let mut config = HlsConfig::default();
        config.decryption_config.offload_decryption_to_cpu_pool = offload;
        let config = Arc::new(config);
        let keys = Arc::new(KeyFetcher::new(client, config.clone()));
        DecryptionService::new(config, keys)
    }

    #[tokio::test]
    async fn decrypts_with_sequence_iv_and_fetches_key_once() {
        let client = Arc::new(MemoryHttpClient::new());
        client.route("https://cdn.test/key.bin", MockReply::ok(&KEY[..]));
        let service = service(client.clone(), true);
        let token = CancellationToken::new();

        for sequence in [3u64, 4] {
            let segment = encrypted_segment(sequence, "https://cdn.test/key.bin");
            let plain = [&[0x47u8][..], &[sequence as u8; 187][..]].concat();
            let iv = segment.key.as_ref().unwrap().iv_for(sequence);
            let cipher_text = encrypt(&plain, &iv);

            let clear = service
                .process(&segment, Bytes::from(cipher_text), &token)
                .await
                .unwrap();
            assert_eq!(clear.as_ref(), plain.as_slice());
        }
        assert_eq!(client.request_count("https://cdn.test/key.bin"), 1);
    }

    #[tokio::test]
    async fn wrong_key_length_is_decryption_failure() {
        let client = Arc::new(MemoryHttpClient::new());
        client.route("https://cdn.test/short.key", MockReply::ok("short"));
        let service = service(client, false);
        let segment = encrypted_segment(1, "https://cdn.test/short.key");

        let err = service
            .process(&segment, Bytes::from_static(&[0u8; 32]), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "decryption_failed");
    }

    #[tokio::test]
    async fn garbage_after_decrypt_is_corrupted_source() {
        let client = Arc::new(MemoryHttpClient::new());
        client.route("https://cdn.test/key.bin", MockReply::ok(&KEY[..]));
        let service = service(client, false);
        let segment = encrypted_segment(9, "https://cdn.test/key.bin");
        let iv = segment.key.as_ref().unwrap().iv_for(9);
        let cipher_text = encrypt(b"definitely not a transport stream", &iv);

        let err = service
            .process(&segment, Bytes::from(cipher_text), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "corrupted_source");
    }

    #[tokio::test]
    async fn sample_aes_is_rejected() {
        let service = service(Arc::new(MemoryHttpClient::new()), false);
        let mut segment = encrypted_segment(1, "https://cdn.test/key.bin");
        if let Some(key) = segment.key.as_mut() {
            key.method = KeyMethod::SampleAes;
        }
        let err = service
            .process(&segment, Bytes::from_static(b"x"), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "decryption_failed");
    }

    #[test]
    fn sniffs_common_containers() {
        assert!(looks_like_media(&[0x47, 0x40, 0x00]));
        assert!(looks_like_media(b"\0\0\0\x18ftypisom"));
        assert!(looks_like_media(b"ID3\x04"));
        assert!(looks_like_media(&[0xFF, 0xF1, 0x50]));
        assert!(!looks_like_media(b"<html>"));
        assert!(!looks_like_media(&[]));
    }
}
