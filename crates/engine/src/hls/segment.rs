//! Parsed, resolved representation of an HLS media playlist.
//!
//! Everything here is immutable once built by [`PlaylistResolver`](super::playlist::PlaylistResolver):
//! URIs are absolute, byte-range offsets are explicit and each segment carries the
//! key that is in effect for it.

use std::time::Duration;

use url::Url;

/// Absolute byte range within a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub length: u64,
    pub offset: u64,
}

impl ByteRange {
    /// Value for an HTTP `Range` request header (inclusive end).
    pub fn to_header_value(&self) -> String {
        let end = (self.offset + self.length).saturating_sub(1);
        format!("bytes={}-{}", self.offset, end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyMethod {
    None,
    Aes128,
    SampleAes,
    Other(String),
}

/// Encryption descriptor from an `EXT-X-KEY` tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionKey {
    pub method: KeyMethod,
    pub uri: Option<Url>,
    pub iv: Option<[u8; 16]>,
    pub key_format: Option<String>,
}

impl EncryptionKey {
    /// IV used for the segment with `sequence`: the explicit IV if present,
    /// otherwise the sequence number as a big-endian 128-bit integer.
    pub fn iv_for(&self, sequence: u64) -> [u8; 16] {
        match self.iv {
            Some(iv) => iv,
            None => {
                let mut iv = [0u8; 16];
                iv[8..].copy_from_slice(&sequence.to_be_bytes());
                iv
            }
        }
    }
}

/// Initialization section declared with `EXT-X-MAP` (fMP4 streams).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitSection {
    pub url: Url,
    pub byte_range: Option<ByteRange>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub url: Url,
    pub duration: f32,
    pub sequence: u64,
    /// Key in effect for this segment, if any.
    pub key: Option<EncryptionKey>,
    pub byte_range: Option<ByteRange>,
    pub discontinuity: bool,
    pub title: Option<String>,
}

impl Segment {
    pub fn is_encrypted(&self) -> bool {
        self.key
            .as_ref()
            .is_some_and(|k| k.method != KeyMethod::None)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MediaPlaylist {
    pub base_url: Url,
    pub segments: Vec<Segment>,
    /// First key declared by the playlist.
    pub key: Option<EncryptionKey>,
    pub target_duration: u64,
    pub media_sequence: u64,
    pub discontinuity_sequence: u64,
    pub end_list: bool,
    pub init: Option<InitSection>,
}

impl MediaPlaylist {
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn total_duration(&self) -> Duration {
        let secs: f64 = self.segments.iter().map(|s| f64::from(s.duration)).sum();
        Duration::from_secs_f64(secs.max(0.0))
    }

    pub fn is_encrypted(&self) -> bool {
        self.segments.iter().any(Segment::is_encrypted)
    }

    /// Sequence numbers of segments preceded by `EXT-X-DISCONTINUITY`.
    pub fn discontinuities(&self) -> Vec<u64> {
        self.segments
            .iter()
            .filter(|s| s.discontinuity)
            .map(|s| s.sequence)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn iv_defaults_to_sequence_number() {
        let key = EncryptionKey {
            method: KeyMethod::Aes128,
            uri: None,
            iv: None,
            key_format: None,
        };
        let iv = key.iv_for(0x0102);
        assert_eq!(&iv[..14], &[0u8; 14]);
        assert_eq!(&iv[14..], &[0x01, 0x02]);
    }

    #[test]
    fn range_header_is_inclusive() {
        let range = ByteRange {
            length: 100,
            offset: 200,
        };
        assert_eq!(range.to_header_value(), "bytes=200-299");
    }
}
