//! Metadata re-extracted from the raw input region.

use std::io::Cursor;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{MetadataOptions, MetadataRevision, StandardTagKey};
use symphonia::core::probe::Hint;

use super::buffer::{AudioBufferSetup, SharedBytes};

/// Bits per decoded sample (PCM is stored as f32).
const DECODED_BITS_PER_SAMPLE: u64 = 32;

/// Descriptive tags from the container (ID3 etc.).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub year: Option<i32>,
    /// Tag format, e.g. "ID3v2.4" or "RIFF INFO" when known.
    pub format: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioMetadata {
    pub sample_rate: u32,
    pub channels: usize,
    pub num_samples: usize,
    pub duration_ms: u64,
    /// Bitrate of the decoded PCM stream in bits/s.
    pub decoded_bitrate: u64,
    /// SHA-256 of the raw input, hex encoded.
    pub content_hash: String,
    pub tags: TrackTags,
}

impl AudioMetadata {
    pub fn from_setup(setup: &AudioBufferSetup) -> Self {
        let duration_ms = if setup.sample_rate == 0 {
            0
        } else {
            setup.num_samples as u64 * 1000 / setup.sample_rate as u64
        };
        Self {
            sample_rate: setup.sample_rate,
            channels: setup.num_channels(),
            num_samples: setup.num_samples,
            duration_ms,
            decoded_bitrate: setup.sample_rate as u64
                * setup.num_channels() as u64
                * DECODED_BITS_PER_SAMPLE,
            content_hash: content_hash(&setup.raw_input),
            tags: read_tags(setup.raw_input.clone()),
        }
    }
}

/// SHA-256 of a byte region as a 64-character hex string.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Read container tags. Unreadable input yields empty tags.
pub fn read_tags(raw: SharedBytes) -> TrackTags {
    let mss = MediaSourceStream::new(Box::new(Cursor::new(raw)), Default::default());
    let mut probed = match symphonia::default::get_probe().format(
        &Hint::new(),
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(p) => p,
        Err(e) => {
            log::debug!("No readable container for tags: {}", e);
            return TrackTags::default();
        }
    };

    let mut tags = TrackTags::default();

    // Tags found while probing (ID3v2 ahead of the stream)
    if let Some(metadata) = probed.metadata.get() {
        if let Some(rev) = metadata.current() {
            merge_revision(&mut tags, rev);
        }
    }
    // Tags carried inside the container itself
    if let Some(rev) = probed.format.metadata().current() {
        merge_revision(&mut tags, rev);
    }

    tags
}

fn merge_revision(tags: &mut TrackTags, rev: &MetadataRevision) {
    for tag in rev.tags() {
        let value = tag.value.to_string();
        let value = value.trim();
        if value.is_empty() {
            continue;
        }
        match tag.std_key {
            Some(StandardTagKey::TrackTitle) => set_once(&mut tags.title, value),
            Some(StandardTagKey::Artist) => set_once(&mut tags.artist, value),
            Some(StandardTagKey::Album) => set_once(&mut tags.album, value),
            Some(StandardTagKey::Date)
            | Some(StandardTagKey::ReleaseDate)
            | Some(StandardTagKey::OriginalDate) => {
                if tags.year.is_none() {
                    tags.year = parse_year(value);
                }
            }
            Some(StandardTagKey::Encoder) => set_once(&mut tags.format, value),
            _ => {}
        }
    }
}

fn set_once(slot: &mut Option<String>, value: &str) {
    if slot.is_none() {
        *slot = Some(value.to_string());
    }
}

/// Leading four-digit year of a date tag ("1999", "1999-04-01").
fn parse_year(value: &str) -> Option<i32> {
    let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.len() == 4 {
        digits.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::tests::{stereo_pcm, FixedDecoder};
    use crate::audio::buffer::BufferManager;
    use crate::audio::decoder::tests::wav_bytes;
    use std::sync::Arc;

    #[test]
    fn test_metadata_from_setup() {
        let manager = BufferManager::new(Box::new(FixedDecoder(Ok(stereo_pcm(250)))));
        let setup = manager.decode(b"hello world".to_vec()).unwrap();
        let meta = AudioMetadata::from_setup(&setup);

        assert_eq!(meta.sample_rate, 100);
        assert_eq!(meta.channels, 2);
        assert_eq!(meta.num_samples, 250);
        assert_eq!(meta.duration_ms, 2500);
        assert_eq!(meta.decoded_bitrate, 100 * 2 * 32);
        assert_eq!(
            meta.content_hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(meta.tags, TrackTags::default());
    }

    #[test]
    fn test_untagged_wav_has_no_tags() {
        let bytes = wav_bytes(1, 8000, &[0; 64]);
        let tags = read_tags(Arc::from(bytes));
        assert!(tags.title.is_none());
        assert!(tags.artist.is_none());
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year("1999"), Some(1999));
        assert_eq!(parse_year("2004-05-12"), Some(2004));
        assert_eq!(parse_year("'99"), None);
        assert_eq!(parse_year(""), None);
    }

    #[test]
    fn test_metadata_serializes() {
        let manager = BufferManager::new(Box::new(FixedDecoder(Ok(stereo_pcm(10)))));
        let setup = manager.decode(vec![1]).unwrap();
        let json = serde_json::to_value(AudioMetadata::from_setup(&setup)).unwrap();
        assert_eq!(json["channels"], 2);
        assert!(json["tags"]["title"].is_null());
    }
}
