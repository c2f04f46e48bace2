//! Shared PCM regions and the buffer manager that fills them.
//!
//! Decoded channels are stored as reference-counted slices so the controller
//! and the executor read the same memory. Once a setup is built its regions
//! are never written again; a new load builds fresh regions instead.

use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::BufferError;

use super::decoder::{DecodedPcm, Decoder};

/// Shared, read-only byte region.
pub type SharedBytes = Arc<[u8]>;

/// Shared, read-only f32 sample region (one channel).
pub type SharedSamples = Arc<[f32]>;

/// Where input audio comes from.
#[derive(Debug, Clone)]
pub enum AudioSource {
    Bytes(Vec<u8>),
    File(PathBuf),
    /// Fetched over HTTP. Requires the `remote` feature.
    Url(String),
}

impl AudioSource {
    /// File extension, used as a decoder hint.
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            AudioSource::Bytes(_) => return None,
            AudioSource::File(path) => path.extension()?.to_str()?.to_string(),
            AudioSource::Url(url) => {
                let path = url.split(['?', '#']).next()?;
                let last = path.rsplit('/').next()?;
                let (_, ext) = last.rsplit_once('.')?;
                ext.to_string()
            }
        };
        Some(name.to_ascii_lowercase())
    }

    /// Obtain the raw bytes. Any failure here is a load error.
    pub fn read_bytes(&self) -> Result<Vec<u8>, BufferError> {
        match self {
            AudioSource::Bytes(bytes) => Ok(bytes.clone()),
            AudioSource::File(path) => std::fs::read(path)
                .map_err(|e| BufferError::Load(format!("{}: {}", path.display(), e))),
            AudioSource::Url(url) => fetch_url(url),
        }
    }
}

#[cfg(feature = "remote")]
fn fetch_url(url: &str) -> Result<Vec<u8>, BufferError> {
    let response =
        reqwest::blocking::get(url).map_err(|e| BufferError::Load(format!("{}: {}", url, e)))?;
    if !response.status().is_success() {
        return Err(BufferError::Load(format!("{}: HTTP {}", url, response.status())));
    }
    let body = response
        .bytes()
        .map_err(|e| BufferError::Load(format!("{}: {}", url, e)))?;
    Ok(body.to_vec())
}

#[cfg(not(feature = "remote"))]
fn fetch_url(url: &str) -> Result<Vec<u8>, BufferError> {
    Err(BufferError::Load(format!(
        "{}: remote sources need the `remote` feature",
        url
    )))
}

/// Shape of a decoded buffer, without the sample data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub num_channels: usize,
    pub num_samples: usize,
    pub sample_rate: u32,
    pub duration_s: f64,
}

/// Fully decoded audio, packaged as shared regions.
///
/// `channels.len()` is the channel count and every channel holds exactly
/// `num_samples` samples.
#[derive(Debug, Clone)]
pub struct AudioBufferSetup {
    /// Unmodified copy of the input, kept for metadata re-extraction.
    pub raw_input: SharedBytes,
    pub channels: Vec<SharedSamples>,
    pub num_samples: usize,
    pub sample_rate: u32,
    pub duration_s: f64,
}

impl AudioBufferSetup {
    /// Package decoded PCM into shared regions, validating its shape.
    pub fn from_pcm(raw_input: SharedBytes, pcm: DecodedPcm) -> Result<Self, BufferError> {
        if pcm.channels.is_empty() {
            return Err(BufferError::Decode("decoder returned no channels".into()));
        }
        if pcm.sample_rate == 0 {
            return Err(BufferError::Decode("decoder returned a zero sample rate".into()));
        }
        let num_samples = pcm.channels[0].len();
        if let Some((ch, bad)) = pcm
            .channels
            .iter()
            .enumerate()
            .find(|(_, c)| c.len() != num_samples)
        {
            return Err(BufferError::Decode(format!(
                "channel {} has {} samples, expected {}",
                ch,
                bad.len(),
                num_samples
            )));
        }

        let channels: Vec<SharedSamples> = pcm
            .channels
            .into_iter()
            .enumerate()
            .map(|(ch, samples)| {
                let region: SharedSamples = Arc::from(samples);
                log::debug!(
                    "Allocated channel {} region: {} bytes",
                    ch,
                    region.len() * std::mem::size_of::<f32>()
                );
                region
            })
            .collect();

        Ok(Self {
            raw_input,
            channels,
            num_samples,
            sample_rate: pcm.sample_rate,
            duration_s: num_samples as f64 / pcm.sample_rate as f64,
        })
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn info(&self) -> AudioInfo {
        AudioInfo {
            num_channels: self.channels.len(),
            num_samples: self.num_samples,
            sample_rate: self.sample_rate,
            duration_s: self.duration_s,
        }
    }

    pub fn raw_input_size(&self) -> usize {
        self.raw_input.len()
    }

    /// Byte length of each channel region.
    pub fn channel_byte_len(&self) -> usize {
        self.num_samples * std::mem::size_of::<f32>()
    }

    /// Number of shared regions held: raw input plus one per channel.
    pub fn region_count(&self) -> usize {
        self.channels.len() + 1
    }

    /// True if both setups reference the same underlying regions.
    pub fn shares_regions_with(&self, other: &AudioBufferSetup) -> bool {
        Arc::ptr_eq(&self.raw_input, &other.raw_input)
            && self.channels.len() == other.channels.len()
            && self
                .channels
                .iter()
                .zip(&other.channels)
                .all(|(a, b)| Arc::ptr_eq(a, b))
    }
}

/// Turns input bytes into an [`AudioBufferSetup`] using a [`Decoder`].
pub struct BufferManager {
    decoder: Box<dyn Decoder>,
}

impl BufferManager {
    pub fn new(decoder: Box<dyn Decoder>) -> Self {
        Self { decoder }
    }

    pub fn decoder_name(&self) -> &str {
        self.decoder.name()
    }

    /// Obtain bytes from `source` and decode them.
    pub fn load(&self, source: &AudioSource) -> Result<AudioBufferSetup, BufferError> {
        let bytes = source.read_bytes()?;
        self.decode(bytes)
    }

    /// Decode raw bytes. Either a fully populated setup or an error;
    /// nothing is retained on failure.
    pub fn decode(&self, bytes: Vec<u8>) -> Result<AudioBufferSetup, BufferError> {
        if bytes.is_empty() {
            return Err(BufferError::Load("input is empty".into()));
        }
        let raw_input: SharedBytes = Arc::from(bytes);
        self.decode_shared(raw_input)
    }

    /// Decode bytes that already live in a shared region.
    pub fn decode_shared(&self, raw_input: SharedBytes) -> Result<AudioBufferSetup, BufferError> {
        let pcm = self
            .decoder
            .decode(raw_input.clone())
            .map_err(BufferError::Decode)?;
        let setup = AudioBufferSetup::from_pcm(raw_input, pcm)?;
        log::info!(
            "Decoded ({}): {} channels, {} samples @ {}Hz ({:.2}s)",
            self.decoder.name(),
            setup.num_channels(),
            setup.num_samples,
            setup.sample_rate,
            setup.duration_s
        );
        Ok(setup)
    }
}
