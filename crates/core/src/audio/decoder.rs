//! Decode capability: compressed bytes in, per-channel f32 PCM out.

use std::io::Cursor;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

use super::buffer::SharedBytes;

/// Decoded PCM, one sample vector per channel.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedPcm {
    pub channels: Vec<Vec<f32>>,
    pub sample_rate: u32,
}

impl DecodedPcm {
    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }
}

/// A black-box decoder. Returns PCM or a human-readable rejection reason.
pub trait Decoder: Send {
    fn name(&self) -> &str;

    fn decode(&self, bytes: SharedBytes) -> Result<DecodedPcm, String>;
}

/// Decoder backed by symphonia (MP3, AAC/MP4, WAV).
#[derive(Debug, Clone, Default)]
pub struct SymphoniaDecoder {
    /// Optional file extension hint ("mp3", "wav", ...).
    pub hint: Option<String>,
}

impl SymphoniaDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hint(ext: impl Into<String>) -> Self {
        Self { hint: Some(ext.into()) }
    }
}

impl Decoder for SymphoniaDecoder {
    fn name(&self) -> &str {
        "symphonia"
    }

    fn decode(&self, bytes: SharedBytes) -> Result<DecodedPcm, String> {
        let mss = MediaSourceStream::new(Box::new(Cursor::new(bytes)), Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = &self.hint {
            hint.with_extension(ext);
        }

        let probed = symphonia::default::get_probe()
            .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
            .map_err(|e| format!("Unsupported format: {}", e))?;

        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| "No audio track found".to_string())?;

        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(|e| format!("Unsupported codec: {}", e))?;

        let mut channels: Vec<Vec<f32>> = Vec::new();

        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphError::IoError(ref e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphError::ResetRequired) => break,
                Err(e) => return Err(e.to_string()),
            };

            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    let num_frames = decoded.frames();
                    if num_frames == 0 {
                        continue;
                    }
                    let n_ch = spec.channels.count();
                    if channels.is_empty() {
                        channels = vec![Vec::new(); n_ch];
                    } else if channels.len() != n_ch {
                        return Err(format!(
                            "Channel count changed mid-stream ({} -> {})",
                            channels.len(),
                            n_ch
                        ));
                    }
                    sample_rate = spec.rate;

                    let mut sample_buf = SampleBuffer::<f32>::new(num_frames as u64, spec);
                    sample_buf.copy_interleaved_ref(decoded);
                    let interleaved = sample_buf.samples();

                    // Deinterleave into per-channel vectors
                    for frame in interleaved.chunks_exact(n_ch) {
                        for (ch, &s) in frame.iter().enumerate() {
                            channels[ch].push(s);
                        }
                    }
                }
                // Corrupt packet: skip it, keep decoding
                Err(SymphError::DecodeError(e)) => {
                    log::debug!("Skipping undecodable packet: {}", e);
                    continue;
                }
                Err(e) => return Err(e.to_string()),
            }
        }

        if channels.first().map_or(true, |c| c.is_empty()) {
            return Err("No audio decoded".to_string());
        }

        Ok(DecodedPcm { channels, sample_rate })
    }
}
