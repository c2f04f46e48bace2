//! Audio input: decoding, shared PCM regions, metadata.

pub mod buffer;
pub mod decoder;
pub mod metadata;

pub use buffer::{
    AudioBufferSetup, AudioInfo, AudioSource, BufferManager, SharedBytes, SharedSamples,
};
pub use decoder::{DecodedPcm, Decoder, SymphoniaDecoder};
pub use metadata::{AudioMetadata, TrackTags};
