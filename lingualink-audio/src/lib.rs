//! Audio upload validation and normalization.
//!
//! Every accepted upload is reduced to the canonical waveform the
//! inference backends expect: 16 kHz, mono, 16-bit signed PCM in a
//! RIFF/WAV container. Compliant WAV uploads pass through untouched;
//! everything else is transcoded by an external ffmpeg process under
//! bounded concurrency.

mod format;
mod normalizer;

pub use format::{
    AudioFormat, CANONICAL_BITS_PER_SAMPLE, CANONICAL_CHANNELS, CANONICAL_SAMPLE_RATE,
};
pub use normalizer::{
    build_transcode_args, AudioNormalizer, ConversionStats, NormalizedAudio, NormalizerConfig,
};
