//! Timeline-synchronized mixing core.
//!
//! Sources push PCM and pixel data in from any thread; the audio mix engine
//! ticks on a fixed cadence and the compositor paces itself to the output
//! frame rate. Results fan out to subscribers (raw consumers, encoders)
//! through the audio/video outputs.

use std::borrow::Cow;

pub mod audio;
pub mod clock;
pub mod engine;
pub mod event;
pub mod registry;
pub mod resample;
pub mod ring;
pub mod scale;
pub mod source;
pub mod video;

pub use audio::{AudioData, AudioSettings, AudioSink, CoreAudio};
pub use engine::Engine;
pub use registry::{SourceKind, SourceRegistry};
pub use resample::{AudioResampler, ResampledAudio, ResamplerProvider, SoftwareResamplers};
pub use scale::{ScalerProvider, SoftwareScalers, VideoScaler};
pub use source::{
    AspectRatioMode, RenderBox, Source, SourceAudioFrame, SourceVideoFrame, SourceVideoInput,
};
pub use video::{CoreVideo, GpuEncoderSink, VideoData, VideoSettings, VideoSink};

/// Samples per mix tick at the output sample rate.
pub const AUDIO_OUTPUT_FRAMES: usize = 1024;

/// Number of independent downstream mixes.
pub const MAX_AUDIO_MIXES: usize = 6;

/// Ceiling on injected buffering, in ticks.
pub const MAX_BUFFERING_TICKS: i32 = 45;

/// Longest async frame backlog before the queue is flushed.
pub const MAX_ASYNC_FRAMES: usize = 30;

/// Slots in the video output frame cache.
pub const VIDEO_CACHE_SIZE: usize = 16;

/// Rotating conversion buffers per video subscriber.
pub const MAX_CONVERT_BUFFERS: usize = 3;

/// Per-channel cap on buffered source audio, in bytes.
pub const MAX_BUF_SIZE: usize = 1000 * AUDIO_OUTPUT_FRAMES * 4;

/* maximum timestamp variance in nanoseconds */
pub(crate) const MAX_TS_VAR: u64 = 2_000_000_000;

/* time threshold in nanoseconds to ensure audio timing is as seamless as
 * possible */
pub(crate) const TS_SMOOTHING_THRESHOLD: u64 = 70_000_000;

pub(crate) const MAX_AUDIO_SIZE: usize = AUDIO_OUTPUT_FRAMES * 4;

pub(crate) const MAX_UNUSED_FRAME_DURATION: u32 = 5;

#[derive(thiserror::Error, Debug)]
pub enum MediaError {
    #[error("{0}")]
    Any(Cow<'static, str>),

    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    #[error("output is already active")]
    AlreadyActive,

    #[error("conversion between these formats is not supported")]
    BadConversion,

    #[error("failed to create resampler")]
    ResamplerCreate,

    #[error("failed to create scaler")]
    ScalerCreate,

    #[error("texture sharing is unavailable on this device")]
    TextureShareUnavailable,

    #[error("source does not accept this input")]
    WrongSourceKind,

    #[error("graphics: {0}")]
    Gfx(#[from] beam_gfx::GfxError),
}

pub(crate) fn uint64_diff(ts1: u64, ts2: u64) -> u64 {
    if ts1 < ts2 {
        ts2 - ts1
    } else {
        ts1 - ts2
    }
}
