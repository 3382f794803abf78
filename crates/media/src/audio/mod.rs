//! Audio output fan-out and the mix engine it drives.

mod core;
mod output;

pub use self::core::CoreAudio;
pub(crate) use self::core::TsInfo;
pub use output::AudioOutput;

use beam_media_info::{SpeakerLayout, MAX_AUDIO_CHANNELS, MAX_AV_PLANES};
use serde::{Deserialize, Serialize};

use crate::{AUDIO_OUTPUT_FRAMES, MAX_AUDIO_MIXES};

/// Parameters for `Engine::start_audio`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AudioSettings {
    pub samples_per_sec: u32,
    pub speakers: SpeakerLayout,
}

/// One tick's worth of PCM handed to a subscriber.
pub struct AudioData<'a> {
    pub data: [&'a [u8]; MAX_AV_PLANES],
    pub frames: u32,
    pub timestamp: u64,
}

/// Downstream audio consumer. Subscriber identity is the `Arc` itself:
/// registering the same `Arc` on the same mix twice is a no-op.
pub trait AudioSink: Send + Sync {
    fn receive_audio(&self, mix_idx: usize, data: &AudioData<'_>);
}

/// Per-mix accumulation buffer for one tick.
pub struct MixBuffer {
    pub data: Box<[[f32; AUDIO_OUTPUT_FRAMES]; MAX_AUDIO_CHANNELS]>,
}

impl MixBuffer {
    pub fn new() -> MixBuffer {
        MixBuffer {
            data: Box::new([[0.0; AUDIO_OUTPUT_FRAMES]; MAX_AUDIO_CHANNELS]),
        }
    }

    pub fn clear(&mut self) {
        for channel in self.data.iter_mut() {
            channel.fill(0.0);
        }
    }
}

impl Default for MixBuffer {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn new_mix_buffers() -> [MixBuffer; MAX_AUDIO_MIXES] {
    std::array::from_fn(|_| MixBuffer::new())
}

/// The engine side of the mix thread: fills the tick's mixes and decides
/// whether the tick is delivered.
pub(crate) trait AudioMixer: Send + Sync {
    /// Returns `Some(out_ts)` when this tick's mixes should reach
    /// subscribers, `None` while buffering suppresses delivery.
    fn mix_tick(
        &self,
        start_ts: u64,
        end_ts: u64,
        active_mixers: u32,
        mixes: &mut [MixBuffer; MAX_AUDIO_MIXES],
    ) -> Option<u64>;
}
