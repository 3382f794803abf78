//! Sources: per-source audio timing state and the async video path.

mod audio;
mod video;

pub use video::{AspectRatioMode, RenderBox, SourceVideoFrame, SourceVideoInput};

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use beam_gfx::{math, Mat4, Texture};
use beam_media_info::{
    AudioFormat, AudioInfo, SpeakerLayout, MAX_AUDIO_CHANNELS, MAX_AV_PLANES,
};
use parking_lot::Mutex;

use crate::audio::CoreAudio;
use crate::registry::SourceKind;
use crate::resample::AudioResampler;
use crate::ring::ChannelRing;
use crate::video::CoreVideo;
use crate::{AUDIO_OUTPUT_FRAMES, MAX_AUDIO_MIXES};

/// A frame of PCM handed in by the host, in the source's own format.
pub struct SourceAudioFrame<'a> {
    pub data: [&'a [u8]; MAX_AV_PLANES],
    pub frames: u32,
    pub speakers: SpeakerLayout,
    pub format: AudioFormat,
    pub samples_per_sec: u32,
    pub timestamp: u64,
}

/// Producer-side audio timing state. Only the thread pushing audio into
/// this source touches it.
pub(crate) struct AudioTiming {
    pub sample_info: Option<AudioInfo>,
    pub resampler: Option<Box<dyn AudioResampler>>,
    pub resample_offset: u64,
    pub audio_failed: bool,
    pub last_audio_ts: u64,
    pub next_audio_ts_min: u64,
    pub next_audio_sys_ts_min: u64,
    pub last_sync_offset: i64,
}

/// Buffered PCM shared between the producer and the mix thread.
pub(crate) struct AudioRings {
    pub bufs: [ChannelRing; MAX_AUDIO_CHANNELS],
    pub last_size: usize,
    pub pending_stop: bool,
}

/// Per-mix scratch the mix thread renders this source's window into.
pub(crate) struct MixScratch {
    data: Vec<f32>,
}

impl MixScratch {
    fn new(enabled: bool) -> MixScratch {
        let len = if enabled {
            MAX_AUDIO_MIXES * MAX_AUDIO_CHANNELS * AUDIO_OUTPUT_FRAMES
        } else {
            0
        };
        MixScratch {
            data: vec![0.0; len],
        }
    }

    pub fn enabled(&self) -> bool {
        !self.data.is_empty()
    }

    pub fn channel(&self, mix: usize, ch: usize) -> &[f32] {
        let start = (mix * MAX_AUDIO_CHANNELS + ch) * AUDIO_OUTPUT_FRAMES;
        &self.data[start..start + AUDIO_OUTPUT_FRAMES]
    }

    pub fn channel_mut(&mut self, mix: usize, ch: usize) -> &mut [f32] {
        let start = (mix * MAX_AUDIO_CHANNELS + ch) * AUDIO_OUTPUT_FRAMES;
        &mut self.data[start..start + AUDIO_OUTPUT_FRAMES]
    }

    /// Duplicate mix 0's staged channel into another mix slot.
    pub fn copy_from_mix0(&mut self, mix: usize, ch: usize, frames: usize) {
        debug_assert!(mix >= 1);
        let src_start = ch * AUDIO_OUTPUT_FRAMES;
        let dst_start = (mix * MAX_AUDIO_CHANNELS + ch) * AUDIO_OUTPUT_FRAMES;
        let (head, tail) = self.data.split_at_mut(dst_start);
        tail[..frames].copy_from_slice(&head[src_start..src_start + frames]);
    }

    pub fn zero_all(&mut self) {
        self.data.fill(0.0);
    }
}

pub struct Source {
    id: u64,
    owner: u64,
    kind: SourceKind,

    pub(crate) core_audio: Weak<CoreAudio>,
    pub(crate) core_video: Weak<CoreVideo>,

    /* timing (if video is present, it drives the adjustment) */
    pub(crate) timing_set: AtomicBool,
    pub(crate) timing_adjust: AtomicU64,

    audio_ts_ns: AtomicU64,
    audio_pending: AtomicBool,
    muted: AtomicBool,
    volume_bits: AtomicU32,
    sync_offset_ns: AtomicI64,
    audio_mixers: AtomicU32,

    pub(crate) timing: Mutex<AudioTiming>,
    pub(crate) rings: Mutex<AudioRings>,
    pub(crate) scratch: Mutex<MixScratch>,

    pub(crate) async_video: Mutex<video::AsyncVideoState>,
    pub(crate) video_meta: Mutex<video::VideoMetaCache>,
    pub(crate) sync_texture: Mutex<Option<Arc<dyn Texture>>>,

    pub(crate) transform: Mutex<TransformSettings>,
    pub(crate) should_update_transform: AtomicBool,
    pub(crate) gpu: Mutex<video::SourceGpu>,
}

pub(crate) struct TransformSettings {
    pub pos: [f32; 2],
    pub scale: [f32; 2],
    pub rotation_deg: f32,
    pub flip_h: bool,
    pub flip_v: bool,
    pub render_box: Option<RenderBox>,
}

impl Source {
    pub(crate) fn new(
        id: u64,
        owner: u64,
        kind: SourceKind,
        core_audio: Weak<CoreAudio>,
        core_video: Weak<CoreVideo>,
    ) -> Arc<Source> {
        Arc::new(Source {
            id,
            owner,
            kind,
            core_audio,
            core_video,
            timing_set: AtomicBool::new(false),
            timing_adjust: AtomicU64::new(0),
            audio_ts_ns: AtomicU64::new(0),
            audio_pending: AtomicBool::new(false),
            muted: AtomicBool::new(false),
            volume_bits: AtomicU32::new(1.0f32.to_bits()),
            sync_offset_ns: AtomicI64::new(0),
            audio_mixers: AtomicU32::new(0xFF),
            timing: Mutex::new(AudioTiming {
                sample_info: None,
                resampler: None,
                resample_offset: 0,
                audio_failed: false,
                last_audio_ts: 0,
                next_audio_ts_min: 0,
                next_audio_sys_ts_min: 0,
                last_sync_offset: 0,
            }),
            rings: Mutex::new(AudioRings {
                bufs: std::array::from_fn(|_| ChannelRing::new()),
                last_size: 0,
                pending_stop: false,
            }),
            scratch: Mutex::new(MixScratch::new(kind.has_audio())),
            async_video: Mutex::new(video::AsyncVideoState::new()),
            video_meta: Mutex::new(video::VideoMetaCache::new()),
            sync_texture: Mutex::new(None),
            transform: Mutex::new(TransformSettings {
                pos: [0.0, 0.0],
                scale: [1.0, 1.0],
                rotation_deg: 0.0,
                flip_h: false,
                flip_v: false,
                render_box: None,
            }),
            should_update_transform: AtomicBool::new(false),
            gpu: Mutex::new(video::SourceGpu::new()),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn owner(&self) -> u64 {
        self.owner
    }

    pub fn kind(&self) -> SourceKind {
        self.kind
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume_bits.store(volume.to_bits(), Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume_bits.load(Ordering::Acquire))
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Release);
    }

    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Acquire)
    }

    /// Shift this source's audio against the shared timeline, in ns.
    pub fn set_sync_offset(&self, offset_ns: i64) {
        self.sync_offset_ns.store(offset_ns, Ordering::Release);
    }

    pub fn sync_offset(&self) -> i64 {
        self.sync_offset_ns.load(Ordering::Acquire)
    }

    /// Which downstream mixes this source participates in.
    pub fn set_mixer_mask(&self, mask: u32) {
        self.audio_mixers.store(mask, Ordering::Release);
    }

    pub fn mixer_mask(&self) -> u32 {
        self.audio_mixers.load(Ordering::Acquire)
    }

    pub(crate) fn audio_ts(&self) -> u64 {
        self.audio_ts_ns.load(Ordering::Acquire)
    }

    /// Only call while holding the ring lock.
    pub(crate) fn set_audio_ts(&self, ts: u64) {
        self.audio_ts_ns.store(ts, Ordering::Release);
    }

    pub(crate) fn audio_pending(&self) -> bool {
        self.audio_pending.load(Ordering::Acquire)
    }

    pub(crate) fn set_audio_pending(&self, pending: bool) {
        self.audio_pending.store(pending, Ordering::Release);
    }

    pub fn set_pos(&self, x: f32, y: f32) {
        let mut transform = self.transform.lock();
        transform.pos = [x, y];
        self.should_update_transform.store(true, Ordering::Release);
    }

    pub fn set_scale(&self, width_scale: f32, height_scale: f32) {
        let mut transform = self.transform.lock();
        transform.scale = [width_scale, height_scale];
        self.should_update_transform.store(true, Ordering::Release);
    }

    pub fn set_rotation(&self, degrees: f32) {
        let mut transform = self.transform.lock();
        transform.rotation_deg = degrees;
        self.should_update_transform.store(true, Ordering::Release);
    }

    /// Mirror the source when drawn, on top of any per-frame flip.
    pub fn set_flip(&self, horizontal: bool, vertical: bool) {
        let mut transform = self.transform.lock();
        transform.flip_h = horizontal;
        transform.flip_v = vertical;
        self.should_update_transform.store(true, Ordering::Release);
    }

    pub fn set_render_box(&self, x: i32, y: i32, width: i32, height: i32, mode: AspectRatioMode) {
        if width == 0 || height == 0 {
            tracing::info!("invalid render box settings, width:{width}, height: {height}.");
            return;
        }

        let mut transform = self.transform.lock();
        transform.render_box = Some(RenderBox {
            x,
            y,
            width,
            height,
            mode,
        });
        self.should_update_transform.store(true, Ordering::Release);
    }

    pub(crate) fn base_transform(transform: &TransformSettings) -> Mat4 {
        let mat = math::translate(math::IDENTITY, transform.pos[0], transform.pos[1]);
        let mat = math::rotate_deg(mat, transform.rotation_deg);
        math::scale(mat, transform.scale[0], transform.scale[1])
    }
}
