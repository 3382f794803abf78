//! The mix engine: window bookkeeping, lagging-source detection and
//! adaptive buffering around each tick of the audio output thread.

use std::collections::VecDeque;
use std::sync::{Arc, OnceLock, Weak};

use beam_media_info::{audio_frames_to_ns, ns_to_audio_frames, AudioInfo};
use parking_lot::Mutex;
use tracing::{info, warn};

use super::output::{output_format, AudioOutput};
use super::{AudioMixer, AudioSettings, MixBuffer};
use crate::registry::SourceRegistry;
use crate::resample::ResamplerProvider;
use crate::source::Source;
use crate::{MediaError, AUDIO_OUTPUT_FRAMES, MAX_AUDIO_MIXES, MAX_BUFFERING_TICKS};

/// One pending mix window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TsInfo {
    pub start: u64,
    pub end: u64,
}

#[derive(Default)]
struct BufferingState {
    buffered_timestamps: VecDeque<TsInfo>,
    buffered_ts: u64,
    buffering_wait_ticks: u64,
    total_buffering_ticks: i32,
}

pub struct CoreAudio {
    registry: Arc<SourceRegistry>,
    resamplers: Arc<dyn ResamplerProvider>,
    audio: OnceLock<Arc<AudioOutput>>,
    state: Mutex<BufferingState>,
}

impl CoreAudio {
    pub(crate) fn start(
        registry: Arc<SourceRegistry>,
        settings: &AudioSettings,
        resamplers: Arc<dyn ResamplerProvider>,
    ) -> Result<Arc<CoreAudio>, MediaError> {
        let info =
            AudioInfo::try_new(settings.samples_per_sec, output_format(), settings.speakers)
                .map_err(|_| MediaError::InvalidParameter("audio settings"))?;

        let core = Arc::new(CoreAudio {
            registry,
            resamplers: resamplers.clone(),
            audio: OnceLock::new(),
            state: Mutex::new(BufferingState::default()),
        });

        let mixer_arc: Arc<dyn AudioMixer> = core.clone();
        let mixer: Weak<dyn AudioMixer> = Arc::downgrade(&mixer_arc);
        let output = AudioOutput::open(info, mixer, resamplers)?;
        let _ = core.audio.set(output);

        Ok(core)
    }

    /// Core without the cadence thread; `mix_tick` is driven by the caller.
    #[cfg(test)]
    pub(crate) fn start_detached(
        registry: Arc<SourceRegistry>,
        settings: &AudioSettings,
        resamplers: Arc<dyn ResamplerProvider>,
    ) -> Result<Arc<CoreAudio>, MediaError> {
        let info = AudioInfo::new(settings.samples_per_sec, output_format(), settings.speakers);
        let core = Arc::new(CoreAudio {
            registry,
            resamplers: resamplers.clone(),
            audio: OnceLock::new(),
            state: Mutex::new(BufferingState::default()),
        });

        let mixer_arc: Arc<dyn AudioMixer> = core.clone();
        let mixer: Weak<dyn AudioMixer> = Arc::downgrade(&mixer_arc);
        let output = AudioOutput::open_detached(info, mixer, resamplers)?;
        let _ = core.audio.set(output);

        Ok(core)
    }

    pub fn output(&self) -> &Arc<AudioOutput> {
        self.audio.get().expect("core audio started")
    }

    pub(crate) fn resamplers(&self) -> &Arc<dyn ResamplerProvider> {
        &self.resamplers
    }

    pub fn stop(&self) {
        if let Some(output) = self.audio.get() {
            output.close();
        }
        *self.state.lock() = BufferingState::default();
    }

    pub fn total_buffering_ticks(&self) -> i32 {
        self.state.lock().total_buffering_ticks
    }

    fn find_min_ts(sources: &[Arc<Source>], min_ts: &mut u64) {
        for source in sources {
            let ts = source.audio_ts();
            if !source.audio_pending() && ts != 0 && ts < *min_ts {
                *min_ts = ts;
            }
        }
    }

    fn mark_invalid_sources(sources: &[Arc<Source>], sample_rate: u32, min_ts: u64) -> bool {
        let mut recalculate = false;
        for source in sources {
            recalculate |= source.audio_buffer_insufficient(sample_rate, min_ts);
        }
        recalculate
    }

    fn calc_min_ts(sources: &[Arc<Source>], sample_rate: u32, min_ts: &mut u64) {
        Self::find_min_ts(sources, min_ts);
        if Self::mark_invalid_sources(sources, sample_rate, *min_ts) {
            Self::find_min_ts(sources, min_ts);
        }
    }

    fn add_audio_buffering(
        &self,
        state: &mut BufferingState,
        sample_rate: u32,
        ts: &mut TsInfo,
        min_ts: u64,
    ) {
        if state.total_buffering_ticks == MAX_BUFFERING_TICKS {
            return;
        }

        if state.buffering_wait_ticks == 0 {
            state.buffered_ts = ts.start;
        }

        let offset = ts.start - min_ts;
        let frames = ns_to_audio_frames(sample_rate, offset);
        let mut ticks =
            ((frames + AUDIO_OUTPUT_FRAMES as u64 - 1) / AUDIO_OUTPUT_FRAMES as u64) as i32;

        state.total_buffering_ticks += ticks;

        if state.total_buffering_ticks >= MAX_BUFFERING_TICKS {
            ticks -= state.total_buffering_ticks - MAX_BUFFERING_TICKS;
            state.total_buffering_ticks = MAX_BUFFERING_TICKS;
            warn!("Max audio buffering reached!");
        }

        let ms = ticks as u64 * AUDIO_OUTPUT_FRAMES as u64 * 1000 / sample_rate as u64;
        let total_ms = state.total_buffering_ticks as u64 * AUDIO_OUTPUT_FRAMES as u64 * 1000
            / sample_rate as u64;

        info!(
            "adding {ms} milliseconds of audio buffering, total audio buffering is now {total_ms} milliseconds"
        );

        let mut new_ts = TsInfo {
            start: state.buffered_ts
                - audio_frames_to_ns(
                    sample_rate,
                    state.buffering_wait_ticks * AUDIO_OUTPUT_FRAMES as u64,
                ),
            end: 0,
        };

        while ticks > 0 {
            ticks -= 1;
            state.buffering_wait_ticks += 1;
            let cur_ticks = state.buffering_wait_ticks;

            new_ts.end = new_ts.start;
            new_ts.start = state.buffered_ts
                - audio_frames_to_ns(sample_rate, cur_ticks * AUDIO_OUTPUT_FRAMES as u64);

            state.buffered_timestamps.push_front(new_ts);
        }

        *ts = new_ts;
    }
}

impl AudioMixer for CoreAudio {
    fn mix_tick(
        &self,
        start_ts: u64,
        end_ts: u64,
        active_mixers: u32,
        mixes: &mut [MixBuffer; MAX_AUDIO_MIXES],
    ) -> Option<u64> {
        let output = self.output();
        let sample_rate = output.sample_rate();
        let channels = output.channels();
        let audio_size = AUDIO_OUTPUT_FRAMES * std::mem::size_of::<f32>();

        let mut state = self.state.lock();
        state.buffered_timestamps.push_back(TsInfo {
            start: start_ts,
            end: end_ts,
        });
        let mut ts = *state.buffered_timestamps.front().expect("window pushed");
        let mut min_ts = ts.start;

        let sources = self.registry.audio_sources();

        /* ------------------------------------------------ */
        /* render audio data */
        for source in &sources {
            source.audio_render(active_mixers, channels, sample_rate, audio_size);
        }

        /* ------------------------------------------------ */
        /* get minimum audio timestamp */
        Self::calc_min_ts(&sources, sample_rate, &mut min_ts);

        /* ------------------------------------------------ */
        /* if a source has gone backward in time, buffer */
        if min_ts < ts.start {
            self.add_audio_buffering(&mut state, sample_rate, &mut ts, min_ts);
        }

        /* ------------------------------------------------ */
        /* mix audio */
        if state.buffering_wait_ticks == 0 {
            for source in &sources {
                if source.audio_pending() {
                    continue;
                }
                source.mix_audio(mixes, channels, sample_rate, &ts);
            }
        }

        /* ------------------------------------------------ */
        /* discard audio */
        for source in &sources {
            source.discard_audio(state.total_buffering_ticks, channels, sample_rate, &ts);
        }

        state.buffered_timestamps.pop_front();

        let out_ts = ts.start;

        if state.buffering_wait_ticks > 0 {
            state.buffering_wait_ticks -= 1;
            return None;
        }

        Some(out_ts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::new_mix_buffers;
    use crate::registry::SourceKind;
    use crate::resample::SoftwareResamplers;
    use crate::source::SourceAudioFrame;
    use crate::{clock, AUDIO_OUTPUT_FRAMES};
    use beam_media_info::{AudioFormat, SpeakerLayout, MAX_AV_PLANES};
    use std::sync::atomic::Ordering;

    const RATE: u32 = 48_000;
    const TICK_NS: u64 = audio_frames_to_ns(RATE, AUDIO_OUTPUT_FRAMES as u64);

    fn test_core() -> (Arc<SourceRegistry>, Arc<CoreAudio>) {
        let registry = Arc::new(SourceRegistry::new());
        let core = CoreAudio::start_detached(
            registry.clone(),
            &AudioSettings {
                samples_per_sec: RATE,
                speakers: SpeakerLayout::Stereo,
            },
            Arc::new(SoftwareResamplers),
        )
        .unwrap();
        (registry, core)
    }

    fn make_source(registry: &Arc<SourceRegistry>, core: &Arc<CoreAudio>, id: u64) -> Arc<Source> {
        let source = Source::new(id, 1, SourceKind::Audio, Arc::downgrade(core), std::sync::Weak::new());
        registry.register(1, id, SourceKind::Audio, source.clone());
        source
    }

    fn plane(value: f32, frames: usize) -> Vec<u8> {
        let samples = vec![value; frames];
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn push_pcm(source: &Source, value: f32, frames: u32, timestamp: u64) {
        let bytes = plane(value, frames as usize);
        let mut frame = SourceAudioFrame {
            data: [&[]; MAX_AV_PLANES],
            frames,
            speakers: SpeakerLayout::Stereo,
            format: AudioFormat::F32Planar,
            samples_per_sec: RATE,
            timestamp,
        };
        frame.data[0] = &bytes;
        frame.data[1] = &bytes;
        source.output_audio(&frame);
    }

    #[test]
    fn silent_source_ticks_monotonically() {
        let (registry, core) = test_core();
        let _source = make_source(&registry, &core, 1);

        let base = clock::now_ns();
        let mut mixes = new_mix_buffers();
        let mut outputs = Vec::new();

        for k in 0..10u64 {
            let start = base + k * TICK_NS;
            let out = core.mix_tick(start, start + TICK_NS, 1, &mut mixes);
            outputs.push(out.expect("silence must not suppress delivery"));
        }

        for pair in outputs.windows(2) {
            assert_eq!(pair[1] - pair[0], TICK_NS);
        }
        assert!(mixes[0].data[0].iter().all(|&s| s == 0.0));
        assert_eq!(core.total_buffering_ticks(), 0);
    }

    #[test]
    fn direct_timestamps_set_no_adjustment() {
        let (registry, core) = test_core();
        let source = make_source(&registry, &core, 1);

        let base = clock::now_ns();
        for k in 0..4u64 {
            push_pcm(&source, 0.25, AUDIO_OUTPUT_FRAMES as u32, base + k * TICK_NS);
        }

        assert_eq!(source.timing_adjust.load(Ordering::Acquire), 0);
        assert!(source.timing_set.load(Ordering::Acquire));
        assert_eq!(source.audio_ts(), base);
        assert_eq!(source.timing.lock().last_audio_ts, base + 3 * TICK_NS);

        /* channel sizes stay identical across all public operations */
        let rings = source.rings.lock();
        assert_eq!(rings.bufs[0].len(), 4 * AUDIO_OUTPUT_FRAMES * 4);
        assert_eq!(rings.bufs[0].len(), rings.bufs[1].len());
        drop(rings);

        /* a tick whose window starts at the source's base mixes the data */
        let mut mixes = new_mix_buffers();
        let out = core.mix_tick(base, base + TICK_NS, 1, &mut mixes);
        assert!(out.is_some());
        assert_eq!(mixes[0].data[0][0], 0.25);
        assert_eq!(mixes[0].data[1][AUDIO_OUTPUT_FRAMES - 1], 0.25);
        assert_eq!(source.audio_ts(), base + TICK_NS);

        let rings = source.rings.lock();
        assert_eq!(rings.bufs[0].len(), 3 * AUDIO_OUTPUT_FRAMES * 4);
        assert_eq!(rings.bufs[0].len(), rings.bufs[1].len());
    }

    #[test]
    fn timestamp_jump_resets_adjustment() {
        let (registry, core) = test_core();
        let source = make_source(&registry, &core, 1);

        /* timestamps far from the wall clock: adjusted mode */
        let start = 1_000_000;
        push_pcm(&source, 0.1, AUDIO_OUTPUT_FRAMES as u32, start);
        let first_adjust = source.timing_adjust.load(Ordering::Acquire);
        assert_ne!(first_adjust, 0);

        push_pcm(&source, 0.1, AUDIO_OUTPUT_FRAMES as u32, start + TICK_NS);
        assert_eq!(source.timing_adjust.load(Ordering::Acquire), first_adjust);

        /* a 5 s jump re-anchors the stream */
        push_pcm(
            &source,
            0.1,
            AUDIO_OUTPUT_FRAMES as u32,
            start + 2 * TICK_NS + 5_000_000_000,
        );
        let jumped_adjust = source.timing_adjust.load(Ordering::Acquire);
        assert_ne!(jumped_adjust, first_adjust);
        assert!(source.timing_set.load(Ordering::Acquire));
    }

    #[test]
    fn lagging_source_injects_buffering() {
        let (registry, core) = test_core();
        let source_a = make_source(&registry, &core, 1);
        let source_b = make_source(&registry, &core, 2);

        let now = clock::now_ns();
        push_pcm(&source_a, 0.2, AUDIO_OUTPUT_FRAMES as u32, now);
        push_pcm(&source_b, 0.2, AUDIO_OUTPUT_FRAMES as u32, now - 30_000_000);

        let mut mixes = new_mix_buffers();
        let out = core.mix_tick(now, now + TICK_NS, 1, &mut mixes);

        /* 30 ms at 48 kHz is two 1024-sample ticks of catch-up */
        assert!(out.is_none());
        assert_eq!(core.total_buffering_ticks(), 2);
    }

    #[test]
    fn buffering_never_exceeds_ceiling() {
        let (registry, core) = test_core();
        let source = make_source(&registry, &core, 1);

        let now = clock::now_ns();
        /* a source two seconds behind the window asks for far more than
         * the ceiling allows */
        push_pcm(&source, 0.2, AUDIO_OUTPUT_FRAMES as u32, now - 1_900_000_000);

        let mut mixes = new_mix_buffers();
        let out = core.mix_tick(now, now + TICK_NS, 1, &mut mixes);
        assert!(out.is_none());
        assert_eq!(core.total_buffering_ticks(), MAX_BUFFERING_TICKS);
    }

    #[test]
    fn stopped_source_clears_within_two_ticks() {
        let (registry, core) = test_core();
        let source = make_source(&registry, &core, 1);

        /* half a tick of data, one second in the past */
        let now = clock::now_ns();
        push_pcm(&source, 0.2, 512, now - 1_000_000_000);
        assert_ne!(source.audio_ts(), 0);

        let mut mixes = new_mix_buffers();
        let mut start = now;
        for _ in 0..3 {
            let _ = core.mix_tick(start, start + TICK_NS, 1, &mut mixes);
            start += TICK_NS;
        }

        assert_eq!(source.audio_ts(), 0);
        assert_eq!(source.rings.lock().bufs[0].len(), 0);
    }

    #[test]
    fn unregistering_restores_registry() {
        let (registry, core) = test_core();
        assert!(registry.is_empty());
        let source = make_source(&registry, &core, 7);
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(source.owner(), source.id()).is_some());
        assert!(registry.is_empty());
    }
}
