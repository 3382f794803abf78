//! Per-source audio path: resampling, timestamp smoothing, circular
//! buffering and the mix-thread render/mix/discard hooks.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use beam_media_info::{audio_frames_to_ns, ns_to_audio_frames, AudioInfo};
use bytemuck::cast_slice_mut;
use tracing::{debug, error};

use super::{AudioRings, AudioTiming, Source, SourceAudioFrame};
use crate::audio::{CoreAudio, MixBuffer, TsInfo};
use crate::clock;
use crate::{
    uint64_diff, AUDIO_OUTPUT_FRAMES, MAX_AUDIO_MIXES, MAX_AUDIO_SIZE, MAX_BUFFERING_TICKS,
    MAX_BUF_SIZE, MAX_TS_VAR, TS_SMOOTHING_THRESHOLD,
};

const FLOAT_SIZE: usize = std::mem::size_of::<f32>();

fn close_float(f1: f32, f2: f32, precision: f32) -> bool {
    (f1 - f2).abs() <= precision
}

impl Source {
    /// Push a frame of audio into the source from any thread.
    pub fn output_audio(&self, audio: &SourceAudioFrame<'_>) {
        if !self.kind().has_audio() {
            return;
        }
        let Some(core) = self.core_audio.upgrade() else {
            return;
        };

        let mut timing = self.timing.lock();
        let Some((planes, frames)) = self.process_audio(&core, &mut timing, audio) else {
            return;
        };

        self.output_audio_data(&core, &mut timing, &planes, frames, audio.timestamp);
    }

    /// Resampler lifecycle + format conversion. Returns per-channel planes
    /// in the mixer's working format.
    fn process_audio(
        &self,
        core: &Arc<CoreAudio>,
        timing: &mut AudioTiming,
        audio: &SourceAudioFrame<'_>,
    ) -> Option<(Vec<Vec<u8>>, u32)> {
        let triple = AudioInfo::new(audio.samples_per_sec, audio.format, audio.speakers);
        if timing.sample_info != Some(triple) {
            self.reset_resampler(core, timing, triple);
        }

        if timing.audio_failed {
            return None;
        }

        let channels = core.output().channels();

        let (mut planes, frames) = match timing.resampler.as_mut() {
            Some(resampler) => {
                let src_planes = triple.planes().max(1);
                let input: Vec<&[u8]> = audio.data[..src_planes.min(audio.data.len())].to_vec();

                match resampler.resample(&input, audio.frames) {
                    Ok(out) => {
                        timing.resample_offset = out.offset_ns;
                        (out.planes, out.frames)
                    }
                    Err(e) => {
                        error!("audio resample failed: {e}");
                        return None;
                    }
                }
            }
            None => {
                let size = audio.frames as usize * FLOAT_SIZE;
                let planes = (0..channels)
                    .map(|ch| {
                        let mut plane = audio.data[ch].to_vec();
                        plane.resize(size, 0);
                        plane
                    })
                    .collect();
                (planes, audio.frames)
            }
        };

        planes.truncate(channels);
        let size = frames as usize * FLOAT_SIZE;
        while planes.len() < channels {
            planes.push(vec![0; size]);
        }

        Some((planes, frames))
    }

    fn reset_resampler(&self, core: &Arc<CoreAudio>, timing: &mut AudioTiming, triple: AudioInfo) {
        let output_info = *core.output().info();

        timing.sample_info = Some(triple);
        timing.resampler = None;
        timing.resample_offset = 0;

        if triple == output_info {
            timing.audio_failed = false;
            return;
        }

        match core.resamplers().create(&output_info, &triple) {
            Ok(resampler) => {
                timing.resampler = Some(resampler);
                timing.audio_failed = false;
            }
            Err(_) => {
                timing.audio_failed = true;
                error!("creation of resampler failed");
            }
        }
    }

    fn reset_audio_timing(&self, timestamp: u64, os_time: u64) {
        self.timing_set.store(true, Ordering::Release);
        self.timing_adjust
            .store(os_time.wrapping_sub(timestamp), Ordering::Release);
    }

    fn handle_ts_jump(&self, expected: u64, ts: u64, diff: u64, os_time: u64) {
        debug!(
            "Timestamp for source {} jumped by '{diff}', expected value {expected}, input value {ts}",
            self.id()
        );

        /* serialize against the mix thread like the buffer mutations do */
        let _rings = self.rings.lock();
        self.reset_audio_timing(ts, os_time);
    }

    fn output_audio_data(
        &self,
        core: &Arc<CoreAudio>,
        timing: &mut AudioTiming,
        planes: &[Vec<u8>],
        frames: u32,
        timestamp: u64,
    ) {
        let sample_rate = core.output().sample_rate();
        let channels = core.output().channels();
        let os_time = clock::now_ns();

        let mut ts = timestamp;
        let mut using_direct_ts = false;
        let mut push_back = false;

        /* detects 'directly' set timestamps as long as they're within
         * a certain threshold */
        if uint64_diff(ts, os_time) < MAX_TS_VAR {
            self.timing_adjust.store(0, Ordering::Release);
            self.timing_set.store(true, Ordering::Release);
            using_direct_ts = true;
        }

        if !self.timing_set.load(Ordering::Acquire) {
            self.reset_audio_timing(ts, os_time);
        } else if timing.next_audio_ts_min != 0 {
            let diff = uint64_diff(timing.next_audio_ts_min, ts);

            /* smooth audio if within threshold */
            if diff > MAX_TS_VAR && !using_direct_ts {
                self.handle_ts_jump(timing.next_audio_ts_min, ts, diff, os_time);
            } else if diff < TS_SMOOTHING_THRESHOLD {
                ts = timing.next_audio_ts_min;
            }
        }

        timing.last_audio_ts = ts;
        timing.next_audio_ts_min = ts + audio_frames_to_ns(sample_rate, frames as u64);

        ts = ts.wrapping_add(self.timing_adjust.load(Ordering::Acquire));

        let mut rings = self.rings.lock();

        if timing.next_audio_sys_ts_min == ts {
            push_back = true;
        } else if timing.next_audio_sys_ts_min != 0 {
            let diff = uint64_diff(timing.next_audio_sys_ts_min, ts);

            if diff < TS_SMOOTHING_THRESHOLD {
                push_back = true;

                /* This typically only happens if used with async video when
                 * audio/video start transitioning in to a timestamp jump.
                 * Audio will typically have a timestamp jump, and then video
                 * will have a timestamp jump. If that case is encountered,
                 * just clear the audio data in that small window and force a
                 * resync. This handles all cases rather than just looping. */
            } else if diff > MAX_TS_VAR {
                self.reset_audio_timing(timestamp, os_time);
                ts = timestamp.wrapping_add(self.timing_adjust.load(Ordering::Acquire));
            }
        }

        let sync_offset = self.sync_offset();
        ts = ts.wrapping_add_signed(sync_offset);
        ts = ts.wrapping_sub(timing.resample_offset);

        timing.next_audio_sys_ts_min = timing
            .next_audio_ts_min
            .wrapping_add(self.timing_adjust.load(Ordering::Acquire));

        if timing.last_sync_offset != sync_offset {
            if timing.last_sync_offset != 0 {
                push_back = false;
            }
            timing.last_sync_offset = sync_offset;
        }

        if push_back && self.audio_ts() != 0 {
            self.output_audio_push_back(&mut rings, planes, channels, frames);
        } else {
            self.output_audio_place(timing, &mut rings, planes, channels, sample_rate, frames, ts);
        }
    }

    fn output_audio_push_back(
        &self,
        rings: &mut AudioRings,
        planes: &[Vec<u8>],
        channels: usize,
        frames: u32,
    ) {
        let size = frames as usize * FLOAT_SIZE;

        /* do not allow the circular buffers to become too big */
        if rings.bufs[0].len() + size > MAX_BUF_SIZE {
            return;
        }

        for ch in 0..channels {
            rings.bufs[ch].push_back(&planes[ch][..size.min(planes[ch].len())]);
        }

        /* reset audio input buffer size to ensure that audio doesn't get
         * perpetually cut */
        rings.last_size = 0;
    }

    #[allow(clippy::too_many_arguments)]
    fn output_audio_place(
        &self,
        timing: &mut AudioTiming,
        rings: &mut AudioRings,
        planes: &[Vec<u8>],
        channels: usize,
        sample_rate: u32,
        frames: u32,
        ts: u64,
    ) {
        let size = frames as usize * FLOAT_SIZE;

        if self.audio_ts() == 0 || ts < self.audio_ts() {
            self.reset_audio_data(timing, rings, ts);
        }

        let placement =
            ns_to_audio_frames(sample_rate, ts - self.audio_ts()) as usize * FLOAT_SIZE;

        /* do not allow the circular buffers to become too big */
        if placement + size > MAX_BUF_SIZE {
            return;
        }

        for ch in 0..channels {
            let ring = &mut rings.bufs[ch];
            ring.place(placement, &planes[ch][..size.min(planes[ch].len())]);
            let tail = ring.len() - (placement + size);
            ring.pop_back(tail);
        }

        rings.last_size = 0;
    }

    fn reset_audio_data(&self, timing: &mut AudioTiming, rings: &mut AudioRings, ts: u64) {
        for ring in rings.bufs.iter_mut() {
            ring.clear();
        }
        rings.last_size = 0;
        self.set_audio_ts(ts);
        timing.next_audio_sys_ts_min = ts;
    }

    fn get_source_volume(&self) -> f32 {
        let volume = self.volume();
        if self.muted() || close_float(volume, 0.0, 0.0001) {
            return 0.0;
        }
        if close_float(volume, 1.0, 0.0001) {
            return 1.0;
        }
        volume
    }

    fn apply_audio_volume(&self, mixers: u32, channels: usize) {
        let vol = self.get_source_volume();
        if vol == 1.0 {
            return;
        }

        let mut scratch = self.scratch.lock();
        if vol == 0.0 || mixers == 0 {
            scratch.zero_all();
            return;
        }

        let mask = self.mixer_mask();
        for mix in 0..MAX_AUDIO_MIXES {
            let bit = 1u32 << mix;
            if mask & bit != 0 && mixers & bit != 0 {
                for ch in 0..channels {
                    for value in scratch.channel_mut(mix, ch) {
                        *value *= vol;
                    }
                }
            }
        }
    }

    fn audio_source_tick(&self, mixers: u32, channels: usize, size: usize) {
        {
            let rings = self.rings.lock();

            if rings.bufs[0].len() < size {
                self.set_audio_pending(true);
                return;
            }

            let mut scratch = self.scratch.lock();
            for ch in 0..channels {
                let samples = scratch.channel_mut(0, ch);
                let bytes = cast_slice_mut::<f32, u8>(samples);
                rings.bufs[ch].peek_front(&mut bytes[..size]);
            }
        }

        let mut scratch = self.scratch.lock();
        let mask = self.mixer_mask();
        let frames = size / FLOAT_SIZE;

        for mix in 1..MAX_AUDIO_MIXES {
            let bit = 1u32 << mix;

            if mask & bit == 0 || mixers & bit == 0 {
                for ch in 0..channels {
                    scratch.channel_mut(mix, ch)[..frames].fill(0.0);
                }
                continue;
            }

            for ch in 0..channels {
                scratch.copy_from_mix0(mix, ch, frames);
            }
        }

        if mask & 1 == 0 || mixers & 1 == 0 {
            for ch in 0..channels {
                scratch.channel_mut(0, ch)[..frames].fill(0.0);
            }
        }

        drop(scratch);
        self.apply_audio_volume(mixers, channels);
        self.set_audio_pending(false);
    }

    /// Mix-thread entry: stage one window of this source's PCM into the
    /// per-mix scratch, or mark the source pending.
    pub(crate) fn audio_render(
        &self,
        mixers: u32,
        channels: usize,
        _sample_rate: u32,
        size: usize,
    ) {
        if !self.scratch.lock().enabled() {
            self.set_audio_pending(true);
            return;
        }

        if self.audio_ts() == 0 {
            self.set_audio_pending(true);
            return;
        }

        self.audio_source_tick(mixers, channels, size);
    }

    /// Whether this source cannot deliver samples covering `min_ts`; flips
    /// it to pending when so. Returns true to request a min-ts recompute.
    pub(crate) fn audio_buffer_insufficient(&self, sample_rate: u32, min_ts: u64) -> bool {
        let mut total_floats = AUDIO_OUTPUT_FRAMES;

        if self.audio_pending() || self.audio_ts() == 0 {
            return false;
        }

        let audio_ts = self.audio_ts();
        if audio_ts != min_ts && audio_ts != min_ts.wrapping_sub(1) {
            let start_point =
                ns_to_audio_frames(sample_rate, audio_ts.saturating_sub(min_ts)) as usize;
            if start_point >= AUDIO_OUTPUT_FRAMES {
                return false;
            }

            total_floats -= start_point;
        }

        let size = total_floats * FLOAT_SIZE;

        if self.rings.lock().bufs[0].len() < size {
            self.set_audio_pending(true);
            return true;
        }

        false
    }

    /// Sum this source's staged window into the caller's mixes.
    pub(crate) fn mix_audio(
        &self,
        mixes: &mut [MixBuffer; MAX_AUDIO_MIXES],
        channels: usize,
        sample_rate: u32,
        ts: &TsInfo,
    ) {
        /* the buffer mutex stays held for the whole mix so discard/push
         * cannot move audio_ts under us; every early return drops it */
        let _rings = self.rings.lock();

        let audio_ts = self.audio_ts();
        if !self.scratch.lock().enabled() || audio_ts == 0 {
            return;
        }

        if audio_ts < ts.start || ts.end <= audio_ts {
            return;
        }

        let mut total_floats = AUDIO_OUTPUT_FRAMES;
        let mut start_point = 0;

        if audio_ts != ts.start {
            start_point = ns_to_audio_frames(sample_rate, audio_ts - ts.start) as usize;
            if start_point == AUDIO_OUTPUT_FRAMES {
                return;
            }

            total_floats -= start_point;
        }

        let scratch = self.scratch.lock();
        for (mix_idx, mix) in mixes.iter_mut().enumerate() {
            for ch in 0..channels {
                let staged = scratch.channel(mix_idx, ch);
                let out = &mut mix.data[ch][start_point..start_point + total_floats];
                for (dst, src) in out.iter_mut().zip(&staged[..total_floats]) {
                    *dst += *src;
                }
            }
        }
    }

    fn discard_if_stopped(&self, rings: &mut AudioRings, channels: usize) -> bool {
        let last_size = rings.last_size;
        let size = rings.bufs[0].len();

        if size == 0 {
            return false;
        }

        /* if perpetually pending data, it means the audio has stopped, so
         * clear the audio data */
        if last_size == size {
            if !rings.pending_stop {
                rings.pending_stop = true;
                return true;
            }

            for ch in 0..channels {
                rings.bufs[ch].clear();
            }

            rings.pending_stop = false;
            rings.last_size = 0;
            self.set_audio_ts(0);
            true
        } else {
            rings.last_size = size;
            false
        }
    }

    fn ignore_audio(&self, rings: &mut AudioRings, channels: usize, sample_rate: u32) {
        let num_floats = rings.bufs[0].len() / FLOAT_SIZE;

        if num_floats > 0 {
            for ch in 0..channels {
                rings.bufs[ch].clear();
            }

            rings.last_size = 0;
            self.set_audio_ts(
                self.audio_ts()
                    .wrapping_add(audio_frames_to_ns(sample_rate, num_floats as u64)),
            );
        }
    }

    /// Advance `audio_ts` past the tick's window, dropping consumed bytes.
    pub(crate) fn discard_audio(
        &self,
        total_buffering_ticks: i32,
        channels: usize,
        sample_rate: u32,
        ts: &TsInfo,
    ) {
        let mut rings = self.rings.lock();

        let audio_ts = self.audio_ts();
        if ts.end <= audio_ts {
            return;
        }

        if audio_ts < ts.start.wrapping_sub(1) {
            if self.audio_pending()
                && rings.bufs[0].len() < MAX_AUDIO_SIZE
                && self.discard_if_stopped(&mut rings, channels)
            {
                return;
            }

            if total_buffering_ticks == MAX_BUFFERING_TICKS {
                self.ignore_audio(&mut rings, channels, sample_rate);
            }
            return;
        }

        let mut total_floats = AUDIO_OUTPUT_FRAMES;
        if audio_ts != ts.start && audio_ts != ts.start.wrapping_sub(1) {
            let start_point = ns_to_audio_frames(sample_rate, audio_ts - ts.start) as usize;
            if start_point == AUDIO_OUTPUT_FRAMES {
                return;
            }

            total_floats -= start_point;
        }

        let size = total_floats * FLOAT_SIZE;

        if rings.bufs[0].len() < size {
            if self.discard_if_stopped(&mut rings, channels) {
                return;
            }

            self.set_audio_ts(ts.end);
            return;
        }

        for ch in 0..channels {
            rings.bufs[ch].pop_front(size);
        }

        rings.last_size = 0;
        rings.pending_stop = false;
        self.set_audio_ts(ts.end);
    }
}
