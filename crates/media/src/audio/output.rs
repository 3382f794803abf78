//! The audio output: owns the mix cadence thread and fans finished mixes
//! out to per-mix subscribers, converting per subscriber where requested.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use beam_media_info::{
    audio_frames_to_ns, AudioConvertInfo, AudioFormat, AudioInfo, MAX_AV_PLANES,
};
use bytemuck::cast_slice;
use parking_lot::Mutex;
use tracing::{error, info};

use super::{new_mix_buffers, AudioData, AudioMixer, AudioSink, MixBuffer};
use crate::event::ManualEvent;
use crate::resample::{AudioResampler, ResamplerProvider};
use crate::{clock, MediaError, AUDIO_OUTPUT_FRAMES, MAX_AUDIO_MIXES};

struct AudioInput {
    conversion: AudioInfo,
    resampler: Option<Box<dyn AudioResampler>>,
    sink: Arc<dyn AudioSink>,
}

pub struct AudioOutput {
    info: AudioInfo,
    block_size: usize,
    channels: usize,
    planes: usize,

    stop: Arc<ManualEvent>,
    thread: Mutex<Option<JoinHandle<()>>>,

    /// Subscriber list per mix. The outer lock is held only to snapshot;
    /// each input's own lock is held across its conversion + callback so a
    /// slow subscriber stalls only itself.
    mixes: [Mutex<Vec<Arc<Mutex<AudioInput>>>>; MAX_AUDIO_MIXES],

    mixer: Weak<dyn AudioMixer>,
    resamplers: Arc<dyn ResamplerProvider>,
}

impl AudioOutput {
    pub(crate) fn open(
        info: AudioInfo,
        mixer: Weak<dyn AudioMixer>,
        resamplers: Arc<dyn ResamplerProvider>,
    ) -> Result<Arc<AudioOutput>, MediaError> {
        let output = Self::build(info, mixer, resamplers)?;

        let worker = output.clone();
        let handle = std::thread::Builder::new()
            .name("beam-audio".into())
            .spawn(move || worker.audio_thread())
            .map_err(|e| MediaError::Any(format!("audio thread spawn: {e}").into()))?;
        *output.thread.lock() = Some(handle);

        info!(
            "audio settings reset: samples per sec: {}, speakers: {:?}",
            output.info.samples_per_sec, output.info.speakers
        );

        Ok(output)
    }

    /// Build without the cadence thread; ticks are driven by the caller.
    #[cfg(test)]
    pub(crate) fn open_detached(
        info: AudioInfo,
        mixer: Weak<dyn AudioMixer>,
        resamplers: Arc<dyn ResamplerProvider>,
    ) -> Result<Arc<AudioOutput>, MediaError> {
        Self::build(info, mixer, resamplers)
    }

    fn build(
        info: AudioInfo,
        mixer: Weak<dyn AudioMixer>,
        resamplers: Arc<dyn ResamplerProvider>,
    ) -> Result<Arc<AudioOutput>, MediaError> {
        if !info.is_valid() {
            return Err(MediaError::InvalidParameter("audio output info"));
        }

        clock::init();

        Ok(Arc::new(AudioOutput {
            block_size: info.block_size(),
            channels: info.channels(),
            planes: info.planes(),
            info,
            stop: Arc::new(ManualEvent::new()),
            thread: Mutex::new(None),
            mixes: std::array::from_fn(|_| Mutex::new(Vec::new())),
            mixer,
            resamplers,
        }))
    }

    pub fn info(&self) -> &AudioInfo {
        &self.info
    }

    pub fn sample_rate(&self) -> u32 {
        self.info.samples_per_sec
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn planes(&self) -> usize {
        self.planes
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    pub fn active(&self) -> bool {
        self.mixes.iter().any(|mix| !mix.lock().is_empty())
    }

    pub fn connect(
        &self,
        mix_idx: usize,
        conversion: Option<AudioConvertInfo>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<(), MediaError> {
        if mix_idx >= MAX_AUDIO_MIXES {
            return Err(MediaError::InvalidParameter("mix index"));
        }

        let mut inputs = self.mixes[mix_idx].lock();
        if inputs
            .iter()
            .any(|input| Arc::ptr_eq(&input.lock().sink, &sink))
        {
            return Ok(());
        }

        let conversion = conversion.unwrap_or_default().resolve(&self.info);
        let resampler = if conversion != self.info {
            match self.resamplers.create(&conversion, &self.info) {
                Ok(resampler) => Some(resampler),
                Err(e) => {
                    error!("audio connect: failed to create resampler: {e}");
                    return Err(MediaError::ResamplerCreate);
                }
            }
        } else {
            None
        };

        inputs.push(Arc::new(Mutex::new(AudioInput {
            conversion,
            resampler,
            sink,
        })));

        Ok(())
    }

    pub fn disconnect(&self, mix_idx: usize, sink: &Arc<dyn AudioSink>) {
        if mix_idx >= MAX_AUDIO_MIXES {
            return;
        }

        let mut inputs = self.mixes[mix_idx].lock();
        inputs.retain(|input| !Arc::ptr_eq(&input.lock().sink, sink));
    }

    pub fn close(&self) {
        self.stop.signal();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        for mix in &self.mixes {
            mix.lock().clear();
        }
    }

    fn audio_thread(self: Arc<AudioOutput>) {
        let rate = self.info.samples_per_sec;
        let mut samples: u64 = 0;
        let start_time = clock::now_ns();
        let mut prev_time = start_time;
        let mut audio_time = prev_time;
        let wait = Duration::from_nanos(audio_frames_to_ns(rate, AUDIO_OUTPUT_FRAMES as u64));

        let mut mixes = new_mix_buffers();

        while !self.stop.wait_timeout(wait) {
            let cur_time = clock::now_ns();
            while audio_time <= cur_time {
                samples += AUDIO_OUTPUT_FRAMES as u64;
                audio_time = start_time + audio_frames_to_ns(rate, samples);

                self.input_and_output(&mut mixes, audio_time, prev_time);
                prev_time = audio_time;
            }
        }
    }

    fn input_and_output(
        &self,
        mixes: &mut [MixBuffer; MAX_AUDIO_MIXES],
        audio_time: u64,
        prev_time: u64,
    ) {
        let mut active_mixes: u32 = 0;
        for (i, mix) in self.mixes.iter().enumerate() {
            if !mix.lock().is_empty() {
                active_mixes |= 1 << i;
            }
        }

        for mix in mixes.iter_mut() {
            mix.clear();
        }

        let Some(mixer) = self.mixer.upgrade() else {
            return;
        };

        let Some(new_ts) = mixer.mix_tick(prev_time, audio_time, active_mixes, mixes) else {
            return;
        };

        self.clamp_audio_output(mixes, active_mixes);

        for mix_idx in 0..MAX_AUDIO_MIXES {
            self.do_audio_output(mixes, mix_idx, new_ts, AUDIO_OUTPUT_FRAMES as u32);
        }
    }

    /* clamps audio data to -1.0..1.0 */
    fn clamp_audio_output(&self, mixes: &mut [MixBuffer; MAX_AUDIO_MIXES], active_mixes: u32) {
        for (mix_idx, mix) in mixes.iter_mut().enumerate() {
            if active_mixes & (1 << mix_idx) == 0 {
                continue;
            }
            for plane in mix.data.iter_mut().take(self.planes) {
                for value in plane.iter_mut() {
                    *value = value.clamp(-1.0, 1.0);
                }
            }
        }
    }

    fn do_audio_output(
        &self,
        mixes: &[MixBuffer; MAX_AUDIO_MIXES],
        mix_idx: usize,
        timestamp: u64,
        frames: u32,
    ) {
        let inputs: Vec<_> = self.mixes[mix_idx].lock().iter().cloned().collect();

        for input in inputs.iter().rev() {
            let mut guard = input.lock();
            let input = &mut *guard;

            let mut data = AudioData {
                data: [&[]; MAX_AV_PLANES],
                frames,
                timestamp,
            };
            for plane in 0..self.planes {
                data.data[plane] = cast_slice(&mixes[mix_idx].data[plane][..]);
            }

            match input.resampler.as_mut() {
                Some(resampler) => {
                    let resampled = match resampler.resample(&data.data[..self.planes], frames) {
                        Ok(resampled) => resampled,
                        Err(e) => {
                            error!("audio output: resample failed: {e}");
                            continue;
                        }
                    };

                    let mut converted = AudioData {
                        data: [&[]; MAX_AV_PLANES],
                        frames: resampled.frames,
                        timestamp: timestamp.wrapping_sub(resampled.offset_ns),
                    };
                    for (plane, bytes) in converted
                        .data
                        .iter_mut()
                        .zip(resampled.planes.iter())
                        .take(input.conversion.planes())
                    {
                        *plane = bytes.as_slice();
                    }

                    input.sink.receive_audio(mix_idx, &converted);
                }
                None => input.sink.receive_audio(mix_idx, &data),
            }
        }
    }
}

/// Planar float is the mixer's working format.
pub(crate) fn output_format() -> AudioFormat {
    AudioFormat::F32Planar
}
