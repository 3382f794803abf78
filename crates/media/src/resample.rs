//! Audio resampler collaborator contract.
//!
//! The mixer only ever talks to [`AudioResampler`]; which back-end fulfils
//! it is the host's choice. [`SoftwareResamplers`] is the built-in
//! fallback: straightforward format/channel conversion with linear
//! interpolation between rates, good enough for tests and for hosts that
//! feed the mixer near-native audio.

use beam_media_info::{AudioFormat, AudioInfo, MAX_AV_PLANES};

use crate::MediaError;

pub struct ResampledAudio {
    pub planes: Vec<Vec<u8>>,
    pub frames: u32,
    /// Latency introduced by the resampler, subtracted from frame
    /// timestamps downstream.
    pub offset_ns: u64,
}

pub trait AudioResampler: Send {
    fn resample(&mut self, input: &[&[u8]], frames: u32) -> Result<ResampledAudio, MediaError>;
}

pub trait ResamplerProvider: Send + Sync {
    fn create(
        &self,
        dst: &AudioInfo,
        src: &AudioInfo,
    ) -> Result<Box<dyn AudioResampler>, MediaError>;
}

/// Built-in software conversion provider.
pub struct SoftwareResamplers;

impl ResamplerProvider for SoftwareResamplers {
    fn create(
        &self,
        dst: &AudioInfo,
        src: &AudioInfo,
    ) -> Result<Box<dyn AudioResampler>, MediaError> {
        if !dst.is_valid() || !src.is_valid() {
            return Err(MediaError::ResamplerCreate);
        }
        Ok(Box::new(PcmConverter::new(*dst, *src)))
    }
}

pub struct PcmConverter {
    dst: AudioInfo,
    src: AudioInfo,
    /// Last input sample per channel, for interpolation continuity across
    /// chunk boundaries.
    tail: Vec<f32>,
    /// Fractional read position carried between chunks.
    frac: f64,
    primed: bool,
}

impl PcmConverter {
    pub fn new(dst: AudioInfo, src: AudioInfo) -> PcmConverter {
        PcmConverter {
            dst,
            src,
            tail: vec![0.0; dst.channels().max(1)],
            frac: 0.0,
            primed: false,
        }
    }

    fn decode(&self, input: &[&[u8]], frames: usize) -> Vec<Vec<f32>> {
        let channels = self.src.channels();
        let mut out = vec![vec![0.0f32; frames]; channels];

        if self.src.format.is_planar() {
            for (ch, plane) in out.iter_mut().enumerate() {
                let Some(data) = input.get(ch) else { continue };
                decode_plane(self.src.format, data, plane, 1, 0);
            }
        } else if let Some(data) = input.first() {
            for (ch, plane) in out.iter_mut().enumerate() {
                decode_plane(self.src.format, data, plane, channels, ch);
            }
        }

        out
    }

    fn remap_channels(&self, decoded: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        let src_channels = decoded.len();
        let dst_channels = self.dst.channels();
        if src_channels == dst_channels {
            return decoded;
        }

        let frames = decoded.first().map_or(0, Vec::len);
        let mut out = Vec::with_capacity(dst_channels);
        for ch in 0..dst_channels {
            if src_channels == 1 {
                out.push(decoded[0].clone());
            } else if ch < src_channels {
                out.push(decoded[ch].clone());
            } else {
                out.push(vec![0.0; frames]);
            }
        }
        out
    }

    fn convert_rate(&mut self, channels: Vec<Vec<f32>>) -> Vec<Vec<f32>> {
        if self.src.samples_per_sec == self.dst.samples_per_sec {
            return channels;
        }

        let in_frames = channels.first().map_or(0, Vec::len);
        if in_frames == 0 {
            return channels;
        }

        let step = self.src.samples_per_sec as f64 / self.dst.samples_per_sec as f64;
        let mut out: Vec<Vec<f32>> = channels.iter().map(|_| Vec::new()).collect();

        let mut pos = self.frac;
        loop {
            // index == -1 reads the tail sample carried from the last chunk
            let index = pos.floor() as isize;
            if index + 1 >= in_frames as isize {
                break;
            }

            let t = (pos - pos.floor()) as f32;
            for (ch, samples) in channels.iter().enumerate() {
                let a = if index < 0 {
                    if self.primed {
                        self.tail[ch.min(self.tail.len() - 1)]
                    } else {
                        samples[0]
                    }
                } else {
                    samples[index as usize]
                };
                let b = samples[(index + 1) as usize];
                out[ch].push(a + (b - a) * t);
            }
            pos += step;
        }

        for (ch, samples) in channels.iter().enumerate() {
            if let Some(&last) = samples.last() {
                if ch < self.tail.len() {
                    self.tail[ch] = last;
                }
            }
        }
        self.primed = true;
        self.frac = pos - in_frames as f64;

        out
    }

    fn encode(&self, channels: Vec<Vec<f32>>) -> (Vec<Vec<u8>>, u32) {
        let frames = channels.first().map_or(0, Vec::len);
        let dst_channels = self.dst.channels();

        if self.dst.format.is_planar() {
            let mut planes = Vec::with_capacity(dst_channels);
            for ch in 0..dst_channels {
                let empty = Vec::new();
                let samples = channels.get(ch).unwrap_or(&empty);
                planes.push(encode_plane(self.dst.format, samples, frames));
            }
            (planes, frames as u32)
        } else {
            let mut interleaved = vec![0.0f32; frames * dst_channels];
            for ch in 0..dst_channels {
                if let Some(samples) = channels.get(ch) {
                    for (frame, &sample) in samples.iter().enumerate() {
                        interleaved[frame * dst_channels + ch] = sample;
                    }
                }
            }
            (
                vec![encode_plane(self.dst.format, &interleaved, interleaved.len())],
                frames as u32,
            )
        }
    }
}

impl AudioResampler for PcmConverter {
    fn resample(&mut self, input: &[&[u8]], frames: u32) -> Result<ResampledAudio, MediaError> {
        let decoded = self.decode(input, frames as usize);
        let remapped = self.remap_channels(decoded);
        let converted = self.convert_rate(remapped);
        let (planes, out_frames) = self.encode(converted);

        let mut padded = planes;
        while padded.len() < MAX_AV_PLANES {
            padded.push(Vec::new());
        }

        Ok(ResampledAudio {
            planes: padded,
            frames: out_frames,
            offset_ns: 0,
        })
    }
}

/* byte-wise reads: caller buffers carry no alignment guarantee */
fn decode_plane(format: AudioFormat, data: &[u8], out: &mut [f32], stride: usize, offset: usize) {
    match format {
        AudioFormat::Unknown => {}
        AudioFormat::U8 | AudioFormat::U8Planar => {
            for (i, sample) in out.iter_mut().enumerate() {
                let idx = i * stride + offset;
                if idx >= data.len() {
                    break;
                }
                *sample = (data[idx] as f32 - 128.0) / 128.0;
            }
        }
        AudioFormat::S16 | AudioFormat::S16Planar => {
            for (i, sample) in out.iter_mut().enumerate() {
                let pos = (i * stride + offset) * 2;
                if pos + 2 > data.len() {
                    break;
                }
                let value = i16::from_ne_bytes([data[pos], data[pos + 1]]);
                *sample = value as f32 / 32768.0;
            }
        }
        AudioFormat::S32 | AudioFormat::S32Planar => {
            for (i, sample) in out.iter_mut().enumerate() {
                let pos = (i * stride + offset) * 4;
                if pos + 4 > data.len() {
                    break;
                }
                let value =
                    i32::from_ne_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
                *sample = value as f32 / 2_147_483_648.0;
            }
        }
        AudioFormat::F32 | AudioFormat::F32Planar => {
            for (i, sample) in out.iter_mut().enumerate() {
                let pos = (i * stride + offset) * 4;
                if pos + 4 > data.len() {
                    break;
                }
                *sample =
                    f32::from_ne_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]]);
            }
        }
    }
}

fn encode_plane(format: AudioFormat, samples: &[f32], count: usize) -> Vec<u8> {
    let count = count.min(samples.len());
    match format {
        AudioFormat::Unknown => Vec::new(),
        AudioFormat::U8 | AudioFormat::U8Planar => samples[..count]
            .iter()
            .map(|&s| ((s.clamp(-1.0, 1.0) * 128.0) + 128.0).clamp(0.0, 255.0) as u8)
            .collect(),
        AudioFormat::S16 | AudioFormat::S16Planar => {
            let mut out = Vec::with_capacity(count * 2);
            for &s in &samples[..count] {
                let v = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                out.extend_from_slice(&v.to_ne_bytes());
            }
            out
        }
        AudioFormat::S32 | AudioFormat::S32Planar => {
            let mut out = Vec::with_capacity(count * 4);
            for &s in &samples[..count] {
                let v = (s.clamp(-1.0, 1.0) as f64 * 2_147_483_647.0) as i32;
                out.extend_from_slice(&v.to_ne_bytes());
            }
            out
        }
        AudioFormat::F32 | AudioFormat::F32Planar => {
            let mut out = Vec::with_capacity(count * 4);
            for &s in &samples[..count] {
                out.extend_from_slice(&s.to_ne_bytes());
            }
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_media_info::SpeakerLayout;

    fn f32_plane(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
    }

    fn f32_samples(bytes: &[u8]) -> Vec<f32> {
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect()
    }

    #[test]
    fn same_rate_format_change_preserves_samples() {
        let src = AudioInfo::new(48_000, AudioFormat::F32, SpeakerLayout::Stereo);
        let dst = AudioInfo::new(48_000, AudioFormat::F32Planar, SpeakerLayout::Stereo);
        let mut converter = PcmConverter::new(dst, src);

        let interleaved = f32_plane(&[0.1, -0.1, 0.2, -0.2, 0.3, -0.3]);
        let out = converter.resample(&[&interleaved], 3).unwrap();

        assert_eq!(out.frames, 3);
        assert_eq!(f32_samples(&out.planes[0]), vec![0.1, 0.2, 0.3]);
        assert_eq!(f32_samples(&out.planes[1]), vec![-0.1, -0.2, -0.3]);
    }

    #[test]
    fn mono_upmixes_to_both_channels() {
        let src = AudioInfo::new(48_000, AudioFormat::F32Planar, SpeakerLayout::Mono);
        let dst = AudioInfo::new(48_000, AudioFormat::F32Planar, SpeakerLayout::Stereo);
        let mut converter = PcmConverter::new(dst, src);

        let mono = f32_plane(&[0.5, 0.25]);
        let out = converter.resample(&[&mono], 2).unwrap();
        assert_eq!(out.planes[0], out.planes[1]);
    }

    #[test]
    fn downsampling_halves_frame_count() {
        let src = AudioInfo::new(96_000, AudioFormat::F32Planar, SpeakerLayout::Mono);
        let dst = AudioInfo::new(48_000, AudioFormat::F32Planar, SpeakerLayout::Mono);
        let mut converter = PcmConverter::new(dst, src);

        let input = f32_plane(&vec![0.5f32; 960]);
        let out = converter.resample(&[&input], 960).unwrap();
        let frames = out.frames as i64;
        assert!((frames - 480).abs() <= 2, "got {frames} frames");
    }

    #[test]
    fn s16_to_f32_scales() {
        let src = AudioInfo::new(48_000, AudioFormat::S16, SpeakerLayout::Mono);
        let dst = AudioInfo::new(48_000, AudioFormat::F32Planar, SpeakerLayout::Mono);
        let mut converter = PcmConverter::new(dst, src);

        let input: Vec<u8> = [16384i16, -16384]
            .iter()
            .flat_map(|s| s.to_ne_bytes())
            .collect();
        let out = converter.resample(&[&input], 2).unwrap();
        let samples = f32_samples(&out.planes[0]);
        assert!((samples[0] - 0.5).abs() < 1e-3);
        assert!((samples[1] + 0.5).abs() < 1e-3);
    }

    #[test]
    fn provider_rejects_invalid_infos() {
        let bad = AudioInfo::new(0, AudioFormat::F32, SpeakerLayout::Stereo);
        let good = AudioInfo::new(48_000, AudioFormat::F32, SpeakerLayout::Stereo);
        assert!(SoftwareResamplers.create(&bad, &good).is_err());
        assert!(SoftwareResamplers.create(&good, &good).is_ok());
    }
}
