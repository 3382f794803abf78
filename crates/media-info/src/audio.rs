use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AudioFormat {
    Unknown,
    U8,
    S16,
    S32,
    F32,
    U8Planar,
    S16Planar,
    S32Planar,
    F32Planar,
}

impl AudioFormat {
    pub const fn bytes_per_sample(self) -> usize {
        match self {
            AudioFormat::Unknown => 0,
            AudioFormat::U8 | AudioFormat::U8Planar => 1,
            AudioFormat::S16 | AudioFormat::S16Planar => 2,
            AudioFormat::S32
            | AudioFormat::S32Planar
            | AudioFormat::F32
            | AudioFormat::F32Planar => 4,
        }
    }

    pub const fn is_planar(self) -> bool {
        matches!(
            self,
            AudioFormat::U8Planar
                | AudioFormat::S16Planar
                | AudioFormat::S32Planar
                | AudioFormat::F32Planar
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpeakerLayout {
    Unknown,
    Mono,
    Stereo,
    TwoPointOne,
    FourPointZero,
    FourPointOne,
    FivePointOne,
    SevenPointOne,
}

impl SpeakerLayout {
    pub const fn channel_count(self) -> usize {
        match self {
            SpeakerLayout::Unknown => 0,
            SpeakerLayout::Mono => 1,
            SpeakerLayout::Stereo => 2,
            SpeakerLayout::TwoPointOne => 3,
            SpeakerLayout::FourPointZero => 4,
            SpeakerLayout::FourPointOne => 5,
            SpeakerLayout::FivePointOne => 6,
            SpeakerLayout::SevenPointOne => 8,
        }
    }
}

/// Number of data planes an audio frame in this format/layout carries.
pub const fn audio_planes(format: AudioFormat, speakers: SpeakerLayout) -> usize {
    if format.is_planar() {
        speakers.channel_count()
    } else {
        1
    }
}

/// Bytes occupied by a single sample period across one plane.
pub const fn audio_block_size(format: AudioFormat, speakers: SpeakerLayout) -> usize {
    let per_channel = format.bytes_per_sample();
    if format.is_planar() {
        per_channel
    } else {
        per_channel * speakers.channel_count()
    }
}

/// Bytes occupied by `frames` sample periods across one plane.
pub const fn audio_size(format: AudioFormat, speakers: SpeakerLayout, frames: u32) -> usize {
    audio_block_size(format, speakers) * frames as usize
}

/* unless the value is 3+ hours worth of frames, this won't overflow */
pub const fn audio_frames_to_ns(sample_rate: u32, frames: u64) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames * 1_000_000_000 / sample_rate as u64
}

pub const fn ns_to_audio_frames(sample_rate: u32, ns: u64) -> u64 {
    ns * sample_rate as u64 / 1_000_000_000
}

#[derive(Debug, thiserror::Error)]
pub enum AudioInfoError {
    #[error("sample rate must be nonzero")]
    ZeroSampleRate,

    #[error("unknown sample format")]
    UnknownFormat,

    #[error("unknown speaker layout")]
    UnknownSpeakers,
}

/// Full description of an audio stream: rate, sample format, layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioInfo {
    pub samples_per_sec: u32,
    pub format: AudioFormat,
    pub speakers: SpeakerLayout,
}

impl AudioInfo {
    pub const fn new(samples_per_sec: u32, format: AudioFormat, speakers: SpeakerLayout) -> Self {
        Self {
            samples_per_sec,
            format,
            speakers,
        }
    }

    pub fn try_new(
        samples_per_sec: u32,
        format: AudioFormat,
        speakers: SpeakerLayout,
    ) -> Result<Self, AudioInfoError> {
        if samples_per_sec == 0 {
            return Err(AudioInfoError::ZeroSampleRate);
        }
        if format == AudioFormat::Unknown {
            return Err(AudioInfoError::UnknownFormat);
        }
        if speakers == SpeakerLayout::Unknown {
            return Err(AudioInfoError::UnknownSpeakers);
        }
        Ok(Self::new(samples_per_sec, format, speakers))
    }

    pub const fn channels(&self) -> usize {
        self.speakers.channel_count()
    }

    pub const fn planes(&self) -> usize {
        audio_planes(self.format, self.speakers)
    }

    pub const fn block_size(&self) -> usize {
        audio_block_size(self.format, self.speakers)
    }

    pub fn is_valid(&self) -> bool {
        self.format != AudioFormat::Unknown
            && self.speakers != SpeakerLayout::Unknown
            && self.samples_per_sec > 0
    }
}

/// Requested conversion for an audio subscriber. Unset fields (zero rate,
/// `Unknown` format/layout) fall back to the output's native info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioConvertInfo {
    pub samples_per_sec: u32,
    pub format: Option<AudioFormat>,
    pub speakers: Option<SpeakerLayout>,
}

impl AudioConvertInfo {
    pub fn resolve(&self, base: &AudioInfo) -> AudioInfo {
        let mut info = AudioInfo {
            samples_per_sec: self.samples_per_sec,
            format: self.format.unwrap_or(AudioFormat::Unknown),
            speakers: self.speakers.unwrap_or(SpeakerLayout::Unknown),
        };

        if info.format == AudioFormat::Unknown {
            info.format = base.format;
        }
        if info.speakers == SpeakerLayout::Unknown {
            info.speakers = base.speakers;
        }
        if info.samples_per_sec == 0 {
            info.samples_per_sec = base.samples_per_sec;
        }

        info
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_formats_split_per_channel() {
        assert_eq!(
            audio_planes(AudioFormat::F32Planar, SpeakerLayout::SevenPointOne),
            8
        );
        assert_eq!(audio_planes(AudioFormat::S16, SpeakerLayout::SevenPointOne), 1);
        assert_eq!(
            audio_block_size(AudioFormat::F32Planar, SpeakerLayout::Stereo),
            4
        );
        assert_eq!(audio_block_size(AudioFormat::S16, SpeakerLayout::Stereo), 4);
    }

    #[test]
    fn frames_ns_round_trip() {
        let ns = audio_frames_to_ns(48_000, 1024);
        assert_eq!(ns, 21_333_333);
        assert_eq!(ns_to_audio_frames(48_000, ns), 1023);
        assert_eq!(ns_to_audio_frames(48_000, audio_frames_to_ns(48_000, 48_000)), 48_000);
    }

    #[test]
    fn convert_info_falls_back_to_base() {
        let base = AudioInfo::new(48_000, AudioFormat::F32Planar, SpeakerLayout::Stereo);
        let partial = AudioConvertInfo {
            samples_per_sec: 44_100,
            ..Default::default()
        };
        let resolved = partial.resolve(&base);
        assert_eq!(resolved.samples_per_sec, 44_100);
        assert_eq!(resolved.format, AudioFormat::F32Planar);
        assert_eq!(resolved.speakers, SpeakerLayout::Stereo);
    }
}
