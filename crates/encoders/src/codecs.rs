//! Built-in packetizer codecs: no compression, just framing. Useful for
//! raw recording paths and as the reference implementations of the codec
//! contract.

use beam_media_info::{AudioConvertInfo, AudioFormat, SpeakerLayout};

use crate::{Codec, CodecKind, EncoderError, EncoderFrame, Packet};

/// Packetizes mixer PCM into fixed-size raw frames.
pub struct PcmAudioCodec {
    samples_per_sec: u32,
    speakers: SpeakerLayout,
    frame_size: usize,
    created: bool,
}

impl PcmAudioCodec {
    pub fn new(samples_per_sec: u32, speakers: SpeakerLayout) -> PcmAudioCodec {
        PcmAudioCodec {
            samples_per_sec,
            speakers,
            frame_size: 1024,
            created: false,
        }
    }

    pub fn with_frame_size(mut self, frame_size: usize) -> PcmAudioCodec {
        self.frame_size = frame_size;
        self
    }
}

impl Codec for PcmAudioCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Audio
    }

    fn create(&mut self) -> Result<(), EncoderError> {
        if self.samples_per_sec == 0 {
            return Err(EncoderError::CodecCreate("sample rate is zero".into()));
        }
        self.created = true;
        Ok(())
    }

    fn destroy(&mut self) {
        self.created = false;
    }

    fn valid(&self) -> bool {
        self.created
    }

    fn frame_size(&self) -> usize {
        self.frame_size
    }

    fn audio_info(&self, info: &mut AudioConvertInfo) {
        info.samples_per_sec = self.samples_per_sec;
        info.format = Some(AudioFormat::F32Planar);
        info.speakers = Some(self.speakers);
    }

    fn encode(&mut self, frame: &EncoderFrame<'_>) -> Result<Option<Packet>, EncoderError> {
        if !self.created {
            return Err(EncoderError::Encode("codec not created".into()));
        }

        let mut data = Vec::new();
        for plane in frame.data.iter().filter(|plane| !plane.is_empty()) {
            data.extend_from_slice(plane);
        }

        Ok(Some(Packet {
            data,
            pts: frame.pts,
            dts: frame.pts,
            timebase_num: 0,
            timebase_den: 0,
            keyframe: true,
            kind: CodecKind::Audio,
            dts_usec: 0,
            sys_dts_usec: 0,
        }))
    }
}

/// Packetizes composed RGBA frames verbatim.
pub struct RawVideoCodec {
    header: Vec<u8>,
    created: bool,
}

impl RawVideoCodec {
    pub fn new() -> RawVideoCodec {
        RawVideoCodec {
            header: Vec::new(),
            created: false,
        }
    }

    /// Bytes prepended to the first keyframe packet.
    pub fn with_header(mut self, header: Vec<u8>) -> RawVideoCodec {
        self.header = header;
        self
    }
}

impl Default for RawVideoCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec for RawVideoCodec {
    fn kind(&self) -> CodecKind {
        CodecKind::Video
    }

    fn create(&mut self) -> Result<(), EncoderError> {
        self.created = true;
        Ok(())
    }

    fn destroy(&mut self) {
        self.created = false;
    }

    fn valid(&self) -> bool {
        self.created
    }

    fn encode(&mut self, frame: &EncoderFrame<'_>) -> Result<Option<Packet>, EncoderError> {
        if !self.created {
            return Err(EncoderError::Encode("codec not created".into()));
        }

        let mut data = Vec::new();
        for plane in frame.data.iter().filter(|plane| !plane.is_empty()) {
            data.extend_from_slice(plane);
        }

        Ok(Some(Packet {
            data,
            pts: frame.pts,
            dts: frame.pts,
            timebase_num: 0,
            timebase_den: 0,
            keyframe: true,
            kind: CodecKind::Video,
            dts_usec: 0,
            sys_dts_usec: 0,
        }))
    }

    fn sei_data(&self) -> Option<&[u8]> {
        if self.header.is_empty() {
            None
        } else {
            Some(&self.header)
        }
    }
}
