//! Encoder cores: pairing, start-of-stream rendezvous, packet timing.
//!
//! Codec implementations live behind the [`Codec`] capability trait; this
//! crate owns everything around them: audio frame assembly, the
//! audio-waits-for-video start contract, packet timestamp rebasing and the
//! stop/teardown policy.

mod codecs;
mod encoder;

pub use codecs::{PcmAudioCodec, RawVideoCodec};
pub use encoder::Encoder;

use std::sync::Arc;

use beam_gfx::Texture;
use beam_media_info::{AudioConvertInfo, VideoScaleInfo, MAX_AV_PLANES};

#[derive(Debug, thiserror::Error)]
pub enum EncoderError {
    #[error("codec creation failed: {0}")]
    CodecCreate(String),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("codec kind does not match this encoder")]
    WrongKind,

    #[error("media: {0}")]
    Media(#[from] beam_media::MediaError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecKind {
    Audio,
    Video,
}

/// A raw frame handed to a codec.
pub struct EncoderFrame<'a> {
    pub data: [&'a [u8]; MAX_AV_PLANES],
    pub linesize: [u32; MAX_AV_PLANES],
    pub frames: u32,
    pub pts: i64,
}

/// An encoded packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub data: Vec<u8>,
    pub pts: i64,
    pub dts: i64,
    pub timebase_num: u32,
    pub timebase_den: u32,
    pub keyframe: bool,
    pub kind: CodecKind,
    pub dts_usec: i64,
    pub sys_dts_usec: i64,
}

pub fn packet_dts_usec(packet: &Packet) -> i64 {
    if packet.timebase_den == 0 {
        return 0;
    }
    packet.dts * 1_000_000 * packet.timebase_num as i64 / packet.timebase_den as i64
}

/// Codec capability contract. Implementations are stateful and owned by a
/// single encoder.
pub trait Codec: Send {
    fn kind(&self) -> CodecKind;

    fn create(&mut self) -> Result<(), EncoderError>;
    fn destroy(&mut self);
    fn valid(&self) -> bool;

    /// Samples consumed per encoded audio frame.
    fn frame_size(&self) -> usize {
        1024
    }

    /// Audio codecs fill in the conversion they want from the mixer.
    fn audio_info(&self, _info: &mut AudioConvertInfo) {}

    /// Video codecs adjust the scale/format they want from the output.
    fn video_info(&self, _info: &mut VideoScaleInfo) {}

    fn encode(&mut self, frame: &EncoderFrame<'_>) -> Result<Option<Packet>, EncoderError>;

    /// Zero-copy path for codecs that accept GPU textures directly.
    fn encode_texture(
        &mut self,
        _texture: &Arc<dyn Texture>,
        _timestamp: u64,
    ) -> Result<Option<Packet>, EncoderError> {
        Ok(None)
    }

    fn gpu_encode_available(&self) -> bool {
        false
    }

    /// Codec-global header bytes (e.g. sequence headers).
    fn extra_data(&self) -> Option<&[u8]> {
        None
    }

    /// Bytes prepended to the first keyframe packet.
    fn sei_data(&self) -> Option<&[u8]> {
        None
    }
}

/// Consumer of finished packets. Identity is the `Arc` itself.
pub trait PacketSink: Send + Sync {
    fn packet(&self, packet: &Packet);
}

/// Back-reference to a media output holding this encoder, used by the
/// failure path to stop and flush everything downstream.
pub trait MediaOutput: Send + Sync {
    fn stop(&self);
    fn flush_packets(&self);
    fn remove_encoder(&self, encoder: &Arc<Encoder>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dts_usec_uses_timebase() {
        let packet = Packet {
            data: Vec::new(),
            pts: 48_000,
            dts: 48_000,
            timebase_num: 1,
            timebase_den: 48_000,
            keyframe: true,
            kind: CodecKind::Audio,
            dts_usec: 0,
            sys_dts_usec: 0,
        };
        assert_eq!(packet_dts_usec(&packet), 1_000_000);
    }
}
