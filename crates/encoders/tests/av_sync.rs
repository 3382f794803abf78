//! Start-of-stream rendezvous between a paired audio and video encoder.

use std::sync::Arc;

use beam_encoders::{Encoder, Packet, PacketSink, PcmAudioCodec, RawVideoCodec};
use beam_media::{AudioData, AudioSink, VideoData, VideoSink};
use beam_media_info::{SpeakerLayout, VideoFormat, VideoFrame, MAX_AV_PLANES};
use parking_lot::Mutex;

#[derive(Default)]
struct Collect {
    packets: Mutex<Vec<Packet>>,
}

impl PacketSink for Collect {
    fn packet(&self, packet: &Packet) {
        self.packets.lock().push(packet.clone());
    }
}

const MS: u64 = 1_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn audio_chunk(frames: usize) -> Vec<u8> {
    let samples = vec![0.25f32; frames];
    samples.iter().flat_map(|s| s.to_ne_bytes()).collect()
}

fn feed_audio(encoder: &Encoder, plane: &[u8], frames: u32, timestamp: u64) {
    let mut data = AudioData {
        data: [&[]; MAX_AV_PLANES],
        frames,
        timestamp,
    };
    data.data[0] = plane;
    data.data[1] = plane;
    encoder.receive_audio(0, &data);
}

fn feed_video(encoder: &Encoder, frame: &VideoFrame, timestamp: u64) {
    encoder.receive_video(&VideoData { frame, timestamp });
}

#[test]
fn audio_waits_for_video_start() {
    init_tracing();
    let video = Encoder::new_video(Box::new(RawVideoCodec::new()), 2500).unwrap();
    let audio = Encoder::new_audio(
        Box::new(PcmAudioCodec::new(48_000, SpeakerLayout::Stereo).with_frame_size(64)),
        0,
        160,
    )
    .unwrap();
    audio.set_paired_encoder(&video);

    assert!(video.initialize());
    assert!(audio.initialize());

    let video_packets = Arc::new(Collect::default());
    let audio_packets = Arc::new(Collect::default());
    video.start(video_packets.clone());
    audio.start(audio_packets.clone());

    /* audio arrives first: buffered, nothing emitted */
    let chunk = audio_chunk(1024);
    feed_audio(&audio, &chunk, 1024, 100 * MS);
    assert!(audio_packets.packets.lock().is_empty());
    assert_eq!(audio.start_ts(), 0);

    /* the first video frame establishes the shared start point */
    let frame = VideoFrame::new(VideoFormat::Rgba, 2, 2).unwrap();
    feed_video(&video, &frame, 120 * MS);
    assert_eq!(video.start_ts(), 120 * MS);
    assert_eq!(video_packets.packets.lock().len(), 1);

    /* next audio chunk commits: back-filled from the buffer, samples
     * before 120 ms truncated */
    feed_audio(&audio, &chunk, 1024, 100 * MS + 21_333_333);
    assert_eq!(audio.start_ts(), 120 * MS);

    let packets = audio_packets.packets.lock();
    assert!(!packets.is_empty());

    /* [120 ms, 121.33 ms) of buffered audio is 64 samples = exactly one
     * frame; the second chunk contributes 16 more */
    assert_eq!(packets.len(), 17);
    assert_eq!(packets[0].pts, 0);
    assert_eq!(packets[0].dts_usec, 120_000);
    for (i, packet) in packets.iter().enumerate() {
        assert_eq!(packet.pts, i as i64 * 64);
    }

    /* 64 samples, stereo planar f32 */
    assert_eq!(packets[0].data.len(), 64 * 4 * 2);
}

#[test]
fn audio_chunk_entirely_before_video_is_dropped() {
    let video = Encoder::new_video(Box::new(RawVideoCodec::new()), 2500).unwrap();
    let audio = Encoder::new_audio(
        Box::new(PcmAudioCodec::new(48_000, SpeakerLayout::Stereo).with_frame_size(64)),
        0,
        160,
    )
    .unwrap();
    audio.set_paired_encoder(&video);
    assert!(video.initialize());
    assert!(audio.initialize());

    let audio_packets = Arc::new(Collect::default());
    let video_packets = Arc::new(Collect::default());
    video.start(video_packets);
    audio.start(audio_packets.clone());

    let frame = VideoFrame::new(VideoFormat::Rgba, 2, 2).unwrap();
    feed_video(&video, &frame, 500 * MS);

    /* ends at ~121 ms, well before the 500 ms video start */
    let chunk = audio_chunk(1024);
    feed_audio(&audio, &chunk, 1024, 100 * MS);
    assert!(audio_packets.packets.lock().is_empty());
    assert_eq!(audio.start_ts(), 0);
}

#[test]
fn unpaired_audio_starts_immediately() {
    let audio = Encoder::new_audio(
        Box::new(PcmAudioCodec::new(48_000, SpeakerLayout::Stereo).with_frame_size(64)),
        0,
        160,
    )
    .unwrap();
    assert!(audio.initialize());

    let packets = Arc::new(Collect::default());
    audio.start(packets.clone());

    let chunk = audio_chunk(1024);
    feed_audio(&audio, &chunk, 1024, 42 * MS);

    assert_eq!(audio.start_ts(), 42 * MS);
    assert_eq!(packets.packets.lock().len(), 16);
}

#[test]
fn first_video_packet_carries_header_bytes() {
    let video = Encoder::new_video(
        Box::new(RawVideoCodec::new().with_header(vec![0xAA, 0xBB, 0xCC])),
        2500,
    )
    .unwrap();
    assert!(video.initialize());

    let packets = Arc::new(Collect::default());
    video.start(packets.clone());

    let frame = VideoFrame::new(VideoFormat::Rgba, 2, 2).unwrap();
    feed_video(&video, &frame, 10 * MS);
    feed_video(&video, &frame, 43 * MS);

    let packets = packets.packets.lock();
    assert_eq!(packets.len(), 2);
    assert_eq!(&packets[0].data[..3], &[0xAA, 0xBB, 0xCC]);
    assert_ne!(&packets[1].data[..3], &[0xAA, 0xBB, 0xCC]);
}

#[test]
fn repeated_start_with_same_sink_is_ignored() {
    let audio = Encoder::new_audio(
        Box::new(PcmAudioCodec::new(48_000, SpeakerLayout::Stereo).with_frame_size(64)),
        0,
        160,
    )
    .unwrap();
    assert!(audio.initialize());

    let packets = Arc::new(Collect::default());
    let sink: Arc<dyn PacketSink> = packets.clone();
    audio.start(sink.clone());
    audio.start(sink.clone());

    let chunk = audio_chunk(64);
    feed_audio(&audio, &chunk, 64, 42 * MS);

    /* one registration, one delivery per packet */
    assert_eq!(packets.packets.lock().len(), 1);

    audio.stop(&sink);
    feed_audio(&audio, &chunk, 64, 43 * MS);
    assert_eq!(packets.packets.lock().len(), 1);
}
