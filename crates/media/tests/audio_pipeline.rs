//! End-to-end audio: engine-owned mix thread, a pushing source and a
//! subscriber receiving mixed PCM.

use std::sync::Arc;
use std::time::Duration;

use beam_media::{
    clock, AudioData, AudioSettings, AudioSink, Engine, SourceAudioFrame, SourceKind,
    AUDIO_OUTPUT_FRAMES,
};
use beam_media_info::{audio_frames_to_ns, AudioFormat, SpeakerLayout, MAX_AV_PLANES};
use parking_lot::Mutex;

const RATE: u32 = 48_000;
const TICK_NS: u64 = 1024 * 1_000_000_000 / RATE as u64;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

struct CollectAudio {
    ticks: Mutex<Vec<(u64, Vec<f32>)>>,
}

impl AudioSink for CollectAudio {
    fn receive_audio(&self, mix_idx: usize, data: &AudioData<'_>) {
        assert_eq!(mix_idx, 0);
        let samples: Vec<f32> = data.data[0]
            .chunks_exact(4)
            .map(|b| f32::from_ne_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        self.ticks.lock().push((data.timestamp, samples));
    }
}

fn push_chunk(source: &beam_media::Source, value: f32, timestamp: u64) {
    let samples = vec![value; AUDIO_OUTPUT_FRAMES];
    let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_ne_bytes()).collect();

    let mut frame = SourceAudioFrame {
        data: [&[]; MAX_AV_PLANES],
        frames: AUDIO_OUTPUT_FRAMES as u32,
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
fn mixed_ticks_reach_subscribers_in_order() {
    init_tracing();
    let engine = Engine::new();
    engine
        .start_audio(&AudioSettings {
            samples_per_sec: RATE,
            speakers: SpeakerLayout::Stereo,
        })
        .unwrap();

    let source = engine.create_source(1, SourceKind::Audio);

    let sink = Arc::new(CollectAudio {
        ticks: Mutex::new(Vec::new()),
    });
    engine.subscribe_audio(0, None, sink.clone()).unwrap();

    /* stream ~25 ticks of constant-value PCM stamped with "now" */
    let mut ts = clock::now_ns();
    for _ in 0..25 {
        push_chunk(&source, 0.25, ts);
        ts += audio_frames_to_ns(RATE, AUDIO_OUTPUT_FRAMES as u64);
        std::thread::sleep(Duration::from_nanos(TICK_NS));
    }

    std::thread::sleep(Duration::from_millis(120));
    engine.stop_audio();

    let ticks = sink.ticks.lock();
    assert!(ticks.len() >= 10, "only {} ticks delivered", ticks.len());

    /* non-suppressed ticks are exactly one window apart (the window chain
     * is computed from cumulative sample counts, so deltas wobble by one
     * nanosecond of rounding) */
    for pair in ticks.windows(2) {
        assert!(pair[1].0 > pair[0].0);
        let delta = pair[1].0 - pair[0].0;
        assert!(
            (TICK_NS..=TICK_NS + 2).contains(&delta),
            "tick spacing {delta}"
        );
    }

    /* the source's PCM made it through unscaled */
    let mixed: usize = ticks
        .iter()
        .map(|(_, samples)| samples.iter().filter(|&&s| s == 0.25).count())
        .sum();
    assert!(mixed > 0, "no source samples were mixed");

    /* everything stayed within clamp range */
    for (_, samples) in ticks.iter() {
        assert!(samples.iter().all(|s| (-1.0..=1.0).contains(s)));
    }
}

#[test]
fn subscribe_then_unsubscribe_restores_input_set() {
    let engine = Engine::new();
    engine
        .start_audio(&AudioSettings {
            samples_per_sec: RATE,
            speakers: SpeakerLayout::Stereo,
        })
        .unwrap();

    let sink = Arc::new(CollectAudio {
        ticks: Mutex::new(Vec::new()),
    });
    let dyn_sink: Arc<dyn AudioSink> = sink.clone();

    let output = engine.audio().unwrap().output().clone();
    assert!(!output.active());

    engine.subscribe_audio(0, None, dyn_sink.clone()).unwrap();
    /* duplicate registration is ignored */
    engine.subscribe_audio(0, None, dyn_sink.clone()).unwrap();
    assert!(output.active());

    engine.unsubscribe_audio(0, &dyn_sink);
    assert!(!output.active());

    engine.stop_audio();
}

#[test]
fn second_start_fails_while_active() {
    let engine = Engine::new();
    let settings = AudioSettings {
        samples_per_sec: RATE,
        speakers: SpeakerLayout::Stereo,
    };
    engine.start_audio(&settings).unwrap();

    let sink = Arc::new(CollectAudio {
        ticks: Mutex::new(Vec::new()),
    });
    engine.subscribe_audio(0, None, sink).unwrap();

    assert!(engine.start_audio(&settings).is_err());
    engine.stop_audio();
}

#[test]
fn invalid_settings_fail_cleanly() {
    let engine = Engine::new();
    assert!(engine
        .start_audio(&AudioSettings {
            samples_per_sec: 0,
            speakers: SpeakerLayout::Stereo,
        })
        .is_err());
    assert!(engine.audio().is_none());
}
