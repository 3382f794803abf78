//! End-to-end video: headless device, frame-paced compositor, raw
//! subscriber.

use std::sync::Arc;
use std::time::Duration;

use beam_media::{Engine, SourceKind, VideoData, VideoSettings, VideoSink};
use beam_media_info::{VideoColorSpace, VideoFormat, VideoRange, MAX_AV_PLANES};
use parking_lot::Mutex;

struct CollectVideo {
    frames: Mutex<Vec<(u64, u32, u32, u8)>>,
}

impl VideoSink for CollectVideo {
    fn receive_video(&self, data: &VideoData<'_>) {
        let first_byte = data.frame.plane(0)[0];
        self.frames.lock().push((
            data.timestamp,
            data.frame.width(),
            data.frame.height(),
            first_byte,
        ));
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn composited_frames_reach_subscribers() {
    init_tracing();
    let engine = Engine::new();
    engine
        .start_video(&VideoSettings {
            width: 64,
            height: 36,
            fps_num: 60,
            fps_den: 1,
        })
        .unwrap();

    let source = engine.create_source(1, SourceKind::AsyncVideo);

    let sink = Arc::new(CollectVideo {
        frames: Mutex::new(Vec::new()),
    });
    engine.subscribe_video(None, sink.clone()).unwrap();

    /* push full-range RGBA frames: no conversion pass, the headless device
     * propagates bytes straight through the compositor */
    let pixels = vec![200u8; 64 * 36 * 4];
    for _ in 0..20 {
        let mut input = beam_media::SourceVideoInput {
            data: [&[]; MAX_AV_PLANES],
            linesize: [0; MAX_AV_PLANES],
            format: VideoFormat::Rgba,
            range: VideoRange::Full,
            colorspace: VideoColorSpace::Default,
            width: 64,
            height: 36,
        };
        input.data[0] = &pixels;
        input.linesize[0] = 64 * 4;
        source.output_video(&input);
        std::thread::sleep(Duration::from_millis(16));
    }

    std::thread::sleep(Duration::from_millis(100));

    let core = engine.video().unwrap();
    assert!(core.total_frames() > 0);

    engine.stop_video();

    let frames = sink.frames.lock();
    assert!(!frames.is_empty(), "no frames delivered");

    for (_, width, height, _) in frames.iter() {
        assert_eq!((*width, *height), (64, 36));
    }

    /* skipped slots still advance timestamps */
    for pair in frames.windows(2) {
        assert!(pair[1].0 >= pair[0].0);
    }

    /* source content survived the composite + download */
    assert!(frames.iter().any(|&(_, _, _, byte)| byte == 200));
}

#[test]
fn accounting_never_goes_negative() {
    let engine = Engine::new();
    engine
        .start_video(&VideoSettings {
            width: 32,
            height: 32,
            fps_num: 120,
            fps_den: 1,
        })
        .unwrap();

    let sink = Arc::new(CollectVideo {
        frames: Mutex::new(Vec::new()),
    });
    engine.subscribe_video(None, sink.clone()).unwrap();

    std::thread::sleep(Duration::from_millis(150));

    let core = engine.video().unwrap();
    let output = core.output().clone();
    let total = output.total_frames();
    let skipped = output.skipped_frames();
    assert!(total >= skipped);

    engine.stop_video();
}

#[test]
fn second_video_start_fails() {
    let engine = Engine::new();
    let settings = VideoSettings {
        width: 32,
        height: 32,
        fps_num: 30,
        fps_den: 1,
    };
    engine.start_video(&settings).unwrap();
    assert!(engine.start_video(&settings).is_err());
    engine.stop_video();

    /* stopping releases the slot */
    engine.start_video(&settings).unwrap();
    engine.stop_video();
}

#[test]
fn invalid_video_settings_fail() {
    let engine = Engine::new();
    assert!(engine
        .start_video(&VideoSettings {
            width: 0,
            height: 32,
            fps_num: 30,
            fps_den: 1,
        })
        .is_err());
    assert!(engine.video().is_none());
}
