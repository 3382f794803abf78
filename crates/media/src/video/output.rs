//! The video output: a ring of pre-allocated frames between the compositor
//! and a delivery thread that fans frames out to subscribers, scaling per
//! subscriber where requested.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use beam_media_info::{VideoColorSpace, VideoFormat, VideoFrame, VideoRange, VideoScaleInfo};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use super::{VideoData, VideoSink};
use crate::scale::{ScalerProvider, VideoScaler};
use crate::{MediaError, MAX_CONVERT_BUFFERS, VIDEO_CACHE_SIZE};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoOutputInfo {
    pub format: VideoFormat,
    pub fps_num: u32,
    pub fps_den: u32,
    pub width: u32,
    pub height: u32,
    pub cache_size: usize,
    pub colorspace: VideoColorSpace,
    pub range: VideoRange,
}

struct CachedFrame {
    frame: VideoFrame,
    timestamp: u64,
    skipped: i32,
    count: i32,
}

struct FrameCache {
    available_frames: usize,
    first_added: usize,
    last_added: usize,
    cache: Vec<CachedFrame>,
}

struct VideoInput {
    conversion: VideoScaleInfo,
    scaler: Option<Box<dyn VideoScaler>>,
    frames: Vec<VideoFrame>,
    cur_frame: usize,
    sink: Arc<dyn VideoSink>,
}

pub struct VideoOutput {
    info: VideoOutputInfo,
    frame_time: u64,

    stop: AtomicBool,
    thread: Mutex<Option<JoinHandle<()>>>,

    /* counting semaphore waking the delivery thread */
    sem_tx: flume::Sender<()>,
    sem_rx: flume::Receiver<()>,

    skipped_frames: AtomicU64,
    total_frames: AtomicU64,

    inputs: Mutex<Vec<Arc<Mutex<VideoInput>>>>,
    data: Mutex<FrameCache>,

    raw_active: AtomicBool,
    gpu_refs: AtomicI64,

    scalers: Arc<dyn ScalerProvider>,
}

fn valid_video_params(info: &VideoOutputInfo) -> bool {
    info.height != 0 && info.width != 0 && info.fps_den != 0 && info.fps_num != 0
}

impl VideoOutput {
    pub(crate) fn open(
        mut info: VideoOutputInfo,
        scalers: Arc<dyn ScalerProvider>,
    ) -> Result<Arc<VideoOutput>, MediaError> {
        if !valid_video_params(&info) {
            return Err(MediaError::InvalidParameter("video output info"));
        }

        if info.cache_size > VIDEO_CACHE_SIZE {
            info.cache_size = VIDEO_CACHE_SIZE;
        }

        let mut cache = Vec::with_capacity(info.cache_size);
        for _ in 0..info.cache_size {
            let frame = VideoFrame::new(info.format, info.width, info.height)
                .ok_or(MediaError::InvalidParameter("video output format"))?;
            cache.push(CachedFrame {
                frame,
                timestamp: 0,
                skipped: 0,
                count: 0,
            });
        }

        let (sem_tx, sem_rx) = flume::unbounded();
        let frame_time = (1_000_000_000.0 * info.fps_den as f64 / info.fps_num as f64) as u64;

        let output = Arc::new(VideoOutput {
            frame_time,
            stop: AtomicBool::new(false),
            thread: Mutex::new(None),
            sem_tx,
            sem_rx,
            skipped_frames: AtomicU64::new(0),
            total_frames: AtomicU64::new(0),
            inputs: Mutex::new(Vec::new()),
            data: Mutex::new(FrameCache {
                available_frames: info.cache_size,
                first_added: 0,
                last_added: 0,
                cache,
            }),
            raw_active: AtomicBool::new(false),
            gpu_refs: AtomicI64::new(0),
            info,
            scalers,
        });

        let worker = output.clone();
        let handle = std::thread::Builder::new()
            .name("beam-video-out".into())
            .spawn(move || worker.video_thread())
            .map_err(|e| MediaError::Any(format!("video thread spawn: {e}").into()))?;
        *output.thread.lock() = Some(handle);

        Ok(output)
    }

    pub fn info(&self) -> &VideoOutputInfo {
        &self.info
    }

    pub fn width(&self) -> u32 {
        self.info.width
    }

    pub fn height(&self) -> u32 {
        self.info.height
    }

    pub fn frame_rate(&self) -> f64 {
        self.info.fps_num as f64 / self.info.fps_den as f64
    }

    pub fn frame_time(&self) -> u64 {
        self.frame_time
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub fn skipped_frames(&self) -> u64 {
        self.skipped_frames.load(Ordering::Acquire)
    }

    pub(crate) fn raw_active(&self) -> bool {
        self.raw_active.load(Ordering::Acquire)
    }

    pub fn connect(
        &self,
        conversion: Option<VideoScaleInfo>,
        sink: Arc<dyn VideoSink>,
    ) -> Result<(), MediaError> {
        let mut inputs = self.inputs.lock();

        if inputs
            .iter()
            .any(|input| Arc::ptr_eq(&input.lock().sink, &sink))
        {
            return Ok(());
        }

        let mut conversion = conversion.unwrap_or(VideoScaleInfo {
            format: self.info.format,
            width: self.info.width,
            height: self.info.height,
            range: self.info.range,
            colorspace: self.info.colorspace,
        });
        if conversion.width == 0 {
            conversion.width = self.info.width;
        }
        if conversion.height == 0 {
            conversion.height = self.info.height;
        }

        let mut input = VideoInput {
            conversion,
            scaler: None,
            frames: Vec::new(),
            cur_frame: 0,
            sink,
        };

        if conversion.width != self.info.width
            || conversion.height != self.info.height
            || conversion.format != self.info.format
        {
            let from = VideoScaleInfo {
                format: self.info.format,
                width: self.info.width,
                height: self.info.height,
                range: self.info.range,
                colorspace: self.info.colorspace,
            };

            input.scaler = match self.scalers.create(&conversion, &from) {
                Ok(scaler) => Some(scaler),
                Err(MediaError::BadConversion) => {
                    error!("video connect: bad scale conversion type");
                    return Err(MediaError::BadConversion);
                }
                Err(e) => {
                    error!("video connect: failed to create scaler: {e}");
                    return Err(MediaError::ScalerCreate);
                }
            };

            for _ in 0..MAX_CONVERT_BUFFERS {
                let frame =
                    VideoFrame::new(conversion.format, conversion.width, conversion.height)
                        .ok_or(MediaError::InvalidParameter("conversion format"))?;
                input.frames.push(frame);
            }
        }

        if inputs.is_empty() {
            if self.gpu_refs.load(Ordering::Acquire) == 0 {
                self.reset_frames();
            }
            self.raw_active.store(true, Ordering::Release);
        }
        inputs.push(Arc::new(Mutex::new(input)));

        Ok(())
    }

    pub fn disconnect(&self, sink: &Arc<dyn VideoSink>) {
        let mut inputs = self.inputs.lock();
        let before = inputs.len();
        inputs.retain(|input| !Arc::ptr_eq(&input.lock().sink, sink));

        if before != inputs.len() && inputs.is_empty() {
            self.raw_active.store(false, Ordering::Release);
            if self.gpu_refs.load(Ordering::Acquire) == 0 {
                self.log_skipped();
            }
        }
    }

    pub fn stop(&self) {
        if self.stop.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.sem_tx.send(());
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    pub fn stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.stop();
        self.inputs.lock().clear();
    }

    /// Reserve the next cache slot and fill it. Returns false when the
    /// cache is exhausted; the skip is charged to the newest slot.
    pub fn lock_frame(
        &self,
        count: i32,
        timestamp: u64,
        fill: impl FnOnce(&mut VideoFrame),
    ) -> bool {
        let mut data = self.data.lock();

        if data.available_frames == 0 {
            let last = data.last_added;
            data.cache[last].count += count;
            data.cache[last].skipped += count;
            return false;
        }

        if data.available_frames != self.info.cache_size {
            data.last_added += 1;
            if data.last_added == self.info.cache_size {
                data.last_added = 0;
            }
        }

        let last = data.last_added;
        let slot = &mut data.cache[last];
        slot.timestamp = timestamp;
        slot.count = count;
        slot.skipped = 0;
        fill(&mut slot.frame);

        true
    }

    /// Publish the frame filled by the matching [`lock_frame`].
    pub fn unlock_frame(&self) {
        let mut data = self.data.lock();
        data.available_frames -= 1;
        drop(data);
        let _ = self.sem_tx.send(());
    }

    pub(crate) fn inc_texture_encoders(&self) {
        let refs = self.gpu_refs.fetch_add(1, Ordering::AcqRel) + 1;
        if refs == 1 && !self.raw_active() {
            self.reset_frames();
        }
    }

    pub(crate) fn dec_texture_encoders(&self) {
        let refs = self.gpu_refs.fetch_sub(1, Ordering::AcqRel) - 1;
        if refs == 0 && !self.raw_active() {
            self.log_skipped();
        }
    }

    pub(crate) fn inc_texture_frames(&self) {
        self.total_frames.fetch_add(1, Ordering::AcqRel);
    }

    pub(crate) fn inc_texture_skipped_frames(&self) {
        self.skipped_frames.fetch_add(1, Ordering::AcqRel);
    }

    fn reset_frames(&self) {
        self.skipped_frames.store(0, Ordering::Release);
        self.total_frames.store(0, Ordering::Release);
    }

    fn log_skipped(&self) {
        let skipped = self.skipped_frames.load(Ordering::Acquire);
        let total = self.total_frames.load(Ordering::Acquire);
        if skipped > 0 && total > 0 {
            info!(
                "Video stopped, number of skipped frames due to encoding lag: {}/{} ({:.1}%)",
                skipped,
                total,
                skipped as f64 / total as f64 * 100.0
            );
        }
    }

    fn video_thread(self: Arc<VideoOutput>) {
        while self.sem_rx.recv().is_ok() {
            if self.stop.load(Ordering::Acquire) {
                break;
            }

            while !self.stop.load(Ordering::Acquire) && !self.output_cur_frame() {
                self.total_frames.fetch_add(1, Ordering::AcqRel);
            }

            self.total_frames.fetch_add(1, Ordering::AcqRel);
        }
    }

    /// Deliver the oldest cached frame once; returns true when the slot is
    /// fully consumed.
    fn output_cur_frame(&self) -> bool {
        /* -------------------------------- */

        let (frame, timestamp) = {
            let data = self.data.lock();
            let slot = &data.cache[data.first_added];
            (slot.frame.clone(), slot.timestamp)
        };

        /* -------------------------------- */

        let inputs: Vec<_> = self.inputs.lock().iter().cloned().collect();

        for input in inputs {
            let mut guard = input.lock();
            let input = &mut *guard;

            match input.scaler.as_mut() {
                Some(scaler) => {
                    input.cur_frame += 1;
                    if input.cur_frame == MAX_CONVERT_BUFFERS {
                        input.cur_frame = 0;
                    }
                    let buffer = &mut input.frames[input.cur_frame];

                    if let Err(e) = scaler.scale(buffer, &frame) {
                        warn!(
                            "video-io: could not scale frame to {:?}: {e}",
                            input.conversion.format
                        );
                        continue;
                    }

                    input.sink.receive_video(&VideoData {
                        frame: buffer,
                        timestamp,
                    });
                }
                None => {
                    input.sink.receive_video(&VideoData {
                        frame: &frame,
                        timestamp,
                    });
                }
            }
        }

        /* -------------------------------- */

        let mut data = self.data.lock();
        let cache_size = self.info.cache_size;
        let first = data.first_added;
        let slot = &mut data.cache[first];

        slot.timestamp += self.frame_time;
        slot.count -= 1;
        let complete = slot.count == 0;
        let skipped = slot.skipped > 0;

        if complete {
            data.first_added += 1;
            if data.first_added == cache_size {
                data.first_added = 0;
            }

            data.available_frames += 1;
            if data.available_frames == cache_size {
                data.last_added = data.first_added;
            }
        } else if skipped {
            data.cache[first].skipped -= 1;
            self.skipped_frames.fetch_add(1, Ordering::AcqRel);
        }

        complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scale::SoftwareScalers;

    fn test_output() -> Arc<VideoOutput> {
        VideoOutput::open(
            VideoOutputInfo {
                format: VideoFormat::Rgba,
                fps_num: 30,
                fps_den: 1,
                width: 4,
                height: 4,
                cache_size: VIDEO_CACHE_SIZE,
                colorspace: VideoColorSpace::Default,
                range: VideoRange::Full,
            },
            Arc::new(SoftwareScalers),
        )
        .unwrap()
    }

    #[test]
    fn invalid_params_fail_open() {
        let result = VideoOutput::open(
            VideoOutputInfo {
                format: VideoFormat::Rgba,
                fps_num: 0,
                fps_den: 1,
                width: 4,
                height: 4,
                cache_size: 16,
                colorspace: VideoColorSpace::Default,
                range: VideoRange::Full,
            },
            Arc::new(SoftwareScalers),
        );
        assert!(matches!(result, Err(MediaError::InvalidParameter(_))));
    }

    struct BlockingSink {
        gate: flume::Receiver<()>,
        delivered: AtomicU64,
    }

    impl VideoSink for BlockingSink {
        fn receive_video(&self, _data: &VideoData<'_>) {
            self.delivered.fetch_add(1, Ordering::AcqRel);
            let _ = self.gate.recv();
        }
    }

    #[test]
    fn cache_starvation_counts_skips() {
        let output = test_output();

        /* a subscriber that stalls on its first frame keeps the delivery
         * thread from draining the cache */
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);
        let sink = Arc::new(BlockingSink {
            gate: gate_rx,
            delivered: AtomicU64::new(0),
        });
        output.connect(None, sink.clone()).unwrap();

        for i in 0..VIDEO_CACHE_SIZE {
            assert!(output.lock_frame(1, i as u64, |_| {}), "slot {i}");
            output.unlock_frame();
        }

        /* 17th consecutive lock fails and charges the newest slot */
        assert!(!output.lock_frame(1, 99, |_| {}));

        {
            let data = output.data.lock();
            let last = data.last_added;
            assert_eq!(data.cache[last].skipped, 1);
            assert!(data.cache[last].count >= 1);
        }

        /* let the delivery thread reach the stalled callback */
        for _ in 0..200 {
            if sink.delivered.load(Ordering::Acquire) >= 1 {
                break;
            }
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(sink.delivered.load(Ordering::Acquire) >= 1);

        drop(gate_tx);
        output.close();
    }

    #[test]
    fn frame_time_matches_fps() {
        let output = test_output();
        assert_eq!(output.frame_time(), 1_000_000_000 / 30);
        output.close();
    }
}
