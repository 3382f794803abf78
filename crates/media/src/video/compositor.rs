//! The compositor: a frame-paced graphics thread that updates async
//! sources, composites everything onto the main target and pumps the
//! result to raw consumers and GPU encoders.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use beam_gfx::{ColorFormat, GpuDevice};
use beam_media_info::{VideoColorSpace, VideoFormat, VideoFrame, VideoRange};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use super::output::{VideoOutput, VideoOutputInfo};
use super::GpuEncoderSink;
use crate::event::ManualEvent;
use crate::registry::SourceRegistry;
use crate::scale::ScalerProvider;
use crate::{clock, MediaError, VIDEO_CACHE_SIZE};

/// Parameters for `Engine::start_video`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub fps_num: u32,
    pub fps_den: u32,
}

pub struct CoreVideo {
    device: Arc<dyn GpuDevice>,
    registry: Arc<SourceRegistry>,
    output: Arc<VideoOutput>,

    stop: Arc<ManualEvent>,
    thread: Mutex<Option<JoinHandle<()>>>,

    width: u32,
    height: u32,
    frame_interval: u64,

    total_frames: AtomicU64,
    lagged_frames: AtomicU64,

    gpu_encoders: Mutex<Vec<Arc<dyn GpuEncoderSink>>>,
}

impl CoreVideo {
    pub(crate) fn start(
        device: Arc<dyn GpuDevice>,
        registry: Arc<SourceRegistry>,
        settings: &VideoSettings,
        scalers: Arc<dyn ScalerProvider>,
    ) -> Result<Arc<CoreVideo>, MediaError> {
        if settings.width == 0
            || settings.height == 0
            || settings.fps_num == 0
            || settings.fps_den == 0
        {
            return Err(MediaError::InvalidParameter("video settings"));
        }

        clock::init();

        let output = VideoOutput::open(
            VideoOutputInfo {
                format: VideoFormat::Rgba,
                fps_num: settings.fps_num,
                fps_den: settings.fps_den,
                width: settings.width,
                height: settings.height,
                cache_size: VIDEO_CACHE_SIZE,
                colorspace: VideoColorSpace::Default,
                range: VideoRange::Full,
            },
            scalers,
        )?;

        let frame_interval =
            (1_000_000_000.0 * settings.fps_den as f64 / settings.fps_num as f64) as u64;

        let core = Arc::new(CoreVideo {
            device,
            registry,
            output,
            stop: Arc::new(ManualEvent::new()),
            thread: Mutex::new(None),
            width: settings.width,
            height: settings.height,
            frame_interval,
            total_frames: AtomicU64::new(0),
            lagged_frames: AtomicU64::new(0),
            gpu_encoders: Mutex::new(Vec::new()),
        });

        info!(
            "video settings reset: base resolution: {}x{}, fps: {}/{}",
            settings.width, settings.height, settings.fps_num, settings.fps_den
        );

        let worker = core.clone();
        let handle = std::thread::Builder::new()
            .name("beam-graphics".into())
            .spawn(move || worker.graphics_thread())
            .map_err(|e| MediaError::Any(format!("graphics thread spawn: {e}").into()))?;
        *core.thread.lock() = Some(handle);

        Ok(core)
    }

    pub fn device(&self) -> &Arc<dyn GpuDevice> {
        &self.device
    }

    pub fn output(&self) -> &Arc<VideoOutput> {
        &self.output
    }

    pub fn total_frames(&self) -> u64 {
        self.total_frames.load(Ordering::Acquire)
    }

    pub fn lagged_frames(&self) -> u64 {
        self.lagged_frames.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.stop.signal();
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
        self.output.close();

        let total = self.total_frames.load(Ordering::Acquire);
        let lagged = self.lagged_frames.load(Ordering::Acquire);
        if total > 0 {
            info!(
                "Video stopped, number of lagged frames due to rendering lag: {}/{} ({:.1}%)",
                lagged,
                total,
                lagged as f64 / total as f64 * 100.0
            );
        }
    }

    pub fn add_gpu_encoder(&self, encoder: Arc<dyn GpuEncoderSink>) {
        self.gpu_encoders.lock().push(encoder);
        self.output.inc_texture_encoders();
    }

    pub fn remove_gpu_encoder(&self, encoder: &Arc<dyn GpuEncoderSink>) {
        let mut encoders = self.gpu_encoders.lock();
        let before = encoders.len();
        encoders.retain(|e| !Arc::ptr_eq(e, encoder));
        if encoders.len() != before {
            self.output.dec_texture_encoders();
        }
    }

    fn graphics_thread(self: Arc<CoreVideo>) {
        self.device.make_current();

        let main_render = match self.device.texrender_create(ColorFormat::Rgba) {
            Ok(render) => render,
            Err(e) => {
                error!("main render target creation failed: {e}");
                self.device.done_current();
                return;
            }
        };

        let mut download = match VideoFrame::new(VideoFormat::Rgba, self.width, self.height) {
            Some(frame) => frame,
            None => {
                self.device.done_current();
                return;
            }
        };

        let interval = self.frame_interval;
        let mut frame_ts = clock::now_ns();

        loop {
            frame_ts += interval;

            /* sleep until the frame is due; count missed intervals */
            let mut count: i32 = 1;
            let now = clock::now_ns();
            if frame_ts > now {
                if self.stop.wait_deadline(frame_ts) {
                    break;
                }
            } else {
                count = ((now - frame_ts) / interval + 1) as i32;
                if count > 1 {
                    self.lagged_frames
                        .fetch_add(count as u64 - 1, Ordering::AcqRel);
                    frame_ts += (count as u64 - 1) * interval;
                }
                if self.stop.is_signalled() {
                    break;
                }
            }

            let sys_time = clock::now_ns();
            let sources = self.registry.video_sources();

            for source in &sources {
                source.update_async_video(&*self.device, sys_time);
            }

            /* composite */
            main_render.reset();
            if main_render.begin(self.width, self.height) {
                self.device.clear([0.0, 0.0, 0.0, 0.0]);
                for source in &sources {
                    source.render_video(&*self.device);
                }
                main_render.end();
            }

            self.total_frames.fetch_add(count as u64, Ordering::AcqRel);

            /* pump the composed frame */
            let raw_active = self.output.raw_active();
            let encoders: Vec<_> = self.gpu_encoders.lock().iter().cloned().collect();

            if !raw_active && encoders.is_empty() {
                continue;
            }

            let Some(texture) = main_render.texture() else {
                continue;
            };

            for encoder in &encoders {
                encoder.receive_texture(&texture, frame_ts);
                self.output.inc_texture_frames();
            }

            if raw_active {
                let linesize = download.linesize(0);
                match self
                    .device
                    .texture_read(&texture, download.plane_mut(0), linesize)
                {
                    Ok(()) => {
                        let filled = self.output.lock_frame(count, frame_ts, |dst| {
                            dst.copy_content_from(&download);
                        });
                        if filled {
                            self.output.unlock_frame();
                        }
                    }
                    Err(e) => error!("composed frame read-back failed: {e}"),
                }
            }
        }

        self.device.done_current();
    }
}
