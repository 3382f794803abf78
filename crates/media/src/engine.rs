//! The embeddable lifecycle facade: start/stop the audio and video cores,
//! create and destroy sources, subscribe consumers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use beam_gfx::headless::HeadlessDevice;
use beam_gfx::GpuDevice;
use beam_media_info::{AudioConvertInfo, VideoScaleInfo};
use parking_lot::Mutex;
use tracing::debug;

use crate::audio::{AudioSettings, AudioSink, CoreAudio};
use crate::registry::{SourceKind, SourceRegistry};
use crate::resample::{ResamplerProvider, SoftwareResamplers};
use crate::scale::{ScalerProvider, SoftwareScalers};
use crate::source::Source;
use crate::video::{CoreVideo, VideoSettings, VideoSink};
use crate::MediaError;

pub struct Engine {
    registry: Arc<SourceRegistry>,
    device: Arc<dyn GpuDevice>,
    resamplers: Arc<dyn ResamplerProvider>,
    scalers: Arc<dyn ScalerProvider>,

    audio: Mutex<Option<Arc<CoreAudio>>>,
    video: Mutex<Option<Arc<CoreVideo>>>,

    next_source_id: AtomicU64,
}

impl Engine {
    /// An engine backed by the built-in software collaborators.
    pub fn new() -> Engine {
        Engine::with_collaborators(
            Arc::new(HeadlessDevice::new()),
            Arc::new(SoftwareResamplers),
            Arc::new(SoftwareScalers),
        )
    }

    pub fn with_collaborators(
        device: Arc<dyn GpuDevice>,
        resamplers: Arc<dyn ResamplerProvider>,
        scalers: Arc<dyn ScalerProvider>,
    ) -> Engine {
        Engine {
            registry: Arc::new(SourceRegistry::new()),
            device,
            resamplers,
            scalers,
            audio: Mutex::new(None),
            video: Mutex::new(None),
            next_source_id: AtomicU64::new(1),
        }
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn start_audio(&self, settings: &AudioSettings) -> Result<(), MediaError> {
        let mut audio = self.audio.lock();
        if let Some(existing) = audio.as_ref() {
            if existing.output().active() {
                return Err(MediaError::AlreadyActive);
            }
            existing.stop();
        }

        let core = CoreAudio::start(self.registry.clone(), settings, self.resamplers.clone())?;
        *audio = Some(core);
        Ok(())
    }

    pub fn stop_audio(&self) {
        if let Some(core) = self.audio.lock().take() {
            core.stop();
        }
    }

    pub fn start_video(&self, settings: &VideoSettings) -> Result<(), MediaError> {
        let mut video = self.video.lock();
        if video.is_some() {
            return Err(MediaError::AlreadyActive);
        }

        let core = CoreVideo::start(
            self.device.clone(),
            self.registry.clone(),
            settings,
            self.scalers.clone(),
        )?;
        *video = Some(core);
        Ok(())
    }

    pub fn stop_video(&self) {
        if let Some(core) = self.video.lock().take() {
            core.stop();
        }
    }

    pub fn audio(&self) -> Option<Arc<CoreAudio>> {
        self.audio.lock().clone()
    }

    pub fn video(&self) -> Option<Arc<CoreVideo>> {
        self.video.lock().clone()
    }

    /// Create and register a source. The source binds to whichever cores
    /// are running right now; start audio/video first.
    pub fn create_source(&self, owner: u64, kind: SourceKind) -> Arc<Source> {
        let id = self.next_source_id.fetch_add(1, Ordering::AcqRel);

        let core_audio = self
            .audio
            .lock()
            .as_ref()
            .map(Arc::downgrade)
            .unwrap_or_else(Weak::new);
        let core_video = self
            .video
            .lock()
            .as_ref()
            .map(Arc::downgrade)
            .unwrap_or_else(Weak::new);

        let source = Source::new(id, owner, kind, core_audio, core_video);
        self.registry.register(owner, id, kind, source.clone());
        debug!("source {id} created (owner {owner}, {kind:?})");
        source
    }

    pub fn destroy_source(&self, source: &Arc<Source>) {
        if self.registry.unregister(source.owner(), source.id()).is_some() {
            debug!("source {} destroyed", source.id());
        }
    }

    pub fn subscribe_audio(
        &self,
        mix_idx: usize,
        conversion: Option<AudioConvertInfo>,
        sink: Arc<dyn AudioSink>,
    ) -> Result<(), MediaError> {
        let audio = self.audio.lock();
        let Some(core) = audio.as_ref() else {
            return Err(MediaError::Any("audio is not running".into()));
        };
        core.output().connect(mix_idx, conversion, sink)
    }

    pub fn unsubscribe_audio(&self, mix_idx: usize, sink: &Arc<dyn AudioSink>) {
        if let Some(core) = self.audio.lock().as_ref() {
            core.output().disconnect(mix_idx, sink);
        }
    }

    pub fn subscribe_video(
        &self,
        conversion: Option<VideoScaleInfo>,
        sink: Arc<dyn VideoSink>,
    ) -> Result<(), MediaError> {
        let video = self.video.lock();
        let Some(core) = video.as_ref() else {
            return Err(MediaError::Any("video is not running".into()));
        };
        core.output().connect(conversion, sink)
    }

    pub fn unsubscribe_video(&self, sink: &Arc<dyn VideoSink>) {
        if let Some(core) = self.video.lock().as_ref() {
            core.output().disconnect(sink);
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop_audio();
        self.stop_video();
    }
}
