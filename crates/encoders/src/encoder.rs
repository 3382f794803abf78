//! The encoder core shared by audio and video codecs.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use beam_gfx::Texture;
use beam_media::ring::ChannelRing;
use beam_media::{
    AudioData, AudioSink, CoreAudio, CoreVideo, GpuEncoderSink, VideoData, VideoSink,
};
use beam_media_info::{
    audio_block_size, audio_planes, AudioConvertInfo, VideoFormat, VideoScaleInfo, MAX_AV_PLANES,
};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::{
    packet_dts_usec, Codec, CodecKind, EncoderFrame, MediaOutput, Packet, PacketSink,
};

struct AudioEncState {
    samplerate: u32,
    planes: usize,
    blocksize: usize,
    framesize: usize,
    framesize_bytes: usize,
    input: [ChannelRing; MAX_AV_PLANES],
}

impl AudioEncState {
    fn new() -> AudioEncState {
        AudioEncState {
            samplerate: 0,
            planes: 0,
            blocksize: 0,
            framesize: 0,
            framesize_bytes: 0,
            input: std::array::from_fn(|_| ChannelRing::new()),
        }
    }

    fn clear(&mut self) {
        for ring in self.input.iter_mut() {
            ring.clear();
        }
    }
}

struct TimingState {
    offset_usec: i64,
    cur_pts: i64,
}

struct CallbackEntry {
    sink: Arc<dyn PacketSink>,
    sent_first_packet: bool,
}

pub struct Encoder {
    kind: CodecKind,
    bitrate: AtomicI32,
    mixer_idx: usize,

    /* for the failure path, which must disconnect this encoder by identity */
    weak_self: Weak<Encoder>,

    /* serializes initialize/shutdown/start/stop/destroy; never held across
     * an output disconnect (see `stop`) */
    init_mutex: Mutex<()>,
    codec: Mutex<Box<dyn Codec>>,

    audio: Mutex<AudioEncState>,
    timing: Mutex<TimingState>,

    /* start-of-stream rendezvous, read cross-encoder */
    first_received: AtomicBool,
    first_raw_ts: AtomicU64,
    start_ts: AtomicU64,

    paired: Mutex<Weak<Encoder>>,

    timebase_num: AtomicU32,
    timebase_den: AtomicU32,

    scaled_width: AtomicU32,
    scaled_height: AtomicU32,
    preferred_format: Mutex<VideoFormat>,

    active: AtomicBool,
    initialized: AtomicBool,
    destroy_on_stop: AtomicBool,

    callbacks: Mutex<Vec<CallbackEntry>>,

    a_media: Mutex<Weak<beam_media::audio::AudioOutput>>,
    v_media: Mutex<Weak<beam_media::video::VideoOutput>>,
    core_video: Mutex<Weak<CoreVideo>>,

    outputs: Mutex<Vec<Weak<dyn MediaOutput>>>,
}

impl Encoder {
    pub fn new_video(codec: Box<dyn Codec>, bitrate: i32) -> Result<Arc<Encoder>, crate::EncoderError> {
        if codec.kind() != CodecKind::Video {
            return Err(crate::EncoderError::WrongKind);
        }
        Ok(Self::new(codec, bitrate, 0))
    }

    pub fn new_audio(
        codec: Box<dyn Codec>,
        mixer_idx: usize,
        bitrate: i32,
    ) -> Result<Arc<Encoder>, crate::EncoderError> {
        if codec.kind() != CodecKind::Audio {
            return Err(crate::EncoderError::WrongKind);
        }
        Ok(Self::new(codec, bitrate, mixer_idx))
    }

    fn new(codec: Box<dyn Codec>, bitrate: i32, mixer_idx: usize) -> Arc<Encoder> {
        Arc::new_cyclic(|weak| Encoder {
            kind: codec.kind(),
            bitrate: AtomicI32::new(bitrate),
            mixer_idx,
            weak_self: weak.clone(),
            init_mutex: Mutex::new(()),
            codec: Mutex::new(codec),
            audio: Mutex::new(AudioEncState::new()),
            timing: Mutex::new(TimingState {
                offset_usec: 0,
                cur_pts: 0,
            }),
            first_received: AtomicBool::new(false),
            first_raw_ts: AtomicU64::new(0),
            start_ts: AtomicU64::new(0),
            paired: Mutex::new(Weak::new()),
            timebase_num: AtomicU32::new(0),
            timebase_den: AtomicU32::new(0),
            scaled_width: AtomicU32::new(0),
            scaled_height: AtomicU32::new(0),
            preferred_format: Mutex::new(VideoFormat::None),
            active: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            destroy_on_stop: AtomicBool::new(false),
            callbacks: Mutex::new(Vec::new()),
            a_media: Mutex::new(Weak::new()),
            v_media: Mutex::new(Weak::new()),
            core_video: Mutex::new(Weak::new()),
            outputs: Mutex::new(Vec::new()),
        })
    }

    pub fn kind(&self) -> CodecKind {
        self.kind
    }

    pub fn active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub fn bitrate(&self) -> i32 {
        self.bitrate.load(Ordering::Acquire)
    }

    pub fn update_bitrate(&self, bitrate: i32) {
        self.bitrate.store(bitrate, Ordering::Release);
    }

    pub fn start_ts(&self) -> u64 {
        self.start_ts.load(Ordering::Acquire)
    }

    fn first_received(&self) -> bool {
        self.first_received.load(Ordering::Acquire)
    }

    fn first_raw_ts(&self) -> u64 {
        self.first_raw_ts.load(Ordering::Acquire)
    }

    pub fn paired_encoder(&self) -> Option<Arc<Encoder>> {
        self.paired.lock().upgrade()
    }

    /// Pair this audio encoder with a video encoder: no audio packets are
    /// emitted until the video side has a first-frame timestamp.
    pub fn set_paired_encoder(&self, encoder: &Arc<Encoder>) {
        *self.paired.lock() = Arc::downgrade(encoder);
    }

    pub fn set_scaled_size(&self, width: u32, height: u32) {
        if self.kind != CodecKind::Video {
            return;
        }
        if self.active() {
            warn!("cannot set the scaled resolution while the encoder is active");
            return;
        }
        self.scaled_width.store(width, Ordering::Release);
        self.scaled_height.store(height, Ordering::Release);
    }

    pub fn scaling_enabled(&self) -> bool {
        self.scaled_width.load(Ordering::Acquire) != 0
            || self.scaled_height.load(Ordering::Acquire) != 0
    }

    pub fn width(&self) -> u32 {
        if self.kind != CodecKind::Video {
            warn!("width: encoder is not a video encoder");
            return 0;
        }
        let scaled = self.scaled_width.load(Ordering::Acquire);
        if scaled != 0 {
            return scaled;
        }
        self.v_media.lock().upgrade().map_or(0, |vo| vo.width())
    }

    pub fn height(&self) -> u32 {
        if self.kind != CodecKind::Video {
            warn!("height: encoder is not a video encoder");
            return 0;
        }
        let scaled = self.scaled_height.load(Ordering::Acquire);
        if scaled != 0 {
            return scaled;
        }
        self.v_media.lock().upgrade().map_or(0, |vo| vo.height())
    }

    pub fn sample_rate(&self) -> u32 {
        if self.kind != CodecKind::Audio {
            warn!("sample_rate: encoder is not an audio encoder");
            return 0;
        }
        let rate = self.audio.lock().samplerate;
        if rate != 0 {
            return rate;
        }
        self.a_media
            .lock()
            .upgrade()
            .map_or(0, |ao| ao.sample_rate())
    }

    pub fn frame_size(&self) -> usize {
        if self.kind != CodecKind::Audio {
            warn!("frame_size: encoder is not an audio encoder");
            return 0;
        }
        self.audio.lock().framesize
    }

    pub fn set_preferred_video_format(&self, format: VideoFormat) {
        if self.kind != CodecKind::Video {
            return;
        }
        *self.preferred_format.lock() = format;
    }

    pub fn preferred_video_format(&self) -> VideoFormat {
        if self.kind != CodecKind::Video {
            return VideoFormat::None;
        }
        *self.preferred_format.lock()
    }

    pub fn extra_data(&self) -> Option<Vec<u8>> {
        self.codec.lock().extra_data().map(<[u8]>::to_vec)
    }

    pub fn set_core_video(&self, core: &Arc<CoreVideo>) {
        if self.kind != CodecKind::Video {
            warn!("set_core_video: encoder is not a video encoder");
            return;
        }

        let output = core.output();
        let info = *output.info();
        *self.v_media.lock() = Arc::downgrade(output);
        *self.core_video.lock() = Arc::downgrade(core);
        self.timebase_num.store(info.fps_den, Ordering::Release);
        self.timebase_den.store(info.fps_num, Ordering::Release);
    }

    pub fn set_core_audio(&self, core: &Arc<CoreAudio>) {
        if self.kind != CodecKind::Audio {
            warn!("set_core_audio: encoder is not an audio encoder");
            return;
        }

        let output = core.output();
        *self.a_media.lock() = Arc::downgrade(output);
        self.timebase_num.store(1, Ordering::Release);
        self.timebase_den
            .store(output.sample_rate(), Ordering::Release);
    }

    pub fn add_output(&self, output: Weak<dyn MediaOutput>) {
        self.outputs.lock().push(output);
    }

    pub fn remove_output(&self, output: &Arc<dyn MediaOutput>) {
        self.outputs
            .lock()
            .retain(|weak| !weak.upgrade().is_some_and(|o| Arc::ptr_eq(&o, output)));
    }

    pub fn initialize(&self) -> bool {
        let _init = self.init_mutex.lock();
        self.initialize_internal()
    }

    fn initialize_internal(&self) -> bool {
        if self.active() || self.initialized.load(Ordering::Acquire) {
            return true;
        }

        self.shutdown_internal();

        if self.codec.lock().create().is_err() {
            return false;
        }

        if self.kind == CodecKind::Audio {
            self.initialize_audio_encoder();
        }

        self.initialized.store(true, Ordering::Release);
        true
    }

    fn initialize_audio_encoder(&self) {
        let mut info = AudioConvertInfo::default();
        self.codec.lock().audio_info(&mut info);

        let base = self
            .a_media
            .lock()
            .upgrade()
            .map(|ao| *ao.info())
            .unwrap_or(beam_media_info::AudioInfo::new(
                0,
                beam_media_info::AudioFormat::Unknown,
                beam_media_info::SpeakerLayout::Unknown,
            ));
        let resolved = info.resolve(&base);

        let mut audio = self.audio.lock();
        audio.samplerate = resolved.samples_per_sec;
        audio.planes = audio_planes(resolved.format, resolved.speakers);
        audio.blocksize = audio_block_size(resolved.format, resolved.speakers);
        audio.framesize = self.codec.lock().frame_size();
        audio.framesize_bytes = audio.blocksize * audio.framesize;
        audio.clear();
    }

    pub fn shutdown(&self) {
        let _init = self.init_mutex.lock();
        self.shutdown_internal();
    }

    fn shutdown_internal(&self) {
        let mut codec = self.codec.lock();
        if codec.valid() {
            codec.destroy();
            drop(codec);
            *self.paired.lock() = Weak::new();
            self.first_received.store(false, Ordering::Release);
            self.start_ts.store(0, Ordering::Release);
            self.timing.lock().offset_usec = 0;
        }
    }

    fn audio_info_for_connection(&self) -> AudioConvertInfo {
        let mut info = AudioConvertInfo::default();

        if let Some(ao) = self.a_media.lock().upgrade() {
            let base = *ao.info();
            let resolved = AudioConvertInfo::default().resolve(&base);
            info.samples_per_sec = resolved.samples_per_sec;
            info.format = Some(resolved.format);
            info.speakers = Some(resolved.speakers);
        }

        /* the codec overrides whatever it needs */
        self.codec.lock().audio_info(&mut info);
        info
    }

    fn add_connection(self: &Arc<Self>) {
        if self.kind == CodecKind::Audio {
            let info = self.audio_info_for_connection();
            if let Some(ao) = self.a_media.lock().upgrade() {
                let sink: Arc<dyn AudioSink> = self.clone();
                if let Err(e) = ao.connect(self.mixer_idx, Some(info), sink) {
                    error!("audio encoder connect failed: {e}");
                }
            }
        } else {
            let gpu = self.codec.lock().gpu_encode_available();
            if gpu {
                if let Some(core) = self.core_video.lock().upgrade() {
                    let sink: Arc<dyn GpuEncoderSink> = self.clone();
                    core.add_gpu_encoder(sink);
                }
            } else if let Some(vo) = self.v_media.lock().upgrade() {
                let mut info = VideoScaleInfo {
                    format: vo.info().format,
                    width: vo.width(),
                    height: vo.height(),
                    range: vo.info().range,
                    colorspace: vo.info().colorspace,
                };
                self.codec.lock().video_info(&mut info);

                let sink: Arc<dyn VideoSink> = self.clone();
                if let Err(e) = vo.connect(Some(info), sink) {
                    error!("video encoder connect failed: {e}");
                }
            }
        }

        self.active.store(true, Ordering::Release);
    }

    fn remove_connection(self: &Arc<Self>, shutdown: bool) {
        if self.kind == CodecKind::Audio {
            if let Some(ao) = self.a_media.lock().upgrade() {
                let sink: Arc<dyn AudioSink> = self.clone();
                ao.disconnect(self.mixer_idx, &sink);
            }
        } else {
            let gpu = self.codec.lock().gpu_encode_available();
            if gpu {
                if let Some(core) = self.core_video.lock().upgrade() {
                    let sink: Arc<dyn GpuEncoderSink> = self.clone();
                    core.remove_gpu_encoder(&sink);
                }
            } else if let Some(vo) = self.v_media.lock().upgrade() {
                let sink: Arc<dyn VideoSink> = self.clone();
                vo.disconnect(&sink);
            }
        }

        /* don't shut down here on encode errors: shutdown takes the init
         * mutex, and outputs ending capture take it against the output's
         * input lock in the reverse order. The stop path calls shutdown
         * before reconnecting instead. */
        if shutdown {
            self.shutdown();
        }

        self.active.store(false, Ordering::Release);
    }

    pub fn start(self: &Arc<Self>, sink: Arc<dyn PacketSink>) {
        let first = {
            let _init = self.init_mutex.lock();

            if !self.codec.lock().valid() {
                debug!("encoder start: codec is not initialized");
                return;
            }

            let mut callbacks = self.callbacks.lock();
            let first = callbacks.is_empty();
            if !callbacks
                .iter()
                .any(|entry| Arc::ptr_eq(&entry.sink, &sink))
            {
                callbacks.push(CallbackEntry {
                    sink,
                    sent_first_packet: false,
                });
            }
            first
        };

        if first {
            self.timing.lock().cur_pts = 0;
            self.add_connection();
        }
    }

    pub fn stop(self: &Arc<Self>, sink: &Arc<dyn PacketSink>) {
        let last = {
            let _init = self.init_mutex.lock();
            let mut callbacks = self.callbacks.lock();
            let before = callbacks.len();
            callbacks.retain(|entry| !Arc::ptr_eq(&entry.sink, sink));
            before != callbacks.len() && callbacks.is_empty()
        };

        /* the init mutex is released before disconnecting; holding it into
         * an output disconnect inverts the output's input-lock order */
        if last {
            self.remove_connection(true);
            self.initialized.store(false, Ordering::Release);

            if self.destroy_on_stop.load(Ordering::Acquire) {
                self.actually_destroy();
            }
        }
    }

    pub fn destroy(self: &Arc<Self>) {
        let deferred = {
            let _init = self.init_mutex.lock();
            let callbacks = self.callbacks.lock();
            if callbacks.is_empty() {
                false
            } else {
                self.destroy_on_stop.store(true, Ordering::Release);
                true
            }
        };

        if !deferred {
            self.actually_destroy();
        }
    }

    fn actually_destroy(self: &Arc<Self>) {
        let outputs: Vec<_> = self.outputs.lock().drain(..).collect();
        for output in outputs.iter().filter_map(Weak::upgrade) {
            output.remove_encoder(self);
        }

        self.audio.lock().clear();

        let mut codec = self.codec.lock();
        if codec.valid() {
            codec.destroy();
        }
        drop(codec);

        self.callbacks.lock().clear();
        debug!("encoder destroyed");
    }

    /// Stop every output holding this encoder, flush queued packets and
    /// drop all callbacks. Used when a codec reports failure.
    fn full_stop(self: &Arc<Self>) {
        let outputs: Vec<_> = self.outputs.lock().iter().cloned().collect();
        for output in outputs.iter().filter_map(Weak::upgrade) {
            output.stop();
            output.flush_packets();
        }

        self.callbacks.lock().clear();
        self.remove_connection(false);
        self.initialized.store(false, Ordering::Release);
    }

    /* ---------------------------------------------------------------- */
    /* audio buffering and the A/V start rendezvous */

    fn calc_offset_size(&self, blocksize: usize, samplerate: u32, v_start_ts: u64, a_start_ts: u64) -> usize {
        let offset = (v_start_ts - a_start_ts) * samplerate as u64 / 1_000_000_000;
        offset as usize * blocksize
    }

    fn push_back_audio(
        audio: &mut AudioEncState,
        planes: &[&[u8]],
        size: usize,
        offset_size: usize,
    ) {
        let size = size.saturating_sub(offset_size);

        /* push in to the circular buffer */
        if size > 0 {
            for (i, plane) in planes.iter().enumerate().take(audio.planes) {
                let end = (offset_size + size).min(plane.len());
                if offset_size < end {
                    audio.input[i].push_back(&plane[offset_size..end]);
                }
            }
        }
    }

    /// Re-buffer previously accumulated audio so samples aligned with the
    /// video start land first.
    fn start_from_buffer(&self, audio: &mut AudioEncState, v_start_ts: u64) {
        let size = audio.input[0].len();

        let mut taken: Vec<Vec<u8>> = Vec::with_capacity(audio.planes);
        for i in 0..audio.planes {
            let mut bytes = vec![0u8; audio.input[i].len()];
            audio.input[i].peek_front(&mut bytes);
            audio.input[i].clear();
            taken.push(bytes);
        }

        let mut offset_size = 0;
        if self.first_raw_ts() < v_start_ts {
            offset_size = self.calc_offset_size(
                audio.blocksize,
                audio.samplerate,
                v_start_ts,
                self.first_raw_ts(),
            );
        }

        let refs: Vec<&[u8]> = taken.iter().map(Vec::as_slice).collect();
        Self::push_back_audio(audio, &refs, size, offset_size);
    }

    fn buffer_audio(&self, audio: &mut AudioEncState, data: &AudioData<'_>) -> bool {
        let size = data.frames as usize * audio.blocksize;
        let mut offset_size = 0;
        let mut success = true;

        let paired = self.paired.lock().upgrade();

        if self.start_ts() == 0 {
            if let Some(pair) = paired {
                'sync: {
                    let v_start_ts = pair.start_ts();

                    /* no video yet, so don't start audio */
                    if v_start_ts == 0 {
                        success = false;
                        break 'sync;
                    }

                    /* audio starting point still not synced with the video
                     * starting point, so don't start audio */
                    let end_ts = data.timestamp
                        + data.frames as u64 * 1_000_000_000 / audio.samplerate as u64;
                    if end_ts <= v_start_ts {
                        success = false;
                        break 'sync;
                    }

                    /* ready to start audio, truncate if necessary */
                    if data.timestamp < v_start_ts {
                        offset_size = self.calc_offset_size(
                            audio.blocksize,
                            audio.samplerate,
                            v_start_ts,
                            data.timestamp,
                        );
                    }
                    if data.timestamp <= v_start_ts {
                        audio.clear();
                    }

                    self.start_ts.store(v_start_ts, Ordering::Release);

                    /* use currently buffered audio instead */
                    if v_start_ts < data.timestamp {
                        self.start_from_buffer(audio, v_start_ts);
                    }
                }
            } else {
                self.start_ts.store(data.timestamp, Ordering::Release);
            }
        }

        let planes: Vec<&[u8]> = data.data.iter().copied().collect();
        Self::push_back_audio(audio, &planes, size, offset_size);

        success
    }

    fn send_audio_data(&self, audio: &mut AudioEncState) -> bool {
        let mut staged: Vec<Vec<u8>> = Vec::with_capacity(audio.planes);
        for i in 0..audio.planes {
            let mut bytes = vec![0u8; audio.framesize_bytes];
            audio.input[i].peek_front(&mut bytes);
            audio.input[i].pop_front(audio.framesize_bytes);
            staged.push(bytes);
        }

        let pts = self.timing.lock().cur_pts;
        let mut frame = EncoderFrame {
            data: [&[]; MAX_AV_PLANES],
            linesize: [0; MAX_AV_PLANES],
            frames: audio.framesize as u32,
            pts,
        };
        for (i, plane) in staged.iter().enumerate() {
            frame.data[i] = plane;
            frame.linesize[i] = audio.framesize_bytes as u32;
        }

        let framesize = audio.framesize as i64;
        if !self.do_encode_frame(&frame) {
            return false;
        }

        self.timing.lock().cur_pts += framesize;
        true
    }

    fn do_encode_frame(&self, frame: &EncoderFrame<'_>) -> bool {
        let result = self.codec.lock().encode(frame);
        self.finish_encode(result)
    }

    fn finish_encode(
        &self,
        result: Result<Option<Packet>, crate::EncoderError>,
    ) -> bool {
        match result {
            Ok(Some(packet)) => {
                self.send_off_packet(packet);
                true
            }
            Ok(None) => true,
            Err(e) => {
                error!("Error encoding with encoder: {e}");
                if let Some(this) = self.weak_self.upgrade() {
                    this.full_stop();
                }
                false
            }
        }
    }

    fn send_off_packet(&self, mut packet: Packet) {
        packet.timebase_num = self.timebase_num.load(Ordering::Acquire);
        packet.timebase_den = self.timebase_den.load(Ordering::Acquire);
        packet.kind = self.kind;

        {
            let mut timing = self.timing.lock();
            if !self.first_received() {
                timing.offset_usec = packet_dts_usec(&packet);
                self.first_received.store(true, Ordering::Release);
            }

            /* system time keeps separate encoders in sync; relative
             * timestamps would drift apart */
            packet.dts_usec = self.start_ts() as i64 / 1000 + packet_dts_usec(&packet)
                - timing.offset_usec;
            packet.sys_dts_usec = packet.dts_usec;
        }

        let mut callbacks = self.callbacks.lock();
        for entry in callbacks.iter_mut() {
            Self::send_packet(self.kind, &self.codec, entry, &packet);
        }
    }

    fn send_packet(
        kind: CodecKind,
        codec: &Mutex<Box<dyn Codec>>,
        entry: &mut CallbackEntry,
        packet: &Packet,
    ) {
        if kind == CodecKind::Video && !entry.sent_first_packet {
            Self::send_first_video_packet(codec, entry, packet);
        } else {
            entry.sink.packet(packet);
        }
    }

    fn send_first_video_packet(
        codec: &Mutex<Box<dyn Codec>>,
        entry: &mut CallbackEntry,
        packet: &Packet,
    ) {
        /* always wait for the first keyframe */
        if !packet.keyframe {
            return;
        }

        let sei = codec.lock().sei_data().map(<[u8]>::to_vec);
        match sei {
            Some(sei) if !sei.is_empty() => {
                let mut first = packet.clone();
                let mut data = Vec::with_capacity(sei.len() + packet.data.len());
                data.extend_from_slice(&sei);
                data.extend_from_slice(&packet.data);
                first.data = data;
                entry.sink.packet(&first);
            }
            _ => entry.sink.packet(packet),
        }
        entry.sent_first_packet = true;
    }
}

impl AudioSink for Encoder {
    fn receive_audio(&self, _mix_idx: usize, data: &AudioData<'_>) {
        let mut audio = self.audio.lock();
        if audio.framesize_bytes == 0 || audio.samplerate == 0 {
            return;
        }

        if !self.first_received() {
            self.first_raw_ts.store(data.timestamp, Ordering::Release);
            self.first_received.store(true, Ordering::Release);
            audio.clear();
        }

        if !self.buffer_audio(&mut audio, data) {
            return;
        }

        while audio.input[0].len() >= audio.framesize_bytes && audio.framesize_bytes > 0 {
            if !self.send_audio_data(&mut audio) {
                break;
            }
        }
    }
}

impl VideoSink for Encoder {
    fn receive_video(&self, data: &VideoData<'_>) {
        let pair = self.paired.lock().upgrade();

        if !self.first_received() {
            if let Some(pair) = &pair {
                if !pair.first_received() || pair.first_raw_ts() > data.timestamp {
                    return;
                }
            }
        }

        if self.start_ts() == 0 {
            self.start_ts.store(data.timestamp, Ordering::Release);
        }

        let pts = self.timing.lock().cur_pts;
        let mut frame = EncoderFrame {
            data: [&[]; MAX_AV_PLANES],
            linesize: [0; MAX_AV_PLANES],
            frames: 1,
            pts,
        };
        for plane in 0..data.frame.plane_count() {
            frame.data[plane] = data.frame.plane(plane);
            frame.linesize[plane] = data.frame.linesize(plane);
        }

        if self.do_encode_frame(&frame) {
            self.timing.lock().cur_pts += self.timebase_num.load(Ordering::Acquire) as i64;
        }
    }
}

impl GpuEncoderSink for Encoder {
    fn receive_texture(&self, texture: &Arc<dyn Texture>, timestamp: u64) {
        if self.start_ts() == 0 {
            self.start_ts.store(timestamp, Ordering::Release);
        }

        let result = self.codec.lock().encode_texture(texture, timestamp);
        let _ = self.finish_encode(result);
    }
}
