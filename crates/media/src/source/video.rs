//! Per-source video path: the async frame queue with buffer reuse, GPU
//! texture upload/conversion, and the composite draw.

use std::collections::VecDeque;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use beam_gfx::{
    conversion_plan, conversion_technique, math, texture_format_for, ColorFormat, ConversionPlan,
    GpuDevice, Mat4, SpriteFlip, Texture, TextureRender, TextureUsage, DEFAULT_DRAW,
};
use beam_media_info::{
    video_format_parameters, ConvertMode, VideoColorSpace, VideoFormat, VideoFormatParams,
    VideoFrame, VideoRange, MAX_AV_PLANES,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use super::Source;
use crate::{clock, MediaError, MAX_ASYNC_FRAMES, MAX_UNUSED_FRAME_DURATION};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AspectRatioMode {
    Ignore,
    Keep,
    KeepByExpanding,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub mode: AspectRatioMode,
}

/// Borrowed video frame as handed in by the host. A negative linesize on
/// plane 0 (with no further planes) marks a bottom-up buffer.
pub struct SourceVideoInput<'a> {
    pub data: [&'a [u8]; MAX_AV_PLANES],
    pub linesize: [i32; MAX_AV_PLANES],
    pub format: VideoFormat,
    pub range: VideoRange,
    pub colorspace: VideoColorSpace,
    pub width: u32,
    pub height: u32,
}

/// An owned frame in the async queue, carrying the decode parameters the
/// conversion draw needs.
pub struct SourceVideoFrame {
    pub frame: VideoFrame,
    pub timestamp: u64,
    pub full_range: bool,
    pub color_matrix: [f32; 16],
    pub color_range_min: [f32; 3],
    pub color_range_max: [f32; 3],
    pub flip: bool,
    pub flip_h: bool,
}

impl SourceVideoFrame {
    fn new(format: VideoFormat, width: u32, height: u32) -> Option<SourceVideoFrame> {
        Some(SourceVideoFrame {
            frame: VideoFrame::new(format, width, height)?,
            timestamp: 0,
            full_range: false,
            color_matrix: [0.0; 16],
            color_range_min: [0.0; 3],
            color_range_max: [0.0; 3],
            flip: false,
            flip_h: false,
        })
    }
}

struct AsyncCacheSlot {
    frame: Arc<Mutex<SourceVideoFrame>>,
    used: bool,
    unused_count: u32,
}

pub(crate) struct AsyncVideoState {
    frames: VecDeque<Arc<Mutex<SourceVideoFrame>>>,
    cache: Vec<AsyncCacheSlot>,
    pub active: bool,
    cache_width: u32,
    cache_height: u32,
    cache_format: VideoFormat,
    cache_full_range: bool,
    pub last_frame_ts: u64,
}

impl AsyncVideoState {
    pub fn new() -> AsyncVideoState {
        AsyncVideoState {
            frames: VecDeque::new(),
            cache: Vec::new(),
            active: false,
            cache_width: 0,
            cache_height: 0,
            cache_format: VideoFormat::None,
            cache_full_range: false,
            last_frame_ts: 0,
        }
    }

    #[cfg(test)]
    pub fn queued_frames(&self) -> usize {
        self.frames.len()
    }

    fn free_cache(&mut self) {
        self.cache.clear();
        self.frames.clear();
    }

    fn clean_cache(&mut self) {
        self.cache.retain_mut(|slot| {
            if !slot.used {
                slot.unused_count += 1;
                if slot.unused_count == MAX_UNUSED_FRAME_DURATION {
                    return false;
                }
            }
            true
        });
    }

    fn texture_changed(&self, format: VideoFormat, full_range: bool, width: u32, height: u32) -> bool {
        let prev = ConvertMode::of(self.cache_format, self.cache_full_range);
        let cur = ConvertMode::of(format, full_range);
        self.cache_width != width || self.cache_height != height || prev != cur
    }

    fn mark_unused(&mut self, frame: &Arc<Mutex<SourceVideoFrame>>) {
        for slot in self.cache.iter_mut() {
            if Arc::ptr_eq(&slot.frame, frame) {
                slot.used = false;
                break;
            }
        }
    }
}

/// Cached decode parameters for the current (format, colorspace, range)
/// triple of incoming frames.
pub(crate) struct VideoMetaCache {
    format: VideoFormat,
    colorspace: VideoColorSpace,
    range: VideoRange,
    params: Option<VideoFormatParams>,
}

impl VideoMetaCache {
    pub fn new() -> VideoMetaCache {
        VideoMetaCache {
            format: VideoFormat::None,
            colorspace: VideoColorSpace::Default,
            range: VideoRange::Default,
            params: None,
        }
    }
}

/// GPU-side state; mutated only on the compositor thread.
pub(crate) struct SourceGpu {
    pub async_textures: [Option<Arc<dyn Texture>>; MAX_AV_PLANES],
    pub async_texrender: Option<Arc<dyn TextureRender>>,
    pub item_render: Option<Arc<dyn TextureRender>>,
    pub width: u32,
    pub height: u32,
    pub format: VideoFormat,
    pub full_range: bool,
    pub plan: Option<ConversionPlan>,
    pub gpu_conversion: bool,
    pub flip: bool,
    pub flip_h: bool,
    pub draw_transform: Mat4,
}

impl SourceGpu {
    pub fn new() -> SourceGpu {
        SourceGpu {
            async_textures: std::array::from_fn(|_| None),
            async_texrender: None,
            item_render: None,
            width: 0,
            height: 0,
            format: VideoFormat::None,
            full_range: false,
            plan: None,
            gpu_conversion: false,
            flip: false,
            flip_h: false,
            draw_transform: math::IDENTITY,
        }
    }
}

fn scaled_to(
    src_width: u32,
    src_height: u32,
    target_width: u32,
    target_height: u32,
    mode: AspectRatioMode,
) -> (u32, u32) {
    if mode == AspectRatioMode::Ignore || src_width == 0 || src_height == 0 {
        return (target_width, target_height);
    }

    let rw = target_height * src_width / src_height;
    let use_height = match mode {
        AspectRatioMode::Keep => rw <= target_width,
        _ => rw >= target_width,
    };

    if use_height {
        (rw, target_height)
    } else {
        (target_width, target_width * src_height / src_width)
    }
}

/// Size of the overlap region rendered when covering a box.
fn calc_size(tex_width: u32, tex_height: u32, box_width: u32, box_height: u32) -> (u32, u32) {
    let origin_ratio = tex_width as f32 / tex_height as f32;
    let target_ratio = box_width as f32 / box_height as f32;
    if origin_ratio > target_ratio {
        let out_height = tex_height;
        ((out_height as f32 * target_ratio) as u32, out_height)
    } else {
        let out_width = tex_width;
        (out_width, (out_width as f32 / target_ratio) as u32)
    }
}

impl Source {
    /// Push a frame of pixels into the source from any thread.
    pub fn output_video(&self, input: &SourceVideoInput<'_>) {
        if !self.kind().is_async_video() {
            debug!("pixel frames ignored for non-async source {}", self.id());
            return;
        }

        let flip = input.linesize[0] < 0 && input.linesize[1] == 0;

        let params = {
            let mut meta = self.video_meta.lock();
            if input.format != meta.format
                || input.colorspace != meta.colorspace
                || input.range != meta.range
            {
                meta.format = input.format;
                meta.colorspace = input.colorspace;
                meta.range = input.range;
                meta.params = Some(video_format_parameters(input.colorspace, input.range));
            }
            match meta.params {
                Some(params) => params,
                None => return,
            }
        };

        if input.format == VideoFormat::None {
            return;
        }

        /* non-YUV formats are always treated as full range */
        let full_range = if input.format.is_yuv() {
            input.range.is_full()
        } else {
            true
        };

        self.output_video_internal(input, &params, full_range, flip, clock::now_ns());
    }

    fn output_video_internal(
        &self,
        input: &SourceVideoInput<'_>,
        params: &VideoFormatParams,
        full_range: bool,
        flip: bool,
        timestamp: u64,
    ) {
        let mut state = self.async_video.lock();

        if state.frames.len() >= MAX_ASYNC_FRAMES {
            state.free_cache();
            state.last_frame_ts = 0;
            return;
        }

        if state.texture_changed(input.format, full_range, input.width, input.height) {
            state.free_cache();
            state.cache_width = input.width;
            state.cache_height = input.height;
        }

        state.cache_format = input.format;
        state.cache_full_range = full_range;

        let mut reused = None;
        for slot in state.cache.iter_mut() {
            if !slot.used {
                slot.used = true;
                slot.unused_count = 0;
                reused = Some(slot.frame.clone());
                break;
            }
        }

        state.clean_cache();

        let frame_arc = match reused {
            Some(frame) => frame,
            None => {
                let Some(frame) =
                    SourceVideoFrame::new(input.format, input.width, input.height)
                else {
                    return;
                };
                let frame = Arc::new(Mutex::new(frame));
                state.cache.push(AsyncCacheSlot {
                    frame: frame.clone(),
                    used: true,
                    unused_count: 0,
                });
                frame
            }
        };

        {
            let mut frame = frame_arc.lock();

            /* a reused buffer may carry a different packing of the same
             * conversion class */
            if frame.frame.format() != input.format {
                match VideoFrame::new(input.format, input.width, input.height) {
                    Some(replacement) => frame.frame = replacement,
                    None => return,
                }
            }

            for plane in 0..frame.frame.plane_count() {
                let linesize = input.linesize[plane].unsigned_abs();
                if input.data[plane].is_empty() {
                    continue;
                }
                frame.frame.copy_plane_from(plane, input.data[plane], linesize);
            }

            frame.timestamp = timestamp;
            frame.full_range = full_range;
            frame.color_matrix = params.matrix;
            frame.color_range_min = params.range_min;
            frame.color_range_max = params.range_max;
            frame.flip = flip;
            frame.flip_h = false;
        }

        state.frames.push_back(frame_arc);
        state.active = true;
    }

    /// Hand a ready GPU texture to a sync source.
    pub fn output_video_texture(
        &self,
        texture_handle: u64,
        width: u32,
        height: u32,
    ) -> Result<(), MediaError> {
        let Some(core) = self.core_video.upgrade() else {
            error!("no core video!!!");
            return Err(MediaError::Any("video core is not running".into()));
        };

        if !core.device().texture_share_enabled() {
            info!("texture share not supported by the graphics device");
            return Err(MediaError::TextureShareUnavailable);
        }

        if self.kind().is_async_video() {
            error!("async video does not support texture input");
            return Err(MediaError::WrongSourceKind);
        }

        let texture = core
            .device()
            .texture_create_shared(texture_handle, width, height)?;
        *self.sync_texture.lock() = Some(texture);
        Ok(())
    }

    pub fn clear_video(&self) {
        if self.kind().is_async_video() {
            self.async_video.lock().active = false;
        } else {
            *self.sync_texture.lock() = None;
        }
    }

    #[cfg(test)]
    pub(crate) fn queued_async_frames(&self) -> usize {
        self.async_video.lock().queued_frames()
    }

    #[cfg(test)]
    pub(crate) fn last_frame_ts(&self) -> u64 {
        self.async_video.lock().last_frame_ts
    }

    /* ---------------------------------------------------------------- */
    /* compositor-thread side */

    fn get_closest_frame(
        state: &mut AsyncVideoState,
    ) -> Option<Arc<Mutex<SourceVideoFrame>>> {
        if state.frames.is_empty() {
            return None;
        }

        /* drop everything but the newest queued frame */
        while state.frames.len() > 1 {
            if let Some(old) = state.frames.pop_front() {
                state.mark_unused(&old);
            }
        }

        let frame = state.frames.pop_front()?;
        state.last_frame_ts = frame.lock().timestamp;
        Some(frame)
    }

    /// One compositor tick for an async source: select the current frame,
    /// derive timing from it and refresh the GPU textures.
    pub(crate) fn update_async_video(&self, device: &dyn GpuDevice, sys_time: u64) {
        if !self.kind().is_async_video() {
            return;
        }

        let frame = {
            let mut state = self.async_video.lock();
            Self::get_closest_frame(&mut state)
        };

        let Some(frame) = frame else {
            return;
        };

        let frame_ts = frame.lock().timestamp;
        self.timing_adjust
            .store(sys_time.wrapping_sub(frame_ts), Ordering::Release);
        self.timing_set.store(true, Ordering::Release);

        if self.set_async_texture_size(device, &frame) {
            self.update_async_textures(device, &frame);
        }

        self.async_video.lock().mark_unused(&frame);
    }

    fn set_async_texture_size(
        &self,
        device: &dyn GpuDevice,
        frame_arc: &Arc<Mutex<SourceVideoFrame>>,
    ) -> bool {
        let (width, height, format, full_range) = {
            let frame = frame_arc.lock();
            (
                frame.frame.width(),
                frame.frame.height(),
                frame.frame.format(),
                frame.full_range,
            )
        };

        let mut gpu = self.gpu.lock();
        if gpu.width == width
            && gpu.height == height
            && gpu.format == format
            && gpu.full_range == full_range
        {
            return gpu.async_textures[0].is_some();
        }

        gpu.width = width;
        gpu.height = height;
        gpu.format = format;
        gpu.full_range = full_range;

        for texture in gpu.async_textures.iter_mut() {
            *texture = None;
        }
        gpu.async_texrender = None;

        let output_format = texture_format_for(format);
        let plan = conversion_plan(format, full_range, width, height);
        gpu.gpu_conversion = plan.is_some();

        if let Some(plan) = plan {
            match device.texrender_create(output_format) {
                Ok(render) => gpu.async_texrender = Some(render),
                Err(e) => {
                    error!("conversion target creation failed: {e}");
                    gpu.plan = None;
                    return false;
                }
            }

            for c in 0..plan.count {
                match device.texture_create(
                    plan.width[c],
                    plan.height[c],
                    plan.format[c],
                    TextureUsage::Dynamic,
                ) {
                    Ok(texture) => gpu.async_textures[c] = Some(texture),
                    Err(e) => {
                        error!("plane texture creation failed: {e}");
                        break;
                    }
                }
            }
            gpu.plan = Some(plan);
        } else {
            gpu.plan = None;
            match device.texture_create(width, height, output_format, TextureUsage::Dynamic) {
                Ok(texture) => gpu.async_textures[0] = Some(texture),
                Err(e) => error!("texture creation failed: {e}"),
            }
        }

        gpu.async_textures[0].is_some()
    }

    fn update_async_textures(
        &self,
        device: &dyn GpuDevice,
        frame_arc: &Arc<Mutex<SourceVideoFrame>>,
    ) {
        let frame = frame_arc.lock();
        let mut gpu = self.gpu.lock();

        gpu.flip = frame.flip;
        gpu.flip_h = frame.flip_h;

        if gpu.gpu_conversion && gpu.async_texrender.is_some() {
            Self::update_async_texrender(device, &frame, &mut gpu);
            return;
        }

        if ConvertMode::of(frame.frame.format(), frame.full_range) != ConvertMode::None {
            return;
        }
        if let Some(texture) = &gpu.async_textures[0] {
            texture.set_image(frame.frame.plane(0), frame.frame.linesize(0), false);
        }
    }

    fn update_async_texrender(
        device: &dyn GpuDevice,
        frame: &SourceVideoFrame,
        gpu: &mut SourceGpu,
    ) -> bool {
        let Some(texrender) = gpu.async_texrender.clone() else {
            return false;
        };
        texrender.reset();

        if let Some(plan) = &gpu.plan {
            for c in 0..plan.count.min(frame.frame.plane_count()) {
                if let Some(texture) = &gpu.async_textures[c] {
                    texture.set_image(frame.frame.plane(c), frame.frame.linesize(c), false);
                }
            }
        }

        let cx = gpu.width;
        let cy = gpu.height;

        let Some(tech_name) = conversion_technique(frame.frame.format(), frame.full_range) else {
            return false;
        };
        /* a missing shader skips this source for the tick; it must not
         * bring the graphics loop down */
        let Some(effect) = device.effect(tech_name) else {
            debug!("conversion technique {tech_name} unavailable");
            return false;
        };

        if !texrender.begin(cx, cy) {
            return false;
        }

        let texture_params = ["image", "image1", "image2", "image3"];
        for (c, name) in texture_params.iter().enumerate() {
            if let Some(texture) = &gpu.async_textures[c] {
                effect.set_texture(name, texture);
            }
        }

        effect.set_float("width", cx as f32);
        effect.set_float("height", cy as f32);
        effect.set_float("width_d2", cx as f32 * 0.5);
        effect.set_float("height_d2", cy as f32 * 0.5);
        effect.set_float("width_x2_i", 0.5 / cx as f32);

        let m = &frame.color_matrix;
        effect.set_vec4("color_vec0", [m[0], m[1], m[2], m[3]]);
        effect.set_vec4("color_vec1", [m[4], m[5], m[6], m[7]]);
        effect.set_vec4("color_vec2", [m[8], m[9], m[10], m[11]]);
        if !frame.full_range {
            effect.set_vec3("color_range_min", frame.color_range_min);
            effect.set_vec3("color_range_max", frame.color_range_max);
        }

        device.enable_blending(false);
        device.draw_convert(&*effect);
        device.enable_blending(true);

        texrender.end();
        true
    }

    /// Draw this source into the currently-begun main target.
    pub(crate) fn render_video(&self, device: &dyn GpuDevice) {
        if self.kind().is_async_video() {
            let active = self.async_video.lock().active;
            if !active {
                return;
            }

            let (texture, texrender) = {
                let gpu = self.gpu.lock();
                (gpu.async_textures[0].clone(), gpu.async_texrender.clone())
            };

            if let Some(base) = texture {
                let texture = texrender.and_then(|r| r.texture()).unwrap_or(base);
                self.render_texture(device, texture);
            }
        } else {
            let texture = self.sync_texture.lock().clone();
            if let Some(texture) = texture {
                self.render_texture(device, texture);
            }
        }
    }

    fn render_texture(&self, device: &dyn GpuDevice, mut texture: Arc<dyn Texture>) {
        if self.should_update_transform.swap(false, Ordering::AcqRel) {
            self.do_update_transform(device, &texture);
        }

        if let Some(cropped) = self.render_crop_texture(device, &texture) {
            texture = cropped;
        }

        let Some(effect) = device.effect(DEFAULT_DRAW) else {
            return;
        };

        let (flip_h, flip_v) = {
            let transform = self.transform.lock();
            (transform.flip_h, transform.flip_v)
        };
        let (flip, transform) = {
            let gpu = self.gpu.lock();
            (
                SpriteFlip {
                    vertical: gpu.flip ^ flip_v,
                    horizontal: gpu.flip_h ^ flip_h,
                },
                gpu.draw_transform,
            )
        };

        effect.set_texture("image", &texture);
        device.draw_sprite(&*effect, &texture, flip, transform);
    }

    /// Keep-by-expanding: render the covering overlap into an intermediate
    /// target, then draw that into the box rect.
    fn render_crop_texture(
        &self,
        device: &dyn GpuDevice,
        texture: &Arc<dyn Texture>,
    ) -> Option<Arc<dyn Texture>> {
        let render_box = self.transform.lock().render_box?;

        let mut gpu = self.gpu.lock();
        let item_render = gpu.item_render.clone()?;

        let width = texture.width();
        let height = texture.height();
        let (cx, cy) = calc_size(
            width,
            height,
            render_box.width as u32,
            render_box.height as u32,
        );

        item_render.reset();
        if !item_render.begin(cx, cy) {
            return None;
        }

        device.clear([1.0, 0.0, 0.0, 1.0]);

        let cx_scale = width as f32 / cx as f32;
        let cy_scale = height as f32 / cy as f32;
        let mat = math::translate(
            math::IDENTITY,
            ((cx as i32 - width as i32) / 2) as f32,
            ((height as i32 - cy as i32) / 2) as f32,
        );
        let mat = math::scale(mat, cx_scale, cy_scale);

        if let Some(effect) = device.effect(DEFAULT_DRAW) {
            effect.set_texture("image", texture);
            device.draw_sprite(&*effect, texture, SpriteFlip::default(), mat);
        }

        item_render.end();

        let mat = math::translate(math::IDENTITY, render_box.x as f32, render_box.y as f32);
        gpu.draw_transform = math::scale(
            mat,
            render_box.width as f32 / cx as f32,
            render_box.height as f32 / cy as f32,
        );

        item_render.texture()
    }

    fn do_update_transform(&self, device: &dyn GpuDevice, texture: &Arc<dyn Texture>) {
        let transform = self.transform.lock();
        let mut gpu = self.gpu.lock();

        let tex_width = texture.width();
        let tex_height = texture.height();

        let Some(render_box) = transform.render_box else {
            gpu.item_render = None;
            gpu.draw_transform = Self::base_transform(&transform);
            return;
        };

        /* the render box overrides the plain transform */
        let crop_enabled = render_box.mode == AspectRatioMode::KeepByExpanding
            && (tex_width as i32 != render_box.width || tex_height as i32 != render_box.height);

        if gpu.item_render.is_some() && !crop_enabled {
            gpu.item_render = None;
        } else if gpu.item_render.is_none() && crop_enabled {
            match device.texrender_create(ColorFormat::Rgba) {
                Ok(render) => gpu.item_render = Some(render),
                Err(e) => error!("crop target creation failed: {e}"),
            }
        }

        let mat = if !crop_enabled {
            match render_box.mode {
                AspectRatioMode::Keep => {
                    let (cx, cy) = scaled_to(
                        tex_width,
                        tex_height,
                        render_box.width as u32,
                        render_box.height as u32,
                        render_box.mode,
                    );
                    let mat = math::translate(
                        math::IDENTITY,
                        (render_box.x + (render_box.width - cx as i32) / 2) as f32,
                        (render_box.y + (render_box.height - cy as i32) / 2) as f32,
                    );
                    math::scale(
                        mat,
                        cx as f32 / tex_width as f32,
                        cy as f32 / tex_height as f32,
                    )
                }
                AspectRatioMode::Ignore => {
                    let mat =
                        math::translate(math::IDENTITY, render_box.x as f32, render_box.y as f32);
                    math::scale(
                        mat,
                        render_box.width as f32 / tex_width as f32,
                        render_box.height as f32 / tex_height as f32,
                    )
                }
                AspectRatioMode::KeepByExpanding => {
                    math::translate(math::IDENTITY, render_box.x as f32, render_box.y as f32)
                }
            }
        } else {
            let mat = math::translate(math::IDENTITY, transform.pos[0], transform.pos[1]);
            math::scale(mat, transform.scale[0], transform.scale[1])
        };

        gpu.draw_transform = mat;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::SourceKind;
    use std::sync::Weak;

    fn async_source() -> Arc<Source> {
        Source::new(1, 1, SourceKind::AsyncVideo, Weak::new(), Weak::new())
    }

    fn frame_input(width: u32, height: u32) -> (Vec<u8>, [i32; MAX_AV_PLANES]) {
        let data = vec![128u8; (width * height * 4) as usize];
        let mut linesize = [0i32; MAX_AV_PLANES];
        linesize[0] = (width * 4) as i32;
        (data, linesize)
    }

    fn push_frame(source: &Source, width: u32, height: u32) {
        let (data, linesize) = frame_input(width, height);
        let mut input = SourceVideoInput {
            data: [&[]; MAX_AV_PLANES],
            linesize,
            format: VideoFormat::Rgba,
            range: VideoRange::Full,
            colorspace: VideoColorSpace::Default,
            width,
            height,
        };
        input.data[0] = &data;
        source.output_video(&input);
    }

    #[test]
    fn queue_never_exceeds_limit() {
        let source = async_source();
        for _ in 0..MAX_ASYNC_FRAMES {
            push_frame(&source, 8, 8);
        }
        assert_eq!(source.queued_async_frames(), MAX_ASYNC_FRAMES);

        /* the frame over the limit flushes everything */
        push_frame(&source, 8, 8);
        assert_eq!(source.queued_async_frames(), 0);
        assert_eq!(source.last_frame_ts(), 0);
    }

    #[test]
    fn size_change_flushes_cache() {
        let source = async_source();
        push_frame(&source, 8, 8);
        push_frame(&source, 8, 8);
        assert_eq!(source.queued_async_frames(), 2);

        push_frame(&source, 16, 16);
        assert_eq!(source.queued_async_frames(), 1);
    }

    #[test]
    fn compositor_pick_keeps_only_latest() {
        let source = async_source();
        let device = beam_gfx::headless::HeadlessDevice::new();
        push_frame(&source, 8, 8);
        push_frame(&source, 8, 8);
        push_frame(&source, 8, 8);

        source.update_async_video(&device, clock::now_ns());
        assert_eq!(source.queued_async_frames(), 0);
        assert!(source.last_frame_ts() != 0);
        assert!(source.timing_set.load(Ordering::Acquire));
    }

    #[test]
    fn unused_cache_slots_retire() {
        let source = async_source();
        let device = beam_gfx::headless::HeadlessDevice::new();

        push_frame(&source, 8, 8);
        source.update_async_video(&device, clock::now_ns());

        /* slots sit unused; pushing new frames reuses then retires them */
        for _ in 0..(MAX_UNUSED_FRAME_DURATION + 1) {
            push_frame(&source, 8, 8);
            source.update_async_video(&device, clock::now_ns());
        }

        let state = source.async_video.lock();
        assert!(state.cache.len() <= 2);
    }
}
