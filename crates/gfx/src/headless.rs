//! Software implementation of the device contract.
//!
//! No rasterization happens here; textures are plain byte buffers and draw
//! calls are recorded. This backs the test suite and lets hosts run the
//! full pipeline on machines without a usable GPU context.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{
    all_techniques, ColorFormat, Effect, GfxError, GpuDevice, Mat4, SpriteFlip, Texture,
    TextureRender, TextureUsage,
};

pub struct HeadlessTexture {
    width: u32,
    height: u32,
    format: ColorFormat,
    data: Mutex<Vec<u8>>,
}

impl HeadlessTexture {
    fn new(width: u32, height: u32, format: ColorFormat) -> Arc<HeadlessTexture> {
        let size = (width * height * format.bytes_per_pixel()) as usize;
        Arc::new(HeadlessTexture {
            width,
            height,
            format,
            data: Mutex::new(vec![0; size]),
        })
    }

    pub fn bytes(&self) -> Vec<u8> {
        self.data.lock().clone()
    }
}

impl Texture for HeadlessTexture {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn format(&self) -> ColorFormat {
        self.format
    }

    fn set_image(&self, data: &[u8], linesize: u32, invert: bool) {
        let mut store = self.data.lock();
        let bpp = self.format.bytes_per_pixel();
        let row = (self.width * bpp) as usize;
        let copy = row.min(linesize as usize);

        for y in 0..self.height as usize {
            let src_y = if invert {
                self.height as usize - 1 - y
            } else {
                y
            };
            let src_pos = src_y * linesize as usize;
            let dst_pos = y * row;
            if src_pos + copy > data.len() || dst_pos + copy > store.len() {
                break;
            }
            store[dst_pos..dst_pos + copy].copy_from_slice(&data[src_pos..src_pos + copy]);
        }
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct DeviceState {
    current_target: Mutex<Option<Arc<HeadlessTexture>>>,
    sprite_draws: AtomicU64,
    convert_draws: AtomicU64,
}

pub struct HeadlessTextureRender {
    state: Arc<DeviceState>,
    format: ColorFormat,
    texture: Mutex<Option<Arc<HeadlessTexture>>>,
    active: AtomicBool,
}

impl TextureRender for HeadlessTextureRender {
    fn reset(&self) {
        self.active.store(false, Ordering::Release);
    }

    fn begin(&self, width: u32, height: u32) -> bool {
        if width == 0 || height == 0 {
            return false;
        }

        let mut texture = self.texture.lock();
        let recreate = match texture.as_ref() {
            Some(t) => t.width != width || t.height != height,
            None => true,
        };
        if recreate {
            *texture = Some(HeadlessTexture::new(width, height, self.format));
        }

        *self.state.current_target.lock() = texture.clone();
        self.active.store(true, Ordering::Release);
        true
    }

    fn end(&self) {
        *self.state.current_target.lock() = None;
        self.active.store(false, Ordering::Release);
    }

    fn texture(&self) -> Option<Arc<dyn Texture>> {
        self.texture
            .lock()
            .clone()
            .map(|t| t as Arc<dyn Texture>)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ParamValue {
    Float(f32),
    Vec3([f32; 3]),
    Vec4([f32; 4]),
    Texture,
}

pub struct HeadlessEffect {
    name: &'static str,
    params: Mutex<HashMap<String, ParamValue>>,
}

impl HeadlessEffect {
    pub fn param(&self, name: &str) -> Option<ParamValue> {
        self.params.lock().get(name).cloned()
    }
}

impl Effect for HeadlessEffect {
    fn name(&self) -> &str {
        self.name
    }

    fn set_texture(&self, name: &str, _texture: &Arc<dyn Texture>) {
        self.params
            .lock()
            .insert(name.to_string(), ParamValue::Texture);
    }

    fn set_float(&self, name: &str, value: f32) {
        self.params
            .lock()
            .insert(name.to_string(), ParamValue::Float(value));
    }

    fn set_vec3(&self, name: &str, value: [f32; 3]) {
        self.params
            .lock()
            .insert(name.to_string(), ParamValue::Vec3(value));
    }

    fn set_vec4(&self, name: &str, value: [f32; 4]) {
        self.params
            .lock()
            .insert(name.to_string(), ParamValue::Vec4(value));
    }
}

pub struct HeadlessDevice {
    state: Arc<DeviceState>,
    effects: HashMap<&'static str, Arc<HeadlessEffect>>,
    texture_share: bool,
}

impl HeadlessDevice {
    pub fn new() -> HeadlessDevice {
        Self::with_texture_share(false)
    }

    pub fn with_texture_share(texture_share: bool) -> HeadlessDevice {
        let mut effects = HashMap::new();
        for &name in all_techniques() {
            effects.insert(
                name,
                Arc::new(HeadlessEffect {
                    name,
                    params: Mutex::new(HashMap::new()),
                }),
            );
        }

        HeadlessDevice {
            state: Arc::new(DeviceState {
                current_target: Mutex::new(None),
                sprite_draws: AtomicU64::new(0),
                convert_draws: AtomicU64::new(0),
            }),
            effects,
            texture_share,
        }
    }

    pub fn sprite_draws(&self) -> u64 {
        self.state.sprite_draws.load(Ordering::Acquire)
    }

    pub fn convert_draws(&self) -> u64 {
        self.state.convert_draws.load(Ordering::Acquire)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl GpuDevice for HeadlessDevice {
    fn make_current(&self) {}

    fn done_current(&self) {}

    fn texture_share_enabled(&self) -> bool {
        self.texture_share
    }

    fn texture_create(
        &self,
        width: u32,
        height: u32,
        format: ColorFormat,
        _usage: TextureUsage,
    ) -> Result<Arc<dyn Texture>, GfxError> {
        if width == 0 || height == 0 {
            return Err(GfxError::TextureCreate("zero-sized texture".into()));
        }
        Ok(HeadlessTexture::new(width, height, format))
    }

    fn texture_create_shared(
        &self,
        _handle: u64,
        width: u32,
        height: u32,
    ) -> Result<Arc<dyn Texture>, GfxError> {
        if !self.texture_share {
            return Err(GfxError::TextureShareUnsupported);
        }
        Ok(HeadlessTexture::new(width, height, ColorFormat::Rgba))
    }

    fn texrender_create(&self, format: ColorFormat) -> Result<Arc<dyn TextureRender>, GfxError> {
        Ok(Arc::new(HeadlessTextureRender {
            state: self.state.clone(),
            format,
            texture: Mutex::new(None),
            active: AtomicBool::new(false),
        }))
    }

    fn effect(&self, name: &str) -> Option<Arc<dyn Effect>> {
        self.effects.get(name).map(|e| e.clone() as Arc<dyn Effect>)
    }

    fn clear(&self, color: [f32; 4]) {
        if let Some(target) = self.state.current_target.lock().as_ref() {
            let byte = (color[0].clamp(0.0, 1.0) * 255.0) as u8;
            target.data.lock().fill(byte);
        }
    }

    fn enable_blending(&self, _enable: bool) {}

    fn draw_convert(&self, _effect: &dyn Effect) {
        self.state.convert_draws.fetch_add(1, Ordering::AcqRel);
    }

    fn draw_sprite(
        &self,
        _effect: &dyn Effect,
        texture: &Arc<dyn Texture>,
        _flip: SpriteFlip,
        _transform: Mat4,
    ) {
        self.state.sprite_draws.fetch_add(1, Ordering::AcqRel);

        // When the source and target line up exactly, propagate the bytes so
        // read-back tests can observe uploaded content.
        if let Some(target) = self.state.current_target.lock().as_ref() {
            if texture.width() == target.width
                && texture.height() == target.height
                && texture.format() == target.format
            {
                let Some(src) = texture.as_any().downcast_ref::<HeadlessTexture>() else {
                    return;
                };
                let bytes = src.bytes();
                let mut dst = target.data.lock();
                if dst.len() == bytes.len() {
                    dst.copy_from_slice(&bytes);
                }
            }
        }
    }

    fn texture_read(
        &self,
        texture: &Arc<dyn Texture>,
        out: &mut [u8],
        linesize: u32,
    ) -> Result<(), GfxError> {
        let Some(source) = texture.as_any().downcast_ref::<HeadlessTexture>() else {
            return Err(GfxError::ReadBack("foreign texture".into()));
        };

        let data = source.data.lock();
        let bpp = source.format.bytes_per_pixel();
        let row = (source.width * bpp) as usize;
        let copy = row.min(linesize as usize);

        for y in 0..source.height as usize {
            let src_pos = y * row;
            let dst_pos = y * linesize as usize;
            if src_pos + copy > data.len() || dst_pos + copy > out.len() {
                break;
            }
            out[dst_pos..dst_pos + copy].copy_from_slice(&data[src_pos..src_pos + copy]);
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upload_then_read_back_round_trips() {
        let device = HeadlessDevice::new();
        let texture = device
            .texture_create(4, 2, ColorFormat::R8, TextureUsage::Dynamic)
            .unwrap();
        texture.set_image(&[1, 2, 3, 4, 5, 6, 7, 8], 4, false);

        let mut out = vec![0u8; 8];
        device.texture_read(&texture, &mut out, 4).unwrap();
        assert_eq!(out, vec![1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn inverted_upload_flips_rows() {
        let device = HeadlessDevice::new();
        let texture = device
            .texture_create(2, 2, ColorFormat::R8, TextureUsage::Dynamic)
            .unwrap();
        texture.set_image(&[1, 2, 3, 4], 2, true);

        let mut out = vec![0u8; 4];
        device.texture_read(&texture, &mut out, 2).unwrap();
        assert_eq!(out, vec![3, 4, 1, 2]);
    }

    #[test]
    fn shared_textures_require_support() {
        let device = HeadlessDevice::new();
        assert!(matches!(
            device.texture_create_shared(7, 16, 16),
            Err(GfxError::TextureShareUnsupported)
        ));

        let sharing = HeadlessDevice::with_texture_share(true);
        assert!(sharing.texture_create_shared(7, 16, 16).is_ok());
    }

    #[test]
    fn texrender_binds_and_clears_target() {
        let device = HeadlessDevice::new();
        let render = device.texrender_create(ColorFormat::Rgba).unwrap();
        assert!(render.begin(8, 8));
        device.clear([1.0, 0.0, 0.0, 1.0]);
        render.end();

        let texture = render.texture().unwrap();
        let mut out = vec![0u8; 8 * 8 * 4];
        device.texture_read(&texture, &mut out, 32).unwrap();
        assert!(out.iter().all(|&b| b == 255));
    }
}
