//! Graphics collaborator contract for the beam compositor.
//!
//! The compositor does not own a GPU implementation; it drives whatever
//! device the host hands it through the capability traits below. The
//! [`headless`] module provides a software device that satisfies the
//! contract for tests and GPU-less hosts.

pub mod effects;
pub mod headless;
pub mod math;

pub use effects::*;
pub use math::Mat4;

use std::sync::Arc;

#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    #[error("texture creation failed: {0}")]
    TextureCreate(String),

    #[error("texture sharing is not supported by this device")]
    TextureShareUnsupported,

    #[error("render target creation failed: {0}")]
    RenderTargetCreate(String),

    #[error("texture read-back failed: {0}")]
    ReadBack(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorFormat {
    Rgba,
    Bgra,
    Bgrx,
    R8,
    R8G8,
}

impl ColorFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            ColorFormat::Rgba | ColorFormat::Bgra | ColorFormat::Bgrx => 4,
            ColorFormat::R8 => 1,
            ColorFormat::R8G8 => 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    /// Frequently re-uploaded from CPU memory.
    Dynamic,
    /// Used as a render target.
    RenderTarget,
}

/// Flip flags passed to sprite draws.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SpriteFlip {
    pub vertical: bool,
    pub horizontal: bool,
}

pub trait Texture: Send + Sync + 'static {
    fn width(&self) -> u32;
    fn height(&self) -> u32;
    fn format(&self) -> ColorFormat;

    /// Upload image bytes with the given stride. `invert` flips vertically
    /// during the upload.
    fn set_image(&self, data: &[u8], linesize: u32, invert: bool);

    /// Concrete-type access for device implementations; a device may only be
    /// handed textures it created itself.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// An offscreen render target that can be begun/ended and then sampled as a
/// texture. Interior-mutable; only the graphics thread touches it.
pub trait TextureRender: Send + Sync {
    fn reset(&self);
    fn begin(&self, width: u32, height: u32) -> bool;
    fn end(&self);
    fn texture(&self) -> Option<Arc<dyn Texture>>;
}

/// A named shader program with texture and parameter setters.
pub trait Effect: Send + Sync {
    fn name(&self) -> &str;
    fn set_texture(&self, name: &str, texture: &Arc<dyn Texture>);
    fn set_float(&self, name: &str, value: f32);
    fn set_vec3(&self, name: &str, value: [f32; 3]);
    fn set_vec4(&self, name: &str, value: [f32; 4]);
}

pub trait GpuDevice: Send + Sync {
    /// Bind the device's context to the calling thread.
    fn make_current(&self);
    fn done_current(&self);

    /// Whether externally-created textures can be imported by handle.
    fn texture_share_enabled(&self) -> bool;

    fn texture_create(
        &self,
        width: u32,
        height: u32,
        format: ColorFormat,
        usage: TextureUsage,
    ) -> Result<Arc<dyn Texture>, GfxError>;

    fn texture_create_shared(
        &self,
        handle: u64,
        width: u32,
        height: u32,
    ) -> Result<Arc<dyn Texture>, GfxError>;

    fn texrender_create(&self, format: ColorFormat) -> Result<Arc<dyn TextureRender>, GfxError>;

    fn effect(&self, name: &str) -> Option<Arc<dyn Effect>>;

    fn clear(&self, color: [f32; 4]);
    fn enable_blending(&self, enable: bool);

    /// Draw the bound conversion effect as a fullscreen pass into the
    /// currently-begun render target.
    fn draw_convert(&self, effect: &dyn Effect);

    /// Draw a textured sprite with the given flip flags and transform into
    /// the currently-begun render target.
    fn draw_sprite(
        &self,
        effect: &dyn Effect,
        texture: &Arc<dyn Texture>,
        flip: SpriteFlip,
        transform: Mat4,
    );

    /// Synchronously read a texture back to CPU memory.
    fn texture_read(
        &self,
        texture: &Arc<dyn Texture>,
        out: &mut [u8],
        linesize: u32,
    ) -> Result<(), GfxError>;
}
