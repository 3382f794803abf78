use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoFormat {
    None,

    /* planar 4:2:0 */
    I420,
    Nv12,

    /* packed 4:2:2 */
    Yvyu,
    Yuy2,
    Uyvy,

    /* packed uncompressed */
    Rgba,
    Bgra,
    Bgrx,
    Y800,

    /* planar 4:4:4 */
    I444,

    /* 24-bit packed BGR */
    Bgr3,

    /* planar 4:2:2 */
    I422,

    /* planar with alpha */
    I40a,
    I42a,
    Yuva,

    /* packed 4:4:4 with alpha */
    Ayuv,
}

impl VideoFormat {
    pub const fn is_yuv(self) -> bool {
        matches!(
            self,
            VideoFormat::I420
                | VideoFormat::Nv12
                | VideoFormat::I422
                | VideoFormat::Yvyu
                | VideoFormat::Yuy2
                | VideoFormat::Uyvy
                | VideoFormat::I444
                | VideoFormat::I40a
                | VideoFormat::I42a
                | VideoFormat::Yuva
                | VideoFormat::Ayuv
        )
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoColorSpace {
    #[default]
    Default,
    Bt601,
    Bt709,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum VideoRange {
    #[default]
    Default,
    Partial,
    Full,
}

impl VideoRange {
    pub const fn is_full(self) -> bool {
        matches!(self, VideoRange::Full)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScaleKind {
    #[default]
    Default,
    Point,
    FastBilinear,
    Bilinear,
    Bicubic,
}

/// Target description for a scaled/converted video subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoScaleInfo {
    pub format: VideoFormat,
    pub width: u32,
    pub height: u32,
    pub range: VideoRange,
    pub colorspace: VideoColorSpace,
}

/// How a source frame reaches RGBA on the GPU. Classifying the format once
/// keeps the texture plan, the technique choice and the cache-invalidation
/// check in agreement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConvertMode {
    None,
    Nv12,
    Planar420,
    Planar420Alpha,
    Planar422,
    Planar422Alpha,
    Packed422,
    Planar444,
    Planar444Alpha,
    Packed444Alpha,
    Gray,
    RgbLimited,
    Bgr3,
}

impl ConvertMode {
    pub fn of(format: VideoFormat, full_range: bool) -> ConvertMode {
        match format {
            VideoFormat::I420 => ConvertMode::Planar420,
            VideoFormat::Nv12 => ConvertMode::Nv12,
            VideoFormat::I444 => ConvertMode::Planar444,
            VideoFormat::I422 => ConvertMode::Planar422,

            VideoFormat::Yvyu | VideoFormat::Yuy2 | VideoFormat::Uyvy => ConvertMode::Packed422,

            VideoFormat::Y800 => ConvertMode::Gray,

            VideoFormat::None | VideoFormat::Rgba | VideoFormat::Bgra | VideoFormat::Bgrx => {
                if full_range {
                    ConvertMode::None
                } else {
                    ConvertMode::RgbLimited
                }
            }

            VideoFormat::Bgr3 => ConvertMode::Bgr3,
            VideoFormat::I40a => ConvertMode::Planar420Alpha,
            VideoFormat::I42a => ConvertMode::Planar422Alpha,
            VideoFormat::Yuva => ConvertMode::Planar444Alpha,
            VideoFormat::Ayuv => ConvertMode::Packed444Alpha,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgb_formats_convert_only_when_limited() {
        assert_eq!(ConvertMode::of(VideoFormat::Rgba, true), ConvertMode::None);
        assert_eq!(
            ConvertMode::of(VideoFormat::Rgba, false),
            ConvertMode::RgbLimited
        );
        assert_eq!(ConvertMode::of(VideoFormat::Bgrx, true), ConvertMode::None);
    }

    #[test]
    fn packed_422_groups_together() {
        for format in [VideoFormat::Yvyu, VideoFormat::Yuy2, VideoFormat::Uyvy] {
            assert_eq!(ConvertMode::of(format, false), ConvertMode::Packed422);
        }
    }
}
