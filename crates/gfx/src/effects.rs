use crate::ColorFormat;
use beam_media_info::{ConvertMode, VideoFormat};

/// Effect used for plain textured draws.
pub const DEFAULT_DRAW: &str = "Default_Draw";

/// Shader technique for decoding a source format to RGBA. One table; the
/// compositor must not re-derive this per call site.
pub fn conversion_technique(format: VideoFormat, full_range: bool) -> Option<&'static str> {
    Some(match format {
        VideoFormat::Uyvy => "Convert_UYVY_Reverse",
        VideoFormat::Yuy2 => "Convert_YUY2_Reverse",
        VideoFormat::Yvyu => "Convert_YVYU_Reverse",
        VideoFormat::I420 => "Convert_I420_Reverse",
        VideoFormat::Nv12 => "Convert_NV12_Reverse",
        VideoFormat::I444 => "Convert_I444_Reverse",
        VideoFormat::I422 => "Convert_I422_Reverse",
        VideoFormat::I40a => "Convert_I40A_Reverse",
        VideoFormat::I42a => "Convert_I42A_Reverse",
        VideoFormat::Yuva => "Convert_YUVA_Reverse",
        VideoFormat::Ayuv => "Convert_AYUV_Reverse",

        VideoFormat::Y800 => {
            if full_range {
                "Convert_Y800_Full"
            } else {
                "Convert_Y800_Limited"
            }
        }

        VideoFormat::Bgr3 => {
            if full_range {
                "Convert_BGR3_Full"
            } else {
                "Convert_BGR3_Limited"
            }
        }

        VideoFormat::Rgba | VideoFormat::Bgra | VideoFormat::Bgrx | VideoFormat::None => {
            if full_range {
                return None;
            }
            "Convert_RGB_Limited"
        }
    })
}

/// All technique names a conforming device must provide.
pub fn all_techniques() -> &'static [&'static str] {
    &[
        DEFAULT_DRAW,
        "Convert_UYVY_Reverse",
        "Convert_YUY2_Reverse",
        "Convert_YVYU_Reverse",
        "Convert_I420_Reverse",
        "Convert_NV12_Reverse",
        "Convert_I444_Reverse",
        "Convert_I422_Reverse",
        "Convert_I40A_Reverse",
        "Convert_I42A_Reverse",
        "Convert_YUVA_Reverse",
        "Convert_AYUV_Reverse",
        "Convert_Y800_Full",
        "Convert_Y800_Limited",
        "Convert_BGR3_Full",
        "Convert_BGR3_Limited",
        "Convert_RGB_Limited",
    ]
}

/// Render-target pixel format for a decoded source frame.
pub fn texture_format_for(format: VideoFormat) -> ColorFormat {
    match format {
        VideoFormat::Rgba => ColorFormat::Rgba,
        VideoFormat::Bgra
        | VideoFormat::I40a
        | VideoFormat::I42a
        | VideoFormat::Yuva
        | VideoFormat::Ayuv => ColorFormat::Bgra,
        _ => ColorFormat::Bgrx,
    }
}

/// Input texture set for a GPU conversion: per-plane texture dimensions and
/// formats the uploaded source planes bind to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionPlan {
    pub count: usize,
    pub width: [u32; 4],
    pub height: [u32; 4],
    pub format: [ColorFormat; 4],
}

impl ConversionPlan {
    fn planes(specs: &[(u32, u32, ColorFormat)]) -> ConversionPlan {
        let mut plan = ConversionPlan {
            count: specs.len(),
            width: [0; 4],
            height: [0; 4],
            format: [ColorFormat::R8; 4],
        };
        for (i, &(w, h, f)) in specs.iter().enumerate() {
            plan.width[i] = w;
            plan.height[i] = h;
            plan.format[i] = f;
        }
        plan
    }
}

pub fn conversion_plan(format: VideoFormat, full_range: bool, width: u32, height: u32) -> Option<ConversionPlan> {
    use ColorFormat::*;

    let plan = match ConvertMode::of(format, full_range) {
        ConvertMode::None => return None,

        ConvertMode::Packed422 => ConversionPlan::planes(&[(width / 2, height, Bgra)]),

        ConvertMode::Packed444Alpha => ConversionPlan::planes(&[(width, height, Bgra)]),

        ConvertMode::Planar420 => ConversionPlan::planes(&[
            (width, height, R8),
            (width / 2, height / 2, R8),
            (width / 2, height / 2, R8),
        ]),

        ConvertMode::Planar420Alpha => ConversionPlan::planes(&[
            (width, height, R8),
            (width / 2, height / 2, R8),
            (width / 2, height / 2, R8),
            (width, height, R8),
        ]),

        ConvertMode::Planar422 => ConversionPlan::planes(&[
            (width, height, R8),
            (width / 2, height, R8),
            (width / 2, height, R8),
        ]),

        ConvertMode::Planar422Alpha => ConversionPlan::planes(&[
            (width, height, R8),
            (width / 2, height, R8),
            (width / 2, height, R8),
            (width, height, R8),
        ]),

        ConvertMode::Planar444 => ConversionPlan::planes(&[
            (width, height, R8),
            (width, height, R8),
            (width, height, R8),
        ]),

        ConvertMode::Planar444Alpha => ConversionPlan::planes(&[
            (width, height, R8),
            (width, height, R8),
            (width, height, R8),
            (width, height, R8),
        ]),

        ConvertMode::Nv12 => ConversionPlan::planes(&[
            (width, height, R8),
            (width / 2, height / 2, R8G8),
        ]),

        ConvertMode::Gray => ConversionPlan::planes(&[(width, height, R8)]),

        ConvertMode::RgbLimited => {
            ConversionPlan::planes(&[(width, height, texture_format_for(format))])
        }

        ConvertMode::Bgr3 => ConversionPlan::planes(&[(width * 3, height, R8)]),
    };

    Some(plan)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn technique_matches_range_for_gray_and_bgr() {
        assert_eq!(
            conversion_technique(VideoFormat::Y800, true),
            Some("Convert_Y800_Full")
        );
        assert_eq!(
            conversion_technique(VideoFormat::Bgr3, false),
            Some("Convert_BGR3_Limited")
        );
        assert_eq!(conversion_technique(VideoFormat::Rgba, true), None);
        assert_eq!(
            conversion_technique(VideoFormat::Rgba, false),
            Some("Convert_RGB_Limited")
        );
    }

    #[test]
    fn every_technique_is_registered() {
        for format in [
            VideoFormat::I420,
            VideoFormat::Nv12,
            VideoFormat::Uyvy,
            VideoFormat::Yuy2,
            VideoFormat::Yvyu,
            VideoFormat::I444,
            VideoFormat::I422,
            VideoFormat::I40a,
            VideoFormat::I42a,
            VideoFormat::Yuva,
            VideoFormat::Ayuv,
            VideoFormat::Y800,
            VideoFormat::Bgr3,
            VideoFormat::Bgra,
        ] {
            for full in [false, true] {
                if let Some(name) = conversion_technique(format, full) {
                    assert!(all_techniques().contains(&name), "{name} missing");
                }
            }
        }
    }

    #[test]
    fn nv12_plan_uses_paired_chroma() {
        let plan = conversion_plan(VideoFormat::Nv12, false, 1280, 720).unwrap();
        assert_eq!(plan.count, 2);
        assert_eq!(plan.format[1], ColorFormat::R8G8);
        assert_eq!((plan.width[1], plan.height[1]), (640, 360));
    }

    #[test]
    fn packed_422_decodes_at_half_width() {
        let plan = conversion_plan(VideoFormat::Uyvy, false, 1280, 720).unwrap();
        assert_eq!(plan.count, 1);
        assert_eq!((plan.width[0], plan.height[0]), (640, 720));
        assert_eq!(plan.format[0], ColorFormat::Bgra);
    }
}
