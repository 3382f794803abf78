use crate::{VideoColorSpace, VideoRange};

/// YUV decode parameters for the GPU conversion shaders: a row-major 4x4
/// YUV->RGB matrix with the range offsets folded in, plus the per-channel
/// clamp bounds for limited-range content.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoFormatParams {
    pub matrix: [f32; 16],
    pub range_min: [f32; 3],
    pub range_max: [f32; 3],
    pub full_range: bool,
}

struct Coefficients {
    kr: f32,
    kb: f32,
}

fn coefficients(cs: VideoColorSpace) -> Coefficients {
    match cs {
        VideoColorSpace::Default | VideoColorSpace::Bt601 => Coefficients {
            kr: 0.299,
            kb: 0.114,
        },
        VideoColorSpace::Bt709 => Coefficients {
            kr: 0.2126,
            kb: 0.0722,
        },
    }
}

/// Derive the decode matrix for a colorspace/range pair. Matrices are
/// computed from the luma coefficients rather than tabulated so the 601 and
/// 709 paths cannot drift apart.
pub fn video_format_parameters(cs: VideoColorSpace, range: VideoRange) -> VideoFormatParams {
    let Coefficients { kr, kb } = coefficients(cs);
    let kg = 1.0 - kr - kb;
    let full = range.is_full();

    let (y_min, y_scale, c_scale) = if full {
        (0.0f32, 1.0f32, 1.0f32)
    } else {
        (16.0 / 255.0, 255.0 / 219.0, 255.0 / 224.0)
    };
    let c_mid = 128.0 / 255.0;

    let vr = (2.0 - 2.0 * kr) * c_scale;
    let ub = (2.0 - 2.0 * kb) * c_scale;
    let ug = 2.0 * kb * (1.0 - kb) / kg * c_scale;
    let vg = 2.0 * kr * (1.0 - kr) / kg * c_scale;

    #[rustfmt::skip]
    let matrix = [
        y_scale, 0.0, vr,  -(y_scale * y_min + vr * c_mid),
        y_scale, -ug, -vg, -(y_scale * y_min) + (ug + vg) * c_mid,
        y_scale, ub,  0.0, -(y_scale * y_min + ub * c_mid),
        0.0,     0.0, 0.0, 1.0,
    ];

    let (range_min, range_max) = if full {
        ([0.0; 3], [1.0; 3])
    } else {
        (
            [16.0 / 255.0; 3],
            [235.0 / 255.0, 240.0 / 255.0, 240.0 / 255.0],
        )
    };

    VideoFormatParams {
        matrix,
        range_min,
        range_max,
        full_range: full,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn bt601_limited_matches_reference_values() {
        let params = video_format_parameters(VideoColorSpace::Bt601, VideoRange::Partial);
        let m = params.matrix;
        assert!(close(m[0], 1.164384));
        assert!(close(m[2], 1.596027));
        assert!(close(m[3], -0.874202));
        assert!(close(m[5], -0.391762));
        assert!(close(m[6], -0.812968));
        assert!(close(m[9], 2.017232));
        assert!(close(m[11], -1.085631));
        assert!(!params.full_range);
    }

    #[test]
    fn default_range_is_partial() {
        let default = video_format_parameters(VideoColorSpace::Default, VideoRange::Default);
        let partial = video_format_parameters(VideoColorSpace::Bt601, VideoRange::Partial);
        assert_eq!(default, partial);
    }

    #[test]
    fn full_range_has_identity_offsets() {
        let params = video_format_parameters(VideoColorSpace::Bt709, VideoRange::Full);
        assert!(close(params.matrix[0], 1.0));
        assert_eq!(params.range_min, [0.0; 3]);
        assert_eq!(params.range_max, [1.0; 3]);
    }
}
