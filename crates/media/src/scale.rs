//! Video scaler collaborator contract.
//!
//! Subscribers whose requested format/size differs from the output's native
//! info get a per-subscriber scaler. [`SoftwareScalers`] covers the packed
//! single-plane formats with nearest-neighbor sampling; hosts plug real
//! back-ends in through [`ScalerProvider`].

use beam_media_info::{VideoFormat, VideoFrame, VideoScaleInfo};
use tracing::error;

use crate::MediaError;

pub trait VideoScaler: Send {
    fn scale(&mut self, dst: &mut VideoFrame, src: &VideoFrame) -> Result<(), MediaError>;
}

pub trait ScalerProvider: Send + Sync {
    fn create(
        &self,
        dst: &VideoScaleInfo,
        src: &VideoScaleInfo,
    ) -> Result<Box<dyn VideoScaler>, MediaError>;
}

/// Built-in nearest-neighbor scaler for packed formats.
pub struct SoftwareScalers;

fn packed_pixel_size(format: VideoFormat) -> Option<usize> {
    match format {
        VideoFormat::Rgba | VideoFormat::Bgra | VideoFormat::Bgrx | VideoFormat::Ayuv => Some(4),
        VideoFormat::Bgr3 => Some(3),
        VideoFormat::Y800 => Some(1),
        _ => None,
    }
}

impl ScalerProvider for SoftwareScalers {
    fn create(
        &self,
        dst: &VideoScaleInfo,
        src: &VideoScaleInfo,
    ) -> Result<Box<dyn VideoScaler>, MediaError> {
        if dst.format != src.format {
            error!(
                "software scaler cannot convert {:?} to {:?}",
                src.format, dst.format
            );
            return Err(MediaError::BadConversion);
        }
        let Some(pixel_size) = packed_pixel_size(src.format) else {
            return Err(MediaError::BadConversion);
        };
        if dst.width == 0 || dst.height == 0 || src.width == 0 || src.height == 0 {
            return Err(MediaError::ScalerCreate);
        }

        Ok(Box::new(PointScaler { pixel_size }))
    }
}

struct PointScaler {
    pixel_size: usize,
}

impl VideoScaler for PointScaler {
    fn scale(&mut self, dst: &mut VideoFrame, src: &VideoFrame) -> Result<(), MediaError> {
        let (sw, sh) = (src.width() as usize, src.height() as usize);
        let (dw, dh) = (dst.width() as usize, dst.height() as usize);
        let pixel = self.pixel_size;

        let src_linesize = src.linesize(0) as usize;
        let dst_linesize = dst.linesize(0) as usize;
        let src_plane = src.plane(0).to_vec();
        let dst_plane = dst.plane_mut(0);

        for y in 0..dh {
            let sy = y * sh / dh;
            for x in 0..dw {
                let sx = x * sw / dw;
                let src_pos = sy * src_linesize + sx * pixel;
                let dst_pos = y * dst_linesize + x * pixel;
                dst_plane[dst_pos..dst_pos + pixel]
                    .copy_from_slice(&src_plane[src_pos..src_pos + pixel]);
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use beam_media_info::{VideoColorSpace, VideoRange};

    fn info(format: VideoFormat, width: u32, height: u32) -> VideoScaleInfo {
        VideoScaleInfo {
            format,
            width,
            height,
            range: VideoRange::Default,
            colorspace: VideoColorSpace::Default,
        }
    }

    #[test]
    fn doubling_replicates_pixels() {
        let src_info = info(VideoFormat::Y800, 2, 2);
        let dst_info = info(VideoFormat::Y800, 4, 4);
        let mut scaler = SoftwareScalers.create(&dst_info, &src_info).unwrap();

        let mut src = VideoFrame::new(VideoFormat::Y800, 2, 2).unwrap();
        src.plane_mut(0).copy_from_slice(&[10, 20, 30, 40]);
        let mut dst = VideoFrame::new(VideoFormat::Y800, 4, 4).unwrap();

        scaler.scale(&mut dst, &src).unwrap();
        assert_eq!(
            dst.plane(0),
            &[
                10, 10, 20, 20, //
                10, 10, 20, 20, //
                30, 30, 40, 40, //
                30, 30, 40, 40,
            ]
        );
    }

    #[test]
    fn format_conversion_is_rejected() {
        let src_info = info(VideoFormat::Rgba, 4, 4);
        let dst_info = info(VideoFormat::Y800, 4, 4);
        assert!(matches!(
            SoftwareScalers.create(&dst_info, &src_info),
            Err(MediaError::BadConversion)
        ));
    }

    #[test]
    fn planar_formats_are_rejected() {
        let src_info = info(VideoFormat::I420, 4, 4);
        assert!(SoftwareScalers.create(&src_info, &src_info).is_err());
    }
}
