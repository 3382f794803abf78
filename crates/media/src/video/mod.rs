//! Video output fan-out and the frame-paced compositor that feeds it.

mod compositor;
mod output;

pub use compositor::{CoreVideo, VideoSettings};
pub use output::{VideoOutput, VideoOutputInfo};

use std::sync::Arc;

use beam_gfx::Texture;
use beam_media_info::VideoFrame;

/// A composed frame handed to a subscriber.
pub struct VideoData<'a> {
    pub frame: &'a VideoFrame,
    pub timestamp: u64,
}

/// Downstream video consumer. Subscriber identity is the `Arc` itself.
pub trait VideoSink: Send + Sync {
    fn receive_video(&self, data: &VideoData<'_>);
}

/// Zero-copy consumer of the composed GPU texture (hardware encoders).
pub trait GpuEncoderSink: Send + Sync {
    fn receive_texture(&self, texture: &Arc<dyn Texture>, timestamp: u64);
}
