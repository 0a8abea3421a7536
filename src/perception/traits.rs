use async_trait::async_trait;

use crate::errors::PilotResult;
use crate::perception::screenshot::{encode_jpeg_base64, DEFAULT_JPEG_QUALITY};
use crate::perception::types::{RawImage, ViewNode};

/// Source of raw screen frames.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn capture(&self) -> PilotResult<RawImage>;

    /// Lossy JPEG re-compression until the output fits `max_size_kb`, returned as base64.
    fn encode(&self, image: &RawImage, max_size_kb: usize) -> PilotResult<String> {
        encode_jpeg_base64(image, max_size_kb, DEFAULT_JPEG_QUALITY)
    }
}

/// Source of the UI tree for the current window.
#[async_trait]
pub trait ViewTreeReader: Send + Sync {
    async fn read(&self) -> PilotResult<ViewNode>;
}
