#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// Permission denied or no usable device. Manual entry and still images still work.
    #[error("camera unavailable: {0}")]
    CameraUnavailable(String),
    #[error("could not read image: {0}")]
    ImageUnreadable(String),
    #[error("frame capture failed: {0}")]
    FrameCapture(String),
}
