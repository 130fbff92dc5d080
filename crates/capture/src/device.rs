use crate::error::CaptureError;
use crate::frame::Frame;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_id: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceRequest {
    /// This device and no other.
    Exact(String),
    /// Whatever the platform picks, preferring an environment-facing camera.
    Environment,
}

impl DeviceRequest {
    pub fn from_preference(preferred: Option<&str>) -> Self {
        match preferred {
            Some(id) if !id.is_empty() => DeviceRequest::Exact(id.to_string()),
            _ => DeviceRequest::Environment,
        }
    }
}

/// Media-device collaborator. Acquisition may suspend (permission prompts, device warm-up).
#[async_trait]
pub trait CameraDevice: Send + Sync {
    /// Video inputs only.
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError>;

    async fn acquire(&self, request: &DeviceRequest) -> Result<Box<dyn VideoStream>, CaptureError>;
}

/// A live, exclusively owned video feed.
pub trait VideoStream: Send {
    fn device_id(&self) -> Option<String>;

    /// `None` until the source reports frame dimensions.
    fn dimensions(&self) -> Option<(u32, u32)>;

    /// Grab the current picture into `frame`, already sized to [`dimensions`](Self::dimensions).
    fn capture_into(&mut self, frame: &mut Frame) -> Result<(), CaptureError>;

    /// Stop every track of the feed.
    fn stop(&mut self);
}
