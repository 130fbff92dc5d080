//! A camera that replays the pictures of a folder, one per sampling tick.

use crate::device::{CameraDevice, DeviceInfo, DeviceRequest, VideoStream};
use crate::error::CaptureError;
use crate::frame::Frame;
use async_trait::async_trait;
use image::GrayImage;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

#[derive(Debug, Clone)]
pub struct DirectoryCamera {
    dir: PathBuf,
}

impl DirectoryCamera {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn device_id(&self) -> String {
        self.dir.display().to_string()
    }
}

fn frame_paths(dir: &Path) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|p| {
            p.extension()
                .and_then(|e| e.to_str())
                .map(|ext| FRAME_EXTENSIONS.iter().any(|f| ext.eq_ignore_ascii_case(f)))
                .unwrap_or(false)
        })
        .collect();
    paths.sort();
    paths
}

fn load_frames(dir: &Path) -> Result<Vec<GrayImage>, CaptureError> {
    if !dir.is_dir() {
        return Err(CaptureError::CameraUnavailable(format!(
            "{} is not a directory",
            dir.display()
        )));
    }
    let mut frames = Vec::new();
    for path in frame_paths(dir) {
        match image::open(&path) {
            Ok(img) => frames.push(img.to_luma8()),
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame"),
        }
    }
    if frames.is_empty() {
        return Err(CaptureError::CameraUnavailable(format!(
            "no frames in {}",
            dir.display()
        )));
    }
    Ok(frames)
}

#[async_trait]
impl CameraDevice for DirectoryCamera {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        if !self.dir.is_dir() {
            return Ok(Vec::new());
        }
        Ok(vec![DeviceInfo {
            device_id: self.device_id(),
            label: format!("frames in {}", self.dir.display()),
        }])
    }

    async fn acquire(&self, request: &DeviceRequest) -> Result<Box<dyn VideoStream>, CaptureError> {
        if let DeviceRequest::Exact(id) = request {
            if *id != self.device_id() {
                return Err(CaptureError::CameraUnavailable(format!("no such device: {id}")));
            }
        }
        let dir = self.dir.clone();
        let frames = tokio::task::spawn_blocking(move || load_frames(&dir))
            .await
            .map_err(|e| CaptureError::CameraUnavailable(e.to_string()))??;
        tracing::debug!(frames = frames.len(), dir = %self.dir.display(), "directory camera opened");
        Ok(Box::new(DirectoryStream {
            device_id: self.device_id(),
            frames,
            next: 0,
        }))
    }
}

struct DirectoryStream {
    device_id: String,
    frames: Vec<GrayImage>,
    next: usize,
}

impl VideoStream for DirectoryStream {
    fn device_id(&self) -> Option<String> {
        Some(self.device_id.clone())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        self.frames
            .get(self.next)
            .map(|img| (img.width(), img.height()))
    }

    fn capture_into(&mut self, frame: &mut Frame) -> Result<(), CaptureError> {
        let img = self
            .frames
            .get(self.next)
            .ok_or_else(|| CaptureError::FrameCapture("stream stopped".to_string()))?;
        frame.copy_from_luma(img);
        self.next = (self.next + 1) % self.frames.len();
        Ok(())
    }

    fn stop(&mut self) {
        self.frames.clear();
        self.next = 0;
    }
}
