use crate::decoder::SymbolDecoder;
use crate::device::{CameraDevice, DeviceInfo, DeviceRequest, VideoStream};
use crate::error::CaptureError;
use crate::frame::Frame;
use crate::still;
use chrono::{DateTime, Utc};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureState {
    Idle,
    Requesting,
    Active,
    Detected,
    Stopped,
    Error,
}

/// What the view layer sees of the current capture session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSnapshot {
    pub state: CaptureState,
    pub session_id: Option<Uuid>,
    pub device_id: Option<String>,
    pub last_sample_at: Option<DateTime<Utc>>,
    pub detected: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    /// A session was already requesting or active; nothing was acquired.
    AlreadyRunning,
    /// The scan was stopped while the camera was being acquired; the new feed was released.
    Cancelled,
}

enum Tick {
    Continue,
    Finished,
    /// A fresh frame is ready for the decoder.
    Decode,
}

struct Inner {
    state: CaptureState,
    // Bumped on every release so late acquisitions and stale ticks can tell they lost.
    generation: u64,
    session_id: Option<Uuid>,
    device_id: Option<String>,
    last_sample_at: Option<DateTime<Utc>>,
    stream: Option<Box<dyn VideoStream>>,
    sampler: Option<JoinHandle<()>>,
    detected: Option<String>,
    error: Option<String>,
}

impl Inner {
    fn snapshot(&self) -> CaptureSnapshot {
        CaptureSnapshot {
            state: self.state,
            session_id: self.session_id,
            device_id: self.device_id.clone(),
            last_sample_at: self.last_sample_at,
            detected: self.detected.clone(),
            error: self.error.clone(),
        }
    }

    /// Stop the feed and the sampling task. Each handle is taken, so it is released once.
    fn release(&mut self, from_sampler: bool) -> bool {
        let mut released = false;
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
            released = true;
        }
        if let Some(handle) = self.sampler.take() {
            if !from_sampler {
                handle.abort();
            }
            released = true;
        }
        self.generation += 1;
        released
    }
}

struct Shared {
    camera: Arc<dyn CameraDevice>,
    decoder: Arc<dyn SymbolDecoder>,
    interval: Duration,
    inner: Mutex<Inner>,
    snapshot: watch::Sender<CaptureSnapshot>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.snapshot.send_replace(inner.snapshot());
    }

    /// Copy the current picture into `frame`. Runs under the lock; decoding does not.
    fn capture_frame(&self, generation: u64, frame: &mut Frame) -> Tick {
        let mut inner = self.lock();
        if inner.generation != generation || inner.state != CaptureState::Active {
            return Tick::Finished;
        }
        let Some(stream) = inner.stream.as_mut() else {
            return Tick::Finished;
        };
        // No dimensions yet: the feed is still warming up.
        let Some((width, height)) = stream.dimensions() else {
            return Tick::Continue;
        };
        frame.resize(width, height);
        if let Err(e) = stream.capture_into(frame) {
            tracing::warn!(error = %e, "frame capture failed, stopping scan");
            self.fail(&mut inner, e.to_string());
            return Tick::Finished;
        }
        inner.last_sample_at = Some(Utc::now());
        Tick::Decode
    }

    fn fail(&self, inner: &mut Inner, error: String) {
        inner.release(true);
        inner.state = CaptureState::Error;
        inner.error = Some(error);
        self.publish(inner);
    }

    fn publish_detection(&self, generation: u64, token: String) {
        let mut inner = self.lock();
        if inner.generation != generation {
            tracing::debug!("discarding detection from a stopped session");
            return;
        }
        tracing::info!(session_id = ?inner.session_id, "symbol detected");
        inner.state = CaptureState::Detected;
        inner.detected = Some(token);
        self.publish(&inner);

        inner.release(true);
        inner.state = CaptureState::Idle;
        self.publish(&inner);
    }
}

async fn sample_loop(shared: Arc<Shared>, generation: u64) {
    let mut frame = Frame::default();
    loop {
        tokio::time::sleep(shared.interval).await;
        match shared.capture_frame(generation, &mut frame) {
            Tick::Continue => continue,
            Tick::Finished => break,
            Tick::Decode => {}
        }

        // Decoding is CPU-bound; keep it off the runtime workers.
        let decoder = Arc::clone(&shared.decoder);
        let decoding = tokio::task::spawn_blocking(move || {
            let token = decoder.decode(&frame);
            (frame, token)
        });
        match decoding.await {
            Ok((sampled, None)) => frame = sampled,
            Ok((_, Some(token))) => {
                shared.publish_detection(generation, token);
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "decoder task failed, stopping scan");
                let mut inner = shared.lock();
                if inner.generation == generation {
                    shared.fail(&mut inner, format!("decoder failed: {e}"));
                }
                break;
            }
        }
    }
}

/// Owns the camera for one scan at a time and polls it until a symbol is decoded.
///
/// The camera handle and the sampling task are released on every exit path: explicit
/// [`stop_scan`](Self::stop_scan), detection, capture errors and drop.
pub struct CaptureController {
    shared: Arc<Shared>,
}

impl CaptureController {
    pub fn new(camera: Arc<dyn CameraDevice>, decoder: Arc<dyn SymbolDecoder>) -> Self {
        Self::with_interval(camera, decoder, DEFAULT_SAMPLE_INTERVAL)
    }

    pub fn with_interval(
        camera: Arc<dyn CameraDevice>,
        decoder: Arc<dyn SymbolDecoder>,
        interval: Duration,
    ) -> Self {
        let inner = Inner {
            state: CaptureState::Idle,
            generation: 0,
            session_id: None,
            device_id: None,
            last_sample_at: None,
            stream: None,
            sampler: None,
            detected: None,
            error: None,
        };
        let (snapshot, _) = watch::channel(inner.snapshot());
        Self {
            shared: Arc::new(Shared {
                camera,
                decoder,
                interval,
                inner: Mutex::new(inner),
                snapshot,
            }),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.lock().state
    }

    pub fn snapshot(&self) -> CaptureSnapshot {
        self.shared.lock().snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<CaptureSnapshot> {
        self.shared.snapshot.subscribe()
    }

    pub async fn list_cameras(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        self.shared.camera.list_devices().await
    }

    /// Acquire a camera and start sampling.
    ///
    /// A no-op while another session is requesting or active. Starting from `Error`
    /// acknowledges the error first.
    pub async fn start_scan(
        &self,
        preferred_device: Option<&str>,
    ) -> Result<StartOutcome, CaptureError> {
        let (generation, session_id) = {
            let mut inner = self.shared.lock();
            if matches!(inner.state, CaptureState::Requesting | CaptureState::Active) {
                return Ok(StartOutcome::AlreadyRunning);
            }
            if inner.state == CaptureState::Error {
                tracing::info!(
                    session_id = ?inner.session_id,
                    error = ?inner.error,
                    "new scan acknowledges previous error"
                );
                inner.state = CaptureState::Idle;
                inner.error = None;
                self.shared.publish(&inner);
            }
            inner.generation += 1;
            inner.state = CaptureState::Requesting;
            inner.session_id = Some(Uuid::new_v4());
            inner.device_id = None;
            inner.last_sample_at = None;
            inner.detected = None;
            inner.error = None;
            self.shared.publish(&inner);
            (inner.generation, inner.session_id)
        };

        let request = DeviceRequest::from_preference(preferred_device);
        let acquired = self.shared.camera.acquire(&request).await;

        let mut inner = self.shared.lock();
        let current = inner.generation == generation && inner.state == CaptureState::Requesting;
        match acquired {
            Err(e) => {
                tracing::warn!(?session_id, error = %e, "camera acquisition failed");
                if current {
                    inner.state = CaptureState::Error;
                    inner.error = Some(e.to_string());
                    self.shared.publish(&inner);
                }
                Err(e)
            }
            Ok(mut stream) if !current => {
                stream.stop();
                tracing::debug!(?session_id, "scan stopped during acquisition");
                Ok(StartOutcome::Cancelled)
            }
            Ok(stream) => {
                inner.device_id = stream.device_id();
                inner.stream = Some(stream);
                inner.state = CaptureState::Active;
                inner.sampler = Some(tokio::spawn(sample_loop(
                    Arc::clone(&self.shared),
                    generation,
                )));
                self.shared.publish(&inner);
                tracing::info!(
                    ?session_id,
                    device_id = ?inner.device_id,
                    interval_ms = self.shared.interval.as_millis() as u64,
                    "scan started"
                );
                Ok(StartOutcome::Started)
            }
        }
    }

    /// Release the camera and cancel sampling. Returns whether anything was released.
    ///
    /// Safe to call at any time; an `Error` session stays in `Error` until acknowledged
    /// or a new scan starts.
    pub fn stop_scan(&self) -> bool {
        let mut inner = self.shared.lock();
        let was = inner.state;
        let released = inner.release(false);
        if matches!(
            was,
            CaptureState::Requesting | CaptureState::Active | CaptureState::Detected
        ) {
            inner.state = CaptureState::Stopped;
            self.shared.publish(&inner);
            inner.state = CaptureState::Idle;
            self.shared.publish(&inner);
            tracing::info!(session_id = ?inner.session_id, "scan stopped");
        }
        released
    }

    /// Switch devices: the current feed is stopped before the next one is requested.
    pub async fn restart_scan(
        &self,
        preferred_device: Option<&str>,
    ) -> Result<StartOutcome, CaptureError> {
        self.stop_scan();
        self.start_scan(preferred_device).await
    }

    /// Leave the `Error` state.
    pub fn acknowledge_error(&self) {
        let mut inner = self.shared.lock();
        if inner.state == CaptureState::Error {
            inner.state = CaptureState::Idle;
            inner.error = None;
            self.shared.publish(&inner);
        }
    }

    /// One-shot decode of an uploaded picture. Does not touch the camera or its state.
    pub fn decode_still_image(&self, bytes: &[u8]) -> Result<Option<String>, CaptureError> {
        still::decode_still_image(self.shared.decoder.as_ref(), bytes)
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.stop_scan();
    }
}
