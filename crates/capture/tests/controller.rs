use async_trait::async_trait;
use capture::{
    CameraDevice, CaptureController, CaptureError, CaptureState, DeviceInfo, DeviceRequest, Frame,
    StartOutcome, SymbolDecoder, VideoStream,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Default)]
struct StreamLedger {
    log: Mutex<Vec<String>>,
    active: AtomicUsize,
    acquisitions: AtomicUsize,
}

impl StreamLedger {
    fn log(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }
}

struct ScriptedCamera {
    ledger: Arc<StreamLedger>,
    acquire_delay: Duration,
    deny: AtomicBool,
    warming_up: bool,
    broken_capture: bool,
}

impl ScriptedCamera {
    fn new(ledger: Arc<StreamLedger>) -> Self {
        Self {
            ledger,
            acquire_delay: Duration::ZERO,
            deny: AtomicBool::new(false),
            warming_up: false,
            broken_capture: false,
        }
    }
}

#[async_trait]
impl CameraDevice for ScriptedCamera {
    async fn list_devices(&self) -> Result<Vec<DeviceInfo>, CaptureError> {
        Ok(vec![DeviceInfo {
            device_id: "cam-a".into(),
            label: "Back camera".into(),
        }])
    }

    async fn acquire(&self, request: &DeviceRequest) -> Result<Box<dyn VideoStream>, CaptureError> {
        if !self.acquire_delay.is_zero() {
            sleep(self.acquire_delay).await;
        }
        if self.deny.load(Ordering::SeqCst) {
            return Err(CaptureError::CameraUnavailable("permission denied".into()));
        }
        let id = match request {
            DeviceRequest::Exact(id) => id.clone(),
            DeviceRequest::Environment => "default".to_string(),
        };
        self.ledger.log.lock().unwrap().push(format!("acquire {id}"));
        self.ledger.acquisitions.fetch_add(1, Ordering::SeqCst);
        self.ledger.active.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            id,
            ledger: Arc::clone(&self.ledger),
            warming_up: self.warming_up,
            broken: self.broken_capture,
            stopped: false,
        }))
    }
}

struct ScriptedStream {
    id: String,
    ledger: Arc<StreamLedger>,
    warming_up: bool,
    broken: bool,
    stopped: bool,
}

impl VideoStream for ScriptedStream {
    fn device_id(&self) -> Option<String> {
        Some(self.id.clone())
    }

    fn dimensions(&self) -> Option<(u32, u32)> {
        (!self.warming_up && !self.stopped).then_some((4, 4))
    }

    fn capture_into(&mut self, frame: &mut Frame) -> Result<(), CaptureError> {
        if self.broken {
            return Err(CaptureError::FrameCapture("device lost".into()));
        }
        frame.luma_mut().fill(1);
        Ok(())
    }

    fn stop(&mut self) {
        if !self.stopped {
            self.stopped = true;
            self.ledger.active.fetch_sub(1, Ordering::SeqCst);
            self.ledger.log.lock().unwrap().push(format!("stop {}", self.id));
        }
    }
}

struct CountingDecoder {
    calls: AtomicUsize,
    hit_on: Option<usize>,
}

impl CountingDecoder {
    fn new(hit_on: Option<usize>) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            hit_on,
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl SymbolDecoder for CountingDecoder {
    fn decode(&self, _frame: &Frame) -> Option<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        (Some(n) == self.hit_on).then(|| "PAY:v1;code=scanned".to_string())
    }
}

fn controller(camera: ScriptedCamera, decoder: Arc<CountingDecoder>) -> CaptureController {
    CaptureController::new(Arc::new(camera), decoder)
}

#[tokio::test(start_paused = true)]
async fn detection_stores_token_and_releases_camera() {
    let ledger = Arc::new(StreamLedger::default());
    let decoder = CountingDecoder::new(Some(3));
    let ctl = controller(ScriptedCamera::new(ledger.clone()), decoder.clone());
    let mut rx = ctl.subscribe();

    assert_eq!(ctl.start_scan(None).await.unwrap(), StartOutcome::Started);
    assert_eq!(ctl.state(), CaptureState::Active);

    let snap = rx
        .wait_for(|s| s.detected.is_some())
        .await
        .unwrap()
        .clone();
    assert_eq!(snap.detected.as_deref(), Some("PAY:v1;code=scanned"));

    sleep(Duration::from_secs(2)).await;
    assert_eq!(ctl.state(), CaptureState::Idle);
    assert_eq!(decoder.calls(), 3);
    assert_eq!(ledger.active(), 0);
    assert_eq!(ledger.log(), vec!["acquire default", "stop default"]);
    assert_eq!(ctl.snapshot().detected.as_deref(), Some("PAY:v1;code=scanned"));
    assert!(!ctl.stop_scan());
}

#[tokio::test(start_paused = true)]
async fn second_start_while_running_acquires_nothing() {
    let ledger = Arc::new(StreamLedger::default());
    let mut camera = ScriptedCamera::new(ledger.clone());
    camera.acquire_delay = Duration::from_millis(50);
    let ctl = controller(camera, CountingDecoder::new(None));

    let (a, b) = tokio::join!(ctl.start_scan(None), ctl.start_scan(Some("cam-b")));
    let mut outcomes = vec![a.unwrap(), b.unwrap()];
    outcomes.sort_by_key(|o| *o == StartOutcome::Started);
    assert_eq!(outcomes, vec![StartOutcome::AlreadyRunning, StartOutcome::Started]);

    assert_eq!(
        ctl.start_scan(None).await.unwrap(),
        StartOutcome::AlreadyRunning
    );
    assert_eq!(ledger.acquisitions.load(Ordering::SeqCst), 1);
    assert_eq!(ledger.active(), 1);
    ctl.stop_scan();
    assert_eq!(ledger.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn restart_stops_old_feed_before_acquiring_new_one() {
    let ledger = Arc::new(StreamLedger::default());
    let ctl = controller(ScriptedCamera::new(ledger.clone()), CountingDecoder::new(None));

    ctl.start_scan(Some("cam-a")).await.unwrap();
    assert_eq!(
        ctl.restart_scan(Some("cam-b")).await.unwrap(),
        StartOutcome::Started
    );

    assert_eq!(ledger.log(), vec!["acquire cam-a", "stop cam-a", "acquire cam-b"]);
    assert_eq!(ledger.active(), 1);
    assert_eq!(ctl.snapshot().device_id.as_deref(), Some("cam-b"));
}

#[tokio::test(start_paused = true)]
async fn no_tick_fires_after_stop() {
    let ledger = Arc::new(StreamLedger::default());
    let decoder = CountingDecoder::new(None);
    let ctl = controller(ScriptedCamera::new(ledger.clone()), decoder.clone());

    ctl.start_scan(None).await.unwrap();
    sleep(Duration::from_millis(1010)).await;
    let sampled = decoder.calls();
    assert!(sampled >= 3, "expected a few ticks, got {sampled}");
    assert!(ctl.snapshot().last_sample_at.is_some());

    assert!(ctl.stop_scan());
    assert_eq!(ctl.state(), CaptureState::Idle);
    sleep(Duration::from_secs(5)).await;
    assert_eq!(decoder.calls(), sampled);

    assert!(!ctl.stop_scan());
    assert_eq!(ledger.active(), 0);
    assert_eq!(ledger.log(), vec!["acquire default", "stop default"]);
}

#[tokio::test(start_paused = true)]
async fn ticks_without_dimensions_are_skipped() {
    let ledger = Arc::new(StreamLedger::default());
    let decoder = CountingDecoder::new(None);
    let mut camera = ScriptedCamera::new(ledger.clone());
    camera.warming_up = true;
    let ctl = controller(camera, decoder.clone());

    ctl.start_scan(None).await.unwrap();
    sleep(Duration::from_millis(1010)).await;
    assert_eq!(decoder.calls(), 0);
    assert_eq!(ctl.state(), CaptureState::Active);
    assert!(ctl.snapshot().last_sample_at.is_none());
    ctl.stop_scan();
}

#[tokio::test(start_paused = true)]
async fn denied_camera_enters_error_until_acknowledged() {
    let ledger = Arc::new(StreamLedger::default());
    let camera = ScriptedCamera::new(ledger.clone());
    camera.deny.store(true, Ordering::SeqCst);
    let camera = Arc::new(camera);
    let ctl = CaptureController::new(camera.clone(), CountingDecoder::new(None));

    let err = ctl.start_scan(None).await.unwrap_err();
    assert!(matches!(err, CaptureError::CameraUnavailable(_)));
    assert_eq!(ctl.state(), CaptureState::Error);
    assert!(ctl.snapshot().error.is_some());

    assert!(!ctl.stop_scan());
    assert_eq!(ctl.state(), CaptureState::Error);

    ctl.acknowledge_error();
    assert_eq!(ctl.state(), CaptureState::Idle);

    camera.deny.store(false, Ordering::SeqCst);
    assert_eq!(ctl.start_scan(None).await.unwrap(), StartOutcome::Started);
    assert_eq!(ledger.active(), 1);
}

#[tokio::test(start_paused = true)]
async fn new_scan_clears_previous_error() {
    let ledger = Arc::new(StreamLedger::default());
    let camera = ScriptedCamera::new(ledger.clone());
    camera.deny.store(true, Ordering::SeqCst);
    let camera = Arc::new(camera);
    let ctl = CaptureController::new(camera.clone(), CountingDecoder::new(None));
    let rx = ctl.subscribe();

    ctl.start_scan(None).await.unwrap_err();
    assert_eq!(ctl.state(), CaptureState::Error);

    camera.deny.store(false, Ordering::SeqCst);
    assert_eq!(ctl.start_scan(None).await.unwrap(), StartOutcome::Started);
    let snap = rx.borrow().clone();
    assert_eq!(snap.state, CaptureState::Active);
    assert!(snap.error.is_none());
    assert_eq!(ledger.active(), 1);
    ctl.stop_scan();
}

#[tokio::test(start_paused = true)]
async fn decoding_runs_off_the_runtime_thread() {
    let ledger = Arc::new(StreamLedger::default());
    let threads: Arc<Mutex<Vec<ThreadId>>> = Arc::default();
    let seen = threads.clone();
    let decoder = Arc::new(move |_: &Frame| {
        seen.lock().unwrap().push(std::thread::current().id());
        Some("PAY:v1;code=scanned".to_string())
    });
    let ctl = CaptureController::new(Arc::new(ScriptedCamera::new(ledger.clone())), decoder);
    let mut rx = ctl.subscribe();

    ctl.start_scan(None).await.unwrap();
    rx.wait_for(|s| s.detected.is_some()).await.unwrap();

    let threads = threads.lock().unwrap().clone();
    assert_eq!(threads.len(), 1);
    assert_ne!(threads[0], std::thread::current().id());
    assert_eq!(ledger.active(), 0);
}

#[tokio::test(start_paused = true)]
async fn stop_during_acquisition_releases_late_feed() {
    let ledger = Arc::new(StreamLedger::default());
    let mut camera = ScriptedCamera::new(ledger.clone());
    camera.acquire_delay = Duration::from_millis(100);
    let ctl = controller(camera, CountingDecoder::new(None));

    let (outcome, _) = tokio::join!(ctl.start_scan(None), async {
        sleep(Duration::from_millis(10)).await;
        assert_eq!(ctl.state(), CaptureState::Requesting);
        ctl.stop_scan()
    });

    assert_eq!(outcome.unwrap(), StartOutcome::Cancelled);
    assert_eq!(ctl.state(), CaptureState::Idle);
    assert_eq!(ledger.active(), 0);
    assert_eq!(ledger.log(), vec!["acquire default", "stop default"]);
}

#[tokio::test(start_paused = true)]
async fn capture_failure_releases_and_reports() {
    let ledger = Arc::new(StreamLedger::default());
    let mut camera = ScriptedCamera::new(ledger.clone());
    camera.broken_capture = true;
    let decoder = CountingDecoder::new(None);
    let ctl = controller(camera, decoder.clone());

    ctl.start_scan(None).await.unwrap();
    sleep(Duration::from_millis(600)).await;

    assert_eq!(ctl.state(), CaptureState::Error);
    assert_eq!(ledger.active(), 0);
    assert_eq!(decoder.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn dropping_controller_releases_camera() {
    let ledger = Arc::new(StreamLedger::default());
    let decoder = CountingDecoder::new(None);
    let ctl = controller(ScriptedCamera::new(ledger.clone()), decoder.clone());

    ctl.start_scan(None).await.unwrap();
    sleep(Duration::from_millis(300)).await;
    drop(ctl);
    let sampled = decoder.calls();
    sleep(Duration::from_secs(2)).await;

    assert_eq!(ledger.active(), 0);
    assert_eq!(decoder.calls(), sampled);
}

#[tokio::test]
async fn still_image_path_leaves_camera_alone() {
    let ledger = Arc::new(StreamLedger::default());
    let ctl = controller(ScriptedCamera::new(ledger.clone()), CountingDecoder::new(Some(1)));

    let img = image::GrayImage::from_pixel(8, 8, image::Luma([200]));
    let mut png = std::io::Cursor::new(Vec::new());
    img.write_to(&mut png, image::ImageFormat::Png).unwrap();

    let token = ctl.decode_still_image(png.get_ref()).unwrap();
    assert_eq!(token.as_deref(), Some("PAY:v1;code=scanned"));
    assert_eq!(ctl.state(), CaptureState::Idle);
    assert_eq!(ledger.acquisitions.load(Ordering::SeqCst), 0);
    assert_eq!(ctl.list_cameras().await.unwrap().len(), 1);
}
