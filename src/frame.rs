//! Raw frame acquisition.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};

use crate::config::CameraConfig;
use crate::error::Error;

pub trait FrameSource {
    /// Next raw frame; `None` once a finite source is exhausted.
    fn next_frame(&mut self) -> Result<Option<Mat>, Error>;
}

#[inline]
fn is_empty(frame: &Mat) -> bool {
    frame.rows() == 0 || frame.cols() == 0
}

/// Recorded footage, read frame by frame at whatever pace the consumer sets.
pub struct VideoFileSource {
    capture: VideoCapture,
    frames: u64,
}

impl VideoFileSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        let capture = VideoCapture::from_file(&path.to_string_lossy(), videoio::CAP_ANY)?;

        if !capture.is_opened()? {
            return Err(Error::AcquisitionFailed(format!(
                "cannot open video file {}",
                path.display()
            )));
        }

        log::info!("reading frames from {}", path.display());

        Ok(Self { capture, frames: 0 })
    }
}

impl FrameSource for VideoFileSource {
    fn next_frame(&mut self) -> Result<Option<Mat>, Error> {
        let mut frame = Mat::default();

        if !self.capture.read(&mut frame)? || is_empty(&frame) {
            log::debug!("video ended after {} frames", self.frames);
            return Ok(None);
        }

        self.frames += 1;

        Ok(Some(frame))
    }
}

#[derive(Default)]
struct Slot {
    frame: Option<Mat>,
    produced: u64,
    failure: Option<String>,
}

/// Single-frame mailbox between the capture thread and the control loop.
#[derive(Default)]
struct LatestFrame {
    slot: Mutex<Slot>,
    ready: Condvar,
}

impl LatestFrame {
    fn lock(&self) -> Result<MutexGuard<'_, Slot>, Error> {
        self.slot
            .lock()
            .map_err(|_| Error::AcquisitionFailed("camera thread panicked".into()))
    }

    fn publish(&self, frame: Mat) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.frame = Some(frame);
            slot.produced += 1;
        }
        self.ready.notify_all();
    }

    fn fail(&self, reason: String) {
        if let Ok(mut slot) = self.slot.lock() {
            slot.failure = Some(reason);
        }
        self.ready.notify_all();
    }

    /// Blocks until the first frame arrives, the capture fails or `limit`
    /// runs out.
    fn wait_first(&self, limit: Duration) -> Result<(), Error> {
        let slot = self.lock()?;
        let (slot, _) = self
            .ready
            .wait_timeout_while(slot, limit, |s| s.failure.is_none() && s.produced == 0)
            .map_err(|_| Error::AcquisitionFailed("camera thread panicked".into()))?;

        if let Some(reason) = &slot.failure {
            return Err(Error::AcquisitionFailed(reason.clone()));
        }

        if slot.produced == 0 {
            return Err(Error::AcquisitionFailed(format!(
                "no camera frame within {:?}",
                limit
            )));
        }

        Ok(())
    }
}

/// Live camera read on a background thread.
///
/// The capture thread overwrites a single slot. `next_frame` never waits: it
/// hands out whatever frame is newest, repeating it if the camera has not
/// produced another one yet. Only a failure of the capture itself is fatal.
pub struct CameraSource {
    latest: Arc<LatestFrame>,
    running: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    stall_warning: Duration,
    consumed: u64,
    last_fresh: Instant,
    stalled: bool,
}

impl CameraSource {
    /// Opens the configured camera and waits for its first frame.
    pub fn start(config: &CameraConfig) -> Result<Self, Error> {
        let latest = Arc::new(LatestFrame::default());
        let running = Arc::new(AtomicBool::new(true));
        let (index, width, height) = (config.index, config.width, config.height);

        let thread = {
            let latest = latest.clone();
            let running = running.clone();

            thread::Builder::new()
                .name(format!("camera-{}", index))
                .spawn(move || capture_loop(index, width, height, &latest, &running))?
        };

        let source = Self::attach(latest, running, Some(thread), config);
        source
            .latest
            .wait_first(Duration::from_millis(config.warmup_ms))?;

        log::info!("camera {} streaming", index);

        Ok(source)
    }

    fn attach(
        latest: Arc<LatestFrame>,
        running: Arc<AtomicBool>,
        thread: Option<JoinHandle<()>>,
        config: &CameraConfig,
    ) -> Self {
        Self {
            latest,
            running,
            thread,
            stall_warning: Duration::from_millis(config.stall_warning_ms),
            consumed: 0,
            last_fresh: Instant::now(),
            stalled: false,
        }
    }
}

impl FrameSource for CameraSource {
    fn next_frame(&mut self) -> Result<Option<Mat>, Error> {
        let slot = self.latest.lock()?;

        if let Some(reason) = &slot.failure {
            return Err(Error::AcquisitionFailed(reason.clone()));
        }

        if slot.produced > self.consumed {
            let skipped = slot.produced - self.consumed - 1;
            if skipped > 0 {
                log::trace!("skipped {} stale camera frames", skipped);
            }

            if self.stalled {
                log::info!("camera frames flowing again");
            }

            self.consumed = slot.produced;
            self.last_fresh = Instant::now();
            self.stalled = false;
        } else if !self.stalled && self.last_fresh.elapsed() > self.stall_warning {
            log::warn!(
                "no new camera frame for {:?}, reusing the last one",
                self.stall_warning
            );
            self.stalled = true;
        }

        match &slot.frame {
            Some(frame) => Ok(Some(frame.try_clone()?)),
            None => Err(Error::AcquisitionFailed("camera produced no frame".into())),
        }
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Relaxed);

        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("camera thread panicked");
            }
        }
    }
}

fn open_camera(index: i32, width: u32, height: u32) -> Result<VideoCapture, Error> {
    let mut capture = VideoCapture::new(index, videoio::CAP_ANY)?;

    if !capture.is_opened()? {
        return Err(Error::AcquisitionFailed(format!("cannot open camera {}", index)));
    }

    capture.set(videoio::CAP_PROP_FRAME_WIDTH, width as f64)?;
    capture.set(videoio::CAP_PROP_FRAME_HEIGHT, height as f64)?;

    Ok(capture)
}

fn capture_loop(index: i32, width: u32, height: u32, latest: &LatestFrame, running: &AtomicBool) {
    let fail = |reason: String| {
        log::error!("camera {}: {}", index, reason);
        latest.fail(reason);
    };

    let mut capture = match open_camera(index, width, height) {
        Ok(c) => c,
        Err(err) => return fail(err.to_string()),
    };

    while running.load(Ordering::Relaxed) {
        let mut frame = Mat::default();

        match capture.read(&mut frame) {
            Ok(true) if !is_empty(&frame) => latest.publish(frame),
            Ok(_) => return fail("camera returned no frame".into()),
            Err(err) => return fail(err.to_string()),
        }
    }
}
