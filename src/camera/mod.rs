//! Camera capture
//!
//! Cross-platform webcam capture via nokhwa. Frames are grabbed on a
//! background thread into a small ring of buffers; the render thread
//! reads whichever frame completed last. A capture failure that kills
//! the thread is recorded so the UI can surface it as fatal.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use nokhwa::pixel_format::RgbAFormat;
use nokhwa::utils::{CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution};
use nokhwa::Camera;
use parking_lot::Mutex;

/// One captured frame, RGBA, unmirrored
#[derive(Clone)]
pub struct CameraFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub frame_number: u64,
}

/// An enumerated camera
#[derive(Clone, Debug)]
pub struct CameraInfo {
    pub index: u32,
    pub name: String,
}

/// Background webcam capture
pub struct CameraCapture {
    frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
    latest_frame_idx: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
    /// Set once if the capture thread dies; fatal to the session
    failure: Arc<Mutex<Option<String>>>,
    frame_count: Arc<AtomicU64>,
}

impl CameraCapture {
    /// List available cameras
    pub fn list_cameras() -> Vec<CameraInfo> {
        match nokhwa::query(nokhwa::utils::ApiBackend::Auto) {
            Ok(camera_list) => camera_list
                .iter()
                .enumerate()
                .map(|(idx, info)| CameraInfo {
                    index: idx as u32,
                    name: info.human_name().to_string(),
                })
                .collect(),
            Err(e) => {
                log::warn!("Failed to enumerate cameras: {:?}", e);
                Vec::new()
            }
        }
    }

    /// Start capturing from `camera_index`, requesting a format close to
    /// `width` x `height` (the camera may pick something else).
    pub fn new(camera_index: u32, width: u32, height: u32) -> Result<Self, String> {
        let frames: [Arc<Mutex<Option<CameraFrame>>>; 3] = [
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
            Arc::new(Mutex::new(None)),
        ];
        let latest_frame_idx = Arc::new(AtomicU64::new(0));
        let running = Arc::new(AtomicBool::new(true));
        let failure = Arc::new(Mutex::new(None));
        let frame_count = Arc::new(AtomicU64::new(0));

        let frames_clone = frames.clone();
        let latest_frame_idx_clone = latest_frame_idx.clone();
        let running_clone = running.clone();
        let failure_clone = failure.clone();
        let frame_count_clone = frame_count.clone();

        let thread_handle = std::thread::Builder::new()
            .name("camera-capture".to_string())
            .spawn(move || {
                Self::capture_thread(
                    camera_index,
                    width,
                    height,
                    frames_clone,
                    latest_frame_idx_clone,
                    running_clone,
                    failure_clone,
                    frame_count_clone,
                );
            })
            .map_err(|e| format!("Failed to spawn capture thread: {}", e))?;

        Ok(Self {
            frames,
            latest_frame_idx,
            running,
            thread_handle: Some(thread_handle),
            failure,
            frame_count,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn capture_thread(
        camera_index: u32,
        width: u32,
        height: u32,
        frames: [Arc<Mutex<Option<CameraFrame>>>; 3],
        latest_frame_idx: Arc<AtomicU64>,
        running: Arc<AtomicBool>,
        failure: Arc<Mutex<Option<String>>>,
        frame_count: Arc<AtomicU64>,
    ) {
        log::info!("Starting camera capture thread (camera {})", camera_index);

        let index = CameraIndex::Index(camera_index);
        let requested = RequestedFormat::new::<RgbAFormat>(RequestedFormatType::Closest(
            CameraFormat::new_from(width, height, FrameFormat::MJPEG, 30),
        ));

        let mut camera = match Camera::new(index.clone(), requested) {
            Ok(c) => c,
            Err(e) => {
                log::warn!("Requested format refused ({:?}); retrying with defaults", e);
                let fallback = RequestedFormat::new::<RgbAFormat>(
                    RequestedFormatType::HighestResolution(Resolution::new(640, 480)),
                );
                match Camera::new(index, fallback) {
                    Ok(c) => c,
                    Err(e2) => {
                        let msg = format!("Could not open camera {}: {}", camera_index, e2);
                        log::error!("{}", msg);
                        *failure.lock() = Some(msg);
                        return;
                    }
                }
            }
        };

        if let Err(e) = camera.open_stream() {
            let msg = format!("Could not open camera stream: {}", e);
            log::error!("{}", msg);
            *failure.lock() = Some(msg);
            return;
        }

        log::info!(
            "Camera opened: {} ({}x{})",
            camera.info().human_name(),
            camera.resolution().width(),
            camera.resolution().height()
        );

        let mut write_idx: u64 = 0;

        while running.load(Ordering::Acquire) {
            match camera.frame() {
                Ok(frame) => match frame.decode_image::<RgbAFormat>() {
                    Ok(image) => {
                        let frame_num = frame_count.fetch_add(1, Ordering::Relaxed);
                        let camera_frame = CameraFrame {
                            data: image.into_raw(),
                            width: frame.resolution().width(),
                            height: frame.resolution().height(),
                            frame_number: frame_num,
                        };

                        let slot = (write_idx % 3) as usize;
                        *frames[slot].lock() = Some(camera_frame);
                        latest_frame_idx.store(write_idx, Ordering::Release);
                        write_idx = write_idx.wrapping_add(1);
                    }
                    Err(e) => {
                        log::warn!("Failed to decode frame: {:?}", e);
                    }
                },
                Err(e) => {
                    log::warn!("Failed to capture frame: {:?}", e);
                    std::thread::sleep(std::time::Duration::from_millis(10));
                }
            }
        }

        log::info!("Camera capture thread stopped");
    }

    /// Latest complete frame, if any has arrived yet
    pub fn latest_frame(&self) -> Option<CameraFrame> {
        let idx = self.latest_frame_idx.load(Ordering::Acquire);
        let slot = (idx % 3) as usize;
        self.frames[slot].lock().clone()
    }

    /// The error that killed the capture thread, if it died
    pub fn failure(&self) -> Option<String> {
        self.failure.lock().clone()
    }

    pub fn frame_count(&self) -> u64 {
        self.frame_count.load(Ordering::Relaxed)
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for CameraCapture {
    fn drop(&mut self) {
        self.stop();
    }
}
