//! Face landmark inference
//!
//! Runs ONNX Runtime on a dedicated worker thread. Detection is a
//! two-stage pipeline: an UltraFace-style box detector finds the most
//! confident face, then a 68-point regressor runs on the face crop and
//! the landmarks are mapped back into frame coordinates.
//!
//! Unlike a free-running inference loop, every submitted frame gets
//! exactly one reply on its own channel; the frame loop holds the
//! receiver and drops further ticks until the reply arrives.

use std::path::PathBuf;

use crossbeam_channel::{Receiver, Sender};
use ndarray::Array4;

use crate::face::{LandmarkSet, Point, LANDMARK_COUNT};

/// Box detector input size (UltraFace RFB-320)
const DET_WIDTH: u32 = 320;
const DET_HEIGHT: u32 = 240;
/// Landmark regressor input size
const LMK_SIZE: u32 = 112;
/// Minimum face confidence, matching the original detector options
const MIN_CONFIDENCE: f32 = 0.5;
/// The face crop is widened a little before landmark regression
const CROP_EXPAND: f32 = 1.2;

/// One frame's detection result: no face, one face's landmarks, or a
/// per-frame inference failure the caller logs and moves past
pub type DetectionOutcome = Result<Option<LandmarkSet>, String>;

/// RGBA frame data handed to the worker
pub struct DetectionFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

struct DetectionRequest {
    frame: DetectionFrame,
    reply: Sender<DetectionOutcome>,
}

/// Seam for the frame loop; lets tests stand in a scripted detector
pub trait DetectFaces {
    fn submit(&self, frame: DetectionFrame) -> Receiver<DetectionOutcome>;
}

/// Holds the ONNX Runtime sessions for the two pipeline stages
struct InferenceSessions {
    face_box: ort::session::Session,
    landmarks: ort::session::Session,
}

/// Worker-thread face landmark detector
pub struct FaceLandmarkDetector {
    request_sender: Option<Sender<DetectionRequest>>,
    thread_handle: Option<std::thread::JoinHandle<()>>,
}

impl FaceLandmarkDetector {
    /// Initialize ONNX Runtime, load both models and start the worker.
    ///
    /// Model load failure is fatal to the session; the caller surfaces
    /// the message and does not retry.
    pub fn new() -> Result<Self, String> {
        let model_dir = Self::find_model_dir()?;
        log::info!("Model directory: {:?}", model_dir);

        ort::init().with_name("MaskCam").commit();

        let face_box = Self::load_session(&model_dir.join("face_detector.onnx"))?;
        let landmarks = Self::load_session(&model_dir.join("face_landmarks_68.onnx"))?;
        let sessions = InferenceSessions {
            face_box,
            landmarks,
        };

        let (request_sender, request_receiver) =
            crossbeam_channel::bounded::<DetectionRequest>(1);

        let thread_handle = std::thread::Builder::new()
            .name("face-detector".to_string())
            .spawn(move || Self::detector_thread(sessions, request_receiver))
            .map_err(|e| format!("Failed to spawn detector thread: {}", e))?;

        Ok(Self {
            request_sender: Some(request_sender),
            thread_handle: Some(thread_handle),
        })
    }

    fn load_session(path: &PathBuf) -> Result<ort::session::Session, String> {
        if !path.exists() {
            return Err(format!("Model not found: {:?}", path));
        }
        let session = ort::session::Session::builder()
            .map_err(|e| format!("Failed to create session builder: {}", e))?
            .with_intra_threads(2)
            .map_err(|e| format!("Failed to set threads: {}", e))?
            .commit_from_file(path)
            .map_err(|e| format!("Failed to load model {:?}: {}", path, e))?;
        log::info!("Loaded model {:?}", path);
        Ok(session)
    }

    /// Find the models directory next to the executable or the cwd
    fn find_model_dir() -> Result<PathBuf, String> {
        if let Ok(exe_path) = std::env::current_exe() {
            let mut dir = exe_path.parent().map(|p| p.to_path_buf());
            while let Some(parent) = dir {
                let model_dir = parent.join("models");
                if model_dir.exists() {
                    return Ok(model_dir);
                }
                dir = parent.parent().map(|p| p.to_path_buf());
            }
        }

        let cwd = std::env::current_dir().map_err(|e| e.to_string())?;
        let model_dir = cwd.join("models");
        if model_dir.exists() {
            return Ok(model_dir);
        }

        Err("Models directory not found. Create a 'models' directory with \
             face_detector.onnx and face_landmarks_68.onnx."
            .to_string())
    }

    fn detector_thread(mut sessions: InferenceSessions, requests: Receiver<DetectionRequest>) {
        log::info!("Face detector thread started");

        while let Ok(request) = requests.recv() {
            let outcome = Self::detect(&mut sessions, &request.frame);
            // The session may have moved on; a dropped receiver is fine
            let _ = request.reply.send(outcome);
        }

        log::info!("Face detector thread stopped");
    }

    /// Run the two-stage pipeline on one frame
    fn detect(sessions: &mut InferenceSessions, frame: &DetectionFrame) -> DetectionOutcome {
        let Some(face) = Self::detect_face_box(&mut sessions.face_box, frame)? else {
            return Ok(None);
        };
        let points = Self::regress_landmarks(&mut sessions.landmarks, frame, face)?;
        Ok(LandmarkSet::from_points(&points))
    }

    /// Stage one: most confident face box, in frame pixel coordinates
    fn detect_face_box(
        session: &mut ort::session::Session,
        frame: &DetectionFrame,
    ) -> Result<Option<[f32; 4]>, String> {
        let input = preprocess_rgb_nchw(frame, DET_WIDTH, DET_HEIGHT, 127.0, 128.0);
        let input_array = Array4::from_shape_vec(
            (1, 3, DET_HEIGHT as usize, DET_WIDTH as usize),
            input,
        )
        .map_err(|e| format!("Failed to create detector input: {}", e))?;
        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| format!("Failed to create tensor: {}", e))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| format!("Face detection failed: {}", e))?;

        // UltraFace layout: scores [1, N, 2], boxes [1, N, 4] normalized
        let mut iter = outputs.iter();
        let scores_output = iter.next().ok_or("Detector produced no score output")?;
        let boxes_output = iter.next().ok_or("Detector produced no box output")?;
        let (_, scores) = scores_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract scores: {}", e))?;
        let (_, boxes) = boxes_output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract boxes: {}", e))?;

        let mut best: Option<(f32, usize)> = None;
        for i in 0..scores.len() / 2 {
            let confidence = scores[i * 2 + 1];
            if confidence >= MIN_CONFIDENCE
                && best.map(|(c, _)| confidence > c).unwrap_or(true)
            {
                best = Some((confidence, i));
            }
        }

        Ok(best.map(|(_, i)| {
            let fw = frame.width as f32;
            let fh = frame.height as f32;
            [
                boxes[i * 4] * fw,
                boxes[i * 4 + 1] * fh,
                boxes[i * 4 + 2] * fw,
                boxes[i * 4 + 3] * fh,
            ]
        }))
    }

    /// Stage two: 68 landmarks regressed on the face crop, mapped back
    /// into frame coordinates
    fn regress_landmarks(
        session: &mut ort::session::Session,
        frame: &DetectionFrame,
        face: [f32; 4],
    ) -> Result<Vec<Point>, String> {
        let crop = square_crop(face, frame.width, frame.height);
        let input = preprocess_crop_rgb_nchw(frame, crop, LMK_SIZE);
        let input_array = Array4::from_shape_vec(
            (1, 3, LMK_SIZE as usize, LMK_SIZE as usize),
            input,
        )
        .map_err(|e| format!("Failed to create landmark input: {}", e))?;
        let input_tensor = ort::value::Tensor::from_array(input_array)
            .map_err(|e| format!("Failed to create tensor: {}", e))?;

        let outputs = session
            .run(ort::inputs![input_tensor])
            .map_err(|e| format!("Landmark regression failed: {}", e))?;

        let output = outputs
            .iter()
            .next()
            .ok_or("Landmark model produced no output")?;
        let (_, data) = output
            .1
            .try_extract_tensor::<f32>()
            .map_err(|e| format!("Failed to extract landmarks: {}", e))?;

        if data.len() < LANDMARK_COUNT * 2 {
            return Err(format!(
                "Landmark model produced {} values, expected {}",
                data.len(),
                LANDMARK_COUNT * 2
            ));
        }

        // Landmarks come back normalized to the crop
        let [cx, cy, cw, ch] = crop;
        let points = (0..LANDMARK_COUNT)
            .map(|i| Point::new(cx + data[i * 2] * cw, cy + data[i * 2 + 1] * ch))
            .collect();
        Ok(points)
    }

    pub fn stop(&mut self) {
        self.request_sender = None;
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
        }
    }
}

impl DetectFaces for FaceLandmarkDetector {
    fn submit(&self, frame: DetectionFrame) -> Receiver<DetectionOutcome> {
        let (reply_sender, reply_receiver) = crossbeam_channel::bounded(1);
        match &self.request_sender {
            Some(sender) => {
                if sender
                    .send(DetectionRequest {
                        frame,
                        reply: reply_sender,
                    })
                    .is_err()
                {
                    log::warn!("Detector thread is gone; detection request dropped");
                }
            }
            None => {
                let _ = reply_sender.send(Err("Detector is stopped".to_string()));
            }
        }
        reply_receiver
    }
}

impl Drop for FaceLandmarkDetector {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Expand a face box into a square crop, clamped to the frame.
/// Returned as [x, y, w, h] in frame pixels.
fn square_crop(face: [f32; 4], frame_width: u32, frame_height: u32) -> [f32; 4] {
    let [x1, y1, x2, y2] = face;
    let cx = (x1 + x2) / 2.0;
    let cy = (y1 + y2) / 2.0;
    let side = (x2 - x1).max(y2 - y1).max(1.0) * CROP_EXPAND;

    let x = (cx - side / 2.0).max(0.0);
    let y = (cy - side / 2.0).max(0.0);
    let w = side.min(frame_width as f32 - x);
    let h = side.min(frame_height as f32 - y);
    [x, y, w, h]
}

/// Resize the whole frame to the model input, RGB planes, normalized
/// (value - mean) / scale, NCHW order
fn preprocess_rgb_nchw(
    frame: &DetectionFrame,
    target_width: u32,
    target_height: u32,
    mean: f32,
    scale: f32,
) -> Vec<f32> {
    let mut output = vec![0.0f32; (target_width * target_height * 3) as usize];
    let x_ratio = frame.width as f32 / target_width as f32;
    let y_ratio = frame.height as f32 / target_height as f32;
    let channel_stride = (target_width * target_height) as usize;

    for y in 0..target_height {
        for x in 0..target_width {
            let src_x = ((x as f32 * x_ratio) as u32).min(frame.width - 1);
            let src_y = ((y as f32 * y_ratio) as u32).min(frame.height - 1);
            let src_idx = ((src_y * frame.width + src_x) * 4) as usize;
            if src_idx + 2 < frame.data.len() {
                let pixel_idx = (y * target_width + x) as usize;
                for c in 0..3 {
                    output[c * channel_stride + pixel_idx] =
                        (frame.data[src_idx + c] as f32 - mean) / scale;
                }
            }
        }
    }

    output
}

/// Resize a crop of the frame to size x size, RGB [0,1], NCHW order
fn preprocess_crop_rgb_nchw(frame: &DetectionFrame, crop: [f32; 4], size: u32) -> Vec<f32> {
    let [cx, cy, cw, ch] = crop;
    let mut output = vec![0.0f32; (size * size * 3) as usize];
    let channel_stride = (size * size) as usize;

    for y in 0..size {
        for x in 0..size {
            let src_x = ((cx + (x as f32 + 0.5) / size as f32 * cw) as u32)
                .min(frame.width.saturating_sub(1));
            let src_y = ((cy + (y as f32 + 0.5) / size as f32 * ch) as u32)
                .min(frame.height.saturating_sub(1));
            let src_idx = ((src_y * frame.width + src_x) * 4) as usize;
            if src_idx + 2 < frame.data.len() {
                let pixel_idx = (y * size + x) as usize;
                for c in 0..3 {
                    output[c * channel_stride + pixel_idx] =
                        frame.data[src_idx + c] as f32 / 255.0;
                }
            }
        }
    }

    output
}
