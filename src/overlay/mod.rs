//! Overlay compositor
//!
//! Owns the per-frame state machine that ties mask selection, mask
//! loading, face detection and canvas compositing together. Exactly one
//! detection is in flight at a time; redraw ticks that arrive while a
//! detection is outstanding are dropped, not queued.

pub mod canvas;
pub mod placement;

pub use canvas::Canvas;
pub use placement::{place_mask, PlacementParams, PlacementRect};

use crossbeam_channel::{Receiver, TryRecvError};
use rand::Rng;

use crate::face::detector::{DetectFaces, DetectionFrame, DetectionOutcome};
use crate::mask::loader::LoadMasks;
use crate::mask::{MaskCatalog, MaskEntry, MaskImage};

/// Where the frame loop currently is
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    /// Waiting for a tick with a decodable frame
    Idle,
    /// A detection (and possibly a mask load) is outstanding
    DetectingAndLoading,
    /// Applying a finished detection to the canvas
    Compositing,
}

/// One user's overlay session: active mask, in-flight work and the
/// canvas the composite lands in
pub struct OverlaySession<D, L> {
    catalog: MaskCatalog,
    detector: D,
    loader: L,
    params: PlacementParams,
    canvas: Canvas,
    state: LoopState,
    current_index: Option<usize>,
    active_image: Option<MaskImage>,
    pending_load: Option<Receiver<Option<MaskImage>>>,
    /// Outstanding detection reply plus the submitted frame's size
    pending_detection: Option<(Receiver<DetectionOutcome>, u32, u32)>,
}

impl<D: DetectFaces, L: LoadMasks> OverlaySession<D, L> {
    pub fn new(catalog: MaskCatalog, detector: D, loader: L, params: PlacementParams) -> Self {
        Self {
            catalog,
            detector,
            loader,
            params,
            canvas: Canvas::new(1, 1),
            state: LoopState::Idle,
            current_index: None,
            active_image: None,
            pending_load: None,
            pending_detection: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    pub fn canvas(&self) -> &Canvas {
        &self.canvas
    }

    pub fn current_entry(&self) -> Option<&MaskEntry> {
        self.current_index.and_then(|i| self.catalog.get(i))
    }

    /// True while a switched-to mask has not finished loading
    pub fn is_loading_mask(&self) -> bool {
        self.pending_load.is_some()
    }

    /// True when a mask is selected and its image is ready to draw
    pub fn has_mask_image(&self) -> bool {
        self.active_image.is_some()
    }

    /// Switch to a new random mask (user click)
    pub fn switch_mask(&mut self) {
        self.switch_mask_with(&mut rand::rng());
    }

    /// Switch with a caller-supplied RNG
    pub fn switch_mask_with<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        let Some(next) = self.catalog.select_next(self.current_index, rng) else {
            log::warn!("Mask catalog is empty; nothing to switch to");
            self.current_index = None;
            self.active_image = None;
            return;
        };
        self.current_index = Some(next);
        // Cleared until the load resolves; a brief no-overlay gap is fine
        self.active_image = None;
        if let Some(entry) = self.catalog.get(next) {
            log::info!("Switching mask to {:?}", entry.path);
            self.pending_load = Some(self.loader.request(entry.path.clone()));
        }
    }

    /// One display tick. Returns true when the canvas was redrawn and
    /// should be re-uploaded.
    ///
    /// `frame` is the latest camera frame, or None while the video has
    /// no decodable frame yet.
    pub fn tick(&mut self, frame: Option<DetectionFrame>) -> bool {
        // Re-entrancy guard: one detection outstanding at a time
        if let Some((reply, width, height)) = self.pending_detection.take() {
            return match reply.try_recv() {
                Ok(outcome) => {
                    self.state = LoopState::Compositing;
                    let redrawn = self.finish_frame(outcome, width, height);
                    self.state = LoopState::Idle;
                    redrawn
                }
                Err(TryRecvError::Empty) => {
                    // Still detecting; this tick is dropped
                    self.pending_detection = Some((reply, width, height));
                    false
                }
                Err(TryRecvError::Disconnected) => {
                    log::warn!("Detector reply channel closed; skipping frame");
                    self.state = LoopState::Idle;
                    false
                }
            };
        }

        let Some(frame) = frame else {
            self.state = LoopState::Idle;
            return false;
        };
        if frame.width == 0 || frame.height == 0 || frame.data.is_empty() {
            self.state = LoopState::Idle;
            return false;
        }

        // A pending mask load is awaited before detection; swaps and
        // detection are serialized, never pipelined
        if let Some(reply) = self.pending_load.take() {
            match reply.recv() {
                Ok(image) => self.active_image = image,
                Err(_) => {
                    log::warn!("Mask load reply channel closed; treating load as failed");
                    self.active_image = None;
                }
            }
        }

        let (width, height) = (frame.width, frame.height);
        let reply = self.detector.submit(frame);
        self.pending_detection = Some((reply, width, height));
        self.state = LoopState::DetectingAndLoading;
        false
    }

    /// Apply a finished detection: size and clear the canvas, then
    /// composite if a face was found and a mask image is loaded
    fn finish_frame(&mut self, outcome: DetectionOutcome, width: u32, height: u32) -> bool {
        self.canvas.resize(width, height);
        self.canvas.clear();

        match outcome {
            Ok(Some(landmarks)) => {
                let entry = self.current_index.and_then(|i| self.catalog.get(i));
                if let (Some(entry), Some(image)) = (entry, self.active_image.as_ref()) {
                    if let Some(rect) = place_mask(
                        &landmarks,
                        entry.category,
                        image.width,
                        image.height,
                        &self.params,
                    ) {
                        // Landmarks are unmirrored; the preview is not
                        let rect = rect.mirrored(self.canvas.width() as f32);
                        self.canvas.draw_image(image, rect);
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                // A bad frame never halts the loop
                log::warn!("Detection failed: {}", e);
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::{LandmarkSet, Point, LANDMARK_COUNT};
    use crate::mask::{MaskCategory, MaskEntry};
    use crossbeam_channel::Sender;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    /// Detector fed a script of reply receivers; counts submissions
    struct ScriptedDetector {
        replies: RefCell<VecDeque<Receiver<DetectionOutcome>>>,
        submissions: RefCell<usize>,
    }

    impl ScriptedDetector {
        fn new(replies: Vec<Receiver<DetectionOutcome>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
                submissions: RefCell::new(0),
            }
        }
    }

    impl DetectFaces for ScriptedDetector {
        fn submit(&self, _frame: DetectionFrame) -> Receiver<DetectionOutcome> {
            *self.submissions.borrow_mut() += 1;
            self.replies
                .borrow_mut()
                .pop_front()
                .expect("detector script exhausted")
        }
    }

    /// Loader whose replies resolve immediately with scripted images
    struct ScriptedLoader {
        replies: RefCell<VecDeque<Option<MaskImage>>>,
    }

    impl ScriptedLoader {
        fn new(replies: Vec<Option<MaskImage>>) -> Self {
            Self {
                replies: RefCell::new(replies.into()),
            }
        }
    }

    impl LoadMasks for ScriptedLoader {
        fn request(&self, _path: PathBuf) -> Receiver<Option<MaskImage>> {
            let (sender, receiver) = crossbeam_channel::bounded(1);
            let reply = self.replies.borrow_mut().pop_front().unwrap_or(None);
            sender.send(reply).unwrap();
            receiver
        }
    }

    fn ready(outcome: DetectionOutcome) -> Receiver<DetectionOutcome> {
        let (sender, receiver) = crossbeam_channel::bounded(1);
        sender.send(outcome).unwrap();
        receiver
    }

    fn pending() -> (Sender<DetectionOutcome>, Receiver<DetectionOutcome>) {
        crossbeam_channel::bounded(1)
    }

    fn face() -> LandmarkSet {
        let mut points = vec![Point::new(300.0, 300.0); LANDMARK_COUNT];
        for i in 17..27 {
            points[i] = Point::new(200.0 + (i - 17) as f32 * 20.0, 200.0);
        }
        for i in [37, 38, 43, 44] {
            points[i] = Point::new(300.0, 240.0);
        }
        LandmarkSet::from_points(&points).unwrap()
    }

    fn frame() -> DetectionFrame {
        DetectionFrame {
            data: vec![0u8; 640 * 480 * 4],
            width: 640,
            height: 480,
        }
    }

    fn white_mask() -> MaskImage {
        MaskImage {
            pixels: vec![255u8; 8 * 4 * 4],
            width: 8,
            height: 4,
        }
    }

    fn one_mask_catalog() -> MaskCatalog {
        MaskCatalog::from_entries(vec![MaskEntry {
            path: PathBuf::from("glasses1.png"),
            category: MaskCategory::Glasses,
        }])
    }

    fn canvas_is_blank(canvas: &Canvas) -> bool {
        canvas.pixels().iter().all(|&b| b == 0)
    }

    #[test]
    fn load_failure_skips_drawing_until_next_successful_switch() {
        let detector = ScriptedDetector::new(vec![
            ready(Ok(Some(face()))),
            ready(Ok(Some(face()))),
        ]);
        let loader = ScriptedLoader::new(vec![None, Some(white_mask())]);
        let mut session = OverlaySession::new(
            one_mask_catalog(),
            detector,
            loader,
            PlacementParams::default(),
        );
        let mut rng = StdRng::seed_from_u64(1);

        // First switch: the asset fails to decode
        session.switch_mask_with(&mut rng);
        assert!(!session.tick(Some(frame()))); // submits detection
        assert!(session.tick(None)); // consumes the result
        assert!(canvas_is_blank(session.canvas()));
        assert!(!session.has_mask_image());

        // Next switch succeeds and the mask is drawn
        session.switch_mask_with(&mut rng);
        assert!(!session.tick(Some(frame())));
        assert!(session.tick(None));
        assert!(!canvas_is_blank(session.canvas()));
    }

    #[test]
    fn detection_error_is_logged_and_the_loop_continues() {
        let detector = ScriptedDetector::new(vec![
            ready(Err("inference exploded".to_string())),
            ready(Ok(Some(face()))),
        ]);
        let loader = ScriptedLoader::new(vec![Some(white_mask())]);
        let mut session = OverlaySession::new(
            one_mask_catalog(),
            detector,
            loader,
            PlacementParams::default(),
        );
        session.switch_mask_with(&mut StdRng::seed_from_u64(1));

        assert!(!session.tick(Some(frame())));
        assert!(session.tick(None)); // error consumed, canvas blank
        assert!(canvas_is_blank(session.canvas()));

        // The next tick submits again as if nothing happened
        assert!(!session.tick(Some(frame())));
        assert!(session.tick(None));
        assert!(!canvas_is_blank(session.canvas()));
    }

    #[test]
    fn ticks_are_dropped_while_a_detection_is_outstanding() {
        let (sender, receiver) = pending();
        let detector = ScriptedDetector::new(vec![receiver]);
        let loader = ScriptedLoader::new(vec![Some(white_mask())]);
        let mut session = OverlaySession::new(
            one_mask_catalog(),
            detector,
            loader,
            PlacementParams::default(),
        );
        session.switch_mask_with(&mut StdRng::seed_from_u64(1));

        assert!(!session.tick(Some(frame())));
        assert_eq!(session.state(), LoopState::DetectingAndLoading);

        // These ticks arrive mid-detection and are dropped
        assert!(!session.tick(Some(frame())));
        assert!(!session.tick(Some(frame())));
        assert_eq!(session.state(), LoopState::DetectingAndLoading);

        sender.send(Ok(Some(face()))).unwrap();
        assert!(session.tick(None));
        assert_eq!(session.state(), LoopState::Idle);
    }

    #[test]
    fn empty_catalog_composites_nothing() {
        let detector = ScriptedDetector::new(vec![ready(Ok(Some(face())))]);
        let loader = ScriptedLoader::new(vec![]);
        let mut session = OverlaySession::new(
            MaskCatalog::from_entries(vec![]),
            detector,
            loader,
            PlacementParams::default(),
        );
        session.switch_mask_with(&mut StdRng::seed_from_u64(1));
        assert!(session.current_entry().is_none());

        assert!(!session.tick(Some(frame())));
        assert!(session.tick(None));
        assert!(canvas_is_blank(session.canvas()));
    }

    #[test]
    fn no_face_leaves_the_canvas_blank() {
        let detector = ScriptedDetector::new(vec![ready(Ok(None))]);
        let loader = ScriptedLoader::new(vec![Some(white_mask())]);
        let mut session = OverlaySession::new(
            one_mask_catalog(),
            detector,
            loader,
            PlacementParams::default(),
        );
        session.switch_mask_with(&mut StdRng::seed_from_u64(1));

        assert!(!session.tick(Some(frame())));
        assert!(session.tick(None));
        assert!(canvas_is_blank(session.canvas()));
        // The mask image itself stays loaded for later frames
        assert!(session.has_mask_image());
    }

    #[test]
    fn a_tick_without_a_frame_submits_nothing() {
        let detector = ScriptedDetector::new(vec![]);
        let loader = ScriptedLoader::new(vec![]);
        let mut session = OverlaySession::new(
            one_mask_catalog(),
            detector,
            loader,
            PlacementParams::default(),
        );
        assert!(!session.tick(None));
        assert_eq!(session.state(), LoopState::Idle);
        assert_eq!(*session.detector.submissions.borrow(), 0);
    }

    #[test]
    fn canvas_follows_the_frame_size() {
        let detector = ScriptedDetector::new(vec![ready(Ok(None)), ready(Ok(None))]);
        let loader = ScriptedLoader::new(vec![]);
        let mut session = OverlaySession::new(
            one_mask_catalog(),
            detector,
            loader,
            PlacementParams::default(),
        );

        assert!(!session.tick(Some(frame())));
        assert!(session.tick(None));
        assert_eq!(session.canvas().width(), 640);
        assert_eq!(session.canvas().height(), 480);

        let small = DetectionFrame {
            data: vec![0u8; 320 * 240 * 4],
            width: 320,
            height: 240,
        };
        assert!(!session.tick(Some(small)));
        assert!(session.tick(None));
        assert_eq!(session.canvas().width(), 320);
        assert_eq!(session.canvas().height(), 240);
    }
}
