//! The capture loop: acquire → detect → select → classify → annotate →
//! display → persist, until the user quits or the camera stops delivering.
//!
//! Every collaborator sits behind a trait so the loop can be driven without
//! a camera, a model or a window.

use crate::analyzer::{AnalysisError, FaceAnalyzer};
use crate::overlay::Overlay;
use crate::snapshot::{SnapshotError, SnapshotSink};
use image::{GrayImage, RgbImage};
use moodcam_core::{
    select_primary_face, BoundingBox, CooldownLedger, Emotion, WatchSet, UNKNOWN_IDENTITY,
};
use moodcam_hw::{Camera, CameraError, Frame};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Prefix of snapshots taken with the `s` key.
pub const MANUAL_SNAPSHOT_PREFIX: &str = "manual";

/// Produces one frame per loop iteration.
pub trait FrameSource {
    fn next_frame(&mut self) -> Result<Frame, CameraError>;
}

impl FrameSource for Camera {
    fn next_frame(&mut self) -> Result<Frame, CameraError> {
        self.capture_frame()
    }
}

/// Keyboard commands understood by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Snapshot,
    ToggleAutoCapture,
    ToggleDebug,
}

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("window: {0}")]
    Window(String),
}

/// Shows annotated frames and reports key presses.
pub trait Display {
    fn show(&mut self, canvas: &RgbImage) -> Result<(), DisplayError>;
    /// Non-blocking; at most one command per call.
    fn poll_command(&mut self) -> Option<Command>;
}

/// Time source for the cooldown ledger.
pub trait Clock {
    fn now(&self) -> Instant;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// The two runtime toggles.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeFlags {
    pub auto_capture: bool,
    pub debug: bool,
}

impl Default for ModeFlags {
    fn default() -> Self {
        Self {
            auto_capture: true,
            debug: true,
        }
    }
}

fn on_off(flag: bool) -> &'static str {
    if flag { "ON" } else { "OFF" }
}

/// Tunables fixed for the lifetime of a session.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub min_face_size: f32,
    pub cooldown: Duration,
    pub watch: WatchSet,
    pub flags: ModeFlags,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            min_face_size: moodcam_core::DEFAULT_MIN_FACE_SIZE,
            cooldown: moodcam_core::DEFAULT_CAPTURE_COOLDOWN,
            watch: WatchSet::default(),
            flags: ModeFlags::default(),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The user pressed `q` or closed the window.
    Quit,
    /// The frame source failed.
    StreamEnded,
}

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("display error: {0}")]
    Display(#[from] DisplayError),
}

/// Loop state and collaborators. Dropping it releases the camera and the window.
pub struct Session<S, A, D, K, C = SystemClock> {
    source: S,
    analyzer: A,
    display: D,
    snapshots: K,
    overlay: Overlay,
    clock: C,
    ledger: CooldownLedger,
    watch: WatchSet,
    flags: ModeFlags,
    min_face_size: f32,
}

impl<S, A, D, K, C> Session<S, A, D, K, C>
where
    S: FrameSource,
    A: FaceAnalyzer,
    D: Display,
    K: SnapshotSink,
    C: Clock,
{
    pub fn new(
        source: S,
        analyzer: A,
        display: D,
        snapshots: K,
        overlay: Overlay,
        clock: C,
        options: SessionOptions,
    ) -> Self {
        Self {
            source,
            analyzer,
            display,
            snapshots,
            overlay,
            clock,
            ledger: CooldownLedger::new(options.cooldown),
            watch: options.watch,
            flags: options.flags,
            min_face_size: options.min_face_size,
        }
    }

    #[cfg(test)]
    pub fn flags(&self) -> ModeFlags {
        self.flags
    }

    /// Run until quit or end of stream.
    pub fn run(mut self) -> Result<Outcome, SessionError> {
        tracing::info!(
            auto_capture = on_off(self.flags.auto_capture),
            debug = on_off(self.flags.debug),
            cooldown_secs = self.ledger.cooldown().as_secs_f32(),
            watch = %self.watch,
            "starting emotion detection; press 'q' to quit, 's' to take a snapshot, 'c' to toggle auto-capture, 'd' to toggle debug"
        );
        loop {
            if let Some(outcome) = self.step()? {
                return Ok(outcome);
            }
        }
    }

    /// One loop iteration. Returns the outcome once the loop should stop.
    pub fn step(&mut self) -> Result<Option<Outcome>, SessionError> {
        let frame = match self.source.next_frame() {
            Ok(frame) => frame,
            Err(err) => {
                tracing::error!(error = %err, "failed to capture frame from camera");
                return Ok(Some(Outcome::StreamEnded));
            }
        };
        let now = self.clock.now();

        // `frame` stays clean for snapshots; all drawing goes to the canvas.
        let mut canvas = frame.to_rgb_image();
        let gray = GrayImage::from_raw(frame.width, frame.height, frame.to_grayscale())
            .unwrap_or_else(|| GrayImage::new(frame.width, frame.height));

        let faces = match self.analyzer.detect(&gray) {
            Ok(faces) => faces,
            Err(err) => {
                self.log_recoverable(&err, "face detection failed");
                Vec::new()
            }
        };

        let primary = select_primary_face(&faces, self.min_face_size).cloned();
        match &primary {
            Some(face) => self.process_face(&frame, &gray, face, now, &mut canvas),
            None if self.flags.debug && !faces.is_empty() => {
                tracing::info!(faces = faces.len(), "skipped faces that were too small; no suitable face found");
            }
            None => {}
        }

        self.overlay
            .status(&mut canvas, self.flags.auto_capture, &self.watch);
        self.display.show(&canvas)?;

        match self.display.poll_command() {
            Some(Command::Quit) => return Ok(Some(Outcome::Quit)),
            Some(Command::Snapshot) => self.manual_snapshot(&frame, primary.is_some()),
            Some(Command::ToggleAutoCapture) => {
                self.flags.auto_capture = !self.flags.auto_capture;
                tracing::info!("Auto-capture: {}", on_off(self.flags.auto_capture));
            }
            Some(Command::ToggleDebug) => {
                self.flags.debug = !self.flags.debug;
                tracing::info!("Debug mode: {}", on_off(self.flags.debug));
            }
            None => {}
        }

        Ok(None)
    }

    fn process_face(
        &mut self,
        frame: &Frame,
        gray: &GrayImage,
        face: &BoundingBox,
        now: Instant,
        canvas: &mut RgbImage,
    ) {
        self.overlay.face_box(canvas, face);

        let emotion = match self.analyzer.classify(gray, face) {
            Ok(prediction) => Some(prediction.dominant),
            Err(err) => {
                self.log_recoverable(&err, "emotion analysis failed");
                None
            }
        };

        if let Some(emotion) = emotion {
            self.overlay.emotion_label(canvas, face, emotion);
            if self.flags.debug {
                tracing::info!(%emotion, "detected emotion");
            }
        }

        if self.analyzer.identifies() {
            let identity = match self.analyzer.identify(gray, face) {
                Ok(result) => result.display_name().to_string(),
                Err(err) => {
                    self.log_recoverable(&err, "face recognition failed");
                    UNKNOWN_IDENTITY.to_string()
                }
            };
            self.overlay.identity_label(canvas, face, &identity);
        }

        if let Some(emotion) = emotion {
            self.auto_capture(frame, emotion, now, canvas);
        }
    }

    fn auto_capture(&mut self, frame: &Frame, emotion: Emotion, now: Instant, canvas: &mut RgbImage) {
        if !self.flags.auto_capture || !self.watch.contains(emotion) {
            return;
        }
        if !self.ledger.try_claim(emotion.as_str(), now) {
            return;
        }

        match self.snapshots.save(emotion.as_str(), &frame.to_rgb_image()) {
            Ok(path) => {
                self.overlay.capture_notice(canvas, emotion);
                tracing::info!(path = %path.display(), "auto-captured {emotion} emotion");
            }
            Err(err) => log_snapshot_error(&err),
        }
    }

    fn manual_snapshot(&mut self, frame: &Frame, has_face: bool) {
        if !has_face {
            tracing::info!("no face detected for snapshot");
            return;
        }
        match self.snapshots.save(MANUAL_SNAPSHOT_PREFIX, &frame.to_rgb_image()) {
            Ok(path) => tracing::info!(path = %path.display(), "manual snapshot saved"),
            Err(err) => log_snapshot_error(&err),
        }
    }

    fn log_recoverable(&self, err: &AnalysisError, what: &str) {
        if self.flags.debug {
            tracing::warn!(error = %err, "{what}");
        }
    }
}

fn log_snapshot_error(err: &SnapshotError) {
    tracing::error!(error = %err, "failed to save snapshot");
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use moodcam_core::{DetectorError, EmotionError, EmotionPrediction, MatchResult};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;
    use std::path::PathBuf;
    use std::rc::Rc;

    fn frame() -> Frame {
        Frame::from_rgb(vec![90; 160 * 120 * 3], 160, 120).unwrap()
    }

    struct DropCounter(Rc<Cell<usize>>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.set(self.0.get() + 1);
        }
    }

    /// Yields `frames` frames, then fails.
    struct FakeSource {
        frames: usize,
        calls: Rc<Cell<usize>>,
        _dropped: DropCounter,
    }

    impl FrameSource for FakeSource {
        fn next_frame(&mut self) -> Result<Frame, CameraError> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() > self.frames {
                return Err(CameraError::CaptureFailed("end of stream".into()));
            }
            Ok(frame())
        }
    }

    /// One scripted result per frame: detected boxes and the emotion outcome.
    type Script = (Vec<BoundingBox>, Result<Emotion, ()>);

    struct FakeAnalyzer {
        script: VecDeque<Script>,
        current: Option<Result<Emotion, ()>>,
        classify_calls: Rc<Cell<usize>>,
        identify: bool,
        /// Number of leading `detect` calls that fail.
        detect_failures: usize,
    }

    impl FaceAnalyzer for FakeAnalyzer {
        fn detect(&mut self, _gray: &GrayImage) -> Result<Vec<BoundingBox>, AnalysisError> {
            let (faces, emotion) = self.script.pop_front().unwrap_or((Vec::new(), Err(())));
            if self.detect_failures > 0 {
                self.detect_failures -= 1;
                self.current = None;
                return Err(AnalysisError::Detector(DetectorError::InferenceFailed("no output".into())));
            }
            self.current = Some(emotion);
            Ok(faces)
        }

        fn classify(&mut self, _gray: &GrayImage, _face: &BoundingBox) -> Result<EmotionPrediction, AnalysisError> {
            self.classify_calls.set(self.classify_calls.get() + 1);
            match self.current.take() {
                Some(Ok(dominant)) => Ok(EmotionPrediction {
                    dominant,
                    confidence: 0.9,
                    scores: vec![(dominant, 0.9)],
                }),
                _ => Err(AnalysisError::Emotion(EmotionError::EmptyCrop)),
            }
        }

        fn identifies(&self) -> bool {
            self.identify
        }

        fn identify(&mut self, _gray: &GrayImage, _face: &BoundingBox) -> Result<MatchResult, AnalysisError> {
            Err(AnalysisError::Emotion(EmotionError::EmptyCrop))
        }
    }

    struct FakeDisplay {
        commands: VecDeque<Option<Command>>,
        shown: Rc<Cell<usize>>,
        last_canvas: Rc<RefCell<Option<RgbImage>>>,
        broken: bool,
        _dropped: DropCounter,
    }

    impl Display for FakeDisplay {
        fn show(&mut self, canvas: &RgbImage) -> Result<(), DisplayError> {
            if self.broken {
                return Err(DisplayError::Window("window lost".into()));
            }
            self.shown.set(self.shown.get() + 1);
            *self.last_canvas.borrow_mut() = Some(canvas.clone());
            Ok(())
        }

        fn poll_command(&mut self) -> Option<Command> {
            self.commands.pop_front().flatten()
        }
    }

    #[derive(Clone, Default)]
    struct RecordingSink(Rc<RefCell<Vec<(String, RgbImage)>>>);

    impl SnapshotSink for RecordingSink {
        fn save(&mut self, prefix: &str, image: &RgbImage) -> Result<PathBuf, SnapshotError> {
            self.0.borrow_mut().push((prefix.to_string(), image.clone()));
            Ok(PathBuf::from(format!("{prefix}.jpg")))
        }
    }

    #[derive(Clone)]
    struct ManualClock(Rc<Cell<Instant>>);

    impl ManualClock {
        fn advance(&self, secs: f32) {
            self.0.set(self.0.get() + Duration::from_secs_f32(secs));
        }
    }

    impl Clock for ManualClock {
        fn now(&self) -> Instant {
            self.0.get()
        }
    }

    struct Harness {
        session: Session<FakeSource, FakeAnalyzer, FakeDisplay, RecordingSink, ManualClock>,
        saved: RecordingSink,
        clock: ManualClock,
        source_calls: Rc<Cell<usize>>,
        classify_calls: Rc<Cell<usize>>,
        shown: Rc<Cell<usize>>,
        last_canvas: Rc<RefCell<Option<RgbImage>>>,
        source_drops: Rc<Cell<usize>>,
        display_drops: Rc<Cell<usize>>,
    }

    fn harness(frames: usize, script: Vec<Script>, commands: Vec<Option<Command>>) -> Harness {
        let source_calls = Rc::new(Cell::new(0));
        let classify_calls = Rc::new(Cell::new(0));
        let shown = Rc::new(Cell::new(0));
        let last_canvas = Rc::new(RefCell::new(None));
        let source_drops = Rc::new(Cell::new(0));
        let display_drops = Rc::new(Cell::new(0));
        let saved = RecordingSink::default();
        let clock = ManualClock(Rc::new(Cell::new(Instant::now())));

        let session = Session::new(
            FakeSource {
                frames,
                calls: source_calls.clone(),
                _dropped: DropCounter(source_drops.clone()),
            },
            FakeAnalyzer {
                script: script.into(),
                current: None,
                classify_calls: classify_calls.clone(),
                identify: false,
                detect_failures: 0,
            },
            FakeDisplay {
                commands: commands.into(),
                shown: shown.clone(),
                last_canvas: last_canvas.clone(),
                broken: false,
                _dropped: DropCounter(display_drops.clone()),
            },
            saved.clone(),
            Overlay::without_text(),
            clock.clone(),
            SessionOptions::default(),
        );

        Harness {
            session,
            saved,
            clock,
            source_calls,
            classify_calls,
            shown,
            last_canvas,
            source_drops,
            display_drops,
        }
    }

    fn face(size: f32) -> BoundingBox {
        BoundingBox::new(10.0, 10.0, size, size)
    }

    fn saved(h: &Harness) -> Vec<String> {
        h.saved.0.borrow().iter().map(|(prefix, _)| prefix.clone()).collect()
    }

    #[test]
    fn test_stream_end_stops_once_and_releases_resources() {
        let h = harness(3, vec![], vec![]);
        let (calls, shown) = (h.source_calls.clone(), h.shown.clone());
        let (source_drops, display_drops) = (h.source_drops.clone(), h.display_drops.clone());

        let outcome = h.session.run().unwrap();
        assert_eq!(outcome, Outcome::StreamEnded);
        assert_eq!(calls.get(), 4);
        assert_eq!(shown.get(), 3);
        assert_eq!(source_drops.get(), 1);
        assert_eq!(display_drops.get(), 1);
    }

    #[test]
    fn test_quit_key_stops_loop() {
        let h = harness(10, vec![], vec![None, Some(Command::Quit)]);
        let calls = h.source_calls.clone();
        assert_eq!(h.session.run().unwrap(), Outcome::Quit);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_cooldown_throttles_same_emotion() {
        let script = vec![
            (vec![face(80.0)], Ok(Emotion::Happy)),
            (vec![face(80.0)], Ok(Emotion::Happy)),
            (vec![face(80.0)], Ok(Emotion::Happy)),
        ];
        let mut h = harness(3, script, vec![]);

        h.session.step().unwrap();
        h.clock.advance(1.0);
        h.session.step().unwrap();
        assert_eq!(saved(&h), vec!["happy"]);

        h.clock.advance(1.1);
        h.session.step().unwrap();
        assert_eq!(saved(&h), vec!["happy", "happy"]);
    }

    #[test]
    fn test_different_emotions_have_separate_cooldowns() {
        let script = vec![
            (vec![face(80.0)], Ok(Emotion::Happy)),
            (vec![face(80.0)], Ok(Emotion::Sad)),
        ];
        let mut h = harness(2, script, vec![]);
        h.session.step().unwrap();
        h.session.step().unwrap();
        assert_eq!(saved(&h), vec!["happy", "sad"]);
    }

    #[test]
    fn test_unwatched_emotion_is_not_captured() {
        let script = vec![(vec![face(80.0)], Ok(Emotion::Neutral))];
        let mut h = harness(1, script, vec![]);
        h.session.step().unwrap();
        assert!(saved(&h).is_empty());
    }

    #[test]
    fn test_manual_snapshot_requires_primary_face() {
        let script = vec![
            (vec![], Err(())),
            (vec![face(80.0)], Ok(Emotion::Neutral)),
        ];
        let mut h = harness(
            2,
            script,
            vec![Some(Command::Snapshot), Some(Command::Snapshot)],
        );
        h.session.step().unwrap();
        assert!(saved(&h).is_empty());
        h.session.step().unwrap();
        assert_eq!(saved(&h), vec![MANUAL_SNAPSHOT_PREFIX]);
    }

    #[test]
    fn test_small_faces_are_not_analysed() {
        let script = vec![(vec![face(20.0), face(25.0)], Ok(Emotion::Happy))];
        let mut h = harness(1, script, vec![Some(Command::Snapshot)]);
        h.session.step().unwrap();
        assert_eq!(h.classify_calls.get(), 0);
        assert!(saved(&h).is_empty());
    }

    #[test]
    fn test_toggles_flip_one_flag_each() {
        let mut h = harness(
            3,
            vec![],
            vec![Some(Command::ToggleAutoCapture), Some(Command::ToggleDebug), Some(Command::ToggleAutoCapture)],
        );
        let initial = h.session.flags();

        h.session.step().unwrap();
        assert_eq!(h.session.flags().auto_capture, !initial.auto_capture);
        assert_eq!(h.session.flags().debug, initial.debug);

        h.session.step().unwrap();
        assert_eq!(h.session.flags().auto_capture, !initial.auto_capture);
        assert_eq!(h.session.flags().debug, !initial.debug);

        h.session.step().unwrap();
        assert_eq!(h.session.flags().auto_capture, initial.auto_capture);
        assert_eq!(h.session.flags().debug, !initial.debug);
    }

    #[test]
    fn test_auto_capture_off_suppresses_captures() {
        let script = vec![
            (vec![face(80.0)], Ok(Emotion::Happy)),
            (vec![face(80.0)], Ok(Emotion::Surprise)),
        ];
        let mut h = harness(2, script, vec![Some(Command::ToggleAutoCapture)]);
        // Frame 1 is captured before the toggle is read.
        h.session.step().unwrap();
        h.session.step().unwrap();
        assert_eq!(saved(&h), vec!["happy"]);
    }

    #[test]
    fn test_classification_failure_does_not_stop_loop() {
        let script = vec![
            (vec![face(80.0)], Err(())),
            (vec![face(80.0)], Ok(Emotion::Angry)),
        ];
        let mut h = harness(2, script, vec![]);

        assert_eq!(h.session.step().unwrap(), None);
        assert!(saved(&h).is_empty());
        assert_eq!(h.session.step().unwrap(), None);
        assert_eq!(saved(&h), vec!["angry"]);
    }

    #[test]
    fn test_identity_failure_is_recoverable() {
        let script = vec![(vec![face(80.0)], Ok(Emotion::Fear))];
        let mut h = harness(1, script, vec![]);
        h.session.analyzer.identify = true;
        assert_eq!(h.session.step().unwrap(), None);
        assert_eq!(saved(&h), vec!["fear"]);
    }

    #[test]
    fn test_snapshots_are_taken_before_annotation() {
        let script = vec![(vec![face(80.0)], Ok(Emotion::Happy))];
        let mut h = harness(1, script, vec![Some(Command::Snapshot)]);
        h.session.step().unwrap();

        let shown = h.last_canvas.borrow().clone().unwrap();
        assert_eq!(*shown.get_pixel(10, 10), Rgb([0, 255, 0]));

        let snapshots = h.saved.0.borrow();
        let prefixes: Vec<&str> = snapshots.iter().map(|(p, _)| p.as_str()).collect();
        assert_eq!(prefixes, vec!["happy", MANUAL_SNAPSHOT_PREFIX]);
        for (_, image) in snapshots.iter() {
            assert_eq!(image.dimensions(), (160, 120));
            assert!(image.pixels().all(|p| *p == Rgb([90, 90, 90])));
        }
    }

    #[test]
    fn test_detector_failure_counts_as_no_faces() {
        let script = vec![
            (vec![face(80.0)], Ok(Emotion::Happy)),
            (vec![face(80.0)], Ok(Emotion::Happy)),
        ];
        let mut h = harness(2, script, vec![Some(Command::Snapshot)]);
        h.session.analyzer.detect_failures = 1;

        assert_eq!(h.session.step().unwrap(), None);
        assert_eq!(h.classify_calls.get(), 0);
        assert!(saved(&h).is_empty());
        assert_eq!(h.shown.get(), 1);

        assert_eq!(h.session.step().unwrap(), None);
        assert_eq!(saved(&h), vec!["happy"]);
    }

    #[test]
    fn test_display_error_is_fatal() {
        let mut h = harness(5, vec![], vec![]);
        h.session.display.broken = true;
        assert!(matches!(h.session.step(), Err(SessionError::Display(_))));

        let h = harness(5, vec![], vec![]);
        let (calls, display_drops) = (h.source_calls.clone(), h.display_drops.clone());
        let mut session = h.session;
        session.display.broken = true;
        assert!(matches!(session.run(), Err(SessionError::Display(_))));
        assert_eq!(calls.get(), 1);
        assert_eq!(display_drops.get(), 1);
    }
}
