//! Host-facing guidance session.
//!
//! Owns one estimator, the face snapshot, the rule catalog and the capture
//! machine. The host feeds sensor samples and face observations as they
//! arrive and calls [`GuidanceSession::tick`] on its own clock; every tick
//! re-evaluates the current step and publishes a [`GuidanceSnapshot`].

use crate::capture::{CaptureConfig, CaptureError, CaptureEvent, CaptureStateMachine};
use crate::evaluator::{evaluate, RuleCheckResult};
use crate::geometry::{
    classify_pose, face_direction, mirrored_yaw, pose_confidence, FaceDirection, FaceGeometry,
    FaceGeometryEvaluator, GeometryConfig, PoseClass,
};
use crate::orientation::{EstimatorConfig, OrientationEstimator};
use crate::rules::{CaptureRule, RuleCatalog, RuleCatalogError};
use crate::snapshot::{snapshot, SnapshotPublisher, SnapshotReader};
use crate::types::{CameraFacing, DeviceAngle, FaceObservation, Size};
use crate::voice::{AnnounceContext, HintAnnouncer};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error(transparent)]
    Catalog(#[from] RuleCatalogError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error("calibration parse error: {0}")]
    Config(#[from] toml::de::Error),
    #[error("failed to read calibration {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Calibration constants for every component of a session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuidanceConfig {
    pub estimator: EstimatorConfig,
    pub geometry: GeometryConfig,
    pub capture: CaptureConfig,
}

impl GuidanceConfig {
    pub fn from_toml_str(src: &str) -> Result<Self, SessionError> {
        Ok(toml::from_str(src)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| SessionError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&src)
    }
}

/// Event stream handed back to the host.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum GuidanceEvent {
    Capture(CaptureEvent),
    Speak(SpeakHint),
}

/// A hint the host should pass to its speech engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename = "speak_hint")]
pub struct SpeakHint {
    pub step: String,
    pub hint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepStatus {
    pub step: String,
    pub name: String,
    pub photo_taken: bool,
    /// Face yaw (as the user sees it) when the photo was triggered.
    pub captured_yaw: Option<f32>,
    pub pose: Option<PoseClass>,
    pub pose_confidence: Option<f32>,
}

/// Everything the presentation layer needs for one frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GuidanceSnapshot {
    pub device_angle: DeviceAngle,
    pub rule_check_result: RuleCheckResult,
    pub countdown_remaining: Option<u32>,
    pub is_camera_facing_front: bool,
    pub step_id: String,
    pub step_name: String,
    pub step_index: usize,
    pub step_count: usize,
    pub steps: Vec<StepStatus>,
    pub camera_ready: bool,
    pub is_capturing: bool,
    pub is_paused: bool,
    pub is_complete: bool,
    pub face: FaceGeometry,
    pub face_direction: Option<FaceDirection>,
    pub spoken_hint: Option<String>,
}

/// Latest vision input together with the frame it was measured in.
#[derive(Debug, Clone, Default, PartialEq)]
struct FaceFrame {
    observation: FaceObservation,
    frame: Size,
}

struct Assessment {
    result: RuleCheckResult,
    geometry: FaceGeometry,
    face: Arc<FaceFrame>,
}

/// One capture flow: sensors and face input in, guidance snapshots and events out.
pub struct GuidanceSession {
    catalog: RuleCatalog,
    estimator: OrientationEstimator,
    geometry: FaceGeometryEvaluator,
    face_tx: SnapshotPublisher<FaceFrame>,
    face_rx: SnapshotReader<FaceFrame>,
    viewport: Size,
    camera_ready: bool,
    capture: CaptureStateMachine,
    announcer: HintAnnouncer,
    last_spoken: Option<String>,
    pending_yaw: Option<f32>,
    captured_yaw: Vec<Option<f32>>,
    snapshot_tx: SnapshotPublisher<GuidanceSnapshot>,
}

impl GuidanceSession {
    pub fn new(catalog: RuleCatalog, config: GuidanceConfig) -> Self {
        let mut estimator = OrientationEstimator::new(config.estimator);
        estimator.start();
        let steps: Vec<String> = catalog.step_ids().map(str::to_string).collect();
        let captured_yaw = vec![None; steps.len()];
        let capture = CaptureStateMachine::new(steps, &config.capture);
        let (face_tx, face_rx) = snapshot(FaceFrame::default());

        let session = Self {
            catalog,
            estimator,
            geometry: FaceGeometryEvaluator::new(config.geometry),
            face_tx,
            face_rx,
            viewport: Size::default(),
            camera_ready: false,
            capture,
            announcer: HintAnnouncer::new(),
            last_spoken: None,
            pending_yaw: None,
            captured_yaw,
            snapshot_tx: snapshot(GuidanceSnapshot::default()).0,
        };
        session.publish();
        session
    }

    pub fn with_builtin_rules(config: GuidanceConfig) -> Result<Self, SessionError> {
        Ok(Self::new(RuleCatalog::builtin()?, config))
    }

    pub fn feed_accelerometer(&mut self, x: f32, y: f32, z: f32, timestamp_ms: u64) {
        self.estimator.ingest_accelerometer(x, y, z, timestamp_ms);
    }

    pub fn feed_gyroscope(&mut self, x: f32, y: f32, z: f32, timestamp_ms: u64) {
        self.estimator.ingest_gyroscope(x, y, z, timestamp_ms);
    }

    /// `None` means the detector found no face in this frame.
    pub fn feed_face_observation(
        &mut self,
        observation: Option<FaceObservation>,
        frame_width: f32,
        frame_height: f32,
    ) {
        self.face_tx.publish(FaceFrame {
            observation: observation.unwrap_or_else(FaceObservation::absent),
            frame: Size::new(frame_width, frame_height),
        });
    }

    pub fn set_viewport_size(&mut self, width: f32, height: f32) {
        tracing::debug!(width, height, "viewport resized");
        self.viewport = Size::new(width, height);
    }

    pub fn set_camera_ready(&mut self, ready: bool) {
        if self.camera_ready != ready {
            tracing::info!(ready, "camera readiness changed");
        }
        self.camera_ready = ready;
    }

    /// Re-evaluate the current step and advance the countdown clock.
    pub fn tick(&mut self, now: Instant) -> Vec<GuidanceEvent> {
        let assessment = self.assess();
        let index = self.capture.current_index();
        let countdown = self.current_rule().countdown_duration;

        let capture_events = self.capture.update(
            assessment.result.all_rules_met,
            self.camera_ready,
            countdown,
            now,
        );

        let mut events = Vec::new();
        if let Some(hint) = self.announcer.offer(AnnounceContext {
            hint: &assessment.result.current_hint,
            all_rules_met: assessment.result.all_rules_met,
            camera_ready: self.camera_ready,
            step_has_photo: self.capture.has_photo(index),
        }) {
            self.last_spoken = Some(hint.clone());
            events.push(GuidanceEvent::Speak(SpeakHint {
                step: self.catalog.rules()[index].id.clone(),
                hint,
            }));
        }

        for event in &capture_events {
            if let CaptureEvent::CaptureRequested { .. } = event {
                self.pending_yaw = self.face_yaw(&assessment.face);
            }
        }
        self.absorb(capture_events, &mut events);
        self.publish();
        events
    }

    /// Manually trigger the current step, skipping the countdown.
    pub fn trigger_capture(&mut self) -> Result<Vec<GuidanceEvent>, SessionError> {
        let event = self.capture.trigger_capture()?;
        let face = self.face_rx.load();
        self.pending_yaw = self.face_yaw(&face);
        let mut events = Vec::new();
        self.absorb(vec![event], &mut events);
        self.publish();
        Ok(events)
    }

    pub fn report_capture_result(
        &mut self,
        step: &str,
        ok: bool,
        error: Option<String>,
    ) -> Result<Vec<GuidanceEvent>, SessionError> {
        let index = self.capture.current_index();
        let capture_events = self.capture.report_capture_result(step, ok, error)?;
        let yaw = self.pending_yaw.take();
        if ok {
            self.captured_yaw[index] = yaw;
        }
        let mut events = Vec::new();
        self.absorb(capture_events, &mut events);
        self.publish();
        Ok(events)
    }

    pub fn advance_to_step(&mut self, index: usize) -> Result<Vec<GuidanceEvent>, SessionError> {
        let capture_events = self.capture.advance_to_step(index)?;
        self.pending_yaw = None;
        let mut events = Vec::new();
        self.absorb(capture_events, &mut events);
        self.publish();
        Ok(events)
    }

    pub fn delete_photo(&mut self, index: usize) -> Result<Vec<GuidanceEvent>, SessionError> {
        let capture_events = self.capture.delete_photo(index)?;
        self.captured_yaw[index] = None;
        self.pending_yaw = None;
        let mut events = Vec::new();
        self.absorb(capture_events, &mut events);
        self.publish();
        Ok(events)
    }

    pub fn pause(&mut self) -> Vec<GuidanceEvent> {
        let events = self
            .capture
            .pause()
            .map(GuidanceEvent::Capture)
            .into_iter()
            .collect();
        self.publish();
        events
    }

    pub fn resume(&mut self) {
        self.capture.resume();
        self.publish();
    }

    pub fn reset(&mut self) -> Vec<GuidanceEvent> {
        let event = self.capture.reset();
        self.captured_yaw.iter_mut().for_each(|y| *y = None);
        self.pending_yaw = None;
        self.announcer.reset();
        self.last_spoken = None;
        self.publish();
        vec![GuidanceEvent::Capture(event)]
    }

    /// Fresh view of the session. Does not touch any state.
    pub fn snapshot(&self) -> GuidanceSnapshot {
        let assessment = self.assess();
        let rule = self.current_rule();
        let steps = self
            .catalog
            .rules()
            .iter()
            .enumerate()
            .map(|(i, r)| {
                let yaw = self.captured_yaw[i];
                StepStatus {
                    step: r.id.clone(),
                    name: r.name.clone(),
                    photo_taken: self.capture.has_photo(i),
                    captured_yaw: yaw,
                    pose: yaw.map(classify_pose),
                    pose_confidence: yaw.map(pose_confidence),
                }
            })
            .collect();

        GuidanceSnapshot {
            device_angle: self.estimator.current_angle(),
            rule_check_result: assessment.result,
            countdown_remaining: self.capture.countdown_remaining(),
            is_camera_facing_front: rule.camera == CameraFacing::Front,
            step_id: rule.id.clone(),
            step_name: rule.name.clone(),
            step_index: self.capture.current_index(),
            step_count: self.catalog.len(),
            steps,
            camera_ready: self.camera_ready,
            is_capturing: self.capture.is_capturing(),
            is_paused: self.capture.is_paused(),
            is_complete: self.capture.is_complete(),
            face: assessment.geometry,
            face_direction: face_direction(&assessment.face.observation, rule.camera),
            spoken_hint: self.last_spoken.clone(),
        }
    }

    /// Snapshot feed for other threads, updated on every tick and command.
    pub fn subscribe(&self) -> SnapshotReader<GuidanceSnapshot> {
        self.snapshot_tx.reader()
    }

    pub fn subscribe_device_angle(&self) -> SnapshotReader<DeviceAngle> {
        self.estimator.subscribe()
    }

    pub fn catalog(&self) -> &RuleCatalog {
        &self.catalog
    }

    pub fn current_rule(&self) -> &CaptureRule {
        &self.catalog.rules()[self.capture.current_index()]
    }

    pub fn current_index(&self) -> usize {
        self.capture.current_index()
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        self.capture.countdown_remaining()
    }

    pub fn is_complete(&self) -> bool {
        self.capture.is_complete()
    }

    fn assess(&self) -> Assessment {
        let rule = self.current_rule();
        let angle = self.estimator.current_angle();
        let face = self.face_rx.load();
        let geometry = self.geometry.evaluate(
            &face.observation,
            self.viewport,
            face.frame,
            rule.camera,
            None,
            &rule.landmark_offsets,
        );
        let coverage = geometry.mapped_bounds.map(|_| geometry.check.coverage_percent);
        let result = evaluate(rule, &angle, Some(&face.observation), coverage);
        Assessment {
            result,
            geometry,
            face,
        }
    }

    fn face_yaw(&self, face: &FaceFrame) -> Option<f32> {
        if !self.current_rule().require_face_detection || !face.observation.detected {
            return None;
        }
        Some(mirrored_yaw(face.observation.yaw, self.current_rule().camera))
    }

    /// Forward capture events to the host and react to step changes.
    fn absorb(&mut self, capture_events: Vec<CaptureEvent>, out: &mut Vec<GuidanceEvent>) {
        for event in capture_events {
            if matches!(
                event,
                CaptureEvent::StepChanged { .. } | CaptureEvent::SessionComplete
            ) {
                self.announcer.reset();
                self.last_spoken = None;
            }
            out.push(GuidanceEvent::Capture(event));
        }
    }

    fn publish(&self) {
        self.snapshot_tx.publish(self.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Rect;
    use std::time::Duration;

    const SEC: Duration = Duration::from_secs(1);

    fn session() -> GuidanceSession {
        let mut s = GuidanceSession::with_builtin_rules(GuidanceConfig::default()).unwrap();
        s.set_viewport_size(400.0, 800.0);
        s.set_camera_ready(true);
        s
    }

    /// Hold the phone upright in portrait, rolled 84° from flat.
    fn hold_upright(s: &mut GuidanceSession) {
        let roll = 84f32.to_radians();
        for i in 0..150u64 {
            s.feed_accelerometer(0.0, roll.sin(), roll.cos(), i * 50);
        }
    }

    fn turned_face(yaw: f32) -> FaceObservation {
        // 216 x 340 px against the 240 x 340 guide is 90 % coverage.
        FaceObservation {
            detected: true,
            yaw,
            bounds: Some(Rect::new(200.0, 70.0, 216.0, 340.0)),
            ..FaceObservation::default()
        }
    }

    fn capture_requested(events: &[GuidanceEvent]) -> bool {
        events
            .iter()
            .any(|e| matches!(e, GuidanceEvent::Capture(CaptureEvent::CaptureRequested { .. })))
    }

    #[test]
    fn test_front_step_captures_and_advances() {
        let mut s = session();
        hold_upright(&mut s);
        let t0 = Instant::now();

        let events = s.tick(t0);
        assert!(events.contains(&GuidanceEvent::Capture(CaptureEvent::CountdownStarted {
            step: "front".into(),
            remaining: 3
        })));
        assert_eq!(s.countdown_remaining(), Some(3));

        assert!(!capture_requested(&s.tick(t0 + 2 * SEC)));
        assert!(capture_requested(&s.tick(t0 + 3 * SEC)));

        let events = s.report_capture_result("front", true, None).unwrap();
        assert!(events.contains(&GuidanceEvent::Capture(CaptureEvent::StepChanged {
            index: 1,
            step: "right45".into()
        })));

        let snap = s.snapshot();
        assert_eq!(snap.step_id, "right45");
        assert!(snap.steps[0].photo_taken);
        // No face was required, so no yaw is recorded.
        assert_eq!(snap.steps[0].captured_yaw, None);
    }

    #[test]
    fn test_broken_rule_cancels_countdown() {
        let mut s = session();
        hold_upright(&mut s);
        let t0 = Instant::now();
        s.tick(t0);
        s.tick(t0 + 2 * SEC);
        assert_eq!(s.countdown_remaining(), Some(1));

        // Lay the phone flat.
        for i in 0..40u64 {
            s.feed_accelerometer(0.0, 0.0, 1.0, 7500 + i * 50);
        }
        let events = s.tick(t0 + 2 * SEC + Duration::from_millis(400));
        assert!(events.contains(&GuidanceEvent::Capture(CaptureEvent::CountdownCancelled {
            step: "front".into()
        })));
        assert_eq!(s.countdown_remaining(), None);
        assert!(!capture_requested(&s.tick(t0 + 4 * SEC)));
    }

    #[test]
    fn test_face_step_records_captured_yaw() {
        let mut s = session();
        s.advance_to_step(1).unwrap();
        s.feed_face_observation(Some(turned_face(-40.0)), 640.0, 480.0);

        let snap = s.snapshot();
        assert!(snap.is_camera_facing_front);
        assert!((snap.face.check.coverage_percent - 90.0).abs() < 1e-3);
        assert!(snap.rule_check_result.all_rules_met, "{:?}", snap.rule_check_result);

        let events = s.trigger_capture().unwrap();
        assert!(capture_requested(&events));
        s.report_capture_result("right45", true, None).unwrap();

        let step = &s.snapshot().steps[1];
        assert!(step.photo_taken);
        assert_eq!(step.captured_yaw, Some(40.0));
        assert_eq!(step.pose, Some(PoseClass::Right));
    }

    #[test]
    fn test_missing_face_is_spoken_once() {
        let mut s = session();
        s.advance_to_step(1).unwrap();
        s.feed_face_observation(None, 640.0, 480.0);
        let t0 = Instant::now();

        let events = s.tick(t0);
        assert_eq!(
            events,
            vec![GuidanceEvent::Speak(SpeakHint {
                step: "right45".into(),
                hint: "Yüz tespit ediliyor...".into()
            })]
        );
        assert!(s.tick(t0 + SEC).is_empty());
        assert_eq!(s.snapshot().spoken_hint.as_deref(), Some("Yüz tespit ediliyor..."));
    }

    #[test]
    fn test_camera_not_ready_is_silent() {
        let mut s = session();
        s.set_camera_ready(false);
        hold_upright(&mut s);
        assert!(s.tick(Instant::now()).is_empty());
        assert_eq!(s.countdown_remaining(), None);
    }

    #[test]
    fn test_snapshot_has_no_side_effects() {
        let mut s = session();
        hold_upright(&mut s);
        s.tick(Instant::now());
        let a = s.snapshot();
        let b = s.snapshot();
        assert_eq!(a, b);
        assert_eq!(a.countdown_remaining, Some(3));
    }

    #[test]
    fn test_subscriber_sees_published_snapshot() {
        let mut s = session();
        let reader = s.subscribe();
        assert_eq!(reader.load().step_id, "front");
        s.advance_to_step(3).unwrap();
        let snap = reader.load();
        assert_eq!(snap.step_id, "vertex");
        assert!(!snap.is_camera_facing_front);
    }

    #[test]
    fn test_delete_photo_clears_yaw_and_rearms() {
        let mut s = session();
        s.advance_to_step(1).unwrap();
        s.feed_face_observation(Some(turned_face(-40.0)), 640.0, 480.0);
        s.trigger_capture().unwrap();
        s.report_capture_result("right45", true, None).unwrap();

        s.delete_photo(1).unwrap();
        let snap = s.snapshot();
        assert_eq!(snap.step_index, 1);
        assert!(!snap.steps[1].photo_taken);
        assert_eq!(snap.steps[1].captured_yaw, None);
        assert_eq!(s.tick(Instant::now()).len(), 2);
    }

    #[test]
    fn test_step_index_errors_surface() {
        let mut s = session();
        assert!(matches!(
            s.advance_to_step(9),
            Err(SessionError::Capture(CaptureError::InvalidStepIndex { index: 9, len: 5 }))
        ));
        assert!(matches!(
            s.report_capture_result("front", true, None),
            Err(SessionError::Capture(CaptureError::NoCaptureInFlight))
        ));
    }

    #[test]
    fn test_pause_and_reset() {
        let mut s = session();
        hold_upright(&mut s);
        let t0 = Instant::now();
        s.tick(t0);
        assert_eq!(s.pause().len(), 1);
        assert!(s.tick(t0 + SEC).is_empty());
        assert!(s.snapshot().is_paused);

        s.reset();
        let snap = s.snapshot();
        assert!(!snap.is_paused);
        assert_eq!(snap.step_index, 0);
        assert!(!s.tick(t0 + 2 * SEC).is_empty());
    }

    #[test]
    fn test_partial_calibration_toml() {
        let config = GuidanceConfig::from_toml_str(
            r#"
            [capture]
            tick_ms = 500

            [geometry]
            fine_tune_x = -30.0
            "#,
        )
        .unwrap();
        assert_eq!(config.capture.tick_ms, 500);
        assert_eq!(config.geometry.fine_tune_x, -30.0);
        assert_eq!(config.geometry.fine_tune_y, -50.0);
        assert_eq!(config.estimator, EstimatorConfig::default());
    }

    #[test]
    fn test_events_serialize_with_tags() {
        let event = GuidanceEvent::Capture(CaptureEvent::CountdownTick {
            step: "front".into(),
            remaining: 2,
        });
        assert_eq!(
            serde_json::to_string(&event).unwrap(),
            r#"{"event":"countdown_tick","step":"front","remaining":2}"#
        );
        let speak = GuidanceEvent::Speak(SpeakHint {
            step: "front".into(),
            hint: "x".into(),
        });
        assert_eq!(
            serde_json::to_string(&speak).unwrap(),
            r#"{"event":"speak_hint","step":"front","hint":"x"}"#
        );
    }
}
