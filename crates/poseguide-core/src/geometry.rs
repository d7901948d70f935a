//! Face geometry against the on-screen guide.
//!
//! Maps detector coordinates (camera-frame pixels) into the preview
//! viewport, accounting for letterboxing, front-camera mirroring and a
//! fixed calibration offset, then tests the face against the guide circle
//! and the coverage band.

use crate::types::{CameraFacing, Envelope, FaceObservation, LandmarkKind, Point, Rect, Size};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Display nudge applied to a single mapped landmark.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LandmarkOffset {
    #[serde(default)]
    pub dx: f32,
    #[serde(default)]
    pub dy: f32,
}

impl LandmarkOffset {
    pub const fn new(dx: f32, dy: f32) -> Self {
        Self { dx, dy }
    }
}

/// Calibration constants for the preview overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeometryConfig {
    /// Guide ellipse size in logical units.
    pub guide_width: f32,
    pub guide_height: f32,
    /// Empirical detector-to-preview correction, applied after scaling.
    pub fine_tune_x: f32,
    pub fine_tune_y: f32,
    /// The detector's box is tighter than the visible head; the mapped box
    /// is grown by these factors about its center.
    pub bbox_scale_x: f32,
    pub bbox_scale_y: f32,
    pub bbox_vertical_offset: f32,
    /// Coverage band used when the step does not declare its own.
    pub coverage_band: Envelope,
    pub landmark_offsets: BTreeMap<LandmarkKind, LandmarkOffset>,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            guide_width: 240.0,
            guide_height: 340.0,
            fine_tune_x: -37.0,
            fine_tune_y: -50.0,
            bbox_scale_x: 1.05,
            bbox_scale_y: 1.40,
            bbox_vertical_offset: 5.0,
            coverage_band: Envelope::new(100.0, 160.0),
            landmark_offsets: default_landmark_offsets(),
        }
    }
}

fn default_landmark_offsets() -> BTreeMap<LandmarkKind, LandmarkOffset> {
    BTreeMap::from([
        (LandmarkKind::LeftEar, LandmarkOffset::new(20.0, 0.0)),
        (LandmarkKind::RightEar, LandmarkOffset::new(-23.0, 0.0)),
        (LandmarkKind::NoseBase, LandmarkOffset::new(0.0, 20.0)),
        (LandmarkKind::MouthLeft, LandmarkOffset::new(0.0, 20.0)),
        (LandmarkKind::MouthRight, LandmarkOffset::new(0.0, 20.0)),
        (LandmarkKind::MouthBottom, LandmarkOffset::new(0.0, 20.0)),
    ])
}

/// Frame-to-viewport mapping. A pure function of (viewport, frame) and
/// the calibration constants.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CoordinateTransform {
    pub scale_x: f32,
    pub scale_y: f32,
    pub offset_x: f32,
    pub offset_y: f32,
    pub fine_tune_x: f32,
    pub fine_tune_y: f32,
}

impl CoordinateTransform {
    /// Map a frame-pixel point into viewport space. `mirrored` reflects x
    /// about the frame width before scaling.
    pub fn map_point(&self, p: Point, frame: Size, mirrored: bool) -> Point {
        let x = if mirrored { frame.width - p.x } else { p.x };
        Point::new(
            x * self.scale_x + self.offset_x + self.fine_tune_x,
            p.y * self.scale_y + self.offset_y + self.fine_tune_y,
        )
    }
}

/// Result of testing a face against the guide.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GuideCheck {
    pub in_guide: bool,
    pub coverage_percent: f32,
    pub landmarks_in_circle: bool,
    pub bbox_in_circle: bool,
    pub coverage_in_band: bool,
}

/// Everything the overlay needs about the current face.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceGeometry {
    pub mapped_bounds: Option<Rect>,
    pub check: GuideCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HorizontalDirection {
    Straight,
    Right,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerticalDirection {
    Straight,
    Up,
    Down,
}

/// Where the face is pointing, as shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceDirection {
    pub horizontal: HorizontalDirection,
    pub vertical: VerticalDirection,
    /// Absolute mirrored yaw, degrees.
    pub yaw_angle: f32,
    /// Absolute pitch when outside the straight band, else zero.
    pub pitch_angle: f32,
}

/// Coarse head pose class of a captured photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseClass {
    Front,
    Left,
    Right,
    Unknown,
}

const STRAIGHT_YAW_DEG: f32 = 8.0;
const STRAIGHT_PITCH_DEG: f32 = 5.0;
const POSE_TURNED_DEG: f32 = 18.0;
const POSE_FRONT_DEG: f32 = 10.0;
const POSE_CONFIDENCE_SPAN_DEG: f32 = 60.0;
const POSE_CONFIDENCE_FLOOR: f32 = 0.15;

/// Face yaw as the user sees it: negated for the mirrored front preview.
pub fn mirrored_yaw(yaw: f32, facing: CameraFacing) -> f32 {
    if facing.is_mirrored() {
        -yaw
    } else {
        yaw
    }
}

/// Detectors report landmarks either normalized or in pixels; a point
/// with both coordinates ≤ 1 is treated as normalized.
pub fn landmark_to_frame_pixels(p: Point, frame: Size) -> Point {
    if p.x <= 1.0 && p.y <= 1.0 {
        Point::new(p.x * frame.width, p.y * frame.height)
    } else {
        p
    }
}

/// Detector bbox area relative to the guide area, in percent.
pub fn coverage_percent(bounds: &Rect, guide_width: f32, guide_height: f32) -> f32 {
    if guide_width <= 0.0 || guide_height <= 0.0 {
        return 0.0;
    }
    (bounds.width / guide_width) * (bounds.height / guide_height) * 100.0
}

pub fn face_direction(face: &FaceObservation, facing: CameraFacing) -> Option<FaceDirection> {
    if !face.detected {
        return None;
    }
    let yaw = mirrored_yaw(face.yaw, facing);
    let horizontal = if yaw.abs() <= STRAIGHT_YAW_DEG {
        HorizontalDirection::Straight
    } else if yaw > 0.0 {
        HorizontalDirection::Right
    } else {
        HorizontalDirection::Left
    };
    let (vertical, pitch_angle) = if face.pitch > STRAIGHT_PITCH_DEG {
        (VerticalDirection::Up, face.pitch)
    } else if face.pitch < -STRAIGHT_PITCH_DEG {
        (VerticalDirection::Down, face.pitch.abs())
    } else {
        (VerticalDirection::Straight, 0.0)
    };
    Some(FaceDirection {
        horizontal,
        vertical,
        yaw_angle: yaw.abs(),
        pitch_angle,
    })
}

pub fn classify_pose(yaw: f32) -> PoseClass {
    if yaw >= POSE_TURNED_DEG {
        PoseClass::Right
    } else if yaw <= -POSE_TURNED_DEG {
        PoseClass::Left
    } else if yaw.abs() <= POSE_FRONT_DEG {
        PoseClass::Front
    } else {
        PoseClass::Unknown
    }
}

/// Confidence that a pose is frontal, falling off linearly with |yaw|.
pub fn pose_confidence(yaw: f32) -> f32 {
    (1.0 - (yaw.abs() / POSE_CONFIDENCE_SPAN_DEG).min(1.0)).clamp(POSE_CONFIDENCE_FLOOR, 1.0)
}

/// Maps detector output into the viewport and checks it against the guide.
pub struct FaceGeometryEvaluator {
    config: GeometryConfig,
}

impl FaceGeometryEvaluator {
    pub fn new(config: GeometryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GeometryConfig {
        &self.config
    }

    /// Aspect-fit the frame inside the viewport and center the padded axis.
    /// An empty viewport or frame yields unit scale with no offset.
    pub fn compute_transform(&self, viewport: Size, frame: Size) -> CoordinateTransform {
        let mut t = CoordinateTransform {
            scale_x: 1.0,
            scale_y: 1.0,
            offset_x: 0.0,
            offset_y: 0.0,
            fine_tune_x: self.config.fine_tune_x,
            fine_tune_y: self.config.fine_tune_y,
        };
        if viewport.is_empty() || frame.is_empty() {
            return t;
        }

        let viewport_ratio = viewport.width / viewport.height;
        let frame_ratio = frame.width / frame.height;

        let mut effective_width = viewport.width;
        let mut effective_height = viewport.height;
        if viewport_ratio > frame_ratio {
            effective_width = viewport.height * frame_ratio;
            t.offset_x = (viewport.width - effective_width) / 2.0;
        } else if viewport_ratio < frame_ratio {
            effective_height = viewport.width / frame_ratio;
            t.offset_y = (viewport.height - effective_height) / 2.0;
        }

        t.scale_x = effective_width / frame.width;
        t.scale_y = effective_height / frame.height;
        t
    }

    /// Map a detector bbox into the viewport as the overlay draws it:
    /// mirrored, scaled, then grown about its center by the display factors.
    pub fn map_face_bounds_to_viewport(
        &self,
        bounds: &Rect,
        transform: &CoordinateTransform,
        frame: Size,
        mirrored: bool,
    ) -> Rect {
        let face_x = if mirrored {
            frame.width - (bounds.x + bounds.width)
        } else {
            bounds.x
        };
        let raw_width = bounds.width * transform.scale_x;
        let raw_height = bounds.height * transform.scale_y;
        let raw_x = face_x * transform.scale_x + transform.offset_x + transform.fine_tune_x;
        let raw_y = bounds.y * transform.scale_y + transform.offset_y + transform.fine_tune_y;

        let width = raw_width * self.config.bbox_scale_x;
        let height = raw_height * self.config.bbox_scale_y;
        let center_x = raw_x + raw_width / 2.0;
        let center_y = raw_y + raw_height / 2.0 + self.config.bbox_vertical_offset;

        Rect::new(center_x - width / 2.0, center_y - height / 2.0, width, height)
    }

    /// Map every landmark into viewport space, applying the per-kind display
    /// offsets (step overrides first, then the calibration defaults).
    pub fn map_landmarks(
        &self,
        landmarks: &BTreeMap<LandmarkKind, Point>,
        transform: &CoordinateTransform,
        frame: Size,
        mirrored: bool,
        overrides: &BTreeMap<LandmarkKind, LandmarkOffset>,
    ) -> BTreeMap<LandmarkKind, Point> {
        landmarks
            .iter()
            .map(|(kind, p)| {
                let px = landmark_to_frame_pixels(*p, frame);
                let mapped = transform.map_point(px, frame, mirrored);
                let offset = overrides
                    .get(kind)
                    .or_else(|| self.config.landmark_offsets.get(kind))
                    .copied()
                    .unwrap_or_default();
                (*kind, Point::new(mapped.x + offset.dx, mapped.y + offset.dy))
            })
            .collect()
    }

    /// Containment test: every landmark and the face circle inside the
    /// guide circle, and the coverage inside `band`.
    pub fn is_face_within_guide(
        &self,
        raw_bounds: &Rect,
        mapped_bounds: &Rect,
        mapped_landmarks: &BTreeMap<LandmarkKind, Point>,
        viewport: Size,
        band: Envelope,
    ) -> GuideCheck {
        let guide_center = Point::new(viewport.width / 2.0, viewport.height / 2.0);
        let guide_radius = self.config.guide_width / 2.0;

        let landmarks_in_circle = !mapped_landmarks.is_empty()
            && mapped_landmarks
                .values()
                .all(|p| p.distance(&guide_center) <= guide_radius);

        let face_center = mapped_bounds.center();
        let face_radius = mapped_bounds.width / 2.0;
        let bbox_in_circle = face_center.distance(&guide_center) + face_radius <= guide_radius;

        let coverage = coverage_percent(raw_bounds, self.config.guide_width, self.config.guide_height);
        let coverage_in_band = band.contains(coverage);

        GuideCheck {
            in_guide: landmarks_in_circle && bbox_in_circle && coverage_in_band,
            coverage_percent: coverage,
            landmarks_in_circle,
            bbox_in_circle,
            coverage_in_band,
        }
    }

    /// Full per-frame pass: transform, map and test. A face without a
    /// bbox (or not detected) yields the empty geometry.
    pub fn evaluate(
        &self,
        face: &FaceObservation,
        viewport: Size,
        frame: Size,
        facing: CameraFacing,
        band: Option<Envelope>,
        overrides: &BTreeMap<LandmarkKind, LandmarkOffset>,
    ) -> FaceGeometry {
        let Some(bounds) = face.bounds.filter(|_| face.detected) else {
            return FaceGeometry::default();
        };
        let mirrored = facing.is_mirrored();
        let transform = self.compute_transform(viewport, frame);
        let mapped = self.map_face_bounds_to_viewport(&bounds, &transform, frame, mirrored);
        let landmarks = self.map_landmarks(&face.landmarks, &transform, frame, mirrored, overrides);
        let check = self.is_face_within_guide(
            &bounds,
            &mapped,
            &landmarks,
            viewport,
            band.unwrap_or(self.config.coverage_band),
        );
        FaceGeometry {
            mapped_bounds: Some(mapped),
            check,
        }
    }
}

impl Default for FaceGeometryEvaluator {
    fn default() -> Self {
        Self::new(GeometryConfig::default())
    }
}
