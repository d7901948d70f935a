use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Inclusive `[min, max]` acceptance band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub min: f32,
    pub max: f32,
}

impl Envelope {
    pub const fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn contains(&self, value: f32) -> bool {
        value >= self.min && value <= self.max
    }
}

/// Width/height pair for viewports and camera frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f32,
    pub height: f32,
}

impl Size {
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        !(self.width > 0.0 && self.height > 0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Axis-aligned rectangle, origin at the top-left corner.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rect {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Rect {
    pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> Point {
        Point::new(self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// Which camera is feeding the preview.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CameraFacing {
    #[default]
    Front,
    Back,
}

impl CameraFacing {
    /// Front previews are shown mirrored while the detector reports
    /// un-mirrored coordinates.
    pub fn is_mirrored(self) -> bool {
        matches!(self, CameraFacing::Front)
    }
}

/// Facial landmark kinds reported by the face detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LandmarkKind {
    LeftEye,
    RightEye,
    LeftEar,
    RightEar,
    NoseBase,
    LeftCheek,
    RightCheek,
    MouthLeft,
    MouthRight,
    MouthBottom,
}

/// Per-frame face detector output. Immutable once handed to the core.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FaceObservation {
    pub detected: bool,
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub pitch: f32,
    #[serde(default)]
    pub roll: f32,
    /// Bounding box in camera-frame pixel space.
    #[serde(default)]
    pub bounds: Option<Rect>,
    /// Landmark points, either normalized to `[0, 1]` or in frame pixels.
    #[serde(default)]
    pub landmarks: BTreeMap<LandmarkKind, Point>,
}

impl FaceObservation {
    /// Observation for a frame in which no face was found.
    pub fn absent() -> Self {
        Self::default()
    }
}

/// Screen direction derived from the raw accelerometer z reading.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScreenFacing {
    #[default]
    Unknown,
    Up,
    Down,
    Upright,
}

/// How the phone is gripped, from fused roll.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grip {
    BottomHeld,
    TopHeld,
}

/// Sideways lean, from fused pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Lean {
    Right,
    Left,
}

const FACE_UP_Z: f32 = 0.25;
const FACE_DOWN_Z: f32 = -0.15;
const GRIP_ROLL_DEG: f32 = 20.0;
const LEAN_PITCH_DEG: f32 = 5.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrientationLabel {
    pub facing: ScreenFacing,
    pub grip: Option<Grip>,
    pub lean: Option<Lean>,
}

impl OrientationLabel {
    pub fn classify(z_axis: f32, roll: f32, pitch: f32) -> Self {
        let facing = if z_axis > FACE_UP_Z {
            ScreenFacing::Up
        } else if z_axis < FACE_DOWN_Z {
            ScreenFacing::Down
        } else {
            ScreenFacing::Upright
        };

        let grip = if roll > GRIP_ROLL_DEG {
            Some(Grip::BottomHeld)
        } else if roll < -GRIP_ROLL_DEG {
            Some(Grip::TopHeld)
        } else {
            None
        };

        let lean = if pitch > LEAN_PITCH_DEG {
            Some(Lean::Right)
        } else if pitch < -LEAN_PITCH_DEG {
            Some(Lean::Left)
        } else {
            None
        };

        Self { facing, grip, lean }
    }
}

impl fmt::Display for OrientationLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let facing = match self.facing {
            ScreenFacing::Unknown => "unknown",
            ScreenFacing::Up => "screen up",
            ScreenFacing::Down => "screen down",
            ScreenFacing::Upright => "upright",
        };
        f.write_str(facing)?;
        match self.grip {
            Some(Grip::BottomHeld) => f.write_str(" | held from bottom")?,
            Some(Grip::TopHeld) => f.write_str(" | held from top")?,
            None => {}
        }
        match self.lean {
            Some(Lean::Right) => f.write_str(" | leaning right")?,
            Some(Lean::Left) => f.write_str(" | leaning left")?,
            None => {}
        }
        Ok(())
    }
}

/// Fused device orientation, republished on every accelerometer tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceAngle {
    pub pitch: f32,
    pub roll: f32,
    /// Pure gyro integration; drifts without a magnetometer.
    pub yaw: f32,
    /// Raw accelerometer z (in g), unfiltered.
    pub z_axis: f32,
    pub is_stable: bool,
    /// Seconds the device has been continuously stable.
    pub stability_duration: f32,
    pub orientation_label: OrientationLabel,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_inclusive() {
        let e = Envelope::new(25.0, 65.0);
        assert!(e.contains(25.0));
        assert!(e.contains(65.0));
        assert!(!e.contains(24.99));
        assert!(!e.contains(65.01));
    }

    #[test]
    fn test_orientation_label_classify() {
        let label = OrientationLabel::classify(0.9, 30.0, -8.0);
        assert_eq!(label.facing, ScreenFacing::Up);
        assert_eq!(label.grip, Some(Grip::BottomHeld));
        assert_eq!(label.lean, Some(Lean::Left));

        let label = OrientationLabel::classify(-0.5, 0.0, 0.0);
        assert_eq!(label.facing, ScreenFacing::Down);
        assert_eq!(label.grip, None);
        assert_eq!(label.lean, None);

        let label = OrientationLabel::classify(0.0, -25.0, 6.0);
        assert_eq!(label.facing, ScreenFacing::Upright);
        assert_eq!(label.grip, Some(Grip::TopHeld));
        assert_eq!(label.lean, Some(Lean::Right));
    }

    #[test]
    fn test_orientation_label_display() {
        let label = OrientationLabel::classify(0.0, 84.0, 0.0);
        assert_eq!(label.to_string(), "upright | held from bottom");
        assert_eq!(OrientationLabel::default().to_string(), "unknown");
    }

    #[test]
    fn test_face_observation_deserialize_landmarks() {
        let json = r#"{
            "detected": true,
            "yaw": -40.0,
            "bounds": {"x": 10, "y": 20, "width": 200, "height": 260},
            "landmarks": {"LEFT_EYE": {"x": 0.4, "y": 0.4}, "NOSE_BASE": {"x": 0.5, "y": 0.55}}
        }"#;
        let face: FaceObservation = serde_json::from_str(json).unwrap();
        assert!(face.detected);
        assert_eq!(face.pitch, 0.0);
        assert_eq!(face.landmarks.len(), 2);
        assert!(face.landmarks.contains_key(&LandmarkKind::NoseBase));
        assert_eq!(face.bounds.unwrap().center(), Point::new(110.0, 150.0));
    }

    #[test]
    fn test_camera_facing_mirroring() {
        assert!(CameraFacing::Front.is_mirrored());
        assert!(!CameraFacing::Back.is_mirrored());
    }
}
