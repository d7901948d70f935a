//! poseguide-core: real-time capture guidance.
//!
//! Fuses motion-sensor samples into a device orientation, checks face
//! geometry against the on-screen guide, evaluates per-step capture rules
//! and sequences the countdown and capture for each step of a session.

pub mod capture;
pub mod evaluator;
pub mod geometry;
pub mod orientation;
pub mod rules;
pub mod session;
pub mod snapshot;
pub mod types;
pub mod voice;

pub use capture::{CaptureConfig, CaptureError, CaptureEvent, CaptureStateMachine};
pub use evaluator::{evaluate, RuleCheckResult};
pub use geometry::{FaceGeometryEvaluator, GeometryConfig};
pub use orientation::{EstimatorConfig, OrientationEstimator};
pub use rules::{CaptureRule, RuleCatalog, RuleCatalogError};
pub use session::{GuidanceConfig, GuidanceEvent, GuidanceSession, GuidanceSnapshot, SessionError};
pub use types::{CameraFacing, DeviceAngle, FaceObservation};
