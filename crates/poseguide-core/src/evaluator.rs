//! Rule evaluation.
//!
//! Categories are checked in a fixed order (device angle, face detection,
//! face area, face orientation, stability) and the first failing category
//! supplies the single hint shown to the user.

use crate::geometry::mirrored_yaw;
use crate::rules::CaptureRule;
use crate::types::{DeviceAngle, Envelope, FaceObservation};
use serde::{Deserialize, Serialize};

/// Seconds of settled motion accepted in place of `is_stable`.
pub const STABILITY_GRACE_SECS: f32 = 0.2;

/// Per-category outcome of one evaluation. Recomputed every tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleCheckResult {
    pub all_rules_met: bool,
    pub device_angle_ok: bool,
    pub roll_ok: bool,
    pub pitch_ok: bool,
    pub z_axis_ok: bool,
    pub face_detection_ok: bool,
    pub face_area_ok: bool,
    pub face_orientation_ok: bool,
    pub stability_ok: bool,
    /// Hints of failed categories, in evaluation order.
    pub failed_rules: Vec<String>,
    pub current_hint: String,
}

/// Which side of an envelope a value fell on.
enum Bound {
    Within,
    Below,
    Above,
}

fn bound(env: Option<&Envelope>, value: f32) -> Bound {
    match env {
        Some(e) if value.is_nan() || value < e.min => Bound::Below,
        Some(e) if value > e.max => Bound::Above,
        _ => Bound::Within,
    }
}

/// Evaluate `rule` against the latest device angle and face observation.
///
/// `coverage_percent` is the face-area figure from the geometry pass; the
/// area check is skipped when it is `None`. Total for any input: a NaN
/// value fails whatever envelope it is compared against.
pub fn evaluate(
    rule: &CaptureRule,
    angle: &DeviceAngle,
    face: Option<&FaceObservation>,
    coverage_percent: Option<f32>,
) -> RuleCheckResult {
    let hints = &rule.hints;
    let mut failed_rules = Vec::new();

    // Every axis is checked; the first violated one speaks for the category.
    let env = &rule.device_angle;
    let da = &hints.device_angle;
    let roll = bound(env.roll.as_ref(), angle.roll);
    let pitch = bound(env.pitch.as_ref(), angle.pitch);
    let z_axis = bound(env.z_axis.as_ref(), angle.z_axis);
    let roll_ok = matches!(roll, Bound::Within);
    let pitch_ok = matches!(pitch, Bound::Within);
    let z_axis_ok = matches!(z_axis, Bound::Within);
    let device_hint = [
        (roll, &da.roll_left, &da.roll_right),
        (pitch, &da.pitch_down, &da.pitch_up),
        (z_axis, &da.z_axis_low, &da.z_axis_high),
    ]
    .into_iter()
    .find_map(|(b, low, high)| match b {
        Bound::Within => None,
        Bound::Below => Some(low.clone()),
        Bound::Above => Some(high.clone()),
    });
    let device_angle_ok = device_hint.is_none();
    failed_rules.extend(device_hint);

    let detected = face.is_some_and(|f| f.detected);
    let face_detection_ok = !rule.require_face_detection || detected;
    if !face_detection_ok {
        failed_rules.push(hints.detecting_face.clone());
    }

    // Face-dependent checks only run once a required face is present.
    let face_checks = rule.require_face_detection && face_detection_ok;

    let mut face_area_ok = true;
    if let (true, Some(band), Some(coverage)) = (face_checks, rule.face_area, coverage_percent) {
        face_area_ok = band.contains(coverage);
        if !face_area_ok {
            failed_rules.push(hints.face_position.clone());
        }
    }

    let mut face_orientation_ok = true;
    if let (true, Some(envelope), Some(face)) = (face_checks, rule.face_orientation, face) {
        let yaw = mirrored_yaw(face.yaw, rule.camera);
        face_orientation_ok = envelope.yaw.contains(yaw) && envelope.pitch.contains(face.pitch);
        if !face_orientation_ok {
            failed_rules.push(hints.face_orientation.clone());
        }
    }

    let stability_ok = !rule.require_stability
        || angle.is_stable
        || angle.stability_duration >= STABILITY_GRACE_SECS;
    if !stability_ok {
        failed_rules.push(hints.hold_steady.clone());
    }

    let all_rules_met =
        device_angle_ok && face_detection_ok && face_area_ok && face_orientation_ok && stability_ok;
    let current_hint = failed_rules
        .first()
        .cloned()
        .unwrap_or_else(|| hints.all_satisfied.clone());

    RuleCheckResult {
        all_rules_met,
        device_angle_ok,
        roll_ok,
        pitch_ok,
        z_axis_ok,
        face_detection_ok,
        face_area_ok,
        face_orientation_ok,
        stability_ok,
        failed_rules,
        current_hint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleCatalog;
    use crate::types::CameraFacing;

    fn catalog() -> RuleCatalog {
        RuleCatalog::builtin().unwrap()
    }

    fn angle(roll: f32, pitch: f32, z_axis: f32) -> DeviceAngle {
        DeviceAngle {
            roll,
            pitch,
            z_axis,
            ..DeviceAngle::default()
        }
    }

    fn face(yaw: f32, pitch: f32) -> FaceObservation {
        FaceObservation {
            detected: true,
            yaw,
            pitch,
            ..FaceObservation::default()
        }
    }

    #[test]
    fn test_front_in_envelope_passes() {
        let catalog = catalog();
        let rule = catalog.get("front").unwrap();
        let r = evaluate(rule, &angle(84.0, 0.0, 0.0), None, None);
        assert!(r.device_angle_ok);
        assert!(r.all_rules_met);
        assert!(r.failed_rules.is_empty());
        assert_eq!(r.current_hint, "Tüm kurallar sağlandı!");
    }

    #[test]
    fn test_front_roll_below_min_hints_roll_left() {
        let catalog = catalog();
        let rule = catalog.get("front").unwrap();
        let r = evaluate(rule, &angle(70.0, 0.0, 0.0), None, None);
        assert!(!r.device_angle_ok);
        assert!(!r.roll_ok);
        assert!(r.pitch_ok);
        assert!(!r.all_rules_met);
        assert_eq!(r.current_hint, rule.hints.device_angle.roll_left);

        let r = evaluate(rule, &angle(90.0, 0.0, 0.0), None, None);
        assert_eq!(r.current_hint, rule.hints.device_angle.roll_right);
    }

    #[test]
    fn test_only_first_violated_axis_is_hinted() {
        let catalog = catalog();
        let rule = catalog.get("front").unwrap();
        let r = evaluate(rule, &angle(70.0, 20.0, 0.5), None, None);
        assert!(!r.roll_ok);
        assert!(!r.pitch_ok);
        assert!(!r.z_axis_ok);
        assert_eq!(r.failed_rules, vec![rule.hints.device_angle.roll_left.clone()]);

        let r = evaluate(rule, &angle(84.0, -20.0, -0.5), None, None);
        assert!(r.roll_ok);
        assert_eq!(r.current_hint, rule.hints.device_angle.pitch_down);

        let r = evaluate(rule, &angle(84.0, 0.0, 0.5), None, None);
        assert_eq!(r.current_hint, rule.hints.device_angle.z_axis_high);
    }

    #[test]
    fn test_right45_turned_face_passes() {
        let catalog = catalog();
        let rule = catalog.get("right45").unwrap();
        let f = face(-40.0, 0.0);
        let r = evaluate(rule, &angle(0.0, 0.0, 0.0), Some(&f), Some(90.0));
        assert!(r.device_angle_ok);
        assert!(r.face_area_ok);
        assert!(r.face_orientation_ok);
        assert!(r.all_rules_met);
    }

    #[test]
    fn test_right45_wrong_turn_fails_orientation() {
        let catalog = catalog();
        let rule = catalog.get("right45").unwrap();
        let f = face(40.0, 0.0);
        let r = evaluate(rule, &angle(0.0, 0.0, 0.0), Some(&f), Some(90.0));
        assert!(!r.face_orientation_ok);
        assert_eq!(r.current_hint, "Başını 45° sağa çevir");
    }

    #[test]
    fn test_right45_face_pitch_outside_band_fails_orientation() {
        let catalog = catalog();
        let rule = catalog.get("right45").unwrap();
        for pitch in [45.0, -45.0] {
            let f = face(-40.0, pitch);
            let r = evaluate(rule, &angle(0.0, 0.0, 0.0), Some(&f), Some(90.0));
            assert!(r.face_area_ok);
            assert!(!r.face_orientation_ok, "pitch {pitch}");
            assert!(!r.all_rules_met);
            assert_eq!(r.failed_rules, vec![rule.hints.face_orientation.clone()]);
        }

        let f = face(-40.0, 29.0);
        let r = evaluate(rule, &angle(0.0, 0.0, 0.0), Some(&f), Some(90.0));
        assert!(r.face_orientation_ok);
    }

    #[test]
    fn test_face_area_outside_band_fails_before_orientation() {
        let catalog = catalog();
        let rule = catalog.get("left45").unwrap();
        let f = face(0.0, 0.0);
        let r = evaluate(rule, &angle(0.0, 0.0, 0.0), Some(&f), Some(140.0));
        assert!(!r.face_area_ok);
        assert!(!r.face_orientation_ok);
        assert_eq!(
            r.failed_rules,
            vec![
                "Yüzünü kılavuz içine yerleştir".to_string(),
                "Başını 45° sola çevir".to_string()
            ]
        );
    }

    #[test]
    fn test_missing_coverage_skips_area_check() {
        let catalog = catalog();
        let rule = catalog.get("right45").unwrap();
        let f = face(-40.0, 0.0);
        let r = evaluate(rule, &angle(0.0, 0.0, 0.0), Some(&f), None);
        assert!(r.face_area_ok);
        assert!(r.all_rules_met);
    }

    #[test]
    fn test_no_face_on_face_step_only_hints_detection() {
        let catalog = catalog();
        let rule = catalog.get("right45").unwrap();
        for observation in [None, Some(FaceObservation::absent())] {
            let r = evaluate(rule, &angle(0.0, 0.0, 0.0), observation.as_ref(), Some(10.0));
            assert!(!r.face_detection_ok);
            assert!(r.face_area_ok);
            assert!(r.face_orientation_ok);
            assert!(!r.all_rules_met);
            assert_eq!(r.current_hint, "Yüz tespit ediliyor...");
            assert_eq!(r.failed_rules.len(), 1);
        }
    }

    #[test]
    fn test_back_camera_yaw_not_mirrored() {
        let catalog = catalog();
        let mut rule = catalog.get("right45").unwrap().clone();
        rule.camera = CameraFacing::Back;
        let f = face(40.0, 0.0);
        let r = evaluate(&rule, &angle(0.0, 0.0, 0.0), Some(&f), Some(90.0));
        assert!(r.face_orientation_ok);
    }

    #[test]
    fn test_stability_gating() {
        let catalog = catalog();
        let rule = catalog.get("vertex").unwrap();
        let mut a = DeviceAngle::default();

        a.is_stable = false;
        a.stability_duration = 0.1;
        let r = evaluate(rule, &a, None, None);
        assert!(!r.stability_ok);
        assert_eq!(r.current_hint, "Telefonu sabit tut");

        a.stability_duration = 0.2;
        assert!(evaluate(rule, &a, None, None).stability_ok);

        a.stability_duration = 0.0;
        a.is_stable = true;
        assert!(evaluate(rule, &a, None, None).all_rules_met);
    }

    #[test]
    fn test_stability_ignored_when_not_required() {
        let catalog = catalog();
        let rule = catalog.get("front").unwrap();
        let r = evaluate(rule, &angle(84.0, 0.0, 0.0), None, None);
        assert!(r.stability_ok);
    }

    #[test]
    fn test_evaluate_is_deterministic() {
        let catalog = catalog();
        let f = face(-33.0, 4.0);
        let a = DeviceAngle {
            roll: 12.5,
            pitch: -3.0,
            z_axis: 0.1,
            stability_duration: 0.05,
            ..DeviceAngle::default()
        };
        for rule in catalog.rules() {
            let first = evaluate(rule, &a, Some(&f), Some(77.0));
            let second = evaluate(rule, &a, Some(&f), Some(77.0));
            assert_eq!(first, second, "step {}", rule.id);
        }
    }

    #[test]
    fn test_front_pitch_monotonic() {
        let catalog = catalog();
        let rule = catalog.get("front").unwrap();
        let mut flipped = false;
        for i in 0..=200 {
            let pitch = i as f32 * 0.1;
            let ok = evaluate(rule, &angle(84.0, pitch, 0.0), None, None).device_angle_ok;
            if flipped {
                assert!(!ok, "device angle recovered at pitch {pitch}");
            } else if !ok {
                assert!(pitch > 10.0);
                flipped = true;
            }
        }
        assert!(flipped);
    }

    #[test]
    fn test_nan_angle_is_total() {
        let catalog = catalog();
        let rule = catalog.get("front").unwrap();
        let r = evaluate(rule, &angle(f32::NAN, 0.0, 0.0), None, None);
        assert!(!r.roll_ok);
        assert!(!r.all_rules_met);
        let unconstrained = catalog.get("right45").unwrap();
        let f = face(f32::NAN, 0.0);
        let r = evaluate(unconstrained, &angle(0.0, 0.0, 0.0), Some(&f), Some(90.0));
        assert!(!r.face_orientation_ok);
    }
}
