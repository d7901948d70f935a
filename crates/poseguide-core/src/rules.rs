//! Per-step capture rules.
//!
//! Rules are plain data: acceptance envelopes, flags and hint text. The
//! default catalog is embedded at compile time from
//! `contrib/rules/capture_rules.toml`; an override file with the same
//! schema can be loaded at startup.

use crate::geometry::LandmarkOffset;
use crate::types::{CameraFacing, Envelope, LandmarkKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

const BUILTIN_RULES: &str = include_str!("../../../contrib/rules/capture_rules.toml");

const DEFAULT_COUNTDOWN_SECS: u32 = 3;

#[derive(Error, Debug)]
pub enum RuleCatalogError {
    #[error("unknown capture step: {0}")]
    UnknownStep(String),
    #[error("rule catalog parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to read rule catalog {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("rule catalog has no steps")]
    Empty,
    #[error("duplicate step id: {0}")]
    DuplicateStep(String),
    #[error("step {step}: {field} has min > max")]
    InvalidRange { step: String, field: &'static str },
}

/// Device-angle envelope. An absent axis is unconstrained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct DeviceAngleEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roll: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pitch: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_axis: Option<Envelope>,
}

/// Face yaw (mirrored for the front camera) and pitch bands.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceOrientationEnvelope {
    pub yaw: Envelope,
    pub pitch: Envelope,
}

/// Hint per device-angle failure direction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceAngleHints {
    pub roll_left: String,
    pub roll_right: String,
    pub pitch_down: String,
    pub pitch_up: String,
    pub z_axis_low: String,
    pub z_axis_high: String,
}

impl Default for DeviceAngleHints {
    fn default() -> Self {
        Self {
            roll_left: "Telefonu biraz sola yatırın".into(),
            roll_right: "Telefonu biraz sağa yatırın".into(),
            pitch_down: "Telefonu biraz öne eğin".into(),
            pitch_up: "Telefonu biraz arkaya eğin".into(),
            z_axis_low: "Telefonu biraz arkaya eğin".into(),
            z_axis_high: "Telefonu biraz öne eğin".into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuleHints {
    pub device_angle: DeviceAngleHints,
    pub face_position: String,
    pub face_orientation: String,
    pub detecting_face: String,
    pub hold_steady: String,
    pub all_satisfied: String,
}

impl Default for RuleHints {
    fn default() -> Self {
        Self {
            device_angle: DeviceAngleHints::default(),
            face_position: "Yüzünü kılavuz içine yerleştir".into(),
            face_orientation: "Başını kameraya doğru çevir".into(),
            detecting_face: "Yüz tespit ediliyor...".into(),
            hold_steady: "Telefonu sabit tut".into(),
            all_satisfied: "Tüm kurallar sağlandı!".into(),
        }
    }
}

fn default_countdown() -> u32 {
    DEFAULT_COUNTDOWN_SECS
}

/// One capture step. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaptureRule {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub camera: CameraFacing,
    #[serde(default)]
    pub device_angle: DeviceAngleEnvelope,
    #[serde(default)]
    pub require_face_detection: bool,
    /// Coverage band in percent; only checked on face-detection steps.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_area: Option<Envelope>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub face_orientation: Option<FaceOrientationEnvelope>,
    #[serde(default)]
    pub require_stability: bool,
    /// Seconds; zero captures as soon as the rule is met.
    #[serde(default = "default_countdown")]
    pub countdown_duration: u32,
    #[serde(default)]
    pub hints: RuleHints,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub landmark_offsets: BTreeMap<LandmarkKind, LandmarkOffset>,
}

#[derive(Deserialize)]
struct CatalogFile {
    #[serde(default)]
    rule: Vec<CaptureRule>,
}

/// Ordered, validated set of capture rules.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleCatalog {
    rules: Vec<CaptureRule>,
}

impl RuleCatalog {
    /// The embedded default catalog.
    pub fn builtin() -> Result<Self, RuleCatalogError> {
        Self::from_toml_str(BUILTIN_RULES)
    }

    pub fn from_toml_str(src: &str) -> Result<Self, RuleCatalogError> {
        let file: CatalogFile = toml::from_str(src)?;
        Self::new(file.rule)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, RuleCatalogError> {
        let path = path.as_ref();
        let src = std::fs::read_to_string(path).map_err(|source| RuleCatalogError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let catalog = Self::from_toml_str(&src)?;
        tracing::info!(path = %path.display(), steps = catalog.len(), "loaded rule catalog");
        Ok(catalog)
    }

    pub fn new(rules: Vec<CaptureRule>) -> Result<Self, RuleCatalogError> {
        validate(&rules)?;
        Ok(Self { rules })
    }

    /// Look up a step. An unknown id is a configuration error.
    pub fn get(&self, id: &str) -> Result<&CaptureRule, RuleCatalogError> {
        self.rules
            .iter()
            .find(|r| r.id == id)
            .ok_or_else(|| RuleCatalogError::UnknownStep(id.to_string()))
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.rules.iter().position(|r| r.id == id)
    }

    pub fn by_index(&self, index: usize) -> Option<&CaptureRule> {
        self.rules.get(index)
    }

    pub fn rules(&self) -> &[CaptureRule] {
        &self.rules
    }

    pub fn step_ids(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(|r| r.id.as_str())
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn check_range(step: &str, field: &'static str, env: Option<&Envelope>) -> Result<(), RuleCatalogError> {
    match env {
        Some(e) if e.min.is_nan() || e.max.is_nan() || e.min > e.max => Err(RuleCatalogError::InvalidRange {
            step: step.to_string(),
            field,
        }),
        _ => Ok(()),
    }
}

fn validate(rules: &[CaptureRule]) -> Result<(), RuleCatalogError> {
    if rules.is_empty() {
        return Err(RuleCatalogError::Empty);
    }
    let mut seen = HashSet::new();
    for rule in rules {
        if !seen.insert(rule.id.as_str()) {
            return Err(RuleCatalogError::DuplicateStep(rule.id.clone()));
        }
        let id = rule.id.as_str();
        check_range(id, "device_angle.roll", rule.device_angle.roll.as_ref())?;
        check_range(id, "device_angle.pitch", rule.device_angle.pitch.as_ref())?;
        check_range(id, "device_angle.z_axis", rule.device_angle.z_axis.as_ref())?;
        check_range(id, "face_area", rule.face_area.as_ref())?;
        if let Some(fo) = &rule.face_orientation {
            check_range(id, "face_orientation.yaw", Some(&fo.yaw))?;
            check_range(id, "face_orientation.pitch", Some(&fo.pitch))?;
        }
    }
    Ok(())
}
