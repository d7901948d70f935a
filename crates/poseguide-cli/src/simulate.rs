//! Scripted replay of sensor and vision input through a guidance session.
//!
//! A scenario is a JSON document listing timestamped inputs. The session is
//! ticked on a virtual clock, so a replay is deterministic and runs as fast
//! as the machine allows.

use anyhow::{Context, Result};
use poseguide_core::{
    CaptureEvent, FaceObservation, GuidanceEvent, GuidanceSession,
};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::path::Path;
use std::time::{Duration, Instant};

const DEFAULT_TICK_MS: u64 = 100;
const DEFAULT_TAIL_MS: u64 = 5000;

#[derive(Debug, Deserialize)]
pub struct Scenario {
    #[serde(default)]
    pub viewport: Option<Viewport>,
    #[serde(default = "default_true")]
    pub camera_ready: bool,
    #[serde(default)]
    pub start_step: usize,
    #[serde(default = "default_tick")]
    pub tick_ms: u64,
    /// Keep ticking this long after the last input.
    #[serde(default = "default_tail")]
    pub tail_ms: u64,
    pub inputs: Vec<ScriptInput>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Viewport {
    pub width: f32,
    pub height: f32,
}

fn default_true() -> bool {
    true
}

fn default_tick() -> u64 {
    DEFAULT_TICK_MS
}

fn default_tail() -> u64 {
    DEFAULT_TAIL_MS
}

#[derive(Debug, Deserialize)]
pub struct ScriptInput {
    pub at_ms: u64,
    #[serde(flatten)]
    pub action: Action,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Accelerometer { x: f32, y: f32, z: f32 },
    Gyroscope { x: f32, y: f32, z: f32 },
    Face {
        observation: Option<FaceObservation>,
        frame_width: f32,
        frame_height: f32,
    },
    Viewport { width: f32, height: f32 },
    CameraReady { ready: bool },
    AdvanceToStep { index: usize },
    DeletePhoto { index: usize },
    Pause,
    Resume,
    /// Outcome the host reports for the next capture request.
    CaptureOutcome {
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

/// One emitted event with its virtual time.
#[derive(Debug, Serialize)]
pub struct Emitted {
    pub at_ms: u64,
    #[serde(flatten)]
    pub event: GuidanceEvent,
}

pub fn load(path: &Path) -> Result<Scenario> {
    let src = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read scenario {}", path.display()))?;
    serde_json::from_str(&src).with_context(|| format!("invalid scenario {}", path.display()))
}

/// Replay `scenario` through `session`, returning every emitted event.
/// Capture requests are answered with the next scripted outcome, or
/// success when none is queued.
pub fn run(session: &mut GuidanceSession, scenario: Scenario) -> Result<Vec<Emitted>> {
    let mut inputs = scenario.inputs;
    inputs.sort_by_key(|i| i.at_ms);
    let end_ms = inputs.last().map_or(0, |i| i.at_ms) + scenario.tail_ms;
    let tick_ms = scenario.tick_ms.max(1);
    let mut inputs: VecDeque<ScriptInput> = inputs.into();
    tracing::debug!(inputs = inputs.len(), end_ms, tick_ms, "replaying scenario");

    if let Some(v) = scenario.viewport {
        session.set_viewport_size(v.width, v.height);
    }
    session.set_camera_ready(scenario.camera_ready);

    let mut emitted = Vec::new();
    let mut outcomes: VecDeque<(bool, Option<String>)> = VecDeque::new();
    if scenario.start_step > 0 {
        record(&mut emitted, 0, session.advance_to_step(scenario.start_step)?);
    }

    let base = Instant::now();
    let mut now_ms = 0;
    while now_ms <= end_ms {
        while inputs.front().is_some_and(|i| i.at_ms <= now_ms) {
            let Some(input) = inputs.pop_front() else {
                break;
            };
            let events = apply(session, input.action, input.at_ms, &mut outcomes)?;
            record(&mut emitted, now_ms, events);
        }

        let events = session.tick(base + Duration::from_millis(now_ms));
        let requested: Vec<String> = events
            .iter()
            .filter_map(|e| match e {
                GuidanceEvent::Capture(CaptureEvent::CaptureRequested { step }) => Some(step.clone()),
                _ => None,
            })
            .collect();
        record(&mut emitted, now_ms, events);

        for step in requested {
            let (ok, error) = outcomes.pop_front().unwrap_or((true, None));
            let events = session.report_capture_result(&step, ok, error)?;
            record(&mut emitted, now_ms, events);
        }

        if session.is_complete() && inputs.is_empty() {
            break;
        }
        now_ms += tick_ms;
    }
    Ok(emitted)
}

fn apply(
    session: &mut GuidanceSession,
    action: Action,
    at_ms: u64,
    outcomes: &mut VecDeque<(bool, Option<String>)>,
) -> Result<Vec<GuidanceEvent>> {
    let events = match action {
        Action::Accelerometer { x, y, z } => {
            session.feed_accelerometer(x, y, z, at_ms);
            Vec::new()
        }
        Action::Gyroscope { x, y, z } => {
            session.feed_gyroscope(x, y, z, at_ms);
            Vec::new()
        }
        Action::Face {
            observation,
            frame_width,
            frame_height,
        } => {
            session.feed_face_observation(observation, frame_width, frame_height);
            Vec::new()
        }
        Action::Viewport { width, height } => {
            session.set_viewport_size(width, height);
            Vec::new()
        }
        Action::CameraReady { ready } => {
            session.set_camera_ready(ready);
            Vec::new()
        }
        Action::AdvanceToStep { index } => session.advance_to_step(index)?,
        Action::DeletePhoto { index } => session.delete_photo(index)?,
        Action::Pause => session.pause(),
        Action::Resume => {
            session.resume();
            Vec::new()
        }
        Action::CaptureOutcome { ok, error } => {
            outcomes.push_back((ok, error));
            Vec::new()
        }
    };
    Ok(events)
}

fn record(out: &mut Vec<Emitted>, at_ms: u64, events: Vec<GuidanceEvent>) {
    out.extend(events.into_iter().map(|event| Emitted { at_ms, event }));
}
