//! Countdown and capture sequencing across the session's steps.
//!
//! The machine never sleeps or spawns: the host calls [`CaptureStateMachine::update`]
//! with the latest rule outcome and the current time, and the machine decides
//! whether a countdown second has elapsed. Capture itself is performed by the
//! host, which reports back through [`CaptureStateMachine::report_capture_result`].

use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use thiserror::Error;

const DEFAULT_TICK_MS: u64 = 1000;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("capture already in flight for step {step}")]
    ReentrantCapture { step: String },
    #[error("no capture in flight")]
    NoCaptureInFlight,
    #[error("capture result for step {reported} but step {expected} is in flight")]
    StepMismatch { expected: String, reported: String },
    #[error("step index {index} out of range (session has {len} steps)")]
    InvalidStepIndex { index: usize, len: usize },
    #[error("capture session is complete")]
    SessionComplete,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Length of one countdown second.
    pub tick_ms: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            tick_ms: DEFAULT_TICK_MS,
        }
    }
}

impl CaptureConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }
}

/// Notifications for the host. Emitted in the order they happen.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum CaptureEvent {
    CountdownStarted { step: String, remaining: u32 },
    /// One per displayed countdown second, including the first.
    CountdownTick { step: String, remaining: u32 },
    CountdownCancelled { step: String },
    /// The host must take the photo and answer with a capture result.
    CaptureRequested { step: String },
    PhotoCaptured { step: String },
    CaptureFailed { step: String, error: Option<String> },
    StepChanged { index: usize, step: String },
    PhotoDeleted { step: String },
    SessionComplete,
    SessionReset,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CapturePhase {
    Idle,
    Counting { remaining: u32, next_tick: Instant },
    Capturing { step_index: usize },
    Complete,
}

/// Countdown and auto-capture state for a fixed sequence of steps.
pub struct CaptureStateMachine {
    steps: Vec<String>,
    photos: Vec<bool>,
    current: usize,
    phase: CapturePhase,
    paused: bool,
    tick: Duration,
}

impl CaptureStateMachine {
    pub fn new(steps: Vec<String>, config: &CaptureConfig) -> Self {
        let photos = vec![false; steps.len()];
        let phase = if steps.is_empty() {
            CapturePhase::Complete
        } else {
            CapturePhase::Idle
        };
        Self {
            steps,
            photos,
            current: 0,
            phase,
            paused: false,
            tick: config.tick(),
        }
    }

    /// Drive the machine with the latest evaluation.
    ///
    /// Idle starts a countdown of `countdown_secs` when the rule is met and
    /// the camera is ready; a running countdown is cancelled as soon as
    /// either stops holding. The capture is requested one tick after the
    /// countdown shows 1.
    pub fn update(
        &mut self,
        rules_met: bool,
        camera_ready: bool,
        countdown_secs: u32,
        now: Instant,
    ) -> Vec<CaptureEvent> {
        let mut events = Vec::new();
        if self.paused {
            return events;
        }
        match self.phase {
            CapturePhase::Idle => {
                if !rules_met || !camera_ready || self.photos[self.current] {
                    return events;
                }
                let step = self.steps[self.current].clone();
                if countdown_secs == 0 {
                    events.push(self.begin_capture());
                    return events;
                }
                tracing::info!(step = %step, seconds = countdown_secs, "countdown started");
                self.phase = CapturePhase::Counting {
                    remaining: countdown_secs,
                    next_tick: now + self.tick,
                };
                events.push(CaptureEvent::CountdownStarted {
                    step: step.clone(),
                    remaining: countdown_secs,
                });
                events.push(CaptureEvent::CountdownTick {
                    step,
                    remaining: countdown_secs,
                });
            }
            CapturePhase::Counting {
                mut remaining,
                mut next_tick,
            } => {
                if !rules_met || !camera_ready {
                    events.extend(self.cancel_countdown());
                    return events;
                }
                while now >= next_tick {
                    if remaining > 1 {
                        remaining -= 1;
                        next_tick += self.tick;
                        tracing::debug!(step = %self.steps[self.current], remaining, "countdown tick");
                        events.push(CaptureEvent::CountdownTick {
                            step: self.steps[self.current].clone(),
                            remaining,
                        });
                    } else {
                        events.push(self.begin_capture());
                        return events;
                    }
                }
                self.phase = CapturePhase::Counting {
                    remaining,
                    next_tick,
                };
            }
            CapturePhase::Capturing { .. } | CapturePhase::Complete => {}
        }
        events
    }

    /// Request a capture of the current step right away, skipping any
    /// countdown. Rejected while another capture is in flight.
    pub fn trigger_capture(&mut self) -> Result<CaptureEvent, CaptureError> {
        match self.phase {
            CapturePhase::Capturing { step_index } => Err(CaptureError::ReentrantCapture {
                step: self.steps[step_index].clone(),
            }),
            CapturePhase::Complete => Err(CaptureError::SessionComplete),
            CapturePhase::Idle | CapturePhase::Counting { .. } => Ok(self.begin_capture()),
        }
    }

    fn begin_capture(&mut self) -> CaptureEvent {
        let step = self.steps[self.current].clone();
        tracing::info!(step = %step, "capture requested");
        self.phase = CapturePhase::Capturing {
            step_index: self.current,
        };
        CaptureEvent::CaptureRequested { step }
    }

    /// Stop a running countdown. A no-op in any other phase.
    pub fn cancel_countdown(&mut self) -> Option<CaptureEvent> {
        if !matches!(self.phase, CapturePhase::Counting { .. }) {
            return None;
        }
        self.phase = CapturePhase::Idle;
        let step = self.steps[self.current].clone();
        tracing::debug!(step = %step, "countdown cancelled");
        Some(CaptureEvent::CountdownCancelled { step })
    }

    /// Outcome of the host's capture for `step`. Success stores the photo
    /// and moves on; failure returns to Idle on the same step.
    pub fn report_capture_result(
        &mut self,
        step: &str,
        ok: bool,
        error: Option<String>,
    ) -> Result<Vec<CaptureEvent>, CaptureError> {
        let CapturePhase::Capturing { step_index } = self.phase else {
            return Err(CaptureError::NoCaptureInFlight);
        };
        let expected = &self.steps[step_index];
        if expected != step {
            return Err(CaptureError::StepMismatch {
                expected: expected.clone(),
                reported: step.to_string(),
            });
        }

        let step = expected.clone();
        if !ok {
            tracing::warn!(step = %step, error = error.as_deref().unwrap_or("unknown"), "capture failed");
            self.phase = CapturePhase::Idle;
            return Ok(vec![CaptureEvent::CaptureFailed { step, error }]);
        }

        tracing::info!(step = %step, "photo captured");
        self.photos[step_index] = true;
        let mut events = vec![CaptureEvent::PhotoCaptured { step }];
        match self.next_missing(step_index) {
            Some(next) => {
                self.current = next;
                self.phase = CapturePhase::Idle;
                events.push(CaptureEvent::StepChanged {
                    index: next,
                    step: self.steps[next].clone(),
                });
            }
            None => {
                tracing::info!(steps = self.steps.len(), "capture session complete");
                self.phase = CapturePhase::Complete;
                events.push(CaptureEvent::SessionComplete);
            }
        }
        Ok(events)
    }

    /// The first step after `from` still missing its photo, wrapping to
    /// the start. `None` once every step has one.
    fn next_missing(&self, from: usize) -> Option<usize> {
        let len = self.steps.len();
        (1..=len)
            .map(|offset| (from + offset) % len)
            .find(|&i| !self.photos[i])
    }

    /// Jump to `index`. Any countdown or in-flight capture is dropped; a
    /// late capture result for it is then rejected.
    pub fn advance_to_step(&mut self, index: usize) -> Result<Vec<CaptureEvent>, CaptureError> {
        self.check_index(index)?;
        let mut events = Vec::new();
        events.extend(self.cancel_countdown());
        if let CapturePhase::Capturing { step_index } = self.phase {
            tracing::debug!(step = %self.steps[step_index], "dropping in-flight capture on step change");
        }
        self.phase = CapturePhase::Idle;
        self.current = index;
        tracing::info!(index, step = %self.steps[index], "step changed");
        events.push(CaptureEvent::StepChanged {
            index,
            step: self.steps[index].clone(),
        });
        Ok(events)
    }

    /// Discard a step's photo and make it current again.
    pub fn delete_photo(&mut self, index: usize) -> Result<Vec<CaptureEvent>, CaptureError> {
        self.check_index(index)?;
        self.photos[index] = false;
        let mut events = vec![CaptureEvent::PhotoDeleted {
            step: self.steps[index].clone(),
        }];
        events.extend(self.advance_to_step(index)?);
        Ok(events)
    }

    /// Suspend auto-triggering. A running countdown is cancelled; an
    /// in-flight capture still completes.
    pub fn pause(&mut self) -> Option<CaptureEvent> {
        self.paused = true;
        self.cancel_countdown()
    }

    pub fn resume(&mut self) {
        self.paused = false;
    }

    pub fn reset(&mut self) -> CaptureEvent {
        self.photos.iter_mut().for_each(|p| *p = false);
        self.current = 0;
        self.paused = false;
        self.phase = if self.steps.is_empty() {
            CapturePhase::Complete
        } else {
            CapturePhase::Idle
        };
        tracing::info!("capture session reset");
        CaptureEvent::SessionReset
    }

    fn check_index(&self, index: usize) -> Result<(), CaptureError> {
        if index >= self.steps.len() {
            return Err(CaptureError::InvalidStepIndex {
                index,
                len: self.steps.len(),
            });
        }
        Ok(())
    }

    pub fn phase(&self) -> &CapturePhase {
        &self.phase
    }

    pub fn current_index(&self) -> usize {
        self.current
    }

    pub fn current_step(&self) -> Option<&str> {
        self.steps.get(self.current).map(String::as_str)
    }

    pub fn countdown_remaining(&self) -> Option<u32> {
        match self.phase {
            CapturePhase::Counting { remaining, .. } => Some(remaining),
            _ => None,
        }
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self.phase, CapturePhase::Capturing { .. })
    }

    pub fn is_complete(&self) -> bool {
        self.phase == CapturePhase::Complete
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn has_photo(&self, index: usize) -> bool {
        self.photos.get(index).copied().unwrap_or(false)
    }

    pub fn photos(&self) -> &[bool] {
        &self.photos
    }

    pub fn steps(&self) -> &[String] {
        &self.steps
    }
}
