use crate::engine::{EngineError, EngineHandle};
use poseguide_core::{CaptureEvent, FaceObservation, GuidanceEvent, SessionError};
use zbus::interface;
use zbus::object_server::SignalEmitter;

pub const OBJECT_PATH: &str = "/org/poseguide/Guidance1";

/// D-Bus interface for the capture guidance daemon.
///
/// Bus name: org.poseguide.Guidance1
/// Object path: /org/poseguide/Guidance1
pub struct GuidanceService {
    pub engine: EngineHandle,
}

fn engine_err(e: EngineError) -> zbus::fdo::Error {
    match e {
        EngineError::Session(SessionError::Capture(err)) => {
            zbus::fdo::Error::InvalidArgs(err.to_string())
        }
        other => zbus::fdo::Error::Failed(other.to_string()),
    }
}

#[interface(name = "org.poseguide.Guidance1")]
impl GuidanceService {
    /// Accelerometer sample in g, timestamp in milliseconds.
    async fn feed_accelerometer(
        &self,
        x: f64,
        y: f64,
        z: f64,
        timestamp_ms: u64,
    ) -> zbus::fdo::Result<()> {
        self.engine
            .feed_accelerometer(x as f32, y as f32, z as f32, timestamp_ms)
            .await
            .map_err(engine_err)
    }

    /// Gyroscope sample in rad/s, timestamp in milliseconds.
    async fn feed_gyroscope(
        &self,
        x: f64,
        y: f64,
        z: f64,
        timestamp_ms: u64,
    ) -> zbus::fdo::Result<()> {
        self.engine
            .feed_gyroscope(x as f32, y as f32, z as f32, timestamp_ms)
            .await
            .map_err(engine_err)
    }

    /// Face observation as JSON; an empty string means no face was found.
    async fn feed_face_observation(
        &self,
        observation: &str,
        frame_width: f64,
        frame_height: f64,
    ) -> zbus::fdo::Result<()> {
        let observation = if observation.trim().is_empty() {
            None
        } else {
            let face: FaceObservation = serde_json::from_str(observation)
                .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad observation: {e}")))?;
            Some(face)
        };
        self.engine
            .feed_face_observation(observation, frame_width as f32, frame_height as f32)
            .await
            .map_err(engine_err)
    }

    async fn set_viewport_size(&self, width: f64, height: f64) -> zbus::fdo::Result<()> {
        self.engine
            .set_viewport_size(width as f32, height as f32)
            .await
            .map_err(engine_err)
    }

    async fn set_camera_ready(&self, ready: bool) -> zbus::fdo::Result<()> {
        self.engine.set_camera_ready(ready).await.map_err(engine_err)
    }

    /// Current guidance snapshot as JSON.
    async fn get_guidance_snapshot(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.engine.snapshot().await.map_err(engine_err)?;
        serde_json::to_string(&snapshot).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    async fn advance_to_step(&self, index: u32) -> zbus::fdo::Result<()> {
        tracing::info!(index, "advance_to_step requested");
        self.engine
            .advance_to_step(index as usize)
            .await
            .map_err(engine_err)
    }

    async fn reset(&self) -> zbus::fdo::Result<()> {
        tracing::info!("reset requested");
        self.engine.reset().await.map_err(engine_err)
    }

    /// Outcome of a capture the daemon asked for. `error` may be empty.
    async fn report_capture_result(
        &self,
        step_id: &str,
        ok: bool,
        error: &str,
    ) -> zbus::fdo::Result<()> {
        tracing::info!(step = step_id, ok, "capture result reported");
        let error = (!error.is_empty()).then(|| error.to_string());
        self.engine
            .report_capture_result(step_id.to_string(), ok, error)
            .await
            .map_err(engine_err)
    }

    async fn trigger_capture(&self) -> zbus::fdo::Result<()> {
        self.engine.trigger_capture().await.map_err(engine_err)
    }

    async fn delete_photo(&self, index: u32) -> zbus::fdo::Result<()> {
        tracing::info!(index, "delete_photo requested");
        self.engine
            .delete_photo(index as usize)
            .await
            .map_err(engine_err)
    }

    async fn pause(&self) -> zbus::fdo::Result<()> {
        self.engine.pause().await.map_err(engine_err)
    }

    async fn resume(&self) -> zbus::fdo::Result<()> {
        self.engine.resume().await.map_err(engine_err)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let snapshot = self.engine.snapshot().await.map_err(engine_err)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "step": snapshot.step_id,
            "step_index": snapshot.step_index,
            "step_count": snapshot.step_count,
            "camera_ready": snapshot.camera_ready,
            "paused": snapshot.is_paused,
            "complete": snapshot.is_complete,
        })
        .to_string())
    }

    /// The host must take the photo for `step_id` and report back.
    #[zbus(signal)]
    async fn capture_requested(emitter: &SignalEmitter<'_>, step_id: &str) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn countdown_tick(
        emitter: &SignalEmitter<'_>,
        step_id: &str,
        remaining: u32,
    ) -> zbus::Result<()>;

    #[zbus(signal)]
    async fn speak_hint(emitter: &SignalEmitter<'_>, step_id: &str, hint: &str) -> zbus::Result<()>;

    /// Every session event, JSON encoded.
    #[zbus(signal)]
    async fn guidance_event(emitter: &SignalEmitter<'_>, event: &str) -> zbus::Result<()>;
}

/// Dedicated signal carried by a session event, besides `GuidanceEvent`.
#[derive(Debug, PartialEq)]
pub enum DedicatedSignal<'a> {
    CaptureRequested { step: &'a str },
    CountdownTick { step: &'a str, remaining: u32 },
    SpeakHint { step: &'a str, hint: &'a str },
}

pub fn dedicated_signal(event: &GuidanceEvent) -> Option<DedicatedSignal<'_>> {
    match event {
        GuidanceEvent::Capture(CaptureEvent::CaptureRequested { step }) => {
            Some(DedicatedSignal::CaptureRequested { step })
        }
        GuidanceEvent::Capture(CaptureEvent::CountdownTick { step, remaining }) => {
            Some(DedicatedSignal::CountdownTick {
                step,
                remaining: *remaining,
            })
        }
        GuidanceEvent::Speak(speak) => Some(DedicatedSignal::SpeakHint {
            step: &speak.step,
            hint: &speak.hint,
        }),
        _ => None,
    }
}

/// JSON payload of the `GuidanceEvent` signal.
pub fn encode_event(event: &GuidanceEvent) -> serde_json::Result<String> {
    serde_json::to_string(event)
}

/// Emit the D-Bus signals for one session event.
pub async fn emit_event(emitter: &SignalEmitter<'_>, event: &GuidanceEvent) -> zbus::Result<()> {
    match dedicated_signal(event) {
        Some(DedicatedSignal::CaptureRequested { step }) => {
            GuidanceService::capture_requested(emitter, step).await?;
        }
        Some(DedicatedSignal::CountdownTick { step, remaining }) => {
            GuidanceService::countdown_tick(emitter, step, remaining).await?;
        }
        Some(DedicatedSignal::SpeakHint { step, hint }) => {
            GuidanceService::speak_hint(emitter, step, hint).await?;
        }
        None => {}
    }
    match encode_event(event) {
        Ok(json) => GuidanceService::guidance_event(emitter, &json).await,
        Err(e) => {
            tracing::warn!(error = %e, "failed to encode guidance event");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use poseguide_core::session::SpeakHint;

    #[test]
    fn test_capture_request_maps_to_signal() {
        let event = GuidanceEvent::Capture(CaptureEvent::CaptureRequested {
            step: "front".into(),
        });
        assert_eq!(
            dedicated_signal(&event),
            Some(DedicatedSignal::CaptureRequested { step: "front" })
        );
        assert_eq!(
            encode_event(&event).unwrap(),
            r#"{"event":"capture_requested","step":"front"}"#
        );
    }

    #[test]
    fn test_countdown_tick_maps_to_signal() {
        let event = GuidanceEvent::Capture(CaptureEvent::CountdownTick {
            step: "vertex".into(),
            remaining: 2,
        });
        assert_eq!(
            dedicated_signal(&event),
            Some(DedicatedSignal::CountdownTick {
                step: "vertex",
                remaining: 2
            })
        );
        assert_eq!(
            encode_event(&event).unwrap(),
            r#"{"event":"countdown_tick","step":"vertex","remaining":2}"#
        );
    }

    #[test]
    fn test_speak_hint_maps_to_signal() {
        let event = GuidanceEvent::Speak(SpeakHint {
            step: "front".into(),
            hint: "Telefonu sabit tut".into(),
        });
        assert_eq!(
            dedicated_signal(&event),
            Some(DedicatedSignal::SpeakHint {
                step: "front",
                hint: "Telefonu sabit tut"
            })
        );
        assert_eq!(
            encode_event(&event).unwrap(),
            r#"{"event":"speak_hint","step":"front","hint":"Telefonu sabit tut"}"#
        );
    }

    #[test]
    fn test_other_events_only_go_out_as_json() {
        let event = GuidanceEvent::Capture(CaptureEvent::SessionComplete);
        assert_eq!(dedicated_signal(&event), None);
        assert_eq!(
            encode_event(&event).unwrap(),
            r#"{"event":"session_complete"}"#
        );
    }
}
