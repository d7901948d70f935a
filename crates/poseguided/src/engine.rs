use poseguide_core::{
    FaceObservation, GuidanceConfig, GuidanceEvent, GuidanceSession, GuidanceSnapshot,
    RuleCatalog, SessionError,
};
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers and the tick task to the engine thread.
enum EngineRequest {
    Accelerometer {
        x: f32,
        y: f32,
        z: f32,
        timestamp_ms: u64,
    },
    Gyroscope {
        x: f32,
        y: f32,
        z: f32,
        timestamp_ms: u64,
    },
    Face {
        observation: Option<FaceObservation>,
        frame_width: f32,
        frame_height: f32,
    },
    Viewport {
        width: f32,
        height: f32,
    },
    CameraReady(bool),
    Tick,
    Snapshot {
        reply: oneshot::Sender<GuidanceSnapshot>,
    },
    AdvanceToStep {
        index: usize,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    DeletePhoto {
        index: usize,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    ReportCaptureResult {
        step: String,
        ok: bool,
        error: Option<String>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    TriggerCapture {
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Pause,
    Resume,
    Reset,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn send(&self, req: EngineRequest) -> Result<(), EngineError> {
        self.tx.send(req).await.map_err(|_| EngineError::ChannelClosed)
    }

    async fn call(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<(), EngineError>>) -> EngineRequest,
    ) -> Result<(), EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(make(reply_tx)).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    pub async fn feed_accelerometer(
        &self,
        x: f32,
        y: f32,
        z: f32,
        timestamp_ms: u64,
    ) -> Result<(), EngineError> {
        self.send(EngineRequest::Accelerometer {
            x,
            y,
            z,
            timestamp_ms,
        })
        .await
    }

    pub async fn feed_gyroscope(
        &self,
        x: f32,
        y: f32,
        z: f32,
        timestamp_ms: u64,
    ) -> Result<(), EngineError> {
        self.send(EngineRequest::Gyroscope {
            x,
            y,
            z,
            timestamp_ms,
        })
        .await
    }

    pub async fn feed_face_observation(
        &self,
        observation: Option<FaceObservation>,
        frame_width: f32,
        frame_height: f32,
    ) -> Result<(), EngineError> {
        self.send(EngineRequest::Face {
            observation,
            frame_width,
            frame_height,
        })
        .await
    }

    pub async fn set_viewport_size(&self, width: f32, height: f32) -> Result<(), EngineError> {
        self.send(EngineRequest::Viewport { width, height }).await
    }

    pub async fn set_camera_ready(&self, ready: bool) -> Result<(), EngineError> {
        self.send(EngineRequest::CameraReady(ready)).await
    }

    pub async fn tick(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Tick).await
    }

    pub async fn snapshot(&self) -> Result<GuidanceSnapshot, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(EngineRequest::Snapshot { reply: reply_tx }).await?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    pub async fn advance_to_step(&self, index: usize) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::AdvanceToStep { index, reply })
            .await
    }

    pub async fn delete_photo(&self, index: usize) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::DeletePhoto { index, reply })
            .await
    }

    pub async fn report_capture_result(
        &self,
        step: String,
        ok: bool,
        error: Option<String>,
    ) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::ReportCaptureResult {
            step,
            ok,
            error,
            reply,
        })
        .await
    }

    pub async fn trigger_capture(&self) -> Result<(), EngineError> {
        self.call(|reply| EngineRequest::TriggerCapture { reply })
            .await
    }

    pub async fn pause(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Pause).await
    }

    pub async fn resume(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Resume).await
    }

    pub async fn reset(&self) -> Result<(), EngineError> {
        self.send(EngineRequest::Reset).await
    }
}

/// Spawn the guidance session on a dedicated OS thread.
///
/// Returns the request handle and the receiving end of the session's
/// event stream. The thread exits once every handle has been dropped.
pub fn spawn_engine(
    catalog: RuleCatalog,
    config: GuidanceConfig,
    event_buffer: usize,
) -> Result<(EngineHandle, mpsc::Receiver<GuidanceEvent>), EngineError> {
    let steps = catalog.len();
    let mut session = GuidanceSession::new(catalog, config);
    tracing::info!(steps, "guidance session created");

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(64);
    let (events_tx, events_rx) = mpsc::channel::<GuidanceEvent>(event_buffer);

    std::thread::Builder::new()
        .name("poseguide-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                let events = handle_request(&mut session, req);
                for event in events {
                    if events_tx.blocking_send(event).is_err() {
                        tracing::debug!("event receiver dropped");
                        break;
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, events_rx))
}

/// Apply one request to the session, answering any reply channel.
fn handle_request(session: &mut GuidanceSession, req: EngineRequest) -> Vec<GuidanceEvent> {
    match req {
        EngineRequest::Accelerometer {
            x,
            y,
            z,
            timestamp_ms,
        } => {
            session.feed_accelerometer(x, y, z, timestamp_ms);
            Vec::new()
        }
        EngineRequest::Gyroscope {
            x,
            y,
            z,
            timestamp_ms,
        } => {
            session.feed_gyroscope(x, y, z, timestamp_ms);
            Vec::new()
        }
        EngineRequest::Face {
            observation,
            frame_width,
            frame_height,
        } => {
            session.feed_face_observation(observation, frame_width, frame_height);
            Vec::new()
        }
        EngineRequest::Viewport { width, height } => {
            session.set_viewport_size(width, height);
            Vec::new()
        }
        EngineRequest::CameraReady(ready) => {
            session.set_camera_ready(ready);
            Vec::new()
        }
        EngineRequest::Tick => session.tick(Instant::now()),
        EngineRequest::Snapshot { reply } => {
            let _ = reply.send(session.snapshot());
            Vec::new()
        }
        EngineRequest::AdvanceToStep { index, reply } => reply_with(reply, session.advance_to_step(index)),
        EngineRequest::DeletePhoto { index, reply } => reply_with(reply, session.delete_photo(index)),
        EngineRequest::ReportCaptureResult {
            step,
            ok,
            error,
            reply,
        } => reply_with(reply, session.report_capture_result(&step, ok, error)),
        EngineRequest::TriggerCapture { reply } => reply_with(reply, session.trigger_capture()),
        EngineRequest::Pause => session.pause(),
        EngineRequest::Resume => {
            session.resume();
            Vec::new()
        }
        EngineRequest::Reset => session.reset(),
    }
}

fn reply_with(
    reply: oneshot::Sender<Result<(), EngineError>>,
    result: Result<Vec<GuidanceEvent>, SessionError>,
) -> Vec<GuidanceEvent> {
    match result {
        Ok(events) => {
            let _ = reply.send(Ok(()));
            events
        }
        Err(e) => {
            tracing::warn!(error = %e, "session command rejected");
            let _ = reply.send(Err(e.into()));
            Vec::new()
        }
    }
}
