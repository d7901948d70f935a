//! Device orientation from accelerometer + gyroscope.
//!
//! A complementary filter blends gyro-predicted angles (smooth, drifting)
//! with accelerometer tilt (noisy, drift-free), followed by an exponential
//! smoothing pass. Yaw has no absolute reference and is integrated from the
//! gyroscope only.
//!
//! One estimator owns its own state; there are no process-wide sensor
//! subscriptions. The latest [`DeviceAngle`] is published through a
//! snapshot so any number of readers can observe it without blocking the
//! sensor callback.

use crate::snapshot::{snapshot, SnapshotPublisher, SnapshotReader};
use crate::types::{DeviceAngle, OrientationLabel};
use serde::{Deserialize, Serialize};

/// Tuning for [`OrientationEstimator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Complementary filter weight on the gyro-predicted angle.
    pub alpha: f32,
    /// Weight kept from the previous fused value in the smoothing pass.
    pub smoothing_weight: f32,
    /// Max raw-vs-smoothed difference (degrees) for a "stable" tick.
    pub stability_threshold_deg: f32,
    /// Sensor update interval; also the integration step for the first sample.
    pub nominal_interval_ms: u64,
    /// Longest integration step accepted after a sensor gap.
    pub max_step_ms: u64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            alpha: 0.7,
            smoothing_weight: 0.3,
            stability_threshold_deg: 1.2,
            nominal_interval_ms: 50,
            max_step_ms: 250,
        }
    }
}

/// Gyro angular rates in degrees per second.
#[derive(Debug, Clone, Copy, Default)]
struct GyroRates {
    pitch: f32,
    roll: f32,
    yaw: f32,
}

/// Complementary-filter device orientation estimator.
pub struct OrientationEstimator {
    config: EstimatorConfig,
    running: bool,
    fused_pitch: f32,
    fused_roll: f32,
    fused_yaw: f32,
    rates: GyroRates,
    last_accel_ms: Option<u64>,
    last_gyro_ms: Option<u64>,
    stable_since_ms: Option<u64>,
    publisher: SnapshotPublisher<DeviceAngle>,
}

impl OrientationEstimator {
    /// Create a stopped estimator. Call [`start`](Self::start) before feeding samples.
    pub fn new(config: EstimatorConfig) -> Self {
        let (publisher, _) = snapshot(DeviceAngle::default());
        Self {
            config,
            running: false,
            fused_pitch: 0.0,
            fused_roll: 0.0,
            fused_yaw: 0.0,
            rates: GyroRates::default(),
            last_accel_ms: None,
            last_gyro_ms: None,
            stable_since_ms: None,
            publisher,
        }
    }

    /// Begin accepting samples. Filter state from a previous run is kept,
    /// but the sample clocks restart so a long pause is not integrated.
    pub fn start(&mut self) {
        if self.running {
            return;
        }
        self.running = true;
        self.last_accel_ms = None;
        self.last_gyro_ms = None;
        self.stable_since_ms = None;
        tracing::debug!("orientation estimator started");
    }

    /// Stop accepting samples. The last published angle stays readable.
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        self.running = false;
        self.rates = GyroRates::default();
        tracing::debug!("orientation estimator stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Handle for readers of the published angle.
    pub fn subscribe(&self) -> SnapshotReader<DeviceAngle> {
        self.publisher.reader()
    }

    /// Latest published angle.
    pub fn current_angle(&self) -> DeviceAngle {
        *self.publisher.reader().load()
    }

    /// Gyroscope sample in rad/s. Updates the rates used by the next
    /// accelerometer tick and integrates yaw.
    pub fn ingest_gyroscope(&mut self, x: f32, y: f32, z: f32, timestamp_ms: u64) {
        if !self.running {
            return;
        }
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            tracing::debug!(x, y, z, "dropping non-finite gyroscope sample");
            return;
        }

        let dt = self.step_seconds(self.last_gyro_ms, timestamp_ms);
        self.last_gyro_ms = Some(timestamp_ms);

        self.rates = GyroRates {
            pitch: x.to_degrees(),
            roll: y.to_degrees(),
            yaw: z.to_degrees(),
        };
        self.fused_yaw += self.rates.yaw * dt;
        tracing::trace!(yaw = self.fused_yaw, dt, "gyroscope sample");
    }

    /// Accelerometer sample in g. Runs the fusion step and publishes a new
    /// [`DeviceAngle`].
    pub fn ingest_accelerometer(&mut self, x: f32, y: f32, z: f32, timestamp_ms: u64) {
        if !self.running {
            return;
        }
        if !(x.is_finite() && y.is_finite() && z.is_finite()) {
            tracing::debug!(x, y, z, "dropping non-finite accelerometer sample");
            return;
        }

        let accel_pitch = (-x).atan2((y * y + z * z).sqrt()).to_degrees();
        let accel_roll = y.atan2(z).to_degrees();

        let dt = self.step_seconds(self.last_accel_ms, timestamp_ms);
        self.last_accel_ms = Some(timestamp_ms);

        let alpha = self.config.alpha;
        let raw_pitch =
            alpha * (self.fused_pitch + self.rates.pitch * dt) + (1.0 - alpha) * accel_pitch;
        let raw_roll =
            alpha * (self.fused_roll + self.rates.roll * dt) + (1.0 - alpha) * accel_roll;

        self.fused_pitch = self.smooth(self.fused_pitch, raw_pitch);
        self.fused_roll = self.smooth(self.fused_roll, raw_roll);

        let threshold = self.config.stability_threshold_deg;
        let stable_now = (self.fused_pitch - raw_pitch).abs() < threshold
            && (self.fused_roll - raw_roll).abs() < threshold;

        let stability_duration = if stable_now {
            let since = *self.stable_since_ms.get_or_insert(timestamp_ms);
            timestamp_ms.saturating_sub(since) as f32 / 1000.0
        } else {
            self.stable_since_ms = None;
            0.0
        };

        let angle = DeviceAngle {
            pitch: self.fused_pitch,
            roll: self.fused_roll,
            yaw: self.fused_yaw,
            z_axis: z,
            is_stable: stable_now,
            stability_duration,
            orientation_label: OrientationLabel::classify(z, self.fused_roll, self.fused_pitch),
        };
        tracing::trace!(
            pitch = angle.pitch,
            roll = angle.roll,
            z = angle.z_axis,
            stable = angle.is_stable,
            "accelerometer sample"
        );
        self.publisher.publish(angle);
    }

    fn smooth(&self, prev: f32, next: f32) -> f32 {
        let w = self.config.smoothing_weight;
        prev * w + next * (1.0 - w)
    }

    /// Integration step in seconds, nominal for the first sample and
    /// capped after gaps. Timestamps that go backwards yield zero.
    fn step_seconds(&self, last_ms: Option<u64>, now_ms: u64) -> f32 {
        let elapsed_ms = match last_ms {
            None => self.config.nominal_interval_ms,
            Some(prev) => now_ms.saturating_sub(prev).min(self.config.max_step_ms),
        };
        elapsed_ms as f32 / 1000.0
    }
}

impl Default for OrientationEstimator {
    fn default() -> Self {
        Self::new(EstimatorConfig::default())
    }
}
