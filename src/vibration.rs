use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Leak-integrated vibration levels derived from consecutive IMU increments.
///
/// Each metric follows `m <- 0.99 * m + 0.01 * x`, so a step change in the
/// input moves a metric by at most one percent of the input per update.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VibrationMetrics {
    coning: f32,
    gyro_high_freq: f32,
    accel_high_freq: f32,
    delta_ang_prev: Vector3<f32>,
    delta_vel_prev: Vector3<f32>,
}

impl VibrationMetrics {
    pub fn new() -> Self {
        VibrationMetrics {
            coning: 0.0,
            gyro_high_freq: 0.0,
            accel_high_freq: 0.0,
            delta_ang_prev: Vector3::zeros(),
            delta_vel_prev: Vector3::zeros(),
        }
    }

    /// Fold one IMU sample's increments into the three metrics.
    pub fn update(&mut self, delta_ang: &Vector3<f32>, delta_vel: &Vector3<f32>) {
        // coning: cross-axis coupling between consecutive angular increments
        let coning = delta_ang.cross(&self.delta_ang_prev).norm();
        self.coning = 0.99 * self.coning + 0.01 * coning;

        let gyro_diff = (delta_ang - self.delta_ang_prev).norm();
        self.delta_ang_prev = *delta_ang;
        self.gyro_high_freq = 0.99 * self.gyro_high_freq + 0.01 * gyro_diff;

        let accel_diff = (delta_vel - self.delta_vel_prev).norm();
        self.delta_vel_prev = *delta_vel;
        self.accel_high_freq = 0.99 * self.accel_high_freq + 0.01 * accel_diff;
    }

    /// [coning, high-frequency gyro, high-frequency accel]
    pub fn as_array(&self) -> [f32; 3] {
        [self.coning, self.gyro_high_freq, self.accel_high_freq]
    }
}

impl Default for VibrationMetrics {
    fn default() -> Self {
        Self::new()
    }
}
