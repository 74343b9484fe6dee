use nalgebra::{UnitQuaternion, Vector2, Vector3};
use serde::{Deserialize, Serialize};

/// Buffered records expose their time of validity so the ring buffer can run
/// "first older than" lookups without knowing the concrete record type.
pub trait TimedSample {
    fn time_us(&self) -> u64;
}

macro_rules! impl_timed_sample {
    ($($t:ty),+ $(,)?) => {$(
        impl TimedSample for $t {
            fn time_us(&self) -> u64 {
                self.time_us
            }
        }
    )+};
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImuSample {
    /// Angular increment over the sample interval [rad]
    pub delta_ang: Vector3<f32>,
    /// Velocity increment over the sample interval [m/s]
    pub delta_vel: Vector3<f32>,
    /// Integration period of delta_ang [s]
    pub delta_ang_dt: f32,
    /// Integration period of delta_vel [s]
    pub delta_vel_dt: f32,
    pub time_us: u64,
}

impl Default for ImuSample {
    fn default() -> Self {
        ImuSample {
            delta_ang: Vector3::zeros(),
            delta_vel: Vector3::zeros(),
            delta_ang_dt: 0.0,
            delta_vel_dt: 0.0,
            time_us: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MagSample {
    /// Body-frame field measurement, unit as delivered by the sensor
    pub mag: Vector3<f32>,
    pub time_us: u64,
}

impl Default for MagSample {
    fn default() -> Self {
        MagSample {
            mag: Vector3::zeros(),
            time_us: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsSample {
    /// NED velocity [m/s]
    pub vel: Vector3<f32>,
    /// Local tangent-plane position (north, east) [m], zero until an origin is set
    pub pos: Vector2<f32>,
    /// Height above the ellipsoid [m]
    pub hgt: f32,
    /// Horizontal position accuracy [m]
    pub hacc: f32,
    /// Vertical position accuracy [m]
    pub vacc: f32,
    /// Speed accuracy [m/s]
    pub sacc: f32,
    pub time_us: u64,
}

impl Default for GpsSample {
    fn default() -> Self {
        GpsSample {
            vel: Vector3::zeros(),
            pos: Vector2::zeros(),
            hgt: 0.0,
            hacc: 0.0,
            vacc: 0.0,
            sacc: 0.0,
            time_us: 0,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BaroSample {
    /// Pressure altitude [m]
    pub hgt: f32,
    pub time_us: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AirspeedSample {
    pub true_airspeed: f32,
    /// Equivalent-to-true airspeed conversion ratio
    pub eas2tas: f32,
    pub time_us: u64,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct RangeSample {
    /// Distance to ground along the sensor axis [m]
    pub rng: f32,
    pub time_us: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowSample {
    /// Measured flow angle delta; rad/s in the derived-gyro branch, rad otherwise
    pub flow_rad_xy: Vector2<f32>,
    /// Body-motion compensated line-of-sight delta [rad]
    pub flow_rad_xy_comp: Vector2<f32>,
    /// Body rates over the integration period
    pub gyro_xyz: Vector3<f32>,
    /// Sensor quality metric, 0..255
    pub quality: u8,
    /// Integration period [s]
    pub dt: f32,
    pub time_us: u64,
}

impl Default for FlowSample {
    fn default() -> Self {
        FlowSample {
            flow_rad_xy: Vector2::zeros(),
            flow_rad_xy_comp: Vector2::zeros(),
            gyro_xyz: Vector3::zeros(),
            quality: 0,
            dt: 0.0,
            time_us: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtVisionSample {
    /// Body-to-NED orientation reported by the vision system
    pub quat: UnitQuaternion<f32>,
    /// NED position [m]
    pub pos_ned: Vector3<f32>,
    /// 1-sigma angular error estimate [rad]
    pub ang_err: f32,
    /// 1-sigma position error estimate [m]
    pub pos_err: f32,
    pub time_us: u64,
}

impl Default for ExtVisionSample {
    fn default() -> Self {
        ExtVisionSample {
            quat: UnitQuaternion::identity(),
            pos_ned: Vector3::zeros(),
            ang_err: 0.0,
            pos_err: 0.0,
            time_us: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuxVelSample {
    /// North/east velocity [m/s]
    pub vel_ne: Vector2<f32>,
    /// Per-axis velocity variance [(m/s)^2]
    pub vel_var_ne: Vector2<f32>,
    pub time_us: u64,
}

impl Default for AuxVelSample {
    fn default() -> Self {
        AuxVelSample {
            vel_ne: Vector2::zeros(),
            vel_var_ne: Vector2::zeros(),
            time_us: 0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DragSample {
    /// Mean XY specific force over the down-sample window [m/s^2]
    pub accel_xy: Vector2<f32>,
    pub time_us: u64,
}

impl Default for DragSample {
    fn default() -> Self {
        DragSample {
            accel_xy: Vector2::zeros(),
            time_us: 0,
        }
    }
}

/// Predicted output state at the current time horizon, written by the
/// downstream output predictor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutputSample {
    pub quat_nominal: UnitQuaternion<f32>,
    pub vel: Vector3<f32>,
    pub pos: Vector3<f32>,
    pub time_us: u64,
}

impl Default for OutputSample {
    fn default() -> Self {
        OutputSample {
            quat_nominal: UnitQuaternion::identity(),
            vel: Vector3::zeros(),
            pos: Vector3::zeros(),
            time_us: 0,
        }
    }
}

/// Vertical-channel companion to [`OutputSample`], tracked at full rate.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct OutputVertSample {
    pub vert_vel: f32,
    pub vert_vel_integ: f32,
    pub dt: f32,
    pub time_us: u64,
}

impl_timed_sample!(
    ImuSample,
    MagSample,
    GpsSample,
    BaroSample,
    AirspeedSample,
    RangeSample,
    FlowSample,
    ExtVisionSample,
    AuxVelSample,
    DragSample,
    OutputSample,
    OutputVertSample,
);

/// Raw GPS receiver report as handed in by the host.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GpsMessage {
    /// Receiver time of validity [µs]
    pub time_usec: u64,
    /// Latitude [deg * 1e7]
    pub lat: i32,
    /// Longitude [deg * 1e7]
    pub lon: i32,
    /// Altitude above the ellipsoid [mm]
    pub alt: i32,
    /// NED velocity [m/s]
    pub vel_ned: Vector3<f32>,
    pub vel_ned_valid: bool,
    /// 0..1: no fix, 2: 2D, 3: 3D, higher: differential/RTK
    pub fix_type: u8,
    /// Horizontal position accuracy [m]
    pub eph: f32,
    /// Vertical position accuracy [m]
    pub epv: f32,
    /// Speed accuracy [m/s]
    pub sacc: f32,
}

/// Raw optical-flow report covering one integration period.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FlowMessage {
    /// Sensor quality metric, 0..255
    pub quality: u8,
    /// Integration period [µs]
    pub dt: u32,
    /// Integrated flow angles about body X/Y [rad]
    pub flow_data: Vector2<f32>,
    /// Gyro angles integrated by the sensor over the same period; NaN when the
    /// sensor carries no gyro
    pub gyro_data: Vector3<f32>,
}

/// Pose report from an external vision system.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ExtVisionMessage {
    pub quat: UnitQuaternion<f32>,
    pub pos_ned: Vector3<f32>,
    pub ang_err: f32,
    pub pos_err: f32,
}
