//! Sensor ingest and delay buffering ahead of an attitude/position EKF.
//!
//! Asynchronous IMU and aiding-sensor streams arrive at heterogeneous rates
//! and transport delays; this crate timestamps them onto a common delayed
//! fusion horizon, down-samples the IMU into prediction steps, rate-limits
//! each aiding stream and queues everything in fixed-capacity ring buffers
//! sized from the worst-case delay.

pub mod frontend;
pub mod map_projection;
pub mod ring_buffer;
pub mod status;
pub mod types;
pub mod vibration;

pub use frontend::{
    FrontEndConfig, SensorFrontEnd, VDistSensor, FILTER_UPDATE_PERIOD_MS, MASK_USE_DRAG,
    MASK_USE_GPS,
};
pub use map_projection::MapProjection;
pub use ring_buffer::RingBuffer;
pub use status::{BufferReport, FrontEndReport};
pub use vibration::VibrationMetrics;
