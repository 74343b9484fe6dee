// Sensor ingest and delay buffering ahead of the fusion core.
//
// Accepts asynchronous sensor streams at heterogeneous rates, normalizes their
// timestamps onto the delayed fusion time horizon, and queues them in
// fixed-capacity ring buffers sized from the worst-case transport delay. The
// fusion core behind it reads the oldest IMU sample as its prediction step and
// looks aiding observations up by time of validity.

use log::{error, info};
use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

use crate::map_projection::MapProjection;
use crate::ring_buffer::RingBuffer;
use crate::status::{BufferReport, FrontEndReport};
use crate::types::{
    AirspeedSample, AuxVelSample, BaroSample, DragSample, ExtVisionMessage, ExtVisionSample,
    FlowMessage, FlowSample, GpsMessage, GpsSample, ImuSample, MagSample, OutputSample,
    OutputVertSample, RangeSample,
};
use crate::vibration::VibrationMetrics;

/// Fusion tick length. Buffer sizing and the half-period timestamp centering
/// are derived from this.
pub const FILTER_UPDATE_PERIOD_MS: u64 = 10;
pub const FILTER_UPDATE_PERIOD_S: f32 = FILTER_UPDATE_PERIOD_MS as f32 / 1e3;

/// Enable GPS ingestion
pub const MASK_USE_GPS: u32 = 1 << 0;
/// Enable the drag specific-force down-sampler
pub const MASK_USE_DRAG: u32 = 1 << 1;

/// Primary source of height observations. Selecting `Gps` also enables GPS
/// ingestion independently of the fusion-mode mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VDistSensor {
    Baro,
    Gps,
    Range,
    ExtVision,
}

// ─── Configuration ───────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FrontEndConfig {
    // ── Transport delay from measurement to arrival, per stream [ms] ──
    pub mag_delay_ms: u32,
    pub baro_delay_ms: u32,
    pub gps_delay_ms: u32,
    pub airspeed_delay_ms: u32,
    pub flow_delay_ms: u32,
    pub range_delay_ms: u32,
    pub ev_delay_ms: u32,
    pub auxvel_delay_ms: u32,
    /// Lower bound applied to the worst-case delay during buffer sizing [ms]
    pub min_delay_ms: u32,

    /// Shortest expected interval between aiding observations [ms], >= 1
    pub sensor_interval_min_ms: u32,

    /// Bitmask of MASK_USE_* flags
    pub fusion_mode: u32,
    pub vdist_sensor_type: VDistSensor,

    // ── Optical-flow acceptance gates ──
    /// Minimum sensor quality metric, 0..255
    pub flow_qual_min: u8,
    /// Maximum angular flow rate the sensor can measure [rad/s]
    pub flow_rate_max: f32,
}

impl Default for FrontEndConfig {
    fn default() -> Self {
        Self {
            mag_delay_ms: 0,
            baro_delay_ms: 0,
            gps_delay_ms: 110,
            airspeed_delay_ms: 100,
            flow_delay_ms: 5,
            range_delay_ms: 5,
            ev_delay_ms: 175,
            auxvel_delay_ms: 0,
            min_delay_ms: 0,
            sensor_interval_min_ms: 20,
            fusion_mode: MASK_USE_GPS,
            vdist_sensor_type: VDistSensor::Baro,
            flow_qual_min: 1,
            flow_rate_max: 2.5,
        }
    }
}

// ─── The front-end ───────────────────────────────────────────────────────────

/// Owns every stream buffer plus the IMU down-sampling state. Single logical
/// worker: the host serializes all `feed_*` calls with the fusion loop.
pub struct SensorFrontEnd {
    config: FrontEndConfig,

    // Sample buffers
    imu_buffer: RingBuffer<ImuSample>,
    gps_buffer: RingBuffer<GpsSample>,
    mag_buffer: RingBuffer<MagSample>,
    baro_buffer: RingBuffer<BaroSample>,
    range_buffer: RingBuffer<RangeSample>,
    airspeed_buffer: RingBuffer<AirspeedSample>,
    flow_buffer: RingBuffer<FlowSample>,
    ext_vision_buffer: RingBuffer<ExtVisionSample>,
    drag_buffer: RingBuffer<DragSample>,
    auxvel_buffer: RingBuffer<AuxVelSample>,
    output_buffer: RingBuffer<OutputSample>,
    output_vert_buffer: RingBuffer<OutputVertSample>,

    // Sticky allocation failures; a failed stream stays disabled
    gps_buffer_fail: bool,
    mag_buffer_fail: bool,
    baro_buffer_fail: bool,
    range_buffer_fail: bool,
    airspeed_buffer_fail: bool,
    flow_buffer_fail: bool,
    ev_buffer_fail: bool,
    drag_buffer_fail: bool,
    auxvel_buffer_fail: bool,

    // Buffer sizing
    imu_buffer_length: usize,
    obs_buffer_length: usize,
    /// Shortest observation spacing that cannot lose data to overwrites [µs]
    min_obs_interval_us: u64,

    // IMU accumulation and down-sampling
    initialised: bool,
    time_last_imu: u64,
    dt_imu_avg: f32,
    imu_ticks: u32,
    imu_updated: bool,
    imu_sample_new: ImuSample,
    imu_sample_delayed: ImuSample,
    imu_down_sampled: ImuSample,
    vibe: VibrationMetrics,

    // Drag down-sampling
    drag_down_sampled: DragSample,
    drag_sample_count: u32,
    drag_sample_time_dt: f32,

    // Arrival time of the last accepted sample, per stream
    time_last_mag: u64,
    time_last_gps: u64,
    time_last_baro: u64,
    time_last_range: u64,
    time_last_airspeed: u64,
    time_last_optflow: u64,
    time_last_ext_vision: u64,
    time_last_auxvel: u64,

    // State fed by collaborators
    pos_ref: Option<MapProjection>,
    gps_speed_valid: bool,
    in_air: bool,
    deadreckon_time_exceeded: bool,
    fault_status: u32,
}

/// One-shot lazy allocation with a sticky failure flag. Logs a single error
/// per buffer; a failed buffer is never retried.
fn ensure_allocated<T: Clone + Default>(
    buffer: &mut RingBuffer<T>,
    fail: &mut bool,
    length: usize,
    name: &str,
) -> bool {
    if buffer.capacity() < length {
        *fail = !buffer.allocate(length);
        if *fail {
            error!("{} buffer allocation failed", name);
            return false;
        }
    }
    true
}

impl SensorFrontEnd {
    pub fn new(config: FrontEndConfig) -> Self {
        SensorFrontEnd {
            config,
            imu_buffer: RingBuffer::new(),
            gps_buffer: RingBuffer::new(),
            mag_buffer: RingBuffer::new(),
            baro_buffer: RingBuffer::new(),
            range_buffer: RingBuffer::new(),
            airspeed_buffer: RingBuffer::new(),
            flow_buffer: RingBuffer::new(),
            ext_vision_buffer: RingBuffer::new(),
            drag_buffer: RingBuffer::new(),
            auxvel_buffer: RingBuffer::new(),
            output_buffer: RingBuffer::new(),
            output_vert_buffer: RingBuffer::new(),
            gps_buffer_fail: false,
            mag_buffer_fail: false,
            baro_buffer_fail: false,
            range_buffer_fail: false,
            airspeed_buffer_fail: false,
            flow_buffer_fail: false,
            ev_buffer_fail: false,
            drag_buffer_fail: false,
            auxvel_buffer_fail: false,
            imu_buffer_length: 0,
            obs_buffer_length: 0,
            min_obs_interval_us: 0,
            initialised: false,
            time_last_imu: 0,
            dt_imu_avg: 0.0,
            imu_ticks: 0,
            imu_updated: false,
            imu_sample_new: ImuSample::default(),
            imu_sample_delayed: ImuSample::default(),
            imu_down_sampled: ImuSample::default(),
            vibe: VibrationMetrics::new(),
            drag_down_sampled: DragSample::default(),
            drag_sample_count: 0,
            drag_sample_time_dt: 0.0,
            time_last_mag: 0,
            time_last_gps: 0,
            time_last_baro: 0,
            time_last_range: 0,
            time_last_airspeed: 0,
            time_last_optflow: 0,
            time_last_ext_vision: 0,
            time_last_auxvel: 0,
            pos_ref: None,
            gps_speed_valid: false,
            in_air: false,
            // free-inertial until the fusion core reports otherwise
            deadreckon_time_exceeded: true,
            fault_status: 0,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Size and eagerly allocate the IMU and output buffers, then reset the
    /// ingest state. Aiding buffers are allocated lazily on first use.
    /// Returns false (with everything released) when allocation fails.
    pub fn initialise(&mut self, timestamp: u64) -> bool {
        let c = &self.config;
        let max_time_delay_ms = u64::from(
            c.mag_delay_ms
                .max(c.range_delay_ms)
                .max(c.gps_delay_ms)
                .max(c.flow_delay_ms)
                .max(c.ev_delay_ms)
                .max(c.auxvel_delay_ms)
                .max(c.min_delay_ms)
                .max(c.airspeed_delay_ms)
                .max(c.baro_delay_ms),
        );

        self.imu_buffer_length = (max_time_delay_ms / FILTER_UPDATE_PERIOD_MS) as usize + 1;

        // allow a worst-case 50% stretch of the fusion horizon under jitter
        let ekf_delay_ms = max_time_delay_ms + (max_time_delay_ms as f32 * 0.5).ceil() as u64;
        self.obs_buffer_length =
            (ekf_delay_ms / u64::from(self.config.sensor_interval_min_ms)) as usize + 1;
        self.obs_buffer_length = self.obs_buffer_length.min(self.imu_buffer_length);

        if !(self.imu_buffer.allocate(self.imu_buffer_length)
            && self.output_buffer.allocate(self.imu_buffer_length)
            && self.output_vert_buffer.allocate(self.imu_buffer_length))
        {
            error!("imu/output buffer allocation failed");
            self.unallocate_buffers();
            return false;
        }

        self.dt_imu_avg = 0.0;

        self.imu_sample_delayed = ImuSample {
            time_us: timestamp,
            ..ImuSample::default()
        };
        self.imu_sample_new = ImuSample::default();
        self.imu_down_sampled = ImuSample::default();

        self.imu_ticks = 0;
        self.imu_updated = false;
        self.initialised = false;

        self.time_last_imu = 0;
        self.time_last_gps = 0;
        self.time_last_mag = 0;
        self.time_last_baro = 0;
        self.time_last_range = 0;
        self.time_last_airspeed = 0;
        self.time_last_optflow = 0;
        self.time_last_ext_vision = 0;
        self.time_last_auxvel = 0;
        self.fault_status = 0;
        true
    }

    /// Release every buffer. The front-end must be re-initialised before it
    /// accepts data again.
    pub fn unallocate_buffers(&mut self) {
        self.imu_buffer.unallocate();
        self.gps_buffer.unallocate();
        self.mag_buffer.unallocate();
        self.baro_buffer.unallocate();
        self.range_buffer.unallocate();
        self.airspeed_buffer.unallocate();
        self.flow_buffer.unallocate();
        self.ext_vision_buffer.unallocate();
        self.drag_buffer.unallocate();
        self.auxvel_buffer.unallocate();
        self.output_buffer.unallocate();
        self.output_vert_buffer.unallocate();
    }

    // ── Sensor feeds ─────────────────────────────────────────────────────

    /// Accumulate one raw IMU sample, emitting a down-sampled prediction step
    /// into the IMU buffer whenever a full fusion interval has been covered.
    pub fn feed_imu(
        &mut self,
        time_usec: u64,
        delta_ang_dt: u64,
        delta_vel_dt: u64,
        delta_ang: Vector3<f32>,
        delta_vel: Vector3<f32>,
    ) {
        if !self.initialised {
            if !self.initialise(time_usec) {
                return;
            }
            self.initialised = true;
        }

        let dt = (time_usec.saturating_sub(self.time_last_imu) as f32 / 1e6).clamp(1.0e-4, 0.02);

        self.time_last_imu = time_usec;

        if self.time_last_imu > 0 {
            self.dt_imu_avg = 0.8 * self.dt_imu_avg + 0.2 * dt;
        }

        let mut imu_sample_new = ImuSample {
            delta_ang,
            delta_vel,
            delta_ang_dt: delta_ang_dt as f32 / 1e6,
            delta_vel_dt: delta_vel_dt as f32 / 1e6,
            time_us: time_usec,
        };
        self.imu_ticks += 1;

        self.vibe.update(&delta_ang, &delta_vel);

        if self.collect_imu(&mut imu_sample_new) {
            self.imu_buffer.push(imu_sample_new.clone());
            self.imu_ticks = 0;
            self.imu_updated = true;

            if let Some(oldest) = self.imu_buffer.oldest() {
                self.imu_sample_delayed = oldest.clone();
            }

            // the spacing below which observations would be overwritten
            // before their timestamp falls behind the fusion time horizon
            let span = imu_sample_new
                .time_us
                .saturating_sub(self.imu_sample_delayed.time_us);
            let divisor = (self.obs_buffer_length as u64).saturating_sub(1).max(1);
            self.min_obs_interval_us = span / divisor;

            self.imu_sample_new = imu_sample_new;

            if self.config.fusion_mode & MASK_USE_DRAG != 0 && !self.drag_buffer_fail {
                self.downsample_drag();
            }
        } else {
            self.imu_updated = false;
        }
    }

    /// Sum raw increments until they cover one fusion interval. On emission
    /// the passed sample is replaced by the combined increments, stamped at
    /// the end of the interval.
    fn collect_imu(&mut self, imu: &mut ImuSample) -> bool {
        self.imu_down_sampled.delta_ang += imu.delta_ang;
        self.imu_down_sampled.delta_vel += imu.delta_vel;
        self.imu_down_sampled.delta_ang_dt += imu.delta_ang_dt;
        self.imu_down_sampled.delta_vel_dt += imu.delta_vel_dt;
        self.imu_down_sampled.time_us = imu.time_us;

        if self.imu_down_sampled.delta_ang_dt >= FILTER_UPDATE_PERIOD_S {
            *imu = self.imu_down_sampled.clone();
            self.imu_down_sampled = ImuSample::default();
            return true;
        }
        false
    }

    /// Average the XY specific force carried by emitted IMU samples into a
    /// lower-rate drag observation stream.
    fn downsample_drag(&mut self) {
        if !ensure_allocated(
            &mut self.drag_buffer,
            &mut self.drag_buffer_fail,
            self.obs_buffer_length,
            "drag",
        ) {
            return;
        }

        self.drag_sample_count += 1;
        // acceleration is accumulated as a velocity increment
        self.drag_down_sampled.accel_xy.x += self.imu_sample_new.delta_vel.x;
        self.drag_down_sampled.accel_xy.y += self.imu_sample_new.delta_vel.y;
        self.drag_down_sampled.time_us += self.imu_sample_new.time_us;
        self.drag_sample_time_dt += self.imu_sample_new.delta_vel_dt;

        let min_sample_ratio =
            ((self.imu_buffer_length as f32 / self.obs_buffer_length as f32).ceil() as u32).max(5);

        if self.drag_sample_count >= min_sample_ratio {
            self.drag_down_sampled.accel_xy /= self.drag_sample_time_dt;
            self.drag_down_sampled.time_us /= u64::from(self.drag_sample_count);

            self.drag_buffer.push(self.drag_down_sampled.clone());

            self.drag_sample_count = 0;
            self.drag_down_sampled = DragSample::default();
            self.drag_sample_time_dt = 0.0;
        }
    }

    pub fn feed_mag(&mut self, time_usec: u64, mag: Vector3<f32>) {
        if !self.initialised || self.mag_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.mag_buffer,
            &mut self.mag_buffer_fail,
            self.obs_buffer_length,
            "mag",
        ) {
            return;
        }

        if time_usec.saturating_sub(self.time_last_mag) > self.min_obs_interval_us {
            let time_us = time_usec
                .saturating_sub(u64::from(self.config.mag_delay_ms) * 1000)
                .saturating_sub(FILTER_UPDATE_PERIOD_MS * 1000 / 2);
            self.time_last_mag = time_usec;

            self.mag_buffer.push(MagSample { mag, time_us });
        }
    }

    pub fn feed_gps(&mut self, time_usec: u64, gps: &GpsMessage) {
        if !self.initialised || self.gps_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.gps_buffer,
            &mut self.gps_buffer_fail,
            self.obs_buffer_length,
            "gps",
        ) {
            return;
        }

        let need_gps = (self.config.fusion_mode & MASK_USE_GPS != 0)
            || self.config.vdist_sensor_type == VDistSensor::Gps;

        if time_usec.saturating_sub(self.time_last_gps) > self.min_obs_interval_us
            && need_gps
            && gps.fix_type > 2
        {
            // time of validity comes from the receiver, the rate limit from
            // the arrival time
            let mut time_us = gps
                .time_usec
                .saturating_sub(u64::from(self.config.gps_delay_ms) * 1000)
                .saturating_sub(FILTER_UPDATE_PERIOD_MS * 1000 / 2);
            self.time_last_gps = time_usec;

            time_us = time_us.max(self.imu_sample_delayed.time_us);

            self.gps_speed_valid = gps.vel_ned_valid;

            // relative position is only meaningful once the origin is known
            let pos = match &self.pos_ref {
                Some(projection) => {
                    let (north, east) =
                        projection.project(f64::from(gps.lat) * 1e-7, f64::from(gps.lon) * 1e-7);
                    Vector2::new(north, east)
                }
                None => Vector2::zeros(),
            };

            self.gps_buffer.push(GpsSample {
                vel: gps.vel_ned,
                pos,
                hgt: gps.alt as f32 * 1e-3,
                hacc: gps.eph,
                vacc: gps.epv,
                sacc: gps.sacc,
                time_us,
            });
        }
    }

    pub fn feed_baro(&mut self, time_usec: u64, hgt: f32) {
        if !self.initialised || self.baro_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.baro_buffer,
            &mut self.baro_buffer_fail,
            self.obs_buffer_length,
            "baro",
        ) {
            return;
        }

        if time_usec.saturating_sub(self.time_last_baro) > self.min_obs_interval_us {
            let mut time_us = time_usec
                .saturating_sub(u64::from(self.config.baro_delay_ms) * 1000)
                .saturating_sub(FILTER_UPDATE_PERIOD_MS * 1000 / 2);
            self.time_last_baro = time_usec;

            // never point behind the oldest IMU sample still buffered
            time_us = time_us.max(self.imu_sample_delayed.time_us);

            self.baro_buffer.push(BaroSample { hgt, time_us });
        }
    }

    pub fn feed_airspeed(&mut self, time_usec: u64, true_airspeed: f32, eas2tas: f32) {
        if !self.initialised || self.airspeed_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.airspeed_buffer,
            &mut self.airspeed_buffer_fail,
            self.obs_buffer_length,
            "airspeed",
        ) {
            return;
        }

        if time_usec.saturating_sub(self.time_last_airspeed) > self.min_obs_interval_us {
            let time_us = time_usec
                .saturating_sub(u64::from(self.config.airspeed_delay_ms) * 1000)
                .saturating_sub(FILTER_UPDATE_PERIOD_MS * 1000 / 2);
            self.time_last_airspeed = time_usec;

            self.airspeed_buffer.push(AirspeedSample {
                true_airspeed,
                eas2tas,
                time_us,
            });
        }
    }

    pub fn feed_range(&mut self, time_usec: u64, rng: f32) {
        if !self.initialised || self.range_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.range_buffer,
            &mut self.range_buffer_fail,
            self.obs_buffer_length,
            "range",
        ) {
            return;
        }

        if time_usec.saturating_sub(self.time_last_range) > self.min_obs_interval_us {
            let time_us = time_usec.saturating_sub(u64::from(self.config.range_delay_ms) * 1000);
            self.time_last_range = time_usec;

            self.range_buffer.push(RangeSample { rng, time_us });
        }
    }

    /// Ingest one optical-flow report, fusing in gyro data for body-motion
    /// compensation. When the sensor delivers no usable gyro the matching
    /// buffered IMU sample substitutes for it.
    pub fn feed_flow(&mut self, time_usec: u64, flow: &FlowMessage) {
        if !self.initialised || self.flow_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.flow_buffer,
            &mut self.flow_buffer_fail,
            self.obs_buffer_length,
            "flow",
        ) {
            return;
        }

        if time_usec.saturating_sub(self.time_last_optflow) > self.min_obs_interval_us {
            // reject integration periods shorter than half the minimum arrival
            // interval: too much of the stream is being lost
            let mut delta_time = flow.dt as f32 * 1e-6;
            let delta_time_min = self.min_obs_interval_us as f32 * 5e-7;
            let delta_time_good = delta_time >= delta_time_min;
            if !delta_time_good {
                // keep the value usable as a divisor
                delta_time = delta_time_min;
            }

            let mut flow_magnitude_good = true;
            if delta_time_good {
                let flow_rate_magnitude = flow.flow_data.norm() / delta_time;
                flow_magnitude_good = flow_rate_magnitude <= self.config.flow_rate_max;
            }

            let flow_quality_good = flow.quality >= self.config.flow_qual_min;

            // On the ground bad quality is expected (unfocussed optics,
            // handling), so data is accepted regardless and treated as zero
            // ground-relative motion below.
            if (delta_time_good && flow_quality_good && flow_magnitude_good) || !self.in_air {
                // stamp the mid point of the integration period
                let time_us = time_usec
                    .saturating_sub(u64::from(self.config.flow_delay_ms) * 1000)
                    .saturating_sub(u64::from(flow.dt / 2));

                // The sensor gyro uses the reverse sign convention: positive
                // LOS rate here corresponds to a right-handed rotation of the
                // image about the sensor axis.
                let no_gyro = flow.gyro_data.iter().any(|v| !v.is_finite());
                let (gyro_xyz, matching_imu) = if no_gyro {
                    match self.imu_buffer.read_first_older_than(time_us) {
                        Some(imu) => {
                            let rate = imu.delta_ang / imu.delta_ang_dt;
                            (rate, Some(imu))
                        }
                        // no buffered IMU history to substitute the gyro
                        None => return,
                    }
                } else {
                    (-flow.gyro_data, None)
                };

                let flow_rad_xy = if flow_quality_good {
                    if no_gyro {
                        flow.flow_data / delta_time
                    } else {
                        -flow.flow_data
                    }
                } else if no_gyro {
                    Vector2::new(-gyro_xyz.x, -gyro_xyz.y)
                } else {
                    Vector2::new(-flow.gyro_data.x, -flow.gyro_data.y)
                };

                // compensate for body motion to obtain a LOS delta
                let (flow_rad_xy_comp, gyro_xyz) = match matching_imu {
                    Some(imu) => {
                        let comp = Vector2::new(
                            (flow_rad_xy.x + gyro_xyz.x) * delta_time,
                            (flow_rad_xy.y + gyro_xyz.y) * delta_time,
                        );
                        // scale the substituted rates back to integrated
                        // angles over the matching IMU interval; z stays a rate
                        let mut gyro = gyro_xyz;
                        gyro.x *= imu.delta_ang_dt;
                        gyro.y *= imu.delta_ang_dt;
                        (comp, gyro)
                    }
                    None => (
                        Vector2::new(flow_rad_xy.x - gyro_xyz.x, flow_rad_xy.y - gyro_xyz.y),
                        gyro_xyz,
                    ),
                };

                self.time_last_optflow = time_usec;

                self.flow_buffer.push(FlowSample {
                    flow_rad_xy,
                    flow_rad_xy_comp,
                    gyro_xyz,
                    quality: flow.quality,
                    dt: delta_time,
                    time_us,
                });
            }
        }
    }

    pub fn feed_ext_vision(&mut self, time_usec: u64, ev: &ExtVisionMessage) {
        if !self.initialised || self.ev_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.ext_vision_buffer,
            &mut self.ev_buffer_fail,
            self.obs_buffer_length,
            "ext vision",
        ) {
            return;
        }

        if time_usec.saturating_sub(self.time_last_ext_vision) > self.min_obs_interval_us {
            let time_us = time_usec.saturating_sub(u64::from(self.config.ev_delay_ms) * 1000);
            self.time_last_ext_vision = time_usec;

            self.ext_vision_buffer.push(ExtVisionSample {
                quat: ev.quat,
                pos_ned: ev.pos_ned,
                ang_err: ev.ang_err,
                pos_err: ev.pos_err,
                time_us,
            });
        }
    }

    pub fn feed_aux_vel(&mut self, time_usec: u64, vel_ne: Vector2<f32>, vel_var_ne: Vector2<f32>) {
        if !self.initialised || self.auxvel_buffer_fail {
            return;
        }
        if !ensure_allocated(
            &mut self.auxvel_buffer,
            &mut self.auxvel_buffer_fail,
            self.obs_buffer_length,
            "aux vel",
        ) {
            return;
        }

        if time_usec.saturating_sub(self.time_last_auxvel) > self.min_obs_interval_us {
            let time_us = time_usec
                .saturating_sub(u64::from(self.config.auxvel_delay_ms) * 1000)
                .saturating_sub(FILTER_UPDATE_PERIOD_MS * 1000 / 2);
            self.time_last_auxvel = time_usec;

            self.auxvel_buffer.push(AuxVelSample {
                vel_ne,
                vel_var_ne,
                time_us,
            });
        }
    }

    // ── Collaborator state ───────────────────────────────────────────────

    /// Set the WGS-84 origin of the local tangent plane. GPS samples carry a
    /// projected position from the next accepted fix onwards.
    pub fn set_origin(&mut self, lat_deg: f64, lon_deg: f64) {
        self.pos_ref = Some(MapProjection::new(lat_deg, lon_deg));
    }

    pub fn origin(&self) -> Option<&MapProjection> {
        self.pos_ref.as_ref()
    }

    /// Airframe state used by the optical-flow on-ground override.
    pub fn set_in_air_status(&mut self, in_air: bool) {
        self.in_air = in_air;
    }

    /// Fed back by the fusion core when dead reckoning has run unconstrained
    /// for too long.
    pub fn set_deadreckon_timeout(&mut self, exceeded: bool) {
        self.deadreckon_time_exceeded = exceeded;
    }

    pub fn set_fault_status(&mut self, fault_status: u32) {
        self.fault_status = fault_status;
    }

    // ── Queries ──────────────────────────────────────────────────────────

    pub fn local_position_is_valid(&self) -> bool {
        !self.deadreckon_time_exceeded
    }

    pub fn global_position_is_valid(&self) -> bool {
        self.pos_ref.is_some() && self.local_position_is_valid()
    }

    /// Oldest buffered IMU sample: the fusion time horizon.
    pub fn imu_sample_delayed(&self) -> &ImuSample {
        &self.imu_sample_delayed
    }

    /// Most recent down-sampled IMU sample.
    pub fn newest_imu_sample(&self) -> &ImuSample {
        &self.imu_sample_new
    }

    /// True when the last `feed_imu` call emitted a down-sampled sample.
    pub fn imu_updated(&self) -> bool {
        self.imu_updated
    }

    /// Raw IMU samples accumulated since the last down-sampled emission.
    pub fn imu_ticks(&self) -> u32 {
        self.imu_ticks
    }

    /// Low-pass filtered IMU cycle time [s].
    pub fn dt_imu_avg(&self) -> f32 {
        self.dt_imu_avg
    }

    pub fn min_obs_interval_us(&self) -> u64 {
        self.min_obs_interval_us
    }

    /// [coning, high-frequency gyro, high-frequency accel]
    pub fn vibe_metrics(&self) -> [f32; 3] {
        self.vibe.as_array()
    }

    pub fn gps_speed_valid(&self) -> bool {
        self.gps_speed_valid
    }

    pub fn fault_status(&self) -> u32 {
        self.fault_status
    }

    pub fn config(&self) -> &FrontEndConfig {
        &self.config
    }

    pub fn imu_buffer(&self) -> &RingBuffer<ImuSample> {
        &self.imu_buffer
    }

    pub fn gps_buffer(&self) -> &RingBuffer<GpsSample> {
        &self.gps_buffer
    }

    pub fn mag_buffer(&self) -> &RingBuffer<MagSample> {
        &self.mag_buffer
    }

    pub fn baro_buffer(&self) -> &RingBuffer<BaroSample> {
        &self.baro_buffer
    }

    pub fn range_buffer(&self) -> &RingBuffer<RangeSample> {
        &self.range_buffer
    }

    pub fn airspeed_buffer(&self) -> &RingBuffer<AirspeedSample> {
        &self.airspeed_buffer
    }

    pub fn flow_buffer(&self) -> &RingBuffer<FlowSample> {
        &self.flow_buffer
    }

    pub fn ext_vision_buffer(&self) -> &RingBuffer<ExtVisionSample> {
        &self.ext_vision_buffer
    }

    pub fn drag_buffer(&self) -> &RingBuffer<DragSample> {
        &self.drag_buffer
    }

    pub fn auxvel_buffer(&self) -> &RingBuffer<AuxVelSample> {
        &self.auxvel_buffer
    }

    pub fn output_buffer(&self) -> &RingBuffer<OutputSample> {
        &self.output_buffer
    }

    pub fn output_vert_buffer(&self) -> &RingBuffer<OutputVertSample> {
        &self.output_vert_buffer
    }

    // ── Status ───────────────────────────────────────────────────────────

    pub fn report(&self) -> FrontEndReport {
        fn entry<T>(name: &'static str, buffer: &RingBuffer<T>) -> BufferReport {
            BufferReport {
                name,
                capacity: buffer.capacity(),
                len: buffer.len(),
                bytes: buffer.total_size_bytes(),
            }
        }

        FrontEndReport {
            local_position_valid: self.local_position_is_valid(),
            global_position_valid: self.global_position_is_valid(),
            imu_buffer_length: self.imu_buffer_length,
            obs_buffer_length: self.obs_buffer_length,
            buffers: vec![
                entry("imu", &self.imu_buffer),
                entry("gps", &self.gps_buffer),
                entry("mag", &self.mag_buffer),
                entry("baro", &self.baro_buffer),
                entry("range", &self.range_buffer),
                entry("airspeed", &self.airspeed_buffer),
                entry("flow", &self.flow_buffer),
                entry("ext vision", &self.ext_vision_buffer),
                entry("output", &self.output_buffer),
                entry("output vert", &self.output_vert_buffer),
                entry("drag", &self.drag_buffer),
                entry("aux vel", &self.auxvel_buffer),
            ],
        }
    }

    pub fn print_status(&self) {
        for line in self.report().format_status().lines() {
            info!("{}", line);
        }
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    /// Every delay zeroed so individual tests can raise exactly one of them.
    fn quiet_config() -> FrontEndConfig {
        FrontEndConfig {
            mag_delay_ms: 0,
            baro_delay_ms: 0,
            gps_delay_ms: 0,
            airspeed_delay_ms: 0,
            flow_delay_ms: 0,
            range_delay_ms: 0,
            ev_delay_ms: 0,
            auxvel_delay_ms: 0,
            min_delay_ms: 0,
            ..FrontEndConfig::default()
        }
    }

    fn gps_fix(time_usec: u64) -> GpsMessage {
        GpsMessage {
            time_usec,
            lat: 473_977_000,
            lon: 85_456_000,
            alt: 488_000,
            vel_ned: Vector3::new(1.0, 2.0, -0.5),
            vel_ned_valid: true,
            fix_type: 3,
            eph: 1.2,
            epv: 1.8,
            sacc: 0.4,
        }
    }

    #[test]
    fn test_init_buffer_sizing() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            gps_delay_ms: 110,
            sensor_interval_min_ms: 20,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));

        // worst delay 110 ms at a 10 ms tick, horizon stretched to 165 ms
        assert_eq!(frontend.imu_buffer_length, 12);
        assert_eq!(frontend.obs_buffer_length, 9);
        assert_eq!(frontend.imu_buffer.capacity(), 12);
        assert_eq!(frontend.output_buffer.capacity(), 12);
        assert_eq!(frontend.output_vert_buffer.capacity(), 12);
    }

    #[test]
    fn test_obs_buffer_never_exceeds_imu_buffer() {
        for (delay, interval) in [(0, 20), (10, 1), (110, 20), (500, 5), (200, 1000)] {
            let mut frontend = SensorFrontEnd::new(FrontEndConfig {
                gps_delay_ms: delay,
                sensor_interval_min_ms: interval,
                ..quiet_config()
            });
            assert!(frontend.initialise(0));
            assert!(frontend.obs_buffer_length <= frontend.imu_buffer_length);
            assert!(frontend.obs_buffer_length >= 1);
        }
    }

    #[test]
    fn test_reinit_is_idempotent_and_unallocate_releases() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            gps_delay_ms: 110,
            ..quiet_config()
        });
        assert!(frontend.initialise(1_000));
        let (imu_len, obs_len) = (frontend.imu_buffer_length, frontend.obs_buffer_length);

        assert!(frontend.initialise(2_000));
        assert_eq!(frontend.imu_buffer_length, imu_len);
        assert_eq!(frontend.obs_buffer_length, obs_len);
        assert_eq!(frontend.imu_sample_delayed.time_us, 2_000);

        frontend.unallocate_buffers();
        assert_eq!(frontend.imu_buffer.capacity(), 0);
        assert_eq!(frontend.output_buffer.capacity(), 0);
        assert_eq!(frontend.gps_buffer.capacity(), 0);
    }

    #[test]
    fn test_first_imu_sample_initialises_and_updates_dt_avg() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        frontend.feed_imu(
            10_000_000,
            10_000,
            10_000,
            Vector3::new(0.001, 0.0, 0.0),
            Vector3::new(0.0, 0.0, 0.098),
        );

        assert!(frontend.initialised);
        assert!(frontend.imu_buffer.is_allocated());
        // the guard reads the freshly assigned arrival time, so the first
        // sample already folds its (clamped to 0.02) cycle time into the average
        assert_relative_eq!(frontend.dt_imu_avg(), 0.2 * 0.02);
    }

    #[test]
    fn test_imu_downsampler_combines_increments() {
        let mut frontend = SensorFrontEnd::new(quiet_config());

        frontend.feed_imu(
            5_000,
            5_000,
            5_000,
            Vector3::new(0.001, 0.002, 0.0),
            Vector3::new(0.1, 0.0, 0.0),
        );
        assert!(!frontend.imu_updated());

        frontend.feed_imu(
            10_000,
            5_000,
            5_000,
            Vector3::new(0.003, 0.002, 0.0),
            Vector3::new(0.1, 0.0, 0.0),
        );
        assert!(frontend.imu_updated());

        let emitted = frontend.newest_imu_sample();
        assert_eq!(emitted.time_us, 10_000);
        assert_relative_eq!(emitted.delta_ang.x, 0.004);
        assert_relative_eq!(emitted.delta_ang.y, 0.004);
        assert_relative_eq!(emitted.delta_ang_dt, 0.01);
        assert_relative_eq!(emitted.delta_vel.x, 0.2);
    }

    #[test]
    fn test_identical_stream_produces_identical_downsampled_output() {
        let feed = |frontend: &mut SensorFrontEnd| {
            for i in 1..=7u64 {
                frontend.feed_imu(
                    i * 10_000,
                    10_000,
                    10_000,
                    Vector3::new(0.001 * i as f32, 0.0, 0.0),
                    Vector3::new(0.0, 0.05, 0.098),
                );
            }
        };

        let mut a = SensorFrontEnd::new(quiet_config());
        let mut b = SensorFrontEnd::new(quiet_config());
        feed(&mut a);
        feed(&mut b);

        assert_eq!(a.imu_buffer.len(), b.imu_buffer.len());
        assert_eq!(
            a.newest_imu_sample().delta_ang,
            b.newest_imu_sample().delta_ang
        );
        assert_eq!(a.newest_imu_sample().time_us, b.newest_imu_sample().time_us);
        assert_eq!(a.dt_imu_avg(), b.dt_imu_avg());
        assert_eq!(a.vibe_metrics(), b.vibe_metrics());
    }

    #[test]
    fn test_min_obs_interval_tracks_buffer_span() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            mag_delay_ms: 190,
            sensor_interval_min_ms: 30,
            ..quiet_config()
        });
        for i in 1..=5u64 {
            frontend.feed_imu(
                i * 10_000,
                10_000,
                10_000,
                Vector3::zeros(),
                Vector3::zeros(),
            );
        }

        assert_eq!(frontend.imu_buffer_length, 20);
        assert_eq!(frontend.obs_buffer_length, 10);
        // newest 50 ms, oldest 10 ms, spread over obs_buffer_length - 1 slots
        assert_eq!(frontend.min_obs_interval_us(), 40_000 / 9);
    }

    #[test]
    fn test_rate_limit_accepts_first_and_spaced_samples() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.min_obs_interval_us = 10_000;

        let base = 1_000_000u64;
        for offset in [0u64, 5_000, 10_000, 15_001] {
            frontend.feed_mag(base + offset, Vector3::new(0.2, 0.0, 0.4));
        }

        // only the first sample and the one spaced more than the minimum
        // interval survive
        assert_eq!(frontend.mag_buffer.len(), 2);
        assert_eq!(frontend.time_last_mag, base + 15_001);
    }

    #[test]
    fn test_aiding_dropped_until_first_imu() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));

        frontend.feed_mag(1_000_000, Vector3::new(0.2, 0.0, 0.4));
        frontend.feed_baro(1_000_000, 10.0);

        assert_eq!(frontend.mag_buffer.len(), 0);
        assert_eq!(frontend.baro_buffer.len(), 0);
    }

    #[test]
    fn test_baro_floor_to_delayed_imu() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            baro_delay_ms: 100,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.imu_sample_delayed.time_us = 1_000_000;

        frontend.feed_baro(1_050_000, 123.0);

        // corrected to 945 000 µs, then clamped up to the fusion horizon
        let sample = frontend.baro_buffer.newest().unwrap();
        assert_eq!(sample.time_us, 1_000_000);
        assert_relative_eq!(sample.hgt, 123.0);
    }

    #[test]
    fn test_gps_floor_and_timestamp_from_receiver() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            gps_delay_ms: 110,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.imu_sample_delayed.time_us = 1_000_000;

        // receiver stamps the fix slightly before it arrives
        let mut msg = gps_fix(1_100_000);
        msg.fix_type = 3;
        frontend.feed_gps(1_104_000, &msg);

        let sample = frontend.gps_buffer.newest().unwrap();
        // 1 100 000 - 110 000 - 5 000 = 985 000, floored to the horizon
        assert_eq!(sample.time_us, 1_000_000);
        assert_relative_eq!(sample.hgt, 488.0);
        assert!(frontend.gps_speed_valid());
    }

    #[test]
    fn test_gps_requires_fix_and_fusion_flag() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));
        frontend.initialised = true;

        let mut msg = gps_fix(1_000_000);
        msg.fix_type = 2;
        frontend.feed_gps(1_000_000, &msg);
        assert_eq!(frontend.gps_buffer.len(), 0);

        msg.fix_type = 3;
        frontend.feed_gps(1_000_100, &msg);
        assert_eq!(frontend.gps_buffer.len(), 1);

        // neither the mask bit nor the height source asks for GPS
        let mut disabled = SensorFrontEnd::new(FrontEndConfig {
            fusion_mode: 0,
            ..quiet_config()
        });
        assert!(disabled.initialise(0));
        disabled.initialised = true;
        disabled.feed_gps(1_000_000, &msg);
        assert_eq!(disabled.gps_buffer.len(), 0);

        let mut height_source = SensorFrontEnd::new(FrontEndConfig {
            fusion_mode: 0,
            vdist_sensor_type: VDistSensor::Gps,
            ..quiet_config()
        });
        assert!(height_source.initialise(0));
        height_source.initialised = true;
        height_source.feed_gps(1_000_000, &msg);
        assert_eq!(height_source.gps_buffer.len(), 1);
    }

    #[test]
    fn test_gps_position_projected_only_with_origin() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));
        frontend.initialised = true;

        frontend.feed_gps(1_000_000, &gps_fix(1_000_000));
        let without_origin = frontend.gps_buffer.newest().unwrap().clone();
        assert_eq!(without_origin.pos, Vector2::zeros());

        // origin one milli-degree south of the fix
        frontend.set_origin(47.3967, 8.5456);
        frontend.feed_gps(2_000_000, &gps_fix(2_000_000));
        let with_origin = frontend.gps_buffer.newest().unwrap().clone();
        assert_relative_eq!(with_origin.pos.x, 111.2, epsilon = 0.3);
        assert_relative_eq!(with_origin.pos.y, 0.0, epsilon = 1.0e-2);
    }

    #[test]
    fn test_range_skips_half_period_correction() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            range_delay_ms: 5,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));
        frontend.initialised = true;

        frontend.feed_range(1_000_000, 4.2);
        let sample = frontend.range_buffer.newest().unwrap();
        assert_eq!(sample.time_us, 995_000);
        assert_relative_eq!(sample.rng, 4.2);
    }

    #[test]
    fn test_airspeed_and_aux_vel_center_on_filter_tick() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            airspeed_delay_ms: 100,
            auxvel_delay_ms: 20,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));
        frontend.initialised = true;

        frontend.feed_airspeed(1_000_000, 23.0, 1.1);
        assert_eq!(
            frontend.airspeed_buffer.newest().unwrap().time_us,
            1_000_000 - 100_000 - 5_000
        );

        frontend.feed_aux_vel(
            1_000_000,
            Vector2::new(0.5, -0.5),
            Vector2::new(0.01, 0.01),
        );
        let aux = frontend.auxvel_buffer.newest().unwrap();
        assert_eq!(aux.time_us, 1_000_000 - 20_000 - 5_000);
        assert_relative_eq!(aux.vel_var_ne.x, 0.01);
    }

    #[test]
    fn test_ext_vision_passthrough() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            ev_delay_ms: 175,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));
        frontend.initialised = true;

        let msg = ExtVisionMessage {
            quat: nalgebra::UnitQuaternion::identity(),
            pos_ned: Vector3::new(1.0, 2.0, -3.0),
            ang_err: 0.05,
            pos_err: 0.1,
        };
        frontend.feed_ext_vision(1_000_000, &msg);

        let sample = frontend.ext_vision_buffer.newest().unwrap();
        assert_eq!(sample.time_us, 1_000_000 - 175_000);
        assert_relative_eq!(sample.pos_err, 0.1);
        assert_relative_eq!(sample.pos_ned.z, -3.0);
    }

    #[test]
    fn test_flow_gyro_fallback_uses_matching_imu() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.min_obs_interval_us = 20_000;
        frontend.set_in_air_status(true);

        frontend.imu_buffer.push(ImuSample {
            delta_ang: Vector3::new(0.002, 0.004, 0.006),
            delta_vel: Vector3::zeros(),
            delta_ang_dt: 0.01,
            delta_vel_dt: 0.01,
            time_us: 900_000,
        });

        let flow = FlowMessage {
            quality: 200,
            dt: 20_000,
            flow_data: Vector2::new(0.02, 0.01),
            gyro_data: Vector3::new(f32::NAN, f32::NAN, f32::NAN),
        };
        frontend.feed_flow(1_000_000, &flow);

        let sample = frontend.flow_buffer.newest().unwrap();
        assert_eq!(sample.time_us, 990_000);
        assert_relative_eq!(sample.dt, 0.02);

        // rates fall back to the buffered IMU increments
        assert_relative_eq!(sample.flow_rad_xy.x, 1.0);
        assert_relative_eq!(sample.flow_rad_xy.y, 0.5);
        assert_relative_eq!(sample.flow_rad_xy_comp.x, (1.0 + 0.2) * 0.02, epsilon = 1e-6);
        assert_relative_eq!(sample.flow_rad_xy_comp.y, (0.5 + 0.4) * 0.02, epsilon = 1e-6);
        // x/y rescaled to integrated angles, z left as a rate
        assert_relative_eq!(sample.gyro_xyz.x, 0.002, epsilon = 1e-6);
        assert_relative_eq!(sample.gyro_xyz.y, 0.004, epsilon = 1e-6);
        assert_relative_eq!(sample.gyro_xyz.z, 0.6, epsilon = 1e-5);
    }

    #[test]
    fn test_flow_dropped_when_gyro_missing_and_no_imu_history() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.set_in_air_status(true);

        let flow = FlowMessage {
            quality: 200,
            dt: 20_000,
            flow_data: Vector2::new(0.02, 0.01),
            gyro_data: Vector3::new(f32::NAN, 0.0, 0.0),
        };
        frontend.feed_flow(1_000_000, &flow);
        assert_eq!(frontend.flow_buffer.len(), 0);
    }

    #[test]
    fn test_flow_sign_reversal_with_sensor_gyro() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.min_obs_interval_us = 20_000;
        frontend.set_in_air_status(true);

        let flow = FlowMessage {
            quality: 200,
            dt: 20_000,
            flow_data: Vector2::new(0.02, 0.01),
            gyro_data: Vector3::new(0.1, -0.2, 0.3),
        };
        frontend.feed_flow(1_000_000, &flow);

        let sample = frontend.flow_buffer.newest().unwrap();
        assert_relative_eq!(sample.gyro_xyz.x, -0.1);
        assert_relative_eq!(sample.flow_rad_xy.x, -0.02);
        // LOS = flow minus body rotation
        assert_relative_eq!(sample.flow_rad_xy_comp.x, -0.02 - (-0.1), epsilon = 1e-6);
        assert_relative_eq!(sample.flow_rad_xy_comp.y, -0.01 - 0.2, epsilon = 1e-6);
    }

    #[test]
    fn test_flow_poor_quality_on_ground_reads_as_zero_motion() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.min_obs_interval_us = 20_000;
        // on the ground, in_air stays false

        let flow = FlowMessage {
            quality: 0,
            dt: 20_000,
            flow_data: Vector2::new(0.5, 0.5),
            gyro_data: Vector3::new(0.1, -0.2, 0.3),
        };
        frontend.feed_flow(1_000_000, &flow);

        let sample = frontend.flow_buffer.newest().unwrap();
        assert_relative_eq!(sample.flow_rad_xy_comp.x, 0.0);
        assert_relative_eq!(sample.flow_rad_xy_comp.y, 0.0);
    }

    #[test]
    fn test_flow_rejected_in_air_when_quality_low() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            flow_qual_min: 50,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));
        frontend.initialised = true;
        frontend.min_obs_interval_us = 20_000;
        frontend.set_in_air_status(true);

        let flow = FlowMessage {
            quality: 10,
            dt: 20_000,
            flow_data: Vector2::new(0.02, 0.01),
            gyro_data: Vector3::new(0.1, -0.2, 0.3),
        };
        frontend.feed_flow(1_000_000, &flow);
        assert_eq!(frontend.flow_buffer.len(), 0);
    }

    #[test]
    fn test_drag_downsample_mean() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            mag_delay_ms: 190,
            sensor_interval_min_ms: 30,
            fusion_mode: MASK_USE_GPS | MASK_USE_DRAG,
            ..quiet_config()
        });

        for i in 1..=5u64 {
            frontend.feed_imu(
                i * 10_000,
                10_000,
                10_000,
                Vector3::new(0.001, 0.0, 0.0),
                Vector3::new(0.5, 0.3, 0.1),
            );
        }

        // imu length 20 over obs length 10 still leaves the 5-sample floor
        assert_eq!(frontend.imu_buffer_length, 20);
        assert_eq!(frontend.obs_buffer_length, 10);
        assert_eq!(frontend.drag_buffer.len(), 1);

        let drag = frontend.drag_buffer.newest().unwrap();
        assert_relative_eq!(drag.accel_xy.x, 50.0, epsilon = 1e-3);
        assert_relative_eq!(drag.accel_xy.y, 30.0, epsilon = 1e-3);
        assert_eq!(drag.time_us, 30_000);
    }

    #[test]
    fn test_drag_disabled_without_fusion_flag() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        for i in 1..=10u64 {
            frontend.feed_imu(
                i * 10_000,
                10_000,
                10_000,
                Vector3::zeros(),
                Vector3::new(0.5, 0.3, 0.1),
            );
        }
        assert!(!frontend.drag_buffer.is_allocated());
    }

    #[test]
    fn test_validity_flags() {
        let mut frontend = SensorFrontEnd::new(quiet_config());
        // free-inertial until the fusion core clears the timeout
        assert!(!frontend.local_position_is_valid());
        assert!(!frontend.global_position_is_valid());

        frontend.set_deadreckon_timeout(false);
        assert!(frontend.local_position_is_valid());
        assert!(!frontend.global_position_is_valid());

        frontend.set_origin(47.0, 8.0);
        assert!(frontend.global_position_is_valid());
    }

    #[test]
    fn test_report_covers_every_buffer() {
        let mut frontend = SensorFrontEnd::new(FrontEndConfig {
            gps_delay_ms: 110,
            ..quiet_config()
        });
        assert!(frontend.initialise(0));

        let report = frontend.report();
        assert_eq!(report.imu_buffer_length, 12);
        assert_eq!(report.obs_buffer_length, 9);
        assert_eq!(report.buffers.len(), 12);

        let imu = report.buffers.iter().find(|b| b.name == "imu").unwrap();
        assert_eq!(imu.capacity, 12);
        // aiding buffers stay unallocated until their stream first delivers
        let mag = report.buffers.iter().find(|b| b.name == "mag").unwrap();
        assert_eq!(mag.capacity, 0);
    }
}
