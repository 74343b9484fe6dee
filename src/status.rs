use serde::Serialize;

/// Allocation snapshot of one sample buffer.
#[derive(Clone, Debug, Serialize)]
pub struct BufferReport {
    pub name: &'static str,
    /// Allocated slot count; zero while the stream has never been seen
    pub capacity: usize,
    /// Samples currently held
    pub len: usize,
    /// Memory footprint including bookkeeping [bytes]
    pub bytes: usize,
}

/// Front-end health snapshot: validity flags plus one entry per buffer.
#[derive(Clone, Debug, Serialize)]
pub struct FrontEndReport {
    pub local_position_valid: bool,
    pub global_position_valid: bool,
    pub imu_buffer_length: usize,
    pub obs_buffer_length: usize,
    pub buffers: Vec<BufferReport>,
}

impl FrontEndReport {
    /// Format the report as one line per entry, matching what
    /// `print_status` emits through the log facade.
    pub fn format_status(&self) -> String {
        let mut lines = vec![
            format!(
                "local position valid: {}",
                if self.local_position_valid { "yes" } else { "no" }
            ),
            format!(
                "global position valid: {}",
                if self.global_position_valid { "yes" } else { "no" }
            ),
        ];
        for buf in &self.buffers {
            lines.push(format!(
                "{} buffer: {} slots, {} held ({} bytes)",
                buf.name, buf.capacity, buf.len, buf.bytes
            ));
        }
        lines.join("\n")
    }
}
