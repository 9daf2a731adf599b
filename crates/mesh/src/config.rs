use std::time::Duration;

/// Tunables recognized by the network builder.
#[derive(Clone, Debug)]
pub struct NetOptions {
    /// Idle deadline for reads on an established connection.
    pub connection_timeout: Duration,
    /// Deadline armed around every framed send.
    pub write_timeout: Duration,
    /// Interval at which buffered writers are flushed to their sockets.
    pub write_flush_latency: Duration,
    /// Capacity of each connection's buffered writer.
    pub write_buffer_size: usize,
    /// Receive window handed to windowed transports.
    pub recv_window_size: u16,
    /// Send window handed to windowed transports.
    pub send_window_size: u16,
    /// Maximum bytes accepted in a single frame.
    pub max_frame_bytes: usize,
}

impl Default for NetOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(60),
            write_timeout: Duration::from_secs(3),
            write_flush_latency: Duration::from_millis(50),
            write_buffer_size: 4096,
            recv_window_size: 4096,
            send_window_size: 4096,
            max_frame_bytes: 2 * 1024 * 1024,
        }
    }
}
