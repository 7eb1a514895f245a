//! Default tuning constants, mirroring the broker's documented limits.

use std::time::Duration;

/// Interval between keepalive pings: just under the broker's documented 10-minute idle timeout.
pub const fn ping_interval() -> Duration {
    Duration::from_millis(9 * 60_000 + 54_000)
}

/// Granularity at which a keepalive task re-checks its elapsed time and run flag.
pub const fn thread_ticker() -> Duration {
    Duration::from_millis(500)
}

/// Cap on buffered-but-undelivered payloads per subscription before the oldest is dropped.
pub const fn delivery_queue_capacity() -> usize {
    1000
}

/// A stream subscribe call must be issued within this long of opening the stream socket, or the
/// broker closes the connection.
pub const fn initial_contact_deadline() -> Duration {
    Duration::from_secs(1)
}

/// Default minimum spacing between successive sends on one channel, in milliseconds.
pub const fn send_interval_ms() -> u64 {
    200
}

/// Default cap on total Sessions + Stream Sessions held by a Pool Manager.
pub const fn max_connections() -> usize {
    50
}

/// Default number of address-connect retries before a transport gives up.
pub const fn max_connection_fails() -> usize {
    10
}

/// Default maximum chunk size, in bytes, for a single outbound write syscall.
pub const fn max_send_data() -> usize {
    1024
}

/// Default maximum number of bytes read per inbound recv syscall.
pub const fn max_receive_data() -> usize {
    1024
}

/// Default reaction time budget (milliseconds) for an individual read/write operation.
pub const fn max_reaction_time_ms() -> u64 {
    5000
}

/// Default transport encryption: always `true` outside of test tooling.
pub const fn encrypted() -> bool {
    true
}
