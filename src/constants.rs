//! Global constants for Mimic networking and traffic shaping

use std::time::Duration;

// ============================================================================
// TIMEOUTS
// ============================================================================

/// Connect timeout for dialing a new physical transport
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Grace delay before a swapped-out transport is closed, so in-flight
/// bytes on the old socket can drain
pub const ROTATE_GRACE: Duration = Duration::from_secs(1);

/// Read deadline used by the shaper loop; expiry is expected and ignored
pub const SHAPER_READ_TIMEOUT: Duration = Duration::from_millis(200);

// ============================================================================
// DOMAIN SWITCHING
// ============================================================================

/// Default lower bound between domain switches when the config omits
/// or fails to parse `settings.switch_time`
pub const DEFAULT_SWITCH_MIN: Duration = Duration::from_secs(60);

/// Default upper bound between domain switches
pub const DEFAULT_SWITCH_MAX: Duration = Duration::from_secs(300);

// ============================================================================
// BUFFER SIZES
// ============================================================================

/// Buffer size for the server-side echo handler
pub const ECHO_BUFFER_SIZE: usize = 4096;

/// Receive buffer for the shaper loop's discard reads
pub const SHAPER_READ_BUFFER_SIZE: usize = 65535;
