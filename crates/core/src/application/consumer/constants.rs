// Consumer constants (no magic values)
use std::time::Duration;

/// Unacknowledged deliveries held per consumer
///
/// One keeps the broker in charge of ordering, so priorities are honoured
/// message by message.
pub const DEFAULT_PREFETCH_COUNT: u16 = 1;

/// Pause between reconnect attempts once a consumer is running (1s)
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);
