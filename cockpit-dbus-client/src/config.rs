/// Options of the `open` command; together with the bus name they identify a client.
pub use cockpit_dbus_core::OpenOptions as DbusOptions;

use cockpit_dbus_core::sequence::DEFAULT_MAX_HELD;

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Capacity of each event channel (notify, meta, proxy and proxy set events)
    pub event_capacity: usize,
    /// Frames held behind a missing `seq` before the client gives up with `protocol-error`
    pub sequence_limit: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            event_capacity: 1024,
            sequence_limit: DEFAULT_MAX_HELD,
        }
    }
}
