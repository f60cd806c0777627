//! Host configuration.
//!
//! Sizing is fixed at build time through the constants below. Runtime
//! behaviour is configured via the [`Config`] builder.

use embassy_time::Duration;

/// Number of buffers in the pool, shared by commands, events and ACL data.
pub const NUM_BUFS: usize = 5;

/// Data capacity of a single buffer, including any driver head reserve.
pub const BUF_MAX_DATA: usize = 74;

/// Runtime host parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Upper bound for every synchronous command and for bring-up's wait on
    /// the commands it queued. `None` waits forever.
    pub(crate) cmd_timeout: Option<Duration>,
}

impl Config {
    pub const fn new() -> Self {
        Self { cmd_timeout: None }
    }

    /// Bound every synchronous command wait by `timeout`.
    ///
    /// Without this, [`Host::send_sync`](crate::Host::send_sync) and the
    /// bring-up sequence block until the controller acknowledges each command.
    pub const fn cmd_timeout(mut self, timeout: Duration) -> Self {
        self.cmd_timeout = Some(timeout);
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_waits_forever() {
        assert_eq!(Config::default().cmd_timeout, None);
    }

    #[test]
    fn builder_sets_timeout() {
        let cfg = Config::new().cmd_timeout(Duration::from_millis(250));
        assert_eq!(cfg.cmd_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn pool_fits_command_header_and_event_mask() {
        // H4 indicator + command header + 8-byte event mask
        assert!(BUF_MAX_DATA >= 1 + 3 + 8);
    }
}
