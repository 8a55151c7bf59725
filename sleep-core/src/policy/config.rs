//! Capability descriptor and timing knobs for the sleep policy.

/// How long a smart-sleeping node listens for queued commands after
/// announcing that it is about to sleep.
pub const SMART_SLEEP_WAIT_MS: u32 = 500;
/// Longest a sleep request waits for the transport to reconnect.
pub const TRANSPORT_RECONNECT_TIMEOUT_MS: u32 = 10_000;
/// Poll step while a firmware update blocks sleeping.
pub const FIRMWARE_UPDATE_POLL_MS: u32 = 1_000;

/// Features the node was built with, resolved once at construction.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Capabilities {
    /// Node forwards traffic for others and must never power down.
    pub repeater: bool,
    /// Node talks to a network transport.
    pub network: bool,
    /// Node accepts over-the-air firmware updates.
    pub firmware_update: bool,
}

impl Capabilities {
    /// Battery node with networking and OTA support.
    pub const fn sensor_node() -> Self {
        Self {
            repeater: false,
            network: true,
            firmware_update: true,
        }
    }

    /// Mains-powered repeater.
    pub const fn repeater() -> Self {
        Self {
            repeater: true,
            network: true,
            firmware_update: true,
        }
    }

    /// Node without any transport.
    pub const fn standalone() -> Self {
        Self {
            repeater: false,
            network: false,
            firmware_update: false,
        }
    }

    /// Firmware updates arrive over the network, so they only gate sleeping
    /// when both are enabled.
    pub const fn tracks_firmware_updates(self) -> bool {
        self.network && self.firmware_update
    }
}

impl Default for Capabilities {
    fn default() -> Self {
        Self::sensor_node()
    }
}

/// Timing parameters for [`super::SleepPolicyController`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct SleepConfig {
    pub smart_sleep_window_ms: u32,
    pub transport_reconnect_timeout_ms: u32,
    pub firmware_update_poll_ms: u32,
}

impl SleepConfig {
    pub const fn new() -> Self {
        Self {
            smart_sleep_window_ms: SMART_SLEEP_WAIT_MS,
            transport_reconnect_timeout_ms: TRANSPORT_RECONNECT_TIMEOUT_MS,
            firmware_update_poll_ms: FIRMWARE_UPDATE_POLL_MS,
        }
    }

    #[must_use]
    pub const fn with_smart_sleep_window(mut self, window_ms: u32) -> Self {
        self.smart_sleep_window_ms = window_ms;
        self
    }

    #[must_use]
    pub const fn with_reconnect_timeout(mut self, timeout_ms: u32) -> Self {
        self.transport_reconnect_timeout_ms = timeout_ms;
        self
    }

    /// A zero poll step is bumped to 1 ms so the wait loop always advances.
    #[must_use]
    pub const fn with_firmware_update_poll(mut self, poll_ms: u32) -> Self {
        self.firmware_update_poll_ms = if poll_ms == 0 { 1 } else { poll_ms };
        self
    }
}

impl Default for SleepConfig {
    fn default() -> Self {
        Self::new()
    }
}
