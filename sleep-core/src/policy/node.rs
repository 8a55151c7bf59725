//! Narrow interfaces onto the rest of the node.
//!
//! The sleep policy only queries and commands these collaborators; message
//! construction, routing, the radio stack, OTA bookkeeping and LED pattern
//! playback all live behind them.

/// Monotonic millisecond clock plus the node's cooperative wait.
///
/// The counter is 32-bit and wraps after roughly 49.7 days; elapsed-time
/// arithmetic uses wrapping subtraction and does not handle more than one
/// wrap within a single request.
pub trait Clock {
    fn now_ms(&mut self) -> u32;

    /// Blocks for `duration_ms` while servicing the node's cooperative work
    /// (incoming messages, indication patterns).
    fn wait_ms(&mut self, duration_ms: u32);
}

/// Notifications a smart-sleeping node sends to its controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SleepNotification {
    /// About to sleep; the node listens for `window_ms` first.
    PreSleep { window_ms: u32 },
    /// Awake again after `slept_ms`.
    PostSleep { slept_ms: u32 },
}

/// Network transport lifecycle and routing.
pub trait Transport {
    fn is_ready(&mut self) -> bool;

    fn disable(&mut self);

    fn reinitialise(&mut self);

    /// One cooperative processing tick of the network stack.
    fn process(&mut self);

    /// Best effort; the policy ignores delivery failures beyond telemetry.
    fn send_route(&mut self, notification: SleepNotification) -> bool;
}

/// Over-the-air firmware update state.
pub trait FirmwareUpdate {
    fn is_update_ongoing(&mut self) -> bool;
}

/// Indication states the policy signals around a power-down.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Indication {
    Sleep,
    Wakeup,
}

/// Visual indication patterns (status LEDs).
pub trait Indicator {
    fn set_indication(&mut self, indication: Indication);

    fn is_blinking(&mut self) -> bool;

    /// Advances the running pattern by one step.
    fn step(&mut self);
}

/// Transport for nodes without networking.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopTransport;

impl Transport for NoopTransport {
    fn is_ready(&mut self) -> bool {
        true
    }

    fn disable(&mut self) {}

    fn reinitialise(&mut self) {}

    fn process(&mut self) {}

    fn send_route(&mut self, _: SleepNotification) -> bool {
        false
    }
}

/// Firmware-update source that never reports an update.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopFirmwareUpdate;

impl FirmwareUpdate for NoopFirmwareUpdate {
    fn is_update_ongoing(&mut self) -> bool {
        false
    }
}

/// Indicator for boards without status LEDs.
#[derive(Copy, Clone, Debug, Default)]
pub struct NoopIndicator;

impl Indicator for NoopIndicator {
    fn set_indication(&mut self, _: Indication) {}

    fn is_blinking(&mut self) -> bool {
        false
    }

    fn step(&mut self) {}
}
