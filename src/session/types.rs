use crate::error::FailureReason;

/// A peripheral discovered during a scan.
///
/// `address` is the stable hardware identifier and the deduplication key;
/// `display_name` is absent when the peripheral advertises no name, or when
/// the connect capability was not granted at the time the device was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    pub address: String,
    pub display_name: Option<String>,
}

impl DeviceRecord {
    /// The label a presentation surface would show for this device.
    pub fn label(&self) -> &str {
        self.display_name.as_deref().unwrap_or("Unknown Device")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    AwaitingCapability,
    AwaitingRadioEnable,
    Scanning,
    Stopped,
}

/// The capabilities required before a scan may run.
///
/// Modeled after the runtime permissions of mobile platforms: scanning,
/// connecting (required to resolve device names), and the coarse-location
/// grant that scanning implies there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Scan,
    Connect,
    CoarseLocation,
}

/// The fixed set requested by `start()`. Denial of any member is treated as
/// total denial.
pub const REQUIRED_CAPABILITIES: [Capability; 3] = [
    Capability::Scan,
    Capability::Connect,
    Capability::CoarseLocation,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityOutcome {
    GrantedAll,
    DeniedAny,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnableOutcome {
    Enabled,
    Declined,
}

/// Asynchronous notifications from the radio backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    DiscoveryStarted,
    DiscoveryFinished,
    DeviceFound {
        address: String,
        name: Option<String>,
    },
}

/// User-initiated commands accepted by the session task.
#[derive(Debug, Clone)]
pub enum SessionCommand {
    Start,
    Cancel,
    Select(String),
}

/// Outbound events for the presentation surface.
///
/// `DeviceListChanged` carries an immutable snapshot so the surface never
/// shares mutable state with the controller.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged(Phase),
    DeviceListChanged(Vec<DeviceRecord>),
    DeviceSelected(DeviceRecord),
    Failure(FailureReason),
}

#[derive(Debug, Clone, Copy)]
pub struct SessionOptions {
    /// Accept discovered peripherals that advertise no name. When false the
    /// controller restores the legacy behavior of dropping them.
    pub include_unnamed: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        SessionOptions {
            include_unnamed: true,
        }
    }
}
