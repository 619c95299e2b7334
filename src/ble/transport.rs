//! Seam between the link state machine and a radio stack.
//!
//! Commands on [`Transport`] never block: they start an operation and return.
//! Completion, failure, scan hits and notifications come back later as
//! [`TransportEvent`]s on a single queue, which the link drains in order.

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Heart Rate service (0x180D)
pub const HEART_RATE_SERVICE: Uuid = Uuid::from_u128(0x0000180d_0000_1000_8000_00805f9b34fb);

/// Heart Rate Measurement characteristic (0x2A37)
pub const HEART_RATE_MEASUREMENT: Uuid =
    Uuid::from_u128(0x00002a37_0000_1000_8000_00805f9b34fb);

/// Client Characteristic Configuration descriptor (0x2902)
pub const CLIENT_CONFIG_DESCRIPTOR: Uuid =
    Uuid::from_u128(0x00002902_0000_1000_8000_00805f9b34fb);

/// CCCD value enabling notifications
pub const ENABLE_NOTIFICATION_VALUE: [u8; 2] = [0x01, 0x00];

/// Identifies one connection attempt. Events from an older attempt carry a
/// stale id and are discarded by the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LinkId(pub u64);

impl std::fmt::Display for LinkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "link#{}", self.0)
    }
}

/// Adapter availability as seen before a scan starts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioState {
    pub adapter_enabled: bool,
    pub scan_permitted: bool,
}

impl RadioState {
    pub fn ready() -> Self {
        Self {
            adapter_enabled: true,
            scan_permitted: true,
        }
    }
}

/// One received advertisement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Advertisement {
    pub address: String,
    pub name: Option<String>,
}

/// A discovered characteristic and the descriptors it exposes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattCharacteristic {
    pub uuid: Uuid,
    pub descriptors: Vec<Uuid>,
}

/// A discovered primary service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GattService {
    pub uuid: Uuid,
    pub characteristics: Vec<GattCharacteristic>,
}

impl GattService {
    pub fn characteristic(&self, uuid: Uuid) -> Option<&GattCharacteristic> {
        self.characteristics.iter().find(|c| c.uuid == uuid)
    }
}

impl GattCharacteristic {
    pub fn has_descriptor(&self, uuid: Uuid) -> bool {
        self.descriptors.contains(&uuid)
    }
}

/// Asynchronous callbacks from the radio stack
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A device advertised while scanning
    Advertisement(Advertisement),

    /// The running scan stopped with an error
    ScanFailed { reason: String },

    /// The link requested by `connect` is up
    LinkUp { link: LinkId },

    /// The link failed to open or dropped
    LinkDown { link: LinkId, reason: String },

    /// Service discovery finished
    ServicesDiscovered {
        link: LinkId,
        result: Result<Vec<GattService>, String>,
    },

    /// The CCCD write finished
    NotificationsEnabled {
        link: LinkId,
        result: Result<(), String>,
    },

    /// A characteristic value notification
    Notification {
        link: LinkId,
        characteristic: Uuid,
        value: Vec<u8>,
    },
}

/// Sending half handed to a transport
pub type EventSink = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half drained by the link
pub type EventQueue = mpsc::UnboundedReceiver<TransportEvent>;

/// Create the single event queue connecting a transport to its link
pub fn event_queue() -> (EventSink, EventQueue) {
    mpsc::unbounded_channel()
}

/// A command that could not even be started
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Non-blocking radio commands. Implementations report outcomes through the
/// [`EventSink`] they were built with.
pub trait Transport: Send {
    /// Whether the adapter is on and scanning is permitted
    fn radio_state(&self) -> RadioState;

    /// Begin delivering [`TransportEvent::Advertisement`]s
    fn start_scan(&mut self) -> Result<(), TransportError>;

    /// Stop the running scan, if any
    fn stop_scan(&mut self);

    /// Open a link to `address`; answered by `LinkUp` or `LinkDown`
    fn connect(&mut self, link: LinkId, address: &str) -> Result<(), TransportError>;

    /// Enumerate services; answered by `ServicesDiscovered`
    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError>;

    /// Write [`ENABLE_NOTIFICATION_VALUE`] to the characteristic's CCCD;
    /// answered by `NotificationsEnabled`
    fn enable_notifications(
        &mut self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError>;

    /// Release the link handle. Must be idempotent.
    fn close(&mut self, link: LinkId);
}
