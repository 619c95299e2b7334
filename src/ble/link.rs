//! Device link state machine.
//!
//! `Idle → Scanning → Connecting → Connected`, with `Error` reachable from
//! every non-idle state and `disconnect()` returning to `Idle` from anywhere.
//! Caller commands and transport events are applied one at a time under a
//! single lock, so a late scan hit can never race a connection attempt.
//!
//! There is no retry loop. After an `Error` the caller decides whether to scan
//! or connect again.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::decoder::{self, DecodeFailure};
use super::transport::{
    Advertisement, EventQueue, GattService, LinkId, Transport, TransportEvent,
    CLIENT_CONFIG_DESCRIPTOR, HEART_RATE_MEASUREMENT, HEART_RATE_SERVICE,
};
use crate::error::LinkError;

/// Public connection state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    Idle,
    Scanning,
    Connecting,
    Connected,
    Error(String),
}

impl ConnectionState {
    pub fn is_error(&self) -> bool {
        matches!(self, ConnectionState::Error(_))
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Idle => f.write_str("Idle"),
            ConnectionState::Scanning => f.write_str("Scanning"),
            ConnectionState::Connecting => f.write_str("Connecting"),
            ConnectionState::Connected => f.write_str("Connected"),
            ConnectionState::Error(reason) => write!(f, "Error({})", reason),
        }
    }
}

/// State plus its human-readable info line, always published together
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub info: String,
}

impl LinkStatus {
    fn idle() -> Self {
        Self {
            state: ConnectionState::Idle,
            info: "Not connected".to_string(),
        }
    }
}

/// Link behaviour settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Case-insensitive substring an advertised name must contain when no
    /// target address is given
    pub vendor_name_filter: String,

    /// Sensor to use when the caller does not name one
    pub default_address: Option<String>,

    /// Capacity of the per-notification heart-rate broadcast
    pub sample_channel_capacity: usize,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            vendor_name_filter: "polar".to_string(),
            default_address: None,
            sample_channel_capacity: 256,
        }
    }
}

/// What a scan is looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    /// Exact device address, compared case-insensitively
    Address(String),
    /// Any device whose name contains this substring, case-insensitively
    NameContains(String),
}

impl ScanTarget {
    pub fn matches(&self, advertisement: &Advertisement) -> bool {
        match self {
            ScanTarget::Address(address) => advertisement.address.eq_ignore_ascii_case(address),
            ScanTarget::NameContains(needle) => advertisement
                .name
                .as_deref()
                .map(|name| name.to_lowercase().contains(&needle.to_lowercase()))
                .unwrap_or(false),
        }
    }
}

/// Progress inside `Connecting`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectStep {
    Opening,
    Discovering,
    Subscribing,
}

#[derive(Debug, Clone, PartialEq)]
enum Phase {
    Idle,
    Scanning {
        target: ScanTarget,
    },
    Connecting {
        link: LinkId,
        address: String,
        step: ConnectStep,
    },
    Connected {
        link: LinkId,
        address: String,
    },
    Failed(LinkError),
}

impl Phase {
    fn open_link(&self) -> Option<LinkId> {
        match self {
            Phase::Connecting { link, .. } | Phase::Connected { link, .. } => Some(*link),
            _ => None,
        }
    }

    fn status(&self) -> LinkStatus {
        match self {
            Phase::Idle => LinkStatus::idle(),
            Phase::Scanning { target } => LinkStatus {
                state: ConnectionState::Scanning,
                info: match target {
                    ScanTarget::Address(address) => format!("Scanning for {}...", address),
                    ScanTarget::NameContains(_) => "Scanning for heart rate sensor...".to_string(),
                },
            },
            Phase::Connecting { address, step, .. } => LinkStatus {
                state: ConnectionState::Connecting,
                info: match step {
                    ConnectStep::Opening => format!("Connecting to {}...", address),
                    ConnectStep::Discovering => format!("Discovering services on {}...", address),
                    ConnectStep::Subscribing => {
                        format!("Enabling heart rate notifications on {}...", address)
                    }
                },
            },
            Phase::Connected { address, .. } => LinkStatus {
                state: ConnectionState::Connected,
                info: format!("Connected to {}", address),
            },
            Phase::Failed(err) => LinkStatus {
                state: ConnectionState::Error(err.to_string()),
                info: err.to_string(),
            },
        }
    }
}

/// Everything guarded by the link lock
struct LinkCore {
    transport: Box<dyn Transport>,
    config: LinkConfig,
    phase: Phase,
    next_link: u64,
    status_tx: watch::Sender<LinkStatus>,
    heart_rate_tx: watch::Sender<Option<u16>>,
    samples_tx: broadcast::Sender<u16>,
}

impl LinkCore {
    fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
        let status = self.phase.status();
        info!(state = %status.state, info = %status.info, "Link state changed");
        self.status_tx.send_replace(status);
    }

    /// Release whatever the radio holds: the running scan and the open link
    fn release(&mut self) {
        if matches!(self.phase, Phase::Scanning { .. }) {
            self.transport.stop_scan();
        }
        if let Some(link) = self.phase.open_link() {
            debug!(%link, "Closing link");
            self.transport.close(link);
        }
    }

    fn fail(&mut self, err: LinkError) {
        warn!(error = %err, "Link failed");
        self.release();
        self.heart_rate_tx.send_replace(None);
        self.set_phase(Phase::Failed(err));
    }

    fn can_start(&self) -> bool {
        matches!(self.phase, Phase::Idle | Phase::Failed(_))
    }

    fn start_scan(&mut self, address: Option<String>) {
        if !self.can_start() {
            debug!(state = %self.phase.status().state, "Scan already in progress, ignoring");
            return;
        }

        let radio = self.transport.radio_state();
        if !radio.scan_permitted {
            return self.fail(LinkError::PermissionDenied);
        }
        if !radio.adapter_enabled {
            return self.fail(LinkError::AdapterDisabled);
        }

        let target = match address {
            Some(address) => ScanTarget::Address(address),
            None => ScanTarget::NameContains(self.config.vendor_name_filter.clone()),
        };

        if let Err(err) = self.transport.start_scan() {
            return self.fail(LinkError::ScanFailed(err.to_string()));
        }

        self.set_phase(Phase::Scanning { target });
    }

    fn connect_direct(&mut self, address: String) {
        if !self.can_start() {
            debug!(state = %self.phase.status().state, "Link busy, ignoring direct connect");
            return;
        }

        if !self.transport.radio_state().adapter_enabled {
            return self.fail(LinkError::AdapterDisabled);
        }

        self.open_link(address);
    }

    fn open_link(&mut self, address: String) {
        self.next_link += 1;
        let link = LinkId(self.next_link);

        // Enter Connecting first so a failure releases this link too
        self.set_phase(Phase::Connecting {
            link,
            address: address.clone(),
            step: ConnectStep::Opening,
        });

        if let Err(err) = self.transport.connect(link, &address) {
            self.fail(LinkError::ConnectionFailed(err.to_string()));
        }
    }

    fn disconnect(&mut self) {
        self.release();
        self.heart_rate_tx.send_replace(None);
        if self.phase != Phase::Idle {
            self.set_phase(Phase::Idle);
        }
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Advertisement(advertisement) => self.on_advertisement(advertisement),
            TransportEvent::ScanFailed { reason } => {
                if matches!(self.phase, Phase::Scanning { .. }) {
                    self.fail(LinkError::ScanFailed(reason));
                }
            }
            TransportEvent::LinkUp { link } => self.on_link_up(link),
            TransportEvent::LinkDown { link, reason } => {
                if self.phase.open_link() == Some(link) {
                    self.fail(LinkError::ConnectionFailed(reason));
                } else {
                    debug!(%link, "Ignoring link down for stale link");
                }
            }
            TransportEvent::ServicesDiscovered { link, result } => {
                self.on_services_discovered(link, result)
            }
            TransportEvent::NotificationsEnabled { link, result } => {
                self.on_notifications_enabled(link, result)
            }
            TransportEvent::Notification {
                link,
                characteristic,
                value,
            } => self.on_notification(link, characteristic, &value),
        }
    }

    fn on_advertisement(&mut self, advertisement: Advertisement) {
        let Phase::Scanning { target } = &self.phase else {
            trace!(address = %advertisement.address, "Advertisement outside scan, ignoring");
            return;
        };

        if !target.matches(&advertisement) {
            return;
        }

        info!(
            address = %advertisement.address,
            name = advertisement.name.as_deref().unwrap_or(""),
            "Found heart rate sensor"
        );
        self.transport.stop_scan();
        self.open_link(advertisement.address);
    }

    fn on_link_up(&mut self, up: LinkId) {
        let Phase::Connecting {
            link,
            address,
            step: ConnectStep::Opening,
        } = &self.phase
        else {
            debug!(link = %up, "Unexpected link up, ignoring");
            return;
        };
        if *link != up {
            debug!(link = %up, "Ignoring link up for stale link");
            return;
        }

        let address = address.clone();
        self.set_phase(Phase::Connecting {
            link: up,
            address,
            step: ConnectStep::Discovering,
        });

        if let Err(err) = self.transport.discover_services(up) {
            self.fail(LinkError::ConnectionFailed(err.to_string()));
        }
    }

    fn on_services_discovered(&mut self, from: LinkId, result: Result<Vec<GattService>, String>) {
        let Phase::Connecting {
            link,
            address,
            step: ConnectStep::Discovering,
        } = &self.phase
        else {
            debug!(link = %from, "Unexpected service discovery result, ignoring");
            return;
        };
        if *link != from {
            return;
        }
        let address = address.clone();

        let services = match result {
            Ok(services) => services,
            Err(reason) => return self.fail(LinkError::ConnectionFailed(reason)),
        };

        if let Err(err) = find_measurement(&services) {
            return self.fail(err);
        }

        self.set_phase(Phase::Connecting {
            link: from,
            address,
            step: ConnectStep::Subscribing,
        });

        if let Err(err) =
            self.transport
                .enable_notifications(from, HEART_RATE_SERVICE, HEART_RATE_MEASUREMENT)
        {
            self.fail(LinkError::NotificationEnableFailed(err.to_string()));
        }
    }

    fn on_notifications_enabled(&mut self, from: LinkId, result: Result<(), String>) {
        let Phase::Connecting {
            link,
            address,
            step: ConnectStep::Subscribing,
        } = &self.phase
        else {
            debug!(link = %from, "Unexpected descriptor write result, ignoring");
            return;
        };
        if *link != from {
            return;
        }
        let address = address.clone();

        match result {
            Ok(()) => self.set_phase(Phase::Connected { link: from, address }),
            Err(reason) => self.fail(LinkError::NotificationEnableFailed(reason)),
        }
    }

    fn on_notification(&mut self, from: LinkId, characteristic: Uuid, value: &[u8]) {
        let Phase::Connected { link, .. } = &self.phase else {
            return;
        };
        if *link != from || characteristic != HEART_RATE_MEASUREMENT {
            return;
        }

        match decoder::decode_positive(value) {
            Ok(bpm) => {
                trace!(bpm, "Heart rate notification");
                self.heart_rate_tx.send_replace(Some(bpm));
                // No subscribers is fine
                let _ = self.samples_tx.send(bpm);
            }
            Err(failure) => log_dropped(failure, value),
        }
    }
}

fn log_dropped(failure: DecodeFailure, value: &[u8]) {
    trace!(%failure, len = value.len(), "Dropping heart rate notification");
}

/// Locate the measurement characteristic and check it can notify
fn find_measurement(services: &[GattService]) -> Result<(), LinkError> {
    let service = services
        .iter()
        .find(|s| s.uuid == HEART_RATE_SERVICE)
        .ok_or(LinkError::ServiceNotFound)?;

    let characteristic = service
        .characteristic(HEART_RATE_MEASUREMENT)
        .ok_or(LinkError::CharacteristicNotFound)?;

    if !characteristic.has_descriptor(CLIENT_CONFIG_DESCRIPTOR) {
        return Err(LinkError::DescriptorMissing);
    }

    Ok(())
}

/// Handle to the link state machine. Clones share the same link.
#[derive(Clone)]
pub struct DeviceLink {
    core: Arc<Mutex<LinkCore>>,
    status_rx: watch::Receiver<LinkStatus>,
    heart_rate_rx: watch::Receiver<Option<u16>>,
    samples_tx: broadcast::Sender<u16>,
}

impl DeviceLink {
    /// Create an idle link over a transport
    pub fn new(transport: Box<dyn Transport>, config: LinkConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(LinkStatus::idle());
        let (heart_rate_tx, heart_rate_rx) = watch::channel(None);
        let (samples_tx, _) = broadcast::channel(config.sample_channel_capacity.max(1));

        let core = LinkCore {
            transport,
            config,
            phase: Phase::Idle,
            next_link: 0,
            status_tx,
            heart_rate_tx,
            samples_tx: samples_tx.clone(),
        };

        Self {
            core: Arc::new(Mutex::new(core)),
            status_rx,
            heart_rate_rx,
            samples_tx,
        }
    }

    fn lock(&self) -> MutexGuard<'_, LinkCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scan for a sensor: the given address, or any device whose name
    /// contains the vendor filter. Ignored unless idle or failed.
    pub fn start_scan(&self, address: Option<String>) {
        self.lock().start_scan(address);
    }

    /// Connect to a known address without scanning. Ignored unless idle or failed.
    pub fn connect_direct(&self, address: impl Into<String>) {
        self.lock().connect_direct(address.into());
    }

    /// Stop scanning, release the link, clear the heart rate and go idle
    pub fn disconnect(&self) {
        self.lock().disconnect();
    }

    /// Tear the link down for good. Same guarantees as `disconnect`.
    pub fn shutdown(&self) {
        info!("Shutting down device link");
        self.disconnect();
    }

    /// Apply one transport event
    pub fn handle_event(&self, event: TransportEvent) {
        self.lock().handle_event(event);
    }

    /// Drain the transport's event queue on a background task
    pub fn spawn_event_pump(&self, mut queue: EventQueue) -> JoinHandle<()> {
        let link = self.clone();
        tokio::spawn(async move {
            while let Some(event) = queue.recv().await {
                link.handle_event(event);
            }
            debug!("Transport event queue closed");
        })
    }

    pub fn status(&self) -> LinkStatus {
        self.status_rx.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.status_rx.borrow().state.clone()
    }

    pub fn info(&self) -> String {
        self.status_rx.borrow().info.clone()
    }

    /// The failure behind the current `Error` state
    pub fn last_error(&self) -> Option<LinkError> {
        match &self.lock().phase {
            Phase::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    /// Last decoded heart rate; cleared when the link goes down
    pub fn heart_rate(&self) -> Option<u16> {
        *self.heart_rate_rx.borrow()
    }

    /// Observe state and info changes
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status_rx.clone()
    }

    /// Observe the last-known heart rate
    pub fn watch_heart_rate(&self) -> watch::Receiver<Option<u16>> {
        self.heart_rate_rx.clone()
    }

    /// Receive every decoded heart rate from now on
    pub fn subscribe_samples(&self) -> broadcast::Receiver<u16> {
        self.samples_tx.subscribe()
    }
}

impl std::fmt::Debug for DeviceLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceLink")
            .field("status", &self.status())
            .field("heart_rate", &self.heart_rate())
            .finish()
    }
}
