//! Radio backend over `btleplug`.
//!
//! Every [`Transport`] command spawns a task on the runtime handle and reports
//! back through the event sink, so the link never awaits the radio.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use ::btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter};
use ::btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use super::transport::{
    Advertisement, EventSink, GattCharacteristic, GattService, LinkId, RadioState, Transport,
    TransportError, TransportEvent,
};

/// Per-link resources held until `close`
struct OpenLink<P = Peripheral> {
    peripheral: Option<P>,
    tasks: Vec<JoinHandle<()>>,
}

impl<P> Default for OpenLink<P> {
    fn default() -> Self {
        Self {
            peripheral: None,
            tasks: Vec::new(),
        }
    }
}

type Links<P = Peripheral> = Arc<Mutex<HashMap<LinkId, OpenLink<P>>>>;

/// `Transport` over the first adapter `btleplug` reports
pub struct BtleplugTransport {
    handle: Handle,
    adapter: Option<Adapter>,
    sink: EventSink,
    scan_task: Option<JoinHandle<()>>,
    links: Links,
}

impl BtleplugTransport {
    /// Open the platform manager and pick the first adapter. A host with no
    /// adapter yields a transport whose radio reports disabled.
    pub async fn new(sink: EventSink) -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::new(format!("Bluetooth manager unavailable: {}", e)))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::new(e.to_string()))?
            .into_iter()
            .next();

        if adapter.is_none() {
            warn!("No Bluetooth adapter found");
        }

        Ok(Self {
            handle: Handle::current(),
            adapter,
            sink,
            scan_task: None,
            links: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn adapter(&self) -> Result<Adapter, TransportError> {
        self.adapter
            .clone()
            .ok_or_else(|| TransportError::new("no Bluetooth adapter"))
    }

    /// Attach a task to an open link. A link closed in the meantime gets
    /// the task aborted instead.
    fn track(&self, link: LinkId, task: JoinHandle<()>) {
        let mut links = self.links.lock().unwrap_or_else(PoisonError::into_inner);
        match links.get_mut(&link) {
            Some(open) => open.tasks.push(task),
            None => task.abort(),
        }
    }
}

/// Store a connected peripheral on its link. Returns the peripheral back
/// when the link was closed while connecting.
fn adopt_peripheral<P>(links: &Links<P>, link: LinkId, peripheral: P) -> Option<P> {
    let mut links = links.lock().unwrap_or_else(PoisonError::into_inner);
    match links.get_mut(&link) {
        Some(open) => {
            open.peripheral = Some(peripheral);
            None
        }
        None => Some(peripheral),
    }
}

fn link_peripheral(links: &Links, link: LinkId) -> Option<Peripheral> {
    links
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&link)
        .and_then(|open| open.peripheral.clone())
}

async fn find_peripheral(adapter: &Adapter, address: &str) -> Option<Peripheral> {
    let peripherals = adapter.peripherals().await.ok()?;
    peripherals
        .into_iter()
        .find(|p| p.address().to_string().eq_ignore_ascii_case(address))
}

fn to_gatt(peripheral: &Peripheral) -> Vec<GattService> {
    peripheral
        .services()
        .into_iter()
        .map(|service| GattService {
            uuid: service.uuid,
            characteristics: service
                .characteristics
                .into_iter()
                .map(|c| GattCharacteristic {
                    uuid: c.uuid,
                    descriptors: c.descriptors.into_iter().map(|d| d.uuid).collect(),
                })
                .collect(),
        })
        .collect()
}

impl Transport for BtleplugTransport {
    fn radio_state(&self) -> RadioState {
        // Platform permission refusals surface from start_scan as ScanFailed
        RadioState {
            adapter_enabled: self.adapter.is_some(),
            scan_permitted: true,
        }
    }

    fn start_scan(&mut self) -> Result<(), TransportError> {
        let adapter = self.adapter()?;
        let sink = self.sink.clone();

        let task = self.handle.spawn(async move {
            let mut events = match adapter.events().await {
                Ok(events) => events,
                Err(e) => {
                    let _ = sink.send(TransportEvent::ScanFailed {
                        reason: e.to_string(),
                    });
                    return;
                }
            };
            if let Err(e) = adapter.start_scan(ScanFilter::default()).await {
                let _ = sink.send(TransportEvent::ScanFailed {
                    reason: e.to_string(),
                });
                return;
            }

            while let Some(event) = events.next().await {
                let id = match event {
                    CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                    _ => continue,
                };
                let Ok(peripheral) = adapter.peripheral(&id).await else {
                    continue;
                };
                let name = match peripheral.properties().await {
                    Ok(Some(props)) => props.local_name,
                    _ => None,
                };
                let advertisement = Advertisement {
                    address: peripheral.address().to_string(),
                    name,
                };
                if sink.send(TransportEvent::Advertisement(advertisement)).is_err() {
                    break;
                }
            }
        });

        self.scan_task = Some(task);
        Ok(())
    }

    fn stop_scan(&mut self) {
        if let Some(task) = self.scan_task.take() {
            task.abort();
        }
        if let Some(adapter) = self.adapter.clone() {
            self.handle.spawn(async move {
                if let Err(e) = adapter.stop_scan().await {
                    debug!(error = %e, "stop_scan failed");
                }
            });
        }
    }

    fn connect(&mut self, link: LinkId, address: &str) -> Result<(), TransportError> {
        let adapter = self.adapter()?;
        let sink = self.sink.clone();
        let links = self.links.clone();
        let address = address.to_string();

        self.links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(link, OpenLink::default());

        let task = self.handle.spawn(async move {
            let Some(peripheral) = find_peripheral(&adapter, &address).await else {
                let _ = sink.send(TransportEvent::LinkDown {
                    link,
                    reason: format!("device {} not known to adapter", address),
                });
                return;
            };

            if let Err(e) = peripheral.connect().await {
                let _ = sink.send(TransportEvent::LinkDown {
                    link,
                    reason: e.to_string(),
                });
                return;
            }

            if let Some(orphan) = adopt_peripheral(&links, link, peripheral) {
                // Must outlive this task, which close() may abort
                debug!(%link, "Link closed while connecting, disconnecting");
                tokio::spawn(async move {
                    if let Err(e) = orphan.disconnect().await {
                        debug!(%link, error = %e, "disconnect failed");
                    }
                });
                return;
            }
            let _ = sink.send(TransportEvent::LinkUp { link });
        });

        self.track(link, task);
        Ok(())
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError> {
        let peripheral = link_peripheral(&self.links, link)
            .ok_or_else(|| TransportError::new(format!("{} is not open", link)))?;
        let sink = self.sink.clone();

        let task = self.handle.spawn(async move {
            let result = match peripheral.discover_services().await {
                Ok(()) => Ok(to_gatt(&peripheral)),
                Err(e) => Err(e.to_string()),
            };
            let _ = sink.send(TransportEvent::ServicesDiscovered { link, result });
        });

        self.track(link, task);
        Ok(())
    }

    fn enable_notifications(
        &mut self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        let peripheral = link_peripheral(&self.links, link)
            .ok_or_else(|| TransportError::new(format!("{} is not open", link)))?;
        let target = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.service_uuid == service && c.uuid == characteristic)
            .ok_or_else(|| TransportError::new("characteristic not discovered"))?;
        let sink = self.sink.clone();

        let task = self.handle.spawn(async move {
            // Open the stream before subscribing so the first value is not lost
            let mut notifications = match peripheral.notifications().await {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = sink.send(TransportEvent::NotificationsEnabled {
                        link,
                        result: Err(e.to_string()),
                    });
                    return;
                }
            };

            let result = peripheral.subscribe(&target).await.map_err(|e| e.to_string());
            let subscribed = result.is_ok();
            let _ = sink.send(TransportEvent::NotificationsEnabled { link, result });
            if !subscribed {
                return;
            }

            while let Some(notification) = notifications.next().await {
                let event = TransportEvent::Notification {
                    link,
                    characteristic: notification.uuid,
                    value: notification.value,
                };
                if sink.send(event).is_err() {
                    return;
                }
            }

            let _ = sink.send(TransportEvent::LinkDown {
                link,
                reason: "notification stream ended".to_string(),
            });
        });

        self.track(link, task);
        Ok(())
    }

    fn close(&mut self, link: LinkId) {
        let open = self
            .links
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&link);
        let Some(open) = open else {
            return;
        };

        for task in open.tasks {
            task.abort();
        }
        if let Some(peripheral) = open.peripheral {
            self.handle.spawn(async move {
                if let Err(e) = peripheral.disconnect().await {
                    debug!(%link, error = %e, "disconnect failed");
                }
            });
        }
    }
}
