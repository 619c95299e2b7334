//! Device link state machine driven through its event pump by a scripted
//! in-memory transport.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use recoverysense::ble::transport::{
    event_queue, Advertisement, EventSink, GattCharacteristic, GattService, LinkId, RadioState,
    Transport, TransportError, TransportEvent, CLIENT_CONFIG_DESCRIPTOR, HEART_RATE_MEASUREMENT,
    HEART_RATE_SERVICE,
};
use recoverysense::ble::{ConnectionState, DeviceLink, LinkConfig, LinkStatus};
use recoverysense::error::LinkError;
use tokio::sync::watch;
use tokio::time::timeout;
use uuid::Uuid;

/// How the fake radio answers each command
#[derive(Clone)]
struct Script {
    radio: RadioState,
    advertisements: Vec<Advertisement>,
    scan_error: Option<String>,
    link_error: Option<String>,
    services: Result<Vec<GattService>, String>,
    subscribe: Result<(), String>,
    /// Hold the link in `Connecting` by never answering `connect`
    stall_connect: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            radio: RadioState::ready(),
            advertisements: vec![Advertisement {
                address: "A0:9E:1A:12:34:56".to_string(),
                name: Some("Polar H10 12345678".to_string()),
            }],
            scan_error: None,
            link_error: None,
            services: Ok(heart_rate_services(true)),
            subscribe: Ok(()),
            stall_connect: false,
        }
    }
}

#[derive(Default)]
struct Journal {
    scans_started: usize,
    scans_stopped: usize,
    connects: Vec<(LinkId, String)>,
    closed: Vec<LinkId>,
    last_link: Option<LinkId>,
}

struct ScriptedTransport {
    script: Script,
    sink: EventSink,
    journal: Arc<Mutex<Journal>>,
}

impl Transport for ScriptedTransport {
    fn radio_state(&self) -> RadioState {
        self.script.radio
    }

    fn start_scan(&mut self) -> Result<(), TransportError> {
        self.journal.lock().unwrap().scans_started += 1;
        if let Some(reason) = &self.script.scan_error {
            let _ = self.sink.send(TransportEvent::ScanFailed {
                reason: reason.clone(),
            });
            return Ok(());
        }
        for advertisement in &self.script.advertisements {
            let _ = self
                .sink
                .send(TransportEvent::Advertisement(advertisement.clone()));
        }
        Ok(())
    }

    fn stop_scan(&mut self) {
        self.journal.lock().unwrap().scans_stopped += 1;
    }

    fn connect(&mut self, link: LinkId, address: &str) -> Result<(), TransportError> {
        {
            let mut journal = self.journal.lock().unwrap();
            journal.connects.push((link, address.to_string()));
            journal.last_link = Some(link);
        }
        if self.script.stall_connect {
            return Ok(());
        }
        let event = match &self.script.link_error {
            Some(reason) => TransportEvent::LinkDown {
                link,
                reason: reason.clone(),
            },
            None => TransportEvent::LinkUp { link },
        };
        let _ = self.sink.send(event);
        Ok(())
    }

    fn discover_services(&mut self, link: LinkId) -> Result<(), TransportError> {
        let _ = self.sink.send(TransportEvent::ServicesDiscovered {
            link,
            result: self.script.services.clone(),
        });
        Ok(())
    }

    fn enable_notifications(
        &mut self,
        link: LinkId,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), TransportError> {
        assert_eq!(service, HEART_RATE_SERVICE);
        assert_eq!(characteristic, HEART_RATE_MEASUREMENT);
        let _ = self.sink.send(TransportEvent::NotificationsEnabled {
            link,
            result: self.script.subscribe.clone(),
        });
        Ok(())
    }

    fn close(&mut self, link: LinkId) {
        self.journal.lock().unwrap().closed.push(link);
    }
}

fn heart_rate_services(with_descriptor: bool) -> Vec<GattService> {
    vec![
        GattService {
            uuid: Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb),
            characteristics: vec![],
        },
        GattService {
            uuid: HEART_RATE_SERVICE,
            characteristics: vec![GattCharacteristic {
                uuid: HEART_RATE_MEASUREMENT,
                descriptors: if with_descriptor {
                    vec![CLIENT_CONFIG_DESCRIPTOR]
                } else {
                    vec![]
                },
            }],
        },
    ]
}

struct Harness {
    link: DeviceLink,
    sink: EventSink,
    journal: Arc<Mutex<Journal>>,
    status: watch::Receiver<LinkStatus>,
}

impl Harness {
    fn new(script: Script) -> Self {
        let (sink, queue) = event_queue();
        let journal = Arc::new(Mutex::new(Journal::default()));
        let transport = ScriptedTransport {
            script,
            sink: sink.clone(),
            journal: journal.clone(),
        };
        let link = DeviceLink::new(Box::new(transport), LinkConfig::default());
        link.spawn_event_pump(queue);
        let status = link.watch_status();

        Self {
            link,
            sink,
            journal,
            status,
        }
    }

    /// Wait until the published state satisfies `done`
    async fn wait_for(&mut self, done: impl Fn(&ConnectionState) -> bool) -> LinkStatus {
        timeout(Duration::from_secs(2), async {
            loop {
                let current = self.status.borrow_and_update().clone();
                if done(&current.state) {
                    return current;
                }
                self.status.changed().await.unwrap();
            }
        })
        .await
        .expect("state not reached")
    }

    fn current_link(&self) -> LinkId {
        self.journal.lock().unwrap().last_link.unwrap()
    }

    fn notify(&self, link: LinkId, value: Vec<u8>) {
        self.sink
            .send(TransportEvent::Notification {
                link,
                characteristic: HEART_RATE_MEASUREMENT,
                value,
            })
            .unwrap();
    }

    /// Let the pump drain everything queued so far
    async fn settle(&self) {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }
}

#[tokio::test]
async fn test_scan_connects_to_first_matching_sensor() {
    let mut script = Script::default();
    script.advertisements.insert(
        0,
        Advertisement {
            address: "11:22:33:44:55:66".to_string(),
            name: Some("Forerunner".to_string()),
        },
    );
    let mut h = Harness::new(script);

    h.link.start_scan(None);
    let status = h.wait_for(|s| *s == ConnectionState::Connected).await;

    assert_eq!(status.info, "Connected to A0:9E:1A:12:34:56");
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.connects.len(), 1);
    assert_eq!(journal.connects[0].1, "A0:9E:1A:12:34:56");
    assert_eq!(journal.scans_stopped, 1);
}

#[tokio::test]
async fn test_scan_by_address_ignores_name() {
    let mut script = Script::default();
    script.advertisements = vec![
        Advertisement {
            address: "A0:9E:1A:12:34:56".to_string(),
            name: Some("Polar H10".to_string()),
        },
        Advertisement {
            address: "de:ad:be:ef:00:01".to_string(),
            name: None,
        },
    ];
    let mut h = Harness::new(script);

    h.link.start_scan(Some("DE:AD:BE:EF:00:01".to_string()));
    h.wait_for(|s| *s == ConnectionState::Connected).await;

    assert_eq!(h.journal.lock().unwrap().connects[0].1, "de:ad:be:ef:00:01");
}

#[tokio::test]
async fn test_connect_direct_skips_scanning() {
    let mut h = Harness::new(Script::default());

    h.link.connect_direct("A0:9E:1A:12:34:56");
    h.wait_for(|s| *s == ConnectionState::Connected).await;

    assert_eq!(h.journal.lock().unwrap().scans_started, 0);
}

#[tokio::test]
async fn test_heart_rate_flows_to_every_observer() {
    let mut h = Harness::new(Script::default());
    let mut first = h.link.subscribe_samples();
    let mut second = h.link.subscribe_samples();

    h.link.start_scan(None);
    h.wait_for(|s| *s == ConnectionState::Connected).await;
    let link = h.current_link();

    h.notify(link, vec![0x00, 64]);
    h.notify(link, vec![0x01, 0x2C, 0x01]);
    h.notify(link, vec![0x00]);
    h.notify(link, vec![0x00, 0]);
    h.settle().await;

    for rx in [&mut first, &mut second] {
        assert_eq!(rx.recv().await.unwrap(), 64);
        assert_eq!(rx.recv().await.unwrap(), 300);
        assert!(rx.try_recv().is_err());
    }
    assert_eq!(h.link.heart_rate(), Some(300));
    assert_eq!(h.link.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_disconnect_from_every_state_returns_to_idle() {
    // Idle
    let h = Harness::new(Script::default());
    h.link.disconnect();
    assert_eq!(h.link.state(), ConnectionState::Idle);

    // Scanning
    let mut script = Script::default();
    script.advertisements.clear();
    let mut h = Harness::new(script);
    h.link.start_scan(None);
    h.wait_for(|s| *s == ConnectionState::Scanning).await;
    h.link.disconnect();
    assert_eq!(h.link.state(), ConnectionState::Idle);
    assert_eq!(h.journal.lock().unwrap().scans_stopped, 1);

    // Connecting
    let mut script = Script::default();
    script.stall_connect = true;
    let mut h = Harness::new(script);
    h.link.connect_direct("A0:9E:1A:12:34:56");
    h.wait_for(|s| *s == ConnectionState::Connecting).await;
    h.link.disconnect();
    assert_eq!(h.link.state(), ConnectionState::Idle);
    let link = h.current_link();
    assert_eq!(h.journal.lock().unwrap().closed, vec![link]);

    // Error
    let mut script = Script::default();
    script.link_error = Some("status 133".to_string());
    let mut h = Harness::new(script);
    h.link.connect_direct("A0:9E:1A:12:34:56");
    h.wait_for(ConnectionState::is_error).await;
    h.link.disconnect();
    assert_eq!(h.link.state(), ConnectionState::Idle);
    assert_eq!(h.link.info(), "Not connected");
}

#[tokio::test]
async fn test_disconnect_while_connected_stops_samples() {
    let mut h = Harness::new(Script::default());
    let mut samples = h.link.subscribe_samples();

    h.link.start_scan(None);
    h.wait_for(|s| *s == ConnectionState::Connected).await;
    let link = h.current_link();
    h.notify(link, vec![0x00, 70]);
    h.settle().await;
    assert_eq!(h.link.heart_rate(), Some(70));

    h.link.disconnect();
    assert_eq!(h.link.state(), ConnectionState::Idle);
    assert_eq!(h.link.heart_rate(), None);
    assert_eq!(h.journal.lock().unwrap().closed, vec![link]);

    // A notification already in flight for the closed link is dropped
    h.notify(link, vec![0x00, 71]);
    h.settle().await;
    assert_eq!(samples.recv().await.unwrap(), 70);
    assert!(samples.try_recv().is_err());
    assert_eq!(h.link.heart_rate(), None);
}

#[tokio::test]
async fn test_repeated_scan_is_idempotent() {
    let mut script = Script::default();
    script.advertisements.clear();
    let mut h = Harness::new(script);

    h.link.start_scan(None);
    h.wait_for(|s| *s == ConnectionState::Scanning).await;
    h.link.start_scan(None);
    h.link.connect_direct("A0:9E:1A:12:34:56");

    assert_eq!(h.link.state(), ConnectionState::Scanning);
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.scans_started, 1);
    assert!(journal.connects.is_empty());
}

#[tokio::test]
async fn test_permission_and_adapter_checks() {
    let mut script = Script::default();
    script.radio = RadioState {
        adapter_enabled: false,
        scan_permitted: false,
    };
    let h = Harness::new(script);
    h.link.start_scan(None);
    // Permission is checked first
    assert_eq!(h.link.info(), LinkError::PermissionDenied.to_string());

    let mut script = Script::default();
    script.radio.adapter_enabled = false;
    let h = Harness::new(script);
    h.link.connect_direct("A0:9E:1A:12:34:56");
    assert_eq!(
        h.link.state(),
        ConnectionState::Error(LinkError::AdapterDisabled.to_string())
    );
    assert!(h.journal.lock().unwrap().connects.is_empty());
}

#[tokio::test]
async fn test_scan_failure_surfaces_as_error() {
    let mut script = Script::default();
    script.scan_error = Some("code 2".to_string());
    let mut h = Harness::new(script);

    h.link.start_scan(None);
    let status = h.wait_for(ConnectionState::is_error).await;
    assert_eq!(status.info, "Scan failed: code 2");
    assert_eq!(h.journal.lock().unwrap().scans_stopped, 1);
}

#[tokio::test]
async fn test_discovery_failures_release_the_link() {
    let cases: Vec<(Result<Vec<GattService>, String>, LinkError)> = vec![
        (Ok(vec![]), LinkError::ServiceNotFound),
        (
            Ok(vec![GattService {
                uuid: HEART_RATE_SERVICE,
                characteristics: vec![],
            }]),
            LinkError::CharacteristicNotFound,
        ),
        (Ok(heart_rate_services(false)), LinkError::DescriptorMissing),
        (
            Err("status 129".to_string()),
            LinkError::ConnectionFailed("status 129".to_string()),
        ),
    ];

    for (services, expected) in cases {
        let mut script = Script::default();
        script.services = services;
        let mut h = Harness::new(script);

        h.link.connect_direct("A0:9E:1A:12:34:56");
        let status = h.wait_for(ConnectionState::is_error).await;

        assert_eq!(status.state, ConnectionState::Error(expected.to_string()));
        assert_eq!(status.info, expected.to_string());
        let link = h.current_link();
        assert_eq!(h.journal.lock().unwrap().closed, vec![link]);
    }
}

#[tokio::test]
async fn test_subscribe_failure_is_reported() {
    let mut script = Script::default();
    script.subscribe = Err("status 3".to_string());
    let mut h = Harness::new(script);

    h.link.connect_direct("A0:9E:1A:12:34:56");
    let status = h.wait_for(ConnectionState::is_error).await;
    assert_eq!(
        status.info,
        LinkError::NotificationEnableFailed("status 3".to_string()).to_string()
    );
}

#[tokio::test]
async fn test_error_is_recoverable() {
    let mut script = Script::default();
    script.link_error = Some("status 8".to_string());
    let mut h = Harness::new(script);

    h.link.connect_direct("A0:9E:1A:12:34:56");
    h.wait_for(ConnectionState::is_error).await;
    assert_eq!(h.link.heart_rate(), None);

    // A fresh attempt gets a fresh link id
    h.link.connect_direct("A0:9E:1A:12:34:56");
    h.wait_for(ConnectionState::is_error).await;
    let journal = h.journal.lock().unwrap();
    assert_eq!(journal.connects.len(), 2);
    assert_ne!(journal.connects[0].0, journal.connects[1].0);
}

#[tokio::test]
async fn test_dropped_link_after_connect_is_an_error() {
    let mut h = Harness::new(Script::default());
    h.link.start_scan(None);
    h.wait_for(|s| *s == ConnectionState::Connected).await;
    let link = h.current_link();

    h.notify(link, vec![0x00, 90]);
    h.sink
        .send(TransportEvent::LinkDown {
            link,
            reason: "status 8".to_string(),
        })
        .unwrap();

    let status = h.wait_for(ConnectionState::is_error).await;
    assert_eq!(status.info, "Connection failed: status 8");
    assert_eq!(h.link.heart_rate(), None);
}

#[tokio::test]
async fn test_state_and_info_publish_together() {
    let mut script = Script::default();
    script.advertisements.clear();
    let h = Harness::new(script);
    let mut observer = h.link.watch_status();

    h.link.start_scan(None);
    observer.changed().await.unwrap();
    let status = observer.borrow_and_update().clone();
    assert_eq!(status.state, ConnectionState::Scanning);
    assert_eq!(status.info, "Scanning for heart rate sensor...");
}
