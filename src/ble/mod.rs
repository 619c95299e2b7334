//! Bluetooth LE heart-rate sensor support

pub mod decoder;
pub mod link;
pub mod transport;

#[cfg(feature = "bluetooth")]
pub mod btleplug;

pub use decoder::{decode, try_decode, DecodeFailure};
pub use link::{ConnectionState, DeviceLink, LinkConfig, LinkStatus, ScanTarget};
pub use transport::{event_queue, EventQueue, EventSink, LinkId, Transport, TransportEvent};

#[cfg(feature = "bluetooth")]
pub use self::btleplug::BtleplugTransport;
