//! RecoverySense: live heart-rate capture from BLE chest straps, session
//! training load, and next-session recommendations.

pub mod ble;
pub mod config;
pub mod database;
pub mod error;
pub mod import;
pub mod logging;
pub mod models;
pub mod recommendation;
pub mod recorder;
pub mod session;
pub mod training_load;

// Re-export commonly used types for convenience
pub use ble::{ConnectionState, DeviceLink, LinkConfig, LinkStatus};
pub use database::{Database, SessionStore};
pub use error::{ImportError, LinkError, RecoverySenseError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use models::*;
pub use recommendation::compute_recommendation;
pub use recorder::Recorder;
pub use session::SessionController;
