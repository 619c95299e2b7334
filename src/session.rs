//! Control facade over the link, recorder, store and recommendation engine.

use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::info;

use crate::ble::link::{ConnectionState, DeviceLink, LinkStatus};
use crate::database::{DatabaseError, SavedSession, SessionStore};
use crate::models::{Recommendation, TrainingDay};
use crate::recommendation;
use crate::recorder::Recorder;

/// Wires a device link to a recorder and a session store
pub struct SessionController<S: SessionStore> {
    link: DeviceLink,
    recorder: Recorder,
    store: Arc<Mutex<S>>,
    feed: JoinHandle<()>,
}

impl<S: SessionStore> SessionController<S> {
    /// Must be called inside a tokio runtime: the recorder feed is a task
    pub fn new(link: DeviceLink, store: S) -> Self {
        let recorder = Recorder::new();
        let feed = recorder.attach(link.subscribe_samples());

        Self {
            link,
            recorder,
            store: Arc::new(Mutex::new(store)),
            feed,
        }
    }

    pub fn link(&self) -> &DeviceLink {
        &self.link
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn start_scan(&self, address: Option<String>) {
        self.link.start_scan(address);
    }

    pub fn connect_direct(&self, address: impl Into<String>) {
        self.link.connect_direct(address);
    }

    pub fn disconnect(&self) {
        self.link.disconnect();
    }

    pub fn begin_recording(&self) {
        self.recorder.begin_recording();
    }

    /// Stop recording and persist what was captured. `None` when nothing
    /// was being recorded or no sample arrived.
    pub fn end_recording_and_save(&self) -> Result<Option<SavedSession>, DatabaseError> {
        let Some(session) = self.recorder.end_session() else {
            return Ok(None);
        };
        if session.samples.is_empty() {
            info!("Recording ended without samples, nothing saved");
            return Ok(None);
        }

        let saved = self
            .store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .save_session(&session.samples, session.started_at_ms)?;
        info!(session = %saved.id, samples = session.samples.len(), "Live session saved");
        Ok(Some(saved))
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.link.state()
    }

    pub fn connection_info(&self) -> String {
        self.link.info()
    }

    pub fn heart_rate(&self) -> Option<u16> {
        self.link.heart_rate()
    }

    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.link.watch_status()
    }

    pub fn watch_heart_rate(&self) -> watch::Receiver<Option<u16>> {
        self.link.watch_heart_rate()
    }

    pub fn subscribe_samples(&self) -> broadcast::Receiver<u16> {
        self.link.subscribe_samples()
    }

    pub fn history(&self) -> Result<Vec<TrainingDay>, DatabaseError> {
        self.store
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_all_sessions()
    }

    /// Recommendation over a given history
    pub fn compute_recommendation(&self, history: &[TrainingDay]) -> Option<Recommendation> {
        recommendation::compute_recommendation(history)
    }

    /// Recommendation over everything stored
    pub fn recommend_from_store(&self) -> Result<Option<Recommendation>, DatabaseError> {
        Ok(self.compute_recommendation(&self.history()?))
    }

    /// Disconnect and stop feeding the recorder
    pub fn shutdown(self) {
        self.link.shutdown();
        self.feed.abort();
    }
}
