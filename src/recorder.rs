//! Live session recorder.
//!
//! Buffers heart-rate values while recording is on. The notification path
//! appends and `end_recording` snapshots-and-clears under the same lock, so a
//! concurrent sample lands either in the returned session or nowhere.

use std::mem;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::HeartRateSample;

#[derive(Debug, Default)]
struct RecorderState {
    recording: bool,
    started_at_ms: i64,
    buffer: Vec<HeartRateSample>,
}

/// A finished recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedSession {
    pub started_at_ms: i64,
    pub samples: Vec<HeartRateSample>,
}

/// Shared handle to the recording buffer
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    state: Arc<Mutex<RecorderState>>,
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Discard any previous buffer and start recording now
    pub fn begin_recording(&self) {
        self.begin_recording_at(now_ms());
    }

    pub fn begin_recording_at(&self, started_at_ms: i64) {
        let mut state = self.lock();
        if !state.buffer.is_empty() {
            debug!(discarded = state.buffer.len(), "Discarding previous buffer");
        }
        state.recording = true;
        state.started_at_ms = started_at_ms;
        state.buffer.clear();
        info!(started_at_ms, "Recording started");
    }

    pub fn is_recording(&self) -> bool {
        self.lock().recording
    }

    pub fn sample_count(&self) -> usize {
        self.lock().buffer.len()
    }

    /// Append a value stamped with the current wall-clock time
    pub fn on_heart_rate(&self, heart_rate: u16) {
        self.on_heart_rate_at(heart_rate, now_ms());
    }

    /// Append a value with an explicit timestamp. Dropped unless recording.
    pub fn on_heart_rate_at(&self, heart_rate: u16, timestamp: i64) {
        let mut state = self.lock();
        if state.recording {
            state.buffer.push(HeartRateSample::new(timestamp, heart_rate));
        }
    }

    /// Stop recording and take the buffer. Empty when not recording.
    pub fn end_recording(&self) -> Vec<HeartRateSample> {
        self.end_session()
            .map(|session| session.samples)
            .unwrap_or_default()
    }

    /// Stop recording and take the buffer with its start time
    pub fn end_session(&self) -> Option<RecordedSession> {
        let mut state = self.lock();
        if !state.recording {
            return None;
        }
        state.recording = false;
        let samples = mem::take(&mut state.buffer);
        info!(samples = samples.len(), "Recording stopped");

        Some(RecordedSession {
            started_at_ms: state.started_at_ms,
            samples,
        })
    }

    /// Feed every value from a heart-rate broadcast into this recorder
    pub fn attach(&self, mut receiver: broadcast::Receiver<u16>) -> JoinHandle<()> {
        let recorder = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(bpm) => recorder.on_heart_rate(bpm),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Recorder fell behind heart rate stream");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}
