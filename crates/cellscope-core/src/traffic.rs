//! Traffic recording
//!
//! Keeps a bounded in-memory log of raw bytes crossing the wire in either
//! direction, and fans events out to live subscribers. The log is a fixed
//! capacity FIFO with oldest-entry eviction; while paused, new events are
//! dropped rather than buffered.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Maximum events kept in memory before evicting the oldest
pub const MAX_BUFFER_SIZE: usize = 10000;

/// Broadcast channel depth for live subscribers; a subscriber that lags
/// further than this loses its oldest undelivered events
const SUBSCRIBER_DEPTH: usize = 256;

/// Which way bytes crossed the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Host to device
    Tx,
    /// Device to host
    Rx,
}

/// One directional byte event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrafficEvent {
    /// Direction the bytes traveled
    pub direction: Direction,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// The raw bytes
    pub bytes: Vec<u8>,
}

struct RecorderState {
    buffer: VecDeque<TrafficEvent>,
    paused: bool,
}

/// Bounded, pausable recorder of wire traffic
pub struct TrafficRecorder {
    state: Mutex<RecorderState>,
    sender: broadcast::Sender<TrafficEvent>,
    capacity: usize,
}

impl TrafficRecorder {
    /// Create a recorder holding at most `capacity` events
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(SUBSCRIBER_DEPTH);
        Self {
            state: Mutex::new(RecorderState {
                buffer: VecDeque::with_capacity(capacity.min(MAX_BUFFER_SIZE)),
                paused: false,
            }),
            sender,
            capacity,
        }
    }

    /// Record a directional byte event. Dropped while paused; evicts the
    /// oldest entry once the buffer is full. Each live subscriber receives
    /// the event at most once.
    pub fn record(&self, direction: Direction, bytes: &[u8]) {
        let event = TrafficEvent {
            direction,
            timestamp: Utc::now(),
            bytes: bytes.to_vec(),
        };

        {
            let mut state = self.state.lock().expect("recorder lock");
            if state.paused {
                return;
            }
            if state.buffer.len() >= self.capacity {
                state.buffer.pop_front();
            }
            state.buffer.push_back(event.clone());
        }

        // No receivers is fine; the log alone is still useful
        let _ = self.sender.send(event);
    }

    /// Stop accepting events; events arriving while paused are dropped
    pub fn pause(&self) {
        self.state.lock().expect("recorder lock").paused = true;
    }

    /// Resume accepting events
    pub fn resume(&self) {
        self.state.lock().expect("recorder lock").paused = false;
    }

    /// Whether the recorder is currently paused
    pub fn is_paused(&self) -> bool {
        self.state.lock().expect("recorder lock").paused
    }

    /// Subscribe to live events. Unsubscribing is dropping the receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<TrafficEvent> {
        self.sender.subscribe()
    }

    /// Snapshot of the buffered events, oldest first
    pub fn events(&self) -> Vec<TrafficEvent> {
        self.state
            .lock()
            .expect("recorder lock")
            .buffer
            .iter()
            .cloned()
            .collect()
    }

    /// Number of buffered events
    pub fn len(&self) -> usize {
        self.state.lock().expect("recorder lock").buffer.len()
    }

    /// Whether the buffer is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all buffered events
    pub fn clear(&self) {
        self.state.lock().expect("recorder lock").buffer.clear();
    }
}

impl Default for TrafficRecorder {
    fn default() -> Self {
        Self::with_capacity(MAX_BUFFER_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_snapshot() {
        let recorder = TrafficRecorder::default();
        recorder.record(Direction::Tx, &[0xDD, 0xA5]);
        recorder.record(Direction::Rx, &[0xDD, 0x03]);

        let events = recorder.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].direction, Direction::Tx);
        assert_eq!(events[1].bytes, vec![0xDD, 0x03]);
    }

    #[test]
    fn test_capacity_evicts_oldest() {
        let recorder = TrafficRecorder::with_capacity(3);
        for i in 0..5u8 {
            recorder.record(Direction::Rx, &[i]);
        }
        let events = recorder.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].bytes, vec![2]);
        assert_eq!(events[2].bytes, vec![4]);
    }

    #[test]
    fn test_pause_drops_events() {
        let recorder = TrafficRecorder::default();
        recorder.record(Direction::Tx, &[1]);
        recorder.pause();
        recorder.record(Direction::Tx, &[2]);
        recorder.resume();
        recorder.record(Direction::Tx, &[3]);

        let bytes: Vec<Vec<u8>> = recorder.events().into_iter().map(|e| e.bytes).collect();
        assert_eq!(bytes, vec![vec![1], vec![3]]);
    }

    #[tokio::test]
    async fn test_subscriber_receives_each_event_once() {
        let recorder = TrafficRecorder::default();
        let mut rx = recorder.subscribe();

        recorder.record(Direction::Tx, &[0xAA]);
        recorder.record(Direction::Rx, &[0xBB]);

        assert_eq!(rx.recv().await.unwrap().bytes, vec![0xAA]);
        assert_eq!(rx.recv().await.unwrap().bytes, vec![0xBB]);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_paused_events_not_broadcast() {
        let recorder = TrafficRecorder::default();
        let mut rx = recorder.subscribe();

        recorder.pause();
        recorder.record(Direction::Tx, &[0xAA]);
        recorder.resume();
        recorder.record(Direction::Tx, &[0xBB]);

        assert_eq!(rx.recv().await.unwrap().bytes, vec![0xBB]);
    }
}
