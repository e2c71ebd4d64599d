//! Delivery of per-frame detection snapshots to one peer

use crate::detection::Detection;
use crate::transport::{ChannelState, ControlChannel};
use crate::wire;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Why a snapshot was not delivered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The channel has not finished opening
    NotOpen,
    /// The channel's send buffer is above the high-water mark
    BufferFull,
    /// The channel is closing, closed, or failed a previous send
    Closed,
    /// The snapshot could not be encoded
    Serialization,
    /// Empty snapshot suppressed by configuration
    Empty,
}

/// Result of one [`ResultChannel::send`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Handed to the channel
    Sent,
    /// Discarded; there is no retry
    Dropped(DropReason),
}

/// Delivery counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ResultStats {
    /// Snapshots handed to the channel
    pub sent: u64,
    /// Snapshots discarded
    pub dropped: u64,
}

/// Owns the control channel of one session and sends one JSON snapshot
/// per processed frame.
///
/// Sends never wait for the peer: a message that cannot be accepted right
/// now is dropped, since a late snapshot is worse than a missing one. The
/// first transport error marks the channel dead and every later send is a
/// no-op.
pub struct ResultChannel {
    channel: Arc<dyn ControlChannel>,
    max_buffered_bytes: usize,
    send_empty: bool,
    dead: AtomicBool,
    sent: AtomicU64,
    dropped: AtomicU64,
}

impl ResultChannel {
    /// Wrap an open control channel
    pub fn new(channel: Arc<dyn ControlChannel>, max_buffered_bytes: usize, send_empty: bool) -> Self {
        Self {
            channel,
            max_buffered_bytes,
            send_empty,
            dead: AtomicBool::new(false),
            sent: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Label of the underlying channel
    pub fn label(&self) -> &str {
        self.channel.label()
    }

    /// Whether sends can still succeed
    pub fn is_closed(&self) -> bool {
        self.dead.load(Ordering::Acquire)
            || matches!(
                self.channel.state(),
                ChannelState::Closing | ChannelState::Closed
            )
    }

    /// Stop delivering; later sends are dropped
    pub fn close(&self) {
        self.dead.store(true, Ordering::Release);
    }

    /// Delivery counters so far
    pub fn stats(&self) -> ResultStats {
        ResultStats {
            sent: self.sent.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Send one frame's detections, sorted by payload
    pub async fn send(&self, detections: &[Detection]) -> SendOutcome {
        let outcome = self.try_send(detections).await;
        match outcome {
            SendOutcome::Sent => self.sent.fetch_add(1, Ordering::Relaxed),
            SendOutcome::Dropped(reason) => {
                trace!(label = self.label(), ?reason, "Result snapshot dropped");
                self.dropped.fetch_add(1, Ordering::Relaxed)
            }
        };
        outcome
    }

    async fn try_send(&self, detections: &[Detection]) -> SendOutcome {
        if self.dead.load(Ordering::Acquire) {
            return SendOutcome::Dropped(DropReason::Closed);
        }
        match self.channel.state() {
            ChannelState::Open => {}
            ChannelState::Connecting => return SendOutcome::Dropped(DropReason::NotOpen),
            ChannelState::Closing | ChannelState::Closed => {
                self.close();
                return SendOutcome::Dropped(DropReason::Closed);
            }
        }
        if detections.is_empty() && !self.send_empty {
            return SendOutcome::Dropped(DropReason::Empty);
        }
        if self.channel.buffered_amount().await > self.max_buffered_bytes {
            return SendOutcome::Dropped(DropReason::BufferFull);
        }

        let message = match wire::encode_detections(detections) {
            Ok(message) => message,
            Err(e) => {
                debug!(label = self.label(), error = %e, "Failed to encode detections");
                return SendOutcome::Dropped(DropReason::Serialization);
            }
        };

        match self.channel.send_text(message).await {
            Ok(()) => SendOutcome::Sent,
            Err(e) => {
                debug!(label = self.label(), error = %e, "Control channel send failed, closing results");
                self.close();
                SendOutcome::Dropped(DropReason::Closed)
            }
        }
    }
}

impl std::fmt::Debug for ResultChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultChannel")
            .field("label", &self.label())
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Late-bound attachment point between a frame tap and a result channel.
///
/// The session writes it when both ends exist; the tap reads it once per
/// frame. An empty slot means results for that frame are discarded.
#[derive(Debug, Default)]
pub struct ChannelSlot {
    current: RwLock<Option<Arc<ResultChannel>>>,
}

impl ChannelSlot {
    /// Create an empty slot
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a channel, replacing any previous one
    pub fn bind(&self, channel: Arc<ResultChannel>) {
        *self.current.write() = Some(channel);
    }

    /// Unbind and return the channel, if any
    pub fn clear(&self) -> Option<Arc<ResultChannel>> {
        self.current.write().take()
    }

    /// Channel bound right now
    pub fn current(&self) -> Option<Arc<ResultChannel>> {
        self.current.read().clone()
    }

    /// Whether a channel is bound
    pub fn is_bound(&self) -> bool {
        self.current.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detection::{BoundingBox, Symbology};
    use crate::error::{Result, ScanRtcError};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct RecordingChannel {
        state: Mutex<Option<ChannelState>>,
        buffered: Mutex<usize>,
        fail: AtomicBool,
        messages: Mutex<Vec<String>>,
    }

    impl RecordingChannel {
        fn open() -> Arc<Self> {
            let channel = Arc::new(Self::default());
            *channel.state.lock() = Some(ChannelState::Open);
            channel
        }
    }

    #[async_trait]
    impl ControlChannel for RecordingChannel {
        fn label(&self) -> &str {
            "chat"
        }

        fn state(&self) -> ChannelState {
            self.state.lock().unwrap_or(ChannelState::Connecting)
        }

        async fn buffered_amount(&self) -> usize {
            *self.buffered.lock()
        }

        async fn send_text(&self, text: String) -> Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(ScanRtcError::ChannelClosed {
                    label: "chat".to_string(),
                });
            }
            self.messages.lock().push(text);
            Ok(())
        }
    }

    fn detections() -> Vec<Detection> {
        vec![
            Detection::new(BoundingBox::new(0, 0, 10, 10), "b", Symbology::QrCode),
            Detection::new(BoundingBox::new(0, 20, 10, 10), "a", Symbology::Code39),
        ]
    }

    #[tokio::test]
    async fn test_sends_sorted_snapshot() {
        let channel = RecordingChannel::open();
        let results = ResultChannel::new(channel.clone(), 1024, true);

        assert_eq!(results.send(&detections()).await, SendOutcome::Sent);
        let messages = channel.messages.lock().clone();
        assert_eq!(messages.len(), 1);
        let decoded = wire::decode_detections(&messages[0]).unwrap();
        assert_eq!(decoded[0].payload, "a");
        assert_eq!(decoded[1].payload, "b");
        assert_eq!(results.stats(), ResultStats { sent: 1, dropped: 0 });
    }

    #[tokio::test]
    async fn test_drops_when_not_open() {
        let channel = Arc::new(RecordingChannel::default());
        let results = ResultChannel::new(channel.clone(), 1024, true);

        assert_eq!(
            results.send(&detections()).await,
            SendOutcome::Dropped(DropReason::NotOpen)
        );
        // still usable once it opens
        *channel.state.lock() = Some(ChannelState::Open);
        assert_eq!(results.send(&detections()).await, SendOutcome::Sent);
    }

    #[tokio::test]
    async fn test_drops_above_high_water_mark() {
        let channel = RecordingChannel::open();
        *channel.buffered.lock() = 4096;
        let results = ResultChannel::new(channel.clone(), 1024, true);

        assert_eq!(
            results.send(&detections()).await,
            SendOutcome::Dropped(DropReason::BufferFull)
        );
        assert!(channel.messages.lock().is_empty());
        assert!(!results.is_closed());
    }

    #[tokio::test]
    async fn test_send_failure_makes_later_sends_noop() {
        let channel = RecordingChannel::open();
        channel.fail.store(true, Ordering::SeqCst);
        let results = ResultChannel::new(channel.clone(), 1024, true);

        assert_eq!(
            results.send(&detections()).await,
            SendOutcome::Dropped(DropReason::Closed)
        );
        channel.fail.store(false, Ordering::SeqCst);
        assert_eq!(
            results.send(&detections()).await,
            SendOutcome::Dropped(DropReason::Closed)
        );
        assert!(channel.messages.lock().is_empty());
        assert_eq!(results.stats().dropped, 2);
    }

    #[tokio::test]
    async fn test_empty_snapshot_policy() {
        let channel = RecordingChannel::open();
        let sending = ResultChannel::new(channel.clone(), 1024, true);
        assert_eq!(sending.send(&[]).await, SendOutcome::Sent);
        assert_eq!(channel.messages.lock().as_slice(), ["[]".to_string()]);

        let suppressing = ResultChannel::new(channel.clone(), 1024, false);
        assert_eq!(
            suppressing.send(&[]).await,
            SendOutcome::Dropped(DropReason::Empty)
        );
    }

    #[test]
    fn test_slot_bind_and_clear() {
        let slot = ChannelSlot::new();
        assert!(!slot.is_bound());
        slot.bind(Arc::new(ResultChannel::new(RecordingChannel::open(), 1024, true)));
        assert!(slot.is_bound());
        assert!(slot.clear().is_some());
        assert!(slot.current().is_none());
    }
}
