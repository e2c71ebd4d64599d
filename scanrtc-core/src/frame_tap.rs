//! Frame interception between an inbound track and its consumers

use crate::config::PipelineConfig;
use crate::detection::{Detection, Detector};
use crate::error::Result;
use crate::frame::VideoFrame;
use crate::result_channel::{ChannelSlot, SendOutcome};
use crate::transport::InboundTrack;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

/// Wraps one inbound video track. Every frame pulled through [`FrameTap::recv`]
/// is scanned and, when a result channel is bound, its detections are sent
/// before the frame is handed back unchanged.
///
/// Frames are processed strictly one after another, so snapshots leave in
/// arrival order even when detection runs on the blocking pool.
pub struct FrameTap {
    track: Box<dyn InboundTrack>,
    track_id: String,
    detector: Arc<dyn Detector>,
    slot: Arc<ChannelSlot>,
    offload: bool,
    decode_while_unbound: bool,
    frames: Arc<AtomicU64>,
}

impl FrameTap {
    /// Tap `track`, delivering results to whatever `slot` holds at each frame
    pub fn new(
        track: Box<dyn InboundTrack>,
        detector: Arc<dyn Detector>,
        slot: Arc<ChannelSlot>,
        config: &PipelineConfig,
    ) -> Self {
        let track_id = track.id().to_string();
        Self {
            track,
            track_id,
            detector,
            slot,
            offload: config.offload_detection,
            decode_while_unbound: config.decode_while_unbound,
            frames: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Identifier of the tapped track
    pub fn track_id(&self) -> &str {
        &self.track_id
    }

    /// Shared counter of frames pulled through this tap
    pub fn frame_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.frames)
    }

    /// Pull the next frame, scan it, and return it unchanged.
    ///
    /// Returns `Ok(None)` at end of stream.
    pub async fn recv(&mut self) -> Result<Option<VideoFrame>> {
        let Some(frame) = self.track.recv().await? else {
            return Ok(None);
        };
        self.frames.fetch_add(1, Ordering::Relaxed);

        match self.slot.current() {
            Some(channel) => {
                let detections = detect(&self.detector, self.offload, &frame).await;
                if channel.send(&detections).await == SendOutcome::Sent {
                    trace!(
                        track_id = %self.track_id,
                        sequence = frame.sequence,
                        count = detections.len(),
                        "Detections delivered"
                    );
                }
            }
            None if self.decode_while_unbound => {
                let detections = detect(&self.detector, self.offload, &frame).await;
                trace!(
                    track_id = %self.track_id,
                    sequence = frame.sequence,
                    count = detections.len(),
                    "No result channel bound, detections discarded"
                );
            }
            None => {}
        }

        Ok(Some(frame))
    }

    /// Stop the underlying track
    pub fn stop(&mut self) {
        self.track.stop();
    }
}

async fn detect(detector: &Arc<dyn Detector>, offload: bool, frame: &VideoFrame) -> Vec<Detection> {
    if !offload {
        return detector.detect(&frame.buffer);
    }

    let detector = Arc::clone(detector);
    let buffer = frame.buffer.clone();
    match tokio::task::spawn_blocking(move || detector.detect(&buffer)).await {
        Ok(detections) => detections,
        Err(e) => {
            debug!(sequence = frame.sequence, error = %e, "Detector task failed, treating frame as empty");
            Vec::new()
        }
    }
}

impl std::fmt::Debug for FrameTap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameTap")
            .field("track_id", &self.track_id)
            .field("detector", &self.detector)
            .field("bound", &self.slot.is_bound())
            .field("frames", &self.frames.load(Ordering::Relaxed))
            .finish()
    }
}
