//! Result wire format.
//!
//! Each message on a control channel is one UTF-8 JSON array describing
//! everything visible in one frame:
//!
//! ```json
//! [{"x":12,"y":40,"width":220,"height":96,"data":"036000291452","type":"UPCA"}]
//! ```
//!
//! Elements are ordered ascending by `data` (byte-wise string comparison),
//! ties keeping the detector's order. An empty array means the frame had no
//! symbols and is sent like any other snapshot.

use crate::detection::Detection;
use crate::error::Result;

/// Sort detections into wire order in place
pub fn sort_for_wire(detections: &mut [Detection]) {
    detections.sort_by(|a, b| a.payload.cmp(&b.payload));
}

/// Encode one frame's detections as a wire message
pub fn encode_detections(detections: &[Detection]) -> Result<String> {
    let mut ordered = detections.to_vec();
    sort_for_wire(&mut ordered);
    Ok(serde_json::to_string(&ordered)?)
}

/// Decode a wire message the way a client would
pub fn decode_detections(message: &str) -> Result<Vec<Detection>> {
    Ok(serde_json::from_str(message)?)
}
