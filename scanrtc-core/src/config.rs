//! Pipeline configuration types and defaults

/// Per-session pipeline tuning
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Run the detector on the blocking thread pool instead of the task
    /// that receives frames
    pub offload_detection: bool,
    /// Scan frames even while no result channel is bound. Results are
    /// discarded either way; off saves the work.
    pub decode_while_unbound: bool,
    /// Drop a snapshot when the control channel already buffers more than
    /// this many bytes
    pub max_buffered_bytes: usize,
    /// Send `[]` for frames without symbols
    pub send_empty: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            offload_detection: true,
            decode_while_unbound: false,
            max_buffered_bytes: 64 * 1024,
            send_empty: true,
        }
    }
}

impl PipelineConfig {
    /// Everything inline on the receiving task; used by deterministic tests
    pub fn inline() -> Self {
        Self {
            offload_detection: false,
            ..Self::default()
        }
    }
}
