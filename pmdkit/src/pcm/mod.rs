/// SMPTE 337m framing state machine.
///
/// Wraps payload bursts into 20-bit words on a PCM channel or channel
/// pair, and scans them back out with local corruption recovery.
pub mod smpte337m;

/// Video-sync sample counting over the per-rate frame-size cycles.
pub mod vsync;

/// Write side: serialize the active model into PCM once per frame.
pub mod augment;

/// Read side: rebuild the model from the bursts in PCM.
pub mod extract;

/// Frame captor: locate and decode one frame in an arbitrary blob.
pub mod capture;
