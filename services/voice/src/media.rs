//! Local audio capture seam.
//!
//! Capturing the microphone is a platform capability. The negotiator only
//! needs a track it can hand to the transport, an optional analyser for the
//! level meter, and a way to stop the track.

use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CaptureError {
    /// The user or the OS refused access to the microphone.
    #[error("microphone permission denied")]
    PermissionDenied,
    #[error("no audio input device available")]
    NoDevice,
    #[error("audio device error: {0}")]
    Device(String),
}

/// Amplitude analysis attached to a track.
pub trait Analyser: Send + Sync {
    /// Number of frequency bins produced per read.
    fn bin_count(&self) -> usize;

    /// Fills `bins` with the current magnitude of each bin, scaled to `0..=255`.
    fn byte_frequency_data(&self, bins: &mut [u8]);
}

/// A live local audio track.
pub trait AudioTrack: Send + Sync {
    fn id(&self) -> &str;

    /// Analyser for the level meter, if the platform provides one.
    fn analyser(&self) -> Option<Arc<dyn Analyser>>;

    /// Stops capture and releases the device. Calling it again is a no-op.
    fn stop(&self);

    fn is_stopped(&self) -> bool;
}

/// Opens the local microphone.
#[async_trait]
pub trait AudioSource: Send + Sync {
    /// May wait indefinitely for a permission decision; callers cancel by
    /// dropping the future, which must not leave the device open.
    async fn capture(&self) -> Result<Arc<dyn AudioTrack>, CaptureError>;
}
