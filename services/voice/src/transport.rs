//! Peer transport seam.
//!
//! The media transport (ICE, DTLS, SRTP, codecs) comes from the platform.
//! The negotiator drives it through these traits: attach the local track,
//! open the reliable events channel, produce an offer, apply the answer and
//! report connection state.

use crate::media::AudioTrack;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct TransportError(pub String);

/// Connection state reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl TransportState {
    /// States after which the call cannot continue.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransportState::Disconnected | TransportState::Failed | TransportState::Closed
        )
    }
}

/// Events surfaced by the control channel, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelEvent {
    Open,
    Message(String),
    Closed,
}

/// Outbound half of the control channel.
#[async_trait]
pub trait ControlChannel: Send + Sync {
    async fn send_text(&self, text: String) -> Result<(), TransportError>;
    async fn close(&self);
}

/// A freshly created control channel: the sender plus its inbound event queue.
pub struct ControlLink {
    pub sender: Arc<dyn ControlChannel>,
    pub events: mpsc::Receiver<ChannelEvent>,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Creates the reliable, ordered data channel. Must be called before
    /// [`PeerTransport::create_offer`] so the channel is part of the offer.
    async fn create_control_channel(&self, label: &str) -> Result<ControlLink, TransportError>;

    /// Creates the local offer and returns its SDP.
    async fn create_offer(&self) -> Result<String, TransportError>;

    /// Applies the remote answer SDP.
    async fn apply_answer(&self, sdp: &str) -> Result<(), TransportError>;

    fn state(&self) -> watch::Receiver<TransportState>;

    /// Closes the connection. Calling it again is a no-op.
    async fn close(&self);
}

/// Creates a peer transport carrying the given local track.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        track: &dyn AudioTrack,
    ) -> Result<Arc<dyn PeerTransport>, TransportError>;
}
